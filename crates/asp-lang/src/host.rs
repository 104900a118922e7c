//! The process-level runtime: one [`Host`] serves every request, each of
//! which gets its own [`Evaluator`] and built-in objects.

use std::{
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{
    Value,
    ast::node::Document,
    config::Config,
    error::{Error, InnerError},
    eval::{
        Evaluator,
        builtin::{CustomFunctions, FunctionTables},
        error::EvalError,
        flow::{Flow, Halt, RequestControl},
    },
    object::ObjectRef,
};

pub mod application;
pub mod document;
pub mod request;
pub mod response;
pub mod server;
pub mod session;
pub mod shared;
pub mod startup;

pub use application::{ApplicationObject, ApplicationStore};
pub use document::execute_document;
pub use request::{RequestData, RequestObject};
pub use response::{ResponseData, ResponseObject};
pub use server::ServerObject;
pub use session::{SessionData, SessionObject};
pub use shared::{Contents, SharedValue};
pub use startup::StartupRegistry;

/// Identifies one request for the lifetime of the host.
pub type RequestId = u64;

/// One unit of work for the host: a document plus the request it answers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub document: Arc<Document>,
    pub request: RequestData,
    /// The caller's session, or `None` to start a new one.
    pub session: Option<SessionData>,
}

impl HttpRequest {
    pub fn new(document: Arc<Document>) -> Self {
        Self {
            document,
            request: RequestData::default(),
            session: None,
        }
    }

    pub fn with_request(mut self, request: RequestData) -> Self {
        self.request = request;
        self
    }

    pub fn with_session(mut self, session: SessionData) -> Self {
        self.session = Some(session);
        self
    }
}

/// What a finished request hands back to the embedder.
#[derive(Debug)]
pub struct RequestOutcome {
    pub id: RequestId,
    pub response: ResponseData,
    pub session: Option<SessionData>,
    /// Set when `Response.End` or `Response.Redirect` stopped the document.
    pub halt: Option<Halt>,
    pub error: Option<Box<Error>>,
    pub elapsed: Duration,
}

impl RequestOutcome {
    /// The generated output, up to the point the request stopped.
    pub fn output(&self) -> &str {
        &self.response.body
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<String, Box<Error>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.response.body),
        }
    }
}

/// The built-in objects of one request, shared by the document and the
/// event handlers run on its behalf.
struct Intrinsics {
    control: Rc<RequestControl>,
    response: Rc<ResponseObject>,
    session: Option<SessionObject>,
    objects: Vec<(&'static str, ObjectRef)>,
}

/// Owns the state shared by all requests: the application store, the
/// startup registry and the custom function table.
#[derive(Debug)]
pub struct Host {
    config: Config,
    application: Arc<ApplicationStore>,
    startup: StartupRegistry,
    functions: Arc<CustomFunctions>,
    next_id: AtomicU64,
}

impl Default for Host {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Host {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            application: Arc::new(ApplicationStore::new()),
            startup: StartupRegistry::new(),
            functions: Arc::new(CustomFunctions::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Installs the document declaring the application and session events.
    pub fn with_global(self, document: Arc<Document>) -> Self {
        self.startup.set_global(document);
        self
    }

    pub fn set_global(&self, document: Arc<Document>) {
        self.startup.set_global(document);
    }

    /// Makes a native function callable from every request.
    pub fn register_function<F>(&self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.functions.register(name, func);
    }

    pub fn application(&self) -> &Arc<ApplicationStore> {
        &self.application
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one request to completion. Never panics: a panic inside the
    /// request is reported through [`RequestOutcome::error`].
    pub fn execute(&self, request: HttpRequest) -> RequestOutcome {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!("request", id, path = %request.request.path);
        let _enter = span.enter();
        tracing::debug!(method = %request.request.method, "request started");

        let session = request
            .session
            .clone()
            .unwrap_or_else(|| SessionData::new(format!("{:016X}", id)));
        let intrinsics = self.intrinsics(id, &request, Some(session));

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run(&request, &intrinsics)));
        self.application.release(id);

        let (halt, error) = match result {
            Ok(Ok(halt)) => (halt, None),
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "request failed");
                (None, Some(error))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "request panicked");
                (None, Some(Box::new(Error::panic(message))))
            }
        };

        let session = intrinsics.session.as_ref().map(|session| {
            let mut data = session.snapshot();
            data.is_new = false;
            data
        });
        let elapsed = intrinsics.control.elapsed();
        tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "request finished");

        RequestOutcome {
            id,
            response: intrinsics.response.take(),
            session,
            halt,
            error,
            elapsed,
        }
    }

    /// Runs `Application_OnEnd`, once, if the application was started.
    pub fn shutdown(&self) -> Result<bool, Box<Error>> {
        let Some(global) = self.startup.global() else {
            return Ok(false);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = HttpRequest::new(Arc::clone(&global));
        let intrinsics = self.intrinsics(id, &request, None);
        let result = self
            .startup
            .finish(|| self.run_event(&global, "application_onend", &intrinsics));
        self.application.release(id);
        result
    }

    fn run(&self, request: &HttpRequest, intrinsics: &Intrinsics) -> Result<Option<Halt>, Box<Error>> {
        if let Some(global) = self.startup.global() {
            self.startup
                .ensure_started(|| self.run_event(&global, "application_onstart", intrinsics))?;
            if intrinsics
                .session
                .as_ref()
                .is_some_and(SessionObject::is_new)
            {
                self.run_event(&global, "session_onstart", intrinsics)?;
            }
        }

        let document = &request.document;
        let mut evaluator = self.evaluator(intrinsics);
        match execute_document(&mut evaluator, document, &intrinsics.response) {
            Ok(Flow::Halt(halt)) => {
                tracing::debug!(?halt, "request halted");
                Ok(Some(halt))
            }
            Ok(_) => Ok(None),
            Err(error) => Err(Box::new(Error::from_error(
                document.source.as_deref(),
                InnerError::Eval(error),
                evaluator.take_error_range(),
            ))),
        }
    }

    /// Calls one of the event procedures of the global document, if it
    /// declares it.
    fn run_event(
        &self,
        global: &Document,
        name: &str,
        intrinsics: &Intrinsics,
    ) -> Result<(), Box<Error>> {
        let mut evaluator = self.evaluator(intrinsics);
        let result = evaluator
            .hoist(global.statements())
            .and_then(|()| evaluator.call_procedure_by_name(name, Vec::new()));

        match result {
            Ok(Some(_)) => {
                tracing::info!(event = name, "event handler finished");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(error) => {
                tracing::warn!(event = name, error = %error, "event handler failed");
                Err(Box::new(Error::from_error(
                    global.source.as_deref(),
                    InnerError::Eval(error),
                    evaluator.take_error_range(),
                )))
            }
        }
    }

    fn intrinsics(
        &self,
        id: RequestId,
        request: &HttpRequest,
        session: Option<SessionData>,
    ) -> Intrinsics {
        let control = Rc::new(RequestControl::new(Some(self.config.script_timeout)));
        let response = Rc::new(ResponseObject::new(Rc::clone(&control)));
        let session = session.map(SessionObject::new);

        let mut objects: Vec<(&'static str, ObjectRef)> = vec![
            ("response", response.clone() as ObjectRef),
            ("request", Rc::new(RequestObject::new(&request.request)) as ObjectRef),
            (
                "server",
                Rc::new(ServerObject::new(
                    self.config.root_dir.clone(),
                    &request.request.path,
                    Rc::clone(&control),
                )) as ObjectRef,
            ),
            (
                "application",
                Rc::new(ApplicationObject::new(
                    Arc::clone(&self.application),
                    id,
                    Rc::clone(&control),
                )) as ObjectRef,
            ),
        ];
        if let Some(session) = &session {
            objects.push(("session", Rc::new(session.clone()) as ObjectRef));
        }

        Intrinsics {
            control,
            response,
            session,
            objects,
        }
    }

    fn evaluator(&self, intrinsics: &Intrinsics) -> Evaluator {
        let mut evaluator =
            Evaluator::with_control(self.config.options(), Rc::clone(&intrinsics.control))
                .with_functions(FunctionTables::new(Arc::clone(&self.functions)));
        for (name, object) in &intrinsics.objects {
            evaluator.define_global(name, Value::Object(Rc::clone(object)));
        }
        evaluator
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::node::{Expr, Procedure, ProcedureKind, Section, Stmt, StmtKind};

    fn set_application(key: &str, value: Expr) -> Stmt {
        Stmt::assign(
            Expr::call(Expr::ident("application"), [Expr::string(key)]),
            value,
        )
    }

    fn global_document() -> Arc<Document> {
        let on_start = Procedure::new(
            ProcedureKind::Sub,
            "Application_OnStart",
            Vec::new(),
            vec![set_application(
                "starts",
                Expr::binary(
                    crate::ast::node::BinaryOp::Add,
                    Expr::call(Expr::ident("application"), [Expr::string("starts")]),
                    Expr::int(1),
                ),
            )],
        );
        let on_session = Procedure::new(
            ProcedureKind::Sub,
            "Session_OnStart",
            Vec::new(),
            vec![Stmt::assign(
                Expr::call(Expr::ident("session"), [Expr::string("greeting")]),
                Expr::string("hi"),
            )],
        );
        Arc::new(Document::from_program(vec![
            Stmt::new(StmtKind::Procedure(Arc::new(on_start))),
            Stmt::new(StmtKind::Procedure(Arc::new(on_session))),
        ]))
    }

    fn markup(text: &str) -> Arc<Document> {
        Arc::new(Document::new(vec![Section::Markup(text.to_string())]))
    }

    #[test]
    fn test_request_ids_increase() {
        let host = Host::default();
        let first = host.execute(HttpRequest::new(markup("a")));
        let second = host.execute(HttpRequest::new(markup("b")));
        assert!(second.id > first.id);
        assert_eq!(first.output(), "a");
        assert_eq!(second.into_result(), Ok("b".to_string()));
    }

    #[test]
    fn test_application_start_runs_once() {
        let host = Host::default().with_global(global_document());
        host.execute(HttpRequest::new(markup("")));
        host.execute(HttpRequest::new(markup("")));
        assert_eq!(host.application().get("starts"), Some(SharedValue::Integer(1)));
    }

    #[test]
    fn test_session_start_for_new_session_only() {
        let host = Host::default().with_global(global_document());
        let outcome = host.execute(HttpRequest::new(markup("")));
        let mut session = outcome.session.unwrap();
        assert!(!session.is_new);
        assert_eq!(session.contents.get("greeting"), Some(&SharedValue::from("hi")));

        session.contents.clear();
        let outcome = host.execute(HttpRequest::new(markup("")).with_session(session));
        assert!(outcome.session.unwrap().contents.is_empty());
    }

    #[test]
    fn test_panicking_function_is_reported() {
        let host = Host::default();
        host.register_function("explode", |_| panic!("kaboom"));
        let document = Arc::new(Document::from_program(vec![Stmt::call(Expr::call(
            Expr::ident("explode"),
            [Expr::int(1)],
        ))]));

        let outcome = host.execute(HttpRequest::new(document));
        let error = outcome.error.unwrap();
        assert_eq!(error.cause, InnerError::Panic("kaboom".to_string()));
    }

    #[test]
    fn test_lock_released_at_request_end() {
        let host = Host::default();
        let document = Arc::new(Document::from_program(vec![Stmt::call(Expr::member(
            Expr::ident("application"),
            "lock",
        ))]));

        let outcome = host.execute(HttpRequest::new(document));
        assert!(outcome.is_success());
        assert_eq!(host.application().holder(), None);
    }

    #[test]
    fn test_shutdown_requires_start() {
        let host = Host::default().with_global(global_document());
        assert_eq!(host.shutdown(), Ok(false));
        host.execute(HttpRequest::new(markup("")));
        assert_eq!(host.shutdown(), Ok(true));
    }
}
