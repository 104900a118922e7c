use std::sync::Arc;

use crate::{
    AspResult, Value,
    ast::{Program, node::Document},
    config::Config,
    eval::error::EvalError,
    host::{Host, HttpRequest, RequestData, RequestOutcome},
};

/// Renders documents against a private [`Host`].
///
/// A convenience for embedders that do not need sessions or request data;
/// everything else goes through [`Engine::host`].
#[derive(Debug, Default)]
pub struct Engine {
    host: Host,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self {
            host: Host::new(config),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn register_function<F>(&self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.host.register_function(name, func);
    }

    pub fn set_global(&self, document: impl Into<Arc<Document>>) {
        self.host.set_global(document.into());
    }

    /// Runs `document` as a GET of `/` and returns what it wrote.
    pub fn render(&self, document: impl Into<Arc<Document>>) -> AspResult {
        self.execute(document, RequestData::default()).into_result()
    }

    pub fn execute(
        &self,
        document: impl Into<Arc<Document>>,
        request: RequestData,
    ) -> RequestOutcome {
        self.host
            .execute(HttpRequest::new(document.into()).with_request(request))
    }

    /// Runs a bare statement list as a document with a single code block.
    pub fn eval(&self, program: Program) -> AspResult {
        self.render(Document::from_program(program))
    }
}
