use std::{sync::Arc, thread, time::Duration};

use asp_lang::{
    AstExpr as Expr, AstSection as Section, AstStmt as Stmt, AstStmtKind as StmtKind, Config,
    Document, EvalError, Halt, Host, HttpRequest, Ident, InnerError, RequestData, SharedValue,
    ast::node::{
        Access, BinaryOp, CaseClause, CaseTest, ClassDecl, ClassMember, ErrorMode, Param,
        Procedure, ProcedureKind, VarDecl,
    },
};
use rstest::{fixture, rstest};

fn write(expr: Expr) -> Stmt {
    Stmt::call(Expr::call(
        Expr::member(Expr::ident("response"), "write"),
        [expr],
    ))
}

fn concat(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinaryOp::Concat, lhs, rhs)
}

fn add(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinaryOp::Add, lhs, rhs)
}

fn item(object: &str, key: &str) -> Expr {
    Expr::call(Expr::ident(object), [Expr::string(key)])
}

fn program(statements: Vec<Stmt>) -> Arc<Document> {
    Arc::new(Document::from_program(statements))
}

#[fixture]
fn host() -> Host {
    Host::default()
}

fn render(host: &Host, document: Arc<Document>) -> Result<String, Box<asp_lang::Error>> {
    host.execute(HttpRequest::new(document)).into_result()
}

#[rstest]
#[case::for_loop(
    vec![
        Stmt::dim(&["out"]),
        Stmt::new(StmtKind::For {
            counter: Ident::new("i"),
            start: Expr::int(1),
            end: Expr::int(3),
            step: None,
            body: vec![Stmt::assign(Expr::ident("out"), concat(Expr::ident("out"), Expr::ident("i")))],
        }),
        write(Expr::ident("out")),
    ],
    "123"
)]
#[case::select_case_else(
    vec![
        Stmt::new(StmtKind::Select {
            subject: Expr::int(7),
            cases: vec![CaseClause {
                tests: vec![CaseTest::Range(Expr::int(1), Expr::int(5))],
                body: vec![Stmt::assign(Expr::ident("result"), Expr::string("low"))],
            }],
            otherwise: Some(vec![Stmt::assign(Expr::ident("result"), Expr::string("else"))]),
        }),
        write(Expr::ident("result")),
    ],
    "else"
)]
#[case::case_is(
    vec![
        Stmt::new(StmtKind::Select {
            subject: Expr::int(9),
            cases: vec![
                CaseClause {
                    tests: vec![CaseTest::Is(BinaryOp::Gt, Expr::int(5))],
                    body: vec![write(Expr::string("big"))],
                },
                CaseClause {
                    tests: vec![CaseTest::Value(Expr::int(9))],
                    body: vec![write(Expr::string("nine"))],
                },
            ],
            otherwise: None,
        }),
    ],
    "big"
)]
#[case::resume_next(
    vec![
        Stmt::new(StmtKind::OnError(ErrorMode::ResumeNext)),
        Stmt::assign(Expr::ident("x"), Expr::binary(BinaryOp::Div, Expr::int(1), Expr::int(0))),
        write(Expr::member(Expr::ident("err"), "number")),
    ],
    "11"
)]
#[case::dictionary(
    vec![
        Stmt::set(
            Expr::ident("d"),
            Expr::call(Expr::ident("CreateObject"), [Expr::string("Scripting.Dictionary")]),
        ),
        Stmt::call(Expr::call(Expr::member(Expr::ident("d"), "Add"), [Expr::string("a"), Expr::int(1)])),
        Stmt::call(Expr::call(Expr::member(Expr::ident("d"), "Add"), [Expr::string("b"), Expr::int(2)])),
        Stmt::new(StmtKind::ForEach {
            element: Ident::new("k"),
            group: Expr::ident("d"),
            body: vec![write(concat(Expr::ident("k"), Expr::call(Expr::ident("d"), [Expr::ident("k")])))],
        }),
    ],
    "a1b2"
)]
#[case::html_encode(
    vec![write(Expr::call(
        Expr::member(Expr::ident("server"), "HTMLEncode"),
        [Expr::string("<b>")],
    ))],
    "&lt;b&gt;"
)]
fn test_programs(host: Host, #[case] statements: Vec<Stmt>, #[case] expected: &str) {
    assert_eq!(render(&host, program(statements)), Ok(expected.to_string()));
}

#[rstest]
fn test_class_method_sets_field(host: Host) {
    let pick = Procedure::new(
        ProcedureKind::Function,
        "Pick",
        vec![Param::by_ref("id")],
        vec![Stmt::assign(Expr::ident("iId"), Expr::ident("id"))],
    );
    let class = ClassDecl {
        name: "Item".into(),
        members: vec![
            ClassMember::Field {
                access: Access::Public,
                decl: VarDecl::scalar("iId"),
            },
            ClassMember::Procedure(Arc::new(pick)),
        ],
    };

    let document = program(vec![
        Stmt::new(StmtKind::Class(Arc::new(class))),
        Stmt::set(Expr::ident("obj"), Expr::new_object("Item")),
        Stmt::call(Expr::call(
            Expr::member(Expr::ident("obj"), "Pick"),
            [Expr::int(5)],
        )),
        write(Expr::member(Expr::ident("obj"), "iId")),
    ]);

    assert_eq!(render(&host, document), Ok("5".to_string()));
}

#[rstest]
fn test_response_end_keeps_earlier_output(host: Host) {
    let document = Arc::new(Document::new(vec![
        Section::Markup("<p>".to_string()),
        Section::Code(vec![
            write(Expr::string("kept")),
            Stmt::call(Expr::member(Expr::ident("response"), "End")),
            write(Expr::string("dropped")),
        ]),
        Section::Markup("</p>".to_string()),
    ]));

    let outcome = host.execute(HttpRequest::new(document));
    assert!(outcome.is_success());
    assert_eq!(outcome.halt, Some(Halt::End));
    assert_eq!(outcome.output(), "<p>kept");
}

#[rstest]
fn test_redirect(host: Host) {
    let document = program(vec![
        write(Expr::string("ignored")),
        Stmt::call(Expr::call(
            Expr::member(Expr::ident("response"), "Redirect"),
            [Expr::string("/login.asp")],
        )),
    ]);

    let outcome = host.execute(HttpRequest::new(document));
    assert_eq!(outcome.halt, Some(Halt::Redirect("/login.asp".to_string())));
    assert_eq!(outcome.response.status_code(), 302);
    assert_eq!(outcome.output(), "");
}

#[test]
fn test_unlock_from_non_holder_is_noop() {
    let host = Host::new(Config {
        script_timeout: Duration::from_millis(100),
        ..Config::default()
    });
    host.application().lock(u64::MAX, None).unwrap();

    let document = program(vec![
        Stmt::call(Expr::member(Expr::ident("application"), "Unlock")),
        Stmt::assign(item("application", "k"), Expr::int(1)),
    ]);
    let outcome = host.execute(HttpRequest::new(document));

    assert_eq!(host.application().holder(), Some(u64::MAX));
    assert_eq!(
        outcome.error.map(|error| error.cause),
        Some(InnerError::Eval(EvalError::Timeout))
    );
    assert_eq!(host.application().get("k"), None);

    host.application().unlock(u64::MAX);
    assert_eq!(host.application().holder(), None);
}

#[rstest]
fn test_panicking_custom_function(host: Host) {
    host.register_function("fail_hard", |_| panic!("native code failed"));
    let document = program(vec![
        write(Expr::string("before")),
        write(Expr::call(Expr::ident("fail_hard"), [Expr::int(1)])),
    ]);

    let outcome = host.execute(HttpRequest::new(document));
    assert_eq!(outcome.output(), "before");
    let error = outcome.error.unwrap();
    assert_eq!(
        error.cause,
        InnerError::Panic("native code failed".to_string())
    );
    assert_eq!(error.number(), None);

    let outcome = host.execute(HttpRequest::new(program(vec![write(Expr::int(1))])));
    assert!(outcome.is_success());
}

#[test]
fn test_timeout_aborts_infinite_loop() {
    let host = Host::new(Config {
        script_timeout: Duration::from_millis(50),
        ..Config::default()
    });
    let document = program(vec![
        Stmt::new(StmtKind::OnError(ErrorMode::ResumeNext)),
        Stmt::new(StmtKind::Do {
            condition: None,
            body: vec![Stmt::assign(Expr::ident("n"), add(Expr::ident("n"), Expr::int(1)))],
        }),
    ]);

    let outcome = host.execute(HttpRequest::new(document));
    assert_eq!(
        outcome.error.map(|error| error.cause),
        Some(InnerError::Eval(EvalError::Timeout))
    );
    assert!(outcome.elapsed >= Duration::from_millis(50));
}

#[rstest]
fn test_session_round_trip(host: Host) {
    let document = program(vec![
        Stmt::assign(
            item("session", "count"),
            add(item("session", "count"), Expr::int(1)),
        ),
        write(item("session", "count")),
    ]);

    let first = host.execute(HttpRequest::new(Arc::clone(&document)));
    assert_eq!(first.output(), "1");
    let session = first.session.unwrap();

    let second = host.execute(HttpRequest::new(document).with_session(session));
    assert_eq!(second.output(), "2");
    assert_eq!(
        second.session.unwrap().contents.get("count"),
        Some(&SharedValue::Integer(2))
    );
}

#[rstest]
fn test_request_collections(host: Host) {
    let document = program(vec![
        write(Expr::call(
            Expr::member(Expr::ident("request"), "QueryString"),
            [Expr::string("name")],
        )),
        write(Expr::string("/")),
        write(item("request", "city")),
    ]);
    let request = RequestData::new("POST", "/hello.asp")
        .with_query("name", "ann")
        .with_form("city", "oslo");

    let outcome = host.execute(HttpRequest::new(document).with_request(request));
    assert_eq!(outcome.into_result(), Ok("ann/oslo".to_string()));
}

#[rstest]
fn test_application_counter_across_threads(host: Host) {
    let document = program(vec![
        Stmt::call(Expr::member(Expr::ident("application"), "Lock")),
        Stmt::assign(
            item("application", "hits"),
            add(item("application", "hits"), Expr::int(1)),
        ),
        Stmt::call(Expr::member(Expr::ident("application"), "Unlock")),
    ]);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..10 {
                    let outcome = host.execute(HttpRequest::new(Arc::clone(&document)));
                    assert!(outcome.is_success());
                }
            });
        }
    });

    assert_eq!(host.application().get("hits"), Some(SharedValue::Integer(40)));
}

#[rstest]
fn test_objects_cannot_enter_application(host: Host) {
    let document = program(vec![Stmt::set(
        item("application", "d"),
        Expr::call(Expr::ident("CreateObject"), [Expr::string("Scripting.Dictionary")]),
    )]);

    let outcome = host.execute(HttpRequest::new(document));
    assert_eq!(
        outcome.error.map(|error| error.cause),
        Some(InnerError::Eval(EvalError::NotShareable))
    );
}

#[rstest]
fn test_error_diagnostic_points_at_statement(host: Host) {
    let source = "<%\nx = 1 / 0\n%>";
    let statement = Stmt::assign(
        Expr::ident("x"),
        Expr::binary(BinaryOp::Div, Expr::int(1), Expr::int(0)),
    )
    .at(asp_lang::Range::new(
        asp_lang::Position::new(2, 1),
        asp_lang::Position::new(2, 10),
    ));
    let document = Arc::new(Document::from_program(vec![statement]).with_source(source));

    let error = render(&host, document).unwrap_err();
    assert_eq!(error.number(), Some(11));
    assert_eq!(error.location.offset(), 3);
    assert_eq!(error.location.len(), 9);
}

#[rstest]
fn test_set_rejects_arrays_and_keeps_the_host_alive(host: Host) {
    let document = program(vec![
        Stmt::new(StmtKind::Dim(vec![VarDecl::array("a", vec![Expr::int(1)])])),
        Stmt::set(
            Expr::call(Expr::ident("a"), [Expr::int(0)]),
            Expr::ident("a"),
        ),
        Stmt::assign(Expr::ident("b"), Expr::ident("a")),
    ]);

    let outcome = host.execute(HttpRequest::new(document));
    assert_eq!(
        outcome.error.map(|error| error.cause),
        Some(InnerError::Eval(EvalError::ObjectRequired("a".to_string())))
    );

    let outcome = host.execute(HttpRequest::new(program(vec![write(Expr::int(1))])));
    assert_eq!(outcome.into_result(), Ok("1".to_string()));
}
