use std::{fs, path::PathBuf};

use asp_lang::{
    AstBinaryOp as BinaryOp, AstExpr as Expr, AstSection as Section, AstStmt as Stmt, Document,
};
use assert_cmd::{Command, cargo};
use rstest::rstest;
use tempfile::TempDir;

fn write(expr: Expr) -> Stmt {
    Stmt::call(Expr::call(
        Expr::member(Expr::ident("response"), "write"),
        [expr],
    ))
}

fn save(dir: &TempDir, name: &str, document: &Document) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, document.to_json().unwrap()).unwrap();
    path
}

fn asp_run() -> Command {
    let mut cmd = cargo::cargo_bin_cmd!("asp-run");
    cmd.env_remove("RUST_LOG").env("ASP_LOG_LEVEL", "off");
    cmd
}

#[test]
fn test_render_document() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let page = save(
        &dir,
        "page.json",
        &Document::new(vec![
            Section::Markup("<h1>".to_string()),
            Section::Code(vec![write(Expr::binary(
                BinaryOp::Add,
                Expr::int(40),
                Expr::int(2),
            ))]),
            Section::Markup("</h1>".to_string()),
        ]),
    );

    asp_run().arg(&page).assert().success().stdout("<h1>42</h1>");
    Ok(())
}

#[test]
fn test_render_from_stdin() -> Result<(), Box<dyn std::error::Error>> {
    let document = Document::from_program(vec![write(Expr::string("piped"))]);

    asp_run()
        .arg("-")
        .write_stdin(document.to_json()?)
        .assert()
        .success()
        .stdout("piped");
    Ok(())
}

#[rstest]
#[case::query(vec!["--query", "name=ann"], "QueryString", "name", "ann")]
#[case::form(vec!["-X", "post", "--form", "city=oslo"], "Form", "city", "oslo")]
#[case::method(vec!["-X", "put"], "ServerVariables", "REQUEST_METHOD", "PUT")]
fn test_request_arguments(
    #[case] args: Vec<&str>,
    #[case] collection: &str,
    #[case] key: &str,
    #[case] expected: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let page = save(
        &dir,
        "request.json",
        &Document::from_program(vec![write(Expr::call(
            Expr::member(Expr::ident("request"), collection),
            [Expr::string(key)],
        ))]),
    );

    asp_run()
        .args(args)
        .arg(&page)
        .assert()
        .success()
        .stdout(expected.to_string());
    Ok(())
}

#[test]
fn test_shared_application_across_documents() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let hits = Expr::call(Expr::ident("application"), [Expr::string("hits")]);
    let document = Document::from_program(vec![
        Stmt::assign(
            hits.clone(),
            Expr::binary(BinaryOp::Add, hits.clone(), Expr::int(1)),
        ),
        write(hits),
    ]);
    let first = save(&dir, "a.json", &document);
    let second = save(&dir, "b.json", &document);

    asp_run()
        .arg(&first)
        .arg(&second)
        .assert()
        .success()
        .stdout("12");
    Ok(())
}

#[test]
fn test_runtime_error_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let page = save(
        &dir,
        "error.json",
        &Document::from_program(vec![
            write(Expr::string("partial")),
            write(Expr::binary(BinaryOp::Div, Expr::int(1), Expr::int(0))),
        ]),
    );

    let assert = asp_run().arg(&page).assert().failure().stdout("partial");
    let stderr = String::from_utf8(assert.get_output().stderr.clone())?;
    assert!(stderr.contains("division by zero"), "stderr was: {}", stderr);
    Ok(())
}

#[test]
fn test_json_report() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let page = save(
        &dir,
        "page.json",
        &Document::from_program(vec![write(Expr::string("ok"))]),
    );

    let assert = asp_run().arg("--json").arg(&page).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    let report: serde_json::Value = serde_json::from_str(stdout.trim())?;
    assert_eq!(report["output"], "ok");
    assert_eq!(report["status"], "200 OK");
    assert!(report["error"].is_null());
    Ok(())
}

#[test]
fn test_invalid_document() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json")?;

    asp_run().arg(&path).assert().failure();
    Ok(())
}
