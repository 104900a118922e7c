use crate::{
    ast::node::{Document, Section},
    eval::{
        Evaluator,
        error::EvalError,
        flow::Flow,
    },
};

use super::response::ResponseObject;

/// Runs the blocks of `document` in order, writing markup and output
/// expressions to `response`.
///
/// Declarations from every code block are hoisted before the first block
/// runs. A halt stops the walk and is returned; an `Exit` that escaped its
/// construct ends only the block it came from.
pub fn execute_document(
    evaluator: &mut Evaluator,
    document: &Document,
    response: &ResponseObject,
) -> Result<Flow, EvalError> {
    evaluator.hoist(document.statements())?;

    for section in &document.sections {
        match section {
            Section::Markup(text) => response.write(text),
            Section::Code(program) => {
                if let Flow::Halt(halt) = evaluator.exec_block(program)? {
                    return Ok(Flow::Halt(halt));
                }
            }
            Section::Output(expr, range) => {
                if let Some(value) = evaluator.eval_output(expr, *range)? {
                    response.write(&value.to_string());
                }
                if let Some(halt) = evaluator.control().halted() {
                    return Ok(Flow::Halt(halt));
                }
            }
        }
    }

    Ok(Flow::Normal)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        ast::node::{BinaryOp, Expr, Stmt},
        eval::{Options, flow::Halt},
        range::Range,
    };

    fn run(document: &Document) -> (Result<Flow, EvalError>, String) {
        let mut evaluator = Evaluator::new(Options {
            timeout: None,
            ..Options::default()
        });
        let response = Rc::new(ResponseObject::new(Rc::clone(evaluator.control())));
        evaluator.define_global("response", crate::value::Value::Object(response.clone()));
        let flow = execute_document(&mut evaluator, document, &response);
        (flow, response.output())
    }

    #[test]
    fn test_sections_in_order() {
        let document = Document::new(vec![
            Section::Markup("<p>".to_string()),
            Section::Code(vec![Stmt::assign(Expr::ident("x"), Expr::int(4))]),
            Section::Output(
                Expr::binary(BinaryOp::Mul, Expr::ident("x"), Expr::int(2)),
                Range::line(1),
            ),
            Section::Markup("</p>".to_string()),
        ]);

        let (flow, output) = run(&document);
        assert_eq!(flow, Ok(Flow::Normal));
        assert_eq!(output, "<p>8</p>");
    }

    #[test]
    fn test_halt_keeps_earlier_output() {
        let document = Document::new(vec![
            Section::Markup("before".to_string()),
            Section::Code(vec![Stmt::call(Expr::member(Expr::ident("response"), "end"))]),
            Section::Markup("after".to_string()),
        ]);

        let (flow, output) = run(&document);
        assert_eq!(flow, Ok(Flow::Halt(Halt::End)));
        assert_eq!(output, "before");
    }

    #[test]
    fn test_error_stops_document() {
        let document = Document::new(vec![
            Section::Markup("a".to_string()),
            Section::Output(
                Expr::binary(BinaryOp::Div, Expr::int(1), Expr::int(0)),
                Range::line(1),
            ),
            Section::Markup("b".to_string()),
        ]);

        let (flow, output) = run(&document);
        assert_eq!(flow, Err(EvalError::DivisionByZero));
        assert_eq!(output, "a");
    }
}
