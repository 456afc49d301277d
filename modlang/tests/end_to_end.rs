//! Drives [`Session`] through source text the way the CLI does, one
//! top-level item at a time, and checks the bound globals and printed
//! results it produces.

use modlang::tokenizer::Tokenizer;
use modlang::{ItemOutcome, Session};

fn run(src: &str) -> Vec<ItemOutcome> {
    let mut session = Session::new();
    run_with_session(&mut session, src)
}

fn run_with_session(session: &mut Session, src: &str) -> Vec<ItemOutcome> {
    let mut tz = Tokenizer::new(src.as_bytes());
    let mut outcomes = Vec::new();
    loop {
        let outcome = session.run_next_item(&mut tz).expect("source should compile and run");
        let is_eof = matches!(outcome, ItemOutcome::Eof);
        outcomes.push(outcome);
        if is_eof {
            break;
        }
    }
    outcomes
}

fn only_statement(outcomes: &[ItemOutcome], index: usize) -> &modlang::StatementOutcome {
    match &outcomes[index] {
        ItemOutcome::Statement(st) => st,
        other => panic!("expected a statement at index {index}, got {other:?}"),
    }
}

#[test]
fn arithmetic_respects_multiplication_precedence() {
    let mut session = Session::new();
    let outcomes = run_with_session(&mut session, "x := 2 + 3 * 4;");
    let st = only_statement(&outcomes, 0);
    assert_eq!(st.bound[0].name, "x");
    assert_eq!(session.vm().peek(st.bound[0].global_index as usize).value, 14);
}

#[test]
fn parentheses_override_precedence() {
    let mut session = Session::new();
    let outcomes = run_with_session(&mut session, "x := (2 + 3) * 4;");
    let st = only_statement(&outcomes, 0);
    assert_eq!(session.vm().peek(st.bound[0].global_index as usize).value, 20);
}

#[test]
fn array_literal_then_index_prints_as_a_bare_result() {
    let outcomes = run("a := [10, 20, 30];\na[1];");
    let bound = only_statement(&outcomes, 0);
    assert_eq!(bound.bound[0].name, "a");
    let result = only_statement(&outcomes, 1);
    assert_eq!(result.result_values, vec![(20, modlang_asm::Type::int64())]);
}

#[test]
fn record_literal_then_member_access() {
    let outcomes = run("r := {x: 1, y: 2};\nr.y;");
    let result = only_statement(&outcomes, 1);
    assert_eq!(result.result_values[0].0, 2);
}

#[test]
fn procedure_call_returns_square() {
    let outcomes = run("func sq(n: Int) -> Int := n * n;\nsq(5);");
    assert!(matches!(&outcomes[0], ItemOutcome::ProcedureDefined { name, .. } if name == "sq"));
    let result = only_statement(&outcomes, 1);
    assert_eq!(result.result_values[0].0, 25);
}

#[test]
fn multi_value_binding_binds_both_names_in_order() {
    let outcomes = run("a, b := 3, 4;");
    let st = only_statement(&outcomes, 0);
    assert_eq!(st.bound[0].name, "a");
    assert_eq!(st.bound[0].global_index, 0);
    assert_eq!(st.bound[1].name, "b");
    assert_eq!(st.bound[1].global_index, 1);
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let mut session = Session::new();
    let mut tz = Tokenizer::new(b"1 / 0;");
    assert!(session.run_next_item(&mut tz).is_err());
}

#[test]
fn assert_false_is_a_runtime_error() {
    let mut session = Session::new();
    let mut tz = Tokenizer::new(b"assert(0);");
    assert!(session.run_next_item(&mut tz).is_err());
}

#[test]
fn bare_newline_closes_a_statement_like_a_semicolon() {
    let outcomes = run("1 + 2\n3 + 4\n");
    let first = only_statement(&outcomes, 0);
    assert_eq!(first.result_values, vec![(3, modlang_asm::Type::int64())]);
    let second = only_statement(&outcomes, 1);
    assert_eq!(second.result_values, vec![(7, modlang_asm::Type::int64())]);
}

#[test]
fn ref_parameter_is_rejected_at_compile_time() {
    let mut session = Session::new();
    let mut tz = Tokenizer::new(b"ref x := 5;");
    assert!(session.run_next_item(&mut tz).is_err());
}
