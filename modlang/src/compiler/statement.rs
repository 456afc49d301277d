use crate::error::{Location, ModlangError, ParseError};
use crate::parser::parse_expression;
use crate::tokenizer::{Token, TokenId, Tokenizer};
use modlang_asm::{Bindings, Instruction, Op, Ref, Type};

use super::expr::{CompiledValue, ExprCompiler};

const WORD: usize = 8;

/// One name newly bound by a top-level `:=` at global scope, for the REPL's
/// `name = value` printing.
#[derive(Debug, Clone)]
pub struct BoundGlobal {
    /// Source-level name.
    pub name: String,
    /// The global slot it was bound to.
    pub global_index: i64,
    /// Its type, so the printer knows how to format the slot's value.
    pub ty: Type,
}

/// One compiled top-level statement.
#[derive(Debug)]
pub struct CompiledStatement {
    /// Bytecode to execute.
    pub instructions: Vec<Instruction>,
    /// Globals newly bound by this statement (empty unless it was a
    /// global-scope `:=`).
    pub bound_globals: Vec<BoundGlobal>,
    /// Number of unbound top-level values this statement prints as
    /// `result = ...`; zero for a `return` or a `:=`.
    pub result_count: usize,
    /// Types of the values this statement's pattern pushed via `END_TERM`,
    /// in push order — used to format whichever of them `result_count`
    /// says to print.
    pub result_types: Vec<Type>,
    /// Total values pushed onto the VM's push buffer by this statement's
    /// `END_TERM`s, whether or not they end up printed. The caller must
    /// drain exactly this many after running the statement so the push
    /// buffer doesn't accumulate stale entries across statements.
    pub pushed_count: usize,
}

fn expect_terminator(tz: &mut Tokenizer<'_>) -> Result<(), ParseError> {
    let tok = tz.get_token()?;
    match tok.id {
        TokenId::Symbol(b';') | TokenId::Eof => Ok(()),
        _ => Err(ParseError::UnexpectedToken { at: tok.at, lexeme: tok.lexeme }),
    }
}

struct AssignmentTarget {
    name: String,
    has_ref: bool,
    at: Location,
}

/// Attempts to read `name (, name)* :=` from the current position. On any
/// mismatch the tokenizer is rolled back and `Ok(None)` is returned so the
/// caller can fall through to parsing a plain expression statement instead.
fn try_parse_assignment_targets(tz: &mut Tokenizer<'_>) -> Result<Option<Vec<AssignmentTarget>>, ParseError> {
    let mark = tz.mark();
    let mut targets = Vec::new();
    loop {
        let mut tok = tz.get_token()?;
        let has_ref = if matches!(tok.id, TokenId::Ref) {
            tok = tz.get_token()?;
            true
        } else {
            false
        };
        if !matches!(tok.id, TokenId::Ident) {
            tz.reset(mark);
            return Ok(None);
        }
        targets.push(AssignmentTarget { name: tok.lexeme, has_ref, at: tok.at });

        let sep = tz.get_token()?;
        match sep.id {
            TokenId::Symbol(b',') => continue,
            TokenId::Define => break,
            TokenId::Symbol(b'=') => return Err(ParseError::ReassignmentNotSupported { at: sep.at }),
            _ => {
                tz.reset(mark);
                return Ok(None);
            }
        }
    }
    Ok(Some(targets))
}

/// Parse and compile one statement: `return expr;`, `expr;`, or `lhs := rhs;`.
/// `end_on_eol` allows a bare newline to close `return expr`/plain-`expr`
/// statements in place of `;`, for REPL input; file/block bodies pass
/// `false` and always require the explicit terminator.
pub fn compile_statement(tz: &mut Tokenizer<'_>, bindings: &mut Bindings, at_global_scope: bool, end_on_eol: bool) -> Result<CompiledStatement, ModlangError> {
    let mark = tz.mark();
    let first: Token = tz.get_token()?;

    if matches!(first.id, TokenId::Return) {
        let pattern = parse_expression(tz, end_on_eol)?.pattern;
        let (instructions, results) = ExprCompiler::new(bindings).compile(&pattern)?;
        expect_terminator(tz)?;
        let mut out = instructions;
        for cv in &results {
            out.push(Instruction::new(Op::Return, Ref::NULL, cv.value, Ref::NULL));
        }
        let result_types = results.into_iter().map(|cv| cv.ty).collect::<Vec<_>>();
        let pushed_count = result_types.len();
        return Ok(CompiledStatement { instructions: out, bound_globals: Vec::new(), result_count: 0, result_types, pushed_count });
    }
    tz.reset(mark);

    if let Some(targets) = try_parse_assignment_targets(tz)? {
        for t in &targets {
            if t.has_ref {
                return Err(ParseError::RefNotSupported { at: t.at }.into());
            }
        }
        let pattern = parse_expression(tz, false)?.pattern;
        let (mut instructions, results) = ExprCompiler::new(bindings).compile(&pattern)?;
        expect_terminator(tz)?;
        if results.len() != targets.len() {
            return Err(crate::error::CompileError::ArityMismatch { at: targets[0].at, expected: targets.len(), found: results.len() }.into());
        }
        let pushed_count = results.len();
        let mut bound_globals = Vec::new();
        for (target, cv) in targets.into_iter().zip(results.into_iter()) {
            let ty = cv.ty.clone();
            let dest = if at_global_scope {
                let index = bindings.push_global(target.name.clone(), ty.clone());
                bound_globals.push(BoundGlobal { name: target.name, global_index: index as i64, ty });
                Ref::global(index as i64)
            } else {
                let local_base = bindings.global_count();
                Ref::local((bindings.push_local(target.name, ty) - local_base) as i64)
            };
            emit_bind(&mut instructions, dest, &cv);
        }
        return Ok(CompiledStatement { instructions, bound_globals, result_count: 0, result_types: Vec::new(), pushed_count });
    }

    let pattern = parse_expression(tz, end_on_eol)?.pattern;
    let (instructions, results) = ExprCompiler::new(bindings).compile(&pattern)?;
    expect_terminator(tz)?;
    let result_types = results.into_iter().map(|cv| cv.ty).collect::<Vec<_>>();
    let pushed_count = result_types.len();
    Ok(CompiledStatement { instructions, bound_globals: Vec::new(), result_count: pushed_count, result_types, pushed_count })
}

/// Bind one compiled value to `dest`, per the three-way contract on `:=`:
/// scalars get a plain `MOV`; an aggregate that owns its own stack slab is
/// compacted down to its live slice (freeing the unused tail) and adopted in
/// place; an aggregate with no owned slab (e.g. a struct-returning call's
/// result) gets a fresh `STACK_ALLOC` and is copied into it.
fn emit_bind(instructions: &mut Vec<Instruction>, dest: Ref, cv: &CompiledValue) {
    let is_aggregate = matches!(cv.ty, Type::Tuple(_) | Type::Record(_));
    if !is_aggregate {
        instructions.push(Instruction::new(Op::Mov, dest, cv.value, Ref::NULL));
        return;
    }
    let live_words = cv.ty.total_size() / WORD;
    if cv.owns_stack_memory {
        if live_words < cv.alloc_size {
            // Slide the live slice down to the front of its own slab, then
            // free the now-dead tail words off the top of the memory stack.
            instructions.push(Instruction::new(Op::ArrayOffset, dest, cv.value, Ref::constant(-(cv.ref_offset as i64))));
            let copy_op = if cv.ref_offset >= live_words { Op::PointerCopy } else { Op::PointerCopyOverlapping };
            instructions.push(Instruction::new(copy_op, dest, cv.value, Ref::constant(live_words as i64)));
            instructions.push(Instruction::new(Op::StackFree, Ref::NULL, Ref::constant((cv.alloc_size - live_words) as i64), Ref::NULL));
        } else {
            instructions.push(Instruction::new(Op::Mov, dest, cv.value, Ref::NULL));
        }
    } else {
        instructions.push(Instruction::new(Op::StackAlloc, dest, Ref::constant(live_words as i64), Ref::NULL));
        instructions.push(Instruction::new(Op::PointerCopy, dest, cv.value, Ref::constant(live_words as i64)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_plain_expression_statement() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"2 + 3;");
        let st = compile_statement(&mut tz, &mut bindings, true, false).unwrap();
        assert_eq!(st.result_count, 1);
        assert!(st.bound_globals.is_empty());
    }

    #[test]
    fn compiles_single_assignment() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"x := 5;");
        let st = compile_statement(&mut tz, &mut bindings, true, false).unwrap();
        assert_eq!(st.bound_globals.len(), 1);
        assert_eq!(st.bound_globals[0].name, "x");
        assert_eq!(bindings.global_count(), 1);
    }

    #[test]
    fn compiles_multi_value_assignment() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"a, b := 3, 4;");
        let st = compile_statement(&mut tz, &mut bindings, true, false).unwrap();
        let names: Vec<_> = st.bound_globals.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn mismatched_arity_is_an_error() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"a, b := 3;");
        assert!(compile_statement(&mut tz, &mut bindings, true, false).is_err());
    }

    #[test]
    fn ref_target_is_rejected() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"ref x := 5;");
        assert!(compile_statement(&mut tz, &mut bindings, true, false).is_err());
    }

    #[test]
    fn nested_record_assignment_compacts_and_frees_tail() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"r := {a: 5, b: {x: 1, y: 2}};");
        compile_statement(&mut tz, &mut bindings, true, false).unwrap();
        let mut tz = Tokenizer::new(b"inner := r.b;");
        let st = compile_statement(&mut tz, &mut bindings, true, false).unwrap();
        assert!(st.instructions.iter().any(|i| i.op == Op::PointerCopyOverlapping));
        assert!(st.instructions.iter().any(|i| i.op == Op::StackFree));
        assert!(!st.instructions.iter().any(|i| i.op == Op::Mov));
    }

    #[test]
    fn procedure_call_returning_record_copies_into_fresh_slab() {
        let mut bindings = Bindings::new();
        let record_ty = Type::Record(vec![
            modlang_asm::RecordField { name: "x".into(), ty: Type::int64() },
            modlang_asm::RecordField { name: "y".into(), ty: Type::int64() },
        ]);
        bindings.push_global("make_point", Type::procedure(Vec::new(), vec![record_ty]));
        let mut tz = Tokenizer::new(b"p := make_point();");
        let st = compile_statement(&mut tz, &mut bindings, true, false).unwrap();
        // A struct-returning call has no owned slab of its own, so binding
        // its result allocates fresh space rather than adopting the pointer.
        assert!(st.instructions.iter().any(|i| i.op == Op::StackAlloc));
        assert!(st.instructions.iter().any(|i| i.op == Op::PointerCopy));
        assert!(!st.instructions.iter().any(|i| i.op == Op::PointerCopyOverlapping));
    }

    #[test]
    fn return_statement_compiles() {
        let mut bindings = Bindings::new();
        bindings.push_local("n", Type::int64());
        let mut tz = Tokenizer::new(b"return n * n;");
        let st = compile_statement(&mut tz, &mut bindings, false, false).unwrap();
        assert!(st.instructions.iter().any(|i| i.op == Op::Return));
    }
}
