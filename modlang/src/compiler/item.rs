use crate::error::{ModlangError, ParseError};
use crate::tokenizer::{TokenId, Tokenizer};
use modlang_asm::{Bindings, Instruction, Op, Ref, Type};

use super::statement::{compile_statement, CompiledStatement};

/// One top-level parse result.
#[derive(Debug)]
pub enum Item {
    /// End of input.
    Null,
    /// An ordinary statement.
    Statement(CompiledStatement),
    /// A `func`/`proc` definition, now bound in `bindings` under `name`.
    Procedure {
        /// The procedure's name.
        name: String,
        /// Its signature.
        ty: Type,
        /// Its compiled body.
        instructions: Vec<Instruction>,
    },
}

fn expect_symbol(tz: &mut Tokenizer<'_>, byte: u8) -> Result<(), ParseError> {
    let tok = tz.get_token()?;
    if tok.id == TokenId::Symbol(byte) {
        Ok(())
    } else {
        Err(ParseError::UnexpectedToken { at: tok.at, lexeme: tok.lexeme })
    }
}

/// `Int` or `[T]`, recursively.
pub fn parse_type(tz: &mut Tokenizer<'_>) -> Result<Type, ParseError> {
    let tok = tz.get_token()?;
    match tok.id {
        TokenId::Ident if tok.lexeme == "Int" => Ok(Type::int64()),
        TokenId::Symbol(b'[') => {
            let inner = parse_type(tz)?;
            expect_symbol(tz, b']')?;
            Ok(Type::array_of(inner))
        }
        _ => Err(ParseError::UnexpectedToken { at: tok.at, lexeme: tok.lexeme }),
    }
}

fn parse_procedure(tz: &mut Tokenizer<'_>, bindings: &mut Bindings) -> Result<Item, ModlangError> {
    let name_tok = tz.get_token()?;
    if !matches!(name_tok.id, TokenId::Ident) {
        return Err(ParseError::UnexpectedToken { at: name_tok.at, lexeme: name_tok.lexeme }.into());
    }
    let name = name_tok.lexeme;

    expect_symbol(tz, b'(')?;
    let locals_mark = bindings.len();
    let mut input_types = Vec::new();
    loop {
        let tok = tz.get_token()?;
        if tok.id == TokenId::Symbol(b')') {
            break;
        }
        if !matches!(tok.id, TokenId::Ident) {
            return Err(ParseError::UnexpectedToken { at: tok.at, lexeme: tok.lexeme }.into());
        }
        expect_symbol(tz, b':')?;
        let ty = parse_type(tz)?;
        bindings.push_local(tok.lexeme, ty.clone());
        input_types.push(ty);

        let sep = tz.get_token()?;
        match sep.id {
            TokenId::Symbol(b',') => continue,
            TokenId::Symbol(b')') => break,
            _ => return Err(ParseError::UnexpectedToken { at: sep.at, lexeme: sep.lexeme }.into()),
        }
    }

    let declared_return = {
        let mark = tz.mark();
        let tok = tz.get_token()?;
        if matches!(tok.id, TokenId::Arrow) {
            Some(parse_type(tz)?)
        } else {
            tz.reset(mark);
            None
        }
    };

    let open = tz.get_token()?;
    let mut instructions = Vec::new();
    let mut output_types = Vec::new();
    match open.id {
        TokenId::Define => {
            let expr_mark = tz.mark();
            let _ = expr_mark;
            let pattern = crate::parser::parse_expression(tz, false)?.pattern;
            let (mut body, results) = super::expr::ExprCompiler::new(bindings).compile(&pattern)?;
            let semi = tz.get_token()?;
            if !matches!(semi.id, TokenId::Symbol(b';')) {
                return Err(ParseError::UnexpectedToken { at: semi.at, lexeme: semi.lexeme }.into());
            }
            for cv in &results {
                body.push(Instruction::new(Op::Return, Ref::NULL, cv.value, Ref::NULL));
                output_types.push(cv.ty.clone());
            }
            instructions = body;
        }
        TokenId::Symbol(b'{') => {
            loop {
                let mark = tz.mark();
                let tok = tz.get_token()?;
                if matches!(tok.id, TokenId::Symbol(b'}')) {
                    break;
                }
                tz.reset(mark);
                let st = compile_statement(tz, bindings, false, false)?;
                let produced_return = st.instructions.iter().any(|i| i.op == Op::Return);
                instructions.extend(st.instructions);
                if produced_return && output_types.is_empty() {
                    if let Some(ty) = declared_return.clone() {
                        output_types.push(ty);
                    }
                }
            }
        }
        _ => return Err(ParseError::UnexpectedToken { at: open.at, lexeme: open.lexeme }.into()),
    }

    if let Some(ty) = &declared_return {
        if output_types.is_empty() {
            output_types.push(ty.clone());
        }
    }

    bindings.truncate_locals(locals_mark);
    let ty = Type::procedure(input_types, output_types);
    bindings.push_global(name.clone(), ty.clone());
    Ok(Item::Procedure { name, ty, instructions })
}

/// Parse and compile the next top-level item: a `func`/`proc` definition,
/// a statement, or (at end of input) [`Item::Null`].
pub fn compile_item(tz: &mut Tokenizer<'_>, bindings: &mut Bindings, repl: bool) -> Result<Item, ModlangError> {
    let mark = tz.mark();
    let tok = tz.get_token()?;
    match tok.id {
        TokenId::Eof => Ok(Item::Null),
        TokenId::Func | TokenId::Proc => parse_procedure(tz, bindings),
        _ => {
            tz.reset(mark);
            let at_global_scope = true;
            Ok(Item::Statement(compile_statement(tz, bindings, at_global_scope, repl)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_single_expression_procedure() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"func sq(n: Int) -> Int := n * n;");
        let item = compile_item(&mut tz, &mut bindings, false).unwrap();
        match item {
            Item::Procedure { name, ty, instructions } => {
                assert_eq!(name, "sq");
                assert!(matches!(ty, Type::Procedure { .. }));
                assert!(instructions.iter().any(|i| i.op == Op::Return));
            }
            _ => panic!("expected a procedure item"),
        }
    }

    #[test]
    fn compiles_block_bodied_procedure() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"proc thing(x: Int) { return x + 1; }");
        let item = compile_item(&mut tz, &mut bindings, false).unwrap();
        assert!(matches!(item, Item::Procedure { .. }));
    }

    #[test]
    fn plain_statement_is_dispatched() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"1 + 2;");
        let item = compile_item(&mut tz, &mut bindings, false).unwrap();
        assert!(matches!(item, Item::Statement(_)));
    }

    #[test]
    fn eof_yields_null_item() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"");
        let item = compile_item(&mut tz, &mut bindings, false).unwrap();
        assert!(matches!(item, Item::Null));
    }
}
