use super::pattern::{OperatorToken, Pattern, PatternCommand};
use crate::error::{Location, ParseError};
use crate::tokenizer::{Token, TokenId, Tokenizer};

/// Seven precedence levels, lowest to highest. All listed binary operators
/// are left-associative: a new operator pops an already-staged operator of
/// equal or higher precedence before it is pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Grouping,
    Disjunctive,
    Conjunctive,
    Comparative,
    Additive,
    Multiplicative,
    Unary,
}

fn precedence_of(op: OperatorToken) -> Precedence {
    use OperatorToken::*;
    match op {
        Or => Precedence::Disjunctive,
        And => Precedence::Conjunctive,
        EqEq | NotEq | Lt | LtEq | Gt | GtEq => Precedence::Comparative,
        Plus | Minus => Precedence::Additive,
        Star | Slash | Percent => Precedence::Multiplicative,
        Not | Index => Precedence::Unary,
    }
}

/// A bracket/operator the parser hasn't resolved into a command yet.
#[derive(Debug, Clone)]
enum PartialKind {
    Binary(OperatorToken),
    Unary(OperatorToken),
    Paren,
    Index,
    ProcedureCall { array_index: usize },
    Array { array_index: usize },
    Tuple { array_index: usize },
    Record { array_index: usize },
    Field { name: String },
}

#[derive(Debug, Clone)]
struct PartialOp {
    kind: PartialKind,
    precedence: Precedence,
    at: Location,
}

/// Whether brackets resolve by an explicit closing token rather than the
/// precedence cascade.
fn is_grouping(kind: &PartialKind) -> bool {
    matches!(
        kind,
        PartialKind::Paren | PartialKind::Index | PartialKind::ProcedureCall { .. } | PartialKind::Array { .. } | PartialKind::Tuple { .. } | PartialKind::Record { .. }
    )
}

/// Result of [`parse_expression`]: the flat command stream and the
/// terminating token, already pushed back onto the tokenizer for the caller
/// to consume (`;`, a closing token belonging to an outer context, or EOF).
pub struct ParseOutcome {
    /// The parsed pattern.
    pub pattern: Pattern,
}

struct State {
    commands: Vec<PatternCommand>,
    stack: Vec<PartialOp>,
    grouping_count: usize,
    multi_value_count: usize,
}

impl State {
    fn pop_and_emit(&mut self, top: PartialOp) {
        match top.kind {
            PartialKind::Binary(op) => self.commands.push(PatternCommand::Binary { op, at: top.at }),
            PartialKind::Unary(op) => self.commands.push(PatternCommand::Unary { op, at: top.at }),
            PartialKind::Index => self.commands.push(PatternCommand::Binary { op: OperatorToken::Index, at: top.at }),
            _ => unreachable!("pop_and_emit called on a grouping op"),
        }
    }

    /// Resolve the cascade: pop every non-grouping top whose precedence is
    /// `>=` the incoming operator's (so equal precedence still pops,
    /// giving left associativity).
    fn resolve_cascade(&mut self, incoming: Precedence) {
        while let Some(top) = self.stack.last() {
            if is_grouping(&top.kind) {
                break;
            }
            if top.precedence >= incoming {
                let top = self.stack.pop().unwrap();
                self.pop_and_emit(top);
            } else {
                break;
            }
        }
    }

    /// Resolve everything above (and not including) the innermost grouping op,
    /// used when a closing token is encountered.
    fn drain_to_grouping(&mut self) {
        while let Some(top) = self.stack.last() {
            if is_grouping(&top.kind) {
                break;
            }
            let top = self.stack.pop().unwrap();
            self.pop_and_emit(top);
        }
    }
}

fn lexeme_for(id: TokenId, lexeme: &str) -> String {
    match id {
        TokenId::Eof => "<eof>".to_string(),
        _ => lexeme.to_string(),
    }
}

/// Parse one expression (possibly multi-valued via top-level commas) from
/// `tz`. If `end_on_eol` is set, a bare newline at zero grouping depth acts
/// like `;`. The terminating token (`;`, EOF, or an outer closing bracket)
/// is pushed back for the caller.
pub fn parse_expression(tz: &mut Tokenizer<'_>, end_on_eol: bool) -> Result<ParseOutcome, ParseError> {
    let mut st = State { commands: Vec::new(), stack: Vec::new(), grouping_count: 0, multi_value_count: 0 };
    let mut expect_operand = true;

    loop {
        if expect_operand {
            expect_operand = parse_operand(tz, &mut st)?;
            continue;
        }

        if end_on_eol && st.grouping_count == 0 && tz.peek_eol() {
            // A bare newline at zero grouping depth ends the statement the
            // same way a `;` would, for REPL input where typing one is
            // optional. `get_token` would otherwise skip right over it.
            st.drain_to_grouping();
            st.commands.push(PatternCommand::EndTerm);
            st.multi_value_count += 1;
            let at = tz.loc();
            tz.try_read_eol();
            tz.put_token_back(Token { id: TokenId::Symbol(b';'), lexeme: ";".to_string(), at });
            break;
        }

        let tok = tz.get_token()?;
        match tok.id {
            TokenId::Symbol(b'.') => {
                let field = tz.get_token()?;
                match field.id {
                    TokenId::Ident | TokenId::Number => {
                        st.commands.push(PatternCommand::Member { name: field.lexeme, at: tok.at });
                    }
                    _ => return Err(ParseError::UnexpectedToken { at: field.at, lexeme: lexeme_for(field.id, &field.lexeme) }),
                }
                continue;
            }
            TokenId::Symbol(b'[') => {
                st.resolve_cascade(Precedence::Unary);
                st.grouping_count += 1;
                st.stack.push(PartialOp { kind: PartialKind::Index, precedence: Precedence::Grouping, at: tok.at });
                expect_operand = true;
                continue;
            }
            TokenId::Symbol(b'(') => {
                st.grouping_count += 1;
                let array_index = st.commands.len();
                st.commands.push(PatternCommand::ProcedureCall { arg_count: 0, at: tok.at });
                st.stack.push(PartialOp { kind: PartialKind::ProcedureCall { array_index }, precedence: Precedence::Grouping, at: tok.at });
                expect_operand = true;
                continue;
            }
            _ => {}
        }

        if let Some(op) = OperatorToken::from_token_id(tok.id) {
            st.resolve_cascade(precedence_of(op));
            st.stack.push(PartialOp { kind: PartialKind::Binary(op), precedence: precedence_of(op), at: tok.at });
            expect_operand = true;
            continue;
        }

        // Closing / terminating position.
        match tok.id {
            TokenId::Symbol(b',') => {
                st.drain_to_grouping();
                let field_name = take_pending_field(&mut st.stack);
                match st.stack.last_mut() {
                    Some(PartialOp { kind: PartialKind::ProcedureCall { .. } | PartialKind::Array { .. } | PartialKind::Tuple { .. } | PartialKind::Record { .. }, .. }) => {
                        st.commands.push(PatternCommand::EndArg { field_name });
                        bump_arg_count(&mut st.stack);
                    }
                    Some(PartialOp { kind: PartialKind::Paren | PartialKind::Index, .. }) => {
                        return Err(ParseError::UnexpectedToken { at: tok.at, lexeme: ",".to_string() });
                    }
                    None => {
                        st.commands.push(PatternCommand::EndTerm);
                        st.multi_value_count += 1;
                    }
                }
                expect_operand = true;
                continue;
            }
            TokenId::Symbol(b')') => {
                st.drain_to_grouping();
                match st.stack.pop() {
                    Some(PartialOp { kind: PartialKind::Paren, .. }) => {}
                    Some(PartialOp { kind: PartialKind::ProcedureCall { array_index }, .. }) => {
                        let field_name = take_pending_field(&mut st.stack);
                        st.commands.push(PatternCommand::EndArg { field_name });
                        if let PatternCommand::ProcedureCall { arg_count, .. } = &mut st.commands[array_index] {
                            *arg_count += 1;
                        }
                    }
                    Some(other) => return Err(ParseError::MismatchedBracket { at: tok.at, found: ")".to_string(), expected: describe(&other.kind) }),
                    None => return Err(ParseError::MismatchedBracket { at: tok.at, found: ")".to_string(), expected: "<nothing open>".to_string() }),
                }
                st.grouping_count -= 1;
                expect_operand = false;
                continue;
            }
            TokenId::Symbol(b']') => {
                st.drain_to_grouping();
                match st.stack.pop() {
                    Some(PartialOp { kind: PartialKind::Index, at: open_at }) => {
                        st.commands.push(PatternCommand::Binary { op: OperatorToken::Index, at: open_at });
                    }
                    Some(PartialOp { kind: PartialKind::Array { array_index }, .. }) => {
                        st.commands.push(PatternCommand::EndArg { field_name: None });
                        if let PatternCommand::Array { arg_count, .. } = &mut st.commands[array_index] {
                            *arg_count += 1;
                        }
                    }
                    Some(other) => return Err(ParseError::MismatchedBracket { at: tok.at, found: "]".to_string(), expected: describe(&other.kind) }),
                    None => return Err(ParseError::MismatchedBracket { at: tok.at, found: "]".to_string(), expected: "<nothing open>".to_string() }),
                }
                st.grouping_count -= 1;
                expect_operand = false;
                continue;
            }
            TokenId::Symbol(b'}') => {
                st.drain_to_grouping();
                let field_name = take_pending_field(&mut st.stack);
                match st.stack.pop() {
                    Some(PartialOp { kind: PartialKind::Tuple { array_index }, .. }) | Some(PartialOp { kind: PartialKind::Record { array_index }, .. }) => {
                        st.commands.push(PatternCommand::EndArg { field_name });
                        if let PatternCommand::Struct { arg_count, .. } = &mut st.commands[array_index] {
                            *arg_count += 1;
                        }
                    }
                    Some(other) => return Err(ParseError::MismatchedBracket { at: tok.at, found: "}".to_string(), expected: describe(&other.kind) }),
                    None => return Err(ParseError::MismatchedBracket { at: tok.at, found: "}".to_string(), expected: "<nothing open>".to_string() }),
                }
                st.grouping_count -= 1;
                expect_operand = false;
                continue;
            }
            TokenId::Symbol(b';') | TokenId::Eof => {
                if st.grouping_count != 0 {
                    if let Some(top) = st.stack.last() {
                        return Err(ParseError::UnmatchedOpen { at: top.at, lexeme: describe(&top.kind) });
                    }
                }
                st.drain_to_grouping();
                st.commands.push(PatternCommand::EndTerm);
                st.multi_value_count += 1;
                tz.put_token_back(tok);
                break;
            }
            TokenId::Symbol(b':') => return Err(ParseError::ColonOutsideRecord { at: tok.at }),
            _ => return Err(ParseError::UnexpectedToken { at: tok.at, lexeme: lexeme_for(tok.id, &tok.lexeme) }),
        }
    }

    Ok(ParseOutcome { pattern: Pattern { commands: st.commands, multi_value_count: st.multi_value_count } })
}

/// Consumes one operand-position token. Returns the new `expect_operand`
/// state (always `false` on success, since an operand was just read).
fn parse_operand(tz: &mut Tokenizer<'_>, st: &mut State) -> Result<bool, ParseError> {
    let tok = tz.get_token()?;
    match tok.id {
        TokenId::Ident => {
            let lookahead = tz.get_token()?;
            if matches!(lookahead.id, TokenId::Symbol(b':')) && matches!(st.stack.last(), Some(PartialOp { kind: PartialKind::Tuple { array_index }, .. }) if is_empty_struct(st, *array_index)) {
                promote_to_record(st);
                st.stack.push(PartialOp { kind: PartialKind::Field { name: tok.lexeme.clone() }, precedence: Precedence::Grouping, at: tok.at });
                return Ok(true);
            }
            tz.put_token_back(lookahead);
            st.commands.push(PatternCommand::Value { lexeme: tok.lexeme, is_number: false, at: tok.at });
            Ok(false)
        }
        TokenId::Number => {
            st.commands.push(PatternCommand::Value { lexeme: tok.lexeme, is_number: true, at: tok.at });
            Ok(false)
        }
        TokenId::Symbol(b'(') => {
            st.grouping_count += 1;
            st.stack.push(PartialOp { kind: PartialKind::Paren, precedence: Precedence::Grouping, at: tok.at });
            Ok(true)
        }
        TokenId::Symbol(b'[') => {
            st.grouping_count += 1;
            let array_index = st.commands.len();
            st.commands.push(PatternCommand::Array { arg_count: 0, at: tok.at });
            st.stack.push(PartialOp { kind: PartialKind::Array { array_index }, precedence: Precedence::Grouping, at: tok.at });
            Ok(true)
        }
        TokenId::Symbol(b'{') => {
            st.grouping_count += 1;
            let array_index = st.commands.len();
            st.commands.push(PatternCommand::Struct { arg_count: 0, is_record: false, at: tok.at });
            st.stack.push(PartialOp { kind: PartialKind::Tuple { array_index }, precedence: Precedence::Grouping, at: tok.at });
            Ok(true)
        }
        TokenId::Symbol(b'-') => {
            st.stack.push(PartialOp { kind: PartialKind::Unary(OperatorToken::Minus), precedence: Precedence::Unary, at: tok.at });
            Ok(true)
        }
        TokenId::Not => {
            st.stack.push(PartialOp { kind: PartialKind::Unary(OperatorToken::Not), precedence: Precedence::Unary, at: tok.at });
            Ok(true)
        }
        _ => Err(ParseError::UnexpectedToken { at: tok.at, lexeme: lexeme_for(tok.id, &tok.lexeme) }),
    }
}

fn is_empty_struct(st: &State, array_index: usize) -> bool {
    matches!(st.commands.get(array_index), Some(PatternCommand::Struct { arg_count: 0, .. }))
}

fn promote_to_record(st: &mut State) {
    if let Some(PartialOp { kind: PartialKind::Tuple { array_index }, precedence, at }) = st.stack.pop() {
        if let Some(PatternCommand::Struct { is_record, .. }) = st.commands.get_mut(array_index) {
            *is_record = true;
        }
        st.stack.push(PartialOp { kind: PartialKind::Record { array_index }, precedence, at });
    }
}

fn take_pending_field(stack: &mut Vec<PartialOp>) -> Option<String> {
    if matches!(stack.last(), Some(PartialOp { kind: PartialKind::Field { .. }, .. })) {
        if let Some(PartialOp { kind: PartialKind::Field { name }, .. }) = stack.pop() {
            return Some(name);
        }
    }
    None
}

fn bump_arg_count(stack: &mut [PartialOp]) {
    // arg_count lives on the PatternCommand, not the PartialOp; nothing to
    // do here beyond being an explicit no-op hook for symmetry with the
    // bracket-closing cases which do update the command in place.
    let _ = stack;
}

fn describe(kind: &PartialKind) -> String {
    match kind {
        PartialKind::Paren => "(".to_string(),
        PartialKind::Index => "[".to_string(),
        PartialKind::ProcedureCall { .. } => "(".to_string(),
        PartialKind::Array { .. } => "[".to_string(),
        PartialKind::Tuple { .. } | PartialKind::Record { .. } => "{".to_string(),
        PartialKind::Field { .. } => "<field>".to_string(),
        PartialKind::Binary(_) | PartialKind::Unary(_) => "<operator>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Pattern {
        let mut tz = Tokenizer::new(src.as_bytes());
        parse_expression(&mut tz, false).unwrap().pattern
    }

    #[test]
    fn simple_binary_precedence() {
        // 2 + 3 * 4 -> VALUE 2, VALUE 3, VALUE 4, BINARY *, BINARY +, END_TERM
        let p = parse("2 + 3 * 4;");
        assert_eq!(p.multi_value_count, 1);
        let kinds: Vec<&str> = p
            .commands
            .iter()
            .map(|c| match c {
                PatternCommand::Value { .. } => "V",
                PatternCommand::Binary { op: OperatorToken::Plus, .. } => "+",
                PatternCommand::Binary { op: OperatorToken::Star, .. } => "*",
                PatternCommand::EndTerm => "T",
                _ => "?",
            })
            .collect();
        assert_eq!(kinds, vec!["V", "V", "V", "*", "+", "T"]);
    }

    #[test]
    fn left_associative_same_precedence() {
        let p = parse("1 - 2 - 3;");
        let kinds: Vec<&str> = p
            .commands
            .iter()
            .filter_map(|c| match c {
                PatternCommand::Binary { op: OperatorToken::Minus, .. } => Some("-"),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec!["-", "-"]);
    }

    #[test]
    fn parens_override_precedence() {
        let p = parse("(2 + 3) * 4;");
        let kinds: Vec<&str> = p
            .commands
            .iter()
            .filter_map(|c| match c {
                PatternCommand::Binary { op, .. } => Some(if *op == OperatorToken::Plus { "+" } else { "*" }),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec!["+", "*"]);
    }

    #[test]
    fn array_literal_arg_count() {
        let p = parse("[1, 2, 3];");
        let arr = p.commands.iter().find_map(|c| match c {
            PatternCommand::Array { arg_count, .. } => Some(*arg_count),
            _ => None,
        });
        assert_eq!(arr, Some(3));
    }

    #[test]
    fn record_literal_promotes_from_tuple() {
        let p = parse("{x: 1, y: 2};");
        let st = p.commands.iter().find_map(|c| match c {
            PatternCommand::Struct { arg_count, is_record, .. } => Some((*arg_count, *is_record)),
            _ => None,
        });
        assert_eq!(st, Some((2, true)));
        let fields: Vec<Option<String>> = p
            .commands
            .iter()
            .filter_map(|c| match c {
                PatternCommand::EndArg { field_name } => Some(field_name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(fields, vec![Some("x".to_string()), Some("y".to_string())]);
    }

    #[test]
    fn member_access_and_index_and_call() {
        let p = parse("f(a)[0].x;");
        let kinds: Vec<&str> = p
            .commands
            .iter()
            .map(|c| match c {
                PatternCommand::Value { .. } => "V",
                PatternCommand::ProcedureCall { .. } => "C",
                PatternCommand::Binary { op: OperatorToken::Index, .. } => "I",
                PatternCommand::Member { .. } => "M",
                PatternCommand::EndArg { .. } => "A",
                PatternCommand::EndTerm => "T",
                _ => "?",
            })
            .collect();
        assert_eq!(kinds, vec!["C", "V", "V", "A", "I", "V", "M", "T"]);
    }

    #[test]
    fn multi_value_top_level() {
        let p = parse("1, 2, 3;");
        assert_eq!(p.multi_value_count, 3);
    }

    #[test]
    fn mismatched_bracket_is_an_error() {
        let mut tz = Tokenizer::new(b"(1, 2];");
        assert!(parse_expression(&mut tz, false).is_err());
    }

    #[test]
    fn unmatched_open_is_an_error() {
        let mut tz = Tokenizer::new(b"(1 + 2;");
        assert!(parse_expression(&mut tz, false).is_err());
    }

    #[test]
    fn end_on_eol_closes_the_statement_without_a_semicolon() {
        let mut tz = Tokenizer::new(b"1 + 2\nnext");
        let outcome = parse_expression(&mut tz, true).unwrap();
        assert!(matches!(outcome.pattern.commands.last(), Some(PatternCommand::EndTerm)));
        // The synthetic `;` is pushed back, so the following statement's
        // first real token is still there for the next call to see.
        let tk = tz.get_token().unwrap();
        assert_eq!(tk.id, TokenId::Symbol(b';'));
        let tk = tz.get_token().unwrap();
        assert_eq!(tk.lexeme, "next");
    }

    #[test]
    fn end_on_eol_does_not_trigger_inside_brackets() {
        let mut tz = Tokenizer::new(b"(1 +\n2);");
        let outcome = parse_expression(&mut tz, true).unwrap();
        assert_eq!(outcome.pattern.multi_value_count, 1);
        let tk = tz.get_token().unwrap();
        assert_eq!(tk.id, TokenId::Symbol(b';'));
    }
}
