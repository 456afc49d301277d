use crate::error::Location;
use crate::tokenizer::TokenId;

/// Kind of binary operator a [`PatternCommand::Binary`] or
/// [`PatternCommand::Unary`] carries. Distinct from [`TokenId`] so the
/// compiler doesn't need to re-derive "is this actually an operator token".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorToken {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Not,
    Index,
}

impl OperatorToken {
    pub(crate) fn from_token_id(id: TokenId) -> Option<OperatorToken> {
        Some(match id {
            TokenId::Symbol(b'+') => OperatorToken::Plus,
            TokenId::Symbol(b'-') => OperatorToken::Minus,
            TokenId::Symbol(b'*') => OperatorToken::Star,
            TokenId::Symbol(b'/') => OperatorToken::Slash,
            TokenId::Symbol(b'%') => OperatorToken::Percent,
            TokenId::EqEq => OperatorToken::EqEq,
            TokenId::NotEq => OperatorToken::NotEq,
            TokenId::Symbol(b'<') => OperatorToken::Lt,
            TokenId::LtEq => OperatorToken::LtEq,
            TokenId::Symbol(b'>') => OperatorToken::Gt,
            TokenId::GtEq => OperatorToken::GtEq,
            TokenId::And => OperatorToken::And,
            TokenId::Or => OperatorToken::Or,
            _ => return None,
        })
    }
}

/// One element of the flat postfix-ish stream the parser emits.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternCommand {
    /// A name being declared on the left-hand side of `:=` (only appears in
    /// assignment-target patterns, never in a value expression).
    Decl {
        /// The declared name.
        name: String,
        /// Whether it was prefixed with `ref` (always rejected downstream).
        has_ref: bool,
        /// Where the name token was.
        at: Location,
    },
    /// A leaf value: an identifier reference or a numeric literal.
    Value {
        /// The literal's lexeme, or the identifier's name.
        lexeme: String,
        /// True if this is a numeric literal rather than a name.
        is_number: bool,
        /// Where it was.
        at: Location,
    },
    /// A prefix unary operator applied to the value produced just before it.
    Unary {
        /// Which operator.
        op: OperatorToken,
        /// Where it was.
        at: Location,
    },
    /// A binary operator consuming the two values produced just before it.
    Binary {
        /// Which operator.
        op: OperatorToken,
        /// Where it was.
        at: Location,
    },
    /// `.field` or `.0` member access on the value produced just before it.
    Member {
        /// Field name, or stringified tuple index.
        name: String,
        /// Where the `.` was.
        at: Location,
    },
    /// Placeholder for a call `(...)`; back-patched with its argument count
    /// once the matching `)` resolves.
    ProcedureCall {
        /// Number of arguments, filled in once known.
        arg_count: usize,
        /// Where the `(` was.
        at: Location,
    },
    /// Placeholder for an array literal `[...]`; back-patched likewise.
    Array {
        /// Number of elements, filled in once known.
        arg_count: usize,
        /// Where the `[` was.
        at: Location,
    },
    /// Placeholder for a tuple or record literal `{...}`; back-patched
    /// likewise. `is_record` is only known for certain once a `name:` is
    /// seen, so it starts `false` and may flip.
    Struct {
        /// Number of elements, filled in once known.
        arg_count: usize,
        /// Whether this turned out to be a record (named fields) rather than a tuple.
        is_record: bool,
        /// Where the `{` was.
        at: Location,
    },
    /// Marks the end of one argument/element within an in-progress aggregate
    /// or call.
    EndArg {
        /// The field name, for a record element (`name: value`).
        field_name: Option<String>,
    },
    /// Marks the end of one top-level (comma-separated) value in a
    /// multi-value expression.
    EndTerm,
}

/// A fully parsed expression: the flat command stream plus how many
/// top-level comma-separated values it produced.
#[derive(Debug, Clone, Default)]
pub struct Pattern {
    /// The command stream, in emission order.
    pub commands: Vec<PatternCommand>,
    /// Number of top-level values (`a, b, c` counts as 3).
    pub multi_value_count: usize,
}
