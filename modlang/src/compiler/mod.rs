//! Single-pass compilation of a [`crate::parser::Pattern`] into
//! [`modlang_asm::Instruction`]s.
//!
//! The VM's byte-addressable stack is modeled here as a word-addressable one
//! (every slot is one `i64`): this interpreter only ever gives scalars
//! 64-bit width, so the distinction is invisible in `Type::total_size`
//! (always a multiple of 8) and saves a layer of byte-offset arithmetic
//! with no behavioral difference.

mod expr;
mod item;
mod statement;

pub use expr::ExprCompiler;
pub use item::{compile_item, Item};
pub use statement::{compile_statement, BoundGlobal, CompiledStatement};
