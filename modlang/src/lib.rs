//! Tokenizer, parser, compiler, and VM for the language this crate
//! interprets, wired together behind a small [`Session`] type the CLI
//! drives one top-level item at a time.

pub mod builtins;
pub mod compiler;
pub mod error;
pub mod parser;
pub mod tokenizer;
pub mod vm;

use modlang_asm::{Bindings, Instruction, Type};

use compiler::{compile_item, BoundGlobal, Item};
use error::ModlangError;
use tokenizer::Tokenizer;
use vm::Vm;

/// Result of executing one top-level statement.
#[derive(Debug, Default)]
pub struct StatementOutcome {
    /// The bytecode that was run, for `-debug` disassembly.
    pub instructions: Vec<Instruction>,
    /// Globals this statement bound, in declaration order.
    pub bound: Vec<BoundGlobal>,
    /// Unbound top-level values to print as `result = v1, v2, ...`, paired
    /// with their types; empty unless the statement was a bare expression.
    pub result_values: Vec<(i64, Type)>,
}

/// What compiling and running one top-level item produced.
#[derive(Debug)]
pub enum ItemOutcome {
    /// End of input.
    Eof,
    /// A `func`/`proc` definition was installed.
    ProcedureDefined {
        /// Its name.
        name: String,
        /// Its compiled body, for `-debug` disassembly.
        instructions: Vec<Instruction>,
    },
    /// A statement ran to completion.
    Statement(StatementOutcome),
}

/// Ties the bindings table and the VM together across a sequence of
/// incrementally-compiled top-level items, the way a REPL or a
/// whole-file run both need.
pub struct Session {
    bindings: Bindings,
    vm: Vm,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A fresh session with every built-in procedure installed.
    pub fn new() -> Session {
        let mut bindings = Bindings::new();
        let mut vm = Vm::new();
        builtins::install(&mut bindings, &mut vm);
        Session { bindings, vm }
    }

    /// Read access to the bindings table, e.g. for `-debug` disassembly
    /// that needs to name a ref's binding.
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Read access to the VM, e.g. for formatting a bound global's value.
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Compile and run the next top-level item read from `tz`.
    pub fn run_next_item(&mut self, tz: &mut Tokenizer<'_>) -> Result<ItemOutcome, ModlangError> {
        let item = compile_item(tz, &mut self.bindings, true)?;
        match item {
            Item::Null => Ok(ItemOutcome::Eof),
            Item::Procedure { name, ty, instructions } => {
                let (index, _) = self.bindings.lookup(&name).expect("compile_item just bound this name");
                let param_count = match &ty {
                    Type::Procedure { inputs, .. } => inputs.len(),
                    _ => 0,
                };
                self.vm.install_procedure(index as i64, param_count, instructions.clone());
                Ok(ItemOutcome::ProcedureDefined { name, instructions })
            }
            Item::Statement(st) => {
                self.vm.execute_top_level(st.instructions.clone())?;
                self.vm.reconcile_global_count(self.bindings.global_count());
                let pushed = self.vm.drain_pushed(st.pushed_count);
                let result_values = if st.result_count > 0 { pushed.into_iter().zip(st.result_types).collect() } else { Vec::new() };
                let outcome = StatementOutcome { instructions: st.instructions, bound: st.bound_globals, result_values };
                self.vm.unbind_temporaries();
                Ok(ItemOutcome::Statement(outcome))
            }
        }
    }
}

/// Render a runtime value for REPL/debug output: scalars print as decimal,
/// arrays as `[e0, e1, ...]`, tuples/records by walking their field layout
/// on the VM's memory stack.
pub fn format_value(vm: &Vm, value: i64, ty: &Type) -> String {
    match ty {
        Type::Array(elem) => match vm.array(value) {
            Some(buf) => {
                let parts: Vec<String> = buf.data.iter().map(|e| format_value(vm, *e, elem.as_ref())).collect();
                format!("[{}]", parts.join(", "))
            }
            None => "[]".to_string(),
        },
        Type::Tuple(types) => {
            let mut offset = 0usize;
            let parts: Vec<String> = types
                .iter()
                .map(|t| {
                    let v = vm.mem_word(value as usize + offset);
                    offset += t.total_size() / 8;
                    format_value(vm, v, t)
                })
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        Type::Record(fields) => {
            let mut offset = 0usize;
            let parts: Vec<String> = fields
                .iter()
                .map(|f| {
                    let v = vm.mem_word(value as usize + offset);
                    offset += f.ty.total_size() / 8;
                    format!("{}: {}", f.name, format_value(vm, v, &f.ty))
                })
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        Type::Procedure { .. } => "<procedure>".to_string(),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_has_assert_bound() {
        let session = Session::new();
        assert!(session.bindings().lookup("assert").is_some());
    }

    #[test]
    fn eof_on_empty_source() {
        let mut session = Session::new();
        let mut tz = Tokenizer::new(b"");
        assert!(matches!(session.run_next_item(&mut tz).unwrap(), ItemOutcome::Eof));
    }

    #[test]
    fn binding_then_bare_expression_in_one_session() {
        let mut session = Session::new();
        let mut tz = Tokenizer::new(b"x := 5;");
        let outcome = session.run_next_item(&mut tz).unwrap();
        let ItemOutcome::Statement(st) = outcome else { panic!("expected a statement") };
        assert_eq!(st.bound[0].name, "x");
        assert_eq!(session.vm().peek(st.bound[0].global_index as usize).value, 5);
    }
}
