//! Seeds a fresh [`Bindings`]/[`Vm`] pair with the language's built-in
//! procedures, whose bodies are synthesized instruction buffers rather than
//! compiled from source.

use modlang_asm::{Bindings, Instruction, Op, Ref, Type};

use crate::vm::Vm;

/// Install every built-in into `bindings`/`vm`. Call once, before compiling
/// any user source.
pub fn install(bindings: &mut Bindings, vm: &mut Vm) {
    install_assert(bindings, vm);
}

/// `assert(x: Int)`: raises `PanicReason::AssertionFailed` if `x` is zero.
fn install_assert(bindings: &mut Bindings, vm: &mut Vm) {
    let ty = Type::procedure(vec![Type::int64()], Vec::new());
    let index = bindings.push_global("assert", ty);
    let body = vec![Instruction::new(Op::Assert, Ref::NULL, Ref::local(0), Ref::NULL)];
    vm.install_procedure(index as i64, 1, body);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_true_is_silent() {
        let mut bindings = Bindings::new();
        let mut vm = Vm::new();
        install(&mut bindings, &mut vm);
        let (index, _) = bindings.lookup("assert").unwrap();
        vm.arg_buffer_push_for_test(1);
        let instrs = vec![Instruction::new(Op::Call, Ref::NULL, Ref::global(index as i64), Ref::constant(1))];
        vm.execute_top_level(instrs).unwrap();
    }

    #[test]
    fn assert_false_panics() {
        let mut bindings = Bindings::new();
        let mut vm = Vm::new();
        install(&mut bindings, &mut vm);
        let (index, _) = bindings.lookup("assert").unwrap();
        vm.arg_buffer_push_for_test(0);
        let instrs = vec![Instruction::new(Op::Call, Ref::NULL, Ref::global(index as i64), Ref::constant(1))];
        assert!(vm.execute_top_level(instrs).is_err());
    }
}
