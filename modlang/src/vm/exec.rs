use std::collections::HashMap;
use std::rc::Rc;

use modlang_asm::{Instruction, Op, Ref, RefKind};
use tracing::trace;

use crate::error::PanicReason;
use super::{ArrayBuffer, MemMode, VarSlot};

/// A compiled procedure body, keyed in [`Vm`] by its binding's global index.
#[derive(Debug, Clone)]
pub struct CompiledProcedure {
    /// Number of leading locals that are parameters (and so must be bound
    /// from the caller's pushed arguments before the body runs).
    pub param_count: usize,
    /// The procedure's instructions.
    pub instructions: Rc<[Instruction]>,
}

struct Frame {
    instructions: Rc<[Instruction]>,
    pc: usize,
    locals_start: usize,
    locals_count: usize,
}

/// The call-stack bytecode executor.
///
/// Globals, locals, and temporaries for every active frame all live in one
/// linear `vars` sequence; a frame only ever addresses its own locals/temps
/// region plus the shared global prefix.
pub struct Vm {
    vars: Vec<VarSlot>,
    global_count: usize,
    mem_stack: Vec<i64>,
    heap: Vec<Option<ArrayBuffer>>,
    arg_buffer: Vec<i64>,
    procedures: HashMap<i64, CompiledProcedure>,
    frames: Vec<Frame>,
    return_value: Option<(i64, MemMode)>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// A fresh VM with no globals bound.
    pub fn new() -> Vm {
        Vm {
            vars: Vec::new(),
            global_count: 0,
            mem_stack: Vec::new(),
            heap: Vec::new(),
            arg_buffer: Vec::new(),
            procedures: HashMap::new(),
            frames: Vec::new(),
            return_value: None,
        }
    }

    /// Register (or replace) the body for the procedure bound at global slot
    /// `global_index`.
    pub fn install_procedure(&mut self, global_index: i64, param_count: usize, instructions: Vec<Instruction>) {
        self.procedures.insert(global_index, CompiledProcedure { param_count, instructions: instructions.into() });
    }

    /// Number of globals currently populated on the variable stack.
    pub fn global_count(&self) -> usize {
        self.global_count
    }

    /// Total length of the variable stack (globals + any leftover top-level
    /// temporaries from the last executed statement).
    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    /// Read a slot's raw payload and mode, for the CLI's result printer.
    pub fn peek(&self, index: usize) -> VarSlot {
        self.vars[index]
    }

    /// Array buffer backing a `Refcount` slot's handle, for printing.
    pub fn array(&self, handle: i64) -> Option<&ArrayBuffer> {
        self.heap.get(handle as usize).and_then(|slot| slot.as_ref())
    }

    /// One word of the word-addressable memory stack, for printing a
    /// tuple/record field at a known offset.
    pub fn mem_word(&self, word_index: usize) -> i64 {
        self.mem_stack.get(word_index).copied().unwrap_or(0)
    }

    /// Remove and return the last `n` values pushed via `Op::Push`, in push
    /// order. Called once per executed top-level statement so values left
    /// over from `END_TERM` don't accumulate across statements.
    pub fn drain_pushed(&mut self, n: usize) -> Vec<i64> {
        let at = self.arg_buffer.len().saturating_sub(n);
        self.arg_buffer.split_off(at)
    }

    /// Stage one outgoing call argument directly, bypassing `Op::Push`.
    /// Exists only so tests can drive a bare `Op::Call` without first
    /// compiling an argument expression.
    #[cfg(test)]
    pub fn arg_buffer_push_for_test(&mut self, value: i64) {
        self.arg_buffer.push(value);
    }

    /// Drop every slot past the global prefix. Called once per REPL line
    /// after results are printed, mirroring `unbind_temporaries`.
    pub fn unbind_temporaries(&mut self) {
        while self.vars.len() > self.global_count {
            let slot = self.vars.pop().unwrap();
            self.release(slot);
        }
    }

    /// Reconcile the VM's global count with the bindings table's, in case a
    /// statement failed to initialize every global it declared.
    pub fn reconcile_global_count(&mut self, expected: usize) {
        if self.global_count != expected {
            tracing::warn!(vm_globals = self.global_count, binding_globals = expected, "global count drifted after statement execution, resynchronizing");
            self.global_count = expected;
        }
    }

    fn release(&mut self, slot: VarSlot) {
        if slot.mode == MemMode::Refcount {
            self.decrement_refcount(slot.value);
        }
    }

    fn decrement_refcount(&mut self, handle: i64) {
        let idx = handle as usize;
        let Some(Some(buf)) = self.heap.get_mut(idx) else { return };
        buf.strong_count -= 1;
        if buf.strong_count == 0 {
            let elements_are_arrays = buf.elements_are_arrays;
            let elems = std::mem::take(&mut buf.data);
            self.heap[idx] = None;
            if elements_are_arrays {
                for e in elems {
                    self.decrement_refcount(e);
                }
            }
        }
    }

    fn increment_refcount(&mut self, handle: i64) {
        if let Some(Some(buf)) = self.heap.get_mut(handle as usize) {
            buf.strong_count += 1;
        }
    }

    fn ensure_len(&mut self, index: usize) {
        if self.vars.len() <= index {
            self.vars.resize(index + 1, VarSlot::default());
        }
    }

    fn addr(locals_start: usize, locals_count: usize, r: Ref) -> usize {
        match r.kind {
            RefKind::Local => locals_start + r.x as usize,
            RefKind::Temporary => locals_start + locals_count + r.x as usize,
            _ => unreachable!("addr() only handles Local/Temporary"),
        }
    }

    fn read_ref(&self, locals_start: usize, locals_count: usize, r: Ref) -> Result<i64, PanicReason> {
        match r.kind {
            RefKind::Null => Err(PanicReason::NullRead),
            RefKind::Constant => Ok(r.x),
            RefKind::StaticPointer => Ok(r.x),
            RefKind::Global => Ok(self.vars.get(r.x as usize).map(|s| s.value).unwrap_or(0)),
            RefKind::Local | RefKind::Temporary => {
                let addr = Self::addr(locals_start, locals_count, r);
                Ok(self.vars.get(addr).map(|s| s.value).unwrap_or(0))
            }
        }
    }

    fn write_ref(&mut self, locals_start: usize, locals_count: usize, r: Ref, value: i64, mode: MemMode) -> Result<(), PanicReason> {
        match r.kind {
            RefKind::Null | RefKind::Constant | RefKind::StaticPointer => Err(PanicReason::WriteToConstant),
            RefKind::Global => {
                self.ensure_len(r.x as usize);
                self.vars[r.x as usize] = VarSlot { value, mode };
                if r.x as usize >= self.global_count {
                    self.global_count = r.x as usize + 1;
                }
                Ok(())
            }
            RefKind::Local | RefKind::Temporary => {
                let addr = Self::addr(locals_start, locals_count, r);
                self.ensure_len(addr);
                self.vars[addr] = VarSlot { value, mode };
                Ok(())
            }
        }
    }

    /// Unbind `r`'s slot if it's a temporary. `release` decrements the slot's
    /// refcount when it was holding one: set for a temporary that's being
    /// dropped with nothing further consuming it, clear for a temporary whose
    /// value is being transferred wholesale into a new owner (a `MOV`
    /// destination, a pushed argument, a stored array/struct element) —
    /// transfers don't touch the count.
    fn unbind_if_temporary(&mut self, locals_start: usize, locals_count: usize, r: Ref, release: bool) {
        if !r.is_temporary() {
            return;
        }
        let addr = Self::addr(locals_start, locals_count, r);
        let Some(slot) = self.vars.get_mut(addr) else { return };
        let was_refcount = slot.mode == MemMode::Refcount;
        let handle = slot.value;
        slot.mode = MemMode::Unbound;
        if release && was_refcount {
            self.decrement_refcount(handle);
        }
    }

    fn mode_of(&self, locals_start: usize, locals_count: usize, r: Ref) -> MemMode {
        match r.kind {
            RefKind::Local | RefKind::Temporary => {
                let addr = Self::addr(locals_start, locals_count, r);
                self.vars.get(addr).map(|s| s.mode).unwrap_or(MemMode::DirectValue)
            }
            RefKind::Global => self.vars.get(r.x as usize).map(|s| s.mode).unwrap_or(MemMode::DirectValue),
            _ => MemMode::DirectValue,
        }
    }

    /// Execute `instructions` as a fresh top-level frame (no caller, no
    /// parameters) to quiescence.
    pub fn execute_top_level(&mut self, instructions: Vec<Instruction>) -> Result<(), PanicReason> {
        let locals_start = self.vars.len();
        self.frames.push(Frame { instructions: instructions.into(), pc: 0, locals_start, locals_count: 0 });
        self.run()
    }

    fn run(&mut self) -> Result<(), PanicReason> {
        while let Some(frame) = self.frames.last() {
            if frame.pc >= frame.instructions.len() {
                self.frames.pop();
                continue;
            }
            self.step()?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), PanicReason> {
        let (ins, locals_start, locals_count) = {
            let frame = self.frames.last_mut().unwrap();
            let ins = frame.instructions[frame.pc];
            frame.pc += 1;
            (ins, frame.locals_start, frame.locals_count)
        };
        trace!(?ins, "executing instruction");

        match ins.op {
            Op::Push => {
                let v = self.read_ref(locals_start, locals_count, ins.arg1)?;
                self.arg_buffer.push(v);
                self.unbind_if_temporary(locals_start, locals_count, ins.arg1, false);
                return Ok(());
            }
            Op::Call => return self.exec_call(ins, locals_start, locals_count),
            Op::Return => {
                let v = self.read_ref(locals_start, locals_count, ins.arg1)?;
                let mode = self.mode_of(locals_start, locals_count, ins.arg1);
                self.unbind_if_temporary(locals_start, locals_count, ins.arg1, false);
                self.return_value = Some((v, mode));
                let frame = self.frames.pop().unwrap();
                self.vars.truncate(frame.locals_start);
                return Ok(());
            }
            Op::StackAlloc => {
                let words = ins.arg1.x as usize;
                let base = self.mem_stack.len() as i64;
                self.mem_stack.resize(self.mem_stack.len() + words, 0);
                self.write_ref(locals_start, locals_count, ins.output, base, MemMode::MemoryStack)?;
                return Ok(());
            }
            Op::StackFree => {
                let words = ins.arg1.x as usize;
                if self.mem_stack.len() < words {
                    return Err(PanicReason::MemoryStackUnderflow);
                }
                self.mem_stack.truncate(self.mem_stack.len() - words);
                return Ok(());
            }
            Op::PointerCopy | Op::PointerCopyOverlapping => {
                let src = self.read_ref(locals_start, locals_count, ins.arg1)? as usize;
                let len = self.read_ref(locals_start, locals_count, ins.arg2)? as usize;
                let dst = self.read_ref(locals_start, locals_count, ins.output)? as usize;
                let chunk: Vec<i64> = self.mem_stack[src..src + len].to_vec();
                self.mem_stack[dst..dst + len].copy_from_slice(&chunk);
                return Ok(());
            }
            Op::ArrayAlloc => {
                // Elements are filled in by the ArrayStore instructions the
                // compiler emits immediately after this one, not drained
                // from arg_buffer (that's reserved for Push/Call).
                let count = self.read_ref(locals_start, locals_count, ins.arg2)? as usize;
                let handle = self.heap.len() as i64;
                self.heap.push(Some(ArrayBuffer { data: vec![0; count], elements_are_arrays: false, strong_count: 1 }));
                self.write_ref(locals_start, locals_count, ins.output, handle, MemMode::Refcount)?;
                return Ok(());
            }
            Op::ArrayStore => {
                let handle = self.read_ref(locals_start, locals_count, ins.output)?;
                let index = self.read_ref(locals_start, locals_count, ins.arg1)? as usize;
                let value = self.read_ref(locals_start, locals_count, ins.arg2)?;
                self.unbind_if_temporary(locals_start, locals_count, ins.arg2, false);
                let buf = self.heap.get_mut(handle as usize).and_then(|s| s.as_mut()).ok_or(PanicReason::IndexOutOfBounds)?;
                if index >= buf.data.len() {
                    return Err(PanicReason::IndexOutOfBounds);
                }
                buf.data[index] = value;
                return Ok(());
            }
            Op::ArrayLoad => {
                let handle = self.read_ref(locals_start, locals_count, ins.arg1)?;
                let index = self.read_ref(locals_start, locals_count, ins.arg2)? as usize;
                let value = self
                    .heap
                    .get(handle as usize)
                    .and_then(|s| s.as_ref())
                    .and_then(|b| b.data.get(index))
                    .copied()
                    .ok_or(PanicReason::IndexOutOfBounds)?;
                self.write_ref(locals_start, locals_count, ins.output, value, MemMode::DirectValue)?;
                return Ok(());
            }
            Op::ArrayOffset => {
                let base = self.read_ref(locals_start, locals_count, ins.arg1)?;
                let offset = self.read_ref(locals_start, locals_count, ins.arg2)?;
                self.write_ref(locals_start, locals_count, ins.output, base + offset, MemMode::MemoryStack)?;
                return Ok(());
            }
            Op::MemLoad => {
                let addr = self.read_ref(locals_start, locals_count, ins.arg1)? as usize;
                let value = self.mem_stack.get(addr).copied().ok_or(PanicReason::IndexOutOfBounds)?;
                self.write_ref(locals_start, locals_count, ins.output, value, MemMode::DirectValue)?;
                return Ok(());
            }
            Op::MemStore => {
                let addr = self.read_ref(locals_start, locals_count, ins.output)? as usize;
                let value = self.read_ref(locals_start, locals_count, ins.arg1)?;
                self.unbind_if_temporary(locals_start, locals_count, ins.arg1, false);
                if addr >= self.mem_stack.len() {
                    return Err(PanicReason::IndexOutOfBounds);
                }
                self.mem_stack[addr] = value;
                return Ok(());
            }
            Op::PointerIncrementRefcount => {
                let handle = self.read_ref(locals_start, locals_count, ins.output)?;
                self.increment_refcount(handle);
                return Ok(());
            }
            Op::PointerDecrementRefcount => {
                let handle = self.read_ref(locals_start, locals_count, ins.output)?;
                self.decrement_refcount(handle);
                return Ok(());
            }
            Op::Assert => {
                let v = self.read_ref(locals_start, locals_count, ins.arg1)?;
                if v == 0 {
                    return Err(PanicReason::AssertionFailed);
                }
                return Ok(());
            }
            _ => {}
        }

        let a1 = self.read_ref(locals_start, locals_count, ins.arg1)?;
        let a2 = if matches!(ins.op, Op::Not | Op::Neg | Op::Mov) {
            0
        } else {
            self.read_ref(locals_start, locals_count, ins.arg2)?
        };
        let result = self.alu(ins.op, a1, a2)?;
        let mode = if matches!(ins.op, Op::Mov) {
            self.mode_of(locals_start, locals_count, ins.arg1)
        } else {
            MemMode::DirectValue
        };
        if matches!(ins.op, Op::Mov) && mode == MemMode::Refcount && !ins.arg1.is_temporary() {
            self.increment_refcount(a1);
        }
        // A MOV consuming a temporary transfers its value wholesale (no
        // increment above, no decrement here); any other op's temporary
        // operand is a genuine drop once read.
        self.unbind_if_temporary(locals_start, locals_count, ins.arg1, !matches!(ins.op, Op::Mov));
        if !matches!(ins.op, Op::Not | Op::Neg | Op::Mov) {
            self.unbind_if_temporary(locals_start, locals_count, ins.arg2, true);
        }
        self.write_ref(locals_start, locals_count, ins.output, result, mode)?;
        Ok(())
    }

    fn alu(&self, op: Op, a: i64, b: i64) -> Result<i64, PanicReason> {
        match op {
            Op::Mov => Ok(a),
            Op::Plus => Ok(a.wrapping_add(b)),
            Op::Minus => Ok(a.wrapping_sub(b)),
            Op::Mul => Ok(a.wrapping_mul(b)),
            Op::Div => {
                if b == 0 {
                    return Err(PanicReason::DivideByZero);
                }
                Ok(a / b)
            }
            Op::Mod => {
                if b == 0 {
                    return Err(PanicReason::DivideByZero);
                }
                Ok(a % b)
            }
            Op::EDiv => {
                if b <= 0 {
                    return Err(PanicReason::DivideByNegativeDivisor);
                }
                Ok(euclidean_div(a, b))
            }
            Op::EMod => {
                if b <= 0 {
                    return Err(PanicReason::DivideByNegativeDivisor);
                }
                Ok(euclidean_mod(a, b))
            }
            Op::Eq => Ok((a == b) as i64),
            Op::Neq => Ok((a != b) as i64),
            Op::Lt => Ok((a < b) as i64),
            Op::Le => Ok((a <= b) as i64),
            Op::Gt => Ok((a > b) as i64),
            Op::Ge => Ok((a >= b) as i64),
            Op::And => Ok(((a != 0) && (b != 0)) as i64),
            Op::Or => Ok(((a != 0) || (b != 0)) as i64),
            Op::Not => Ok((a == 0) as i64),
            Op::Neg => Ok(a.wrapping_neg()),
            _ => Err(PanicReason::UnknownOpcode),
        }
    }

    fn exec_call(&mut self, ins: Instruction, caller_locals_start: usize, caller_locals_count: usize) -> Result<(), PanicReason> {
        let global_index = ins.arg1.x;
        let arg_count = ins.arg2.x as usize;
        let proc = self.procedures.get(&global_index).cloned().ok_or(PanicReason::UnknownOpcode)?;
        let args = self.arg_buffer.split_off(self.arg_buffer.len().saturating_sub(arg_count));

        let locals_start = self.vars.len();
        for a in &args {
            self.vars.push(VarSlot { value: *a, mode: MemMode::DirectValue });
        }
        self.frames.push(Frame { instructions: proc.instructions.clone(), pc: 0, locals_start, locals_count: proc.param_count });
        self.return_value = None;
        self.run_until_return()?;

        let (value, mode) = self.return_value.take().unwrap_or((0, MemMode::DirectValue));
        self.write_ref(caller_locals_start, caller_locals_count, ins.output, value, mode)?;
        Ok(())
    }

    fn run_until_return(&mut self) -> Result<(), PanicReason> {
        let target_depth = self.frames.len() - 1;
        while self.frames.len() > target_depth {
            match self.frames.last() {
                Some(frame) if frame.pc >= frame.instructions.len() => {
                    self.frames.pop();
                    continue;
                }
                None => break,
                _ => {}
            }
            self.step()?;
        }
        Ok(())
    }
}

fn euclidean_div(a: i64, b: i64) -> i64 {
    if a >= 0 {
        a / b
    } else {
        (a - b + 1) / b
    }
}

fn euclidean_mod(a: i64, b: i64) -> i64 {
    if a >= 0 {
        a % b
    } else {
        b - 1 - (-a - 1) % b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modlang_asm::{Instruction, Op, Ref};

    #[test]
    fn euclidean_division_laws_hold() {
        for a in -20..20i64 {
            for b in 1..10i64 {
                let q = euclidean_div(a, b);
                let r = euclidean_mod(a, b);
                assert_eq!(q * b + r, a);
                assert!((0..b).contains(&r));
            }
        }
    }

    #[test]
    fn simple_arithmetic_program() {
        let mut vm = Vm::new();
        let instrs = vec![
            Instruction::new(Op::Plus, Ref::temporary(0), Ref::constant(2), Ref::constant(3)),
            Instruction::new(Op::Mul, Ref::temporary(1), Ref::temporary(0), Ref::constant(4)),
            Instruction::new(Op::Mov, Ref::global(0), Ref::temporary(1), Ref::NULL),
        ];
        vm.execute_top_level(instrs).unwrap();
        assert_eq!(vm.peek(0).value, 20);
    }

    #[test]
    fn division_by_zero_panics() {
        let mut vm = Vm::new();
        let instrs = vec![Instruction::new(Op::Div, Ref::global(0), Ref::constant(1), Ref::constant(0))];
        assert_eq!(vm.execute_top_level(instrs), Err(PanicReason::DivideByZero));
    }

    #[test]
    fn array_alloc_store_load_roundtrip() {
        let mut vm = Vm::new();
        let instrs = vec![
            Instruction::new(Op::ArrayAlloc, Ref::temporary(0), Ref::NULL, Ref::constant(3)),
            Instruction::new(Op::ArrayStore, Ref::temporary(0), Ref::constant(0), Ref::constant(10)),
            Instruction::new(Op::ArrayStore, Ref::temporary(0), Ref::constant(1), Ref::constant(20)),
            Instruction::new(Op::ArrayStore, Ref::temporary(0), Ref::constant(2), Ref::constant(30)),
            Instruction::new(Op::ArrayLoad, Ref::temporary(1), Ref::temporary(0), Ref::constant(1)),
            Instruction::new(Op::Mov, Ref::global(0), Ref::temporary(1), Ref::NULL),
        ];
        vm.execute_top_level(instrs).unwrap();
        assert_eq!(vm.peek(0).value, 20);
    }

    #[test]
    fn procedure_call_returns_square() {
        let mut vm = Vm::new();
        // sq(n) { return n * n; } bound at global index 0, one parameter.
        let body = vec![Instruction::new(Op::Mul, Ref::temporary(0), Ref::local(0), Ref::local(0)), Instruction::new(Op::Return, Ref::NULL, Ref::temporary(0), Ref::NULL)];
        vm.install_procedure(0, 1, body);
        vm_push_args(&mut vm, &[5]);
        let call_site = vec![
            Instruction::new(Op::Call, Ref::temporary(0), Ref::global(0), Ref::constant(1)),
            Instruction::new(Op::Mov, Ref::global(1), Ref::temporary(0), Ref::NULL),
        ];
        vm.execute_top_level(call_site).unwrap();
        assert_eq!(vm.peek(1).value, 25);
    }

    fn vm_push_args(vm: &mut Vm, values: &[i64]) {
        for v in values {
            vm.arg_buffer.push(*v);
        }
    }
}
