use crate::error::{CompileError, InternalError, Location};
use crate::parser::{OperatorToken, Pattern, PatternCommand};
use modlang_asm::{Bindings, Instruction, Op, OperationFlags, Ref, Type};

const WORD: usize = 8;

/// A compile-time stand-in for one in-flight value.
#[derive(Debug, Clone)]
struct Intermediate {
    value: Ref,
    ty: Type,
    /// True if this aggregate owns a slab on the VM's word-addressable
    /// stack that can be adopted wholesale rather than copied on assignment.
    owns_stack_memory: bool,
    /// Original allocation size, in words, if `owns_stack_memory`.
    alloc_size: usize,
    /// Offset that the logical value now starts at, in words, within its
    /// owning slab (nonzero once leading fields have been consumed by a
    /// chain of `.field` accesses that the compiler chose to view rather
    /// than copy).
    ref_offset: usize,
}

impl Intermediate {
    fn scalar(value: Ref, ty: Type) -> Intermediate {
        Intermediate { value, ty, owns_stack_memory: false, alloc_size: 0, ref_offset: 0 }
    }
}

/// One top-level value handed back by [`ExprCompiler::compile`]: the operand
/// to read it from, plus the ownership bookkeeping a caller needs to bind it
/// correctly (see the three-way contract on `:=` assignment).
#[derive(Debug, Clone)]
pub struct CompiledValue {
    /// Operand the value is available through once `compile`'s instructions run.
    pub value: Ref,
    pub ty: Type,
    /// See [`Intermediate::owns_stack_memory`].
    pub owns_stack_memory: bool,
    /// See [`Intermediate::alloc_size`].
    pub alloc_size: usize,
    /// See [`Intermediate::ref_offset`].
    pub ref_offset: usize,
}

impl From<Intermediate> for CompiledValue {
    fn from(v: Intermediate) -> CompiledValue {
        CompiledValue { value: v.value, ty: v.ty, owns_stack_memory: v.owns_stack_memory, alloc_size: v.alloc_size, ref_offset: v.ref_offset }
    }
}

enum EmplaceKind {
    Array,
    Struct,
    ProcCall,
}

struct EmplaceFrame {
    kind: EmplaceKind,
    /// Index into `instructions` reserved for the alloc opcode, back-patched
    /// once the aggregate's shape is fully known.
    alloc_instruction_index: usize,
    /// Index into `intermediates` holding the pointer/base for this aggregate.
    pointer_intermediate_index: usize,
    args_handled: usize,
    args_total: usize,
    element_size: usize,
    element_type: Option<Type>,
    record_fields: Vec<(String, Type)>,
    is_record: Option<bool>,
    /// The procedure being invoked, for `EmplaceKind::ProcCall`.
    callee: Option<Ref>,
    /// The callee's static type, used to recover its return type at the call site.
    callee_ty: Option<Type>,
}

fn binary_result_type(op: OperatorToken, at: Location, lhs: &Type, rhs: &Type) -> Result<Type, CompileError> {
    use OperatorToken::*;
    if lhs != rhs {
        return Err(CompileError::TypeMismatch { at, detail: format!("operands of '{op:?}' have different types") });
    }
    match op {
        Plus | Minus | Star | Slash | Percent => {
            if !lhs.is_scalar() {
                return Err(CompileError::TypeMismatch { at, detail: "arithmetic operators require scalar operands".to_string() });
            }
            Ok(lhs.clone())
        }
        EqEq | NotEq | Lt | LtEq | Gt | GtEq | And | Or => Ok(Type::int64()),
        Not | Index => unreachable!("handled separately"),
    }
}

fn opcode_for(op: OperatorToken) -> Op {
    match op {
        OperatorToken::Plus => Op::Plus,
        OperatorToken::Minus => Op::Minus,
        OperatorToken::Star => Op::Mul,
        OperatorToken::Slash => Op::Div,
        OperatorToken::Percent => Op::Mod,
        OperatorToken::EqEq => Op::Eq,
        OperatorToken::NotEq => Op::Neq,
        OperatorToken::Lt => Op::Lt,
        OperatorToken::LtEq => Op::Le,
        OperatorToken::Gt => Op::Gt,
        OperatorToken::GtEq => Op::Ge,
        OperatorToken::And => Op::And,
        OperatorToken::Or => Op::Or,
        OperatorToken::Not | OperatorToken::Index => unreachable!("handled separately"),
    }
}

/// Drives compilation of one [`Pattern`] into instructions appended to a
/// shared buffer, resolving names against `bindings`.
pub struct ExprCompiler<'a> {
    bindings: &'a mut Bindings,
    instructions: Vec<Instruction>,
    intermediates: Vec<Intermediate>,
    emplace: Vec<EmplaceFrame>,
    next_temp: i64,
}

impl<'a> ExprCompiler<'a> {
    /// Start compiling against `bindings`, appending to a fresh instruction buffer.
    pub fn new(bindings: &'a mut Bindings) -> ExprCompiler<'a> {
        ExprCompiler { bindings, instructions: Vec::new(), intermediates: Vec::new(), emplace: Vec::new(), next_temp: 0 }
    }

    fn fresh_temp(&mut self, ty: Type) -> Ref {
        let r = Ref::temporary(self.next_temp);
        self.next_temp += 1;
        let _ = &ty;
        r
    }

    fn emit(&mut self, op: Op, output: Ref, arg1: Ref, arg2: Ref) {
        self.instructions.push(Instruction::new(op, output, arg1, arg2));
    }

    fn pop_intermediate(&mut self) -> Result<Intermediate, InternalError> {
        self.intermediates.pop().ok_or(InternalError::IntermediateStackExhausted)
    }

    /// Compile every command in `pattern`, leaving one [`Intermediate`] per
    /// top-level value on the internal stack. Consumes `self` to hand the
    /// caller the instruction buffer and final value types.
    pub fn compile(mut self, pattern: &Pattern) -> Result<(Vec<Instruction>, Vec<CompiledValue>), CompileError> {
        let mut finished = Vec::new();
        for cmd in &pattern.commands {
            self.compile_command(cmd, &mut finished)?;
        }
        if !self.emplace.is_empty() {
            return Err(InternalError::NoOpenEmplaceFrame.into());
        }
        Ok((self.instructions, finished))
    }

    fn compile_command(&mut self, cmd: &PatternCommand, finished: &mut Vec<CompiledValue>) -> Result<(), CompileError> {
        match cmd {
            PatternCommand::Value { lexeme, is_number, at } => self.compile_value(lexeme, *is_number, *at),
            PatternCommand::Unary { op, at } => self.compile_unary(*op, *at),
            PatternCommand::Binary { op, at } => self.compile_binary(*op, *at),
            PatternCommand::Member { name, at } => self.compile_member(name, *at),
            PatternCommand::ProcedureCall { arg_count, .. } => {
                let callee = self.pop_intermediate()?;
                self.begin_emplace_call(callee.value, callee.ty, *arg_count)
            }
            PatternCommand::Array { arg_count, .. } => self.begin_emplace(EmplaceKind::Array, *arg_count),
            PatternCommand::Struct { arg_count, .. } => self.begin_emplace(EmplaceKind::Struct, *arg_count),
            PatternCommand::EndArg { field_name } => self.compile_end_arg(field_name.clone()),
            PatternCommand::EndTerm => self.compile_end_term(finished),
            PatternCommand::Decl { .. } => Err(InternalError::UnexpectedPatternCommand.into()),
        }
    }

    fn compile_value(&mut self, lexeme: &str, is_number: bool, at: Location) -> Result<(), CompileError> {
        if is_number {
            let value: i64 = lexeme.parse().map_err(|_| CompileError::TypeMismatch { at, detail: format!("'{lexeme}' is not a valid integer literal") })?;
            self.intermediates.push(Intermediate::scalar(Ref::constant(value), Type::int64()));
            return Ok(());
        }
        let Some((index, ty)) = self.bindings.lookup(lexeme) else {
            return Err(CompileError::UndefinedName { at, name: lexeme.to_string() });
        };
        let ty = ty.clone();
        // `index` is an absolute position in the bindings table; the VM
        // addresses locals relative to the current frame, so the global
        // prefix's length has to be subtracted back out.
        let r = if self.bindings.is_global(index) {
            Ref::global(index as i64)
        } else {
            Ref::local((index - self.bindings.global_count()) as i64)
        };
        // A bound tuple/record holds a pointer to its own stack slab, so
        // `.field` chains off it can view that slab rather than copy it.
        let alloc_size = ty.total_size() / WORD;
        let owns_stack_memory = matches!(ty, Type::Tuple(_) | Type::Record(_));
        self.intermediates.push(Intermediate { value: r, ty, owns_stack_memory, alloc_size, ref_offset: 0 });
        Ok(())
    }

    fn compile_unary(&mut self, op: OperatorToken, at: Location) -> Result<(), CompileError> {
        let v = self.pop_intermediate()?;
        if !v.ty.is_scalar() {
            return Err(CompileError::TypeMismatch { at, detail: "unary operators require a scalar operand".to_string() });
        }
        let out = self.fresh_temp(v.ty.clone());
        match op {
            OperatorToken::Minus => self.emit(Op::Neg, out, v.value, Ref::NULL),
            OperatorToken::Not => self.emit(Op::Not, out, v.value, Ref::NULL),
            _ => return Err(InternalError::UnexpectedPatternCommand.into()),
        }
        self.intermediates.push(Intermediate::scalar(out, v.ty));
        Ok(())
    }

    fn compile_binary(&mut self, op: OperatorToken, at: Location) -> Result<(), CompileError> {
        if op == OperatorToken::Index {
            return self.compile_index(at);
        }
        let rhs = self.pop_intermediate()?;
        let lhs = self.pop_intermediate()?;
        let result_ty = binary_result_type(op, at, &lhs.ty, &rhs.ty)?;
        let out = self.fresh_temp(result_ty.clone());
        let flags = if matches!(result_ty, Type::Float(_)) { OperationFlags::width(8).with_float() } else { OperationFlags::width(8) };
        self.instructions.push(Instruction::with_flags(opcode_for(op), flags, out, lhs.value, rhs.value));
        self.intermediates.push(Intermediate::scalar(out, result_ty));
        Ok(())
    }

    fn compile_index(&mut self, at: Location) -> Result<(), CompileError> {
        let index = self.pop_intermediate()?;
        let base = self.pop_intermediate()?;
        let Type::Array(elem_ty) = &base.ty else {
            return Err(CompileError::TypeMismatch { at, detail: "indexing requires an array".to_string() });
        };
        if !index.ty.is_scalar() {
            return Err(CompileError::TypeMismatch { at, detail: "array index must be a scalar".to_string() });
        }
        let elem_ty = (**elem_ty).clone();
        let out = self.fresh_temp(elem_ty.clone());
        self.emit(Op::ArrayLoad, out, base.value, index.value);
        self.intermediates.push(Intermediate::scalar(out, elem_ty));
        Ok(())
    }

    fn compile_member(&mut self, name: &str, at: Location) -> Result<(), CompileError> {
        let base = self.pop_intermediate()?;
        let Some((field_index, field_ty)) = base.ty.lookup_field(name) else {
            return Err(CompileError::TypeMismatch { at, detail: format!("no field '{name}' on this record") });
        };
        let field_ty = field_ty.clone();
        let offset_words = base.ty.element_offset(field_index) / WORD;
        let ptr = self.fresh_temp(field_ty.clone());
        self.emit(Op::ArrayOffset, ptr, base.value, Ref::constant(offset_words as i64));
        if matches!(field_ty, Type::Tuple(_) | Type::Record(_)) {
            // Nested aggregate: keep viewing the same slab, no load.
            self.intermediates.push(Intermediate {
                value: ptr,
                ty: field_ty,
                owns_stack_memory: true,
                alloc_size: base.alloc_size,
                ref_offset: base.ref_offset + offset_words,
            });
        } else {
            // Scalar (or array-handle) field: actually read the word through
            // the computed pointer rather than forwarding the pointer itself.
            let out = self.fresh_temp(field_ty.clone());
            self.emit(Op::MemLoad, out, ptr, Ref::NULL);
            self.intermediates.push(Intermediate::scalar(out, field_ty));
        }
        Ok(())
    }

    fn begin_emplace(&mut self, kind: EmplaceKind, args_total: usize) -> Result<(), CompileError> {
        let alloc_instruction_index = self.instructions.len();
        self.instructions.push(Instruction::new(Op::Mov, Ref::NULL, Ref::NULL, Ref::NULL));
        let pointer_intermediate_index = self.intermediates.len();
        let placeholder = self.fresh_temp(Type::empty_tuple());
        self.intermediates.push(Intermediate { value: placeholder, ty: Type::empty_tuple(), owns_stack_memory: true, alloc_size: 0, ref_offset: 0 });
        self.emplace.push(EmplaceFrame {
            kind,
            alloc_instruction_index,
            pointer_intermediate_index,
            args_handled: 0,
            args_total,
            element_size: 0,
            element_type: None,
            record_fields: Vec::new(),
            is_record: None,
            callee: None,
            callee_ty: None,
        });
        if args_total == 0 {
            self.finalize_emplace()?;
        }
        Ok(())
    }

    fn begin_emplace_call(&mut self, callee: Ref, callee_ty: Type, args_total: usize) -> Result<(), CompileError> {
        self.emplace.push(EmplaceFrame {
            kind: EmplaceKind::ProcCall,
            alloc_instruction_index: usize::MAX,
            pointer_intermediate_index: usize::MAX,
            args_handled: 0,
            args_total,
            element_size: 0,
            element_type: None,
            record_fields: Vec::new(),
            is_record: None,
            callee: Some(callee),
            callee_ty: Some(callee_ty),
        });
        if args_total == 0 {
            self.finalize_emplace()?;
        }
        Ok(())
    }

    fn compile_end_arg(&mut self, field_name: Option<String>) -> Result<(), CompileError> {
        let value = self.pop_intermediate()?;
        let frame = self.emplace.last_mut().ok_or(InternalError::NoOpenEmplaceFrame)?;
        match frame.kind {
            EmplaceKind::ProcCall => {
                self.instructions.push(Instruction::new(Op::Push, Ref::NULL, value.value, Ref::NULL));
            }
            EmplaceKind::Array => {
                if let Some(elem_ty) = &frame.element_type {
                    if *elem_ty != value.ty {
                        return Err(CompileError::TypeMismatch { at: Location::default(), detail: "array elements must share one type".to_string() });
                    }
                } else {
                    frame.element_size = value.ty.total_size();
                    frame.element_type = Some(value.ty.clone());
                }
                let ptr = self.intermediates[frame.pointer_intermediate_index].value;
                let index = Ref::constant(frame.args_handled as i64);
                self.instructions.push(Instruction::new(Op::ArrayStore, ptr, index, value.value));
            }
            EmplaceKind::Struct => {
                match (frame.is_record, &field_name) {
                    (None, Some(_)) => frame.is_record = Some(true),
                    (None, None) => frame.is_record = Some(false),
                    (Some(true), None) | (Some(false), Some(_)) => {
                        return Err(CompileError::InconsistentAggregate { at: Location::default(), detail: "cannot mix named and positional fields in one literal".to_string() });
                    }
                    _ => {}
                }
                let name = field_name.unwrap_or_else(|| frame.record_fields.len().to_string());
                if frame.record_fields.iter().any(|(n, _)| *n == name) {
                    return Err(CompileError::InconsistentAggregate { at: Location::default(), detail: format!("duplicate field '{name}'") });
                }
                let offset_words = frame.record_fields.iter().map(|(_, t)| t.total_size()).sum::<usize>() / WORD;
                frame.record_fields.push((name, value.ty.clone()));
                let ptr_value = self.intermediates[frame.pointer_intermediate_index].value;
                let dest = self.fresh_temp(value.ty.clone());
                self.emit(Op::ArrayOffset, dest, ptr_value, Ref::constant(offset_words as i64));
                self.emit(Op::MemStore, dest, value.value, Ref::NULL);
            }
        }
        let frame = self.emplace.last_mut().unwrap();
        frame.args_handled += 1;
        if frame.args_handled == frame.args_total {
            self.finalize_emplace()?;
        }
        Ok(())
    }

    fn finalize_emplace(&mut self) -> Result<(), CompileError> {
        let frame = self.emplace.pop().ok_or(InternalError::NoOpenEmplaceFrame)?;
        match frame.kind {
            EmplaceKind::ProcCall => {
                let return_ty = match &frame.callee_ty {
                    Some(Type::Procedure { outputs, .. }) if !outputs.is_empty() => outputs[0].clone(),
                    _ => Type::int64(),
                };
                let out = self.fresh_temp(return_ty.clone());
                let callee = frame.callee.unwrap_or(Ref::NULL);
                self.instructions.push(Instruction::new(Op::Call, out, callee, Ref::constant(frame.args_total as i64)));
                // A struct-returning call hands back a pointer into memory the
                // callee's frame allocated but never frees; treat it as
                // unowned so binding it copies into a fresh slab instead of
                // adopting a pointer with no matching `STACK_FREE`.
                self.intermediates.push(Intermediate::scalar(out, return_ty));
            }
            EmplaceKind::Array => {
                let elem_ty = frame.element_type.unwrap_or_else(Type::int64);
                let ptr = self.intermediates[frame.pointer_intermediate_index].value;
                self.instructions[frame.alloc_instruction_index] = Instruction::new(Op::ArrayAlloc, ptr, Ref::static_pointer(0), Ref::constant(frame.args_total as i64));
                self.intermediates.truncate(frame.pointer_intermediate_index);
                self.intermediates.push(Intermediate::scalar(ptr, Type::array_of(elem_ty)));
            }
            EmplaceKind::Struct => {
                let total_words = frame.record_fields.iter().map(|(_, t)| t.total_size()).sum::<usize>() / WORD;
                let ty = if frame.is_record == Some(true) {
                    Type::Record(frame.record_fields.into_iter().map(|(name, ty)| modlang_asm::RecordField { name, ty }).collect())
                } else {
                    Type::Tuple(frame.record_fields.into_iter().map(|(_, ty)| ty).collect())
                };
                let ptr = self.intermediates[frame.pointer_intermediate_index].value;
                self.instructions[frame.alloc_instruction_index] = Instruction::new(Op::StackAlloc, ptr, Ref::constant(total_words as i64), Ref::NULL);
                self.intermediates.truncate(frame.pointer_intermediate_index);
                self.intermediates.push(Intermediate { value: ptr, ty, owns_stack_memory: true, alloc_size: total_words, ref_offset: 0 });
            }
        }
        Ok(())
    }

    fn compile_end_term(&mut self, finished: &mut Vec<CompiledValue>) -> Result<(), CompileError> {
        let v = self.pop_intermediate()?;
        self.emit(Op::Push, Ref::NULL, v.value, Ref::NULL);
        finished.push(v.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;
    use crate::tokenizer::Tokenizer;

    fn compile_src(src: &str, bindings: &mut Bindings) -> (Vec<Instruction>, Vec<CompiledValue>) {
        let mut tz = Tokenizer::new(src.as_bytes());
        let pattern = parse_expression(&mut tz, false).unwrap().pattern;
        ExprCompiler::new(bindings).compile(&pattern).unwrap()
    }

    #[test]
    fn compiles_arithmetic_to_temporaries() {
        let mut bindings = Bindings::new();
        let (instrs, results) = compile_src("2 + 3 * 4;", &mut bindings);
        assert!(instrs.iter().any(|i| i.op == Op::Mul));
        assert!(instrs.iter().any(|i| i.op == Op::Plus));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ty, Type::int64());
    }

    #[test]
    fn undefined_name_is_an_error() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"x + 1;");
        let pattern = parse_expression(&mut tz, false).unwrap().pattern;
        assert!(ExprCompiler::new(&mut bindings).compile(&pattern).is_err());
    }

    #[test]
    fn array_literal_allocates_and_stores() {
        let mut bindings = Bindings::new();
        let (instrs, results) = compile_src("[1, 2, 3];", &mut bindings);
        assert!(instrs.iter().any(|i| i.op == Op::ArrayAlloc));
        assert_eq!(instrs.iter().filter(|i| i.op == Op::ArrayStore).count(), 3);
        assert!(matches!(results[0].ty, Type::Array(_)));
    }

    #[test]
    fn record_literal_and_member_access() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"{x: 1, y: 2}.y;");
        let pattern = parse_expression(&mut tz, false).unwrap().pattern;
        let (instrs, results) = ExprCompiler::new(&mut bindings).compile(&pattern).unwrap();
        assert!(instrs.iter().any(|i| i.op == Op::StackAlloc));
        assert!(instrs.iter().any(|i| i.op == Op::MemStore));
        assert!(instrs.iter().any(|i| i.op == Op::MemLoad));
        assert_eq!(results[0].ty, Type::int64());
    }

    #[test]
    fn record_field_assignment_compacts_owned_tail() {
        let mut bindings = Bindings::new();
        let mut tz = Tokenizer::new(b"{x: 1, y: 2}.x;");
        let pattern = parse_expression(&mut tz, false).unwrap().pattern;
        let (_instrs, results) = ExprCompiler::new(&mut bindings).compile(&pattern).unwrap();
        // The `.x` leaf is scalar, so it's loaded through `MemLoad` rather
        // than kept as a pointer into the record's slab.
        assert!(!results[0].owns_stack_memory);
        assert_eq!(results[0].ty, Type::int64());
    }
}
