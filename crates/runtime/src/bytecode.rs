//! Compiled program data and execution plans.
//!
//! [`Bytecode`] is immutable once the compiler hands it over. Host
//! calls into compiled functions never touch it: the trampoline layers
//! a disposable [`EntryPatch`] over the shared program, so a unit and
//! its duplicates can run against the same bytecode without observing
//! each other's call scaffolding.

use std::sync::Arc;

use tarn_foundation::code::{CompiledFunction, Instruction, OpcodeKind};
use tarn_foundation::value::Value;

/// Immutable compiled program: entry routine plus constant pool.
#[derive(Debug, Clone)]
pub struct Bytecode {
    entry: CompiledFunction,
    constants: Vec<Value>,
}

impl Bytecode {
    pub fn new(entry: CompiledFunction, constants: Vec<Value>) -> Self {
        Self { entry, constants }
    }

    pub fn entry(&self) -> &CompiledFunction {
        &self.entry
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }
}

/// Disposable entry-routine overlay for one trampoline call.
///
/// Overlay constants index after the base pool, so the synthesized
/// instructions address them without renumbering anything.
#[derive(Debug, Clone)]
pub struct EntryPatch {
    instructions: Vec<Instruction>,
    constants: Vec<Value>,
}

impl EntryPatch {
    /// Builds the call scaffold: push the callee and each argument,
    /// call, store the result in the output slot, halt.
    pub fn call_sequence(
        base_constants: usize,
        callee: Value,
        args: &[Value],
        out_slot: u32,
    ) -> Self {
        let mut constants = Vec::with_capacity(1 + args.len());
        constants.push(callee);
        constants.extend_from_slice(args);

        let base = base_constants as u32;
        let mut instructions = Vec::with_capacity(args.len() + 4);
        instructions.push(Instruction::with_operand(OpcodeKind::Constant, base));
        for offset in 0..args.len() as u32 {
            instructions.push(Instruction::with_operand(
                OpcodeKind::Constant,
                base + 1 + offset,
            ));
        }
        instructions.push(Instruction::with_operand(OpcodeKind::Call, args.len() as u32));
        instructions.push(Instruction::with_operand(OpcodeKind::SetGlobal, out_slot));
        instructions.push(Instruction::simple(OpcodeKind::Suspend));

        Self {
            instructions,
            constants,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }
}

/// Resource ceilings an engine enforces while running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Upper bound on VM value allocations, `None` for unlimited.
    pub max_allocs: Option<u64>,
}

/// Everything an engine needs for one execution: the shared program,
/// an optional entry overlay, the builtin table and the limits.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    bytecode: Arc<Bytecode>,
    patch: Option<EntryPatch>,
    builtins: Arc<Vec<Value>>,
    limits: ExecutionLimits,
}

impl ExecutionPlan {
    pub fn new(bytecode: Arc<Bytecode>, builtins: Arc<Vec<Value>>, limits: ExecutionLimits) -> Self {
        Self {
            bytecode,
            patch: None,
            builtins,
            limits,
        }
    }

    pub fn with_patch(mut self, patch: EntryPatch) -> Self {
        self.patch = Some(patch);
        self
    }

    /// Instructions to execute: the overlay when present, the
    /// program's own entry routine otherwise.
    pub fn entry(&self) -> &[Instruction] {
        match &self.patch {
            Some(patch) => patch.instructions(),
            None => &self.bytecode.entry().instructions,
        }
    }

    /// Local slots the entry frame needs. The synthesized overlay
    /// keeps everything on the stack and uses none.
    pub fn entry_locals(&self) -> usize {
        match &self.patch {
            Some(_) => 0,
            None => self.bytecode.entry().locals,
        }
    }

    /// Resolves a constant index against the base pool first, then
    /// the overlay.
    pub fn constant(&self, index: usize) -> Option<&Value> {
        let base = self.bytecode.constants();
        if index < base.len() {
            return base.get(index);
        }
        self.patch.as_ref()?.constants().get(index - base.len())
    }

    pub fn constants_len(&self) -> usize {
        let overlay = self.patch.as_ref().map_or(0, |p| p.constants().len());
        self.bytecode.constants().len() + overlay
    }

    pub fn builtin(&self, index: usize) -> Option<&Value> {
        self.builtins.get(index)
    }

    pub fn builtins(&self) -> &[Value] {
        &self.builtins
    }

    pub fn limits(&self) -> ExecutionLimits {
        self.limits
    }

    pub fn bytecode(&self) -> &Arc<Bytecode> {
        &self.bytecode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Arc<Bytecode> {
        let entry = CompiledFunction::new(
            vec![Instruction::with_operand(OpcodeKind::Constant, 0)],
            0,
            2,
        );
        Arc::new(Bytecode::new(entry, vec![Value::Int(7)]))
    }

    #[test]
    fn test_call_sequence_layout() {
        let patch = EntryPatch::call_sequence(
            3,
            Value::string("callee"),
            &[Value::Int(1), Value::Int(2)],
            9,
        );

        let kinds: Vec<(OpcodeKind, Option<u32>)> = patch
            .instructions()
            .iter()
            .map(|i| (i.kind, i.operand()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (OpcodeKind::Constant, Some(3)),
                (OpcodeKind::Constant, Some(4)),
                (OpcodeKind::Constant, Some(5)),
                (OpcodeKind::Call, Some(2)),
                (OpcodeKind::SetGlobal, Some(9)),
                (OpcodeKind::Suspend, None),
            ]
        );
        assert_eq!(patch.constants().len(), 3);
    }

    #[test]
    fn test_plan_resolves_overlay_constants_after_base() {
        let bytecode = base();
        let patch = EntryPatch::call_sequence(1, Value::string("f"), &[Value::Int(5)], 0);
        let plan = ExecutionPlan::new(Arc::clone(&bytecode), Arc::new(Vec::new()), ExecutionLimits::default())
            .with_patch(patch);

        assert!(plan.constant(0).unwrap().equals(&Value::Int(7)));
        assert!(plan.constant(1).unwrap().equals(&Value::string("f")));
        assert!(plan.constant(2).unwrap().equals(&Value::Int(5)));
        assert!(plan.constant(3).is_none());
        assert_eq!(plan.constants_len(), 3);
        assert_eq!(plan.entry_locals(), 0);

        // The shared program is left exactly as compiled.
        assert_eq!(bytecode.constants().len(), 1);
    }

    #[test]
    fn test_plan_without_overlay_uses_program_entry() {
        let bytecode = base();
        let plan = ExecutionPlan::new(
            Arc::clone(&bytecode),
            Arc::new(vec![Value::string("builtin")]),
            ExecutionLimits::default(),
        );

        assert_eq!(plan.entry().len(), 1);
        assert_eq!(plan.entry_locals(), 2);
        assert_eq!(plan.constants_len(), 1);
        assert!(plan.builtin(0).is_some());
        assert!(plan.builtin(1).is_none());
    }
}
