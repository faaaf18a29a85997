//! Bytecode data model shared between the compiler side and executions.
//!
//! The core never interprets these itself. They exist so the call
//! trampoline can splice an entry sequence over a unit's instruction
//! stream and hand the combined plan to whatever engine executes it.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Instruction kinds an execution plan may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpcodeKind {
    /// Push the constant at operand index.
    Constant,
    /// Drop the top of stack.
    Pop,
    /// Push the global at operand slot.
    GetGlobal,
    /// Pop the top of stack into the global at operand slot.
    SetGlobal,
    /// Push the local at operand slot.
    GetLocal,
    /// Pop the top of stack into the local at operand slot.
    SetLocal,
    /// Push the builtin at operand index.
    GetBuiltin,
    /// Unconditional jump to operand position.
    Jump,
    /// Jump to operand position when the top of stack pops falsy.
    JumpFalsy,
    /// Call the callee under the operand-count arguments on the stack.
    Call,
    /// Return the top of stack from the current function.
    ReturnValue,
    /// Return undefined from the current function.
    Return,
    /// Stop the execution, leaving globals as they are.
    Suspend,
}

impl OpcodeKind {
    pub fn operand_count(self) -> usize {
        match self {
            OpcodeKind::Constant
            | OpcodeKind::GetGlobal
            | OpcodeKind::SetGlobal
            | OpcodeKind::GetLocal
            | OpcodeKind::SetLocal
            | OpcodeKind::GetBuiltin
            | OpcodeKind::Jump
            | OpcodeKind::JumpFalsy
            | OpcodeKind::Call => 1,
            OpcodeKind::Pop
            | OpcodeKind::ReturnValue
            | OpcodeKind::Return
            | OpcodeKind::Suspend => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OpcodeKind::Constant => "Constant",
            OpcodeKind::Pop => "Pop",
            OpcodeKind::GetGlobal => "GetGlobal",
            OpcodeKind::SetGlobal => "SetGlobal",
            OpcodeKind::GetLocal => "GetLocal",
            OpcodeKind::SetLocal => "SetLocal",
            OpcodeKind::GetBuiltin => "GetBuiltin",
            OpcodeKind::Jump => "Jump",
            OpcodeKind::JumpFalsy => "JumpFalsy",
            OpcodeKind::Call => "Call",
            OpcodeKind::ReturnValue => "ReturnValue",
            OpcodeKind::Return => "Return",
            OpcodeKind::Suspend => "Suspend",
        }
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: OpcodeKind,
    pub operands: Vec<u32>,
}

impl Instruction {
    pub fn new(kind: OpcodeKind, operands: Vec<u32>) -> Self {
        debug_assert_eq!(operands.len(), kind.operand_count());
        Instruction { kind, operands }
    }

    pub fn simple(kind: OpcodeKind) -> Self {
        Instruction::new(kind, Vec::new())
    }

    pub fn with_operand(kind: OpcodeKind, operand: u32) -> Self {
        Instruction::new(kind, vec![operand])
    }

    pub fn operand(&self) -> Option<u32> {
        self.operands.first().copied()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.name())?;
        for operand in &self.operands {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

/// A compiled function value: an instruction slice plus its frame shape.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub instructions: Arc<[Instruction]>,
    pub params: usize,
    pub locals: usize,
}

impl CompiledFunction {
    pub fn new(instructions: Vec<Instruction>, params: usize, locals: usize) -> Self {
        CompiledFunction {
            instructions: instructions.into(),
            params,
            locals,
        }
    }
}
