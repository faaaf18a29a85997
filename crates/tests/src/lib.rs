//! Integration test harness for Tarn.
//!
//! This crate provides a reference engine that interprets the full
//! instruction set, plus a fixed-program front end so end-to-end tests
//! can drive the script facade without a language parser: Assemble →
//! Compile → Run → Verify.

use std::cell::Cell;
use std::sync::{Arc, Once};

use tarn_foundation::code::{CompiledFunction, Instruction, OpcodeKind};
use tarn_foundation::context::Context;
use tarn_foundation::error::{Error, Result};
use tarn_foundation::value::Value;

use tarn_runtime::bytecode::{Bytecode, ExecutionPlan};
use tarn_runtime::engine::{AbortHandle, Compiler, Engine, Execution, Parser, SyntaxTree};
use tarn_runtime::globals::{GlobalLayout, Globals};
use tarn_runtime::script::Script;
use tarn_runtime::unit::Compiled;

/// Install a fmt subscriber once so `TARN_LOG`-style filtering works
/// under `cargo test`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Reference engine for tests. Interprets every instruction kind,
/// checks its abort flag and the context at instruction boundaries,
/// runs compiled callees inline and routes every other callable back
/// through the context's caller capability.
pub struct TestEngine;

impl Engine for TestEngine {
    fn new_execution(&self, plan: ExecutionPlan, globals: Globals) -> Result<Box<dyn Execution>> {
        Ok(Box::new(TestExecution {
            plan,
            globals,
            abort: AbortHandle::new(),
            pushes: Cell::new(0),
        }))
    }
}

enum Flow {
    End,
    Return(Value),
    Suspend,
}

pub struct TestExecution {
    plan: ExecutionPlan,
    globals: Globals,
    abort: AbortHandle,
    pushes: Cell<u64>,
}

impl TestExecution {
    /// Counts every value pushed onto the operand stack against the
    /// plan's allocation budget.
    fn charge(&self) -> Result<()> {
        let Some(max) = self.plan.limits().max_allocs else {
            return Ok(());
        };
        let used = self.pushes.get() + 1;
        self.pushes.set(used);
        if used > max {
            return Err(Error::runtime("allocation budget exhausted"));
        }
        Ok(())
    }

    fn run_frame(
        &self,
        instructions: &[Instruction],
        locals: &mut Vec<Value>,
        ctx: &Context,
    ) -> Result<Flow> {
        let mut stack: Vec<Value> = Vec::new();
        let mut ip = 0usize;
        while ip < instructions.len() {
            if self.abort.is_aborted() {
                return Err(Error::runtime("execution aborted"));
            }
            if ctx.is_canceled() {
                return Err(ctx.cancel_error());
            }
            let instruction = &instructions[ip];
            ip += 1;
            let operand = instruction.operand().unwrap_or(0) as usize;
            match instruction.kind {
                OpcodeKind::Constant => {
                    let value = self
                        .plan
                        .constant(operand)
                        .cloned()
                        .ok_or_else(|| Error::runtime("constant out of range"))?;
                    self.charge()?;
                    stack.push(value);
                }
                OpcodeKind::Pop => {
                    pop(&mut stack)?;
                }
                OpcodeKind::GetGlobal => {
                    self.charge()?;
                    stack.push(self.globals.get(operand)?);
                }
                OpcodeKind::SetGlobal => {
                    let value = pop(&mut stack)?;
                    self.globals.set(operand, value)?;
                }
                OpcodeKind::GetLocal => {
                    self.charge()?;
                    stack.push(locals.get(operand).cloned().unwrap_or_default());
                }
                OpcodeKind::SetLocal => {
                    let value = pop(&mut stack)?;
                    if operand >= locals.len() {
                        locals.resize(operand + 1, Value::Undefined);
                    }
                    locals[operand] = value;
                }
                OpcodeKind::GetBuiltin => {
                    let value = self
                        .plan
                        .builtin(operand)
                        .cloned()
                        .ok_or_else(|| Error::runtime("builtin out of range"))?;
                    self.charge()?;
                    stack.push(value);
                }
                OpcodeKind::Jump => {
                    ip = operand;
                }
                OpcodeKind::JumpFalsy => {
                    if pop(&mut stack)?.is_falsy() {
                        ip = operand;
                    }
                }
                OpcodeKind::Call => {
                    let at = stack
                        .len()
                        .checked_sub(operand)
                        .ok_or_else(|| Error::runtime("call underflows the stack"))?;
                    let args = stack.split_off(at);
                    let callee = pop(&mut stack)?;
                    match &callee {
                        Value::Compiled(function) => {
                            let mut frame = args;
                            frame.truncate(function.params);
                            frame.resize(
                                function.locals.max(function.params),
                                Value::Undefined,
                            );
                            match self.run_frame(&function.instructions, &mut frame, ctx)? {
                                Flow::Return(value) => {
                                    self.charge()?;
                                    stack.push(value);
                                }
                                Flow::End => {
                                    self.charge()?;
                                    stack.push(Value::Undefined);
                                }
                                Flow::Suspend => return Ok(Flow::Suspend),
                            }
                        }
                        other => {
                            let result = ctx.call(other, &args)?;
                            self.charge()?;
                            stack.push(result);
                        }
                    }
                }
                OpcodeKind::ReturnValue => {
                    return Ok(Flow::Return(pop(&mut stack)?));
                }
                OpcodeKind::Return => {
                    return Ok(Flow::Return(Value::Undefined));
                }
                OpcodeKind::Suspend => {
                    return Ok(Flow::Suspend);
                }
            }
        }
        Ok(Flow::End)
    }
}

impl Execution for TestExecution {
    fn run(&mut self, ctx: &Context) -> Result<()> {
        let this = &*self;
        let mut locals = vec![Value::Undefined; this.plan.entry_locals()];
        this.run_frame(this.plan.entry(), &mut locals, ctx)?;
        Ok(())
    }

    fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value> {
    stack.pop().ok_or_else(|| Error::runtime("stack underflow"))
}

/// A hand-assembled program standing in for parsed source.
#[derive(Debug, Clone, Default)]
pub struct FixedProgram {
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Value>,
    /// Local slots of the entry frame.
    pub locals: usize,
    /// Globals the "script" declares beyond the host variables.
    pub globals: Vec<String>,
}

/// Parser stand-in: accepts any source and yields an empty tree.
pub struct FixedParser;

impl Parser for FixedParser {
    fn parse(&self, _source: &str) -> Result<SyntaxTree> {
        Ok(SyntaxTree::new(()))
    }
}

/// Compiler stand-in that emits a prebuilt program.
pub struct FixedCompiler {
    program: FixedProgram,
}

impl FixedCompiler {
    pub fn new(program: FixedProgram) -> Self {
        FixedCompiler { program }
    }
}

impl Compiler for FixedCompiler {
    fn compile(&self, _tree: SyntaxTree, layout: &mut GlobalLayout) -> Result<Bytecode> {
        for name in &self.program.globals {
            layout.define_global(name);
        }
        let entry = CompiledFunction::new(self.program.instructions.clone(), 0, self.program.locals);
        Ok(Bytecode::new(entry, self.program.constants.clone()))
    }
}

/// Compile `program` through the script facade with the reference
/// engine.
///
/// # Panics
///
/// Panics if compilation fails.
pub fn compile_program(script: &Script, program: FixedProgram) -> Compiled {
    init_tracing();
    script
        .compile(&FixedParser, &FixedCompiler::new(program), Arc::new(TestEngine))
        .expect("compilation failed")
}

/// Builtin-table slot the script facade assigns to `name`.
///
/// # Panics
///
/// Panics when no such builtin exists.
pub fn builtin_slot(name: &str) -> u32 {
    tarn_builtins::all()
        .iter()
        .position(|descriptor| descriptor.name == name)
        .unwrap_or_else(|| panic!("no builtin named {name}")) as u32
}

pub fn op(kind: OpcodeKind, operand: u32) -> Instruction {
    Instruction::with_operand(kind, operand)
}

pub fn simple(kind: OpcodeKind) -> Instruction {
    Instruction::simple(kind)
}

/// A compiled function value for constants tables.
pub fn compiled(instructions: Vec<Instruction>, params: usize, locals: usize) -> Value {
    Value::Compiled(Arc::new(CompiledFunction::new(instructions, params, locals)))
}
