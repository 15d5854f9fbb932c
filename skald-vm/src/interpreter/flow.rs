//! Branching, calls and host-function dispatch.

use skald_asm::Param;

use crate::consts::CALL_STACK_SIZE;
use crate::error::RuntimeFault;
use crate::sys::SysCommand;
use crate::value::Value;

use super::{CallFrame, Cursor, Vm};

impl Vm {
    pub(super) fn op_eval(&mut self, register: usize) {
        self.eval = self.truthy(&self.registers[register]);
    }

    /// Strict same-kind comparison into the eval latch; two unsets compare
    /// unequal here, unlike under the `=` operator.
    pub(super) fn op_ecmp(&mut self, left: usize, right: usize) {
        self.eval = match (&self.registers[left], &self.registers[right]) {
            (Value::Num(x), Value::Num(y)) => x == y,
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Label(x), Value::Label(y)) => x == y,
            (Value::Table(x), Value::Table(y)) => x == y,
            _ => false,
        };
    }

    // ---- calls ------------------------------------------------------------

    pub(super) fn op_call(&mut self, register: usize, capacity: i32) -> Result<(), RuntimeFault> {
        let Value::Label(target) = self.registers[register] else {
            return Err(RuntimeFault::runtime("Register is not a label"));
        };
        if target < 0 {
            return Err(RuntimeFault::runtime("Register is not a label"));
        }
        if self.frames.len() >= CALL_STACK_SIZE {
            return Err(RuntimeFault::runtime("Call stack limit reached"));
        }

        let locals = self.new_locals_table(capacity.max(1) as usize)?;
        self.frames.push(CallFrame {
            call_index: self.pc - 1,
            locals: Value::Table(locals),
        });
        self.pc = target as usize;
        Ok(())
    }

    pub(super) fn op_ret(&mut self) -> Result<(), RuntimeFault> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RuntimeFault::runtime("Call stack is empty"))?;

        if let Some(locals) = frame.locals.table_id() {
            // Store the observed capacity back into the call site so the
            // next call pre-sizes its locals table.
            let capacity = self.heap.table(locals).capacity();
            self.program.instructions[frame.call_index].rparam = Param::int(capacity as i32);
            self.heap.free_table(locals);
        }
        self.pc = frame.call_index + 1;
        Ok(())
    }

    pub(super) fn op_local(&mut self) -> Result<(), RuntimeFault> {
        if self.frames.is_empty() {
            return Err(RuntimeFault::runtime("Call stack is empty"));
        }
        self.parent = self.cursor_value()?;
        self.cursor = Cursor::Frame(self.frames.len() - 1);
        Ok(())
    }

    /// Function prologue arity check: pops the passed argument count and
    /// compares it against the expectation.
    pub(super) fn op_opt_pval(&mut self, expected: i32, name: i32) -> Result<(), RuntimeFault> {
        let value = self
            .stack
            .pop()
            .ok_or_else(|| RuntimeFault::runtime("Stack is empty"))?;
        let Value::Num(actual) = value else {
            return Err(RuntimeFault::runtime("Register is not a number"));
        };
        self.registers[0] = Value::Num(actual);

        let actual = actual as i32;
        if actual != expected {
            let name = self.string_constant(name)?.0;
            return Err(RuntimeFault::runtime(match expected {
                0 => format!("{name} expected no arguments but got {actual}"),
                1 => format!("{name} expected 1 argument but got {actual}"),
                _ => format!("{name} expected {expected} arguments but got {actual}"),
            }));
        }
        Ok(())
    }

    // ---- assertions and explicit errors ------------------------------------

    pub(super) fn op_assert(&mut self, left: usize, right: usize) -> Result<(), RuntimeFault> {
        if self.truthy(&self.registers[left]) {
            Ok(())
        } else {
            Err(RuntimeFault::runtime(
                self.display(&self.registers[right]),
            ))
        }
    }

    pub(super) fn op_rte(&mut self, register: usize) -> Result<(), RuntimeFault> {
        match &self.registers[register] {
            Value::Str(message) => Err(RuntimeFault::runtime(message.clone())),
            _ => Err(RuntimeFault::runtime("Invalid operation")),
        }
    }

    // ---- host dispatch -----------------------------------------------------

    /// Calls a built-in system command.
    ///
    /// The arguments stay on the stack for the duration of the call (they
    /// are GC roots); the callee receives copies and the stack unwinds
    /// afterwards.
    pub(super) fn op_sys(&mut self, id: i32, argc: i32) -> Result<(), RuntimeFault> {
        let argc = argc.max(0) as usize;
        if argc > self.stack.len() {
            return Err(RuntimeFault::runtime("Stack is empty"));
        }

        let index = usize::try_from(id)
            .map_err(|_| RuntimeFault::runtime(format!("System function {id} not available")))?;
        let Some(mut function) = self.sys.take(index) else {
            return Err(match SysCommand::from_index(index) {
                Some(command) => {
                    RuntimeFault::runtime(format!("System function {command:?} not available"))
                }
                None => RuntimeFault::runtime(format!("System function {id} not available")),
            });
        };

        let base = self.stack.len() - argc;
        let args: Vec<Value> = self.stack[base..].to_vec();
        let result = function(self, &args);
        self.sys.put_back(index, function);

        let value = result?;
        self.stack.truncate(base);
        self.registers[0] = value;
        Ok(())
    }

    /// Resolves a native function name to its registry index.
    pub(super) fn op_fload(&mut self, register: usize) {
        let name = self.display_with(&self.registers[register], 0);
        self.registers[register] = match self.natives.index_of(&name) {
            Some(index) => Value::Num(index as f64),
            None => Value::Unset,
        };
    }

    /// Calls a registered native function.
    ///
    /// The slot `argc` below the top holds the resolved index; the slots
    /// above it are the arguments.
    pub(super) fn op_fcall(&mut self, argc: i32) -> Result<(), RuntimeFault> {
        let argc = argc.max(0) as usize;
        if argc == 0 || argc > self.stack.len() {
            return Err(RuntimeFault::runtime("Stack is empty"));
        }

        let base = self.stack.len() - argc;
        let resolved = self.stack[base].to_number();
        let index = if resolved >= 0.0 {
            resolved as usize
        } else {
            let shown = self.display_with(&self.stack[base], 0);
            return Err(RuntimeFault::runtime(format!(
                "External function {shown} not found"
            )));
        };

        let Some((_, mut function)) = self.natives.take(index) else {
            let shown = self.display_with(&self.stack[base], 0);
            return Err(RuntimeFault::runtime(format!(
                "External function {shown} not found"
            )));
        };

        let args: Vec<Value> = self.stack[base + 1..].to_vec();
        let result = function(self, &args);
        self.natives.put_back(index, function);

        let value = result?;
        self.stack.truncate(base);
        self.registers[0] = value;
        Ok(())
    }
}
