//! End-to-end tests: assemble a listing, run it, observe the machine.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::value::Value;
use crate::{Vm, VmError};

mod flow;
mod gc;
mod iterators;

/// Output sink shared between the VM and the test.
#[derive(Clone, Default)]
struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl SharedOutput {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Builds a VM over an assembled listing with captured output.
fn vm_for(source: &str) -> (Vm, SharedOutput) {
    let program = skald_asm::assembler::assemble(source).expect("listing must assemble");
    let mut vm = Vm::new(program, &[]).expect("program must load");
    let output = SharedOutput::default();
    vm.set_output(Box::new(output.clone()));
    (vm, output)
}

/// Runs a listing that must succeed; returns the VM and its output.
fn run_ok(source: &str) -> (Vm, String) {
    let (mut vm, output) = vm_for(source);
    vm.run().expect("program must run to END");
    (vm, output.text())
}

/// Runs a listing that must fail; returns the formatted error.
fn run_err(source: &str) -> String {
    let (mut vm, _) = vm_for(source);
    match vm.run() {
        Err(VmError::Runtime(message)) => message,
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

fn reg_num(vm: &Vm, register: usize) -> f64 {
    match &vm.registers()[register] {
        Value::Num(n) => *n,
        other => panic!("register {register} holds {other:?}, expected a number"),
    }
}

fn reg_str(vm: &Vm, register: usize) -> String {
    match &vm.registers()[register] {
        Value::Str(s) => s.clone(),
        other => panic!("register {register} holds {other:?}, expected a string"),
    }
}
