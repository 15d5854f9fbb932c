use skald_asm::assembler::{assemble_with, Options};

use crate::table::Key;
use crate::{Value, Vm, VmError};

use super::*;

#[test]
fn unreachable_nested_tables_are_reclaimed() {
    let (mut vm, _) = vm_for("end");

    let outer = vm.new_table(4).unwrap();
    let child = vm.new_table(4).unwrap();
    vm.heap_mut()
        .table_mut(outer)
        .insert(Key::Str("child".into()), Value::Table(child));
    vm.set_register(0, Value::Table(outer));

    let live = vm.heap().collectable_blocks();
    let bytes = vm.heap().allocated_bytes();

    // Rooted through the register: nothing to sweep.
    assert_eq!(vm.collect_garbage(), 0);
    assert_eq!(vm.heap().collectable_blocks(), live);

    // Dropping the register strands both tables.
    vm.set_register(0, Value::Unset);
    assert_eq!(vm.collect_garbage(), 2);
    assert_eq!(vm.heap().collectable_blocks(), live - 2);
    assert!(vm.heap().allocated_bytes() < bytes);
    assert!(!vm.heap().is_live(outer));
    assert!(!vm.heap().is_live(child));
}

#[test]
fn explicit_gc_opcode_reclaims_cleared_registers() {
    let source = "ctbl @0\n\
                  mload @0\n\
                  madd .child\n\
                  mpush\n\
                  mload .child\n\
                  ctbl @1\n\
                  mset @1\n\
                  mpop\n\
                  mload\n\
                  clr @0\n\
                  clr @1\n\
                  gc\n";
    let (mut vm, _) = vm_for(source);
    vm.run().unwrap();

    // Only program memory and the args table remain collectable.
    assert_eq!(vm.heap().collectable_blocks(), 2);
}

#[test]
fn reachable_cycles_survive_collection() {
    let (mut vm, _) = vm_for("end");

    let a = vm.new_table(2).unwrap();
    let b = vm.new_table(2).unwrap();
    vm.heap_mut()
        .table_mut(a)
        .insert(Key::Str("next".into()), Value::Table(b));
    vm.heap_mut()
        .table_mut(b)
        .insert(Key::Str("next".into()), Value::Table(a));
    vm.set_register(3, Value::Table(a));

    assert_eq!(vm.collect_garbage(), 0);
    assert!(vm.heap().is_live(a));
    assert!(vm.heap().is_live(b));

    // An unreachable cycle cannot keep itself alive.
    vm.set_register(3, Value::Unset);
    assert_eq!(vm.collect_garbage(), 2);
}

#[test]
fn value_stack_entries_are_roots() {
    // The table survives on the stack even after the register is cleared.
    let (mut vm, _) = vm_for("ctbl @0\npush @0\nclr @0\ngc\npop @0\n");
    vm.run().unwrap();
    assert!(matches!(vm.registers()[0], Value::Table(_)));
    let id = vm.registers()[0].table_id().unwrap();
    assert!(vm.heap().is_live(id));
}

#[test]
fn program_memory_contents_are_never_collected() {
    let source = "mload\n\
                  madd .keep\n\
                  mload .keep\n\
                  ctbl @0\n\
                  mset @0\n\
                  clr @0\n\
                  gc\n\
                  mload\n\
                  mload .keep\n\
                  mget @1\n";
    let (vm, _) = run_ok(source);
    assert!(matches!(vm.registers()[1], Value::Table(_)));
}

#[test]
fn iterator_snapshot_tables_are_roots() {
    // A table only reachable through a live iterator must survive the
    // collection triggered by later allocations.
    let source = "ctbl @0\n\
                  mload @0\n\
                  madd 0\n\
                  iload\n\
                  clr @0\n\
                  gc\n\
                  ival @1\n\
                  idel\n";
    let (vm, _) = run_ok(source);
    assert_eq!(vm.registers()[1], Value::Unset);
}

#[test]
fn exhaustion_after_growth_is_fatal() {
    let program = assemble_with(
        "loop:\nctbl @0\npush @0\njmp loop\n",
        &Options::default(),
    )
    .unwrap();
    let mut program = program;
    program.heap_size_hint = 2048;

    let mut vm = Vm::new(program, &[]).unwrap();
    match vm.run() {
        Err(VmError::OutOfMemory(_)) => {}
        other => panic!("expected out-of-memory, got {other:?}"),
    }
    assert_eq!(vm.heap().bucket_count(), crate::consts::MAX_BUCKETS);
}

#[test]
fn collection_recovers_space_for_further_allocation() {
    // Tables become garbage as soon as the register is overwritten, so the
    // loop runs indefinitely within one or two buckets; bound it by count.
    let source = "move @1 0\n\
                  loop:\n\
                  ctbl @0\n\
                  move @2 1\n\
                  add @1 @2\n\
                  move @3 200\n\
                  move @4 @1\n\
                  less @4 @3\n\
                  eval @4\n\
                  jmpt loop\n";
    let program = assemble_with(source, &Options::default()).unwrap();
    let mut program = program;
    program.heap_size_hint = 4096;

    let mut vm = Vm::new(program, &[]).unwrap();
    vm.run().unwrap();
    assert_eq!(reg_num(&vm, 1), 200.0);
    assert!(vm.heap().bucket_count() < crate::consts::MAX_BUCKETS);
}
