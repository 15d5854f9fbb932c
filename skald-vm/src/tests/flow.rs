use skald_asm::Opcode;

use super::*;

#[test]
fn eval_and_conditional_jumps() {
    let source = "move @0 1\n\
                  eval @0\n\
                  jmpt yes\n\
                  move @1 0\n\
                  jmp done\n\
                  yes:\n\
                  move @1 42\n\
                  done:\n";
    let (vm, _) = run_ok(source);
    assert_eq!(reg_num(&vm, 1), 42.0);
}

#[test]
fn fused_evaluate_and_jump() {
    let source = "move @0 0\n\
                  jmpef @0 skip\n\
                  move @1 1\n\
                  skip:\n\
                  move @2 2\n";
    let (vm, _) = run_ok(source);
    assert_eq!(vm.registers()[1], Value::Unset);
    assert_eq!(reg_num(&vm, 2), 2.0);
}

#[test]
fn truthiness_of_each_kind() {
    // Number zero false, non-empty string true, unresolved label false.
    let source = "move @0 0\n\
                  jmpet @0 bad\n\
                  move @1 \"x\"\n\
                  jmpef @1 bad\n\
                  move @3 1\n\
                  jmp done\n\
                  bad:\n\
                  move @3 0\n\
                  done:\n";
    let (vm, _) = run_ok(source);
    assert_eq!(reg_num(&vm, 3), 1.0);
}

#[test]
fn empty_table_is_falsy_and_filled_table_truthy() {
    let source = "ctbl @0\n\
                  eval @0\n\
                  jmpt bad\n\
                  mload @0\n\
                  madd .x\n\
                  eval @0\n\
                  jmpf bad\n\
                  move @3 1\n\
                  jmp done\n\
                  bad:\n\
                  move @3 0\n\
                  done:\n";
    let (vm, _) = run_ok(source);
    assert_eq!(reg_num(&vm, 3), 1.0);
}

#[test]
fn strict_comparison_sets_the_latch() {
    let source = "move @0 \"7\"\n\
                  move @1 7\n\
                  ecmp @0 @1\n\
                  jmpt bad\n\
                  move @3 1\n\
                  jmp done\n\
                  bad:\n\
                  move @3 0\n\
                  done:\n";
    let (vm, _) = run_ok(source);
    assert_eq!(reg_num(&vm, 3), 1.0);
}

#[test]
fn call_and_return() {
    let source = "move @1 double\n\
                  jmp main\n\
                  double:\n\
                  pop @0\n\
                  add @0 @0\n\
                  ret\n\
                  main:\n\
                  push 21\n\
                  call @1\n";
    let (vm, _) = run_ok(source);
    assert_eq!(reg_num(&vm, 0), 42.0);
}

#[test]
fn locals_are_per_frame() {
    // The callee writes its locals through LOCAL; nothing leaks into
    // program memory.
    let source = "move @1 f\n\
                  jmp main\n\
                  f:\n\
                  local\n\
                  madd .tmp\n\
                  mpush\n\
                  mload .tmp\n\
                  mset 99\n\
                  mpop\n\
                  mload .tmp\n\
                  mget @2\n\
                  ret\n\
                  main:\n\
                  call @1\n\
                  mload\n";
    let (vm, _) = run_ok(source);
    assert_eq!(reg_num(&vm, 2), 99.0);
}

#[test]
fn ret_writes_the_locals_capacity_back_into_the_call_site() {
    let source = "move @1 f\n\
                  jmp main\n\
                  f:\n\
                  local\n\
                  madd 0\n\
                  madd 1\n\
                  madd 2\n\
                  madd 3\n\
                  ret\n\
                  main:\n\
                  call @1\n";
    let (vm, _) = run_ok(source);

    let call = vm
        .program()
        .instructions
        .iter()
        .find(|i| i.opcode == Opcode::CALL_R)
        .expect("program has a call");
    // Four locals force the table past its seeded capacity of one; the
    // observed capacity is cached at the call site.
    assert!(call.rparam.as_int() > 1, "cache was {}", call.rparam.as_int());
}

#[test]
fn arity_mismatch_raises_the_prologue_error() {
    let source = "move @1 f\n\
                  jmp main\n\
                  f:\n\
                  opt_pval 2 \"f\"\n\
                  ret\n\
                  main:\n\
                  push 7\n\
                  push 1\n\
                  call @1\n";
    let message = run_err(source);
    assert!(
        message.contains("f expected 2 arguments but got 1"),
        "{message}"
    );
    assert!(message.contains("runtime error"), "{message}");
}

#[test]
fn matching_arity_passes_the_prologue() {
    let source = "move @1 f\n\
                  jmp main\n\
                  f:\n\
                  opt_pval 1 \"f\"\n\
                  local\n\
                  opt_loadparam .x\n\
                  mload .x\n\
                  mget @2\n\
                  ret\n\
                  main:\n\
                  push 7\n\
                  push 1\n\
                  call @1\n";
    let (vm, _) = run_ok(source);
    assert_eq!(reg_num(&vm, 2), 7.0);
}

#[test]
fn calling_a_non_label_fails() {
    let message = run_err("move @1 5\ncall @1\n");
    assert!(message.contains("Register is not a label"), "{message}");
}

#[test]
fn returning_without_a_frame_fails() {
    let message = run_err("ret\n");
    assert!(message.contains("Call stack is empty"), "{message}");
}

#[test]
fn assert_raises_its_message() {
    let message = run_err("move @1 \"invariant broken\"\nassert @0 @1\n");
    assert!(message.contains("invariant broken"), "{message}");
}

#[test]
fn assert_passes_when_truthy() {
    let (vm, _) = run_ok("move @0 1\nmove @1 \"unused\"\nassert @0 @1\nmove @2 3\n");
    assert_eq!(reg_num(&vm, 2), 3.0);
}

#[test]
fn rte_raises_the_register_string() {
    let message = run_err("move @0 \"custom failure\"\nrte @0\n");
    assert!(message.contains("custom failure"), "{message}");
}

#[test]
fn error_trace_uses_file_and_line_metadata() {
    let source = "/file:main.ska\n\
                  /line:3\n\
                  move @0 \"boom\"\n\
                  rte @0\n";
    let message = run_err(source);
    assert_eq!(message, "main.ska:3: runtime error: boom");
}

#[test]
fn error_trace_includes_outer_frames() {
    let source = "/file:main.ska\n\
                  /line:1\n\
                  move @1 f\n\
                  jmp main\n\
                  f:\n\
                  /line:10\n\
                  move @0 \"boom\"\n\
                  rte @0\n\
                  main:\n\
                  /line:20\n\
                  call @1\n";
    let message = run_err(source);
    assert_eq!(message, "main.ska:10,20: runtime error: boom");
}

#[test]
fn fused_loop_still_branches_correctly() {
    // The MOVE+PUSH pair fuses to PUSH_N; the loop label behind it must
    // keep pointing at the loop head.
    let source = "move @2 0\n\
                  move @4 0\n\
                  loop:\n\
                  move @0 1\n\
                  push @0\n\
                  pop @1\n\
                  add @2 @1\n\
                  move @0 1\n\
                  add @4 @0\n\
                  move @5 5\n\
                  move @6 @4\n\
                  less @6 @5\n\
                  eval @6\n\
                  jmpt loop\n";
    let program = skald_asm::assembler::assemble(source).unwrap();
    assert!(
        program
            .instructions
            .iter()
            .any(|i| i.opcode == Opcode::PUSH_N),
        "expected the push fusion to fire"
    );

    let (vm, _) = run_ok(source);
    assert_eq!(reg_num(&vm, 2), 5.0);
    assert_eq!(reg_num(&vm, 4), 5.0);
}

#[test]
fn stack_overflow_is_a_runtime_error() {
    let message = run_err("loop:\npush 1\njmp loop\n");
    assert!(message.contains("Stack limit reached"), "{message}");
}

#[test]
fn nop_and_end_halt_cleanly() {
    let (_, output) = run_ok("nop\nnop\nend\n");
    assert_eq!(output, "");
}
