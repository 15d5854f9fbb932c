use rstest::rstest;

use super::*;
use crate::program::seek_to_payload;

fn assemble_plain(source: &str) -> Program {
    assemble_with(
        source,
        &Options {
            optimize: false,
            ..Options::default()
        },
    )
    .unwrap()
}

#[test]
fn empty_source_yields_a_single_end() {
    let program = assemble("").unwrap();
    assert_eq!(program.instructions.len(), 1);
    assert_eq!(program.instructions[0].opcode, Opcode::END);
}

#[test]
fn end_is_always_appended() {
    let program = assemble_plain("nop\n");
    assert_eq!(
        program
            .instructions
            .iter()
            .map(|i| i.opcode)
            .collect::<Vec<_>>(),
        vec![Opcode::NOP, Opcode::END]
    );
}

#[rstest]
#[case("move @0 \"x\"", Opcode::MOVE_R_S)]
#[case("move @0 1.5", Opcode::MOVE_R_N)]
#[case("move @0 main", Opcode::MOVE_R_L)]
#[case("move @0 @1", Opcode::MOVE_R_R)]
fn move_overloads_resolve_by_operand_kind(#[case] source: &str, #[case] expected: Opcode) {
    let source = format!("main:\n{source}\n");
    let program = assemble_plain(&source);
    assert_eq!(program.instructions[0].opcode, expected);
}

#[test]
fn numeric_literal_truncates_into_int_slots() {
    let program = assemble_plain("sys 3.9 1.2\n");
    let sys = program.instructions[0];
    assert_eq!(sys.opcode, Opcode::SYS_N_N);
    assert_eq!(sys.lparam.as_int(), 3);
    assert_eq!(sys.rparam.as_int(), 1);
}

#[test]
fn field_shorthand_interns_like_a_string() {
    let program = assemble_plain("mload .player\nmload \"player\"\n");
    assert_eq!(program.strings, vec!["player".to_owned()]);
    assert_eq!(
        program.instructions[0].lparam,
        program.instructions[1].lparam
    );
}

#[test]
fn strings_are_interned_once() {
    let program = assemble_plain("push \"a\"\npush \"b\"\npush \"a\"\n");
    assert_eq!(program.strings, vec!["a".to_owned(), "b".to_owned()]);
    assert_eq!(program.instructions[0].lparam.as_int(), 0);
    assert_eq!(program.instructions[1].lparam.as_int(), 1);
    assert_eq!(program.instructions[2].lparam.as_int(), 0);
}

#[test]
fn labels_link_to_instruction_indices() {
    let program = assemble_plain("nop\nloop:\nnop\njmp loop\n");
    let jmp = program.instructions[2];
    assert_eq!(jmp.opcode, Opcode::JMP_L);
    assert_eq!(jmp.lparam.as_int(), 1);
}

#[test]
fn forward_references_link_too() {
    let program = assemble_plain("jmp done\nnop\ndone:\n");
    assert_eq!(program.instructions[0].lparam.as_int(), 2);
}

#[test]
fn missing_label_fails_assembly() {
    let err = assemble("jmp nowhere\n").unwrap_err();
    assert!(matches!(err, AsmError::MissingLabel(name) if name == "nowhere"));
}

#[test]
fn unknown_command_is_reported() {
    let err = assemble("frobnicate\n").unwrap_err();
    assert!(matches!(err, AsmError::UnknownCommand { name, .. } if name == "frobnicate"));
}

#[test]
fn wrong_operand_kinds_are_reported() {
    let err = assemble("jmp @4\n").unwrap_err();
    assert!(matches!(err, AsmError::InvalidParameters { name, .. } if name == "jmp"));
}

#[test]
fn call_sites_seed_the_locals_capacity_cache() {
    let program = assemble_plain("f:\nret\nmove @1 f\ncall @1\n");
    let call = program.instructions[2];
    assert_eq!(call.opcode, Opcode::CALL_R);
    assert_eq!(call.rparam.as_int(), 1);
}

#[test]
fn metadata_attaches_to_the_next_instruction() {
    let program = assemble_plain("/file:main.ska\n/line:1\nnop\n/line:2\nnop\n");
    assert_eq!(program.file_meta.len(), 1);
    assert_eq!(program.file_meta[0].instruction_index, 0);
    assert_eq!(program.file_meta[0].filename, "main.ska");
    assert_eq!(
        program
            .line_meta
            .iter()
            .map(|m| (m.instruction_index, m.line))
            .collect::<Vec<_>>(),
        vec![(0, 1), (1, 2)]
    );
}

#[test]
fn repeated_line_directives_collapse_onto_one_record() {
    let program = assemble_plain("/line:1\n/line:2\nnop\n");
    assert_eq!(
        program
            .line_meta
            .iter()
            .map(|m| (m.instruction_index, m.line))
            .collect::<Vec<_>>(),
        vec![(0, 2)]
    );
}

#[test]
fn push_constant_fusion() {
    let program = assemble("move @0 7\npush @0\n").unwrap();
    assert_eq!(program.instructions[0].opcode, Opcode::PUSH_N);
    assert_eq!(program.instructions[0].lparam.as_num(), 7.0);
    assert_eq!(program.instructions[1].opcode, Opcode::END);
}

#[test]
fn push_fusion_requires_matching_registers() {
    let program = assemble("move @0 7\npush @1\n").unwrap();
    assert_eq!(program.instructions[0].opcode, Opcode::MOVE_R_N);
    assert_eq!(program.instructions[1].opcode, Opcode::PUSH_R);
}

#[test]
fn global_variable_load_fusion() {
    let program = assemble("mpush\nmload\nmload .x\nmget @2\nmpop\n").unwrap();
    let fused = program.instructions[0];
    assert_eq!(fused.opcode, Opcode::OPT_LOADSINGLEVARG_R_S);
    assert_eq!(fused.lparam.as_int(), 2);
    assert_eq!(fused.rparam.as_int(), 0);
    assert_eq!(program.instructions[1].opcode, Opcode::END);
}

#[test]
fn local_variable_load_fusion() {
    let program = assemble("mpush\nmload .x\nmget @1\nmpop\n").unwrap();
    let fused = program.instructions[0];
    assert_eq!(fused.opcode, Opcode::OPT_LOADSINGLEVAR_R_S);
    assert_eq!(fused.lparam.as_int(), 1);
    assert_eq!(fused.rparam.as_int(), 0);
}

#[test]
fn idempotent_conversions_collapse() {
    let program = assemble("tostr @3 @3\ntonum @4 @4\ntoint @5 @5\ntostr @1 @2\n").unwrap();
    let opcodes: Vec<_> = program.instructions.iter().map(|i| i.opcode).collect();
    assert_eq!(
        opcodes,
        vec![
            Opcode::STR_R,
            Opcode::NUM_R,
            Opcode::INT_R,
            Opcode::STR_R_R,
            Opcode::END
        ]
    );
}

#[test]
fn labels_survive_fusions_behind_them() {
    // The fusion shortens the stream by one; the loop label sits after the
    // fused pair and must slide back with it.
    let source = "move @1 0\npush @1\nloop:\nnop\njmp loop\n";
    let program = assemble(source).unwrap();
    let opcodes: Vec<_> = program.instructions.iter().map(|i| i.opcode).collect();
    assert_eq!(
        opcodes,
        vec![Opcode::PUSH_N, Opcode::NOP, Opcode::JMP_L, Opcode::END]
    );
    assert_eq!(program.instructions[2].lparam.as_int(), 1);
}

#[test]
fn labels_before_fusions_stay_put() {
    let source = "loop:\nnop\nmove @1 0\npush @1\njmp loop\n";
    let program = assemble(source).unwrap();
    let jmp = program
        .instructions
        .iter()
        .find(|i| i.opcode == Opcode::JMP_L)
        .unwrap();
    assert_eq!(jmp.lparam.as_int(), 0);
}

#[test]
fn metadata_slides_back_with_fusions() {
    let source = "move @1 0\npush @1\n/line:10\nnop\n";
    let program = assemble(source).unwrap();
    assert_eq!(
        program
            .line_meta
            .iter()
            .map(|m| (m.instruction_index, m.line))
            .collect::<Vec<_>>(),
        vec![(1, 10)]
    );
}

#[test]
fn optimization_preserves_unrelated_streams() {
    let source = "mload .a\nmget @1\nadd @1 @1\n";
    let optimized = assemble(source).unwrap();
    let plain = assemble_plain(source);
    assert_eq!(optimized.instructions, plain.instructions);
}

#[test]
fn assembled_program_round_trips_through_the_binary_layout() {
    let source = "/file:loop.ska\n/line:1\nstart:\nmove @0 1\nadd @0 @0\njmp start\n";
    let program = assemble(source).unwrap();
    let decoded = Program::from_bytes(&program.to_bytes()).unwrap();
    assert_eq!(decoded, program);
}

#[test]
fn program_behind_payload_marker_round_trips() {
    let program = assemble("push \"hi\"\nsys 0 1\n").unwrap();
    let mut image = b"host executable bytes".to_vec();
    image.extend_from_slice(&crate::program::PAYLOAD_MARKER);
    image.extend_from_slice(&program.to_bytes());

    let mut reader = image.as_slice();
    assert!(seek_to_payload(&mut reader).unwrap());
    assert_eq!(Program::read_from(&mut reader).unwrap(), program);
}
