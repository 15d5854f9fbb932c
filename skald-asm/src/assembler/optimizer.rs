//! Peephole optimization pass.
//!
//! Runs after emission and before linking. Fusions shorten the stream, so
//! every label resolution and metadata record behind a fusion point must
//! slide back by the saving; labels keep their pre-optimization instruction
//! index around precisely so repeated fusions stay correct.

use crate::instruction::{Instruction, Param};
use crate::opcode::Opcode;
use crate::program::{FileMeta, LineMeta};

use super::LabelEntry;

/// Mutable view of everything the pass may rewrite.
pub struct OptimizeInput<'a> {
    /// The emitted instruction stream, compacted in place.
    pub instructions: &'a mut Vec<Instruction>,
    /// Label entries whose resolutions follow the stream.
    pub labels: Vec<&'a mut LabelEntry>,
    /// Line metadata adjusted alongside the stream.
    pub line_meta: &'a mut [LineMeta],
    /// Filename metadata adjusted alongside the stream.
    pub file_meta: &'a mut [FileMeta],
}

/// Applies all peephole rules to the emitted stream.
pub fn optimize(input: OptimizeInput<'_>) {
    let OptimizeInput {
        instructions,
        mut labels,
        line_meta,
        file_meta,
    } = input;

    // Metadata adjustments compare against the pre-optimization indices
    // while the subtraction accumulates on the live records.
    let original_lines: Vec<i32> = line_meta.iter().map(|m| m.instruction_index).collect();
    let original_files: Vec<i32> = file_meta.iter().map(|m| m.instruction_index).collect();

    let source = std::mem::take(instructions);
    let out = instructions;

    for (read_index, instruction) in source.into_iter().enumerate() {
        out.push(instruction);

        if let Some(saving) = try_fuse(out) {
            for label in labels.iter_mut() {
                if label.instruction >= 0 && label.original_instruction >= read_index as i32 {
                    label.instruction -= saving;
                }
            }
            for (meta, &original) in line_meta.iter_mut().zip(&original_lines) {
                if original > read_index as i32 {
                    meta.instruction_index -= saving;
                }
            }
            for (meta, &original) in file_meta.iter_mut().zip(&original_files) {
                if original > read_index as i32 {
                    meta.instruction_index -= saving;
                }
            }
        } else {
            collapse_idempotent(out);
        }
    }
}

/// Tries every fusion against the tail of the output stream.
///
/// On a match the pattern is replaced by its specialization opcode and the
/// stream-length saving is returned.
fn try_fuse(out: &mut Vec<Instruction>) -> Option<i32> {
    let n = out.len();

    // MPUSH, MLOAD, MLOAD_S s, MGET_R r, MPOP -> load global into register.
    if n >= 5 {
        let w = &out[n - 5..];
        if w[0].opcode == Opcode::MPUSH
            && w[1].opcode == Opcode::MLOAD
            && w[2].opcode == Opcode::MLOAD_S
            && w[3].opcode == Opcode::MGET_R
            && w[4].opcode == Opcode::MPOP
        {
            let fused = Instruction::binary(
                Opcode::OPT_LOADSINGLEVARG_R_S,
                w[3].lparam,
                w[2].lparam,
            );
            out.truncate(n - 5);
            out.push(fused);
            return Some(4);
        }
    }

    // MPUSH, MLOAD_S s, MGET_R r, MPOP -> load current-scope variable.
    if n >= 4 {
        let w = &out[n - 4..];
        if w[0].opcode == Opcode::MPUSH
            && w[1].opcode == Opcode::MLOAD_S
            && w[2].opcode == Opcode::MGET_R
            && w[3].opcode == Opcode::MPOP
        {
            let fused =
                Instruction::binary(Opcode::OPT_LOADSINGLEVAR_R_S, w[2].lparam, w[1].lparam);
            out.truncate(n - 4);
            out.push(fused);
            return Some(3);
        }
    }

    // MOVE_R_* r, c; PUSH_R r -> PUSH_* c. The register write is dropped;
    // generated code never reads the register after the push.
    if n >= 2 {
        let w = &out[n - 2..];
        if w[1].opcode == Opcode::PUSH_R && w[0].lparam == w[1].lparam {
            let fused = match w[0].opcode {
                Opcode::MOVE_R_N => Some(Opcode::PUSH_N),
                Opcode::MOVE_R_S => Some(Opcode::PUSH_S),
                Opcode::MOVE_R_L => Some(Opcode::PUSH_L),
                _ => None,
            }
            .map(|opcode| Instruction::unary(opcode, w[0].rparam));
            if let Some(fused) = fused {
                out.truncate(n - 2);
                out.push(fused);
                return Some(1);
            }
        }
    }

    None
}

/// Collapses conversion opcodes whose source and destination coincide.
fn collapse_idempotent(out: &mut [Instruction]) {
    let Some(last) = out.last_mut() else {
        return;
    };
    if last.lparam != last.rparam {
        return;
    }
    let collapsed = match last.opcode {
        Opcode::STR_R_R => Opcode::STR_R,
        Opcode::NUM_R_R => Opcode::NUM_R,
        Opcode::INT_R_R => Opcode::INT_R,
        _ => return,
    };
    last.opcode = collapsed;
    last.rparam = Param::NONE;
}
