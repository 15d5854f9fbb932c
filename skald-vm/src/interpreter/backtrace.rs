//! Runtime error formatting with file/line frames.
//!
//! The reported location of an instruction is the metadata record with the
//! greatest instruction index at or below it. A trace line reads
//! `file:line[,line...][, file:line...]`: the faulting instruction first,
//! then up to nine outer call frames, lines grouped per file.

use itertools::Itertools;

use skald_asm::Program;

use crate::consts::TRACE_FRAMES;

use super::CallFrame;

fn filename_at(program: &Program, pc: usize) -> &str {
    program
        .file_meta
        .iter()
        .rev()
        .find(|meta| pc as i32 >= meta.instruction_index)
        .map(|meta| meta.filename.as_str())
        .unwrap_or("?")
}

fn line_at(program: &Program, pc: usize) -> i32 {
    program
        .line_meta
        .iter()
        .rev()
        .find(|meta| pc as i32 >= meta.instruction_index)
        .map(|meta| meta.line)
        .unwrap_or(0)
}

/// Formats `message` into the full `file:line...: runtime error:` shape.
pub(super) fn format_runtime_error(
    program: &Program,
    pc: usize,
    frames: &[CallFrame],
    message: &str,
) -> String {
    let locations = std::iter::once(pc)
        .chain(frames.iter().rev().take(TRACE_FRAMES).map(|f| f.call_index))
        .map(|index| (filename_at(program, index), line_at(program, index)));

    let trace = locations
        .group_by(|(file, _)| *file)
        .into_iter()
        .map(|(file, group)| {
            let lines = group.map(|(_, line)| line.to_string()).join(",");
            format!("{file}:{lines}")
        })
        .join(", ");

    format!("{trace}: runtime error: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use skald_asm::{FileMeta, LineMeta};

    fn program() -> Program {
        Program {
            file_meta: vec![
                FileMeta {
                    instruction_index: 0,
                    filename: "main.ska".into(),
                },
                FileMeta {
                    instruction_index: 10,
                    filename: "lib.ska".into(),
                },
            ],
            line_meta: vec![
                LineMeta {
                    instruction_index: 0,
                    line: 1,
                },
                LineMeta {
                    instruction_index: 4,
                    line: 7,
                },
                LineMeta {
                    instruction_index: 10,
                    line: 2,
                },
            ],
            ..Program::default()
        }
    }

    fn frame(call_index: usize) -> CallFrame {
        CallFrame {
            call_index,
            locals: Value::Unset,
        }
    }

    #[test]
    fn single_frame() {
        let text = format_runtime_error(&program(), 5, &[], "boom");
        assert_eq!(text, "main.ska:7: runtime error: boom");
    }

    #[test]
    fn frames_group_by_file() {
        let frames = vec![frame(0), frame(4)];
        let text = format_runtime_error(&program(), 12, &frames, "boom");
        assert_eq!(text, "lib.ska:2, main.ska:7,1: runtime error: boom");
    }

    #[test]
    fn missing_metadata_reports_placeholders() {
        let text = format_runtime_error(&Program::default(), 3, &[], "boom");
        assert_eq!(text, "?:0: runtime error: boom");
    }
}
