use std::io::Read;

use crate::error::LoadError;
use crate::instruction::{Instruction, Param};
use crate::opcode::Opcode;

/// Marker behind which a program may be appended to an executable.
///
/// The launcher slides a 7-byte window over the host file and hands the
/// loader everything that follows the first match.
pub const PAYLOAD_MARKER: [u8; 7] = *b"\x7fSKALD\x07";

/// Line-number debug record, ordered by instruction index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineMeta {
    /// First instruction the record applies to.
    pub instruction_index: i32,
    /// Source line number.
    pub line: i32,
}

/// Filename debug record, ordered by instruction index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// First instruction the record applies to.
    pub instruction_index: i32,
    /// Source filename.
    pub filename: String,
}

/// A loaded or assembled program: the unit the VM executes.
///
/// Binary layout, little-endian and packed:
///
/// ```text
/// u8  debug flag
/// u32 heap size hint (0 = runtime default)
/// u32 line meta count;   count x { i32 instruction index, i32 line }
/// u32 file meta count;   count x { i32 instruction index, i32 len, bytes }
/// u32 string count;      count x { i32 len, bytes }
/// u32 instruction count; count x { u16 opcode, 8 byte lparam, 8 byte rparam }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    /// Enables allocator and execution diagnostics at run time.
    pub debug: bool,
    /// Requested heap bucket size in bytes, `0` for the runtime default.
    pub heap_size_hint: u32,
    /// Line-number metadata, ascending by instruction index.
    pub line_meta: Vec<LineMeta>,
    /// Filename metadata, ascending by instruction index.
    pub file_meta: Vec<FileMeta>,
    /// Interned string constants, addressed by index from instructions.
    pub strings: Vec<String>,
    /// The instruction stream.
    pub instructions: Vec<Instruction>,
}

impl Program {
    /// Serializes the program into its binary layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            16 + self.strings.len() * 8 + self.instructions.len() * Instruction::LEN,
        );

        out.push(u8::from(self.debug));
        out.extend_from_slice(&self.heap_size_hint.to_le_bytes());

        out.extend_from_slice(&(self.line_meta.len() as u32).to_le_bytes());
        for meta in &self.line_meta {
            out.extend_from_slice(&meta.instruction_index.to_le_bytes());
            out.extend_from_slice(&meta.line.to_le_bytes());
        }

        out.extend_from_slice(&(self.file_meta.len() as u32).to_le_bytes());
        for meta in &self.file_meta {
            out.extend_from_slice(&meta.instruction_index.to_le_bytes());
            out.extend_from_slice(&(meta.filename.len() as i32).to_le_bytes());
            out.extend_from_slice(meta.filename.as_bytes());
        }

        out.extend_from_slice(&(self.strings.len() as u32).to_le_bytes());
        for string in &self.strings {
            out.extend_from_slice(&(string.len() as i32).to_le_bytes());
            out.extend_from_slice(string.as_bytes());
        }

        out.extend_from_slice(&(self.instructions.len() as u32).to_le_bytes());
        for instruction in &self.instructions {
            out.extend_from_slice(&(instruction.opcode as u16).to_le_bytes());
            out.extend_from_slice(&instruction.lparam.to_le_bytes());
            out.extend_from_slice(&instruction.rparam.to_le_bytes());
        }

        out
    }

    /// Decodes a program from a reader positioned at its first byte.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, LoadError> {
        let mut cursor = Decoder { reader };

        let debug = cursor.u8()? != 0;
        let heap_size_hint = cursor.u32()?;

        let line_count = cursor.len()?;
        let mut line_meta = Vec::with_capacity(line_count);
        for _ in 0..line_count {
            line_meta.push(LineMeta {
                instruction_index: cursor.i32()?,
                line: cursor.i32()?,
            });
        }

        let file_count = cursor.len()?;
        let mut file_meta = Vec::with_capacity(file_count);
        for _ in 0..file_count {
            let instruction_index = cursor.i32()?;
            file_meta.push(FileMeta {
                instruction_index,
                filename: cursor.string()?,
            });
        }

        let string_count = cursor.len()?;
        let mut strings = Vec::with_capacity(string_count);
        for _ in 0..string_count {
            strings.push(cursor.string()?);
        }

        let instruction_count = cursor.len()?;
        let mut instructions = Vec::with_capacity(instruction_count);
        for _ in 0..instruction_count {
            let opcode = Opcode::try_from(cursor.u16()?)?;
            let lparam = Param::from_le_bytes(cursor.bytes8()?);
            let rparam = Param::from_le_bytes(cursor.bytes8()?);
            instructions.push(Instruction {
                opcode,
                lparam,
                rparam,
            });
        }

        Ok(Program {
            debug,
            heap_size_hint,
            line_meta,
            file_meta,
            strings,
            instructions,
        })
    }

    /// Decodes a program from an in-memory image.
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, LoadError> {
        Self::read_from(&mut bytes)
    }
}

/// Consumes a reader up to and including [`PAYLOAD_MARKER`].
///
/// Returns `true` when the marker was found; the reader is then positioned
/// at the first payload byte and can be handed to [`Program::read_from`].
pub fn seek_to_payload<R: Read>(reader: &mut R) -> Result<bool, LoadError> {
    let mut window = [0u8; PAYLOAD_MARKER.len()];
    let mut byte = [0u8; 1];

    loop {
        match reader.read(&mut byte)? {
            0 => return Ok(false),
            _ => {
                window.rotate_left(1);
                window[PAYLOAD_MARKER.len() - 1] = byte[0];
                if window == PAYLOAD_MARKER {
                    return Ok(true);
                }
            }
        }
    }
}

struct Decoder<'a, R> {
    reader: &'a mut R,
}

impl<R: Read> Decoder<'_, R> {
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), LoadError> {
        self.reader.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                LoadError::UnexpectedEof
            } else {
                LoadError::Io(e)
            }
        })
    }

    fn u8(&mut self) -> Result<u8, LoadError> {
        let mut b = [0u8; 1];
        self.fill(&mut b)?;
        Ok(b[0])
    }

    fn u16(&mut self) -> Result<u16, LoadError> {
        let mut b = [0u8; 2];
        self.fill(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn u32(&mut self) -> Result<u32, LoadError> {
        let mut b = [0u8; 4];
        self.fill(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn i32(&mut self) -> Result<i32, LoadError> {
        let mut b = [0u8; 4];
        self.fill(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    fn len(&mut self) -> Result<usize, LoadError> {
        usize::try_from(self.u32()?).map_err(|_| LoadError::InvalidLength)
    }

    fn bytes8(&mut self) -> Result<[u8; 8], LoadError> {
        let mut b = [0u8; 8];
        self.fill(&mut b)?;
        Ok(b)
    }

    fn string(&mut self) -> Result<String, LoadError> {
        let len = self.i32()?;
        let len = usize::try_from(len).map_err(|_| LoadError::InvalidLength)?;
        let mut bytes = vec![0u8; len];
        self.fill(&mut bytes)?;
        String::from_utf8(bytes).map_err(|_| LoadError::InvalidString)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        Program {
            debug: true,
            heap_size_hint: 4096,
            line_meta: vec![LineMeta {
                instruction_index: 0,
                line: 3,
            }],
            file_meta: vec![FileMeta {
                instruction_index: 0,
                filename: "main.ska".into(),
            }],
            strings: vec!["hello".into(), "".into()],
            instructions: vec![
                Instruction::unary(Opcode::PUSH_S, Param::int(0)),
                Instruction::binary(Opcode::SYS_N_N, Param::int(0), Param::int(1)),
                Instruction::new(Opcode::END),
            ],
        }
    }

    #[test]
    fn binary_round_trip() {
        let program = sample();
        let decoded = Program::from_bytes(&program.to_bytes()).unwrap();
        assert_eq!(decoded, program);
    }

    #[test]
    fn truncated_image_is_rejected() {
        let bytes = sample().to_bytes();
        let err = Program::from_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, LoadError::UnexpectedEof));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let mut bytes = sample().to_bytes();
        // The opcode of the first instruction sits right behind the string
        // table; patch it to a word outside the enumeration.
        let tail = bytes.len() - 3 * Instruction::LEN;
        bytes[tail] = 0xff;
        bytes[tail + 1] = 0xff;
        assert!(matches!(
            Program::from_bytes(&bytes).unwrap_err(),
            LoadError::InvalidOpcode(_)
        ));
    }

    #[test]
    fn payload_marker_is_found_mid_stream() {
        let mut image = b"ELF garbage and padding".to_vec();
        image.extend_from_slice(&PAYLOAD_MARKER);
        let payload = sample().to_bytes();
        image.extend_from_slice(&payload);

        let mut reader = image.as_slice();
        assert!(seek_to_payload(&mut reader).unwrap());
        let decoded = Program::read_from(&mut reader).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn payload_marker_absent() {
        let mut reader = &b"no marker in here"[..];
        assert!(!seek_to_payload(&mut reader).unwrap());
    }
}
