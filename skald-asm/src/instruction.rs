use crate::opcode::Opcode;

/// Instruction parameter.
///
/// An 8-byte cell whose interpretation is fixed by the opcode: either a
/// signed integer (register index, string-table index, label id, count) or
/// an `f64` immediate. Only the constructor that matches the opcode's
/// operand kind may be paired with the matching accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Param(u64);

impl Param {
    /// The parameter of an operand-less slot.
    pub const NONE: Self = Param(0);

    /// Builds an integer parameter.
    pub fn int(value: i32) -> Self {
        Param(u64::from(value as u32))
    }

    /// Builds a numeric parameter.
    pub fn num(value: f64) -> Self {
        Param(value.to_bits())
    }

    /// Reads the parameter as a signed integer.
    pub const fn as_int(&self) -> i32 {
        self.0 as u32 as i32
    }

    /// Reads the parameter as a register or table index.
    pub const fn as_index(&self) -> usize {
        self.as_int() as usize
    }

    /// Reads the parameter as a number.
    pub fn as_num(&self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Raw little-endian encoding of the cell.
    pub const fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Decodes a cell from its little-endian encoding.
    pub const fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Param(u64::from_le_bytes(bytes))
    }
}

/// Fixed-size bytecode instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instruction {
    /// The operation to perform.
    pub opcode: Opcode,
    /// Left parameter.
    pub lparam: Param,
    /// Right parameter.
    pub rparam: Param,
}

impl Instruction {
    /// Encoded instruction size in bytes: `u16` opcode plus two 8-byte cells.
    pub const LEN: usize = 18;

    /// Builds an instruction without operands.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            lparam: Param::NONE,
            rparam: Param::NONE,
        }
    }

    /// Builds an instruction with a left operand only.
    pub fn unary(opcode: Opcode, lparam: Param) -> Self {
        Self {
            opcode,
            lparam,
            rparam: Param::NONE,
        }
    }

    /// Builds an instruction with both operands.
    pub fn binary(opcode: Opcode, lparam: Param, rparam: Param) -> Self {
        Self {
            opcode,
            lparam,
            rparam,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_params_survive_the_cell() {
        for value in [0, 1, -1, 9, i32::MAX, i32::MIN] {
            assert_eq!(Param::int(value).as_int(), value);
        }
    }

    #[test]
    fn num_params_survive_the_cell() {
        for value in [0.0, -0.5, 3.25, f64::MAX] {
            assert_eq!(Param::num(value).as_num(), value);
        }
    }

    #[test]
    fn le_bytes_round_trip() {
        let p = Param::num(12.75);
        assert_eq!(Param::from_le_bytes(p.to_le_bytes()), p);
    }
}
