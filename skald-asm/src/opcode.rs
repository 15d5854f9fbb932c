use core::fmt;

use crate::error::InvalidOpcode;

/// Declares the opcode enumeration together with its raw-`u16` conversion.
///
/// The declaration order is the wire encoding: a program assembled by one
/// build only runs on a runtime built from the same list, so new opcodes go
/// at the end.
macro_rules! opcodes {
    ($($(#[$attr:meta])* $name:ident,)*) => {
        /// Bytecode instruction identifiers.
        ///
        /// Suffixes name the operand kinds an opcode carries: `_R` register,
        /// `_N` numeric or integer immediate, `_S` string-table index, `_L`
        /// label (instruction index after linking). `SP*` opcodes fuse a
        /// stack pop with an operator against register 0; `OPT_*` opcodes
        /// are emitted by the assembler's peephole pass and behave exactly
        /// like the sequences they replace.
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumCount, strum::EnumIter)]
        #[repr(u16)]
        pub enum Opcode {
            $($(#[$attr])* $name,)*
        }

        impl TryFrom<u16> for Opcode {
            type Error = InvalidOpcode;

            fn try_from(raw: u16) -> Result<Self, Self::Error> {
                $(
                    if raw == Opcode::$name as u16 {
                        return Ok(Opcode::$name);
                    }
                )*
                Err(InvalidOpcode(raw))
            }
        }
    };
}

opcodes! {
    /// Does nothing.
    NOP,
    /// Stops execution with success.
    END,
    /// Raises the right register as a runtime error if the left is falsy.
    ASSERT_R_R,
    /// Raises the string in the register as a runtime error.
    RTE_R,

    /// Dumps the cursor's table to the output sink.
    MDUMP,
    /// Dumps the registers to the output sink.
    RDUMP,
    /// Dumps the value stack to the output sink.
    SDUMP,

    /// Ensures a string-keyed child exists under the cursor.
    MADD_S,
    /// Ensures an integer-keyed child exists under the cursor.
    MADD_N,
    /// Ensures a child keyed by the register's value exists under the cursor.
    MADD_R,

    /// Fused assignment target: `MADD_S` + `MLOAD_S` + `MSWAP`.
    OPT_MALS_S,
    /// Fused assignment target: `MADD_N` + `MLOAD_N` + `MSWAP`.
    OPT_MALS_N,
    /// Fused assignment target: `MADD_R` + `MLOAD_R` + `MSWAP`.
    OPT_MALS_R,

    /// Descends the cursor into a string-keyed child.
    MLOAD_S,
    /// Descends the cursor into an integer-keyed child.
    MLOAD_N,
    /// Descends the cursor into the child keyed by the register's value.
    MLOAD_R,
    /// Resets the cursor to program memory.
    MLOAD,
    /// Points the cursor at the value on top of the stack.
    MLOADS,

    /// Writes a string constant through the cursor.
    MSET_S,
    /// Writes a numeric constant through the cursor.
    MSET_N,
    /// Writes a label constant through the cursor.
    MSET_L,
    /// Writes the register's value through the cursor.
    MSET_R,
    /// Writes unset through the cursor.
    MCLR,

    /// Fused assignment: `MSWAP` + `MSET_R` + `MPOP`.
    OPT_MSSP_R,

    /// Copies the cursor's value into the register.
    MGET_R,

    /// Pushes the cursor onto the memory-pointer stack.
    MPUSH,
    /// Pops the memory-pointer stack into the cursor.
    MPOP,
    /// Exchanges the cursor with the memory-pointer stack top.
    MSWAP,

    /// Clears the register to unset.
    CLR_R,
    /// Loads a string constant into the register.
    MOVE_R_S,
    /// Loads a numeric constant into the register.
    MOVE_R_N,
    /// Loads a label constant into the register.
    MOVE_R_L,
    /// Copies the right register into the left.
    MOVE_R_R,

    /// Unconditional jump.
    JMP_L,
    /// Evaluates the register's truthiness into the eval latch.
    EVAL_R,
    /// Strict same-kind register comparison into the eval latch.
    ECMP_R_R,
    /// Jumps if the eval latch is set.
    JMPT_L,
    /// Jumps if the eval latch is clear.
    JMPF_L,

    /// Evaluates the register and jumps if truthy.
    JMPET_R_L,
    /// Evaluates the register and jumps if falsy.
    JMPEF_R_L,

    /// Pushes a copy of the register.
    PUSH_R,
    /// Pushes a numeric constant.
    PUSH_N,
    /// Pushes a string constant.
    PUSH_S,
    /// Pushes a label constant.
    PUSH_L,
    /// Pops the stack top into the register.
    POP_R,
    /// Exchanges the register with the stack top.
    SWAP_R,
    /// Moves the left register into the right, then pops into the left.
    SPOP_R_R,

    /// Logical or of two registers, result in the left.
    OR_R_R,
    /// Logical and of two registers, result in the left.
    AND_R_R,

    /// Logical or of a popped value and register 0.
    POR,
    /// Logical and of a popped value and register 0.
    PAND,

    /// Equality with coercion, result in the left register.
    EQL_R_R,
    /// Less-than, result in the left register.
    LESS_R_R,
    /// Greater-than, result in the left register.
    GRE_R_R,
    /// Less-or-equal, result in the left register.
    LEQL_R_R,
    /// Greater-or-equal, result in the left register.
    GEQL_R_R,
    /// Inequality, result in the left register.
    NEQL_R_R,

    /// Popped value = register 0, result in register 0.
    SPEQL,
    /// Popped value < register 0, result in register 0.
    SPLESS,
    /// Popped value > register 0, result in register 0.
    SPGRE,
    /// Popped value <= register 0, result in register 0.
    SPLEQL,
    /// Popped value >= register 0, result in register 0.
    SPGEQL,
    /// Popped value <> register 0, result in register 0.
    SPNEQL,

    /// Addition or string concatenation, result in the left register.
    ADD_R_R,
    /// Subtraction, result in the left register.
    SUB_R_R,
    /// Multiplication, result in the left register.
    MUL_R_R,
    /// Division, result in the left register.
    DIV_R_R,
    /// Floored modulo, result in the left register.
    MOD_R_R,

    /// Popped value + register 0, result in register 0.
    SPADD,
    /// Popped value - register 0, result in register 0.
    SPSUB,
    /// Popped value * register 0, result in register 0.
    SPMUL,
    /// Popped value / register 0, result in register 0.
    SPDIV,
    /// Popped value % register 0, result in register 0.
    SPMOD,

    /// Numeric negation in place.
    NEG_R,

    /// Creates a fresh empty table in the register.
    CTBL_R,
    /// Loads the cursor's parent table into the register.
    LPTBL_R,

    /// Converts the right register to a string in the left.
    STR_R_R,
    /// Converts the register to a string in place.
    STR_R,
    /// Converts the right register to a number in the left.
    NUM_R_R,
    /// Converts the register to a number in place.
    NUM_R,
    /// Converts the right register to a truncated integer in the left.
    INT_R_R,
    /// Truncates the register to an integer in place.
    INT_R,
    /// Element count of the right register's value, result in the left.
    SIZE_R_R,
    /// String length of the right register's value, result in the left.
    LEN_R_R,

    /// Logical negation in place.
    NOT_R,

    /// Deletes a string-keyed entry from the cursor's table.
    MDEL_S,
    /// Deletes an integer-keyed entry from the cursor's table.
    MDEL_N,
    /// Deletes the entry keyed by the register's value.
    MDEL_R,

    /// Garbage-collector lock hint, accepted and ignored.
    LGC,
    /// Garbage-collector unlock hint, accepted and ignored.
    ULGC,
    /// Forces a garbage collection.
    GC,

    /// Deep copy of the right register into the left, cycles preserved.
    CPY_R_R,

    /// Calls the label in the register, creating a frame with fresh locals.
    CALL_R,
    /// Returns from the current frame, releasing its locals.
    RET,
    /// Points the cursor at the current frame's locals.
    LOCAL,
    /// Validates the argument count at a function prologue.
    OPT_PVAL,

    /// Captures an iterator over the cursor's table and locks it.
    ILOAD,
    /// Sets the eval latch to whether the iterator has a current entry.
    IHAS,
    /// Copies the iterator's current value into the register.
    IVAL_R,
    /// Copies the iterator's current key into the register.
    IKEY_R,
    /// Opens a nested iterator slot.
    IPUSH,
    /// Closes a nested iterator slot.
    IPOP,
    /// Advances the iterator.
    ISTEP,
    /// Releases the iterator and unlocks its table.
    IDEL,

    /// Absolute value in place.
    ABS_R,
    /// Cosine in place.
    COS_R,
    /// Sine in place.
    SIN_R,
    /// Tangent in place.
    TAN_R,
    /// Arccosine in place.
    ACOS_R,
    /// Arcsine in place.
    ASIN_R,
    /// Arctangent in place.
    ATAN_R,
    /// Two-argument arctangent, result in the left register.
    ATAN2_R_R,
    /// Natural logarithm in place.
    LOG_R,
    /// Sign in place.
    SGN_R,
    /// Square root in place.
    SQR_R,
    /// Left register raised to the right, result in the left.
    POW_R_R,
    /// Floor in place.
    FLOOR_R,
    /// Ceiling in place.
    CEIL_R,
    /// Round-to-nearest in place.
    ROUND_R,
    /// Degrees to radians in place.
    RAD_R,
    /// Radians to degrees in place.
    DEG_R,
    /// Minimum of two registers, result in the left.
    MIN_R_R,
    /// Maximum of two registers, result in the left.
    MAX_R_R,

    /// Kind tag of the right register's value, result in the left.
    TYPE_R_R,

    /// Calls a system command by index with an argument count.
    SYS_N_N,

    /// Resolves a native function name in the register to its index.
    FLOAD_R,
    /// Calls a native function through a resolved index on the stack.
    FCALL_N,

    /// Fused load of a current-scope variable into a register.
    OPT_LOADSINGLEVAR_R_S,
    /// Fused load of a global variable into a register.
    OPT_LOADSINGLEVARG_R_S,
    /// Pops a call argument into a named slot of the cursor's table.
    OPT_LOADPARAM_S,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
