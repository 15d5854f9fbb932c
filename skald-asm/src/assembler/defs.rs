//! Command definitions.
//!
//! Each textual command resolves to one or more instruction definitions that
//! differ in operand kinds; the first definition whose signature matches the
//! parsed operands wins, in declaration order. A numeric literal additionally
//! matches an [`OperandKind::Int`] slot by truncation toward zero.

use hashbrown::HashMap;

use crate::opcode::Opcode;

/// Operand kind expected by one slot of an instruction definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand.
    None,
    /// Register index.
    Reg,
    /// Numeric immediate kept as `f64`.
    Num,
    /// Numeric immediate truncated into the integer cell.
    Int,
    /// String-table index.
    Str,
    /// Label reference.
    Lbl,
}

/// One overload of a command.
#[derive(Debug, Clone, Copy)]
pub struct InstructionDef {
    /// Emitted opcode.
    pub opcode: Opcode,
    /// Left operand kind.
    pub lparam: OperandKind,
    /// Right operand kind.
    pub rparam: OperandKind,
}

/// The command table, keyed by mnemonic.
pub type CommandTable = HashMap<&'static str, Vec<InstructionDef>>;

/// Builds the full command table.
pub fn command_table() -> CommandTable {
    use OperandKind::{Int, Lbl, None, Num, Reg, Str};

    let defs: &[(&str, Opcode, OperandKind, OperandKind)] = &[
        ("nop", Opcode::NOP, None, None),
        ("end", Opcode::END, None, None),
        ("mdump", Opcode::MDUMP, None, None),
        ("rdump", Opcode::RDUMP, None, None),
        ("sdump", Opcode::SDUMP, None, None),
        ("madd", Opcode::MADD_S, Str, None),
        ("madd", Opcode::MADD_N, Int, None),
        ("madd", Opcode::MADD_R, Reg, None),
        ("opt_mals", Opcode::OPT_MALS_S, Str, None),
        ("opt_mals", Opcode::OPT_MALS_N, Int, None),
        ("opt_mals", Opcode::OPT_MALS_R, Reg, None),
        ("mload", Opcode::MLOAD, None, None),
        // Historical alias kept for generated listings.
        ("loadpm", Opcode::MLOAD, None, None),
        ("mload", Opcode::MLOAD_S, Str, None),
        ("mload", Opcode::MLOAD_N, Int, None),
        ("mload", Opcode::MLOAD_R, Reg, None),
        ("mloads", Opcode::MLOADS, None, None),
        ("mset", Opcode::MSET_S, Str, None),
        ("mset", Opcode::MSET_N, Num, None),
        ("mset", Opcode::MSET_L, Lbl, None),
        ("mset", Opcode::MSET_R, Reg, None),
        ("opt_mssp", Opcode::OPT_MSSP_R, Reg, None),
        ("lptbl", Opcode::LPTBL_R, Reg, None),
        ("mclr", Opcode::MCLR, None, None),
        ("mget", Opcode::MGET_R, Reg, None),
        ("mpush", Opcode::MPUSH, None, None),
        ("mpop", Opcode::MPOP, None, None),
        ("mswap", Opcode::MSWAP, None, None),
        ("clr", Opcode::CLR_R, Reg, None),
        ("move", Opcode::MOVE_R_S, Reg, Str),
        ("move", Opcode::MOVE_R_N, Reg, Num),
        ("move", Opcode::MOVE_R_L, Reg, Lbl),
        ("move", Opcode::MOVE_R_R, Reg, Reg),
        ("jmp", Opcode::JMP_L, Lbl, None),
        ("eval", Opcode::EVAL_R, Reg, None),
        ("ecmp", Opcode::ECMP_R_R, Reg, Reg),
        ("jmpt", Opcode::JMPT_L, Lbl, None),
        ("jmpf", Opcode::JMPF_L, Lbl, None),
        ("jmpet", Opcode::JMPET_R_L, Reg, Lbl),
        ("jmpef", Opcode::JMPEF_R_L, Reg, Lbl),
        ("push", Opcode::PUSH_R, Reg, None),
        ("push", Opcode::PUSH_N, Num, None),
        ("push", Opcode::PUSH_S, Str, None),
        ("push", Opcode::PUSH_L, Lbl, None),
        ("pop", Opcode::POP_R, Reg, None),
        ("swap", Opcode::SWAP_R, Reg, None),
        ("spop", Opcode::SPOP_R_R, Reg, Reg),
        ("or", Opcode::OR_R_R, Reg, Reg),
        ("and", Opcode::AND_R_R, Reg, Reg),
        ("por", Opcode::POR, None, None),
        ("pand", Opcode::PAND, None, None),
        ("eql", Opcode::EQL_R_R, Reg, Reg),
        ("less", Opcode::LESS_R_R, Reg, Reg),
        ("gre", Opcode::GRE_R_R, Reg, Reg),
        ("leql", Opcode::LEQL_R_R, Reg, Reg),
        ("geql", Opcode::GEQL_R_R, Reg, Reg),
        ("neql", Opcode::NEQL_R_R, Reg, Reg),
        ("speql", Opcode::SPEQL, None, None),
        ("spless", Opcode::SPLESS, None, None),
        ("spgre", Opcode::SPGRE, None, None),
        ("spleql", Opcode::SPLEQL, None, None),
        ("spgeql", Opcode::SPGEQL, None, None),
        ("spneql", Opcode::SPNEQL, None, None),
        ("add", Opcode::ADD_R_R, Reg, Reg),
        ("sub", Opcode::SUB_R_R, Reg, Reg),
        ("mul", Opcode::MUL_R_R, Reg, Reg),
        ("div", Opcode::DIV_R_R, Reg, Reg),
        ("mod", Opcode::MOD_R_R, Reg, Reg),
        ("spadd", Opcode::SPADD, None, None),
        ("spsub", Opcode::SPSUB, None, None),
        ("spmul", Opcode::SPMUL, None, None),
        ("spdiv", Opcode::SPDIV, None, None),
        ("spmod", Opcode::SPMOD, None, None),
        ("neg", Opcode::NEG_R, Reg, None),
        ("ctbl", Opcode::CTBL_R, Reg, None),
        ("tostr", Opcode::STR_R_R, Reg, Reg),
        ("tostr", Opcode::STR_R, Reg, None),
        ("tonum", Opcode::NUM_R_R, Reg, Reg),
        ("tonum", Opcode::NUM_R, Reg, None),
        ("toint", Opcode::INT_R_R, Reg, Reg),
        ("toint", Opcode::INT_R, Reg, None),
        ("size", Opcode::SIZE_R_R, Reg, Reg),
        ("len", Opcode::LEN_R_R, Reg, Reg),
        ("not", Opcode::NOT_R, Reg, None),
        ("mdel", Opcode::MDEL_S, Str, None),
        ("mdel", Opcode::MDEL_N, Int, None),
        ("mdel", Opcode::MDEL_R, Reg, None),
        ("lgc", Opcode::LGC, None, None),
        ("ulgc", Opcode::ULGC, None, None),
        ("gc", Opcode::GC, None, None),
        ("cpy", Opcode::CPY_R_R, Reg, Reg),
        ("assert", Opcode::ASSERT_R_R, Reg, Reg),
        ("rte", Opcode::RTE_R, Reg, None),
        ("call", Opcode::CALL_R, Reg, None),
        ("ret", Opcode::RET, None, None),
        ("local", Opcode::LOCAL, None, None),
        ("iload", Opcode::ILOAD, None, None),
        ("iload", Opcode::ILOAD, Int, None),
        ("ihas", Opcode::IHAS, None, None),
        ("ival", Opcode::IVAL_R, Reg, None),
        ("ikey", Opcode::IKEY_R, Reg, None),
        ("ipush", Opcode::IPUSH, None, None),
        ("ipop", Opcode::IPOP, None, None),
        ("istep", Opcode::ISTEP, None, None),
        ("idel", Opcode::IDEL, None, None),
        ("abs", Opcode::ABS_R, Reg, None),
        ("cos", Opcode::COS_R, Reg, None),
        ("sin", Opcode::SIN_R, Reg, None),
        ("tan", Opcode::TAN_R, Reg, None),
        ("acos", Opcode::ACOS_R, Reg, None),
        ("asin", Opcode::ASIN_R, Reg, None),
        ("atan", Opcode::ATAN_R, Reg, None),
        ("atan2", Opcode::ATAN2_R_R, Reg, Reg),
        ("sqr", Opcode::SQR_R, Reg, None),
        ("log", Opcode::LOG_R, Reg, None),
        ("sgn", Opcode::SGN_R, Reg, None),
        ("pow", Opcode::POW_R_R, Reg, Reg),
        ("floor", Opcode::FLOOR_R, Reg, None),
        ("ceil", Opcode::CEIL_R, Reg, None),
        ("round", Opcode::ROUND_R, Reg, None),
        ("rad", Opcode::RAD_R, Reg, None),
        ("deg", Opcode::DEG_R, Reg, None),
        ("min", Opcode::MIN_R_R, Reg, Reg),
        ("max", Opcode::MAX_R_R, Reg, Reg),
        ("type", Opcode::TYPE_R_R, Reg, Reg),
        ("sys", Opcode::SYS_N_N, Int, Int),
        ("fload", Opcode::FLOAD_R, Reg, None),
        ("fcall", Opcode::FCALL_N, Int, None),
        (
            "opt_loadsinglevar",
            Opcode::OPT_LOADSINGLEVAR_R_S,
            Reg,
            Str,
        ),
        (
            "opt_loadsinglevarg",
            Opcode::OPT_LOADSINGLEVARG_R_S,
            Reg,
            Str,
        ),
        ("opt_loadparam", Opcode::OPT_LOADPARAM_S, Str, None),
        ("opt_pval", Opcode::OPT_PVAL, Int, Str),
    ];

    let mut table: CommandTable = HashMap::new();
    for &(name, opcode, lparam, rparam) in defs {
        table.entry(name).or_default().push(InstructionDef {
            opcode,
            lparam,
            rparam,
        });
    }
    table
}
