//! Opcode dispatch.

use skald_asm::{Instruction, Opcode};

use crate::error::RuntimeFault;
use crate::state::ExecuteState;
use crate::value::Value;

use super::alu::{ArithOp, CmpOp};
use super::Vm;

impl Vm {
    /// Executes one instruction.
    ///
    /// Operand indices were validated at load time, so register and string
    /// accesses index directly.
    pub(super) fn instruction(
        &mut self,
        instruction: Instruction,
    ) -> Result<ExecuteState, RuntimeFault> {
        let l = instruction.lparam;
        let r = instruction.rparam;

        match instruction.opcode {
            Opcode::NOP => {}
            Opcode::END => return Ok(ExecuteState::Halt),
            Opcode::ASSERT_R_R => self.op_assert(l.as_index(), r.as_index())?,
            Opcode::RTE_R => self.op_rte(l.as_index())?,

            Opcode::MDUMP => self.op_mdump()?,
            Opcode::RDUMP => self.op_rdump(),
            Opcode::SDUMP => self.op_sdump(),

            Opcode::MADD_S => self.op_madd_str(l.as_int())?,
            Opcode::MADD_N => self.op_madd_int(l.as_int())?,
            Opcode::MADD_R => self.op_madd_reg(l.as_index())?,

            Opcode::OPT_MALS_S => self.op_opt_mals_str(l.as_int())?,
            Opcode::OPT_MALS_N => self.op_opt_mals_int(l.as_int())?,
            Opcode::OPT_MALS_R => self.op_opt_mals_reg(l.as_index())?,

            Opcode::MLOAD_S => self.op_mload_str(l.as_int())?,
            Opcode::MLOAD_N => self.op_mload_int(l.as_int())?,
            Opcode::MLOAD_R => self.op_mload_reg(l.as_index())?,
            Opcode::MLOAD => self.op_mload_root()?,
            Opcode::MLOADS => self.op_mloads()?,

            Opcode::MSET_S => {
                let value = Value::Str(self.string_constant(l.as_int())?.0.to_owned());
                self.op_mset(value)?;
            }
            Opcode::MSET_N => self.op_mset(Value::Num(l.as_num()))?,
            Opcode::MSET_L => self.op_mset(Value::Label(l.as_int()))?,
            Opcode::MSET_R => self.op_mset(self.registers[l.as_index()].clone())?,
            Opcode::MCLR => self.op_mset(Value::Unset)?,

            Opcode::OPT_MSSP_R => self.op_opt_mssp(l.as_index())?,

            Opcode::MGET_R => self.op_mget(l.as_index())?,

            Opcode::MPUSH => self.op_mpush()?,
            Opcode::MPOP => self.op_mpop()?,
            Opcode::MSWAP => self.op_mswap()?,

            Opcode::CLR_R => self.registers[l.as_index()] = Value::Unset,
            Opcode::MOVE_R_S => {
                let value = Value::Str(self.string_constant(r.as_int())?.0.to_owned());
                self.registers[l.as_index()] = value;
            }
            Opcode::MOVE_R_N => self.registers[l.as_index()] = Value::Num(r.as_num()),
            Opcode::MOVE_R_L => self.registers[l.as_index()] = Value::Label(r.as_int()),
            Opcode::MOVE_R_R => {
                self.registers[l.as_index()] = self.registers[r.as_index()].clone()
            }

            Opcode::JMP_L => self.pc = l.as_index(),
            Opcode::EVAL_R => self.op_eval(l.as_index()),
            Opcode::ECMP_R_R => self.op_ecmp(l.as_index(), r.as_index()),
            Opcode::JMPT_L => {
                if self.eval {
                    self.pc = l.as_index();
                }
            }
            Opcode::JMPF_L => {
                if !self.eval {
                    self.pc = l.as_index();
                }
            }
            Opcode::JMPET_R_L => {
                self.op_eval(l.as_index());
                if self.eval {
                    self.pc = r.as_index();
                }
            }
            Opcode::JMPEF_R_L => {
                self.op_eval(l.as_index());
                if !self.eval {
                    self.pc = r.as_index();
                }
            }

            Opcode::PUSH_R => self.op_push(self.registers[l.as_index()].clone())?,
            Opcode::PUSH_N => self.op_push(Value::Num(l.as_num()))?,
            Opcode::PUSH_S => {
                let value = Value::Str(self.string_constant(l.as_int())?.0.to_owned());
                self.op_push(value)?;
            }
            Opcode::PUSH_L => self.op_push(Value::Label(l.as_int()))?,
            Opcode::POP_R => self.op_pop(l.as_index())?,
            Opcode::SWAP_R => self.op_swap(l.as_index())?,
            Opcode::SPOP_R_R => self.op_spop(l.as_index(), r.as_index())?,

            Opcode::OR_R_R => self.op_or(l.as_index(), r.as_index()),
            Opcode::AND_R_R => self.op_and(l.as_index(), r.as_index()),
            Opcode::POR => self.op_por()?,
            Opcode::PAND => self.op_pand()?,

            Opcode::EQL_R_R => self.op_compare(l.as_index(), r.as_index(), CmpOp::Eq),
            Opcode::LESS_R_R => self.op_compare(l.as_index(), r.as_index(), CmpOp::Lt),
            Opcode::GRE_R_R => self.op_compare(l.as_index(), r.as_index(), CmpOp::Gt),
            Opcode::LEQL_R_R => self.op_compare(l.as_index(), r.as_index(), CmpOp::Le),
            Opcode::GEQL_R_R => self.op_compare(l.as_index(), r.as_index(), CmpOp::Ge),
            Opcode::NEQL_R_R => self.op_compare(l.as_index(), r.as_index(), CmpOp::Ne),

            Opcode::SPEQL => self.op_sp_compare(CmpOp::Eq)?,
            Opcode::SPLESS => self.op_sp_compare(CmpOp::Lt)?,
            Opcode::SPGRE => self.op_sp_compare(CmpOp::Gt)?,
            Opcode::SPLEQL => self.op_sp_compare(CmpOp::Le)?,
            Opcode::SPGEQL => self.op_sp_compare(CmpOp::Ge)?,
            Opcode::SPNEQL => self.op_sp_compare(CmpOp::Ne)?,

            Opcode::ADD_R_R => self.op_arith(l.as_index(), r.as_index(), ArithOp::Add),
            Opcode::SUB_R_R => self.op_arith(l.as_index(), r.as_index(), ArithOp::Sub),
            Opcode::MUL_R_R => self.op_arith(l.as_index(), r.as_index(), ArithOp::Mul),
            Opcode::DIV_R_R => self.op_arith(l.as_index(), r.as_index(), ArithOp::Div),
            Opcode::MOD_R_R => self.op_arith(l.as_index(), r.as_index(), ArithOp::Mod),

            Opcode::SPADD => self.op_sp_arith(ArithOp::Add)?,
            Opcode::SPSUB => self.op_sp_arith(ArithOp::Sub)?,
            Opcode::SPMUL => self.op_sp_arith(ArithOp::Mul)?,
            Opcode::SPDIV => self.op_sp_arith(ArithOp::Div)?,
            Opcode::SPMOD => self.op_sp_arith(ArithOp::Mod)?,

            Opcode::NEG_R => self.op_math1(l.as_index(), |n| -n),
            Opcode::CTBL_R => self.op_ctbl(l.as_index())?,
            Opcode::LPTBL_R => self.op_lptbl(l.as_index()),

            Opcode::STR_R_R => self.op_str_rr(l.as_index(), r.as_index()),
            Opcode::STR_R => self.op_str_r(l.as_index()),
            Opcode::NUM_R_R => self.op_num_rr(l.as_index(), r.as_index()),
            Opcode::NUM_R => self.op_num_r(l.as_index()),
            Opcode::INT_R_R => {
                self.op_num_rr(l.as_index(), r.as_index());
                self.op_math1(l.as_index(), f64::trunc);
            }
            Opcode::INT_R => self.op_math1(l.as_index(), f64::trunc),
            Opcode::SIZE_R_R => self.op_size(l.as_index(), r.as_index()),
            Opcode::LEN_R_R => self.op_len(l.as_index(), r.as_index()),

            Opcode::NOT_R => self.op_not(l.as_index()),

            Opcode::MDEL_S => {
                let key = self.string_key(l.as_int())?;
                self.op_mdel(key)?;
            }
            Opcode::MDEL_N => self.op_mdel(crate::table::Key::Int(l.as_int() as i64))?,
            Opcode::MDEL_R => self.op_mdel_reg(l.as_index())?,

            // GC lock hints from an earlier collector design; the
            // mark-and-sweep heap has no lock window to guard.
            Opcode::LGC | Opcode::ULGC => {}
            Opcode::GC => {
                self.collect_garbage();
            }

            Opcode::CPY_R_R => self.op_cpy(l.as_index(), r.as_index())?,

            Opcode::CALL_R => self.op_call(l.as_index(), r.as_int())?,
            Opcode::RET => self.op_ret()?,
            Opcode::LOCAL => self.op_local()?,
            Opcode::OPT_PVAL => self.op_opt_pval(l.as_int(), r.as_int())?,

            Opcode::ILOAD => self.op_iload(l.as_int() != 0)?,
            Opcode::IHAS => self.op_ihas()?,
            Opcode::IVAL_R => self.op_ival(l.as_index())?,
            Opcode::IKEY_R => self.op_ikey(l.as_index())?,
            Opcode::IPUSH => self.op_ipush()?,
            Opcode::IPOP => self.op_ipop()?,
            Opcode::ISTEP => self.op_istep()?,
            Opcode::IDEL => self.op_idel(),

            Opcode::ABS_R => self.op_math1(l.as_index(), f64::abs),
            Opcode::COS_R => self.op_math1(l.as_index(), f64::cos),
            Opcode::SIN_R => self.op_math1(l.as_index(), f64::sin),
            Opcode::TAN_R => self.op_math1(l.as_index(), f64::tan),
            Opcode::ACOS_R => self.op_math1(l.as_index(), f64::acos),
            Opcode::ASIN_R => self.op_math1(l.as_index(), f64::asin),
            Opcode::ATAN_R => self.op_math1(l.as_index(), f64::atan),
            Opcode::ATAN2_R_R => self.op_math2(l.as_index(), r.as_index(), f64::atan2),
            Opcode::LOG_R => self.op_math1(l.as_index(), f64::ln),
            Opcode::SGN_R => self.op_math1(l.as_index(), |n| {
                if n < 0.0 {
                    -1.0
                } else if n > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }),
            Opcode::SQR_R => self.op_math1(l.as_index(), f64::sqrt),
            Opcode::POW_R_R => self.op_math2(l.as_index(), r.as_index(), f64::powf),
            Opcode::FLOOR_R => self.op_math1(l.as_index(), f64::floor),
            Opcode::CEIL_R => self.op_math1(l.as_index(), f64::ceil),
            Opcode::ROUND_R => self.op_math1(l.as_index(), f64::round),
            Opcode::RAD_R => {
                self.op_math1(l.as_index(), |n| n * std::f64::consts::PI / 180.0)
            }
            Opcode::DEG_R => {
                self.op_math1(l.as_index(), |n| n * 180.0 / std::f64::consts::PI)
            }
            Opcode::MIN_R_R => self.op_math2(l.as_index(), r.as_index(), f64::min),
            Opcode::MAX_R_R => self.op_math2(l.as_index(), r.as_index(), f64::max),

            Opcode::TYPE_R_R => self.op_type(l.as_index(), r.as_index()),

            Opcode::SYS_N_N => self.op_sys(l.as_int(), r.as_int())?,
            Opcode::FLOAD_R => self.op_fload(l.as_index()),
            Opcode::FCALL_N => self.op_fcall(l.as_int())?,

            Opcode::OPT_LOADSINGLEVAR_R_S => {
                self.op_opt_loadsinglevar(l.as_index(), r.as_int(), false)?
            }
            Opcode::OPT_LOADSINGLEVARG_R_S => {
                self.op_opt_loadsinglevar(l.as_index(), r.as_int(), true)?
            }
            Opcode::OPT_LOADPARAM_S => self.op_opt_loadparam(l.as_int())?,
        }

        Ok(ExecuteState::Proceed)
    }
}
