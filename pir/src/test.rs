use crate::emit::*;
use crate::instr::*;
use crate::ir::*;
use crate::operand::*;
use crate::optimize::*;

mod addsub;
mod branches;
mod inline;
mod moves;

/// Shared fixture: one instruction space, one operand space, one list.
pub struct Fix {
    pub sp: IrSpace,
    pub ops: OpSpace,
    pub irl: IrList,
}

pub fn fixture() -> Fix {
    Fix {
        sp: IrSpace::new(),
        ops: OpSpace::new(),
        irl: IrList::new(),
    }
}

impl Fix {
    /// A module-level register; never considered dead at the end of a list.
    pub fn reg(&mut self, name: &str) -> OpId {
        self.ops.get_global(OperandKind::Reg, name, 0)
    }

    /// A function-local register; dead once the list runs out.
    pub fn local(&mut self, name: &str) -> OpId {
        self.ops.get_global(OperandKind::Local, name, 0)
    }

    pub fn arg(&mut self, name: &str) -> OpId {
        self.ops.get_global(OperandKind::Arg, name, 0)
    }

    pub fn hw(&mut self, name: &str) -> OpId {
        self.ops.get_global(OperandKind::HwReg, name, 0)
    }

    pub fn imm(&mut self, val: i32) -> OpId {
        self.ops.new_imm(val)
    }

    pub fn label(&mut self) -> OpId {
        self.ops.new_label()
    }

    pub fn emit2(&mut self, opc: IrOp, dst: OpId, src: OpId) -> IrId {
        emit_op2(&mut self.sp, &mut self.irl, opc, dst, src)
    }

    pub fn emit2_cond(&mut self, opc: IrOp, cond: IrCond, dst: OpId, src: OpId) -> IrId {
        let ir = self.emit2(opc, dst, src);
        self.sp[ir].cond = cond;
        ir
    }

    pub fn emit2_wz(&mut self, opc: IrOp, dst: OpId, src: OpId) -> IrId {
        let ir = self.emit2(opc, dst, src);
        self.sp[ir].flags |= FLAG_WZ;
        ir
    }

    pub fn emit_label(&mut self, op: OpId) -> IrId {
        emit_label(&mut self.sp, &mut self.irl, op)
    }

    pub fn jump(&mut self, cond: IrCond, label: OpId) -> Option<IrId> {
        emit_jump(&mut self.sp, &mut self.irl, cond, label)
    }

    pub fn ret(&mut self) -> IrId {
        emit_op0(&mut self.sp, &mut self.irl, IrOp::RET)
    }

    pub fn optimize(&mut self) {
        optimize_ir_local(&mut self.sp, &mut self.ops, &mut self.irl, None);
    }

    pub fn optimize_with_ret(&mut self, ret_label: OpId) {
        optimize_ir_local(&mut self.sp, &mut self.ops, &mut self.irl, Some(ret_label));
    }

    /// Opcode/condition shape of the surviving (non-dummy) instructions.
    pub fn shape(&self) -> Vec<(IrOp, IrCond)> {
        let mut out = Vec::new();
        let mut cur = self.irl.head;
        while let Some(id) = cur {
            if !self.sp[id].is_dummy() {
                out.push((self.sp[id].opc, self.sp[id].cond));
            }
            cur = self.sp[id].next();
        }
        out
    }

    /// Like `shape` but with operand ids, for precise checks.
    pub fn full_shape(&self) -> Vec<(IrOp, IrCond, Option<OpId>, Option<OpId>)> {
        let mut out = Vec::new();
        let mut cur = self.irl.head;
        while let Some(id) = cur {
            if !self.sp[id].is_dummy() {
                let ir = &self.sp[id];
                out.push((ir.opc, ir.cond, ir.dst, ir.src));
            }
            cur = self.sp[id].next();
        }
        out
    }

    pub fn opcodes(&self) -> Vec<IrOp> {
        self.shape().into_iter().map(|(o, _)| o).collect()
    }

    pub fn imm_val(&self, id: IrId) -> i32 {
        self.ops[self.sp[id].src.unwrap()].val
    }
}

#[test]
fn cond_invert_is_an_involution() {
    let conds = [
        IrCond::TRUE,
        IrCond::FALSE,
        IrCond::EQ,
        IrCond::NE,
        IrCond::LT,
        IrCond::GE,
        IrCond::LE,
        IrCond::GT,
        IrCond::C,
        IrCond::NC,
    ];
    for &c in &conds {
        assert_eq!(c.invert().invert(), c);
        assert_ne!(c.invert(), c);
    }
    assert_eq!(IrCond::EQ.invert(), IrCond::NE);
    assert_eq!(IrCond::LT.invert(), IrCond::GE);
    assert_eq!(IrCond::TRUE.invert(), IrCond::FALSE);
}

#[test]
fn cond_flip_sides() {
    assert_eq!(IrCond::LT.flip_sides(), IrCond::GT);
    assert_eq!(IrCond::LE.flip_sides(), IrCond::GE);
    assert_eq!(IrCond::EQ.flip_sides(), IrCond::EQ);
    assert_eq!(IrCond::NE.flip_sides(), IrCond::NE);
}

#[test]
fn opcode_mnemonic_lookup() {
    use util::EnumFromStr;
    assert_eq!(IrOp::from_str("add"), Ok(IrOp::ADD));
    assert_eq!(IrOp::from_str("DJNZ"), Ok(IrOp::DJNZ));
    assert_eq!(IrOp::from_str("RdLong"), Ok(IrOp::RDLONG));
    assert!(IrOp::from_str("frobnicate").is_err());
}

#[test]
fn small_immediates_are_anonymous() {
    let mut ops = OpSpace::new();
    let a = ops.new_imm(0);
    let b = ops.new_imm(511);
    let c = ops.new_imm(512);
    let d = ops.new_imm(-1);
    assert_eq!(ops[a].kind, OperandKind::Imm);
    assert_eq!(ops[b].kind, OperandKind::Imm);
    assert_eq!(ops[c].kind, OperandKind::ImmNamed);
    assert_eq!(ops[d].kind, OperandKind::ImmNamed);
    // named immediates are interned
    assert_eq!(c, ops.new_imm(512));
}

#[test]
fn temp_regs_follow_stack_discipline() {
    let mut f = fixture();
    let mut temps = TempRegs::new("f");
    let mark = temps.mark();
    let t1 = temps.get(&mut f.ops);
    let t2 = temps.get(&mut f.ops);
    assert_ne!(t1, t2);
    temps.free_to(&mut f.sp, &mut f.ops, &mut f.irl, mark);
    // two DEAD markers, innermost first
    let ids = f.irl.ids(&f.sp);
    assert_eq!(ids.len(), 2);
    assert_eq!(f.sp[ids[0]].opc, IrOp::DEAD);
    assert_eq!(f.sp[ids[0]].dst, Some(t2));
    assert_eq!(f.sp[ids[1]].dst, Some(t1));
    // the same registers are reused afterwards
    assert_eq!(temps.get(&mut f.ops), t1);
}

#[test]
fn emit_move_lowers_memory_reads() {
    let mut f = fixture();
    let mut temps = TempRegs::new("f");
    let base = f.local("ptr");
    let mem = f
        .ops
        .new_operand(
            OperandKind::Mem {
                width: MemWidth::Long,
                base,
            },
            "",
            8,
        );
    let dst = f.reg("x");
    emit_move(&mut f.sp, &mut f.ops, &mut f.irl, &mut temps, dst, mem);
    assert_eq!(
        f.opcodes(),
        vec![IrOp::ADD, IrOp::RDLONG, IrOp::SUB, IrOp::MOVE]
    );
}

#[test]
fn emit_move_lowers_memory_writes() {
    let mut f = fixture();
    let mut temps = TempRegs::new("f");
    let base = f.local("ptr");
    let mem = f
        .ops
        .new_operand(
            OperandKind::Mem {
                width: MemWidth::Byte,
                base,
            },
            "",
            0,
        );
    let src = f.reg("x");
    emit_move(&mut f.sp, &mut f.ops, &mut f.irl, &mut temps, mem, src);
    assert_eq!(f.opcodes(), vec![IrOp::WRBYTE]);
}

#[test]
fn emit_jump_false_is_nothing() {
    let mut f = fixture();
    let l = f.label();
    assert!(f.jump(IrCond::FALSE, l).is_none());
    assert!(f.irl.is_empty());
}
