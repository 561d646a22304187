use crate::instr::{IrCond, IrOp};
use crate::ir::{IrId, IrList, IrSpace};
use crate::operand::{MemWidth, OpId, OpSpace, OperandKind};

pub fn emit_op0(sp: &mut IrSpace, irl: &mut IrList, opc: IrOp) -> IrId {
    let ir = sp.new_ir(opc);
    irl.append(sp, ir);
    ir
}

pub fn emit_op1(sp: &mut IrSpace, irl: &mut IrList, opc: IrOp, op: OpId) -> IrId {
    let ir = sp.new_ir(opc);
    sp[ir].dst = Some(op);
    irl.append(sp, ir);
    ir
}

pub fn emit_op2(sp: &mut IrSpace, irl: &mut IrList, opc: IrOp, dst: OpId, src: OpId) -> IrId {
    let ir = sp.new_ir(opc);
    sp[ir].dst = Some(dst);
    sp[ir].src = Some(src);
    irl.append(sp, ir);
    ir
}

pub fn emit_label(sp: &mut IrSpace, irl: &mut IrList, op: OpId) -> IrId {
    emit_op1(sp, irl, IrOp::LABEL, op)
}

/// A `COND_FALSE` jump is never taken, so nothing is emitted for it.
pub fn emit_jump(sp: &mut IrSpace, irl: &mut IrList, cond: IrCond, label: OpId) -> Option<IrId> {
    if cond == IrCond::FALSE {
        return None;
    }
    let ir = sp.new_ir(IrOp::JUMP);
    sp[ir].dst = Some(label);
    sp[ir].cond = cond;
    irl.append(sp, ir);
    Some(ir)
}

pub fn emit_long(sp: &mut IrSpace, ops: &mut OpSpace, irl: &mut IrList, val: i32) -> IrId {
    let op = ops.new_operand(OperandKind::Imm, "", val);
    emit_op1(sp, irl, IrOp::LONG, op)
}

pub fn emit_long_ptr(sp: &mut IrSpace, irl: &mut IrList, op: OpId) -> IrId {
    emit_op1(sp, irl, IrOp::LONG, op)
}

pub fn emit_string(sp: &mut IrSpace, ops: &mut OpSpace, irl: &mut IrList, s: &str) -> IrId {
    let op = ops.new_operand(OperandKind::Str, s, 0);
    emit_op1(sp, irl, IrOp::STRING, op)
}

pub fn emit_comment(sp: &mut IrSpace, ops: &mut OpSpace, irl: &mut IrList, text: &str) -> IrId {
    let op = ops.new_operand(OperandKind::Str, text, 0);
    emit_op1(sp, irl, IrOp::COMMENT, op)
}

fn emit_addsub(sp: &mut IrSpace, ops: &mut OpSpace, irl: &mut IrList, dst: OpId, off: i32) {
    let (opc, off) = if off < 0 {
        (IrOp::SUB, -off)
    } else {
        (IrOp::ADD, off)
    };
    let imm = ops.new_imm(off);
    emit_op2(sp, irl, opc, dst, imm);
}

fn read_op_for_width(width: MemWidth) -> IrOp {
    match width {
        MemWidth::Byte => IrOp::RDBYTE,
        MemWidth::Word => IrOp::RDWORD,
        MemWidth::Long => IrOp::RDLONG,
    }
}

fn write_op_for_width(width: MemWidth) -> IrOp {
    match width {
        MemWidth::Byte => IrOp::WRBYTE,
        MemWidth::Word => IrOp::WRWORD,
        MemWidth::Long => IrOp::WRLONG,
    }
}

/// Per-function temporary register pool. Registers are handed out in a
/// stack discipline; releasing back to a mark emits `DEAD` notes so the
/// optimizer knows the values have no further uses.
pub struct TempRegs {
    base: String,
    cur: i32,
    max: i32,
}

impl TempRegs {
    pub fn new(base: &str) -> TempRegs {
        TempRegs {
            base: base.to_owned(),
            cur: 0,
            max: 0,
        }
    }

    fn reg(&self, ops: &mut OpSpace, n: i32) -> OpId {
        let name = format!("{}_tmp{:03}_", self.base, n);
        ops.get_global(OperandKind::Local, &name, 0)
    }

    pub fn get(&mut self, ops: &mut OpSpace) -> OpId {
        self.cur += 1;
        if self.cur > self.max {
            self.max = self.cur;
        }
        self.reg(ops, self.cur)
    }

    pub fn mark(&self) -> i32 {
        self.cur
    }

    pub fn max_used(&self) -> i32 {
        self.max
    }

    /// Release temporaries above `mark`, emitting a `DEAD` marker for each.
    pub fn free_to(&mut self, sp: &mut IrSpace, ops: &mut OpSpace, irl: &mut IrList, mark: i32) {
        let mut end = self.cur;
        self.cur = mark;
        while end > mark {
            let op = self.reg(ops, end);
            emit_op1(sp, irl, IrOp::DEAD, op);
            end -= 1;
        }
    }
}

/// Move with memory lowering.
///
/// A memory-reference source is materialized through a temporary with the
/// right-width read; a memory-reference destination becomes the matching
/// write. Non-zero offsets adjust the base register around the access and
/// restore it afterwards.
pub fn emit_move(
    sp: &mut IrSpace,
    ops: &mut OpSpace,
    irl: &mut IrList,
    temps: &mut TempRegs,
    origdst: OpId,
    origsrc: OpId,
) {
    let mut src = origsrc;

    if let OperandKind::Mem { width, base } = ops[origsrc].kind {
        let off = ops[origsrc].val;
        let temp = temps.get(ops);
        if off != 0 {
            emit_addsub(sp, ops, irl, base, off);
        }
        emit_op2(sp, irl, read_op_for_width(width), temp, base);
        if off != 0 {
            emit_addsub(sp, ops, irl, base, -off);
        }
        src = temp;
    }

    if let OperandKind::Mem { width, base } = ops[origdst].kind {
        let off = ops[origdst].val;
        if ops.is_immediate(src) {
            let temp = temps.get(ops);
            emit_move(sp, ops, irl, temps, temp, src);
            src = temp;
        }
        if off != 0 {
            emit_addsub(sp, ops, irl, base, off);
        }
        emit_op2(sp, irl, write_op_for_width(width), src, base);
        if off != 0 {
            emit_addsub(sp, ops, irl, base, -off);
        }
    } else {
        emit_op2(sp, irl, IrOp::MOVE, origdst, src);
    }
}
