use super::*;

#[test]
fn short_forward_branch_is_predicated() {
    let mut f = fixture();
    let a = f.reg("a");
    let b = f.reg("b");
    let x = f.reg("x");
    let y = f.reg("y");
    let l = f.label();
    let one = f.imm(1);
    let two = f.imm(2);
    let cmp = f.emit2(IrOp::CMPS, a, b);
    f.sp[cmp].flags |= FLAG_WZ;
    f.jump(IrCond::NE, l);
    f.emit2(IrOp::MOVE, x, one);
    f.emit2(IrOp::MOVE, y, two);
    f.emit_label(l);
    f.optimize();
    let shape = f.shape();
    assert_eq!(
        shape,
        vec![
            (IrOp::CMPS, IrCond::TRUE),
            (IrOp::MOVE, IrCond::EQ),
            (IrOp::MOVE, IrCond::EQ),
        ]
    );
}

#[test]
fn long_forward_branch_is_kept() {
    let mut f = fixture();
    let a = f.reg("a");
    let b = f.reg("b");
    let l = f.label();
    let one = f.imm(1);
    let cmp = f.emit2(IrOp::CMPS, a, b);
    f.sp[cmp].flags |= FLAG_WZ;
    f.jump(IrCond::NE, l);
    for i in 0..4 {
        let r = f.reg(&format!("r{}", i));
        f.emit2(IrOp::MOVE, r, one);
    }
    f.emit_label(l);
    f.optimize();
    assert_eq!(
        f.opcodes(),
        vec![
            IrOp::CMPS,
            IrOp::JUMP,
            IrOp::MOVE,
            IrOp::MOVE,
            IrOp::MOVE,
            IrOp::MOVE,
            IrOp::LABEL,
        ]
    );
}

#[test]
fn branch_over_conditional_code_is_kept() {
    let mut f = fixture();
    let a = f.reg("a");
    let b = f.reg("b");
    let x = f.reg("x");
    let l = f.label();
    let one = f.imm(1);
    let cmp = f.emit2(IrOp::CMPS, a, b);
    f.sp[cmp].flags |= FLAG_WZ | FLAG_WC;
    f.jump(IrCond::NE, l);
    // already predicated differently; cannot be re-predicated
    f.emit2_cond(IrOp::MOVE, IrCond::LT, x, one);
    f.emit_label(l);
    f.optimize();
    assert_eq!(f.opcodes(), vec![IrOp::CMPS, IrOp::JUMP, IrOp::MOVE, IrOp::LABEL]);
}

#[test]
fn no_short_unconditional_forward_jump_survives() {
    let mut f = fixture();
    let x = f.reg("x");
    let l = f.label();
    let one = f.imm(1);
    f.jump(IrCond::TRUE, l);
    f.emit2(IrOp::MOVE, x, one);
    f.emit_label(l);
    f.optimize();
    // the jumped-over code was unreachable; jump and label evaporate
    for (opc, _) in f.shape() {
        assert_ne!(opc, IrOp::JUMP);
    }
}

#[test]
fn backward_jump_is_never_predicated() {
    let mut f = fixture();
    let a = f.reg("a");
    let p = f.reg("p");
    let l = f.label();
    f.emit_label(l);
    f.emit2(IrOp::WRLONG, a, p);
    f.jump(IrCond::NE, l);
    f.optimize();
    assert_eq!(f.opcodes(), vec![IrOp::LABEL, IrOp::WRLONG, IrOp::JUMP]);
}
