use super::*;

#[test]
fn self_move_is_deleted() {
    let mut f = fixture();
    let x = f.reg("x");
    f.emit2(IrOp::MOVE, x, x);
    f.optimize();
    assert!(f.shape().is_empty());
}

#[test]
fn self_move_with_flags_survives() {
    let mut f = fixture();
    let x = f.reg("x");
    f.emit2_wz(IrOp::MOVE, x, x);
    f.optimize();
    assert_eq!(f.opcodes(), vec![IrOp::MOVE]);
}

#[test]
fn conditional_move_is_left_alone() {
    let mut f = fixture();
    let x = f.reg("x");
    let y = f.reg("y");
    f.emit2_cond(IrOp::MOVE, IrCond::EQ, x, y);
    f.optimize();
    assert_eq!(f.shape(), vec![(IrOp::MOVE, IrCond::EQ)]);
}

#[test]
fn immediate_propagates_forward() {
    let mut f = fixture();
    let t = f.local("t");
    let r = f.reg("r");
    let five = f.imm(5);
    f.emit2(IrOp::MOVE, t, five);
    f.emit2(IrOp::MOVE, r, t);
    f.optimize();
    // the temporary disappears entirely
    let shape = f.full_shape();
    assert_eq!(shape.len(), 1);
    assert_eq!(shape[0].0, IrOp::MOVE);
    assert_eq!(shape[0].2, Some(r));
    assert_eq!(f.ops[shape[0].3.unwrap()].val, 5);
}

#[test]
fn arithmetic_on_known_constant_folds() {
    let mut f = fixture();
    let t = f.local("t");
    let r = f.reg("r");
    let five = f.imm(5);
    let three = f.imm(3);
    f.emit2(IrOp::MOVE, t, five);
    f.emit2(IrOp::ADD, t, three);
    f.emit2(IrOp::MOVE, r, t);
    f.optimize();
    let shape = f.full_shape();
    assert_eq!(shape.len(), 1);
    assert_eq!(shape[0].0, IrOp::MOVE);
    assert_eq!(shape[0].2, Some(r));
    assert_eq!(f.ops[shape[0].3.unwrap()].val, 8);
}

#[test]
fn forward_rename_through_a_window() {
    let mut f = fixture();
    let t = f.local("t");
    let a = f.reg("a");
    let b = f.reg("b");
    let r = f.reg("r");
    f.emit2(IrOp::MOVE, t, a);
    f.emit2(IrOp::ADD, t, b);
    f.emit2(IrOp::MOVE, r, t);
    f.optimize();
    let shape = f.full_shape();
    assert_eq!(shape.len(), 2);
    assert_eq!(shape[0], (IrOp::ADD, IrCond::TRUE, Some(a), Some(b)));
    assert_eq!(shape[1], (IrOp::MOVE, IrCond::TRUE, Some(r), Some(a)));
}

#[test]
fn backward_rename_when_source_dies() {
    let mut f = fixture();
    let t = f.local("t");
    let a = f.reg("a");
    let b = f.reg("b");
    let r = f.reg("r");
    let r2 = f.reg("r2");
    f.emit2(IrOp::MOVE, t, a);
    f.emit2(IrOp::ADD, t, b);
    f.emit2(IrOp::MOVE, r, t);
    // later use of "a" keeps the forward window closed for the first move
    f.emit2(IrOp::MOVE, r2, a);
    f.optimize();
    let shape = f.full_shape();
    assert_eq!(shape.len(), 3);
    assert_eq!(shape[0], (IrOp::MOVE, IrCond::TRUE, Some(r), Some(a)));
    assert_eq!(shape[1], (IrOp::ADD, IrCond::TRUE, Some(r), Some(b)));
    assert_eq!(shape[2], (IrOp::MOVE, IrCond::TRUE, Some(r2), Some(a)));
}

#[test]
fn no_unconditional_self_move_survives_optimization() {
    let mut f = fixture();
    let x = f.reg("x");
    let y = f.reg("y");
    f.emit2(IrOp::MOVE, x, x);
    f.emit2(IrOp::MOVE, y, x);
    f.emit2(IrOp::MOVE, x, x);
    f.optimize();
    let mut cur = f.irl.head;
    while let Some(id) = cur {
        let ir = &f.sp[id];
        if !ir.is_dummy() && ir.opc == IrOp::MOVE && ir.cond == IrCond::TRUE {
            assert_ne!(ir.dst, ir.src);
        }
        cur = ir.next();
    }
}

#[test]
fn optimizer_is_idempotent_at_fixed_point() {
    let mut f = fixture();
    let t = f.local("t");
    let a = f.reg("a");
    let r = f.reg("r");
    let l = f.label();
    let one = f.imm(1);
    let zero = f.imm(0);
    f.emit2(IrOp::MOVE, t, a);
    f.emit_label(l);
    f.emit2(IrOp::SUB, t, one);
    f.emit2_wz(IrOp::CMP, t, zero);
    f.jump(IrCond::NE, l);
    f.emit2(IrOp::MOVE, r, t);
    f.optimize();
    let first = f.full_shape();
    f.optimize();
    assert_eq!(first, f.full_shape());
}
