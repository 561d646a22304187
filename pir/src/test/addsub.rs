use super::*;

#[test]
fn consecutive_adds_fuse() {
    let mut f = fixture();
    let r = f.reg("r");
    let four = f.imm(4);
    let three = f.imm(3);
    f.emit2(IrOp::ADD, r, four);
    let second = f.emit2(IrOp::ADD, r, three);
    let mut irl = f.irl;
    assert!(optimize_addsub(&mut f.sp, &mut f.ops, &mut irl));
    f.irl = irl;
    assert_eq!(f.opcodes(), vec![IrOp::ADD]);
    assert_eq!(f.imm_val(second), 7);
}

#[test]
fn add_then_sub_fuses_with_sign() {
    let mut f = fixture();
    let r = f.reg("r");
    let four = f.imm(4);
    let nine = f.imm(9);
    f.emit2(IrOp::ADD, r, four);
    let second = f.emit2(IrOp::SUB, r, nine);
    let mut irl = f.irl;
    assert!(optimize_addsub(&mut f.sp, &mut f.ops, &mut irl));
    f.irl = irl;
    assert_eq!(f.sp[second].opc, IrOp::SUB);
    assert_eq!(f.imm_val(second), 5);
}

#[test]
fn different_destinations_do_not_fuse() {
    let mut f = fixture();
    let r = f.reg("r");
    let s = f.reg("s");
    let one = f.imm(1);
    let two = f.imm(2);
    f.emit2(IrOp::ADD, r, one);
    f.emit2(IrOp::ADD, s, two);
    let mut irl = f.irl;
    assert!(!optimize_addsub(&mut f.sp, &mut f.ops, &mut irl));
    f.irl = irl;
    assert_eq!(f.opcodes(), vec![IrOp::ADD, IrOp::ADD]);
}

#[test]
fn register_sources_do_not_fuse() {
    let mut f = fixture();
    let r = f.reg("r");
    let s = f.reg("s");
    let one = f.imm(1);
    f.emit2(IrOp::ADD, r, s);
    f.emit2(IrOp::ADD, r, one);
    let mut irl = f.irl;
    assert!(!optimize_addsub(&mut f.sp, &mut f.ops, &mut irl));
    f.irl = irl;
    assert_eq!(f.opcodes(), vec![IrOp::ADD, IrOp::ADD]);
}

#[test]
fn fusion_skips_dummies_in_between() {
    let mut f = fixture();
    let r = f.reg("r");
    let t = f.local("t");
    let one = f.imm(1);
    let two = f.imm(2);
    f.emit2(IrOp::ADD, r, one);
    emit_op1(&mut f.sp, &mut f.irl, IrOp::DEAD, t);
    let second = f.emit2(IrOp::ADD, r, two);
    let mut irl = f.irl;
    assert!(optimize_addsub(&mut f.sp, &mut f.ops, &mut irl));
    f.irl = irl;
    assert_eq!(f.opcodes(), vec![IrOp::ADD]);
    assert_eq!(f.imm_val(second), 3);
}
