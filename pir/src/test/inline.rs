use super::*;
use std::collections::HashMap;

fn body_of(f: &mut Fix, build: impl FnOnce(&mut Fix, &mut IrList)) -> IrList {
    let mut body = IrList::new();
    build(f, &mut body);
    body
}

#[test]
fn tiny_label_free_bodies_qualify() {
    let mut f = fixture();
    let result = f.reg("result_");
    let one = f.imm(1);
    let body = body_of(&mut f, |f, irl| {
        emit_op2(&mut f.sp, irl, IrOp::MOVE, result, one);
    });
    assert!(should_be_inlined(&f.sp, &body));
}

#[test]
fn bodies_with_labels_do_not_qualify() {
    let mut f = fixture();
    let result = f.reg("result_");
    let one = f.imm(1);
    let l = f.label();
    let body = body_of(&mut f, |f, irl| {
        emit_label(&mut f.sp, irl, l);
        emit_op2(&mut f.sp, irl, IrOp::MOVE, result, one);
    });
    assert!(!should_be_inlined(&f.sp, &body));
}

#[test]
fn large_bodies_do_not_qualify() {
    let mut f = fixture();
    let result = f.reg("result_");
    let one = f.imm(1);
    let body = body_of(&mut f, |f, irl| {
        for _ in 0..4 {
            emit_op2(&mut f.sp, irl, IrOp::ADD, result, one);
        }
    });
    assert!(!should_be_inlined(&f.sp, &body));
}

#[test]
fn dummies_do_not_count_against_the_threshold() {
    let mut f = fixture();
    let result = f.reg("result_");
    let t = f.local("t");
    let one = f.imm(1);
    let body = body_of(&mut f, |f, irl| {
        for _ in 0..3 {
            emit_op2(&mut f.sp, irl, IrOp::ADD, result, one);
            emit_op1(&mut f.sp, irl, IrOp::DEAD, t);
        }
    });
    assert!(should_be_inlined(&f.sp, &body));
}

#[test]
fn calls_are_expanded_in_place() {
    let mut f = fixture();
    let result = f.reg("result_");
    let arg = f.arg("arg1");
    let seven = f.imm(7);
    let fname = f.ops.new_operand(OperandKind::ImmLabel, "double_", 0);

    let body = body_of(&mut f, |f, irl| {
        emit_op2(&mut f.sp, irl, IrOp::ADD, arg, arg);
        emit_op2(&mut f.sp, irl, IrOp::MOVE, result, arg);
    });
    assert!(should_be_inlined(&f.sp, &body));

    let mut inlines: InlineMap = HashMap::new();
    inlines.insert(fname, body);

    f.emit2(IrOp::MOVE, arg, seven);
    emit_op1(&mut f.sp, &mut f.irl, IrOp::CALL, fname);
    f.emit2(IrOp::WRLONG, result, arg);

    let mut irl = f.irl;
    assert!(expand_inlines(&mut f.sp, &mut irl, &inlines));
    f.irl = irl;

    assert_eq!(
        f.opcodes(),
        vec![IrOp::MOVE, IrOp::ADD, IrOp::MOVE, IrOp::WRLONG]
    );
}

#[test]
fn expanded_bodies_contain_no_labels() {
    let mut f = fixture();
    let result = f.reg("result_");
    let one = f.imm(1);
    let fname = f.ops.new_operand(OperandKind::ImmLabel, "tiny_", 0);
    let body = body_of(&mut f, |f, irl| {
        emit_op2(&mut f.sp, irl, IrOp::MOVE, result, one);
    });
    let mut inlines: InlineMap = HashMap::new();
    inlines.insert(fname, body);

    emit_op1(&mut f.sp, &mut f.irl, IrOp::CALL, fname);
    let mut irl = f.irl;
    expand_inlines(&mut f.sp, &mut irl, &inlines);
    f.irl = irl;

    for (opc, _) in f.shape() {
        assert_ne!(opc, IrOp::LABEL);
        assert_ne!(opc, IrOp::CALL);
    }
}

#[test]
fn calls_to_other_functions_are_untouched() {
    let mut f = fixture();
    let fname = f.ops.new_operand(OperandKind::ImmLabel, "far_away_", 0);
    emit_op1(&mut f.sp, &mut f.irl, IrOp::CALL, fname);
    let inlines: InlineMap = HashMap::new();
    let mut irl = f.irl;
    assert!(!expand_inlines(&mut f.sp, &mut irl, &inlines));
    f.irl = irl;
    assert_eq!(f.opcodes(), vec![IrOp::CALL]);
}
