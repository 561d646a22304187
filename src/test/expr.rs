use matches::assert_matches;

use super::*;
use crate::expr::*;

#[test]
fn constant_arithmetic_folds() {
    let mut f = fixture();
    let two = f.int(2);
    let three = f.int(3);
    let sum = f.op(Op::Add, two, three);
    assert!(is_const_expr(&f.ctx, sum));
    assert_matches!(const_val(&f.ctx, sum), Some(5));

    let four = f.int(4);
    let prod = f.op(Op::Mul, sum, four);
    assert_eq!(const_val(&f.ctx, prod), Some(20));

    let shl = f.op(Op::Shl, two, three);
    assert_eq!(const_val(&f.ctx, shl), Some(16));
}

#[test]
fn comparisons_yield_all_ones_truth() {
    let mut f = fixture();
    let two = f.int(2);
    let three = f.int(3);
    let lt = f.op(Op::Lt, two, three);
    assert_eq!(const_val(&f.ctx, lt), Some(-1));
    let gt = f.op(Op::Gt, two, three);
    assert_eq!(const_val(&f.ctx, gt), Some(0));
}

#[test]
fn division_by_zero_is_not_const() {
    let mut f = fixture();
    let one = f.int(1);
    let zero = f.int(0);
    let div = f.op(Op::Div, one, zero);
    assert!(!is_const_expr(&f.ctx, div));
}

#[test]
fn symbolic_constants_evaluate() {
    let mut f = fixture();
    let table = f.ctx.module(f.module).objsyms;
    f.ctx
        .syms
        .add(table, "limit", SymbolKind::Constant, SymVal::Int(96), None)
        .unwrap();
    let id = f.ctx.ast_ident("limit");
    assert_eq!(const_val(&f.ctx, id), Some(96));
    // but a plain variable is not constant
    let v = f.var("v", None);
    assert!(!is_const_expr(&f.ctx, v));
}

#[test]
fn sign_and_zero_extension() {
    let mut f = fixture();
    let val = f.int(0xFF);
    let eight = f.int(8);
    let sx = f.op(Op::SignExtend, val, eight);
    assert_eq!(const_val(&f.ctx, sx), Some(-1));
    let val2 = f.int(0x1FF);
    let eight2 = f.int(8);
    let zx = f.op(Op::ZeroExtend, val2, eight2);
    assert_eq!(const_val(&f.ctx, zx), Some(0xFF));
}

#[test]
fn type_sizes() {
    let f = fixture();
    let c = &f.ctx;
    assert_eq!(type_size(c, Some(c.types.long)), 4);
    assert_eq!(type_size(c, Some(c.types.word)), 2);
    assert_eq!(type_size(c, Some(c.types.byte)), 1);
    assert_eq!(type_size(c, Some(c.types.int64)), 8);
    assert_eq!(type_size(c, Some(c.types.float)), 4);
    assert_eq!(type_size(c, Some(c.types.string)), 4); // pointer
    assert_eq!(type_size(c, None), 4); // unknown defaults to long
}

#[test]
fn array_type_size_scales_by_count() {
    let mut f = fixture();
    let ten = f.int(10);
    let long_t = f.ctx.types.long;
    let arr = f
        .ctx
        .new_ast(AstKind::ArrayType, Some(long_t), Some(ten));
    assert_eq!(type_size(&f.ctx, Some(arr)), 40);
}

#[test]
fn expr_type_of_identifiers_comes_from_symbols() {
    let mut f = fixture();
    let w = f.local("w", Some(f.ctx.types.word));
    assert_eq!(expr_type(&f.ctx, w), Some(f.ctx.types.word));
    assert_eq!(type_size(&f.ctx, expr_type(&f.ctx, w)), 2);
}

#[test]
fn type_predicates() {
    let mut f = fixture();
    let long_t = f.ctx.types.long;
    let reft = f.ctx.new_ast(AstKind::RefType, Some(long_t), None);
    assert!(is_ref_type(&f.ctx, Some(reft)));
    assert!(!is_ref_type(&f.ctx, Some(long_t)));
    assert!(is_int_type(&f.ctx, Some(f.ctx.types.ulong)));
    assert!(is_unsigned_type(&f.ctx, Some(f.ctx.types.ulong)));
    assert!(!is_unsigned_type(&f.ctx, Some(f.ctx.types.long)));
    assert!(is_float_type(&f.ctx, Some(f.ctx.types.float)));
    assert!(is_int64_type(&f.ctx, Some(f.ctx.types.int64)));
    // modifiers are transparent
    let cm = f.ctx.new_ast(AstKind::ConstModifier, Some(reft), None);
    assert!(is_ref_type(&f.ctx, Some(cm)));
}

#[test]
fn side_effect_detection() {
    let mut f = fixture();
    let x = f.ctx.ast_ident("x");
    let one = f.int(1);
    let sum = f.op(Op::Add, x, one);
    assert!(!expr_has_side_effects(&f.ctx, sum));

    let x2 = f.ctx.ast_ident("x");
    let assign = f.assign(x2, sum);
    assert!(expr_has_side_effects(&f.ctx, assign));

    let inc = f.ctx.ast_op(Op::Increment, Some(x2), None);
    assert!(expr_has_side_effects(&f.ctx, inc));

    let callee = f.ctx.ast_ident("helper");
    let call = f.ctx.new_ast(AstKind::FuncCall, Some(callee), None);
    let wrapped = f.op(Op::Add, call, one);
    assert!(expr_has_side_effects(&f.ctx, wrapped));
}

#[test]
fn fold_if_const_keeps_symbolic_names() {
    let mut f = fixture();
    let table = f.ctx.module(f.module).objsyms;
    f.ctx
        .syms
        .add(table, "limit", SymbolKind::Constant, SymVal::Int(96), None)
        .unwrap();
    let id = f.ctx.ast_ident("limit");
    assert_eq!(fold_if_const(&mut f.ctx, id), id);
    let two = f.int(2);
    let three = f.int(3);
    let sum = f.op(Op::Add, two, three);
    let folded = fold_if_const(&mut f.ctx, sum);
    assert_eq!(f.ctx.ast.kind(folded), AstKind::Integer);
    assert_eq!(f.ctx.ast.int_val(folded), 5);
}
