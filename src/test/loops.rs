use super::*;
use crate::loops::{get_revised_limit, perform_loop_optimization, transform_count_repeat};

/// Build `for(init; cond; update) body` in the canonical shape.
fn build_for(
    f: &mut Fixture,
    init: AstId,
    cond: AstId,
    update: AstId,
    body: AstId,
) -> AstId {
    let step = f.ctx.new_ast(AstKind::Step, Some(update), Some(body));
    let to = f.ctx.new_ast(AstKind::To, Some(cond), Some(step));
    f.ctx.new_ast(AstKind::For, Some(init), Some(to))
}

#[test]
fn revised_limit_raises_le_bounds() {
    let mut f = fixture();
    let nine = f.int(9);
    let revised = get_revised_limit(&mut f.ctx, Op::Le, nine).unwrap();
    assert_eq!(crate::expr::const_val(&f.ctx, revised), Some(10));

    // a < bound stays as it is
    let five = f.int(5);
    let same = get_revised_limit(&mut f.ctx, Op::Lt, five).unwrap();
    assert_eq!(same, five);

    // n - 1 with <= collapses to n
    let n = f.local("n", None);
    let one = f.int(1);
    let minus = f.op(Op::Sub, n, one);
    let collapsed = get_revised_limit(&mut f.ctx, Op::Le, minus).unwrap();
    assert_eq!(collapsed, n);
}

#[test]
fn increment_loop_with_unused_index_counts_down() {
    let mut f = fixture();
    let i = f.local("i", None);
    let a = f.var("a", None);
    let p = f.var("p", None);
    let zero = f.int(0);
    let nine = f.int(9);
    let init = f.assign(i, zero);
    let i2 = f.ctx.ast_ident("i");
    let cond = f.ctx.ast_op(Op::Le, Some(i2), Some(nine));
    let i3 = f.ctx.ast_ident("i");
    let update = f.ctx.ast_op(Op::Increment, Some(i3), None);
    // the body does not mention i at all
    let stmt = f.assign(a, p);
    let loop_body = f.stmts(&[stmt]);
    let forloop = build_for(&mut f, init, cond, update, loop_body);
    let body = f.stmts(&[forloop]);
    f.set_body(body);
    perform_loop_optimization(&mut f.ctx, f.module);

    // rewritten to count down to zero with a != test
    let fal = f
        .find_kind(Some(f.body()), AstKind::ForAtLeastOnce)
        .expect("count-down loop");
    let to = f.ctx.ast.right(fal).unwrap();
    let cond = f.ctx.ast.left(to).unwrap();
    assert_eq!(f.ctx.ast.op_of(cond), Op::Ne);
    let bound = f.ctx.ast.right(cond).unwrap();
    assert_eq!(f.ctx.ast.int_val(bound), 0);
    // the update flipped to a decrement
    assert_eq!(f.count_op(Some(f.body()), Op::Decrement), 1);
    assert_eq!(f.count_op(Some(f.body()), Op::Increment), 0);
    // a guard protects the zero-trip case
    assert!(f.find_kind(Some(f.body()), AstKind::If).is_some());
}

#[test]
fn increment_loop_with_used_index_is_left_alone() {
    let mut f = fixture();
    let i = f.local("i", None);
    let a = f.var("a", None);
    let zero = f.int(0);
    let nine = f.int(9);
    let init = f.assign(i, zero);
    let i2 = f.ctx.ast_ident("i");
    let cond = f.ctx.ast_op(Op::Le, Some(i2), Some(nine));
    let i3 = f.ctx.ast_ident("i");
    let update = f.ctx.ast_op(Op::Increment, Some(i3), None);
    let i4 = f.ctx.ast_ident("i");
    let stmt = f.assign(a, i4); // body reads i
    let loop_body = f.stmts(&[stmt]);
    let forloop = build_for(&mut f, init, cond, update, loop_body);
    let body = f.stmts(&[forloop]);
    f.set_body(body);
    perform_loop_optimization(&mut f.ctx, f.module);

    assert!(f.find_kind(Some(f.body()), AstKind::For).is_some());
    assert_eq!(f.count_op(Some(f.body()), Op::Increment), 1);
    assert_eq!(f.count_op(Some(f.body()), Op::Decrement), 0);
}

#[test]
fn gtu_decrement_loop_test_becomes_ne() {
    let mut f = fixture();
    let i = f.local("i", None);
    let a = f.var("a", None);
    let p = f.var("p", None);
    let ten = f.int(10);
    let zero = f.int(0);
    let init = f.assign(i, ten);
    let i2 = f.ctx.ast_ident("i");
    let cond = f.ctx.ast_op(Op::Gtu, Some(i2), Some(zero));
    let i3 = f.ctx.ast_ident("i");
    let update = f.ctx.ast_op(Op::Decrement, None, Some(i3));
    let stmt = f.assign(a, p);
    let loop_body = f.stmts(&[stmt]);
    let forloop = build_for(&mut f, init, cond, update, loop_body);
    let body = f.stmts(&[forloop]);
    f.set_body(body);
    perform_loop_optimization(&mut f.ctx, f.module);

    let lp = f
        .find_kind(Some(f.body()), AstKind::For)
        .or_else(|| f.find_kind(Some(f.body()), AstKind::ForAtLeastOnce))
        .unwrap();
    let to = f.ctx.ast.right(lp).unwrap();
    let cond = f.ctx.ast.left(to).unwrap();
    assert_eq!(f.ctx.ast.op_of(cond), Op::Ne);
}

#[test]
fn goto_poisons_the_analysis() {
    let mut f = fixture();
    let i = f.local("i", None);
    let a = f.var("a", None);
    let p = f.var("p", None);
    let zero = f.int(0);
    let nine = f.int(9);
    let init = f.assign(i, zero);
    let i2 = f.ctx.ast_ident("i");
    let cond = f.ctx.ast_op(Op::Le, Some(i2), Some(nine));
    let i3 = f.ctx.ast_ident("i");
    let update = f.ctx.ast_op(Op::Increment, Some(i3), None);
    let target = f.ctx.ast_ident("out");
    let goto = f.ctx.new_ast(AstKind::Goto, Some(target), None);
    let stmt = f.assign(a, p);
    let loop_body = f.stmts(&[stmt, goto]);
    let forloop = build_for(&mut f, init, cond, update, loop_body);
    let body = f.stmts(&[forloop]);
    f.set_body(body);
    perform_loop_optimization(&mut f.ctx, f.module);

    // the branch blocks the count-down rewrite
    assert!(f.find_kind(Some(f.body()), AstKind::For).is_some());
    assert_eq!(f.count_op(Some(f.body()), Op::Increment), 1);
}

#[test]
fn counted_repeat_without_variable_counts_down() {
    let mut f = fixture();
    let x = f.var("x", None);
    let ten = f.int(10);
    let one = f.int(1);
    let stmt = f.assign(x, one);
    let loop_body = f.stmts(&[stmt]);
    let step = f.ctx.new_ast(AstKind::Step, None, Some(loop_body));
    let to = f.ctx.new_ast(AstKind::To, Some(ten), Some(step));
    let from = f.ctx.new_ast(AstKind::From, None, Some(to));
    let repeat = f.ctx.new_ast(AstKind::CountRepeat, None, Some(from));
    let lowered = transform_count_repeat(&mut f.ctx, repeat);

    // counts from 10 down, testing != 0
    assert_eq!(f.ctx.ast.kind(lowered), AstKind::ForAtLeastOnce);
    let to = f.ctx.ast.right(lowered).unwrap();
    let cond = f.ctx.ast.left(to).unwrap();
    assert_eq!(f.ctx.ast.op_of(cond), Op::Ne);
    assert!(f.uses_ident_with_prefix(Some(lowered), "_idx_"));
}

#[test]
fn counted_repeat_with_unknown_direction_makes_a_step_variable() {
    let mut f = fixture();
    let i = f.local("i", None);
    let from_v = f.local("lo", None);
    let to_v = f.local("hi", None);
    let x = f.var("x", None);
    let stmt = f.assign(x, i);
    let loop_body = f.stmts(&[stmt]);
    let step = f.ctx.new_ast(AstKind::Step, None, Some(loop_body));
    let to = f.ctx.new_ast(AstKind::To, Some(to_v), Some(step));
    let from = f.ctx.new_ast(AstKind::From, Some(from_v), Some(to));
    let i0 = f.ctx.ast_ident("i");
    let repeat = f.ctx.new_ast(AstKind::CountRepeat, Some(i0), Some(from));
    let lowered = transform_count_repeat(&mut f.ctx, repeat);

    assert_ne!(f.ctx.ast.kind(lowered), AstKind::CountRepeat);
    // the sign of the step is computed at run time
    assert!(f.uses_ident_with_prefix(Some(lowered), "_step_"));
}

#[test]
fn narrow_unsigned_loop_warns_about_nontermination() {
    let mut f = fixture();
    let b = f.local("b", Some(f.ctx.types.ubyte));
    let x = f.var("x", None);
    let stmt = f.assign(x, b);
    let loop_body = f.stmts(&[stmt]);
    let zero = f.int(0);
    let limit = f.int(300); // a byte can never reach 300
    let step = f.ctx.new_ast(AstKind::Step, None, Some(loop_body));
    let to = f.ctx.new_ast(AstKind::To, Some(limit), Some(step));
    let from = f.ctx.new_ast(AstKind::From, Some(zero), Some(to));
    let b0 = f.ctx.ast_ident("b");
    let repeat = f.ctx.new_ast(AstKind::CountRepeat, Some(b0), Some(from));
    let _ = transform_count_repeat(&mut f.ctx, repeat);
    assert!(f
        .ctx
        .diags
        .list
        .iter()
        .any(|d| d.message.contains("never terminate")));
}

#[test]
fn strength_reduction_advances_a_pointer() {
    // for i := 0; i <= 9; i++ { a[i] := k }  with a a module array:
    // the address computation moves out of the loop and steps by 4
    let mut f = fixture();
    let i = f.local("i", None);
    let k = f.local("k", None);
    let ten = f.int(10);
    let long_t = f.ctx.types.long;
    let arr_t = f.ctx.new_ast(AstKind::ArrayType, Some(long_t), Some(ten));
    let a = f.var("a", Some(arr_t));
    let zero = f.int(0);
    let nine = f.int(9);
    let init = f.assign(i, zero);
    let i2 = f.ctx.ast_ident("i");
    let cond = f.ctx.ast_op(Op::Le, Some(i2), Some(nine));
    let i3 = f.ctx.ast_ident("i");
    let update = f.ctx.ast_op(Op::Increment, Some(i3), None);
    let i4 = f.ctx.ast_ident("i");
    let elem = f.ctx.new_ast(AstKind::ArrayRef, Some(a), Some(i4));
    let stmt = f.ctx.ast_assign(elem, k);
    let loop_body = f.stmts(&[stmt]);
    let forloop = build_for(&mut f, init, cond, update, loop_body);
    let body = f.stmts(&[forloop]);
    f.set_body(body);
    crate::cse::perform_cse(&mut f.ctx, f.module);

    let body = f.body();
    // the array address lives in a typed CSE temporary now
    assert!(f.uses_ident_with_prefix(Some(body), "_csetype_"));
    // an accumulator bump by the element size appears in the loop
    assert!(has_add_of(&f, Some(body), 4));
    // and the loop now counts down: the index variable became unused
    assert!(
        f.find_kind(Some(body), AstKind::ForAtLeastOnce).is_some(),
        "loop should have been converted to count-down form"
    );
}

fn has_add_of(f: &Fixture, ast: Option<AstId>, val: i64) -> bool {
    let ast = match ast {
        Some(a) => a,
        None => return false,
    };
    if f.ctx.ast.kind(ast) == AstKind::Operator && f.ctx.ast.op_of(ast) == Op::Add {
        if let Some(r) = f.ctx.ast.right(ast) {
            if f.ctx.ast.kind(r) == AstKind::Integer && f.ctx.ast.int_val(r) == val {
                return true;
            }
        }
    }
    has_add_of(f, f.ctx.ast.left(ast), val) || has_add_of(f, f.ctx.ast.right(ast), val)
}
