use super::*;
use crate::module::FUNC_IS_PUBLIC;
use crate::outasm::{compile_to_ir, emit_globals, AsmGen};
use pir::{IrCond, IrOp};

fn shape(g: &AsmGen) -> Vec<(IrOp, IrCond)> {
    let mut out = Vec::new();
    let mut cur = g.program.head;
    while let Some(id) = cur {
        if !g.sp[id].is_dummy() {
            out.push((g.sp[id].opc, g.sp[id].cond));
        }
        cur = g.sp[id].next();
    }
    out
}

fn opcodes(g: &AsmGen) -> Vec<IrOp> {
    shape(g).into_iter().map(|(o, _)| o).collect()
}

fn make_public(f: &mut Fixture) {
    f.ctx.func_mut(f.func).flags |= FUNC_IS_PUBLIC;
}

#[test]
fn trivial_function_compiles_to_label_and_ret() {
    let mut f = fixture();
    make_public(&mut f);
    let x = f.var("x", None);
    let one = f.int(1);
    let s = f.assign(x, one);
    let body = f.stmts(&[s]);
    f.set_body(body);
    let mut g = AsmGen::new();
    assert!(compile_to_ir(&mut f.ctx, &mut g, f.module));
    let ops = opcodes(&g);
    assert_eq!(ops, vec![IrOp::LABEL, IrOp::MOVE, IrOp::LABEL, IrOp::RET]);
}

#[test]
fn if_statement_is_predicated_by_the_optimizer() {
    // if (a == b) { x := 1; y := 2 } compiles to a compare plus two
    // conditionally-executed moves, no branches at all
    let mut f = fixture();
    make_public(&mut f);
    let a = f.var("a", None);
    let b = f.var("b", None);
    let x = f.var("x", None);
    let y = f.var("y", None);
    let one = f.int(1);
    let two = f.int(2);
    let s1 = f.assign(x, one);
    let s2 = f.assign(y, two);
    let then_body = f.stmts(&[s1, s2]);
    let branches = f.ctx.new_ast(AstKind::ThenElse, Some(then_body), None);
    let cond = f.op(Op::Eq, a, b);
    let ifstmt = f.ctx.new_ast(AstKind::If, Some(cond), Some(branches));
    let body = f.stmts(&[ifstmt]);
    f.set_body(body);
    let mut g = AsmGen::new();
    assert!(compile_to_ir(&mut f.ctx, &mut g, f.module));

    let sh = shape(&g);
    assert_eq!(
        sh,
        vec![
            (IrOp::LABEL, IrCond::TRUE),
            (IrOp::CMPS, IrCond::TRUE),
            (IrOp::MOVE, IrCond::EQ),
            (IrOp::MOVE, IrCond::EQ),
            (IrOp::LABEL, IrCond::TRUE),
            (IrOp::RET, IrCond::TRUE),
        ]
    );
}

#[test]
fn count_down_loop_compiles_to_djnz() {
    // repeat-style loop: i := 10; do { x := x + 1; --i } while (i != 0)
    let mut f = fixture();
    make_public(&mut f);
    let i = f.local("i", None);
    let x = f.var("x", None);
    let ten = f.int(10);
    let init = f.assign(i, ten);
    let i2 = f.ctx.ast_ident("i");
    let zero = f.int(0);
    let cond = f.ctx.ast_op(Op::Ne, Some(i2), Some(zero));
    let i3 = f.ctx.ast_ident("i");
    let update = f.ctx.ast_op(Op::Decrement, None, Some(i3));
    let one = f.int(1);
    let x2 = f.ctx.ast_ident("x");
    let sum = f.ctx.ast_op(Op::Add, Some(x2), Some(one));
    let s = f.ctx.ast_assign(x, sum);
    let loop_body = f.stmts(&[s]);
    let step = f.ctx.new_ast(AstKind::Step, Some(update), Some(loop_body));
    let to = f.ctx.new_ast(AstKind::To, Some(cond), Some(step));
    let lp = f
        .ctx
        .new_ast(AstKind::ForAtLeastOnce, Some(init), Some(to));
    let body = f.stmts(&[lp]);
    f.set_body(body);
    let mut g = AsmGen::new();
    assert!(compile_to_ir(&mut f.ctx, &mut g, f.module));

    let ops = opcodes(&g);
    assert!(ops.contains(&IrOp::DJNZ), "expected a djnz loop: {:?}", ops);
    // the explicit compare disappeared into the decrement
    assert!(!ops.contains(&IrOp::CMPS));
    assert!(!ops.contains(&IrOp::CMP));
}

#[test]
fn call_to_tiny_function_is_inlined() {
    let mut f = fixture();
    make_public(&mut f);
    // helper: sets the module variable x
    let helper = f.ctx.new_function(f.module, "poke", Language::Spin1);
    let x = f.var("x", None);
    let seven = f.int(7);
    let s = f.assign(x, seven);
    let hbody = f.stmts(&[s]);
    f.ctx.func_mut(helper).body = Some(hbody);
    let table = f.ctx.module(f.module).objsyms;
    f.ctx
        .syms
        .add(
            table,
            "poke",
            SymbolKind::Function,
            SymVal::Func(helper),
            None,
        )
        .unwrap();

    let callee = f.ctx.ast_ident("poke");
    let call = f.ctx.new_ast(AstKind::FuncCall, Some(callee), None);
    let body = f.stmts(&[call]);
    f.set_body(body);
    // make the call site count visible to the unused-function sweep
    crate::hloptimize::do_high_level_optimize(&mut f.ctx, f.module);

    let mut g = AsmGen::new();
    assert!(compile_to_ir(&mut f.ctx, &mut g, f.module));
    let ops = opcodes(&g);
    assert!(!ops.contains(&IrOp::CALL), "call should be inline: {:?}", ops);
    assert!(ops.contains(&IrOp::MOVE));
}

#[test]
fn while_loop_shape() {
    // while (a > 0) { a := a - 1 }  (a is a module register)
    let mut f = fixture();
    make_public(&mut f);
    let a = f.var("a", None);
    let zero = f.int(0);
    let cond = f.op(Op::Gt, a, zero);
    let one = f.int(1);
    let a2 = f.ctx.ast_ident("a");
    let dec = f.ctx.ast_op(Op::Sub, Some(a2), Some(one));
    let a3 = f.ctx.ast_ident("a");
    let s = f.ctx.ast_assign(a3, dec);
    let loop_body = f.stmts(&[s]);
    let wh = f.ctx.new_ast(AstKind::While, Some(cond), Some(loop_body));
    let body = f.stmts(&[wh]);
    f.set_body(body);
    let mut g = AsmGen::new();
    assert!(compile_to_ir(&mut f.ctx, &mut g, f.module));

    let ops = opcodes(&g);
    // a loop: a compare, a conditional exit or entry jump, a subtract,
    // and a back edge in some arrangement
    assert!(ops.contains(&IrOp::CMPS));
    assert!(ops.contains(&IrOp::SUB));
    assert!(ops.iter().any(|&o| o == IrOp::JUMP || o == IrOp::DJNZ));
}

#[test]
fn unused_private_functions_are_not_emitted() {
    let mut f = fixture();
    make_public(&mut f);
    let x = f.var("x", None);
    let one = f.int(1);
    let s = f.assign(x, one);
    let body = f.stmts(&[s]);
    f.set_body(body);
    // a private function nobody calls
    let unused = f.ctx.new_function(f.module, "forgotten", Language::Spin1);
    let y = f.var("y", None);
    let two = f.int(2);
    let s2 = f.assign(y, two);
    let ubody = f.stmts(&[s2]);
    f.ctx.func_mut(unused).body = Some(ubody);

    crate::hloptimize::do_high_level_optimize(&mut f.ctx, f.module);
    let mut g = AsmGen::new();
    assert!(compile_to_ir(&mut f.ctx, &mut g, f.module));

    // only the public function's label appears
    let mut labels = Vec::new();
    let mut cur = g.program.head;
    while let Some(id) = cur {
        if g.sp[id].opc == IrOp::LABEL {
            labels.push(g.ops[g.sp[id].dst.unwrap()].name.to_string());
        }
        cur = g.sp[id].next();
    }
    assert!(labels.iter().any(|l| l == "run"));
    assert!(!labels.iter().any(|l| l == "forgotten"));
    // and the warning was issued
    assert!(f.ctx.diags.warnings > 0);
}

#[test]
fn globals_are_emitted_sorted_with_strings_in_hub() {
    let mut f = fixture();
    make_public(&mut f);
    let zebra = f.var("zebra", None);
    let apple = f.var("apple", None);
    let hello = f.ctx.ast_string("hi");
    let s1 = f.assign(zebra, hello);
    let one = f.int(1);
    let s2 = f.assign(apple, one);
    let body = f.stmts(&[s1, s2]);
    f.set_body(body);
    let mut g = AsmGen::new();
    assert!(compile_to_ir(&mut f.ctx, &mut g, f.module));
    emit_globals(&mut f.ctx, &mut g);

    let mut names = Vec::new();
    let mut saw_string = false;
    let mut cur = g.program.head;
    while let Some(id) = cur {
        if g.sp[id].opc == IrOp::LABEL {
            names.push(g.ops[g.sp[id].dst.unwrap()].name.to_string());
        }
        if g.sp[id].opc == IrOp::STRING {
            saw_string = true;
        }
        cur = g.sp[id].next();
    }
    assert!(saw_string);
    let apple_pos = names.iter().position(|n| n == "apple");
    let zebra_pos = names.iter().position(|n| n == "zebra");
    assert!(apple_pos.is_some() && zebra_pos.is_some());
    assert!(apple_pos < zebra_pos);
}
