//! High-level (AST) optimization driver: constant-condition dead-code
//! removal and the unused-function sweep.

use crate::ast::util::get_effective_node;
use crate::ast::{AstId, AstKind};
use crate::expr::{const_val, is_const_expr, is_identifier, lookup_ast_symbol};
use crate::module::ModId;
use crate::symbol::SymVal;
use crate::{Ctx, OPT_DEADCODE, OPT_REMOVE_UNUSED_FUNCS};

/// Remove statically-dead branches: an `if` with a constant condition is
/// replaced by the live arm.
pub fn remove_dead_code(ctx: &mut Ctx, body: Option<AstId>) {
    let body = match body {
        Some(b) => b,
        None => return,
    };
    if ctx.ast.kind(body) == AstKind::If {
        let cond = ctx.ast.left(body);
        if let Some(cond) = cond {
            if is_const_expr(ctx, cond) {
                let val = const_val(ctx, cond).unwrap_or(0);
                let thenelse = get_effective_node(&ctx.ast, ctx.ast.right(body));
                if let Some(te) = thenelse {
                    let newbody = if val != 0 {
                        ctx.ast.left(te)
                    } else {
                        ctx.ast.right(te)
                    };
                    match newbody {
                        Some(nb) => {
                            ctx.ast.overwrite(body, nb);
                            remove_dead_code(ctx, Some(body));
                        }
                        None => {
                            // no live arm; leave an empty shell
                            ctx.ast.set_left(te, None);
                            ctx.ast.set_right(te, None);
                        }
                    }
                }
                return;
            }
        }
    }
    remove_dead_code(ctx, ctx.ast.left(body));
    remove_dead_code(ctx, ctx.ast.right(body));
}

fn count_call_sites(ctx: &mut Ctx, module: ModId) {
    let funcs = ctx.module(module).functions.clone();
    for &f in &funcs {
        ctx.func_mut(f).call_sites = 0;
    }
    for &f in &funcs {
        let body = ctx.func(f).body;
        ctx.set_current_function(Some(f));
        scan_calls(ctx, body);
    }
}

fn scan_calls(ctx: &mut Ctx, ast: Option<AstId>) {
    let ast = match ast {
        Some(a) => a,
        None => return,
    };
    if ctx.ast.kind(ast) == AstKind::FuncCall {
        if let Some(callee) = ctx.ast.left(ast) {
            if is_identifier(ctx, callee) {
                if let Some(sym) = lookup_ast_symbol(ctx, callee) {
                    if let SymVal::Func(f) = ctx.syms.sym(sym).val {
                        ctx.func_mut(f).call_sites += 1;
                    }
                }
            }
        }
    }
    scan_calls(ctx, ctx.ast.left(ast));
    scan_calls(ctx, ctx.ast.right(ast));
}

/// The AST-level optimization pass, run after the transforms and CSE.
pub fn do_high_level_optimize(ctx: &mut Ctx, module: ModId) {
    let save_mod = ctx.set_current_module(Some(module));
    let save_func = ctx.cur_func;
    let funcs = ctx.module(module).functions.clone();
    for f in funcs.iter().copied() {
        ctx.set_current_function(Some(f));
        if ctx.func(f).optimize_flags & OPT_DEADCODE != 0 {
            let body = ctx.func(f).body;
            remove_dead_code(ctx, body);
        }
    }
    count_call_sites(ctx, module);
    for f in funcs {
        let fd = ctx.func(f);
        if fd.optimize_flags & OPT_REMOVE_UNUSED_FUNCS != 0
            && fd.call_sites == 0
            && !fd.is_public()
        {
            let msg = format!("function {} is not used", ctx.func(f).user_name);
            ctx.warning(None, &msg);
        }
    }
    ctx.set_current_function(save_func);
    ctx.set_current_module(save_mod);
}
