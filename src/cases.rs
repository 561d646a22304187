//! `case` lowering.
//!
//! A `Case` node (scrutinee on the left, a statement list of `CaseItem`
//! entries with an optional `Other` on the right) is rewritten either to a
//! dense `CaseTable` — when every label is a single compile-time constant,
//! the default comes last, and the value range is compact enough for a
//! jump table — or to an if/else chain threading the scrutinee through a
//! temporary.

use crate::ast::util::{add_to_list, get_effective_node};
use crate::ast::{AstId, AstKind, Op, Payload};
use crate::expr::{const_val, is_const_expr};
use crate::Ctx;

struct CaseInfo {
    /// `(labels, body)` per item; labels empty for `Other`.
    items: Vec<(Vec<AstId>, Option<AstId>)>,
    other: Option<AstId>,
    other_last: bool,
}

fn collect_items(ctx: &mut Ctx, ast: AstId) -> Option<CaseInfo> {
    let mut info = CaseInfo {
        items: Vec::new(),
        other: None,
        other_last: false,
    };
    let mut list = ctx.ast.right(ast);
    while let Some(l) = list {
        if ctx.ast.kind(l) != AstKind::StmtList {
            ctx.internal_error(Some(l), "expected statement list in case");
            return None;
        }
        let item = get_effective_node(&ctx.ast, ctx.ast.left(l));
        if let Some(item) = item {
            match ctx.ast.kind(item) {
                AstKind::CaseItem => {
                    let mut labels = Vec::new();
                    let mut expr = ctx.ast.left(item);
                    while let Some(e) = expr {
                        if ctx.ast.kind(e) == AstKind::ExprList {
                            if let Some(val) = ctx.ast.left(e) {
                                labels.push(val);
                            }
                            expr = ctx.ast.right(e);
                        } else {
                            labels.push(e);
                            expr = None;
                        }
                    }
                    info.items.push((labels, ctx.ast.right(item)));
                    info.other_last = false;
                }
                AstKind::Other => {
                    info.other = ctx.ast.left(item).or_else(|| ctx.ast.right(item));
                    info.other_last = true;
                }
                AstKind::Comment => {}
                _ => {
                    ctx.internal_error(Some(item), "expected case item");
                    return None;
                }
            }
        }
        list = ctx.ast.right(l);
    }
    Some(info)
}

/// Span a dense table may cover relative to the number of labels.
const DENSE_SLACK: i64 = 8;

fn dense_candidate(ctx: &Ctx, info: &CaseInfo) -> Option<(i64, i64)> {
    if info.other.is_some() && !info.other_last {
        return None;
    }
    let mut minval = i64::max_value();
    let mut maxval = i64::min_value();
    let mut count = 0i64;
    for (labels, _) in &info.items {
        for &l in labels {
            if ctx.ast.kind(l) == AstKind::Range {
                return None;
            }
            let v = const_val(ctx, l)?;
            minval = minval.min(v);
            maxval = maxval.max(v);
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    let span = maxval - minval + 1;
    if span > 2 * count + DENSE_SLACK || span > 256 {
        return None;
    }
    Some((minval, maxval))
}

fn build_dense_table(ctx: &mut Ctx, ast: AstId, info: &CaseInfo, minval: i64) {
    // canonical dense form: CaseTable with the scrutinee on the left, the
    // items in source order on the right, the default last, and the
    // minimum label value in the payload
    let scrutinee = ctx.ast.left(ast);
    let mut list: Option<AstId> = None;
    for (labels, body) in &info.items {
        for &l in labels {
            let v = const_val(ctx, l).unwrap_or(0);
            let label = ctx.ast_int(v);
            let item = ctx.new_ast(AstKind::CaseItem, Some(label), *body);
            let stmt = ctx.ast_stmt(item);
            list = add_to_list(&mut ctx.ast, list, Some(stmt));
        }
    }
    if let Some(other) = info.other {
        let item = ctx.new_ast(AstKind::Other, Some(other), None);
        let stmt = ctx.ast_stmt(item);
        list = add_to_list(&mut ctx.ast, list, Some(stmt));
    }
    let table = ctx.new_ast(AstKind::CaseTable, scrutinee, list);
    ctx.ast[table].payload = Payload::Int(minval);
    ctx.ast.overwrite(ast, table);
}

fn label_test(ctx: &mut Ctx, var: AstId, label: AstId) -> AstId {
    if ctx.ast.kind(label) == AstKind::Range {
        let lo = ctx.ast.left(label);
        let hi = ctx.ast.right(label);
        let range = ctx.new_ast(AstKind::Range, lo, hi);
        ctx.new_ast(AstKind::IsBetween, Some(var), Some(range))
    } else {
        ctx.ast_op(Op::Eq, Some(var), Some(label))
    }
}

fn build_if_chain(ctx: &mut Ctx, ast: AstId, info: &CaseInfo) {
    let scrutinee = match ctx.ast.left(ast) {
        Some(s) => s,
        None => {
            ctx.internal_error(Some(ast), "case with no expression");
            return;
        }
    };
    // thread the scrutinee through a temporary so it is evaluated once
    let var = ctx.temp_local_variable("_case_", None);
    let init = ctx.ast_assign(var, scrutinee);

    let mut chain: Option<AstId> = info.other.map(|o| wrap_stmtlist(ctx, o));
    for (labels, body) in info.items.iter().rev() {
        let mut cond: Option<AstId> = None;
        for &l in labels {
            let test = label_test(ctx, var, l);
            cond = match cond {
                Some(c) => Some(ctx.ast_op(Op::BoolOr, Some(c), Some(test))),
                None => Some(test),
            };
        }
        let cond = match cond {
            Some(c) => c,
            None => continue,
        };
        let body = body.map(|b| wrap_stmtlist(ctx, b));
        let thenelse = ctx.new_ast(AstKind::ThenElse, body, chain);
        let ifstmt = ctx.new_ast(AstKind::If, Some(cond), Some(thenelse));
        chain = Some(wrap_stmtlist(ctx, ifstmt));
    }

    // the whole case becomes { tmp := expr; if-chain }
    let init_stmt = ctx.ast_stmt(init);
    ctx.ast.set_right(init_stmt, chain);
    ctx.ast.overwrite(ast, init_stmt);
}

fn wrap_stmtlist(ctx: &mut Ctx, body: AstId) -> AstId {
    if ctx.ast.kind(body) == AstKind::StmtList {
        body
    } else {
        ctx.ast_stmt(body)
    }
}

/// Lower one `Case` node in place.
pub fn create_switch(ctx: &mut Ctx, ast: AstId) {
    let save = ctx.report_as(Some(ast));
    let info = match collect_items(ctx, ast) {
        Some(i) => i,
        None => {
            ctx.report_done(save);
            return;
        }
    };
    let scrutinee_const = ctx
        .ast
        .left(ast)
        .map(|s| is_const_expr(ctx, s))
        .unwrap_or(false);
    // a constant scrutinee always takes the chain; dead-code removal will
    // collapse it
    if !scrutinee_const && !ctx.opts.output.is_c_family() {
        if let Some((minval, _)) = dense_candidate(ctx, &info) {
            build_dense_table(ctx, ast, &info, minval);
            ctx.report_done(save);
            return;
        }
    }
    build_if_chain(ctx, ast, &info);
    ctx.report_done(save);
}
