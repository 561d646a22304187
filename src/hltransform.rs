//! High-level transforms run on every function before any backend pass:
//! reference decay, assignment simplification (chains, compound operators,
//! side-effect extraction, range assignments, oversized conditionals,
//! `va_arg`), logical-operator rewriting, counted-repeat lowering, case
//! lowering, and debug/print lowering.

use crate::ast::util::{dup_ast, Slot};
use crate::ast::{AstId, AstKind, Op};
use crate::cases::create_switch;
use crate::expr::{
    const_val, expr_has_side_effects, expr_type, is_array_type, is_bool_type, is_const_expr,
    is_float_type, is_identifier, is_int64_type, is_local_variable, is_ref_type, type_size,
    get_user_identifier_name, LONG_SIZE,
};
use crate::loops::transform_count_repeat;
use crate::module::FuncId;
use crate::printdebug::{lower_print, lower_print_debug};
use crate::Ctx;

#[derive(Clone, Copy, PartialEq, Eq)]
enum RefUse {
    Plain,
    AddrOf,
    IncDec(Op),
}

/// Reference decay: an identifier of reference type decays to `*id`,
/// except directly under address-of (where `@id` is just `id`) and under
/// the reference increment/decrement forms, which first step the pointer
/// itself.
fn fix_references(ctx: &mut Ctx, slot: Slot, incdec: RefUse) {
    let ast = match slot.get(ctx) {
        Some(a) => a,
        None => return,
    };
    match ctx.ast.kind(ast) {
        AstKind::Identifier | AstKind::LocalIdentifier => {
            let typ = expr_type(ctx, ast);
            if is_ref_type(ctx, typ) {
                if incdec == RefUse::AddrOf {
                    return;
                }
                let typ = typ.unwrap();
                let save = ctx.report_as(Some(ast));
                let stepped = match incdec {
                    RefUse::IncDec(op) => {
                        let lowered = match op {
                            Op::RefPostDec => ctx.ast_op(Op::Decrement, Some(ast), None),
                            Op::RefPostInc => ctx.ast_op(Op::Increment, Some(ast), None),
                            Op::RefPreDec => ctx.ast_op(Op::Decrement, None, Some(ast)),
                            Op::RefPreInc => ctx.ast_op(Op::Increment, None, Some(ast)),
                            _ => {
                                ctx.internal_error(Some(ast), "unknown reference op");
                                ast
                            }
                        };
                        lowered
                    }
                    _ => ast,
                };
                let basetype = ctx.ast.left(typ);
                let memref = ctx.new_ast(AstKind::MemRef, basetype, Some(stepped));
                let zero = ctx.ast_int(0);
                let deref = ctx.new_ast(AstKind::ArrayRef, Some(memref), Some(zero));
                slot.set(ctx, Some(deref));
                ctx.report_done(save);
            }
            return;
        }
        AstKind::AssignInit => {
            // the LHS keeps its reference; we are binding it
            fix_references(ctx, Slot::right(ast), incdec);
            return;
        }
        AstKind::Operator => {
            let op = ctx.ast.op_of(ast);
            if matches!(
                op,
                Op::RefPreInc | Op::RefPreDec | Op::RefPostInc | Op::RefPostDec
            ) {
                let on_left = ctx.ast.left(ast);
                let target = on_left.or_else(|| ctx.ast.right(ast));
                let typ = target.and_then(|t| expr_type(ctx, t));
                if !is_ref_type(ctx, typ) {
                    ctx.error(Some(ast), "Applying [++] or [--] to a non-pointer");
                } else {
                    fix_references(ctx, Slot::left(ast), RefUse::IncDec(op));
                    fix_references(ctx, Slot::right(ast), RefUse::IncDec(op));
                    let replacement = ctx.ast.left(ast).or_else(|| ctx.ast.right(ast));
                    slot.set(ctx, replacement);
                    return;
                }
            }
        }
        AstKind::AddrOf | AstKind::AbsAddrOf => {
            let typ = ctx.ast.left(ast).and_then(|l| expr_type(ctx, l));
            if is_ref_type(ctx, typ) {
                fix_references(ctx, Slot::left(ast), RefUse::AddrOf);
                let inner = ctx.ast.left(ast);
                slot.set(ctx, inner);
                return;
            }
        }
        _ => {}
    }
    fix_references(ctx, Slot::left(ast), incdec);
    fix_references(ctx, Slot::right(ast), incdec);
}

/// Pull side effects out of an lvalue so it can be evaluated twice.
/// Fresh temporaries replace any array index or memory address whose
/// computation has side effects; the extracted assignments accumulate in
/// `preseq` as a `Sequence`.
pub fn extract_side_effects(ctx: &mut Ctx, expr: AstId, preseq: &mut Option<AstId>) -> AstId {
    match ctx.ast.kind(expr) {
        AstKind::ArrayRef | AstKind::MemRef => {
            if let Some(index) = ctx.ast.right(expr) {
                if expr_has_side_effects(ctx, index) {
                    let save = ctx.report_as(Some(expr));
                    let temp = ctx.temp_local_variable("_temp_", None);
                    let sideexpr = ctx.ast_assign(temp, index);
                    ctx.ast.set_right(expr, Some(temp));
                    *preseq = match *preseq {
                        Some(p) => Some(ctx.new_ast(AstKind::Sequence, Some(p), Some(sideexpr))),
                        None => Some(sideexpr),
                    };
                    ctx.report_done(save);
                }
            }
            if let Some(base) = ctx.ast.left(expr) {
                if expr_has_side_effects(ctx, base)
                    && ctx.ast.kind(expr) == AstKind::ArrayRef
                    && ctx.ast.kind(base) != AstKind::MemRef
                {
                    let save = ctx.report_as(Some(expr));
                    let typ = expr_type(ctx, base);
                    let temp = ctx.temp_local_variable("_arr_", typ);
                    let sideexpr = ctx.ast_assign(temp, base);
                    ctx.ast.set_left(expr, Some(temp));
                    *preseq = match *preseq {
                        Some(p) => Some(ctx.new_ast(AstKind::Sequence, Some(p), Some(sideexpr))),
                        None => Some(sideexpr),
                    };
                    ctx.report_done(save);
                }
            }
            if let Some(base) = ctx.ast.left(expr) {
                let new_base = extract_side_effects(ctx, base, preseq);
                ctx.ast.set_left(expr, Some(new_base));
            }
        }
        _ => {}
    }
    expr
}

/// `x.byte[N] := Y` on a 4-byte local becomes a bit-range assignment so
/// the register backends can use shift-and-mask instead of memory.
pub fn check_simple_arrayref(ctx: &mut Ctx, ast: AstId) -> Option<AstId> {
    if ctx.opts.traditional_bytecode() {
        return None;
    }
    let left = ctx.ast.left(ast)?;
    if ctx.ast.kind(left) != AstKind::MemRef {
        return None;
    }
    let indexpr = ctx.ast.right(ast)?;
    if !is_const_expr(ctx, indexpr) {
        return None;
    }
    let index = const_val(ctx, indexpr)?;
    let typ = ctx.ast.left(left)?;
    let mut id = ctx.ast.right(left)?;
    if ctx.ast.kind(id) != AstKind::AddrOf {
        return None;
    }
    id = ctx.ast.left(id)?;
    let subtype = expr_type(ctx, id);
    if is_array_type(ctx, subtype) {
        return None;
    }
    if !is_identifier(ctx, id) || !is_local_variable(ctx, id) || type_size(ctx, subtype) != 4 {
        return None;
    }
    let (shift, bits) = if typ == ctx.types.word && index < 2 {
        (index * 16, 16)
    } else if typ == ctx.types.byte && index < 4 {
        (index * 8, 8)
    } else {
        return None;
    };
    let save = ctx.report_as(Some(ast));
    let hi = ctx.ast_int(shift + bits - 1);
    let lo = ctx.ast_int(shift);
    let range = ctx.new_ast(AstKind::Range, Some(hi), Some(lo));
    let newexpr = ctx.new_ast(AstKind::RangeRef, Some(id), Some(range));
    ctx.report_done(save);
    Some(newexpr)
}

fn is_bool_op(op: Op) -> bool {
    match op {
        Op::BoolOr | Op::BoolAnd | Op::BoolXor => true,
        _ => false,
    }
}

/// Watch out for Spin1 function calls masquerading as plain identifiers.
fn wrap_spin1_funccall(ctx: &mut Ctx, ast: AstId) {
    let rhs = match ctx.ast.right(ast) {
        Some(r) => r,
        None => return,
    };
    let f = match ctx.cur_func {
        Some(f) => f,
        None => return,
    };
    if ctx.func(f).language == crate::Language::Spin1 && ctx.ast.kind(rhs) == AstKind::Identifier {
        let typ = expr_type(ctx, rhs);
        if crate::expr::is_function_type(ctx, typ) {
            let call = ctx.new_ast(AstKind::FuncCall, Some(rhs), None);
            ctx.ast.set_right(ast, Some(call));
        }
    }
}

/// Rewrite `a := b := expr` into `(tmp := expr, b := tmp, a := tmp)`.
/// Returns the value node (`tmp`) that represents the chain's result.
fn transform_assign_chain_no_casts(ctx: &mut Ctx, slot: Slot) -> Option<AstId> {
    let ast = slot.get(ctx)?;
    if ctx.ast.kind(ast) != AstKind::Assign {
        return None;
    }
    wrap_spin1_funccall(ctx, ast);
    let lhs = ctx.ast.left(ast)?;
    let rhs = ctx.ast.right(ast)?;
    if ctx.ast.kind(rhs) != AstKind::Assign {
        match ctx.ast.kind(rhs) {
            AstKind::Identifier | AstKind::LocalIdentifier | AstKind::Float | AstKind::Integer => {
                Some(rhs)
            }
            _ => {
                let save = ctx.report_as(Some(rhs));
                let tmp = ctx.temp_local_variable("_temp_", None);
                let first = ctx.ast_assign(tmp, rhs);
                let second = ctx.ast_assign(lhs, tmp);
                let newseq = ctx.new_ast(AstKind::Sequence, Some(first), Some(second));
                slot.set(ctx, Some(newseq));
                ctx.report_done(save);
                Some(tmp)
            }
        }
    } else {
        let tmp = transform_assign_chain_no_casts(ctx, Slot::right(ast))?;
        let save = ctx.report_as(Some(rhs));
        let inner = ctx.ast.right(ast);
        let second = ctx.ast_assign(lhs, tmp);
        let newseq = ctx.new_ast(AstKind::Sequence, inner, Some(second));
        slot.set(ctx, Some(newseq));
        ctx.report_done(save);
        Some(tmp)
    }
}

/// The cast-friendly chain form: `a := b := expr` becomes
/// `(b := expr, a := b)`, returning the original LHS as the value. Some
/// emitters want the LHS back rather than a temporary.
fn transform_assign_chain_with_casts(ctx: &mut Ctx, slot: Slot) -> Option<AstId> {
    let ast = slot.get(ctx)?;
    if ctx.ast.kind(ast) != AstKind::Assign {
        return None;
    }
    wrap_spin1_funccall(ctx, ast);
    let lhs = ctx.ast.left(ast)?;
    let rhs = ctx.ast.right(ast)?;
    if ctx.ast.kind(rhs) != AstKind::Assign {
        Some(lhs)
    } else {
        let tmp = transform_assign_chain_with_casts(ctx, Slot::right(ast))?;
        let save = ctx.report_as(Some(ast));
        let inner = ctx.ast.right(ast);
        let second = ctx.ast_assign(lhs, tmp);
        let newseq = ctx.new_ast(AstKind::Sequence, inner, Some(second));
        slot.set(ctx, Some(newseq));
        ctx.report_done(save);
        Some(lhs)
    }
}

fn ast_typed_assign_stmt(ctx: &mut Ctx, var: AstId, val: AstId, typ: AstId) -> AstId {
    let cast = ctx.new_ast(AstKind::Cast, Some(typ), Some(val));
    let assign = ctx.ast_assign(var, cast);
    ctx.ast_stmt(assign)
}

/// Bit-range assignment lowering: `base[hi..lo] := src` becomes a masked
/// shift-and-merge on the whole register.
pub fn transform_range_assign(ctx: &mut Ctx, dst: AstId, src: AstId, _toplevel: bool) -> AstId {
    let base = match ctx.ast.left(dst) {
        Some(b) => b,
        None => {
            ctx.internal_error(Some(dst), "range reference with no base");
            return dst;
        }
    };
    let range = match ctx.ast.right(dst) {
        Some(r) if ctx.ast.kind(r) == AstKind::Range => r,
        _ => {
            ctx.internal_error(Some(dst), "expected a range");
            return dst;
        }
    };
    let save = ctx.report_as(Some(dst));
    let result = build_range_assign(ctx, base, range, src);
    ctx.report_done(save);
    result
}

fn range_shape(ctx: &mut Ctx, range: AstId) -> Option<(AstId, i64)> {
    let first = ctx.ast.left(range)?;
    match ctx.ast.right(range) {
        None => Some((first, 1)),
        Some(second) => {
            let (hi, lo) = match (const_val(ctx, first), const_val(ctx, second)) {
                (Some(a), Some(b)) => {
                    if a < b {
                        (b, a)
                    } else {
                        (a, b)
                    }
                }
                _ => {
                    ctx.error(Some(range), "bit range bounds must be constant");
                    return None;
                }
            };
            let lo_node = ctx.ast_int(lo);
            Some((lo_node, hi - lo + 1))
        }
    }
}

fn build_range_assign(ctx: &mut Ctx, base: AstId, range: AstId, src: AstId) -> AstId {
    let (lo, nbits) = match range_shape(ctx, range) {
        Some(s) => s,
        None => return ctx.ast_assign(base, src),
    };
    if nbits >= 32 {
        return ctx.ast_assign(base, src);
    }
    let mask = (1i64 << nbits) - 1;
    let maskval = ctx.ast_int(mask);
    let masked = ctx.ast_op(Op::BitAnd, Some(src), Some(maskval));
    let masked = crate::expr::fold_if_const(ctx, masked);
    let shifted = ctx.ast_op(Op::Shl, Some(masked), Some(lo));
    let shifted = crate::expr::fold_if_const(ctx, shifted);
    let maskval2 = ctx.ast_int(mask);
    let shifted_mask = ctx.ast_op(Op::Shl, Some(maskval2), Some(lo));
    let shifted_mask = crate::expr::fold_if_const(ctx, shifted_mask);
    let inverted = ctx.ast_op(Op::BitNot, None, Some(shifted_mask));
    let inverted = crate::expr::fold_if_const(ctx, inverted);
    let base_dup = dup_ast(&mut ctx.ast, Some(base));
    let kept = ctx.ast_op(Op::BitAnd, base_dup, Some(inverted));
    let merged = ctx.ast_op(Op::BitOr, Some(kept), Some(shifted));
    ctx.ast_assign(base, merged)
}

/// Bit-range read: `(base >> lo) & mask`.
pub fn transform_range_use(ctx: &mut Ctx, src: AstId) -> AstId {
    let base = match ctx.ast.left(src) {
        Some(b) => b,
        None => return src,
    };
    let range = match ctx.ast.right(src) {
        Some(r) if ctx.ast.kind(r) == AstKind::Range => r,
        _ => {
            ctx.internal_error(Some(src), "expected a range");
            return src;
        }
    };
    let save = ctx.report_as(Some(src));
    let out = match range_shape(ctx, range) {
        Some((lo, nbits)) if nbits < 32 => {
            let mask = (1i64 << nbits) - 1;
            let shifted = ctx.ast_op(Op::Shr, Some(base), Some(lo));
            let shifted = crate::expr::fold_if_const(ctx, shifted);
            let maskval = ctx.ast_int(mask);
            let anded = ctx.ast_op(Op::BitAnd, Some(shifted), Some(maskval));
            crate::expr::fold_if_const(ctx, anded)
        }
        _ => base,
    };
    ctx.report_done(save);
    out
}

/// The main assignment-simplification walk.
pub fn do_simplify_assignments(ctx: &mut Ctx, slot: Slot, insert_casts: bool, at_top: bool) {
    let mut ast = match slot.get(ctx) {
        Some(a) => a,
        None => return,
    };
    let mut lhs_top = at_top;
    let mut rhs_top = at_top;
    match ctx.ast.kind(ast) {
        AstKind::VaArg => {
            // va_arg(a, T) -> (tmp = *(T *)a; a += sizeof(T); tmp)
            lhs_top = false;
            rhs_top = false;
            let typ = ctx.ast.left(ast);
            let lhs = ctx.ast.right(ast);
            if let (Some(typ), Some(lhs)) = (typ, lhs) {
                let siz = type_size(ctx, Some(typ));
                let save = ctx.report_as(Some(ast));
                let tmp = ctx.temp_local_variable("_arg_", Some(typ));
                let sizval = ctx.ast_int(i64::from(siz));
                let lhs2 = dup_ast(&mut ctx.ast, Some(lhs));
                let bump = ctx.ast_op(Op::Add, lhs2, Some(sizval));
                let advance = ctx.ast_assign(lhs, bump);
                let chain = ctx.new_ast(AstKind::Sequence, Some(advance), Some(tmp));
                let ptrtype = ctx.new_ast(AstKind::PtrType, Some(typ), None);
                let lhs3 = dup_ast(&mut ctx.ast, Some(lhs));
                let cast = ctx.new_ast(AstKind::Cast, Some(ptrtype), lhs3);
                let zero = ctx.ast_int(0);
                let deref = ctx.new_ast(AstKind::ArrayRef, Some(cast), Some(zero));
                let load = ctx.ast_assign(tmp, deref);
                let chain = ctx.new_ast(AstKind::Sequence, Some(load), Some(chain));
                slot.set(ctx, Some(chain));
                ctx.report_done(save);
                ast = chain;
            }
        }
        AstKind::Sequence | AstKind::StmtList | AstKind::Other => {
            lhs_top = true;
            rhs_top = true;
        }
        AstKind::Assign => {
            lhs_top = false;
            rhs_top = false;
        }
        AstKind::ExprList => {
            lhs_top = false;
        }
        AstKind::CaseItem | AstKind::While | AstKind::DoWhile => {
            lhs_top = false;
            rhs_top = true;
        }
        AstKind::Comment | AstKind::CommentedNode => {
            // no change to level status
        }
        AstKind::CondResult => {
            let typ = expr_type(ctx, ast);
            if type_size(ctx, typ) > LONG_SIZE {
                let mut typ = typ.unwrap();
                let save = ctx.report_as(Some(ast));
                if is_array_type(ctx, Some(typ)) {
                    typ = crate::expr::array_to_pointer_type(ctx, typ);
                }
                let cond = ctx.ast.left(ast);
                let branches = ctx.ast.right(ast);
                let ifcond = branches.and_then(|b| ctx.ast.left(b));
                let elsecond = branches.and_then(|b| ctx.ast.right(b));
                let tempvar = ctx.temp_local_variable("_temp_", Some(typ));
                let then_stmt =
                    ifcond.map(|e| ast_typed_assign_stmt(ctx, tempvar, e, typ));
                let else_stmt =
                    elsecond.map(|e| ast_typed_assign_stmt(ctx, tempvar, e, typ));
                let thenelse = ctx.new_ast(AstKind::ThenElse, then_stmt, else_stmt);
                let newif = ctx.new_ast(AstKind::If, cond, Some(thenelse));
                let tail = ctx.ast_stmt(tempvar);
                let first = ctx.ast_stmt(newif);
                ctx.ast.set_right(first, Some(tail));
                slot.set(ctx, Some(first));
                ctx.report_done(save);
                ast = first;
            }
            lhs_top = true;
            rhs_top = true;
        }
        _ => {
            lhs_top = false;
            rhs_top = false;
        }
    }

    do_simplify_assignments(ctx, Slot::left(ast), insert_casts, lhs_top);
    do_simplify_assignments(ctx, Slot::right(ast), insert_casts, rhs_top);

    if ctx.ast.kind(ast) == AstKind::AssignInit {
        let typ = ctx.ast.left(ast).and_then(|l| expr_type(ctx, l));
        if is_ref_type(ctx, typ) {
            if let Some(rhs) = ctx.ast.right(ast) {
                let already_ref = ctx.ast.kind(rhs) == AstKind::Cast
                    && is_ref_type(ctx, ctx.ast.left(rhs));
                if !already_ref {
                    let typ = typ.unwrap();
                    let addr = ctx.new_ast(AstKind::AddrOf, Some(rhs), None);
                    let cast = ctx.new_ast(AstKind::Cast, Some(typ), Some(addr));
                    ctx.ast.set_right(ast, Some(cast));
                }
            }
        }
        ctx.ast[ast].kind = AstKind::Assign;
    }

    if ctx.ast.kind(ast) == AstKind::Assign {
        simplify_one_assignment(ctx, slot, ast, insert_casts, at_top);
        ast = match slot.get(ctx) {
            Some(a) => a,
            None => return,
        };
    }

    if ctx.ast.kind(ast) == AstKind::Operator {
        rewrite_logical_ops(ctx, slot, ast);
    }
}

fn simplify_one_assignment(
    ctx: &mut Ctx,
    slot: Slot,
    ast: AstId,
    insert_casts: bool,
    at_top: bool,
) {
    let op = ctx.ast.op_of(ast);
    let mut lhs = match ctx.ast.left(ast) {
        Some(l) => l,
        None => return,
    };
    let mut rhs = ctx.ast.right(ast);
    let size = type_size(ctx, expr_type(ctx, lhs));

    if is_const_expr(ctx, lhs) {
        if is_identifier(ctx, lhs) {
            let name = get_user_identifier_name(ctx, lhs);
            let msg = format!("assignment to constant `{}'", name);
            ctx.error(Some(ast), &msg);
        } else {
            ctx.error(Some(ast), "assignment to constant value");
        }
    }

    if ctx.ast.kind(lhs) == AstKind::ExprList {
        // multiple assignment must be the pure form; the arity cannot be
        // checked yet because type inference has not run
        if op != Op::Assign {
            ctx.error(Some(ast), "Multiple assignment with modification not permitted");
            return;
        }
    } else if op != Op::Assign || size > LONG_SIZE {
        let mut change = false;
        let mut preseq: Option<AstId> = None;
        let save = ctx.report_as(Some(ast));
        // if the RHS has side effects, evaluate it once up front
        if let Some(r) = rhs {
            if expr_has_side_effects(ctx, r) && !ctx.opts.traditional_bytecode() {
                let newr = extract_side_effects(ctx, r, &mut preseq);
                if newr != r || preseq.is_some() {
                    change = true;
                }
                rhs = Some(newr);
            }
        }
        let lhs_effects = expr_has_side_effects(ctx, lhs);
        if (lhs_effects || is_bool_op(op)) && !ctx.opts.traditional_bytecode() {
            let spin_lang = ctx
                .cur_func
                .map(|f| ctx.func(f).language.is_spin())
                .unwrap_or(false);
            if spin_lang {
                if let Some(r) = rhs {
                    if !is_const_expr(ctx, r) {
                        // Spin requires strict evaluation order
                        let temp = ctx.temp_local_variable("_temp_", None);
                        let p2 = ctx.ast_assign(temp, r);
                        preseq = match preseq {
                            Some(p) => {
                                Some(ctx.new_ast(AstKind::Sequence, Some(p), Some(p2)))
                            }
                            None => Some(p2),
                        };
                        rhs = Some(temp);
                        change = true;
                    }
                }
            }
            let newl = extract_side_effects(ctx, lhs, &mut preseq);
            if newl != lhs {
                change = true;
            }
            lhs = newl;
        }
        let mut newast = ast;
        if op == Op::Assign {
            if change {
                newast = ctx.ast_assign(lhs, rhs.unwrap_or(lhs));
            }
        } else {
            newast = match rhs {
                Some(r) => {
                    let lhs2 = dup_ast(&mut ctx.ast, Some(lhs)).unwrap();
                    let val = ctx.ast_op(op, Some(lhs2), Some(r));
                    ctx.ast_assign(lhs, val)
                }
                None => {
                    let lhs2 = dup_ast(&mut ctx.ast, Some(lhs)).unwrap();
                    let val = ctx.ast_op(op, None, Some(lhs2));
                    ctx.ast_assign(lhs, val)
                }
            };
        }
        if let Some(p) = preseq {
            newast = ctx.new_ast(AstKind::Sequence, Some(p), Some(newast));
        }
        ctx.report_done(save);
        slot.set(ctx, Some(newast));
    }

    // special cases like local.byte[N] := X with N constant
    let ast = match slot.get(ctx) {
        Some(a) => a,
        None => return,
    };
    if ctx.ast.kind(ast) == AstKind::Assign {
        if let Some(l) = ctx.ast.left(ast) {
            if ctx.ast.kind(l) == AstKind::ArrayRef {
                if let Some(newexpr) = check_simple_arrayref(ctx, l) {
                    ctx.ast.set_left(ast, Some(newexpr));
                }
            }
        }
        // range assignments become masked shift-and-merge
        if let Some(l) = ctx.ast.left(ast) {
            if ctx.ast.kind(l) == AstKind::RangeRef && ctx.ast.op_of(ast) == Op::Assign {
                if let Some(r) = ctx.ast.right(ast) {
                    let lowered = transform_range_assign(ctx, l, r, at_top);
                    ctx.ast.overwrite(ast, lowered);
                }
            }
        }
    }

    if !at_top {
        let ast = match slot.get(ctx) {
            Some(a) => a,
            None => return,
        };
        if ctx.ast.kind(ast) != AstKind::Assign {
            return;
        }
        let typ = expr_type(ctx, ast);
        let need_transform = if type_size(ctx, typ) > LONG_SIZE {
            true
        } else if ctx.opts.traditional_bytecode() {
            insert_casts
        } else {
            !insert_casts
        };
        if need_transform {
            let tmp = if insert_casts {
                transform_assign_chain_with_casts(ctx, slot)
            } else {
                transform_assign_chain_no_casts(ctx, slot)
            };
            if let Some(tmp) = tmp {
                // make sure the chain's value is the final expression
                let cur = slot.get(ctx);
                let seq = ctx.new_ast(AstKind::Sequence, cur, Some(tmp));
                slot.set(ctx, Some(seq));
            }
        }
    }
}

/// `LogicAnd`/`LogicOr`/`LogicXor` do not short-circuit. When the RHS has
/// side effects they become bitwise operations over operands normalized
/// to 0/1 by comparing with zero; otherwise the short-circuit forms are
/// just as good.
fn rewrite_logical_ops(ctx: &mut Ctx, _slot: Slot, ast: AstId) {
    let op = ctx.ast.op_of(ast);
    match op {
        Op::LogicAnd | Op::LogicOr | Op::LogicXor => {
            let rhs_effects = ctx
                .ast
                .right(ast)
                .map(|r| expr_has_side_effects(ctx, r))
                .unwrap_or(false);
            if rhs_effects {
                let keep_native = ctx.opts.traditional_bytecode() && op != Op::LogicXor;
                if !keep_native {
                    let save = ctx.report_as(Some(ast));
                    let zero_l = ctx.ast_int(0);
                    let zero_r = ctx.ast_int(0);
                    let l = ctx.ast.left(ast);
                    let r = ctx.ast.right(ast);
                    let norm_l = ctx.ast_op(Op::Ne, l, Some(zero_l));
                    let norm_r = ctx.ast_op(Op::Ne, r, Some(zero_r));
                    ctx.ast.set_left(ast, Some(norm_l));
                    ctx.ast.set_right(ast, Some(norm_r));
                    let newop = match op {
                        Op::LogicXor => Op::BitXor,
                        Op::LogicAnd => Op::BitAnd,
                        _ => Op::BitOr,
                    };
                    ctx.ast.set_op(ast, newop);
                    ctx.report_done(save);
                }
            } else {
                let newop = match op {
                    Op::LogicXor => Op::BoolXor,
                    Op::LogicAnd => Op::BoolAnd,
                    _ => Op::BoolOr,
                };
                ctx.ast.set_op(ast, newop);
            }
        }
        Op::Increment | Op::Decrement => {
            lower_wide_incdec(ctx, ast, op);
        }
        _ => {}
    }
}

/// `++`/`--` on floats, 64-bit integers and booleans become explicit
/// `i := i + 1` (with a saved temporary for the postfix form).
fn lower_wide_incdec(ctx: &mut Ctx, ast: AstId, op: Op) {
    let newop = if op == Op::Decrement { Op::Sub } else { Op::Add };
    if let Some(target) = ctx.ast.left(ast) {
        // postfix: i++ -> (tmp = i, i = i+1, tmp)
        let typ = expr_type(ctx, target);
        if typ.is_some()
            && (is_float_type(ctx, typ) || is_int64_type(ctx, typ) || is_bool_type(ctx, typ))
        {
            let save = ctx.report_as(Some(ast));
            let temp = ctx.temp_local_variable("_temp_", typ);
            let target2 = dup_ast(&mut ctx.ast, Some(target));
            let saved = ctx.ast_assign(temp, target);
            let one = ctx.ast_int(1);
            let target3 = dup_ast(&mut ctx.ast, Some(target));
            let bump = ctx.ast_op(newop, target3, Some(one));
            let update = ctx.ast_assign(target2.unwrap(), bump);
            let seq = ctx.new_ast(AstKind::Sequence, Some(saved), Some(update));
            let whole = ctx.new_ast(AstKind::Sequence, Some(seq), Some(temp));
            ctx.ast.overwrite(ast, whole);
            ctx.report_done(save);
        }
    } else if let Some(ident) = ctx.ast.right(ast) {
        let typ = expr_type(ctx, ident);
        if typ.is_some()
            && (is_float_type(ctx, typ) || is_int64_type(ctx, typ) || is_bool_type(ctx, typ))
        {
            let save = ctx.report_as(Some(ast));
            let one = ctx.ast_int(1);
            let ident2 = dup_ast(&mut ctx.ast, Some(ident));
            let bump = ctx.ast_op(newop, ident2, Some(one));
            ctx.ast[ast].kind = AstKind::Assign;
            ctx.ast.set_op(ast, Op::Assign);
            ctx.ast.set_left(ast, Some(ident));
            ctx.ast.set_right(ast, Some(bump));
            ctx.report_done(save);
        }
    }
}

/// Lower statement-level constructs the frontends leave in sugar form:
/// counted repeats, `case`, PRINT and DEBUG.
fn lower_statements(ctx: &mut Ctx, slot: Slot) {
    let ast = match slot.get(ctx) {
        Some(a) => a,
        None => return,
    };
    lower_statements(ctx, Slot::left(ast));
    lower_statements(ctx, Slot::right(ast));
    match ctx.ast.kind(ast) {
        AstKind::CountRepeat => {
            let lowered = transform_count_repeat(ctx, ast);
            if lowered != ast {
                ctx.ast.overwrite(ast, lowered);
            }
        }
        AstKind::Case => {
            create_switch(ctx, ast);
        }
        AstKind::Print => {
            lower_print(ctx, slot, ast);
        }
        AstKind::PrintDebug => {
            lower_print_debug(ctx, slot, ast);
        }
        _ => {}
    }
}

fn func_num_results(ctx: &Ctx, typ: Option<AstId>) -> i32 {
    let typ = match typ {
        Some(t) => t,
        None => return 1,
    };
    match ctx.ast.kind(typ) {
        AstKind::VoidType => 0,
        AstKind::TupleType => {
            crate::ast::util::list_len(&ctx.ast, ctx.ast.left(typ)) as i32
        }
        _ => 1,
    }
}

/// The per-function transform entry point. Frontends call this for every
/// function before any backend-specific work.
pub fn do_hl_transforms(ctx: &mut Ctx, func: FuncId) {
    let save_func = ctx.set_current_function(Some(func));
    let save_mod = ctx.set_current_module(Some(ctx.func(func).module));

    // correct the function's result count from its type
    let overall = ctx.func(func).overall_type;
    let n = func_num_results(ctx, overall);
    if ctx.func(func).num_results != n {
        ctx.func_mut(func).num_results = n;
    }

    fix_references(ctx, Slot::FuncBody(func), RefUse::Plain);
    let insert_casts = !ctx.func(func).language.is_spin();
    do_simplify_assignments(ctx, Slot::FuncBody(func), insert_casts, true);
    lower_statements(ctx, Slot::FuncBody(func));

    ctx.set_current_module(save_mod);
    ctx.set_current_function(save_func);
}
