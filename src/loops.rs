//! Loop handling: induction-variable analysis, invariant hoisting with
//! strength reduction, normalization of counted repeats into `for` loops,
//! and the count-down-to-zero rewrites that let the register backends form
//! `djnz` loops.

use crate::ast::util::{
    add_to_list, ast_match, ast_modifies_identifier, ast_uses, dup_ast, dup_ast_with_replace,
};
use crate::ast::{AstId, AstKind, Op};
use crate::expr::{
    const_val, expr_has_side_effects, expr_type, is_ast_temp_variable, is_const_expr,
    is_identifier, is_int_type, is_unsigned_type, lookup_ast_symbol, remove_type_modifiers,
    simple_optimize_expr, type_size,
};
use crate::module::ModId;
use crate::symbol::SymbolKind;
use crate::{Ctx, OPT_LOOP_BASIC, OPT_PERFORM_LOOPREDUCE};

const LVFLAG_CONDITIONAL: u32 = 0x01; // assignment is conditional
const LVFLAG_NESTED: u32 = 0x02; // assignment is nested in a loop
const LVFLAG_LOOPDEPEND: u32 = 0x04; // assigned value is loop dependent
const LVFLAG_LOOPUSED: u32 = 0x08; // variable is used in the loop
const LVFLAG_VARYMASK: u32 = 0xff; // any bit: depends on the loop

/// Strip the module-unique decoration before comparing names.
pub fn ast_match_name(ctx: &Ctx, mut a: Option<AstId>, mut b: Option<AstId>) -> bool {
    if let Some(x) = a {
        if ctx.ast.kind(x) == AstKind::LocalIdentifier {
            a = ctx.ast.left(x);
        }
    }
    if let Some(x) = b {
        if ctx.ast.kind(x) == AstKind::LocalIdentifier {
            b = ctx.ast.left(x);
        }
    }
    ast_match(ctx, a, b)
}

pub fn ast_uses_name(ctx: &Ctx, mut expr: Option<AstId>, mut name: Option<AstId>) -> bool {
    if let Some(x) = expr {
        if ctx.ast.kind(x) == AstKind::LocalIdentifier {
            expr = ctx.ast.left(x);
        }
    }
    if let Some(x) = name {
        if ctx.ast.kind(x) == AstKind::LocalIdentifier {
            name = ctx.ast.left(x);
        }
    }
    ast_uses(ctx, expr, name)
}

/// Per-variable knowledge gathered over one loop body. A single
/// assignment leaves `value` usable; multiple assignments just count.
struct LoopValueEntry {
    name: AstId,
    /// Last assigned value (only meaningful when `hits == 1`).
    value: Option<AstId>,
    /// Parent statement of the last assignment.
    parent: Option<AstId>,
    flags: u32,
    hits: u32,
    /// Per-iteration delta when strength reduction applies.
    loopstep: Option<AstId>,
    /// The induction variable `loopstep` is relative to.
    basename: Option<AstId>,
}

/// Ordered set of loop value entries. `valid` turns false on constructs
/// the analysis cannot model (goto, labels, POSTSET); every later
/// consumer must then abandon the analysis for this function.
pub struct LoopValueSet {
    entries: Vec<LoopValueEntry>,
    valid: bool,
}

impl LoopValueSet {
    pub fn new() -> LoopValueSet {
        LoopValueSet {
            entries: Vec::new(),
            valid: true,
        }
    }
}

fn find_name(ctx: &Ctx, lvs: &LoopValueSet, name: Option<AstId>) -> Option<usize> {
    lvs.entries
        .iter()
        .position(|e| ast_match_name(ctx, Some(e.name), name))
}

/// Record `name = value` (or a plain use when `value` is `None`).
fn add_assignment(
    ctx: &mut Ctx,
    lvs: &mut LoopValueSet,
    name: AstId,
    value: Option<AstId>,
    flags: u32,
    parent: Option<AstId>,
) -> Option<usize> {
    match ctx.ast.kind(name) {
        AstKind::ExprList => {
            // multiple assignment: treat every target as if a hardware
            // register had clobbered it
            let mut cur = Some(name);
            while let Some(c) = cur {
                if let Some(target) = ctx.ast.left(c) {
                    let hw = ctx.new_ast(AstKind::HwReg, None, None);
                    add_assignment(ctx, lvs, target, Some(hw), LVFLAG_VARYMASK, None);
                }
                cur = ctx.ast.right(c);
            }
            return None;
        }
        AstKind::ArrayRef | AstKind::MemRef | AstKind::HwReg | AstKind::RangeRef => {
            // array and memory updates stay out of the analysis
            return None;
        }
        AstKind::Identifier | AstKind::LocalIdentifier => {}
        _ => {
            lvs.valid = false;
            return None;
        }
    }
    if let Some(idx) = find_name(ctx, lvs, Some(name)) {
        if value.is_some() {
            let e = &mut lvs.entries[idx];
            e.hits += 1;
            e.value = value;
            e.parent = parent;
            e.flags |= flags;
        }
        return Some(idx);
    }
    lvs.entries.push(LoopValueEntry {
        name,
        value,
        parent,
        flags,
        hits: if value.is_some() { 1 } else { 0 },
        loopstep: None,
        basename: None,
    });
    Some(lvs.entries.len() - 1)
}

fn check_operator_for_assignment(
    ctx: &mut Ctx,
    lvs: &mut LoopValueSet,
    parent: Option<AstId>,
    ast: AstId,
    flags: u32,
) -> u32 {
    match ctx.ast.op_of(ast) {
        Op::Increment | Op::Decrement | Op::Random => {
            let name = ctx.ast.left(ast).or_else(|| ctx.ast.right(ast));
            if let Some(name) = name {
                add_assignment(ctx, lvs, name, Some(ast), flags, parent);
            }
            flags
        }
        Op::BoolOr | Op::BoolAnd => {
            // the RHS may not execute
            flags | LVFLAG_CONDITIONAL
        }
        _ => flags,
    }
}

/// Walk a statement (sub)tree collecting every assignment.
fn find_all_assignments(
    ctx: &mut Ctx,
    lvs: &mut LoopValueSet,
    parent: Option<AstId>,
    ast: Option<AstId>,
    flags: u32,
) {
    let ast = match ast {
        Some(a) => a,
        None => return,
    };
    let mut parent = parent;
    let mut flags = flags;
    match ctx.ast.kind(ast) {
        AstKind::Assign => {
            let lhs = ctx.ast.left(ast);
            let rhs = ctx.ast.right(ast);
            if let Some(lhs) = lhs {
                if add_assignment(ctx, lvs, lhs, rhs, flags, parent).is_some() {
                    find_all_assignments(ctx, lvs, parent, rhs, flags);
                    return;
                }
            }
        }
        AstKind::AddrOf | AstKind::AbsAddrOf => {
            if let Some(target) = ctx.ast.left(ast) {
                let hw = ctx.new_ast(AstKind::HwReg, None, None);
                add_assignment(ctx, lvs, target, Some(hw), LVFLAG_VARYMASK, None);
            }
        }
        AstKind::Operator => {
            flags = check_operator_for_assignment(ctx, lvs, parent, ast, flags);
        }
        AstKind::PostSet => {
            // the bytecode paths generate these; just give up
            lvs.valid = false;
        }
        AstKind::If | AstKind::Case | AstKind::Label => {
            flags |= LVFLAG_CONDITIONAL;
        }
        AstKind::Goto => {
            lvs.valid = false;
        }
        AstKind::While | AstKind::DoWhile | AstKind::For | AstKind::ForAtLeastOnce => {
            flags |= LVFLAG_NESTED;
        }
        AstKind::CommentedNode => {
            // keep the outer parent
        }
        AstKind::StmtList => {
            parent = Some(ast);
        }
        AstKind::Identifier | AstKind::LocalIdentifier => {
            // used before any assignment we have seen
            add_assignment(ctx, lvs, ast, None, flags | LVFLAG_LOOPUSED, None);
            return;
        }
        _ => {
            parent = Some(ast);
        }
    }
    find_all_assignments(ctx, lvs, parent, ctx.ast.left(ast), flags);
    find_all_assignments(ctx, lvs, parent, ctx.ast.right(ast), flags);
}

/// Conservatively: could this expression change from one iteration to the
/// next?
fn is_loop_dependent(ctx: &Ctx, lvs: &mut LoopValueSet, expr: Option<AstId>) -> bool {
    let expr = match expr {
        Some(e) => e,
        None => return false,
    };
    match ctx.ast.kind(expr) {
        AstKind::Integer => false,
        AstKind::Identifier | AstKind::LocalIdentifier => {
            let sym = match lookup_ast_symbol(ctx, expr) {
                Some(s) => s,
                None => return true,
            };
            match ctx.syms.sym(sym).kind {
                SymbolKind::Parameter
                | SymbolKind::Result
                | SymbolKind::LocalVar
                | SymbolKind::TempVar => {
                    let idx = match find_name(ctx, lvs, Some(expr)) {
                        Some(i) => i,
                        None => {
                            return ctx
                                .cur_func
                                .map(|f| ctx.func(f).local_address_taken())
                                .unwrap_or(false);
                        }
                    };
                    if lvs.entries[idx].value.is_none() {
                        return ctx
                            .cur_func
                            .map(|f| ctx.func(f).local_address_taken())
                            .unwrap_or(false);
                    }
                    if lvs.entries[idx].flags & LVFLAG_VARYMASK == 0 {
                        if lvs.entries[idx].hits > 1 {
                            return true;
                        }
                        // probe for circular dependencies: pretend this
                        // variable varies and see if its value then does
                        let saved = lvs.entries[idx].flags;
                        lvs.entries[idx].flags |= LVFLAG_LOOPDEPEND;
                        let value = lvs.entries[idx].value;
                        let r = is_loop_dependent(ctx, lvs, value);
                        lvs.entries[idx].flags = saved;
                        return r;
                    }
                    true
                }
                _ => true,
            }
        }
        AstKind::Operator => match ctx.ast.op_of(expr) {
            Op::Increment | Op::Decrement => true,
            _ => {
                is_loop_dependent(ctx, lvs, ctx.ast.left(expr))
                    || is_loop_dependent(ctx, lvs, ctx.ast.right(expr))
            }
        },
        AstKind::ArrayRef => {
            is_loop_dependent(ctx, lvs, ctx.ast.left(expr))
                || is_loop_dependent(ctx, lvs, ctx.ast.right(expr))
        }
        AstKind::AddrOf | AstKind::AbsAddrOf => {
            // the address of a variable is invariant even when the
            // variable is not
            let inner = match ctx.ast.left(expr) {
                Some(i) => i,
                None => return false,
            };
            if is_identifier(ctx, inner) {
                return false;
            }
            if ctx.ast.kind(inner) == AstKind::ArrayRef {
                if let Some(base) = ctx.ast.left(inner) {
                    if is_identifier(ctx, base) {
                        return is_loop_dependent(ctx, lvs, ctx.ast.right(inner));
                    }
                    if ctx.ast.kind(base) == AstKind::MemRef {
                        return is_loop_dependent(ctx, lvs, ctx.ast.right(inner))
                            || is_loop_dependent(ctx, lvs, Some(base));
                    }
                }
            }
            is_loop_dependent(ctx, lvs, Some(inner))
        }
        AstKind::MemRef => is_loop_dependent(ctx, lvs, ctx.ast.right(expr)),
        _ => true,
    }
}

fn element_size(ctx: &Ctx, typ: Option<AstId>) -> i32 {
    let typ = remove_type_modifiers(ctx, typ.or(Some(ctx.types.generic)));
    match typ {
        Some(t) if ctx.ast.kind(t) == AstKind::ArrayType => type_size(ctx, ctx.ast.left(t)),
        other => type_size(ctx, other),
    }
}

fn negate_of(ctx: &mut Ctx, val: AstId) -> AstId {
    ctx.ast_op(Op::Negate, None, Some(val))
}

/// Find the per-iteration delta of `val`, walking through single-assigned
/// intermediates. Sets `basename` to the induction variable the delta is
/// relative to.
fn find_loop_step(
    ctx: &mut Ctx,
    lvs: &LoopValueSet,
    val: AstId,
    basename: &mut Option<AstId>,
) -> Option<AstId> {
    match ctx.ast.kind(val) {
        AstKind::Identifier | AstKind::LocalIdentifier => {
            let mut newval = val;
            loop {
                let idx = find_name(ctx, lvs, Some(newval))?;
                if lvs.entries[idx].hits != 1 {
                    return None;
                }
                newval = lvs.entries[idx].value?;
                if !is_identifier(ctx, newval) {
                    break;
                }
            }
            if ast_uses_name(ctx, Some(newval), Some(val)) {
                let mut increment = None;
                if ctx.ast.kind(newval) == AstKind::Operator {
                    let op = ctx.ast.op_of(newval);
                    let left = ctx.ast.left(newval);
                    let right = ctx.ast.right(newval);
                    match op {
                        Op::Add => {
                            if ast_match_name(ctx, Some(val), left)
                                && right.map(|r| is_const_expr(ctx, r)).unwrap_or(false)
                            {
                                increment = right;
                            }
                        }
                        Op::Sub => {
                            if ast_match_name(ctx, Some(val), left)
                                && right.map(|r| is_const_expr(ctx, r)).unwrap_or(false)
                            {
                                increment = Some(negate_of(ctx, right.unwrap()));
                            }
                        }
                        Op::Increment => {
                            if ast_match_name(ctx, Some(val), left)
                                || ast_match_name(ctx, Some(val), right)
                            {
                                increment = Some(ctx.ast_int(1));
                            }
                        }
                        Op::Decrement => {
                            if ast_match_name(ctx, Some(val), left)
                                || ast_match_name(ctx, Some(val), right)
                            {
                                let one = ctx.ast_int(1);
                                increment = Some(negate_of(ctx, one));
                            }
                        }
                        _ => {}
                    }
                }
                if let Some(inc) = increment {
                    match *basename {
                        None => *basename = Some(val),
                        Some(b) => {
                            if !ast_match_name(ctx, Some(val), Some(b)) {
                                return None;
                            }
                        }
                    }
                    return Some(inc);
                }
                return None;
            }
            find_loop_step(ctx, lvs, newval, basename)
        }
        AstKind::AddrOf => {
            let inner = ctx.ast.left(val)?;
            if ctx.ast.kind(inner) != AstKind::ArrayRef {
                return None;
            }
            let arrayname = ctx.ast.left(inner)?;
            let elementsize;
            if ctx.ast.kind(arrayname) == AstKind::MemRef {
                elementsize = element_size(ctx, ctx.ast.left(arrayname));
            } else if is_identifier(ctx, arrayname) {
                let sym = lookup_ast_symbol(ctx, arrayname)?;
                let symdata = ctx.syms.sym(sym);
                match symdata.kind {
                    SymbolKind::Variable
                    | SymbolKind::TempVar
                    | SymbolKind::LocalVar
                    | SymbolKind::Parameter => {
                        let typ = match &symdata.val {
                            crate::symbol::SymVal::Type(t) => Some(*t),
                            _ => None,
                        };
                        elementsize = element_size(ctx, typ);
                    }
                    SymbolKind::Label => {
                        let typ = match &symdata.val {
                            crate::symbol::SymVal::Label { typ, .. } => *typ,
                            _ => None,
                        };
                        elementsize = element_size(ctx, typ);
                    }
                    _ => return None,
                }
            } else {
                return None;
            }
            let index = ctx.ast.right(inner)?;
            let loopstep = find_loop_step(ctx, lvs, index, basename)?;
            if !is_const_expr(ctx, loopstep) || basename.is_none() {
                return None;
            }
            let stepval = i64::from(elementsize) * const_val(ctx, loopstep)?;
            if stepval >= 0 {
                Some(ctx.ast_int(stepval))
            } else {
                let pos = ctx.ast_int(-stepval);
                Some(negate_of(ctx, pos))
            }
        }
        AstKind::Operator => {
            let op = ctx.ast.op_of(val);
            let left = ctx.ast.left(val)?;
            let right = ctx.ast.right(val)?;
            if op == Op::Mul {
                // CONST * index steps by CONST * delta each iteration
                let (constval, indexval) = if is_const_expr(ctx, left) {
                    (left, right)
                } else if is_const_expr(ctx, right) {
                    (right, left)
                } else {
                    return None;
                };
                let factor = const_val(ctx, constval)?;
                let loopstep = find_loop_step(ctx, lvs, indexval, basename)?;
                if !is_const_expr(ctx, loopstep) || basename.is_none() {
                    return None;
                }
                let stepval = factor * const_val(ctx, loopstep)?;
                if stepval >= 0 {
                    Some(ctx.ast_int(stepval))
                } else {
                    let pos = ctx.ast_int(-stepval);
                    Some(negate_of(ctx, pos))
                }
            } else if op == Op::Sub || op == Op::Add {
                if is_const_expr(ctx, right) {
                    let loopstep = find_loop_step(ctx, lvs, left, basename)?;
                    if !is_const_expr(ctx, loopstep) || basename.is_none() {
                        return None;
                    }
                    return Some(loopstep);
                }
                if is_const_expr(ctx, left) {
                    let loopstep = find_loop_step(ctx, lvs, right, basename)?;
                    if !is_const_expr(ctx, loopstep) || basename.is_none() {
                        return None;
                    }
                    if op == Op::Add {
                        return Some(loopstep);
                    }
                    return Some(negate_of(ctx, loopstep));
                }
                None
            } else {
                None
            }
        }
        _ => None,
    }
}

fn ast_uses_memory(ctx: &Ctx, ast: Option<AstId>) -> bool {
    let ast = match ast {
        Some(a) => a,
        None => return false,
    };
    match ctx.ast.kind(ast) {
        AstKind::MemRef | AstKind::ArrayRef => true,
        AstKind::ConstRef => false,
        AstKind::FuncCall | AstKind::Gosub => true,
        AstKind::Identifier | AstKind::LocalIdentifier => {
            let sym = match lookup_ast_symbol(ctx, ast) {
                Some(s) => s,
                None => return true,
            };
            match ctx.syms.sym(sym).kind {
                SymbolKind::TempVar
                | SymbolKind::Parameter
                | SymbolKind::Result
                | SymbolKind::LocalVar => ctx
                    .cur_func
                    .map(|f| ctx.func(f).local_address_taken())
                    .unwrap_or(false),
                _ => true,
            }
        }
        _ => {
            ast_uses_memory(ctx, ctx.ast.left(ast)) || ast_uses_memory(ctx, ctx.ast.right(ast))
        }
    }
}

fn mark_dependencies(ctx: &mut Ctx, lvs: &mut LoopValueSet) {
    // self-dependent and memory-based entries vary by definition
    for i in 0..lvs.entries.len() {
        let (name, value) = (lvs.entries[i].name, lvs.entries[i].value);
        if value.is_none() {
            continue;
        }
        if ast_uses_name(ctx, value, Some(name)) {
            lvs.entries[i].flags |= LVFLAG_LOOPDEPEND;
        }
        if ast_uses_memory(ctx, value) || ast_uses_memory(ctx, Some(name)) {
            lvs.entries[i].flags |= LVFLAG_LOOPDEPEND;
        }
    }
    let mut change = true;
    while change {
        change = false;
        for i in 0..lvs.entries.len() {
            if lvs.entries[i].flags & LVFLAG_VARYMASK == 0 {
                let value = lvs.entries[i].value;
                if is_loop_dependent(ctx, lvs, value) {
                    lvs.entries[i].flags |= LVFLAG_LOOPDEPEND;
                    change = true;
                }
            }
        }
    }
    // single-assigned varying entries may be strength-reducible
    for i in 0..lvs.entries.len() {
        if lvs.entries[i].hits == 1 && lvs.entries[i].flags & LVFLAG_VARYMASK != 0 {
            lvs.entries[i].basename = None;
            let value = lvs.entries[i].value;
            let mut basename = None;
            let loopstep = match value {
                Some(v) => find_loop_step(ctx, lvs, v, &mut basename),
                None => None,
            };
            lvs.entries[i].loopstep = loopstep;
            lvs.entries[i].basename = basename;
        }
    }
}

/// Insert an assignment after the statement held by `parent`.
fn place_assign_after(ctx: &mut Ctx, parent: Option<AstId>, assign: AstId) -> bool {
    let parent = match parent {
        Some(p) => p,
        None => return false,
    };
    match ctx.ast.kind(parent) {
        AstKind::StmtList => {
            let stmt = ctx.ast_stmt(assign);
            let old = ctx.ast.left(parent);
            let combined = ctx.new_ast(AstKind::StmtList, old, Some(stmt));
            ctx.ast.set_left(parent, Some(combined));
            true
        }
        AstKind::Sequence => {
            let stmt = ctx.new_ast(AstKind::Sequence, Some(assign), None);
            let old = ctx.ast.left(parent);
            let combined = ctx.new_ast(AstKind::Sequence, old, Some(stmt));
            ctx.ast.set_left(parent, Some(combined));
            true
        }
        _ => false,
    }
}

fn merge_and_free(ctx: &Ctx, initial: &mut LoopValueSet, lv: LoopValueSet) {
    for e2 in lv.entries {
        if let Some(idx) = find_name(ctx, initial, Some(e2.name)) {
            let orig = &mut initial.entries[idx];
            orig.value = e2.value;
            orig.parent = e2.parent;
            orig.flags |= e2.flags;
            orig.hits += e2.hits;
        } else {
            initial.entries.push(e2);
        }
    }
}

/// Pull loop-invariant assignments out of one loop body and strength-
/// reduce expressions linear in an induction variable. Returns the
/// statement list to run before the loop.
fn do_loop_strength_reduction(
    ctx: &mut Ctx,
    initial: &mut LoopValueSet,
    body: Option<AstId>,
    condition: Option<AstId>,
    update: Option<AstId>,
) -> Option<AstId> {
    let mut lv = LoopValueSet::new();
    find_all_assignments(ctx, &mut lv, body, body, 0);
    find_all_assignments(ctx, &mut lv, update, update, 0);
    find_all_assignments(ctx, &mut lv, None, condition, 0);
    mark_dependencies(ctx, &mut lv);
    if !lv.valid {
        return None;
    }
    let mut stmtlist: Option<AstId> = None;
    for i in 0..lv.entries.len() {
        let (name, value, parent, flags, hits) = {
            let e = &lv.entries[i];
            (e.name, e.value, e.parent, e.flags, e.hits)
        };
        if hits > 1 {
            continue;
        }
        let parent = match parent {
            Some(p) if ctx.ast.kind(p) == AstKind::StmtList => p,
            _ => continue,
        };
        let pullvalue;
        if flags & LVFLAG_VARYMASK != 0 {
            // varying, but maybe linear in a single induction variable
            let (loopstep, basename) = {
                let e = &lv.entries[i];
                (e.loopstep, e.basename)
            };
            let (loopstep, basename) = match (loopstep, basename) {
                (Some(s), Some(b)) => (s, b),
                _ => continue,
            };
            if !is_identifier(ctx, basename) {
                continue;
            }
            let init_idx = match find_name(ctx, initial, Some(basename)) {
                Some(idx) => idx,
                None => continue,
            };
            if initial.entries[init_idx].flags & LVFLAG_CONDITIONAL != 0 {
                continue;
            }
            let init_value = match initial.entries[init_idx].value {
                Some(v) => v,
                None => continue,
            };
            let last_idx = match find_name(ctx, &lv, Some(basename)) {
                Some(idx) => idx,
                None => continue,
            };
            if ast_match_name(ctx, Some(name), Some(basename)) {
                continue;
            }
            if flags & LVFLAG_LOOPUSED != 0 {
                continue;
            }
            if flags & LVFLAG_CONDITIONAL != 0 {
                continue;
            }
            let value = match value {
                Some(v) => v,
                None => continue,
            };
            pullvalue =
                dup_ast_with_replace(ctx, Some(value), Some(basename), Some(init_value));
            // the accumulator update goes right after the last update of
            // the induction variable it tracks
            let replace = if ctx.ast.kind(loopstep) == AstKind::Operator
                && ctx.ast.op_of(loopstep) == Op::Negate
            {
                let delta = ctx.ast.right(loopstep);
                let name2 = dup_ast(&mut ctx.ast, Some(name));
                let newval = ctx.ast_op(Op::Sub, name2, delta);
                ctx.ast_assign(name, newval)
            } else {
                let name2 = dup_ast(&mut ctx.ast, Some(name));
                let newval = ctx.ast_op(Op::Add, name2, Some(loopstep));
                ctx.ast_assign(name, newval)
            };
            let last_parent = lv.entries[last_idx].parent;
            if !place_assign_after(ctx, last_parent, replace) {
                continue;
            }
            ctx.ast.set_left(parent, None);
        } else {
            // invariant, but only compiler temporaries may move: hoisting
            // a user variable would assign it even for a zero-trip loop
            if !is_ast_temp_variable(ctx, name) {
                continue;
            }
            pullvalue = value;
            ctx.ast.set_left(parent, None); // erase the original statement
        }
        let pullvalue = match pullvalue {
            Some(v) => v,
            None => continue,
        };
        let assign = ctx.ast_assign(name, pullvalue);
        let stmt = ctx.ast_stmt(assign);
        stmtlist = add_to_list(&mut ctx.ast, stmtlist, Some(stmt));
    }
    merge_and_free(ctx, initial, lv);
    stmtlist
}

/// Optimize one loop: sub-loops first, then invariant hoisting.
fn do_loop_helper(
    ctx: &mut Ctx,
    lvs: &mut LoopValueSet,
    initial: Option<AstId>,
    condtest: Option<AstId>,
    update: Option<AstId>,
    body: Option<AstId>,
) -> Option<AstId> {
    if initial.is_some() {
        find_all_assignments(ctx, lvs, None, initial, 0);
    }
    if !lvs.valid {
        return None;
    }
    let mut sub = LoopValueSet::new();
    do_loop_optimize_list(ctx, &mut sub, body);
    let pull = do_loop_strength_reduction(ctx, lvs, body, condtest, update);
    find_all_assignments(ctx, lvs, None, body, 0);
    pull
}

/// `a <= b` becomes `a < b+1`, and `a <= b-1` becomes `a < b`; a plain
/// `<` limit is returned unchanged.
pub fn get_revised_limit(ctx: &mut Ctx, update_test_op: Op, old_limit: AstId) -> Option<AstId> {
    if is_const_expr(ctx, old_limit) || is_identifier(ctx, old_limit) {
        if update_test_op == Op::Le || update_test_op == Op::Leu {
            let one = ctx.ast_int(1);
            return Some(ctx.ast_op(Op::Add, Some(old_limit), Some(one)));
        }
        return Some(old_limit);
    }
    if update_test_op != Op::Le && update_test_op != Op::Leu {
        return None;
    }
    // only very simple expressions
    if ctx.ast.kind(old_limit) == AstKind::Operator && ctx.ast.op_of(old_limit) == Op::Sub {
        let left = ctx.ast.left(old_limit)?;
        let right = ctx.ast.right(old_limit)?;
        if !is_identifier(ctx, left) {
            return None;
        }
        if !is_const_expr(ctx, right) {
            return None;
        }
        let offset = const_val(ctx, right)?;
        if offset == 1 {
            return Some(left);
        }
        let adjusted = ctx.ast_int(offset - 1);
        ctx.ast.set_right(old_limit, Some(adjusted));
        return Some(old_limit);
    }
    None
}

fn for_loop_parts(
    ctx: &Ctx,
    stmt: AstId,
) -> (
    Option<AstId>, // initial
    Option<AstId>, // condtest
    AstId,         // updateparent (the Step node)
    Option<AstId>, // update
    Option<AstId>, // body
) {
    let initial = ctx.ast.left(stmt);
    let to = ctx.ast.right(stmt).unwrap();
    let condtest = ctx.ast.left(to);
    let updateparent = ctx.ast.right(to).unwrap();
    let update = ctx.ast.left(updateparent);
    let body = ctx.ast.right(updateparent);
    (initial, condtest, updateparent, update, body)
}

/// Recognize a count-down-to-zero loop with a `>` or `!=` test ending in
/// a decrement; rewrite `>` form to `!=` and, for `For`, add the guarded
/// do/while shape that preserves execute-at-least-once semantics.
fn check_simple_decrement_loop(ctx: &mut Ctx, stmt: AstId) -> bool {
    let (initial, condtest, _updateparent, update, _body) = for_loop_parts(ctx, stmt);
    let condtest = match condtest {
        Some(c) if ctx.ast.kind(c) == AstKind::Operator => c,
        _ => return false,
    };
    if expr_has_side_effects(ctx, condtest) {
        return false;
    }
    let test_op = ctx.ast.op_of(condtest);
    let mut update_var: Option<AstId> = None;
    if test_op == Op::Gt || test_op == Op::Gtu {
        update_var = ctx.ast.left(condtest);
        let uv = match update_var {
            Some(v) if is_identifier(ctx, v) => v,
            _ => return false,
        };
        let _ = uv;
        let limit = match ctx.ast.right(condtest) {
            Some(l) if is_const_expr(ctx, l) => l,
            _ => return false,
        };
        if const_val(ctx, limit) != Some(0) {
            return false;
        }
    } else if test_op != Op::Ne {
        return false;
    }

    // the update must end in a decrement of the loop variable
    let mut update = update;
    while let Some(u) = update {
        if ctx.ast.kind(u) != AstKind::Sequence {
            break;
        }
        if ast_uses_name(ctx, ctx.ast.right(u), update_var) {
            return false;
        }
        update = ctx.ast.left(u);
    }
    let update = match update {
        Some(u) if ctx.ast.kind(u) == AstKind::Operator => u,
        _ => return false,
    };
    if ctx.ast.op_of(update) != Op::Decrement {
        return false;
    }
    if !ast_match_name(ctx, ctx.ast.left(update), update_var)
        && !ast_match_name(ctx, ctx.ast.right(update), update_var)
    {
        return false;
    }

    if test_op == Op::Gtu {
        ctx.ast.set_op(condtest, Op::Ne);
        return true;
    }
    if ctx.ast.op_of(condtest) != Op::Ne {
        return false;
    }
    if ctx.ast.kind(stmt) == AstKind::For {
        // guard the whole loop so the at-least-once form stays correct:
        // if (initial test) { do { body } while (cond) }
        let newstmt = {
            let node = ctx.ast[stmt].clone();
            ctx.ast
                .alloc(AstKind::ForAtLeastOnce, None, node.right, node.payload, node.loc)
        };
        let inner = ctx.ast_stmt(newstmt);
        let thenelse = ctx.new_ast(AstKind::ThenElse, Some(inner), None);
        let test = dup_ast(&mut ctx.ast, Some(condtest));
        let skipif = ctx.new_ast(AstKind::If, test, Some(thenelse));
        let skipif_stmt = ctx.ast_stmt(skipif);
        let wrapper = ctx.new_ast(AstKind::StmtList, initial, Some(skipif_stmt));
        ctx.ast.overwrite(stmt, wrapper);
    }
    true
}

fn has_branch(ctx: &Ctx, body: Option<AstId>) -> bool {
    let body = match body {
        Some(b) => b,
        None => return false,
    };
    match ctx.ast.kind(body) {
        AstKind::Goto | AstKind::Gosub | AstKind::Label => true,
        _ => has_branch(ctx, ctx.ast.left(body)) || has_branch(ctx, ctx.ast.right(body)),
    }
}

/// `repeat i from 0 to N` whose induction variable is local, unused in
/// the body, and stepped by one becomes a count-down-to-zero loop.
fn check_simple_increment_loop(ctx: &mut Ctx, stmt: AstId) {
    let (initial, condtest, _updateparent, update, body) = for_loop_parts(ctx, stmt);

    let initial = match initial {
        Some(i) if ctx.ast.kind(i) == AstKind::Assign => i,
        _ => return,
    };
    let update_var = match ctx.ast.left(initial) {
        Some(v) if is_identifier(ctx, v) => v,
        _ => return,
    };
    let sym = match lookup_ast_symbol(ctx, update_var) {
        Some(s) => s,
        None => return,
    };
    match ctx.syms.sym(sym).kind {
        SymbolKind::Parameter | SymbolKind::Result | SymbolKind::LocalVar | SymbolKind::TempVar => {
            if ctx
                .cur_func
                .map(|f| ctx.func(f).local_address_taken())
                .unwrap_or(false)
            {
                return;
            }
            // all uses of the variable are visible to us
        }
        _ => {
            // memory-based variable, a call may modify it
            return;
        }
    }
    let update_init = match ctx.ast.right(initial) {
        Some(i) if is_const_expr(ctx, i) => i,
        _ => return,
    };
    let init_val = const_val(ctx, update_init).unwrap_or(0);

    let condtest = match condtest {
        Some(c) if ctx.ast.kind(c) == AstKind::Operator => c,
        _ => return,
    };
    let test_op = ctx.ast.op_of(condtest);
    let update_limit = match ctx.ast.right(condtest) {
        Some(l) => l,
        None => return,
    };
    let new_initial = match test_op {
        Op::Le | Op::Lt | Op::Leu | Op::Ltu => match get_revised_limit(ctx, test_op, update_limit) {
            Some(n) => n,
            None => return,
        },
        _ => return,
    };
    if !ast_match_name(ctx, Some(update_var), ctx.ast.left(condtest)) {
        return;
    }

    // check that the update is i++ and the variable is not used elsewhere
    let mut update = update;
    while let Some(u) = update {
        if ctx.ast.kind(u) != AstKind::Sequence {
            break;
        }
        if ast_uses_name(ctx, ctx.ast.right(u), Some(update_var)) {
            return;
        }
        update = ctx.ast.left(u);
    }
    let update = match update {
        Some(u) if ctx.ast.kind(u) == AstKind::Operator => u,
        _ => return,
    };
    if ctx.ast.op_of(update) != Op::Increment {
        return;
    }
    if !ast_match_name(ctx, ctx.ast.left(update), Some(update_var))
        && !ast_match_name(ctx, ctx.ast.right(update), Some(update_var))
    {
        return;
    }
    if ast_uses_name(ctx, body, Some(update_var)) {
        return;
    }
    if has_branch(ctx, body) {
        return;
    }

    // all checks passed: commit the rewrite, reporting against the update
    let save = ctx.report_as(Some(update));

    // a plain For needs a guard to skip the loop entirely
    let needs_skip = ctx.ast.kind(stmt) == AstKind::For;
    let skip_test = if needs_skip {
        let lhs = ctx.ast_int(init_val);
        let rhs = ctx.ast.right(condtest);
        let test = ctx.new_ast(AstKind::Operator, Some(lhs), rhs);
        let op = ctx.ast.op_of(condtest);
        ctx.ast.set_op(test, op);
        Some(test)
    } else {
        None
    };

    // flip the update to a decrement
    ctx.ast.set_op(update, Op::Decrement);

    // count from (limit - initial) down to zero
    let mut new_initial = new_initial;
    if init_val != 0 {
        let offs = ctx.ast_int(init_val);
        new_initial = ctx.ast_op(Op::Sub, Some(new_initial), Some(offs));
        new_initial = simple_optimize_expr(ctx, new_initial);
    }
    let initial = ctx.ast_assign(update_var, new_initial);
    let zero = ctx.ast_int(0);
    let condtest = ctx.ast_op(Op::Ne, Some(update_var), Some(zero));

    ctx.ast.set_left(stmt, Some(initial));
    let to = ctx.ast.right(stmt).unwrap();
    ctx.ast.set_left(to, Some(condtest));
    ctx.ast[stmt].kind = AstKind::ForAtLeastOnce;

    if let Some(test) = skip_test {
        let node = ctx.ast[stmt].clone();
        let newstmt = ctx
            .ast
            .alloc(node.kind, node.left, node.right, node.payload, node.loc);
        let inner = ctx.ast_stmt(newstmt);
        let thenelse = ctx.new_ast(AstKind::ThenElse, Some(inner), None);
        let ifskip = ctx.new_ast(AstKind::If, Some(test), Some(thenelse));
        ctx.ast.overwrite(stmt, ifskip);
    }
    ctx.report_done(save);
}

/// Optimize a statement list, tracking assignments so loop headers know
/// the initial values of their control variables.
fn do_loop_optimize_list(ctx: &mut Ctx, lvs: &mut LoopValueSet, list: Option<AstId>) {
    let mut list = list;
    while let Some(l) = list {
        let mut pull: Option<AstId> = None;
        if ctx.ast.kind(l) != AstKind::StmtList {
            ctx.internal_error(Some(l), "expected statement list");
        }
        let stmtptr = l;
        let mut stmt = ctx.ast.left(l);
        while let Some(s) = stmt {
            if ctx.ast.kind(s) != AstKind::CommentedNode {
                break;
            }
            stmt = ctx.ast.left(s);
        }
        if let Some(stmt) = stmt {
            match ctx.ast.kind(stmt) {
                AstKind::StmtList => {
                    do_loop_optimize_list(ctx, lvs, Some(stmt));
                }
                AstKind::While | AstKind::DoWhile => {
                    let condtest = ctx.ast.left(stmt);
                    let body = ctx.ast.right(stmt);
                    pull = do_loop_helper(ctx, lvs, None, condtest, None, body);
                }
                AstKind::For | AstKind::ForAtLeastOnce => {
                    let (initial, condtest, updateparent, update, body) =
                        for_loop_parts(ctx, stmt);
                    let save = ctx.report_as(initial);
                    let update = match update {
                        Some(u) if ctx.ast.kind(u) != AstKind::Sequence => {
                            let seq = ctx.new_ast(AstKind::Sequence, Some(u), None);
                            ctx.ast.set_left(updateparent, Some(seq));
                            Some(seq)
                        }
                        other => other,
                    };
                    pull = do_loop_helper(ctx, lvs, initial, condtest, update, body);
                    // when the hoisted code depends on the init variable it
                    // must stay glued to the initialization
                    if pull.is_some() {
                        if let Some(init) = ctx.ast.left(stmt) {
                            let mut depends = true;
                            if ctx.ast.kind(init) == AstKind::Assign {
                                if let Some(initvar) = ctx.ast.left(init) {
                                    if is_identifier(ctx, initvar)
                                        && !ast_uses(ctx, pull, Some(initvar))
                                    {
                                        depends = false;
                                    }
                                }
                            }
                            if depends {
                                let combined =
                                    ctx.new_ast(AstKind::Sequence, Some(init), pull);
                                ctx.ast.set_left(stmt, Some(combined));
                                pull = None;
                            }
                        }
                    }
                    // with invariants hoisted, try the djnz-friendly forms
                    if !check_simple_decrement_loop(ctx, stmt) {
                        check_simple_increment_loop(ctx, stmt);
                    }
                    ctx.report_done(save);
                }
                _ => {
                    find_all_assignments(ctx, lvs, Some(stmtptr), Some(stmt), 0);
                }
            }
        }
        list = ctx.ast.right(l);
        if let Some(pulled) = pull {
            // put the hoisted statements ahead of the loop
            let orig = ctx.ast.left(stmtptr);
            let stmt = ctx.new_ast(AstKind::StmtList, orig, None);
            let combined = add_to_list(&mut ctx.ast, Some(pulled), Some(stmt));
            ctx.ast.set_left(stmtptr, combined);
        }
    }
}

/// The non-reducing variant: only rewrite loop headers, never hoist.
fn do_basic_loop_optimization(ctx: &mut Ctx, list: Option<AstId>) {
    let mut list = list;
    while let Some(l) = list {
        if ctx.ast.kind(l) != AstKind::StmtList {
            return;
        }
        let mut stmt = ctx.ast.left(l);
        while let Some(s) = stmt {
            if ctx.ast.kind(s) != AstKind::CommentedNode {
                break;
            }
            stmt = ctx.ast.left(s);
        }
        if let Some(stmt) = stmt {
            match ctx.ast.kind(stmt) {
                AstKind::StmtList => do_basic_loop_optimization(ctx, Some(stmt)),
                AstKind::While | AstKind::DoWhile => {
                    do_basic_loop_optimization(ctx, ctx.ast.right(stmt));
                }
                AstKind::For | AstKind::ForAtLeastOnce => {
                    let (initial, _condtest, _updateparent, _update, body) =
                        for_loop_parts(ctx, stmt);
                    do_basic_loop_optimization(ctx, body);
                    let save = ctx.report_as(initial);
                    if !check_simple_decrement_loop(ctx, stmt) {
                        check_simple_increment_loop(ctx, stmt);
                    }
                    ctx.report_done(save);
                }
                AstKind::If => {
                    if let Some(branches) = ctx.ast.right(stmt) {
                        do_basic_loop_optimization(ctx, ctx.ast.left(branches));
                        do_basic_loop_optimization(ctx, ctx.ast.right(branches));
                    }
                }
                _ => {}
            }
        }
        list = ctx.ast.right(l);
    }
}

/// Loop optimization over a whole module.
pub fn perform_loop_optimization(ctx: &mut Ctx, module: ModId) {
    if ctx.opts.output.is_c_family() {
        return;
    }
    let save_mod = ctx.set_current_module(Some(module));
    let save_func = ctx.cur_func;
    let funcs = ctx.module(module).functions.clone();
    for f in funcs {
        ctx.set_current_function(Some(f));
        let opt = ctx.func(f).optimize_flags;
        let body = ctx.func(f).body;
        if opt & OPT_PERFORM_LOOPREDUCE != 0 {
            let skip = body
                .map(|b| {
                    let k = ctx.ast.kind(b);
                    k == AstKind::String || k == AstKind::Bytecode
                })
                .unwrap_or(true);
            if !skip {
                let mut lv = LoopValueSet::new();
                do_loop_optimize_list(ctx, &mut lv, body);
            }
        } else if opt & OPT_LOOP_BASIC != 0 {
            do_basic_loop_optimization(ctx, body);
        }
    }
    ctx.set_current_function(save_func);
    ctx.set_current_module(save_mod);
}

/// Trivially-true loop tests on narrow unsigned operands: the constant
/// bound exceeds anything the operand can hold.
fn loop_test_always_true(ctx: &Ctx, expr: AstId) -> bool {
    if ctx.ast.kind(expr) != AstKind::Operator {
        return false;
    }
    let right = match ctx.ast.right(expr) {
        Some(r) if is_const_expr(ctx, r) => r,
        _ => return false,
    };
    let left = match ctx.ast.left(expr) {
        Some(l) => l,
        None => return false,
    };
    let typ = expr_type(ctx, left);
    let siz = type_size(ctx, typ);
    if typ.is_none() || siz >= 4 {
        return false;
    }
    if !is_unsigned_type(ctx, typ) || !is_int_type(ctx, typ) {
        return false;
    }
    let op = ctx.ast.op_of(expr);
    if op != Op::Lt && op != Op::Ltu {
        return false;
    }
    let endval = const_val(ctx, right).unwrap_or(0);
    let maxval = if op == Op::Ltu {
        (1i64 << (8 * siz)) - 1
    } else {
        (1i64 << (8 * siz - 1)) - 1
    };
    endval > maxval
}

struct RepeatParts {
    loopvar: Option<AstId>,
    fromval: Option<AstId>,
    toval: AstId,
    stepval: Option<AstId>,
    body: Option<AstId>,
}

fn count_repeat_parts(ctx: &mut Ctx, ast: AstId) -> Option<RepeatParts> {
    let loopvar = ctx.ast.left(ast);
    let from = match ctx.ast.right(ast) {
        Some(f) if ctx.ast.kind(f) == AstKind::From => f,
        other => {
            ctx.internal_error(other, "expected FROM");
            return None;
        }
    };
    let fromval = ctx.ast.left(from);
    let to = match ctx.ast.right(from) {
        Some(t) if ctx.ast.kind(t) == AstKind::To => t,
        other => {
            ctx.internal_error(other, "expected TO");
            return None;
        }
    };
    let toval = ctx.ast.left(to)?;
    let step = match ctx.ast.right(to) {
        Some(s) if ctx.ast.kind(s) == AstKind::Step => s,
        other => {
            ctx.internal_error(other, "expected STEP");
            return None;
        }
    };
    let stepval = ctx.ast.left(step);
    let body = ctx.ast.right(step);
    Some(RepeatParts {
        loopvar,
        fromval,
        toval,
        stepval,
        body,
    })
}

fn seq(ctx: &mut Ctx, a: Option<AstId>, b: AstId) -> AstId {
    match a {
        Some(a) => ctx.new_ast(AstKind::Sequence, Some(a), Some(b)),
        None => b,
    }
}

/// Transform a counted repeat (`repeat i from F to T step K`) into an
/// explicit `for` with a normalized test. See the comments inline for the
/// many special cases; the prize is the count-down form that the IR
/// optimizer later turns into `djnz`.
pub fn transform_count_repeat(ctx: &mut Ctx, origast: AstId) -> AstId {
    let save = ctx.report_as(Some(origast));

    let parts = match count_repeat_parts(ctx, origast) {
        Some(p) => p,
        None => {
            ctx.report_done(save);
            return origast;
        }
    };
    let mut loopvar = parts.loopvar;
    if let Some(lv) = loopvar {
        match ctx.ast.kind(lv) {
            AstKind::Identifier | AstKind::LocalIdentifier | AstKind::Result => {}
            _ => {
                ctx.error(Some(origast), "Need a variable name for the loop");
                ctx.report_done(save);
                return origast;
            }
        }
    }
    let looptype = loopvar.and_then(|lv| expr_type(ctx, lv));
    let is_integer_loop = looptype.is_none() || is_int_type(ctx, looptype);
    let mut is_unsigned_loop = is_integer_loop && is_unsigned_type(ctx, looptype);

    let mut fromval = parts.fromval;
    let mut toval = parts.toval;
    let mut stepval = match parts.stepval {
        Some(s) => s,
        None => ctx.ast_int(1),
    };
    let body = parts.body;

    let mut known_step_val: i64 = 0;
    let mut known_step_dir: i64 = 0;
    if is_const_expr(ctx, stepval) {
        known_step_val = const_val(ctx, stepval).unwrap_or(0);
        if !is_integer_loop {
            known_step_dir = if known_step_val < 0 { -1 } else { 1 };
            known_step_val = 0;
        }
    }

    if ctx.opts.traditional_bytecode() {
        // the interpreter has native forms for these, leave them alone
        if loopvar.is_none() && known_step_val == 1 && fromval.is_none() && is_integer_loop {
            ctx.report_done(save);
            return origast;
        }
        if loopvar.is_some()
            && fromval.is_some()
            && is_integer_loop
            && (!is_unsigned_loop || type_size(ctx, looptype) <= 2)
        {
            ctx.report_done(save);
            return origast;
        }
    }

    let cur_lang_spin = ctx.cur_language().is_spin();
    if !cur_lang_spin {
        // only Spin walks backwards when from > to with a positive step
        if known_step_val != 0 {
            known_step_dir = if known_step_val > 0 { 1 } else { -1 };
        }
    }

    let mut test_op: Option<Op> = None;
    let mut loop_at_least_once = false;
    let mut initstmt: Option<AstId> = None;

    // a plain "repeat expr" counts from 0 up (C output) or from expr down
    if fromval.is_none() && is_integer_loop {
        if ctx.opts.output.is_c_family() && is_const_expr(ctx, toval) {
            // for (i = 0; i < n; i++) is the idiomatic form
            fromval = Some(ctx.ast_int(0));
            test_op = Some(if is_unsigned_loop { Op::Ltu } else { Op::Lt });
            known_step_dir = 1;
        } else {
            fromval = Some(toval);
            toval = ctx.ast_int(0);
            test_op = Some(if is_unsigned_loop { Op::Gtu } else { Op::Gt });
            known_step_dir = -1;
            if known_step_val == 1 {
                test_op = Some(Op::Ne);
            }
        }
    }

    if is_integer_loop {
        let fromconst = fromval.and_then(|f| const_val(ctx, f));
        let toconst = const_val(ctx, toval);
        if let (Some(fromi), Some(toi)) = (fromconst, toconst) {
            if known_step_dir == 0 {
                known_step_dir = if is_unsigned_loop {
                    if (fromi as u32) > (toi as u32) {
                        -1
                    } else {
                        1
                    }
                } else if fromi > toi {
                    -1
                } else {
                    1
                };
            }
            let reps = (toi - fromi) * known_step_dir;
            if reps >= 0 && !ctx.opts.output.is_c_family() {
                if fromi > 0 && toi > 0 && known_step_val == 1 {
                    is_unsigned_loop = true;
                }
                loop_at_least_once = true;
                if known_step_val == 1
                    && known_step_dir == 1
                    && !ast_uses(ctx, body, loopvar)
                    && !has_branch(ctx, body)
                {
                    // the loop runs exactly "reps" times and nobody reads
                    // the index: switch to counting down, with the real
                    // variable still left holding its final value
                    let local_var = loopvar
                        .and_then(|lv| lookup_ast_symbol(ctx, lv))
                        .map(|s| {
                            let k = ctx.syms.sym(s).kind;
                            k == SymbolKind::LocalVar || k == SymbolKind::TempVar
                        })
                        .unwrap_or(false);
                    if local_var {
                        let finalval = ctx.ast_int(toi + 1);
                        let lv = loopvar.unwrap();
                        initstmt = Some(ctx.ast_assign(lv, finalval));
                        loopvar = Some(ctx.temp_local_variable("_idx_", looptype));
                        let fromi2 = reps + 1;
                        known_step_dir = -1;
                        known_step_val = if cur_lang_spin { 1 } else { -1 };
                        stepval = ctx.ast_int(-1);
                        fromval = Some(ctx.ast_int(fromi2));
                        toval = ctx.ast_int(1);
                        is_unsigned_loop = true;
                    }
                }
            }
        } else if let Some(f) = fromval {
            // repeat i from @a to @b: the endpoints are unknown but the
            // difference may still be constant
            let delta = ctx.ast_op(Op::Sub, Some(toval), Some(f));
            if let Some(d) = const_val(ctx, delta) {
                known_step_dir = if d >= 0 { 1 } else { -1 };
            }
        }
    }

    // get a loop variable if the source didn't name one
    let loopvar = match loopvar {
        Some(lv) => lv,
        None => ctx.temp_local_variable("_idx_", looptype),
    };

    let fromval_known = fromval.unwrap_or(toval);
    if !is_const_expr(ctx, fromval_known) && ast_uses(ctx, Some(fromval_known), Some(loopvar)) {
        let initvar = ctx.temp_local_variable("_start_", looptype);
        let inner = ctx.ast_assign(initvar, fromval_known);
        initstmt = Some(ctx.ast_assign(loopvar, inner));
        fromval = Some(initvar);
    } else {
        let assign = ctx.ast_assign(loopvar, fromval_known);
        initstmt = Some(seq(ctx, initstmt, assign));
    }
    let fromval = fromval.unwrap_or(fromval_known);

    // pin the limit down if it could change inside the body
    let mut limitvar: Option<AstId> = None;
    if is_const_expr(ctx, toval) {
        if ctx.opts.expand_constants && is_integer_loop {
            let v = const_val(ctx, toval).unwrap_or(0);
            toval = ctx.ast_int(v);
        }
    } else if ctx.ast.kind(toval) == AstKind::Identifier
        && !ast_modifies_identifier(ctx, body, toval)
    {
        // toval is stable as-is
    } else {
        let lv = ctx.temp_local_variable("_limit_", looptype);
        limitvar = Some(lv);
        let assign = ctx.ast_assign(lv, toval);
        initstmt = Some(seq(ctx, initstmt, assign));
        toval = lv;
    }

    // resolve the step
    if known_step_val != 0 && known_step_dir != 0 {
        if known_step_dir < 0 && cur_lang_spin {
            if known_step_val < 0 {
                // Spin1 just terminates such loops early
                if ctx.cur_language() == crate::Language::Spin1 {
                    toval = fromval;
                }
            } else {
                stepval = negate_of(ctx, stepval);
                known_step_val = -known_step_val;
            }
        }
    } else {
        // direction is not statically known: compute the signed step once
        let stepvar = ctx.temp_local_variable("_step_", looptype);
        let mut op = if is_unsigned_loop { Op::Geu } else { Op::Ge };
        if known_step_dir < 0 {
            op = if is_unsigned_loop { Op::Ltu } else { Op::Lt };
        }
        let stepdir = if known_step_dir == 0 && known_step_val == 1 && op == Op::Ge {
            let diff = ctx.ast_op(Op::Sub, Some(toval), Some(fromval));
            let sh = ctx.ast_int(31);
            let sign = ctx.ast_op(Op::Sar, Some(diff), Some(sh));
            let one = ctx.ast_int(1);
            ctx.ast_op(Op::BitOr, Some(sign), Some(one))
        } else {
            let test = ctx.ast_op(op, Some(toval), Some(fromval));
            let neg = negate_of(ctx, stepval);
            let branches = ctx.new_ast(AstKind::ThenElse, Some(stepval), Some(neg));
            ctx.new_ast(AstKind::CondResult, Some(test), Some(branches))
        };
        let assign = ctx.ast_assign(stepvar, stepdir);
        initstmt = Some(seq(ctx, initstmt, assign));
        stepval = stepvar;
    }

    // build the update statement
    let mut stepstmt = None;
    if known_step_dir != 0 {
        if known_step_val == 1 && is_integer_loop {
            stepstmt = Some(ctx.ast_op(Op::Increment, Some(loopvar), None));
        } else if known_step_val == -1 && is_integer_loop {
            stepstmt = Some(ctx.ast_op(Op::Decrement, None, Some(loopvar)));
        } else if known_step_val < 0 {
            let amount = ctx.ast_int(-known_step_val);
            let sub = ctx.ast_op(Op::Sub, Some(loopvar), Some(amount));
            stepstmt = Some(ctx.ast_assign(loopvar, sub));
        }
    }
    let stepstmt = match stepstmt {
        Some(s) => s,
        None => {
            let add = ctx.ast_op(Op::Add, Some(loopvar), Some(stepval));
            ctx.ast_assign(loopvar, add)
        }
    };

    // build the condition test
    let mut condtest: Option<AstId> = None;
    if let Some(op) = test_op {
        if !is_unsigned_loop {
            condtest = Some(ctx.ast_op(op, Some(loopvar), Some(toval)));
        }
    }

    if condtest.is_none() && known_step_val == 1 {
        // raise the bound by one and test with != / <
        if is_const_expr(ctx, toval) {
            if known_step_dir != 0 {
                let adjust = if known_step_dir > 0 { Op::Add } else { Op::Sub };
                let one = ctx.ast_int(1);
                let adjusted = ctx.ast_op(adjust, Some(toval), Some(one));
                toval = simple_optimize_expr(ctx, adjusted);
            } else {
                let lv = match limitvar {
                    Some(lv) => lv,
                    None => ctx.temp_local_variable("_limit_", looptype),
                };
                limitvar = Some(lv);
                let sum = ctx.ast_op(Op::Add, Some(toval), Some(stepval));
                let sum = simple_optimize_expr(ctx, sum);
                let assign = ctx.ast_assign(lv, sum);
                initstmt = Some(seq(ctx, initstmt, assign));
                toval = lv;
            }
        } else {
            let lv = match limitvar {
                Some(lv) => lv,
                None => ctx.temp_local_variable("_limit_", looptype),
            };
            limitvar = Some(lv);
            let sum = ctx.ast_op(Op::Add, Some(toval), Some(stepval));
            let sum = simple_optimize_expr(ctx, sum);
            let assign = ctx.ast_assign(lv, sum);
            initstmt = Some(seq(ctx, initstmt, assign));
            toval = lv;
        }
        if known_step_dir > 0 {
            let op = if is_unsigned_loop { Op::Ltu } else { Op::Lt };
            condtest = Some(ctx.ast_op(op, Some(loopvar), Some(toval)));
        } else {
            condtest = Some(ctx.ast_op(Op::Ne, Some(loopvar), Some(toval)));
            if !ctx.opts.output.is_c_family() {
                loop_at_least_once = true;
            }
        }
    }

    // unsigned loops get special care at the wrap-around points
    if condtest.is_none() && is_unsigned_loop {
        if is_const_expr(ctx, toval) && known_step_dir != 0 {
            let to_i = const_val(ctx, toval).unwrap_or(0) as i32;
            if known_step_dir < 0 {
                condtest = Some(if to_i == 0 {
                    ctx.ast_op(Op::Leu, Some(loopvar), Some(fromval))
                } else if to_i == 1 && known_step_val == -1 {
                    let zero = ctx.ast_int(0);
                    ctx.ast_op(Op::Ne, Some(loopvar), Some(zero))
                } else {
                    ctx.ast_op(Op::Geu, Some(loopvar), Some(toval))
                });
            } else {
                condtest = Some(if to_i == -1 {
                    ctx.ast_op(Op::Geu, Some(loopvar), Some(fromval))
                } else {
                    ctx.ast_op(Op::Leu, Some(loopvar), Some(toval))
                });
            }
        } else {
            // destination unknown and stepping an unsigned variable
            let range = ctx.new_ast(AstKind::Range, Some(fromval), Some(toval));
            condtest = Some(ctx.new_ast(AstKind::IsBetween, Some(loopvar), Some(range)));
        }
    }

    let condtest = match condtest {
        Some(c) => c,
        None => {
            // fall back to testing between from and to
            let c = if is_integer_loop && known_step_dir != 0 && known_step_val != 0 {
                if known_step_val > 0 {
                    ctx.ast_op(Op::Le, Some(loopvar), Some(toval))
                } else {
                    ctx.ast_op(Op::Ge, Some(loopvar), Some(toval))
                }
            } else if known_step_dir > 0 {
                ctx.ast_op(Op::Le, Some(loopvar), Some(toval))
            } else if known_step_dir < 0 {
                ctx.ast_op(Op::Ge, Some(loopvar), Some(toval))
            } else {
                let range = ctx.new_ast(AstKind::Range, Some(fromval), Some(toval));
                ctx.new_ast(AstKind::IsBetween, Some(loopvar), Some(range))
            };
            if !ctx.opts.output.is_c_family() {
                loop_at_least_once = true;
            }
            c
        }
    };
    if loop_test_always_true(ctx, condtest) {
        ctx.warning(Some(origast), "Loop will never terminate");
    }

    let stepnode = ctx.new_ast(AstKind::Step, Some(stepstmt), body);
    let tonode = ctx.new_ast(AstKind::To, Some(condtest), Some(stepnode));
    let kind = if loop_at_least_once {
        AstKind::ForAtLeastOnce
    } else {
        AstKind::For
    };
    let forast = ctx.new_ast(kind, initstmt, Some(tonode));
    ctx.ast[forast].loc = ctx.ast[origast].loc;
    ctx.report_done(save);
    forast
}
