//! Common-subexpression elimination.
//!
//! Per function, a small hashed set tracks `(expression, assignment-site)`
//! pairs. The first occurrence of an eligible expression is pulled into a
//! fresh temporary whose assignment is flushed in front of the current
//! statement; later structurally-equal occurrences are replaced by the
//! temporary. Around loops the set doubles as the invariant-hoisting
//! engine: entries still valid across a loop body are planted before the
//! loop header.
//!
//! An entry used only once is retracted afterwards: the pulled-out
//! assignment is nullified and the first use restored, so single uses
//! never pay for a temporary.

use crate::ast::util::{add_to_list, ast_match, ast_uses, Slot};
use crate::ast::{AstId, AstKind, Op};
use crate::expr::{
    array_base_type, expr_type, is_const_expr, is_identifier, lookup_ast_symbol, type_size,
    LONG_SIZE,
};
use crate::loops::perform_loop_optimization;
use crate::module::ModId;
use crate::symbol::{symbol_hash, SymbolKind};
use crate::{Ctx, OutputKind, OPT_PERFORM_CSE};

const CSE_HASH_SIZE: usize = 32; // make this a power of two

const CSE_NO_REPLACE: u32 = 0x01; // do not perform CSE replacement
const CSE_NO_ADD: u32 = 0x02; // re-use is fine, but add nothing new

/// One possible common-subexpression replacement.
struct CseEntry {
    expr: AstId,
    /// The replacement expression (a temporary, or a memref through one).
    replace: Option<AstId>,
    expr_hash: u32,
    /// The pulled-out assignment statement.
    assign: Option<AstId>,
    /// Where the replacement was used first, for retraction.
    first_use: Option<Slot>,
    uses: u32,
}

pub struct CseSet {
    buckets: Vec<Vec<CseEntry>>,
    /// Assignments waiting to be flushed in front of the current statement.
    assign_list: Option<AstId>,
}

impl CseSet {
    pub fn new() -> CseSet {
        let mut buckets = Vec::with_capacity(CSE_HASH_SIZE);
        for _ in 0..CSE_HASH_SIZE {
            buckets.push(Vec::new());
        }
        CseSet {
            buckets,
            assign_list: None,
        }
    }
}

/// Hash a tree. Leaf hashes reuse the canonical symbol hash so the set
/// can be shared across stages.
fn ast_hash(ctx: &Ctx, ast: Option<AstId>) -> u32 {
    let ast = match ast {
        Some(a) => a,
        None => return 0,
    };
    let mut hash: u32 = match ctx.ast.kind(ast) {
        AstKind::Identifier | AstKind::String => ctx
            .ast
            .str_val(ast)
            .map(|s| symbol_hash(&s))
            .unwrap_or(0),
        AstKind::Symbol => ctx
            .ast
            .sym_val(ast)
            .map(|s| symbol_hash(&ctx.syms.sym(s).name))
            .unwrap_or(0),
        AstKind::Integer | AstKind::Float | AstKind::Operator => ctx.ast.int_val(ast) as u32,
        _ => 0,
    };
    hash = hash
        .wrapping_add(ctx.ast.kind(ast) as u32)
        .wrapping_add(hash.wrapping_shl(2))
        .wrapping_add(131u32.wrapping_mul(ast_hash(ctx, ctx.ast.left(ast))))
        .wrapping_add(65537u32.wrapping_mul(ast_hash(ctx, ctx.ast.right(ast))));
    hash
}

/// Retract an entry that never paid off: nullify the pulled assignment
/// and put the original expression back at its first use.
fn destroy_entry(ctx: &mut Ctx, entry: CseEntry) {
    let bytecode = ctx.opts.output == OutputKind::Bytecode;
    if entry.uses == 0 || (entry.uses == 1 && bytecode) {
        if let (Some(assign), Some(first_use)) = (entry.assign, entry.first_use) {
            ctx.ast.nullify(assign);
            first_use.set(ctx, Some(entry.expr));
        }
    }
}

fn clear_filtered(ctx: &mut Ctx, cse: &mut CseSet, filter: impl Fn(&Ctx, AstId) -> bool) {
    let mut removed = Vec::new();
    for bucket in cse.buckets.iter_mut() {
        let mut keep = Vec::new();
        for entry in bucket.drain(..) {
            if filter(ctx, entry.expr) {
                removed.push(entry);
            } else {
                keep.push(entry);
            }
        }
        *bucket = keep;
    }
    for entry in removed {
        destroy_entry(ctx, entry);
    }
}

fn clear_set(ctx: &mut Ctx, cse: &mut CseSet) {
    clear_filtered(ctx, cse, |_, _| true);
}

/// Could evaluating this expression read memory?
fn uses_memory(ctx: &Ctx, ast: Option<AstId>) -> bool {
    let ast = match ast {
        Some(a) => a,
        None => return false,
    };
    match ctx.ast.kind(ast) {
        AstKind::Operator => {
            uses_memory(ctx, ctx.ast.left(ast)) || uses_memory(ctx, ctx.ast.right(ast))
        }
        AstKind::ArrayRef | AstKind::MemRef => true,
        AstKind::Identifier | AstKind::LocalIdentifier => {
            let sym = match lookup_ast_symbol(ctx, ast) {
                Some(s) => s,
                None => return true, // assume the worst
            };
            match ctx.syms.sym(sym).kind {
                SymbolKind::Parameter | SymbolKind::Result | SymbolKind::LocalVar => {
                    // depends on the function configuration; punt and
                    // assume registers
                    false
                }
                SymbolKind::TempVar
                | SymbolKind::Constant
                | SymbolKind::Function
                | SymbolKind::FloatConstant => false,
                _ => true,
            }
        }
        AstKind::Symbol => {
            let sym = match ctx.ast.sym_val(ast) {
                Some(s) => s,
                None => return true,
            };
            match ctx.syms.sym(sym).kind {
                SymbolKind::TempVar
                | SymbolKind::Constant
                | SymbolKind::Function
                | SymbolKind::FloatConstant => false,
                _ => true,
            }
        }
        AstKind::AddrOf | AstKind::AbsAddrOf => false,
        AstKind::ConstRef | AstKind::Integer => false,
        _ => true,
    }
}

fn clear_memory_set(ctx: &mut Ctx, cse: &mut CseSet) {
    clear_filtered(ctx, cse, |c, e| uses_memory(c, Some(e)));
}

fn find_cse(ctx: &Ctx, cse: &CseSet, expr: AstId, expr_hash: u32) -> Option<(usize, usize)> {
    let idx = (expr_hash as usize) & (CSE_HASH_SIZE - 1);
    for (i, entry) in cse.buckets[idx].iter().enumerate() {
        if entry.expr_hash == expr_hash && ast_match(ctx, Some(entry.expr), Some(expr)) {
            return Some((idx, i));
        }
    }
    None
}

/// Remove entries that depend on a just-modified location. Assignments
/// through memory or hardware registers invalidate every memory-using
/// entry; anything not understood clears the whole set.
fn remove_cse_using(ctx: &mut Ctx, cse: &mut CseSet, modified: AstId) {
    let mut modified = modified;
    if ctx.ast.kind(modified) == AstKind::ArrayRef {
        modified = match ctx.ast.left(modified) {
            Some(m) => m,
            None => {
                clear_set(ctx, cse);
                return;
            }
        };
    }
    if ctx.ast.kind(modified) == AstKind::LocalIdentifier {
        modified = match ctx.ast.left(modified) {
            Some(m) => m,
            None => {
                clear_set(ctx, cse);
                return;
            }
        };
    }
    match ctx.ast.kind(modified) {
        AstKind::Identifier => {}
        AstKind::MemRef | AstKind::HwReg => {
            clear_memory_set(ctx, cse);
            return;
        }
        _ => {
            clear_set(ctx, cse);
            return;
        }
    }
    let mut removed = Vec::new();
    for bucket in cse.buckets.iter_mut() {
        let mut keep = Vec::new();
        for entry in bucket.drain(..) {
            let dead = ast_uses(ctx, Some(entry.expr), Some(modified))
                || ast_uses(ctx, entry.replace, Some(modified));
            if dead {
                removed.push(entry);
            } else {
                keep.push(entry);
            }
        }
        *bucket = keep;
    }
    for entry in removed {
        destroy_entry(ctx, entry);
    }
}

/// Flush pending temporary assignments in front of the statement held by
/// `stmtlist`.
fn place_pending_assignments(ctx: &mut Ctx, stmtlist: AstId, cse: &mut CseSet) {
    let pending = match cse.assign_list.take() {
        Some(p) => p,
        None => return,
    };
    let old = ctx.ast.left(stmtlist);
    let save = ctx.report_as(old);
    let oldstmt = ctx.new_ast(AstKind::StmtList, old, None);
    ctx.report_done(save);
    let sublist = add_to_list(&mut ctx.ast, Some(pending), Some(oldstmt));
    ctx.ast.set_left(stmtlist, sublist);
}

/// Create a new entry for `expr`, allocate the replacement temporary, and
/// queue the pulled-out assignment. `name` is the variable being assigned
/// when the expression sits on the RHS of an assignment; a CSE whose only
/// use mentions that variable starts out provisional.
fn add_to_cse_set(
    ctx: &mut Ctx,
    name: Option<AstId>,
    cse: &mut CseSet,
    expr: AstId,
    expr_hash: u32,
    replace_slot: Slot,
) {
    if ctx.ast.kind(expr) == AstKind::ArrayRef {
        let base = match ctx.ast.left(expr) {
            Some(b) => b,
            None => return,
        };
        if array_base_type(ctx, base).is_none() {
            // cannot figure out the type of the array
            return;
        }
        // constant-indexed accesses are cheap already
        if let Some(index) = ctx.ast.right(expr) {
            if is_const_expr(ctx, index) {
                return;
            }
        }
    }
    // no 64-bit quantities
    if type_size(ctx, expr_type(ctx, expr)) > LONG_SIZE {
        return;
    }
    let save = ctx.report_as(Some(expr));

    let (replace, assign) = if ctx.ast.kind(expr) == AstKind::ArrayRef {
        let reftype = expr_type(ctx, expr);
        let (replace_var, reftype) = match reftype {
            None => (
                ctx.temp_local_variable("_cse_", None),
                ctx.types.generic,
            ),
            Some(t) => (ctx.temp_local_variable("_csetype_", Some(t)), t),
        };
        let addr = ctx.new_ast(AstKind::AddrOf, Some(expr), None);
        let assign = ctx.ast_assign(replace_var, addr);
        let memref = ctx.new_ast(AstKind::MemRef, Some(reftype), Some(replace_var));
        let zero = ctx.ast_int(0);
        let replace = ctx.new_ast(AstKind::ArrayRef, Some(memref), Some(zero));
        (replace, assign)
    } else {
        let replace_var = ctx.temp_local_variable("_cse_", None);
        let assign = ctx.ast_assign(replace_var, expr);
        (replace_var, assign)
    };

    // in "i = i + 1" there is no point pulling out "i+1" unless it is
    // used again; if the expression mentions the assigned variable the
    // entry starts provisional and is retracted when never reused
    let uses = match name {
        Some(n) if ast_uses(ctx, Some(expr), Some(n)) => 0,
        _ => 1,
    };

    let stmt = ctx.ast_stmt(assign);
    cse.assign_list = add_to_list(&mut ctx.ast, cse.assign_list, Some(stmt));
    replace_slot.set(ctx, Some(replace));

    let idx = (expr_hash as usize) & (CSE_HASH_SIZE - 1);
    cse.buckets[idx].push(CseEntry {
        expr,
        replace: Some(replace),
        expr_hash,
        assign: Some(assign),
        first_use: Some(replace_slot),
        uses,
    });
    ctx.report_done(save);
}

fn replace_cse(ctx: &mut Ctx, cse: &mut CseSet, at: (usize, usize), slot: Slot) {
    let entry = &mut cse.buckets[at.0][at.1];
    let replace = entry.replace;
    entry.uses += 1;
    slot.set(ctx, replace);
}

/// CSE over a conditionally-executed block: existing entries may be
/// reused, but new ones live only in a local set.
fn block_cse(ctx: &mut Ctx, stmtptr: Option<AstId>, slot: Slot, cse: &mut CseSet, flags: u32) {
    do_cse(ctx, stmtptr, slot, cse, flags | CSE_NO_ADD, None);
    if flags == 0 {
        let mut bodycse = CseSet::new();
        do_cse(ctx, None, slot, &mut bodycse, flags, None);
        clear_set(ctx, &mut bodycse);
    }
}

/// CSE around a loop: first strip entries the body invalidates, then
/// re-run allowing only reuse, so whatever survives is loop-invariant.
/// Finally the body gets its own per-iteration set.
fn loop_cse(
    ctx: &mut Ctx,
    stmtptr: Option<AstId>,
    body: Slot,
    condition: Slot,
    update: Option<Slot>,
    cse: &mut CseSet,
    flags: u32,
) {
    if let Some(stmt) = stmtptr {
        place_pending_assignments(ctx, stmt, cse);
    }
    do_cse(ctx, stmtptr, body, cse, flags | CSE_NO_REPLACE, None);
    if let Some(u) = update {
        do_cse(ctx, stmtptr, u, cse, flags | CSE_NO_REPLACE, None);
    }
    do_cse(ctx, stmtptr, condition, cse, flags | CSE_NO_ADD, None);
    do_cse(ctx, stmtptr, body, cse, flags | CSE_NO_ADD, None);
    if flags == 0 {
        let mut bodycse = CseSet::new();
        do_cse(ctx, None, body, &mut bodycse, flags, None);
        clear_set(ctx, &mut bodycse);
    }
}

/// The main walk. `stmtptr` is the statement-list node whose statement is
/// being processed (pending assignments land in front of it); `slot` is
/// the position that may be replaced; `name` is the assignment target
/// driving the provisional-entry heuristic.
fn do_cse(
    ctx: &mut Ctx,
    stmtptr: Option<AstId>,
    slot: Slot,
    cse: &mut CseSet,
    flags: u32,
    name: Option<AstId>,
) -> u32 {
    let ast = match slot.get(ctx) {
        Some(a) => a,
        None => return flags,
    };
    let mut newflags = flags;
    match ctx.ast.kind(ast) {
        AstKind::StmtList => {
            let mut cur = Some(ast);
            while let Some(c) = cur {
                do_cse(ctx, Some(c), Slot::left(c), cse, flags, None);
                place_pending_assignments(ctx, c, cse);
                cur = ctx.ast.right(c);
            }
            newflags
        }
        AstKind::ExprList => {
            let mut cur = Some(ast);
            while let Some(c) = cur {
                newflags |= do_cse(ctx, stmtptr, Slot::left(c), cse, flags, None);
                cur = ctx.ast.right(c);
            }
            newflags
        }
        AstKind::Assign => {
            let mut name = name;
            if name.is_none() {
                if let Some(lhs) = ctx.ast.left(ast) {
                    if is_identifier(ctx, lhs) {
                        name = Some(lhs);
                        if ctx.ast.kind(lhs) == AstKind::LocalIdentifier {
                            name = ctx.ast.left(lhs);
                        }
                    }
                }
            }
            newflags |= do_cse(ctx, stmtptr, Slot::right(ast), cse, flags, name);
            newflags |= do_cse(ctx, stmtptr, Slot::left(ast), cse, flags, None);
            // anything using the destination is no longer valid
            let invalidated = name.or_else(|| ctx.ast.left(ast));
            if let Some(target) = invalidated {
                remove_cse_using(ctx, cse, target);
            }
            newflags
        }
        AstKind::Operator => {
            if is_const_expr(ctx, ast) {
                return newflags;
            }
            let mut flags = flags;
            match ctx.ast.op_of(ast) {
                Op::BoolOr | Op::BoolAnd => {
                    // the second half may be skipped at runtime
                    flags |= CSE_NO_ADD;
                }
                op if op.is_comparison() => {
                    // pulling compares out just hurts code generation
                    flags |= CSE_NO_ADD;
                }
                Op::Random | Op::Increment | Op::Decrement => {
                    if ctx.ast.op_of(ast) == Op::Random {
                        flags |= CSE_NO_REPLACE;
                    }
                    if let Some(l) = ctx.ast.left(ast) {
                        do_cse(ctx, stmtptr, Slot::left(ast), cse, flags, None);
                        remove_cse_using(ctx, cse, l);
                    }
                    if let Some(r) = ctx.ast.right(ast) {
                        do_cse(ctx, stmtptr, Slot::right(ast), cse, flags | CSE_NO_REPLACE, None);
                        remove_cse_using(ctx, cse, r);
                    }
                    return newflags | CSE_NO_REPLACE;
                }
                _ => {}
            }
            newflags |= do_cse(ctx, stmtptr, Slot::left(ast), cse, flags, None);
            newflags |= do_cse(ctx, stmtptr, Slot::right(ast), cse, flags, None);
            if newflags & CSE_NO_REPLACE == 0 {
                let hash = ast_hash(ctx, Some(ast));
                if let Some(at) = find_cse(ctx, cse, ast, hash) {
                    replace_cse(ctx, cse, at, slot);
                } else if newflags & CSE_NO_ADD == 0 {
                    add_to_cse_set(ctx, name, cse, ast, hash, slot);
                }
            }
            newflags
        }
        AstKind::ArrayRef => {
            newflags |= do_cse(ctx, stmtptr, Slot::right(ast), cse, flags, None);
            newflags |= do_cse(ctx, stmtptr, Slot::left(ast), cse, flags, None);
            if newflags & CSE_NO_REPLACE == 0 {
                let hash = ast_hash(ctx, Some(ast));
                if let Some(at) = find_cse(ctx, cse, ast, hash) {
                    replace_cse(ctx, cse, at, slot);
                } else if newflags & CSE_NO_ADD == 0 {
                    add_to_cse_set(ctx, None, cse, ast, hash, slot);
                }
            }
            newflags
        }
        AstKind::MemRef => {
            // left is just the type; a memref itself is not added but may
            // appear inside an added entry
            newflags |= do_cse(ctx, stmtptr, Slot::right(ast), cse, flags, None);
            newflags
        }
        AstKind::AddrOf | AstKind::AbsAddrOf => {
            do_cse(ctx, stmtptr, Slot::left(ast), cse, flags | CSE_NO_REPLACE, None);
            do_cse(ctx, stmtptr, Slot::right(ast), cse, flags | CSE_NO_REPLACE, None);
            if newflags & CSE_NO_REPLACE == 0 {
                let hash = ast_hash(ctx, Some(ast));
                if let Some(at) = find_cse(ctx, cse, ast, hash) {
                    replace_cse(ctx, cse, at, slot);
                } else if newflags & CSE_NO_ADD == 0 {
                    add_to_cse_set(ctx, name, cse, ast, hash, slot);
                }
            }
            newflags
        }
        AstKind::Integer
        | AstKind::Float
        | AstKind::Constant
        | AstKind::String
        | AstKind::Result
        | AstKind::Identifier
        | AstKind::LocalIdentifier => newflags,
        AstKind::HwReg => CSE_NO_REPLACE, // never CSE hardware
        AstKind::Comment
        | AstKind::CommentedNode
        | AstKind::Return
        | AstKind::ThenElse
        | AstKind::CaseItem
        | AstKind::Other => {
            do_cse(ctx, stmtptr, Slot::right(ast), cse, flags, None);
            do_cse(ctx, stmtptr, Slot::left(ast), cse, flags, None);
            newflags
        }
        AstKind::CondResult => {
            do_cse(ctx, stmtptr, Slot::left(ast), cse, flags, None);
            // the arms execute conditionally: reuse only
            do_cse(ctx, stmtptr, Slot::right(ast), cse, flags | CSE_NO_ADD, None);
            newflags | CSE_NO_REPLACE
        }
        AstKind::If => {
            // keep compares intact for the later compare folding; reuse
            // existing entries only
            do_cse(ctx, stmtptr, Slot::left(ast), cse, flags | CSE_NO_ADD, None);
            if let Some(stmt) = stmtptr {
                place_pending_assignments(ctx, stmt, cse);
            }
            let mut branches = ctx.ast.right(ast);
            while let Some(b) = branches {
                if ctx.ast.kind(b) != AstKind::CommentedNode {
                    break;
                }
                branches = ctx.ast.left(b);
            }
            let branches = match branches {
                Some(b) if ctx.ast.kind(b) == AstKind::ThenElse => b,
                other => {
                    ctx.internal_error(other, "Expecting THENELSE block");
                    return newflags;
                }
            };
            block_cse(ctx, stmtptr, Slot::left(branches), cse, flags);
            block_cse(ctx, stmtptr, Slot::right(branches), cse, flags);
            newflags
        }
        AstKind::Case | AstKind::CaseTable => {
            do_cse(ctx, stmtptr, Slot::left(ast), cse, flags | CSE_NO_ADD, None);
            if let Some(stmt) = stmtptr {
                place_pending_assignments(ctx, stmt, cse);
            }
            do_cse(ctx, stmtptr, Slot::right(ast), cse, flags | CSE_NO_ADD, None);
            newflags
        }
        AstKind::While | AstKind::DoWhile => {
            loop_cse(
                ctx,
                stmtptr,
                Slot::right(ast),
                Slot::left(ast),
                None,
                cse,
                flags,
            );
            newflags
        }
        AstKind::For | AstKind::ForAtLeastOnce => {
            // initialization runs unconditionally
            do_cse(ctx, stmtptr, Slot::left(ast), cse, flags, None);
            let to = match ctx.ast.right(ast) {
                Some(t) => t,
                None => return newflags,
            };
            let step = match ctx.ast.right(to) {
                Some(s) => s,
                None => return newflags,
            };
            loop_cse(
                ctx,
                stmtptr,
                Slot::right(step),
                Slot::left(to),
                Some(Slot::left(step)),
                cse,
                flags,
            );
            newflags
        }
        AstKind::FuncCall | AstKind::CogInit => {
            let mut exprlist = ctx.ast.right(ast);
            while let Some(e) = exprlist {
                do_cse(ctx, stmtptr, Slot::left(e), cse, flags, None);
                exprlist = ctx.ast.right(e);
            }
            // the call may write memory, and its result is not repeatable
            clear_memory_set(ctx, cse);
            newflags | CSE_NO_REPLACE
        }
        AstKind::ConstRef
        | AstKind::Round
        | AstKind::Trunc
        | AstKind::ToFloat
        | AstKind::IsBetween => {
            newflags |= do_cse(ctx, stmtptr, Slot::left(ast), cse, flags, None);
            newflags |= do_cse(ctx, stmtptr, Slot::right(ast), cse, flags, None);
            newflags
        }
        AstKind::Sequence => {
            // a sequence may assign several times over; placing new CSE
            // assignments in front of the whole statement would reorder
            // them, so only reuse here
            newflags |= do_cse(ctx, stmtptr, Slot::left(ast), cse, flags | CSE_NO_ADD, None);
            newflags |= do_cse(ctx, stmtptr, Slot::right(ast), cse, flags | CSE_NO_ADD, None);
            newflags
        }
        AstKind::Label | AstKind::Symbol => {
            // control can arrive here from anywhere; no entry is provably
            // still valid
            clear_set(ctx, cse);
            CSE_NO_REPLACE
        }
        _ => {
            do_cse(ctx, stmtptr, Slot::left(ast), cse, flags | CSE_NO_REPLACE, None);
            do_cse(ctx, stmtptr, Slot::right(ast), cse, flags | CSE_NO_REPLACE, None);
            clear_memory_set(ctx, cse);
            CSE_NO_REPLACE // not a node shape we handle
        }
    }
}

/// CSE over a whole module, then loop optimization (the two share the
/// invariant analysis).
pub fn perform_cse(ctx: &mut Ctx, module: ModId) {
    let save_mod = ctx.set_current_module(Some(module));
    let save_func = ctx.cur_func;
    let funcs = ctx.module(module).functions.clone();
    for f in funcs {
        if ctx.func(f).optimize_flags & OPT_PERFORM_CSE != 0 {
            ctx.set_current_function(Some(f));
            let mut cse = CseSet::new();
            do_cse(ctx, None, Slot::FuncBody(f), &mut cse, 0, None);
            clear_set(ctx, &mut cse);
        }
    }
    ctx.set_current_function(save_func);
    ctx.set_current_module(save_mod);

    perform_loop_optimization(ctx, module);
}
