//! Structural operations on trees: list building, duplication, equality,
//! substitution, conservative modification analysis.

use std::rc::Rc;

use util::eq_nocase;

use crate::ast::{AstArena, AstId, AstKind, Payload};
use crate::module::FuncId;
use crate::Ctx;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Side {
    Left,
    Right,
}

/// A writable position holding a subtree: either a child slot of a node or
/// a function's body field. Rewrites that must replace "whatever is here"
/// carry slots instead of node ids.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Slot {
    FuncBody(FuncId),
    Child(AstId, Side),
}

impl Slot {
    pub fn left(node: AstId) -> Slot {
        Slot::Child(node, Side::Left)
    }

    pub fn right(node: AstId) -> Slot {
        Slot::Child(node, Side::Right)
    }

    pub fn get(self, ctx: &Ctx) -> Option<AstId> {
        match self {
            Slot::FuncBody(f) => ctx.func(f).body,
            Slot::Child(node, Side::Left) => ctx.ast.left(node),
            Slot::Child(node, Side::Right) => ctx.ast.right(node),
        }
    }

    pub fn set(self, ctx: &mut Ctx, v: Option<AstId>) {
        match self {
            Slot::FuncBody(f) => ctx.func_mut(f).body = v,
            Slot::Child(node, Side::Left) => ctx.ast.set_left(node, v),
            Slot::Child(node, Side::Right) => ctx.ast.set_right(node, v),
        }
    }
}

/// Append to a right-chained list; O(length of list). Either side may be
/// absent.
pub fn add_to_list(a: &mut AstArena, list: Option<AstId>, newelem: Option<AstId>) -> Option<AstId> {
    let list = match list {
        Some(l) => l,
        None => return newelem,
    };
    let newelem = match newelem {
        Some(n) => n,
        None => return Some(list),
    };
    let mut p = list;
    while let Some(next) = a.right(p) {
        p = next;
    }
    a.set_right(p, Some(newelem));
    Some(list)
}

/// Append accelerator keeping an external tail pointer; amortized O(1)
/// for bulk construction.
pub fn add_to_list_ex(
    a: &mut AstArena,
    head: Option<AstId>,
    newelem: Option<AstId>,
    tail: &mut Option<AstId>,
) -> Option<AstId> {
    let head = match head {
        Some(h) => h,
        None => {
            *tail = newelem;
            return newelem;
        }
    };
    let newelem = match newelem {
        Some(n) => n,
        None => return Some(head),
    };
    match *tail {
        Some(t) => {
            add_to_list(a, Some(t), Some(newelem));
        }
        None => {
            add_to_list(a, Some(head), Some(newelem));
        }
    }
    *tail = Some(newelem);
    Some(head)
}

/// Join two lists.
pub fn append_list(a: &mut AstArena, first: Option<AstId>, last: Option<AstId>) -> Option<AstId> {
    let first = match first {
        Some(f) => f,
        None => return last,
    };
    let mut p = first;
    while let Some(next) = a.right(p) {
        p = next;
    }
    a.set_right(p, last);
    Some(first)
}

/// Append to a list linked through the left pointers (type modifiers).
pub fn add_to_left_list(
    a: &mut AstArena,
    list: Option<AstId>,
    newelem: Option<AstId>,
) -> Option<AstId> {
    let list = match list {
        Some(l) => l,
        None => return newelem,
    };
    let newelem = match newelem {
        Some(n) => n,
        None => return Some(list),
    };
    let mut p = list;
    while let Some(next) = a.left(p) {
        p = next;
    }
    a.set_left(p, Some(newelem));
    Some(list)
}

/// Insert `newelem` before `member`; returns the (possibly new) head.
pub fn list_insert_before(
    ctx: &mut Ctx,
    list: Option<AstId>,
    member: Option<AstId>,
    newelem: AstId,
) -> Option<AstId> {
    let orig = list;
    let head = match list {
        None => {
            ctx.ast.set_right(newelem, None);
            return Some(newelem);
        }
        Some(h) if Some(h) == member => {
            ctx.ast.set_right(newelem, list);
            return Some(newelem);
        }
        Some(h) => h,
    };
    let mut cur = Some(head);
    while let Some(c) = cur {
        if ctx.ast.right(c) == member {
            break;
        }
        cur = ctx.ast.right(c);
    }
    let before = match cur {
        Some(c) => c,
        None => {
            ctx.internal_error(member, "unable to find item in list");
            return orig;
        }
    };
    let after = ctx.ast.right(before);
    ctx.ast.set_right(newelem, after);
    ctx.ast.set_right(before, Some(newelem));
    orig
}

pub fn list_len(a: &AstArena, list: Option<AstId>) -> usize {
    let mut n = 0;
    let mut cur = list;
    while let Some(c) = cur {
        n += 1;
        cur = a.right(c);
    }
    n
}

/// Unlink an element (by identity) from a right-chained list.
pub fn remove_from_list(a: &mut AstArena, listptr: &mut Option<AstId>, elem: AstId) {
    if *listptr == Some(elem) {
        *listptr = a.right(elem);
        a.set_right(elem, None);
        return;
    }
    let mut cur = *listptr;
    while let Some(c) = cur {
        if a.right(c) == Some(elem) {
            let rest = a.right(elem);
            a.set_right(c, rest);
            a.set_right(elem, None);
            return;
        }
        cur = a.right(c);
    }
}

/// Deep copy.
pub fn dup_ast(a: &mut AstArena, orig: Option<AstId>) -> Option<AstId> {
    let orig = orig?;
    let node = a[orig].clone();
    let left = dup_ast(a, node.left);
    let right = dup_ast(a, node.right);
    Some(a.alloc(node.kind, left, right, node.payload, node.loc))
}

/// Deep copy preserving the shared singleton type nodes.
pub fn dup_ast_type_safe(ctx: &mut Ctx, orig: Option<AstId>) -> Option<AstId> {
    let orig = orig?;
    if is_singleton_type(ctx, orig) {
        return Some(orig);
    }
    let node = ctx.ast[orig].clone();
    let left = dup_ast_type_safe(ctx, node.left);
    let right = dup_ast_type_safe(ctx, node.right);
    Some(ctx.ast.alloc(node.kind, left, right, node.payload, node.loc))
}

fn is_singleton_type(ctx: &Ctx, id: AstId) -> bool {
    let t = &ctx.types;
    id == t.long
        || id == t.word
        || id == t.byte
        || id == t.ulong
        || id == t.uword
        || id == t.ubyte
        || id == t.int64
        || id == t.float
        || id == t.string
        || id == t.generic
        || id == t.void
        || id == t.bool_
}

/// Deep copy, substituting a copy of `replace` for every subtree
/// structurally equal to `orig`.
pub fn dup_ast_with_replace(
    ctx: &mut Ctx,
    ast: Option<AstId>,
    orig: Option<AstId>,
    replace: Option<AstId>,
) -> Option<AstId> {
    let ast = ast?;
    let node = ctx.ast[ast].clone();
    let left = if node.left.is_some() && ast_match(ctx, node.left, orig) {
        dup_ast(&mut ctx.ast, replace)
    } else {
        dup_ast_with_replace(ctx, node.left, orig, replace)
    };
    let right = if node.right.is_some() && ast_match(ctx, node.right, orig) {
        dup_ast(&mut ctx.ast, replace)
    } else {
        dup_ast_with_replace(ctx, node.right, orig, replace)
    };
    Some(ctx.ast.alloc(node.kind, left, right, node.payload, node.loc))
}

fn skip_comments_and_declares(a: &AstArena, mut id: Option<AstId>) -> Option<AstId> {
    while let Some(n) = id {
        if a.kind(n) != AstKind::StmtList {
            break;
        }
        let stmt = match a.left(n) {
            Some(s) => s,
            None => break,
        };
        match a.kind(stmt) {
            AstKind::Comment | AstKind::DeclareVar => {
                id = a.right(n);
            }
            _ => break,
        }
    }
    id
}

fn match_strings(ctx: &Ctx, a: AstId, b: AstId, fold_case: bool) -> bool {
    let sa = ctx.ast.str_val(a);
    let sb = ctx.ast.str_val(b);
    match (sa, sb) {
        (Some(sa), Some(sb)) => {
            if fold_case {
                eq_nocase(&sa, &sb)
            } else {
                sa == sb
            }
        }
        _ => false,
    }
}

fn do_ast_match(ctx: &Ctx, a: Option<AstId>, b: Option<AstId>, ignore_static: bool) -> bool {
    let (a, b) = if ignore_static {
        (
            skip_comments_and_declares(&ctx.ast, a),
            skip_comments_and_declares(&ctx.ast, b),
        )
    } else {
        (a, b)
    };
    let (a, b) = match (a, b) {
        (None, None) => return true,
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };
    if a == b {
        return true;
    }
    let (ka, kb) = (ctx.ast.kind(a), ctx.ast.kind(b));
    if ka != kb {
        if !ignore_static {
            return false;
        }
        // a sequence of one thing is that thing
        if ka == AstKind::Sequence && ctx.ast.right(a).is_none() {
            return do_ast_match(ctx, ctx.ast.left(a), Some(b), true);
        }
        if kb == AstKind::Sequence && ctx.ast.right(b).is_none() {
            return do_ast_match(ctx, Some(a), ctx.ast.left(b), true);
        }
        return false;
    }
    match ka {
        AstKind::HwReg => {
            return ctx.ast.hwreg_val(a) == ctx.ast.hwreg_val(b);
        }
        AstKind::Integer | AstKind::Float | AstKind::BitValue => {
            return ctx.ast.int_val(a) == ctx.ast.int_val(b);
        }
        AstKind::String => {
            return match_strings(ctx, a, b, false);
        }
        AstKind::Identifier => {
            let fold = !ctx.identifiers_case_sensitive();
            return match_strings(ctx, a, b, fold);
        }
        AstKind::LocalIdentifier => {
            if ignore_static {
                return do_ast_match(ctx, ctx.ast.right(a), ctx.ast.right(b), true);
            }
        }
        AstKind::Operator | AstKind::Assign => {
            if ctx.ast.int_val(a) != ctx.ast.int_val(b) {
                return false;
            }
        }
        _ => {}
    }
    do_ast_match(ctx, ctx.ast.left(a), ctx.ast.left(b), ignore_static)
        && do_ast_match(ctx, ctx.ast.right(a), ctx.ast.right(b), ignore_static)
}

/// Structural equality. Identifier comparison is case-sensitive only for
/// case-sensitive source languages.
pub fn ast_match(ctx: &Ctx, a: Option<AstId>, b: Option<AstId>) -> bool {
    do_ast_match(ctx, a, b, false)
}

/// Equality for whole bodies: leading comments and local declarations are
/// skipped, local-identifier decorations stripped.
pub fn ast_body_match(ctx: &Ctx, a: Option<AstId>, b: Option<AstId>) -> bool {
    do_ast_match(ctx, a, b, true)
}

/// Does `a` contain a subtree structurally equal to `b`?
pub fn ast_uses(ctx: &Ctx, a: Option<AstId>, b: Option<AstId>) -> bool {
    if b.is_none() {
        return true;
    }
    let a = match a {
        Some(a) => a,
        None => return false,
    };
    if ast_match(ctx, Some(a), b) {
        return true;
    }
    ast_uses(ctx, ctx.ast.left(a), b) || ast_uses(ctx, ctx.ast.right(a), b)
}

fn ident_names_equal(ctx: &Ctx, a: AstId, id: AstId) -> bool {
    match (ctx.ast.str_val(a), ctx.ast.str_val(id)) {
        (Some(sa), Some(si)) => eq_nocase(&sa, &si),
        _ => false,
    }
}

fn modifies_identifier_lhs(ctx: &Ctx, body: Option<AstId>, id: AstId) -> bool {
    let body = match body {
        Some(b) => b,
        None => return false,
    };
    match ctx.ast.kind(body) {
        AstKind::Identifier => {
            if ident_names_equal(ctx, body, id) {
                return true;
            }
        }
        AstKind::ArrayRef => {
            return modifies_identifier_lhs(ctx, ctx.ast.left(body), id)
                || ast_modifies_identifier(ctx, ctx.ast.right(body), id);
        }
        _ => {}
    }
    modifies_identifier_lhs(ctx, ctx.ast.left(body), id)
        || modifies_identifier_lhs(ctx, ctx.ast.right(body), id)
}

/// Conservative check: does the body possibly change the value of the
/// identifier? Assignments whose LHS contains it, pre/post inc/dec of it,
/// and taking its address all count.
pub fn ast_modifies_identifier(ctx: &Ctx, body: Option<AstId>, id: AstId) -> bool {
    let mut cur = body;
    while let Some(b) = cur {
        match ctx.ast.kind(b) {
            AstKind::Assign => {
                if modifies_identifier_lhs(ctx, ctx.ast.left(b), id) {
                    return true;
                }
            }
            AstKind::Operator => {
                let op = ctx.ast.op_of(b);
                if op == super::Op::Increment || op == super::Op::Decrement {
                    return ast_uses(ctx, ctx.ast.left(b), Some(id))
                        || ast_uses(ctx, ctx.ast.right(b), Some(id));
                }
            }
            AstKind::AddrOf => {
                // address taken: assume it will be modified
                if modifies_identifier_lhs(ctx, ctx.ast.left(b), id) {
                    return true;
                }
            }
            _ => {}
        }
        if ast_modifies_identifier(ctx, ctx.ast.left(b), id) {
            return true;
        }
        cur = ctx.ast.right(b);
    }
    false
}

/// In-place rewrite: every child pointer whose target matches `old` is
/// redirected to `new`. The identity of `body` itself never changes.
pub fn replace_ast(ctx: &mut Ctx, body: Option<AstId>, old: AstId, new: AstId) {
    let body = match body {
        Some(b) => b,
        None => return,
    };
    let old_kind = ctx.ast.kind(old);
    if let Some(l) = ctx.ast.left(body) {
        if ctx.ast.kind(l) == old_kind && ast_match(ctx, Some(l), Some(old)) {
            ctx.ast.set_left(body, Some(new));
        } else {
            replace_ast(ctx, Some(l), old, new);
        }
    }
    if let Some(r) = ctx.ast.right(body) {
        if ctx.ast.kind(r) == old_kind && ast_match(ctx, Some(r), Some(old)) {
            ctx.ast.set_right(body, Some(new));
        } else {
            replace_ast(ctx, Some(r), old, new);
        }
    }
}

/// Check for a one-element expression list; returns the element.
pub fn expect_one_list_elem(ctx: &mut Ctx, list: AstId) -> AstId {
    if ctx.ast.kind(list) != AstKind::ExprList {
        ctx.error(Some(list), "Expected a list");
        return list;
    }
    if ctx.ast.right(list).is_some() {
        ctx.error(Some(list), "Expected a single element list, found a longer one");
    }
    ctx.ast.left(list).unwrap_or(list)
}

/// Length in bytes of a STRING()-style expression list, including the
/// terminating zero.
pub fn ast_string_len(a: &AstArena, mut list: Option<AstId>) -> usize {
    let mut len = 1;
    if list.is_none() {
        return 0;
    }
    if let Some(l) = list {
        if a.kind(l) == AstKind::StringPtr {
            list = a.left(l);
        }
    }
    while let Some(l) = list {
        if a.kind(l) != AstKind::ExprList {
            break;
        }
        if let Some(item) = a.left(l) {
            if a.kind(item) == AstKind::String {
                len += a.str_val(item).map_or(0, |s| s.len());
            } else {
                len += 1;
            }
        }
        list = a.right(l);
    }
    if let Some(l) = list {
        if a.kind(l) == AstKind::String {
            len += a.str_val(l).map_or(0, |s| s.len());
        }
    }
    len
}

fn copy_string_into(ctx: &Ctx, out: &mut String, strptr: AstId) {
    let mut list = ctx.ast.left(strptr);
    while let Some(l) = list {
        if ctx.ast.kind(l) != AstKind::ExprList {
            break;
        }
        if let Some(item) = ctx.ast.left(l) {
            if ctx.ast.kind(item) == AstKind::String {
                if let Some(s) = ctx.ast.str_val(item) {
                    out.push_str(&s);
                }
            } else {
                out.push(ctx.ast.int_val(item) as u8 as char);
            }
        }
        list = ctx.ast.right(l);
    }
    if let Some(l) = list {
        if ctx.ast.kind(l) == AstKind::String {
            if let Some(s) = ctx.ast.str_val(l) {
                out.push_str(&s);
            }
        }
    }
}

/// Merge two zero-terminated string pointers into one.
pub fn ast_merge_strings(
    ctx: &mut Ctx,
    left: Option<AstId>,
    right: Option<AstId>,
) -> Option<AstId> {
    for side in [left, right].iter().flatten() {
        if ctx.ast.kind(*side) != AstKind::StringPtr {
            ctx.internal_error(Some(*side), "expected string");
            return left;
        }
        if ctx.ast.int_val(*side) != 0 {
            ctx.internal_error(Some(*side), "expected zstring not lstring");
            return left;
        }
    }
    let mut buf = String::new();
    if let Some(l) = left {
        copy_string_into(ctx, &mut buf, l);
    }
    if let Some(r) = right {
        copy_string_into(ctx, &mut buf, r);
    }
    Some(ctx.ast_string(&buf))
}

/// The string payload behind a (possibly wrapped) string literal.
pub fn get_string(a: &AstArena, mut ast: Option<AstId>) -> Rc<str> {
    if let Some(id) = ast {
        if a.kind(id) == AstKind::StringPtr {
            ast = a.left(id);
        }
    }
    match ast {
        Some(id) if a.kind(id) == AstKind::String => {
            a.str_val(id).unwrap_or_else(|| Rc::from("unknown"))
        }
        _ => Rc::from("unknown"),
    }
}

/// Skip comment wrappers.
pub fn get_effective_node(a: &AstArena, mut ast: Option<AstId>) -> Option<AstId> {
    while let Some(id) = ast {
        if a.kind(id) != AstKind::CommentedNode {
            break;
        }
        ast = a.left(id);
    }
    ast
}

/// Render a tree as indented XML-ish text, for debug output.
pub fn dump_ast(ctx: &Ctx, ast: Option<AstId>) -> String {
    let mut out = String::new();
    dump_into(ctx, &mut out, ast, 0);
    out
}

fn dump_into(ctx: &Ctx, out: &mut String, ast: Option<AstId>, indent: usize) {
    let pad = " ".repeat(indent);
    let id = match ast {
        Some(id) => id,
        None => {
            out.push_str(&format!("{}<>\n", pad));
            return;
        }
    };
    let kind = ctx.ast.kind(id);
    match kind {
        AstKind::StmtList | AstKind::ListHolder | AstKind::ExprList => {
            out.push_str(&format!("{}<{:?}>\n", pad, kind));
            let mut cur = Some(id);
            while let Some(c) = cur {
                if ctx.ast.kind(c) != kind {
                    out.push_str(&format!("{}<MALFORMED>\n", pad));
                    dump_into(ctx, out, Some(c), indent + 2);
                    break;
                }
                dump_into(ctx, out, ctx.ast.left(c), indent + 2);
                cur = ctx.ast.right(c);
            }
            out.push_str(&format!("{}</{:?}>\n", pad, kind));
        }
        AstKind::Identifier | AstKind::String => {
            let s = ctx.ast.str_val(id).unwrap_or_else(|| Rc::from("?"));
            out.push_str(&format!("{}<{:?} {}/>\n", pad, kind, s));
        }
        AstKind::Integer | AstKind::BitValue | AstKind::Float => {
            out.push_str(&format!("{}<{:?} {}/>\n", pad, kind, ctx.ast.int_val(id)));
        }
        AstKind::Operator | AstKind::Assign => {
            out.push_str(&format!("{}<{:?} {:?}>\n", pad, kind, ctx.ast.op_of(id)));
            dump_into(ctx, out, ctx.ast.left(id), indent + 2);
            dump_into(ctx, out, ctx.ast.right(id), indent + 2);
            out.push_str(&format!("{}</{:?}>\n", pad, kind));
        }
        _ => {
            out.push_str(&format!("{}<{:?}>\n", pad, kind));
            dump_into(ctx, out, ctx.ast.left(id), indent + 2);
            dump_into(ctx, out, ctx.ast.right(id), indent + 2);
            out.push_str(&format!("{}</{:?}>\n", pad, kind));
        }
    }
}

/// Re-export of [`AstArena::nullify`] under its traditional name.
pub fn ast_nullify(a: &mut AstArena, id: AstId) {
    a.nullify(id);
}

/// Payload sanity check used by the transform entry points: report (and
/// keep going) when a node's payload does not fit its kind.
pub fn check_payload(ctx: &mut Ctx, id: AstId) {
    let ok = match ctx.ast.kind(id) {
        AstKind::Integer | AstKind::BitValue | AstKind::Float | AstKind::Operator
        | AstKind::Assign => matches!(ctx.ast[id].payload, Payload::Int(_)),
        AstKind::Identifier | AstKind::String | AstKind::Annotation | AstKind::Bytecode => {
            matches!(ctx.ast[id].payload, Payload::Str(_))
        }
        AstKind::HwReg => matches!(ctx.ast[id].payload, Payload::HwReg(_)),
        AstKind::Instr => matches!(ctx.ast[id].payload, Payload::Instr(_)),
        AstKind::Symbol => matches!(ctx.ast[id].payload, Payload::Sym(_)),
        _ => true,
    };
    if !ok {
        let msg = format!("payload does not fit node kind {:?}", ctx.ast.kind(id));
        ctx.internal_error(Some(id), &msg);
    }
}
