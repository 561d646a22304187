//! Expression support: constant evaluation, side-effect analysis, and the
//! small slice of the type system the transforms depend on.
//!
//! Types are themselves AST nodes (`IntType`, `PtrType`, `ArrayType`, ...)
//! with the well-known sizes held as shared singleton nodes in
//! [`crate::StdTypes`].

use std::rc::Rc;

use crate::ast::util::list_len;
use crate::ast::{AstId, AstKind, Op};
use crate::symbol::{LookupOutcome, SymId, SymVal, SymbolKind};
use crate::Ctx;

pub fn is_identifier(ctx: &Ctx, id: AstId) -> bool {
    match ctx.ast.kind(id) {
        AstKind::Identifier | AstKind::LocalIdentifier => true,
        _ => false,
    }
}

/// Canonical name of an identifier; local identifiers resolve to their
/// decorated (module-unique) spelling.
pub fn get_identifier_name(ctx: &Ctx, id: AstId) -> Option<Rc<str>> {
    match ctx.ast.kind(id) {
        AstKind::Identifier => ctx.ast.str_val(id),
        AstKind::LocalIdentifier => {
            let inner = ctx.ast.left(id)?;
            ctx.ast.str_val(inner)
        }
        _ => None,
    }
}

/// Name as the user wrote it, for diagnostics.
pub fn get_user_identifier_name(ctx: &Ctx, id: AstId) -> Rc<str> {
    let fallback = || -> Option<Rc<str>> {
        match ctx.ast.kind(id) {
            AstKind::LocalIdentifier => ctx.ast.str_val(ctx.ast.right(id)?),
            _ => ctx.ast.str_val(id),
        }
    };
    fallback().unwrap_or_else(|| Rc::from("<anonymous>"))
}

/// Resolve an identifier node in the current context, silently.
pub fn lookup_ast_symbol(ctx: &Ctx, id: AstId) -> Option<SymId> {
    let name = get_identifier_name(ctx, id)?;
    let table = if let Some(f) = ctx.cur_func {
        ctx.func(f).localsyms
    } else if let Some(m) = ctx.cur_module {
        ctx.module(m).objsyms
    } else {
        ctx.reserved
    };
    match ctx.syms.lookup(table, &name) {
        LookupOutcome::Found(sym) => Some(sym),
        _ => None,
    }
}

pub fn is_local_variable(ctx: &Ctx, id: AstId) -> bool {
    match lookup_ast_symbol(ctx, id) {
        Some(sym) => match ctx.syms.sym(sym).kind {
            SymbolKind::Parameter
            | SymbolKind::Result
            | SymbolKind::LocalVar
            | SymbolKind::TempVar => true,
            _ => false,
        },
        None => false,
    }
}

pub fn is_ast_temp_variable(ctx: &Ctx, id: AstId) -> bool {
    match lookup_ast_symbol(ctx, id) {
        Some(sym) => ctx.syms.sym(sym).kind == SymbolKind::TempVar,
        None => false,
    }
}

fn sign_extend(v: i64, bits: i64) -> i64 {
    if bits <= 0 || bits >= 64 {
        return v;
    }
    let shift = 64 - bits;
    (v << shift) >> shift
}

fn zero_extend(v: i64, bits: i64) -> i64 {
    if bits <= 0 || bits >= 64 {
        return v;
    }
    v & ((1i64 << bits) - 1)
}

const MAX_EVAL_DEPTH: u32 = 64;

/// Evaluate a compile-time constant; `None` when the expression is not a
/// constant (or divides by zero, or recurses unreasonably).
pub fn const_val(ctx: &Ctx, id: AstId) -> Option<i64> {
    eval(ctx, id, 0)
}

fn eval(ctx: &Ctx, id: AstId, depth: u32) -> Option<i64> {
    if depth > MAX_EVAL_DEPTH {
        return None;
    }
    match ctx.ast.kind(id) {
        AstKind::Integer | AstKind::BitValue | AstKind::Float => Some(ctx.ast.int_val(id)),
        AstKind::Constant => eval(ctx, ctx.ast.left(id)?, depth + 1),
        AstKind::Identifier | AstKind::LocalIdentifier => {
            let sym = lookup_ast_symbol(ctx, id)?;
            match (&ctx.syms.sym(sym).kind, &ctx.syms.sym(sym).val) {
                (SymbolKind::Constant, SymVal::Int(v)) => Some(*v),
                (SymbolKind::Constant, SymVal::Expr(e)) => eval(ctx, *e, depth + 1),
                (SymbolKind::FloatConstant, SymVal::Float(bits)) => Some(*bits as i64),
                _ => None,
            }
        }
        AstKind::SizeOf => {
            let inner = ctx.ast.left(id)?;
            Some(i64::from(type_size_of_expr(ctx, inner)))
        }
        AstKind::CondResult => {
            let cond = eval(ctx, ctx.ast.left(id)?, depth + 1)?;
            let branches = ctx.ast.right(id)?;
            let pick = if cond != 0 {
                ctx.ast.left(branches)
            } else {
                ctx.ast.right(branches)
            };
            eval(ctx, pick?, depth + 1)
        }
        AstKind::Round => {
            let bits = eval(ctx, ctx.ast.left(id)?, depth + 1)?;
            Some(f32::from_bits(bits as u32).round() as i64)
        }
        AstKind::Trunc => {
            let bits = eval(ctx, ctx.ast.left(id)?, depth + 1)?;
            Some(f32::from_bits(bits as u32).trunc() as i64)
        }
        AstKind::ToFloat => {
            let v = eval(ctx, ctx.ast.left(id)?, depth + 1)?;
            Some((v as f32).to_bits() as i64)
        }
        AstKind::Operator => eval_operator(ctx, id, depth),
        _ => None,
    }
}

fn eval_operator(ctx: &Ctx, id: AstId, depth: u32) -> Option<i64> {
    let op = ctx.ast.op_of(id);
    let left = ctx.ast.left(id);
    let right = ctx.ast.right(id);
    let l = || left.and_then(|x| eval(ctx, x, depth + 1));
    let r = || right.and_then(|x| eval(ctx, x, depth + 1));
    // truth values are all-ones, Spin style
    let b = |cond: bool| if cond { -1 } else { 0 };
    Some(match op {
        Op::Add => l()?.wrapping_add(r()?),
        Op::Sub => l()?.wrapping_sub(r()?),
        Op::Mul => l()?.wrapping_mul(r()?),
        Op::Div => {
            let d = r()?;
            if d == 0 {
                return None;
            }
            l()?.wrapping_div(d)
        }
        Op::Mod => {
            let d = r()?;
            if d == 0 {
                return None;
            }
            l()?.wrapping_rem(d)
        }
        Op::HighMult => ((l()? as i32 as i64) * (r()? as i32 as i64)) >> 32,
        Op::BitAnd => l()? & r()?,
        Op::BitOr => l()? | r()?,
        Op::BitXor => l()? ^ r()?,
        Op::BitNot => !r()?,
        Op::Shl => (l()? as i32).wrapping_shl(r()? as u32) as i64,
        Op::Shr => ((l()? as u32).wrapping_shr(r()? as u32)) as i64,
        Op::Sar => (l()? as i32).wrapping_shr(r()? as u32) as i64,
        Op::Rotl => (l()? as u32).rotate_left(r()? as u32 & 31) as i64,
        Op::Rotr => (l()? as u32).rotate_right(r()? as u32 & 31) as i64,
        Op::Rev => ((l()? as u32).reverse_bits() >> (32 - (r()? as u32 & 31).max(1))) as i64,
        Op::Negate => r()?.wrapping_neg(),
        Op::Abs => r()?.wrapping_abs(),
        Op::Sqrt => {
            let v = r()?;
            if v < 0 {
                return None;
            }
            (v as f64).sqrt() as i64
        }
        Op::Eq => b(l()? == r()?),
        Op::Ne => b(l()? != r()?),
        Op::Lt => b((l()? as i32) < (r()? as i32)),
        Op::Gt => b((l()? as i32) > (r()? as i32)),
        Op::Le => b((l()? as i32) <= (r()? as i32)),
        Op::Ge => b((l()? as i32) >= (r()? as i32)),
        Op::Ltu => b((l()? as u32) < (r()? as u32)),
        Op::Gtu => b((l()? as u32) > (r()? as u32)),
        Op::Leu => b((l()? as u32) <= (r()? as u32)),
        Op::Geu => b((l()? as u32) >= (r()? as u32)),
        Op::BoolAnd | Op::LogicAnd => b(l()? != 0 && r()? != 0),
        Op::BoolOr | Op::LogicOr => b(l()? != 0 || r()? != 0),
        Op::BoolXor | Op::LogicXor => b((l()? != 0) != (r()? != 0)),
        Op::BoolNot => b(r()? == 0),
        Op::SignExtend => sign_extend(l()?, r()?),
        Op::ZeroExtend => zero_extend(l()?, r()?),
        Op::LimitMin => l()?.max(r()?),
        Op::LimitMax => l()?.min(r()?),
        Op::Encode => {
            let v = l().or_else(r)? as u32;
            (32 - v.leading_zeros()) as i64
        }
        Op::Decode => 1i64 << (r()? & 31),
        _ => return None,
    })
}

pub fn is_const_expr(ctx: &Ctx, id: AstId) -> bool {
    const_val(ctx, id).is_some()
}

/// Evaluate with a diagnostic on failure.
pub fn eval_const_expr(ctx: &mut Ctx, id: AstId) -> i64 {
    match const_val(ctx, id) {
        Some(v) => v,
        None => {
            ctx.error(Some(id), "expected a constant expression");
            0
        }
    }
}

/// Fold an expression to an integer literal if it is constant (symbolic
/// constants are left alone so the printer keeps their names).
pub fn fold_if_const(ctx: &mut Ctx, id: AstId) -> AstId {
    if ctx.ast.kind(id) == AstKind::Identifier {
        return id;
    }
    if ctx.ast.kind(id) == AstKind::Integer {
        return id;
    }
    match const_val(ctx, id) {
        Some(v) => {
            let save = ctx.report_as(Some(id));
            let folded = ctx.ast_int(v);
            ctx.report_done(save);
            folded
        }
        None => id,
    }
}

/// Constant folding helper used by the loop rewrites.
pub fn simple_optimize_expr(ctx: &mut Ctx, id: AstId) -> AstId {
    fold_if_const(ctx, id)
}

/// Does evaluating the expression write anything? Assignments, calls,
/// pre/post operators, and the random operator all count.
pub fn expr_has_side_effects(ctx: &Ctx, id: AstId) -> bool {
    match ctx.ast.kind(id) {
        AstKind::Assign
        | AstKind::AssignInit
        | AstKind::FuncCall
        | AstKind::Gosub
        | AstKind::CogInit
        | AstKind::TaskInit
        | AstKind::Throw
        | AstKind::PostSet
        | AstKind::VaArg => true,
        AstKind::Operator => match ctx.ast.op_of(id) {
            Op::Increment
            | Op::Decrement
            | Op::Random
            | Op::RefPreInc
            | Op::RefPreDec
            | Op::RefPostInc
            | Op::RefPostDec => true,
            _ => children_have_side_effects(ctx, id),
        },
        _ => children_have_side_effects(ctx, id),
    }
}

fn children_have_side_effects(ctx: &Ctx, id: AstId) -> bool {
    if let Some(l) = ctx.ast.left(id) {
        if expr_has_side_effects(ctx, l) {
            return true;
        }
    }
    if let Some(r) = ctx.ast.right(id) {
        if expr_has_side_effects(ctx, r) {
            return true;
        }
    }
    false
}

//
// type model
//

pub fn remove_type_modifiers(ctx: &Ctx, mut typ: Option<AstId>) -> Option<AstId> {
    while let Some(t) = typ {
        match ctx.ast.kind(t) {
            AstKind::ConstModifier | AstKind::VolatileModifier => {
                typ = ctx.ast.left(t);
            }
            _ => break,
        }
    }
    typ
}

pub fn is_ref_type(ctx: &Ctx, typ: Option<AstId>) -> bool {
    match remove_type_modifiers(ctx, typ) {
        Some(t) => match ctx.ast.kind(t) {
            AstKind::RefType | AstKind::CopyRefType => true,
            _ => false,
        },
        None => false,
    }
}

pub fn is_array_type(ctx: &Ctx, typ: Option<AstId>) -> bool {
    matches_kind(ctx, typ, AstKind::ArrayType)
}

pub fn is_ptr_type(ctx: &Ctx, typ: Option<AstId>) -> bool {
    matches_kind(ctx, typ, AstKind::PtrType)
}

pub fn is_float_type(ctx: &Ctx, typ: Option<AstId>) -> bool {
    matches_kind(ctx, typ, AstKind::FloatType)
}

pub fn is_generic_type(ctx: &Ctx, typ: Option<AstId>) -> bool {
    matches_kind(ctx, typ, AstKind::GenericType)
}

pub fn is_function_type(ctx: &Ctx, typ: Option<AstId>) -> bool {
    matches_kind(ctx, typ, AstKind::FuncType)
}

pub fn is_bool_type(ctx: &Ctx, typ: Option<AstId>) -> bool {
    match remove_type_modifiers(ctx, typ) {
        Some(t) => match ctx.ast.kind(t) {
            AstKind::SignedBoolType | AstKind::UnsignedBoolType => true,
            _ => false,
        },
        None => false,
    }
}

pub fn is_unsigned_type(ctx: &Ctx, typ: Option<AstId>) -> bool {
    match remove_type_modifiers(ctx, typ) {
        Some(t) => match ctx.ast.kind(t) {
            AstKind::UnsignedType | AstKind::UnsignedBoolType => true,
            _ => false,
        },
        None => false,
    }
}

pub fn is_int_type(ctx: &Ctx, typ: Option<AstId>) -> bool {
    match remove_type_modifiers(ctx, typ) {
        Some(t) => match ctx.ast.kind(t) {
            AstKind::IntType
            | AstKind::UnsignedType
            | AstKind::SignedBoolType
            | AstKind::UnsignedBoolType => true,
            _ => false,
        },
        None => false,
    }
}

pub fn is_int64_type(ctx: &Ctx, typ: Option<AstId>) -> bool {
    is_int_type(ctx, typ) && type_size(ctx, typ) == 8
}

fn matches_kind(ctx: &Ctx, typ: Option<AstId>, kind: AstKind) -> bool {
    match remove_type_modifiers(ctx, typ) {
        Some(t) => ctx.ast.kind(t) == kind,
        None => false,
    }
}

pub const LONG_SIZE: i32 = 4;

/// Size in bytes; an unknown type is treated as a long.
pub fn type_size(ctx: &Ctx, typ: Option<AstId>) -> i32 {
    let t = match remove_type_modifiers(ctx, typ) {
        Some(t) => t,
        None => return LONG_SIZE,
    };
    match ctx.ast.kind(t) {
        AstKind::IntType
        | AstKind::UnsignedType
        | AstKind::FloatType
        | AstKind::SignedBoolType
        | AstKind::UnsignedBoolType => ctx
            .ast
            .left(t)
            .and_then(|sz| const_val(ctx, sz))
            .unwrap_or(i64::from(LONG_SIZE)) as i32,
        AstKind::PtrType
        | AstKind::RefType
        | AstKind::CopyRefType
        | AstKind::FuncType
        | AstKind::GenericType => LONG_SIZE,
        AstKind::VoidType => 0,
        AstKind::ArrayType => {
            let elem = type_size(ctx, ctx.ast.left(t));
            let count = ctx
                .ast
                .right(t)
                .and_then(|c| const_val(ctx, c))
                .unwrap_or(0) as i32;
            elem * count
        }
        AstKind::TupleType => 4 * list_len(&ctx.ast, ctx.ast.left(t)) as i32,
        _ => LONG_SIZE,
    }
}

fn type_size_of_expr(ctx: &Ctx, id: AstId) -> i32 {
    match ctx.ast.kind(id) {
        AstKind::IntType
        | AstKind::UnsignedType
        | AstKind::FloatType
        | AstKind::SignedBoolType
        | AstKind::UnsignedBoolType
        | AstKind::PtrType
        | AstKind::RefType
        | AstKind::CopyRefType
        | AstKind::ArrayType
        | AstKind::GenericType
        | AstKind::VoidType
        | AstKind::TupleType => type_size(ctx, Some(id)),
        _ => type_size(ctx, expr_type(ctx, id)),
    }
}

/// Declared or inferred type of an expression; `None` means "don't know,
/// assume long".
pub fn expr_type(ctx: &Ctx, id: AstId) -> Option<AstId> {
    match ctx.ast.kind(id) {
        AstKind::Integer => None,
        AstKind::BitValue => Some(ctx.types.generic),
        AstKind::Float => Some(ctx.types.float),
        AstKind::String | AstKind::StringPtr => Some(ctx.types.string),
        AstKind::Identifier | AstKind::LocalIdentifier => {
            let sym = lookup_ast_symbol(ctx, id)?;
            match (&ctx.syms.sym(sym).kind, &ctx.syms.sym(sym).val) {
                (SymbolKind::Constant, _) => Some(ctx.types.long),
                (SymbolKind::FloatConstant, _) => Some(ctx.types.float),
                (_, SymVal::Type(t)) => Some(*t),
                (SymbolKind::Function, SymVal::Func(f)) => {
                    ctx.func(*f).overall_type.or(Some(ctx.types.long))
                }
                (SymbolKind::Label, SymVal::Label { typ, .. }) => *typ,
                _ => None,
            }
        }
        AstKind::Result => {
            let f = ctx.cur_func?;
            ctx.func(f).overall_type
        }
        AstKind::Operator => {
            let op = ctx.ast.op_of(id);
            if op.is_comparison() || op.is_bool() {
                return Some(ctx.types.long);
            }
            let lt = ctx.ast.left(id).and_then(|l| expr_type(ctx, l));
            if lt.is_some() {
                return lt;
            }
            ctx.ast.right(id).and_then(|r| expr_type(ctx, r))
        }
        AstKind::Assign => ctx.ast.left(id).and_then(|l| expr_type(ctx, l)),
        AstKind::AddrOf | AstKind::AbsAddrOf | AstKind::DatAddrOf => Some(ctx.types.ulong),
        AstKind::ArrayRef => {
            let base = ctx.ast.left(id)?;
            let bt = remove_type_modifiers(ctx, expr_type(ctx, base))?;
            match ctx.ast.kind(bt) {
                AstKind::ArrayType | AstKind::PtrType => ctx.ast.left(bt),
                _ => Some(bt),
            }
        }
        AstKind::MemRef => ctx.ast.left(id),
        AstKind::Cast => ctx.ast.left(id),
        AstKind::CondResult => {
            let branches = ctx.ast.right(id)?;
            let ifpart = ctx.ast.left(branches)?;
            expr_type(ctx, ifpart)
        }
        AstKind::FuncCall => {
            let callee = ctx.ast.left(id)?;
            if !is_identifier(ctx, callee) {
                return None;
            }
            let sym = lookup_ast_symbol(ctx, callee)?;
            match ctx.syms.sym(sym).val {
                SymVal::Func(f) => ctx.func(f).overall_type,
                _ => None,
            }
        }
        AstKind::RangeRef => Some(ctx.types.ulong),
        AstKind::Sequence => {
            let r = ctx.ast.right(id).or_else(|| ctx.ast.left(id))?;
            expr_type(ctx, r)
        }
        AstKind::VaArg => ctx.ast.left(id),
        _ => None,
    }
}

pub fn array_to_pointer_type(ctx: &mut Ctx, typ: AstId) -> AstId {
    let elem = ctx.ast.left(typ);
    ctx.new_ast(AstKind::PtrType, elem, None)
}

/// Element type of an array-like base, for CSE of array references.
/// `None` means the base type cannot be resolved and the access should
/// not be touched.
pub fn array_base_type(ctx: &Ctx, var: AstId) -> Option<AstId> {
    if ctx.ast.kind(var) == AstKind::MemRef {
        return ctx.ast.left(var).or(Some(ctx.types.generic));
    }
    if !is_identifier(ctx, var) {
        return None;
    }
    let sym = lookup_ast_symbol(ctx, var)?;
    let symdata = ctx.syms.sym(sym);
    match symdata.kind {
        SymbolKind::Label => match &symdata.val {
            SymVal::Label { typ, .. } => typ.or(Some(ctx.types.generic)),
            _ => None,
        },
        SymbolKind::LocalVar | SymbolKind::Parameter | SymbolKind::TempVar => {
            // register-based locals have no addressable elements unless
            // the function keeps its locals in a memory array
            let f = ctx.cur_func?;
            if ctx.func(f).local_array.is_none() {
                return None;
            }
            var_array_elem(ctx, &symdata.val)
        }
        SymbolKind::Variable => var_array_elem(ctx, &symdata.val),
        _ => None,
    }
}

fn var_array_elem(ctx: &Ctx, val: &SymVal) -> Option<AstId> {
    match val {
        SymVal::Type(t) => {
            if ctx.ast.kind(*t) != AstKind::ArrayType {
                return None;
            }
            ctx.ast.left(*t).or(Some(ctx.types.generic))
        }
        _ => None,
    }
}

/// Short rendering of an expression for debug-formatting output.
pub fn get_expr_string(ctx: &Ctx, id: AstId) -> String {
    match ctx.ast.kind(id) {
        AstKind::Identifier | AstKind::LocalIdentifier => {
            get_user_identifier_name(ctx, id).to_string()
        }
        AstKind::Integer => format!("{}", ctx.ast.int_val(id)),
        AstKind::ArrayRef => {
            let base = ctx
                .ast
                .left(id)
                .map(|b| get_expr_string(ctx, b))
                .unwrap_or_default();
            let idx = ctx
                .ast
                .right(id)
                .map(|i| get_expr_string(ctx, i))
                .unwrap_or_default();
            format!("{}[{}]", base, idx)
        }
        _ => "(expr)".to_owned(),
    }
}
