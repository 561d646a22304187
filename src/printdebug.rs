//! Printf-based debug and PRINT lowering.
//!
//! `DEBUG(...)` statements are folded into a single printf-style call and
//! then expanded here into a sequence of runtime helper calls
//! (`_lock_io`, `_print_string`, `_print_integer`, ...). The format parser
//! understands escape sequences, field widths, precision, alignment and
//! the type specifiers below; anything unknown earns a warning, never an
//! error.

use crate::ast::util::{add_to_list, Slot};
use crate::ast::{AstId, AstKind, Op};
use crate::expr::{const_val, expr_type, get_expr_string, is_float_type};
use crate::symbol::{LookupOutcome, SymVal, SymbolKind};
use crate::Ctx;

struct DbgFmt {
    name: &'static str,
    cfmt: &'static str,
    /// Positive: zero-extend to this many bits; negative: sign-extend.
    bits: i32,
}

const DBG_BITS_DELAY: i32 = 0x1000;

const DBGFMT: &[DbgFmt] = &[
    DbgFmt { name: "uchar#", cfmt: "%c", bits: 0 },
    DbgFmt { name: "zstr", cfmt: "%s", bits: 0 },
    DbgFmt { name: "udec", cfmt: "%u", bits: 0 },
    DbgFmt { name: "fdec", cfmt: "%g", bits: 0 },
    DbgFmt { name: "udec_byte", cfmt: "%03u", bits: 8 },
    DbgFmt { name: "udec_word", cfmt: "%05u", bits: 16 },
    DbgFmt { name: "udec_long", cfmt: "%09u", bits: 0 },
    DbgFmt { name: "sdec", cfmt: "%d", bits: 0 },
    DbgFmt { name: "sdec_byte", cfmt: "%3d", bits: -8 },
    DbgFmt { name: "sdec_word", cfmt: "%5d", bits: -16 },
    DbgFmt { name: "sdec_long", cfmt: "%9d", bits: 0 },
    DbgFmt { name: "uhex", cfmt: "$%x", bits: 0 },
    DbgFmt { name: "uhex_byte", cfmt: "$%02x", bits: 8 },
    DbgFmt { name: "uhex_word", cfmt: "$%04x", bits: 16 },
    DbgFmt { name: "uhex_long", cfmt: "$%08x", bits: 0 },
    DbgFmt { name: "ubin", cfmt: "%%%b", bits: 0 },
    DbgFmt { name: "ubin_byte", cfmt: "%%%08b", bits: 8 },
    DbgFmt { name: "ubin_word", cfmt: "%%%016b", bits: 16 },
    DbgFmt { name: "ubin_long", cfmt: "%%%032b", bits: 0 },
    DbgFmt { name: "bool", cfmt: "%B", bits: 0 },
    DbgFmt { name: "dly", cfmt: "%.0s", bits: DBG_BITS_DELAY },
];

fn const_or_default(ctx: &Ctx, name: &str, default: i64) -> i64 {
    let m = match ctx.cur_module {
        Some(m) => m,
        None => return default,
    };
    let table = ctx.module(m).objsyms;
    match ctx.syms.lookup(table, name) {
        LookupOutcome::Found(sym) => {
            let s = ctx.syms.sym(sym);
            if s.kind != SymbolKind::Constant {
                return default;
            }
            match s.val {
                SymVal::Int(v) => v,
                SymVal::Expr(e) => const_val(ctx, e).unwrap_or(default),
                _ => default,
            }
        }
        _ => default,
    }
}

/// One item of a DEBUG list: translate its format function into printf
/// directives and return the (possibly extended) argument list.
fn format_for_debug(
    ctx: &mut Ctx,
    fb: &mut String,
    itemname: &str,
    args: Option<AstId>,
    mut needcomma: bool,
) -> Option<AstId> {
    let mut name = itemname;
    let mut output_name = true;
    if let Some(stripped) = name.strip_suffix('_') {
        output_name = false;
        name = stripped;
    }
    let fmt = DBGFMT.iter().find(|f| util::eq_nocase(f.name, name));
    let fmt = match fmt {
        Some(f) => f,
        None => {
            let msg = format!("Unhandled debug format {}", itemname);
            ctx.warning(args, &msg);
            return None;
        }
    };
    let bits = fmt.bits;
    if bits == DBG_BITS_DELAY {
        output_name = false;
    }
    let mut outlist: Option<AstId> = None;
    let mut cur = args;
    while let Some(a) = cur {
        let mut arg = match ctx.ast.left(a) {
            Some(arg) => arg,
            None => break,
        };
        cur = ctx.ast.right(a);

        if needcomma {
            fb.push_str(", ");
        }
        if output_name {
            let idname = get_expr_string(ctx, arg);
            fb.push_str(&format!("{} = {}", idname, fmt.cfmt));
        } else {
            fb.push_str(fmt.cfmt);
        }
        needcomma = true;
        if bits == DBG_BITS_DELAY {
            // a dly() item just pauses the output
            let callee = ctx.ast_ident("_waitms");
            let arglist = ctx.new_ast(AstKind::ExprList, Some(arg), None);
            arg = ctx.new_ast(AstKind::FuncCall, Some(callee), Some(arglist));
        } else if bits & 0x1f != 0 {
            let op = if bits < 0 { Op::SignExtend } else { Op::ZeroExtend };
            let width = ctx.ast_int(i64::from(bits.abs()));
            arg = ctx.ast_op(op, Some(arg), Some(width));
        }
        let wrapped = ctx.new_ast(AstKind::ExprList, Some(arg), None);
        outlist = add_to_list(&mut ctx.ast, outlist, Some(wrapped));
    }
    outlist
}

/// Build the printf-style lowering of one DEBUG() statement, or `None`
/// when debugging is disabled or masked off.
pub fn create_printf_debug(
    ctx: &mut Ctx,
    exprlist: Option<AstId>,
    dbgmask: Option<AstId>,
) -> Option<AstId> {
    if !ctx.opts.debug {
        return None;
    }
    if ctx.opts.brk_debug {
        return Some(ctx.new_ast(AstKind::BrkDebug, exprlist, dbgmask));
    }
    if const_or_default(ctx, "DEBUG_DISABLE", 0) != 0 {
        return None;
    }
    if let Some(mask) = dbgmask {
        let enabled = const_or_default(ctx, "DEBUG_MASK", -1) as u32;
        let select = const_val(ctx, mask).unwrap_or(0) as u32;
        if enabled & (1u32 << (select & 31)) == 0 {
            return None;
        }
    }

    let mut fb = String::new();
    let mut outlist: Option<AstId> = None;
    let mut exprlist = exprlist;

    // a leading label means "prefix with the cog number"
    if let Some(el) = exprlist {
        let first = ctx.ast.left(el);
        if first.map(|f| ctx.ast.kind(f) == AstKind::Label).unwrap_or(false) {
            fb.push_str("Cog%d  ");
            let callee = ctx.ast_ident("_cogid");
            let call = ctx.new_ast(AstKind::FuncCall, Some(callee), None);
            let wrapped = ctx.new_ast(AstKind::ExprList, Some(call), None);
            outlist = Some(wrapped);
            exprlist = ctx.ast.right(el);
        }
    }

    let mut needcomma = false;
    let mut cur = exprlist;
    while let Some(el) = cur {
        if ctx.ast.kind(el) != AstKind::ExprList {
            break;
        }
        let item = ctx.ast.left(el);
        cur = ctx.ast.right(el);
        let item = match item {
            Some(i) => i,
            None => continue,
        };
        match ctx.ast.kind(item) {
            AstKind::String => {
                let sub = ctx.new_ast(AstKind::StringPtr, Some(item), None);
                let wrapped = ctx.new_ast(AstKind::ExprList, Some(sub), None);
                outlist = add_to_list(&mut ctx.ast, outlist, Some(wrapped));
                fb.push_str("%s");
                needcomma = false;
            }
            AstKind::FuncCall => {
                let name = ctx
                    .ast
                    .left(item)
                    .map(|callee| crate::expr::get_user_identifier_name(ctx, callee))
                    .unwrap_or_default();
                let params = ctx.ast.right(item);
                if let Some(newarg) = format_for_debug(ctx, &mut fb, &name, params, needcomma) {
                    needcomma = true;
                    outlist = add_to_list(&mut ctx.ast, outlist, Some(newarg));
                }
            }
            _ => {}
        }
    }
    fb.push_str("\r\n");

    let fmtnode = ctx.ast_string(&fb);
    let sub = ctx.new_ast(AstKind::ExprList, Some(fmtnode), None);
    let args = add_to_list(&mut ctx.ast, Some(sub), outlist);
    Some(gen_printf(ctx, args))
}

/// Flag bits packed into the third argument of `_print_integer` and
/// friends: low byte is the minimum width, next byte the precision,
/// bit 16 left-justify, bit 17 zero-pad.
fn pack_fmt(width: i64, prec: i64, left: bool, zero: bool) -> i64 {
    (width & 0xff)
        | ((prec & 0xff) << 8)
        | if left { 1 << 16 } else { 0 }
        | if zero { 1 << 17 } else { 0 }
}

fn runtime_call(ctx: &mut Ctx, name: &str, args: &[AstId]) -> AstId {
    let callee = ctx.ast_ident(name);
    let mut list: Option<AstId> = None;
    for &a in args {
        let wrapped = ctx.new_ast(AstKind::ExprList, Some(a), None);
        list = add_to_list(&mut ctx.ast, list, Some(wrapped));
    }
    ctx.new_ast(AstKind::FuncCall, Some(callee), list)
}

fn push_call(ctx: &mut Ctx, list: &mut Option<AstId>, call: AstId) {
    let stmt = ctx.ast_stmt(call);
    *list = add_to_list(&mut ctx.ast, *list, Some(stmt));
}

/// Expand a printf-style call (format string first, then the arguments)
/// into a statement list of runtime helper calls bracketed by the I/O
/// lock.
pub fn gen_printf(ctx: &mut Ctx, arglist: Option<AstId>) -> AstId {
    let mut stmts: Option<AstId> = None;
    let lock = runtime_call(ctx, "_lock_io", &[]);
    push_call(ctx, &mut stmts, lock);

    let mut args = arglist;
    let fmt = match args {
        Some(a) => {
            let f = ctx.ast.left(a);
            args = ctx.ast.right(a);
            f
        }
        None => None,
    };
    let fmtstr = crate::ast::util::get_string(&ctx.ast, fmt);

    let mut lit = String::new();
    let mut chars = fmtstr.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => lit.push('\n'),
                Some('t') => lit.push('\t'),
                Some('r') => lit.push('\r'),
                Some('\\') => lit.push('\\'),
                Some(other) => lit.push(other),
                None => break,
            }
            continue;
        }
        if c != '%' {
            lit.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            lit.push('%');
            continue;
        }
        // flush the pending literal text
        if !lit.is_empty() {
            let s = ctx.ast_string(&lit);
            let call = runtime_call(ctx, "_print_string", &[s]);
            push_call(ctx, &mut stmts, call);
            lit.clear();
        }
        // parse flags, width, precision
        let mut left = false;
        let mut zero = false;
        loop {
            match chars.peek() {
                Some('-') => {
                    left = true;
                    chars.next();
                }
                Some('0') => {
                    zero = true;
                    chars.next();
                }
                _ => break,
            }
        }
        let mut width = 0i64;
        while let Some(&d) = chars.peek() {
            if let Some(v) = d.to_digit(10) {
                width = width * 10 + i64::from(v);
                chars.next();
            } else {
                break;
            }
        }
        let mut prec = 0i64;
        if chars.peek() == Some(&'.') {
            chars.next();
            while let Some(&d) = chars.peek() {
                if let Some(v) = d.to_digit(10) {
                    prec = prec * 10 + i64::from(v);
                    chars.next();
                } else {
                    break;
                }
            }
        }
        let spec = chars.next().unwrap_or('%');
        let arg = match args {
            Some(a) => {
                let v = ctx.ast.left(a);
                args = ctx.ast.right(a);
                v
            }
            None => None,
        };
        let arg = match arg {
            Some(a) => a,
            None => {
                ctx.warning(fmt, "not enough arguments for format string");
                break;
            }
        };
        let fmtbits = ctx.ast_int(pack_fmt(width, prec, left, zero));
        let call = match spec {
            'd' | 'i' => {
                let base = ctx.ast_int(10);
                runtime_call(ctx, "_print_integer", &[arg, base, fmtbits])
            }
            'u' => {
                let base = ctx.ast_int(10);
                runtime_call(ctx, "_print_unsigned", &[arg, base, fmtbits])
            }
            'x' | 'X' => {
                let base = ctx.ast_int(16);
                runtime_call(ctx, "_print_unsigned", &[arg, base, fmtbits])
            }
            'b' => {
                let base = ctx.ast_int(2);
                runtime_call(ctx, "_print_unsigned", &[arg, base, fmtbits])
            }
            'c' => runtime_call(ctx, "_print_char", &[arg]),
            's' => runtime_call(ctx, "_print_string", &[arg]),
            'f' | 'g' | 'e' => {
                let typ = expr_type(ctx, arg);
                let arg = if is_float_type(ctx, typ) {
                    arg
                } else {
                    ctx.new_ast(AstKind::ToFloat, Some(arg), None)
                };
                runtime_call(ctx, "_print_float", &[arg, fmtbits])
            }
            'B' => runtime_call(ctx, "_print_bool", &[arg]),
            other => {
                let msg = format!("unknown format specifier `%{}'", other);
                ctx.warning(fmt, &msg);
                let base = ctx.ast_int(10);
                runtime_call(ctx, "_print_integer", &[arg, base, fmtbits])
            }
        };
        push_call(ctx, &mut stmts, call);
    }
    if !lit.is_empty() {
        let s = ctx.ast_string(&lit);
        let call = runtime_call(ctx, "_print_string", &[s]);
        push_call(ctx, &mut stmts, call);
    }
    let unlock = runtime_call(ctx, "_unlock_io", &[]);
    push_call(ctx, &mut stmts, unlock);
    stmts.unwrap_or_else(|| {
        let nop = ctx.new_ast(AstKind::Comment, None, None);
        ctx.ast_stmt(nop)
    })
}

/// Lower a BASIC `PRINT` statement: each item becomes the helper call for
/// its type, with a newline at the end unless the item list ends with a
/// separator character node.
pub fn lower_print(ctx: &mut Ctx, slot: Slot, ast: AstId) {
    let save = ctx.report_as(Some(ast));
    let mut stmts: Option<AstId> = None;
    let lock = runtime_call(ctx, "_lock_io", &[]);
    push_call(ctx, &mut stmts, lock);
    let mut newline = true;
    let mut cur = ctx.ast.right(ast);
    while let Some(el) = cur {
        if ctx.ast.kind(el) != AstKind::ExprList {
            break;
        }
        let item = ctx.ast.left(el);
        cur = ctx.ast.right(el);
        let item = match item {
            Some(i) => i,
            None => continue,
        };
        newline = true;
        match ctx.ast.kind(item) {
            AstKind::Char => {
                // separator: ';' suppresses the newline, ',' tabs
                match ctx.ast.int_val(item) as u8 {
                    b';' => newline = false,
                    b',' => {
                        let tab = ctx.ast_int(9);
                        let call = runtime_call(ctx, "_print_char", &[tab]);
                        push_call(ctx, &mut stmts, call);
                        newline = false;
                    }
                    _ => {}
                }
            }
            AstKind::String | AstKind::StringPtr => {
                let s = if ctx.ast.kind(item) == AstKind::String {
                    ctx.new_ast(AstKind::StringPtr, Some(item), None)
                } else {
                    item
                };
                let call = runtime_call(ctx, "_print_string", &[s]);
                push_call(ctx, &mut stmts, call);
            }
            _ => {
                let typ = expr_type(ctx, item);
                let call = if is_float_type(ctx, typ) {
                    let zero = ctx.ast_int(0);
                    runtime_call(ctx, "_print_float", &[item, zero])
                } else {
                    let base = ctx.ast_int(10);
                    let zero = ctx.ast_int(0);
                    runtime_call(ctx, "_print_integer", &[item, base, zero])
                };
                push_call(ctx, &mut stmts, call);
            }
        }
    }
    if newline {
        let nl = ctx.ast_int(13);
        let call = runtime_call(ctx, "_print_char", &[nl]);
        push_call(ctx, &mut stmts, call);
    }
    let unlock = runtime_call(ctx, "_unlock_io", &[]);
    push_call(ctx, &mut stmts, unlock);
    if let Some(lowered) = stmts {
        ctx.ast.overwrite(ast, lowered);
    }
    let _ = slot;
    ctx.report_done(save);
}

/// Lower a `PrintDebug` node (a collected DEBUG statement).
pub fn lower_print_debug(ctx: &mut Ctx, slot: Slot, ast: AstId) {
    let save = ctx.report_as(Some(ast));
    let exprlist = ctx.ast.left(ast);
    let dbgmask = ctx.ast.right(ast);
    match create_printf_debug(ctx, exprlist, dbgmask) {
        Some(lowered) => ctx.ast.overwrite(ast, lowered),
        None => ctx.ast.nullify(ast),
    }
    let _ = slot;
    ctx.report_done(save);
}
