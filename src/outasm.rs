//! AST-to-IR lowering for the register backends.
//!
//! Each function is compiled to its own instruction list, locally
//! optimized, possibly marked for inlining, and then appended to the
//! program-wide list along with the register and hub data sections.

use std::collections::HashMap;

use pir::emit::{
    emit_jump, emit_label, emit_long, emit_long_ptr, emit_move, emit_op0, emit_op1, emit_op2,
    emit_string, TempRegs,
};
use pir::optimize::{expand_inlines, optimize_ir_global, optimize_ir_local, should_be_inlined};
use pir::{IrCond, IrList, IrOp, IrSpace, MemWidth, OpId, OpSpace, OperandKind, FLAG_WC, FLAG_WZ};

use crate::ast::util::get_string;
use crate::ast::{AstId, AstKind, Op};
use crate::expr::{
    const_val, fold_if_const, get_identifier_name, is_const_expr, lookup_ast_symbol, type_size,
};
use crate::hltransform::{transform_range_assign, transform_range_use};
use crate::module::{BackendData, FuncId, ModId, FUNC_IS_RECURSIVE};
use crate::symbol::{SymVal, SymbolKind};
use crate::{Ctx, OPT_INLINE_SMALLFUNCS, OPT_REMOVE_UNUSED_FUNCS};

/// Code generator state for one program.
pub struct AsmGen {
    pub sp: IrSpace,
    pub ops: OpSpace,
    /// The assembled program: all functions plus data.
    pub program: IrList,
    temps: TempRegs,
    quitlabel: Option<OpId>,
    nextlabel: Option<OpId>,
    quit_stack: Vec<(Option<OpId>, Option<OpId>)>,
    mul_ops: Option<(OpId, OpId, OpId)>,
    div_ops: Option<(OpId, OpId, OpId)>,
    /// String literals parked in hub memory: `(label, exprlist)`.
    hub_strings: Vec<(OpId, AstId)>,
    inlines: pir::optimize::InlineMap,
    newline: Option<OpId>,
}

impl AsmGen {
    pub fn new() -> AsmGen {
        AsmGen {
            sp: IrSpace::new(),
            ops: OpSpace::new(),
            program: IrList::new(),
            temps: TempRegs::new(""),
            quitlabel: None,
            nextlabel: None,
            quit_stack: Vec::new(),
            mul_ops: None,
            div_ops: None,
            hub_strings: Vec::new(),
            inlines: HashMap::new(),
            newline: None,
        }
    }
}

fn local_name(ctx: &Ctx, f: FuncId, name: &str) -> String {
    format!("{}_{}_", ctx.func(f).name, name)
}

fn global_name(_ctx: &Ctx, name: &str) -> String {
    name.to_owned()
}

fn push_quit_next(g: &mut AsmGen, quit: OpId, next: OpId) {
    g.quit_stack.push((g.quitlabel, g.nextlabel));
    g.quitlabel = Some(quit);
    g.nextlabel = Some(next);
}

fn pop_quit_next(ctx: &mut Ctx, g: &mut AsmGen) {
    match g.quit_stack.pop() {
        Some((q, n)) => {
            g.quitlabel = q;
            g.nextlabel = n;
        }
        None => ctx.internal_error(None, "empty loop stack"),
    }
}

fn cond_from_op(op: Op) -> Option<IrCond> {
    match op {
        Op::Ne => Some(IrCond::NE),
        Op::Eq => Some(IrCond::EQ),
        Op::Ge => Some(IrCond::GE),
        Op::Le => Some(IrCond::LE),
        Op::Lt => Some(IrCond::LT),
        Op::Gt => Some(IrCond::GT),
        Op::Ltu => Some(IrCond::C),
        Op::Geu => Some(IrCond::NC),
        _ => None,
    }
}

fn compile_identifier_for_func(ctx: &mut Ctx, g: &mut AsmGen, expr: AstId, f: FuncId) -> OpId {
    let name = match get_identifier_name(ctx, expr) {
        Some(n) => n,
        None => {
            ctx.internal_error(Some(expr), "expected an identifier");
            return g.ops.new_imm(0);
        }
    };
    let table = ctx.func(f).localsyms;
    if let crate::symbol::LookupOutcome::Found(sym) = ctx.syms.lookup(table, &name) {
        match ctx.syms.sym(sym).kind {
            SymbolKind::Parameter => {
                let n = local_name(ctx, f, &name);
                return g.ops.get_global(OperandKind::Arg, &n, 0);
            }
            SymbolKind::Variable => {
                let n = global_name(ctx, &name);
                return g.ops.get_global(OperandKind::Reg, &n, 0);
            }
            _ => {}
        }
    }
    let n = local_name(ctx, f, &name);
    g.ops.get_global(OperandKind::Local, &n, 0)
}

fn compile_identifier(ctx: &mut Ctx, g: &mut AsmGen, expr: AstId) -> OpId {
    if let Some(sym) = lookup_ast_symbol(ctx, expr) {
        let symdata = ctx.syms.sym(sym);
        if symdata.kind == SymbolKind::Constant {
            let name = symdata.name.clone();
            let val = match symdata.val {
                SymVal::Int(v) => v,
                SymVal::Expr(e) => const_val(ctx, e).unwrap_or(0),
                _ => 0,
            } as i32;
            if val >= 0 && val < 512 {
                // keep the symbolic name in the listing
                return g.ops.new_operand(OperandKind::Imm, &name, val);
            }
            return g.ops.new_imm(val);
        }
        if symdata.kind == SymbolKind::HwReg {
            if let SymVal::HwReg(hw) = symdata.val {
                let cname = ctx.hwreg(hw).cname;
                return g.ops.get_global(OperandKind::HwReg, cname, 0);
            }
        }
    }
    match ctx.cur_func {
        Some(f) => compile_identifier_for_func(ctx, g, expr, f),
        None => {
            ctx.internal_error(Some(expr), "identifier outside a function");
            g.ops.new_imm(0)
        }
    }
}

fn compile_hwreg(ctx: &mut Ctx, g: &mut AsmGen, expr: AstId) -> OpId {
    match ctx.ast.hwreg_val(expr) {
        Some(hw) => {
            let cname = ctx.hwreg(hw).cname;
            g.ops.get_global(OperandKind::HwReg, cname, 0)
        }
        None => {
            ctx.internal_error(Some(expr), "hardware register node with no descriptor");
            g.ops.new_imm(0)
        }
    }
}

fn note_helper(ctx: &mut Ctx, mul: bool) {
    let m = match ctx.cur_module {
        Some(m) => m,
        None => return,
    };
    let entry = ctx
        .module_mut(m)
        .bedata
        .get_or_insert(BackendData::Asm {
            need_mul_helper: false,
            need_div_helper: false,
        });
    let BackendData::Asm {
        need_mul_helper,
        need_div_helper,
    } = entry;
    if mul {
        *need_mul_helper = true;
    } else {
        *need_div_helper = true;
    }
}

fn compile_mul(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, expr: AstId, gethi: bool) -> OpId {
    let lhs = compile_expression(ctx, g, irl, ctx.ast.left(expr).unwrap());
    let rhs = compile_expression(ctx, g, irl, ctx.ast.right(expr).unwrap());
    let temp = g.temps.get(&mut g.ops);
    let (mulfunc, mula, mulb) = match g.mul_ops {
        Some(t) => t,
        None => {
            let f = g.ops.new_operand(OperandKind::ImmLabel, "multiply_", 0);
            let a = g.ops.get_global(OperandKind::Arg, "muldiva_", 0);
            let b = g.ops.get_global(OperandKind::Arg, "muldivb_", 0);
            g.mul_ops = Some((f, a, b));
            (f, a, b)
        }
    };
    note_helper(ctx, true);
    emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, mula, lhs);
    emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, mulb, rhs);
    emit_op1(&mut g.sp, irl, IrOp::CALL, mulfunc);
    let src = if gethi { mulb } else { mula };
    emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, temp, src);
    temp
}

fn compile_div(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, expr: AstId, getmod: bool) -> OpId {
    let lhs = compile_expression(ctx, g, irl, ctx.ast.left(expr).unwrap());
    let rhs = compile_expression(ctx, g, irl, ctx.ast.right(expr).unwrap());
    let temp = g.temps.get(&mut g.ops);
    let (divfunc, diva, divb) = match g.div_ops {
        Some(t) => t,
        None => {
            let f = g.ops.new_operand(OperandKind::ImmLabel, "divide_", 0);
            let a = g.ops.get_global(OperandKind::Arg, "muldiva_", 0);
            let b = g.ops.get_global(OperandKind::Arg, "muldivb_", 0);
            g.div_ops = Some((f, a, b));
            (f, a, b)
        }
    };
    note_helper(ctx, false);
    emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, diva, lhs);
    emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, divb, rhs);
    emit_op1(&mut g.sp, irl, IrOp::CALL, divfunc);
    let src = if getmod { divb } else { diva };
    emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, temp, src);
    temp
}

/// Lower one comparison (or truth test) to a compare instruction and
/// return the condition under which it is true.
fn compile_basic_bool_expression(
    ctx: &mut Ctx,
    g: &mut AsmGen,
    irl: &mut IrList,
    expr: AstId,
) -> IrCond {
    let opkind = if ctx.ast.kind(expr) == AstKind::Operator {
        ctx.ast.op_of(expr)
    } else {
        Op::Unknown
    };
    let unsigned = match opkind {
        Op::Ltu | Op::Gtu | Op::Leu | Op::Geu => true,
        _ => false,
    };
    let (mut cond, mut lhs, mut rhs) = match opkind {
        Op::Ne | Op::Eq | Op::Lt | Op::Gt | Op::Le | Op::Ge | Op::Ltu | Op::Geu => {
            let cond = cond_from_op(opkind).unwrap();
            let lhs = compile_expression(ctx, g, irl, ctx.ast.left(expr).unwrap());
            let rhs = compile_expression(ctx, g, irl, ctx.ast.right(expr).unwrap());
            (cond, lhs, rhs)
        }
        Op::Gtu | Op::Leu => {
            // no direct encoding; swap the operands
            let cond = if opkind == Op::Gtu { IrCond::C } else { IrCond::NC };
            let lhs = compile_expression(ctx, g, irl, ctx.ast.right(expr).unwrap());
            let rhs = compile_expression(ctx, g, irl, ctx.ast.left(expr).unwrap());
            (cond, lhs, rhs)
        }
        _ => {
            // anything else is compared against zero
            let lhs = compile_expression(ctx, g, irl, expr);
            let rhs = g.ops.new_operand(OperandKind::Imm, "", 0);
            (IrCond::NE, lhs, rhs)
        }
    };
    // the immediate goes on the right
    if g.ops.is_immediate(lhs) {
        std::mem::swap(&mut lhs, &mut rhs);
        cond = cond.flip_sides();
    }
    let flags = match cond {
        IrCond::NE | IrCond::EQ => FLAG_WZ,
        _ => FLAG_WZ | FLAG_WC,
    };
    let opc = if unsigned { IrOp::CMP } else { IrOp::CMPS };
    let lhs = dereference(ctx, g, irl, lhs);
    let ir = emit_op2(&mut g.sp, irl, opc, lhs, rhs);
    g.sp[ir].flags |= flags;
    cond
}

/// Short-circuit boolean compilation: only the instructions on the taken
/// path execute. Either destination may be absent, meaning fall through.
pub fn compile_bool_branches(
    ctx: &mut Ctx,
    g: &mut AsmGen,
    irl: &mut IrList,
    expr: AstId,
    truedest: Option<OpId>,
    falsedest: Option<OpId>,
) {
    let opkind = if ctx.ast.kind(expr) == AstKind::Operator {
        ctx.ast.op_of(expr)
    } else {
        Op::Unknown
    };
    match opkind {
        Op::BoolNot => {
            let inner = ctx.ast.right(expr).or_else(|| ctx.ast.left(expr));
            if let Some(inner) = inner {
                compile_bool_branches(ctx, g, irl, inner, falsedest, truedest);
            }
        }
        Op::BoolAnd => {
            let mut dummy = None;
            let falsedest = match falsedest {
                Some(f) => f,
                None => {
                    let l = g.ops.new_label();
                    dummy = Some(l);
                    l
                }
            };
            let lhs = ctx.ast.left(expr).unwrap();
            let rhs = ctx.ast.right(expr).unwrap();
            compile_bool_branches(ctx, g, irl, lhs, None, Some(falsedest));
            compile_bool_branches(ctx, g, irl, rhs, truedest, Some(falsedest));
            if let Some(l) = dummy {
                emit_label(&mut g.sp, irl, l);
            }
        }
        Op::BoolOr => {
            let mut dummy = None;
            let truedest = match truedest {
                Some(t) => t,
                None => {
                    let l = g.ops.new_label();
                    dummy = Some(l);
                    l
                }
            };
            let lhs = ctx.ast.left(expr).unwrap();
            let rhs = ctx.ast.right(expr).unwrap();
            compile_bool_branches(ctx, g, irl, lhs, Some(truedest), None);
            compile_bool_branches(ctx, g, irl, rhs, Some(truedest), falsedest);
            if let Some(l) = dummy {
                emit_label(&mut g.sp, irl, l);
            }
        }
        _ => {
            let cond = if is_const_expr(ctx, expr) {
                if const_val(ctx, expr).unwrap_or(0) == 0 {
                    IrCond::FALSE
                } else {
                    IrCond::TRUE
                }
            } else {
                compile_basic_bool_expression(ctx, g, irl, expr)
            };
            if let Some(t) = truedest {
                emit_jump(&mut g.sp, irl, cond, t);
            }
            if let Some(f) = falsedest {
                emit_jump(&mut g.sp, irl, cond.invert(), f);
            }
        }
    }
}

fn opc_from_op(ctx: &mut Ctx, op: Op) -> IrOp {
    match op {
        Op::Add => IrOp::ADD,
        Op::Sub => IrOp::SUB,
        Op::BitAnd => IrOp::AND,
        Op::BitOr => IrOp::OR,
        Op::BitXor => IrOp::XOR,
        Op::Shl => IrOp::SHL,
        Op::Sar => IrOp::SAR,
        Op::Shr => IrOp::SHR,
        Op::Negate => IrOp::NEG,
        Op::Abs => IrOp::ABS,
        Op::BitNot => IrOp::NOT,
        Op::Rotl => IrOp::ROL,
        Op::Rotr => IrOp::ROR,
        Op::Rev => IrOp::REV,
        Op::LimitMin => IrOp::MINS,
        Op::LimitMax => IrOp::MAXS,
        _ => {
            let msg = format!("Unsupported operator {:?}", op);
            ctx.internal_error(None, &msg);
            IrOp::UNKNOWN
        }
    }
}

/// Memory references must be loaded before use as a plain source.
fn dereference(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, op: OpId) -> OpId {
    let _ = ctx;
    if g.ops.is_mem_ref(op) {
        let temp = g.temps.get(&mut g.ops);
        emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, temp, op);
        temp
    } else {
        op
    }
}

fn compile_basic_operator(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, expr: AstId) -> OpId {
    let op = ctx.ast.op_of(expr);
    match op {
        Op::Add
        | Op::Sub
        | Op::BitXor
        | Op::BitAnd
        | Op::BitOr
        | Op::Shl
        | Op::Shr
        | Op::Sar
        | Op::Rotl
        | Op::Rotr
        | Op::LimitMin
        | Op::LimitMax => {
            let temp = g.temps.get(&mut g.ops);
            let left = compile_expression(ctx, g, irl, ctx.ast.left(expr).unwrap());
            let right = compile_expression(ctx, g, irl, ctx.ast.right(expr).unwrap());
            emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, temp, left);
            let right = dereference(ctx, g, irl, right);
            let opc = opc_from_op(ctx, op);
            emit_op2(&mut g.sp, irl, opc, temp, right);
            temp
        }
        Op::Negate | Op::Abs | Op::BitNot | Op::Rev => {
            let temp = g.temps.get(&mut g.ops);
            let right = compile_expression(ctx, g, irl, ctx.ast.right(expr).unwrap());
            let right = dereference(ctx, g, irl, right);
            let opc = opc_from_op(ctx, op);
            emit_op2(&mut g.sp, irl, opc, temp, right);
            temp
        }
        Op::BoolNot
        | Op::BoolAnd
        | Op::BoolOr
        | Op::Eq
        | Op::Ne
        | Op::Le
        | Op::Ge
        | Op::Lt
        | Op::Gt
        | Op::Ltu
        | Op::Gtu
        | Op::Leu
        | Op::Geu => {
            // truth values are all-ones: start with 0, invert if taken
            let temp = g.temps.get(&mut g.ops);
            let zero = g.ops.new_imm(0);
            let skiplabel = g.ops.new_label();
            emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, temp, zero);
            compile_bool_branches(ctx, g, irl, expr, None, Some(skiplabel));
            emit_op2(&mut g.sp, irl, IrOp::NOT, temp, temp);
            emit_label(&mut g.sp, irl, skiplabel);
            temp
        }
        _ => {
            let msg = format!("Unsupported operator {:?}", op);
            ctx.internal_error(Some(expr), &msg);
            g.ops.new_imm(0)
        }
    }
}

fn compile_operator(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, expr: AstId) -> OpId {
    let op = ctx.ast.op_of(expr);
    match op {
        Op::Increment | Op::Decrement => {
            let arith = if op == Op::Increment { Op::Add } else { Op::Sub };
            if let Some(target) = ctx.ast.left(expr) {
                // postfix: save the old value
                let save = ctx.report_as(Some(expr));
                let one = ctx.ast_int(1);
                let addone = ctx.ast_op_assign(arith, target, one);
                ctx.report_done(save);
                let temp = g.temps.get(&mut g.ops);
                let lhs = compile_expression(ctx, g, irl, target);
                emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, temp, lhs);
                compile_expression(ctx, g, irl, addone);
                temp
            } else {
                let target = ctx.ast.right(expr).unwrap();
                let save = ctx.report_as(Some(expr));
                let one = ctx.ast_int(1);
                let addone = ctx.ast_op_assign(arith, target, one);
                ctx.report_done(save);
                compile_expression(ctx, g, irl, addone)
            }
        }
        Op::Mul => compile_mul(ctx, g, irl, expr, false),
        Op::HighMult => compile_mul(ctx, g, irl, expr, true),
        Op::Div => compile_div(ctx, g, irl, expr, false),
        Op::Mod => compile_div(ctx, g, irl, expr, true),
        Op::BitAnd => {
            // a & ~b has a single-instruction form
            let rhs = ctx.ast.right(expr).unwrap();
            if ctx.ast.kind(rhs) == AstKind::Operator && ctx.ast.op_of(rhs) == Op::BitNot {
                let lhs = compile_expression(ctx, g, irl, ctx.ast.left(expr).unwrap());
                let inner = compile_expression(ctx, g, irl, ctx.ast.right(rhs).unwrap());
                let temp = g.temps.get(&mut g.ops);
                emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, temp, lhs);
                let inner = dereference(ctx, g, irl, inner);
                emit_op2(&mut g.sp, irl, IrOp::ANDN, temp, inner);
                return temp;
            }
            compile_basic_operator(ctx, g, irl, expr)
        }
        _ => compile_basic_operator(ctx, g, irl, expr),
    }
}

fn apply_array_index(
    ctx: &mut Ctx,
    g: &mut AsmGen,
    irl: &mut IrList,
    base: OpId,
    offset: OpId,
) -> OpId {
    let (width, basereg) = match g.ops[base].kind {
        OperandKind::Mem { width, base } => (width, base),
        _ => {
            ctx.internal_error(None, "array does not reference memory");
            return base;
        }
    };
    let siz = width.size();
    let shift = width.shift();
    if g.ops.is_immediate(offset) {
        let idx = g.ops[offset].val * siz;
        if idx == 0 {
            return base;
        }
        let off = g.ops[base].val + idx;
        return g.ops.new_operand(
            OperandKind::Mem {
                width,
                base: basereg,
            },
            "",
            off,
        );
    }
    let newbase = g.temps.get(&mut g.ops);
    emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, newbase, offset);
    if shift != 0 {
        let sh = g.ops.new_imm(shift);
        emit_op2(&mut g.sp, irl, IrOp::SHL, newbase, sh);
    }
    emit_op2(&mut g.sp, irl, IrOp::ADD, newbase, basereg);
    g.ops.new_operand(
        OperandKind::Mem {
            width,
            base: newbase,
        },
        "",
        0,
    )
}

fn compile_memref(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, expr: AstId) -> OpId {
    let addr = compile_expression(ctx, g, irl, ctx.ast.right(expr).unwrap());
    let typ = ctx.ast.left(expr);
    let size = type_size(ctx, typ);
    let width = match MemWidth::from_size(size) {
        Some(w) => w,
        None => {
            ctx.error(Some(expr), "Illegal size for memory reference");
            MemWidth::Long
        }
    };
    g.ops
        .new_operand(OperandKind::Mem { width, base: addr }, "", 0)
}

fn compile_cond_result(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, expr: AstId) -> OpId {
    let cond = ctx.ast.left(expr).unwrap();
    let branches = ctx.ast.right(expr).unwrap();
    let ifpart = ctx.ast.left(branches);
    let elsepart = ctx.ast.right(branches);
    let r = g.temps.get(&mut g.ops);
    let label1 = g.ops.new_label();
    let label2 = g.ops.new_label();

    compile_bool_branches(ctx, g, irl, cond, None, Some(label1));
    if let Some(ifpart) = ifpart {
        let tmp = compile_expression(ctx, g, irl, ifpart);
        emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, r, tmp);
    }
    emit_jump(&mut g.sp, irl, IrCond::TRUE, label2);

    emit_label(&mut g.sp, irl, label1);
    if let Some(elsepart) = elsepart {
        let tmp = compile_expression(ctx, g, irl, elsepart);
        emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, r, tmp);
    }
    emit_label(&mut g.sp, irl, label2);
    r
}

fn param_name(ctx: &Ctx, param: AstId) -> Option<std::rc::Rc<str>> {
    match ctx.ast.kind(param) {
        AstKind::Identifier | AstKind::LocalIdentifier => get_identifier_name(ctx, param),
        AstKind::ArrayDecl | AstKind::DeclareVar => {
            let inner = ctx.ast.left(param).or_else(|| ctx.ast.right(param))?;
            get_identifier_name(ctx, inner)
        }
        _ => None,
    }
}

fn compile_funccall(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, expr: AstId) -> OpId {
    let callee = match ctx.ast.left(expr) {
        Some(c) => c,
        None => {
            ctx.internal_error(Some(expr), "call with no callee");
            return g.ops.new_imm(0);
        }
    };
    let func = lookup_ast_symbol(ctx, callee).and_then(|sym| match ctx.syms.sym(sym).val {
        SymVal::Func(f) => Some(f),
        _ => None,
    });
    let func = match func {
        Some(f) => f,
        None => {
            ctx.error(Some(expr), "expected a function");
            return g.ops.new_imm(0);
        }
    };
    // evaluate the arguments first; they may themselves contain calls
    let mut staged = Vec::new();
    let mut params = ctx.ast.right(expr);
    while let Some(p) = params {
        if let Some(arg) = ctx.ast.left(p) {
            let opfrom = compile_expression(ctx, g, irl, arg);
            let opto = g.temps.get(&mut g.ops);
            emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, opto, opfrom);
            staged.push(opto);
        }
        params = ctx.ast.right(p);
    }
    // now copy them into the callee's argument registers
    let mut formals = ctx.func(func).params;
    for op in staged {
        let formal = match formals {
            Some(fl) => {
                let name = ctx.ast.left(fl).and_then(|p| param_name(ctx, p));
                formals = ctx.ast.right(fl);
                name
            }
            None => None,
        };
        if let Some(name) = formal {
            let n = local_name(ctx, func, &name);
            let dst = g.ops.get_global(OperandKind::Arg, &n, 0);
            emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, dst, op);
        }
    }
    let asmname = match ctx.func(func).asmname {
        Some(a) => a,
        None => {
            ctx.internal_error(Some(expr), "function has no assembly name yet");
            return g.ops.new_imm(0);
        }
    };
    emit_op1(&mut g.sp, irl, IrOp::CALL, asmname);
    g.ops.get_global(OperandKind::Reg, "result_", 0)
}

pub fn compile_expression(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, expr: AstId) -> OpId {
    let mut expr = expr;
    while ctx.ast.kind(expr) == AstKind::CommentedNode {
        match ctx.ast.left(expr) {
            Some(e) => expr = e,
            None => return g.ops.new_imm(0),
        }
    }
    if is_const_expr(ctx, expr) && ctx.ast.kind(expr) != AstKind::Identifier {
        expr = fold_if_const(ctx, expr);
    }
    match ctx.ast.kind(expr) {
        AstKind::CondResult => compile_cond_result(ctx, g, irl, expr),
        AstKind::Sequence => {
            let mut r = None;
            if let Some(l) = ctx.ast.left(expr) {
                r = Some(compile_expression(ctx, g, irl, l));
            }
            if let Some(rh) = ctx.ast.right(expr) {
                r = Some(compile_expression(ctx, g, irl, rh));
            }
            r.unwrap_or_else(|| g.ops.new_imm(0))
        }
        AstKind::Integer | AstKind::Float | AstKind::BitValue => {
            g.ops.new_imm(ctx.ast.int_val(expr) as i32)
        }
        AstKind::Result => match ctx.cur_func.and_then(|f| ctx.func(f).result_expr) {
            Some(re) => compile_expression(ctx, g, irl, re),
            None => g.ops.get_global(OperandKind::Reg, "result_", 0),
        },
        AstKind::Identifier | AstKind::LocalIdentifier => compile_identifier(ctx, g, expr),
        AstKind::HwReg => compile_hwreg(ctx, g, expr),
        AstKind::Operator => compile_operator(ctx, g, irl, expr),
        AstKind::FuncCall => compile_funccall(ctx, g, irl, expr),
        AstKind::Assign => {
            let lhs = ctx.ast.left(expr).unwrap();
            let rhs = ctx.ast.right(expr).unwrap();
            let r = compile_expression(ctx, g, irl, lhs);
            let val = compile_expression(ctx, g, irl, rhs);
            emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, r, val);
            r
        }
        AstKind::RangeRef => {
            let lowered = transform_range_use(ctx, expr);
            compile_expression(ctx, g, irl, lowered)
        }
        AstKind::String => {
            let s = ctx.ast.str_val(expr).unwrap_or_default();
            if s.len() > 1 {
                ctx.error(Some(expr), "string too long, expected a single character");
            }
            g.ops.new_imm(s.as_bytes().first().copied().unwrap_or(0) as i32)
        }
        AstKind::StringPtr => {
            let name = format!("str_{:03}_", g.hub_strings.len() + 1);
            let label = g.ops.get_hub(OperandKind::Str, &name, 0);
            g.hub_strings.push((label, expr));
            g.ops.new_imm_ptr(label)
        }
        AstKind::ArrayRef => {
            let index = match ctx.ast.right(expr) {
                Some(i) => i,
                None => {
                    ctx.error(Some(expr), "array reference with no index");
                    return g.ops.new_imm(0);
                }
            };
            let base = compile_expression(ctx, g, irl, ctx.ast.left(expr).unwrap());
            let offset = compile_expression(ctx, g, irl, index);
            apply_array_index(ctx, g, irl, base, offset)
        }
        AstKind::MemRef => compile_memref(ctx, g, irl, expr),
        AstKind::Cast => match ctx.ast.right(expr) {
            Some(inner) => compile_expression(ctx, g, irl, inner),
            None => g.ops.new_imm(0),
        },
        AstKind::AddrOf | AstKind::AbsAddrOf => {
            // only data labels and locals-in-memory have addresses here
            ctx.error(Some(expr), "Cannot take address of this expression in PASM output");
            g.ops.new_imm(0)
        }
        AstKind::CogInit => {
            ctx.error(Some(expr), "Cannot handle cognew/coginit yet");
            g.ops.new_imm(0)
        }
        _ => {
            ctx.internal_error(Some(expr), "Cannot handle expression yet");
            g.ops.new_imm(0)
        }
    }
}

fn emit_statement_list(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, mut ast: Option<AstId>) {
    while let Some(a) = ast {
        if ctx.ast.kind(a) != AstKind::StmtList {
            ctx.internal_error(Some(a), "expected statement list");
            return;
        }
        if let Some(stmt) = ctx.ast.left(a) {
            emit_statement(ctx, g, irl, stmt);
        }
        ast = ctx.ast.right(a);
    }
}

fn user_label_operand(ctx: &mut Ctx, g: &mut AsmGen, label: AstId) -> OpId {
    // a Label/Goto node carries the identifier as its left child
    let ident = match ctx.ast.kind(label) {
        AstKind::Identifier | AstKind::LocalIdentifier => label,
        _ => ctx.ast.left(label).unwrap_or(label),
    };
    let name = get_identifier_name(ctx, ident).unwrap_or_else(|| std::rc::Rc::from("anon"));
    let f = ctx.cur_func;
    let full = match f {
        Some(f) => format!("{}_{}_lbl_", ctx.func(f).name, name),
        None => format!("{}_lbl_", name),
    };
    g.ops.get_global(OperandKind::ImmLabel, &full, 0)
}

//
// a for loop builds
//
//   initial code
// Ltop:
//   if (!loopcond) goto Lexit
//   loop body
// Lnext:
//   update
//   goto Ltop
// Lexit:
//
// the at-least-once form tests at the bottom instead
//
fn emit_for_loop(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, ast: AstId, atleastonce: bool) {
    let initstmt = ctx.ast.left(ast);
    let to = match ctx.ast.right(ast) {
        Some(t) if ctx.ast.kind(t) == AstKind::To => t,
        other => {
            ctx.internal_error(other, "expected TO in for loop");
            return;
        }
    };
    let loopcond = ctx.ast.left(to);
    let step = match ctx.ast.right(to) {
        Some(s) if ctx.ast.kind(s) == AstKind::Step => s,
        other => {
            ctx.internal_error(other, "expected STEP in for loop");
            return;
        }
    };
    let update = ctx.ast.left(step);
    let body = ctx.ast.right(step);

    if let Some(init) = initstmt {
        compile_expression(ctx, g, irl, init);
    }
    let toplabel = g.ops.new_label();
    let nextlabel = g.ops.new_label();
    let exitlabel = g.ops.new_label();
    push_quit_next(g, exitlabel, nextlabel);

    emit_label(&mut g.sp, irl, toplabel);
    if !atleastonce {
        if let Some(cond) = loopcond {
            compile_bool_branches(ctx, g, irl, cond, None, Some(exitlabel));
        }
    }
    emit_statement_list(ctx, g, irl, body);
    emit_label(&mut g.sp, irl, nextlabel);
    if let Some(update) = update {
        emit_statement(ctx, g, irl, update);
    }
    if atleastonce {
        if let Some(cond) = loopcond {
            compile_bool_branches(ctx, g, irl, cond, Some(toplabel), None);
        }
    } else {
        emit_jump(&mut g.sp, irl, IrCond::TRUE, toplabel);
    }
    emit_label(&mut g.sp, irl, exitlabel);
    pop_quit_next(ctx, g);
}

fn emit_statement(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, ast: AstId) {
    let starttemp = g.temps.mark();
    match ctx.ast.kind(ast) {
        AstKind::CommentedNode => {
            if let Some(inner) = ctx.ast.left(ast) {
                emit_statement(ctx, g, irl, inner);
            }
        }
        AstKind::StmtList => {
            emit_statement_list(ctx, g, irl, Some(ast));
        }
        AstKind::Comment | AstKind::DeclareVar | AstKind::LineBreak => {}
        AstKind::Return => {
            let retval = ctx
                .ast
                .left(ast)
                .or_else(|| ctx.cur_func.and_then(|f| ctx.func(f).result_expr));
            if let Some(retval) = retval {
                let op = compile_expression(ctx, g, irl, retval);
                let result = g.ops.get_global(OperandKind::Reg, "result_", 0);
                emit_move(&mut g.sp, &mut g.ops, irl, &mut g.temps, result, op);
            }
            if let Some(ret) = ctx.cur_func.and_then(|f| ctx.func(f).asmretname) {
                emit_jump(&mut g.sp, irl, IrCond::TRUE, ret);
            }
        }
        AstKind::WaitCnt => {
            let retval = match ctx.ast.left(ast) {
                Some(r) => r,
                None => {
                    ctx.error(Some(ast), "No expression for waitcnt");
                    return;
                }
            };
            let op = compile_expression(ctx, g, irl, retval);
            let zero = g.ops.new_imm(0);
            emit_op2(&mut g.sp, irl, IrOp::WAITCNT, op, zero);
        }
        AstKind::While => {
            let toploop = g.ops.new_label();
            let botloop = g.ops.new_label();
            push_quit_next(g, botloop, toploop);
            emit_label(&mut g.sp, irl, toploop);
            if let Some(cond) = ctx.ast.left(ast) {
                compile_bool_branches(ctx, g, irl, cond, None, Some(botloop));
            }
            g.temps
                .free_to(&mut g.sp, &mut g.ops, irl, starttemp);
            emit_statement_list(ctx, g, irl, ctx.ast.right(ast));
            emit_jump(&mut g.sp, irl, IrCond::TRUE, toploop);
            emit_label(&mut g.sp, irl, botloop);
            pop_quit_next(ctx, g);
        }
        AstKind::DoWhile => {
            let toploop = g.ops.new_label();
            let botloop = g.ops.new_label();
            let exitloop = g.ops.new_label();
            push_quit_next(g, exitloop, botloop);
            emit_label(&mut g.sp, irl, toploop);
            emit_statement_list(ctx, g, irl, ctx.ast.right(ast));
            emit_label(&mut g.sp, irl, botloop);
            if let Some(cond) = ctx.ast.left(ast) {
                compile_bool_branches(ctx, g, irl, cond, Some(toploop), None);
            }
            g.temps
                .free_to(&mut g.sp, &mut g.ops, irl, starttemp);
            emit_label(&mut g.sp, irl, exitloop);
            pop_quit_next(ctx, g);
        }
        AstKind::For | AstKind::ForAtLeastOnce => {
            let atleastonce = ctx.ast.kind(ast) == AstKind::ForAtLeastOnce;
            emit_for_loop(ctx, g, irl, ast, atleastonce);
        }
        AstKind::QuitLoop => match g.quitlabel {
            Some(label) => {
                emit_jump(&mut g.sp, irl, IrCond::TRUE, label);
            }
            None => ctx.error(Some(ast), "loop exit statement outside of loop"),
        },
        AstKind::Continue => match g.nextlabel {
            Some(label) => {
                emit_jump(&mut g.sp, irl, IrCond::TRUE, label);
            }
            None => ctx.error(Some(ast), "loop continue statement outside of loop"),
        },
        AstKind::If => {
            let toploop = g.ops.new_label();
            if let Some(cond) = ctx.ast.left(ast) {
                compile_bool_branches(ctx, g, irl, cond, None, Some(toploop));
            }
            g.temps
                .free_to(&mut g.sp, &mut g.ops, irl, starttemp);
            let mut branches = ctx.ast.right(ast);
            while let Some(b) = branches {
                if ctx.ast.kind(b) != AstKind::CommentedNode {
                    break;
                }
                branches = ctx.ast.left(b);
            }
            if let Some(branches) = branches {
                let thenpart = ctx.ast.left(branches);
                let elsepart = ctx.ast.right(branches);
                emit_statement_list(ctx, g, irl, thenpart);
                if elsepart.is_some() {
                    let botloop = g.ops.new_label();
                    emit_jump(&mut g.sp, irl, IrCond::TRUE, botloop);
                    emit_label(&mut g.sp, irl, toploop);
                    emit_statement_list(ctx, g, irl, elsepart);
                    emit_label(&mut g.sp, irl, botloop);
                } else {
                    emit_label(&mut g.sp, irl, toploop);
                }
            } else {
                emit_label(&mut g.sp, irl, toploop);
            }
        }
        AstKind::Yield => {
            // nothing to do in assembly
        }
        AstKind::Label => {
            let op = user_label_operand(ctx, g, ast);
            emit_label(&mut g.sp, irl, op);
        }
        AstKind::Goto => {
            if let Some(target) = ctx.ast.left(ast) {
                let op = user_label_operand(ctx, g, target);
                emit_jump(&mut g.sp, irl, IrCond::TRUE, op);
            }
        }
        AstKind::Assign => {
            let lhs = ctx.ast.left(ast);
            if let Some(l) = lhs {
                if ctx.ast.kind(l) == AstKind::RangeRef {
                    // range assignments left over from the frontends
                    if let Some(r) = ctx.ast.right(ast) {
                        let lowered = transform_range_assign(ctx, l, r, true);
                        compile_expression(ctx, g, irl, lowered);
                        g.temps.free_to(&mut g.sp, &mut g.ops, irl, starttemp);
                        return;
                    }
                }
            }
            compile_expression(ctx, g, irl, ast);
        }
        _ => {
            // assume a plain expression
            compile_expression(ctx, g, irl, ast);
        }
    }
    g.temps.free_to(&mut g.sp, &mut g.ops, irl, starttemp);
}

fn emit_whole_function(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, f: FuncId) {
    if ctx.func(f).flags & FUNC_IS_RECURSIVE != 0 {
        let msg = format!(
            "Recursive function {} not supported in PASM",
            ctx.func(f).user_name
        );
        ctx.error(ctx.func(f).body, &msg);
    }
    g.nextlabel = None;
    g.quitlabel = None;
    ctx.set_current_function(Some(f));
    g.temps = TempRegs::new(&ctx.func(f).name);
    let prolog = ctx.func(f).asmname.unwrap();
    emit_label(&mut g.sp, irl, prolog);
    let body = ctx.func(f).body;
    emit_statement_list(ctx, g, irl, body);
    let epilog = ctx.func(f).asmretname.unwrap();
    emit_label(&mut g.sp, irl, epilog);
    emit_op0(&mut g.sp, irl, IrOp::RET);
}

fn emit_newline(g: &mut AsmGen, irl: &mut IrList) {
    let op = match g.newline {
        Some(op) => op,
        None => {
            let op = g.ops.new_operand(OperandKind::Str, "\n", 0);
            g.newline = Some(op);
            op
        }
    };
    let ir = g.sp.new_ir(IrOp::COMMENT);
    g.sp[ir].dst = Some(op);
    irl.append(&mut g.sp, ir);
}

/// Emit symbolic constants from the CON block so listings can show them.
fn compile_consts(ctx: &mut Ctx, g: &mut AsmGen, irl: &mut IrList, conblock: Option<AstId>) {
    let mut cur = conblock;
    while let Some(c) = cur {
        if let Some(item) = ctx.ast.left(c) {
            if ctx.ast.kind(item) == AstKind::Assign {
                if let (Some(name), Some(valexpr)) = (ctx.ast.left(item), ctx.ast.right(item)) {
                    if let Some(n) = get_identifier_name(ctx, name) {
                        let val = const_val(ctx, valexpr).unwrap_or(0) as i32;
                        let op = g.ops.new_operand(OperandKind::ImmNamed, &n, val);
                        emit_op1(&mut g.sp, irl, IrOp::CONST, op);
                    }
                }
            }
        }
        cur = ctx.ast.right(c);
    }
}

/// Emit the register and hub data sections: named longs for globals and
/// large immediates, string data in hub memory.
pub fn emit_globals(ctx: &mut Ctx, g: &mut AsmGen) {
    let mut reg: Vec<OpId> = g.ops.reg_globals().to_vec();
    reg.sort_by(|&a, &b| g.ops[a].name.cmp(&g.ops[b].name));
    let mut irl = IrList::new();
    if !reg.is_empty() {
        emit_newline(g, &mut irl);
    }
    for id in reg {
        let keep = match g.ops[id].kind {
            OperandKind::Local | OperandKind::Arg => g.ops[id].used,
            OperandKind::ImmNamed => g.ops[id].used,
            OperandKind::HwReg => false,
            _ => true,
        };
        if !keep {
            continue;
        }
        emit_label(&mut g.sp, &mut irl, id);
        if g.ops[id].kind == OperandKind::ImmLabel {
            // an immediate pointer: a long holding another label's address
            let target = pir::OpId::from_raw(g.ops[id].val as u32);
            emit_long_ptr(&mut g.sp, &mut irl, target);
        } else {
            let val = g.ops[id].val;
            emit_long(&mut g.sp, &mut g.ops, &mut irl, val);
        }
    }
    let hub: Vec<OpId> = g.ops.hub_globals().to_vec();
    if !hub.is_empty() {
        emit_newline(g, &mut irl);
    }
    for id in hub {
        emit_label(&mut g.sp, &mut irl, id);
        if g.ops[id].kind == OperandKind::Str {
            let expr = g
                .hub_strings
                .iter()
                .find(|(label, _)| *label == id)
                .map(|&(_, e)| e);
            if let Some(expr) = expr {
                let s = get_string(&ctx.ast, Some(expr));
                emit_string(&mut g.sp, &mut g.ops, &mut irl, &s);
            }
        } else {
            let target = pir::OpId::from_raw(g.ops[id].val as u32);
            emit_long_ptr(&mut g.sp, &mut irl, target);
        }
    }
    let program = &mut g.program;
    program.append_list(&mut g.sp, irl);
}

/// Compile every function of a module to IR, optimize each locally,
/// expand inline calls, and append the results to the program list.
pub fn compile_to_ir(ctx: &mut Ctx, g: &mut AsmGen, module: ModId) -> bool {
    let save_mod = ctx.set_current_module(Some(module));
    let save_func = ctx.cur_func;

    let conblock = ctx.module(module).conblock;
    let mut constlist = IrList::new();
    compile_consts(ctx, g, &mut constlist, conblock);
    let mut program = g.program;
    program.append_list(&mut g.sp, constlist);
    g.program = program;

    // assign assembly names up front so forward calls resolve
    let funcs = ctx.module(module).functions.clone();
    for &f in &funcs {
        let fname = global_name(ctx, &ctx.func(f).name.clone());
        let rname = format!("{}_ret", fname);
        let asmname = g.ops.new_operand(OperandKind::ImmLabel, &fname, 0);
        let asmretname = g.ops.new_operand(OperandKind::ImmLabel, &rname, 0);
        ctx.func_mut(f).asmname = Some(asmname);
        ctx.func_mut(f).asmretname = Some(asmretname);
    }

    // compile and locally optimize each function
    let mut compiled: Vec<(FuncId, IrList)> = Vec::new();
    for &f in &funcs {
        let fd = ctx.func(f);
        if fd.optimize_flags & OPT_REMOVE_UNUSED_FUNCS != 0
            && fd.call_sites == 0
            && !fd.is_public()
        {
            continue;
        }
        let mut funcirl = IrList::new();
        emit_whole_function(ctx, g, &mut funcirl, f);
        let ret = ctx.func(f).asmretname;
        optimize_ir_local(&mut g.sp, &mut g.ops, &mut funcirl, ret);
        if ctx.func(f).optimize_flags & OPT_INLINE_SMALLFUNCS != 0 {
            // strip the prolog/epilog before judging the body
            let mut body = funcirl;
            if let Some(h) = body.head {
                if g.sp[h].opc == IrOp::LABEL {
                    body.delete(&mut g.sp, h);
                }
            }
            let mut tail = body.tail;
            while let Some(t) = tail {
                let prev = g.sp[t].prev();
                if g.sp[t].opc == IrOp::RET
                    || (g.sp[t].opc == IrOp::LABEL && g.sp[t].dst == ctx.func(f).asmretname)
                {
                    body.delete(&mut g.sp, t);
                    tail = prev;
                } else {
                    break;
                }
            }
            if should_be_inlined(&g.sp, &body) {
                let asmname = ctx.func(f).asmname.unwrap();
                g.inlines.insert(asmname, body);
                ctx.func_mut(f).is_inline = true;
                ctx.func_mut(f).ir = Some(body);
                continue;
            }
            // restore the full list shape (body still shares the nodes)
            funcirl = rebuild_with_wrappers(ctx, g, f, body);
        }
        compiled.push((f, funcirl));
    }

    // expand inline calls, then append everything to the program
    for (f, mut funcirl) in compiled {
        if expand_inlines(&mut g.sp, &mut funcirl, &g.inlines) {
            let ret = ctx.func(f).asmretname;
            optimize_ir_local(&mut g.sp, &mut g.ops, &mut funcirl, ret);
        }
        ctx.func_mut(f).ir = Some(funcirl);
        let mut program = g.program;
        emit_newline(g, &mut program);
        program.append_list(&mut g.sp, funcirl);
        g.program = program;
    }

    let program = g.program;
    optimize_ir_global(&mut g.sp, &mut g.ops, &program);

    ctx.set_current_function(save_func);
    ctx.set_current_module(save_mod);
    ctx.errors() == 0
}

fn rebuild_with_wrappers(ctx: &mut Ctx, g: &mut AsmGen, f: FuncId, body: IrList) -> IrList {
    let mut out = IrList::new();
    let prolog = ctx.func(f).asmname.unwrap();
    emit_label(&mut g.sp, &mut out, prolog);
    out.append_list(&mut g.sp, body);
    let epilog = ctx.func(f).asmretname.unwrap();
    emit_label(&mut g.sp, &mut out, epilog);
    emit_op0(&mut g.sp, &mut out, IrOp::RET);
    out
}
