//! Peephole and local-dataflow optimization over instruction lists.
//!
//! The optimizer is a fixed-point loop of passes, each reporting whether it
//! changed anything; the driver re-runs the whole sequence until quiet.
//! Passes skip dummy instructions (comments, dead markers, constants, and
//! anything with condition `FALSE`).

use std::collections::HashMap;

use matches::debug_assert_matches;

use crate::instr::{IrCond, IrOp, FLAG_LABEL_USED, FLAG_OPTIMIZER, FLAG_WC, FLAG_WZ};
use crate::ir::{IrId, IrList, IrSpace};
use crate::operand::{OpId, OpSpace, OperandKind};

/// Map from a function's entry label to its (label-free) body, for inline
/// expansion of calls.
pub type InlineMap = HashMap<OpId, IrList>;

fn is_dummy(sp: &IrSpace, ir: IrId) -> bool {
    sp[ir].is_dummy()
}

/// True if a jump's target label lies after the given instruction.
/// Relies on the `addr` sequence numbers and resolved `aux` links.
fn jump_is_after(sp: &IrSpace, ir: IrId, jmp: IrId) -> bool {
    match sp[jmp].aux {
        Some(label) => sp[label].addr > sp[ir].addr,
        None => false,
    }
}

/// Return true if the operand's value does not need to be preserved past
/// `instr`. The walk is conservative: branches stop it, calls pin argument
/// registers, and only an unconditional redefinition or a `DEAD` marker
/// proves death.
pub fn is_dead_after(sp: &IrSpace, ops: &OpSpace, instr: IrId, op: OpId) -> bool {
    if sp[instr].opc == IrOp::DEAD && sp[instr].dst == Some(op) {
        return true;
    }
    let mut cur = sp[instr].next();
    while let Some(id) = cur {
        let ir = &sp[id];
        if ir.opc == IrOp::DEAD && ir.dst == Some(op) {
            return true;
        }
        if ir.is_dummy() || ir.opc == IrOp::LABEL {
            cur = ir.next();
            continue;
        }
        if ir.opc == IrOp::RET && ir.cond == IrCond::TRUE {
            return ops.is_local_or_arg(op);
        } else if ir.opc == IrOp::CALL {
            if ops[op].kind == OperandKind::Arg {
                return false;
            }
        } else if ir.opc.is_jump() {
            // dead notes are sometimes placed just past a branch; honor them
            let mut dead = ir.next();
            while let Some(d) = dead {
                if sp[d].opc != IrOp::DEAD {
                    break;
                }
                if sp[d].dst == Some(op) {
                    return true;
                }
                dead = sp[d].next();
            }
            return false;
        }
        if ir.src == Some(op) {
            return false;
        }
        if ir.dst == Some(op) {
            if ir.opc.reads_dst() {
                return false;
            }
            if ir.cond == IrCond::TRUE {
                return true;
            }
        }
        cur = ir.next();
    }
    // fell off the end without seeing a use
    ops.is_local_or_arg(op)
}

/// Check that renaming `orig` to `replace` is legal scanning backwards from
/// `instr` to the defining instruction.
fn safe_to_replace_back(sp: &IrSpace, start: Option<IrId>, orig: OpId, replace: OpId) -> bool {
    let mut cur = start;
    while let Some(id) = cur {
        let ir = &sp[id];
        if ir.is_dummy() {
            cur = ir.prev();
            continue;
        }
        if ir.opc == IrOp::LABEL || ir.opc.is_branch() {
            return false;
        }
        if ir.dst == Some(orig) && ir.opc.sets_dst() && !ir.opc.reads_dst() {
            return ir.cond == IrCond::TRUE;
        }
        if ir.src == Some(replace) || ir.dst == Some(replace) {
            return false;
        }
        cur = ir.prev();
    }
    false
}

/// Forward window check; returns the instruction the replacement walk
/// should stop at, or `None` if no safe window exists.
fn safe_to_replace_forward(
    sp: &IrSpace,
    ops: &OpSpace,
    first: Option<IrId>,
    orig: OpId,
    replace: OpId,
) -> Option<IrId> {
    let mut last: Option<IrId> = None;
    let mut cur = first;
    while let Some(id) = cur {
        let ir = &sp[id];
        if ir.is_dummy() {
            cur = ir.next();
            continue;
        }
        if ir.opc == IrOp::RET {
            return if ops.is_local_or_arg(orig) {
                Some(id)
            } else {
                None
            };
        } else if ir.opc.is_branch() {
            return None;
        }
        if ir.opc == IrOp::LABEL {
            if is_dead_after(sp, ops, id, orig) && is_dead_after(sp, ops, id, replace) {
                return Some(id);
            }
            return None;
        }
        if ir.dst == Some(replace) {
            // "mov replace, orig" with orig dead afterwards closes the window
            if ir.opc == IrOp::MOVE
                && ir.src == Some(orig)
                && ir.cond == IrCond::TRUE
                && is_dead_after(sp, ops, id, orig)
            {
                return Some(id);
            }
            return None;
        }
        if ir.src == Some(replace) && cur != first {
            return None;
        }
        last = Some(id);
        cur = ir.next();
    }
    if ops.is_local_or_arg(orig) {
        last
    } else {
        None
    }
}

fn replace_back(sp: &mut IrSpace, start: Option<IrId>, orig: OpId, replace: OpId) {
    let mut cur = start;
    while let Some(id) = cur {
        if sp[id].is_dummy() {
            cur = sp[id].prev();
            continue;
        }
        if sp[id].opc == IrOp::LABEL {
            break;
        }
        if sp[id].dst == Some(orig) {
            sp[id].dst = Some(replace);
            let opc = sp[id].opc;
            if opc.sets_dst() && !opc.reads_dst() && sp[id].cond == IrCond::TRUE {
                break;
            }
        }
        if sp[id].src == Some(orig) {
            sp[id].src = Some(replace);
        }
        cur = sp[id].prev();
    }
}

fn replace_forward(sp: &mut IrSpace, start: Option<IrId>, orig: OpId, replace: OpId, stop: IrId) {
    let mut cur = start;
    while let Some(id) = cur {
        if !sp[id].is_dummy() {
            if sp[id].src == Some(orig) {
                sp[id].src = Some(replace);
            }
            if sp[id].dst == Some(orig) {
                sp[id].dst = Some(replace);
            }
        }
        if id == stop {
            break;
        }
        cur = sp[id].next();
    }
}

/// After folding a flag-setting instruction to a known result, rewrite the
/// conditions of the following instructions until the flags are written
/// again.
fn apply_condition_after(sp: &mut IrSpace, instr: IrId, val: i32) -> bool {
    let mut cur = sp[instr].next();
    while let Some(id) = cur {
        if sp[id].is_dummy() {
            cur = sp[id].next();
            continue;
        }
        let newcond = match sp[id].cond {
            IrCond::TRUE => IrCond::TRUE,
            IrCond::FALSE => IrCond::FALSE,
            IrCond::EQ => {
                if val == 0 {
                    IrCond::TRUE
                } else {
                    IrCond::FALSE
                }
            }
            IrCond::NE => {
                if val != 0 {
                    IrCond::TRUE
                } else {
                    IrCond::FALSE
                }
            }
            IrCond::LT => {
                if val < 0 {
                    IrCond::TRUE
                } else {
                    IrCond::FALSE
                }
            }
            IrCond::GT => {
                if val > 0 {
                    IrCond::TRUE
                } else {
                    IrCond::FALSE
                }
            }
            IrCond::LE => {
                if val <= 0 {
                    IrCond::TRUE
                } else {
                    IrCond::FALSE
                }
            }
            IrCond::GE => {
                if val >= 0 {
                    IrCond::TRUE
                } else {
                    IrCond::FALSE
                }
            }
            // carry conditions can't be predicted here
            IrCond::C | IrCond::NC => return false,
        };
        sp[id].cond = newcond;
        if sp[id].sets_flags() {
            return true;
        }
        cur = sp[id].next();
    }
    true
}

/// The destination of `ir` is known to hold the constant `imm`. If the
/// source is constant too, fold the operation into a move of the result.
fn transform_const_dst(sp: &mut IrSpace, ops: &mut OpSpace, ir: IrId, imm: OpId) -> bool {
    let src = match sp[ir].src {
        Some(s) if ops.is_immediate(s) => s,
        _ => return false,
    };
    if !ops.is_immediate(imm) {
        return false;
    }
    if sp[ir].flags & FLAG_WC != 0 && sp[ir].opc != IrOp::CMPS {
        // only cmps has a predictable carry
        return false;
    }

    let mut val1 = ops[imm].val;
    let val2 = ops[src].val;
    let mut sets_result = true;

    match sp[ir].opc {
        IrOp::ADD => val1 = val1.wrapping_add(val2),
        IrOp::SUB => val1 = val1.wrapping_sub(val2),
        IrOp::AND => val1 &= val2,
        IrOp::OR => val1 |= val2,
        IrOp::XOR => val1 ^= val2,
        IrOp::ANDN => val1 &= !val2,
        IrOp::SHL => val1 = val1.wrapping_shl(val2 as u32),
        IrOp::SAR => val1 = val1.wrapping_shr(val2 as u32),
        IrOp::CMPS => {
            val1 = val1.wrapping_sub(val2);
            sets_result = false;
        }
        _ => return false,
    }
    if sp[ir].sets_flags() && !apply_condition_after(sp, ir, val1) {
        return false;
    }
    if sets_result {
        sp[ir].opc = IrOp::MOVE;
        sp[ir].src = Some(ops.new_imm(val1));
    } else {
        sp[ir].cond = IrCond::FALSE;
    }
    true
}

/// After `move x, #imm`, rewrite later uses of `x` with the immediate until
/// `x` is redefined or control flow intervenes.
fn propagate_const_forward(
    sp: &mut IrSpace,
    ops: &mut OpSpace,
    start: Option<IrId>,
    orig: OpId,
    imm: OpId,
) -> bool {
    let mut change = false;
    let mut cur = start;
    while let Some(id) = cur {
        if sp[id].is_dummy() {
            cur = sp[id].next();
            continue;
        }
        if sp[id].opc == IrOp::LABEL {
            return change;
        }
        if sp[id].opc.is_branch() && !start.map_or(false, |s| jump_is_after(sp, s, id)) {
            return change;
        }
        if sp[id].dst == Some(orig) {
            change |= transform_const_dst(sp, ops, id, imm);
            return change;
        } else if sp[id].src == Some(orig) {
            sp[id].src = Some(imm);
            change = true;
        }
        cur = sp[id].next();
    }
    change
}

/// Move coalescing: drop self-moves, propagate immediates forward, rename
/// through backward and forward windows.
pub fn optimize_moves(sp: &mut IrSpace, ops: &mut OpSpace, irl: &mut IrList) -> bool {
    let mut everchange = false;
    loop {
        let mut change = false;
        let mut cur = irl.head;
        while let Some(id) = cur {
            let next = sp[id].next();
            if sp[id].opc == IrOp::MOVE && sp[id].cond == IrCond::TRUE {
                let dst = sp[id].dst.unwrap();
                let src = sp[id].src.unwrap();
                if src == dst && !sp[id].sets_flags() {
                    irl.delete(sp, id);
                    change = true;
                } else if ops.is_immediate(src) {
                    change |= propagate_const_forward(sp, ops, next, dst, src);
                } else if !sp[id].sets_flags()
                    && is_dead_after(sp, ops, id, src)
                    && safe_to_replace_back(sp, sp[id].prev(), src, dst)
                {
                    replace_back(sp, sp[id].prev(), src, dst);
                    irl.delete(sp, id);
                    change = true;
                } else if !sp[id].sets_flags() {
                    if let Some(stop) = safe_to_replace_forward(sp, ops, next, dst, src) {
                        replace_forward(sp, next, dst, src, stop);
                        irl.delete(sp, id);
                        change = true;
                    }
                }
            }
            cur = next;
        }
        everchange |= change;
        if !change {
            break;
        }
    }
    everchange
}

fn has_side_effects(sp: &IrSpace, ops: &OpSpace, ir: IrId) -> bool {
    if let Some(dst) = sp[ir].dst {
        if ops[dst].kind == OperandKind::HwReg {
            return true;
        }
    }
    if sp[ir].sets_flags() || sp[ir].opc.is_branch() {
        return true;
    }
    match sp[ir].opc {
        IrOp::WAITPEQ
        | IrOp::WAITPNE
        | IrOp::WAITVID
        | IrOp::WAITCNT
        | IrOp::WRBYTE
        | IrOp::WRWORD
        | IrOp::WRLONG => true,
        _ => false,
    }
}

/// Dead-code elimination. `ret_label` is the function's return label; a
/// terminal jump to it is redundant.
pub fn eliminate_dead_code(
    sp: &mut IrSpace,
    ops: &OpSpace,
    irl: &mut IrList,
    ret_label: Option<OpId>,
) -> bool {
    let mut change = false;

    // a jump at the end to the return label
    let mut tail = irl.tail;
    while let Some(id) = tail {
        if !sp[id].is_dummy() {
            break;
        }
        tail = sp[id].prev();
    }
    if let (Some(id), Some(ret)) = (tail, ret_label) {
        if sp[id].opc == IrOp::JUMP && sp[id].dst == Some(ret) {
            irl.delete(sp, id);
            change = true;
        }
    }

    let mut cur = irl.head;
    while let Some(id) = cur {
        let mut next = sp[id].next();
        if sp[id].opc == IrOp::JUMP && sp[id].cond == IrCond::TRUE {
            // everything from here to the next label is unreachable
            let mut x = sp[id].next();
            while let Some(xid) = x {
                if sp[xid].opc == IrOp::LABEL {
                    next = Some(xid);
                    break;
                }
                next = sp[xid].next();
                if !sp[xid].is_dummy() {
                    irl.delete(sp, xid);
                    change = true;
                }
                x = next;
            }
            // a jump to the label that immediately follows it is a no-op
            if let Some(nid) = next {
                if sp[nid].opc == IrOp::LABEL && sp[nid].dst == sp[id].dst {
                    irl.delete(sp, id);
                    change = true;
                }
            }
        } else if sp[id].cond == IrCond::FALSE {
            irl.delete(sp, id);
            change = true;
        } else if !sp[id].is_dummy() {
            if let Some(dst) = sp[id].dst {
                if is_dead_after(sp, ops, id, dst) && !has_side_effects(sp, ops, id) {
                    irl.delete(sp, id);
                    change = true;
                }
            }
        }
        cur = next;
    }
    change
}

/// Mark operands with readers or writers; labels nobody references are
/// demoted to `DEAD`.
pub fn check_usage(sp: &mut IrSpace, ops: &mut OpSpace, irl: &IrList) {
    let mut cur = irl.head;
    while let Some(id) = cur {
        if !sp[id].is_dummy() && sp[id].opc != IrOp::LABEL {
            if let Some(src) = sp[id].src {
                ops[src].used = true;
            }
            if let Some(dst) = sp[id].dst {
                ops[dst].used = true;
            }
        }
        cur = sp[id].next();
    }
    let mut cur = irl.head;
    while let Some(id) = cur {
        if sp[id].opc == IrOp::LABEL {
            let dst = sp[id].dst.unwrap();
            if !ops[dst].used {
                sp[id].opc = IrOp::DEAD;
            }
        }
        cur = sp[id].next();
    }
}

const MAX_JUMP_OVER: usize = 3;

/// A candidate for predication: an unconditional-target forward jump over
/// at most [`MAX_JUMP_OVER`] real instructions. Returns the instruction
/// count, or 0 if not a candidate.
fn is_short_forward_jump(sp: &IrSpace, irbase: IrId) -> usize {
    if sp[irbase].opc != IrOp::JUMP {
        return 0;
    }
    let target = sp[irbase].dst;
    let mut n = 0;
    let mut cur = sp[irbase].next();
    while let Some(id) = cur {
        if !sp[id].is_dummy() {
            if sp[id].cond != IrCond::TRUE {
                return 0;
            }
            if sp[id].opc == IrOp::LABEL {
                if sp[id].dst == target {
                    return n;
                }
                return 0;
            }
            n += 1;
            if n > MAX_JUMP_OVER {
                return 0;
            }
        }
        cur = sp[id].next();
    }
    0
}

fn conditionalize_instructions(sp: &mut IrSpace, start: Option<IrId>, cond: IrCond, mut n: usize) {
    let mut cur = start;
    while let Some(id) = cur {
        if n == 0 {
            break;
        }
        if !sp[id].is_dummy() {
            debug_assert!(sp[id].opc != IrOp::LABEL);
            debug_assert_matches!(sp[id].cond, IrCond::TRUE);
            sp[id].cond = cond;
            n -= 1;
        }
        cur = sp[id].next();
    }
    while let Some(id) = cur {
        if !sp[id].is_dummy() {
            break;
        }
        cur = sp[id].next();
    }
    if let Some(id) = cur {
        if sp[id].opc == IrOp::LABEL {
            // tag the landing label for later sanity checks
            sp[id].cond = cond;
        }
    }
}

/// Short-branch predication: replace a conditional jump over a few
/// instructions with conditional execution of those instructions.
pub fn optimize_short_branches(sp: &mut IrSpace, irl: &mut IrList) -> bool {
    let mut change = false;
    let mut cur = irl.head;
    while let Some(id) = cur {
        let next = sp[id].next();
        let n = is_short_forward_jump(sp, id);
        if n > 0 {
            let cond = sp[id].cond.invert();
            conditionalize_instructions(sp, sp[id].next(), cond, n);
            irl.delete(sp, id);
            change = true;
        }
        cur = next;
    }
    change
}

/// Find the instruction that last set `dst` before the compare at `at`,
/// provided the flags are untouched in between and the set is
/// unconditional.
fn find_prev_setter_for_compare(sp: &IrSpace, at: IrId, dst: OpId) -> Option<IrId> {
    let mut cur = sp[at].prev();
    while let Some(id) = cur {
        let ir = &sp[id];
        if ir.is_dummy() {
            cur = ir.prev();
            continue;
        }
        if ir.opc == IrOp::LABEL {
            // someone may branch here having set the value elsewhere
            return None;
        }
        if ir.flags & FLAG_WZ != 0 {
            return None;
        }
        if ir.dst == Some(dst) && ir.opc.sets_dst() {
            if ir.cond != IrCond::TRUE {
                return None;
            }
            return Some(id);
        }
        cur = ir.prev();
    }
    None
}

/// Fold `cmp x, #0 wz` into the previous flag-friendly setter of `x`, and
/// form `djnz` when the setter is `sub x, #1` followed by `if_ne jmp`.
pub fn optimize_compares(sp: &mut IrSpace, ops: &mut OpSpace, irl: &mut IrList) -> bool {
    let mut change = false;
    let mut cur = irl.head;
    while let Some(mut id) = cur {
        let mut next = sp[id].next();
        while sp[id].is_dummy() {
            match next {
                Some(n) => {
                    id = n;
                    next = sp[id].next();
                }
                None => return change,
            }
        }
        let is_cmp = sp[id].opc == IrOp::CMP || sp[id].opc == IrOp::CMPS;
        let wz_only = sp[id].flags & (FLAG_WZ | FLAG_WC) == FLAG_WZ;
        let src_zero = match sp[id].src {
            Some(s) => ops.is_immediate(s) && ops[s].val == 0,
            None => false,
        };
        if is_cmp && sp[id].cond == IrCond::TRUE && wz_only && src_zero {
            let dst = sp[id].dst.unwrap();
            if let Some(prev) = find_prev_setter_for_compare(sp, id, dst) {
                if sp[prev].flags & (FLAG_WZ | FLAG_WC) == 0 && sp[prev].opc.can_test_zero() {
                    sp[prev].flags |= FLAG_WZ;
                    irl.delete(sp, id);
                    change = true;
                    // sub #1 followed by a conditional jump becomes djnz
                    if let Some(jmp) = next {
                        let sub_one = sp[prev].opc == IrOp::SUB
                            && sp[prev].src.map_or(false, |s| {
                                ops.is_immediate(s) && ops[s].val == 1
                            });
                        if sub_one
                            && sp[jmp].opc == IrOp::JUMP
                            && sp[jmp].cond == IrCond::NE
                        {
                            sp[jmp].opc = IrOp::DJNZ;
                            sp[jmp].cond = IrCond::TRUE;
                            sp[jmp].src = sp[jmp].dst;
                            sp[jmp].dst = sp[prev].dst;
                            irl.delete(sp, prev);
                        }
                    }
                }
            }
        }
        cur = next;
    }
    change
}

/// Replace large-immediate forms with operator reversals that fit the
/// in-instruction field (`mov x, -k` -> `neg x, k` and friends).
pub fn optimize_immediates(sp: &mut IrSpace, ops: &mut OpSpace, irl: &IrList) -> bool {
    let mut cur = irl.head;
    while let Some(id) = cur {
        cur = sp[id].next();
        let src = match sp[id].src {
            Some(s) if ops[s].kind == OperandKind::ImmNamed => s,
            _ => continue,
        };
        let val = ops[src].val;
        match sp[id].opc {
            IrOp::MOVE if val < 0 && val >= -511 => {
                sp[id].opc = IrOp::NEG;
                sp[id].src = Some(ops.new_imm(-val));
            }
            IrOp::AND if val < 0 && val >= -512 => {
                sp[id].opc = IrOp::ANDN;
                sp[id].src = Some(ops.new_imm(!val));
            }
            IrOp::ADD if val < 0 && val >= -511 => {
                sp[id].opc = IrOp::SUB;
                sp[id].src = Some(ops.new_imm(-val));
            }
            IrOp::SUB if val < 0 && val >= -511 => {
                sp[id].opc = IrOp::ADD;
                sp[id].src = Some(ops.new_imm(-val));
            }
            _ => {}
        }
    }
    // rewrites never enable further rounds on their own
    false
}

fn addsub_val(sp: &IrSpace, ops: &OpSpace, ir: IrId) -> i32 {
    let val = ops[sp[ir].src.unwrap()].val;
    if sp[ir].opc == IrOp::SUB {
        -val
    } else {
        val
    }
}

/// Coalesce consecutive immediate add/sub on the same destination.
pub fn optimize_addsub(sp: &mut IrSpace, ops: &mut OpSpace, irl: &mut IrList) -> bool {
    let mut change = false;
    let mut cur = irl.head;
    while let Some(id) = cur {
        let mut next = sp[id].next();
        while let Some(n) = next {
            if !sp[n].is_dummy() {
                break;
            }
            next = sp[n].next();
        }
        let n = match next {
            Some(n) => n,
            None => break,
        };
        let first_addsub = sp[id].opc == IrOp::ADD || sp[id].opc == IrOp::SUB;
        let second_addsub = sp[n].opc == IrOp::ADD || sp[n].opc == IrOp::SUB;
        if first_addsub
            && second_addsub
            && sp[id].cond == IrCond::TRUE
            && sp[n].cond == IrCond::TRUE
            && sp[id].dst == sp[n].dst
            && sp[id].src.map_or(false, |s| ops.is_immediate(s))
            && sp[n].src.map_or(false, |s| ops.is_immediate(s))
        {
            let mut val = addsub_val(sp, ops, id) + addsub_val(sp, ops, n);
            if val < 0 {
                val = -val;
                sp[n].opc = IrOp::SUB;
            } else {
                sp[n].opc = IrOp::ADD;
            }
            sp[n].src = Some(ops.new_imm(val));
            irl.delete(sp, id);
            change = true;
        }
        cur = next;
    }
    change
}

/// Number instructions and clear per-round optimizer state. The addresses
/// only need to be monotonic; they orient jumps and order labels.
fn assign_temporary_addresses(sp: &mut IrSpace, irl: &IrList) {
    let mut addr = 0u32;
    let mut cur = irl.head;
    while let Some(id) = cur {
        sp[id].flags &= !FLAG_OPTIMIZER;
        sp[id].addr = addr;
        addr += 1;
        if sp[id].opc.is_jump() || sp[id].opc == IrOp::LABEL {
            sp[id].aux = None;
        }
        cur = sp[id].next();
    }
}

/// Record, for a label, whether it is referenced and the unique jump to it
/// if exactly one exists (stored in the label's `aux`).
fn mark_label_uses(sp: &mut IrSpace, irl: &IrList, irlabel: IrId) {
    let label = sp[irlabel].dst;
    let mut cur = irl.head;
    while let Some(id) = cur {
        let next = sp[id].next();
        if !is_dummy(sp, id) {
            if sp[id].opc.is_jump() {
                let dst = if sp[id].opc == IrOp::DJNZ {
                    sp[id].src
                } else {
                    sp[id].dst
                };
                if dst == label {
                    sp[id].aux = Some(irlabel);
                    if sp[irlabel].flags & FLAG_LABEL_USED != 0 {
                        // more than one jump targets this label
                        sp[irlabel].aux = None;
                    } else {
                        sp[irlabel].flags |= FLAG_LABEL_USED;
                        sp[irlabel].aux = Some(id);
                    }
                }
            } else if id != irlabel {
                if sp[id].src == label || sp[id].dst == label {
                    sp[irlabel].flags |= FLAG_LABEL_USED;
                    sp[irlabel].aux = None;
                }
            }
        }
        cur = next;
    }
}

/// Label-use analysis; unreferenced temporary labels are deleted.
fn check_label_usage(sp: &mut IrSpace, ops: &OpSpace, irl: &mut IrList) -> bool {
    let mut change = false;
    let mut cur = irl.head;
    while let Some(id) = cur {
        let next = sp[id].next();
        if sp[id].opc == IrOp::LABEL {
            mark_label_uses(sp, irl, id);
            let dst = sp[id].dst.unwrap();
            if ops.is_temp_label(dst) && sp[id].flags & FLAG_LABEL_USED == 0 {
                irl.delete(sp, id);
                change = true;
            }
        }
        cur = next;
    }
    change
}

/// Optimize one function's list to a fixed point.
pub fn optimize_ir_local(
    sp: &mut IrSpace,
    ops: &mut OpSpace,
    irl: &mut IrList,
    ret_label: Option<OpId>,
) {
    if irl.head.is_none() {
        return;
    }
    loop {
        let mut change = false;
        assign_temporary_addresses(sp, irl);
        change |= check_label_usage(sp, ops, irl);
        change |= eliminate_dead_code(sp, ops, irl, ret_label);
        change |= optimize_moves(sp, ops, irl);
        change |= optimize_immediates(sp, ops, irl);
        change |= optimize_short_branches(sp, irl);
        change |= optimize_addsub(sp, ops, irl);
        change |= optimize_compares(sp, ops, irl);
        if !change {
            break;
        }
    }
}

/// Whole-program pass, run after every function was optimized locally.
pub fn optimize_ir_global(sp: &mut IrSpace, ops: &mut OpSpace, irl: &IrList) {
    check_usage(sp, ops, irl);
}

const INLINE_THRESHOLD: usize = 3;

/// A function qualifies for inlining when its body has no labels (there is
/// no relabeling machinery) and few enough real instructions.
pub fn should_be_inlined(sp: &IrSpace, body: &IrList) -> bool {
    let mut n = 0;
    let mut cur = body.head;
    while let Some(id) = cur {
        if !sp[id].is_dummy() {
            if sp[id].opc == IrOp::LABEL {
                return false;
            }
            n += 1;
        }
        cur = sp[id].next();
    }
    n <= INLINE_THRESHOLD
}

fn dup_ir_list(sp: &mut IrSpace, body: &IrList) -> IrList {
    let mut out = IrList::new();
    let ids = body.ids(sp);
    for id in ids {
        let copy = sp.new_ir(sp[id].opc);
        sp[copy].cond = sp[id].cond;
        sp[copy].dst = sp[id].dst;
        sp[copy].src = sp[id].src;
        sp[copy].flags = sp[id].flags & !FLAG_OPTIMIZER;
        out.append(sp, copy);
    }
    out
}

/// Expand calls to inlinable functions in place. Returns true if any call
/// was expanded (the caller should re-run local optimization).
pub fn expand_inlines(sp: &mut IrSpace, irl: &mut IrList, inlines: &InlineMap) -> bool {
    let mut change = false;
    let mut cur = irl.head;
    while let Some(id) = cur {
        let next = sp[id].next();
        if sp[id].opc == IrOp::CALL {
            if let Some(body) = sp[id].dst.and_then(|d| inlines.get(&d)).copied() {
                let dup = dup_ir_list(sp, &body);
                let mut at = id;
                let ids = dup.ids(sp);
                for sub in ids {
                    irl.insert_after(sp, at, sub);
                    at = sub;
                }
                irl.delete(sp, id);
                change = true;
            }
        }
        cur = next;
    }
    change
}
