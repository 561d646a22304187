//! Hardware register and instruction descriptor tables.
//!
//! Frontends resolve register names and inline-assembly mnemonics against
//! the reserved-word table filled in here; AST nodes then carry compact
//! handles to the descriptors.

use pir::IrOp;
use util::EnumFromStr;

use crate::symbol::{SymVal, SymbolKind};
use crate::{Ctx, Variant};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HwRegId(u32);

impl HwRegId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct InstrId(u32);

impl InstrId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A hardware register: source-level name, cog address, and the name the
/// C/C++ printer uses.
#[derive(Clone, Debug)]
pub struct HwReg {
    pub name: &'static str,
    pub addr: u32,
    pub cname: &'static str,
}

/// Operand shapes of machine instructions.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InstrOps {
    NoOperands,
    OneOperand,
    TwoOperands,
    CallOperand,
    JmpOperand,
}

/// Descriptor of one machine instruction usable in inline assembly.
#[derive(Clone, Debug)]
pub struct InstrDesc {
    pub name: &'static str,
    /// Base binary encoding of the instruction.
    pub binary: u32,
    pub ops: InstrOps,
    /// The IR opcode this instruction corresponds to, when one exists.
    pub opc: IrOp,
}

const P1_HWREGS: &[HwReg] = &[
    HwReg { name: "par", addr: 0x1f0, cname: "_PAR" },
    HwReg { name: "cnt", addr: 0x1f1, cname: "_CNT" },
    HwReg { name: "ina", addr: 0x1f2, cname: "_INA" },
    HwReg { name: "inb", addr: 0x1f3, cname: "_INB" },
    HwReg { name: "outa", addr: 0x1f4, cname: "_OUTA" },
    HwReg { name: "outb", addr: 0x1f5, cname: "_OUTB" },
    HwReg { name: "dira", addr: 0x1f6, cname: "_DIRA" },
    HwReg { name: "dirb", addr: 0x1f7, cname: "_DIRB" },
    HwReg { name: "ctra", addr: 0x1f8, cname: "_CTRA" },
    HwReg { name: "ctrb", addr: 0x1f9, cname: "_CTRB" },
    HwReg { name: "frqa", addr: 0x1fa, cname: "_FRQA" },
    HwReg { name: "frqb", addr: 0x1fb, cname: "_FRQB" },
    HwReg { name: "phsa", addr: 0x1fc, cname: "_PHSA" },
    HwReg { name: "phsb", addr: 0x1fd, cname: "_PHSB" },
    HwReg { name: "vcfg", addr: 0x1fe, cname: "_VCFG" },
    HwReg { name: "vscl", addr: 0x1ff, cname: "_VSCL" },
];

const P2_HWREGS: &[HwReg] = &[
    HwReg { name: "ijmp3", addr: 0x1f0, cname: "_IJMP3" },
    HwReg { name: "iret3", addr: 0x1f1, cname: "_IRET3" },
    HwReg { name: "ijmp2", addr: 0x1f2, cname: "_IJMP2" },
    HwReg { name: "iret2", addr: 0x1f3, cname: "_IRET2" },
    HwReg { name: "ijmp1", addr: 0x1f4, cname: "_IJMP1" },
    HwReg { name: "iret1", addr: 0x1f5, cname: "_IRET1" },
    HwReg { name: "pa", addr: 0x1f6, cname: "_PA" },
    HwReg { name: "pb", addr: 0x1f7, cname: "_PB" },
    HwReg { name: "ptra", addr: 0x1f8, cname: "_PTRA" },
    HwReg { name: "ptrb", addr: 0x1f9, cname: "_PTRB" },
    HwReg { name: "dira", addr: 0x1fa, cname: "_DIRA" },
    HwReg { name: "dirb", addr: 0x1fb, cname: "_DIRB" },
    HwReg { name: "outa", addr: 0x1fc, cname: "_OUTA" },
    HwReg { name: "outb", addr: 0x1fd, cname: "_OUTB" },
    HwReg { name: "ina", addr: 0x1fe, cname: "_INA" },
    HwReg { name: "inb", addr: 0x1ff, cname: "_INB" },
];

struct RawInstr(&'static str, u32, InstrOps);

const P1_INSTRS: &[RawInstr] = &[
    RawInstr("abs", 0xa8800000, InstrOps::TwoOperands),
    RawInstr("add", 0x80800000, InstrOps::TwoOperands),
    RawInstr("and", 0x60800000, InstrOps::TwoOperands),
    RawInstr("andn", 0x64800000, InstrOps::TwoOperands),
    RawInstr("call", 0x5cc00000, InstrOps::CallOperand),
    RawInstr("cmp", 0x84000000, InstrOps::TwoOperands),
    RawInstr("cmps", 0xc0000000, InstrOps::TwoOperands),
    RawInstr("djnz", 0xe4800000, InstrOps::JmpOperand),
    RawInstr("jmp", 0x5c000000, InstrOps::JmpOperand),
    RawInstr("maxs", 0x44800000, InstrOps::TwoOperands),
    RawInstr("mins", 0x40800000, InstrOps::TwoOperands),
    RawInstr("mov", 0xa0800000, InstrOps::TwoOperands),
    RawInstr("neg", 0xa4800000, InstrOps::TwoOperands),
    RawInstr("nop", 0x00000000, InstrOps::NoOperands),
    RawInstr("or", 0x68800000, InstrOps::TwoOperands),
    RawInstr("rdbyte", 0x00800000, InstrOps::TwoOperands),
    RawInstr("rdword", 0x08800000, InstrOps::TwoOperands),
    RawInstr("rdlong", 0x10800000, InstrOps::TwoOperands),
    RawInstr("ret", 0x5c400000, InstrOps::NoOperands),
    RawInstr("rev", 0x3c800000, InstrOps::TwoOperands),
    RawInstr("rol", 0x24800000, InstrOps::TwoOperands),
    RawInstr("ror", 0x20800000, InstrOps::TwoOperands),
    RawInstr("sar", 0x38800000, InstrOps::TwoOperands),
    RawInstr("shl", 0x2c800000, InstrOps::TwoOperands),
    RawInstr("shr", 0x28800000, InstrOps::TwoOperands),
    RawInstr("sub", 0x84800000, InstrOps::TwoOperands),
    RawInstr("waitcnt", 0xf8800000, InstrOps::TwoOperands),
    RawInstr("waitpeq", 0xf0000000, InstrOps::TwoOperands),
    RawInstr("waitpne", 0xf4000000, InstrOps::TwoOperands),
    RawInstr("waitvid", 0xfc000000, InstrOps::TwoOperands),
    RawInstr("wrbyte", 0x00000000, InstrOps::TwoOperands),
    RawInstr("wrword", 0x08000000, InstrOps::TwoOperands),
    RawInstr("wrlong", 0x10000000, InstrOps::TwoOperands),
    RawInstr("xor", 0x6c800000, InstrOps::TwoOperands),
];

/// Map a mnemonic to the IR opcode it corresponds to. `mov` is the one
/// mnemonic whose spelling differs from the opcode name.
fn opcode_for(name: &str) -> IrOp {
    if name == "mov" {
        return IrOp::MOVE;
    }
    IrOp::from_str(name).unwrap_or(IrOp::UNKNOWN)
}

/// Fill the hardware register and instruction tables for the selected
/// variant and enter them into the reserved-word table.
pub fn init_pasm(ctx: &mut Ctx) {
    let hwregs = match ctx.opts.variant {
        Variant::P1 => P1_HWREGS,
        Variant::P2 => P2_HWREGS,
    };
    for (i, hw) in hwregs.iter().enumerate() {
        let id = HwRegId(i as u32);
        ctx.hwregs.push(hw.clone());
        let _ = ctx.syms.add_internal(
            ctx.reserved,
            hw.name,
            SymbolKind::HwReg,
            SymVal::HwReg(id),
            None,
        );
    }
    for raw in P1_INSTRS {
        let id = InstrId(ctx.instrs.len() as u32);
        ctx.instrs.push(InstrDesc {
            name: raw.0,
            binary: raw.1,
            ops: raw.2,
            opc: opcode_for(raw.0),
        });
        let _ = ctx.syms.add_internal(
            ctx.reserved,
            raw.0,
            SymbolKind::Reserved,
            SymVal::Instr(id),
            None,
        );
    }
}

impl Ctx {
    pub fn hwreg(&self, id: HwRegId) -> &HwReg {
        &self.hwregs[id.index()]
    }

    pub fn instr(&self, id: InstrId) -> &InstrDesc {
        &self.instrs[id.index()]
    }
}
