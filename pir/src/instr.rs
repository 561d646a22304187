use num::traits::{FromPrimitive, ToPrimitive};
use num_derive::{FromPrimitive, ToPrimitive};
use util::EnumFromStr;
use util_derive::EnumFromStr;

/// Instruction opcodes.
///
/// `LABEL`, `COMMENT`, `DEAD` and `CONST` emit nothing; they exist to carry
/// information between the code generator and the optimizer. `DEAD` marks
/// its `dst` operand as unneeded past that point.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive, EnumFromStr)]
pub enum IrOp {
    LABEL,
    COMMENT,
    DEAD,
    CONST,

    BYTE,
    WORD,
    LONG,
    STRING,

    MOVE,
    NEG,
    NOT,
    ABS,

    ADD,
    SUB,
    MINS,
    MAXS,

    AND,
    ANDN,
    OR,
    XOR,

    SHL,
    SHR,
    SAR,
    ROL,
    ROR,
    REV,

    CMP,
    CMPS,

    RDBYTE,
    RDWORD,
    RDLONG,
    WRBYTE,
    WRWORD,
    WRLONG,

    WAITCNT,
    WAITPEQ,
    WAITPNE,
    WAITVID,

    JUMP,
    DJNZ,
    CALL,
    RET,

    UNKNOWN,
}

/// Condition codes for conditional execution.
///
/// The encoding pairs each condition with its complement so that inverting
/// is a single bit flip (`TRUE`/`FALSE`, `LT`/`GE`, `EQ`/`NE`, `LE`/`GT`,
/// `C`/`NC`).
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive, EnumFromStr)]
pub enum IrCond {
    TRUE,
    FALSE,
    LT,
    GE,
    EQ,
    NE,
    LE,
    GT,
    C,
    NC,
}

impl Default for IrCond {
    fn default() -> IrCond {
        IrCond::TRUE
    }
}

impl IrCond {
    /// The complementary condition (`EQ` -> `NE`, `GE` -> `LT`, ...).
    pub fn invert(self) -> IrCond {
        IrCond::from_u32(self.to_u32().unwrap() ^ 1).unwrap()
    }

    /// The condition after the two sides of a comparison are exchanged
    /// (`a < b` becomes `b > a`).
    pub fn flip_sides(self) -> IrCond {
        match self {
            IrCond::LT => IrCond::GT,
            IrCond::GT => IrCond::LT,
            IrCond::LE => IrCond::GE,
            IrCond::GE => IrCond::LE,
            other => other,
        }
    }
}

macro_rules! impl_enum_display {
    ($e:ty) => {
        impl std::fmt::Display for $e {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                std::fmt::Debug::fmt(self, f)
            }
        }
    };
}

impl_enum_display!(IrOp);
impl_enum_display!(IrCond);

/// Instruction writes the zero flag.
pub const FLAG_WZ: u32 = 0x01;
/// Instruction writes the carry flag.
pub const FLAG_WC: u32 = 0x02;
/// At least one jump or reference to this label was found.
pub const FLAG_LABEL_USED: u32 = 0x04;
/// Scratch bits owned by the optimizer, cleared on every round.
pub const FLAG_OPTIMIZER: u32 = FLAG_LABEL_USED;

impl IrOp {
    /// True for instructions that emit nothing and are skipped by the
    /// optimizer (condition-`FALSE` instructions are also dummies, see
    /// [`Ir::is_dummy`](crate::ir::Ir::is_dummy)).
    pub fn is_pseudo(self) -> bool {
        match self {
            IrOp::COMMENT | IrOp::DEAD | IrOp::CONST => true,
            _ => false,
        }
    }

    /// Does the instruction read its destination register?
    /// Plain moves and memory loads overwrite it instead.
    pub fn reads_dst(self) -> bool {
        match self {
            IrOp::MOVE
            | IrOp::NEG
            | IrOp::NOT
            | IrOp::ABS
            | IrOp::RDBYTE
            | IrOp::RDWORD
            | IrOp::RDLONG => false,
            _ => true,
        }
    }

    /// Does the instruction modify its destination register?
    /// Compares, waits and labels leave it untouched.
    pub fn sets_dst(self) -> bool {
        match self {
            IrOp::CMP
            | IrOp::CMPS
            | IrOp::WAITPEQ
            | IrOp::WAITPNE
            | IrOp::WAITVID
            | IrOp::LABEL => false,
            _ => true,
        }
    }

    pub fn is_jump(self) -> bool {
        match self {
            IrOp::JUMP | IrOp::DJNZ => true,
            _ => false,
        }
    }

    pub fn is_branch(self) -> bool {
        self.is_jump() || self == IrOp::CALL
    }

    /// Can `wz` be appended to compare the result against zero for free?
    pub fn can_test_zero(self) -> bool {
        match self {
            IrOp::ADD
            | IrOp::SUB
            | IrOp::AND
            | IrOp::ANDN
            | IrOp::OR
            | IrOp::XOR
            | IrOp::MOVE
            | IrOp::NEG
            | IrOp::RDLONG
            | IrOp::RDWORD
            | IrOp::RDBYTE
            | IrOp::SAR
            | IrOp::SHR
            | IrOp::SHL => true,
            _ => false,
        }
    }
}
