use num_derive::{FromPrimitive, ToPrimitive};

/// Node tags. Grouped as: literals, identifiers, operators, type
/// constructors, control flow, declarations, memory references,
/// object/method references, inline-asm markers, and pseudo markers
/// (comments, line breaks) that traversals look through.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AstKind {
    Unknown,
    ListHolder,
    Integer,
    String,

    Identifier,
    Operator,
    Float,
    Assign,

    EnumSet,
    ArrayDecl,
    ByteList,
    WordList,

    LongList,
    IntType,
    UnsignedType,
    ArrayType,

    FuncDecl,
    FuncDef,
    FuncVars,
    StmtList,

    Instr,
    HwReg,
    Return,
    If,

    WaitCnt,

    ThenElse,
    Range,
    RangeRef,
    FuncCall,

    ExprList,
    InstrHolder,
    InstrModifier,
    Org,

    Here,
    PostSet,
    While,
    DoWhile,

    For,
    MemRef,
    ArrayRef,
    CountRepeat,

    Case,
    CaseItem,
    Other,
    Res,

    From,
    To,
    Step,
    Fit,

    AddrOf,
    Lookup,
    Lookdown,
    Object,

    MethodRef,
    ConstRef,
    ObjDecl,
    StringPtr,

    Yield,
    Constant,
    QuitLoop,
    Continue,

    Result,
    Round,
    Trunc,
    ToFloat,

    File,
    Throw,
    Catch,
    LookExpr,

    DatAddrOf,
    Annotation,
    TempArrayDecl,
    TempArrayUse,

    PubFunc,
    PriFunc,
    FuncHolder,
    EnumSkip,

    LineBreak,
    Comment,
    CommentedNode,
    CogInit,

    SprRef,
    AbsAddrOf,
    FloatType,
    PtrType,

    GenericType,
    VoidType,
    Sequence,
    CondResult,

    ForAtLeastOnce,
    IsBetween,
    InlineAsm,
    Operand,

    OrgH,
    MaskMove,
    ConstModifier,
    VolatileModifier,

    ImmHolder,
    BigImmHolder,
    Align,
    OrgF,

    TupleType,
    SrcComment,
    DeclareVar,
    DeclareVarWeak,

    Label,
    Goto,
    Print,
    Char,

    RegPair,
    FuncType,
    SelfObj,
    BitValue,

    New,
    Delete,
    Using,
    GlobalVars,

    Lambda,
    SetJmp,
    TryEnv,
    CatchResult,

    SizeOf,
    Cast,
    VarArgs,
    Alloca,

    Scope,
    Extern,
    Static,
    Typedef,

    Symbol,
    VaStart,
    VaArg,
    DeclareAlias,

    Struct,
    Union,
    SimpleFuncPtr,
    Read,

    Gosub,
    Super,
    LocalIdentifier,
    Compress,

    BitField,
    CaseTable,
    JmpTable,
    FuncTemplate,

    ClassTemplate,
    EndCase,
    RefType,
    CopyRefType,

    Empty,
    SendArgs,
    FVar,
    FVars,

    InitModifier,
    DeclareBitfield,
    GetLow,
    GetHigh,

    FuncName,
    CaseExprVar,
    Bytecode,
    SameTypes,

    HasMethod,
    BrkDebug,
    ByteFit,
    WordFit,

    Register,
    GlobalRegisters,
    TypeOf,
    AssignInit,

    HereImm,
    FieldAddr,
    Field,
    AsmIf,

    AsmElseIf,
    AsmEndIf,
    Expect,
    PrintDebug,

    ErrHolder,
    SignedBoolType,
    UnsignedBoolType,
    BytePtr,

    StaticAssert,
    TaskInit,
    DittoStart,
    DittoEnd,

    DittoCount,
}

/// Operator codes carried in the integer payload of `Operator` and
/// `Assign` nodes. `Assign` with code `Assign` is the plain `:=`;
/// any other code makes it a compound assignment.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum Op {
    Unknown,
    Assign,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    HighMult,

    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Shl,
    Shr,
    Sar,
    Rotl,
    Rotr,
    Rev,

    Negate,
    Abs,
    Sqrt,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Ltu,
    Gtu,
    Leu,
    Geu,

    /// Short-circuit boolean operators.
    BoolAnd,
    BoolOr,
    BoolXor,
    BoolNot,
    /// Non-short-circuit logical operators; rewritten by the transforms.
    LogicAnd,
    LogicOr,
    LogicXor,

    Increment,
    Decrement,
    /// Reference-typed pre/post increment and decrement; lowered by
    /// reference decay.
    RefPreInc,
    RefPreDec,
    RefPostInc,
    RefPostDec,

    SignExtend,
    ZeroExtend,
    LimitMin,
    LimitMax,

    /// The `?` random operator.
    Random,
    Power,
    Asc,
    StrLen,
    Encode,
    Decode,
}

impl Op {
    pub fn is_comparison(self) -> bool {
        match self {
            Op::Eq | Op::Ne | Op::Lt | Op::Gt | Op::Le | Op::Ge | Op::Ltu | Op::Gtu | Op::Leu
            | Op::Geu => true,
            _ => false,
        }
    }

    pub fn is_bool(self) -> bool {
        match self {
            Op::BoolAnd | Op::BoolOr | Op::BoolXor | Op::BoolNot => true,
            _ => false,
        }
    }
}
