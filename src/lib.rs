//! Language-neutral middle end for a family of small-microcontroller
//! compilers targeting the two-variant P1/P2 chips.
//!
//! Frontends (Spin1/Spin2, BASIC, C, BF) parse source into the shared AST
//! defined here; backends print C/C++, assembly, a binary image, bytecode,
//! or a debug object file. Everything in between is this crate:
//!
//! 1. the symbol store ([`symbol`]),
//! 2. the AST model and utilities ([`ast`]),
//! 3. expression evaluation and typing ([`expr`]),
//! 4. the high-level transforms run on every function ([`hltransform`],
//!    [`cases`], [`printdebug`]),
//! 5. common-subexpression elimination and loop-invariant motion ([`cse`]),
//! 6. loop analysis and strength reduction ([`loops`]),
//! 7. the high-level optimizer driver ([`hloptimize`]),
//! 8. lowering of the transformed AST to register-level IR ([`outasm`],
//!    with the IR itself and its optimizer in the `pir` crate).
//!
//! A frontend drives the pipeline per module:
//!
//! ```ignore
//! for f in module_functions {
//!     hltransform::do_hl_transforms(ctx, f);
//! }
//! cse::perform_cse(ctx, module);
//! hloptimize::do_high_level_optimize(ctx, module);
//! ```
//!
//! All state lives in a [`Ctx`]: the AST arena, symbol space, modules and
//! functions, diagnostics, and the call-stack-scoped bits of context (the
//! current module, current function, and the "report-as" source-location
//! hint used to tag synthesized nodes).

extern crate num;

pub mod ast;
pub mod cases;
pub mod cse;
pub mod diag;
pub mod expr;
pub mod hloptimize;
pub mod hltransform;
pub mod loops;
pub mod module;
pub mod outasm;
pub mod pasm;
pub mod printdebug;
pub mod source;
pub mod symbol;


use crate::ast::{AstArena, AstId};
use crate::diag::Diagnostics;
use crate::module::{FuncId, Function, ModId, Module};
use crate::pasm::{HwReg, InstrDesc};
use crate::source::{LexStream, SrcLoc, StreamId};
use crate::symbol::{SymSpace, TableId};

/// Source language of a function or module. Case sensitivity of symbol
/// lookup follows the language unless globally overridden.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Language {
    Spin1,
    Spin2,
    Basic,
    C,
    Bf,
}

impl Language {
    pub fn case_sensitive(self) -> bool {
        match self {
            Language::C | Language::Bf => true,
            _ => false,
        }
    }

    pub fn is_spin(self) -> bool {
        match self {
            Language::Spin1 | Language::Spin2 => true,
            _ => false,
        }
    }
}

/// Which artifact the current compilation produces. Several transforms
/// take slightly different shapes for bytecode or C-family output.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OutputKind {
    C,
    Cpp,
    Pasm,
    Gas,
    Binary,
    Bytecode,
    Obj,
}

impl OutputKind {
    pub fn is_c_family(self) -> bool {
        match self {
            OutputKind::C | OutputKind::Cpp => true,
            _ => false,
        }
    }
}

/// Target chip variant.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Variant {
    P1,
    P2,
}

/// Global compilation options.
#[derive(Clone, Debug)]
pub struct Options {
    pub variant: Variant,
    pub output: OutputKind,
    /// Force case-sensitive symbol lookup regardless of language.
    pub case_sensitive: bool,
    /// Replace symbolic constants by their values where legal.
    pub expand_constants: bool,
    /// DEBUG() statements are compiled in.
    pub debug: bool,
    /// DEBUG() uses the BRK-based kernel instead of printf lowering.
    pub brk_debug: bool,
    /// The bytecode interpreter is the new-style one; a few transforms
    /// that are skipped for the traditional interpreter run for it.
    pub nucode: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            variant: Variant::P1,
            output: OutputKind::Pasm,
            case_sensitive: false,
            expand_constants: false,
            debug: false,
            brk_debug: false,
            nucode: false,
        }
    }
}

impl Options {
    /// Classic bytecode output for the traditional interpreter; several
    /// transforms are skipped in this mode.
    pub fn traditional_bytecode(&self) -> bool {
        self.output == OutputKind::Bytecode && !self.nucode
    }
}

/// Per-function optimization enables.
pub const OPT_PERFORM_CSE: u32 = 0x01;
pub const OPT_PERFORM_LOOPREDUCE: u32 = 0x02;
pub const OPT_LOOP_BASIC: u32 = 0x04;
pub const OPT_DEADCODE: u32 = 0x08;
pub const OPT_INLINE_SMALLFUNCS: u32 = 0x10;
pub const OPT_REMOVE_UNUSED_FUNCS: u32 = 0x20;

pub const OPT_DEFAULT: u32 = OPT_PERFORM_CSE
    | OPT_PERFORM_LOOPREDUCE
    | OPT_DEADCODE
    | OPT_INLINE_SMALLFUNCS
    | OPT_REMOVE_UNUSED_FUNCS;
pub const OPT_BASIC: u32 = OPT_LOOP_BASIC | OPT_DEADCODE;

/// Default ceiling for minted temporary names; exceeding it is fatal.
const TEMP_NAME_LIMIT: i32 = 99999;

/// Saved report-as hint, restored with [`Ctx::report_done`].
pub struct ReportSave(Option<SrcLoc>);

/// Well-known singleton type nodes. These are shared (never duplicated by
/// `dup_type_safe`) and compared by id.
pub struct StdTypes {
    pub long: AstId,
    pub word: AstId,
    pub byte: AstId,
    pub ulong: AstId,
    pub uword: AstId,
    pub ubyte: AstId,
    pub int64: AstId,
    pub float: AstId,
    pub string: AstId,
    pub generic: AstId,
    pub void: AstId,
    pub bool_: AstId,
}

/// Whole-compilation state plus the implicit context that used to be
/// module-scoped globals: the current module, current function, and the
/// report-as source-location hint. Public entry points save, set and
/// restore those on every path.
pub struct Ctx {
    pub opts: Options,
    pub ast: AstArena,
    pub syms: SymSpace,
    pub streams: Vec<LexStream>,
    pub modules: Vec<Module>,
    pub funcs: Vec<Function>,
    pub hwregs: Vec<HwReg>,
    pub instrs: Vec<InstrDesc>,
    /// Reserved words: hardware registers and instruction mnemonics.
    pub reserved: TableId,
    pub diags: Diagnostics,
    pub types: StdTypes,
    pub cur_module: Option<ModId>,
    pub cur_func: Option<FuncId>,
    pub cur_stream: Option<StreamId>,
    report_as: Option<SrcLoc>,
    tmp_num: i32,
    tmp_max: i32,
}

impl Ctx {
    pub fn new(opts: Options) -> Ctx {
        let mut ast = AstArena::new();
        let mut syms = SymSpace::new(opts.case_sensitive);
        let types = ast.make_std_types();
        let reserved = syms.new_table(None, true);
        let mut ctx = Ctx {
            opts,
            ast,
            syms,
            streams: Vec::new(),
            modules: Vec::new(),
            funcs: Vec::new(),
            hwregs: Vec::new(),
            instrs: Vec::new(),
            reserved,
            diags: Diagnostics::new(),
            types,
            cur_module: None,
            cur_func: None,
            cur_stream: None,
            report_as: None,
            tmp_num: 1,
            tmp_max: TEMP_NAME_LIMIT,
        };
        pasm::init_pasm(&mut ctx);
        ctx
    }

    pub fn module(&self, m: ModId) -> &Module {
        &self.modules[m.index()]
    }

    pub fn module_mut(&mut self, m: ModId) -> &mut Module {
        &mut self.modules[m.index()]
    }

    pub fn func(&self, f: FuncId) -> &Function {
        &self.funcs[f.index()]
    }

    pub fn func_mut(&mut self, f: FuncId) -> &mut Function {
        &mut self.funcs[f.index()]
    }

    pub fn set_current_module(&mut self, m: Option<ModId>) -> Option<ModId> {
        std::mem::replace(&mut self.cur_module, m)
    }

    pub fn set_current_function(&mut self, f: Option<FuncId>) -> Option<FuncId> {
        std::mem::replace(&mut self.cur_func, f)
    }

    /// Language governing identifier comparison right now.
    pub fn cur_language(&self) -> Language {
        if let Some(f) = self.cur_func {
            return self.func(f).language;
        }
        if let Some(m) = self.cur_module {
            return self.module(m).main_language;
        }
        Language::Spin1
    }

    pub fn identifiers_case_sensitive(&self) -> bool {
        self.opts.case_sensitive || self.cur_language().case_sensitive()
    }

    /// Set the report-as hint from an existing node, so nodes synthesized
    /// by a rewrite carry the location of the original construct. Always
    /// pair with [`Ctx::report_done`].
    pub fn report_as(&mut self, old: Option<AstId>) -> ReportSave {
        let save = ReportSave(self.report_as);
        self.report_as = old.map(|id| self.ast[id].loc);
        save
    }

    pub fn report_done(&mut self, save: ReportSave) {
        self.report_as = save.0;
    }

    pub(crate) fn current_loc(&self) -> SrcLoc {
        if let Some(loc) = self.report_as {
            return loc;
        }
        if let Some(stream) = self.cur_stream {
            return SrcLoc {
                stream: Some(stream),
                line_idx: self.streams[stream.index()].current_index(),
            };
        }
        SrcLoc::none()
    }

    pub fn new_stream(&mut self, filename: &str) -> StreamId {
        let id = StreamId::new(self.streams.len());
        self.streams.push(LexStream::new(filename));
        id
    }

    /// Set the rolling base for temporary names, returning the old base.
    /// `max` of zero leaves the ceiling unchanged.
    pub fn set_temp_base(&mut self, base: i32, max: i32) -> i32 {
        let old = self.tmp_num;
        self.tmp_num = base;
        if max > 0 {
            self.tmp_max = max;
        }
        old
    }

    /// Mint a fresh temporary name `prefix_NNNN`. Exhausting the name
    /// space is unrecoverable.
    pub fn new_temp_name(&mut self, prefix: &str, counter: Option<&mut i32>) -> String {
        let ctr = match counter {
            Some(c) => c,
            None => &mut self.tmp_num,
        };
        let val = *ctr;
        *ctr = val + 1;
        if *ctr > self.tmp_max {
            panic!("Temporary variable limit of {} exceeded", self.tmp_max);
        }
        format!("{}_{:04}", prefix, val)
    }

    pub fn errors(&self) -> u32 {
        self.diags.errors
    }
}
