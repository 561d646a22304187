//! Modules (compilation objects) and functions.

use std::rc::Rc;

use pir::{IrList, OpId};

use crate::ast::AstId;
use crate::symbol::TableId;
use crate::{Ctx, Language, OPT_DEFAULT};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ModId(u32);

impl ModId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FuncId(u32);

impl FuncId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Backend-owned per-module data. One backend owns this slot for the
/// lifetime of one compilation of the module.
#[derive(Clone, Debug)]
pub enum BackendData {
    /// Flags for the assembly backend: which runtime helpers must be
    /// emitted.
    Asm {
        need_mul_helper: bool,
        need_div_helper: bool,
    },
}

pub struct Module {
    pub classname: Rc<str>,
    pub basename: Rc<str>,
    pub functions: Vec<FuncId>,
    pub objsyms: TableId,
    pub conblock: Option<AstId>,
    pub datblock: Option<AstId>,
    pub varblock: Option<AstId>,
    pub main_language: Language,
    pub volatile_variables: bool,
    pub bedata: Option<BackendData>,
}

pub const FUNC_IS_STATIC: u32 = 0x0001;
pub const FUNC_IS_PUBLIC: u32 = 0x0002;
pub const FUNC_FORCE_STATIC: u32 = 0x0004;
pub const FUNC_COG_TASK: u32 = 0x0008;
pub const FUNC_USES_ALLOCA: u32 = 0x0010;
pub const FUNC_LOCAL_ADDRESS_TAKEN: u32 = 0x0020;
pub const FUNC_FORCE_LOCALS_TO_STACK: u32 = 0x0040;
pub const FUNC_STACK_LOCAL: u32 = 0x0080;
pub const FUNC_SETS_SEND: u32 = 0x0100;
pub const FUNC_SETS_RECV: u32 = 0x0200;
pub const FUNC_USED_AS_PTR: u32 = 0x0400;
pub const FUNC_IS_LEAF: u32 = 0x0800;
pub const FUNC_IS_RECURSIVE: u32 = 0x1000;

pub struct Function {
    pub name: Rc<str>,
    pub user_name: Rc<str>,
    pub module: ModId,
    pub language: Language,
    /// Right-chained list of parameter declarations.
    pub params: Option<AstId>,
    /// Right-chained list of local declarations.
    pub locals: Option<AstId>,
    pub body: Option<AstId>,
    pub overall_type: Option<AstId>,
    pub result_expr: Option<AstId>,
    pub num_results: i32,
    pub localsyms: TableId,
    pub flags: u32,
    /// Number of distinct call sites; zero plus the unused-function
    /// optimization means the function is not emitted.
    pub call_sites: u32,
    pub optimize_flags: u32,
    /// When locals are coalesced into a single addressable array, its
    /// name; `None` when locals live in registers.
    pub local_array: Option<Rc<str>>,
    // assembly-backend state
    pub asmname: Option<OpId>,
    pub asmretname: Option<OpId>,
    pub ir: Option<IrList>,
    pub is_inline: bool,
}

impl Function {
    pub fn is_public(&self) -> bool {
        self.flags & FUNC_IS_PUBLIC != 0
    }

    pub fn local_address_taken(&self) -> bool {
        self.flags & FUNC_LOCAL_ADDRESS_TAKEN != 0
    }
}

impl Ctx {
    pub fn new_module(&mut self, classname: &str, basename: &str, language: Language) -> ModId {
        let objsyms = self
            .syms
            .new_table(Some(self.reserved), !language.case_sensitive());
        let id = ModId(self.modules.len() as u32);
        self.modules.push(Module {
            classname: Rc::from(classname),
            basename: Rc::from(basename),
            functions: Vec::new(),
            objsyms,
            conblock: None,
            datblock: None,
            varblock: None,
            main_language: language,
            volatile_variables: false,
            bedata: None,
        });
        id
    }

    pub fn new_function(&mut self, module: ModId, name: &str, language: Language) -> FuncId {
        let objsyms = self.module(module).objsyms;
        let localsyms = self
            .syms
            .new_table(Some(objsyms), !language.case_sensitive());
        let id = FuncId(self.funcs.len() as u32);
        self.funcs.push(Function {
            name: Rc::from(name),
            user_name: Rc::from(name),
            module,
            language,
            params: None,
            locals: None,
            body: None,
            overall_type: None,
            result_expr: None,
            num_results: 1,
            localsyms,
            flags: 0,
            call_sites: 0,
            optimize_flags: OPT_DEFAULT,
            local_array: None,
            asmname: None,
            asmretname: None,
            ir: None,
            is_inline: false,
        });
        self.module_mut(module).functions.push(id);
        id
    }
}
