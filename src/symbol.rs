//! Symbol store: hashed, case-optional, nested tables.
//!
//! Tables live in the [`SymSpace`] arena and chain to an outer table, so a
//! function's local table links to its module's object table which links
//! to the reserved words. A namespace is just a symbol whose value is
//! another table.

use std::rc::Rc;

use util::eq_nocase;

use crate::ast::AstId;
use crate::diag::DiagKind;
use crate::module::{FuncId, ModId};
use crate::pasm::{HwRegId, InstrId};
use crate::Ctx;

/// Bucket count; keep this a power of two.
pub const SYMTABLE_HASH_SIZE: u32 = 256;

/// Rolling hash over the name with the ASCII case bit stripped, so a
/// case-insensitive table can share buckets with a sensitive one. This is
/// the canonical hash; other stages (the CSE set) reuse it.
pub fn raw_symbol_hash(name: &str) -> u32 {
    let mut hash: u32 = 987654321;
    for &c in name.as_bytes() {
        let c = (c & !0x20) as u32;
        hash = hash.wrapping_mul(65537);
        hash ^= c;
    }
    hash
}

pub fn symbol_hash(name: &str) -> u32 {
    raw_symbol_hash(name) % SYMTABLE_HASH_SIZE
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SymId(u32);

impl SymId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TableId(u32);

impl TableId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolKind {
    Unknown,
    Constant,
    FloatConstant,
    Parameter,
    Result,
    LocalVar,
    TempVar,
    Variable,
    HwReg,
    Reserved,
    Label,
    Function,
    Builtin,
    Typedef,
    Namespace,
    WeakAlias,
}

#[derive(Clone, Debug)]
pub enum SymVal {
    None,
    Int(i64),
    /// Bit pattern of a float constant.
    Float(u32),
    /// Declared type of a variable-like symbol.
    Type(AstId),
    /// Defining expression of a constant.
    Expr(AstId),
    Func(FuncId),
    /// Nested table of a namespace symbol.
    Table(TableId),
    HwReg(HwRegId),
    Instr(InstrId),
    /// Target name of an alias.
    Alias(Rc<str>),
    /// Data label in a DAT section.
    Label {
        offset: i32,
        asmval: i32,
        typ: Option<AstId>,
    },
}

pub const SYMF_GLOBAL: u32 = 0x01;
pub const SYMF_ADDRESSABLE: u32 = 0x02;
pub const SYMF_INTERNAL: u32 = 0x04;
pub const SYMF_ASM_USED: u32 = 0x08;

#[derive(Clone, Debug)]
pub struct Symbol {
    /// Canonical stored name.
    pub name: Rc<str>,
    /// Spelling as the user wrote it, for diagnostics.
    pub user_name: Rc<str>,
    pub kind: SymbolKind,
    pub val: SymVal,
    pub flags: u32,
    /// Parameter/local layout offset; also the reverse-lookup key.
    pub offset: i32,
    pub module: Option<ModId>,
}

impl Symbol {
    pub fn is_alias(&self) -> bool {
        self.kind == SymbolKind::WeakAlias
    }
}

pub const SYMTAB_FLAG_NOCASE: u32 = 0x01;

pub struct SymbolTable {
    buckets: Vec<Vec<SymId>>,
    ordered: Vec<SymId>,
    pub parent: Option<TableId>,
    pub flags: u32,
}

/// Per-call case override for [`SymSpace::find`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CaseMode {
    Default,
    ForceSensitive,
    ForceInsensitive,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LookupOutcome {
    Found(SymId),
    NotFound,
    /// More than 32 alias hops: a recursive definition.
    Cycle,
}

const MAX_ALIAS_HOPS: u32 = 32;

pub struct SymSpace {
    tables: Vec<SymbolTable>,
    syms: Vec<Symbol>,
    global_case_sensitive: bool,
}

impl SymSpace {
    pub fn new(global_case_sensitive: bool) -> SymSpace {
        SymSpace {
            tables: Vec::new(),
            syms: Vec::new(),
            global_case_sensitive,
        }
    }

    pub fn new_table(&mut self, parent: Option<TableId>, nocase: bool) -> TableId {
        let id = TableId(self.tables.len() as u32);
        self.tables.push(SymbolTable {
            buckets: vec![Vec::new(); SYMTABLE_HASH_SIZE as usize],
            ordered: Vec::new(),
            parent,
            flags: if nocase { SYMTAB_FLAG_NOCASE } else { 0 },
        });
        id
    }

    pub fn table(&self, t: TableId) -> &SymbolTable {
        &self.tables[t.index()]
    }

    pub fn table_mut(&mut self, t: TableId) -> &mut SymbolTable {
        &mut self.tables[t.index()]
    }

    pub fn sym(&self, s: SymId) -> &Symbol {
        &self.syms[s.index()]
    }

    pub fn sym_mut(&mut self, s: SymId) -> &mut Symbol {
        &mut self.syms[s.index()]
    }

    fn nocase(&self, t: TableId, mode: CaseMode) -> bool {
        match mode {
            CaseMode::ForceSensitive => false,
            CaseMode::ForceInsensitive => true,
            CaseMode::Default => {
                self.table(t).flags & SYMTAB_FLAG_NOCASE != 0 && !self.global_case_sensitive
            }
        }
    }

    /// Bucket search in a single table.
    pub fn find(&self, t: TableId, name: &str, mode: CaseMode) -> Option<SymId> {
        let nocase = self.nocase(t, mode);
        let hash = symbol_hash(name) as usize;
        for &id in &self.table(t).buckets[hash] {
            let sym = self.sym(id);
            let hit = if nocase {
                eq_nocase(&sym.name, name)
            } else {
                &*sym.name == name
            };
            if hit {
                return Some(id);
            }
        }
        None
    }

    /// Like [`SymSpace::find`], but walks outer tables too.
    pub fn find_in_context(&self, t: TableId, name: &str) -> Option<SymId> {
        let mut cur = Some(t);
        while let Some(tab) = cur {
            if let Some(sym) = self.find(tab, name, CaseMode::Default) {
                return Some(sym);
            }
            cur = self.table(tab).parent;
        }
        None
    }

    fn lookup_level(&self, t: TableId, name: &str, level: u32) -> LookupOutcome {
        let mut found = None;
        let mut cur = Some(t);
        while let Some(tab) = cur {
            if let Some(sym) = self.find(tab, name, CaseMode::Default) {
                found = Some(sym);
                break;
            }
            cur = self.table(tab).parent;
        }
        let sym = match found {
            Some(s) => s,
            None => return LookupOutcome::NotFound,
        };
        if self.sym(sym).is_alias() {
            if level >= MAX_ALIAS_HOPS {
                return LookupOutcome::Cycle;
            }
            let target = match &self.sym(sym).val {
                SymVal::Alias(target) => target.clone(),
                _ => return LookupOutcome::Found(sym),
            };
            return match self.lookup_level(t, &target, level + 1) {
                LookupOutcome::NotFound => LookupOutcome::Found(sym),
                other => other,
            };
        }
        LookupOutcome::Found(sym)
    }

    /// Chain walk with alias dereferencing; returns the final non-alias
    /// binding. Alias chains longer than 32 hops report a cycle.
    pub fn lookup(&self, t: TableId, name: &str) -> LookupOutcome {
        self.lookup_level(t, name, 0)
    }

    /// Insert a symbol. An existing weak alias of the same name is
    /// overridden; any other duplicate is rejected and returned.
    pub fn add(
        &mut self,
        t: TableId,
        name: &str,
        kind: SymbolKind,
        val: SymVal,
        user_name: Option<&str>,
    ) -> Result<SymId, SymId> {
        if let Some(existing) = self.find(t, name, CaseMode::Default) {
            if !self.sym(existing).is_alias() {
                return Err(existing);
            }
        }
        let id = SymId(self.syms.len() as u32);
        self.syms.push(Symbol {
            name: Rc::from(name),
            user_name: Rc::from(user_name.unwrap_or(name)),
            kind,
            val,
            flags: 0,
            offset: 0,
            module: None,
        });
        let hash = symbol_hash(name) as usize;
        // newest first, so the new binding shadows an overridden alias
        let table = self.table_mut(t);
        table.buckets[hash].insert(0, id);
        table.ordered.push(id);
        Ok(id)
    }

    pub fn add_internal(
        &mut self,
        t: TableId,
        name: &str,
        kind: SymbolKind,
        val: SymVal,
        user_name: Option<&str>,
    ) -> Result<SymId, SymId> {
        let id = self.add(t, name, kind, val, user_name)?;
        self.sym_mut(id).flags |= SYMF_INTERNAL;
        Ok(id)
    }

    /// Reverse lookup by layout offset. Slow (whole-table scan) and not
    /// guaranteed unique. Looking for a `Result` at offset 0 also probes
    /// `Parameter` then `LocalVar`, matching Spin's aliasing of the return
    /// value onto the first slot.
    pub fn find_by_offset(&self, t: TableId, offset: i32, kind: SymbolKind) -> Option<SymId> {
        let scan = |want: SymbolKind, off: i32| {
            self.table(t)
                .ordered
                .iter()
                .copied()
                .find(|&id| self.sym(id).offset == off && self.sym(id).kind == want)
        };
        let mut found = scan(kind, offset);
        let mut kind = kind;
        if found.is_none() && kind == SymbolKind::Result {
            kind = SymbolKind::Parameter;
            found = scan(SymbolKind::Parameter, 0);
        }
        if found.is_none() && kind == SymbolKind::Parameter {
            found = scan(SymbolKind::LocalVar, 0);
        }
        found
    }

    /// Symbols in insertion order.
    pub fn ordered_syms(&self, t: TableId) -> &[SymId] {
        &self.table(t).ordered
    }

    /// Get or create the nested table of a namespace symbol.
    pub fn namespace(&mut self, t: TableId, name: &str) -> TableId {
        if let LookupOutcome::Found(sym) = self.lookup(t, name) {
            if self.sym(sym).kind == SymbolKind::Namespace {
                if let SymVal::Table(sub) = self.sym(sym).val {
                    return sub;
                }
            }
        }
        let flags = self.table(t).flags;
        let sub = self.new_table(None, flags & SYMTAB_FLAG_NOCASE != 0);
        let _ = self.add(t, name, SymbolKind::Namespace, SymVal::Table(sub), None);
        sub
    }
}

impl Ctx {
    /// Resolve a plain name in the current function/module context.
    /// Alias cycles are diagnosed here.
    pub fn lookup_symbol(&mut self, name: &str) -> Option<SymId> {
        let table = if let Some(f) = self.cur_func {
            self.func(f).localsyms
        } else if let Some(m) = self.cur_module {
            self.module(m).objsyms
        } else {
            self.reserved
        };
        match self.syms.lookup(table, name) {
            LookupOutcome::Found(sym) => Some(sym),
            LookupOutcome::NotFound => None,
            LookupOutcome::Cycle => {
                let msg = format!("recursive definition for symbol {}", name);
                self.diag(DiagKind::TypeError, None, &msg);
                None
            }
        }
    }

    /// Insert with the standard diagnostics: duplicate definitions are
    /// reported, and shadowing a reserved word earns a warning.
    pub fn declare_symbol(
        &mut self,
        t: TableId,
        name: &str,
        kind: SymbolKind,
        val: SymVal,
        user_name: Option<&str>,
    ) -> Option<SymId> {
        if self
            .syms
            .find(self.reserved, name, CaseMode::ForceInsensitive)
            .is_some()
        {
            let msg = format!("redefining reserved word {}", user_name.unwrap_or(name));
            self.warning(None, &msg);
        }
        match self.syms.add(t, name, kind, val, user_name) {
            Ok(id) => Some(id),
            Err(_) => {
                let msg = format!(
                    "Duplicate definition for symbol `{}'",
                    user_name.unwrap_or(name)
                );
                self.diag(DiagKind::SymbolRedefinition, None, &msg);
                None
            }
        }
    }
}
