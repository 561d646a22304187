//! AST model.
//!
//! A node is a uniform binary tree cell: a kind tag, left and right child
//! ids, a small discriminated payload, and a source location. Right-chained
//! spines of `StmtList` / `ExprList` / `ListHolder` nodes are the canonical
//! sequence representation.
//!
//! Nodes live in an arena and are never freed during a compilation; after
//! [`util::dup_ast`] or a CSE replacement the tree may share subtrees (it
//! is a DAG, never a cycle). Mutating rewrites either clone first or go
//! through [`util::replace_ast`] / [`AstArena::nullify`].

pub mod kind;
pub mod util;

use std::ops::{Index, IndexMut};
use std::rc::Rc;

use num::traits::{FromPrimitive, ToPrimitive};

pub use self::kind::{AstKind, Op};

use crate::pasm::{HwRegId, InstrId};
use crate::source::SrcLoc;
use crate::symbol::{SymId, SymVal, SymbolKind, TableId};
use crate::{Ctx, StdTypes};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct AstId(u32);

impl AstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Payload of a node; which variant is legal depends on the kind
/// (`Integer` holds `Int`, `Identifier` holds `Str`, operators hold their
/// operator code as `Int`, and so on).
#[derive(Clone, Debug)]
pub enum Payload {
    None,
    Int(i64),
    Str(Rc<str>),
    Sym(SymId),
    HwReg(HwRegId),
    Instr(InstrId),
    Table(TableId),
}

#[derive(Clone, Debug)]
pub struct AstNode {
    pub kind: AstKind,
    pub left: Option<AstId>,
    pub right: Option<AstId>,
    pub payload: Payload,
    pub loc: SrcLoc,
}

pub struct AstArena {
    nodes: Vec<AstNode>,
}

impl Index<AstId> for AstArena {
    type Output = AstNode;
    fn index(&self, id: AstId) -> &AstNode {
        &self.nodes[id.index()]
    }
}

impl IndexMut<AstId> for AstArena {
    fn index_mut(&mut self, id: AstId) -> &mut AstNode {
        &mut self.nodes[id.index()]
    }
}

impl AstArena {
    pub fn new() -> AstArena {
        AstArena { nodes: Vec::new() }
    }

    pub fn alloc(
        &mut self,
        kind: AstKind,
        left: Option<AstId>,
        right: Option<AstId>,
        payload: Payload,
        loc: SrcLoc,
    ) -> AstId {
        let id = AstId(self.nodes.len() as u32);
        self.nodes.push(AstNode {
            kind,
            left,
            right,
            payload,
            loc,
        });
        id
    }

    pub fn kind(&self, id: AstId) -> AstKind {
        self[id].kind
    }

    pub fn left(&self, id: AstId) -> Option<AstId> {
        self[id].left
    }

    pub fn right(&self, id: AstId) -> Option<AstId> {
        self[id].right
    }

    pub fn set_left(&mut self, id: AstId, v: Option<AstId>) {
        self[id].left = v;
    }

    pub fn set_right(&mut self, id: AstId, v: Option<AstId>) {
        self[id].right = v;
    }

    /// Integer payload; zero for any other payload shape.
    pub fn int_val(&self, id: AstId) -> i64 {
        match self[id].payload {
            Payload::Int(v) => v,
            _ => 0,
        }
    }

    pub fn str_val(&self, id: AstId) -> Option<Rc<str>> {
        match &self[id].payload {
            Payload::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn sym_val(&self, id: AstId) -> Option<SymId> {
        match self[id].payload {
            Payload::Sym(s) => Some(s),
            _ => None,
        }
    }

    pub fn hwreg_val(&self, id: AstId) -> Option<HwRegId> {
        match self[id].payload {
            Payload::HwReg(h) => Some(h),
            _ => None,
        }
    }

    /// Operator code of an `Operator` / `Assign` node.
    pub fn op_of(&self, id: AstId) -> Op {
        Op::from_i64(self.int_val(id)).unwrap_or(Op::Unknown)
    }

    pub fn set_op(&mut self, id: AstId, op: Op) {
        self[id].payload = Payload::Int(op.to_i64().unwrap());
    }

    /// Overwrite a node in place with the contents of another one.
    /// The rewrites that restructure loops depend on this.
    pub fn overwrite(&mut self, dst: AstId, src: AstId) {
        let node = self[src].clone();
        self[dst] = node;
    }

    /// Turn a node into a no-op (an empty comment) in place.
    pub fn nullify(&mut self, id: AstId) {
        self[id] = AstNode {
            kind: AstKind::Comment,
            left: None,
            right: None,
            payload: Payload::None,
            loc: self[id].loc,
        };
    }

    /// The singleton type nodes, created once per compilation.
    pub fn make_std_types(&mut self) -> StdTypes {
        let loc = SrcLoc::none();
        let mut int_of = |arena: &mut AstArena, kind: AstKind, size: i64| {
            let sz = arena.alloc(AstKind::Integer, None, None, Payload::Int(size), loc);
            arena.alloc(kind, Some(sz), None, Payload::None, loc)
        };
        let long = int_of(self, AstKind::IntType, 4);
        let word = int_of(self, AstKind::IntType, 2);
        let byte = int_of(self, AstKind::IntType, 1);
        let ulong = int_of(self, AstKind::UnsignedType, 4);
        let uword = int_of(self, AstKind::UnsignedType, 2);
        let ubyte = int_of(self, AstKind::UnsignedType, 1);
        let int64 = int_of(self, AstKind::IntType, 8);
        let float = int_of(self, AstKind::FloatType, 4);
        let bool_ = int_of(self, AstKind::SignedBoolType, 4);
        let string = self.alloc(AstKind::PtrType, Some(ubyte), None, Payload::None, loc);
        let generic = self.alloc(AstKind::GenericType, None, None, Payload::None, loc);
        let void = self.alloc(AstKind::VoidType, None, None, Payload::None, loc);
        StdTypes {
            long,
            word,
            byte,
            ulong,
            uword,
            ubyte,
            int64,
            float,
            string,
            generic,
            void,
            bool_,
        }
    }
}

impl Ctx {
    /// Allocate a node. The source location comes from the report-as hint
    /// when one is active, otherwise from the current lex stream.
    pub fn new_ast(&mut self, kind: AstKind, left: Option<AstId>, right: Option<AstId>) -> AstId {
        let loc = self.current_loc();
        self.ast.alloc(kind, left, right, Payload::None, loc)
    }

    pub fn ast_int(&mut self, val: i64) -> AstId {
        let loc = self.current_loc();
        self.ast
            .alloc(AstKind::Integer, None, None, Payload::Int(val), loc)
    }

    /// An untyped bit pattern (hex/binary literal).
    pub fn ast_bitvalue(&mut self, val: i64) -> AstId {
        let loc = self.current_loc();
        self.ast
            .alloc(AstKind::BitValue, None, None, Payload::Int(val), loc)
    }

    pub fn ast_float(&mut self, f: f32) -> AstId {
        let loc = self.current_loc();
        let bits = f.to_bits() as i64;
        self.ast
            .alloc(AstKind::Float, None, None, Payload::Int(bits), loc)
    }

    pub fn ast_ident(&mut self, name: &str) -> AstId {
        let loc = self.current_loc();
        self.ast.alloc(
            AstKind::Identifier,
            None,
            None,
            Payload::Str(Rc::from(name)),
            loc,
        )
    }

    /// A plain string literal node.
    pub fn ast_plain_string(&mut self, s: &str) -> AstId {
        let loc = self.current_loc();
        self.ast
            .alloc(AstKind::String, None, None, Payload::Str(Rc::from(s)), loc)
    }

    /// A zero-terminated string literal wrapped for use as a pointer.
    pub fn ast_string(&mut self, s: &str) -> AstId {
        let lit = self.ast_plain_string(s);
        self.new_ast(AstKind::StringPtr, Some(lit), None)
    }

    pub fn ast_op(&mut self, op: Op, left: Option<AstId>, right: Option<AstId>) -> AstId {
        let id = self.new_ast(AstKind::Operator, left, right);
        self.ast.set_op(id, op);
        id
    }

    pub fn ast_op_assign(&mut self, op: Op, left: AstId, right: AstId) -> AstId {
        let id = self.new_ast(AstKind::Assign, Some(left), Some(right));
        self.ast.set_op(id, op);
        id
    }

    pub fn ast_assign(&mut self, left: AstId, right: AstId) -> AstId {
        self.ast_op_assign(Op::Assign, left, right)
    }

    /// Assignment whose RHS may be a one-element expression list.
    pub fn ast_assign_list(&mut self, dest: AstId, expr: AstId) -> AstId {
        let expr = if self.ast.kind(expr) == AstKind::ExprList && self.ast.right(expr).is_none() {
            self.ast.left(expr).unwrap_or(expr)
        } else {
            expr
        };
        self.ast_assign(dest, expr)
    }

    pub fn ast_declare_local(&mut self, left: Option<AstId>, right: Option<AstId>) -> AstId {
        self.new_ast(AstKind::DeclareVar, left, right)
    }

    /// Wrap a statement into a one-element statement list.
    pub fn ast_stmt(&mut self, stmt: AstId) -> AstId {
        self.new_ast(AstKind::StmtList, Some(stmt), None)
    }

    /// Attach a comment to a node when one is present.
    pub fn ast_commented(
        &mut self,
        kind: AstKind,
        left: Option<AstId>,
        right: Option<AstId>,
        comment: Option<AstId>,
    ) -> AstId {
        let node = self.new_ast(kind, left, right);
        match comment {
            Some(c) => self.new_ast(AstKind::CommentedNode, Some(node), Some(c)),
            None => node,
        }
    }

    /// A fresh identifier with a minted temporary name.
    pub fn temp_identifier(&mut self, prefix: &str) -> AstId {
        let name = self.new_temp_name(prefix, None);
        self.ast_ident(&name)
    }

    /// Temporary variable registered module-wide (long type).
    pub fn temp_variable(&mut self, prefix: &str) -> AstId {
        let ident = self.temp_identifier(prefix);
        let name = self.ast.str_val(ident).unwrap();
        if let Some(m) = self.cur_module {
            let objsyms = self.module(m).objsyms;
            let typ = self.types.long;
            let _ = self
                .syms
                .add(objsyms, &name, SymbolKind::TempVar, SymVal::Type(typ), None);
        }
        ident
    }

    /// Temporary variable local to the current function. `typ` of `None`
    /// means plain long.
    pub fn temp_local_variable(&mut self, prefix: &str, typ: Option<AstId>) -> AstId {
        let ident = self.temp_identifier(prefix);
        let name = self.ast.str_val(ident).unwrap();
        let typ = typ.unwrap_or(self.types.long);
        if let Some(f) = self.cur_func {
            let table = self.func(f).localsyms;
            let _ = self
                .syms
                .add(table, &name, SymbolKind::TempVar, SymVal::Type(typ), None);
        } else if let Some(m) = self.cur_module {
            let table = self.module(m).objsyms;
            let _ = self
                .syms
                .add(table, &name, SymbolKind::TempVar, SymVal::Type(typ), None);
        }
        ident
    }

    /// A lookup/lookdown expression: `base` is 0 or 1, `expr` the index,
    /// `table` the value list.
    pub fn ast_lookup(&mut self, kind: AstKind, base: i64, expr: AstId, table: AstId) -> AstId {
        let b = self.ast_int(base);
        let ev = self.new_ast(AstKind::LookExpr, Some(b), Some(expr));
        self.new_ast(kind, Some(ev), Some(table))
    }

    /// A dummy node that reports errors at a specific line.
    pub fn dummy_line_ast(&mut self, line: i64) -> AstId {
        let id = self.new_ast(AstKind::ErrHolder, None, None);
        self.ast[id].payload = Payload::Int(line);
        id
    }
}
