//! Diagnostics.
//!
//! Errors are aggregated on counters rather than unwinding: a transform
//! reports the problem, leaves the tree in a consistent (if conservative)
//! state, and keeps going so later passes can surface further errors.
//! Callers consult [`crate::Ctx::errors`] at pass boundaries.

use std::rc::Rc;

use crate::ast::{AstId, AstKind};
use crate::Ctx;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DiagKind {
    SyntaxError,
    SymbolRedefinition,
    UnknownSymbol,
    TypeError,
    InternalError,
    Warning,
}

impl DiagKind {
    pub fn is_error(self) -> bool {
        self != DiagKind::Warning
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub message: String,
    /// `(filename, line number)` when the offending node had one.
    pub loc: Option<(Rc<str>, u32)>,
}

pub struct Diagnostics {
    pub list: Vec<Diagnostic>,
    pub errors: u32,
    pub warnings: u32,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics {
            list: Vec::new(),
            errors: 0,
            warnings: 0,
        }
    }
}

fn loc_of(ctx: &Ctx, ast: Option<AstId>) -> Option<(Rc<str>, u32)> {
    let ast = ast?;
    let loc = ctx.ast[ast].loc;
    let stream = loc.stream?;
    // error-holder nodes always refer to the current end of the file
    let idx = if ctx.ast[ast].kind == AstKind::ErrHolder {
        u32::max_value()
    } else {
        loc.line_idx
    };
    let info = ctx.streams[stream.index()].line_info(idx)?;
    Some((info.filename.clone(), info.line_no))
}

fn emit(ctx: &mut Ctx, kind: DiagKind, ast: Option<AstId>, message: String) {
    let loc = loc_of(ctx, ast);
    let tag = if kind == DiagKind::Warning {
        "warning"
    } else {
        "error"
    };
    match &loc {
        Some((file, line)) => eprintln!("{}: {}:{}: {}", tag, file, line, message),
        None => eprintln!("{}: {}", tag, message),
    }
    if kind.is_error() {
        ctx.diags.errors += 1;
    } else {
        ctx.diags.warnings += 1;
    }
    ctx.diags.list.push(Diagnostic {
        kind,
        message,
        loc,
    });
}

impl Ctx {
    pub fn diag(&mut self, kind: DiagKind, ast: Option<AstId>, message: &str) {
        emit(self, kind, ast, message.to_owned());
    }

    pub fn error(&mut self, ast: Option<AstId>, message: &str) {
        emit(self, DiagKind::TypeError, ast, message.to_owned());
    }

    pub fn warning(&mut self, ast: Option<AstId>, message: &str) {
        emit(self, DiagKind::Warning, ast, message.to_owned());
    }

    /// A broken internal invariant: report, keep compiling.
    pub fn internal_error(&mut self, ast: Option<AstId>, message: &str) {
        let msg = format!("Internal error: {}", message);
        emit(self, DiagKind::InternalError, ast, msg);
    }

    pub fn has_diag(&self, kind: DiagKind) -> bool {
        self.diags.list.iter().any(|d| d.kind == kind)
    }
}
