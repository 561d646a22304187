use std::ops::{Index, IndexMut};
use std::rc::Rc;

/// Width of a memory access.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MemWidth {
    Byte,
    Word,
    Long,
}

impl MemWidth {
    pub fn size(self) -> i32 {
        match self {
            MemWidth::Byte => 1,
            MemWidth::Word => 2,
            MemWidth::Long => 4,
        }
    }

    pub fn from_size(size: i32) -> Option<MemWidth> {
        match size {
            1 => Some(MemWidth::Byte),
            2 => Some(MemWidth::Word),
            4 => Some(MemWidth::Long),
            _ => None,
        }
    }

    /// Shift amount for scaling an index to this width.
    pub fn shift(self) -> i32 {
        match self {
            MemWidth::Byte => 0,
            MemWidth::Word => 1,
            MemWidth::Long => 2,
        }
    }
}

/// What an operand denotes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperandKind {
    /// Small immediate; fits the in-instruction literal slot.
    Imm,
    /// Large immediate; emitted as a labeled constant long and referenced
    /// by name.
    ImmNamed,
    /// Address immediate: a code label or function entry point.
    ImmLabel,
    /// Hardware register.
    HwReg,
    /// Module-level register.
    Reg,
    /// Function-local register.
    Local,
    /// Argument register.
    Arg,
    /// Memory reference through another operand, at a fixed byte offset
    /// carried in `val`.
    Mem { width: MemWidth, base: OpId },
    /// String literal destined for hub data.
    Str,
}

#[derive(Clone, Debug)]
pub struct Operand {
    pub kind: OperandKind,
    pub name: Rc<str>,
    pub val: i32,
    pub used: bool,
}

/// Handle to an operand in an [`OpSpace`].
///
/// Register operands are interned, so two mentions of the same register
/// compare equal by id; the optimizer depends on that.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OpId(u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw id, for the places that must park an operand handle inside an
    /// integer field (immediate pointers).
    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> OpId {
        OpId(raw)
    }
}

/// Arena of operands plus the interning lists for module-level registers
/// and hub data.
pub struct OpSpace {
    ops: Vec<Operand>,
    reg_globals: Vec<OpId>,
    hub_globals: Vec<OpId>,
    next_label: u32,
}

impl Index<OpId> for OpSpace {
    type Output = Operand;
    fn index(&self, id: OpId) -> &Operand {
        &self.ops[id.0 as usize]
    }
}

impl IndexMut<OpId> for OpSpace {
    fn index_mut(&mut self, id: OpId) -> &mut Operand {
        &mut self.ops[id.0 as usize]
    }
}

impl OpSpace {
    pub fn new() -> OpSpace {
        OpSpace {
            ops: Vec::new(),
            reg_globals: Vec::new(),
            hub_globals: Vec::new(),
            next_label: 1,
        }
    }

    pub fn new_operand(&mut self, kind: OperandKind, name: &str, val: i32) -> OpId {
        let id = OpId(self.ops.len() as u32);
        // address immediates are always considered live
        let used = kind == OperandKind::ImmLabel;
        self.ops.push(Operand {
            kind,
            name: Rc::from(name),
            val,
            used,
        });
        id
    }

    /// An immediate operand. Values that fit the in-instruction literal
    /// slot stay anonymous; anything else becomes a named global constant.
    pub fn new_imm(&mut self, val: i32) -> OpId {
        if val >= 0 && val < 512 {
            return self.new_operand(OperandKind::Imm, "", val);
        }
        let name = format!("imm_{}_", val as u32);
        self.get_global(OperandKind::ImmNamed, &name, val)
    }

    /// A labeled long holding the address of `target`.
    pub fn new_imm_ptr(&mut self, target: OpId) -> OpId {
        let name = format!("ptr_{}_", self[target].name);
        self.get_global(OperandKind::ImmLabel, &name, target.0 as i32)
    }

    /// Mint a fresh temporary code label (`L_NNN_`).
    pub fn new_label(&mut self) -> OpId {
        let name = format!("L_{:03}_", self.next_label);
        self.next_label += 1;
        let id = self.new_operand(OperandKind::ImmLabel, &name, 0);
        self[id].used = false;
        id
    }

    fn get_var(&mut self, hub: bool, kind: OperandKind, name: &str, val: i32) -> OpId {
        let list = if hub {
            &self.hub_globals
        } else {
            &self.reg_globals
        };
        for &id in list {
            if &*self.ops[id.0 as usize].name == name {
                return id;
            }
        }
        let id = self.new_operand(kind, name, val);
        if hub {
            self.hub_globals.push(id);
        } else {
            self.reg_globals.push(id);
        }
        id
    }

    /// Intern a register-memory global by name.
    pub fn get_global(&mut self, kind: OperandKind, name: &str, val: i32) -> OpId {
        self.get_var(false, kind, name, val)
    }

    /// Intern a hub-memory global by name.
    pub fn get_hub(&mut self, kind: OperandKind, name: &str, val: i32) -> OpId {
        self.get_var(true, kind, name, val)
    }

    pub fn reg_globals(&self) -> &[OpId] {
        &self.reg_globals
    }

    pub fn hub_globals(&self) -> &[OpId] {
        &self.hub_globals
    }

    pub fn is_immediate(&self, id: OpId) -> bool {
        match self[id].kind {
            OperandKind::Imm | OperandKind::ImmNamed => true,
            _ => false,
        }
    }

    pub fn is_mem_ref(&self, id: OpId) -> bool {
        match self[id].kind {
            OperandKind::Mem { .. } => true,
            _ => false,
        }
    }

    pub fn is_local_or_arg(&self, id: OpId) -> bool {
        match self[id].kind {
            OperandKind::Local | OperandKind::Arg => true,
            _ => false,
        }
    }

    /// Labels minted by [`OpSpace::new_label`] follow the `L_NNN_` pattern;
    /// unreferenced ones may be deleted outright.
    pub fn is_temp_label(&self, id: OpId) -> bool {
        let name = &self[id].name;
        let bytes = name.as_bytes();
        bytes.len() > 3
            && bytes[0] == b'L'
            && bytes[1] == b'_'
            && bytes[2].is_ascii_digit()
            && bytes[bytes.len() - 1] == b'_'
    }
}
