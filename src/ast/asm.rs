//! This module holds the operand types produced by the parser
//! and the instruction type produced by the assembler's first pass.
//!
//! An [`AsmInstr`] is a single real machine instruction
//! (pseudo-instructions have already been expanded), but it may still refer to labels
//! whose addresses are only known after the first pass.
//! These are resolved into [`SimInstr`]s with [`AsmInstr::into_sim_instr`].

use super::sim::{BranchCond, ImmOp, LoadOp, SimInstr, StoreOp, ZBranchCond};
use super::Reg;
use crate::asm::{EncodeErr, SymbolErr};
use crate::err::ErrorKind;

/// A reference to a label, optionally offset by a constant (e.g., `msg+4`).
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct LabelRef {
    /// The label's name.
    pub name: String,
    /// The constant offset added to the label's address.
    pub offset: i64,
}
impl LabelRef {
    /// Creates a reference to a label without an offset.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), offset: 0 }
    }
}
impl std::fmt::Display for LabelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        match self.offset {
            0 => Ok(()),
            n if n > 0 => write!(f, "+{n}"),
            n => write!(f, "{n}"),
        }
    }
}

/// An operand of an instruction or directive, as written in source.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Operand {
    /// A register (`$t0`).
    Reg(Reg),
    /// An integer (`5`, `0x10`, `'a'`).
    Imm(i64),
    /// A label reference (`loop`, `msg+4`).
    Label(LabelRef),
    /// Base-offset memory addressing (`4($sp)`, `($t0)`).
    Mem {
        /// The constant offset.
        offset: i64,
        /// The base register.
        base: Reg
    },
    /// A string literal (only valid for directives).
    Str(String),
}
impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Imm(n) => write!(f, "{n}"),
            Operand::Label(l) => write!(f, "{l}"),
            Operand::Mem { offset, base } => write!(f, "{offset}({base})"),
            Operand::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Which 16-bit part of a resolved 32-bit address an immediate field holds.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AddrPart {
    /// Upper half, for pairing with a zero-extended lower half (`lui` + `ori`).
    Hi,
    /// Lower half (zero-extended by `ori`).
    Lo,
    /// Upper half, adjusted for pairing with a sign-extended lower half (`lui` + `lw`).
    HiAdj,
}
impl AddrPart {
    /// Computes this part of an address.
    pub fn of(self, addr: u32) -> u16 {
        match self {
            AddrPart::Hi    => (addr >> 16) as u16,
            AddrPart::Lo    => addr as u16,
            AddrPart::HiAdj => (addr.wrapping_add(0x8000) >> 16) as u16,
        }
    }
}

/// The target of a jump.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum JumpTarget {
    /// Jump to a label.
    Label(LabelRef),
    /// Jump to an absolute address.
    Addr(u32),
}

/// A real machine instruction whose label operands may be unresolved.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum AsmInstr {
    /// An instruction with no label operands.
    Basic(SimInstr),
    /// `op rt, rs, part(label)` (e.g., the `ori` of a `la` expansion).
    AluImm(ImmOp, Reg, Reg, LabelRef, AddrPart),
    /// `lui rt, part(label)`.
    Lui(Reg, LabelRef, AddrPart),
    /// `op rt, lo(label)(base)`. The offset is the sign-extended lower half of the address.
    Load(LoadOp, Reg, Reg, LabelRef),
    /// `op rt, lo(label)(base)`. The offset is the sign-extended lower half of the address.
    Store(StoreOp, Reg, Reg, LabelRef),
    /// `beq`/`bne` to a label.
    Branch(BranchCond, Reg, Reg, LabelRef),
    /// Branch against zero to a label.
    ZBranch(ZBranchCond, Reg, LabelRef),
    /// `j`/`jal`.
    Jump {
        /// Whether `$ra` is set.
        link: bool,
        /// Where to jump.
        target: JumpTarget
    },
}

impl From<SimInstr> for AsmInstr {
    fn from(value: SimInstr) -> Self {
        AsmInstr::Basic(value)
    }
}

impl AsmInstr {
    /// Converts an ASM instruction into a simulator instruction ([`SimInstr`])
    /// by resolving label references.
    ///
    /// The `pc` parameter is the address of this instruction
    /// and the `lookup` parameter finds the address of a label.
    pub fn into_sim_instr(self, pc: u32, lookup: impl Fn(&str) -> Option<u32>) -> Result<SimInstr, ErrorKind> {
        let resolve = |label: &LabelRef| -> Result<u32, ErrorKind> {
            lookup(&label.name)
                .map(|addr| addr.wrapping_add(label.offset as u32))
                .ok_or_else(|| SymbolErr::Undefined(label.name.clone()).into())
        };
        let branch_offset = |label: &LabelRef| -> Result<i16, ErrorKind> {
            let target = resolve(label)?;
            let diff = i64::from(target) - i64::from(pc.wrapping_add(4));
            i16::try_from(diff >> 2)
                .ok()
                .filter(|_| diff & 0b11 == 0)
                .ok_or_else(|| EncodeErr::BranchOutOfRange(label.name.clone()).into())
        };

        match self {
            AsmInstr::Basic(instr) => Ok(instr),
            AsmInstr::AluImm(op, rt, rs, label, part) => Ok(SimInstr::AluImm(op, rt, rs, part.of(resolve(&label)?))),
            AsmInstr::Lui(rt, label, part) => Ok(SimInstr::Lui(rt, part.of(resolve(&label)?))),
            AsmInstr::Load(op, rt, base, label) => Ok(SimInstr::Load(op, rt, base, resolve(&label)? as i16)),
            AsmInstr::Store(op, rt, base, label) => Ok(SimInstr::Store(op, rt, base, resolve(&label)? as i16)),
            AsmInstr::Branch(cond, rs, rt, label) => Ok(SimInstr::Branch(cond, rs, rt, branch_offset(&label)?)),
            AsmInstr::ZBranch(cond, rs, label) => Ok(SimInstr::ZBranch(cond, rs, branch_offset(&label)?)),
            AsmInstr::Jump { link, target } => {
                let (addr, name) = match target {
                    JumpTarget::Label(label) => (resolve(&label)?, label.name),
                    JumpTarget::Addr(addr) => (addr, format!("{addr:#010x}")),
                };

                // Jumps can only reach targets in the same 256 MiB region as the delay slot.
                let region = pc.wrapping_add(4) & 0xF000_0000;
                if addr & 0xF000_0000 != region || addr & 0b11 != 0 {
                    return Err(EncodeErr::JumpOutOfRange(name).into());
                }
                Ok(SimInstr::Jump { link, index: (addr >> 2) & 0x03FF_FFFF })
            },
        }
    }
}
