//! This module holds the resolved instruction type used by the assembler's second pass
//! and the simulator.
//!
//! A [`SimInstr`] has every operand fully resolved (labels replaced by offsets or addresses),
//! so it can be encoded into a machine word with [`SimInstr::encode`]
//! and recovered from a machine word with [`SimInstr::decode`].
use std::fmt::Write as _;

use super::Reg;
use crate::sim::SimErr;

const OP_SPECIAL: u32  = 0x00;
const OP_REGIMM: u32   = 0x01;
const OP_J: u32        = 0x02;
const OP_JAL: u32      = 0x03;
const OP_BEQ: u32      = 0x04;
const OP_BNE: u32      = 0x05;
const OP_BLEZ: u32     = 0x06;
const OP_BGTZ: u32     = 0x07;
const OP_LUI: u32      = 0x0F;
const OP_SPECIAL2: u32 = 0x1C;

const FN_JR: u32      = 0x08;
const FN_JALR: u32    = 0x09;
const FN_SYSCALL: u32 = 0x0C;
const FN_BREAK: u32   = 0x0D;
const FN_MFHI: u32    = 0x10;
const FN_MTHI: u32    = 0x11;
const FN_MFLO: u32    = 0x12;
const FN_MTLO: u32    = 0x13;
const FN2_MUL: u32    = 0x02;

const RT_BLTZ: u32 = 0x00;
const RT_BGEZ: u32 = 0x01;

macro_rules! op_enum {
    ($(#[$m:meta])* $Name:ident { $($Variant:ident = $code:literal => $mn:literal),+ $(,)? }) => {
        $(#[$m])*
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
        pub enum $Name {
            $(
                #[allow(missing_docs)]
                $Variant
            ),+
        }
        impl $Name {
            /// The function or opcode field that identifies this operation.
            pub fn code(self) -> u32 {
                match self {
                    $(Self::$Variant => $code),+
                }
            }
            /// Finds the operation identified by this function or opcode field.
            pub fn from_code(code: u32) -> Option<Self> {
                match code {
                    $($code => Some(Self::$Variant),)+
                    _ => None
                }
            }
            /// The assembly mnemonic for this operation.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$Variant => $mn),+
                }
            }
        }
    }
}

op_enum! {
    /// Three-register ALU operations (`rd = rs op rt`), keyed by function field.
    AluOp {
        Add  = 0x20 => "add",
        Addu = 0x21 => "addu",
        Sub  = 0x22 => "sub",
        Subu = 0x23 => "subu",
        And  = 0x24 => "and",
        Or   = 0x25 => "or",
        Xor  = 0x26 => "xor",
        Nor  = 0x27 => "nor",
        Slt  = 0x2A => "slt",
        Sltu = 0x2B => "sltu",
    }
}
op_enum! {
    /// Shift operations by a constant amount, keyed by function field.
    ///
    /// The variable forms (`sllv`, etc.) have function field `code() | 0b100`.
    ShiftOp {
        Sll = 0x00 => "sll",
        Srl = 0x02 => "srl",
        Sra = 0x03 => "sra",
    }
}
op_enum! {
    /// Multiply and divide operations writing `hi`/`lo`, keyed by function field.
    MulDivOp {
        Mult  = 0x18 => "mult",
        Multu = 0x19 => "multu",
        Div   = 0x1A => "div",
        Divu  = 0x1B => "divu",
    }
}
op_enum! {
    /// ALU operations with a 16-bit immediate (`rt = rs op imm`), keyed by opcode.
    ImmOp {
        Addi  = 0x08 => "addi",
        Addiu = 0x09 => "addiu",
        Slti  = 0x0A => "slti",
        Sltiu = 0x0B => "sltiu",
        Andi  = 0x0C => "andi",
        Ori   = 0x0D => "ori",
        Xori  = 0x0E => "xori",
    }
}
op_enum! {
    /// Memory loads, keyed by opcode.
    LoadOp {
        Lb  = 0x20 => "lb",
        Lh  = 0x21 => "lh",
        Lw  = 0x23 => "lw",
        Lbu = 0x24 => "lbu",
        Lhu = 0x25 => "lhu",
    }
}
op_enum! {
    /// Memory stores, keyed by opcode.
    StoreOp {
        Sb = 0x28 => "sb",
        Sh = 0x29 => "sh",
        Sw = 0x2B => "sw",
    }
}

impl ImmOp {
    /// Whether the immediate of this operation is zero-extended (as opposed to sign-extended).
    pub fn zero_extends(self) -> bool {
        matches!(self, ImmOp::Andi | ImmOp::Ori | ImmOp::Xori)
    }
}
impl LoadOp {
    /// The number of bytes accessed.
    pub fn width(self) -> u32 {
        match self {
            LoadOp::Lb | LoadOp::Lbu => 1,
            LoadOp::Lh | LoadOp::Lhu => 2,
            LoadOp::Lw => 4,
        }
    }
}
impl StoreOp {
    /// The number of bytes accessed.
    pub fn width(self) -> u32 {
        match self {
            StoreOp::Sb => 1,
            StoreOp::Sh => 2,
            StoreOp::Sw => 4,
        }
    }
}

/// Conditions for two-register branches.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum BranchCond {
    /// Branch if `rs == rt` (`beq`).
    Eq,
    /// Branch if `rs != rt` (`bne`).
    Ne,
}
/// Conditions for branches comparing a register against zero.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ZBranchCond {
    /// `blez`
    Lez,
    /// `bgtz`
    Gtz,
    /// `bltz`
    Ltz,
    /// `bgez`
    Gez,
}
impl ZBranchCond {
    /// Checks the condition against a register value.
    pub fn check(self, value: u32) -> bool {
        let value = value as i32;
        match self {
            ZBranchCond::Lez => value <= 0,
            ZBranchCond::Gtz => value > 0,
            ZBranchCond::Ltz => value < 0,
            ZBranchCond::Gez => value >= 0,
        }
    }
    fn mnemonic(self) -> &'static str {
        match self {
            ZBranchCond::Lez => "blez",
            ZBranchCond::Gtz => "bgtz",
            ZBranchCond::Ltz => "bltz",
            ZBranchCond::Gez => "bgez",
        }
    }
}
/// The special registers accessed by `mfhi`, `mflo`, `mthi`, `mtlo`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum HiLo {
    #[allow(missing_docs)]
    Hi,
    #[allow(missing_docs)]
    Lo,
}

/// A fully resolved MIPS instruction.
///
/// Register operands are listed in assembly order
/// (e.g., `Alu(op, rd, rs, rt)` is `op rd, rs, rt`).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SimInstr {
    /// `add rd, rs, rt` and friends.
    Alu(AluOp, Reg, Reg, Reg),
    /// `sll rd, rt, shamt` and friends.
    Shift(ShiftOp, Reg, Reg, u8),
    /// `sllv rd, rt, rs` and friends.
    ShiftV(ShiftOp, Reg, Reg, Reg),
    /// `mult rs, rt` and friends.
    MulDiv(MulDivOp, Reg, Reg),
    /// `mul rd, rs, rt` (low 32 bits of the product).
    Mul(Reg, Reg, Reg),
    /// `mfhi rd` / `mflo rd`.
    MoveFrom(HiLo, Reg),
    /// `mthi rs` / `mtlo rs`.
    MoveTo(HiLo, Reg),
    /// `jr rs`.
    Jr(Reg),
    /// `jalr rd, rs`.
    Jalr(Reg, Reg),
    /// `syscall`.
    Syscall,
    /// `break code`.
    Break(u32),
    /// `addi rt, rs, imm` and friends. The immediate is stored as its raw 16 bits.
    AluImm(ImmOp, Reg, Reg, u16),
    /// `lui rt, imm`.
    Lui(Reg, u16),
    /// `lw rt, offset(base)` and friends.
    Load(LoadOp, Reg, Reg, i16),
    /// `sw rt, offset(base)` and friends.
    Store(StoreOp, Reg, Reg, i16),
    /// `beq rs, rt, offset` / `bne rs, rt, offset`. The offset is in words, relative to the next instruction.
    Branch(BranchCond, Reg, Reg, i16),
    /// `bgez rs, offset` and friends. The offset is in words, relative to the next instruction.
    ZBranch(ZBranchCond, Reg, i16),
    /// `j index` (`link == false`) or `jal index` (`link == true`).
    /// The index is the 26-bit word index within the current 256 MiB region.
    Jump {
        /// Whether `$ra` is set.
        link: bool,
        /// 26-bit target index.
        index: u32
    },
}

fn r_type(rs: Reg, rt: Reg, rd: Reg, shamt: u32, funct: u32) -> u32 {
    (u32::from(rs.reg_no()) << 21)
        | (u32::from(rt.reg_no()) << 16)
        | (u32::from(rd.reg_no()) << 11)
        | ((shamt & 0b11111) << 6)
        | funct
}
fn i_type(op: u32, rs: Reg, rt: Reg, imm: u16) -> u32 {
    (op << 26)
        | (u32::from(rs.reg_no()) << 21)
        | (u32::from(rt.reg_no()) << 16)
        | u32::from(imm)
}
fn get_bits(n: u32, r: std::ops::Range<u32>) -> u32 {
    let len = r.end - r.start;
    (n >> r.start) & ((1u32 << len) - 1)
}

impl SimInstr {
    /// The no-op instruction (`sll $zero, $zero, 0`).
    pub const NOP: SimInstr = SimInstr::Shift(ShiftOp::Sll, Reg::ZERO, Reg::ZERO, 0);

    /// Encodes this instruction as a machine word.
    pub fn encode(&self) -> u32 {
        use Reg as R;

        match *self {
            SimInstr::Alu(op, rd, rs, rt)      => r_type(rs, rt, rd, 0, op.code()),
            SimInstr::Shift(op, rd, rt, sh)    => r_type(R::ZERO, rt, rd, u32::from(sh), op.code()),
            SimInstr::ShiftV(op, rd, rt, rs)   => r_type(rs, rt, rd, 0, op.code() | 0b100),
            SimInstr::MulDiv(op, rs, rt)       => r_type(rs, rt, R::ZERO, 0, op.code()),
            SimInstr::Mul(rd, rs, rt)          => (OP_SPECIAL2 << 26) | r_type(rs, rt, rd, 0, FN2_MUL),
            SimInstr::MoveFrom(HiLo::Hi, rd)   => r_type(R::ZERO, R::ZERO, rd, 0, FN_MFHI),
            SimInstr::MoveFrom(HiLo::Lo, rd)   => r_type(R::ZERO, R::ZERO, rd, 0, FN_MFLO),
            SimInstr::MoveTo(HiLo::Hi, rs)     => r_type(rs, R::ZERO, R::ZERO, 0, FN_MTHI),
            SimInstr::MoveTo(HiLo::Lo, rs)     => r_type(rs, R::ZERO, R::ZERO, 0, FN_MTLO),
            SimInstr::Jr(rs)                   => r_type(rs, R::ZERO, R::ZERO, 0, FN_JR),
            SimInstr::Jalr(rd, rs)             => r_type(rs, R::ZERO, rd, 0, FN_JALR),
            SimInstr::Syscall                  => FN_SYSCALL,
            SimInstr::Break(code)              => ((code & 0xF_FFFF) << 6) | FN_BREAK,
            SimInstr::AluImm(op, rt, rs, imm)  => i_type(op.code(), rs, rt, imm),
            SimInstr::Lui(rt, imm)             => i_type(OP_LUI, R::ZERO, rt, imm),
            SimInstr::Load(op, rt, base, off)  => i_type(op.code(), base, rt, off as u16),
            SimInstr::Store(op, rt, base, off) => i_type(op.code(), base, rt, off as u16),
            SimInstr::Branch(BranchCond::Eq, rs, rt, off) => i_type(OP_BEQ, rs, rt, off as u16),
            SimInstr::Branch(BranchCond::Ne, rs, rt, off) => i_type(OP_BNE, rs, rt, off as u16),
            SimInstr::ZBranch(cond, rs, off)   => match cond {
                ZBranchCond::Lez => i_type(OP_BLEZ, rs, R::ZERO, off as u16),
                ZBranchCond::Gtz => i_type(OP_BGTZ, rs, R::ZERO, off as u16),
                ZBranchCond::Ltz => i_type(OP_REGIMM, rs, R::from_field(RT_BLTZ), off as u16),
                ZBranchCond::Gez => i_type(OP_REGIMM, rs, R::from_field(RT_BGEZ), off as u16),
            },
            SimInstr::Jump { link, index } => {
                let op = match link {
                    true  => OP_JAL,
                    false => OP_J,
                };
                (op << 26) | (index & 0x03FF_FFFF)
            },
        }
    }

    /// Decodes a machine word into an instruction.
    ///
    /// This fails with [`SimErr::IllegalInstruction`] if the word does not correspond
    /// to a supported instruction.
    pub fn decode(word: u32) -> Result<Self, SimErr> {
        let op = get_bits(word, 26..32);
        let rs = Reg::from_field(get_bits(word, 21..26));
        let rt = Reg::from_field(get_bits(word, 16..21));
        let rd = Reg::from_field(get_bits(word, 11..16));
        let shamt = get_bits(word, 6..11) as u8;
        let funct = get_bits(word, 0..6);
        let imm = get_bits(word, 0..16) as u16;
        let illegal = SimErr::IllegalInstruction(word);

        let instr = match op {
            OP_SPECIAL => match funct {
                FN_JR      => SimInstr::Jr(rs),
                FN_JALR    => SimInstr::Jalr(rd, rs),
                FN_SYSCALL => SimInstr::Syscall,
                FN_BREAK   => SimInstr::Break(get_bits(word, 6..26)),
                FN_MFHI    => SimInstr::MoveFrom(HiLo::Hi, rd),
                FN_MFLO    => SimInstr::MoveFrom(HiLo::Lo, rd),
                FN_MTHI    => SimInstr::MoveTo(HiLo::Hi, rs),
                FN_MTLO    => SimInstr::MoveTo(HiLo::Lo, rs),
                f => if let Some(op) = ShiftOp::from_code(f) {
                    SimInstr::Shift(op, rd, rt, shamt)
                } else if let Some(op) = ShiftOp::from_code(f & !0b100).filter(|_| f & 0b100 != 0) {
                    SimInstr::ShiftV(op, rd, rt, rs)
                } else if let Some(op) = MulDivOp::from_code(f) {
                    SimInstr::MulDiv(op, rs, rt)
                } else if let Some(op) = AluOp::from_code(f) {
                    SimInstr::Alu(op, rd, rs, rt)
                } else {
                    return Err(illegal);
                }
            },
            OP_SPECIAL2 if funct == FN2_MUL => SimInstr::Mul(rd, rs, rt),
            OP_REGIMM => match rt.reg_no() as u32 {
                RT_BLTZ => SimInstr::ZBranch(ZBranchCond::Ltz, rs, imm as i16),
                RT_BGEZ => SimInstr::ZBranch(ZBranchCond::Gez, rs, imm as i16),
                _ => return Err(illegal),
            },
            OP_J    => SimInstr::Jump { link: false, index: get_bits(word, 0..26) },
            OP_JAL  => SimInstr::Jump { link: true, index: get_bits(word, 0..26) },
            OP_BEQ  => SimInstr::Branch(BranchCond::Eq, rs, rt, imm as i16),
            OP_BNE  => SimInstr::Branch(BranchCond::Ne, rs, rt, imm as i16),
            OP_BLEZ => SimInstr::ZBranch(ZBranchCond::Lez, rs, imm as i16),
            OP_BGTZ => SimInstr::ZBranch(ZBranchCond::Gtz, rs, imm as i16),
            OP_LUI  => SimInstr::Lui(rt, imm),
            o => if let Some(op) = ImmOp::from_code(o) {
                SimInstr::AluImm(op, rt, rs, imm)
            } else if let Some(op) = LoadOp::from_code(o) {
                SimInstr::Load(op, rt, rs, imm as i16)
            } else if let Some(op) = StoreOp::from_code(o) {
                SimInstr::Store(op, rt, rs, imm as i16)
            } else {
                return Err(illegal);
            }
        };

        Ok(instr)
    }
}
impl std::fmt::Display for SimInstr {
    /// Displays the instruction in basic assembly form (e.g., `addi $t0, $zero, 5`).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SimInstr::Shift(ShiftOp::Sll, Reg::ZERO, Reg::ZERO, 0) => f.write_str("nop"),
            SimInstr::Alu(op, rd, rs, rt)      => write!(f, "{} {rd}, {rs}, {rt}", op.mnemonic()),
            SimInstr::Shift(op, rd, rt, sh)    => write!(f, "{} {rd}, {rt}, {sh}", op.mnemonic()),
            SimInstr::ShiftV(op, rd, rt, rs)   => write!(f, "{}v {rd}, {rt}, {rs}", op.mnemonic()),
            SimInstr::MulDiv(op, rs, rt)       => write!(f, "{} {rs}, {rt}", op.mnemonic()),
            SimInstr::Mul(rd, rs, rt)          => write!(f, "mul {rd}, {rs}, {rt}"),
            SimInstr::MoveFrom(HiLo::Hi, rd)   => write!(f, "mfhi {rd}"),
            SimInstr::MoveFrom(HiLo::Lo, rd)   => write!(f, "mflo {rd}"),
            SimInstr::MoveTo(HiLo::Hi, rs)     => write!(f, "mthi {rs}"),
            SimInstr::MoveTo(HiLo::Lo, rs)     => write!(f, "mtlo {rs}"),
            SimInstr::Jr(rs)                   => write!(f, "jr {rs}"),
            SimInstr::Jalr(rd, rs)             => write!(f, "jalr {rd}, {rs}"),
            SimInstr::Syscall                  => f.write_str("syscall"),
            SimInstr::Break(0)                 => f.write_str("break"),
            SimInstr::Break(code)              => write!(f, "break {code}"),
            SimInstr::AluImm(op, rt, rs, imm)  => match op.zero_extends() {
                true  => write!(f, "{} {rt}, {rs}, 0x{imm:04x}", op.mnemonic()),
                false => write!(f, "{} {rt}, {rs}, {}", op.mnemonic(), imm as i16),
            },
            SimInstr::Lui(rt, imm)             => write!(f, "lui {rt}, 0x{imm:04x}"),
            SimInstr::Load(op, rt, base, off)  => write!(f, "{} {rt}, {off}({base})", op.mnemonic()),
            SimInstr::Store(op, rt, base, off) => write!(f, "{} {rt}, {off}({base})", op.mnemonic()),
            SimInstr::Branch(cond, rs, rt, off) => {
                let mn = match cond {
                    BranchCond::Eq => "beq",
                    BranchCond::Ne => "bne",
                };
                write!(f, "{mn} {rs}, {rt}, {off}")
            },
            SimInstr::ZBranch(cond, rs, off)   => write!(f, "{} {rs}, {off}", cond.mnemonic()),
            SimInstr::Jump { link, index } => {
                f.write_str(if link { "jal" } else { "j" })?;
                f.write_char(' ')?;
                write!(f, "0x{:08x}", index << 2)
            },
        }
    }
}
