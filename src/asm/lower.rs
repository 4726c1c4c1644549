//! The instruction set description used by the assembler.
//!
//! [`lower`] converts a mnemonic and its operands into real machine instructions ([`AsmInstr`]s).
//! Basic forms map to exactly one instruction. Pseudo-instructions (and basic mnemonics used with
//! operands the real instruction can't hold, like an immediate that doesn't fit in 16 bits)
//! expand into several, using `$at` as scratch.
//!
//! ```
//! use mips_ensemble::asm::lower::lower;
//! use mips_ensemble::ast::asm::Operand;
//! use mips_ensemble::ast::Reg;
//!
//! let ops = [Operand::Reg(Reg::T0), Operand::Imm(0x10000)];
//! assert_eq!(lower("li", &ops, true).unwrap().len(), 2);
//! assert!(lower("li", &ops, false).is_err());
//! ```

use crate::asm::EncodeErr;
use crate::ast::asm::{AddrPart, AsmInstr, JumpTarget, LabelRef, Operand};
use crate::ast::sim::{AluOp, BranchCond, HiLo, ImmOp, LoadOp, MulDivOp, ShiftOp, SimInstr, StoreOp, ZBranchCond};
use crate::ast::{fits_i16, fits_u16, Reg};

/// The result of matching against basic instruction forms.
enum Basic {
    /// Matched a basic form.
    Match(AsmInstr),
    /// Matched a basic form, except an immediate did not fit.
    OutOfRange(i64),
    /// The mnemonic is a basic instruction, but the operands don't match any of its forms.
    Shape,
    /// Not a basic instruction.
    Unknown,
}

const PSEUDO_MNEMONICS: &[&str] = &[
    "li", "la", "move", "not", "neg", "subi", "subiu", "b", "beqz", "bnez",
    "blt", "bgt", "ble", "bge", "bltu", "bgtu", "bleu", "bgeu", "rem", "remu",
];

/// Converts an instruction into the machine instructions that implement it.
///
/// If `extended` is false, only basic forms are accepted.
/// Forms that are not basic then fail with [`EncodeErr::ExtendedNotAllowed`]
/// (or [`EncodeErr::ImmOutOfRange`] if the basic form only failed due to an immediate's size).
pub fn lower(mnemonic: &str, ops: &[Operand], extended: bool) -> Result<Vec<AsmInstr>, EncodeErr> {
    let mn = mnemonic.to_ascii_lowercase();
    let basic = match_basic(&mn, ops);
    if let Basic::Match(instr) = basic {
        return Ok(vec![instr]);
    }

    match (expand_pseudo(&mn, ops), basic) {
        (Some(instrs), _) if extended => Ok(instrs),
        (_, Basic::OutOfRange(value)) => Err(EncodeErr::ImmOutOfRange { mnemonic: mn, value }),
        (Some(_), _) => Err(EncodeErr::ExtendedNotAllowed { mnemonic: mn }),
        (None, Basic::Unknown) if !PSEUDO_MNEMONICS.contains(&mn.as_str()) => Err(EncodeErr::UnknownInstruction(mn)),
        (None, _) => Err(EncodeErr::InvalidOperands { mnemonic: mn }),
    }
}

fn alu_op(mn: &str) -> Option<AluOp> {
    [AluOp::Add, AluOp::Addu, AluOp::Sub, AluOp::Subu, AluOp::And, AluOp::Or, AluOp::Xor, AluOp::Nor, AluOp::Slt, AluOp::Sltu]
        .into_iter()
        .find(|op| op.mnemonic() == mn)
}
fn imm_op(mn: &str) -> Option<ImmOp> {
    [ImmOp::Addi, ImmOp::Addiu, ImmOp::Slti, ImmOp::Sltiu, ImmOp::Andi, ImmOp::Ori, ImmOp::Xori]
        .into_iter()
        .find(|op| op.mnemonic() == mn)
}
fn shift_op(mn: &str) -> Option<(ShiftOp, bool)> {
    [ShiftOp::Sll, ShiftOp::Srl, ShiftOp::Sra]
        .into_iter()
        .find_map(|op| match mn.strip_prefix(op.mnemonic()) {
            Some("") => Some((op, false)),
            Some("v") => Some((op, true)),
            _ => None,
        })
}
fn muldiv_op(mn: &str) -> Option<MulDivOp> {
    [MulDivOp::Mult, MulDivOp::Multu, MulDivOp::Div, MulDivOp::Divu]
        .into_iter()
        .find(|op| op.mnemonic() == mn)
}
fn load_op(mn: &str) -> Option<LoadOp> {
    [LoadOp::Lb, LoadOp::Lh, LoadOp::Lw, LoadOp::Lbu, LoadOp::Lhu]
        .into_iter()
        .find(|op| op.mnemonic() == mn)
}
fn store_op(mn: &str) -> Option<StoreOp> {
    [StoreOp::Sb, StoreOp::Sh, StoreOp::Sw]
        .into_iter()
        .find(|op| op.mnemonic() == mn)
}
fn zbranch_cond(mn: &str) -> Option<ZBranchCond> {
    match mn {
        "blez" => Some(ZBranchCond::Lez),
        "bgtz" => Some(ZBranchCond::Gtz),
        "bltz" => Some(ZBranchCond::Ltz),
        "bgez" => Some(ZBranchCond::Gez),
        _ => None,
    }
}
fn branch_cond(mn: &str) -> Option<BranchCond> {
    match mn {
        "beq" => Some(BranchCond::Eq),
        "bne" => Some(BranchCond::Ne),
        _ => None,
    }
}

/// The I-type counterpart of an R-type ALU operation.
fn imm_counterpart(op: AluOp) -> Option<ImmOp> {
    match op {
        AluOp::Add  => Some(ImmOp::Addi),
        AluOp::Addu => Some(ImmOp::Addiu),
        AluOp::Slt  => Some(ImmOp::Slti),
        AluOp::Sltu => Some(ImmOp::Sltiu),
        AluOp::And  => Some(ImmOp::Andi),
        AluOp::Or   => Some(ImmOp::Ori),
        AluOp::Xor  => Some(ImmOp::Xori),
        AluOp::Sub | AluOp::Subu | AluOp::Nor => None,
    }
}
/// The R-type counterpart of an I-type ALU operation.
fn reg_counterpart(op: ImmOp) -> AluOp {
    match op {
        ImmOp::Addi  => AluOp::Add,
        ImmOp::Addiu => AluOp::Addu,
        ImmOp::Slti  => AluOp::Slt,
        ImmOp::Sltiu => AluOp::Sltu,
        ImmOp::Andi  => AluOp::And,
        ImmOp::Ori   => AluOp::Or,
        ImmOp::Xori  => AluOp::Xor,
    }
}
fn imm_fits(op: ImmOp, value: i64) -> bool {
    match op.zero_extends() {
        true  => fits_u16(value),
        false => fits_i16(value),
    }
}

fn match_basic(mn: &str, ops: &[Operand]) -> Basic {
    use Operand as O;

    let basic = |instr: SimInstr| Basic::Match(AsmInstr::Basic(instr));

    if let Some(op) = alu_op(mn) {
        return match ops {
            &[O::Reg(rd), O::Reg(rs), O::Reg(rt)] => basic(SimInstr::Alu(op, rd, rs, rt)),
            _ => Basic::Shape,
        };
    }
    if let Some(op) = imm_op(mn) {
        return match ops {
            &[O::Reg(rt), O::Reg(rs), O::Imm(imm)] if imm_fits(op, imm) => basic(SimInstr::AluImm(op, rt, rs, imm as u16)),
            &[O::Reg(_), O::Reg(_), O::Imm(imm)] => Basic::OutOfRange(imm),
            _ => Basic::Shape,
        };
    }
    if let Some((op, variable)) = shift_op(mn) {
        return match (ops, variable) {
            (&[O::Reg(rd), O::Reg(rt), O::Imm(sh)], false) if (0..32).contains(&sh) => basic(SimInstr::Shift(op, rd, rt, sh as u8)),
            (&[O::Reg(_), O::Reg(_), O::Imm(sh)], false) => Basic::OutOfRange(sh),
            (&[O::Reg(rd), O::Reg(rt), O::Reg(rs)], true) => basic(SimInstr::ShiftV(op, rd, rt, rs)),
            _ => Basic::Shape,
        };
    }
    if let Some(op) = muldiv_op(mn) {
        return match ops {
            &[O::Reg(rs), O::Reg(rt)] => basic(SimInstr::MulDiv(op, rs, rt)),
            _ => Basic::Shape,
        };
    }
    if let Some(op) = load_op(mn) {
        return match ops {
            &[O::Reg(rt), O::Mem { offset, base }] if fits_i16(offset) => basic(SimInstr::Load(op, rt, base, offset as i16)),
            &[O::Reg(_), O::Mem { offset, .. }] => Basic::OutOfRange(offset),
            _ => Basic::Shape,
        };
    }
    if let Some(op) = store_op(mn) {
        return match ops {
            &[O::Reg(rt), O::Mem { offset, base }] if fits_i16(offset) => basic(SimInstr::Store(op, rt, base, offset as i16)),
            &[O::Reg(_), O::Mem { offset, .. }] => Basic::OutOfRange(offset),
            _ => Basic::Shape,
        };
    }
    if let Some(cond) = branch_cond(mn) {
        return match ops {
            [O::Reg(rs), O::Reg(rt), O::Label(l)] => Basic::Match(AsmInstr::Branch(cond, *rs, *rt, l.clone())),
            &[O::Reg(rs), O::Reg(rt), O::Imm(off)] if fits_i16(off) => basic(SimInstr::Branch(cond, rs, rt, off as i16)),
            &[O::Reg(_), O::Reg(_), O::Imm(off)] => Basic::OutOfRange(off),
            _ => Basic::Shape,
        };
    }
    if let Some(cond) = zbranch_cond(mn) {
        return match ops {
            [O::Reg(rs), O::Label(l)] => Basic::Match(AsmInstr::ZBranch(cond, *rs, l.clone())),
            &[O::Reg(rs), O::Imm(off)] if fits_i16(off) => basic(SimInstr::ZBranch(cond, rs, off as i16)),
            &[O::Reg(_), O::Imm(off)] => Basic::OutOfRange(off),
            _ => Basic::Shape,
        };
    }

    match (mn, ops) {
        ("mul", &[O::Reg(rd), O::Reg(rs), O::Reg(rt)]) => basic(SimInstr::Mul(rd, rs, rt)),
        ("mfhi", &[O::Reg(rd)]) => basic(SimInstr::MoveFrom(HiLo::Hi, rd)),
        ("mflo", &[O::Reg(rd)]) => basic(SimInstr::MoveFrom(HiLo::Lo, rd)),
        ("mthi", &[O::Reg(rs)]) => basic(SimInstr::MoveTo(HiLo::Hi, rs)),
        ("mtlo", &[O::Reg(rs)]) => basic(SimInstr::MoveTo(HiLo::Lo, rs)),
        ("lui", &[O::Reg(rt), O::Imm(imm)]) if (i64::from(i16::MIN)..=i64::from(u16::MAX)).contains(&imm) => basic(SimInstr::Lui(rt, imm as u16)),
        ("lui", &[O::Reg(_), O::Imm(imm)]) => Basic::OutOfRange(imm),
        ("jr", &[O::Reg(rs)]) => basic(SimInstr::Jr(rs)),
        ("jalr", &[O::Reg(rs)]) => basic(SimInstr::Jalr(Reg::RA, rs)),
        ("jalr", &[O::Reg(rd), O::Reg(rs)]) => basic(SimInstr::Jalr(rd, rs)),
        ("j" | "jal", [O::Label(l)]) => Basic::Match(AsmInstr::Jump { link: mn == "jal", target: JumpTarget::Label(l.clone()) }),
        ("j" | "jal", &[O::Imm(addr)]) if (0..=i64::from(u32::MAX)).contains(&addr) => Basic::Match(AsmInstr::Jump { link: mn == "jal", target: JumpTarget::Addr(addr as u32) }),
        ("syscall", []) => basic(SimInstr::Syscall),
        ("break", []) => basic(SimInstr::Break(0)),
        ("break", &[O::Imm(code)]) if (0..1 << 20).contains(&code) => basic(SimInstr::Break(code as u32)),
        ("nop", []) => basic(SimInstr::NOP),
        ("mul" | "mfhi" | "mflo" | "mthi" | "mtlo" | "lui" | "jr" | "jalr" | "j" | "jal" | "syscall" | "break" | "nop", _) => Basic::Shape,
        _ => Basic::Unknown,
    }
}

/// Loads a 32-bit constant into a register.
fn load_imm(rt: Reg, value: i64) -> Vec<AsmInstr> {
    let word = value as u32;
    let signed = i64::from(word as i32);

    if fits_i16(signed) {
        vec![SimInstr::AluImm(ImmOp::Addiu, rt, Reg::ZERO, signed as u16).into()]
    } else if fits_u16(i64::from(word)) {
        vec![SimInstr::AluImm(ImmOp::Ori, rt, Reg::ZERO, word as u16).into()]
    } else {
        vec![
            SimInstr::Lui(Reg::AT, (word >> 16) as u16).into(),
            SimInstr::AluImm(ImmOp::Ori, rt, Reg::AT, word as u16).into(),
        ]
    }
}
/// Loads the address of a label into a register.
fn load_addr(rt: Reg, label: &LabelRef) -> Vec<AsmInstr> {
    vec![
        AsmInstr::Lui(Reg::AT, label.clone(), AddrPart::Hi),
        AsmInstr::AluImm(ImmOp::Ori, rt, Reg::AT, label.clone(), AddrPart::Lo),
    ]
}
/// Gets the register holding the operand, loading an immediate into `$at` if needed.
fn reg_or_at(op: &Operand, out: &mut Vec<AsmInstr>) -> Option<Reg> {
    match *op {
        Operand::Reg(r) => Some(r),
        Operand::Imm(n) => {
            out.extend(load_imm(Reg::AT, n));
            Some(Reg::AT)
        },
        _ => None,
    }
}

fn expand_pseudo(mn: &str, ops: &[Operand]) -> Option<Vec<AsmInstr>> {
    use Operand as O;

    if let Some(op) = alu_op(mn) {
        // ALU op with an immediate: `add $t0, $t1, 100`
        let &[O::Reg(rd), O::Reg(rs), O::Imm(imm)] = ops else { return None };
        let imm_form = match op {
            AluOp::Sub  => Some((ImmOp::Addi, -imm)),
            AluOp::Subu => Some((ImmOp::Addiu, -imm)),
            op => imm_counterpart(op).map(|i| (i, imm)),
        };
        if let Some((iop, value)) = imm_form.filter(|&(iop, value)| imm_fits(iop, value)) {
            return Some(vec![SimInstr::AluImm(iop, rd, rs, value as u16).into()]);
        }
        let mut out = load_imm(Reg::AT, imm);
        out.push(SimInstr::Alu(op, rd, rs, Reg::AT).into());
        return Some(out);
    }
    if let Some(op) = imm_op(mn) {
        // immediate that doesn't fit in 16 bits
        let &[O::Reg(rt), O::Reg(rs), O::Imm(imm)] = ops else { return None };
        let mut out = load_imm(Reg::AT, imm);
        out.push(SimInstr::Alu(reg_counterpart(op), rt, rs, Reg::AT).into());
        return Some(out);
    }
    if let Some(op) = load_op(mn) {
        return mem_access(ops, |rt, base, off| AsmInstr::Basic(SimInstr::Load(op, rt, base, off)), |rt, label| AsmInstr::Load(op, rt, Reg::AT, label));
    }
    if let Some(op) = store_op(mn) {
        return mem_access(ops, |rt, base, off| AsmInstr::Basic(SimInstr::Store(op, rt, base, off)), |rt, label| AsmInstr::Store(op, rt, Reg::AT, label));
    }
    if let Some(cond) = branch_cond(mn) {
        // compare against an immediate: `beq $t0, 5, label`
        let [O::Reg(rs), O::Imm(imm), O::Label(l)] = ops else { return None };
        let mut out = load_imm(Reg::AT, *imm);
        out.push(AsmInstr::Branch(cond, *rs, Reg::AT, l.clone()));
        return Some(out);
    }

    let instrs = match (mn, ops) {
        ("li", &[O::Reg(rt), O::Imm(imm)]) => load_imm(rt, imm),
        ("la", [O::Reg(rt), O::Label(l)]) => load_addr(*rt, l),
        ("la", &[O::Reg(rt), O::Imm(addr)]) => load_imm(rt, addr),
        ("la", &[O::Reg(rt), O::Mem { offset, base }]) if fits_i16(offset) => vec![
            SimInstr::AluImm(ImmOp::Addiu, rt, base, offset as u16).into(),
        ],
        ("la", &[O::Reg(rt), O::Mem { offset, base }]) => {
            let mut out = load_imm(Reg::AT, offset);
            out.push(SimInstr::Alu(AluOp::Addu, rt, Reg::AT, base).into());
            out
        },
        ("move", &[O::Reg(rd), O::Reg(rs)]) => vec![SimInstr::Alu(AluOp::Addu, rd, Reg::ZERO, rs).into()],
        ("not", &[O::Reg(rd), O::Reg(rs)]) => vec![SimInstr::Alu(AluOp::Nor, rd, rs, Reg::ZERO).into()],
        ("neg", &[O::Reg(rd), O::Reg(rs)]) => vec![SimInstr::Alu(AluOp::Sub, rd, Reg::ZERO, rs).into()],
        ("subi" | "subiu", &[O::Reg(rt), O::Reg(rs), O::Imm(imm)]) => {
            let (iop, rop) = match mn {
                "subi" => (ImmOp::Addi, AluOp::Sub),
                _ => (ImmOp::Addiu, AluOp::Subu),
            };
            match fits_i16(-imm) {
                true => vec![SimInstr::AluImm(iop, rt, rs, (-imm) as u16).into()],
                false => {
                    let mut out = load_imm(Reg::AT, imm);
                    out.push(SimInstr::Alu(rop, rt, rs, Reg::AT).into());
                    out
                }
            }
        },
        ("mul", &[O::Reg(rd), O::Reg(rs), O::Imm(imm)]) => {
            let mut out = load_imm(Reg::AT, imm);
            out.push(SimInstr::Mul(rd, rs, Reg::AT).into());
            out
        },
        ("div" | "divu" | "rem" | "remu", [O::Reg(rd), O::Reg(rs), rt]) => {
            let op = match mn {
                "div" | "rem" => MulDivOp::Div,
                _ => MulDivOp::Divu,
            };
            let part = match mn {
                "div" | "divu" => HiLo::Lo,
                _ => HiLo::Hi,
            };
            let mut out = vec![];
            let rt = reg_or_at(rt, &mut out)?;
            out.push(SimInstr::MulDiv(op, *rs, rt).into());
            out.push(SimInstr::MoveFrom(part, *rd).into());
            out
        },
        ("b", [O::Label(l)]) => vec![AsmInstr::Branch(BranchCond::Eq, Reg::ZERO, Reg::ZERO, l.clone())],
        ("beqz", [O::Reg(rs), O::Label(l)]) => vec![AsmInstr::Branch(BranchCond::Eq, *rs, Reg::ZERO, l.clone())],
        ("bnez", [O::Reg(rs), O::Label(l)]) => vec![AsmInstr::Branch(BranchCond::Ne, *rs, Reg::ZERO, l.clone())],
        ("blt" | "bgt" | "ble" | "bge" | "bltu" | "bgtu" | "bleu" | "bgeu", [O::Reg(rs), rt, O::Label(l)]) => {
            let (cmp, unsigned) = match mn.strip_suffix('u') {
                Some(cmp) => (cmp, true),
                None => (mn, false),
            };
            let slt = match unsigned {
                true  => AluOp::Sltu,
                false => AluOp::Slt,
            };

            let mut out = vec![];
            let rt = reg_or_at(rt, &mut out)?;
            // blt: rs < rt,  bgt: rt < rs,  ble: !(rt < rs),  bge: !(rs < rt)
            let (a, b, cond) = match cmp {
                "blt" => (*rs, rt, BranchCond::Ne),
                "bgt" => (rt, *rs, BranchCond::Ne),
                "ble" => (rt, *rs, BranchCond::Eq),
                _     => (*rs, rt, BranchCond::Eq),
            };
            out.push(SimInstr::Alu(slt, Reg::AT, a, b).into());
            out.push(AsmInstr::Branch(cond, Reg::AT, Reg::ZERO, l.clone()));
            out
        },
        _ => return None,
    };
    Some(instrs)
}

/// Loads and stores that address a label, an absolute address, or an offset that doesn't fit in 16 bits.
fn mem_access(
    ops: &[Operand],
    basic: impl Fn(Reg, Reg, i16) -> AsmInstr,
    labeled: impl Fn(Reg, LabelRef) -> AsmInstr,
) -> Option<Vec<AsmInstr>> {
    use Operand as O;

    let instrs = match ops {
        [O::Reg(rt), O::Label(l)] => vec![
            AsmInstr::Lui(Reg::AT, l.clone(), AddrPart::HiAdj),
            labeled(*rt, l.clone()),
        ],
        &[O::Reg(rt), O::Imm(addr)] if fits_i16(addr) => vec![basic(rt, Reg::ZERO, addr as i16)],
        &[O::Reg(rt), O::Imm(addr)] => vec![
            SimInstr::Lui(Reg::AT, AddrPart::HiAdj.of(addr as u32)).into(),
            basic(rt, Reg::AT, AddrPart::Lo.of(addr as u32) as i16),
        ],
        &[O::Reg(rt), O::Mem { offset, base }] => vec![
            SimInstr::Lui(Reg::AT, AddrPart::HiAdj.of(offset as u32)).into(),
            SimInstr::Alu(AluOp::Addu, Reg::AT, Reg::AT, base).into(),
            basic(rt, Reg::AT, AddrPart::Lo.of(offset as u32) as i16),
        ],
        _ => return None,
    };
    Some(instrs)
}
