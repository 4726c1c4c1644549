//! Components relating to the abstract syntax trees (ASTs)
//! used in representing assembly instructions.
//!
//! These components together are used to construct...
//! - [`asm::AsmInstr`] (instructions after parsing and pseudo-instruction expansion, whose label operands may still be unresolved)
//! - [`sim::SimInstr`] (fully resolved instructions which can be encoded into machine words and executed)
//!
//! The key type of this module is [`Reg`], the general-purpose register operand.

pub mod asm;
pub mod sim;

use std::fmt::Write as _;

/// A general-purpose register in MIPS (`$0`-`$31`).
///
/// Registers can be created with [`Reg::new`] (by number),
/// [`Reg::from_name`] (by conventional or numeric name),
/// or through the named constants (e.g., [`Reg::T0`]).
///
/// ```
/// use mips_ensemble::ast::Reg;
///
/// assert_eq!(Reg::from_name("t0"), Some(Reg::T0));
/// assert_eq!(Reg::from_name("8"), Some(Reg::T0));
/// assert_eq!(Reg::T0.reg_no(), 8);
/// assert_eq!(Reg::T0.to_string(), "$t0");
/// ```
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy)]
pub struct Reg(u8);

const REG_NAMES: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3",
    "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7",
    "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7",
    "t8", "t9", "k0", "k1", "gp", "sp", "fp", "ra",
];

#[allow(missing_docs)]
impl Reg {
    pub const ZERO: Reg = Reg(0);
    pub const AT: Reg = Reg(1);
    pub const V0: Reg = Reg(2);
    pub const V1: Reg = Reg(3);
    pub const A0: Reg = Reg(4);
    pub const A1: Reg = Reg(5);
    pub const A2: Reg = Reg(6);
    pub const A3: Reg = Reg(7);
    pub const T0: Reg = Reg(8);
    pub const T1: Reg = Reg(9);
    pub const T2: Reg = Reg(10);
    pub const T3: Reg = Reg(11);
    pub const T4: Reg = Reg(12);
    pub const T5: Reg = Reg(13);
    pub const T6: Reg = Reg(14);
    pub const T7: Reg = Reg(15);
    pub const S0: Reg = Reg(16);
    pub const S1: Reg = Reg(17);
    pub const S2: Reg = Reg(18);
    pub const S3: Reg = Reg(19);
    pub const S4: Reg = Reg(20);
    pub const S5: Reg = Reg(21);
    pub const S6: Reg = Reg(22);
    pub const S7: Reg = Reg(23);
    pub const T8: Reg = Reg(24);
    pub const T9: Reg = Reg(25);
    pub const K0: Reg = Reg(26);
    pub const K1: Reg = Reg(27);
    pub const GP: Reg = Reg(28);
    pub const SP: Reg = Reg(29);
    pub const FP: Reg = Reg(30);
    pub const RA: Reg = Reg(31);
}
impl Reg {
    /// Creates a register from its number, if it is within `0..32`.
    pub fn new(n: u8) -> Option<Self> {
        (n < 32).then_some(Reg(n))
    }

    /// Creates a register from its 5-bit field in an encoded instruction.
    pub(crate) fn from_field(n: u32) -> Self {
        Reg((n & 0b11111) as u8)
    }

    /// Looks up a register by name (without the `$`).
    ///
    /// This accepts both numeric names (`"8"`) and
    /// conventional names (`"t0"`, `"sp"`, `"s8"`).
    pub fn from_name(name: &str) -> Option<Self> {
        if let Ok(n) = name.parse::<u8>() {
            return Reg::new(n);
        }
        if name == "s8" {
            return Some(Reg::FP);
        }

        REG_NAMES.iter()
            .position(|&r| r == name)
            .map(|n| Reg(n as u8))
    }

    /// Gets the register number.
    pub fn reg_no(self) -> u8 {
        self.0
    }

    /// The conventional name of this register (without the `$`).
    pub fn name(self) -> &'static str {
        REG_NAMES[usize::from(self.0)]
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_char('$')?;
        f.write_str(self.name())
    }
}
impl std::fmt::Debug for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

/// Checks whether a value fits in a signed 16-bit immediate.
pub(crate) fn fits_i16(n: i64) -> bool {
    (i64::from(i16::MIN)..=i64::from(i16::MAX)).contains(&n)
}
/// Checks whether a value fits in an unsigned 16-bit immediate.
pub(crate) fn fits_u16(n: i64) -> bool {
    (0..=i64::from(u16::MAX)).contains(&n)
}

#[cfg(test)]
mod tests {
    use super::{fits_i16, fits_u16, Reg};

    #[test]
    fn test_reg_names() {
        for n in 0..32 {
            let reg = Reg::new(n).unwrap();
            assert_eq!(Reg::from_name(reg.name()), Some(reg));
            assert_eq!(Reg::from_name(&n.to_string()), Some(reg));
        }

        assert_eq!(Reg::from_name("s8"), Some(Reg::FP));
        assert_eq!(Reg::from_name("32"), None);
        assert_eq!(Reg::from_name("x0"), None);
        assert_eq!(Reg::new(32), None);
    }

    #[test]
    fn test_imm_ranges() {
        assert!(fits_i16(-32768));
        assert!(fits_i16(32767));
        assert!(!fits_i16(32768));
        assert!(fits_u16(65535));
        assert!(!fits_u16(-1));
        assert!(!fits_u16(0x10000));
    }
}
