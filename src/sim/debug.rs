//! Breakpoints.
//!
//! A [`Breakpoint`] in [`Simulator::breakpoints`] pauses a free run
//! ([`Simulator::simulate`], [`Simulator::start_simulation`]) when it matches.
//! Single steps ignore breakpoints.
//!
//! Breakpoints are checked after every executed instruction, once the PC has been updated.
//! A PC breakpoint therefore pauses a run right before the instruction at that address executes.
//! The first instruction of a run is always executed, so resuming from a breakpoint makes progress.
//!
//! [`Simulator::breakpoints`]: super::Simulator::breakpoints
//! [`Simulator::simulate`]: super::Simulator::simulate
//! [`Simulator::start_simulation`]: super::Simulator::start_simulation

use crate::asm::AssembledProgram;
use crate::ast::Reg;

use super::mem::RegLoc;
use super::Simulator;

/// A condition to pause a run on.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Breakpoint {
    /// Break before the instruction at this address executes.
    PC(u32),
    /// Break when a register (`hi` and `lo` included) matches.
    Reg {
        /// The register.
        reg: RegLoc,
        /// The condition on its value.
        value: Comparator
    },
    /// Break when a memory word matches.
    ///
    /// Words the program has never touched do not match.
    Mem {
        /// The address (rounded down to a word boundary).
        addr: u32,
        /// The condition on the word.
        value: Comparator
    },
}
impl Breakpoint where Breakpoint: Send + Sync { /* assert Breakpoint is send/sync */ }

impl Breakpoint {
    /// A breakpoint on a general-purpose register.
    pub fn reg(reg: Reg, value: Comparator) -> Self {
        Breakpoint::Reg { reg: RegLoc::Gpr(reg), value }
    }

    /// A PC breakpoint on a label, looked up the way `filename`'s code would see it
    /// (its own labels first, then globals).
    ///
    /// ```
    /// use mips_ensemble::asm::{assemble, AsmFlags};
    /// use mips_ensemble::program::Program;
    /// use mips_ensemble::sim::debug::Breakpoint;
    ///
    /// let mut programs = [Program::from_source("main.s", "nop\nloop: j loop")];
    /// let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
    ///
    /// assert_eq!(Breakpoint::at_label(&asm, "loop", "main.s"), Some(Breakpoint::PC(0x0040_0004)));
    /// assert_eq!(Breakpoint::at_label(&asm, "nowhere", "main.s"), None);
    /// ```
    pub fn at_label(program: &AssembledProgram, label: &str, filename: &str) -> Option<Self> {
        program.lookup_symbol(label, filename).map(Breakpoint::PC)
    }

    /// Whether the simulator's current state matches.
    pub fn check(&self, sim: &Simulator) -> bool {
        match *self {
            Breakpoint::PC(addr) => sim.pc == addr,
            Breakpoint::Reg { reg, value } => value.check(sim.reg_file[reg]),
            Breakpoint::Mem { addr, value } => sim.mem.peek_word(addr & !0b11).is_some_and(|w| value.check(w)),
        }
    }
}
impl std::fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Breakpoint::PC(addr) => write!(f, "pc == {addr:#010x}"),
            Breakpoint::Reg { reg, value } => write!(f, "{reg} {value}"),
            Breakpoint::Mem { addr, value } => write!(f, "[{addr:#010x}] {value}"),
        }
    }
}

/// A condition on a 32-bit value.
///
/// The plain orderings compare the value as unsigned;
/// the `S` orderings reinterpret both sides as signed.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Comparator {
    /// Never matches.
    Never,
    /// The value equals this.
    Eq(u32),
    /// The value differs from this.
    Ne(u32),
    /// The value is below this.
    Lt(u32),
    /// The value is at most this.
    Le(u32),
    /// The value is above this.
    Gt(u32),
    /// The value is at least this.
    Ge(u32),
    /// The value, as signed, is below this.
    SLt(i32),
    /// The value, as signed, is above this.
    SGt(i32),
    /// Always matches.
    Always
}
impl Comparator {
    /// Whether the value meets the condition.
    pub fn check(&self, value: u32) -> bool {
        let signed = value as i32;
        match *self {
            Comparator::Never  => false,
            Comparator::Eq(r)  => value == r,
            Comparator::Ne(r)  => value != r,
            Comparator::Lt(r)  => value < r,
            Comparator::Le(r)  => value <= r,
            Comparator::Gt(r)  => value > r,
            Comparator::Ge(r)  => value >= r,
            Comparator::SLt(r) => signed < r,
            Comparator::SGt(r) => signed > r,
            Comparator::Always => true,
        }
    }
}
impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Comparator::Never  => f.write_str("never"),
            Comparator::Eq(r)  => write!(f, "== {r:#x}"),
            Comparator::Ne(r)  => write!(f, "!= {r:#x}"),
            Comparator::Lt(r)  => write!(f, "< {r:#x}"),
            Comparator::Le(r)  => write!(f, "<= {r:#x}"),
            Comparator::Gt(r)  => write!(f, "> {r:#x}"),
            Comparator::Ge(r)  => write!(f, ">= {r:#x}"),
            Comparator::SLt(r) => write!(f, "< {r} (signed)"),
            Comparator::SGt(r) => write!(f, "> {r} (signed)"),
            Comparator::Always => f.write_str("always"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Breakpoint, Comparator};
    use crate::ast::Reg;
    use crate::sim::mem::RegLoc;

    #[test]
    fn test_comparator() {
        assert!(Comparator::Lt(5).check(4));
        assert!(!Comparator::Lt(5).check(5));
        assert!(Comparator::Ge(5).check(5));
        assert!(Comparator::Ne(0).check(u32::MAX));
        assert!(!Comparator::Never.check(0));
        assert!(Comparator::Always.check(0));

        // -1 is huge unsigned but negative signed
        assert!(Comparator::Gt(0).check(u32::MAX));
        assert!(Comparator::SLt(0).check(u32::MAX));
        assert!(!Comparator::SGt(0).check(u32::MAX));
    }

    #[test]
    fn test_display() {
        assert_eq!(Breakpoint::PC(0x0040_0008).to_string(), "pc == 0x00400008");
        assert_eq!(Breakpoint::reg(Reg::T0, Comparator::Eq(16)).to_string(), "$t0 == 0x10");
        assert_eq!(Breakpoint::Reg { reg: RegLoc::Lo, value: Comparator::SLt(-2) }.to_string(), "lo < -2 (signed)");
        assert_eq!(Breakpoint::Mem { addr: 0x1001_0000, value: Comparator::Always }.to_string(), "[0x10010000] always");
    }
}
