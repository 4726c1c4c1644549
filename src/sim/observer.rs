//! Tracking of what the last single step touched.
//!
//! The simulator keeps a [`ChangeObserver`] in [`Simulator::observer`].
//! It is cleared at the start of every [`Simulator::step`] and [`Simulator::step_back`],
//! and it only records while the simulator is single-stepping (see [`Simulator::is_stepped`]).
//! Free runs and program loading leave it untouched, so a front-end can highlight
//! exactly the registers and memory words the last step (or back-step) changed.
//!
//! ```
//! # use mips_ensemble::asm::{assemble, AsmFlags};
//! # use mips_ensemble::program::Program;
//! # use mips_ensemble::sim::Simulator;
//! use mips_ensemble::ast::Reg;
//! use mips_ensemble::sim::mem::RegLoc;
//! use mips_ensemble::sim::observer::Location;
//!
//! # let mut programs = [Program::from_source("main.s", "addi $t0, $t1, 0")];
//! # let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
//! let mut sim = Simulator::new(Default::default());
//! sim.load_program(&asm);
//! sim.step().unwrap();
//!
//! let t0 = sim.observer.get(Location::Reg(RegLoc::Gpr(Reg::T0)));
//! assert!(t0.written && !t0.modified); // 0 was written over 0
//! assert!(sim.observer.get(Location::Reg(RegLoc::Gpr(Reg::T1))).read);
//! ```
//!
//! [`Simulator::observer`]: crate::sim::Simulator::observer
//! [`Simulator::step`]: crate::sim::Simulator::step
//! [`Simulator::step_back`]: crate::sim::Simulator::step_back
//! [`Simulator::is_stepped`]: crate::sim::Simulator::is_stepped

use std::collections::BTreeMap;

use super::mem::RegLoc;

/// A register or a memory word.
///
/// Registers sort before memory, and memory sorts by address.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub enum Location {
    /// A register.
    Reg(RegLoc),
    /// A word of memory (by its word-aligned address).
    Mem(u32),
}

/// What has happened to a location.
#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Access {
    /// The location was read.
    pub read: bool,
    /// The location was written, even if with the same value.
    pub written: bool,
    /// The location was written with a different value.
    pub modified: bool,
}
impl Access {
    /// A read.
    pub fn read() -> Self {
        Self { read: true, ..Default::default() }
    }
    /// A write of `new` over `old`.
    pub fn write(old: u32, new: u32) -> Self {
        Self { read: false, written: true, modified: old != new }
    }

    /// Whether anything has happened at all.
    pub fn accessed(&self) -> bool {
        self.read || self.written
    }
    fn merge(&mut self, other: Access) {
        self.read |= other.read;
        self.written |= other.written;
        self.modified |= other.modified;
    }
}

/// Records the accesses of a single step.
#[derive(Debug, Default)]
pub struct ChangeObserver {
    enabled: bool,
    accesses: BTreeMap<Location, Access>,
}
impl ChangeObserver {
    /// Creates a new, disabled observer.
    pub fn new() -> Self {
        Default::default()
    }

    /// Whether accesses are currently being recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
    pub(super) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Adds an access to a location.
    ///
    /// This does nothing while the observer is disabled.
    pub fn record(&mut self, loc: Location, access: Access) {
        if self.enabled {
            self.accesses.entry(loc).or_default().merge(access);
        }
    }

    /// Gets the accesses made to a location.
    pub fn get(&self, loc: Location) -> Access {
        self.accesses.get(&loc).copied().unwrap_or_default()
    }
    /// Iterates over every accessed location (registers first, then memory by address).
    pub fn iter(&self) -> impl Iterator<Item=(Location, Access)> + '_ {
        self.accesses.iter().map(|(&loc, &access)| (loc, access))
    }
    /// Iterates over the locations whose value changed.
    pub fn modified(&self) -> impl Iterator<Item=Location> + '_ {
        self.iter().filter(|(_, a)| a.modified).map(|(loc, _)| loc)
    }

    /// Forgets all recorded accesses.
    pub fn clear(&mut self) {
        self.accesses.clear();
    }
    /// Takes all recorded accesses, leaving the observer empty.
    pub fn take(&mut self) -> BTreeMap<Location, Access> {
        std::mem::take(&mut self.accesses)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Access, ChangeObserver, Location};
    use crate::ast::Reg;
    use crate::sim::mem::RegLoc;

    #[test]
    fn test_gating() {
        let word = Location::Mem(0x1001_0000);
        let t0 = Location::Reg(RegLoc::Gpr(Reg::T0));

        let mut obs = ChangeObserver::new();
        obs.record(word, Access::write(0, 1));
        assert!(!obs.get(word).accessed());

        obs.set_enabled(true);
        obs.record(word, Access::write(5, 5));
        obs.record(word, Access::write(5, 6));
        obs.record(t0, Access::read());

        assert_eq!(obs.get(word), Access { read: false, written: true, modified: true });
        assert_eq!(obs.modified().collect::<Vec<_>>(), [word]);
        assert_eq!(obs.iter().map(|(loc, _)| loc).collect::<Vec<_>>(), [t0, word]);

        let taken = obs.take();
        assert_eq!(taken.len(), 2);
        assert!(!obs.get(t0).accessed());
    }
}
