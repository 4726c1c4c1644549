//! Undo history for the simulator.
//!
//! Each executed instruction produces one [`BackStep`], which holds the PC the instruction
//! was fetched from, as well as the previous value of every register and memory word
//! the instruction wrote. Undoing a [`BackStep`] restores those values exactly.
//!
//! The [`BackStepper`] keeps a bounded number of these records (oldest are evicted first).

use std::collections::VecDeque;

use super::mem::RegLoc;

/// The changes of one executed instruction.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BackStep {
    /// The address of the instruction.
    pub pc: u32,
    /// The previous value of each written register.
    pub regs: Vec<(RegLoc, u32)>,
    /// The previous value of each written memory word (keyed by word-aligned address).
    pub mem: Vec<(u32, u32)>,
}
impl BackStep {
    fn new(pc: u32) -> Self {
        Self { pc, regs: vec![], mem: vec![] }
    }
}

/// A bounded history of [`BackStep`]s.
///
/// Only the first write to a given location in each step is recorded,
/// since that holds the value from before the step.
#[derive(Debug, Clone)]
pub struct BackStepper {
    history: VecDeque<BackStep>,
    current: Option<BackStep>,
    limit: usize,
}
impl BackStepper {
    /// Creates a new back-stepper which holds at most `limit` steps.
    pub fn new(limit: usize) -> Self {
        Self { history: VecDeque::new(), current: None, limit }
    }

    /// The maximum number of steps held.
    pub fn limit(&self) -> usize {
        self.limit
    }
    /// The number of steps that can currently be undone.
    pub fn len(&self) -> usize {
        self.history.len()
    }
    /// Whether there are no steps to undo.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
    /// Forgets all history.
    pub fn clear(&mut self) {
        self.history.clear();
        self.current = None;
    }

    /// Starts recording the instruction at the given PC.
    pub(super) fn begin(&mut self, pc: u32) {
        self.current = Some(BackStep::new(pc));
    }
    pub(super) fn record_reg(&mut self, loc: RegLoc, old: u32) {
        if let Some(step) = &mut self.current {
            if !step.regs.iter().any(|&(l, _)| l == loc) {
                step.regs.push((loc, old));
            }
        }
    }
    pub(super) fn record_mem(&mut self, addr: u32, old: u32) {
        if let Some(step) = &mut self.current {
            if !step.mem.iter().any(|&(a, _)| a == addr) {
                step.mem.push((addr, old));
            }
        }
    }
    /// Finishes recording the current instruction and pushes it into history.
    pub(super) fn commit(&mut self) {
        if let Some(step) = self.current.take() {
            if self.limit == 0 { return; }
            if self.history.len() >= self.limit {
                self.history.pop_front();
            }
            self.history.push_back(step);
        }
    }
    /// Stops recording the current instruction, returning what was recorded so far.
    pub(super) fn abort(&mut self) -> Option<BackStep> {
        self.current.take()
    }

    /// Takes the most recent step out of history.
    pub fn pop(&mut self) -> Option<BackStep> {
        self.history.pop_back()
    }
    /// The most recent step in history.
    pub fn peek(&self) -> Option<&BackStep> {
        self.history.back()
    }
}

/// The result of [`Simulator::step_back`].
///
/// [`Simulator::step_back`]: super::Simulator::step_back
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum BackStepResult {
    /// One instruction was undone, and the PC is now the given address.
    Undone {
        /// The restored PC.
        pc: u32
    },
    /// There was no history to undo.
    NothingToUndo,
    /// Back-stepping is disabled (or no program is loaded).
    Disabled,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::BackStepper;
    use crate::ast::Reg;
    use crate::sim::mem::RegLoc;

    #[test]
    fn test_first_write_only() {
        let mut bs = BackStepper::new(4);
        bs.begin(0x0040_0000);
        bs.record_reg(RegLoc::Gpr(Reg::T0), 1);
        bs.record_reg(RegLoc::Gpr(Reg::T0), 2);
        bs.record_mem(0x1001_0000, 7);
        bs.record_mem(0x1001_0000, 8);
        bs.commit();

        let step = bs.pop().unwrap();
        assert_eq!(step.pc, 0x0040_0000);
        assert_eq!(step.regs, vec![(RegLoc::Gpr(Reg::T0), 1)]);
        assert_eq!(step.mem, vec![(0x1001_0000, 7)]);
        assert!(bs.is_empty());
    }

    #[test]
    fn test_limit() {
        let mut bs = BackStepper::new(2);
        for pc in [0, 4, 8] {
            bs.begin(pc);
            bs.commit();
        }
        assert_eq!(bs.len(), 2);
        assert_eq!(bs.pop().map(|s| s.pc), Some(8));
        assert_eq!(bs.pop().map(|s| s.pc), Some(4));
        assert_eq!(bs.pop(), None);
    }

    #[test]
    fn test_abort() {
        let mut bs = BackStepper::new(2);
        bs.begin(0);
        bs.record_reg(RegLoc::Hi, 3);
        let partial = bs.abort().unwrap();
        assert_eq!(partial.regs, vec![(RegLoc::Hi, 3)]);
        bs.commit();
        assert!(bs.is_empty());
    }
}
