//! Memory handling for the MIPS simulator.
//!
//! This module consists of:
//! - [`Mem`]: sparse, byte-addressed, little-endian memory.
//! - [`RegFile`]: the general-purpose registers and `hi`/`lo`.
//! - [`MachineInitStrategy`]: how memory and registers are filled before the program touches them.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::Rng;

use crate::ast::Reg;

/// Trait that describes types that can be used to fill memory the program has not yet written.
pub trait WordFiller {
    /// Generate the data.
    fn generate(&mut self) -> u32;
}
impl WordFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u32 {
        rand::random()
    }
}
impl WordFiller for u32 {
    /// Sets each word to the given value.
    fn generate(&mut self) -> u32 {
        *self
    }
}
impl WordFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u32 {
        self.gen()
    }
}

/// Strategy used to initialize the `reg_file` and `mem` of the [`Simulator`].
///
/// Memory is allocated in pages the first time any address in the page is accessed,
/// and each new page is filled according to this strategy.
///
/// By default, everything is initialized to zero.
///
/// [`Simulator`]: super::Simulator
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum MachineInitStrategy {
    /// Initializes each word randomly and non-deterministically.
    Unseeded,

    /// Initializes each word randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Initializes each word to a known value.
    Known {
        /// The value to initialize each value to.
        value: u32
    }
}
impl Default for MachineInitStrategy {
    fn default() -> Self {
        MachineInitStrategy::Known { value: 0 }
    }
}
impl MachineInitStrategy {
    pub(super) fn generator(&self) -> Filler {
        use rand::SeedableRng;

        match self {
            MachineInitStrategy::Unseeded => Filler::Unseeded,
            MachineInitStrategy::Seeded { seed } => Filler::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MachineInitStrategy::Known { value } => Filler::Known(*value),
        }
    }
}

#[derive(Debug, Clone)]
pub(super) enum Filler {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u32)
}
impl WordFiller for Filler {
    fn generate(&mut self) -> u32 {
        match self {
            Filler::Unseeded  => ().generate(),
            Filler::Seeded(r) => r.generate(),
            Filler::Known(k)  => k.generate(),
        }
    }
}

const PAGE_BITS: u32 = 12;
const PAGE_SIZE: usize = 1 << PAGE_BITS;
const OFFSET_MASK: u32 = (1 << PAGE_BITS) - 1;

/// The simulator's memory.
///
/// The full 32-bit address space is available.
/// Pages are allocated on first access (read or write)
/// and are filled by the [`MachineInitStrategy`] the memory was created with.
///
/// Multi-byte values are little-endian. Alignment is not checked here;
/// that is the simulator's job.
///
/// # Example
///
/// ```
/// use mips_ensemble::sim::mem::{Mem, MachineInitStrategy};
///
/// let mut mem = Mem::new(MachineInitStrategy::Known { value: 0 });
/// mem.write(0x1001_0000, 4, 0x1234_5678);
/// assert_eq!(mem.read(0x1001_0000, 1), 0x78);
/// assert_eq!(mem.read(0x1001_0002, 2), 0x1234);
/// assert_eq!(mem.peek_word(0x2000_0000), None);
/// ```
#[derive(Debug, Clone)]
pub struct Mem {
    pages: HashMap<u32, Box<[u8; PAGE_SIZE]>>,
    filler: Filler,
}
impl Mem {
    /// Creates new memory, where untouched pages are filled using the given strategy.
    pub fn new(init: MachineInitStrategy) -> Self {
        Self { pages: HashMap::new(), filler: init.generator() }
    }

    fn page_mut(&mut self, addr: u32) -> &mut [u8; PAGE_SIZE] {
        let filler = &mut self.filler;
        self.pages.entry(addr >> PAGE_BITS).or_insert_with(|| {
            let mut page = Box::new([0; PAGE_SIZE]);
            for chunk in page.chunks_exact_mut(4) {
                chunk.copy_from_slice(&filler.generate().to_le_bytes());
            }
            page
        })
    }

    /// Reads a byte.
    pub fn read_byte(&mut self, addr: u32) -> u8 {
        self.page_mut(addr)[(addr & OFFSET_MASK) as usize]
    }
    /// Writes a byte.
    pub fn write_byte(&mut self, addr: u32, value: u8) {
        self.page_mut(addr)[(addr & OFFSET_MASK) as usize] = value;
    }

    /// Reads a value of the given width (1, 2, or 4 bytes), zero-extended.
    pub fn read(&mut self, addr: u32, width: u32) -> u32 {
        (0..width).rev()
            .fold(0, |acc, i| (acc << 8) | u32::from(self.read_byte(addr.wrapping_add(i))))
    }
    /// Writes the low bytes of a value with the given width (1, 2, or 4 bytes).
    pub fn write(&mut self, addr: u32, width: u32, value: u32) {
        for (i, b) in (0..width).zip(value.to_le_bytes()) {
            self.write_byte(addr.wrapping_add(i), b);
        }
    }

    /// Reads a word without allocating.
    ///
    /// This returns `None` if the word's page has never been accessed.
    pub fn peek_word(&self, addr: u32) -> Option<u32> {
        let page = self.pages.get(&(addr >> PAGE_BITS))?;
        let off = (addr & OFFSET_MASK & !0b11) as usize;
        let bytes = page[off..off + 4].try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Copies a block of bytes into memory.
    ///
    /// A block running past the last address wraps around to address 0.
    pub fn copy_block(&mut self, start: u32, data: &[u8]) {
        for (i, &b) in (0..).zip(data) {
            self.write_byte(start.wrapping_add(i), b);
        }
    }

    /// The number of pages which have been allocated.
    pub fn pages_allocated(&self) -> usize {
        self.pages.len()
    }
}

/// A register location that an instruction can write.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy)]
pub enum RegLoc {
    /// A general-purpose register.
    Gpr(Reg),
    /// The `hi` register.
    Hi,
    /// The `lo` register.
    Lo,
}
impl std::fmt::Display for RegLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegLoc::Gpr(r) => std::fmt::Display::fmt(r, f),
            RegLoc::Hi => f.write_str("hi"),
            RegLoc::Lo => f.write_str("lo"),
        }
    }
}

/// The register file.
///
/// This struct can be indexed with a [`Reg`] or [`RegLoc`] to read a register.
/// Registers are written with [`RegFile::set`], which keeps `$zero` hard-wired to 0.
///
/// # Example
///
/// ```
/// use mips_ensemble::sim::mem::RegFile;
/// use mips_ensemble::ast::Reg;
///
/// let mut reg = RegFile::new(&mut 0u32);
/// reg.set(Reg::T0, 11);
/// reg.set(Reg::ZERO, 11);
/// assert_eq!(reg[Reg::T0], 11);
/// assert_eq!(reg[Reg::ZERO], 0);
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RegFile {
    gpr: [u32; 32],
    hi: u32,
    lo: u32,
}
impl RegFile {
    /// Creates a register file filled with the given filler (except `$zero`).
    pub fn new(filler: &mut impl WordFiller) -> Self {
        let mut gpr: [u32; 32] = std::array::from_fn(|_| filler.generate());
        gpr[0] = 0;
        Self { gpr, hi: filler.generate(), lo: filler.generate() }
    }

    /// Writes a general-purpose register. Writes to `$zero` are ignored.
    pub fn set(&mut self, reg: Reg, value: u32) {
        if reg != Reg::ZERO {
            self.gpr[usize::from(reg.reg_no())] = value;
        }
    }
    /// Writes any register location.
    pub fn set_loc(&mut self, loc: RegLoc, value: u32) {
        match loc {
            RegLoc::Gpr(r) => self.set(r, value),
            RegLoc::Hi => self.hi = value,
            RegLoc::Lo => self.lo = value,
        }
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u32;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.gpr[usize::from(index.reg_no())]
    }
}
impl std::ops::Index<RegLoc> for RegFile {
    type Output = u32;

    fn index(&self, index: RegLoc) -> &Self::Output {
        match index {
            RegLoc::Gpr(r) => &self[r],
            RegLoc::Hi => &self.hi,
            RegLoc::Lo => &self.lo,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{MachineInitStrategy, Mem, RegFile, RegLoc};
    use crate::ast::Reg;

    #[test]
    fn test_little_endian() {
        let mut mem = Mem::new(MachineInitStrategy::default());
        mem.write(0x1001_0000, 4, 0xAABB_CCDD);
        assert_eq!(mem.read(0x1001_0000, 1), 0xDD);
        assert_eq!(mem.read(0x1001_0003, 1), 0xAA);
        assert_eq!(mem.read(0x1001_0000, 2), 0xCCDD);
        assert_eq!(mem.peek_word(0x1001_0002), Some(0xAABB_CCDD));
    }

    #[test]
    fn test_page_boundary() {
        let mut mem = Mem::new(MachineInitStrategy::default());
        mem.write(0x1000_0FFE, 4, 0x0102_0304);
        assert_eq!(mem.read(0x1000_0FFE, 4), 0x0102_0304);
        assert_eq!(mem.pages_allocated(), 2);
    }

    #[test]
    fn test_copy_block_wraps() {
        let mut mem = Mem::new(MachineInitStrategy::Known { value: 0 });
        mem.copy_block(0xFFFF_FFFE, &[1, 2, 3, 4]);
        assert_eq!(mem.read(0xFFFF_FFFE, 2), 0x0201);
        assert_eq!(mem.read(0x0000_0000, 2), 0x0403);
        assert_eq!(mem.pages_allocated(), 2);
    }

    #[test]
    fn test_init_strategies() {
        let mut known = Mem::new(MachineInitStrategy::Known { value: 0xDEAD_BEEF });
        assert_eq!(known.read(0x7000_0000, 4), 0xDEAD_BEEF);

        let mut a = Mem::new(MachineInitStrategy::Seeded { seed: 42 });
        let mut b = Mem::new(MachineInitStrategy::Seeded { seed: 42 });
        assert_eq!(a.read(0x1234_5678, 4), b.read(0x1234_5678, 4));
    }

    #[test]
    fn test_reg_file() {
        let mut regs = RegFile::new(&mut 7u32);
        assert_eq!(regs[Reg::ZERO], 0);
        assert_eq!(regs[Reg::T0], 7);

        regs.set_loc(RegLoc::Hi, 5);
        regs.set_loc(RegLoc::Gpr(Reg::ZERO), 5);
        assert_eq!(regs[RegLoc::Hi], 5);
        assert_eq!(regs[RegLoc::Gpr(Reg::ZERO)], 0);
    }
}
