//! Simulating and execution for MIPS assembly.
//!
//! This module is focused on executing fully assembled code (i.e., [`AssembledProgram`]).
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates assembled code.
//! - [`mem`]: The module handling memory and the register file.
//! - [`backstep`]: The module holding the undo history used for back-stepping.
//! - [`io`]: The module handling console IO for syscalls.
//! - [`debug`]: The module handling types of breakpoints for the simulator.
//! - [`observer`]: The module tracking what single steps changed.
//!
//! # Usage
//!
//! To simulate some code, you need to instantiate a Simulator and load an assembled program into it:
//!
//! ```
//! use mips_ensemble::asm::{assemble, AsmFlags};
//! use mips_ensemble::ast::Reg;
//! use mips_ensemble::program::Program;
//! use mips_ensemble::sim::Simulator;
//!
//! let src = "
//!     .text
//! main:
//!     li   $t0, 5
//!     addi $t0, $t0, 1
//!     li   $v0, 10
//!     syscall
//! ";
//! let mut programs = [Program::from_source("main.s", src)];
//! let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load_program(&asm);
//!
//! // `simulate` returns whether the program completed:
//! assert!(sim.simulate(None).unwrap());
//! assert_eq!(sim.reg_file[Reg::T0], 6);
//! assert_eq!(sim.exit_code(), Some(0));
//! ```
//!
//! ## Flags
//!
//! The simulator is configured through [`SimFlags`]. For example,
//! to turn off back-stepping:
//!
//! ```
//! # use mips_ensemble::sim::{Simulator, SimFlags};
//! let mut simulator = Simulator::new(SimFlags { back_stepping: false, ..Default::default() });
//! ```
//!
//! ## Execution
//!
//! Beyond the basic [`Simulator::simulate`] (which runs until completion or a step limit),
//! there are also:
//! - [`Simulator::step`]: manual step-by-step simulation
//! - [`Simulator::step_back`]: undoing the most recently executed instruction
//! - [`Simulator::run_while`]: more advanced programmatic execution
//! - [`Simulator::start_simulation`]: running on a worker thread, reporting through a channel
//!
//! ```
//! # use mips_ensemble::asm::{assemble, AsmFlags};
//! # use mips_ensemble::ast::Reg;
//! # use mips_ensemble::program::Program;
//! # use mips_ensemble::sim::Simulator;
//! use mips_ensemble::sim::backstep::BackStepResult;
//!
//! let src = "
//!     addi $t0, $zero, 1
//!     addi $t0, $t0, 1
//!     addi $t0, $t0, 1
//! ";
//! let mut programs = [Program::from_source("main.s", src)];
//! let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load_program(&asm);
//!
//! sim.step().unwrap();
//! sim.step().unwrap();
//! assert_eq!(sim.reg_file[Reg::T0], 2);
//!
//! assert_eq!(sim.step_back(), BackStepResult::Undone { pc: 0x0040_0004 });
//! assert_eq!(sim.reg_file[Reg::T0], 1);
//! ```
//!
//! ## Debugging with breakpoints
//!
//! Breakpoints are accessible through the `breakpoints` field on [`Simulator`].
//! They are checked by every execution function except [`Simulator::step`].
//!
//! ```
//! # use mips_ensemble::asm::{assemble, AsmFlags};
//! # use mips_ensemble::program::Program;
//! # use mips_ensemble::sim::Simulator;
//! use mips_ensemble::sim::debug::Breakpoint;
//!
//! let src = "
//!     addi $t0, $zero, 1
//!     addi $t0, $t0, 2
//!     addi $t0, $t0, 3
//! ";
//! let mut programs = [Program::from_source("main.s", src)];
//! let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load_program(&asm);
//! sim.breakpoints.insert(Breakpoint::PC(0x0040_0008));
//!
//! assert!(!sim.simulate(None).unwrap());
//! assert!(sim.hit_breakpoint());
//! assert_eq!(sim.pc, 0x0040_0008);
//! ```
//!
//! ## IO
//!
//! Console syscalls (print/read integer, string, and character) go through the `io` field.
//! For programmatic use, [`io::BufferedIO`] keeps input and output in memory
//! and can be cloned to inspect them from outside the simulator.
//!
//! ```
//! # use mips_ensemble::asm::{assemble, AsmFlags};
//! # use mips_ensemble::program::Program;
//! # use mips_ensemble::sim::Simulator;
//! use mips_ensemble::sim::io::BufferedIO;
//!
//! let src = "
//!     .data
//! msg: .asciiz \"sum: \"
//!     .text
//!     li $v0, 5
//!     syscall
//!     addi $t0, $v0, 10
//!     li $v0, 4
//!     la $a0, msg
//!     syscall
//!     li $v0, 1
//!     move $a0, $t0
//!     syscall
//! ";
//! let mut programs = [Program::from_source("main.s", src)];
//! let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load_program(&asm);
//!
//! let io = BufferedIO::with_input(b"32\n");
//! sim.io = io.clone().into();
//! sim.simulate(None).unwrap();
//!
//! assert_eq!(io.output(), b"sum: 42");
//! ```
//!
//! [`AssembledProgram`]: crate::asm::AssembledProgram
pub mod backstep;
pub mod debug;
pub mod io;
pub mod mem;
pub mod observer;

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel as cbc;
use log::{debug, info, trace};

use crate::asm::{AssembledProgram, MemoryLayout, ProgramStatement};
use crate::ast::sim::{AluOp, BranchCond, HiLo, ImmOp, LoadOp, MulDivOp, ShiftOp, SimInstr};
use crate::ast::Reg;
use backstep::{BackStep, BackStepResult, BackStepper};
use debug::Breakpoint;
use io::{SimIO, SyscallIO};
use mem::{MachineInitStrategy, Mem, RegFile, RegLoc};
use observer::{Access, ChangeObserver, Location};

/// Errors that can occur during simulation.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum SimErr {
    /// The PC pointed outside of the text segments, or was misaligned.
    InvalidFetch(u32),
    /// A load or store accessed an address not aligned to its width.
    AddressAlign(u32),
    /// A trapping arithmetic instruction (`add`, `addi`, `sub`) overflowed.
    ArithmeticOverflow,
    /// The fetched word is not a supported instruction.
    IllegalInstruction(u32),
    /// A `break` instruction was executed.
    Break(u32),
    /// A syscall was executed with an unsupported service number in `$v0`.
    InvalidSyscall(u32),
    /// A read syscall did not get usable console input.
    InvalidInput,
    /// The simulator was run without a loaded program.
    NotLoaded,
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimErr::InvalidFetch(addr)       => write!(f, "cannot fetch instruction at {addr:#010x}"),
            SimErr::AddressAlign(addr)       => write!(f, "address {addr:#010x} is not aligned"),
            SimErr::ArithmeticOverflow       => f.write_str("arithmetic overflow"),
            SimErr::IllegalInstruction(word) => write!(f, "illegal instruction {word:#010x}"),
            SimErr::Break(code)              => write!(f, "break instruction executed (code {code})"),
            SimErr::InvalidSyscall(code)     => write!(f, "invalid or unimplemented syscall {code}"),
            SimErr::InvalidInput             => f.write_str("invalid or missing console input"),
            SimErr::NotLoaded                => f.write_str("no program is loaded"),
        }
    }
}
impl std::error::Error for SimErr {}
impl crate::err::Error for SimErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            SimErr::InvalidFetch(_)       => Some("check that every jump and branch targets code".into()),
            SimErr::AddressAlign(_)       => Some("words must be accessed at multiples of 4 and halfwords at multiples of 2".into()),
            SimErr::ArithmeticOverflow    => Some("use the unsigned form (e.g., `addu`) to allow wrapping".into()),
            SimErr::IllegalInstruction(_) => None,
            SimErr::Break(_)              => None,
            SimErr::InvalidSyscall(_)     => Some("supported services are 1, 4, 5, 8, 10, 11, 12, 17, 34, 35, and 36".into()),
            SimErr::InvalidInput          => Some("integer input must be a decimal number on its own line".into()),
            SimErr::NotLoaded             => Some("assemble a program and call `Simulator::load_program` first".into()),
        }
    }
}

/// A simulation error, with the machine context it occurred in.
///
/// The PC is left pointing at the faulting instruction.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct SimFault {
    /// What went wrong.
    pub kind: SimErr,
    /// The address of the faulting instruction.
    pub pc: u32,
    /// The faulting instruction word, if one was fetched.
    pub instruction: Option<u32>,
}
impl std::fmt::Display for SimFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (pc = {:#010x}", self.kind, self.pc)?;
        if let Some(word) = self.instruction {
            write!(f, ", instruction = {word:#010x}")?;
        }
        f.write_str(")")
    }
}
impl std::error::Error for SimFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Anything that can cause a step to abruptly fail to finish.
enum StepBreak {
    /// The program finished with the given exit code.
    Exit(i32),
    /// A simulation error occurred.
    Err(SimErr),
}
impl From<SimErr> for StepBreak {
    fn from(value: SimErr) -> Self {
        Self::Err(value)
    }
}

/// Reason for why execution paused if it wasn't due to an error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
enum PauseCondition {
    /// Program exited or dropped off the bottom of its code.
    Completed,
    /// A stop was requested.
    Stopped,
    /// Program hit a breakpoint.
    Breakpoint,
    /// Program hit a tripwire condition (e.g., the step limit).
    Tripwire,
    /// Program hit an error and did not pause successfully.
    #[default]
    Unsuccessful
}

/// Configuration flags for [`Simulator`].
///
/// These can be modified after the `Simulator` is created with [`Simulator::new`].
/// Flags marked as such only go into effect on the next [`Simulator::load_program`].
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimFlags {
    /// Whether back-stepping is enabled.
    ///
    /// If enabled, every executed instruction records what it overwrote,
    /// so that it can be undone with [`Simulator::step_back`].
    ///
    /// This flag goes into effect on [`Simulator::load_program`].
    /// Loading a program (including a reassembled version of the same source)
    /// always discards the previous history, so a back-step never restores
    /// state from an older assembly.
    ///
    /// By default, this flag is `true`.
    pub back_stepping: bool,

    /// The maximum number of instructions which can be undone.
    ///
    /// Once more instructions than this have run, the oldest are forgotten.
    ///
    /// This flag goes into effect on [`Simulator::load_program`].
    ///
    /// By default, this is 2000.
    pub back_step_limit: usize,

    /// The creation strategy for memory and registers the program has not written.
    ///
    /// This is used to initialize the `mem` and `reg_file` fields.
    ///
    /// By default, this flag is [`MachineInitStrategy::default`].
    pub machine_init: MachineInitStrategy,

    /// Whether execution starts at the global `main` label.
    ///
    /// If false (or if there is no global `main`), execution starts at the base of the text segment.
    ///
    /// By default, this flag is `false`.
    pub start_at_main: bool,
}
impl Default for SimFlags {
    fn default() -> Self {
        Self {
            back_stepping: true,
            back_step_limit: 2000,
            machine_init: Default::default(),
            start_at_main: false,
        }
    }
}

// print string stops at this many bytes if no NUL terminator is found
const MAX_PRINT_LEN: u32 = 0x10_0000;

/// Executes assembled code.
#[derive(Debug)]
pub struct Simulator {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Simulator::reset`] resets these values.

    /// The simulator's memory.
    pub mem: Mem,

    /// The simulator's register file.
    pub reg_file: RegFile,

    /// The program counter.
    pub pc: u32,

    /// The number of instructions successfully run since the program was loaded.
    ///
    /// Back-stepping decrements this counter.
    pub instructions_run: u64,

    /// Indicates the reason why the last execution (via [`Simulator::run_while`] and adjacent)
    /// had paused.
    pause_condition: PauseCondition,

    /// The exit code, once the program has finished.
    exit_code: Option<i32>,

    /// Whether the last execution was a single step (or back-step).
    stepped: bool,

    /// Tracks what single steps changed.
    pub observer: ChangeObserver,

    /// The undo history. This is `None` if back-stepping is disabled or no program is loaded.
    backstepper: Option<BackStepper>,

    /// The statements of the loaded program.
    statements: Option<Arc<[ProgramStatement]>>,

    /// The memory layout of the loaded program.
    layout: MemoryLayout,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Simulator::reset`] does not reset these values.

    /// Run control.
    /// If unset during a run, the run stops before the next instruction.
    ///
    /// This is publicly accessible via a reference through [`Simulator::running`].
    running: Arc<AtomicBool>,

    /// Configuration settings for the simulator.
    ///
    /// These are preserved between resets.
    ///
    /// See [`SimFlags`] for more details on what configuration
    /// settings are available.
    pub flags: SimFlags,

    /// Breakpoints for the simulator.
    pub breakpoints: HashSet<Breakpoint>,

    /// The console used by syscalls.
    pub io: SimIO,
}
impl Simulator where Simulator: Send + Sync {}

impl Simulator {
    /// Creates a new simulator with the provided flags, but without a loaded program.
    ///
    /// This also allows providing a run control atomic which is used by the Simulator.
    fn new_with_running(flags: SimFlags, running: Arc<AtomicBool>) -> Self {
        let mut filler = flags.machine_init.generator();
        let layout = MemoryLayout::default();

        let mut sim = Self {
            mem: Mem::new(flags.machine_init),
            reg_file: RegFile::new(&mut filler),
            pc: layout.text_base,
            instructions_run: 0,
            pause_condition: Default::default(),
            exit_code: None,
            stepped: false,
            observer: Default::default(),
            backstepper: None,
            statements: None,
            layout,

            running,
            flags,
            breakpoints: Default::default(),
            io: Default::default(),
        };
        sim.init_pointers();
        sim
    }

    /// Creates a new simulator with the provided flags, but without a loaded program.
    pub fn new(flags: SimFlags) -> Self {
        Self::new_with_running(flags, Arc::default())
    }

    fn init_pointers(&mut self) {
        self.reg_file.set(Reg::SP, self.layout.stack_pointer);
        self.reg_file.set(Reg::GP, self.layout.global_pointer);
    }

    /// Resets the simulator.
    ///
    /// This resets the state of the `Simulator` back to before any execution calls,
    /// while preserving configuration and debug state.
    ///
    /// Note that this function preserves:
    /// - Flags
    /// - Breakpoints
    /// - Run control reference (i.e., anything with access to [`Simulator::running`] can still control it)
    /// - IO (however, note that it does not reset IO state, which must be manually reset)
    ///
    /// This also unloads the program. It has to be reloaded with [`Simulator::load_program`].
    pub fn reset(&mut self) {
        let running = Arc::clone(&self.running);
        let flags = self.flags;
        let breakpoints = std::mem::take(&mut self.breakpoints);
        let io = std::mem::take(&mut self.io);

        *self = Simulator::new_with_running(flags, running);
        self.breakpoints = breakpoints;
        self.io = io;
    }

    /// Loads an assembled program into this simulator.
    ///
    /// This resets the simulator (see [`Simulator::reset`]), copies the code and data into memory,
    /// sets up `$sp`, `$gp`, and the PC, and starts a fresh back-stepping history.
    ///
    /// Reassembled code only reaches the simulator through this method,
    /// so undo records from a previous load can never be applied to it.
    ///
    /// Loading does not notify the observer.
    pub fn load_program(&mut self, program: &AssembledProgram) {
        self.reset();
        self.layout = *program.layout();
        self.init_pointers();

        for stmt in program.statements() {
            self.mem.write(stmt.address(), 4, stmt.binary());
        }
        for chunk in program.data() {
            self.mem.copy_block(chunk.address, &chunk.bytes);
        }

        let main = program.global_symbols().address_of("main")
            .filter(|_| self.flags.start_at_main);
        self.pc = main.unwrap_or(self.layout.text_base);

        self.statements = Some(Arc::clone(program.shared_statements()));
        self.backstepper = self.flags.back_stepping
            .then(|| BackStepper::new(self.flags.back_step_limit));

        debug!(
            "loaded {} statements and {} data blocks, starting at {:#010x}",
            program.statements().len(), program.data().len(), self.pc
        );
    }

    /// Gets a reference to the run control.
    ///
    /// Storing `false` here while a run is in progress stops the run before its next instruction.
    pub fn running(&self) -> &Arc<AtomicBool> {
        &self.running
    }

    /// The memory layout of the loaded program.
    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// The statement the PC currently points at, if there is one.
    pub fn current_statement(&self) -> Option<&ProgramStatement> {
        let statements = self.statements.as_deref()?;
        statements.binary_search_by_key(&self.pc, |s| s.address())
            .ok()
            .map(|i| &statements[i])
    }

    /// The back-stepping history, if back-stepping is enabled and a program is loaded.
    pub fn backstepper(&self) -> Option<&BackStepper> {
        self.backstepper.as_ref()
    }

    /// Indicates whether the last execution of the simulator hit a breakpoint.
    pub fn hit_breakpoint(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Breakpoint)
    }

    /// Indicates whether the program has completed.
    ///
    /// This is defined as:
    /// - `exit` (syscall 10) or `exit2` (syscall 17) being executed
    /// - the PC reaching an address in a text segment with no code
    pub fn is_completed(&self) -> bool {
        self.exit_code.is_some()
    }

    /// The exit code of the program, if it has completed.
    ///
    /// A program which dropped off the bottom of its code exits with 0.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Whether the last execution was a single step or back-step (as opposed to a free run).
    ///
    /// The observer only records changes while this is set.
    pub fn is_stepped(&self) -> bool {
        self.stepped
    }
    fn set_stepped(&mut self, stepped: bool) {
        self.stepped = stepped;
        self.observer.set_enabled(stepped);
    }

    fn reg(&mut self, reg: Reg) -> u32 {
        self.observer.record(Location::Reg(RegLoc::Gpr(reg)), Access::read());
        self.reg_file[reg]
    }
    fn set_reg(&mut self, loc: RegLoc, value: u32) {
        if loc == RegLoc::Gpr(Reg::ZERO) { return };

        let old = self.reg_file[loc];
        if let Some(bs) = &mut self.backstepper {
            bs.record_reg(loc, old);
        }
        self.reg_file.set_loc(loc, value);
        self.observer.record(Location::Reg(loc), Access::write(old, value));
    }
    fn set_gpr(&mut self, reg: Reg, value: u32) {
        self.set_reg(RegLoc::Gpr(reg), value);
    }
    fn set_hilo(&mut self, hi: u32, lo: u32) {
        self.set_reg(RegLoc::Hi, hi);
        self.set_reg(RegLoc::Lo, lo);
    }

    /// Reads a value of the given width (1, 2, or 4 bytes) from memory, zero-extended.
    ///
    /// This fails if the address is not aligned to the width.
    pub fn read_mem(&mut self, addr: u32, width: u32) -> Result<u32, SimErr> {
        if addr % width != 0 { return Err(SimErr::AddressAlign(addr)) };

        self.observer.record(Location::Mem(addr & !0b11), Access::read());
        Ok(self.mem.read(addr, width))
    }

    /// Writes a value of the given width (1, 2, or 4 bytes) to memory.
    ///
    /// This fails if the address is not aligned to the width.
    /// During an instruction, the overwritten word is recorded for back-stepping.
    pub fn write_mem(&mut self, addr: u32, width: u32, value: u32) -> Result<(), SimErr> {
        if addr % width != 0 { return Err(SimErr::AddressAlign(addr)) };

        let word_addr = addr & !0b11;
        let old = self.mem.read(word_addr, 4);
        if let Some(bs) = &mut self.backstepper {
            bs.record_mem(word_addr, old);
        }
        self.mem.write(addr, width, value);

        let new = self.mem.read(word_addr, 4);
        self.observer.record(Location::Mem(word_addr), Access::write(old, new));
        Ok(())
    }

    fn fault(&self, kind: SimErr) -> SimFault {
        let instruction = match kind {
            SimErr::InvalidFetch(_) | SimErr::NotLoaded => None,
            _ => self.mem.peek_word(self.pc),
        };
        SimFault { kind, pc: self.pc, instruction }
    }

    /// Runs until the tripwire condition returns false (or any of the typical breaks occur).
    ///
    /// The typical break conditions are:
    /// - the program completes
    /// - the run control is set to false
    /// - a breakpoint matches
    ///
    /// The tripwire is checked before each instruction and breakpoints are checked after each instruction.
    pub fn run_while(&mut self, tripwire: impl FnMut(&mut Simulator) -> bool) -> Result<(), SimFault> {
        self.running.store(true, Ordering::Relaxed);
        self.run_loop(tripwire)
    }

    fn run_loop(&mut self, mut tripwire: impl FnMut(&mut Simulator) -> bool) -> Result<(), SimFault> {
        self.set_stepped(false);
        std::mem::take(&mut self.pause_condition);
        let start = self.instructions_run;

        // event loop
        // run until:
        // 1. the run control is set to false
        // 2. the tripwire condition returns false
        // 3. the program completes or faults
        // 4. any of the breakpoints are hit
        let result = loop {
            if !self.running.load(Ordering::Relaxed) {
                break Ok(PauseCondition::Stopped);
            }
            if !tripwire(self) {
                break Ok(PauseCondition::Tripwire);
            }

            match self.step_inner() {
                Ok(()) => {},
                Err(StepBreak::Exit(_)) => break Ok(PauseCondition::Completed),
                Err(StepBreak::Err(e)) => break Err(self.fault(e)),
            }

            if self.breakpoints.iter().any(|bp| bp.check(self)) {
                break Ok(PauseCondition::Breakpoint);
            }
        };

        self.running.store(false, Ordering::Relaxed);
        let steps = self.instructions_run.wrapping_sub(start);
        match &result {
            Ok(cond) => info!("simulation paused ({cond:?}) at {:#010x} after {steps} steps", self.pc),
            Err(fault) => info!("simulation faulted after {steps} steps: {fault}"),
        }

        self.pause_condition = result?;
        Ok(())
    }

    /// Executes the program.
    ///
    /// This blocks until the program completes, a breakpoint is hit, or `max_steps` instructions have run
    /// (`None` means no limit).
    ///
    /// This returns whether the program completed.
    pub fn simulate(&mut self, max_steps: Option<u64>) -> Result<bool, SimFault> {
        let start = self.instructions_run;
        self.run_while(|sim| max_steps.map_or(true, |m| sim.instructions_run.wrapping_sub(start) < m))?;
        Ok(self.is_completed())
    }

    /// Executes the program on a worker thread.
    ///
    /// The simulator is moved onto the worker, so no other run can touch its state until
    /// it is given back by [`SimHandle::join`].
    ///
    /// The given breakpoints are added to the simulator's breakpoints.
    /// If `notify_steps` is set, a [`SimEvent::Step`] is sent before every instruction.
    /// Exactly one final event ([`SimEvent::Paused`], [`SimEvent::Completed`],
    /// [`SimEvent::Faulted`], or [`SimEvent::Stopped`]) is sent when the run ends.
    pub fn start_simulation(
        mut self,
        breakpoints: impl IntoIterator<Item=Breakpoint>,
        max_steps: Option<u64>,
        notify_steps: bool
    ) -> SimHandle {
        self.breakpoints.extend(breakpoints);

        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Relaxed);

        let (tx, rx) = cbc::unbounded();
        let thread = std::thread::spawn(move || {
            let start = self.instructions_run;
            let result = self.run_loop(|sim| {
                let within = max_steps.map_or(true, |m| sim.instructions_run.wrapping_sub(start) < m);
                if within && notify_steps {
                    // a dropped receiver just means nobody is listening
                    let _ = tx.send(SimEvent::Step { pc: sim.pc });
                }
                within
            });

            let event = match &result {
                Ok(()) => match self.pause_condition {
                    PauseCondition::Completed => SimEvent::Completed { exit_code: self.exit_code.unwrap_or(0) },
                    PauseCondition::Stopped => SimEvent::Stopped { pc: self.pc },
                    _ => SimEvent::Paused { pc: self.pc },
                },
                Err(fault) => SimEvent::Faulted(fault.clone()),
            };
            let _ = tx.send(event);

            let outcome = result.map(|()| self.is_completed());
            (self, outcome)
        });

        SimHandle { events: rx, running, thread }
    }

    /// Simulates one step, executing one instruction.
    ///
    /// Breakpoints are not checked.
    /// The observer is cleared and then records the changes of this instruction.
    ///
    /// This returns whether the program completed.
    pub fn step(&mut self) -> Result<bool, SimFault> {
        self.set_stepped(true);
        self.observer.clear();
        std::mem::take(&mut self.pause_condition);

        match self.step_inner() {
            Ok(()) => Ok(false),
            Err(StepBreak::Exit(_)) => {
                self.pause_condition = PauseCondition::Completed;
                Ok(true)
            },
            Err(StepBreak::Err(e)) => Err(self.fault(e)),
        }
    }

    /// Undoes the most recently executed instruction.
    ///
    /// All registers and memory words the instruction wrote are restored,
    /// and the PC is moved back to the instruction.
    /// Console IO is not undone.
    pub fn step_back(&mut self) -> BackStepResult {
        let Some(bs) = &mut self.backstepper else { return BackStepResult::Disabled };
        let Some(step) = bs.pop() else { return BackStepResult::NothingToUndo };

        self.set_stepped(true);
        self.observer.clear();
        self.undo(&step);

        self.instructions_run = self.instructions_run.saturating_sub(1);
        self.exit_code = None;
        std::mem::take(&mut self.pause_condition);

        trace!("back-stepped to {:#010x} ({} registers, {} words restored)", step.pc, step.regs.len(), step.mem.len());
        BackStepResult::Undone { pc: step.pc }
    }

    fn undo(&mut self, step: &BackStep) {
        for &(loc, old) in &step.regs {
            let access = Access::write(self.reg_file[loc], old);

            self.reg_file.set_loc(loc, old);
            self.observer.record(Location::Reg(loc), access);
        }
        for &(addr, old) in &step.mem {
            let access = Access::write(self.mem.read(addr, 4), old);

            self.mem.write(addr, 4, old);
            self.observer.record(Location::Mem(addr), access);
        }
        self.pc = step.pc;
    }

    /// Simulates one step, executing one instruction.
    ///
    /// On success, the instruction's back-step record is committed.
    /// On error, anything the instruction wrote is rolled back and the PC is left at the instruction.
    fn step_inner(&mut self) -> Result<(), StepBreak> {
        if let Some(code) = self.exit_code {
            return Err(StepBreak::Exit(code));
        }

        let pc = self.pc;
        let Some(statements) = &self.statements else {
            return Err(SimErr::NotLoaded.into());
        };
        if pc % 4 != 0 || !self.layout.in_text(pc) {
            return Err(SimErr::InvalidFetch(pc).into());
        }
        if statements.binary_search_by_key(&pc, |s| s.address()).is_err() {
            // dropped off the bottom
            trace!("no code at {pc:#010x}, program finished");
            self.exit_code = Some(0);
            return Err(StepBreak::Exit(0));
        }

        let word = self.mem.read(pc, 4);
        let instr = SimInstr::decode(word)?;
        trace!("{pc:#010x}: {word:#010x}  {instr}");

        if let Some(bs) = &mut self.backstepper {
            bs.begin(pc);
        }

        let exit = match self.execute(pc, instr) {
            Ok(next_pc) => {
                self.pc = next_pc;
                None
            },
            Err(StepBreak::Exit(code)) => {
                self.pc = pc.wrapping_add(4);
                self.exit_code = Some(code);
                Some(code)
            },
            Err(StepBreak::Err(e)) => {
                if let Some(partial) = self.backstepper.as_mut().and_then(BackStepper::abort) {
                    self.undo(&partial);
                }
                return Err(e.into());
            }
        };

        if let Some(bs) = &mut self.backstepper {
            bs.commit();
        }
        self.instructions_run = self.instructions_run.wrapping_add(1);

        match exit {
            Some(code) => Err(StepBreak::Exit(code)),
            None => Ok(()),
        }
    }

    /// Executes a decoded instruction, returning the next PC.
    fn execute(&mut self, pc: u32, instr: SimInstr) -> Result<u32, StepBreak> {
        let next = pc.wrapping_add(4);

        match instr {
            SimInstr::Alu(op, rd, rs, rt) => {
                let (a, b) = (self.reg(rs), self.reg(rt));
                let result = match op {
                    AluOp::Add  => (a as i32).checked_add(b as i32).ok_or(SimErr::ArithmeticOverflow)? as u32,
                    AluOp::Addu => a.wrapping_add(b),
                    AluOp::Sub  => (a as i32).checked_sub(b as i32).ok_or(SimErr::ArithmeticOverflow)? as u32,
                    AluOp::Subu => a.wrapping_sub(b),
                    AluOp::And  => a & b,
                    AluOp::Or   => a | b,
                    AluOp::Xor  => a ^ b,
                    AluOp::Nor  => !(a | b),
                    AluOp::Slt  => u32::from((a as i32) < (b as i32)),
                    AluOp::Sltu => u32::from(a < b),
                };
                self.set_gpr(rd, result);
            },
            SimInstr::Shift(op, rd, rt, sh) => {
                let value = self.reg(rt);
                self.set_gpr(rd, shift(op, value, u32::from(sh)));
            },
            SimInstr::ShiftV(op, rd, rt, rs) => {
                let value = self.reg(rt);
                let amount = self.reg(rs) & 0b11111;
                self.set_gpr(rd, shift(op, value, amount));
            },
            SimInstr::MulDiv(op, rs, rt) => {
                let (a, b) = (self.reg(rs), self.reg(rt));
                match op {
                    MulDivOp::Mult => {
                        let product = i64::from(a as i32) * i64::from(b as i32);
                        self.set_hilo((product >> 32) as u32, product as u32);
                    },
                    MulDivOp::Multu => {
                        let product = u64::from(a) * u64::from(b);
                        self.set_hilo((product >> 32) as u32, product as u32);
                    },
                    // division by zero leaves hi and lo alone
                    MulDivOp::Div if b != 0 => {
                        let (a, b) = (a as i32, b as i32);
                        self.set_hilo(a.wrapping_rem(b) as u32, a.wrapping_div(b) as u32);
                    },
                    MulDivOp::Divu if b != 0 => self.set_hilo(a % b, a / b),
                    MulDivOp::Div | MulDivOp::Divu => {},
                }
            },
            SimInstr::Mul(rd, rs, rt) => {
                let (a, b) = (self.reg(rs), self.reg(rt));
                self.set_gpr(rd, a.wrapping_mul(b));
            },
            SimInstr::MoveFrom(hl, rd) => {
                let loc = hilo_loc(hl);
                self.observer.record(Location::Reg(loc), Access::read());
                let value = self.reg_file[loc];
                self.set_gpr(rd, value);
            },
            SimInstr::MoveTo(hl, rs) => {
                let value = self.reg(rs);
                self.set_reg(hilo_loc(hl), value);
            },
            SimInstr::Jr(rs) => return Ok(self.reg(rs)),
            SimInstr::Jalr(rd, rs) => {
                let target = self.reg(rs);
                self.set_gpr(rd, next);
                return Ok(target);
            },
            SimInstr::Syscall => self.syscall()?,
            SimInstr::Break(code) => return Err(SimErr::Break(code).into()),
            SimInstr::AluImm(op, rt, rs, imm) => {
                let a = self.reg(rs);
                let sext = imm as i16 as i32 as u32;
                let zext = u32::from(imm);
                let result = match op {
                    ImmOp::Addi  => (a as i32).checked_add(sext as i32).ok_or(SimErr::ArithmeticOverflow)? as u32,
                    ImmOp::Addiu => a.wrapping_add(sext),
                    ImmOp::Slti  => u32::from((a as i32) < (sext as i32)),
                    ImmOp::Sltiu => u32::from(a < sext),
                    ImmOp::Andi  => a & zext,
                    ImmOp::Ori   => a | zext,
                    ImmOp::Xori  => a ^ zext,
                };
                self.set_gpr(rt, result);
            },
            SimInstr::Lui(rt, imm) => self.set_gpr(rt, u32::from(imm) << 16),
            SimInstr::Load(op, rt, base, off) => {
                let addr = self.reg(base).wrapping_add_signed(i32::from(off));
                let raw = self.read_mem(addr, op.width())?;
                let value = match op {
                    LoadOp::Lb => raw as u8 as i8 as i32 as u32,
                    LoadOp::Lh => raw as u16 as i16 as i32 as u32,
                    LoadOp::Lw | LoadOp::Lbu | LoadOp::Lhu => raw,
                };
                self.set_gpr(rt, value);
            },
            SimInstr::Store(op, rt, base, off) => {
                let addr = self.reg(base).wrapping_add_signed(i32::from(off));
                let value = self.reg(rt);
                self.write_mem(addr, op.width(), value)?;
            },
            SimInstr::Branch(cond, rs, rt, off) => {
                let (a, b) = (self.reg(rs), self.reg(rt));
                let taken = match cond {
                    BranchCond::Eq => a == b,
                    BranchCond::Ne => a != b,
                };
                if taken {
                    return Ok(branch_target(next, off));
                }
            },
            SimInstr::ZBranch(cond, rs, off) => {
                if cond.check(self.reg(rs)) {
                    return Ok(branch_target(next, off));
                }
            },
            SimInstr::Jump { link, index } => {
                if link {
                    self.set_gpr(Reg::RA, next);
                }
                return Ok((next & 0xF000_0000) | (index << 2));
            },
        }

        Ok(next)
    }

    fn print(&self, text: &str) {
        self.io.print(text.as_bytes());
    }

    /// Executes the syscall selected by `$v0`.
    fn syscall(&mut self) -> Result<(), StepBreak> {
        let service = self.reg(Reg::V0);
        let a0 = self.reg(Reg::A0);

        match service {
            // print int
            1 => self.print(&(a0 as i32).to_string()),
            // print string
            4 => {
                let mut bytes = vec![];
                for i in 0..MAX_PRINT_LEN {
                    let addr = a0.wrapping_add(i);
                    match self.read_mem(addr, 1)? as u8 {
                        0 => break,
                        b => bytes.push(b),
                    }
                }
                self.io.print(&bytes);
            },
            // read int
            5 => {
                let line = self.io.read_line().ok_or(SimErr::InvalidInput)?;
                let value: i32 = String::from_utf8_lossy(&line).trim()
                    .parse()
                    .map_err(|_| SimErr::InvalidInput)?;
                self.set_gpr(Reg::V0, value as u32);
            },
            // read string (fgets semantics)
            8 => {
                let max = self.reg(Reg::A1) as i32;
                if max < 1 { return Ok(()) };

                let capacity = (max - 1) as usize;
                let mut bytes = match capacity {
                    0 => vec![],
                    _ => self.io.read_line().unwrap_or_default(),
                };
                if bytes.len() < capacity {
                    bytes.push(b'\n');
                }
                bytes.truncate(capacity);
                bytes.push(0);

                for (i, b) in (0..).zip(bytes) {
                    self.write_mem(a0.wrapping_add(i), 1, u32::from(b))?;
                }
            },
            // exit
            10 => return Err(StepBreak::Exit(0)),
            // print char
            11 => {
                self.io.print(&[a0 as u8]);
            },
            // read char
            12 => {
                let b = self.io.read_byte().ok_or(SimErr::InvalidInput)?;
                self.set_gpr(Reg::V0, u32::from(b));
            },
            // exit2
            17 => return Err(StepBreak::Exit(a0 as i32)),
            // print int hex
            34 => self.print(&format!("{a0:#010x}")),
            // print int binary
            35 => self.print(&format!("{a0:032b}")),
            // print int unsigned
            36 => self.print(&a0.to_string()),
            _ => return Err(SimErr::InvalidSyscall(service).into()),
        }

        Ok(())
    }
}

fn shift(op: ShiftOp, value: u32, amount: u32) -> u32 {
    match op {
        ShiftOp::Sll => value << amount,
        ShiftOp::Srl => value >> amount,
        ShiftOp::Sra => ((value as i32) >> amount) as u32,
    }
}
fn branch_target(next: u32, off: i16) -> u32 {
    next.wrapping_add_signed(i32::from(off) << 2)
}
fn hilo_loc(hl: HiLo) -> RegLoc {
    match hl {
        HiLo::Hi => RegLoc::Hi,
        HiLo::Lo => RegLoc::Lo,
    }
}

/// Notifications sent by a run started with [`Simulator::start_simulation`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SimEvent {
    /// The instruction at this address is about to execute.
    Step {
        /// Address of the instruction.
        pc: u32
    },
    /// The run paused on a breakpoint or the step limit. The run can be resumed.
    Paused {
        /// The PC when paused.
        pc: u32
    },
    /// The program completed.
    Completed {
        /// The program's exit code.
        exit_code: i32
    },
    /// The run ended with a fault.
    Faulted(SimFault),
    /// The run was stopped by [`SimHandle::stop`].
    Stopped {
        /// The PC when stopped.
        pc: u32
    },
}

/// A handle to a run started with [`Simulator::start_simulation`].
pub struct SimHandle {
    events: cbc::Receiver<SimEvent>,
    running: Arc<AtomicBool>,
    thread: JoinHandle<(Simulator, Result<bool, SimFault>)>,
}
impl SimHandle {
    /// The channel of events from the run.
    pub fn events(&self) -> &cbc::Receiver<SimEvent> {
        &self.events
    }

    /// Requests that the run stops.
    ///
    /// The run stops between instructions, never in the middle of one.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Whether the run has ended.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the run to end, giving back the simulator and whether the program completed.
    pub fn join(self) -> (Simulator, Result<bool, SimFault>) {
        match self.thread.join() {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::backstep::BackStepResult;
    use super::debug::{Breakpoint, Comparator};
    use super::io::BufferedIO;
    use super::mem::RegLoc;
    use super::observer::Location;
    use super::{SimErr, SimEvent, SimFlags, Simulator};
    use crate::asm::{assemble, AsmFlags};
    use crate::ast::Reg;
    use crate::program::Program;

    fn load(src: &str) -> Simulator {
        load_with(src, SimFlags::default())
    }
    fn load_with(src: &str, flags: SimFlags) -> Simulator {
        let mut programs = [Program::from_source("test.s", src)];
        let asm = assemble(&mut programs, AsmFlags::default())
            .unwrap_or_else(|e| panic!("failed to assemble:\n{e}"));
        let mut sim = Simulator::new(flags);
        sim.load_program(&asm);
        sim
    }
    fn with_output(sim: &mut Simulator) -> BufferedIO {
        let io = BufferedIO::new();
        sim.io = io.clone().into();
        io
    }

    #[test]
    fn test_arithmetic() {
        let mut sim = load("
            li   $t0, -7
            li   $t1, 3
            add  $t2, $t0, $t1
            subu $t3, $t1, $t0
            slt  $t4, $t0, $t1
            sltu $t5, $t0, $t1
            sra  $t6, $t0, 1
            srl  $t7, $t0, 28
            nor  $s0, $zero, $zero
        ");
        assert!(sim.simulate(None).unwrap());
        assert_eq!(sim.reg_file[Reg::T2] as i32, -4);
        assert_eq!(sim.reg_file[Reg::T3], 10);
        assert_eq!(sim.reg_file[Reg::T4], 1);
        assert_eq!(sim.reg_file[Reg::T5], 0);
        assert_eq!(sim.reg_file[Reg::T6] as i32, -4);
        assert_eq!(sim.reg_file[Reg::T7], 0xF);
        assert_eq!(sim.reg_file[Reg::S0], u32::MAX);
    }

    #[test]
    fn test_mul_div() {
        let mut sim = load("
            li    $t0, -6
            li    $t1, 4
            mult  $t0, $t1
            mfhi  $s0
            mflo  $s1
            div   $t0, $t1
            mfhi  $s2
            mflo  $s3
            mul   $s4, $t0, $t1
            li    $t2, 9
            mtlo  $t2
            div   $t0, $zero
            mflo  $s5
        ");
        sim.simulate(None).unwrap();
        assert_eq!(sim.reg_file[Reg::S0], u32::MAX);
        assert_eq!(sim.reg_file[Reg::S1] as i32, -24);
        assert_eq!(sim.reg_file[Reg::S2] as i32, -2);
        assert_eq!(sim.reg_file[Reg::S3] as i32, -1);
        assert_eq!(sim.reg_file[Reg::S4] as i32, -24);
        // division by zero leaves lo alone
        assert_eq!(sim.reg_file[Reg::S5], 9);
    }

    #[test]
    fn test_memory() {
        let mut sim = load("
            .data
        word: .word 0x80FF0102
            .text
            la  $t0, word
            lw  $t1, 0($t0)
            lb  $t2, 3($t0)
            lbu $t3, 3($t0)
            lh  $t4, 2($t0)
            sh  $t1, 4($t0)
            lw  $t5, 4($t0)
        ");
        sim.simulate(None).unwrap();
        assert_eq!(sim.reg_file[Reg::T1], 0x80FF_0102);
        assert_eq!(sim.reg_file[Reg::T2], 0xFFFF_FF80);
        assert_eq!(sim.reg_file[Reg::T3], 0x80);
        assert_eq!(sim.reg_file[Reg::T4], 0xFFFF_80FF);
        assert_eq!(sim.reg_file[Reg::T5], 0x0102);
    }

    #[test]
    fn test_branches_and_jumps() {
        let mut sim = load("
                li   $t0, 0
                li   $t1, 5
        loop:   addi $t0, $t0, 1
                bne  $t0, $t1, loop
                jal  func
                j    end
        func:   li   $s0, 99
                jr   $ra
        end:    li   $v0, 10
                syscall
        ");
        assert!(sim.simulate(None).unwrap());
        assert_eq!(sim.reg_file[Reg::T0], 5);
        assert_eq!(sim.reg_file[Reg::S0], 99);
        assert_eq!(sim.exit_code(), Some(0));
    }

    #[test]
    fn test_completion() {
        // dropping off the bottom
        let mut sim = load("nop");
        assert!(sim.simulate(None).unwrap());
        assert_eq!(sim.instructions_run, 1);

        // exit2
        let mut sim = load("
            li $a0, 3
            li $v0, 17
            syscall
            li $t0, 1
        ");
        assert!(sim.simulate(None).unwrap());
        assert_eq!(sim.exit_code(), Some(3));
        assert_eq!(sim.reg_file[Reg::T0], 0);

        // running again does nothing
        assert!(sim.simulate(None).unwrap());
        assert_eq!(sim.instructions_run, 3);
    }

    #[test]
    fn test_step_limit() {
        let mut sim = load("
        loop: addi $t0, $t0, 1
              j loop
        ");
        assert!(!sim.simulate(Some(10)).unwrap());
        assert_eq!(sim.instructions_run, 10);
        assert_eq!(sim.reg_file[Reg::T0], 5);
    }

    #[test]
    fn test_faults() {
        let mut sim = load("
            li  $t0, 0x7FFFFFFF
            addi $t0, $t0, 1
        ");
        let fault = sim.simulate(None).unwrap_err();
        assert_eq!(fault.kind, SimErr::ArithmeticOverflow);
        assert_eq!(fault.pc, 0x0040_0008);
        assert!(fault.instruction.is_some());
        assert_eq!(sim.reg_file[Reg::T0], 0x7FFF_FFFF);

        let mut sim = load("
            li $t0, 0x10010001
            lw $t1, 0($t0)
        ");
        let fault = sim.simulate(None).unwrap_err();
        assert_eq!(fault.kind, SimErr::AddressAlign(0x1001_0001));

        let mut sim = load("
            li $t0, 0x10010000
            jr $t0
        ");
        let fault = sim.simulate(None).unwrap_err();
        assert_eq!(fault.kind, SimErr::InvalidFetch(0x1001_0000));
        assert_eq!(fault.instruction, None);

        let mut sim = load("li $v0, 99\nsyscall");
        assert_eq!(sim.simulate(None).unwrap_err().kind, SimErr::InvalidSyscall(99));

        let mut sim = Simulator::new(Default::default());
        assert_eq!(sim.step().unwrap_err().kind, SimErr::NotLoaded);
    }

    #[test]
    fn test_fault_keeps_history() {
        let mut sim = load("
            li  $t0, 1
            break
        ");
        assert_eq!(sim.simulate(None).unwrap_err().kind, SimErr::Break(0));
        assert_eq!(sim.backstepper().map(|b| b.len()), Some(1));
        assert_eq!(sim.step_back(), BackStepResult::Undone { pc: 0x0040_0000 });
        assert_eq!(sim.reg_file[Reg::T0], 0);
    }

    #[test]
    fn test_back_step_round_trip() {
        let src = "
            .data
        buf: .space 8
            .text
            la   $s0, buf
            li   $t0, 0x12345678
            sw   $t0, 0($s0)
            sb   $t0, 5($s0)
            mult $t0, $t0
            jal  func
            li   $v0, 10
            syscall
        func: addi $sp, $sp, -4
            sw   $ra, 0($sp)
            lw   $ra, 0($sp)
            addi $sp, $sp, 4
            jr   $ra
        ";
        let mut sim = load(src);
        let before_regs = sim.reg_file.clone();
        let before_pc = sim.pc;
        let buf = sim.mem.read(0x1001_0000, 4);

        assert!(sim.simulate(None).unwrap());
        let n = sim.instructions_run;
        assert_ne!(sim.reg_file, before_regs);

        for _ in 0..n {
            assert!(matches!(sim.step_back(), BackStepResult::Undone { .. }));
        }
        assert_eq!(sim.step_back(), BackStepResult::NothingToUndo);
        assert_eq!(sim.reg_file, before_regs);
        assert_eq!(sim.pc, before_pc);
        assert_eq!(sim.mem.read(0x1001_0000, 4), buf);
        assert_eq!(sim.mem.read(0x1001_0004, 4), 0);
        assert_eq!(sim.exit_code(), None);
        assert_eq!(sim.instructions_run, 0);
    }

    #[test]
    fn test_back_step_disabled() {
        let mut sim = load_with("nop", SimFlags { back_stepping: false, ..Default::default() });
        sim.step().unwrap();
        assert_eq!(sim.step_back(), BackStepResult::Disabled);

        let mut sim = Simulator::new(Default::default());
        assert_eq!(sim.step_back(), BackStepResult::Disabled);
    }

    #[test]
    fn test_reload_clears_history() {
        let mut programs = [Program::from_source("test.s", "li $t0, 1\nli $t0, 2")];
        let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
        let mut sim = Simulator::new(Default::default());
        sim.load_program(&asm);
        sim.step().unwrap();
        assert_eq!(sim.backstepper().map(|b| b.len()), Some(1));

        let mut programs = [Program::from_source("test.s", "li $t1, 3")];
        let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
        sim.load_program(&asm);
        assert_eq!(sim.backstepper().map(|b| b.len()), Some(0));
        assert_eq!(sim.step_back(), BackStepResult::NothingToUndo);
        assert_eq!(sim.pc, 0x0040_0000);
    }

    #[test]
    fn test_back_step_limit() {
        let mut sim = load_with("
        loop: addi $t0, $t0, 1
              j loop
        ", SimFlags { back_step_limit: 3, ..Default::default() });
        sim.simulate(Some(10)).unwrap();
        for _ in 0..3 {
            assert!(matches!(sim.step_back(), BackStepResult::Undone { .. }));
        }
        assert_eq!(sim.step_back(), BackStepResult::NothingToUndo);
        assert_eq!(sim.reg_file[Reg::T0], 4);
    }

    #[test]
    fn test_breakpoints() {
        let mut sim = load("
            li $t0, 1
            li $t0, 2
            li $t0, 3
            li $t0, 4
        ");
        sim.breakpoints.insert(Breakpoint::reg(Reg::T0, Comparator::Eq(3)));
        assert!(!sim.simulate(None).unwrap());
        assert!(sim.hit_breakpoint());
        assert_eq!(sim.pc, 0x0040_000C);

        // resuming moves past the breakpoint
        sim.breakpoints.clear();
        assert!(sim.simulate(None).unwrap());
        assert_eq!(sim.reg_file[Reg::T0], 4);
    }

    #[test]
    fn test_observer() {
        let mut sim = load("
            li $t0, 5
            li $t1, 0x10010000
            sw $t0, 0($t1)
        ");
        sim.simulate(Some(3)).unwrap();
        assert_eq!(sim.observer.iter().count(), 0);

        sim.step().unwrap();
        assert!(sim.is_stepped());
        assert!(sim.observer.get(Location::Mem(0x1001_0000)).modified);
        assert!(sim.observer.get(Location::Reg(RegLoc::Gpr(Reg::T1))).read);
        assert_eq!(sim.observer.modified().collect::<Vec<_>>(), [Location::Mem(0x1001_0000)]);

        sim.step_back();
        assert!(sim.observer.get(Location::Mem(0x1001_0000)).modified);
    }

    #[test]
    fn test_syscall_io() {
        let mut sim = load("
            .data
        buf: .space 8
            .text
            li $v0, 8
            la $a0, buf
            li $a1, 8
            syscall
            li $v0, 4
            syscall
            li $v0, 12
            syscall
            move $a0, $v0
            li $v0, 11
            syscall
            li $a0, -1
            li $v0, 36
            syscall
            li $a0, 255
            li $v0, 34
            syscall
        ");
        let io = with_output(&mut sim);
        io.push_input(b"hey\nZ");
        assert!(sim.simulate(None).unwrap());
        assert_eq!(
            String::from_utf8_lossy(&io.take_output()),
            "hey\nZ42949672950x000000ff"
        );

        let mut sim = load("li $v0, 5\nsyscall");
        assert_eq!(sim.simulate(None).unwrap_err().kind, SimErr::InvalidInput);
    }

    #[test]
    fn test_read_string_at_end_of_memory() {
        // only the terminator fits
        let mut sim = load("li $a0, -1\nli $a1, 1\nli $v0, 8\nsyscall");
        with_output(&mut sim);
        assert!(sim.simulate(None).unwrap());
        assert_eq!(sim.mem.read_byte(0xFFFF_FFFF), 0);

        // the rest wraps to address 0
        let mut sim = load("li $a0, -1\nli $a1, 3\nli $v0, 8\nsyscall");
        let io = with_output(&mut sim);
        io.push_input(b"ab\n");
        assert!(sim.simulate(None).unwrap());
        assert_eq!(sim.mem.read_byte(0xFFFF_FFFF), b'a');
        assert_eq!(sim.mem.read_byte(0x0000_0000), b'b');
        assert_eq!(sim.mem.read_byte(0x0000_0001), 0);
    }

    #[test]
    fn test_start_at_main() {
        let src = "
            .globl main
            li $t0, 1
        main:
            li $t1, 2
        ";
        let sim = load_with(src, SimFlags { start_at_main: true, ..Default::default() });
        assert_eq!(sim.pc, 0x0040_0004);
        let sim = load(src);
        assert_eq!(sim.pc, 0x0040_0000);
    }

    #[test]
    fn test_threaded() {
        let sim = load("
            li $t0, 1
            li $t0, 2
            li $t0, 3
        ");
        let handle = sim.start_simulation([Breakpoint::PC(0x0040_0008)], None, true);
        let events = handle.events().clone();
        let (sim, outcome) = handle.join();
        assert_eq!(outcome, Ok(false));
        assert!(sim.hit_breakpoint());
        assert_eq!(sim.reg_file[Reg::T0], 2);

        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(events, vec![
            SimEvent::Step { pc: 0x0040_0000 },
            SimEvent::Step { pc: 0x0040_0004 },
            SimEvent::Paused { pc: 0x0040_0008 },
        ]);
    }

    #[test]
    fn test_threaded_stop() {
        let sim = load("
        loop: j loop
        ");
        let handle = sim.start_simulation([], None, false);
        handle.stop();
        let events = handle.events().clone();
        let (mut sim, outcome) = handle.join();
        assert_eq!(outcome, Ok(false));
        assert_eq!(events.recv(), Ok(SimEvent::Stopped { pc: sim.pc }));

        // the simulator can be driven again after joining
        let before = sim.instructions_run;
        assert!(!sim.simulate(Some(4)).unwrap());
        assert_eq!(sim.instructions_run, before + 4);
    }

    #[test]
    fn test_threaded_completion() {
        let sim = load("
            li $a0, 7
            li $v0, 17
            syscall
        ");
        let handle = sim.start_simulation([], Some(100), false);
        let events = handle.events().clone();
        let (sim, outcome) = handle.join();
        assert_eq!(outcome, Ok(true));
        assert_eq!(sim.exit_code(), Some(7));
        assert_eq!(events.try_iter().last(), Some(SimEvent::Completed { exit_code: 7 }));
    }
}
