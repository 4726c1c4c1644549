//! A MIPS assembler and stepped simulator with back-stepping.
//!
//! This is meant to be a general suite to use MIPS (MARS-dialect) assembly:
//! reading and tokenizing source files, assembling one or more files together,
//! and executing the result one instruction at a time, forwards or backwards.
//!
//! # Usage
//!
//! To convert MIPS source code to machine statements, it must be assembled.
//! Every file is a [`Program`]; a set of programs is assembled together:
//! ```
//! use mips_ensemble::program::Program;
//! use mips_ensemble::asm::{assemble, AsmFlags};
//!
//! let code = "
//!     .text
//!     addi $t0, $zero, 7
//!     li   $v0, 10
//!     syscall
//! ";
//! let mut programs = [Program::from_source("main.s", code)];
//! let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
//! assert_eq!(asm.statements().len(), 3);
//! ```
//!
//! Files on disk are read with [`prepare_files_for_assembly`],
//! which also puts them in assembly order (exception handler, lead file, then the rest).
//!
//! Once a program set has been assembled, it can be executed with the simulator:
//! ```
//! # use mips_ensemble::program::Program;
//! # use mips_ensemble::asm::{assemble, AsmFlags};
//! # let code = "addi $t0, $zero, 7\nli $v0, 10\nsyscall";
//! # let mut programs = [Program::from_source("main.s", code)];
//! # let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
//! use mips_ensemble::sim::Simulator;
//! use mips_ensemble::ast::Reg;
//!
//! let mut simulator = Simulator::new(Default::default());
//! simulator.load_program(&asm);
//! simulator.simulate(None).unwrap(); // <-- Result can be handled accordingly
//! assert_eq!(simulator.reg_file[Reg::T0], 7);
//!
//! // Undo the last three instructions:
//! for _ in 0..3 {
//!     simulator.step_back();
//! }
//! assert_eq!(simulator.reg_file[Reg::T0], 0);
//! ```
//!
//! If more granularity is needed for simulation, there are also stepping and threaded execution functions.
//! See the [`sim`] module for more details.
//!
//! [`Program`]: program::Program
//! [`prepare_files_for_assembly`]: program::prepare_files_for_assembly
#![warn(missing_docs)]

pub mod err;
pub mod program;
pub mod parse;
pub mod ast;
pub mod asm;
pub mod sim;
