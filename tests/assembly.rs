use std::path::{Path, PathBuf};

use mips_ensemble::asm::{assemble, AsmFlags, EncodeErr, SymbolErr};
use mips_ensemble::ast::Reg;
use mips_ensemble::err::ErrorKind;
use mips_ensemble::program::{order_for_assembly, prepare_files_for_assembly, Program};
use mips_ensemble::sim::Simulator;
use pretty_assertions::assert_eq;

/// A scratch directory which is deleted when dropped.
struct Scratch(PathBuf);
impl Scratch {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("mips-ensemble-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }
    fn write(&self, file: &str, contents: &str) -> String {
        let path = self.0.join(file);
        std::fs::write(&path, contents).unwrap();
        path_str(&path)
    }
}
impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}
fn path_str(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

#[test]
fn files_are_ordered_for_assembly() {
    let order = order_for_assembly(&["c.s", "a.s", "c.s"], "a.s", Some("h.s"));
    assert_eq!(order, ["h.s", "a.s", "c.s"]);

    let order = order_for_assembly(&["c.s", "a.s"], "a.s", None);
    assert_eq!(order, ["a.s", "c.s"]);

    // an empty handler name is the same as no handler
    let order = order_for_assembly(&["c.s", "a.s"], "a.s", Some(""));
    assert_eq!(order, ["a.s", "c.s"]);
}

#[test]
fn multi_file_program_from_disk() {
    let dir = Scratch::new("multi");
    let handler = dir.write("h.s", ".ktext 0x80000180\nhandler: nop\n");
    let lead = dir.write("a.s", ".globl main\nmain:\n  jal helper\n  li $v0, 10\n  syscall\n");
    let other = dir.write("c.s", ".globl helper\nhelper:\n  li $s0, 42\n  jr $ra\n");

    let mut programs = prepare_files_for_assembly(&[other.as_str(), lead.as_str()], &lead, Some(handler.as_str())).unwrap();
    let names: Vec<_> = programs.iter().map(|p| p.filename().to_string()).collect();
    assert_eq!(names, [handler.clone(), lead.clone(), other.clone()]);
    assert_eq!(programs[2].source_line(3), Some("  li $s0, 42"));

    let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
    assert_eq!(asm.global_symbols().address_of("main"), Some(0x0040_0000));
    assert_eq!(asm.global_symbols().address_of("helper"), Some(0x0040_000C));
    assert_eq!(asm.lookup_symbol("handler", &handler), Some(0x8000_0180));
    assert_eq!(asm.lookup_symbol("handler", &lead), None);

    let mut sim = Simulator::new(Default::default());
    sim.load_program(&asm);
    assert_eq!(sim.simulate(None), Ok(true));
    assert_eq!(sim.reg_file[Reg::S0], 42);
    assert_eq!(sim.exit_code(), Some(0));
}

#[test]
fn missing_files_are_all_reported() {
    let dir = Scratch::new("missing");
    let lead = dir.write("a.s", "nop\n");
    let gone1 = path_str(&dir.0.join("gone1.s"));
    let gone2 = path_str(&dir.0.join("gone2.s"));

    let errors = prepare_files_for_assembly(&[gone1.as_str(), gone2.as_str()], &lead, None).unwrap_err();
    assert_eq!(errors.error_count(), 2);
    assert!(errors.iter().all(|m| matches!(m.kind, ErrorKind::Read(_))));
}

#[test]
fn duplicate_label_blocks_machine_list() {
    let mut programs = [Program::from_source("loop.s", "loop:\n  addi $t0, $t0, 1\nloop:\n  j loop\n")];
    let errors = assemble(&mut programs, AsmFlags::default()).unwrap_err();

    let kinds: Vec<_> = errors.errors().map(|m| &m.kind).collect();
    assert!(matches!(
        kinds[..],
        [ErrorKind::Symbol(SymbolErr::Duplicate { name, first_line: 1, second_line: 3 })] if name == "loop"
    ));
    assert!(programs[0].machine_list().is_none());
}

#[test]
fn large_immediate_needs_extended_instructions() {
    let src = "  li $t0, 0x10000\n";

    let mut programs = [Program::from_source("li.s", src)];
    let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
    let basics: Vec<_> = asm.statements().iter().map(|s| s.basic().to_string()).collect();
    assert_eq!(basics.len(), 2);
    // both expanded instructions point back at the same source line
    assert!(asm.statements().iter().all(|s| s.source().line() == 1));

    let flags = AsmFlags { extended_instructions: false, ..Default::default() };
    let mut programs = [Program::from_source("li.s", src)];
    let errors = assemble(&mut programs, flags).unwrap_err();
    let kinds: Vec<_> = errors.iter().map(|m| &m.kind).collect();
    assert!(matches!(
        kinds[..],
        [ErrorKind::Encode(EncodeErr::ExtendedNotAllowed { mnemonic })] if mnemonic == "li"
    ));
}

#[test]
fn warnings_follow_policy() {
    let src = ".text\n  nop\n.data\n";

    let mut programs = [Program::from_source("warn.s", src)];
    let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
    assert_eq!(asm.warnings().warning_count(), 1);
    assert!(programs[0].machine_list().is_some());

    let flags = AsmFlags { warnings_are_errors: true, ..Default::default() };
    let mut programs = [Program::from_source("warn.s", src)];
    let errors = assemble(&mut programs, flags).unwrap_err();
    assert_eq!(errors.error_count(), 0);
    assert_eq!(errors.warning_count(), 1);
    assert!(programs[0].machine_list().is_none());
}

#[test]
fn tokenize_is_repeatable() {
    let mut program = Program::from_source("t.s", "main: addi $t0, $zero, 1 # one\n\n  syscall\n");
    program.tokenize().unwrap();
    let first = program.tokens().map(<[_]>::to_vec);
    program.tokenize().unwrap();
    let second = program.tokens().map(<[_]>::to_vec);

    assert_eq!(first, second);
    assert_eq!(first.map(|t| t.len()), Some(3));
    assert_eq!(program.line_count(), 3);
    assert_eq!(program.source_line(0), None);
    assert_eq!(program.source_line(1), Some("main: addi $t0, $zero, 1 # one"));
    assert_eq!(program.source_line(4), None);
}
