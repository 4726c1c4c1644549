use mips_ensemble::asm::{assemble, AsmFlags, AssembledProgram};
use mips_ensemble::ast::Reg;
use mips_ensemble::program::Program;
use mips_ensemble::sim::backstep::BackStepResult;
use mips_ensemble::sim::debug::{Breakpoint, Comparator};
use mips_ensemble::sim::io::BufferedIO;
use mips_ensemble::sim::{SimFlags, Simulator};
use pretty_assertions::assert_eq;

const FILL: &str = "
    .data
buf: .space 16
    .text
    .globl main
main:
    la   $t0, buf
    li   $t1, 4
    li   $t2, 0
loop:
    sw   $t2, 0($t0)
    addi $t0, $t0, 4
    addi $t2, $t2, 3
    addi $t1, $t1, -1
    bnez $t1, loop
    li   $v0, 10
    syscall
";
const BUF: u32 = 0x1001_0000;

fn assemble_src(src: &str) -> AssembledProgram {
    let mut programs = [Program::from_source("test.s", src)];
    assemble(&mut programs, AsmFlags::default()).unwrap()
}
fn buf_words(sim: &Simulator) -> Vec<Option<u32>> {
    (0..4).map(|i| sim.mem.peek_word(BUF + 4 * i)).collect()
}

#[test]
fn back_step_restores_everything() {
    let asm = assemble_src(FILL);
    let mut sim = Simulator::new(Default::default());
    sim.load_program(&asm);

    let regs = sim.reg_file.clone();
    let pc = sim.pc;

    assert_eq!(sim.simulate(None), Ok(true));
    assert_eq!(sim.instructions_run, 26);
    assert_eq!(buf_words(&sim), [Some(0), Some(3), Some(6), Some(9)]);

    for _ in 0..26 {
        assert!(matches!(sim.step_back(), BackStepResult::Undone { .. }));
    }
    assert_eq!(sim.step_back(), BackStepResult::NothingToUndo);

    assert_eq!(sim.pc, pc);
    assert_eq!(sim.reg_file, regs);
    assert_eq!(sim.instructions_run, 0);
    assert_eq!(sim.exit_code(), None);
    assert_eq!(buf_words(&sim), [Some(0); 4]);

    // and it runs the same way again
    assert_eq!(sim.simulate(None), Ok(true));
    assert_eq!(buf_words(&sim), [Some(0), Some(3), Some(6), Some(9)]);
}

#[test]
fn steps_and_back_steps_interleave() {
    let asm = assemble_src(FILL);
    let mut sim = Simulator::new(Default::default());
    sim.load_program(&asm);

    for _ in 0..9 {
        assert_eq!(sim.step(), Ok(false));
    }
    let snapshot = (sim.pc, sim.reg_file.clone(), buf_words(&sim));

    for _ in 0..5 {
        sim.step().unwrap();
    }
    for _ in 0..5 {
        sim.step_back();
    }
    assert_eq!((sim.pc, sim.reg_file.clone(), buf_words(&sim)), snapshot);
}

#[test]
fn breakpoint_then_back_step() {
    let asm = assemble_src(FILL);
    let mut sim = Simulator::new(Default::default());
    sim.load_program(&asm);
    sim.breakpoints.insert(Breakpoint::reg(Reg::T2, Comparator::Eq(6)));

    assert_eq!(sim.simulate(None), Ok(false));
    assert!(sim.hit_breakpoint());
    // stopped right after the second `addi $t2, $t2, 3`
    assert_eq!(sim.pc, 0x0040_001C);
    assert_eq!(sim.reg_file[Reg::T2], 6);

    assert_eq!(sim.step_back(), BackStepResult::Undone { pc: 0x0040_0018 });
    assert_eq!(sim.reg_file[Reg::T2], 3);
    assert!(!sim.hit_breakpoint());

    sim.breakpoints.clear();
    assert_eq!(sim.simulate(None), Ok(true));
    assert_eq!(sim.reg_file[Reg::T2], 12);
}

#[test]
fn pc_breakpoint_then_back_step() {
    let asm = assemble_src(FILL);
    let mut sim = Simulator::new(Default::default());
    sim.load_program(&asm);
    // `addi $t1, $t1, -1`
    sim.breakpoints.insert(Breakpoint::PC(0x0040_001C));

    assert_eq!(sim.simulate(None), Ok(false));
    assert!(sim.hit_breakpoint());
    assert_eq!(sim.pc, 0x0040_001C);
    assert_eq!(sim.reg_file[Reg::T1], 4);
    assert_eq!(sim.reg_file[Reg::T2], 3);

    assert_eq!(sim.step_back(), BackStepResult::Undone { pc: 0x0040_0018 });
    assert_eq!(sim.pc, 0x0040_0018);
    assert_eq!(sim.reg_file[Reg::T2], 0);
    assert_eq!(buf_words(&sim), [Some(0); 4]);

    // redoing the undone instruction lands on the breakpoint again
    assert_eq!(sim.simulate(None), Ok(false));
    assert_eq!(sim.pc, 0x0040_001C);
    assert_eq!(sim.reg_file[Reg::T2], 3);

    // and resuming from it goes around the loop once
    assert_eq!(sim.simulate(None), Ok(false));
    assert_eq!(sim.pc, 0x0040_001C);
    assert_eq!(sim.reg_file[Reg::T2], 6);
    assert_eq!(sim.reg_file[Reg::T1], 3);
}

#[test]
fn back_stepping_disabled() {
    let asm = assemble_src(FILL);
    let flags = SimFlags { back_stepping: false, ..Default::default() };
    let mut sim = Simulator::new(flags);
    sim.load_program(&asm);

    sim.step().unwrap();
    assert_eq!(sim.step_back(), BackStepResult::Disabled);
    assert!(sim.backstepper().is_none());
}

#[test]
fn console_round_trip() {
    let src = "
        .data
    prompt: .asciiz \"n? \"
        .text
        la   $a0, prompt
        li   $v0, 4
        syscall
        li   $v0, 5
        syscall
        sll  $a0, $v0, 1
        li   $v0, 1
        syscall
        li   $a0, 3
        li   $v0, 17
        syscall
    ";
    let asm = assemble_src(src);

    let io = BufferedIO::with_input(b"21\n");

    let mut sim = Simulator::new(Default::default());
    sim.io = io.clone().into();
    sim.load_program(&asm);

    assert_eq!(sim.simulate(None), Ok(true));
    assert_eq!(sim.exit_code(), Some(3));
    assert_eq!(io.output(), b"n? 42");

    // back-stepping past a print does not take the output back
    sim.step_back();
    sim.step_back();
    assert_eq!(io.output(), b"n? 42");
}
