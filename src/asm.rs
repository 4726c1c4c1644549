//! Assembling tokenized translation units into machine statements.
//!
//! This module is used to convert a program set (a slice of [`Program`]s, in assembly order)
//! into an [`AssembledProgram`], which can be loaded into the simulator.
//!
//! The assembler module notably consists of:
//! - [`assemble`]: the main function, which runs both passes over the whole program set.
//! - [`SymbolTable`]: a mapping from label names to addresses. Each unit has a local table,
//!     and `.globl` symbols are moved into a shared global table.
//! - [`ProgramStatement`]: one resolved machine word, paired with the source line it came from.
//! - [`AssembledProgram`]: the output of assembly.
//! - [`macros`] and [`lower`]: macro expansion and the instruction set description.
//!
//! Assembly is all-or-nothing. Every diagnostic from every unit is collected into one [`ErrorList`];
//! if any of them is an error (or a warning, if [`AsmFlags::warnings_are_errors`] is set),
//! no machine statements are produced.
//!
//! ```
//! use mips_ensemble::asm::{assemble, AsmFlags};
//! use mips_ensemble::program::Program;
//!
//! let src = "
//!     .data
//! msg: .asciiz \"hi\"
//!     .text
//! main:
//!     la $a0, msg
//!     li $v0, 4
//!     syscall
//! ";
//! let mut programs = [Program::from_source("main.s", src)];
//! let asm = assemble(&mut programs, AsmFlags::default()).unwrap();
//!
//! assert_eq!(asm.statements().len(), 4);
//! assert_eq!(asm.lookup_symbol("msg", "main.s"), Some(0x1001_0000));
//! assert!(programs[0].machine_list().is_some());
//! ```

pub mod lower;
pub mod macros;

use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::debug;

use crate::ast::asm::{AsmInstr, Operand};
use crate::ast::sim::SimInstr;
use crate::ast::{fits_i16, fits_u16};
use crate::err::{ErrorKind, ErrorList};
use crate::parse::{parse_stmt, StmtKind, TokenList};
use crate::program::{Program, SourceLine};
use macros::MacroPool;

/// Flags which change how assembly is performed.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct AsmFlags {
    /// Whether pseudo-instructions (and basic mnemonics with operands that need expansion) are allowed.
    ///
    /// If false, any instruction which doesn't map to exactly one machine instruction is an error.
    ///
    /// This is true by default.
    pub extended_instructions: bool,

    /// Whether any warning should cause assembly to fail.
    ///
    /// This is false by default.
    pub warnings_are_errors: bool,

    /// The memory layout to assemble into.
    pub layout: MemoryLayout,
}
impl Default for AsmFlags {
    fn default() -> Self {
        Self {
            extended_instructions: true,
            warnings_are_errors: false,
            layout: MemoryLayout::default(),
        }
    }
}

/// The base addresses of each memory segment.
///
/// The default layout puts text at `0x0040_0000` and data at `0x1001_0000`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub struct MemoryLayout {
    pub text_base: u32,
    /// The first address past the user text segment.
    pub text_limit: u32,
    pub extern_base: u32,
    pub global_pointer: u32,
    pub data_base: u32,
    pub stack_pointer: u32,
    pub ktext_base: u32,
    /// The first address past the kernel text segment.
    pub ktext_limit: u32,
    pub kdata_base: u32,
}
impl Default for MemoryLayout {
    fn default() -> Self {
        Self {
            text_base:      0x0040_0000,
            text_limit:     0x1000_0000,
            extern_base:    0x1000_0000,
            global_pointer: 0x1000_8000,
            data_base:      0x1001_0000,
            stack_pointer:  0x7fff_effc,
            ktext_base:     0x8000_0000,
            ktext_limit:    0x9000_0000,
            kdata_base:     0x9000_0000,
        }
    }
}
impl MemoryLayout {
    /// Whether the address lies in the user or kernel text segment.
    pub fn in_text(&self, addr: u32) -> bool {
        (self.text_base..self.text_limit).contains(&addr)
            || (self.ktext_base..self.ktext_limit).contains(&addr)
    }
}

/// Kinds of errors from resolving symbols.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum SymbolErr {
    /// A label was defined twice within the same table.
    Duplicate {
        /// The label.
        name: String,
        /// The line of the first definition.
        first_line: usize,
        /// The line of the second definition.
        second_line: usize,
    },
    /// A label was used but never defined.
    Undefined(String),
    /// A label was declared `.globl` but not defined in the same file.
    UndefinedGlobal(String),
    /// A label was made global by two different files.
    DuplicateGlobal {
        /// The label.
        name: String,
        /// The file which first made it global.
        first_file: String,
    },
}
impl std::fmt::Display for SymbolErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolErr::Duplicate { name, first_line, second_line } => write!(f, "label {name} was defined multiple times (lines {first_line} and {second_line})"),
            SymbolErr::Undefined(name)       => write!(f, "symbol {name} is undefined"),
            SymbolErr::UndefinedGlobal(name) => write!(f, "symbol {name} was declared global but is not defined in this file"),
            SymbolErr::DuplicateGlobal { name, first_file } => write!(f, "global symbol {name} was already defined in {first_file}"),
        }
    }
}
impl std::error::Error for SymbolErr {}
impl crate::err::Error for SymbolErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            SymbolErr::Duplicate { .. }       => Some("labels must be unique within a file, try renaming one of the labels".into()),
            SymbolErr::Undefined(_)           => Some("check the spelling, or declare the label .globl in the file that defines it".into()),
            SymbolErr::UndefinedGlobal(_)     => Some(".globl must be in the same file as the label's definition".into()),
            SymbolErr::DuplicateGlobal { .. } => Some("only one file may export a given global label".into()),
        }
    }
}

/// Kinds of errors from encoding instructions and directives.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum EncodeErr {
    /// The mnemonic is not an instruction.
    UnknownInstruction(String),
    /// The directive does not exist.
    UnknownDirective(String),
    /// The directive exists but is not supported by this assembler.
    UnsupportedDirective(String),
    /// The operands don't match any form of the instruction.
    InvalidOperands {
        /// The instruction.
        mnemonic: String
    },
    /// The instruction form is a pseudo-instruction, and extended instructions are disabled.
    ExtendedNotAllowed {
        /// The instruction.
        mnemonic: String
    },
    /// An immediate does not fit its field, and extended instructions are disabled.
    ImmOutOfRange {
        /// The instruction.
        mnemonic: String,
        /// The offending immediate.
        value: i64
    },
    /// A branch target is too far away.
    BranchOutOfRange(String),
    /// A jump target is in a different 256 MiB region.
    JumpOutOfRange(String),
    /// An instruction was placed in `.data` or `.kdata`.
    InstrInDataSegment,
    /// A data directive was placed in `.text` or `.ktext`.
    DataInTextSegment,
    /// A directive's arguments are malformed.
    InvalidDirectiveArgs {
        /// The directive (without the dot).
        directive: String
    },
    /// A token appeared where it was not expected.
    UnexpectedToken,
    /// Two statements were assigned the same address.
    AddressConflict(u32),
    /// Data starting at this address runs past the end of memory.
    AddressOverflow(u32),
}
impl std::fmt::Display for EncodeErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeErr::UnknownInstruction(mn)   => write!(f, "unknown instruction {mn}"),
            EncodeErr::UnknownDirective(d)      => write!(f, "unknown directive .{d}"),
            EncodeErr::UnsupportedDirective(d)  => write!(f, "directive .{d} is not supported"),
            EncodeErr::InvalidOperands { mnemonic } => write!(f, "invalid operands for {mnemonic}"),
            EncodeErr::ExtendedNotAllowed { mnemonic } => write!(f, "{mnemonic} is an extended (pseudo) instruction and extended instructions are disabled"),
            EncodeErr::ImmOutOfRange { mnemonic, value } => write!(f, "immediate {value} is out of range for {mnemonic}"),
            EncodeErr::BranchOutOfRange(l)      => write!(f, "branch target {l} is out of range"),
            EncodeErr::JumpOutOfRange(l)        => write!(f, "jump target {l} is out of range"),
            EncodeErr::InstrInDataSegment       => f.write_str("instructions cannot be placed in a data segment"),
            EncodeErr::DataInTextSegment        => f.write_str("data directives cannot be placed in a text segment"),
            EncodeErr::InvalidDirectiveArgs { directive } => write!(f, "invalid arguments for .{directive}"),
            EncodeErr::UnexpectedToken          => f.write_str("unexpected token"),
            EncodeErr::AddressConflict(addr)    => write!(f, "address {addr:#010x} was written more than once"),
            EncodeErr::AddressOverflow(addr)    => write!(f, "data at {addr:#010x} runs past the end of memory"),
        }
    }
}
impl std::error::Error for EncodeErr {}
impl crate::err::Error for EncodeErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            EncodeErr::ExtendedNotAllowed { .. } => Some("enable extended instructions, or write out the basic instructions".into()),
            EncodeErr::ImmOutOfRange { .. }      => Some("immediates must fit in 16 bits (shift amounts in 5 bits)".into()),
            EncodeErr::BranchOutOfRange(_)       => Some("branches can only reach 32768 instructions in either direction; try a jump".into()),
            EncodeErr::JumpOutOfRange(_)         => Some("jumps can only reach the same 256 MiB region; try jr".into()),
            EncodeErr::InstrInDataSegment        => Some("add .text before this instruction".into()),
            EncodeErr::DataInTextSegment         => Some("add .data before this directive".into()),
            EncodeErr::AddressConflict(_)        => Some("try moving the starting address of one of these segments".into()),
            EncodeErr::AddressOverflow(_)        => Some("try moving the starting address of this segment down".into()),
            EncodeErr::UnsupportedDirective(_)   => Some("this assembler does not support floating point or file inclusion".into()),
            _ => None,
        }
    }
}

/// Warnings from assembly.
///
/// These do not cause assembly to fail unless [`AsmFlags::warnings_are_errors`] is set.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum AsmWarning {
    /// `.set` has no effect.
    SetIgnored,
    /// A `.byte` or `.half` value did not fit and was truncated.
    ValueTruncated {
        /// The directive (without the dot).
        directive: String,
        /// The value as written.
        value: i64
    },
    /// A segment directive was followed by nothing before the next segment directive (or the end of the file).
    EmptySegment {
        /// The directive (without the dot).
        directive: String
    },
}
impl std::fmt::Display for AsmWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsmWarning::SetIgnored => f.write_str(".set is ignored"),
            AsmWarning::ValueTruncated { directive, value } => write!(f, "value {value} was truncated to fit .{directive}"),
            AsmWarning::EmptySegment { directive } => write!(f, ".{directive} has no effect"),
        }
    }
}
impl std::error::Error for AsmWarning {}
impl crate::err::Error for AsmWarning {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            AsmWarning::SetIgnored => None,
            AsmWarning::ValueTruncated { .. } => Some("use .word for values which need 32 bits".into()),
            AsmWarning::EmptySegment { .. } => Some("remove this directive".into()),
        }
    }
}

/// Whether a symbol is visible only in its own file or in every file.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SymbolKind {
    /// Visible in the defining file.
    Local,
    /// Visible in every file (declared with `.globl` or `.extern`).
    Global,
}

/// A defined label.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Symbol {
    /// The address of the label.
    pub address: u32,
    /// The file the label was defined in.
    pub file: Arc<str>,
    /// The line the label was defined on.
    pub line: usize,
    /// The visibility of the label.
    pub kind: SymbolKind,
}

/// A mapping from label names to [`Symbol`]s.
///
/// Each table has a scope (the filename of its unit, or `"(global)"`).
/// Names are unique within a table. Label names are case-sensitive.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SymbolTable {
    scope: Arc<str>,
    map: HashMap<String, Symbol>,
}
impl SymbolTable {
    /// Creates an empty table.
    pub fn new(scope: Arc<str>) -> Self {
        Self { scope, map: HashMap::new() }
    }

    /// The scope of this table.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Adds a symbol.
    ///
    /// This fails if the name is already in the table. The existing entry is kept.
    pub fn add(&mut self, name: impl Into<String>, symbol: Symbol) -> Result<(), SymbolErr> {
        match self.map.entry(name.into()) {
            Entry::Occupied(e) => Err(SymbolErr::Duplicate {
                name: e.key().clone(),
                first_line: e.get().line,
                second_line: symbol.line
            }),
            Entry::Vacant(e) => {
                e.insert(symbol);
                Ok(())
            },
        }
    }

    /// Adds a global symbol, failing if another file already exported the name.
    fn add_global(&mut self, name: String, symbol: Symbol) -> Result<(), SymbolErr> {
        match self.map.entry(name) {
            Entry::Occupied(e) => Err(SymbolErr::DuplicateGlobal {
                name: e.key().clone(),
                first_file: e.get().file.to_string()
            }),
            Entry::Vacant(e) => {
                e.insert(symbol);
                Ok(())
            },
        }
    }

    /// Gets a symbol by name.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.map.get(name)
    }

    /// Gets the address of a symbol.
    pub fn address_of(&self, name: &str) -> Option<u32> {
        self.lookup(name).map(|s| s.address)
    }

    /// Finds the name of a symbol at a given address.
    ///
    /// If several symbols share the address, the alphabetically first is returned.
    pub fn rev_lookup(&self, address: u32) -> Option<&str> {
        self.map.iter()
            .filter(|(_, s)| s.address == address)
            .map(|(n, _)| n.as_str())
            .min()
    }

    /// Removes a symbol.
    pub fn remove(&mut self, name: &str) -> Option<Symbol> {
        self.map.remove(name)
    }

    /// Iterates over all symbols (in no particular order).
    pub fn iter(&self) -> impl Iterator<Item=(&str, &Symbol)> + '_ {
        self.map.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// The number of symbols.
    pub fn len(&self) -> usize {
        self.map.len()
    }
    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// One machine word of assembled code.
///
/// A pseudo-instruction produces several statements, which all share its source line and tokens.
/// Statements are only constructed once their encoding is resolved.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ProgramStatement {
    source: Arc<SourceLine>,
    tokens: Arc<TokenList>,
    address: u32,
    binary: u32,
    instr: SimInstr,
}
impl ProgramStatement {
    /// The source line this statement was assembled from.
    ///
    /// For statements produced by a macro, this is the line of the invocation.
    pub fn source(&self) -> &SourceLine {
        &self.source
    }
    /// The tokens this statement was assembled from.
    pub fn tokens(&self) -> &TokenList {
        &self.tokens
    }
    /// The address of this statement.
    pub fn address(&self) -> u32 {
        self.address
    }
    /// The encoded machine word.
    pub fn binary(&self) -> u32 {
        self.binary
    }
    /// The decoded instruction.
    pub fn instr(&self) -> SimInstr {
        self.instr
    }
    /// The basic (real) instruction, as assembly text.
    pub fn basic(&self) -> String {
        self.instr.to_string()
    }
}

/// A contiguous block of initialized data.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DataChunk {
    /// The address of the first byte.
    pub address: u32,
    /// The bytes.
    pub bytes: Vec<u8>,
}

/// The result of assembling a program set.
#[derive(Debug)]
pub struct AssembledProgram {
    statements: Arc<[ProgramStatement]>,
    data: Vec<DataChunk>,
    globals: SymbolTable,
    locals: Vec<SymbolTable>,
    warnings: ErrorList,
    layout: MemoryLayout,
}
impl AssembledProgram {
    /// The machine statements, in address order.
    pub fn statements(&self) -> &[ProgramStatement] {
        &self.statements
    }
    pub(crate) fn shared_statements(&self) -> &Arc<[ProgramStatement]> {
        &self.statements
    }
    /// The initialized data blocks, in address order.
    pub fn data(&self) -> &[DataChunk] {
        &self.data
    }
    /// The global symbol table.
    pub fn global_symbols(&self) -> &SymbolTable {
        &self.globals
    }
    /// The local symbol table of a unit.
    pub fn local_symbols(&self, filename: &str) -> Option<&SymbolTable> {
        self.locals.iter().find(|t| t.scope() == filename)
    }
    /// The warnings raised during assembly.
    pub fn warnings(&self) -> &ErrorList {
        &self.warnings
    }
    /// The memory layout this was assembled into.
    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }
    /// Finds the statement at an address.
    pub fn statement_at(&self, address: u32) -> Option<&ProgramStatement> {
        self.statements.binary_search_by_key(&address, |s| s.address)
            .ok()
            .map(|i| &self.statements[i])
    }
    /// Finds the address of a symbol as seen from a unit.
    ///
    /// The unit's local table is searched first, then the global table.
    pub fn lookup_symbol(&self, name: &str, filename: &str) -> Option<u32> {
        self.local_symbols(filename)
            .and_then(|t| t.address_of(name))
            .or_else(|| self.globals.address_of(name))
    }
}

/// Assembles a program set.
///
/// The programs must be given in assembly order (see [`order_for_assembly`]).
/// Programs which have not been tokenized are tokenized first.
///
/// On success, every program holds the shared machine statement list and its local symbol table.
/// On failure, every program's machine statement list is cleared
/// and all diagnostics (including warnings) are returned.
///
/// [`order_for_assembly`]: crate::program::order_for_assembly
pub fn assemble(programs: &mut [Program], flags: AsmFlags) -> Result<AssembledProgram, ErrorList> {
    debug!("assembling {} unit(s)", programs.len());

    let mut asm = Assembler::new(flags);
    let mut units = Vec::with_capacity(programs.len());
    for program in programs.iter_mut() {
        if program.tokens().is_none() {
            if let Err(e) = program.tokenize() {
                asm.errors.extend(e);
                continue;
            }
        }

        let mut pool = MacroPool::new();
        let lines = pool.process(program.tokens().unwrap_or_default(), &mut asm.errors);
        program.set_local_macro_pool(pool);

        units.push(asm.first_pass(Arc::from(program.filename()), lines));
    }
    debug!("pass 1 complete ({} instruction(s), {} global symbol(s))", asm.instrs.len(), asm.globals.len());

    let statements = asm.second_pass(&units);
    let data = asm.data_chunks();

    let failed = asm.errors.has_errors()
        || (flags.warnings_are_errors && asm.errors.warning_count() > 0);
    if failed {
        debug!("assembly failed ({} error(s), {} warning(s))", asm.errors.error_count(), asm.errors.warning_count());
        for program in programs.iter_mut() {
            program.set_machine_list(None);
        }
        return Err(asm.errors);
    }

    let statements: Arc<[ProgramStatement]> = statements.into();
    for program in programs.iter_mut() {
        program.set_machine_list(Some(Arc::clone(&statements)));
        if let Some(table) = units.iter().find(|t| t.scope() == program.filename()) {
            program.set_local_symbols(table.clone());
        }
    }
    debug!("assembled {} statement(s), {} warning(s)", statements.len(), asm.errors.warning_count());

    Ok(AssembledProgram {
        statements,
        data,
        globals: asm.globals,
        locals: units,
        warnings: asm.errors,
        layout: flags.layout,
    })
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Segment {
    Text,
    Data,
    KText,
    KData,
}
impl Segment {
    fn from_directive(d: &str) -> Option<Self> {
        match d {
            "text"  => Some(Segment::Text),
            "data"  => Some(Segment::Data),
            "ktext" => Some(Segment::KText),
            "kdata" => Some(Segment::KData),
            _ => None,
        }
    }
    fn is_text(self) -> bool {
        matches!(self, Segment::Text | Segment::KText)
    }
    fn index(self) -> usize {
        self as usize
    }
}

/// An instruction which has been placed but not yet resolved.
struct PendingInstr {
    unit: usize,
    source: Arc<SourceLine>,
    tokens: Arc<TokenList>,
    column: usize,
    address: u32,
    instr: AsmInstr,
}
/// A `.word` referring to a label.
struct Fixup {
    unit: usize,
    source: Arc<SourceLine>,
    column: usize,
    address: u32,
    label: crate::ast::asm::LabelRef,
}

/// State shared across every unit of a program set.
struct Assembler {
    flags: AsmFlags,
    errors: ErrorList,
    /// Location counters, indexed by [`Segment::index`]. These carry over from unit to unit.
    counters: [u32; 4],
    extern_next: u32,
    globals: SymbolTable,
    instrs: Vec<PendingInstr>,
    data: BTreeMap<u32, u8>,
    fixups: Vec<Fixup>,
    next_unit: usize,
}

/// State for one unit during pass 1.
struct Unit {
    index: usize,
    locals: SymbolTable,
    segment: Segment,
    /// Labels waiting for the address of the next piece of content.
    pending: Vec<(String, Arc<SourceLine>, usize)>,
    globls: Vec<(String, Arc<SourceLine>, usize)>,
    /// The last segment directive, if nothing has been placed since.
    unused_segment: Option<(String, Arc<SourceLine>, usize)>,
}

impl Assembler {
    fn new(flags: AsmFlags) -> Self {
        let l = flags.layout;
        Self {
            flags,
            errors: ErrorList::new(),
            counters: [l.text_base, l.data_base, l.ktext_base, l.kdata_base],
            extern_next: l.extern_base,
            globals: SymbolTable::new(Arc::from("(global)")),
            instrs: vec![],
            data: BTreeMap::new(),
            fixups: vec![],
            next_unit: 0,
        }
    }

    fn report(&mut self, kind: impl Into<ErrorKind>, source: &SourceLine, column: usize) {
        self.errors.add(kind, source.filename_arc(), source.line(), column);
    }

    /// Pass 1: places every instruction and data item of a unit and collects its symbols.
    fn first_pass(&mut self, filename: Arc<str>, lines: Vec<TokenList>) -> SymbolTable {
        let mut unit = Unit {
            index: self.next_unit,
            locals: SymbolTable::new(filename),
            segment: Segment::Text,
            pending: vec![],
            globls: vec![],
            unused_segment: None,
        };

        for line in lines {
            let line = Arc::new(line);
            let source = Arc::clone(line.source());
            let stmt = match parse_stmt(&line) {
                Ok(stmt) => stmt,
                Err((e, span)) => {
                    self.report(e, &source, span.start + 1);
                    continue;
                }
            };

            for (name, span) in stmt.labels {
                unit.unused_segment = None;
                unit.pending.push((name, Arc::clone(&source), span.start + 1));
            }

            let column = stmt.span.start + 1;
            match stmt.nucleus {
                None => {},
                Some(StmtKind::Instr { mnemonic, operands }) => {
                    self.place_instr(&mut unit, &line, column, &mnemonic, &operands);
                },
                Some(StmtKind::Directive { name, args }) => {
                    self.directive(&mut unit, &source, column, &name, &args);
                },
            }
        }

        let here = self.counters[unit.segment.index()];
        self.flush_labels(&mut unit, here);
        self.check_unused_segment(&mut unit);
        self.export_globals(&mut unit);
        self.next_unit += 1;
        unit.locals
    }

    /// Assigns every pending label to an address.
    fn flush_labels(&mut self, unit: &mut Unit, address: u32) {
        for (name, source, column) in std::mem::take(&mut unit.pending) {
            let symbol = Symbol { address, file: Arc::clone(source.filename_arc()), line: source.line(), kind: SymbolKind::Local };
            if let Err(e) = unit.locals.add(name, symbol) {
                self.report(e, &source, column);
            }
        }
    }

    fn check_unused_segment(&mut self, unit: &mut Unit) {
        if let Some((directive, source, column)) = unit.unused_segment.take() {
            self.report(AsmWarning::EmptySegment { directive }, &source, column);
        }
    }

    /// Moves `.globl` symbols from the unit's local table into the global table.
    fn export_globals(&mut self, unit: &mut Unit) {
        for (name, source, column) in std::mem::take(&mut unit.globls) {
            if self.globals.lookup(&name).is_some_and(|s| s.file == *source.filename_arc()) {
                // declared twice in the same file
                continue;
            }
            let Some(mut symbol) = unit.locals.remove(&name) else {
                self.report(SymbolErr::UndefinedGlobal(name), &source, column);
                continue;
            };
            symbol.kind = SymbolKind::Global;

            if let Err(e) = self.globals.add_global(name, symbol) {
                self.report(e, &source, column);
            }
        }
    }

    fn place_instr(&mut self, unit: &mut Unit, line: &Arc<TokenList>, column: usize, mnemonic: &str, operands: &[Operand]) {
        let source = line.source();
        if !unit.segment.is_text() {
            self.report(EncodeErr::InstrInDataSegment, source, column);
            return;
        }

        let instrs = match lower::lower(mnemonic, operands, self.flags.extended_instructions) {
            Ok(instrs) => instrs,
            Err(e) => {
                self.report(e, source, column);
                return;
            }
        };

        let seg = unit.segment.index();
        self.counters[seg] = align(self.counters[seg], 4);
        unit.unused_segment = None;
        self.flush_labels(unit, self.counters[seg]);

        for instr in instrs {
            self.instrs.push(PendingInstr {
                unit: unit.index,
                source: Arc::clone(source),
                tokens: Arc::clone(line),
                column,
                address: self.counters[seg],
                instr,
            });
            self.counters[seg] = self.counters[seg].wrapping_add(4);
        }
    }

    fn directive(&mut self, unit: &mut Unit, source: &Arc<SourceLine>, column: usize, name: &str, args: &[Operand]) {
        let invalid = || EncodeErr::InvalidDirectiveArgs { directive: name.to_string() };

        if let Some(segment) = Segment::from_directive(name) {
            let here = self.counters[unit.segment.index()];
            self.flush_labels(unit, here);
            self.check_unused_segment(unit);

            match *args {
                [] => {},
                [Operand::Imm(addr)] if u32::try_from(addr).is_ok() && (!segment.is_text() || addr % 4 == 0) => {
                    self.counters[segment.index()] = addr as u32;
                },
                _ => return self.report(invalid(), source, column),
            }
            unit.segment = segment;
            unit.unused_segment = Some((name.to_string(), Arc::clone(source), column));
            return;
        }

        match name {
            "globl" | "global" => {
                for arg in args {
                    match arg {
                        Operand::Label(l) if l.offset == 0 => unit.globls.push((l.name.clone(), Arc::clone(source), column)),
                        _ => return self.report(invalid(), source, column),
                    }
                }
                if args.is_empty() {
                    self.report(invalid(), source, column);
                }
            },
            "extern" => match args {
                [Operand::Label(l), Operand::Imm(size)] if l.offset == 0 && *size > 0 && *size <= 0x8000 => {
                    let symbol = Symbol {
                        address: self.extern_next,
                        file: Arc::clone(source.filename_arc()),
                        line: source.line(),
                        kind: SymbolKind::Global,
                    };
                    match self.globals.add_global(l.name.clone(), symbol) {
                        Ok(()) => self.extern_next = align(self.extern_next.wrapping_add(*size as u32), 4),
                        Err(e) => self.report(e, source, column),
                    }
                },
                _ => self.report(invalid(), source, column),
            },
            "set" => self.report(AsmWarning::SetIgnored, source, column),
            "include" | "float" | "double" => self.report(EncodeErr::UnsupportedDirective(name.to_string()), source, column),
            "align" | "word" | "half" | "byte" | "ascii" | "asciiz" | "space" => {
                if unit.segment.is_text() {
                    return self.report(EncodeErr::DataInTextSegment, source, column);
                }
                unit.unused_segment = None;
                self.data_directive(unit, source, column, name, args);
            },
            _ => self.report(EncodeErr::UnknownDirective(name.to_string()), source, column),
        }
    }

    fn data_directive(&mut self, unit: &mut Unit, source: &Arc<SourceLine>, column: usize, name: &str, args: &[Operand]) {
        let invalid = || EncodeErr::InvalidDirectiveArgs { directive: name.to_string() };
        let seg = unit.segment.index();

        match name {
            "align" => match *args {
                [Operand::Imm(n)] if (0..=3).contains(&n) => {
                    self.counters[seg] = align(self.counters[seg], 1 << n);
                    self.flush_labels(unit, self.counters[seg]);
                },
                _ => self.report(invalid(), source, column),
            },
            "space" => match *args {
                [Operand::Imm(n)] if u32::try_from(n).is_ok() => {
                    self.flush_labels(unit, self.counters[seg]);
                    self.counters[seg] = self.counters[seg].wrapping_add(n as u32);
                },
                _ => self.report(invalid(), source, column),
            },
            "ascii" | "asciiz" => {
                self.flush_labels(unit, self.counters[seg]);
                for arg in args {
                    let Operand::Str(s) = arg else {
                        return self.report(invalid(), source, column);
                    };
                    let mut bytes = s.as_bytes().to_vec();
                    if name == "asciiz" {
                        bytes.push(0);
                    }
                    self.emit(seg, &bytes, source, column);
                }
            },
            "word" => {
                self.counters[seg] = align(self.counters[seg], 4);
                self.flush_labels(unit, self.counters[seg]);
                for arg in args {
                    match arg {
                        Operand::Imm(n) => self.emit(seg, &(*n as u32).to_le_bytes(), source, column),
                        Operand::Label(label) => {
                            self.fixups.push(Fixup {
                                unit: unit.index,
                                source: Arc::clone(source),
                                column,
                                address: self.counters[seg],
                                label: label.clone(),
                            });
                            self.emit(seg, &[0; 4], source, column);
                        },
                        _ => return self.report(invalid(), source, column),
                    }
                }
            },
            "half" | "byte" => {
                let width: u32 = if name == "half" { 2 } else { 1 };
                self.counters[seg] = align(self.counters[seg], width);
                self.flush_labels(unit, self.counters[seg]);
                for arg in args {
                    let &Operand::Imm(n) = arg else {
                        return self.report(invalid(), source, column);
                    };
                    let fits = match width {
                        2 => fits_i16(n) || fits_u16(n),
                        _ => (-128..=255).contains(&n),
                    };
                    if !fits {
                        self.report(AsmWarning::ValueTruncated { directive: name.to_string(), value: n }, source, column);
                    }
                    let bytes = (n as u32).to_le_bytes();
                    self.emit(seg, &bytes[..width as usize], source, column);
                }
            },
            _ => unreachable!("data_directive called with non-data directive"),
        }
    }

    /// Writes bytes at the segment's location counter and advances it.
    fn emit(&mut self, seg: usize, bytes: &[u8], source: &SourceLine, column: usize) {
        let start = self.counters[seg];
        if u64::from(start) + bytes.len() as u64 > 1 << 32 {
            self.report(EncodeErr::AddressOverflow(start), source, column);
            return;
        }

        let mut conflict = false;
        for (i, &b) in (0..).zip(bytes) {
            conflict |= self.data.insert(start.wrapping_add(i), b).is_some();
        }
        if conflict {
            self.report(EncodeErr::AddressConflict(start), source, column);
        }
        self.counters[seg] = start.wrapping_add(bytes.len() as u32);
    }

    /// Pass 2: resolves every placed instruction and `.word` label.
    fn second_pass(&mut self, units: &[SymbolTable]) -> Vec<ProgramStatement> {
        let globals = &self.globals;
        let lookup = |unit: usize, name: &str| {
            units.get(unit)
                .and_then(|t| t.address_of(name))
                .or_else(|| globals.address_of(name))
        };

        let mut statements = Vec::with_capacity(self.instrs.len());
        let mut errors = vec![];
        for p in std::mem::take(&mut self.instrs) {
            match p.instr.into_sim_instr(p.address, |name| lookup(p.unit, name)) {
                Ok(instr) => statements.push(ProgramStatement {
                    source: p.source,
                    tokens: p.tokens,
                    address: p.address,
                    binary: instr.encode(),
                    instr,
                }),
                Err(e) => errors.push((e, p.source, p.column)),
            }
        }

        for f in std::mem::take(&mut self.fixups) {
            match lookup(f.unit, &f.label.name) {
                Some(addr) => {
                    let value = addr.wrapping_add(f.label.offset as u32);
                    for (i, b) in (0..).zip(value.to_le_bytes()) {
                        self.data.insert(f.address.wrapping_add(i), b);
                    }
                },
                None => errors.push((SymbolErr::Undefined(f.label.name).into(), f.source, f.column)),
            }
        }

        statements.sort_by_key(|s| s.address);
        for pair in statements.windows(2) {
            if pair[0].address == pair[1].address {
                errors.push((EncodeErr::AddressConflict(pair[1].address).into(), Arc::clone(&pair[1].source), pair[1].tokens.column()));
            }
        }

        for (e, source, column) in errors {
            self.report(e, &source, column);
        }
        statements
    }

    /// Groups the data image into contiguous chunks.
    fn data_chunks(&self) -> Vec<DataChunk> {
        let mut chunks: Vec<DataChunk> = vec![];
        for (&addr, &b) in &self.data {
            match chunks.last_mut() {
                Some(c) if c.address.wrapping_add(c.bytes.len() as u32) == addr => c.bytes.push(b),
                _ => chunks.push(DataChunk { address: addr, bytes: vec![b] }),
            }
        }
        chunks
    }
}

fn align(addr: u32, to: u32) -> u32 {
    let mask = to - 1;
    addr.wrapping_add(mask) & !mask
}
