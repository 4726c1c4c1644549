//! Translation units and program sets.
//!
//! A [`Program`] is one translation unit: a source file's lines, its derived token lists,
//! its local symbol table, its macro pool, and (after assembly) the shared machine statement list.
//!
//! Several programs are assembled together as a program set.
//! The set is ordered with [`order_for_assembly`]: the exception handler (if any) first,
//! then the lead file, then the rest in the order given.
//! [`prepare_files_for_assembly`] reads and tokenizes every file of a set in that order.
//!
//! ```
//! use mips_ensemble::program::Program;
//!
//! let mut program = Program::from_source("main.s", "main:\n    li $v0, 10\n    syscall\n");
//! assert_eq!(program.line_count(), 3);
//! assert_eq!(program.source_line(2), Some("    li $v0, 10"));
//! assert_eq!(program.source_line(4), None);
//!
//! program.tokenize().unwrap();
//! assert_eq!(program.tokens().unwrap().len(), 3);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::asm::macros::MacroPool;
use crate::asm::{ProgramStatement, SymbolTable};
use crate::err::ErrorList;
use crate::parse::{TokenList, Tokenizer};

/// One line of source text.
///
/// Source lines are immutable once read and are shared (through [`Arc`])
/// by every token list and machine statement derived from them.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SourceLine {
    filename: Arc<str>,
    line: usize,
    text: String,
}
impl SourceLine {
    /// Creates a new source line.
    ///
    /// Line numbers are 1-based.
    pub fn new(filename: impl Into<Arc<str>>, line: usize, text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { filename: filename.into(), line, text: text.into() })
    }
    /// The file this line belongs to.
    pub fn filename(&self) -> &str {
        &self.filename
    }
    pub(crate) fn filename_arc(&self) -> &Arc<str> {
        &self.filename
    }
    /// The 1-based line number.
    pub fn line(&self) -> usize {
        self.line
    }
    /// The raw text of the line (without its line terminator).
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Error raised when a source file cannot be read.
#[derive(Debug)]
pub struct ReadErr {
    path: PathBuf,
    source: std::io::Error,
}
impl ReadErr {
    /// The path that could not be read.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
impl std::fmt::Display for ReadErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "could not read {}: {}", self.path.display(), self.source)
    }
}
impl std::error::Error for ReadErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
impl crate::err::Error for ReadErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self.source.kind() {
            std::io::ErrorKind::NotFound => Some("check that the file exists".into()),
            std::io::ErrorKind::PermissionDenied => Some("check that the file is readable".into()),
            std::io::ErrorKind::InvalidData => Some("source files must be UTF-8 text".into()),
            _ => None,
        }
    }
}

/// A translation unit.
///
/// The identity of a program is its filename.
#[derive(Debug)]
pub struct Program {
    filename: Arc<str>,
    source: Vec<Arc<SourceLine>>,
    tokens: Option<Vec<TokenList>>,
    local_symbols: SymbolTable,
    macro_pool: Option<MacroPool>,
    machine_list: Option<Arc<[ProgramStatement]>>,
}
impl Program {
    /// Creates an empty program with the given filename.
    pub fn new(filename: impl Into<Arc<str>>) -> Self {
        let filename = filename.into();
        Self {
            local_symbols: SymbolTable::new(Arc::clone(&filename)),
            filename,
            source: vec![],
            tokens: None,
            macro_pool: None,
            machine_list: None,
        }
    }

    /// Creates a program from in-memory source text.
    pub fn from_source(filename: impl Into<Arc<str>>, text: &str) -> Self {
        let mut program = Self::new(filename);
        program.set_source(text);
        program
    }

    /// Creates a program by reading a source file.
    ///
    /// See [`Program::read_source`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ErrorList> {
        let path = path.as_ref();
        let mut program = Self::new(path.to_string_lossy());
        program.read_source(path)?;
        Ok(program)
    }

    /// Reads every line of a source file into this program, replacing any prior content.
    ///
    /// The program's filename becomes the given path.
    /// If the file cannot be read, this fails with an error list holding a single [`ReadErr`].
    pub fn read_source(&mut self, path: impl AsRef<Path>) -> Result<(), ErrorList> {
        let path = path.as_ref();
        self.filename = Arc::from(path.to_string_lossy());

        match std::fs::read_to_string(path) {
            Ok(text) => {
                self.set_source(&text);
                Ok(())
            },
            Err(source) => {
                self.set_source("");
                let mut errors = ErrorList::new();
                errors.add(ReadErr { path: path.to_path_buf(), source }, &self.filename, 0, 0);
                Err(errors)
            }
        }
    }

    /// Replaces the source text of this program.
    ///
    /// All derived state (tokens, symbols, macros, machine list) is discarded.
    pub fn set_source(&mut self, text: &str) {
        self.source = text.lines()
            .enumerate()
            .map(|(i, line)| SourceLine::new(Arc::clone(&self.filename), i + 1, line))
            .collect();
        self.tokens = None;
        self.local_symbols = SymbolTable::new(Arc::clone(&self.filename));
        self.macro_pool = None;
        self.machine_list = None;
    }

    /// The filename of this program.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The source lines of this program.
    pub fn source_lines(&self) -> &[Arc<SourceLine>] {
        &self.source
    }
    /// The raw text of every source line, in order.
    pub fn source_list(&self) -> impl Iterator<Item=&str> + '_ {
        self.source.iter().map(|l| l.text())
    }
    /// The number of source lines.
    pub fn line_count(&self) -> usize {
        self.source.len()
    }
    /// Gets the text of a line (1-based), or `None` if the line does not exist.
    pub fn source_line(&self, line: usize) -> Option<&str> {
        let index = line.checked_sub(1)?;
        self.source.get(index).map(|l| l.text())
    }

    /// Tokenizes every source line of this program.
    ///
    /// Every lexical error in the program is reported, not just the first.
    /// On success, there is exactly one token list per source line
    /// and the local symbol table is reset to an empty table for this file.
    pub fn tokenize(&mut self) -> Result<(), ErrorList> {
        let mut tokenizer = Tokenizer::new();
        let mut errors = ErrorList::new();
        let mut tokens = Vec::with_capacity(self.source.len());

        for line in &self.source {
            match tokenizer.tokenize_line(line) {
                Ok(list) => tokens.push(list),
                Err(errs) => {
                    for (e, span) in errs {
                        errors.add(e, &self.filename, line.line(), span.start + 1);
                    }
                }
            }
        }

        if !errors.is_empty() {
            self.tokens = None;
            return Err(errors);
        }

        debug!("tokenized {} ({} lines)", self.filename, tokens.len());
        self.tokens = Some(tokens);
        self.local_symbols = SymbolTable::new(Arc::clone(&self.filename));
        Ok(())
    }

    /// The token lists of this program (one per source line), if it has been tokenized.
    pub fn tokens(&self) -> Option<&[TokenList]> {
        self.tokens.as_deref()
    }

    /// This program's local symbol table.
    ///
    /// This is empty until the program is assembled.
    pub fn local_symbols(&self) -> &SymbolTable {
        &self.local_symbols
    }
    pub(crate) fn set_local_symbols(&mut self, table: SymbolTable) {
        self.local_symbols = table;
    }

    /// Creates a new (empty) macro pool for this program, replacing any existing one.
    pub fn create_macro_pool(&mut self) -> &mut MacroPool {
        self.macro_pool.insert(MacroPool::new())
    }
    /// The macro pool of this program, if one has been created.
    pub fn local_macro_pool(&self) -> Option<&MacroPool> {
        self.macro_pool.as_ref()
    }
    /// Replaces the macro pool of this program.
    pub fn set_local_macro_pool(&mut self, pool: MacroPool) {
        self.macro_pool = Some(pool);
    }

    /// The machine statements of the program set this program was last assembled with.
    ///
    /// This is `None` if the program has not been assembled or if its last assembly failed.
    pub fn machine_list(&self) -> Option<&[ProgramStatement]> {
        self.machine_list.as_deref()
    }
    pub(crate) fn set_machine_list(&mut self, list: Option<Arc<[ProgramStatement]>>) {
        self.machine_list = list;
    }
}

/// Orders a set of files for assembly.
///
/// The exception handler (if given) is first, the lead file is next,
/// and the remaining files follow in the order they were given.
/// Duplicate names are only listed once.
///
/// ```
/// use mips_ensemble::program::order_for_assembly;
///
/// let order = order_for_assembly(&["c.s", "a.s"], "a.s", Some("h.s"));
/// assert_eq!(order, ["h.s", "a.s", "c.s"]);
/// ```
pub fn order_for_assembly<S: AsRef<str>>(filenames: &[S], lead: &str, handler: Option<&str>) -> Vec<String> {
    let handler = handler.filter(|h| !h.is_empty());

    let mut order: Vec<String> = vec![];
    let mut push = |name: &str| {
        if !order.iter().any(|n| n == name) {
            order.push(name.to_string());
        }
    };

    if let Some(h) = handler {
        push(h);
    }
    push(lead);
    for name in filenames {
        push(name.as_ref());
    }
    order
}

/// Reads and tokenizes every file of a program set, in assembly order
/// (see [`order_for_assembly`]).
///
/// Read and lexical errors from every file are collected into one list.
pub fn prepare_files_for_assembly<S: AsRef<str>>(filenames: &[S], lead: &str, handler: Option<&str>) -> Result<Vec<Program>, ErrorList> {
    let mut programs = vec![];
    let mut errors = ErrorList::new();

    for name in order_for_assembly(filenames, lead, handler) {
        let mut program = Program::new(name.as_str());
        let result = program.read_source(&name).and_then(|()| program.tokenize());
        match result {
            Ok(()) => programs.push(program),
            Err(e) => errors.extend(e),
        }
    }

    match errors.is_empty() {
        true  => Ok(programs),
        false => Err(errors),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{order_for_assembly, Program};
    use crate::err::ErrorKind;

    #[test]
    fn test_source_lines() {
        let program = Program::from_source("a.s", "one\r\ntwo\n\nfour");
        assert_eq!(program.line_count(), 4);
        assert_eq!(program.source_list().collect::<Vec<_>>(), ["one", "two", "", "four"]);
        assert_eq!(program.source_line(0), None);
        assert_eq!(program.source_line(1), Some("one"));
        assert_eq!(program.source_line(3), Some(""));
        assert_eq!(program.source_line(5), None);
        assert_eq!(program.source_lines()[1].line(), 2);
    }

    #[test]
    fn test_tokenize_mirrors_lines() {
        let mut program = Program::from_source("a.s", "# header\n\nmain: li $t0, 1\n");
        program.tokenize().unwrap();

        let tokens = program.tokens().unwrap();
        assert_eq!(tokens.len(), program.line_count());
        assert!(tokens[0].is_empty());
        assert!(tokens[1].is_empty());
        assert!(!tokens[2].is_empty());
    }

    #[test]
    fn test_tokenize_idempotent() {
        let mut program = Program::from_source("a.s", "loop: addi $t0, $t0, -1\n bne $t0, $zero, loop\n");
        program.tokenize().unwrap();
        let first = program.tokens().unwrap().to_vec();
        program.tokenize().unwrap();
        assert_eq!(program.tokens().unwrap(), &first[..]);
    }

    #[test]
    fn test_tokenize_collects_errors() {
        let mut program = Program::from_source("a.s", "add $t99, $t0, $t1\nnop\nli $t0, 0x\n");
        let errors = program.tokenize().unwrap_err();
        assert_eq!(errors.len(), 2);

        let lines: Vec<_> = errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, [1, 3]);
        assert!(program.tokens().is_none());
    }

    #[test]
    fn test_read_missing_file() {
        let mut program = Program::new("x");
        let errors = program.read_source("this/file/does/not/exist.s").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors.iter().next().map(|e| &e.kind), Some(ErrorKind::Read(_))));
        assert_eq!(program.line_count(), 0);
    }

    #[test]
    fn test_order() {
        assert_eq!(order_for_assembly(&["c.s", "a.s"], "a.s", Some("h.s")), ["h.s", "a.s", "c.s"]);
        assert_eq!(order_for_assembly(&["a.s", "c.s"], "a.s", Some("h.s")), ["h.s", "a.s", "c.s"]);
        assert_eq!(order_for_assembly(&["b.s", "a.s", "c.s"], "a.s", None), ["a.s", "b.s", "c.s"]);
        assert_eq!(order_for_assembly(&["a.s"], "a.s", Some("")), ["a.s"]);
    }
}
