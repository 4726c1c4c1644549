//! Tokenizing and parsing MIPS assembly.
//!
//! This module is used to convert source lines into token lists ([`TokenList`])
//! and token lists into statements ([`Stmt`]).
//!
//! This module consists of:
//! - [`lex`]: the logos lexer, which defines the tokens of MIPS assembly.
//! - [`Tokenizer`]: converts a unit's source lines into one [`TokenList`] per line,
//!     applying `.eqv` substitutions along the way.
//! - [`parse_stmt`]: converts one [`TokenList`] into a [`Stmt`] (labels and an optional instruction/directive).
//!
//! ```
//! use mips_ensemble::parse::{parse_stmt, StmtKind, Tokenizer};
//! use mips_ensemble::program::SourceLine;
//! use mips_ensemble::ast::asm::Operand;
//! use mips_ensemble::ast::Reg;
//!
//! let line = SourceLine::new("main.s", 1, "loop: addi $t0, $t0, 1  # increment");
//! let tokens = Tokenizer::new().tokenize_line(&line).unwrap();
//! let stmt = parse_stmt(&tokens).unwrap();
//!
//! assert_eq!(stmt.labels[0].0, "loop");
//! let Some(StmtKind::Instr { mnemonic, operands }) = stmt.nucleus else { panic!() };
//! assert_eq!(mnemonic, "addi");
//! assert_eq!(operands, [Operand::Reg(Reg::T0), Operand::Reg(Reg::T0), Operand::Imm(1)]);
//! ```
pub mod lex;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use logos::Logos;

use crate::asm::EncodeErr;
use crate::ast::asm::{LabelRef, Operand};
use crate::ast::Reg;
use crate::program::SourceLine;
use lex::{LexErr, Token};

/// A token with the column span (byte offsets within its line) it was lexed from.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct LexToken {
    /// The token.
    pub token: Token,
    /// The byte range of this token in its source line.
    pub span: Range<usize>,
}

/// The tokens of one source line.
///
/// Each token list keeps a reference to the source line it came from,
/// so diagnostics (including those from macro expansions) can point back at it.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TokenList {
    source: Arc<SourceLine>,
    tokens: Vec<LexToken>,
}
impl TokenList {
    /// Creates a token list for a source line.
    pub fn new(source: Arc<SourceLine>, tokens: Vec<LexToken>) -> Self {
        Self { source, tokens }
    }
    /// The source line these tokens are attributed to.
    pub fn source(&self) -> &Arc<SourceLine> {
        &self.source
    }
    /// The tokens.
    pub fn tokens(&self) -> &[LexToken] {
        &self.tokens
    }
    /// Whether there are no tokens (blank or comment-only lines).
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
    /// The 1-based column of the first token (or 0 if the list is empty).
    pub fn column(&self) -> usize {
        self.tokens.first().map_or(0, |t| t.span.start + 1)
    }
}

/// Converts source lines into [`TokenList`]s.
///
/// A tokenizer keeps the `.eqv` definitions seen so far,
/// so a fresh tokenizer should be used for each translation unit.
#[derive(Debug, Default)]
pub struct Tokenizer {
    eqvs: HashMap<String, Vec<Token>>,
}
impl Tokenizer {
    /// Creates a new tokenizer with no `.eqv` definitions.
    pub fn new() -> Self {
        Default::default()
    }

    /// Lexes a single line.
    ///
    /// Comments are discarded, so blank and comment-only lines yield an empty list.
    /// All lexical errors in the line are reported together.
    ///
    /// A line consisting of an `.eqv NAME value...` directive is consumed by the tokenizer
    /// (yielding an empty list); every later `NAME` identifier is replaced with the value tokens.
    pub fn tokenize_line(&mut self, line: &Arc<SourceLine>) -> Result<TokenList, Vec<(LexErr, Range<usize>)>> {
        let mut tokens = vec![];
        let mut errors = vec![];

        for (result, span) in Token::lexer(line.text()).spanned() {
            match result {
                Ok(Token::Comment) => {},
                Ok(token) => tokens.push(LexToken { token, span }),
                Err(e) => errors.push((e, span)),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        if let [LexToken { token: Token::Directive(d), span }, rest @ ..] = &tokens[..] {
            if d == "eqv" {
                self.define_eqv(rest, span.clone())?;
                return Ok(TokenList::new(Arc::clone(line), vec![]));
            }
        }

        let tokens = tokens.into_iter()
            .flat_map(|lt| match &lt.token {
                Token::Ident(id) => match self.eqvs.get(id) {
                    Some(value) => value.iter()
                        .map(|token| LexToken { token: token.clone(), span: lt.span.clone() })
                        .collect(),
                    None => vec![lt],
                },
                _ => vec![lt],
            })
            .collect();

        Ok(TokenList::new(Arc::clone(line), tokens))
    }

    fn define_eqv(&mut self, rest: &[LexToken], dir_span: Range<usize>) -> Result<(), Vec<(LexErr, Range<usize>)>> {
        let [LexToken { token: Token::Ident(name), span }, value @ ..] = rest else {
            return Err(vec![(LexErr::InvalidEqv, dir_span)]);
        };
        if value.is_empty() {
            return Err(vec![(LexErr::InvalidEqv, dir_span)]);
        }

        // Values may refer to earlier definitions.
        let value = value.iter()
            .flat_map(|lt| match &lt.token {
                Token::Ident(id) => self.eqvs.get(id).cloned().unwrap_or_else(|| vec![lt.token.clone()]),
                t => vec![t.clone()],
            })
            .collect();

        match self.eqvs.entry(name.clone()) {
            Entry::Occupied(_) => Err(vec![(LexErr::EqvRedefined, span.clone())]),
            Entry::Vacant(e) => {
                e.insert(value);
                Ok(())
            },
        }
    }
}

/// A parsed statement: its labels and what (if anything) follows them.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Stmt {
    /// Labels defined on this line, with their spans.
    pub labels: Vec<(String, Range<usize>)>,
    /// The instruction or directive on this line.
    pub nucleus: Option<StmtKind>,
    /// The span of the nucleus.
    pub span: Range<usize>,
}
/// An instruction or directive.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum StmtKind {
    /// An instruction (or pseudo-instruction) and its operands.
    Instr {
        /// The mnemonic, as written.
        mnemonic: String,
        /// The operands.
        operands: Vec<Operand>
    },
    /// A directive (without the dot, lowercase) and its arguments.
    Directive {
        /// The directive name.
        name: String,
        /// The arguments.
        args: Vec<Operand>
    },
}

/// Parses a token list into a statement.
///
/// On failure, this returns the error along with the span of the offending token.
pub fn parse_stmt(list: &TokenList) -> Result<Stmt, (EncodeErr, Range<usize>)> {
    let tokens = list.tokens();
    let mut labels = vec![];
    let mut i = 0;

    while let [LexToken { token: Token::Ident(name), span }, LexToken { token: Token::Colon, .. }, ..] = &tokens[i..] {
        labels.push((name.clone(), span.clone()));
        i += 2;
    }

    let Some(head) = tokens.get(i) else {
        return Ok(Stmt { labels, nucleus: None, span: 0..0 });
    };
    let end = tokens.last().map_or(head.span.end, |t| t.span.end);
    let span = head.span.start..end;

    let operands = parse_operands(&tokens[(i + 1)..])?;
    let nucleus = match &head.token {
        Token::Ident(mn) => StmtKind::Instr { mnemonic: mn.clone(), operands },
        Token::Directive(d) => StmtKind::Directive { name: d.clone(), args: operands },
        _ => return Err((EncodeErr::UnexpectedToken, head.span.clone())),
    };

    Ok(Stmt { labels, nucleus: Some(nucleus), span })
}

/// Parses a comma-separated (commas optional) operand list.
fn parse_operands(mut tokens: &[LexToken]) -> Result<Vec<Operand>, (EncodeErr, Range<usize>)> {
    let mut operands = vec![];

    while let Some(first) = tokens.first() {
        let (operand, rest) = parse_operand(tokens)
            .ok_or_else(|| (EncodeErr::UnexpectedToken, first.span.clone()))?;
        operands.push(operand);
        tokens = rest;

        if let [LexToken { token: Token::Comma, span }, rest @ ..] = tokens {
            if rest.is_empty() {
                return Err((EncodeErr::UnexpectedToken, span.clone()));
            }
            tokens = rest;
        }
    }

    Ok(operands)
}
fn parse_operand(tokens: &[LexToken]) -> Option<(Operand, &[LexToken])> {
    use Token as T;

    fn tok(lt: &LexToken) -> &Token {
        &lt.token
    }
    // matches `(` reg `)`
    fn base(tokens: &[LexToken]) -> Option<(Reg, &[LexToken])> {
        match tokens {
            [l, r, rp, rest @ ..] if *tok(l) == T::LParen && *tok(rp) == T::RParen => match tok(r) {
                T::Reg(reg) => Some((*reg, rest)),
                _ => None
            },
            _ => None
        }
    }

    let (first, rest) = tokens.split_first()?;
    match &first.token {
        T::Reg(r) => Some((Operand::Reg(*r), rest)),
        T::String(s) => Some((Operand::Str(s.clone()), rest)),
        T::Int(n) => match base(rest) {
            Some((reg, rest)) => Some((Operand::Mem { offset: *n, base: reg }, rest)),
            None => Some((Operand::Imm(*n), rest)),
        },
        T::LParen => {
            let (reg, rest) = base(tokens)?;
            Some((Operand::Mem { offset: 0, base: reg }, rest))
        },
        T::Ident(name) => {
            // `label+4` or `label -4` (the minus sign is part of the integer token)
            let (offset, rest) = match rest {
                [plus, n, tail @ ..] if *tok(plus) == T::Plus => match tok(n) {
                    T::Int(n) => (*n, tail),
                    _ => return None,
                },
                [n, tail @ ..] => match tok(n) {
                    T::Int(v) if *v < 0 => (*v, tail),
                    _ => (0, rest),
                },
                [] => (0, rest),
            };
            Some((Operand::Label(LabelRef { name: name.clone(), offset }), rest))
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::{parse_stmt, StmtKind, Tokenizer};
    use crate::ast::asm::{LabelRef, Operand};
    use crate::ast::Reg;
    use crate::parse::lex::{LexErr, Token};
    use crate::program::SourceLine;

    fn line(text: &str) -> Arc<SourceLine> {
        SourceLine::new("test.s", 1, text)
    }
    fn parse(text: &str) -> super::Stmt {
        let tokens = Tokenizer::new().tokenize_line(&line(text)).unwrap();
        parse_stmt(&tokens).unwrap()
    }
    fn instr(text: &str) -> (String, Vec<Operand>) {
        match parse(text).nucleus {
            Some(StmtKind::Instr { mnemonic, operands }) => (mnemonic, operands),
            n => panic!("expected instruction, got {n:?}"),
        }
    }

    #[test]
    fn test_blank_lines() {
        let mut tz = Tokenizer::new();
        assert!(tz.tokenize_line(&line("")).unwrap().is_empty());
        assert!(tz.tokenize_line(&line("    # just a comment")).unwrap().is_empty());
        assert_eq!(parse("").nucleus, None);
    }

    #[test]
    fn test_line_errors_collected() {
        let errs = Tokenizer::new().tokenize_line(&line("add $t99, ! $t1")).unwrap_err();
        assert_eq!(errs.len(), 2);
        assert_eq!(errs[0].0, LexErr::InvalidReg);
        assert_eq!(errs[1].0, LexErr::InvalidSymbol);
    }

    #[test]
    fn test_labels() {
        let stmt = parse("a: b: nop");
        let names: Vec<_> = stmt.labels.iter().map(|(n, _)| &**n).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(matches!(stmt.nucleus, Some(StmtKind::Instr { .. })));

        let stmt = parse("lonely:");
        assert_eq!(stmt.labels.len(), 1);
        assert_eq!(stmt.nucleus, None);
    }

    #[test]
    fn test_operands() {
        assert_eq!(instr("lw $t0, -4($sp)").1, [Operand::Reg(Reg::T0), Operand::Mem { offset: -4, base: Reg::SP }]);
        assert_eq!(instr("sw $t0, ($a0)").1, [Operand::Reg(Reg::T0), Operand::Mem { offset: 0, base: Reg::A0 }]);
        assert_eq!(instr("la $a0, msg+4").1, [
            Operand::Reg(Reg::A0),
            Operand::Label(LabelRef { name: "msg".into(), offset: 4 })
        ]);
        assert_eq!(instr("la $a0, msg-4").1[1], Operand::Label(LabelRef { name: "msg".into(), offset: -4 }));
        // commas are optional
        assert_eq!(instr("add $t0 $t1 $t2").1, [Operand::Reg(Reg::T0), Operand::Reg(Reg::T1), Operand::Reg(Reg::T2)]);
        assert!(parse_stmt(&Tokenizer::new().tokenize_line(&line("add $t0,")).unwrap()).is_err());
    }

    #[test]
    fn test_directive() {
        let stmt = parse("msg: .asciiz \"hi\"");
        assert_eq!(stmt.nucleus, Some(StmtKind::Directive { name: "asciiz".into(), args: vec![Operand::Str("hi".into())] }));
    }

    #[test]
    fn test_eqv() {
        let mut tz = Tokenizer::new();
        assert!(tz.tokenize_line(&line(".eqv LIMIT 10")).unwrap().is_empty());
        assert!(tz.tokenize_line(&line(".eqv TWICE LIMIT")).unwrap().is_empty());

        let list = tz.tokenize_line(&line("li $t0, TWICE")).unwrap();
        assert_eq!(list.tokens().last().unwrap().token, Token::Int(10));

        assert_eq!(tz.tokenize_line(&line(".eqv LIMIT 11")).unwrap_err()[0].0, LexErr::EqvRedefined);
        assert_eq!(tz.tokenize_line(&line(".eqv")).unwrap_err()[0].0, LexErr::InvalidEqv);
    }
}
