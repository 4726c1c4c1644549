//! Tokenizing MIPS assembly.
//!
//! This module holds the tokens that characterize MIPS assembly ([`Token`]).
//! This module is used by the tokenizer to convert each source line
//! into a [`TokenList`].
//!
//! The module's key data structure is the [`Token`] enum,
//! which lists all of the tokens of MIPS assembly.
//!
//! [`TokenList`]: crate::parse::TokenList

use std::num::IntErrorKind;

use logos::{Lexer, Logos};

use crate::ast::Reg;

/// A unit of information in MIPS source code.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r\x0C]+", error = LexErr)]
pub enum Token {
    // Note, these regexes span over tokens that are technically invalid
    // (e.g., 23trst matches for an integer even though it shouldn't).
    // This is intended.
    // These regexes collect what would be considered one discernable unit
    // and validates it using the validator function.

    /// A numeric value (e.g., `9`, `-14`, `0x7F`, `'a'`).
    ///
    /// This holds any value that fits within 32 bits,
    /// whether it is interpreted as signed or unsigned.
    #[regex(r"-?\d\w*", lex_int)]
    #[regex(r"'([^'\\]|\\.)*'?", lex_char)]
    Int(i64),

    /// A register (e.g., `$t0`, `$31`, `$zero`).
    #[regex(r"\$\w*", lex_reg)]
    Reg(Reg),

    /// An identifier.
    ///
    /// This can refer to either:
    /// - a label (e.g., `main`, `loop`, `end_if`)
    /// - an instruction mnemonic (e.g. `add`, `lw`, `li`)
    /// - a macro name
    #[regex(r"[A-Za-z_][\w.]*", |lx| lx.slice().to_string())]
    Ident(String),

    /// A directive (e.g., `.text`, `.word`).
    ///
    /// This holds the lowercase name of the directive, without the leading dot.
    #[regex(r"\.[A-Za-z_]\w*", |lx| lx.slice()[1..].to_lowercase())]
    Directive(String),

    /// A macro parameter (e.g., `%reg`).
    ///
    /// This holds the name of the parameter, without the leading `%`.
    #[regex(r"%[A-Za-z_]\w*", |lx| lx.slice()[1..].to_string())]
    MacroParam(String),

    /// A string literal (e.g., `"Hello!"`)
    #[token(r#"""#, lex_str_literal)]
    String(String),

    /// A colon, which appears after labels
    #[token(":")]
    Colon,

    /// A comma, which delineate operands of an instruction
    #[token(",")]
    Comma,

    /// An open parenthesis, used in base-offset addressing and macro calls
    #[token("(")]
    LParen,

    /// A close parenthesis
    #[token(")")]
    RParen,

    /// A plus sign, used to add offsets to labels (`label+4`)
    #[token("+")]
    Plus,

    /// A comment, which starts with a `#` and spans the remaining part of the line.
    #[regex(r"#.*")]
    Comment,
}

/// Any errors raised in attempting to tokenize an input stream.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum LexErr {
    /// Numeric literal cannot fit within 32 bits (either as a signed or unsigned value)
    DoesNotFit32,
    /// Hex literal (starting with 0x) has invalid hex digits
    InvalidHex,
    /// Numeric literal could not be parsed as a decimal literal because it has invalid digits (i.e., not 0-9)
    InvalidNumeric,
    /// Hex literal (starting with 0x) doesn't have digits after it.
    InvalidHexEmpty,
    /// Int parsing failed but the reason why is unknown
    UnknownIntErr,
    /// String literal is missing an end quotation mark.
    UnclosedStrLit,
    /// Character literal is unclosed or does not hold exactly one character.
    InvalidCharLit,
    /// Token had the format `$...`, but does not name a register.
    InvalidReg,
    /// An `.eqv` directive is missing its name or value.
    InvalidEqv,
    /// An `.eqv` name was defined more than once.
    EqvRedefined,
    /// A symbol was used which is not allowed in MIPS assembly files
    #[default]
    InvalidSymbol
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::DoesNotFit32    => f.write_str("numeric token does not fit in 32 bits"),
            LexErr::InvalidHex      => f.write_str("invalid hex literal"),
            LexErr::InvalidNumeric  => f.write_str("invalid decimal literal"),
            LexErr::InvalidHexEmpty => f.write_str("invalid hex literal"),
            LexErr::UnknownIntErr   => f.write_str("could not parse integer"),
            LexErr::UnclosedStrLit  => f.write_str("unclosed string literal"),
            LexErr::InvalidCharLit  => f.write_str("invalid character literal"),
            LexErr::InvalidReg      => f.write_str("invalid register"),
            LexErr::InvalidEqv      => f.write_str("malformed .eqv directive"),
            LexErr::EqvRedefined    => f.write_str(".eqv name was already defined"),
            LexErr::InvalidSymbol   => f.write_str("unrecognized symbol"),
        }
    }
}
impl std::error::Error for LexErr {}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::DoesNotFit32    => Some(format!("integers must be within [{}, {}]", i32::MIN, u32::MAX).into()),
            LexErr::InvalidHex      => Some("a hex literal starts with '0x' and consists of 0-9, A-F".into()),
            LexErr::InvalidNumeric  => Some("a decimal literal only consists of digits 0-9".into()),
            LexErr::InvalidHexEmpty => Some("there should be hex digits (0-9, A-F) here".into()),
            LexErr::UnknownIntErr   => None,
            LexErr::UnclosedStrLit  => Some("add a quote to the end of the string literal".into()),
            LexErr::InvalidCharLit  => Some("a character literal holds exactly one character or escape (e.g., 'a', '\\n')".into()),
            LexErr::InvalidReg      => Some("this must be $0-$31 or a register name such as $t0, $sp, or $ra".into()),
            LexErr::InvalidEqv      => Some("the form is `.eqv NAME value`".into()),
            LexErr::EqvRedefined    => Some("rename one of the definitions".into()),
            LexErr::InvalidSymbol   => Some("this char does not occur in any token in MIPS assembly".into()),
        }
    }
}

const INT_RANGE: std::ops::RangeInclusive<i64> = (i32::MIN as i64)..=(u32::MAX as i64);

/// Helper that converts an int error kind to its corresponding LexErr, based on the provided inputs.
fn convert_int_error(
    e: &std::num::IntErrorKind,
    invalid_digits_err: LexErr,
    empty_err: LexErr,
    src: &str
) -> LexErr {
    match e {
        IntErrorKind::Empty        => empty_err,
        IntErrorKind::InvalidDigit if src.is_empty() || src == "-" => empty_err,
        IntErrorKind::InvalidDigit => invalid_digits_err,
        IntErrorKind::PosOverflow  => LexErr::DoesNotFit32,
        IntErrorKind::NegOverflow  => LexErr::DoesNotFit32,
        _ => LexErr::UnknownIntErr,
    }
}
fn lex_int(lx: &Lexer<'_, Token>) -> Result<i64, LexErr> {
    let (neg, string) = match lx.slice().strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, lx.slice()),
    };

    let magnitude = match string.strip_prefix("0x").or_else(|| string.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16)
            .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidHex, LexErr::InvalidHexEmpty, hex))?,
        None => string.parse::<i64>()
            .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidNumeric, LexErr::InvalidNumeric, string))?,
    };

    let value = match neg {
        true  => -magnitude,
        false => magnitude,
    };
    match INT_RANGE.contains(&value) {
        true  => Ok(value),
        false => Err(LexErr::DoesNotFit32),
    }
}
fn lex_char(lx: &Lexer<'_, Token>) -> Result<i64, LexErr> {
    let inner = lx.slice()
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .ok_or(LexErr::InvalidCharLit)?;

    let mut chars = inner.chars();
    let c = match (chars.next(), chars.next(), chars.next()) {
        (Some('\\'), Some(esc), None) => unescape(esc).ok_or(LexErr::InvalidCharLit)?,
        (Some(c), None, None) if c != '\\' => c,
        _ => return Err(LexErr::InvalidCharLit)
    };
    Ok(i64::from(u32::from(c)))
}
fn lex_reg(lx: &Lexer<'_, Token>) -> Result<Reg, LexErr> {
    Reg::from_name(&lx.slice()[1..]).ok_or(LexErr::InvalidReg)
}
fn unescape(c: char) -> Option<char> {
    match c {
        'n'  => Some('\n'),
        'r'  => Some('\r'),
        't'  => Some('\t'),
        '0'  => Some('\0'),
        '\\' => Some('\\'),
        '\'' => Some('\''),
        '"'  => Some('"'),
        _ => None
    }
}
/// Lexes the rest of a string literal (the opening quote has been matched),
/// decoding escapes along the way.
///
/// Unknown escapes are kept as written. A literal cannot span lines.
fn lex_str_literal(lx: &mut Lexer<'_, Token>) -> Result<String, LexErr> {
    let line = lx.remainder().lines().next().unwrap_or("");
    let mut buf = String::new();
    let mut chars = line.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                lx.bump(i + 1);
                return Ok(buf);
            },
            '\\' => match chars.next() {
                Some((_, esc)) => match unescape(esc) {
                    Some(u) => buf.push(u),
                    None => buf.extend(['\\', esc]),
                },
                None => buf.push('\\'),
            },
            c => buf.push(c),
        }
    }

    lx.bump(line.len());
    Err(LexErr::UnclosedStrLit)
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use crate::ast::Reg;
    use crate::err::LexErr;
    use crate::parse::lex::Token;

    fn ident(s: &str) -> Token {
        Token::Ident(s.to_string())
    }
    fn directive(s: &str) -> Token {
        Token::Directive(s.to_string())
    }
    fn str_literal(s: &str) -> Token {
        Token::String(s.to_string())
    }

    #[test]
    fn test_numeric_dec() {
        let mut tokens = Token::lexer("0 123 -456 2147483648 4294967295 -2147483648");
        assert_eq!(tokens.next(), Some(Ok(Token::Int(0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(123))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(-456))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(2147483648))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(4294967295))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(-2147483648))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("4294967296").next(), Some(Err(LexErr::DoesNotFit32)));
        assert_eq!(Token::lexer("-2147483649").next(), Some(Err(LexErr::DoesNotFit32)));
        assert_eq!(Token::lexer("999999999999999999999999999999").next(), Some(Err(LexErr::DoesNotFit32)));
        assert_eq!(Token::lexer("3Q").next(), Some(Err(LexErr::InvalidNumeric)));
    }

    #[test]
    fn test_numeric_hex() {
        let mut tokens = Token::lexer("0x10000 0XABCD 0xffffffff -0x10");
        assert_eq!(tokens.next(), Some(Ok(Token::Int(0x10000))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(0xABCD))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(0xFFFF_FFFF))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(-0x10))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("0x1_0000_0000").next(), Some(Err(LexErr::InvalidHex)));
        assert_eq!(Token::lexer("0x100000000").next(), Some(Err(LexErr::DoesNotFit32)));
        assert_eq!(Token::lexer("0xQ").next(), Some(Err(LexErr::InvalidHex)));
        assert_eq!(Token::lexer("0x").next(), Some(Err(LexErr::InvalidHexEmpty)));
    }

    #[test]
    fn test_char() {
        let mut tokens = Token::lexer(r"'a' '\n' '0'");
        assert_eq!(tokens.next(), Some(Ok(Token::Int(0x61))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(0x0A))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(0x30))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("'ab'").next(), Some(Err(LexErr::InvalidCharLit)));
        assert_eq!(Token::lexer("'a").next(), Some(Err(LexErr::InvalidCharLit)));
    }

    #[test]
    fn test_regs() {
        let mut tokens = Token::lexer("$0 $zero $t0 $8 $sp $ra $31 $s8 $fp");
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::ZERO))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::ZERO))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::T0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::T0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::SP))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::RA))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::RA))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::FP))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::FP))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("$32").next(), Some(Err(LexErr::InvalidReg)));
        assert_eq!(Token::lexer("$t10").next(), Some(Err(LexErr::InvalidReg)));
        assert_eq!(Token::lexer("$").next(), Some(Err(LexErr::InvalidReg)));
    }

    #[test]
    fn test_str() {
        let mut tokens = Token::lexer(r#" " " "abc" "" "a#b" "#);
        assert_eq!(tokens.next(), Some(Ok(str_literal(" "))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("abc"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal(""))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("a#b"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_str_escape() {
        let mut tokens = Token::lexer(r#" "\n" "\t" "\\" "\"" "\0" "\e" "#);
        assert_eq!(tokens.next(), Some(Ok(str_literal("\n"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\t"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\\"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\""))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\0"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\\e"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_str_unclosed() {
        assert_eq!(Token::lexer(r#"""#).next(), Some(Err(LexErr::UnclosedStrLit)));
        assert_eq!(Token::lexer(r#""abc\""#).next(), Some(Err(LexErr::UnclosedStrLit)));
    }

    #[test]
    fn test_idents_directives() {
        let mut tokens = Token::lexer("main add.s _x .text .ASCIIZ %reg");
        assert_eq!(tokens.next(), Some(Ok(ident("main"))));
        assert_eq!(tokens.next(), Some(Ok(ident("add.s"))));
        assert_eq!(tokens.next(), Some(Ok(ident("_x"))));
        assert_eq!(tokens.next(), Some(Ok(directive("text"))));
        assert_eq!(tokens.next(), Some(Ok(directive("asciiz"))));
        assert_eq!(tokens.next(), Some(Ok(Token::MacroParam("reg".to_string()))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_punct() {
        let mut tokens = Token::lexer("loop: lw $t0, -4($sp) # load\tit");
        assert_eq!(tokens.next(), Some(Ok(ident("loop"))));
        assert_eq!(tokens.next(), Some(Ok(Token::Colon)));
        assert_eq!(tokens.next(), Some(Ok(ident("lw"))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::T0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Comma)));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(-4))));
        assert_eq!(tokens.next(), Some(Ok(Token::LParen)));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::SP))));
        assert_eq!(tokens.next(), Some(Ok(Token::RParen)));
        assert_eq!(tokens.next(), Some(Ok(Token::Comment)));
        assert_eq!(tokens.next(), None);

        let mut tokens = Token::lexer("msg+4");
        assert_eq!(tokens.next(), Some(Ok(ident("msg"))));
        assert_eq!(tokens.next(), Some(Ok(Token::Plus)));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(4))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_invalid_symbol() {
        for c in ['!', '&', '*', ';', '<', '=', '>', '?', '@', '[', ']', '^', '`', '{', '|', '}', '~'] {
            let string = c.to_string();
            assert_eq!(
                Token::lexer(&string).next(),
                Some(Err(LexErr::InvalidSymbol)),
                "Expected {string:?} to be an invalid symbol"
            );
        }
    }
}
