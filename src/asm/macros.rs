//! Macro definitions and expansion.
//!
//! Macros are defined with `.macro name %a, %b` (parameters optionally in parentheses)
//! and ended with `.end_macro`. They are invoked by name, as `name(arg, ...)` or `name arg, ...`,
//! and the number of arguments selects between macros of the same name.
//!
//! Expansion substitutes each parameter with its argument's tokens.
//! The expanded lines are attributed to the invocation's source line,
//! so diagnostics from expanded code point at the call site.
//! Labels defined inside a macro body are renamed on each expansion
//! (`loop` becomes `loop_M0`, `loop_M1`, ...) so repeated expansions don't collide.
//!
//! ```
//! use mips_ensemble::program::Program;
//! use mips_ensemble::asm::macros::MacroPool;
//! use mips_ensemble::err::ErrorList;
//!
//! let mut program = Program::from_source("main.s", "
//! .macro exit
//!     li $v0, 10
//!     syscall
//! .end_macro
//!     exit
//! ");
//! program.tokenize().unwrap();
//!
//! let mut pool = MacroPool::new();
//! let mut errors = ErrorList::new();
//! let lines = pool.process(program.tokens().unwrap(), &mut errors);
//! assert!(errors.is_empty());
//! assert!(pool.lookup("exit", 0).is_some());
//! // blank line, then the two lines of the expansion:
//! assert_eq!(lines.len(), 3);
//! ```

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;

use crate::err::ErrorList;
use crate::parse::lex::Token;
use crate::parse::{LexToken, TokenList};

/// The deepest a macro expansion may nest before it is considered runaway recursion.
pub const MAX_EXPANSION_DEPTH: usize = 64;

/// Errors raised while defining or expanding macros.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum MacroErr {
    /// A macro with this name and arity was already defined.
    Duplicate {
        /// Macro name.
        name: String,
        /// Number of parameters.
        arity: usize,
    },
    /// `.end_macro` appeared outside of a macro definition.
    UnmatchedEnd,
    /// A macro definition was never closed.
    MissingEnd(String),
    /// `.macro` appeared inside of a macro definition.
    NestedDefinition,
    /// The `.macro` line was malformed.
    InvalidDefinition,
    /// The macro body used a parameter that was not declared.
    UnknownParam(String),
    /// Expansion nested too deeply (usually a macro invoking itself).
    RecursionLimit(String),
}
impl std::fmt::Display for MacroErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MacroErr::Duplicate { name, arity } => write!(f, "macro {name} with {arity} parameter(s) was already defined"),
            MacroErr::UnmatchedEnd      => f.write_str(".end_macro without a matching .macro"),
            MacroErr::MissingEnd(name)  => write!(f, "macro {name} is missing .end_macro"),
            MacroErr::NestedDefinition  => f.write_str("cannot define a macro inside of another macro"),
            MacroErr::InvalidDefinition => f.write_str("invalid macro definition"),
            MacroErr::UnknownParam(p)   => write!(f, "unknown macro parameter %{p}"),
            MacroErr::RecursionLimit(n) => write!(f, "expansion of macro {n} is nested too deeply"),
        }
    }
}
impl std::error::Error for MacroErr {}
impl crate::err::Error for MacroErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            MacroErr::Duplicate { .. }  => Some("rename one of the macros or change its parameter count".into()),
            MacroErr::UnmatchedEnd      => None,
            MacroErr::MissingEnd(_)     => Some("add .end_macro after the last line of the macro body".into()),
            MacroErr::NestedDefinition  => Some("close the enclosing macro with .end_macro first".into()),
            MacroErr::InvalidDefinition => Some("the form is `.macro name %param1, %param2`".into()),
            MacroErr::UnknownParam(_)   => Some("parameters must be listed on the .macro line".into()),
            MacroErr::RecursionLimit(_) => Some(format!("macro expansion may be at most {MAX_EXPANSION_DEPTH} levels deep; check for a macro that invokes itself").into()),
        }
    }
}

/// A macro definition.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Macro {
    name: String,
    params: Vec<String>,
    body: Vec<TokenList>,
    labels: HashSet<String>,
}
impl Macro {
    /// Creates a macro definition.
    ///
    /// This fails if the body refers to a parameter that is not listed.
    pub fn new(name: impl Into<String>, params: Vec<String>, body: Vec<TokenList>) -> Result<Self, MacroErr> {
        let mut labels = HashSet::new();
        for line in &body {
            let mut tokens = line.tokens();
            while let [LexToken { token: Token::Ident(label), .. }, LexToken { token: Token::Colon, .. }, rest @ ..] = tokens {
                labels.insert(label.clone());
                tokens = rest;
            }

            for lt in line.tokens() {
                if let Token::MacroParam(p) = &lt.token {
                    if !params.contains(p) {
                        return Err(MacroErr::UnknownParam(p.clone()));
                    }
                }
            }
        }

        Ok(Self { name: name.into(), params, body, labels })
    }
    /// The name of this macro.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The number of parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }
    /// The macro body.
    pub fn body(&self) -> &[TokenList] {
        &self.body
    }
}

/// The macros of a translation unit, keyed by name and arity.
#[derive(Debug, Default, Clone)]
pub struct MacroPool {
    macros: HashMap<(String, usize), Macro>,
    expansions: usize,
}
impl MacroPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a macro.
    ///
    /// This fails if a macro with the same name and arity exists.
    pub fn define(&mut self, mac: Macro) -> Result<(), MacroErr> {
        match self.macros.entry((mac.name.clone(), mac.arity())) {
            Entry::Occupied(_) => Err(MacroErr::Duplicate { name: mac.name, arity: mac.params.len() }),
            Entry::Vacant(e) => {
                debug!("defined macro {} with {} parameter(s)", mac.name, mac.params.len());
                e.insert(mac);
                Ok(())
            }
        }
    }

    /// Finds the macro with the given name and arity.
    pub fn lookup(&self, name: &str, arity: usize) -> Option<&Macro> {
        self.macros.get(&(name.to_string(), arity))
    }

    /// Whether the pool has no macros.
    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// Expands a line if it is a macro invocation.
    ///
    /// This returns `Ok(None)` if the line does not invoke a macro in this pool.
    /// Otherwise, this returns the fully expanded lines (invocations inside the body are expanded too),
    /// each attributed to the invocation's source line.
    pub fn expand(&mut self, line: &TokenList) -> Result<Option<Vec<TokenList>>, MacroErr> {
        self.expand_depth(line, 0)
    }

    fn expand_depth(&mut self, line: &TokenList, depth: usize) -> Result<Option<Vec<TokenList>>, MacroErr> {
        let Some(call) = Invocation::parse(line.tokens()) else { return Ok(None) };
        let Some(mac) = self.lookup(call.name, call.args.len()).cloned() else { return Ok(None) };
        if depth >= MAX_EXPANSION_DEPTH {
            return Err(MacroErr::RecursionLimit(mac.name.clone()));
        }

        let suffix = format!("_M{}", self.expansions);
        self.expansions += 1;

        // Expanded tokens all point at the invocation.
        let span = call.span.clone();
        let body: Vec<Vec<LexToken>> = mac.body.iter()
            .map(|body_line| {
                body_line.tokens().iter()
                    .flat_map(|lt| match &lt.token {
                        Token::MacroParam(p) => {
                            let i = mac.params.iter().position(|q| q == p).unwrap_or_default();
                            call.args[i].iter().map(|a| a.token.clone()).collect()
                        },
                        Token::Ident(id) if mac.labels.contains(id) => vec![Token::Ident(format!("{id}{suffix}"))],
                        t => vec![t.clone()],
                    })
                    .map(|token| LexToken { token, span: span.clone() })
                    .collect()
            })
            .collect();

        let mut out = vec![];
        if !call.labels.is_empty() {
            out.push(TokenList::new(Arc::clone(line.source()), call.labels.to_vec()));
        }
        for tokens in body {
            let expanded = TokenList::new(Arc::clone(line.source()), tokens);
            match self.expand_depth(&expanded, depth + 1)? {
                Some(lines) => out.extend(lines),
                None => out.push(expanded),
            }
        }

        Ok(Some(out))
    }

    /// Processes the macros of a translation unit.
    ///
    /// Macro definitions are registered (and removed from the output),
    /// and invocations of already-defined macros are expanded.
    /// Errors are added to `errors`, and the offending lines are dropped.
    pub fn process(&mut self, lines: &[TokenList], errors: &mut ErrorList) -> Vec<TokenList> {
        struct Definition<'a> {
            header: &'a TokenList,
            name: String,
            params: Vec<String>,
            body: Vec<TokenList>,
        }

        let mut out = Vec::with_capacity(lines.len());
        let mut current: Option<Definition> = None;

        for line in lines {
            let directive = match line.tokens().first() {
                Some(LexToken { token: Token::Directive(d), .. }) => Some(d.as_str()),
                _ => None,
            };

            match (directive, current.is_some()) {
                (Some("macro"), true) => report(errors, MacroErr::NestedDefinition, line),
                (Some("macro"), false) => match parse_header(&line.tokens()[1..]) {
                    Some((name, params)) => current = Some(Definition { header: line, name, params, body: vec![] }),
                    None => report(errors, MacroErr::InvalidDefinition, line),
                },
                (Some("end_macro"), false) => report(errors, MacroErr::UnmatchedEnd, line),
                (Some("end_macro"), true) => {
                    if let Some(def) = current.take() {
                        let result = Macro::new(def.name, def.params, def.body)
                            .and_then(|m| self.define(m));
                        if let Err(e) = result {
                            report(errors, e, def.header);
                        }
                    }
                },
                (_, true) => {
                    if let Some(def) = &mut current {
                        def.body.push(line.clone());
                    }
                },
                (_, false) => match self.expand(line) {
                    Ok(Some(expanded)) => out.extend(expanded),
                    Ok(None) => out.push(line.clone()),
                    Err(e) => report(errors, e, line),
                },
            }
        }

        if let Some(def) = current {
            report(errors, MacroErr::MissingEnd(def.name), def.header);
        }
        out
    }
}

fn report(errors: &mut ErrorList, err: MacroErr, line: &TokenList) {
    let src = line.source();
    errors.add(err, src.filename_arc(), src.line(), line.column());
}

/// Parses `name %a, %b` or `name(%a, %b)`.
fn parse_header(tokens: &[LexToken]) -> Option<(String, Vec<String>)> {
    let (first, rest) = tokens.split_first()?;
    let Token::Ident(name) = &first.token else { return None };

    let rest = match rest {
        [LexToken { token: Token::LParen, .. }, inner @ .., LexToken { token: Token::RParen, .. }] => inner,
        _ => rest,
    };

    let mut params = vec![];
    for lt in rest {
        match &lt.token {
            Token::MacroParam(p) if !params.contains(p) => params.push(p.clone()),
            Token::Comma => {},
            _ => return None,
        }
    }
    Some((name.clone(), params))
}

/// A possible macro invocation: `[labels:] name args`.
struct Invocation<'a> {
    labels: &'a [LexToken],
    name: &'a str,
    args: Vec<&'a [LexToken]>,
    span: std::ops::Range<usize>,
}
impl<'a> Invocation<'a> {
    fn parse(tokens: &'a [LexToken]) -> Option<Self> {
        let mut n_labels = 0;
        while let [LexToken { token: Token::Ident(_), .. }, LexToken { token: Token::Colon, .. }, ..] = &tokens[n_labels..] {
            n_labels += 2;
        }
        let (labels, rest) = tokens.split_at(n_labels);
        let (head, rest) = rest.split_first()?;
        let Token::Ident(name) = &head.token else { return None };

        let end = rest.last().map_or(head.span.end, |t| t.span.end);
        let span = head.span.start..end;

        let rest = match rest {
            [LexToken { token: Token::LParen, .. }, inner @ .., LexToken { token: Token::RParen, .. }] => inner,
            _ => rest,
        };

        let args = if rest.is_empty() {
            vec![]
        } else if rest.iter().any(|t| t.token == Token::Comma) {
            rest.split(|t| t.token == Token::Comma).collect()
        } else if rest.iter().all(|t| matches!(t.token, Token::Reg(_) | Token::Int(_) | Token::Ident(_) | Token::String(_))) {
            // space-separated simple arguments
            rest.chunks(1).collect()
        } else {
            vec![rest]
        };

        Some(Self { labels, name, args, span })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{MacroErr, MacroPool};
    use crate::err::{ErrorKind, ErrorList};
    use crate::parse::lex::Token;
    use crate::parse::TokenList;
    use crate::program::Program;

    fn lines(src: &str) -> Vec<TokenList> {
        let mut program = Program::from_source("m.s", src);
        program.tokenize().unwrap();
        program.tokens().unwrap().to_vec()
    }
    fn process(src: &str) -> (Vec<TokenList>, ErrorList) {
        let mut errors = ErrorList::new();
        let out = MacroPool::new().process(&lines(src), &mut errors);
        (out, errors)
    }
    fn macro_errs(errors: &ErrorList) -> Vec<MacroErr> {
        errors.iter()
            .filter_map(|e| match &e.kind {
                ErrorKind::Macro(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_substitution() {
        let (out, errors) = process("
.macro add3 (%d, %a, %b)
    add %d, %a, %b
.end_macro
    add3($t0, $t1, $t2)
    add3 $t3 $t4 $t5
");
        assert!(errors.is_empty(), "{errors}");
        let exp: Vec<_> = out.iter().filter(|l| !l.is_empty()).collect();
        assert_eq!(exp.len(), 2);

        let regs: Vec<_> = exp[1].tokens().iter().map(|t| t.token.clone()).collect();
        assert_eq!(regs[0], Token::Ident("add".into()));
        assert!(matches!(&regs[1], Token::Reg(r) if r.name() == "t3"));

        // attributed to the invocation line
        assert_eq!(exp[0].source().line(), 5);
        assert_eq!(exp[1].source().line(), 6);
    }

    #[test]
    fn test_label_renaming() {
        let (out, errors) = process("
.macro spin
loop: j loop
.end_macro
    spin
    spin
");
        assert!(errors.is_empty(), "{errors}");
        let labels: Vec<_> = out.iter()
            .filter_map(|l| match &l.tokens().first()?.token {
                Token::Ident(id) => Some(id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(labels, ["loop_M0", "loop_M1"]);
    }

    #[test]
    fn test_overload_by_arity() {
        let (out, errors) = process("
.macro p
    nop
.end_macro
.macro p %x
    li $a0, %x
.end_macro
    p
    p 4
");
        assert!(errors.is_empty(), "{errors}");
        let firsts: Vec<_> = out.iter()
            .filter_map(|l| l.tokens().first().map(|t| t.token.clone()))
            .collect();
        assert_eq!(firsts, [Token::Ident("nop".into()), Token::Ident("li".into())]);
    }

    #[test]
    fn test_definition_errors() {
        let (_, errors) = process(".macro a\n.end_macro\n.macro a\n.end_macro\n");
        assert_eq!(macro_errs(&errors), [MacroErr::Duplicate { name: "a".into(), arity: 0 }]);

        let (_, errors) = process(".end_macro\n");
        assert_eq!(macro_errs(&errors), [MacroErr::UnmatchedEnd]);

        let (_, errors) = process(".macro a\n nop\n");
        assert_eq!(macro_errs(&errors), [MacroErr::MissingEnd("a".into())]);
        assert_eq!(errors.iter().next().unwrap().line, 1);

        let (_, errors) = process(".macro a\n.macro b\n.end_macro\n");
        assert_eq!(macro_errs(&errors), [MacroErr::NestedDefinition]);

        let (_, errors) = process(".macro a %x\n li $t0, %y\n.end_macro\n");
        assert_eq!(macro_errs(&errors), [MacroErr::UnknownParam("y".into())]);
    }

    #[test]
    fn test_recursion_limit() {
        let (_, errors) = process(".macro forever\n forever\n.end_macro\n forever\n");
        assert_eq!(macro_errs(&errors), [MacroErr::RecursionLimit("forever".into())]);
        assert_eq!(errors.iter().next().unwrap().line, 4);
    }

    #[test]
    fn test_use_before_definition() {
        // not expanded, left for the assembler to reject
        let (out, errors) = process(" later\n.macro later\n nop\n.end_macro\n");
        assert!(errors.is_empty());
        assert_eq!(out[0].tokens()[0].token, Token::Ident("later".into()));
    }
}
