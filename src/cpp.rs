use std::fmt;

use crate::cond::{ConditionalStack, FrameKind, BranchState, Mismatch};
use crate::error::{Error, ErrorKind};
use crate::expr::{self, Keywords, Env};
use crate::lex::{self, Shape};
use crate::lines::{LineMap, Position};
use crate::macros::{MacroTable, Macro, Parameters};
use crate::symbols::{SymbolMap, Symbol};

/// Translation phase 4 - conditional inclusion and macro definitions
///
/// A session owns the macro table and the stack of open conditionals. Each call to
/// [`Preprocessor::events`] or [`Preprocessor::process`] runs over one buffer, starting from an
/// empty conditional stack and the macros left by earlier runs.
pub struct Preprocessor<'i> {
    config: Config,

    conditionals: ConditionalStack,
    macros: MacroTable<'i>,
    keywords: Keywords<'i>,

    if_: Symbol<'i>,
    ifdef: Symbol<'i>,
    ifndef: Symbol<'i>,
    elif: Symbol<'i>,
    elifdef: Symbol<'i>,
    elifndef: Symbol<'i>,
    else_: Symbol<'i>,
    endif: Symbol<'i>,

    include: Symbol<'i>,
    define: Symbol<'i>,
    undef: Symbol<'i>,
    line: Symbol<'i>,
    error: Symbol<'i>,
    warning: Symbol<'i>,
    pragma: Symbol<'i>,

    va_args: Symbol<'i>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Config {
    /// Reject unknown directives instead of passing them through.
    pub strict: bool,
    /// Replace each stripped line with an empty one, so output lines keep their numbers.
    pub preserve_lines: bool,
}

/// What became of one logical line.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Event<'i, 's> {
    /// Content in an active region, kept in the output.
    Text { position: Position, text: &'s [u8] },
    /// Content or a non-conditional directive in a skipped region.
    Skipped { position: Position, text: &'s [u8] },
    /// A directive that was carried out. Directives never reach the output.
    Directive { position: Position, text: &'s [u8], kind: DirectiveKind<'i> },
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DirectiveKind<'i> {
    /// `#if`, `#ifdef`, `#ifndef`, `#elif` and friends, or `#else`, with the resulting state.
    Conditional { kind: FrameKind, state: BranchState },
    Endif,
    Define { name: Symbol<'i>, function_like: bool },
    Undef { name: Symbol<'i> },
    /// The header name as written, delimiters included. Never opened.
    Include { header: Vec<u8> },
    Line { line: u32, file: Option<Vec<u8>> },
    Warning { message: String },
    Pragma { text: Vec<u8> },
    Null,
}

/// The lazy event stream of one buffer. See [`Preprocessor::events`].
pub struct Events<'p, 'i, 's> {
    cpp: &'p mut Preprocessor<'i>,
    tokens: lex::Tokens<'s>,
    lines: LineMap,
    line: Vec<Token<'i, 's>>,
    scratch: Vec<u8>,
    done: bool,
}

#[derive(Copy, Clone)]
struct Token<'i, 's> { space: lex::Space, token: lex::Token<'i, 's> }

/// A directive line, `#` first.
struct Line<'a, 'i, 's> {
    tokens: &'a [Token<'i, 's>],
    lines: &'a LineMap,
    text: &'s [u8],
    position: Position,
    /// Offset just past the last token.
    end: usize,
}

impl<'i> Preprocessor<'i> {
    pub fn new(symbols: &'i SymbolMap, config: Config) -> Preprocessor<'i> {
        Preprocessor::with_macros(MacroTable::new(symbols), config)
    }

    /// Start a session from an existing table, such as predefined macros or the table left by
    /// an earlier session.
    pub fn with_macros(macros: MacroTable<'i>, config: Config) -> Preprocessor<'i> {
        let symbols = macros.symbols();
        let conditionals = ConditionalStack::default();
        let keywords = Keywords::new(symbols);

        let if_ = symbols.intern(b"if");
        let ifdef = symbols.intern(b"ifdef");
        let ifndef = symbols.intern(b"ifndef");
        let elif = symbols.intern(b"elif");
        let elifdef = symbols.intern(b"elifdef");
        let elifndef = symbols.intern(b"elifndef");
        let else_ = symbols.intern(b"else");
        let endif = symbols.intern(b"endif");

        let include = symbols.intern(b"include");
        let define = symbols.intern(b"define");
        let undef = symbols.intern(b"undef");
        let line = symbols.intern(b"line");
        let error = symbols.intern(b"error");
        let warning = symbols.intern(b"warning");
        let pragma = symbols.intern(b"pragma");

        let va_args = symbols.intern(b"__VA_ARGS__");

        let mut cpp = Preprocessor {
            config,
            conditionals, macros, keywords,
            if_, ifdef, ifndef, elif, elifdef, elifndef, else_, endif,
            include, define, undef, line, error, warning, pragma,
            va_args,
        };
        if !cpp.macros.contains(keywords.file) { cpp.set_file(b"<stdin>"); }
        cpp
    }

    pub fn into_macros(self) -> MacroTable<'i> { self.macros }

    pub fn config(&self) -> Config { self.config }

    pub fn macros(&self) -> &MacroTable<'i> { &self.macros }

    pub fn macros_mut(&mut self) -> &mut MacroTable<'i> { &mut self.macros }

    pub fn conditionals(&self) -> &ConditionalStack { &self.conditionals }

    /// Define an object-like macro. `None` defines it with empty replacement text.
    pub fn define(&mut self, name: &[u8], value: Option<&[u8]>) { self.macros.define(name, value) }

    pub fn undef(&mut self, name: &[u8]) { self.macros.undef(name); }

    /// Name the file being processed: `__FILE__` becomes that name as a string literal.
    pub fn set_file(&mut self, name: &[u8]) {
        let mut value = vec![b'"'];
        for &b in name {
            if b == b'"' || b == b'\\' { value.push(b'\\'); }
            value.push(b);
        }
        value.push(b'"');
        self.macros.remove(self.keywords.file);
        self.macros.insert(self.keywords.file, Macro::object(&value));
    }

    /// Whether `#ifdef name` holds. `__LINE__` is always defined.
    fn is_defined(&self, name: Symbol<'i>) -> bool {
        self.macros.contains(name) || name == self.keywords.line
    }

    fn builtin(&mut self, line: &Line<'_, 'i, '_>, name: Symbol<'i>, what: &str) {
        if self.keywords.is_builtin(name) {
            log::warn!("{}: {} of builtin macro \"{}\"", line.position, what, name);
            self.macros.remove(name);
        }
    }

    /// One event per logical line of `src`. The iterator ends after the first error.
    pub fn events<'p, 's>(&'p mut self, src: &'s [u8]) -> Events<'p, 'i, 's> {
        self.conditionals.clear();
        let tokens = lex::Tokens::new(src);
        let lines = LineMap::new(src);
        Events { cpp: self, tokens, lines, line: Vec::default(), scratch: Vec::default(), done: false }
    }

    /// Filter `src`: keep lines in active regions, strip directives and skipped lines.
    pub fn process(&mut self, src: &[u8]) -> Result<Vec<u8>, Error> {
        let preserve_lines = self.config.preserve_lines;
        let mut out = Vec::with_capacity(src.len());
        for event in self.events(src) {
            match event? {
                Event::Text { text, .. } => { out.extend_from_slice(text); }
                Event::Skipped { text, .. } | Event::Directive { text, .. } => if preserve_lines {
                    out.extend(text.iter().filter(|&&b| b == b'\n'));
                }
            }
        }
        Ok(out)
    }

    fn directive<'s>(&mut self, line: &Line<'_, 'i, 's>) -> Result<Event<'i, 's>, Error> {
        let position = line.position;
        let text = line.text;
        let name = match line.tokens.get(1) {
            Some(token) => { token.token.ident() }
            None if self.conditionals.is_active() => {
                let kind = DirectiveKind::Null;
                return Ok(Event::Directive { position, text, kind });
            }
            None => { return Ok(Event::Skipped { position, text }); }
        };
        if let Some(name) = name { log::trace!("{}: #{}", position, name); }

        let kind = match name {
            Some(name) if name == self.if_ => { self.if_directive(line)? }
            Some(name) if name == self.ifdef => { self.ifdef_directive(line, FrameKind::Ifdef)? }
            Some(name) if name == self.ifndef => { self.ifdef_directive(line, FrameKind::Ifndef)? }
            Some(name) if name == self.elif => { self.elif_directive(line, None, "#elif")? }
            Some(name) if name == self.elifdef => { self.elif_directive(line, Some(true), "#elifdef")? }
            Some(name) if name == self.elifndef => { self.elif_directive(line, Some(false), "#elifndef")? }
            Some(name) if name == self.else_ => { self.else_directive(line)? }
            Some(name) if name == self.endif => { self.endif_directive(line)? }

            _ if !self.conditionals.is_active() => { return Ok(Event::Skipped { position, text }); }

            Some(name) if name == self.define => { self.define_directive(line)? }
            Some(name) if name == self.undef => { self.undef_directive(line)? }
            Some(name) if name == self.include => { include_directive(line)? }
            Some(name) if name == self.line => { line_directive(line)? }
            Some(name) if name == self.error => {
                let message = line.words(line.args());
                return Err(Error::new(ErrorKind::ErrorDirective, position, message));
            }
            Some(name) if name == self.warning => {
                let message = line.words(line.args());
                log::warn!("{}: #warning {}", position, message);
                DirectiveKind::Warning { message }
            }
            Some(name) if name == self.pragma => {
                let mut text = Vec::default();
                line.join(line.args(), &mut text);
                DirectiveKind::Pragma { text }
            }
            _ => { return self.unknown_directive(line); }
        };
        Ok(Event::Directive { position, text, kind })
    }

    fn if_directive(&mut self, line: &Line<'_, 'i, '_>) -> Result<DirectiveKind<'i>, Error> {
        if self.conditionals.is_active() {
            line.check_faults()?;
            let value = self.condition(line)?;
            self.conditionals.open(FrameKind::If, line.position);
            if value { self.conditionals.enter(); }
        } else {
            self.conditionals.open(FrameKind::If, line.position);
        }
        Ok(self.conditional(line, FrameKind::If))
    }

    fn ifdef_directive(
        &mut self, line: &Line<'_, 'i, '_>, kind: FrameKind
    ) -> Result<DirectiveKind<'i>, Error> {
        if self.conditionals.is_active() {
            line.check_faults()?;
            let what = match kind { FrameKind::Ifdef => { "#ifdef" } _ => { "#ifndef" } };
            let name = self.macro_name(line, what)?;
            line.extra_tokens(3, what);

            let defined = self.is_defined(name);
            self.conditionals.open(kind, line.position);
            if defined == (kind == FrameKind::Ifdef) { self.conditionals.enter(); }
        } else {
            self.conditionals.open(kind, line.position);
        }
        Ok(self.conditional(line, kind))
    }

    /// `#elif`, or with `defined` set, `#elifdef` (true) and `#elifndef` (false).
    fn elif_directive(
        &mut self, line: &Line<'_, 'i, '_>, defined: Option<bool>, what: &str
    ) -> Result<DirectiveKind<'i>, Error> {
        let state = self.conditionals.alternative().map_err(|mismatch| line.mismatch(mismatch, what))?;
        if state.wants_condition() {
            line.check_faults()?;
            let value = match defined {
                None => { self.condition(line)? }
                Some(positive) => {
                    let name = self.macro_name(line, what)?;
                    line.extra_tokens(3, what);
                    self.is_defined(name) == positive
                }
            };
            if value { self.conditionals.enter(); }
        }
        Ok(self.conditional(line, FrameKind::Elif))
    }

    fn else_directive(&mut self, line: &Line<'_, 'i, '_>) -> Result<DirectiveKind<'i>, Error> {
        let state = self.conditionals.otherwise().map_err(|mismatch| line.mismatch(mismatch, "#else"))?;
        if state != BranchState::Suppressed {
            line.check_faults()?;
            line.extra_tokens(2, "#else");
        }
        Ok(self.conditional(line, FrameKind::Else))
    }

    fn endif_directive(&mut self, line: &Line<'_, 'i, '_>) -> Result<DirectiveKind<'i>, Error> {
        let frame = self.conditionals.close().map_err(|mismatch| line.mismatch(mismatch, "#endif"))?;
        if frame.state != BranchState::Suppressed {
            line.check_faults()?;
            line.extra_tokens(2, "#endif");
        }
        log::debug!("{}: #endif closes {} from {}", line.position, frame.kind, frame.opened);
        Ok(DirectiveKind::Endif)
    }

    fn conditional(&self, line: &Line<'_, 'i, '_>, kind: FrameKind) -> DirectiveKind<'i> {
        let state = self.conditionals.innermost().map_or(BranchState::Suppressed, |frame| frame.state);
        log::debug!("{}: {} {}", line.position, kind, state);
        DirectiveKind::Conditional { kind, state }
    }

    /// Parse and evaluate the condition of an `#if` or `#elif`.
    fn condition(&self, line: &Line<'_, 'i, '_>) -> Result<bool, Error> {
        let args = line.args();
        let tokens: Vec<_> = args.iter().map(|token| token.token).collect();
        let expression = |error: expr::ExprError| {
            line.error(ErrorKind::Expression, error.offset, error.message)
        };

        let expr = expr::parse(&tokens, &self.keywords, line.end).map_err(expression)?;
        let start = args.first().map_or(line.end, |token| token.token.offset());
        let env = Env { macros: &self.macros, keywords: &self.keywords, line: line.position.line };
        let value = expr.evaluate(env, start).map_err(expression)?;
        log::debug!("{}: condition evaluates to {}", line.position, value);
        Ok(value.is_true())
    }

    /// The identifier following the directive name.
    fn macro_name(&self, line: &Line<'_, 'i, '_>, what: &str) -> Result<Symbol<'i>, Error> {
        let token = match line.tokens.get(2) {
            Some(token) => { token.token }
            None => {
                let message = format!("no macro name given in {} directive", what);
                return Err(line.error(ErrorKind::Directive, line.end, message));
            }
        };
        match token.ident() {
            Some(name) if name == self.keywords.defined => {
                let message = "\"defined\" cannot be used as a macro name";
                Err(line.error(ErrorKind::Directive, token.offset(), message))
            }
            Some(name) => { Ok(name) }
            None => { Err(line.error(ErrorKind::Directive, token.offset(), "macro names must be identifiers")) }
        }
    }

    fn define_directive(&mut self, line: &Line<'_, 'i, '_>) -> Result<DirectiveKind<'i>, Error> {
        line.check_faults()?;
        let name = self.macro_name(line, "#define")?;

        let rest = line.tokens.get(3..).unwrap_or_default();
        let (parameters, body) = match rest.first() {
            Some(token) if token.space.kind == Shape::None && token.token.kind() == lex::Kind::LeftParen => {
                let (parameters, len) = self.parameters(line, &rest[1..])?;
                (Some(parameters), &rest[1 + len..])
            }
            Some(token) if token.space.kind == Shape::None => {
                log::warn!("{}: missing whitespace after the macro name", line.position(token.token.offset()));
                (None, rest)
            }
            _ => { (None, rest) }
        };

        match body {
            [first, ..] if first.token.kind() == lex::Kind::HashHash => {
                let message = "'##' cannot appear at either end of a macro expansion";
                return Err(line.error(ErrorKind::Directive, first.token.offset(), message));
            }
            [.., last] if last.token.kind() == lex::Kind::HashHash => {
                let message = "'##' cannot appear at either end of a macro expansion";
                return Err(line.error(ErrorKind::Directive, last.token.offset(), message));
            }
            _ => {}
        }
        let variadic = parameters.as_ref().map_or(false, |parameters| parameters.variadic);
        for (i, token) in body.iter().enumerate() {
            if !variadic && token.token.ident() == Some(self.va_args) {
                let message = "__VA_ARGS__ can only appear in the expansion of a variadic macro";
                return Err(line.error(ErrorKind::Directive, token.token.offset(), message));
            }
            if let (Some(parameters), lex::Kind::Hash) = (&parameters, token.token.kind()) {
                let operand = body.get(i + 1).and_then(|token| token.token.ident());
                let is_parameter = operand.map_or(false, |operand| {
                    parameters.names.contains(&operand) || (variadic && operand == self.va_args)
                });
                if !is_parameter {
                    let message = "'#' is not followed by a macro parameter";
                    return Err(line.error(ErrorKind::Directive, token.token.offset(), message));
                }
            }
        }

        let mut value = Vec::default();
        line.join(body, &mut value);
        let definition = match parameters {
            Some(parameters) => { Macro::function(parameters, &value) }
            None => { Macro::object(&value) }
        };
        let function_like = definition.is_function_like();
        self.builtin(line, name, "redefinition");
        self.macros.insert(name, definition.at(line.position));
        Ok(DirectiveKind::Define { name, function_like })
    }

    /// Parse a parameter list after its `(`. Returns the parameters and the tokens consumed.
    fn parameters(
        &self, line: &Line<'_, 'i, '_>, tokens: &[Token<'i, '_>]
    ) -> Result<(Parameters<'i>, usize), Error> {
        let mut parameters = Parameters::default();
        let mut at = 0;
        let missing = || line.error(ErrorKind::Directive, line.end, "missing ')' in macro parameter list");

        loop {
            let token = tokens.get(at).ok_or_else(missing)?.token;
            at += 1;
            match token.kind() {
                lex::Kind::RightParen if parameters.names.is_empty() => { break; }
                lex::Kind::Ellipsis => { parameters.variadic = true; }
                lex::Kind::Identifier => {
                    let name = token.ident().ok_or_else(missing)?;
                    if name == self.va_args {
                        let message = "__VA_ARGS__ can not be used as a parameter name";
                        return Err(line.error(ErrorKind::Directive, token.offset(), message));
                    }
                    if parameters.names.contains(&name) {
                        let message = format!("duplicate macro parameter \"{}\"", name);
                        return Err(line.error(ErrorKind::Directive, token.offset(), message));
                    }
                    parameters.names.push(name);
                }
                _ => { return Err(line.unexpected(&token, "expected parameter name, found")); }
            }

            let token = tokens.get(at).ok_or_else(missing)?.token;
            at += 1;
            match token.kind() {
                lex::Kind::Comma if !parameters.variadic => { continue; }
                lex::Kind::RightParen => { break; }
                lex::Kind::Ellipsis if !parameters.variadic => {
                    parameters.variadic = true;
                    let token = tokens.get(at).ok_or_else(missing)?.token;
                    at += 1;
                    match token.kind() {
                        lex::Kind::RightParen => { break; }
                        _ => { return Err(line.unexpected(&token, "missing ')' after \"...\", found")); }
                    }
                }
                _ if parameters.variadic => {
                    return Err(line.unexpected(&token, "missing ')' after \"...\", found"));
                }
                _ => { return Err(line.unexpected(&token, "expected ',' or ')', found")); }
            }
        }

        Ok((parameters, at))
    }

    fn undef_directive(&mut self, line: &Line<'_, 'i, '_>) -> Result<DirectiveKind<'i>, Error> {
        line.check_faults()?;
        let name = self.macro_name(line, "#undef")?;
        line.extra_tokens(3, "#undef");
        self.builtin(line, name, "undefinition");
        self.macros.remove(name);
        Ok(DirectiveKind::Undef { name })
    }

    fn unknown_directive<'s>(&self, line: &Line<'_, 'i, 's>) -> Result<Event<'i, 's>, Error> {
        let mut name = Vec::default();
        if let Some(token) = line.tokens.get(1) { token.token.write_spelling(&mut name); }
        let message = format!("invalid preprocessing directive #{}", String::from_utf8_lossy(&name));
        if self.config.strict {
            return Err(Error::new(ErrorKind::Directive, line.position, message));
        }

        log::debug!("{}: {}, passed through", line.position, message);
        Ok(Event::Text { position: line.position, text: line.text })
    }
}

/// `#include` is recorded but never resolved.
fn include_directive<'i>(line: &Line<'_, 'i, '_>) -> Result<DirectiveKind<'i>, Error> {
    let args = line.args();
    let mut header = Vec::default();
    match args.first().map(|token| token.token.kind()) {
        None => {
            let message = "#include expects \"FILENAME\" or <FILENAME>";
            return Err(line.error(ErrorKind::Directive, line.end, message));
        }
        Some(lex::Kind::String) => {
            args[0].token.write_spelling(&mut header);
            line.extra_tokens(3, "#include");
        }
        Some(lex::Kind::Lt) => {
            let len = match args.iter().position(|token| token.token.kind() == lex::Kind::Gt) {
                Some(at) => { at + 1 }
                None => {
                    let message = "missing terminating > character";
                    return Err(line.error(ErrorKind::Directive, line.end, message));
                }
            };
            for token in &args[..len] { token.token.write_spelling(&mut header); }
            line.extra_tokens(2 + len, "#include");
        }
        Some(_) => { line.join(args, &mut header); }
    }

    log::debug!("{}: #include {} is not resolved", line.position, String::from_utf8_lossy(&header));
    Ok(DirectiveKind::Include { header })
}

/// `#line NUMBER ["FILE"]`
fn line_directive<'i>(line: &Line<'_, 'i, '_>) -> Result<DirectiveKind<'i>, Error> {
    line.check_faults()?;
    let args = line.args();
    let scratch = &mut Vec::default();

    let number = match args.first() {
        Some(token) => { token.token }
        None => { return Err(line.error(ErrorKind::Directive, line.end, "#line requires a line number")); }
    };
    let digits = number.spelling(scratch);
    if number.kind() != lex::Kind::Number || !digits.iter().all(u8::is_ascii_digit) {
        let message = format!("\"{}\" after #line is not a positive integer", String::from_utf8_lossy(digits));
        return Err(line.error(ErrorKind::Directive, number.offset(), message));
    }
    let value = std::str::from_utf8(digits).ok().and_then(|digits| digits.parse::<u32>().ok());
    let value = match value {
        Some(value) if (1..=2147483647).contains(&value) => { value }
        _ => { return Err(line.error(ErrorKind::Directive, number.offset(), "line number out of range")); }
    };

    let file = match args.get(1) {
        None => { None }
        Some(token) => {
            scratch.clear();
            match (token.token.kind(), token.token.spelling(scratch)) {
                (lex::Kind::String, [b'"', file @ .., b'"']) => { Some(file.to_vec()) }
                (_, spelling) => {
                    let message = format!("invalid filename \"{}\"", String::from_utf8_lossy(spelling));
                    return Err(line.error(ErrorKind::Directive, token.token.offset(), message));
                }
            }
        }
    };
    line.extra_tokens(4, "#line");

    Ok(DirectiveKind::Line { line: value, file })
}

impl<'a, 'i, 's> Line<'a, 'i, 's> {
    fn position(&self, offset: usize) -> Position { self.lines.position(offset) }

    /// Tokens after the directive name.
    fn args(&self) -> &'a [Token<'i, 's>] { self.tokens.get(2..).unwrap_or_default() }

    fn error(&self, kind: ErrorKind, offset: usize, message: impl Into<String>) -> Error {
        Error::new(kind, self.position(offset), message)
    }

    fn unexpected(&self, token: &lex::Token<'_, '_>, what: &str) -> Error {
        let message = match token.kind() {
            lex::Kind::EndOfLine => { format!("{} end of line", what) }
            _ => {
                let mut spelling = Vec::default();
                token.write_spelling(&mut spelling);
                format!("{} \"{}\"", what, String::from_utf8_lossy(&spelling))
            }
        };
        self.error(ErrorKind::Directive, token.offset(), message)
    }

    fn mismatch(&self, mismatch: Mismatch, what: &str) -> Error {
        let message = match mismatch {
            Mismatch::NoConditional => { format!("{} without #if", what) }
            Mismatch::AfterElse => { format!("{} after #else", what) }
        };
        Error::new(ErrorKind::Directive, self.position, message)
    }

    fn check_faults(&self) -> Result<(), Error> {
        check_faults(self.tokens, self.lines)
    }

    /// Tokens from index `from` on are ignored with a warning.
    fn extra_tokens(&self, from: usize, what: &str) {
        if let Some(token) = self.tokens.get(from) {
            log::warn!("{}: extra tokens at end of {} directive", self.position(token.token.offset()), what);
        }
    }

    /// Write the spellings of `tokens`, separated by single spaces where the source had any.
    fn join(&self, tokens: &[Token<'_, '_>], out: &mut Vec<u8>) {
        for (i, token) in tokens.iter().enumerate() {
            if i > 0 && token.space.kind != Shape::None { out.push(b' '); }
            token.token.write_spelling(out);
        }
    }

    fn words(&self, tokens: &[Token<'_, '_>]) -> String {
        let mut out = Vec::default();
        self.join(tokens, &mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}

fn check_faults(tokens: &[Token<'_, '_>], lines: &LineMap) -> Result<(), Error> {
    for token in tokens {
        if let Some(fault) = token.token.fault() {
            let position = lines.position(token.token.offset());
            return Err(Error::new(ErrorKind::Lex, position, fault.to_string()));
        }
    }
    Ok(())
}

impl<'p, 'i, 's> Events<'p, 'i, 's> {
    fn event(&mut self) -> Result<Option<Event<'i, 's>>, Error> {
        let src = self.tokens.source();
        if self.tokens.at_end() {
            return match self.cpp.conditionals.innermost() {
                Some(frame) => {
                    let message = format!("unterminated {} directive", frame.kind);
                    Err(Error::new(ErrorKind::UnterminatedConditional, frame.opened, message))
                }
                None => { Ok(None) }
            };
        }

        let begin = self.tokens.offset();
        self.line.clear();
        loop {
            let space = self.tokens.whitespace(true);
            if space.kind == Shape::Newline { break; }
            let token = self.tokens.preprocessing_token(self.cpp.macros.symbols(), &mut self.scratch);
            if token.kind() == lex::Kind::EndOfFile { break; }
            self.line.push(Token { space, token });
        }
        let text = &src[begin..self.tokens.offset()];

        match self.line.first() {
            Some(first) if first.token.kind() == lex::Kind::Hash => {
                let position = self.lines.position(first.token.offset());
                let end = self.line.last().map_or(begin, |last| last.token.offset() + last.token.len());
                let line = Line { tokens: &self.line, lines: &self.lines, text, position, end };
                self.cpp.directive(&line).map(Some)
            }
            _ => {
                let position = self.lines.position(begin);
                if !self.cpp.conditionals.is_active() {
                    return Ok(Some(Event::Skipped { position, text }));
                }
                check_faults(&self.line, &self.lines)?;
                Ok(Some(Event::Text { position, text }))
            }
        }
    }
}

impl<'p, 'i, 's> Iterator for Events<'p, 'i, 's> {
    type Item = Result<Event<'i, 's>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done { return None; }
        match self.event() {
            Ok(Some(event)) => { Some(Ok(event)) }
            Ok(None) => { self.done = true; None }
            Err(error) => { self.done = true; Some(Err(error)) }
        }
    }
}

impl<'i, 's> Event<'i, 's> {
    pub fn position(&self) -> Position {
        match *self {
            Event::Text { position, .. } |
            Event::Skipped { position, .. } |
            Event::Directive { position, .. } => { position }
        }
    }

    /// The source text of the logical line, including its newline.
    pub fn text(&self) -> &'s [u8] {
        match *self {
            Event::Text { text, .. } |
            Event::Skipped { text, .. } |
            Event::Directive { text, .. } => { text }
        }
    }
}

impl fmt::Display for Event<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Event::Text { position, text } => {
                let text = String::from_utf8_lossy(text);
                write!(f, "{}: text {:?}", position, text.trim_end_matches(&['\r', '\n'][..]))
            }
            Event::Skipped { position, .. } => { write!(f, "{}: skipped", position) }
            Event::Directive { position, ref kind, .. } => { write!(f, "{}: {}", position, kind) }
        }
    }
}

impl fmt::Display for DirectiveKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DirectiveKind::Conditional { kind, state } => { write!(f, "{} {}", kind, state) }
            DirectiveKind::Endif => { f.write_str("#endif") }
            DirectiveKind::Define { name, function_like: false } => { write!(f, "#define {}", name) }
            DirectiveKind::Define { name, function_like: true } => { write!(f, "#define {}()", name) }
            DirectiveKind::Undef { name } => { write!(f, "#undef {}", name) }
            DirectiveKind::Include { ref header } => {
                write!(f, "#include {}", String::from_utf8_lossy(header))
            }
            DirectiveKind::Line { line, file: None } => { write!(f, "#line {}", line) }
            DirectiveKind::Line { line, file: Some(ref file) } => {
                write!(f, "#line {} \"{}\"", line, String::from_utf8_lossy(file))
            }
            DirectiveKind::Warning { ref message } => { write!(f, "#warning {}", message) }
            DirectiveKind::Pragma { ref text } => { write!(f, "#pragma {}", String::from_utf8_lossy(text)) }
            DirectiveKind::Null => { f.write_str("#") }
        }
    }
}
