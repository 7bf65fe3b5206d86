use std::{fmt, str};

use crate::symbols::{SymbolMap, Symbol};

/// Translation phase 3 - whitespace and comments, and preprocessing tokens
///
/// `Tokens` is a cursor into a source buffer. It is `Copy`, so a saved copy restarts the
/// sequence from the same point.
#[derive(Copy, Clone)]
pub struct Tokens<'s> { src: &'s [u8], pos: usize }

#[derive(Copy, Clone, Debug)]
pub struct Space { pub kind: Shape, pub len: usize }

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Shape { None, Horizontal, Newline }

/// A preprocessing token.
#[derive(Copy, Clone)]
pub struct Token<'i, 's> {
    kind: Kind,
    spelling: Spelling<'i, 's>,
    offset: usize,
    len: usize,
    fault: Option<Fault>,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Kind {
    EndOfFile, EndOfLine,

    Identifier, Number, Character, String,

    Hash, HashHash,

    LeftBrace, RightBrace, LeftBracket, RightBracket, LeftParen, RightParen,
    Semi, Colon, ColonColon, Ellipsis, Question, Dot, Arrow, Tilde,
    Exclaim, Plus, Minus, Star, Slash, Percent, Caret, Amp, Pipe,
    Eq, PlusEq, MinusEq, StarEq, SlashEq, PercentEq, CaretEq, AmpEq, PipeEq,
    EqEq, ExclaimEq, Lt, Gt, LtEq, GtEq, AmpAmp, PipePipe,
    LtLt, GtGt, LtLtEq, GtGtEq, PlusPlus, MinusMinus, Comma,

    /// A character that starts no token, passed through as opaque punctuation.
    Other,
    /// A malformed token. See [`Token::fault`].
    Error,
}

/// What is wrong with an [`Kind::Error`] token.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Fault {
    UnterminatedString,
    UnterminatedCharacter,
    EmptyCharacter,
    InvalidEscape(u8),
    UnterminatedComment,
}

/// A preprocessing token's *spelling*.
///
/// Identifiers are interned. Everything else points into the source buffer, where it may still
/// contain splices.
#[derive(Copy, Clone)]
enum Spelling<'i, 's> {
    Intern(Symbol<'i>),
    Buffer { flags: u8, data: &'s [u8] },
}

const FLAG_SPLICE: u8 = 1 << 0;

impl<'s> Tokens<'s> {
    pub fn new(src: &'s [u8]) -> Tokens<'s> { Tokens { src, pos: 0 } }

    /// The byte offset of the next unconsumed character.
    pub fn offset(&self) -> usize { self.pos }

    pub fn source(&self) -> &'s [u8] { self.src }

    /// Whether only splices, if anything, remain.
    pub fn at_end(&self) -> bool { self.is_end(byte(self.src, &mut 0, self.pos).1) }

    #[inline]
    fn is_end(&self, next: usize) -> bool { next > self.src.len() }

    /// Iterate over the remaining tokens, with an [`Kind::EndOfLine`] at each logical line end.
    pub fn stream<'i>(self, symbols: &'i SymbolMap) -> Stream<'i, 's> {
        Stream { tokens: self, symbols, scratch: Vec::default(), newline: true, done: false }
    }

    /// Consume whitespace and comments.
    ///
    /// With `horizontal`, stop right after the first newline. The end of the buffer counts as a
    /// newline. An unterminated block comment is left in place for
    /// [`Tokens::preprocessing_token`] to report.
    pub fn whitespace(&mut self, horizontal: bool) -> Space {
        let src = self.src;
        let flags = &mut 0;

        let mut whitespace = false;
        let mut newline = false;
        let mut at = self.pos;
        loop {
            at = match byte(src, flags, at) {
                (0, end) if self.is_end(end) => {
                    whitespace = true;
                    newline = true;
                    break;
                }

                (b' ' | b'\t' | b'\x0B' | b'\x0C', next) => { next }
                (b'\r', next) => match byte(src, flags, next) {
                    (b'\n', next) => { newline = true; next }
                    _ => { next }
                }
                (b'\n', next) => { newline = true; next }
                (b'/', next) => match byte(src, flags, next) {
                    (b'/', mut next) => loop {
                        next = match byte(src, flags, next) {
                            (0, end) if self.is_end(end) => { break next; }

                            (b'\n', _) => { break next; }
                            (_, next) => { next }
                        };
                    }
                    (b'*', next) => match self.block_comment(flags, next) {
                        Some(end) => { end }
                        None => { break; }
                    }
                    _ => { break; }
                }
                _ => { break; }
            };
            whitespace = true;
            if horizontal && newline { break; }
        }

        let kind = match (whitespace, newline) {
            (false, _) => { Shape::None }
            (true, true) => { Shape::Newline }
            (true, false) => { Shape::Horizontal }
        };
        let len = at - self.pos;
        self.pos = at;
        Space { kind, len }
    }

    fn block_comment(&self, flags: &mut u8, mut at: usize) -> Option<usize> {
        loop {
            at = match byte(self.src, flags, at) {
                (0, end) if self.is_end(end) => { return None; }

                (b'*', next) => match byte(self.src, flags, next) {
                    (b'/', end) => { return Some(end); }
                    _ => { next }
                }
                (_, next) => { next }
            };
        }
    }

    /// Consume a preprocessing token. Whitespace must be skipped first with [`Tokens::whitespace`].
    pub fn preprocessing_token<'i>(
        &mut self, symbols: &'i SymbolMap, scratch: &mut Vec<u8>
    ) -> Token<'i, 's> {
        let src = self.src;
        let flags = &mut 0;

        match byte(src, flags, self.pos) {
            (0, end) if self.is_end(end) => { self.make_token(flags, Kind::EndOfFile, src.len()) }

            (b'L' | b'U', next) => match byte(src, flags, next) {
                (b'\'', next) => { self.character(flags, next) }
                (b'"', next) => { self.string(flags, next) }
                _ => { self.identifier(flags, symbols, scratch, next) }
            }
            (b'u', next) => match byte(src, flags, next) {
                (b'\'', next) => { self.character(flags, next) }
                (b'"', next) => { self.string(flags, next) }
                (b'8', eight) => match byte(src, flags, eight) {
                    (b'\'', next) => { self.character(flags, next) }
                    (b'"', next) => { self.string(flags, next) }
                    _ => { self.identifier(flags, symbols, scratch, eight) }
                }
                _ => { self.identifier(flags, symbols, scratch, next) }
            }

            (b'a'..=b'z' | b'A'..=b'Z' | b'_', next) => { self.identifier(flags, symbols, scratch, next) }
            (0x80..=0xFF, next) => match utf8(src, next - 1) {
                Some((c, next)) if c.is_alphabetic() => { self.identifier(flags, symbols, scratch, next) }
                Some((_, next)) => { self.make_token(flags, Kind::Other, next) }
                None => { self.make_token(flags, Kind::Other, next) }
            }
            (b'0'..=b'9', next) => { self.preprocessing_number(flags, next) }
            (b'\'', next) => { self.character(flags, next) }
            (b'"', next) => { self.string(flags, next) }

            (b'#', next) => match byte(src, flags, next) {
                (b'#', next) => { self.make_token(flags, Kind::HashHash, next) }
                _ => { self.make_token(flags, Kind::Hash, next) }
            }

            (b'{', next) => { self.make_token(flags, Kind::LeftBrace, next) }
            (b'}', next) => { self.make_token(flags, Kind::RightBrace, next) }
            (b'[', next) => { self.make_token(flags, Kind::LeftBracket, next) }
            (b']', next) => { self.make_token(flags, Kind::RightBracket, next) }
            (b'(', next) => { self.make_token(flags, Kind::LeftParen, next) }
            (b')', next) => { self.make_token(flags, Kind::RightParen, next) }

            (b';', next) => { self.make_token(flags, Kind::Semi, next) }
            (b':', next) => match byte(src, flags, next) {
                (b'>', next) => { self.make_token(flags, Kind::RightBracket, next) }
                (b':', next) => { self.make_token(flags, Kind::ColonColon, next) }
                _ => { self.make_token(flags, Kind::Colon, next) }
            }
            (b'.', next) => match byte(src, flags, next) {
                (b'0'..=b'9', digit) => { self.preprocessing_number(flags, digit) }
                (b'.', dot) => match byte(src, flags, dot) {
                    (b'.', end) => { self.make_token(flags, Kind::Ellipsis, end) }
                    _ => { self.make_token(flags, Kind::Dot, next) }
                }
                _ => { self.make_token(flags, Kind::Dot, next) }
            }

            (b'?', next) => { self.make_token(flags, Kind::Question, next) }
            (b'~', next) => { self.make_token(flags, Kind::Tilde, next) }

            (b'!', next) => match byte(src, flags, next) {
                (b'=', next) => { self.make_token(flags, Kind::ExclaimEq, next) }
                _ => { self.make_token(flags, Kind::Exclaim, next) }
            }
            (b'+', next) => match byte(src, flags, next) {
                (b'=', next) => { self.make_token(flags, Kind::PlusEq, next) }
                (b'+', next) => { self.make_token(flags, Kind::PlusPlus, next) }
                _ => { self.make_token(flags, Kind::Plus, next) }
            }
            (b'-', next) => match byte(src, flags, next) {
                (b'=', next) => { self.make_token(flags, Kind::MinusEq, next) }
                (b'-', next) => { self.make_token(flags, Kind::MinusMinus, next) }
                (b'>', next) => { self.make_token(flags, Kind::Arrow, next) }
                _ => { self.make_token(flags, Kind::Minus, next) }
            }
            (b'*', next) => match byte(src, flags, next) {
                (b'=', next) => { self.make_token(flags, Kind::StarEq, next) }
                _ => { self.make_token(flags, Kind::Star, next) }
            }
            (b'/', next) => match byte(src, flags, next) {
                (b'=', next) => { self.make_token(flags, Kind::SlashEq, next) }
                (b'*', _) => {
                    let fault = Some(Fault::UnterminatedComment);
                    self.make_fault(flags, fault, src.len())
                }
                _ => { self.make_token(flags, Kind::Slash, next) }
            }
            (b'%', next) => match byte(src, flags, next) {
                (b'>', next) => { self.make_token(flags, Kind::RightBrace, next) }
                (b':', hash) => match byte(src, flags, hash) {
                    (b'%', percent) => match byte(src, flags, percent) {
                        (b':', end) => { self.make_token(flags, Kind::HashHash, end) }
                        _ => { self.make_token(flags, Kind::Hash, hash) }
                    }
                    _ => { self.make_token(flags, Kind::Hash, hash) }
                }
                (b'=', next) => { self.make_token(flags, Kind::PercentEq, next) }
                _ => { self.make_token(flags, Kind::Percent, next) }
            }
            (b'^', next) => match byte(src, flags, next) {
                (b'=', next) => { self.make_token(flags, Kind::CaretEq, next) }
                _ => { self.make_token(flags, Kind::Caret, next) }
            }
            (b'&', next) => match byte(src, flags, next) {
                (b'&', next) => { self.make_token(flags, Kind::AmpAmp, next) }
                (b'=', next) => { self.make_token(flags, Kind::AmpEq, next) }
                _ => { self.make_token(flags, Kind::Amp, next) }
            }
            (b'|', next) => match byte(src, flags, next) {
                (b'|', next) => { self.make_token(flags, Kind::PipePipe, next) }
                (b'=', next) => { self.make_token(flags, Kind::PipeEq, next) }
                _ => { self.make_token(flags, Kind::Pipe, next) }
            }

            (b'=', next) => match byte(src, flags, next) {
                (b'=', next) => { self.make_token(flags, Kind::EqEq, next) }
                _ => { self.make_token(flags, Kind::Eq, next) }
            }
            (b'<', next) => match byte(src, flags, next) {
                (b':', next) => { self.make_token(flags, Kind::LeftBracket, next) }
                (b'%', next) => { self.make_token(flags, Kind::LeftBrace, next) }
                (b'=', next) => { self.make_token(flags, Kind::LtEq, next) }
                (b'<', shift) => match byte(src, flags, shift) {
                    (b'=', next) => { self.make_token(flags, Kind::LtLtEq, next) }
                    _ => { self.make_token(flags, Kind::LtLt, shift) }
                }
                _ => { self.make_token(flags, Kind::Lt, next) }
            }
            (b'>', next) => match byte(src, flags, next) {
                (b'=', next) => { self.make_token(flags, Kind::GtEq, next) }
                (b'>', shift) => match byte(src, flags, shift) {
                    (b'=', next) => { self.make_token(flags, Kind::GtGtEq, next) }
                    _ => { self.make_token(flags, Kind::GtGt, shift) }
                }
                _ => { self.make_token(flags, Kind::Gt, next) }
            }

            (b',', next) => { self.make_token(flags, Kind::Comma, next) }

            (_, next) => { self.make_token(flags, Kind::Other, next) }
        }
    }

    fn identifier<'i>(
        &mut self, flags: &mut u8, symbols: &'i SymbolMap, scratch: &mut Vec<u8>, mut at: usize
    ) -> Token<'i, 's> {
        let src = self.src;
        loop {
            at = match byte(src, flags, at) {
                (b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'_', next) => { next }
                (0x80..=0xFF, next) => match utf8(src, next - 1) {
                    Some((c, next)) if c.is_alphanumeric() => { next }
                    _ => { break; }
                }
                _ => { break; }
            };
        }

        let raw = &src[self.pos..at];
        let ident = if (*flags & FLAG_SPLICE) == 0 {
            symbols.intern(raw)
        } else {
            let start = scratch.len();
            clean_spelling(scratch, raw);
            let ident = symbols.intern(&scratch[start..]);
            scratch.truncate(start);
            ident
        };

        let offset = self.pos;
        self.pos = at;
        let spelling = Spelling::Intern(ident);
        Token { kind: Kind::Identifier, spelling, offset, len: raw.len(), fault: None }
    }

    fn preprocessing_number(&mut self, flags: &mut u8, mut at: usize) -> Token<'static, 's> {
        let src = self.src;
        loop {
            at = match byte(src, flags, at) {
                (b'e' | b'E' | b'p' | b'P', next) => match byte(src, flags, next) {
                    (b'+' | b'-', sign) => { sign }
                    _ => { next }
                }
                (b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'.', next) => { next }
                (b'\'', next) => match byte(src, flags, next) {
                    (b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'_', next) => { next }
                    _ => { break; }
                }
                _ => { break; }
            };
        }

        self.make_token(flags, Kind::Number, at)
    }

    fn character(&mut self, flags: &mut u8, at: usize) -> Token<'static, 's> {
        match byte(self.src, flags, at) {
            (b'\'', next) => { self.make_fault(flags, Some(Fault::EmptyCharacter), next) }
            _ => { self.quoted(flags, Kind::Character, b'\'', at) }
        }
    }

    fn string(&mut self, flags: &mut u8, at: usize) -> Token<'static, 's> {
        self.quoted(flags, Kind::String, b'"', at)
    }

    /// Scan the rest of a literal. The first invalid escape sequence is recorded, but scanning
    /// continues to the closing delimiter so the rest of the line still lexes.
    fn quoted(&mut self, flags: &mut u8, kind: Kind, delim: u8, mut at: usize) -> Token<'static, 's> {
        let src = self.src;
        let unterminated = match kind {
            Kind::Character => { Fault::UnterminatedCharacter }
            _ => { Fault::UnterminatedString }
        };

        let mut fault = None;
        let end = loop {
            at = match byte(src, flags, at) {
                (0, end) if self.is_end(end) => { return self.make_fault(flags, Some(unterminated), at); }
                (b'\n', _) => { return self.make_fault(flags, Some(unterminated), at); }
                (b'\\', next) => match byte(src, flags, next) {
                    (0, end) if self.is_end(end) => {
                        return self.make_fault(flags, Some(unterminated), next);
                    }
                    (b'\n', _) => { return self.make_fault(flags, Some(unterminated), next); }
                    (b, after) => {
                        if fault.is_none() && !valid_escape(src, b, after) {
                            fault = Some(Fault::InvalidEscape(b));
                        }
                        after
                    }
                }
                (b, end) if b == delim => { break end; }
                (_, next) => { next }
            };
        };

        match fault {
            Some(_) => { self.make_fault(flags, fault, end) }
            None => { self.make_token(flags, kind, end) }
        }
    }

    fn make_token(&mut self, flags: &mut u8, kind: Kind, end: usize) -> Token<'static, 's> {
        let data = &self.src[self.pos..end];
        let spelling = Spelling::Buffer { flags: *flags, data };
        let offset = self.pos;
        self.pos = end;
        Token { kind, spelling, offset, len: data.len(), fault: None }
    }

    fn make_fault(&mut self, flags: &mut u8, fault: Option<Fault>, end: usize) -> Token<'static, 's> {
        let mut token = self.make_token(flags, Kind::Error, end);
        token.fault = fault;
        token
    }
}

/// Whether `\b` starts a valid escape sequence; `after` is the offset following `b`.
fn valid_escape(src: &[u8], b: u8, after: usize) -> bool {
    let hex = |at: usize, len: usize| {
        let mut flags = 0;
        let mut at = at;
        for _ in 0..len {
            match byte(src, &mut flags, at) {
                (b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F', next) => { at = next; }
                _ => { return false; }
            }
        }
        true
    };
    match b {
        b'\'' | b'"' | b'?' | b'\\' | b'a' | b'b' | b'f' | b'n' | b'r' | b't' | b'v' => { true }
        b'0'..=b'7' => { true }
        b'x' => { hex(after, 1) }
        b'u' => { hex(after, 4) }
        b'U' => { hex(after, 8) }
        _ => { false }
    }
}

/// Every token of a buffer, with an [`Kind::EndOfLine`] after each non-empty logical line.
pub struct Stream<'i, 's> {
    tokens: Tokens<'s>,
    symbols: &'i SymbolMap,
    scratch: Vec<u8>,
    newline: bool,
    done: bool,
}

impl<'i, 's> Iterator for Stream<'i, 's> {
    type Item = Token<'i, 's>;

    fn next(&mut self) -> Option<Token<'i, 's>> {
        if self.done { return None; }
        loop {
            let start = self.tokens.offset();
            let space = self.tokens.whitespace(true);
            if space.kind == Shape::Newline {
                if !self.newline {
                    self.newline = true;
                    return Some(Token::end_of_line(start));
                }
                if !self.tokens.at_end() { continue; }
            }

            let token = self.tokens.preprocessing_token(self.symbols, &mut self.scratch);
            if token.kind() == Kind::EndOfFile {
                self.done = true;
                return None;
            }
            self.newline = false;
            return Some(token);
        }
    }
}

impl<'i, 's> Token<'i, 's> {
    pub fn end_of_line(offset: usize) -> Token<'i, 's> {
        let spelling = Spelling::Buffer { flags: 0, data: &[] };
        Token { kind: Kind::EndOfLine, spelling, offset, len: 0, fault: None }
    }

    #[inline]
    pub fn kind(&self) -> Kind { self.kind }

    /// Byte offset of the token's first character in the source buffer.
    #[inline]
    pub fn offset(&self) -> usize { self.offset }

    /// Length of the token in the source buffer, including any splices.
    #[inline]
    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub fn fault(&self) -> Option<Fault> { self.fault }

    pub fn ident(&self) -> Option<Symbol<'i>> {
        match self.spelling {
            Spelling::Intern(ident) => { Some(ident) }
            Spelling::Buffer { .. } => { None }
        }
    }

    /// Obtain a clean version of this token's spelling. Opportunistically reuse the source buffer.
    pub fn spelling<'a>(&self, scratch: &'a mut Vec<u8>) -> &'a [u8] where 'i: 'a, 's: 'a {
        match self.spelling {
            Spelling::Intern(ident) => { ident.key() }
            Spelling::Buffer { flags, data } if (flags & FLAG_SPLICE) == 0 => { data }
            Spelling::Buffer { data, .. } => {
                let len = scratch.len();
                clean_spelling(scratch, data);
                &scratch[len..]
            }
        }
    }

    /// Write a clean version of this token's spelling into `buf`.
    pub fn write_spelling(&self, buf: &mut Vec<u8>) {
        match self.spelling {
            Spelling::Intern(ident) => { buf.extend_from_slice(ident.key()) }
            Spelling::Buffer { flags, data } if (flags & FLAG_SPLICE) == 0 => { buf.extend_from_slice(data) }
            Spelling::Buffer { data, .. } => { clean_spelling(buf, data) }
        }
    }
}

impl<'i, 's> fmt::Debug for Token<'i, 's> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut scratch = Vec::default();
        let spelling = self.spelling(&mut scratch);
        write!(f, "{:?}@{}({:?})", self.kind, self.offset, String::from_utf8_lossy(spelling))
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Fault::UnterminatedString => { f.write_str("missing terminating '\"' character") }
            Fault::UnterminatedCharacter => { f.write_str("missing terminating ' character") }
            Fault::EmptyCharacter => { f.write_str("empty character constant") }
            Fault::InvalidEscape(b) => {
                write!(f, "unknown escape sequence '\\{}'", (b as char).escape_default())
            }
            Fault::UnterminatedComment => { f.write_str("unterminated comment") }
        }
    }
}

/// Write `data` to `buf` without splices.
#[cold]
fn clean_spelling(buf: &mut Vec<u8>, data: &[u8]) {
    let flags = &mut 0;
    let mut at = 0;
    while at < data.len() {
        let (b, next) = byte(data, flags, at);
        if next > data.len() { break; }
        buf.push(b);
        at = next;
    }
}

/// Translation phase 2 - physical source lines spliced to logical source lines
///
/// Returns the (spliced) byte at `at` and the offset following it. Past the end of `src` this
/// yields `0` with an offset beyond `src.len()`, which tells it apart from a real NUL byte.
#[inline]
fn byte(src: &[u8], flags: &mut u8, mut at: usize) -> (u8, usize) {
    loop {
        match src.get(at) {
            Some(&b'\\') => match splice(src, at) {
                Some(next) => { *flags |= FLAG_SPLICE; at = next; }
                None => { return (b'\\', at + 1); }
            }
            Some(&b) => { return (b, at + 1); }
            None => { return (0, src.len() + 1); }
        }
    }
}

/// If a backslash at `at` ends the physical line, the offset where the next one starts.
#[cold]
fn splice(src: &[u8], at: usize) -> Option<usize> {
    let mut end = at + 1;
    while let Some(b'\t' | b'\x0B' | b'\x0C' | b' ') = src.get(end) { end += 1; }
    if let (Some(b'\r'), Some(b'\n')) = (src.get(end), src.get(end + 1)) { end += 1; }
    match src.get(end) {
        Some(b'\n') => { Some(end + 1) }
        _ => { None }
    }
}

/// Translation phase 1 - decode one UTF-8 code point starting at `at`.
fn utf8(src: &[u8], at: usize) -> Option<(char, usize)> {
    let end = usize::min(at + 4, src.len());
    let bytes = &src[at..end];
    let valid = match str::from_utf8(bytes) {
        Ok(valid) => { valid }
        Err(error) => { str::from_utf8(&bytes[..error.valid_up_to()]).ok()? }
    };
    let c = valid.chars().next()?;
    Some((c, at + c.len_utf8()))
}

#[cfg(test)]
mod tests {
    use super::{Tokens, Shape, Kind, Fault};
    use crate::symbols::SymbolMap;

    fn kinds(src: &[u8]) -> Vec<Kind> {
        let symbols = &SymbolMap::default();
        Tokens::new(src).stream(symbols).map(|token| token.kind()).collect()
    }

    #[test]
    fn hello() {
        let symbols = &SymbolMap::default();

        let mut tokens = Tokens::new(
b"if (x < 3) {
    printf(\"hello world\");
}
"
        );
        let scratch = &mut Vec::default();

        let result = [
            (Shape::None, 0, Kind::Identifier),
            (Shape::Horizontal, 1, Kind::LeftParen),
            (Shape::None, 0, Kind::Identifier),
            (Shape::Horizontal, 1, Kind::Lt),
            (Shape::Horizontal, 1, Kind::Number),
            (Shape::None, 0, Kind::RightParen),
            (Shape::Horizontal, 1, Kind::LeftBrace),
            (Shape::Newline, 5, Kind::Identifier),
            (Shape::None, 0, Kind::LeftParen),
            (Shape::None, 0, Kind::String),
            (Shape::None, 0, Kind::RightParen),
            (Shape::None, 0, Kind::Semi),
            (Shape::Newline, 1, Kind::RightBrace),
            (Shape::Newline, 1, Kind::EndOfFile),
        ];
        for (shape, len, kind) in result {
            let space = tokens.whitespace(false);
            assert_eq!((space.kind, space.len), (shape, len));
            let token = tokens.preprocessing_token(symbols, scratch);
            assert_eq!(token.kind(), kind);
        }
    }

    #[test]
    fn splice() {
        let symbols = &SymbolMap::default();
        let scratch = &mut Vec::default();

        let spliced: Vec<_> = Tokens::new(b"#if defined(A) \\\n  + defined(B)==0\n")
            .stream(symbols)
            .map(|token| token.spelling(scratch).to_vec())
            .collect();
        let joined: Vec<_> = Tokens::new(b"#if defined(A) + defined(B)==0\n")
            .stream(symbols)
            .map(|token| token.spelling(scratch).to_vec())
            .collect();
        assert_eq!(spliced, joined);

        let mut tokens = Tokens::new(b"SQLITE_\\\r\nPRIVATE x");
        tokens.whitespace(true);
        let token = tokens.preprocessing_token(symbols, scratch);
        assert_eq!(token.ident(), Some(symbols.intern(b"SQLITE_PRIVATE")));
        assert_eq!(token.len(), b"SQLITE_\\\r\nPRIVATE".len());

        // A backslash followed by anything else is just a backslash.
        assert_eq!(kinds(b"a \\ b\n"), [Kind::Identifier, Kind::Other, Kind::Identifier, Kind::EndOfLine]);
    }

    #[test]
    fn comments() {
        assert_eq!(
            kinds(b"a /* one\ntwo */ b // three\nc"),
            [Kind::Identifier, Kind::Identifier, Kind::EndOfLine, Kind::Identifier, Kind::EndOfLine]
        );
        assert_eq!(kinds(b"\n\n   \n"), []);

        let symbols = &SymbolMap::default();
        let faults: Vec<_> = Tokens::new(b"x /* never closed\n")
            .stream(symbols)
            .filter_map(|token| token.fault())
            .collect();
        assert_eq!(faults, [Fault::UnterminatedComment]);
    }

    #[test]
    fn punctuators() {
        assert_eq!(
            kinds(b"<: :> <% %> %: %:%: ... -> << >>= :: a.b"),
            [
                Kind::LeftBracket, Kind::RightBracket, Kind::LeftBrace, Kind::RightBrace,
                Kind::Hash, Kind::HashHash, Kind::Ellipsis, Kind::Arrow, Kind::LtLt, Kind::GtGtEq,
                Kind::ColonColon, Kind::Identifier, Kind::Dot, Kind::Identifier, Kind::EndOfLine,
            ]
        );
        assert_eq!(kinds(b"@ $ `"), [Kind::Other, Kind::Other, Kind::Other, Kind::EndOfLine]);
    }

    #[test]
    fn literals() {
        let symbols = &SymbolMap::default();
        let scratch = &mut Vec::default();

        let tokens: Vec<_> = Tokens::new(b"0x1fULL 1e+5 .5 1'000 'a' L'b' u8\"c\" u8x \"\\x41\\n\"")
            .stream(symbols)
            .collect();
        let kinds: Vec<_> = tokens.iter().map(|token| token.kind()).collect();
        assert_eq!(kinds, [
            Kind::Number, Kind::Number, Kind::Number, Kind::Number,
            Kind::Character, Kind::Character, Kind::String, Kind::Identifier, Kind::String,
            Kind::EndOfLine,
        ]);
        assert_eq!(tokens[1].spelling(scratch), b"1e+5");
        assert_eq!(tokens[7].ident(), Some(symbols.intern(b"u8x")));
    }

    #[test]
    fn faults() {
        let symbols = &SymbolMap::default();
        let fault = |src: &[u8]| {
            Tokens::new(src).stream(symbols).find_map(|token| token.fault())
        };

        assert_eq!(fault(b"\"abc\n"), Some(Fault::UnterminatedString));
        assert_eq!(fault(b"'a"), Some(Fault::UnterminatedCharacter));
        assert_eq!(fault(b"''"), Some(Fault::EmptyCharacter));
        assert_eq!(fault(b"\"\\q\""), Some(Fault::InvalidEscape(b'q')));
        assert_eq!(fault(b"'\\xg'"), Some(Fault::InvalidEscape(b'x')));
        assert_eq!(fault(b"\"\\u12\""), Some(Fault::InvalidEscape(b'u')));
        assert_eq!(fault(b"\"ok\\\"\" '\\0' '\\''"), None);

        // The rest of the line still lexes after a bad escape.
        let kinds: Vec<_> = Tokens::new(b"\"\\q\" x\n").stream(symbols).map(|token| token.kind()).collect();
        assert_eq!(kinds, [Kind::Error, Kind::Identifier, Kind::EndOfLine]);
    }

    #[test]
    fn restart() {
        let symbols = &SymbolMap::default();
        let mut tokens = Tokens::new(b"a b c");
        tokens.whitespace(true);
        tokens.preprocessing_token(symbols, &mut Vec::default());

        let saved = tokens;
        let first: Vec<_> = tokens.stream(symbols).map(|token| token.offset()).collect();
        let again: Vec<_> = saved.stream(symbols).map(|token| token.offset()).collect();
        assert_eq!(first, again);
        assert_eq!(first, [2, 4, 5]);
    }
}
