use std::fmt;

use thiserror::Error;

use crate::lex;
use crate::macros::MacroTable;
use crate::symbols::{SymbolMap, Symbol};

/// The deepest nesting of operators and parentheses a condition may have, counting the
/// conditions of the macros it expands.
pub const MAX_DEPTH: usize = 256;

/// A preprocessor arithmetic value: `intmax_t` or `uintmax_t`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Value { pub unsigned: bool, pub value: u64 }

/// A parsed `#if` or `#elif` condition.
///
/// Nodes carry no source offsets, so the same condition spelled across several physical lines
/// parses to an equal tree.
///
/// Binary operators are left-associative, so a run like `a + b * c - d` is kept flat as
/// `Chain(a, [(+, b * c), (-, d)])` and applied left to right. Only parentheses, unary operators
/// and the branches of `?:` make the tree deeper, and those count against [`MAX_DEPTH`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Expr<'i> {
    Literal(Value),
    Defined(Symbol<'i>),
    Identifier(Symbol<'i>),
    Unary(UnaryOp, Box<Expr<'i>>),
    Chain(Box<Expr<'i>>, Vec<(Operator, Expr<'i>)>),
    Conditional(Box<Expr<'i>>, Box<Expr<'i>>, Box<Expr<'i>>),
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Operator { Binary(BinaryOp), Comparison(CompareOp) }

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum UnaryOp { Plus, Minus, Complement, Not }

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BinaryOp {
    Mul, Div, Rem, Add, Sub, Shl, Shr,
    BitAnd, BitXor, BitOr, And, Or, Comma,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum CompareOp { Eq, Ne, Lt, Gt, Le, Ge }

/// Identifiers with a fixed meaning inside conditions, and the session's builtin macros.
#[derive(Copy, Clone)]
pub struct Keywords<'i> {
    pub defined: Symbol<'i>,
    pub true_: Symbol<'i>,
    pub false_: Symbol<'i>,
    /// `__LINE__`: the line of the directive being evaluated, unless the user defined it.
    pub line: Symbol<'i>,
    /// `__FILE__`: an ordinary macro that the session predefines.
    pub file: Symbol<'i>,
}

/// What evaluation needs from the session.
#[derive(Copy, Clone)]
pub struct Env<'m, 'i> {
    pub macros: &'m MacroTable<'i>,
    pub keywords: &'m Keywords<'i>,
    /// The line `__LINE__` expands to.
    pub line: u32,
}

#[derive(Clone, PartialEq, Eq, Debug, Error)]
#[error("{message}")]
pub struct ExprError { pub offset: usize, pub message: String }

impl<'i> Keywords<'i> {
    pub fn new(symbols: &'i SymbolMap) -> Keywords<'i> {
        let defined = symbols.intern(b"defined");
        let true_ = symbols.intern(b"true");
        let false_ = symbols.intern(b"false");
        let line = symbols.intern(b"__LINE__");
        let file = symbols.intern(b"__FILE__");
        Keywords { defined, true_, false_, line, file }
    }

    pub fn is_builtin(&self, name: Symbol<'i>) -> bool { name == self.line || name == self.file }
}

impl<'m, 'i> Env<'m, 'i> {
    /// Whether `defined name` holds. `__LINE__` is always defined.
    pub fn is_defined(&self, name: Symbol<'i>) -> bool {
        self.macros.contains(name) || name == self.keywords.line
    }
}

impl Value {
    pub const FALSE: Value = Value { unsigned: false, value: 0 };
    pub const TRUE: Value = Value { unsigned: false, value: 1 };

    pub fn signed(value: i64) -> Value { Value { unsigned: false, value: value as u64 } }

    pub fn is_true(self) -> bool { self.value != 0 }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unsigned { write!(f, "{}u", self.value) } else { write!(f, "{}", self.value as i64) }
    }
}

/// Parse the tokens of a condition. `end` is the offset reported for errors at the end of line.
pub fn parse<'i>(
    tokens: &[lex::Token<'i, '_>], keywords: &Keywords<'i>, end: usize
) -> Result<Expr<'i>, ExprError> {
    let mut parser = Parser { tokens, pos: 0, end, keywords, depth: 0, scratch: Vec::default() };
    if tokens.is_empty() {
        return Err(parser.error("missing expression"));
    }

    let expr = parser.expression(3)?;
    match parser.peek() {
        lex::Kind::EndOfLine => { Ok(expr) }
        lex::Kind::Comma => { Err(parser.error("comma operator in operand of conditional directive")) }
        lex::Kind::RightParen => { Err(parser.error("missing '(' in expression")) }
        lex::Kind::Colon => { Err(parser.error("':' without preceding '?'")) }
        _ => { Err(parser.unexpected("missing binary operator before token")) }
    }
}

struct Parser<'a, 'i, 's> {
    tokens: &'a [lex::Token<'i, 's>],
    pos: usize,
    end: usize,
    keywords: &'a Keywords<'i>,
    depth: usize,
    scratch: Vec<u8>,
}

impl<'a, 'i, 's> Parser<'a, 'i, 's> {
    fn peek(&self) -> lex::Kind {
        self.tokens.get(self.pos).map_or(lex::Kind::EndOfLine, |token| token.kind())
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |token| token.offset())
    }

    fn bump(&mut self) { self.pos += 1; }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError { offset: self.offset(), message: message.into() }
    }

    fn unexpected(&mut self, what: &str) -> ExprError {
        let offset = self.offset();
        let message = match self.tokens.get(self.pos) {
            Some(token) => {
                self.scratch.clear();
                let spelling = token.spelling(&mut self.scratch);
                format!("{} \"{}\"", what, String::from_utf8_lossy(spelling))
            }
            None => { format!("{} at end of expression", what) }
        };
        ExprError { offset, message }
    }

    fn expression(&mut self, precedence: u8) -> Result<Expr<'i>, ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        let expr = self.operators(precedence);
        self.depth -= 1;
        expr
    }

    fn operators(&mut self, precedence: u8) -> Result<Expr<'i>, ExprError> {
        let mut first = self.operand()?;
        let mut rest = Vec::default();

        loop {
            let operator = self.peek();
            let op = match operator {
                lex::Kind::Star | lex::Kind::Slash | lex::Kind::Percent => { 14 }
                lex::Kind::Plus | lex::Kind::Minus => { 13 }
                lex::Kind::LtLt | lex::Kind::GtGt => { 12 }
                lex::Kind::Lt | lex::Kind::Gt | lex::Kind::LtEq | lex::Kind::GtEq => { 10 }
                lex::Kind::EqEq | lex::Kind::ExclaimEq => { 9 }
                lex::Kind::Amp => { 8 }
                lex::Kind::Caret => { 7 }
                lex::Kind::Pipe => { 6 }
                lex::Kind::AmpAmp => { 5 }
                lex::Kind::PipePipe => { 4 }
                lex::Kind::Question => { 3 }
                lex::Kind::Comma => { 1 }
                lex::Kind::Colon | lex::Kind::RightParen | lex::Kind::EndOfLine => { 0 }
                _ => { return Err(self.unexpected("missing binary operator before token")); }
            };
            if op < precedence { return Ok(Expr::chain(first, rest)); }

            self.bump();
            if operator == lex::Kind::Question {
                let then = self.expression(1)?;
                match self.peek() {
                    lex::Kind::Colon => {}
                    _ => { return Err(self.error("missing ':' in conditional expression")); }
                }
                self.bump();
                let else_ = self.expression(op)?;

                let condition = Expr::chain(first, std::mem::take(&mut rest));
                first = Expr::Conditional(Box::new(condition), Box::new(then), Box::new(else_));
                continue;
            }

            let operator = match operator {
                lex::Kind::EqEq => { Operator::Comparison(CompareOp::Eq) }
                lex::Kind::ExclaimEq => { Operator::Comparison(CompareOp::Ne) }
                lex::Kind::Lt => { Operator::Comparison(CompareOp::Lt) }
                lex::Kind::Gt => { Operator::Comparison(CompareOp::Gt) }
                lex::Kind::LtEq => { Operator::Comparison(CompareOp::Le) }
                lex::Kind::GtEq => { Operator::Comparison(CompareOp::Ge) }
                lex::Kind::Star => { Operator::Binary(BinaryOp::Mul) }
                lex::Kind::Slash => { Operator::Binary(BinaryOp::Div) }
                lex::Kind::Percent => { Operator::Binary(BinaryOp::Rem) }
                lex::Kind::Plus => { Operator::Binary(BinaryOp::Add) }
                lex::Kind::Minus => { Operator::Binary(BinaryOp::Sub) }
                lex::Kind::LtLt => { Operator::Binary(BinaryOp::Shl) }
                lex::Kind::GtGt => { Operator::Binary(BinaryOp::Shr) }
                lex::Kind::Amp => { Operator::Binary(BinaryOp::BitAnd) }
                lex::Kind::Caret => { Operator::Binary(BinaryOp::BitXor) }
                lex::Kind::Pipe => { Operator::Binary(BinaryOp::BitOr) }
                lex::Kind::AmpAmp => { Operator::Binary(BinaryOp::And) }
                lex::Kind::PipePipe => { Operator::Binary(BinaryOp::Or) }
                _ => { Operator::Binary(BinaryOp::Comma) }
            };
            let right = self.expression(op + 1)?;
            rest.push((operator, right));
        }
    }

    fn operand(&mut self) -> Result<Expr<'i>, ExprError> {
        let token = match self.tokens.get(self.pos) {
            Some(&token) => { token }
            None => { return Err(self.error("missing operand at end of expression")); }
        };

        let unary = match token.kind() {
            lex::Kind::Identifier => {
                self.bump();
                let ident = match token.ident() {
                    Some(ident) => { ident }
                    None => { return Err(self.error("invalid identifier")); }
                };
                return if ident == self.keywords.defined {
                    self.defined()
                } else if ident == self.keywords.true_ {
                    Ok(Expr::Literal(Value::TRUE))
                } else if ident == self.keywords.false_ {
                    Ok(Expr::Literal(Value::FALSE))
                } else {
                    Ok(Expr::Identifier(ident))
                };
            }
            lex::Kind::Number => {
                self.scratch.clear();
                let value = integer(token.spelling(&mut self.scratch))
                    .map_err(|message| ExprError { offset: token.offset(), message })?;
                self.bump();
                return Ok(Expr::Literal(value));
            }
            lex::Kind::Character => {
                self.scratch.clear();
                let value = character(token.spelling(&mut self.scratch))
                    .map_err(|message| ExprError { offset: token.offset(), message })?;
                self.bump();
                return Ok(Expr::Literal(value));
            }
            lex::Kind::String => {
                return Err(self.error("string literal in preprocessor expression"));
            }
            lex::Kind::LeftParen => {
                self.bump();
                let expr = self.expression(1)?;
                match self.peek() {
                    lex::Kind::RightParen => {}
                    _ => { return Err(self.error("missing ')' in expression")); }
                }
                self.bump();
                return Ok(expr);
            }
            lex::Kind::Plus => { UnaryOp::Plus }
            lex::Kind::Minus => { UnaryOp::Minus }
            lex::Kind::Tilde => { UnaryOp::Complement }
            lex::Kind::Exclaim => { UnaryOp::Not }
            lex::Kind::RightParen => { return Err(self.error("missing operand before ')'")); }
            _ => { return Err(self.unexpected("missing operand before token")); }
        };

        self.bump();
        let operand = self.expression(15)?;
        Ok(Expr::Unary(unary, Box::new(operand)))
    }

    /// `defined NAME` or `defined ( NAME )`, with `defined` already consumed.
    fn defined(&mut self) -> Result<Expr<'i>, ExprError> {
        let paren = self.peek() == lex::Kind::LeftParen;
        if paren { self.bump(); }

        let name = match self.tokens.get(self.pos).and_then(|token| token.ident()) {
            Some(name) => { name }
            None => { return Err(self.error("operator \"defined\" requires an identifier")); }
        };
        self.bump();

        if paren {
            match self.peek() {
                lex::Kind::RightParen => { self.bump(); }
                _ => { return Err(self.error("missing ')' after \"defined\"")); }
            }
        }
        Ok(Expr::Defined(name))
    }
}

impl<'i> Expr<'i> {
    /// `first` alone, or `first` followed by `rest`.
    fn chain(first: Expr<'i>, rest: Vec<(Operator, Expr<'i>)>) -> Expr<'i> {
        if rest.is_empty() { first } else { Expr::Chain(Box::new(first), rest) }
    }

    /// Evaluate with C preprocessor arithmetic. Errors are reported at `offset`.
    pub fn evaluate(&self, env: Env<'_, 'i>, offset: usize) -> Result<Value, ExprError> {
        self.eval(env, true, 0).map_err(|message| ExprError { offset, message })
    }

    /// `live` is false in operands that short-circuiting skips. Their division by zero is not an
    /// error and their identifiers are not looked up.
    ///
    /// `depth` counts the nodes above this one, including those of enclosing macro expansions.
    fn eval(&self, env: Env<'_, 'i>, live: bool, depth: usize) -> Result<Value, String> {
        let depth = depth + 1;
        let value = match *self {
            Expr::Literal(value) => { value }
            Expr::Defined(name) => { Value { unsigned: false, value: env.is_defined(name) as u64 } }
            Expr::Identifier(name) => if live { identifier(name, env, depth)? } else { Value::FALSE }
            Expr::Unary(op, ref operand) => {
                let mut value = operand.eval(env, live, depth)?;
                match op {
                    UnaryOp::Plus => {}
                    UnaryOp::Minus => { value.value = value.value.wrapping_neg(); }
                    UnaryOp::Complement => { value.value = !value.value; }
                    UnaryOp::Not => {
                        value.unsigned = false;
                        value.value = !value.is_true() as u64;
                    }
                }
                value
            }
            Expr::Chain(ref first, ref rest) => {
                let mut left = first.eval(env, live, depth)?;
                for &(operator, ref operand) in rest {
                    left = match operator {
                        Operator::Binary(BinaryOp::And) => {
                            let right = operand.eval(env, live && left.is_true(), depth)?;
                            Value { unsigned: false, value: (left.is_true() && right.is_true()) as u64 }
                        }
                        Operator::Binary(BinaryOp::Or) => {
                            let right = operand.eval(env, live && !left.is_true(), depth)?;
                            Value { unsigned: false, value: (left.is_true() || right.is_true()) as u64 }
                        }
                        Operator::Binary(BinaryOp::Comma) => { operand.eval(env, live, depth)? }
                        Operator::Binary(op) => {
                            let right = operand.eval(env, live, depth)?;
                            arithmetic(op, left, right, live)?
                        }
                        Operator::Comparison(op) => {
                            let right = operand.eval(env, live, depth)?;
                            compare(op, left, right)
                        }
                    };
                }
                left
            }
            Expr::Conditional(ref condition, ref then, ref else_) => {
                let condition = condition.eval(env, live, depth)?.is_true();
                let then = then.eval(env, live && condition, depth)?;
                let else_ = else_.eval(env, live && !condition, depth)?;
                let unsigned = then.unsigned | else_.unsigned;
                let value = if condition { then.value } else { else_.value };
                Value { unsigned, value }
            }
        };
        Ok(value)
    }
}

fn arithmetic(op: BinaryOp, left: Value, right: Value, live: bool) -> Result<Value, String> {
    let unsigned = match op {
        BinaryOp::Shl | BinaryOp::Shr => { left.unsigned }
        _ => { left.unsigned | right.unsigned }
    };
    let value = match op {
        BinaryOp::Mul => { u64::wrapping_mul(left.value, right.value) }
        BinaryOp::Div | BinaryOp::Rem if right.value == 0 => {
            if live { return Err("division by zero in preprocessor expression".to_string()); }
            0
        }
        BinaryOp::Div => if unsigned {
            u64::wrapping_div(left.value, right.value)
        } else {
            i64::wrapping_div(left.value as i64, right.value as i64) as u64
        }
        BinaryOp::Rem => if unsigned {
            u64::wrapping_rem(left.value, right.value)
        } else {
            i64::wrapping_rem(left.value as i64, right.value as i64) as u64
        }
        BinaryOp::Add => { u64::wrapping_add(left.value, right.value) }
        BinaryOp::Sub => { u64::wrapping_sub(left.value, right.value) }
        BinaryOp::Shl => if right.value >= 64 { 0 } else { left.value << right.value }
        BinaryOp::Shr => {
            let right = if right.value < 64 { right.value } else { 63 };
            if unsigned {
                left.value >> right
            } else {
                (left.value as i64 >> right) as u64
            }
        }
        BinaryOp::BitAnd => { left.value & right.value }
        BinaryOp::BitXor => { left.value ^ right.value }
        BinaryOp::BitOr => { left.value | right.value }
        BinaryOp::And => { (left.is_true() && right.is_true()) as u64 }
        BinaryOp::Or => { (left.is_true() || right.is_true()) as u64 }
        BinaryOp::Comma => { right.value }
    };
    Ok(Value { unsigned, value })
}

fn compare(op: CompareOp, left: Value, right: Value) -> Value {
    let unsigned = left.unsigned | right.unsigned;
    let (l, r) = (left.value, right.value);
    let (sl, sr) = (l as i64, r as i64);
    let result = match op {
        CompareOp::Eq => { l == r }
        CompareOp::Ne => { l != r }
        CompareOp::Lt => if unsigned { l < r } else { sl < sr }
        CompareOp::Gt => if unsigned { l > r } else { sl > sr }
        CompareOp::Le => if unsigned { l <= r } else { sl <= sr }
        CompareOp::Ge => if unsigned { l >= r } else { sl >= sr }
    };
    Value { unsigned: false, value: result as u64 }
}

/// An identifier that is not a keyword: 0 if undefined, otherwise the value of its object-like
/// replacement text. A macro already being evaluated counts as 0.
fn identifier<'i>(name: Symbol<'i>, env: Env<'_, 'i>, depth: usize) -> Result<Value, String> {
    let definition = match env.macros.get(name) {
        Some(definition) => { definition }
        None if name == env.keywords.line => { return Ok(Value::signed(env.line as i64)); }
        None => { return Ok(Value::FALSE); }
    };
    if definition.is_function_like() {
        return Err(format!("function-like macro \"{}\" in preprocessor expression", name));
    }
    if definition.value.is_empty() {
        return Err(format!("macro \"{}\" expands to nothing", name));
    }
    if depth >= MAX_DEPTH {
        return Err(format!("macro \"{}\" nested too deeply", name));
    }
    let _active = match definition.enter() {
        Some(active) => { active }
        None => { return Ok(Value::FALSE); }
    };

    let in_expansion = |message: &str| format!("in expansion of macro \"{}\": {}", name, message);

    let tokens: Vec<_> = lex::Tokens::new(&definition.value)
        .stream(env.macros.symbols())
        .filter(|token| token.kind() != lex::Kind::EndOfLine)
        .collect();
    if let Some(fault) = tokens.iter().find_map(|token| token.fault()) {
        return Err(in_expansion(&fault.to_string()));
    }

    let expr = parse(&tokens, env.keywords, definition.value.len())
        .map_err(|error| in_expansion(&error.message))?;
    expr.eval(env, true, depth).map_err(|message| in_expansion(&message))
}

/// Evaluate an integer constant such as `0x7fffULL` or `1'000`.
pub fn integer(spelling: &[u8]) -> Result<Value, String> {
    let text: Vec<u8> = spelling.iter().copied().filter(|&b| b != b'\'').collect();
    let invalid = || format!("invalid integer constant \"{}\"", String::from_utf8_lossy(spelling));

    let (radix, digits) = match text[..] {
        [b'0', b'x' | b'X', ref rest @ ..] => { (16, rest) }
        [b'0', b'b' | b'B', ref rest @ ..] => { (2, rest) }
        [b'0', ref rest @ ..] => { (8, rest) }
        _ => { (10, &text[..]) }
    };

    let float = text.contains(&b'.') || match radix {
        16 => { digits.iter().any(|&b| b == b'p' || b == b'P') }
        2 => { false }
        _ => { digits.iter().any(|&b| b == b'e' || b == b'E') }
    };
    if float {
        return Err(format!(
            "floating constant \"{}\" in preprocessor expression", String::from_utf8_lossy(spelling)
        ));
    }

    let len = digits.iter().take_while(|&&b| (b as char).is_digit(radix)).count();
    let (digits, suffix) = digits.split_at(len);
    if digits.is_empty() && radix != 8 { return Err(invalid()); }

    let mut value: u64 = 0;
    for &b in digits {
        let digit = (b as char).to_digit(radix).ok_or_else(invalid)?;
        value = value.checked_mul(radix as u64)
            .and_then(|value| value.checked_add(digit as u64))
            .ok_or_else(|| {
                format!("integer constant \"{}\" is too large", String::from_utf8_lossy(spelling))
            })?;
    }

    let unsigned = match suffix {
        b"" | b"l" | b"L" | b"ll" | b"LL" => { false }
        b"u" | b"U" |
        b"ul" | b"uL" | b"Ul" | b"UL" | b"lu" | b"lU" | b"Lu" | b"LU" |
        b"ull" | b"uLL" | b"Ull" | b"ULL" | b"llu" | b"llU" | b"LLu" | b"LLU" => { true }
        _ => {
            return Err(format!(
                "invalid suffix \"{}\" on integer constant", String::from_utf8_lossy(suffix)
            ));
        }
    };

    Ok(Value { unsigned: unsigned || value > i64::MAX as u64, value })
}

/// Evaluate a character constant such as `'a'`, `'\n'` or `L'\x41'`.
///
/// Plain constants have type `int`: a single character is sign-extended from `char`, several
/// are packed big-endian. Prefixed constants take the value of their last code point.
pub fn character(spelling: &[u8]) -> Result<Value, String> {
    // The largest code unit an octal or hex escape may produce.
    let (prefixed, max, body) = match spelling {
        [b'u', b'8', rest @ ..] => { (true, 0xFF, rest) }
        [b'u', rest @ ..] => { (true, 0xFFFF, rest) }
        [b'L' | b'U', rest @ ..] => { (true, u32::MAX, rest) }
        _ => { (false, 0xFF, spelling) }
    };
    let body = match body {
        [b'\'', body @ .., b'\''] if !body.is_empty() => { body }
        _ => {
            return Err(format!("invalid character constant {}", String::from_utf8_lossy(spelling)));
        }
    };

    let mut units = Vec::default();
    let mut at = 0;
    while at < body.len() {
        let (unit, next) = match body[at] {
            b'\\' => { escape(body, at + 1, max)? }
            lead if prefixed => {
                let len = match lead { 0xF0..=0xFF => { 4 } 0xE0..=0xEF => { 3 } 0xC0..=0xDF => { 2 } _ => { 1 } };
                let end = usize::min(at + len, body.len());
                match std::str::from_utf8(&body[at..end]).ok().and_then(|text| text.chars().next()) {
                    Some(c) => { (c as u32, end) }
                    None => { (lead as u32, at + 1) }
                }
            }
            b => { (b as u32, at + 1) }
        };
        units.push(unit);
        at = next;
    }

    let value = match (prefixed, &units[..]) {
        (true, [.., last]) => { Value { unsigned: true, value: *last as u64 } }
        (false, [unit]) => { Value::signed(*unit as u8 as i8 as i64) }
        (false, units) => {
            let packed = units.iter().fold(0u32, |packed, &unit| packed << 8 | (unit & 0xff));
            Value::signed(packed as i32 as i64)
        }
        (true, []) => { Value::FALSE }
    };
    Ok(value)
}

/// Decode the escape sequence after a backslash at `at - 1`. Octal and hex escapes must fit in
/// `max`.
fn escape(body: &[u8], at: usize, max: u32) -> Result<(u32, usize), String> {
    let simple = |c: u8| (c as u32, at + 1);
    let b = match body.get(at) {
        Some(&b) => { b }
        None => { return Err("incomplete escape sequence".to_string()); }
    };
    let result = match b {
        b'\'' | b'"' | b'?' | b'\\' => { simple(b) }
        b'a' => { simple(0x07) }
        b'b' => { simple(0x08) }
        b'f' => { simple(0x0C) }
        b'n' => { simple(b'\n') }
        b'r' => { simple(b'\r') }
        b't' => { simple(b'\t') }
        b'v' => { simple(0x0B) }
        b'0'..=b'7' => {
            let len = body[at..].iter().take(3).take_while(|b| matches!(b, b'0'..=b'7')).count();
            let value = body[at..at + len].iter().fold(0u32, |value, &b| value << 3 | (b - b'0') as u32);
            if value > max { return Err("octal escape sequence out of range".to_string()); }
            (value, at + len)
        }
        b'x' | b'u' | b'U' => {
            let len = match b { b'u' => { 4 } b'U' => { 8 } _ => { usize::MAX } };
            let digits: Vec<u32> = body[at + 1..].iter()
                .map_while(|&b| (b as char).to_digit(16))
                .take(len)
                .collect();
            if digits.is_empty() || (b != b'x' && digits.len() != len) {
                return Err(format!("invalid escape sequence \"\\{}\"", b as char));
            }
            let value = digits.iter().try_fold(0u32, |value, &digit| {
                value.checked_mul(16).map(|value| value | digit)
            });
            match value {
                Some(value) if b != b'x' || value <= max => { (value, at + 1 + digits.len()) }
                _ => { return Err("hex escape sequence out of range".to_string()); }
            }
        }
        _ => { return Err(format!("unknown escape sequence \"\\{}\"", (b as char).escape_default())); }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::{Expr, Keywords, Env, Value, ExprError, Operator, BinaryOp, CompareOp, UnaryOp, parse};
    use crate::lex;
    use crate::macros::{MacroTable, Macro, Parameters};
    use crate::symbols::SymbolMap;

    fn parse_str<'i>(symbols: &'i SymbolMap, src: &[u8]) -> Result<Expr<'i>, ExprError> {
        let keywords = Keywords::new(symbols);
        let tokens: Vec<_> = lex::Tokens::new(src)
            .stream(symbols)
            .filter(|token| token.kind() != lex::Kind::EndOfLine)
            .collect();
        parse(&tokens, &keywords, src.len())
    }

    fn eval(macros: &MacroTable<'_>, src: &[u8]) -> Result<Value, ExprError> {
        let symbols = macros.symbols();
        let keywords = Keywords::new(symbols);
        let expr = parse_str(symbols, src)?;
        expr.evaluate(Env { macros, keywords: &keywords, line: 12 }, 0)
    }

    fn value(src: &[u8]) -> i64 {
        let symbols = &SymbolMap::default();
        let macros = MacroTable::new(symbols);
        eval(&macros, src).map(|value| value.value as i64).unwrap()
    }

    fn message(macros: &MacroTable<'_>, src: &[u8]) -> String {
        eval(macros, src).unwrap_err().message
    }

    #[test]
    fn precedence() {
        let symbols = &SymbolMap::default();
        let a = symbols.intern(b"A");
        let b = symbols.intern(b"B");

        let expr = parse_str(symbols, b"defined(A) + defined B == 0").unwrap();
        assert_eq!(expr, Expr::Chain(Box::new(Expr::Defined(a)), vec![
            (Operator::Binary(BinaryOp::Add), Expr::Defined(b)),
            (Operator::Comparison(CompareOp::Eq), Expr::Literal(Value { unsigned: false, value: 0 })),
        ]));

        let expr = parse_str(symbols, b"!A || -B").unwrap();
        assert_eq!(expr, Expr::Chain(
            Box::new(Expr::Unary(UnaryOp::Not, Box::new(Expr::Identifier(a)))),
            vec![(Operator::Binary(BinaryOp::Or), Expr::Unary(UnaryOp::Minus, Box::new(Expr::Identifier(b))))],
        ));

        let expr = parse_str(symbols, b"A * B + 1 ? A : B").unwrap();
        let one = Expr::Literal(Value::TRUE);
        assert_eq!(expr, Expr::Conditional(
            Box::new(Expr::Chain(Box::new(Expr::Identifier(a)), vec![
                (Operator::Binary(BinaryOp::Mul), Expr::Identifier(b)),
                (Operator::Binary(BinaryOp::Add), one),
            ])),
            Box::new(Expr::Identifier(a)),
            Box::new(Expr::Identifier(b)),
        ));

        assert_eq!(value(b"1 + 2 * 3"), 7);
        assert_eq!(value(b"(1 + 2) * 3"), 9);
        assert_eq!(value(b"-2 * 3"), -6);
        assert_eq!(value(b"1 << 4 >> 2"), 4);
        assert_eq!(value(b"6 & 3 | 8 ^ 1"), 11);
        assert_eq!(value(b"10 - 4 - 3"), 3);
        assert_eq!(value(b"1 ? 2 : 0 ? 3 : 4"), 2);
        assert_eq!(value(b"0 ? 2 : 0 ? 3 : 4"), 4);
        assert_eq!(value(b"(1, 2)"), 2);
        assert_eq!(value(b"true && !false"), 1);
        assert_eq!(value(b"~0 == -1"), 1);
        assert_eq!(value(b"2 + 3 * 4 - 6 / 2 == 11"), 1);
        assert_eq!(value(b"0 && 1 || 2"), 1);
        assert_eq!(value(b"(1 ? 2 : 3, 4 ? 5 : 6)"), 5);
    }

    #[test]
    fn long_chains() {
        let symbols = &SymbolMap::default();
        let macros = &MacroTable::new(symbols);

        let mut sum = b"0".to_vec();
        for _ in 0..100_000 { sum.extend_from_slice(b" + 1"); }
        assert_eq!(eval(macros, &sum).unwrap().value, 100_000);

        let mut any = b"0".to_vec();
        for _ in 0..100_000 { any.extend_from_slice(b" || 0"); }
        any.extend_from_slice(b" || 1 || 1 / 0");
        assert_eq!(eval(macros, &any).unwrap().value, 1);

        let mut all = b"1".to_vec();
        for _ in 0..100_000 { all.extend_from_slice(b" && UNDEFINED == 0"); }
        all.extend_from_slice(b" && 1 / 0");
        assert_eq!(message(macros, &all), "division by zero in preprocessor expression");
    }

    #[test]
    fn arithmetic() {
        assert_eq!(value(b"7 / -2"), -3);
        assert_eq!(value(b"7 % -2"), 1);
        assert_eq!(value(b"-1 >> 1"), -1);
        assert_eq!(value(b"1 << 64"), 0);
        assert_eq!(value(b"-1 < 0"), 1);
        assert_eq!(value(b"-1 < 0u"), 0);
        assert_eq!(value(b"0x7fffffffffffffff + 1 < 0"), 1);
        assert_eq!(value(b"18446744073709551615 == -1"), 1);
        assert_eq!(value(b"0 && 1 / 0"), 0);
        assert_eq!(value(b"1 || 1 % 0"), 1);
        assert_eq!(value(b"1 ? 2 : 1 / 0"), 2);
    }

    #[test]
    fn literals() {
        assert_eq!(value(b"0x1F"), 31);
        assert_eq!(value(b"017"), 15);
        assert_eq!(value(b"0b101"), 5);
        assert_eq!(value(b"1'000'000"), 1_000_000);
        assert_eq!(value(b"10ULL"), 10);
        assert_eq!(value(b"0"), 0);
        assert_eq!(value(b"'a'"), 97);
        assert_eq!(value(b"'\\n'"), 10);
        assert_eq!(value(b"'\\377'"), -1);
        assert_eq!(value(b"'\\x41'"), 65);
        assert_eq!(value(b"'ab'"), 0x6162);
        assert_eq!(value(b"L'\\xff'"), 255);
        assert_eq!(value(b"u'\\u00e9'"), 0xe9);
        assert_eq!(value(b"'\\xff'"), -1);
        assert_eq!(value(b"u'\\xffff'"), 0xffff);
        assert_eq!(value(b"L'\\777'"), 0o777);

        let symbols = &SymbolMap::default();
        let macros = &MacroTable::new(symbols);
        assert!(eval(macros, b"10u").unwrap().unsigned);
        assert!(!eval(macros, b"10l").unwrap().unsigned);
        assert!(eval(macros, b"0xffffffffffffffff").unwrap().unsigned);
    }

    #[test]
    fn identifiers() {
        let symbols = &SymbolMap::default();
        let macros = &mut MacroTable::new(symbols);
        macros.define(b"VERSION", Some(b"3"));
        macros.define(b"NEXT", Some(b"(VERSION + 1)"));
        macros.define(b"SELF", Some(b"SELF + 1"));
        macros.define(b"EMPTY", None);
        let x = symbols.intern(b"x");
        let parameters = Parameters { names: vec![x], variadic: false };
        macros.insert(symbols.intern(b"F"), Macro::function(parameters, b"x"));

        assert_eq!(eval(macros, b"UNDEFINED").unwrap().value, 0);
        assert_eq!(eval(macros, b"VERSION >= 3").unwrap().value, 1);
        assert_eq!(eval(macros, b"NEXT * 2").unwrap().value, 8);
        assert_eq!(eval(macros, b"SELF").unwrap().value, 1);
        assert_eq!(eval(macros, b"defined EMPTY").unwrap().value, 1);
        assert_eq!(eval(macros, b"0 && F").unwrap().value, 0);

        assert_eq!(message(macros, b"EMPTY"), "macro \"EMPTY\" expands to nothing");
        assert_eq!(message(macros, b"F"), "function-like macro \"F\" in preprocessor expression");

        assert_eq!(eval(macros, b"__LINE__").unwrap().value, 12);
        assert_eq!(eval(macros, b"defined __LINE__ && !defined __FILE__").unwrap().value, 1);
        macros.define(b"HERE", Some(b"__LINE__ + 1"));
        assert_eq!(eval(macros, b"HERE").unwrap().value, 13);
        macros.define(b"__LINE__", Some(b"99"));
        assert_eq!(eval(macros, b"__LINE__").unwrap().value, 99);

        macros.define(b"BROKEN", Some(b"1 +"));
        assert_eq!(
            message(macros, b"BROKEN"),
            "in expansion of macro \"BROKEN\": missing operand at end of expression"
        );
    }

    #[test]
    fn errors() {
        let symbols = &SymbolMap::default();
        let macros = &MacroTable::new(symbols);

        assert_eq!(message(macros, b""), "missing expression");
        assert_eq!(message(macros, b"(1"), "missing ')' in expression");
        assert_eq!(message(macros, b"1)"), "missing '(' in expression");
        assert_eq!(message(macros, b"1 +"), "missing operand at end of expression");
        assert_eq!(message(macros, b"1 ? 2"), "missing ':' in conditional expression");
        assert_eq!(message(macros, b"1 2"), "missing binary operator before token \"2\"");
        assert_eq!(message(macros, b"1, 2"), "comma operator in operand of conditional directive");
        assert_eq!(message(macros, b"defined"), "operator \"defined\" requires an identifier");
        assert_eq!(message(macros, b"defined(A"), "missing ')' after \"defined\"");
        assert_eq!(message(macros, b"1.0"), "floating constant \"1.0\" in preprocessor expression");
        assert_eq!(message(macros, b"\"s\""), "string literal in preprocessor expression");
        assert_eq!(message(macros, b"12abc"), "invalid suffix \"abc\" on integer constant");
        assert_eq!(message(macros, b"0x"), "invalid integer constant \"0x\"");
        assert_eq!(
            message(macros, b"99999999999999999999"),
            "integer constant \"99999999999999999999\" is too large"
        );
        assert_eq!(message(macros, b"1 / 0"), "division by zero in preprocessor expression");
        assert_eq!(message(macros, b"1 % (2 - 2)"), "division by zero in preprocessor expression");
        assert_eq!(message(macros, b"'\\x100'"), "hex escape sequence out of range");
        assert_eq!(message(macros, b"'\\777'"), "octal escape sequence out of range");
        assert_eq!(message(macros, b"u8'\\x100'"), "hex escape sequence out of range");
        assert_eq!(message(macros, b"u'\\x10000'"), "hex escape sequence out of range");

        let error = eval(macros, b"1 + ]").unwrap_err();
        assert_eq!(error.offset, 4);
    }

    #[test]
    fn depth() {
        let symbols = &SymbolMap::default();
        let macros = &MacroTable::new(symbols);

        let nested = |n: usize| {
            let mut src = vec![b'('; n];
            src.push(b'1');
            src.extend(std::iter::repeat(b')').take(n));
            src
        };
        assert_eq!(eval(macros, &nested(100)).unwrap().value, 1);
        assert_eq!(message(macros, &nested(300)), "expression nested too deeply");
    }
}
