use std::cell::Cell;
use std::collections::HashMap;

use crate::lines::Position;
use crate::symbols::{SymbolMap, Symbol};

/// The macros visible to a preprocessing session, keyed by interned name.
///
/// Only presence and object-like replacement text are modelled. Replacement text is kept as
/// normalized bytes: splices removed, whitespace runs collapsed to a single space.
pub struct MacroTable<'i> {
    symbols: &'i SymbolMap,
    macros: HashMap<Symbol<'i>, Macro<'i>>,
}

pub struct Macro<'i> {
    pub value: Box<[u8]>,
    pub parameters: Option<Parameters<'i>>,
    /// Where the `#define` was, or `None` for macros defined through the API.
    pub position: Option<Position>,
    active: Cell<bool>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Parameters<'i> { pub names: Vec<Symbol<'i>>, pub variadic: bool }

/// Marks a macro as being evaluated until dropped.
pub struct Active<'m> { active: &'m Cell<bool> }

impl<'i> Macro<'i> {
    pub fn object(value: &[u8]) -> Macro<'i> {
        let value = normalize(value).into_boxed_slice();
        Macro { value, parameters: None, position: None, active: Cell::new(false) }
    }

    pub fn function(parameters: Parameters<'i>, value: &[u8]) -> Macro<'i> {
        Macro { parameters: Some(parameters), ..Macro::object(value) }
    }

    pub fn at(self, position: Position) -> Macro<'i> { Macro { position: Some(position), ..self } }

    pub fn is_function_like(&self) -> bool { self.parameters.is_some() }

    /// Enter the macro for evaluation. Returns `None` if it is already being evaluated.
    pub fn enter(&self) -> Option<Active<'_>> {
        if self.active.replace(true) { return None; }
        Some(Active { active: &self.active })
    }

    fn same_definition(&self, other: &Macro<'i>) -> bool {
        self.value == other.value && self.parameters == other.parameters
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) { self.active.set(false); }
}

impl<'i> MacroTable<'i> {
    pub fn new(symbols: &'i SymbolMap) -> MacroTable<'i> {
        MacroTable { symbols, macros: HashMap::default() }
    }

    pub fn symbols(&self) -> &'i SymbolMap { self.symbols }

    /// Define an object-like macro. `None` defines it with empty replacement text.
    pub fn define(&mut self, name: &[u8], value: Option<&[u8]>) {
        let name = self.symbols.intern(name);
        self.insert(name, Macro::object(value.unwrap_or_default()));
    }

    /// Insert or overwrite a definition. Returns the previous definition, if any.
    pub fn insert(&mut self, name: Symbol<'i>, definition: Macro<'i>) -> Option<Macro<'i>> {
        log::debug!("define {} = {:?}", name, String::from_utf8_lossy(&definition.value));
        let previous = self.macros.insert(name, definition)?;
        if let Some(current) = self.macros.get(&name) {
            if !previous.same_definition(current) {
                match previous.position {
                    Some(position) => { log::warn!("{} redefined (previous definition at {})", name, position) }
                    None => { log::warn!("{} redefined", name) }
                }
            }
        }
        Some(previous)
    }

    /// Remove a definition. Removing an undefined name does nothing.
    pub fn undef(&mut self, name: &[u8]) -> bool {
        match self.symbols.get(name) {
            Some(name) => { self.remove(name).is_some() }
            None => { false }
        }
    }

    pub fn remove(&mut self, name: Symbol<'i>) -> Option<Macro<'i>> {
        let removed = self.macros.remove(&name);
        if removed.is_some() { log::debug!("undef {}", name); }
        removed
    }

    pub fn is_defined(&self, name: &[u8]) -> bool {
        self.symbols.get(name).map_or(false, |name| self.contains(name))
    }

    pub fn contains(&self, name: Symbol<'i>) -> bool { self.macros.contains_key(&name) }

    pub fn get(&self, name: Symbol<'i>) -> Option<&Macro<'i>> { self.macros.get(&name) }

    /// The replacement text of a defined macro.
    pub fn value_of(&self, name: &[u8]) -> Option<&[u8]> {
        let name = self.symbols.get(name)?;
        self.macros.get(&name).map(|definition| &definition.value[..])
    }

    pub fn len(&self) -> usize { self.macros.len() }

    pub fn is_empty(&self) -> bool { self.macros.is_empty() }

    /// Names of all defined macros, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = Symbol<'i>> + '_ { self.macros.keys().copied() }
}

/// Collapse whitespace runs to one space and trim the ends.
pub fn normalize(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for word in value.split(|b| b.is_ascii_whitespace()).filter(|word| !word.is_empty()) {
        if !out.is_empty() { out.push(b' '); }
        out.extend_from_slice(word);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{MacroTable, Macro, Parameters, normalize};
    use crate::lines::Position;
    use crate::symbols::SymbolMap;

    #[test]
    fn define_undef() {
        let symbols = &SymbolMap::default();
        let macros = &mut MacroTable::new(symbols);

        assert!(!macros.is_defined(b"SQLITE_ZERO_MALLOC"));
        macros.define(b"SQLITE_ZERO_MALLOC", None);
        assert!(macros.is_defined(b"SQLITE_ZERO_MALLOC"));
        assert_eq!(macros.value_of(b"SQLITE_ZERO_MALLOC"), Some(&b""[..]));

        macros.define(b"SQLITE_ZERO_MALLOC", Some(b"  1 "));
        assert_eq!(macros.value_of(b"SQLITE_ZERO_MALLOC"), Some(&b"1"[..]));
        assert_eq!(macros.len(), 1);

        assert!(macros.undef(b"SQLITE_ZERO_MALLOC"));
        assert!(!macros.is_defined(b"SQLITE_ZERO_MALLOC"));
        assert_eq!(macros.value_of(b"SQLITE_ZERO_MALLOC"), None);

        assert!(!macros.undef(b"SQLITE_ZERO_MALLOC"));
        assert!(!macros.undef(b"NEVER_SEEN"));
        assert!(macros.is_empty());
    }

    #[test]
    fn redefine() {
        let symbols = &SymbolMap::default();
        let macros = &mut MacroTable::new(symbols);
        let name = symbols.intern(b"N");

        let position = Position { line: 3, column: 1 };
        assert!(macros.insert(name, Macro::object(b"1").at(position)).is_none());
        let previous = macros.insert(name, Macro::object(b"2"));
        assert_eq!(previous.map(|previous| previous.position), Some(Some(position)));
        assert_eq!(macros.value_of(b"N"), Some(&b"2"[..]));

        let x = symbols.intern(b"x");
        let parameters = Parameters { names: vec![x], variadic: false };
        macros.insert(name, Macro::function(parameters, b"(x)+1"));
        assert!(macros.get(name).map_or(false, |definition| definition.is_function_like()));
        assert_eq!(macros.names().collect::<Vec<_>>(), [name]);
    }

    #[test]
    fn reentry() {
        let definition = Macro::object(b"A");
        {
            let _active = definition.enter();
            assert!(definition.enter().is_none());
        }
        assert!(definition.enter().is_some());
    }

    #[test]
    fn whitespace() {
        assert_eq!(normalize(b"  a \t b\n\nc  "), b"a b c");
        assert_eq!(normalize(b" \t "), b"");
    }
}
