use std::{fmt, ptr, slice, str};
use std::alloc::{Layout, handle_alloc_error};
use std::borrow::Borrow;
use std::cell::RefCell;
use std::hash::{Hash, Hasher};

use indexmap::IndexSet;
use quickdry::Arena;

/// An arena to intern byte strings. Symbols are numbered densely in interning order.
pub struct SymbolMap {
    keys: RefCell<IndexSet<Key>>,
    arena: Arena,
}

/// A key copied into the arena. Compared and hashed by content.
struct Key { data: *const u8, len: usize }

/// An interned byte string with index-based equality.
#[derive(Copy, Clone)]
pub struct Symbol<'i> { index: u32, key: &'i [u8] }

impl Key {
    /// # Safety
    ///
    /// The arena owning `data` must outlive `'a`.
    unsafe fn bytes<'a>(&self) -> &'a [u8] { slice::from_raw_parts(self.data, self.len) }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool { unsafe { self.bytes() == other.bytes() } }
}
impl Eq for Key {}
impl Hash for Key { fn hash<H: Hasher>(&self, state: &mut H) { unsafe { self.bytes().hash(state) } } }
impl Borrow<[u8]> for Key { fn borrow(&self) -> &[u8] { unsafe { self.bytes() } } }

impl<'i> PartialEq for Symbol<'i> {
    fn eq(&self, other: &Self) -> bool { self.index == other.index }
}
impl<'i> Eq for Symbol<'i> {}
impl<'i> Hash for Symbol<'i> {
    fn hash<H: Hasher>(&self, state: &mut H) { self.index.hash(state) }
}

impl Default for SymbolMap {
    fn default() -> SymbolMap {
        let keys = RefCell::new(IndexSet::default());
        let arena = Arena::default();
        SymbolMap { keys, arena }
    }
}

impl SymbolMap {
    pub fn intern(&self, key: &[u8]) -> Symbol<'_> {
        if let Some(symbol) = self.get(key) { return symbol; }

        let data = if key.is_empty() {
            ptr::NonNull::dangling().as_ptr()
        } else {
            let layout = Layout::for_value(key);
            let data = unsafe { self.arena.alloc(layout) };
            if data.is_null() { handle_alloc_error(layout); }
            unsafe { ptr::copy_nonoverlapping(key.as_ptr(), data, key.len()); }
            data
        };

        let entry = Key { data, len: key.len() };
        let key = unsafe { entry.bytes() };
        let (index, _) = self.keys.borrow_mut().insert_full(entry);
        Symbol { index: index as u32, key }
    }

    /// Look up an already-interned key without interning it.
    pub fn get(&self, key: &[u8]) -> Option<Symbol<'_>> {
        let keys = self.keys.borrow();
        let (index, entry) = keys.get_full(key)?;
        let key = unsafe { entry.bytes() };
        Some(Symbol { index: index as u32, key })
    }

    pub fn len(&self) -> usize { self.keys.borrow().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<'i> Symbol<'i> {
    pub fn key(self) -> &'i [u8] { self.key }
    pub fn index(self) -> usize { self.index as usize }
}

impl<'i> fmt::Display for Symbol<'i> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut key = self.key;
        loop {
            match str::from_utf8(key) {
                Ok(key) => { return f.write_str(key); }
                Err(error) => {
                    let (valid, rest) = key.split_at(error.valid_up_to());
                    f.write_str(unsafe { str::from_utf8_unchecked(valid) })?;
                    f.write_str("\u{FFFD}")?;
                    key = match error.error_len() {
                        Some(len) => { &rest[len..] }
                        None => { return Ok(()); }
                    };
                }
            }
        }
    }
}

impl<'i> fmt::Debug for Symbol<'i> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::SymbolMap;

    #[test]
    fn intern() {
        let symbols = &SymbolMap::default();

        let a = symbols.intern(b"SQLITE_SYSTEM_MALLOC");
        let b = symbols.intern(b"SQLITE_WIN32_MALLOC");
        let c = symbols.intern(b"SQLITE_SYSTEM_MALLOC");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(a.key(), b"SQLITE_SYSTEM_MALLOC");
        assert_eq!(b.index(), 1);
        assert_eq!(symbols.len(), 2);

        let empty = symbols.intern(b"");
        assert_eq!(empty.key(), b"");
        assert_eq!(symbols.intern(b""), empty);
    }

    #[test]
    fn get() {
        let symbols = &SymbolMap::default();
        assert!(symbols.get(b"wsdStatInit").is_none());
        assert!(symbols.is_empty());

        let symbol = symbols.intern(b"wsdStatInit");
        assert_eq!(symbols.get(b"wsdStatInit"), Some(symbol));
        assert_eq!(symbols.len(), 1);
    }

    #[test]
    fn display() {
        let symbols = &SymbolMap::default();
        assert_eq!(symbols.intern(b"ArraySize").to_string(), "ArraySize");
        assert_eq!(symbols.intern(b"a\xffb").to_string(), "a\u{FFFD}b");
    }
}
