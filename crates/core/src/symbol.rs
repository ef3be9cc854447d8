//! Symbols and interned keywords.
//!
//! Symbols are plain data: an optional namespace part, a name, and an
//! optional metadata map. Keywords are interned in a thread-local table so
//! equality is normally a pointer comparison; the evaluator is
//! single-threaded by contract, so a process-wide table is not needed.

use crate::collections::PersistentMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A symbol: `foo`, `my.ns/foo`, `/` (the division symbol).
#[derive(Debug, Clone)]
pub struct Symbol {
    pub ns: Option<Rc<str>>,
    pub name: Rc<str>,
    pub meta: Option<PersistentMap>,
}

impl Symbol {
    pub fn simple(name: &str) -> Self {
        Symbol {
            ns: None,
            name: name.into(),
            meta: None,
        }
    }

    pub fn qualified(ns: &str, name: &str) -> Self {
        Symbol {
            ns: Some(ns.into()),
            name: name.into(),
            meta: None,
        }
    }

    /// Split a printed representation at the first `/`. The lone symbol `/`
    /// and names beginning with `/` after a namespace are handled the way
    /// the reader produces them: `clojure.core//` names `/` in that ns.
    pub fn parse(text: &str) -> Self {
        if text == "/" {
            return Symbol::simple("/");
        }
        match text.find('/') {
            Some(idx) if idx > 0 && idx + 1 < text.len() => {
                Symbol::qualified(&text[..idx], &text[idx + 1..])
            }
            Some(idx) if idx > 0 && idx + 1 == text.len() => {
                // "ns/" — trailing slash names the division symbol
                Symbol::qualified(&text[..idx], "/")
            }
            _ => Symbol::simple(text),
        }
    }

    pub fn with_meta(&self, meta: Option<PersistentMap>) -> Self {
        Symbol {
            ns: self.ns.clone(),
            name: self.name.clone(),
            meta,
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.ns.is_some()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.ns == other.ns && self.name == other.name
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ns.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug)]
struct KeywordInner {
    ns: Option<Rc<str>>,
    name: Rc<str>,
}

/// An interned keyword. Cloning is a pointer bump; equality is usually a
/// pointer comparison thanks to the interner.
#[derive(Debug, Clone)]
pub struct Keyword(Rc<KeywordInner>);

thread_local! {
    static INTERNER: RefCell<HashMap<String, Keyword>> = RefCell::new(HashMap::new());
}

impl Keyword {
    pub fn intern(ns: Option<&str>, name: &str) -> Keyword {
        let full = match ns {
            Some(ns) => format!("{}/{}", ns, name),
            None => name.to_string(),
        };
        INTERNER.with(|table| {
            let mut table = table.borrow_mut();
            if let Some(k) = table.get(&full) {
                return k.clone();
            }
            let k = Keyword(Rc::new(KeywordInner {
                ns: ns.map(Rc::from),
                name: name.into(),
            }));
            table.insert(full, k.clone());
            k
        })
    }

    /// Parse a printed keyword without its leading colon(s).
    pub fn parse(text: &str) -> Keyword {
        if text == "/" {
            return Keyword::intern(None, "/");
        }
        match text.find('/') {
            Some(idx) if idx > 0 && idx + 1 < text.len() => {
                Keyword::intern(Some(&text[..idx]), &text[idx + 1..])
            }
            _ => Keyword::intern(None, text),
        }
    }

    pub fn ns(&self) -> Option<&str> {
        self.0.ns.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }
}

impl PartialEq for Keyword {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
            || (self.0.ns == other.0.ns && self.0.name == other.0.name)
    }
}

impl Eq for Keyword {}

impl Hash for Keyword {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.ns.hash(state);
        self.0.name.hash(state);
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ns() {
            Some(ns) => write!(f, ":{}/{}", ns, self.name()),
            None => write!(f, ":{}", self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_parse_qualified() {
        let s = Symbol::parse("my.ns/foo");
        assert_eq!(s.ns.as_deref(), Some("my.ns"));
        assert_eq!(&*s.name, "foo");
    }

    #[test]
    fn test_symbol_parse_division() {
        let s = Symbol::parse("/");
        assert!(s.ns.is_none());
        assert_eq!(&*s.name, "/");
        let s = Symbol::parse("clojure.core//");
        assert_eq!(s.ns.as_deref(), Some("clojure.core"));
        assert_eq!(&*s.name, "/");
    }

    #[test]
    fn test_keyword_interned_identity() {
        let a = Keyword::intern(Some("user"), "k");
        let b = Keyword::parse("user/k");
        assert_eq!(a, b);
        assert!(Rc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn test_keyword_display() {
        assert_eq!(Keyword::intern(None, "a").to_string(), ":a");
        assert_eq!(Keyword::intern(Some("n"), "a").to_string(), ":n/a");
    }
}
