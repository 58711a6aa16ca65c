//! Variable identifiers.

use std::borrow::Borrow;
use std::fmt;

/// Opaque, totally ordered identifier of a variable.
///
/// Keys are plain names such as `"x0"` or `"l12"`. Ordering is lexicographic on the
/// name, which gives `Values` and Jacobian maps a stable iteration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(String);

impl Key {
    pub fn new(name: impl Into<String>) -> Self {
        Key(name.into())
    }

    /// Character-plus-index key, e.g. `Key::symbol('x', 3)` is `"x3"`.
    pub fn symbol(chr: char, index: usize) -> Self {
        Key(format!("{chr}{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::new(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key(name)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}
