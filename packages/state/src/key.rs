//! Stable node identity.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Key of the root node. The root is created with every state and never removed.
pub const ROOT_KEY: &str = "root";

/// Opaque node identifier, unique within one editor instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(Arc<str>);

impl NodeKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        NodeKey(key.into())
    }

    pub fn root() -> Self {
        NodeKey::new(ROOT_KEY)
    }

    pub fn is_root(&self) -> bool {
        &*self.0 == ROOT_KEY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for NodeKey {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NodeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeKey {
    fn from(s: &str) -> Self {
        NodeKey::new(s)
    }
}

impl From<String> for NodeKey {
    fn from(s: String) -> Self {
        NodeKey::new(s)
    }
}

/// Hands out decimal keys for new nodes
#[derive(Debug)]
pub struct KeyGenerator {
    next: Cell<u64>,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self { next: Cell::new(1) }
    }

    pub fn next_key(&self) -> NodeKey {
        let n = self.next.get();
        self.next.set(n + 1);
        NodeKey::new(n.to_string())
    }

    /// Restart generation after the highest numeric key in `keys`
    pub fn reset_past<'a>(&self, keys: impl IntoIterator<Item = &'a NodeKey>) {
        let highest = keys.into_iter().filter_map(NodeKey::numeric).max().unwrap_or(0);
        self.next.set(highest + 1);
    }

    pub fn peek(&self) -> u64 {
        self.next.get()
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
