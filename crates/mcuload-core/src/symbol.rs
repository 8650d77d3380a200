use std::fmt;

use serde::{Deserialize, Serialize};

/// Host-side identity of a type, method or field.
///
/// The analyzer produces these from whatever metadata the host language offers;
/// the core only compares them. Two symbols are the same entity iff their
/// descriptors are byte-equal, so the analyzer must canonicalize (including
/// replacement) before handing them over.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolId(String);

impl SymbolId {
    pub fn new(descriptor: impl Into<String>) -> Self {
        SymbolId(descriptor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SymbolId {
    fn from(s: &str) -> Self {
        SymbolId(s.to_string())
    }
}

impl From<String> for SymbolId {
    fn from(s: String) -> Self {
        SymbolId(s)
    }
}
