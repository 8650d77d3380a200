use std::collections::BTreeMap;
use std::fmt;

use crate::SymbolId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplacementError {
    SelfReplacement(SymbolId),
    Conflict {
        original: SymbolId,
        existing: SymbolId,
        requested: SymbolId,
    },
    Cycle {
        original: SymbolId,
        replacement: SymbolId,
    },
}

impl fmt::Display for ReplacementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementError::SelfReplacement(s) => write!(f, "{s} cannot replace itself"),
            ReplacementError::Conflict {
                original,
                existing,
                requested,
            } => write!(
                f,
                "{original} is already replaced by {existing}; refusing {requested}"
            ),
            ReplacementError::Cycle {
                original,
                replacement,
            } => write!(
                f,
                "replacing {original} with {replacement} would form a cycle"
            ),
        }
    }
}

impl std::error::Error for ReplacementError {}

/// Maps host symbols to the reduced-footprint symbols that stand in for them.
///
/// The analyzer resolves every symbol through this registry before it reaches
/// an [`ExecutionSet`](crate::ExecutionSet), so an original and its
/// replacement can never both be given a token.
#[derive(Debug, Clone, Default)]
pub struct ReplacementRegistry {
    map: BTreeMap<SymbolId, SymbolId>,
}

impl ReplacementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `replacement` for `original`. Re-registering the same pair is a
    /// no-op; chains (`a -> b`, `b -> c`) are allowed and resolve to the end.
    pub fn insert(
        &mut self,
        original: SymbolId,
        replacement: SymbolId,
    ) -> Result<(), ReplacementError> {
        if original == replacement {
            return Err(ReplacementError::SelfReplacement(original));
        }
        if let Some(existing) = self.map.get(&original) {
            if *existing == replacement {
                return Ok(());
            }
            return Err(ReplacementError::Conflict {
                original,
                existing: existing.clone(),
                requested: replacement,
            });
        }
        if self.resolve(&replacement) == &original {
            return Err(ReplacementError::Cycle {
                original,
                replacement,
            });
        }
        self.map.insert(original, replacement);
        Ok(())
    }

    /// Final identity for `symbol`: itself when nothing replaces it.
    pub fn resolve<'a>(&'a self, symbol: &'a SymbolId) -> &'a SymbolId {
        let mut cur = symbol;
        // Insert refuses cycles, so the walk ends within `map.len()` steps.
        for _ in 0..=self.map.len() {
            match self.map.get(cur) {
                Some(next) => cur = next,
                None => break,
            }
        }
        cur
    }

    pub fn is_replaced(&self, symbol: &SymbolId) -> bool {
        self.map.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecutionSet, TokenSpace};

    fn sym(s: &str) -> SymbolId {
        SymbolId::from(s)
    }

    #[test]
    fn resolve_follows_chains_and_passes_through_unknowns() {
        let mut reg = ReplacementRegistry::new();
        reg.insert(sym("System.Math"), sym("Mini.Math")).unwrap();
        reg.insert(sym("Mini.Math"), sym("Tiny.Math")).unwrap();
        assert_eq!(reg.resolve(&sym("System.Math")), &sym("Tiny.Math"));
        assert_eq!(reg.resolve(&sym("App.C")), &sym("App.C"));
        assert!(reg.is_replaced(&sym("Mini.Math")));
        assert!(!reg.is_replaced(&sym("Tiny.Math")));
    }

    #[test]
    fn insert_rejects_self_conflicts_and_cycles() {
        let mut reg = ReplacementRegistry::new();
        assert!(matches!(
            reg.insert(sym("A"), sym("A")),
            Err(ReplacementError::SelfReplacement(_))
        ));
        reg.insert(sym("A"), sym("B")).unwrap();
        reg.insert(sym("A"), sym("B")).unwrap();
        assert!(matches!(
            reg.insert(sym("A"), sym("C")),
            Err(ReplacementError::Conflict { .. })
        ));
        reg.insert(sym("B"), sym("C")).unwrap();
        assert!(matches!(
            reg.insert(sym("C"), sym("A")),
            Err(ReplacementError::Cycle { .. })
        ));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn original_and_replacement_share_one_token() {
        let mut reg = ReplacementRegistry::new();
        reg.insert(sym("System.TimeSpan"), sym("Mini.TimeSpan"))
            .unwrap();
        let mut set = ExecutionSet::new();
        let a = set
            .class_token(reg.resolve(&sym("System.TimeSpan")))
            .unwrap();
        let b = set.class_token(reg.resolve(&sym("Mini.TimeSpan"))).unwrap();
        assert_eq!(a, b);
        assert_eq!(set.directory(TokenSpace::Type).len(), 1);
    }
}
