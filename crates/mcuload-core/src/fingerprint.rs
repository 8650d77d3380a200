use sha2::{Digest as _, Sha256};

use crate::wire::{ClassFrame, MethodFrame, Request, WireError};
use crate::{ExecutionSet, TokenSpace};

/// Content digest of everything a load would transmit, plus the token
/// assignments behind it.
///
/// Two builds from the same analyzer output produce the same digest; any change
/// to a declaration, to token numbering or to the entry point changes it.
pub fn fingerprint(set: &ExecutionSet) -> Result<String, WireError> {
    let mut h = Sha256::new();

    for space in TokenSpace::ALL {
        h.update(space.as_str().as_bytes());
        h.update(b"\0");
        for (token, symbol) in set.directory(space).iter() {
            h.update(token.get().to_le_bytes());
            hash_chunk(&mut h, symbol.as_str().as_bytes());
        }
    }

    h.update(b"classes\0");
    for c in set.classes() {
        hash_chunk(&mut h, &Request::DeclareClass(ClassFrame::from(c)).encode()?);
    }
    h.update(b"methods\0");
    for m in set.methods() {
        hash_chunk(&mut h, &Request::DeclareMethod(MethodFrame::from(m)).encode()?);
    }
    h.update(b"entry\0");
    h.update(set.entry_point_token().map_or(0, |t| t.get()).to_le_bytes());

    Ok(format!("sha256:{:x}", h.finalize()))
}

fn hash_chunk(h: &mut Sha256, bytes: &[u8]) {
    h.update((bytes.len() as u64).to_le_bytes());
    h.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::{ClassDecl, MethodDecl};
    use crate::SymbolId;

    fn build(static_size: u32) -> ExecutionSet {
        let mut set = ExecutionSet::new();
        set.add_class(ClassDecl::new("App.C", 8, static_size)).unwrap();
        set.add_method(MethodDecl::new("App.C::Main()", 0)).unwrap();
        set.set_entry_point(SymbolId::from("App.C::Main()")).unwrap();
        set
    }

    #[test]
    fn fingerprint_is_stable_across_builds() {
        let a = fingerprint(&build(4)).unwrap();
        let b = fingerprint(&build(4)).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("sha256:"));
        assert_eq!(a.len(), "sha256:".len() + 64);
    }

    #[test]
    fn fingerprint_tracks_declaration_changes() {
        assert_ne!(
            fingerprint(&build(4)).unwrap(),
            fingerprint(&build(8)).unwrap()
        );
    }
}
