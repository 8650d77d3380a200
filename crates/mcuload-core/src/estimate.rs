//! Pre-transfer memory estimate.
//!
//! Every figure assumes the device's worst case: 32-bit aligned slots, no
//! sharing between declarations. The result is advisory and is expected to be
//! at or above what the device allocator really uses.

use crate::decl::{ClassDecl, MethodDecl};

pub const CLASS_OVERHEAD_BYTES: u64 = 20;
pub const METHOD_OVERHEAD_BYTES: u64 = 12;
pub const MEMBER_SLOT_BYTES: u64 = 8;
pub const ARGUMENT_SLOT_BYTES: u64 = 8;
/// One remap slot on the device: local index and global token, 16 bits each.
pub const REMAP_ENTRY_BYTES: u64 = 4;

pub fn class_bytes(class: &ClassDecl) -> u64 {
    CLASS_OVERHEAD_BYTES
        + u64::from(class.static_size)
        + MEMBER_SLOT_BYTES * class.members.len() as u64
}

pub fn method_bytes(method: &MethodDecl) -> u64 {
    METHOD_OVERHEAD_BYTES
        + ARGUMENT_SLOT_BYTES * u64::from(method.arg_count)
        + REMAP_ENTRY_BYTES * method.remap.len() as u64
        + method.code.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::Member;
    use crate::{Token, TokenSpace};

    #[test]
    fn class_estimate_counts_static_size_and_members() {
        let f = Token::new(1).unwrap();
        let c = ClassDecl::new("C", 10, 4).with_member(Member::field(f));
        // Dynamic size is per instance and lives on the heap, not in the image.
        assert_eq!(class_bytes(&c), 20 + 4 + 8);
    }

    #[test]
    fn method_estimate_counts_args_remap_and_code() {
        let mut m = MethodDecl::new("M", 2).with_code(vec![0; 5]);
        m.push_reference(TokenSpace::Method, Token::new(3).unwrap());
        assert_eq!(method_bytes(&m), 12 + 16 + 4 + 5);
        assert_eq!(method_bytes(&MethodDecl::new("E", 0)), 12);
    }
}
