use std::fmt;

use crate::{SymbolId, Token, TokenSpace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Field,
    Method,
    VirtualSlot,
}

impl MemberKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberKind::Field => "field",
            MemberKind::Method => "method",
            MemberKind::VirtualSlot => "virtual-slot",
        }
    }

    /// Space the member's own token (and its base tokens) are drawn from.
    pub fn token_space(self) -> TokenSpace {
        match self {
            MemberKind::Field => TokenSpace::Field,
            MemberKind::Method | MemberKind::VirtualSlot => TokenSpace::Method,
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compile-time constant used to seed a static field.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub kind: MemberKind,
    pub token: Token,
    /// Tokens this member overrides or implements, nearest first. Empty for
    /// non-virtual members.
    pub base_tokens: Vec<Token>,
    pub initial_value: Option<ConstValue>,
}

impl Member {
    pub fn field(token: Token) -> Self {
        Self {
            kind: MemberKind::Field,
            token,
            base_tokens: Vec::new(),
            initial_value: None,
        }
    }

    pub fn method(token: Token) -> Self {
        Self {
            kind: MemberKind::Method,
            token,
            base_tokens: Vec::new(),
            initial_value: None,
        }
    }

    pub fn virtual_slot(token: Token, base_tokens: Vec<Token>) -> Self {
        Self {
            kind: MemberKind::VirtualSlot,
            token,
            base_tokens,
            initial_value: None,
        }
    }

    pub fn with_initial_value(mut self, value: ConstValue) -> Self {
        self.initial_value = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub symbol: SymbolId,
    pub base_type: Option<Token>,
    pub interfaces: Vec<Token>,
    /// Per-instance footprint in bytes.
    pub dynamic_size: u32,
    pub static_size: u32,
    pub members: Vec<Member>,
    pub static_ctor: Option<Token>,
    /// Device skips the static constructor even when one is declared.
    pub suppress_init: bool,
}

impl ClassDecl {
    pub fn new(symbol: impl Into<SymbolId>, dynamic_size: u32, static_size: u32) -> Self {
        Self {
            symbol: symbol.into(),
            base_type: None,
            interfaces: Vec::new(),
            dynamic_size,
            static_size,
            members: Vec::new(),
            static_ctor: None,
            suppress_init: false,
        }
    }

    pub fn with_base_type(mut self, base: Token) -> Self {
        self.base_type = Some(base);
        self
    }

    pub fn with_interface(mut self, iface: Token) -> Self {
        self.interfaces.push(iface);
        self
    }

    pub fn with_member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    pub fn with_static_ctor(mut self, ctor: Token) -> Self {
        self.static_ctor = Some(ctor);
        self
    }

    pub fn suppress_init(mut self) -> Self {
        self.suppress_init = true;
        self
    }

    /// True if the loader must run this class's static constructor.
    pub fn needs_static_init(&self) -> bool {
        self.static_ctor.is_some() && !self.suppress_init
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MethodFlags(u8);

impl MethodFlags {
    pub const STATIC: MethodFlags = MethodFlags(0x01);
    pub const VIRTUAL: MethodFlags = MethodFlags(0x02);
    pub const ABSTRACT: MethodFlags = MethodFlags(0x04);
    pub const VOID: MethodFlags = MethodFlags(0x08);
    pub const CTOR: MethodFlags = MethodFlags(0x10);

    pub const fn empty() -> Self {
        MethodFlags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u8) -> Self {
        MethodFlags(bits & 0x1f)
    }

    pub const fn contains(self, other: MethodFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "static" => Some(Self::STATIC),
            "virtual" => Some(Self::VIRTUAL),
            "abstract" => Some(Self::ABSTRACT),
            "void" => Some(Self::VOID),
            "ctor" => Some(Self::CTOR),
            _ => None,
        }
    }
}

impl std::ops::BitOr for MethodFlags {
    type Output = MethodFlags;

    fn bitor(self, rhs: MethodFlags) -> MethodFlags {
        MethodFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for MethodFlags {
    fn bitor_assign(&mut self, rhs: MethodFlags) {
        self.0 |= rhs.0;
    }
}

/// One slot of a method's remap table: body-local reference `i` (the entry's
/// position) resolves to `token` in `space`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapEntry {
    pub space: TokenSpace,
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub symbol: SymbolId,
    pub flags: MethodFlags,
    pub arg_count: u8,
    pub local_count: u8,
    pub max_stack: u8,
    pub remap: Vec<RemapEntry>,
    pub code: Vec<u8>,
}

impl MethodDecl {
    pub fn new(symbol: impl Into<SymbolId>, arg_count: u8) -> Self {
        Self {
            symbol: symbol.into(),
            flags: MethodFlags::empty(),
            arg_count,
            local_count: 0,
            max_stack: 0,
            remap: Vec::new(),
            code: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_locals(mut self, local_count: u8, max_stack: u8) -> Self {
        self.local_count = local_count;
        self.max_stack = max_stack;
        self
    }

    /// Appends a remap slot and returns its body-local index.
    pub fn push_reference(&mut self, space: TokenSpace, token: Token) -> usize {
        self.remap.push(RemapEntry { space, token });
        self.remap.len() - 1
    }

    pub fn with_code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }
}

/// A class accepted by an execution set, with the type token it was given.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredClass {
    pub token: Token,
    pub decl: ClassDecl,
}

/// A method accepted by an execution set.
///
/// `index` is the dense device-side slot: the method's position in add order.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredMethod {
    pub token: Token,
    pub index: u16,
    pub decl: MethodDecl,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(n: u16) -> Token {
        Token::new(n).unwrap()
    }

    #[test]
    fn suppressed_or_ctorless_classes_need_no_init() {
        let plain = ClassDecl::new("A", 4, 0);
        assert!(!plain.needs_static_init());
        let with_ctor = ClassDecl::new("B", 4, 4).with_static_ctor(tok(1));
        assert!(with_ctor.needs_static_init());
        assert!(!with_ctor.clone().suppress_init().needs_static_init());
    }

    #[test]
    fn push_reference_returns_local_slots_in_order() {
        let mut m = MethodDecl::new("M::f()", 0);
        assert_eq!(m.push_reference(TokenSpace::Method, tok(4)), 0);
        assert_eq!(m.push_reference(TokenSpace::Field, tok(4)), 1);
        assert_eq!(m.remap[1].space, TokenSpace::Field);
    }

    #[test]
    fn method_flags_compose() {
        let f = MethodFlags::STATIC | MethodFlags::VOID;
        assert!(f.contains(MethodFlags::STATIC));
        assert!(!f.contains(MethodFlags::VIRTUAL));
        assert_eq!(MethodFlags::from_bits_truncate(0xff).bits(), 0x1f);
        assert_eq!(MethodFlags::parse("Ctor"), Some(MethodFlags::CTOR));
    }

    #[test]
    fn member_kinds_map_to_token_spaces() {
        assert_eq!(MemberKind::Field.token_space(), TokenSpace::Field);
        assert_eq!(MemberKind::VirtualSlot.token_space(), TokenSpace::Method);
    }
}
