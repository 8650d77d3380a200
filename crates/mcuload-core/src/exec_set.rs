use std::collections::HashMap;
use std::fmt;

use crate::decl::{ClassDecl, DeclaredClass, DeclaredMethod, MemberKind, MethodDecl};
use crate::estimate;
use crate::token::{TokenDirectory, TokenSpaceExhausted};
use crate::{SymbolId, Token, TokenSpace};

/// Size of the device's method table: indices are 14 bits wide.
pub const MAX_METHODS: usize = (1 << 14) - 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    MethodCeiling {
        symbol: SymbolId,
        limit: usize,
    },
    TokenSpaceExhausted(TokenSpaceExhausted),
    InvalidMember {
        class: SymbolId,
        kind: MemberKind,
        token: Token,
        why: &'static str,
    },
}

impl fmt::Display for DeclarationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclarationError::MethodCeiling { symbol, limit } => write!(
                f,
                "cannot declare method {symbol}: the device method table holds at most {limit} methods"
            ),
            DeclarationError::TokenSpaceExhausted(e) => write!(f, "{e}"),
            DeclarationError::InvalidMember {
                class,
                kind,
                token,
                why,
            } => write!(f, "invalid {kind} member {token} of class {class}: {why}"),
        }
    }
}

impl std::error::Error for DeclarationError {}

impl From<TokenSpaceExhausted> for DeclarationError {
    fn from(e: TokenSpaceExhausted) -> Self {
        DeclarationError::TokenSpaceExhausted(e)
    }
}

/// Result of a diagnostic inverse lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSymbol<'a> {
    pub space: TokenSpace,
    pub token: Token,
    pub symbol: &'a SymbolId,
}

impl fmt::Display for ResolvedSymbol<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.space, self.token, self.symbol)
    }
}

/// Everything one deployment pushes to the device.
///
/// Owns its token counters, so independent sets never share numbering. Built by
/// a single analysis pass and only read once loading starts.
#[derive(Debug, Clone)]
pub struct ExecutionSet {
    types: TokenDirectory,
    method_tokens: TokenDirectory,
    fields: TokenDirectory,
    classes: Vec<DeclaredClass>,
    class_by_symbol: HashMap<SymbolId, usize>,
    methods: Vec<DeclaredMethod>,
    method_by_symbol: HashMap<SymbolId, usize>,
    entry_point: Option<SymbolId>,
}

impl Default for ExecutionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionSet {
    pub fn new() -> Self {
        Self {
            types: TokenDirectory::new(TokenSpace::Type),
            method_tokens: TokenDirectory::new(TokenSpace::Method),
            fields: TokenDirectory::new(TokenSpace::Field),
            classes: Vec::new(),
            class_by_symbol: HashMap::new(),
            methods: Vec::new(),
            method_by_symbol: HashMap::new(),
            entry_point: None,
        }
    }

    pub fn class_token(&mut self, symbol: &SymbolId) -> Result<Token, DeclarationError> {
        Ok(self.types.get_or_add(symbol)?)
    }

    pub fn method_token(&mut self, symbol: &SymbolId) -> Result<Token, DeclarationError> {
        Ok(self.method_tokens.get_or_add(symbol)?)
    }

    pub fn field_token(&mut self, symbol: &SymbolId) -> Result<Token, DeclarationError> {
        Ok(self.fields.get_or_add(symbol)?)
    }

    pub fn token(&mut self, space: TokenSpace, symbol: &SymbolId) -> Result<Token, DeclarationError> {
        match space {
            TokenSpace::Type => self.class_token(symbol),
            TokenSpace::Method => self.method_token(symbol),
            TokenSpace::Field => self.field_token(symbol),
        }
    }

    /// Forward lookup that never allocates.
    pub fn lookup_token(&self, space: TokenSpace, symbol: &SymbolId) -> Option<Token> {
        self.directory(space).get(symbol)
    }

    pub fn lookup_class_token(&self, symbol: &SymbolId) -> Option<Token> {
        self.types.get(symbol)
    }

    pub fn lookup_method_token(&self, symbol: &SymbolId) -> Option<Token> {
        self.method_tokens.get(symbol)
    }

    pub fn lookup_field_token(&self, symbol: &SymbolId) -> Option<Token> {
        self.fields.get(symbol)
    }

    pub fn directory(&self, space: TokenSpace) -> &TokenDirectory {
        match space {
            TokenSpace::Type => &self.types,
            TokenSpace::Method => &self.method_tokens,
            TokenSpace::Field => &self.fields,
        }
    }

    /// Adds a class unless one with the same backing type is already present.
    ///
    /// Returns `Ok(false)` for a duplicate; the existing declaration is kept
    /// untouched.
    pub fn add_class(&mut self, decl: ClassDecl) -> Result<bool, DeclarationError> {
        if self.class_by_symbol.contains_key(&decl.symbol) {
            return Ok(false);
        }
        validate_members(&decl)?;
        let token = self.class_token(&decl.symbol)?;
        tracing::debug!(class = %decl.symbol, %token, members = decl.members.len(), "declared class");
        self.class_by_symbol
            .insert(decl.symbol.clone(), self.classes.len());
        self.classes.push(DeclaredClass { token, decl });
        Ok(true)
    }

    /// Adds a method unless one with the same backing symbol is already present.
    ///
    /// The method receives the next declaration index. Fails without adding when
    /// the device method table is full.
    pub fn add_method(&mut self, decl: MethodDecl) -> Result<bool, DeclarationError> {
        if self.method_by_symbol.contains_key(&decl.symbol) {
            return Ok(false);
        }
        if self.methods.len() >= MAX_METHODS {
            return Err(DeclarationError::MethodCeiling {
                symbol: decl.symbol,
                limit: MAX_METHODS,
            });
        }
        let token = self.method_token(&decl.symbol)?;
        // MAX_METHODS < 2^14, so the index always fits.
        let index = self.methods.len() as u16;
        tracing::debug!(method = %decl.symbol, %token, index, "declared method");
        self.method_by_symbol
            .insert(decl.symbol.clone(), self.methods.len());
        self.methods.push(DeclaredMethod { token, index, decl });
        Ok(true)
    }

    pub fn has_definition(&self, ty: &SymbolId) -> bool {
        self.class_by_symbol.contains_key(ty)
    }

    pub fn has_method(&self, method: &SymbolId) -> bool {
        self.method_by_symbol.contains_key(method)
    }

    pub fn class(&self, ty: &SymbolId) -> Option<&DeclaredClass> {
        self.class_by_symbol.get(ty).map(|&i| &self.classes[i])
    }

    pub fn method(&self, method: &SymbolId) -> Option<&DeclaredMethod> {
        self.method_by_symbol.get(method).map(|&i| &self.methods[i])
    }

    pub fn method_by_token(&self, token: Token) -> Option<&DeclaredMethod> {
        let symbol = self.method_tokens.inverse_resolve(token)?;
        self.method(symbol)
    }

    /// Classes in add order.
    pub fn classes(&self) -> &[DeclaredClass] {
        &self.classes
    }

    /// Methods in declaration-index order.
    pub fn methods(&self) -> &[DeclaredMethod] {
        &self.methods
    }

    /// Designates the method the device runs. Allocates its token if needed; the
    /// body may be added later but must be present before loading.
    pub fn set_entry_point(&mut self, method: SymbolId) -> Result<Token, DeclarationError> {
        let token = self.method_token(&method)?;
        self.entry_point = Some(method);
        Ok(token)
    }

    pub fn entry_point(&self) -> Option<&SymbolId> {
        self.entry_point.as_ref()
    }

    pub fn entry_point_token(&self) -> Option<Token> {
        self.method_tokens.get(self.entry_point.as_ref()?)
    }

    pub fn estimate_required_memory(&self) -> u64 {
        let classes: u64 = self.classes.iter().map(|c| estimate::class_bytes(&c.decl)).sum();
        let methods: u64 = self.methods.iter().map(|m| estimate::method_bytes(&m.decl)).sum();
        classes + methods
    }

    pub fn inverse_resolve(&self, space: TokenSpace, token: Token) -> Option<&SymbolId> {
        self.directory(space).inverse_resolve(token)
    }

    /// Looks `raw` up in the type, method and field spaces, in that order, and
    /// returns the first hit. Tokens collide across spaces; use
    /// [`ExecutionSet::inverse_resolve_all`] when the space is unknown and every
    /// candidate matters.
    pub fn inverse_resolve_token(&self, raw: u16) -> Option<ResolvedSymbol<'_>> {
        self.inverse_resolve_all(raw).into_iter().next()
    }

    pub fn inverse_resolve_all(&self, raw: u16) -> Vec<ResolvedSymbol<'_>> {
        let Some(token) = Token::new(raw) else {
            return Vec::new();
        };
        TokenSpace::ALL
            .iter()
            .filter_map(|&space| {
                self.inverse_resolve(space, token).map(|symbol| ResolvedSymbol {
                    space,
                    token,
                    symbol,
                })
            })
            .collect()
    }
}

fn validate_members(decl: &ClassDecl) -> Result<(), DeclarationError> {
    for m in &decl.members {
        let why = match m.kind {
            MemberKind::Field if !m.base_tokens.is_empty() => "fields cannot override",
            MemberKind::Method | MemberKind::VirtualSlot if m.initial_value.is_some() => {
                "only fields carry an initial value"
            }
            _ => continue,
        };
        return Err(DeclarationError::InvalidMember {
            class: decl.symbol.clone(),
            kind: m.kind,
            token: m.token,
            why,
        });
    }
    Ok(())
}
