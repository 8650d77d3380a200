use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU16;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SymbolId;

/// A non-zero identifier in one of the three token spaces.
///
/// Tokens travel as `u16` on the wire; `0` is reserved for "no token".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(NonZeroU16);

impl Token {
    pub const MAX: u16 = u16::MAX;

    pub fn new(raw: u16) -> Option<Self> {
        NonZeroU16::new(raw).map(Token)
    }

    pub fn get(self) -> u16 {
        self.0.get()
    }

    fn index(self) -> usize {
        usize::from(self.0.get()) - 1
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSpace {
    Type,
    Method,
    Field,
}

impl TokenSpace {
    pub const ALL: [TokenSpace; 3] = [TokenSpace::Type, TokenSpace::Method, TokenSpace::Field];

    pub fn as_str(self) -> &'static str {
        match self {
            TokenSpace::Type => "type",
            TokenSpace::Method => "method",
            TokenSpace::Field => "field",
        }
    }

    pub(crate) fn wire_tag(self) -> u8 {
        match self {
            TokenSpace::Type => 1,
            TokenSpace::Method => 2,
            TokenSpace::Field => 3,
        }
    }

    pub(crate) fn from_wire_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(TokenSpace::Type),
            2 => Some(TokenSpace::Method),
            3 => Some(TokenSpace::Field),
            _ => None,
        }
    }
}

impl fmt::Display for TokenSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TokenSpaceParseError {
    value: String,
}

impl fmt::Display for TokenSpaceParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid token space {:?} (expected one of: type, method, field)",
            self.value
        )
    }
}

impl std::error::Error for TokenSpaceParseError {}

impl FromStr for TokenSpace {
    type Err = TokenSpaceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "type" | "class" => Ok(TokenSpace::Type),
            "method" => Ok(TokenSpace::Method),
            "field" => Ok(TokenSpace::Field),
            _ => Err(TokenSpaceParseError { value: s }),
        }
    }
}

/// Raised when a space has handed out every 16-bit token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpaceExhausted {
    pub space: TokenSpace,
}

impl fmt::Display for TokenSpaceExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} token space exhausted ({} tokens allocated)",
            self.space,
            Token::MAX
        )
    }
}

impl std::error::Error for TokenSpaceExhausted {}

/// Bijection between symbols of one space and the tokens allocated for them.
///
/// Forward allocation is the hot path (one hash probe). `symbols` records
/// allocation order, so token `n` names `symbols[n - 1]`; it doubles as the
/// reverse index and costs a single push per new symbol.
#[derive(Debug, Clone)]
pub struct TokenDirectory {
    space: TokenSpace,
    by_symbol: HashMap<SymbolId, Token>,
    symbols: Vec<SymbolId>,
}

impl TokenDirectory {
    pub fn new(space: TokenSpace) -> Self {
        Self {
            space,
            by_symbol: HashMap::new(),
            symbols: Vec::new(),
        }
    }

    pub fn space(&self) -> TokenSpace {
        self.space
    }

    pub fn get_or_add(&mut self, symbol: &SymbolId) -> Result<Token, TokenSpaceExhausted> {
        if let Some(&token) = self.by_symbol.get(symbol) {
            return Ok(token);
        }
        let next = u16::try_from(self.symbols.len() + 1)
            .ok()
            .and_then(Token::new)
            .ok_or(TokenSpaceExhausted { space: self.space })?;
        self.by_symbol.insert(symbol.clone(), next);
        self.symbols.push(symbol.clone());
        Ok(next)
    }

    pub fn get(&self, symbol: &SymbolId) -> Option<Token> {
        self.by_symbol.get(symbol).copied()
    }

    pub fn inverse_resolve(&self, token: Token) -> Option<&SymbolId> {
        self.symbols.get(token.index())
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Entries in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (Token, &SymbolId)> + '_ {
        self.symbols
            .iter()
            .enumerate()
            .filter_map(|(i, s)| Some((Token::new(u16::try_from(i + 1).ok()?)?, s)))
    }
}
