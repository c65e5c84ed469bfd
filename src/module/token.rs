//! Metadata tokens naming rows of the module tables.

use std::fmt;
use std::hash::{Hash, Hasher};

/// A metadata token referencing a row of one of the module's reference tables.
///
/// Tokens consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the 1-based row index within that table
///
/// Tokens appear as operands in encoded CIL and identify methods in symbol files.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// `Module` table
    pub const MODULE: u8 = 0x00;
    /// `TypeRef` table
    pub const TYPE_REF: u8 = 0x01;
    /// `TypeDef` table
    pub const TYPE_DEF: u8 = 0x02;
    /// `Field` table
    pub const FIELD: u8 = 0x04;
    /// `MethodDef` table, used to key debug information
    pub const METHOD_DEF: u8 = 0x06;
    /// `Param` table
    pub const PARAM: u8 = 0x08;
    /// `MemberRef` table (field and method references)
    pub const MEMBER_REF: u8 = 0x0A;
    /// `StandAloneSig` table (local variable signatures)
    pub const STANDALONE_SIG: u8 = 0x11;
    /// `ModuleRef` table
    pub const MODULE_REF: u8 = 0x1A;
    /// `TypeSpec` table (constructed types)
    pub const TYPE_SPEC: u8 = 0x1B;
    /// `MethodSpec` table (generic method instantiations)
    pub const METHOD_SPEC: u8 = 0x2B;
    /// `Document` table of portable symbols
    pub const DOCUMENT: u8 = 0x30;
    /// User string heap
    pub const USER_STRING: u8 = 0x70;

    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a 1-based row
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_parts() {
        let token = Token::from_parts(Token::METHOD_DEF, 1);
        assert_eq!(token.value(), 0x0600_0001);
        assert_eq!(token.table(), Token::METHOD_DEF);
        assert_eq!(token.row(), 1);
        assert!(!token.is_null());
        assert!(Token::new(0).is_null());
    }

    #[test]
    fn test_token_display() {
        let token = Token::new(0x0A00_0010);
        assert_eq!(format!("{token}"), "0x0a000010");
        assert_eq!(u32::from(token), 0x0A00_0010);
    }
}
