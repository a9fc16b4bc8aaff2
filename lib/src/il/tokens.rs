use crate::il::{Deserialize, Error, MethodRef, Serialize, TypeSig};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::hash::Hash;
use std::io::Result;

/// Metadata token, as found in instruction operands
///
/// The high byte identifies the table and the low three bytes are a 1-based row in that table.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Token(pub u32);

impl Token {
    pub const USER_STRING: u8 = 0x70;
    pub const TYPE_SPEC: u8 = 0x1b;
    pub const MEMBER_REF: u8 = 0x0a;

    fn new(table: u8, index: usize) -> Token {
        Token(((table as u32) << 24) | (index as u32 + 1))
    }

    pub fn table(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Zero-based row, if the token belongs to `table`
    fn row_in(self, table: u8) -> Option<usize> {
        let row = self.0 & 0x00ff_ffff;
        if self.table() == table && row != 0 {
            Some(row as usize - 1)
        } else {
            None
        }
    }
}

impl Serialize for Token {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for Token {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error> {
        Ok(Token(u32::deserialize(reader)?))
    }
}

/// One deduplicated, append-only metadata table
struct Interned<T> {
    entries: Vec<T>,
    rows: HashMap<T, Token>,
}

impl<T: Clone + Eq + Hash> Interned<T> {
    fn new() -> Interned<T> {
        Interned {
            entries: vec![],
            rows: HashMap::new(),
        }
    }

    fn get(&mut self, table: u8, value: &T) -> Token {
        if let Some(token) = self.rows.get(value) {
            *token
        } else {
            let token = Token::new(table, self.entries.len());
            self.entries.push(value.clone());
            self.rows.insert(value.clone(), token);
            token
        }
    }
}

/// Metadata tables builder used while writing a module
///
/// Every string, type and method referenced from code gets a token the first time it is seen,
/// and the same token every time after that.
pub struct TokenPool {
    strings: Interned<String>,
    types: Interned<TypeSig>,
    methods: Interned<MethodRef>,
}

impl TokenPool {
    pub fn new() -> TokenPool {
        TokenPool {
            strings: Interned::new(),
            types: Interned::new(),
            methods: Interned::new(),
        }
    }

    /// Get or insert a user string
    pub fn get_string(&mut self, string: &str) -> Token {
        if let Some(token) = self.strings.rows.get(string) {
            return *token;
        }
        self.strings.get(Token::USER_STRING, &string.to_owned())
    }

    /// Get or insert a type specification
    pub fn get_type(&mut self, ty: &TypeSig) -> Token {
        self.types.get(Token::TYPE_SPEC, ty)
    }

    /// Get or insert a member reference
    pub fn get_method(&mut self, method: &MethodRef) -> Token {
        self.methods.get(Token::MEMBER_REF, method)
    }

    /// Freeze the pool into the tables that get written out
    pub fn into_table(self) -> TokenTable {
        TokenTable {
            strings: self.strings.entries,
            types: self.types.entries,
            methods: self.methods.entries,
        }
    }
}

impl Default for TokenPool {
    fn default() -> Self {
        TokenPool::new()
    }
}

/// Metadata tables used to resolve tokens while reading a module
#[derive(Debug, Default, PartialEq)]
pub struct TokenTable {
    pub strings: Vec<String>,
    pub types: Vec<TypeSig>,
    pub methods: Vec<MethodRef>,
}

impl TokenTable {
    pub fn string(&self, token: Token) -> std::result::Result<&str, Error> {
        token
            .row_in(Token::USER_STRING)
            .and_then(|row| self.strings.get(row))
            .map(|string| string.as_str())
            .ok_or(Error::BadToken(token))
    }

    pub fn type_sig(&self, token: Token) -> std::result::Result<&TypeSig, Error> {
        token
            .row_in(Token::TYPE_SPEC)
            .and_then(|row| self.types.get(row))
            .ok_or(Error::BadToken(token))
    }

    pub fn method(&self, token: Token) -> std::result::Result<&MethodRef, Error> {
        token
            .row_in(Token::MEMBER_REF)
            .and_then(|row| self.methods.get(row))
            .ok_or(Error::BadToken(token))
    }
}

impl Serialize for TokenTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.strings.serialize(writer)?;
        self.types.serialize(writer)?;
        self.methods.serialize(writer)
    }
}

impl Deserialize for TokenTable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error> {
        Ok(TokenTable {
            strings: Vec::deserialize(reader)?,
            types: Vec::deserialize(reader)?,
            methods: Vec::deserialize(reader)?,
        })
    }
}
