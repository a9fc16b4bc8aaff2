use crate::il::{Deserialize, Error, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::Result;

/// Utility trait for rendering signatures in ILAsm-like syntax
pub trait RenderSignature {
    /// Turn the signature into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Write the signature to a string
    fn render_to(&self, write_to: &mut String);
}

/// Type appearing in a signature
///
/// The serialized tags are the ECMA-335 element types (II.23.1.16).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeSig {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    IntPtr,
    String,
    Object,

    /// User-defined value type (eg. a struct or an enum), by full name
    ValueType(String),

    /// User-defined reference type, by full name
    Class(String),

    /// Single-dimensional, zero-based array
    SzArray(Box<TypeSig>),
}

impl TypeSig {
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Void)
    }

    /// Values of this type must be boxed before they can be stored as an `object`
    pub fn is_value_type(&self) -> bool {
        match self {
            TypeSig::Boolean
            | TypeSig::Char
            | TypeSig::I1
            | TypeSig::U1
            | TypeSig::I2
            | TypeSig::U2
            | TypeSig::I4
            | TypeSig::U4
            | TypeSig::I8
            | TypeSig::U8
            | TypeSig::R4
            | TypeSig::R8
            | TypeSig::IntPtr
            | TypeSig::ValueType(_) => true,

            TypeSig::Void
            | TypeSig::String
            | TypeSig::Object
            | TypeSig::Class(_)
            | TypeSig::SzArray(_) => false,
        }
    }

    pub fn array_of(element: TypeSig) -> TypeSig {
        TypeSig::SzArray(Box::new(element))
    }

    fn element_type(&self) -> u8 {
        match self {
            TypeSig::Void => 0x01,
            TypeSig::Boolean => 0x02,
            TypeSig::Char => 0x03,
            TypeSig::I1 => 0x04,
            TypeSig::U1 => 0x05,
            TypeSig::I2 => 0x06,
            TypeSig::U2 => 0x07,
            TypeSig::I4 => 0x08,
            TypeSig::U4 => 0x09,
            TypeSig::I8 => 0x0a,
            TypeSig::U8 => 0x0b,
            TypeSig::R4 => 0x0c,
            TypeSig::R8 => 0x0d,
            TypeSig::String => 0x0e,
            TypeSig::ValueType(_) => 0x11,
            TypeSig::Class(_) => 0x12,
            TypeSig::IntPtr => 0x18,
            TypeSig::Object => 0x1c,
            TypeSig::SzArray(_) => 0x1d,
        }
    }
}

impl RenderSignature for TypeSig {
    fn render_to(&self, write_to: &mut String) {
        match self {
            TypeSig::Void => write_to.push_str("void"),
            TypeSig::Boolean => write_to.push_str("bool"),
            TypeSig::Char => write_to.push_str("char"),
            TypeSig::I1 => write_to.push_str("int8"),
            TypeSig::U1 => write_to.push_str("uint8"),
            TypeSig::I2 => write_to.push_str("int16"),
            TypeSig::U2 => write_to.push_str("uint16"),
            TypeSig::I4 => write_to.push_str("int32"),
            TypeSig::U4 => write_to.push_str("uint32"),
            TypeSig::I8 => write_to.push_str("int64"),
            TypeSig::U8 => write_to.push_str("uint64"),
            TypeSig::R4 => write_to.push_str("float32"),
            TypeSig::R8 => write_to.push_str("float64"),
            TypeSig::IntPtr => write_to.push_str("native int"),
            TypeSig::String => write_to.push_str("string"),
            TypeSig::Object => write_to.push_str("object"),
            TypeSig::ValueType(name) => {
                write_to.push_str("valuetype ");
                write_to.push_str(name);
            }
            TypeSig::Class(name) => {
                write_to.push_str("class ");
                write_to.push_str(name);
            }
            TypeSig::SzArray(element) => {
                element.render_to(write_to);
                write_to.push_str("[]");
            }
        }
    }
}

impl Serialize for TypeSig {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.element_type().serialize(writer)?;
        match self {
            TypeSig::ValueType(name) | TypeSig::Class(name) => name.serialize(writer),
            TypeSig::SzArray(element) => element.serialize(writer),
            _ => Ok(()),
        }
    }
}

impl Deserialize for TypeSig {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error> {
        Ok(match u8::deserialize(reader)? {
            0x01 => TypeSig::Void,
            0x02 => TypeSig::Boolean,
            0x03 => TypeSig::Char,
            0x04 => TypeSig::I1,
            0x05 => TypeSig::U1,
            0x06 => TypeSig::I2,
            0x07 => TypeSig::U2,
            0x08 => TypeSig::I4,
            0x09 => TypeSig::U4,
            0x0a => TypeSig::I8,
            0x0b => TypeSig::U8,
            0x0c => TypeSig::R4,
            0x0d => TypeSig::R8,
            0x0e => TypeSig::String,
            0x11 => TypeSig::ValueType(String::deserialize(reader)?),
            0x12 => TypeSig::Class(String::deserialize(reader)?),
            0x18 => TypeSig::IntPtr,
            0x1c => TypeSig::Object,
            0x1d => TypeSig::SzArray(Box::new(TypeSig::deserialize(reader)?)),
            other => return Err(Error::UnknownTypeTag(other)),
        })
    }
}

/// Signature of a method, as seen from a call site
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodSig {
    /// Does the method take an implicit `this` as argument 0?
    pub has_this: bool,
    pub parameters: Vec<TypeSig>,
    pub return_type: TypeSig,
}

impl MethodSig {
    /// Number of argument slots the method consumes, including `this`
    pub fn argument_slots(&self) -> usize {
        self.parameters.len() + self.has_this as usize
    }
}

impl Serialize for MethodSig {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.has_this.serialize(writer)?;
        self.parameters.serialize(writer)?;
        self.return_type.serialize(writer)
    }
}

impl Deserialize for MethodSig {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error> {
        Ok(MethodSig {
            has_this: bool::deserialize(reader)?,
            parameters: Vec::deserialize(reader)?,
            return_type: TypeSig::deserialize(reader)?,
        })
    }
}

/// Reference to a method, possibly defined in another module
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodRef {
    /// Full name of the declaring type (eg. `Hotfix.PatchRegistry`)
    pub declaring_type: String,
    pub name: String,
    pub signature: MethodSig,
}

impl RenderSignature for MethodRef {
    fn render_to(&self, write_to: &mut String) {
        if self.signature.has_this {
            write_to.push_str("instance ");
        }
        self.signature.return_type.render_to(write_to);
        write_to.push(' ');
        write_to.push_str(&self.declaring_type);
        write_to.push_str("::");
        write_to.push_str(&self.name);
        write_to.push('(');
        for (idx, parameter) in self.signature.parameters.iter().enumerate() {
            if idx > 0 {
                write_to.push_str(", ");
            }
            parameter.render_to(write_to);
        }
        write_to.push(')');
    }
}

impl Serialize for MethodRef {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.declaring_type.serialize(writer)?;
        self.name.serialize(writer)?;
        self.signature.serialize(writer)
    }
}

impl Deserialize for MethodRef {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error> {
        Ok(MethodRef {
            declaring_type: String::deserialize(reader)?,
            name: String::deserialize(reader)?,
            signature: MethodSig::deserialize(reader)?,
        })
    }
}
