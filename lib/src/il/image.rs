//! Module images and their companion symbols
//!
//! ### Module image
//!
//! All integers are little endian, strings and sequences are prefixed with their `u32` length.
//!
//! ```text
//! module   := "ILMD" u16:version str:name vec<str>:references vec<str>:markers
//!             tokens vec<type>
//! tokens   := vec<str>:strings vec<typesig>:types vec<methodref>:methods
//! type     := str:namespace str:name u32:attributes vec<str>:markers vec<method>
//! method   := str:name u16:attributes vec<param> typesig:return vec<str>:markers
//!             u8:has_body [body]
//! param    := str:name typesig
//! body     := u16:max_stack u8:init_locals vec<typesig>:locals u32:code_size bytes
//! ```
//!
//! The token tables are written before the types since code refers to them, so all bodies are
//! encoded first.
//!
//! ### Symbols
//!
//! ```text
//! symbols  := "ILDB" str:document vec<entry>
//! entry    := u32:type_index u32:method_index vec<point>
//! point    := u32:il_offset u32:line u16:column
//! ```
//!
//! Sequence points are anchored to instructions when read, and written at the current offset
//! of that instruction. Code spliced in front of a method thus shifts its debug data along.

use crate::il::code::{decode_code, Body, DecodedCode, SequencePoint};
use crate::il::{
    Deserialize, Error, MethodAttributes, MethodDef, Module, Parameter, Serialize, Symbols,
    TokenPool, TokenTable, TypeAttributes, TypeDef, TypeSig,
};
use crate::util::Offset;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::path::{Path, PathBuf};

pub const MODULE_MAGIC: [u8; 4] = *b"ILMD";
pub const SYMBOLS_MAGIC: [u8; 4] = *b"ILDB";
pub const VERSION: u16 = 1;

/// File extension of companion symbol files
pub const SYMBOLS_EXTENSION: &str = "ilpdb";

/// Where the symbols of a module image live (next to it, with a different extension)
pub fn symbols_path(module_path: &Path) -> PathBuf {
    module_path.with_extension(SYMBOLS_EXTENSION)
}

impl Serialize for Parameter {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name.serialize(writer)?;
        self.ty.serialize(writer)
    }
}

impl Deserialize for Parameter {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(Parameter {
            name: String::deserialize(reader)?,
            ty: TypeSig::deserialize(reader)?,
        })
    }
}

fn read_magic<R: ReadBytesExt>(reader: &mut R, expected: [u8; 4]) -> Result<(), Error> {
    let mut found = [0u8; 4];
    reader.read_exact(&mut found)?;
    if found != expected {
        return Err(Error::BadMagic { expected, found });
    }
    Ok(())
}

/// Write a module image
///
/// Every body must have current offsets.
pub fn write_module<W: WriteBytesExt>(module: &Module, writer: &mut W) -> Result<(), Error> {
    let mut pool = TokenPool::new();
    let mut code: Vec<Vec<Option<Vec<u8>>>> = Vec::with_capacity(module.types.len());
    for type_def in &module.types {
        let mut type_code = Vec::with_capacity(type_def.methods.len());
        for method in &type_def.methods {
            type_code.push(match &method.body {
                Some(body) => Some(body.encode(&mut pool)?),
                None => None,
            });
        }
        code.push(type_code);
    }

    writer.write_all(&MODULE_MAGIC)?;
    VERSION.serialize(writer)?;
    module.name.serialize(writer)?;
    module.references.serialize(writer)?;
    module.markers.serialize(writer)?;
    pool.into_table().serialize(writer)?;

    (module.types.len() as u32).serialize(writer)?;
    for (type_def, type_code) in module.types.iter().zip(code) {
        type_def.namespace.serialize(writer)?;
        type_def.name.serialize(writer)?;
        type_def.attributes.serialize(writer)?;
        type_def.markers.serialize(writer)?;
        (type_def.methods.len() as u32).serialize(writer)?;
        for (method, method_code) in type_def.methods.iter().zip(type_code) {
            method.name.serialize(writer)?;
            method.attributes.serialize(writer)?;
            method.parameters.serialize(writer)?;
            method.return_type.serialize(writer)?;
            method.markers.serialize(writer)?;
            match (&method.body, method_code) {
                (Some(body), Some(bytes)) => {
                    true.serialize(writer)?;
                    body.max_stack.serialize(writer)?;
                    body.init_locals.serialize(writer)?;
                    body.locals.serialize(writer)?;
                    bytes.serialize(writer)?;
                }
                _ => false.serialize(writer)?,
            }
        }
    }
    Ok(())
}

/// Module freshly read from an image, along with what is needed to attach its symbols
pub struct ModuleImage {
    module: Module,

    /// Decoded code of every method, indexed like `module.types[_].methods[_]`
    code: Vec<Vec<Option<DecodedCode>>>,
}

/// Read a module image
pub fn read_module<R: ReadBytesExt>(reader: &mut R) -> Result<ModuleImage, Error> {
    read_magic(reader, MODULE_MAGIC)?;
    let version = u16::deserialize(reader)?;
    if version != VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let mut module = Module::new(String::deserialize(reader)?);
    module.references = Vec::deserialize(reader)?;
    module.markers = Vec::deserialize(reader)?;
    let tokens = TokenTable::deserialize(reader)?;

    let type_count = u32::deserialize(reader)?;
    let mut code = vec![];
    for _ in 0..type_count {
        let mut type_def = TypeDef {
            namespace: String::deserialize(reader)?,
            name: String::deserialize(reader)?,
            attributes: TypeAttributes::deserialize(reader)?,
            markers: Vec::deserialize(reader)?,
            methods: vec![],
        };
        let method_count = u32::deserialize(reader)?;
        let mut type_code = vec![];
        for _ in 0..method_count {
            type_def.methods.push(MethodDef {
                name: String::deserialize(reader)?,
                attributes: MethodAttributes::deserialize(reader)?,
                parameters: Vec::deserialize(reader)?,
                return_type: TypeSig::deserialize(reader)?,
                markers: Vec::deserialize(reader)?,
                body: None,
            });
            type_code.push(if bool::deserialize(reader)? {
                Some(read_body(reader, &tokens)?)
            } else {
                None
            });
        }
        module.types.push(type_def);
        code.push(type_code);
    }

    Ok(ModuleImage { module, code })
}

fn read_body<R: ReadBytesExt>(reader: &mut R, tokens: &TokenTable) -> Result<DecodedCode, Error> {
    let max_stack = u16::deserialize(reader)?;
    let init_locals = bool::deserialize(reader)?;
    let locals: Vec<TypeSig> = Vec::deserialize(reader)?;
    let bytes: Vec<u8> = Vec::deserialize(reader)?;
    let mut decoded = decode_code(&bytes, tokens)?;
    decoded.body.max_stack = max_stack;
    decoded.body.init_locals = init_locals;
    decoded.body.locals = locals;
    Ok(decoded)
}

impl ModuleImage {
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Read companion symbols and anchor their sequence points to the decoded instructions
    pub fn read_symbols<R: ReadBytesExt>(&mut self, reader: &mut R) -> Result<(), Error> {
        read_magic(reader, SYMBOLS_MAGIC)?;
        let document = String::deserialize(reader)?;

        let entry_count = u32::deserialize(reader)?;
        for _ in 0..entry_count {
            let type_index = u32::deserialize(reader)?;
            let method_index = u32::deserialize(reader)?;
            let point_count = u32::deserialize(reader)?;
            for _ in 0..point_count {
                let offset = Offset(u32::deserialize(reader)? as usize);
                let line = u32::deserialize(reader)?;
                let column = u16::deserialize(reader)?;

                let decoded = self
                    .code
                    .get_mut(type_index as usize)
                    .and_then(|methods| methods.get_mut(method_index as usize))
                    .and_then(|code| code.as_mut());
                let bad_point = || Error::BadSequencePoint {
                    type_index,
                    method_index,
                    offset,
                };
                let decoded = decoded.ok_or_else(bad_point)?;
                let instruction = decoded.instruction_at(offset).ok_or_else(bad_point)?;
                decoded.body.sequence_points.push(SequencePoint {
                    instruction,
                    line,
                    column,
                });
            }
        }

        self.module.symbols = Some(Symbols { document });
        Ok(())
    }

    /// Move the decoded bodies into their methods
    pub fn into_module(self) -> Module {
        let mut module = self.module;
        for (type_def, type_code) in module.types.iter_mut().zip(self.code) {
            for (method, code) in type_def.methods.iter_mut().zip(type_code) {
                method.body = code.map(|decoded| decoded.body);
            }
        }
        module
    }
}

/// Write the companion symbols of a module
///
/// Does nothing useful for a module without symbols, but still produces a valid (empty) file.
pub fn write_symbols<W: WriteBytesExt>(module: &Module, writer: &mut W) -> Result<(), Error> {
    writer.write_all(&SYMBOLS_MAGIC)?;
    let document = module
        .symbols
        .as_ref()
        .map(|symbols| symbols.document.as_str())
        .unwrap_or("");
    document.serialize(writer)?;

    let mut entries: Vec<(u32, u32, &Body)> = vec![];
    for (type_index, type_def) in module.types.iter().enumerate() {
        for (method_index, method) in type_def.methods.iter().enumerate() {
            if let Some(body) = &method.body {
                if !body.sequence_points.is_empty() {
                    entries.push((type_index as u32, method_index as u32, body));
                }
            }
        }
    }

    (entries.len() as u32).serialize(writer)?;
    for (type_index, method_index, body) in entries {
        if !body.offsets_are_current() {
            return Err(Error::StaleOffsets);
        }
        type_index.serialize(writer)?;
        method_index.serialize(writer)?;
        (body.sequence_points.len() as u32).serialize(writer)?;
        for point in &body.sequence_points {
            let offset = body
                .offset(point.instruction)
                .ok_or(Error::UnknownInstruction(point.instruction))?;
            (offset.0 as u32).serialize(writer)?;
            point.line.serialize(writer)?;
            point.column.serialize(writer)?;
        }
    }
    Ok(())
}
