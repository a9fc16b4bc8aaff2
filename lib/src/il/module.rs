use crate::il::code::Body;
use crate::il::{MethodAttributes, MethodRef, MethodSig, TypeAttributes, TypeSig};

/// Compiled module: the unit that gets read, instrumented, and written back
#[derive(Clone, Debug)]
pub struct Module {
    pub name: String,

    /// Names of the modules this one depends on
    pub references: Vec<String>,

    /// Module-level markers
    pub markers: Vec<String>,

    pub types: Vec<TypeDef>,

    /// Companion debug data, if it was read alongside the module
    pub symbols: Option<Symbols>,
}

/// Module-wide debug data (the per-instruction part lives on each [`Body`])
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbols {
    /// Source document the sequence points refer to
    pub document: String,
}

#[derive(Clone, Debug)]
pub struct TypeDef {
    pub namespace: String,
    pub name: String,
    pub attributes: TypeAttributes,
    pub markers: Vec<String>,
    pub methods: Vec<MethodDef>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeSig,
}

#[derive(Clone, Debug)]
pub struct MethodDef {
    pub name: String,
    pub attributes: MethodAttributes,
    pub parameters: Vec<Parameter>,

    /// `TypeSig::Void` for methods that return nothing
    pub return_type: TypeSig,
    pub markers: Vec<String>,

    /// Absent for abstract and extern methods
    pub body: Option<Body>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Module {
        Module {
            name: name.into(),
            references: vec![],
            markers: vec![],
            types: vec![],
            symbols: None,
        }
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| m == marker)
    }

    /// Add a module reference, unless it is already there (or is this module)
    pub fn add_reference(&mut self, reference: &str) -> bool {
        if reference == self.name || self.references.iter().any(|r| r == reference) {
            false
        } else {
            self.references.push(reference.to_owned());
            true
        }
    }
}

impl TypeDef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> TypeDef {
        TypeDef {
            namespace: namespace.into(),
            name: name.into(),
            attributes: TypeAttributes::PUBLIC,
            markers: vec![],
            methods: vec![],
        }
    }

    /// Namespace-qualified name (eg. `Game.Player`)
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| m == marker)
    }
}

impl MethodDef {
    pub const CONSTRUCTOR: &'static str = ".ctor";
    pub const TYPE_INITIALIZER: &'static str = ".cctor";

    pub fn is_static(&self) -> bool {
        self.attributes.contains(MethodAttributes::STATIC)
    }

    /// Instance constructor or type initializer
    pub fn is_constructor(&self) -> bool {
        self.name == Self::CONSTRUCTOR || self.name == Self::TYPE_INITIALIZER
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| m == marker)
    }

    pub fn signature(&self) -> MethodSig {
        MethodSig {
            has_this: !self.is_static(),
            parameters: self.parameters.iter().map(|p| p.ty.clone()).collect(),
            return_type: self.return_type.clone(),
        }
    }

    /// Reference for calling this method, given the full name of its declaring type
    pub fn method_ref(&self, declaring_type: &str) -> MethodRef {
        MethodRef {
            declaring_type: declaring_type.to_owned(),
            name: self.name.clone(),
            signature: self.signature(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn method(name: &str, attributes: MethodAttributes) -> MethodDef {
        MethodDef {
            name: name.to_owned(),
            attributes,
            parameters: vec![Parameter {
                name: String::from("height"),
                ty: TypeSig::R4,
            }],
            return_type: TypeSig::Void,
            markers: vec![],
            body: None,
        }
    }

    #[test]
    fn constructors_are_recognized_by_name() {
        let ctor = method(".ctor", MethodAttributes::RT_SPECIAL_NAME);
        let cctor = method(".cctor", MethodAttributes::STATIC);
        let jump = method("Jump", MethodAttributes::PUBLIC);
        assert!(ctor.is_constructor());
        assert!(cctor.is_constructor());
        assert!(!jump.is_constructor());
    }

    #[test]
    fn instance_methods_take_this() {
        let jump = method("Jump", MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG);
        assert_eq!(jump.signature().argument_slots(), 2);
        let spawn = method("Spawn", MethodAttributes::PUBLIC | MethodAttributes::STATIC);
        assert_eq!(spawn.signature().argument_slots(), 1);
        assert_eq!(
            spawn.method_ref("Game.Player").declaring_type,
            "Game.Player"
        );
    }

    #[test]
    fn references_are_deduplicated() {
        let mut module = Module::new("Game");
        assert!(module.add_reference("Hotfix"));
        assert!(!module.add_reference("Hotfix"));
        assert!(!module.add_reference("Game"));
        assert_eq!(module.references, vec![String::from("Hotfix")]);

        assert_eq!(TypeDef::new("", "Player").full_name(), "Player");
        assert_eq!(TypeDef::new("Game", "Player").full_name(), "Game.Player");
    }
}
