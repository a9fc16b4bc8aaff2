use super::Error;
use crate::il::{MethodRef, MethodSig, RenderSignature, TypeSig};

/// The two entry points of the run-time patch registry
///
/// Preambles only ever call these two methods, so the registry is handed around as a pair of
/// method references rather than looked up by name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchRegistry {
    /// Name of the module defining the registry type
    pub module: String,

    /// `static bool HasPatch(string typeName, string methodName)`
    pub has_patch: MethodRef,

    /// `static object CallPatch(string typeName, string methodName, object[] args)`
    pub call_patch: MethodRef,
}

impl PatchRegistry {
    pub const DEFAULT_MODULE: &'static str = "Hotfix";
    pub const DEFAULT_TYPE: &'static str = "Hotfix.PatchRegistry";

    /// Standard registry contract, on the type `declaring_type` of module `module`
    pub fn new(module: impl Into<String>, declaring_type: &str) -> PatchRegistry {
        PatchRegistry {
            module: module.into(),
            has_patch: MethodRef {
                declaring_type: declaring_type.to_owned(),
                name: String::from("HasPatch"),
                signature: MethodSig {
                    has_this: false,
                    parameters: vec![TypeSig::String, TypeSig::String],
                    return_type: TypeSig::Boolean,
                },
            },
            call_patch: MethodRef {
                declaring_type: declaring_type.to_owned(),
                name: String::from("CallPatch"),
                signature: MethodSig {
                    has_this: false,
                    parameters: vec![
                        TypeSig::String,
                        TypeSig::String,
                        TypeSig::array_of(TypeSig::Object),
                    ],
                    return_type: TypeSig::Object,
                },
            },
        }
    }

    /// Check that both entry points can be called the way preambles call them
    pub fn validate(&self) -> Result<(), Error> {
        let has_patch = &self.has_patch.signature;
        if has_patch.has_this
            || has_patch.parameters != [TypeSig::String, TypeSig::String]
            || has_patch.return_type != TypeSig::Boolean
        {
            return Err(Error::InvalidRegistry(format!(
                "expected `static bool HasPatch(string, string)`, found `{}`",
                self.has_patch.render()
            )));
        }

        let call_patch = &self.call_patch.signature;
        if call_patch.has_this
            || call_patch.parameters
                != [
                    TypeSig::String,
                    TypeSig::String,
                    TypeSig::array_of(TypeSig::Object),
                ]
            || call_patch.return_type != TypeSig::Object
        {
            return Err(Error::InvalidRegistry(format!(
                "expected `static object CallPatch(string, string, object[])`, found `{}`",
                self.call_patch.render()
            )));
        }

        Ok(())
    }

    /// Does `CallPatch` leave a value on the stack?
    pub fn call_patch_returns_value(&self) -> bool {
        !self.call_patch.signature.return_type.is_void()
    }
}

impl Default for PatchRegistry {
    fn default() -> Self {
        PatchRegistry::new(Self::DEFAULT_MODULE, Self::DEFAULT_TYPE)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn standard_contract_is_valid() {
        let registry = PatchRegistry::new("Scripting", "Scripting.Patches");
        assert!(registry.validate().is_ok());
        assert!(registry.call_patch_returns_value());
        assert_eq!(
            registry.has_patch.render(),
            "bool Scripting.Patches::HasPatch(string, string)"
        );
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        let mut instance = PatchRegistry::default();
        instance.has_patch.signature.has_this = true;
        assert!(matches!(
            instance.validate(),
            Err(Error::InvalidRegistry(_))
        ));

        let mut void_call = PatchRegistry::default();
        void_call.call_patch.signature.return_type = TypeSig::Void;
        assert!(matches!(
            void_call.validate(),
            Err(Error::InvalidRegistry(_))
        ));
        assert!(!void_call.call_patch_returns_value());
    }
}
