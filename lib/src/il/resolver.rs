use crate::il::{Error, Module};
use log::{debug, trace};
use std::path::{Path, PathBuf};

/// Finds the modules a module depends on
///
/// A reference `Foo` resolves to the first `Foo.ilm` found in the referencing module's own
/// directory, then in each search directory in the order they were added.
#[derive(Clone, Debug, Default)]
pub struct ModuleResolver {
    search_directories: Vec<PathBuf>,
}

impl ModuleResolver {
    /// File extension of module images
    pub const EXTENSION: &'static str = "ilm";

    pub fn new() -> ModuleResolver {
        ModuleResolver::default()
    }

    pub fn add_search_directory(&mut self, directory: impl Into<PathBuf>) {
        let directory = directory.into();
        debug!("Adding search directory {}", directory.display());
        self.search_directories.push(directory);
    }

    pub fn search_directories(&self) -> &[PathBuf] {
        &self.search_directories
    }

    /// Locate one referenced module
    pub fn resolve(&self, reference: &str, referrer_dir: Option<&Path>) -> Result<PathBuf, Error> {
        let file_name = format!("{}.{}", reference, Self::EXTENSION);
        let mut searched: Vec<PathBuf> = vec![];
        for directory in referrer_dir
            .into_iter()
            .chain(self.search_directories.iter().map(PathBuf::as_path))
        {
            let candidate = directory.join(&file_name);
            trace!("Looking for '{}' at {}", reference, candidate.display());
            if candidate.is_file() {
                return Ok(candidate);
            }
            searched.push(directory.to_path_buf());
        }
        Err(Error::UnresolvedReference {
            reference: reference.to_owned(),
            searched,
        })
    }

    /// Locate every module referenced by `module`, failing on the first one that is missing
    pub fn resolve_references(
        &self,
        module: &Module,
        referrer_dir: Option<&Path>,
    ) -> Result<Vec<PathBuf>, Error> {
        module
            .references
            .iter()
            .map(|reference| self.resolve(reference, referrer_dir))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn search_order() {
        let own = tempfile::tempdir().unwrap();
        let engine = tempfile::tempdir().unwrap();
        let extra = tempfile::tempdir().unwrap();
        fs::write(engine.path().join("Engine.ilm"), b"").unwrap();
        fs::write(extra.path().join("Engine.ilm"), b"").unwrap();
        fs::write(own.path().join("Hotfix.ilm"), b"").unwrap();
        fs::write(extra.path().join("Hotfix.ilm"), b"").unwrap();

        let mut resolver = ModuleResolver::new();
        resolver.add_search_directory(engine.path());
        resolver.add_search_directory(extra.path());

        assert_eq!(
            resolver.resolve("Engine", Some(own.path())).unwrap(),
            engine.path().join("Engine.ilm")
        );
        assert_eq!(
            resolver.resolve("Hotfix", Some(own.path())).unwrap(),
            own.path().join("Hotfix.ilm")
        );
        assert_eq!(
            resolver.resolve("Hotfix", None).unwrap(),
            extra.path().join("Hotfix.ilm")
        );
    }

    #[test]
    fn missing_reference_lists_searched_directories() {
        let engine = tempfile::tempdir().unwrap();
        let mut resolver = ModuleResolver::new();
        resolver.add_search_directory(engine.path());

        let mut module = Module::new("Game");
        module.references.push(String::from("Physics"));
        match resolver.resolve_references(&module, None) {
            Err(Error::UnresolvedReference {
                reference,
                searched,
            }) => {
                assert_eq!(reference, "Physics");
                assert_eq!(searched, vec![engine.path().to_path_buf()]);
            }
            other => panic!("expected an unresolved reference, got {:?}", other),
        }
    }
}
