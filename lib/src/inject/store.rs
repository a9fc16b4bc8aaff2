use crate::il::image::{self, symbols_path};
use crate::il::{Error, Module, ModuleResolver};
use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where modules are read from and written to
pub trait ModuleStore {
    /// Read a module, checking that everything it references can be found
    fn load(&self, path: &Path, resolver: &ModuleResolver) -> Result<Module, Error>;

    /// Write a module (and its symbols, if the store handles them)
    fn save(&self, module: &Module, path: &Path) -> Result<(), Error>;
}

/// Module images on disk, with their symbols alongside
#[derive(Copy, Clone, Debug)]
pub struct ImageStore {
    pub read_symbols: bool,
    pub write_symbols: bool,
}

impl Default for ImageStore {
    fn default() -> Self {
        ImageStore {
            read_symbols: true,
            write_symbols: true,
        }
    }
}

impl ModuleStore for ImageStore {
    fn load(&self, path: &Path, resolver: &ModuleResolver) -> Result<Module, Error> {
        info!("Reading module {}", path.display());
        let bytes = fs::read(path)?;
        let mut image = image::read_module(&mut bytes.as_slice())?;

        if self.read_symbols {
            let symbols = symbols_path(path);
            match fs::read(&symbols) {
                Ok(bytes) => {
                    debug!("Reading symbols {}", symbols.display());
                    image.read_symbols(&mut bytes.as_slice())?;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => (),
                Err(err) => return Err(Error::IoError(err)),
            }
        }

        for reference in resolver.resolve_references(image.module(), path.parent())? {
            debug!("Resolved reference {}", reference.display());
        }
        Ok(image.into_module())
    }

    fn save(&self, module: &Module, path: &Path) -> Result<(), Error> {
        // Serialize everything before touching the file system
        let mut module_bytes = vec![];
        image::write_module(module, &mut module_bytes)?;
        let symbol_bytes = if self.write_symbols && module.symbols.is_some() {
            let mut bytes = vec![];
            image::write_symbols(module, &mut bytes)?;
            Some(bytes)
        } else {
            None
        };

        let mut files = vec![(path.to_path_buf(), module_bytes)];
        if let Some(bytes) = symbol_bytes {
            files.push((symbols_path(path), bytes));
        }

        info!("Writing module {}", path.display());
        write_all_or_nothing(&files)?;
        Ok(())
    }
}

/// Write every file, or leave none of them behind
///
/// Files are staged next to their destination, then renamed into place last to first.
fn write_all_or_nothing(files: &[(PathBuf, Vec<u8>)]) -> io::Result<()> {
    let mut staged: Vec<PathBuf> = Vec::with_capacity(files.len());
    for (path, bytes) in files {
        let staging = staging_path(path);
        let written = fs::write(&staging, bytes);
        staged.push(staging);
        if let Err(err) = written {
            discard(&staged);
            return Err(err);
        }
    }

    let mut placed: Vec<&Path> = vec![];
    for ((path, _), staging) in files.iter().zip(&staged).rev() {
        debug!("Moving {} to {}", staging.display(), path.display());
        if let Err(err) = replace(staging, path) {
            discard(&staged);
            discard(&placed);
            return Err(err);
        }
        placed.push(path);
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.ilpatch.tmp", file_name))
}

fn replace(staging: &Path, path: &Path) -> io::Result<()> {
    match fs::rename(staging, path) {
        Ok(()) => Ok(()),

        // Windows won't rename over an existing file
        Err(_) if cfg!(windows) && path.is_file() => {
            fs::remove_file(path)?;
            fs::rename(staging, path)
        }
        Err(err) => Err(err),
    }
}

fn discard<P: AsRef<Path>>(paths: &[P]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}
