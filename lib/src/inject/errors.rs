use crate::il;
use std::fmt;
use std::path::PathBuf;

/// Steps a selected method goes through
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Stage {
    Selected,
    Synthesized,
    Spliced,
    OffsetsRecomputed,
    Serialized,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Selected => "selection",
            Stage::Synthesized => "preamble synthesis",
            Stage::Spliced => "splicing",
            Stage::OffsetsRecomputed => "offset recomputation",
            Stage::Serialized => "serialization",
        })
    }
}

#[derive(Debug)]
pub enum Error {
    /// Module (or one of its dependencies) could not be read
    Load { path: PathBuf, source: il::Error },

    /// Instrumented module could not be written
    Write { path: PathBuf, source: il::Error },

    /// Instrumenting one method failed
    Method {
        type_name: String,
        method_name: String,
        stage: Stage,
        source: il::Error,
    },

    /// Patch registry methods don't have the expected shape
    InvalidRegistry(String),

    /// Writing the output would clobber the input module
    OutputOverwritesInput(PathBuf),

    /// Input path has no file name to reuse for the output
    MissingFileName(PathBuf),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Load { path, source } => {
                write!(f, "failed to load {}: {}", path.display(), source)
            }
            Error::Write { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
            Error::Method {
                type_name,
                method_name,
                stage,
                source,
            } => write!(
                f,
                "failed to instrument {}::{} during {}: {}",
                type_name, method_name, stage, source
            ),
            Error::InvalidRegistry(reason) => write!(f, "invalid patch registry: {}", reason),
            Error::OutputOverwritesInput(path) => {
                write!(f, "output would overwrite input {}", path.display())
            }
            Error::MissingFileName(path) => {
                write!(f, "input path {} has no file name", path.display())
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Load { source, .. }
            | Error::Write { source, .. }
            | Error::Method { source, .. } => Some(source),
            _ => None,
        }
    }
}
