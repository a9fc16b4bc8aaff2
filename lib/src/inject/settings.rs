use super::PatchRegistry;
use std::path::PathBuf;

/// Names of the markers that drive method selection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkerNames {
    /// On a type: instrument all of its methods (except those marked `ignore`)
    pub instrument_all: String,

    /// On a method: instrument this method
    pub instrument: String,

    /// On a method of an `instrument_all` type: leave this method alone
    pub ignore: String,

    /// Added to a module once it has been instrumented
    ///
    /// Modules carrying it are skipped, so running over already instrumented output doesn't stack
    /// a second preamble in front of the first.
    pub injected: String,
}

impl Default for MarkerNames {
    fn default() -> Self {
        MarkerNames {
            instrument_all: String::from("HotfixAll"),
            instrument: String::from("Hotfix"),
            ignore: String::from("HotfixIgnore"),
            injected: String::from("HotfixInjected"),
        }
    }
}

pub struct Settings {
    /// Directories to search for referenced modules, in order
    pub search_directories: Vec<PathBuf>,

    /// Modules to instrument, processed in order
    pub input_modules: Vec<PathBuf>,

    /// Modified modules are written here, under their original file name
    pub output_directory: PathBuf,

    pub markers: MarkerNames,

    /// Where the injected preambles call into
    pub registry: PatchRegistry,

    /// Read companion symbols when they exist next to an input module
    pub read_symbols: bool,

    /// Write companion symbols for modules that had some
    pub write_symbols: bool,
}

impl Settings {
    pub fn new(output_directory: impl Into<PathBuf>, registry: PatchRegistry) -> Settings {
        Settings {
            search_directories: vec![],
            input_modules: vec![],
            output_directory: output_directory.into(),
            markers: MarkerNames::default(),
            registry,
            read_symbols: true,
            write_symbols: true,
        }
    }
}
