use super::{
    select_methods, splice_preamble, synthesize, Error, ImageStore, MarkerNames, MethodPosition,
    MethodTarget, ModuleStore, PatchRegistry, SelectionPolicy, Settings, Stage,
};
use crate::il::{self, Module, ModuleResolver, TokenPool};
use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// What happened to a module
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleOutcome {
    /// Preambles were added to these methods (`Type::Method`) and the module was written out
    Instrumented { methods: Vec<String> },

    /// No method was selected, so nothing was written
    Unchanged,

    /// The module already carries the injected marker
    AlreadyInstrumented,
}

/// Instrument every selected method of a module in place
///
/// Each selected body gets its preamble spliced in, then its offsets recomputed, then is encoded
/// once to make sure it still can be. A module that comes out instrumented references the
/// registry module and carries the `injected` marker.
pub fn instrument_module(
    module: &mut Module,
    markers: &MarkerNames,
    registry: &PatchRegistry,
) -> Result<ModuleOutcome, Error> {
    if module.has_marker(&markers.injected) {
        info!("Module {} is already instrumented", module.name);
        return Ok(ModuleOutcome::AlreadyInstrumented);
    }

    let selection = select_methods(module, &SelectionPolicy::new(markers));
    for anomaly in &selection.anomalies {
        let type_def = &module.types[anomaly.type_index];
        warn!(
            "{}::{} is marked '{}' but {} is not marked '{}' (method left alone)",
            type_def.full_name(),
            type_def.methods[anomaly.method_index].name,
            markers.ignore,
            type_def.full_name(),
            markers.instrument_all,
        );
    }
    if selection.is_empty() {
        info!("No methods selected in module {}", module.name);
        return Ok(ModuleOutcome::Unchanged);
    }

    for position in &selection.methods {
        splice_method(module, *position, registry)?;
    }

    // All splicing is done: offsets get recomputed exactly once per body
    let mut instrumented = Vec::with_capacity(selection.methods.len());
    for position in &selection.methods {
        let type_def = &mut module.types[position.type_index];
        let type_name = type_def.full_name();
        let method = &mut type_def.methods[position.method_index];
        if let Some(body) = method.body.as_mut() {
            body.recompute_offsets();
            if let Err(source) = body.encode(&mut TokenPool::new()) {
                return Err(Error::Method {
                    type_name,
                    method_name: method.name.clone(),
                    stage: Stage::Serialized,
                    source,
                });
            }
        }
        instrumented.push(format!("{}::{}", type_name, method.name));
    }

    module.add_reference(&registry.module);
    module.markers.push(markers.injected.clone());
    info!(
        "Instrumented {} method(s) in module {}",
        instrumented.len(),
        module.name
    );
    Ok(ModuleOutcome::Instrumented {
        methods: instrumented,
    })
}

fn splice_method(
    module: &mut Module,
    position: MethodPosition,
    registry: &PatchRegistry,
) -> Result<(), Error> {
    let type_def = &mut module.types[position.type_index];
    let type_name = type_def.full_name();
    let target = MethodTarget::new(type_def, &type_def.methods[position.method_index]);
    let method = &mut type_def.methods[position.method_index];
    let failure = |stage: Stage, source: il::Error| Error::Method {
        type_name: type_name.clone(),
        method_name: target.method_name.clone(),
        stage,
        source,
    };

    let body = match method.body.as_mut() {
        Some(body) => body,
        None => return Ok(()),
    };
    let original_first = body
        .first()
        .ok_or_else(|| failure(Stage::Synthesized, il::Error::EmptyBody))?;
    let preamble = synthesize(&target, registry, original_first)
        .map_err(|err| failure(Stage::Synthesized, err))?;
    let spliced = splice_preamble(body, preamble).map_err(|err| failure(Stage::Spliced, err))?;
    debug!(
        "Spliced {} instruction(s) into {}::{}",
        spliced.inserted, type_name, target.method_name
    );
    Ok(())
}

/// Result of running over a batch of modules
#[derive(Debug, Default)]
pub struct BatchReport {
    /// One entry per input module, in input order
    pub outcomes: Vec<(PathBuf, Result<ModuleOutcome, Error>)>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = (&Path, &Error)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|(path, outcome)| outcome.as_ref().err().map(|err| (path.as_path(), err)))
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.is_ok())
    }

    /// Number of modules that were instrumented and written
    pub fn instrumented(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, Ok(ModuleOutcome::Instrumented { .. })))
            .count()
    }
}

/// Batch driver: read, instrument and write each input module in turn
pub struct Injector<S: ModuleStore = ImageStore> {
    settings: Settings,
    resolver: ModuleResolver,
    store: S,
}

impl Injector<ImageStore> {
    pub fn new(settings: Settings) -> Result<Injector<ImageStore>, Error> {
        let store = ImageStore {
            read_symbols: settings.read_symbols,
            write_symbols: settings.write_symbols,
        };
        Injector::with_store(settings, store)
    }
}

impl<S: ModuleStore> Injector<S> {
    pub fn with_store(settings: Settings, store: S) -> Result<Injector<S>, Error> {
        settings.registry.validate()?;
        let mut resolver = ModuleResolver::new();
        for directory in &settings.search_directories {
            resolver.add_search_directory(directory);
        }
        Ok(Injector {
            settings,
            resolver,
            store,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Process every input module
    ///
    /// A module that fails is reported and skipped: the other modules are still processed.
    pub fn run(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for input in &self.settings.input_modules {
            let outcome = self.run_module(input);
            if let Err(err) = &outcome {
                error!("{}", err);
            }
            report.outcomes.push((input.clone(), outcome));
        }
        report
    }

    /// Read one module, instrument it, and write it out if anything changed
    pub fn run_module(&self, input: &Path) -> Result<ModuleOutcome, Error> {
        let output = self.output_path(input)?;

        let mut module = self
            .store
            .load(input, &self.resolver)
            .map_err(|source| Error::Load {
                path: input.to_path_buf(),
                source,
            })?;

        let outcome =
            instrument_module(&mut module, &self.settings.markers, &self.settings.registry)?;
        if let ModuleOutcome::Instrumented { methods } = &outcome {
            for method in methods {
                debug!("Instrumented {}", method);
            }
            self.store
                .save(&module, &output)
                .map_err(|source| Error::Write {
                    path: output.clone(),
                    source,
                })?;
        }
        Ok(outcome)
    }

    /// `output_directory/<input file name>`, provided it isn't the input itself
    pub fn output_path(&self, input: &Path) -> Result<PathBuf, Error> {
        let file_name = input
            .file_name()
            .ok_or_else(|| Error::MissingFileName(input.to_path_buf()))?;
        let output = self.settings.output_directory.join(file_name);
        if same_file(input, &output) {
            return Err(Error::OutputOverwritesInput(input.to_path_buf()));
        }
        Ok(output)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
