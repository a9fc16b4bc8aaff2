use ilpatch::inject::{self, Injector, PatchRegistry, Settings};

use clap::{crate_version, value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;
use std::process;

fn main() -> Result<(), inject::Error> {
    env_logger::init();

    let matches = Command::new("IL hotfix injector")
        .version(crate_version!())
        .about("Splice patch-registry preambles into the marked methods of IL modules")
        .arg(
            Arg::new("search-dir")
                .short('s')
                .long("search-dir")
                .value_name("DIR")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help("Directory to search for referenced modules (repeatable, searched in order)"),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Directory the instrumented modules are written to"),
        )
        .arg(
            Arg::new("registry-module")
                .long("registry-module")
                .value_name("MODULE")
                .default_value(PatchRegistry::DEFAULT_MODULE)
                .help("Module defining the patch registry"),
        )
        .arg(
            Arg::new("registry-type")
                .long("registry-type")
                .value_name("TYPE")
                .default_value(PatchRegistry::DEFAULT_TYPE)
                .help("Full name of the type with `HasPatch` and `CallPatch`"),
        )
        .arg(
            Arg::new("instrument-all-marker")
                .long("instrument-all-marker")
                .value_name("NAME")
                .help("Type marker selecting all of its methods"),
        )
        .arg(
            Arg::new("instrument-marker")
                .long("instrument-marker")
                .value_name("NAME")
                .help("Method marker selecting that method"),
        )
        .arg(
            Arg::new("ignore-marker")
                .long("ignore-marker")
                .value_name("NAME")
                .help("Method marker excluding that method from its type's selection"),
        )
        .arg(
            Arg::new("injected-marker")
                .long("injected-marker")
                .value_name("NAME")
                .help("Module marker recording that the module was already instrumented"),
        )
        .arg(
            Arg::new("no-symbols")
                .long("no-symbols")
                .action(ArgAction::SetTrue)
                .help("Neither read nor write companion symbol files"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Modules to instrument, processed in order")
                .required(true)
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .index(1),
        )
        .get_matches();

    let registry = PatchRegistry::new(
        get_string(&matches, "registry-module"),
        &get_string(&matches, "registry-type"),
    );
    let output_directory = matches
        .get_one::<PathBuf>("output-dir")
        .cloned()
        .unwrap_or_default();
    let mut settings = Settings::new(output_directory, registry);

    settings.search_directories = get_paths(&matches, "search-dir");
    settings.input_modules = get_paths(&matches, "INPUT");
    if let Some(name) = matches.get_one::<String>("instrument-all-marker") {
        settings.markers.instrument_all = name.clone();
    }
    if let Some(name) = matches.get_one::<String>("instrument-marker") {
        settings.markers.instrument = name.clone();
    }
    if let Some(name) = matches.get_one::<String>("ignore-marker") {
        settings.markers.ignore = name.clone();
    }
    if let Some(name) = matches.get_one::<String>("injected-marker") {
        settings.markers.injected = name.clone();
    }
    if matches.get_flag("no-symbols") {
        settings.read_symbols = false;
        settings.write_symbols = false;
    }

    let injector = Injector::new(settings)?;
    let report = injector.run();
    log::info!(
        "{} of {} module(s) instrumented",
        report.instrumented(),
        report.outcomes.len()
    );

    if !report.is_success() {
        for (path, err) in report.failures() {
            log::error!("{}: {}", path.display(), err);
        }
        process::exit(1);
    }
    Ok(())
}

fn get_string(matches: &clap::ArgMatches, id: &str) -> String {
    matches.get_one::<String>(id).cloned().unwrap_or_default()
}

fn get_paths(matches: &clap::ArgMatches, id: &str) -> Vec<PathBuf> {
    matches
        .get_many::<PathBuf>(id)
        .map(|paths| paths.cloned().collect())
        .unwrap_or_default()
}
