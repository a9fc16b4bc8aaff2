use ilpatch::il::code::{Body, Instruction, SequencePoint};
use ilpatch::il::image::{self, symbols_path};
use ilpatch::il::{
    MethodAttributes, MethodDef, Module, ModuleResolver, Parameter, Symbols, TypeDef, TypeSig,
};
use ilpatch::inject::{
    self, ImageStore, Injector, ModuleOutcome, ModuleStore, PatchRegistry, Settings,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn clamp_method(markers: &[&str]) -> MethodDef {
    let mut body = Body::from_instructions(vec![
        Instruction::LdArg(1),
        Instruction::LdcI4(0),
        Instruction::Cgt,
        Instruction::Ret,
    ])
    .unwrap();
    let first = body.first().unwrap();
    let last = body.id_at(3).unwrap();
    body.sequence_points = vec![
        SequencePoint {
            instruction: first,
            line: 12,
            column: 9,
        },
        SequencePoint {
            instruction: last,
            line: 13,
            column: 5,
        },
    ];

    MethodDef {
        name: String::from("IsPositive"),
        attributes: MethodAttributes::PUBLIC,
        parameters: vec![Parameter {
            name: String::from("x"),
            ty: TypeSig::I4,
        }],
        return_type: TypeSig::Boolean,
        markers: markers.iter().map(|m| m.to_string()).collect(),
        body: Some(body),
    }
}

fn game_module(markers: &[&str]) -> Module {
    let mut player = TypeDef::new("Game", "Player");
    player.methods.push(clamp_method(markers));
    let mut module = Module::new("Game");
    module.types.push(player);
    module.symbols = Some(Symbols {
        document: String::from("Player.cs"),
    });
    module
}

fn write_image(module: &Module, path: &Path) {
    let mut bytes = vec![];
    image::write_module(module, &mut bytes).unwrap();
    fs::write(path, bytes).unwrap();
    if module.symbols.is_some() {
        let mut bytes = vec![];
        image::write_symbols(module, &mut bytes).unwrap();
        fs::write(symbols_path(path), bytes).unwrap();
    }
}

struct Workspace {
    _root: TempDir,
    input: PathBuf,
    search: PathBuf,
    output: PathBuf,
}

fn workspace() -> Workspace {
    let root = TempDir::new().unwrap();
    let input = root.path().join("in");
    let search = root.path().join("lib");
    let output = root.path().join("out");
    for dir in [&input, &search, &output] {
        fs::create_dir(dir).unwrap();
    }
    write_image(&Module::new("Hotfix"), &search.join("Hotfix.ilm"));
    Workspace {
        _root: root,
        input,
        search,
        output,
    }
}

fn settings(ws: &Workspace, inputs: Vec<PathBuf>) -> Settings {
    let mut settings = Settings::new(&ws.output, PatchRegistry::default());
    settings.search_directories = vec![ws.search.clone()];
    settings.input_modules = inputs;
    settings
}

#[test]
fn instruments_marked_methods_on_disk() {
    let ws = workspace();
    let input = ws.input.join("Game.ilm");
    write_image(&game_module(&["Hotfix"]), &input);
    let input_bytes = fs::read(&input).unwrap();

    let report = Injector::new(settings(&ws, vec![input.clone()]))
        .unwrap()
        .run();
    assert!(report.is_success());
    assert_eq!(report.instrumented(), 1);
    assert_eq!(
        report.outcomes[0].1.as_ref().unwrap(),
        &ModuleOutcome::Instrumented {
            methods: vec![String::from("Game.Player::IsPositive")]
        }
    );

    // Input untouched
    assert_eq!(fs::read(&input).unwrap(), input_bytes);

    let output = ws.output.join("Game.ilm");
    let mut resolver = ModuleResolver::new();
    resolver.add_search_directory(&ws.search);
    let module = ImageStore::default().load(&output, &resolver).unwrap();
    assert!(module.references.contains(&String::from("Hotfix")));
    assert!(module.has_marker("HotfixInjected"));

    let body = module.types[0].methods[0].body.as_ref().unwrap();
    let (_, _, first) = body.iter().next().unwrap();
    assert_eq!(first, &Instruction::LdStr(String::from("Player")));

    // Debug data follows the original instructions to their new offsets
    assert_eq!(body.sequence_points.len(), 2);
    let anchored = body.sequence_points[0].instruction;
    assert_eq!(body.instruction(anchored), Some(&Instruction::LdArg(1)));
    assert!(body.offset(anchored).unwrap().0 > 0);
    assert_eq!(body.sequence_points[0].line, 12);
    let last = body.sequence_points[1].instruction;
    assert_eq!(body.position(last), Some(body.len() - 1));
}

#[test]
fn second_pass_is_a_no_op() {
    let ws = workspace();
    let input = ws.input.join("Game.ilm");
    write_image(&game_module(&["Hotfix"]), &input);
    Injector::new(settings(&ws, vec![input])).unwrap().run();

    let first_pass = ws.output.join("Game.ilm");
    let again = ws.input.join("again");
    fs::create_dir(&again).unwrap();
    let mut settings = settings(&ws, vec![first_pass]);
    settings.output_directory = again.clone();

    let report = Injector::new(settings).unwrap().run();
    assert_eq!(
        report.outcomes[0].1.as_ref().unwrap(),
        &ModuleOutcome::AlreadyInstrumented
    );
    assert!(!again.join("Game.ilm").exists());
}

#[test]
fn unmarked_module_is_not_written() {
    let ws = workspace();
    let input = ws.input.join("Game.ilm");
    write_image(&game_module(&[]), &input);

    let report = Injector::new(settings(&ws, vec![input])).unwrap().run();
    assert_eq!(
        report.outcomes[0].1.as_ref().unwrap(),
        &ModuleOutcome::Unchanged
    );
    assert!(!ws.output.join("Game.ilm").exists());
}

#[test]
fn unresolved_reference_fails_only_that_module() {
    let ws = workspace();
    let broken = ws.input.join("Broken.ilm");
    let mut module = game_module(&["Hotfix"]);
    module.name = String::from("Broken");
    module.references.push(String::from("Engine"));
    write_image(&module, &broken);
    let game = ws.input.join("Game.ilm");
    write_image(&game_module(&["Hotfix"]), &game);

    let report = Injector::new(settings(&ws, vec![broken, game])).unwrap().run();
    assert!(!report.is_success());
    assert!(matches!(
        report.outcomes[0].1,
        Err(inject::Error::Load { .. })
    ));
    assert!(report.outcomes[1].1.is_ok());
    assert!(ws.output.join("Game.ilm").exists());
    assert!(!ws.output.join("Broken.ilm").exists());
}

#[test]
fn symbols_are_optional() {
    let ws = workspace();
    let input = ws.input.join("Game.ilm");
    let mut module = game_module(&["Hotfix"]);
    module.symbols = None;
    write_image(&module, &input);

    let report = Injector::new(settings(&ws, vec![input])).unwrap().run();
    assert!(report.is_success());
    assert!(ws.output.join("Game.ilm").exists());
    assert!(!symbols_path(&ws.output.join("Game.ilm")).exists());
}

fn output_entries(ws: &Workspace) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(&ws.output)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn failed_symbols_write_leaves_no_module_behind() {
    let ws = workspace();
    let input = ws.input.join("Game.ilm");
    write_image(&game_module(&["Hotfix"]), &input);
    fs::create_dir(ws.output.join("Game.ilpdb")).unwrap();

    let report = Injector::new(settings(&ws, vec![input])).unwrap().run();
    assert!(matches!(
        report.outcomes[0].1,
        Err(inject::Error::Write { .. })
    ));
    assert_eq!(output_entries(&ws), vec![String::from("Game.ilpdb")]);
}

#[test]
fn write_failure_fails_only_that_module() {
    let ws = workspace();
    let broken = ws.input.join("Broken.ilm");
    let mut module = game_module(&["Hotfix"]);
    module.name = String::from("Broken");
    write_image(&module, &broken);
    let broken_bytes = fs::read(&broken).unwrap();
    let game = ws.input.join("Game.ilm");
    write_image(&game_module(&["Hotfix"]), &game);

    // A directory squatting on the output path makes the final move fail
    fs::create_dir(ws.output.join("Broken.ilm")).unwrap();

    let report = Injector::new(settings(&ws, vec![broken.clone(), game]))
        .unwrap()
        .run();
    match &report.outcomes[0].1 {
        Err(inject::Error::Write { path, .. }) => assert_eq!(path, &ws.output.join("Broken.ilm")),
        other => panic!("expected a write failure, got {:?}", other),
    }
    assert!(report.outcomes[1].1.is_ok());

    assert_eq!(fs::read(&broken).unwrap(), broken_bytes);
    assert!(ws.output.join("Broken.ilm").is_dir());
    assert_eq!(
        output_entries(&ws),
        vec![
            String::from("Broken.ilm"),
            String::from("Game.ilm"),
            String::from("Game.ilpdb"),
        ]
    );
}

#[test]
fn missing_output_directory_is_a_write_failure() {
    let ws = workspace();
    let input = ws.input.join("Game.ilm");
    write_image(&game_module(&["Hotfix"]), &input);
    let input_bytes = fs::read(&input).unwrap();
    fs::remove_dir(&ws.output).unwrap();

    let report = Injector::new(settings(&ws, vec![input.clone()]))
        .unwrap()
        .run();
    assert!(matches!(
        report.outcomes[0].1,
        Err(inject::Error::Write { .. })
    ));
    assert_eq!(fs::read(&input).unwrap(), input_bytes);
    assert!(!ws.output.exists());
}
