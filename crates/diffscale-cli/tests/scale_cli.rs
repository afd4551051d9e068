use diffscale_core::reflections::{
    Column, Crystal, Detector, Experiment, ReflectionTable, Scan, SpaceGroup, columns,
};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn experiment() -> Experiment {
    let crystal = Crystal::from_real_space_vectors(
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 2.0],
        SpaceGroup::from_symbol("C 2").expect("space group"),
    )
    .expect("crystal");
    Experiment {
        crystal: Some(crystal),
        scan: Some(Scan {
            image_range: [0, 60],
            oscillation: [0.0, 1.0],
        }),
        detector: Some(Detector {
            image_size: [200, 200],
        }),
    }
}

fn reflections(flag: i64) -> ReflectionTable {
    let x = [10.0, 150.0, 40.0, 90.0, 180.0, 60.0, 120.0, 30.0, 170.0, 100.0];
    let y = [20.0, 80.0, 160.0, 40.0, 110.0, 190.0, 70.0, 130.0, 50.0, 150.0];
    let z = [0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 35.0, 40.0, 59.0];
    let mut table = ReflectionTable::new();
    let entries = [
        (
            "intensity.prf.value",
            Column::Double(vec![75.0, 10.0, 100.0, 25.0, 50.0, 100.0, 25.0, 20.0, 300.0, 10.0]),
        ),
        (
            "intensity.prf.variance",
            Column::Double(vec![50.0, 10.0, 100.0, 50.0, 10.0, 100.0, 50.0, 10.0, 100.0, 10.0]),
        ),
        (
            columns::MILLER_INDEX,
            Column::Miller(vec![
                [1, 0, 0],
                [0, 0, 1],
                [1, 0, 0],
                [1, 0, 0],
                [0, 0, 1],
                [1, 0, 0],
                [0, 4, 0],
                [0, 0, 1],
                [1, 0, 0],
                [0, 4, 0],
            ]),
        ),
        (
            columns::XYZOBS_PX,
            Column::Vec3((0..10).map(|i| [x[i], y[i], z[i]]).collect()),
        ),
        (columns::FLAGS, Column::Int(vec![flag; 10])),
    ];
    for (name, column) in entries {
        table.insert(name, column).expect("column lengths agree");
    }
    table
}

fn write_json(path: &Path, value: &impl serde::Serialize) {
    fs::write(path, serde_json::to_string_pretty(value).expect("encode")).expect("write");
}

fn run_diffscale(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_diffscale"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("diffscale should start")
}

struct Inputs {
    temp: TempDir,
}

impl Inputs {
    fn new(tables: &[ReflectionTable]) -> Self {
        let temp = TempDir::new().expect("tempdir should be created");
        write_json(&temp.path().join("reflections.json"), &tables);
        let experiments: Vec<Experiment> = tables.iter().map(|_| experiment()).collect();
        write_json(&temp.path().join("experiments.json"), &experiments);
        Self { temp }
    }

    fn path(&self, name: &str) -> String {
        self.temp.path().join(name).display().to_string()
    }
}

#[test]
fn scale_command_writes_tables_and_report() {
    let inputs = Inputs::new(&[reflections(columns::FLAG_INTEGRATED_PRF)]);
    let output = run_diffscale(&[
        "scale",
        "--reflections",
        &inputs.path("reflections.json"),
        "--experiments",
        &inputs.path("experiments.json"),
        "--model",
        "physical",
        "--output",
        &inputs.path("out/scaled.json"),
        "--report",
        &inputs.path("out/report.json"),
    ]);
    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("experiment   0"), "stdout: {stdout}");
    assert!(stdout.contains("JSON report:"));

    let scaled: Vec<Option<ReflectionTable>> = serde_json::from_str(
        &fs::read_to_string(inputs.path("out/scaled.json")).expect("scaled tables"),
    )
    .expect("scaled tables should parse");
    let table = scaled[0].as_ref().expect("scaled table");
    assert_eq!(table.len(), 10);
    assert!(table.contains(columns::INVERSE_SCALE_FACTOR));
    assert!(table.contains(columns::IH_VALUES));
    assert!(!table.contains(columns::ASU_MILLER_INDEX));

    let report: Value = serde_json::from_str(
        &fs::read_to_string(inputs.path("out/report.json")).expect("report"),
    )
    .expect("report should parse");
    assert_eq!(report[0]["status"], "scaled");
    assert_eq!(report[0]["report"]["model"], "physical");
    assert_eq!(report[0]["report"]["statistics"]["n_unique"], 3);

    let stats = run_diffscale(&[
        "stats",
        "--reflections",
        &inputs.path("out/scaled.json"),
        "--experiments",
        &inputs.path("experiments.json"),
    ]);
    assert!(
        stats.status.success(),
        "stats should succeed, stderr: {}",
        String::from_utf8_lossy(&stats.stderr)
    );
    assert!(String::from_utf8_lossy(&stats.stdout).contains("unique      3"));
}

#[test]
fn unusable_experiments_are_reported_as_skipped() {
    let inputs = Inputs::new(&[
        reflections(columns::FLAG_INTEGRATED_PRF),
        reflections(0),
    ]);
    let output = run_diffscale(&[
        "scale",
        "--reflections",
        &inputs.path("reflections.json"),
        "--experiments",
        &inputs.path("experiments.json"),
        "--output",
        &inputs.path("scaled.json"),
        "--report",
        &inputs.path("report.json"),
    ]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("experiment   1  skipped"));

    let report: Value =
        serde_json::from_str(&fs::read_to_string(inputs.path("report.json")).expect("report"))
            .expect("report should parse");
    assert_eq!(report[1]["status"], "skipped");
    let scaled: Value =
        serde_json::from_str(&fs::read_to_string(inputs.path("scaled.json")).expect("tables"))
            .expect("tables should parse");
    assert!(scaled[1].is_null());
}

#[test]
fn all_experiments_skipped_exits_with_insufficient_data() {
    let inputs = Inputs::new(&[reflections(0)]);
    let output = run_diffscale(&[
        "scale",
        "--reflections",
        &inputs.path("reflections.json"),
        "--experiments",
        &inputs.path("experiments.json"),
        "--output",
        &inputs.path("scaled.json"),
        "--report",
        &inputs.path("report.json"),
    ]);
    assert_eq!(output.status.code(), Some(6));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[DATA.ALL_SKIPPED]"));
}

#[test]
fn unknown_model_is_a_configuration_error() {
    let inputs = Inputs::new(&[reflections(columns::FLAG_INTEGRATED_PRF)]);
    let output = run_diffscale(&[
        "scale",
        "--reflections",
        &inputs.path("reflections.json"),
        "--experiments",
        &inputs.path("experiments.json"),
        "--model",
        "array",
    ]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[CONFIG.MODEL]"));
}

#[test]
fn xds_without_binning_options_fails_before_reading_inputs() {
    let temp = TempDir::new().expect("tempdir should be created");
    let output = run_diffscale(&[
        "scale",
        "--reflections",
        &temp.path().join("absent.json").display().to_string(),
        "--experiments",
        &temp.path().join("absent.json").display().to_string(),
        "--model",
        "xds",
    ]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[CONFIG.MISSING_BINNING]"));
}

#[test]
fn mismatched_inputs_are_rejected() {
    let inputs = Inputs::new(&[reflections(columns::FLAG_INTEGRATED_PRF)]);
    write_json(
        &inputs.temp.path().join("experiments.json"),
        &vec![experiment(), experiment()],
    );
    let output = run_diffscale(&[
        "stats",
        "--reflections",
        &inputs.path("reflections.json"),
        "--experiments",
        &inputs.path("experiments.json"),
    ]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[CONFIG.EXPERIMENT_COUNT]"));
}

#[test]
fn missing_input_files_are_io_errors() {
    let temp = TempDir::new().expect("tempdir should be created");
    let absent = temp.path().join("absent.json").display().to_string();
    let output = run_diffscale(&["stats", "--reflections", &absent, "--experiments", &absent]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn usage_errors_exit_with_configuration_code() {
    let output = run_diffscale(&["scale", "--reflections"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[CONFIG.CLI_USAGE]"));

    let help = run_diffscale(&["--help"]);
    assert!(help.status.success());
    assert!(String::from_utf8_lossy(&help.stdout).contains("scale"));
}
