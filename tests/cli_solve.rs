use std::fs;
use std::process::Command;

use tempfile::tempdir;
use unfolding::matrix_unfolder::MatrixUnfolder;
use unfolding::problem::ProblemFile;

const PROBLEM: &str = r#"
kernel = [[1.0, 0.0], [0.0, 1.0]]
data = [1.0, 2.0]

[errors]
variances = [1.0, 1.0]

[[regularization]]
kind = "identity"

[config]
method = "User"
alphas = [1.0]
"#;

fn read_array(table: &toml::Table, key: &str) -> Vec<f64> {
    table[key]
        .as_array()
        .expect("array")
        .iter()
        .map(|v| v.as_float().expect("float"))
        .collect()
}

#[test]
fn problem_file_loads_from_disk_and_solves() {
    let tmp = tempdir().expect("temporary directory");
    let path = tmp.path().join("problem.toml");
    fs::write(&path, PROBLEM).expect("write problem");

    let problem = ProblemFile::load(&path).expect("load problem");
    let inputs = problem.inputs().expect("inputs");
    let result = MatrixUnfolder::new(problem.unfolder_config().expect("config"))
        .solve(inputs.kernel.view(), inputs.data.view(), &inputs.errors)
        .expect("solve");
    assert!(result.coefficients.abs_diff_eq(&ndarray::array![0.5, 1.0], 1e-12));
}

#[test]
fn missing_problem_file_reports_its_path() {
    let tmp = tempdir().expect("temporary directory");
    let path = tmp.path().join("absent.toml");
    let err = ProblemFile::load(&path).unwrap_err();
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn cli_writes_result_toml() {
    let tmp = tempdir().expect("temporary directory");
    let problem_path = tmp.path().join("problem.toml");
    let output_path = tmp.path().join("result.toml");
    fs::write(&problem_path, PROBLEM).expect("write problem");

    let exe = env!("CARGO_BIN_EXE_unfold");
    let status = Command::new(exe)
        .args([
            "solve",
            problem_path.to_str().expect("path str"),
            "--output",
            output_path.to_str().expect("path str"),
        ])
        .status()
        .expect("run unfold cli");
    assert!(status.success(), "CLI exited with status {status:?}");

    let text = fs::read_to_string(&output_path).expect("read result");
    let table: toml::Table = toml::from_str(&text).expect("parse result");
    assert_eq!(read_array(&table, "alphas"), vec![1.0]);
    let coefficients = read_array(&table, "coefficients");
    assert!((coefficients[0] - 0.5).abs() < 1e-12);
    assert!((coefficients[1] - 1.0).abs() < 1e-12);
    assert!(table.get("optimizer").is_none());
}

#[test]
fn cli_method_override_runs_empirical_bayes() {
    let tmp = tempdir().expect("temporary directory");
    let problem_path = tmp.path().join("problem.toml");
    fs::write(&problem_path, PROBLEM).expect("write problem");

    let exe = env!("CARGO_BIN_EXE_unfold");
    let output = Command::new(exe)
        .args([
            "solve",
            problem_path.to_str().expect("path str"),
            "--method",
            "EmpiricalBayes",
        ])
        .output()
        .expect("run unfold cli");
    assert!(output.status.success(), "CLI failed: {output:?}");

    let table: toml::Table =
        toml::from_str(&String::from_utf8_lossy(&output.stdout)).expect("parse stdout");
    let optimizer = table["optimizer"].as_table().expect("optimizer table");
    assert!(optimizer["evaluations"].as_integer().expect("integer") > 0);
}

#[test]
fn cli_rejects_unknown_methods() {
    let tmp = tempdir().expect("temporary directory");
    let problem_path = tmp.path().join("problem.toml");
    fs::write(&problem_path, PROBLEM.replace("\"User\"", "\"Bayes\"")).expect("write problem");

    let exe = env!("CARGO_BIN_EXE_unfold");
    let output = Command::new(exe)
        .args(["solve", problem_path.to_str().expect("path str")])
        .output()
        .expect("run unfold cli");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown unfolding method 'Bayes'"));
}
