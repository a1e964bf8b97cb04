#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process;

use unfolding::config::Method;
use unfolding::matrix_unfolder::{MatrixUnfolder, OptimizerReport, SolveResult};
use unfolding::problem::ProblemFile;

#[derive(Parser)]
#[command(
    name = "unfold",
    about = "Regularized unfolding of linear inverse problems",
    long_about = "Solves kernel/data/error problems described in TOML with Tikhonov \
                 regularization, choosing the regularization weights by Empirical Bayes \
                 or taking them as given."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a problem file and print the result as TOML
    Solve(SolveArgs),

    /// Print version information
    Version,
}

#[derive(Args)]
struct SolveArgs {
    /// Path to the problem TOML file
    problem: PathBuf,

    /// Override the alpha selection method (EmpiricalBayes or User)
    #[arg(long)]
    method: Option<Method>,

    /// Override the alphas, comma separated; implies --method User
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    alphas: Option<Vec<f64>>,

    /// Write the result here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct Report {
    alphas: Vec<f64>,
    coefficients: Vec<f64>,
    standard_errors: Vec<f64>,
    log_evidence: f64,
    effective_dof: f64,
    chi_squared: f64,
    covariance: Vec<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optimizer: Option<OptimizerReport>,
}

impl From<&SolveResult> for Report {
    fn from(result: &SolveResult) -> Self {
        Self {
            alphas: result.alphas.to_vec(),
            coefficients: result.coefficients.to_vec(),
            standard_errors: result.standard_errors().to_vec(),
            log_evidence: result.diagnostics.log_evidence,
            effective_dof: result.diagnostics.effective_dof,
            chi_squared: result.diagnostics.chi_squared,
            covariance: result.covariance.rows().into_iter().map(|r| r.to_vec()).collect(),
            optimizer: result.diagnostics.optimizer.clone(),
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Solve(args)) => solve(args),
        Some(Commands::Version) => {
            println!("unfold {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn solve(args: SolveArgs) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Loading problem from: {}", args.problem.display());
    let mut problem = ProblemFile::load(&args.problem)?;

    if let Some(alphas) = args.alphas {
        problem.config.method = Some(Method::User.to_string());
        problem.config.alphas = Some(alphas);
    }
    if let Some(method) = args.method {
        problem.config.method = Some(method.to_string());
        if method == Method::EmpiricalBayes {
            problem.config.alphas = None;
        }
    }

    let inputs = problem.inputs()?;
    let unfolder = MatrixUnfolder::new(problem.unfolder_config()?);
    let result = unfolder.solve(inputs.kernel.view(), inputs.data.view(), &inputs.errors)?;

    let rendered = toml::to_string(&Report::from(&result))?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, rendered)?;
            log::info!("Result written to: {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
