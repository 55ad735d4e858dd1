//! fv-bench: nonlinear diffusion benchmark for the fv-solvers backends
//!
//! Solves `TransientTerm == DiffusionTerm(coeff = harmonic face value of φ)`
//! on a square unit grid for a number of sweeps and reports how the chosen
//! linear solver fared.

mod assembly;
mod run;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Nonlinear diffusion solver benchmark
#[derive(Parser)]
#[command(name = "fv-bench")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Benchmark fv-solvers on a nonlinear diffusion problem", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    bench: run::BenchArgs,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    run::execute(cli.bench)
}
