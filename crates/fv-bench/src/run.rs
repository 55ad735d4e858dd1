//! Benchmark run: nonlinear sweeps through one solver per rank.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use fv_solvers::{
    ConvergenceOutcome, Criterion, GridShape, LinearSystem, LocalGroupComm, Method, MeshPartition,
    PreconditionerSpec, Solver, SolverConfig, Suite,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::assembly::DiffusionProblem;

/// Benchmark parameters
#[derive(Args, Debug, Clone)]
pub struct BenchArgs {
    /// Total number of cells of the square grid
    #[arg(long, default_value = "10000")]
    pub number_of_elements: usize,

    /// Solver (cg, pcg, cgs, gmres, bicgstab, lu, fgmres, amg)
    #[arg(long, default_value = "cg")]
    pub solver: String,

    /// Preconditioner (jacobi, ilu, ssor, icc, dd, block-jacobi, none);
    /// the backend default when omitted
    #[arg(long)]
    pub preconditioner: Option<String>,

    /// Nonlinear sweeps to take
    #[arg(long, default_value = "10")]
    pub sweeps: usize,

    /// Linear iterations allowed per sweep
    #[arg(long)]
    pub iterations: Option<usize>,

    /// Linear solver tolerance
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Tolerance criterion (default, unscaled, RHS, matrix, initial, solution, legacy)
    #[arg(long)]
    pub criterion: Option<String>,

    /// Left-hand Dirichlet value
    #[arg(long, default_value = "1.0")]
    pub left: f64,

    /// Right-hand Dirichlet value
    #[arg(long, default_value = "0.0")]
    pub right: f64,

    /// Ranks of the distributed run, one thread each
    #[arg(long, default_value = "1")]
    pub ranks: usize,

    /// Directory to store results in
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// JSON solver configuration used instead of the `--solver` preset
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Default for BenchArgs {
    fn default() -> Self {
        Self {
            number_of_elements: 10000,
            solver: "cg".into(),
            preconditioner: None,
            sweeps: 10,
            iterations: None,
            tolerance: None,
            criterion: None,
            left: 1.0,
            right: 0.0,
            ranks: 1,
            output: None,
            config: None,
        }
    }
}

const DEFAULT_TOLERANCE: f64 = 1e-10;
const DEFAULT_ITERATIONS: usize = 1000;

fn preset(solver: &str, distributed: bool) -> Result<SolverConfig> {
    // plain `cg` is unpreconditioned; `pcg` gets Jacobi
    Ok(match (solver.to_ascii_lowercase().as_str(), distributed) {
        ("cg", false) => SolverConfig::cg(),
        ("pcg", false) => SolverConfig::pcg(),
        (name, distributed) => SolverConfig::for_method(name.parse::<Method>()?, distributed),
    })
}

/// Solver configuration for `args`, or `None` when the combination is
/// skipped (a preconditioned direct solve).
pub fn solver_config(args: &BenchArgs) -> Result<Option<SolverConfig>> {
    let preconditioner = args
        .preconditioner
        .as_deref()
        .map(str::parse::<PreconditionerSpec>)
        .transpose()?;

    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading solver config {}", path.display()))?;
            SolverConfig::from_json(&text)?
        }
        None => preset(&args.solver, args.ranks > 1)?,
    };

    if config.backend == Suite::Direct && !matches!(preconditioner, None | Some(PreconditionerSpec::None)) {
        return Ok(None);
    }
    if let Some(pc) = preconditioner {
        config.preconditioner = Some(pc);
    }

    // explicit flags win; otherwise the file's values, or the benchmark defaults
    let from_file = args.config.is_some();
    let criterion = match &args.criterion {
        Some(name) => name.parse::<Criterion>()?,
        None if from_file => config.tolerance.criterion,
        None => Criterion::Initial,
    };
    let tolerance = args
        .tolerance
        .unwrap_or(if from_file { config.tolerance.tolerance } else { DEFAULT_TOLERANCE });
    let iterations = args
        .iterations
        .unwrap_or(if from_file { config.tolerance.max_iterations } else { DEFAULT_ITERATIONS });
    config = config.with_tolerance(criterion, tolerance, iterations);
    config.validate()?;
    Ok(Some(config))
}

/// What one rank ends with.
#[derive(Debug)]
struct RankResult {
    owned: Vec<(usize, f64)>,
    outcomes: Vec<ConvergenceOutcome>,
}

fn sweep_rank(
    problem: &DiffusionProblem,
    config: SolverConfig,
    sweeps: usize,
    partition: Option<MeshPartition>,
) -> Result<RankResult> {
    let (ids, owned_local, mut solver) = match &partition {
        Some(p) => (
            p.global_overlapping_ids().to_vec(),
            p.local_non_overlapping_ids().to_vec(),
            Solver::with_partition(config, p)?,
        ),
        None => {
            let cells = problem.number_of_cells();
            ((0..cells).collect(), (0..cells).collect(), Solver::new(config)?)
        }
    };

    // the old value is never advanced: every sweep re-solves the same step
    let phi_old = vec![1.0; ids.len()];
    let mut phi = phi_old.clone();
    let mut outcomes = Vec::with_capacity(sweeps);
    for sweep in 0..sweeps {
        let (matrix, rhs) = problem.assemble(&ids, &phi, &phi_old)?;
        let outcome = solver
            .solve(LinearSystem::new(&matrix, &mut phi, &rhs))
            .with_context(|| format!("sweep {}", sweep))?;
        debug!(sweep, iterations = outcome.iterations, residual = outcome.residual, "sweep done");
        outcomes.push(outcome);
    }
    solver.release();

    Ok(RankResult {
        owned: owned_local.iter().map(|&i| (ids[i], phi[i])).collect(),
        outcomes,
    })
}

/// Result of a full benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub number_of_elements: usize,
    pub sweeps: usize,
    pub ranks: usize,
    pub config: SolverConfig,
    /// Outcomes of rank 0, one per sweep
    pub outcomes: Vec<ConvergenceOutcome>,
    pub elapsed_seconds: f64,
    #[serde(skip)]
    pub solution: Vec<f64>,
}

/// Run `sweeps` nonlinear sweeps of `problem` on `ranks` threads.
pub fn run(problem: &DiffusionProblem, config: SolverConfig, sweeps: usize, ranks: usize) -> Result<BenchReport> {
    if ranks == 0 {
        bail!("at least one rank is required");
    }
    let start = Instant::now();

    let results = if ranks == 1 {
        vec![sweep_rank(problem, config.clone(), sweeps, None)?]
    } else {
        let handles: Vec<_> = LocalGroupComm::group(ranks)
            .into_iter()
            .map(|comm| {
                let problem = *problem;
                let config = config.clone();
                thread::spawn(move || -> Result<RankResult> {
                    let shape = GridShape::grid2d(problem.n(), problem.n());
                    let partition = MeshPartition::slabs(shape, 1, Arc::new(comm))?;
                    sweep_rank(&problem, config, sweeps, Some(partition))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| anyhow!("rank thread panicked")).and_then(|r| r))
            .collect::<Result<Vec<_>>>()?
    };

    let mut solution = vec![0.0; problem.number_of_cells()];
    for result in &results {
        for &(gid, value) in &result.owned {
            solution[gid] = value;
        }
    }
    let outcomes = results.into_iter().next().map(|r| r.outcomes).unwrap_or_default();

    Ok(BenchReport {
        number_of_elements: problem.number_of_cells(),
        sweeps,
        ranks,
        config,
        outcomes,
        elapsed_seconds: start.elapsed().as_secs_f64(),
        solution,
    })
}

/// `<output>/<suite>/<method>/<preconditioner>/<cells>`
pub fn output_dir(root: &Path, config: &SolverConfig, cells: usize) -> PathBuf {
    root.join(config.backend.name())
        .join(config.method.name())
        .join(config.effective_preconditioner().name())
        .join(cells.to_string())
}

/// Write `solution.json` and `run.json` into `dir`.
pub fn write_results(dir: &Path, problem: &DiffusionProblem, report: &BenchReport) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let (x, y) = problem.cell_centers();
    let solution = json!({
        "nx": problem.n(),
        "ny": problem.n(),
        "x": x,
        "y": y,
        "value": report.solution,
    });
    fs::write(dir.join("solution.json"), serde_json::to_string(&solution)?)?;

    let mut record = serde_json::to_value(report)?;
    record["timestamp"] = json!(chrono::Utc::now().to_rfc3339());
    fs::write(dir.join("run.json"), serde_json::to_string_pretty(&record)?)?;
    Ok(())
}

/// Execute the benchmark described by `args`.
pub fn execute(args: BenchArgs) -> Result<()> {
    let Some(config) = solver_config(&args)? else {
        info!(solver = %args.solver, "a direct solve takes no preconditioner; nothing to run");
        return Ok(());
    };
    let problem = DiffusionProblem::new(args.number_of_elements, args.left, args.right);

    let mut state = json!({
        "state": "START",
        "numberOfElements": problem.number_of_cells(),
        "sweeps": args.sweeps,
        "solver": config.method.name(),
        "suite": config.backend.name(),
        "preconditioner": config.effective_preconditioner().name(),
    });
    info!("{}", state);

    let report = run(&problem, config, args.sweeps, args.ranks)?;

    state["state"] = json!("END");
    state["elapsedSeconds"] = json!(report.elapsed_seconds);
    info!("{}", state);

    if let Some(last) = report.outcomes.last() {
        info!("last sweep: {}", last);
    }
    if let Some(root) = &args.output {
        let dir = output_dir(root, &report.config, problem.number_of_cells());
        write_results(&dir, &problem, &report)?;
        info!("results written to {}", dir.display());
    }
    Ok(())
}
