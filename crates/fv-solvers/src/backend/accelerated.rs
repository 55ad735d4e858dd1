//! Accelerated backend: FGMRES and aggregation AMG on a device context.
//!
//! The backend is configured through a JSON object in the style of AMGX
//! config files. Defaults come from the solver settings; entries of
//! `extra_options` are merged on top verbatim and win on conflict.
//!
//! Setup work happens when a matrix is loaded: the matrix is uploaded, and
//! the multigrid hierarchy or FGMRES preconditioner is built or refreshed.
//! A solve first redoes any setup discarded by a reset, then uploads the
//! initial guess, iterates on the device, and downloads the solution.
//!
//! AMG runs as a stationary V-cycle iteration unless `krylov_acceleration`
//! is set, in which case each V-cycle preconditions FGMRES.

use std::collections::BTreeMap;
use std::time::Instant;

use nalgebra_sparse::CsrMatrix;
use serde_json::{json, Map, Value};

use super::device::{DeviceContext, DeviceMatrix, DeviceVector};
use super::{breakdown, not_loaded, DriverSettings, RawStatus, SolverDriver};
use crate::amg::{self, AmgHierarchy, AmgOptions};
use crate::config::Method;
use crate::convergence::Suite;
use crate::error::{Result, SolverError};
use crate::krylov::{self, KernelOutcome, KrylovMethod, Operator, Stopping, Termination};
use crate::matrix::{norm_inf, MatrixSignature};
use crate::preconditioner::{Preconditioner, PreconditionerSlot, PreconditionerSpec};
use crate::tolerance::SystemNorms;
use crate::vector_ops::norm2;

pub const SUCCESS: i32 = 0;
pub const FAILED: i32 = 1;
pub const DIVERGED: i32 = 2;
pub const NOT_CONVERGED: i32 = 3;

/// Reference norms of the uploaded system.
#[derive(Debug, Clone, Copy)]
struct Norms {
    rhs: f64,
    matrix: f64,
}

impl SystemNorms for Norms {
    fn rhs_norm(&self) -> f64 {
        self.rhs
    }

    fn matrix_norm(&self) -> f64 {
        self.matrix
    }
}

struct DeviceSystem {
    matrix: DeviceMatrix,
    rhs: DeviceVector,
    norms: Norms,
}

pub struct AcceleratedDriver {
    settings: DriverSettings,
    smoother: PreconditionerSpec,
    amg_options: AmgOptions,
    restart: usize,
    /// Wrap the AMG cycle in FGMRES
    krylov_acceleration: bool,
    context: DeviceContext,
    preconditioner: PreconditionerSlot,
    hierarchy: Option<(MatrixSignature, AmgHierarchy)>,
    system: Option<DeviceSystem>,
    setups: usize,
}

/// Backend configuration object: defaults from `settings`, then `extra` on top.
fn device_config(
    settings: &DriverSettings,
    preconditioner: PreconditionerSpec,
    extra: &BTreeMap<String, Value>,
) -> Map<String, Value> {
    let defaults = AmgOptions::default();
    let solver = match settings.method {
        Method::Amg => "AMG",
        _ => "FGMRES",
    };
    let mut config = Map::new();
    config.insert("solver".into(), json!(solver));
    config.insert("restart".into(), json!(settings.restart));
    config.insert("preconditioner".into(), json!(preconditioner.name()));
    config.insert("max_levels".into(), json!(defaults.max_levels));
    config.insert("coarse_size".into(), json!(defaults.coarse_size));
    config.insert("presweeps".into(), json!(defaults.presweeps));
    config.insert("postsweeps".into(), json!(defaults.postsweeps));
    config.insert("relaxation".into(), json!(defaults.relaxation));
    config.insert("strength_threshold".into(), json!(defaults.strength_threshold));
    config.insert("monitor_residual".into(), json!(1));
    config.insert("krylov_acceleration".into(), json!(false));
    for (key, value) in extra {
        config.insert(key.clone(), value.clone());
    }
    config
}

impl AcceleratedDriver {
    pub fn new(
        settings: DriverSettings,
        preconditioner: PreconditionerSpec,
        extra_options: &BTreeMap<String, Value>,
    ) -> Result<Self> {
        if !matches!(settings.method, Method::FGmres | Method::Amg) {
            return Err(SolverError::UnsupportedMethod {
                method: settings.method.name(),
                suite: Suite::Accelerated.name(),
            });
        }
        let config = device_config(&settings, preconditioner, extra_options);
        let amg_options = AmgOptions::from_config(&config)?;
        let restart = match config.get("restart") {
            Some(value) => value
                .as_u64()
                .filter(|&r| r > 0)
                .map(|r| r as usize)
                .ok_or_else(|| SolverError::InvalidConfig("'restart' must be a positive integer".into()))?,
            None => settings.restart,
        };
        let krylov_acceleration = match config.get("krylov_acceleration") {
            Some(value) => value.as_bool().ok_or_else(|| {
                SolverError::InvalidConfig("'krylov_acceleration' must be a boolean".into())
            })?,
            None => false,
        };
        let context = DeviceContext::create(config)?;

        // the FGMRES slot stays empty for AMG, whose smoother lives in the hierarchy
        let slot_spec = match settings.method {
            Method::Amg => PreconditionerSpec::None,
            _ => preconditioner,
        };
        Ok(Self {
            settings,
            smoother: preconditioner,
            amg_options,
            restart,
            krylov_acceleration,
            context,
            preconditioner: PreconditionerSlot::new(slot_spec),
            hierarchy: None,
            system: None,
            setups: 0,
        })
    }

    /// Effective backend configuration, after merging extra options.
    pub fn config(&self) -> &Map<String, Value> {
        self.context.config()
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    /// Number of multigrid hierarchies built so far.
    pub fn setups(&self) -> usize {
        self.setups
    }

    pub fn hierarchy(&self) -> Option<&AmgHierarchy> {
        self.hierarchy.as_ref().map(|(_, h)| h)
    }

    fn code(termination: Termination) -> i32 {
        match termination {
            Termination::Converged => SUCCESS,
            Termination::Breakdown => FAILED,
            Termination::Diverged => DIVERGED,
            Termination::MaxIterations => NOT_CONVERGED,
        }
    }

    fn setup(&mut self, matrix: &CsrMatrix<f64>) -> Result<()> {
        if self.settings.method == Method::Amg {
            let signature = MatrixSignature::of(matrix);
            let cached = matches!(&self.hierarchy, Some((s, _)) if *s == signature);
            if !cached {
                let hierarchy = AmgHierarchy::new(matrix, self.amg_options, self.smoother)?;
                tracing::debug!(levels = ?hierarchy.level_sizes(), "multigrid setup");
                self.hierarchy = Some((signature, hierarchy));
                self.setups += 1;
            }
        } else {
            self.preconditioner.prepare(matrix)?;
        }
        Ok(())
    }

    fn run_kernel(&self, op: &DeviceMatrix, b: &[f64], x: &mut [f64], stopping: &Stopping) -> Result<KernelOutcome> {
        let gmres = KrylovMethod::Gmres { restart: self.restart };
        match self.settings.method {
            Method::Amg => {
                let (_, hierarchy) = self.hierarchy.as_ref().ok_or_else(|| not_loaded(Suite::Accelerated))?;
                if self.krylov_acceleration {
                    let cycle: &dyn Preconditioner = hierarchy;
                    Ok(krylov::solve(gmres, op, Some(cycle), b, x, stopping))
                } else {
                    Ok(amg::solve(op, hierarchy, b, x, stopping))
                }
            }
            _ => Ok(krylov::solve(gmres, op, self.preconditioner.get(), b, x, stopping)),
        }
    }
}

impl SolverDriver for AcceleratedDriver {
    fn suite(&self) -> Suite {
        Suite::Accelerated
    }

    fn load(&mut self, matrix: &CsrMatrix<f64>, rhs: &[f64]) -> Result<()> {
        if matrix.nrows() != rhs.len() {
            return Err(SolverError::DimensionMismatch(format!(
                "{} rows against {} right-hand side entries",
                matrix.nrows(),
                rhs.len()
            )));
        }
        let device_matrix = self.context.upload_matrix(matrix)?;
        let device_rhs = self.context.upload_vector(rhs)?;
        self.setup(matrix)?;
        self.system = Some(DeviceSystem {
            matrix: device_matrix,
            rhs: device_rhs,
            norms: Norms {
                rhs: norm2(rhs),
                matrix: norm_inf(matrix),
            },
        });
        Ok(())
    }

    fn solve(&mut self, x: &mut [f64]) -> Result<RawStatus> {
        // rebuild whatever a reset discarded; cached setups are kept
        let system = self.system.take().ok_or_else(|| not_loaded(Suite::Accelerated))?;
        let prepared = self.setup(system.matrix.csr());
        self.system = Some(system);
        prepared?;

        let system = self.system.as_ref().ok_or_else(|| not_loaded(Suite::Accelerated))?;
        let (adapted, stopping) = self.settings.stopping(Suite::Accelerated, &system.norms)?;
        let start = Instant::now();

        let mut device_x = self.context.upload_vector(x)?;
        let op = &system.matrix;
        let b = system.rhs.as_slice();
        let kernel = self.run_kernel(op, b, device_x.as_mut_slice(), &stopping)?;
        device_x.download(x)?;

        let mut r = vec![0.0; x.len()];
        op.residual(x, b, &mut r);
        let residual = op.norm(&r);
        tracing::debug!(
            solver = self.settings.method.name(),
            iterations = kernel.iterations,
            residual,
            "device solve finished"
        );

        Ok(RawStatus {
            code: Self::code(kernel.termination),
            iterations: kernel.iterations,
            residual,
            tolerance_scale: adapted.scale,
            breakdown: breakdown(&adapted, &kernel, residual, &system.norms),
            elapsed: start.elapsed().as_secs_f64(),
        })
    }

    fn reset(&mut self) {
        self.preconditioner.reset();
        self.hierarchy = None;
    }

    fn release(&mut self) {
        self.reset();
        self.system = None;
        self.context.destroy();
    }
}
