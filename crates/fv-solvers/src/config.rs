//! Solver configuration.
//!
//! A [`SolverConfig`] picks a backend suite, a method the suite offers, the
//! tolerance specification and an optional preconditioner. Suite-specific
//! knobs that have no typed field travel in `extra_options` and are merged
//! verbatim into the backend's option set.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::convergence::Suite;
use crate::error::{Result, SolverError};
use crate::preconditioner::PreconditionerSpec;
use crate::tolerance::{Criterion, ToleranceSpec};

/// Solution method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// LU factorization with iterative refinement
    Lu,
    /// Conjugate Gradient (SPD systems)
    Cg,
    /// Conjugate Gradient Squared
    Cgs,
    /// Restarted GMRES
    Gmres,
    /// Flexible GMRES
    #[serde(rename = "fgmres")]
    FGmres,
    /// Biconjugate Gradient Stabilized
    BiCgStab,
    /// Aggregation algebraic multigrid
    Amg,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Lu => "lu",
            Method::Cg => "cg",
            Method::Cgs => "cgs",
            Method::Gmres => "gmres",
            Method::FGmres => "fgmres",
            Method::BiCgStab => "bicgstab",
            Method::Amg => "amg",
        }
    }

    /// Whether `suite` provides this method.
    pub fn is_offered_by(&self, suite: Suite) -> bool {
        match suite {
            Suite::Direct => matches!(self, Method::Lu),
            Suite::Krylov => matches!(
                self,
                Method::Cg | Method::Cgs | Method::Gmres | Method::BiCgStab
            ),
            Suite::Distributed => matches!(self, Method::Cg | Method::Gmres | Method::BiCgStab),
            Suite::Accelerated => matches!(self, Method::FGmres | Method::Amg),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lu" => Ok(Method::Lu),
            "cg" | "pcg" => Ok(Method::Cg),
            "cgs" => Ok(Method::Cgs),
            "gmres" => Ok(Method::Gmres),
            "fgmres" => Ok(Method::FGmres),
            "bicgstab" | "bcgs" => Ok(Method::BiCgStab),
            "amg" => Ok(Method::Amg),
            other => Err(SolverError::InvalidConfig(format!("unknown method '{}'", other))),
        }
    }
}

/// Complete configuration of one solver instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub backend: Suite,
    pub method: Method,
    pub tolerance: ToleranceSpec,
    /// `None` selects the backend's default for `method`
    pub preconditioner: Option<PreconditionerSpec>,
    /// Diverged once the residual exceeds this multiple of the initial residual
    pub divergence_tolerance: f64,
    /// Krylov subspace size between GMRES restarts
    pub restart: usize,
    /// Backend-specific options, passed through unchanged
    pub extra_options: BTreeMap<String, serde_json::Value>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: Suite::Krylov,
            method: Method::Gmres,
            tolerance: ToleranceSpec::default(),
            preconditioner: None,
            divergence_tolerance: 1e5,
            restart: 30,
            extra_options: BTreeMap::new(),
        }
    }
}

impl SolverConfig {
    /// Direct LU solve.
    pub fn lu() -> Self {
        Self {
            backend: Suite::Direct,
            method: Method::Lu,
            tolerance: ToleranceSpec {
                max_iterations: 10,
                ..Default::default()
            },
            preconditioner: Some(PreconditionerSpec::None),
            ..Default::default()
        }
    }

    /// Unpreconditioned CG.
    pub fn cg() -> Self {
        Self {
            method: Method::Cg,
            preconditioner: Some(PreconditionerSpec::None),
            ..Default::default()
        }
    }

    /// Jacobi-preconditioned CG.
    pub fn pcg() -> Self {
        Self {
            method: Method::Cg,
            preconditioner: Some(PreconditionerSpec::Jacobi),
            ..Default::default()
        }
    }

    pub fn cgs() -> Self {
        Self {
            method: Method::Cgs,
            ..Default::default()
        }
    }

    pub fn gmres() -> Self {
        Self::default()
    }

    pub fn bicgstab() -> Self {
        Self {
            method: Method::BiCgStab,
            ..Default::default()
        }
    }

    /// CG over a partitioned mesh with per-rank ILU(0) blocks.
    pub fn distributed_cg() -> Self {
        Self {
            backend: Suite::Distributed,
            method: Method::Cg,
            ..Default::default()
        }
    }

    pub fn distributed_gmres() -> Self {
        Self {
            backend: Suite::Distributed,
            method: Method::Gmres,
            ..Default::default()
        }
    }

    pub fn distributed_bicgstab() -> Self {
        Self {
            backend: Suite::Distributed,
            method: Method::BiCgStab,
            ..Default::default()
        }
    }

    /// Device FGMRES with a Jacobi preconditioner.
    pub fn fgmres() -> Self {
        Self {
            backend: Suite::Accelerated,
            method: Method::FGmres,
            ..Default::default()
        }
    }

    /// Aggregation AMG with block-Jacobi smoothing.
    pub fn amg() -> Self {
        Self {
            backend: Suite::Accelerated,
            method: Method::Amg,
            tolerance: ToleranceSpec {
                max_iterations: 100,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Configuration for a method name, placed on the suite that offers it.
    ///
    /// `cg`, `gmres` and `bicgstab` go to the distributed suite when
    /// `distributed` is set.
    pub fn for_method(method: Method, distributed: bool) -> Self {
        match (method, distributed) {
            (Method::Cg, true) => Self::distributed_cg(),
            (Method::Gmres, true) => Self::distributed_gmres(),
            (Method::BiCgStab, true) => Self::distributed_bicgstab(),
            (Method::Lu, _) => Self::lu(),
            (Method::Cg, false) => Self::pcg(),
            (Method::Cgs, _) => Self::cgs(),
            (Method::Gmres, false) => Self::gmres(),
            (Method::BiCgStab, false) => Self::bicgstab(),
            (Method::FGmres, _) => Self::fgmres(),
            (Method::Amg, _) => Self::amg(),
        }
    }

    pub fn with_tolerance(mut self, criterion: Criterion, tolerance: f64, max_iterations: usize) -> Self {
        self.tolerance = ToleranceSpec::new(criterion, tolerance, max_iterations);
        self
    }

    pub fn with_preconditioner(mut self, preconditioner: PreconditionerSpec) -> Self {
        self.preconditioner = Some(preconditioner);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra_options.insert(key.into(), value.into());
        self
    }

    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| SolverError::InvalidConfig(format!("Failed to parse solver config: {}", e)))
    }

    /// Preconditioner actually used: the explicit choice, or the backend default.
    pub fn effective_preconditioner(&self) -> PreconditionerSpec {
        self.preconditioner
            .unwrap_or_else(|| PreconditionerSpec::default_for(self.backend, self.method))
    }

    /// Check everything that does not depend on the system being solved.
    pub fn validate(&self) -> Result<()> {
        self.tolerance.validate()?;
        if !self.method.is_offered_by(self.backend) {
            return Err(SolverError::UnsupportedMethod {
                method: self.method.name(),
                suite: self.backend.name(),
            });
        }
        if !(self.divergence_tolerance > 1.0 && self.divergence_tolerance.is_finite()) {
            return Err(SolverError::InvalidConfig(format!(
                "divergence tolerance must exceed 1, got {}",
                self.divergence_tolerance
            )));
        }
        if self.restart == 0 {
            return Err(SolverError::InvalidConfig("GMRES restart must be positive".into()));
        }
        crate::tolerance::resolve(self.backend, self.tolerance.criterion)?;
        self.effective_preconditioner()
            .check_compatible(self.backend, self.method)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip_through_parsing() {
        for method in [
            Method::Lu,
            Method::Cg,
            Method::Cgs,
            Method::Gmres,
            Method::FGmres,
            Method::BiCgStab,
            Method::Amg,
        ] {
            assert_eq!(method.name().parse::<Method>().unwrap(), method);
        }
        assert_eq!("pcg".parse::<Method>().unwrap(), Method::Cg);
    }

    #[test]
    fn presets_validate() {
        for config in [
            SolverConfig::lu(),
            SolverConfig::cg(),
            SolverConfig::pcg(),
            SolverConfig::cgs(),
            SolverConfig::gmres(),
            SolverConfig::bicgstab(),
            SolverConfig::distributed_cg(),
            SolverConfig::distributed_gmres(),
            SolverConfig::distributed_bicgstab(),
            SolverConfig::fgmres(),
            SolverConfig::amg(),
        ] {
            config.validate().unwrap();
        }
    }

    #[test]
    fn method_must_belong_to_backend() {
        let config = SolverConfig {
            method: Method::Amg,
            ..SolverConfig::gmres()
        };
        assert!(matches!(
            config.validate(),
            Err(SolverError::UnsupportedMethod { method: "amg", suite: "krylov" })
        ));
    }

    #[test]
    fn default_preconditioners() {
        assert_eq!(SolverConfig::gmres().effective_preconditioner(), PreconditionerSpec::Jacobi);
        assert_eq!(
            SolverConfig::distributed_cg().effective_preconditioner(),
            PreconditionerSpec::DomainDecomposition
        );
        assert!(matches!(
            SolverConfig::amg().effective_preconditioner(),
            PreconditionerSpec::BlockJacobi { .. }
        ));
        assert_eq!(SolverConfig::lu().effective_preconditioner(), PreconditionerSpec::None);
    }

    #[test]
    fn json_config_fills_defaults() {
        let config = SolverConfig::from_json(
            r#"{
                "backend": "accelerated",
                "method": "amg",
                "tolerance": {"criterion": "RHS", "tolerance": 1e-6, "max_iterations": 50},
                "extra_options": {"max_levels": 4}
            }"#,
        )
        .unwrap();
        assert_eq!(config.backend, Suite::Accelerated);
        assert_eq!(config.tolerance.criterion, Criterion::Rhs);
        assert_eq!(config.restart, 30);
        assert_eq!(config.extra_options["max_levels"], 4);
        config.validate().unwrap();

        assert!(SolverConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn rejects_bad_numbers() {
        let mut config = SolverConfig::pcg();
        config.tolerance.tolerance = -1.0;
        assert!(config.validate().is_err());

        let mut config = SolverConfig::pcg();
        config.restart = 0;
        assert!(config.validate().is_err());

        let config = SolverConfig::lu().with_tolerance(Criterion::Solution, 1e-8, 5);
        assert!(matches!(
            config.validate(),
            Err(SolverError::UnsupportedCriterion { .. })
        ));
    }
}
