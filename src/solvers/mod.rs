//! Nonlinear solvers for equation-oriented unit models.
//!
//! Unit models do not solve themselves. During initialization they hand an
//! [`EquationModel`] to a caller-supplied [`Solver`] and read back a
//! [`TerminationCondition`]. The solver works on:
//!
//! - the constraints of every **active** constraint family, and
//! - every **free** (unfixed) variable those constraints reference.
//!
//! Converged values are written into the shared [`VariableRegistry`].
//!
//! # Solvers Provided
//!
//! - [`NewtonSolver`]: damped Newton-Raphson with dense LU factorization,
//!   finite-difference Jacobians (or exact ones with the `autodiff` feature)
//!
//! # Example
//!
//! ```
//! use stagewise::{Constraint, ConstraintFamily, ConstraintIndex, EquationModel};
//! use stagewise::VariableRegistry;
//! use stagewise::solvers::{NewtonSolver, Solver, TerminationCondition};
//!
//! struct Square {
//!     family: ConstraintFamily,
//! }
//!
//! impl EquationModel for Square {
//!     fn name(&self) -> &str {
//!         "square"
//!     }
//!
//!     fn constraint_families(&self) -> Vec<&ConstraintFamily> {
//!         vec![&self.family]
//!     }
//! }
//!
//! let registry = VariableRegistry::new();
//! let x = registry.create("x", 1.0);
//! let mut family = ConstraintFamily::new("root");
//! family.push(ConstraintIndex::Time(0), Constraint::zero("root[0]", x.expr() * x.expr() - 4.0));
//!
//! let mut solver = NewtonSolver::default();
//! let outcome = solver.solve(&Square { family }, &registry, false);
//!
//! assert_eq!(outcome.termination_condition, TerminationCondition::Optimal);
//! assert!((x.value() - 2.0).abs() < 1e-6);
//! ```

use crate::constraint::{Constraint, EquationModel, free_variables};
use crate::{VarId, VariableRegistry};
use nalgebra::{DMatrix, DVector};
use std::fmt;
use tracing::{debug, info};

/// Result type for solver operations.
pub type SolverResult<T> = Result<T, SolverError>;

/// Errors that can occur during solving.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolverError {
    /// Maximum iterations exceeded without convergence
    #[error("Maximum iterations exceeded")]
    MaxIterationsExceeded,
    /// Singular Jacobian matrix encountered
    #[error("Singular Jacobian matrix")]
    SingularJacobian,
    /// Solution diverged
    #[error("Solution diverged")]
    Diverged,
    /// Residuals could not be evaluated (division by zero, overflow)
    #[error("Non-finite residual in constraint '{0}'")]
    NonFiniteResidual(String),
    /// Number of free variables differs from number of active constraints
    #[error("System is not square: {equations} equations, {variables} free variables")]
    Unbalanced { equations: usize, variables: usize },
}

impl SolverError {
    /// The termination condition reported for this error.
    pub fn termination_condition(&self) -> TerminationCondition {
        match self {
            SolverError::MaxIterationsExceeded => TerminationCondition::MaxIterations,
            SolverError::SingularJacobian => TerminationCondition::Singular,
            SolverError::Diverged | SolverError::NonFiniteResidual(_) => {
                TerminationCondition::Infeasible
            }
            SolverError::Unbalanced { .. } => TerminationCondition::Unbalanced,
        }
    }
}

/// Outcome of one solver invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationCondition {
    /// All active constraints satisfied within tolerance
    Optimal,
    /// Iteration limit reached
    MaxIterations,
    /// No feasible point found (divergence, non-finite residuals)
    Infeasible,
    /// The linearized system could not be factorized
    Singular,
    /// The system handed to the solver was not square
    Unbalanced,
}

impl TerminationCondition {
    /// Returns true for [`TerminationCondition::Optimal`].
    pub fn is_optimal(&self) -> bool {
        matches!(self, TerminationCondition::Optimal)
    }
}

impl fmt::Display for TerminationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationCondition::Optimal => "optimal",
            TerminationCondition::MaxIterations => "maxIterations",
            TerminationCondition::Infeasible => "infeasible",
            TerminationCondition::Singular => "singular",
            TerminationCondition::Unbalanced => "unbalanced",
        };
        write!(f, "{}", text)
    }
}

/// Statistics from a solver run.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverStats {
    /// Number of iterations performed
    pub iterations: usize,
    /// Number of residual evaluations
    pub function_evals: usize,
    /// Number of Jacobian evaluations
    pub jacobian_evals: usize,
    /// Final residual norm
    pub final_residual: f64,
}

impl SolverStats {
    /// Creates new solver statistics.
    pub fn new() -> Self {
        SolverStats { iterations: 0, function_evals: 0, jacobian_evals: 0, final_residual: 0.0 }
    }
}

impl Default for SolverStats {
    fn default() -> Self {
        Self::new()
    }
}

/// What a solver reports back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutcome {
    /// Termination status
    pub termination_condition: TerminationCondition,
    /// Run statistics
    pub stats: SolverStats,
}

impl SolverOutcome {
    /// Creates an outcome.
    pub fn new(termination_condition: TerminationCondition, stats: SolverStats) -> Self {
        SolverOutcome { termination_condition, stats }
    }
}

/// A nonlinear equation solver.
///
/// Implementations may be reused sequentially across many models.
pub trait Solver {
    /// Solves the active constraints of `model` for its free variables.
    ///
    /// `trace` requests per-iteration output.
    fn solve(
        &mut self,
        model: &dyn EquationModel,
        registry: &VariableRegistry,
        trace: bool,
    ) -> SolverOutcome;
}

/// Configuration for [`NewtonSolver`].
///
/// # Examples
///
/// ```
/// use stagewise::solvers::NewtonConfig;
///
/// let config = NewtonConfig::new().with_tolerance(1e-10).with_damping(0.5);
/// assert_eq!(config.max_iterations, 100);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonConfig {
    /// Convergence tolerance on the residual L2 norm
    pub tolerance: f64,
    /// Maximum Newton iterations
    pub max_iterations: usize,
    /// Damping factor (1.0 = full Newton step, <1.0 = damped)
    pub damping: f64,
    /// Relative finite difference step for Jacobian approximation
    pub fd_step: f64,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        NewtonConfig { tolerance: 1e-6, max_iterations: 100, damping: 1.0, fd_step: 1e-8 }
    }
}

impl NewtonConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the iteration limit.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the damping factor.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    /// Sets the finite difference step.
    pub fn with_fd_step(mut self, fd_step: f64) -> Self {
        self.fd_step = fd_step;
        self
    }
}

/// Damped Newton-Raphson solver over an [`EquationModel`].
///
/// Solves F(x) = 0 with x_{k+1} = x_k - alpha J^{-1} F(x_k), where F are the
/// residuals of the active constraints and x the free variables they
/// reference. On success or on hitting the iteration limit the last iterate is
/// left in the registry; on any other failure the starting values are restored.
#[derive(Debug, Clone, Default)]
pub struct NewtonSolver {
    config: NewtonConfig,
}

impl NewtonSolver {
    /// Creates a solver from a configuration.
    pub fn new(config: NewtonConfig) -> Self {
        NewtonSolver { config }
    }

    /// The solver configuration.
    pub fn config(&self) -> &NewtonConfig {
        &self.config
    }

    /// Solves and reports errors instead of termination conditions.
    pub fn solve_with_stats(
        &self,
        model: &dyn EquationModel,
        registry: &VariableRegistry,
        trace: bool,
    ) -> (SolverResult<()>, SolverStats) {
        let mut stats = SolverStats::new();
        let result = self.iterate(model, registry, trace, &mut stats);
        (result, stats)
    }

    fn iterate(
        &self,
        model: &dyn EquationModel,
        registry: &VariableRegistry,
        trace: bool,
        stats: &mut SolverStats,
    ) -> SolverResult<()> {
        let constraints = model.active_constraints();
        let unknowns = free_variables(model, registry);
        let n = unknowns.len();

        if constraints.len() != n {
            return Err(SolverError::Unbalanced { equations: constraints.len(), variables: n });
        }

        for iteration in 0..self.config.max_iterations {
            stats.iterations = iteration + 1;

            // Evaluate residuals at current point
            let residuals = evaluate(&constraints, registry)?;
            stats.function_evals += 1;

            // Check convergence
            let residual_norm: f64 = residuals.iter().map(|r| r * r).sum::<f64>().sqrt();
            stats.final_residual = residual_norm;
            if trace {
                info!(model = model.name(), iteration, residual = residual_norm, "newton iteration");
            } else {
                debug!(model = model.name(), iteration, residual = residual_norm, "newton iteration");
            }
            if residual_norm < self.config.tolerance {
                return Ok(());
            }

            // Check for divergence
            if iteration > 10 && residual_norm > 1e10 {
                return Err(SolverError::Diverged);
            }

            let jacobian = self.jacobian(&constraints, &unknowns, registry, &residuals)?;
            stats.jacobian_evals += 1;

            // Solve J * dx = -F using LU decomposition
            let r_vec = DVector::from_vec(residuals);
            let dx = jacobian.lu().solve(&(-r_vec)).ok_or(SolverError::SingularJacobian)?;

            // Update with damping: x_{k+1} = x_k + alpha * dx
            for (id, step) in unknowns.iter().zip(dx.iter()) {
                registry.set(*id, registry.get(*id) + self.config.damping * step);
            }
        }

        Err(SolverError::MaxIterationsExceeded)
    }

    /// Computes the Jacobian by forward-mode automatic differentiation.
    #[cfg(feature = "autodiff")]
    fn jacobian(
        &self,
        constraints: &[&Constraint],
        unknowns: &[VarId],
        registry: &VariableRegistry,
        _residuals: &[f64],
    ) -> SolverResult<DMatrix<f64>> {
        Ok(crate::autodiff::constraint_jacobian(constraints, unknowns, registry))
    }

    /// Computes the Jacobian matrix using finite differences.
    ///
    /// J[i][j] = partialF_i/partialx_j aprox (F_i(x + h*e_j) - F_i(x)) / h
    #[cfg(not(feature = "autodiff"))]
    fn jacobian(
        &self,
        constraints: &[&Constraint],
        unknowns: &[VarId],
        registry: &VariableRegistry,
        residuals: &[f64],
    ) -> SolverResult<DMatrix<f64>> {
        let mut jacobian = DMatrix::zeros(constraints.len(), unknowns.len());

        for (j, id) in unknowns.iter().enumerate() {
            let x = registry.get(*id);
            let h = self.config.fd_step * x.abs().max(1.0);
            registry.set(*id, x + h);
            let perturbed = evaluate(constraints, registry);
            registry.set(*id, x);

            for (i, value) in perturbed?.iter().enumerate() {
                jacobian[(i, j)] = (value - residuals[i]) / h;
            }
        }

        Ok(jacobian)
    }
}

impl Solver for NewtonSolver {
    fn solve(
        &mut self,
        model: &dyn EquationModel,
        registry: &VariableRegistry,
        trace: bool,
    ) -> SolverOutcome {
        let start = registry.get_all_values();
        let (result, stats) = self.solve_with_stats(model, registry, trace);

        let termination_condition = match result {
            Ok(()) => TerminationCondition::Optimal,
            Err(err) => {
                debug!(model = model.name(), error = %err, "newton solve failed");
                if err != SolverError::MaxIterationsExceeded {
                    registry.set_all_values(&start);
                }
                err.termination_condition()
            }
        };

        SolverOutcome::new(termination_condition, stats)
    }
}

fn evaluate(constraints: &[&Constraint], registry: &VariableRegistry) -> SolverResult<Vec<f64>> {
    constraints
        .iter()
        .map(|c| {
            let r = c.residual(registry);
            if r.is_finite() { Ok(r) } else { Err(SolverError::NonFiniteResidual(c.name.clone())) }
        })
        .collect()
}
