//! Staged initialization of a tray.
//!
//! The full tray model is hard to converge from arbitrary starting values, so
//! it is approached in three solves of growing difficulty:
//!
//! 1. [`Stage::MassBalance`]: energy and pressure balances deactivated,
//!    outlet temperature and pressure fixed at guesses
//! 2. [`Stage::MassEnergyBalance`]: energy balance active, temperature free
//! 3. [`Stage::Full`]: every balance active, pressure free
//!
//! A stage that does not converge is logged and the next one still runs.

use super::{Tray, TrayError, TrayResult};
use crate::properties::StateArgs;
use crate::solvers::{Solver, SolverOutcome, TerminationCondition};
use std::fmt;
use tracing::{info, warn};

/// One initialization solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    MassBalance,
    MassEnergyBalance,
    Full,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Stage::MassBalance => "Mass balance",
            Stage::MassEnergyBalance => "Mass/Energy balance",
            Stage::Full => "Mass/Energy/Pressure balance",
        };
        write!(f, "{}", text)
    }
}

/// What one stage's solve returned.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: SolverOutcome,
}

impl StageReport {
    pub fn termination_condition(&self) -> TerminationCondition {
        self.outcome.termination_condition
    }
}

/// Per-stage results of [`Tray::initialize`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InitReport {
    pub stages: Vec<StageReport>,
}

impl InitReport {
    /// Termination condition of the last stage that ran.
    pub fn final_condition(&self) -> Option<TerminationCondition> {
        self.stages.last().map(StageReport::termination_condition)
    }

    /// True when the full model converged.
    pub fn is_converged(&self) -> bool {
        self.final_condition().is_some_and(|c| c.is_optimal())
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }
}

/// Arguments for [`Tray::initialize`].
///
/// State args are initial guesses forwarded to the inlet states of each role.
/// `verbosity` above 1 logs state initialization at info level; above 2 the
/// solver traces its iterations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InitArgs {
    pub state_args_feed: Option<StateArgs>,
    pub state_args_liq: Option<StateArgs>,
    pub state_args_vap: Option<StateArgs>,
    pub verbosity: u8,
}

impl InitArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed_args(mut self, args: StateArgs) -> Self {
        self.state_args_feed = Some(args);
        self
    }

    pub fn with_liquid_args(mut self, args: StateArgs) -> Self {
        self.state_args_liq = Some(args);
        self
    }

    pub fn with_vapor_args(mut self, args: StateArgs) -> Self {
        self.state_args_vap = Some(args);
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }
}

impl Tray {
    /// Brings the tray to a consistent starting point.
    ///
    /// Configured side draw split fractions must be fixed; otherwise nothing
    /// is touched and [`TrayError::UnfixedSplitFraction`] is returned.
    /// Solver outcomes never produce an error, they are reported per stage.
    ///
    /// On return every balance family is active and the outlet temperature
    /// and pressure are free.
    pub fn initialize(
        &mut self,
        args: InitArgs,
        solver: &mut dyn Solver,
    ) -> TrayResult<InitReport> {
        for sf in self.liq_side_sf.iter().chain(&self.vap_side_sf) {
            if !sf.is_fixed() {
                return Err(TrayError::UnfixedSplitFraction(sf.name()));
            }
        }

        let span = self.span.clone();
        let _entered = span.entered();
        let verbosity = args.verbosity;
        let trace = verbosity > 2;

        if let Some(feed) = &mut self.properties_in_feed {
            for state in feed.iter_mut() {
                state.initialize(args.state_args_feed.as_ref(), verbosity)?;
            }
        }
        for state in &mut self.properties_in_liq {
            state.initialize(args.state_args_liq.as_ref(), verbosity)?;
        }
        for state in &mut self.properties_in_vap {
            state.initialize(args.state_args_vap.as_ref(), verbosity)?;
        }
        for state in &mut self.properties_out {
            state.initialize(None, verbosity)?;
        }

        let temperature_guess = self.temperature_guess();
        let pressure_guess = self.properties_in_vap.first().map(|s| s.pressure().value());

        let mut report = InitReport::default();

        self.balances.enthalpy_mixing_equations.deactivate();
        self.balances.pressure_drop_equation.deactivate();
        for state in &self.properties_out {
            if let Some(t) = temperature_guess {
                state.temperature().fix_at(t);
            }
            if let Some(p) = pressure_guess {
                state.pressure().fix_at(p);
            }
        }
        report.stages.push(self.run_stage(Stage::MassBalance, solver, trace));

        self.balances.enthalpy_mixing_equations.activate();
        for state in &self.properties_out {
            state.temperature().unfix();
        }
        report.stages.push(self.run_stage(Stage::MassEnergyBalance, solver, trace));

        self.balances.pressure_drop_equation.activate();
        for state in &self.properties_out {
            state.pressure().unfix();
        }
        report.stages.push(self.run_stage(Stage::Full, solver, trace));

        if report.is_converged() {
            info!("initialisation complete");
        } else {
            warn!(status = ?report.final_condition(), "initialisation did not converge");
        }
        Ok(report)
    }

    /// Outlet temperature guess for the first stage.
    ///
    /// The feed temperature on a feed tray, otherwise the mean of the liquid
    /// and vapor inlet temperatures, both at the first time point.
    fn temperature_guess(&self) -> Option<f64> {
        if let Some(feed) = &self.properties_in_feed {
            return feed.first().map(|s| s.temperature().value());
        }
        let liq = self.properties_in_liq.first()?.temperature().value();
        let vap = self.properties_in_vap.first()?.temperature().value();
        Some(0.5 * (liq + vap))
    }

    fn run_stage(&self, stage: Stage, solver: &mut dyn Solver, trace: bool) -> StageReport {
        let outcome = solver.solve(self, &self.registry, trace);
        let status = outcome.termination_condition;
        if status.is_optimal() {
            info!(%stage, %status, iterations = outcome.stats.iterations, "initialisation step");
        } else {
            warn!(%stage, %status, "initialisation step failed");
        }
        StageReport { stage, outcome }
    }
}
