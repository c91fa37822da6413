//! Unit operation models.
//!
//! - **Tray**: one equilibrium stage of a distillation column, with optional
//!   feed, side draws, heat duty and pressure drop
//!
//! A unit owns its property states and constraint families, exposes named
//! [`Port`](crate::Port)s through [`HasPorts`](crate::HasPorts) and can be
//! handed to any [`Solver`](crate::solvers::Solver) as an
//! [`EquationModel`](crate::EquationModel).
//!
//! ## Example
//!
//! ```
//! use stagewise::{TimeSet, VariableRegistry};
//! use stagewise::models::{InitArgs, Tray, TrayConfig};
//! use stagewise::properties::ideal::{ComponentData, IdealPackage};
//! use stagewise::solvers::NewtonSolver;
//!
//! let registry = VariableRegistry::new();
//! let package = IdealPackage::new(vec![ComponentData::new("water", 75.3, 33.6, 40_650.0)]);
//! let mut tray =
//!     Tray::build("tray_1", TrayConfig::new(), &package, &TimeSet::steady(), &registry).unwrap();
//!
//! for state in [tray.properties_in_liq(0), tray.properties_in_vap(0)] {
//!     for var in state.unwrap().state_vars() {
//!         var.fix();
//!     }
//! }
//!
//! let report = tray.initialize(InitArgs::new(), &mut NewtonSolver::default()).unwrap();
//! assert_eq!(report.stages.len(), 3);
//! ```

mod tray;

pub use tray::{
    BalanceEquationSet, InitArgs, InitReport, MemberKind, ResolveError, SplitFraction, Stage,
    StageReport, Tray, TrayConfig, TrayError, TrayResult, classify,
};
