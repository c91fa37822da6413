//! # Stagewise: Equation-Oriented Distillation Trays
//!
//! A distillation tray modeled as one unit of an equation-oriented flowsheet.
//! The tray mixes a liquid and a vapor inlet (plus an optional feed) into a
//! single equilibrated outlet state and exposes that state split over up to
//! four outgoing ports.
//!
//! The crate is organized in layers:
//!
//! - **Variables** ([`VariableRegistry`], [`Var`]): shared values with fixed/free flags
//! - **Expressions** ([`expression::Expr`]): algebraic terms over variables
//! - **Constraints** ([`constraint::ConstraintFamily`]): named, indexed equalities
//!   that can be activated and deactivated as a group
//! - **Properties** ([`properties`]): the property package contract and an ideal
//!   reference package
//! - **Models** ([`models::Tray`]): balance synthesis, port splitting and the
//!   staged initializer
//! - **Solvers** ([`solvers`]): the solver oracle contract and a Newton solver
//!
//! ## Example
//!
//! ```
//! use stagewise::{TimeSet, VariableRegistry};
//! use stagewise::models::{Tray, TrayConfig};
//! use stagewise::properties::ideal::{ComponentData, Equilibrium, IdealPackage};
//!
//! let registry = VariableRegistry::new();
//! let package = IdealPackage::new(vec![
//!     ComponentData::new("benzene", 135.0, 82.0, 30_720.0),
//!     ComponentData::new("toluene", 157.0, 104.0, 33_180.0),
//! ])
//! .with_equilibrium(Equilibrium::VaporFraction(0.5));
//!
//! let tray = Tray::build(
//!     "tray_3",
//!     TrayConfig::new().with_liquid_side_draw(),
//!     &package,
//!     &TimeSet::steady(),
//!     &registry,
//! )
//! .unwrap();
//!
//! assert!(tray.port("liq_side_draw").is_some());
//! assert!(tray.heat_duty().is_none());
//! ```
//!
//! ## Optional Features
//!
//! - **`autodiff`**: Jacobians by forward-mode automatic differentiation using `num-dual`

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub mod constraint;
pub mod expression;
pub mod models;
pub mod port;
pub mod properties;
pub mod solvers;

#[cfg(feature = "autodiff")]
pub mod autodiff;

pub use constraint::{Constraint, ConstraintFamily, ConstraintIndex, EquationModel};
pub use expression::{Expr, Scalar};
pub use port::{HasPorts, Port, PortConnection, connect_named_ports};

/// Errors raised by the modeling layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// A unit has no port with the requested name
    #[error("Port '{port}' not found")]
    UnknownPort { port: String },
    /// A port member exists on one side of a connection only
    #[error("Port member '{member}' is missing on port '{port}'")]
    MissingPortMember { port: String, member: String },
    /// Two connected port members have different index sets
    #[error("Port member '{member}' has mismatched indices between '{from}' and '{to}'")]
    MismatchedIndices { member: String, from: String, to: String },
    /// Two connected ports span different time sets
    #[error("Ports '{from}' and '{to}' span {from_len} and {to_len} time points")]
    MismatchedTimeSets { from: String, to: String, from_len: usize, to_len: usize },
}

/// Unique identifier for a variable in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

impl VarId {
    /// Gets the index value.
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct VarData {
    name: String,
    value: f64,
    fixed: bool,
}

/// Central registry for all variable values.
///
/// Every unit, property state and solver in a flowsheet shares one registry so
/// that:
/// - Solvers write converged values where unit models can read them
/// - Ports hold ids instead of copies of state
/// - Fixing a variable is visible to every solve that involves it
///
/// # Examples
///
/// ```
/// use stagewise::VariableRegistry;
///
/// let registry = VariableRegistry::new();
/// let temp = registry.create("tray.temperature", 350.0);
///
/// // Solver updates the value
/// registry.set(temp.id(), 355.0);
///
/// // Unit model reads the updated value
/// assert_eq!(temp.value(), 355.0);
///
/// temp.fix();
/// assert!(registry.is_fixed(temp.id()));
/// ```
#[derive(Debug, Clone)]
pub struct VariableRegistry {
    vars: Rc<RefCell<Vec<VarData>>>,
}

impl VariableRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        VariableRegistry { vars: Rc::new(RefCell::new(Vec::new())) }
    }

    /// Registers a new free variable and returns its handle.
    pub fn create(&self, name: impl Into<String>, initial_value: f64) -> Var {
        let mut vars = self.vars.borrow_mut();
        let id = VarId(vars.len());
        vars.push(VarData { name: name.into(), value: initial_value, fixed: false });
        Var { id, registry: self.clone() }
    }

    /// Gets a handle for an existing variable.
    pub fn handle(&self, id: VarId) -> Var {
        Var { id, registry: self.clone() }
    }

    /// Gets the current value of a variable.
    pub fn get(&self, id: VarId) -> f64 {
        self.vars.borrow()[id.0].value
    }

    /// Sets the value of a variable.
    pub fn set(&self, id: VarId, value: f64) {
        self.vars.borrow_mut()[id.0].value = value;
    }

    /// Marks a variable as fixed. Solvers treat it as a constant.
    pub fn fix(&self, id: VarId) {
        self.vars.borrow_mut()[id.0].fixed = true;
    }

    /// Releases a fixed variable back to the solver.
    pub fn unfix(&self, id: VarId) {
        self.vars.borrow_mut()[id.0].fixed = false;
    }

    /// Returns whether a variable is fixed.
    pub fn is_fixed(&self, id: VarId) -> bool {
        self.vars.borrow()[id.0].fixed
    }

    /// Gets the display name of a variable.
    pub fn name(&self, id: VarId) -> String {
        self.vars.borrow()[id.0].name.clone()
    }

    /// Returns the total number of variables.
    pub fn len(&self) -> usize {
        self.vars.borrow().len()
    }

    /// Returns whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.vars.borrow().is_empty()
    }

    /// Gets all values as a vector (for solvers).
    pub fn get_all_values(&self) -> Vec<f64> {
        self.vars.borrow().iter().map(|v| v.value).collect()
    }

    /// Sets all values from a vector (for solvers).
    pub fn set_all_values(&self, values: &[f64]) {
        let mut vars = self.vars.borrow_mut();
        assert_eq!(values.len(), vars.len(), "Value vector length mismatch");
        for (var, &value) in vars.iter_mut().zip(values) {
            var.value = value;
        }
    }

    /// Filters `ids` down to the variables that are not fixed.
    pub fn free_variables(&self, ids: impl IntoIterator<Item = VarId>) -> Vec<VarId> {
        let vars = self.vars.borrow();
        ids.into_iter().filter(|id| !vars[id.0].fixed).collect()
    }
}

impl Default for VariableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle to one variable in a [`VariableRegistry`].
///
/// Handles are cheap to clone and all clones observe the same value and
/// fixed flag.
///
/// # Examples
///
/// ```
/// use stagewise::VariableRegistry;
///
/// let registry = VariableRegistry::new();
/// let sf = registry.create("liq_side_sf", 0.01);
///
/// sf.fix_at(0.2);
/// assert!(sf.is_fixed());
/// assert_eq!(sf.value(), 0.2);
/// ```
#[derive(Debug, Clone)]
pub struct Var {
    id: VarId,
    registry: VariableRegistry,
}

impl Var {
    /// Gets the variable's ID.
    pub fn id(&self) -> VarId {
        self.id
    }

    /// Gets the current value of the variable.
    pub fn value(&self) -> f64 {
        self.registry.get(self.id)
    }

    /// Sets the value of the variable.
    pub fn set_value(&self, value: f64) {
        self.registry.set(self.id, value)
    }

    /// Fixes the variable at its current value.
    pub fn fix(&self) {
        self.registry.fix(self.id)
    }

    /// Sets the value and fixes the variable.
    pub fn fix_at(&self, value: f64) {
        self.registry.set(self.id, value);
        self.registry.fix(self.id);
    }

    /// Releases the variable back to the solver.
    pub fn unfix(&self) {
        self.registry.unfix(self.id)
    }

    /// Returns whether the variable is fixed.
    pub fn is_fixed(&self) -> bool {
        self.registry.is_fixed(self.id)
    }

    /// Gets the display name of the variable.
    pub fn name(&self) -> String {
        self.registry.name(self.id)
    }

    /// Wraps the variable in an expression.
    pub fn expr(&self) -> Expr {
        Expr::Var(self.id)
    }

    /// Gets a reference to the registry (for advanced use).
    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }
}

/// Ordered time points of a flowsheet.
///
/// Every time-indexed quantity in a unit (property states, balance
/// constraints, port members) is stored by position in this set.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSet {
    points: Vec<f64>,
}

impl TimeSet {
    /// Creates a time set from explicit points.
    ///
    /// # Panics
    ///
    /// Panics if `points` is empty.
    pub fn new(points: Vec<f64>) -> Self {
        assert!(!points.is_empty(), "A time set needs at least one point");
        TimeSet { points }
    }

    /// The single-point time set of a steady-state flowsheet.
    pub fn steady() -> Self {
        TimeSet { points: vec![0.0] }
    }

    /// Number of time points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; a time set has at least one point.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Gets the time value at a position.
    pub fn point(&self, index: usize) -> f64 {
        self.points[index]
    }

    /// Iterates over time positions.
    pub fn indices(&self) -> std::ops::Range<usize> {
        0..self.points.len()
    }
}

impl Default for TimeSet {
    fn default() -> Self {
        Self::steady()
    }
}

/// Ordered component list shared by every state of a property package.
///
/// Component position is the `j` index of component-indexed constraints.
///
/// # Examples
///
/// ```
/// use stagewise::ComponentSet;
///
/// let btx = ComponentSet::new(vec!["benzene", "toluene"]);
///
/// assert_eq!(btx.count(), 2);
/// assert!(btx.contains("benzene"));
/// assert_eq!(btx.index_of("toluene"), Some(1));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSet {
    names: Vec<String>,
}

impl ComponentSet {
    /// Builds a set, dropping repeated names.
    pub fn new(names: Vec<&str>) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if !unique.iter().any(|n| n == name) {
                unique.push(name.to_string());
            }
        }
        ComponentSet { names: unique }
    }

    pub fn count(&self) -> usize {
        self.names.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Position of a component, i.e. its constraint index.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn components(&self) -> &[String] {
        &self.names
    }

    /// Iterates over component names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl fmt::Display for ComponentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.names.join(", "))
    }
}
