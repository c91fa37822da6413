//! Equality constraints and constraint families.
//!
//! A [`Constraint`] is stored in residual form `body == 0`. Constraints that
//! come from one balance law are grouped into a [`ConstraintFamily`] indexed
//! by time (and component), and the whole family is switched on or off with
//! one flag. This is what staged initialization manipulates.
//!
//! # Example
//!
//! ```
//! use stagewise::{Constraint, ConstraintFamily, ConstraintIndex, VariableRegistry};
//!
//! let registry = VariableRegistry::new();
//! let p_out = registry.create("P_out", 1.0e5);
//! let p_in = registry.create("P_in", 1.0e5);
//!
//! let mut family = ConstraintFamily::new("pressure_drop_equation");
//! family.push(
//!     ConstraintIndex::Time(0),
//!     Constraint::equality("pressure_drop_equation[0]", p_out.expr(), p_in.expr()),
//! );
//!
//! family.deactivate();
//! assert!(!family.is_active());
//! assert_eq!(family.max_residual(&registry), 0.0);
//! ```

use crate::expression::Expr;
use crate::{VarId, VariableRegistry};
use std::collections::BTreeSet;
use std::fmt;

/// Index of one member of a constraint family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintIndex {
    /// Indexed by time position only
    Time(usize),
    /// Indexed by time position and component position
    TimeComponent(usize, usize),
}

impl fmt::Display for ConstraintIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintIndex::Time(t) => write!(f, "[{}]", t),
            ConstraintIndex::TimeComponent(t, j) => write!(f, "[{},{}]", t, j),
        }
    }
}

/// A named equality constraint in residual form: `body == 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Descriptive name for the constraint
    pub name: String,
    body: Expr,
}

impl Constraint {
    /// Creates `lhs == rhs`.
    pub fn equality(name: &str, lhs: Expr, rhs: Expr) -> Self {
        Constraint { name: name.to_string(), body: lhs - rhs }
    }

    /// Creates `body == 0`.
    pub fn zero(name: &str, body: Expr) -> Self {
        Constraint { name: name.to_string(), body }
    }

    /// The residual expression.
    pub fn body(&self) -> &Expr {
        &self.body
    }

    /// Evaluates the residual at current registry values.
    ///
    /// A residual of zero indicates the constraint is satisfied.
    pub fn residual(&self, registry: &VariableRegistry) -> f64 {
        self.body.eval(registry)
    }

    /// Checks if the constraint is satisfied within `tolerance`.
    pub fn is_satisfied(&self, registry: &VariableRegistry, tolerance: f64) -> bool {
        self.residual(registry).abs() < tolerance
    }

    /// Variables referenced by the constraint.
    pub fn variables(&self) -> BTreeSet<VarId> {
        self.body.variables()
    }
}

/// A named, indexed group of constraints sharing one activation flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintFamily {
    name: String,
    members: Vec<(ConstraintIndex, Constraint)>,
    active: bool,
}

impl ConstraintFamily {
    /// Creates an empty, active family.
    pub fn new(name: &str) -> Self {
        ConstraintFamily { name: name.to_string(), members: Vec::new(), active: true }
    }

    /// Family name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a member constraint.
    pub fn push(&mut self, index: ConstraintIndex, constraint: Constraint) {
        self.members.push((index, constraint));
    }

    /// Switches the family on.
    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Switches the family off. Solvers ignore inactive constraints.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Returns whether the family is active.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of member constraints.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns whether the family has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Looks up one member by index.
    pub fn get(&self, index: ConstraintIndex) -> Option<&Constraint> {
        self.members.iter().find(|(i, _)| *i == index).map(|(_, c)| c)
    }

    /// Iterates over `(index, constraint)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&ConstraintIndex, &Constraint)> {
        self.members.iter().map(|(i, c)| (i, c))
    }

    /// Iterates over member constraints.
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.members.iter().map(|(_, c)| c)
    }

    /// Largest absolute residual over all members.
    pub fn max_residual(&self, registry: &VariableRegistry) -> f64 {
        self.constraints().map(|c| c.residual(registry).abs()).fold(0.0, f64::max)
    }
}

/// A block of variables and constraints that a solver can work on.
///
/// Solvers see the constraints of active families only, and treat every
/// variable those constraints reference as unknown unless it is fixed.
pub trait EquationModel {
    /// Name of the block (used in log output).
    fn name(&self) -> &str;

    /// All constraint families of the block, active or not.
    fn constraint_families(&self) -> Vec<&ConstraintFamily>;

    /// Constraints of the active families.
    fn active_constraints(&self) -> Vec<&Constraint> {
        self.constraint_families()
            .into_iter()
            .filter(|family| family.is_active())
            .flat_map(|family| family.constraints())
            .collect()
    }
}

/// Free variables referenced by the active constraints of a model, in id order.
pub fn free_variables(model: &dyn EquationModel, registry: &VariableRegistry) -> Vec<VarId> {
    let mut referenced = BTreeSet::new();
    for constraint in model.active_constraints() {
        constraint.body().collect_variables(&mut referenced);
    }
    registry.free_variables(referenced)
}

/// Degrees of freedom of a model: free variables minus active constraints.
///
/// A square system that a Newton solver can handle has zero degrees of freedom.
pub fn degrees_of_freedom(model: &dyn EquationModel, registry: &VariableRegistry) -> i64 {
    free_variables(model, registry).len() as i64 - model.active_constraints().len() as i64
}
