//! Property package contract.
//!
//! A unit model never computes thermodynamic properties itself. It asks a
//! [`PropertyPackage`] for one [`PropertyState`] per (stream role, time
//! point) and builds its balances from the flow and enthalpy terms those
//! states expose.
//!
//! States also declare the members they offer for port construction
//! ([`PropertyState::port_members`]). Members follow a lexical naming
//! contract: whenever a total quantity `X` or a component quantity `X_comp`
//! is declared, its per-phase sibling `X_phase` or `X_phase_comp` can be
//! looked up with [`PropertyState::member`].
//!
//! [`ideal::IdealPackage`] is a small reference implementation.

pub mod ideal;

use crate::constraint::ConstraintFamily;
use crate::expression::Expr;
use crate::{ComponentSet, Var, VarId, VariableRegistry};
use std::collections::BTreeMap;
use std::fmt;

/// Result type for property operations.
pub type PropertyResult<T> = Result<T, PropertyError>;

/// Errors raised by property packages.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    /// A state has no member with this name
    #[error("State '{state}' has no member '{member}'")]
    UnknownMember { state: String, member: String },
    /// A component is not part of the package
    #[error("Unknown component: {0}")]
    UnknownComponent(String),
    /// A construction argument is not understood by the package
    #[error("Unknown property package argument: {0}")]
    UnknownArgument(String),
    /// A value or key is not valid for the member it targets
    #[error("Invalid argument for '{member}': {reason}")]
    InvalidArgument { member: String, reason: String },
}

/// Physical phase tracked by a property package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Liquid
    Liq,
    /// Vapor
    Vap,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Liq => write!(f, "Liq"),
            Phase::Vap => write!(f, "Vap"),
        }
    }
}

/// Index of one entry of an indexed state member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Indexed by phase (e.g. `flow_mol_phase`)
    Phase(Phase),
    /// Indexed by component (e.g. `mole_frac_comp`)
    Comp(String),
    /// Indexed by phase and component (e.g. `flow_mol_phase_comp`)
    PhaseComp(Phase, String),
}

impl Key {
    /// The phase-qualified form of a component key.
    ///
    /// Only component keys have one; other keys return `None`.
    pub fn with_phase(&self, phase: Phase) -> Option<Key> {
        match self {
            Key::Comp(j) => Some(Key::PhaseComp(phase, j.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Phase(p) => write!(f, "{}", p),
            Key::Comp(j) => write!(f, "{}", j),
            Key::PhaseComp(p, j) => write!(f, "{},{}", p, j),
        }
    }
}

/// A state member at one time point: a scalar or an indexed family of terms.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberHandle {
    /// Unindexed member
    Scalar(Expr),
    /// Indexed member, entries in declaration order
    Indexed(Vec<(Key, Expr)>),
}

impl MemberHandle {
    /// Returns whether the member is indexed.
    pub fn is_indexed(&self) -> bool {
        matches!(self, MemberHandle::Indexed(_))
    }

    /// The expression of a scalar member.
    pub fn scalar(&self) -> Option<&Expr> {
        match self {
            MemberHandle::Scalar(expr) => Some(expr),
            MemberHandle::Indexed(_) => None,
        }
    }

    /// The expression of one entry of an indexed member.
    pub fn get(&self, key: &Key) -> Option<&Expr> {
        match self {
            MemberHandle::Scalar(_) => None,
            MemberHandle::Indexed(entries) => {
                entries.iter().find(|(k, _)| k == key).map(|(_, e)| e)
            }
        }
    }

    /// Keys of an indexed member (empty for a scalar).
    pub fn keys(&self) -> Vec<&Key> {
        match self {
            MemberHandle::Scalar(_) => Vec::new(),
            MemberHandle::Indexed(entries) => entries.iter().map(|(k, _)| k).collect(),
        }
    }
}

/// Construction flags for one property state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateBlockArgs {
    /// Whether the state carries phase-equilibrium constraints
    pub has_phase_equilibrium: bool,
    /// Whether the state is fully specified by its own variables (inlets)
    /// or derived from the unit's balances (outlets)
    pub defined_state: bool,
    /// Extra package-specific arguments
    pub extra: BTreeMap<String, f64>,
}

impl StateBlockArgs {
    /// Flags for an inlet state: defined, no phase equilibrium.
    pub fn inlet() -> Self {
        StateBlockArgs { has_phase_equilibrium: false, defined_state: true, extra: BTreeMap::new() }
    }

    /// Flags for a mixed outlet state: derived, with phase equilibrium.
    pub fn outlet() -> Self {
        StateBlockArgs { has_phase_equilibrium: true, defined_state: false, extra: BTreeMap::new() }
    }

    /// Attaches extra package arguments.
    pub fn with_extra(mut self, extra: BTreeMap<String, f64>) -> Self {
        self.extra = extra;
        self
    }
}

/// Initial guesses handed to a state during initialization.
///
/// # Examples
///
/// ```
/// use stagewise::properties::{Key, Phase, StateArgs};
///
/// let args = StateArgs::new()
///     .with("temperature", 368.0)
///     .with_indexed(
///         "flow_mol_phase_comp",
///         Key::PhaseComp(Phase::Liq, "benzene".to_string()),
///         2.5,
///     );
///
/// assert_eq!(args.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateArgs {
    entries: Vec<(String, Option<Key>, f64)>,
}

impl StateArgs {
    /// Creates an empty set of guesses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a guess for a scalar member.
    pub fn with(mut self, member: &str, value: f64) -> Self {
        self.entries.push((member.to_string(), None, value));
        self
    }

    /// Adds a guess for one entry of an indexed member.
    pub fn with_indexed(mut self, member: &str, key: Key, value: f64) -> Self {
        self.entries.push((member.to_string(), Some(key), value));
        self
    }

    /// Iterates over `(member, key, value)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Key>, f64)> {
        self.entries.iter().map(|(m, k, v)| (m.as_str(), k.as_ref(), *v))
    }

    /// Number of guesses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no guesses were given.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Thermodynamic state of one stream at one time point.
pub trait PropertyState {
    /// Display label (e.g. `tray_3.properties_out[0]`).
    fn label(&self) -> &str;

    /// Temperature variable.
    fn temperature(&self) -> &Var;

    /// Pressure variable.
    fn pressure(&self) -> &Var;

    /// Flow of one component in one phase, as used in material balances.
    fn material_flow_terms(&self, phase: Phase, component: &str) -> Expr;

    /// Enthalpy flow of one phase, as used in energy balances.
    fn enthalpy_flow_terms(&self, phase: Phase) -> Expr;

    /// Members offered for port construction, in declaration order.
    fn port_members(&self) -> Vec<(String, MemberHandle)>;

    /// Any member by name, including undeclared per-phase siblings.
    fn member(&self, name: &str) -> Option<MemberHandle>;

    /// Variables that define the state.
    fn state_vars(&self) -> Vec<Var>;

    /// All variables owned by the state.
    fn variables(&self) -> Vec<VarId>;

    /// Constraints internal to the state (e.g. phase equilibrium).
    fn constraints(&self) -> Vec<&ConstraintFamily>;

    /// Whether the state was built with phase equilibrium.
    fn has_phase_equilibrium(&self) -> bool;

    /// Whether the state is defined by its own variables.
    fn is_defined_state(&self) -> bool;

    /// Applies initial guesses and prepares the state for solving.
    fn initialize(&mut self, args: Option<&StateArgs>, verbosity: u8) -> PropertyResult<()>;
}

/// Factory for property states.
pub trait PropertyPackage {
    /// Phases every state tracks.
    fn phase_list(&self) -> &[Phase];

    /// Components every state tracks.
    fn component_list(&self) -> &ComponentSet;

    /// Builds the state for one stream at time position `time_index`.
    fn build_state(
        &self,
        registry: &VariableRegistry,
        label: &str,
        time_index: usize,
        args: &StateBlockArgs,
    ) -> PropertyResult<Box<dyn PropertyState>>;
}
