//! Named ports and port-to-port connections.
//!
//! A [`Port`] is an ordered bundle of named members. Each member holds one
//! [`MemberHandle`] per time point, either a direct reference to state
//! variables or an expression synthesized by the owning unit. Ports never own
//! the states they expose; they only hold ids and expressions.
//!
//! Connecting two ports produces a [`PortConnection`], a family of equality
//! constraints between same-named members that a solver can work on.

use crate::constraint::{Constraint, ConstraintFamily, ConstraintIndex, EquationModel};
use crate::properties::{Key, MemberHandle};
use crate::{ModelError, VariableRegistry};

/// How a port member is tied to the state it exposes.
#[derive(Debug, Clone, PartialEq)]
pub enum Linkage {
    /// Shares the state's own variables
    Reference,
    /// Reads a named expression registered on the owning unit
    Expression(String),
}

/// One named entry of a port, indexed by time position.
#[derive(Debug, Clone, PartialEq)]
pub struct PortMember {
    /// Member name (e.g. `flow_mol_comp`)
    pub name: String,
    /// Reference or expression
    pub linkage: Linkage,
    values: Vec<MemberHandle>,
}

impl PortMember {
    /// Creates a member from one handle per time point.
    pub fn new(name: &str, linkage: Linkage, values: Vec<MemberHandle>) -> Self {
        PortMember { name: name.to_string(), linkage, values }
    }

    /// Handle at a time position.
    pub fn at(&self, t: usize) -> Option<&MemberHandle> {
        self.values.get(t)
    }

    /// Number of time points covered.
    pub fn time_len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether the member is a synthesized expression.
    pub fn is_expression(&self) -> bool {
        matches!(self.linkage, Linkage::Expression(_))
    }
}

/// A named, ordered bundle of state members exposed for connection.
///
/// # Examples
///
/// ```
/// use stagewise::{Expr, Port, VariableRegistry};
/// use stagewise::port::{Linkage, PortMember};
/// use stagewise::properties::MemberHandle;
///
/// let registry = VariableRegistry::new();
/// let t_out = registry.create("T", 350.0);
///
/// let mut port = Port::output("liq_out");
/// port.add(PortMember::new(
///     "temperature",
///     Linkage::Reference,
///     vec![MemberHandle::Scalar(t_out.expr())],
/// ));
///
/// assert_eq!(port.value("temperature", 0, None, &registry), Some(350.0));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    /// Port name (e.g. "liq_in", "vap_out", "liq_side_draw")
    pub name: String,
    /// Direction: true for input, false for output
    pub is_input: bool,
    members: Vec<PortMember>,
}

impl Port {
    /// Creates an empty input port.
    pub fn input(name: &str) -> Self {
        Port { name: name.to_string(), is_input: true, members: Vec::new() }
    }

    /// Creates an empty output port.
    pub fn output(name: &str) -> Self {
        Port { name: name.to_string(), is_input: false, members: Vec::new() }
    }

    /// Appends a member. Members keep insertion order.
    pub fn add(&mut self, member: PortMember) {
        self.members.push(member);
    }

    /// Looks up a member by name.
    pub fn get(&self, name: &str) -> Option<&PortMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Member names in order.
    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns whether the port has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Iterates over members in order.
    pub fn iter(&self) -> impl Iterator<Item = &PortMember> {
        self.members.iter()
    }

    /// Evaluates one member at a time point.
    ///
    /// `key` selects an entry of an indexed member and must be `None` for a
    /// scalar one.
    pub fn value(
        &self,
        name: &str,
        t: usize,
        key: Option<&Key>,
        registry: &VariableRegistry,
    ) -> Option<f64> {
        let handle = self.get(name)?.at(t)?;
        match (handle, key) {
            (MemberHandle::Scalar(expr), None) => Some(expr.eval(registry)),
            (MemberHandle::Indexed(_), Some(key)) => handle.get(key).map(|e| e.eval(registry)),
            _ => None,
        }
    }
}

/// Units that expose named ports.
pub trait HasPorts {
    /// Returns all input ports for this unit.
    fn input_ports(&self) -> Vec<&Port>;

    /// Returns all output ports for this unit.
    fn output_ports(&self) -> Vec<&Port>;

    /// Gets a specific input port by name.
    fn get_input_port(&self, name: &str) -> Option<&Port> {
        self.input_ports().into_iter().find(|p| p.name == name)
    }

    /// Gets a specific output port by name.
    fn get_output_port(&self, name: &str) -> Option<&Port> {
        self.output_ports().into_iter().find(|p| p.name == name)
    }

    /// Gets the number of (input, output) ports.
    fn port_count(&self) -> (usize, usize) {
        (self.input_ports().len(), self.output_ports().len())
    }
}

/// Equality constraints linking an output port to an input port.
#[derive(Debug, Clone)]
pub struct PortConnection {
    /// Source port name
    pub from_port: String,
    /// Destination port name
    pub to_port: String,
    equalities: ConstraintFamily,
}

impl PortConnection {
    /// Builds the member-wise equalities `from.member == to.member`.
    ///
    /// Every member of `from` must exist on `to` with the same shape and
    /// keys, and both ports must span the same number of time points.
    pub fn between(from: &Port, to: &Port) -> Result<Self, ModelError> {
        let family_name = format!("{}_to_{}", from.name, to.name);
        let mut equalities = ConstraintFamily::new(&family_name);

        for source in from.iter() {
            let target = to.get(&source.name).ok_or_else(|| ModelError::MissingPortMember {
                port: to.name.clone(),
                member: source.name.clone(),
            })?;
            if source.time_len() != target.time_len() {
                return Err(ModelError::MismatchedTimeSets {
                    from: from.name.clone(),
                    to: to.name.clone(),
                    from_len: source.time_len(),
                    to_len: target.time_len(),
                });
            }

            let mismatch = || ModelError::MismatchedIndices {
                member: source.name.clone(),
                from: from.name.clone(),
                to: to.name.clone(),
            };

            for (t, (lhs, rhs)) in source.values.iter().zip(&target.values).enumerate() {
                match (lhs, rhs) {
                    (MemberHandle::Scalar(a), MemberHandle::Scalar(b)) => {
                        let index = ConstraintIndex::Time(t);
                        let name = format!("{}.{}{}", family_name, source.name, index);
                        equalities.push(index, Constraint::equality(&name, a.clone(), b.clone()));
                    }
                    (MemberHandle::Indexed(entries), MemberHandle::Indexed(other)) => {
                        if entries.len() != other.len() {
                            return Err(mismatch());
                        }
                        for (k, (key, a)) in entries.iter().enumerate() {
                            let b = rhs.get(key).ok_or_else(mismatch)?;
                            let index = ConstraintIndex::TimeComponent(t, k);
                            let name = format!("{}.{}[{},{}]", family_name, source.name, t, key);
                            equalities.push(index, Constraint::equality(&name, a.clone(), b.clone()));
                        }
                    }
                    _ => return Err(mismatch()),
                }
            }
        }

        Ok(PortConnection { from_port: from.name.clone(), to_port: to.name.clone(), equalities })
    }

    /// The equality constraints of the connection.
    pub fn equalities(&self) -> &ConstraintFamily {
        &self.equalities
    }
}

impl EquationModel for PortConnection {
    fn name(&self) -> &str {
        self.equalities.name()
    }

    fn constraint_families(&self) -> Vec<&ConstraintFamily> {
        vec![&self.equalities]
    }
}

/// Connects an output port of one unit to an input port of another.
///
/// # Examples
///
/// ```ignore
/// use stagewise::connect_named_ports;
///
/// // Liquid leaving tray 3 enters tray 2
/// let link = connect_named_ports(&tray_3, "liq_out", &tray_2, "liq_in")?;
/// ```
pub fn connect_named_ports<U1, U2>(
    upstream: &U1,
    upstream_port: &str,
    downstream: &U2,
    downstream_port: &str,
) -> Result<PortConnection, ModelError>
where
    U1: HasPorts,
    U2: HasPorts,
{
    let out_port = upstream
        .get_output_port(upstream_port)
        .ok_or_else(|| ModelError::UnknownPort { port: upstream_port.to_string() })?;
    let in_port = downstream
        .get_input_port(downstream_port)
        .ok_or_else(|| ModelError::UnknownPort { port: downstream_port.to_string() })?;

    PortConnection::between(out_port, in_port)
}
