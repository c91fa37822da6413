//! Port population from the mixed outlet state.
//!
//! Each declared port member of the outlet state is classified once into a
//! [`MemberKind`] by its name and shape. Outlet ports are then resolved from
//! that schema for a target phase and a [`SplitFraction`]:
//!
//! | Kind | Port entry | Split fraction applied |
//! |------|------------|------------------------|
//! | `Intensive` | direct reference | no |
//! | `FractionByPhase` | direct reference | no |
//! | `EnthalpyByPhase` | direct reference | no |
//! | `FractionTotal` | `X_phase_Y[phase, j]` | no |
//! | `FlowTotal` | `X_phase[phase]` | yes |
//! | `FlowByComponent` | `X_phase_comp[phase, j]` | yes |
//! | `EnthalpyTotal` | `X_phase[phase]` | no |
//!
//! Synthesized entries are registered under `e_<kind>_<port>` so several
//! ports built from the same outlet never collide.

use crate::expression::Expr;
use crate::port::{Linkage, Port, PortMember};
use crate::properties::{Key, MemberHandle, Phase, PropertyState};
use crate::VarId;
use std::collections::BTreeMap;
use tracing::debug;

/// Errors raised while building ports from a property state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    /// A total enthalpy member is indexed
    #[error("Expected an unindexed variable for total enthalpy member '{member}'")]
    IndexedTotalEnthalpy { member: String },
    /// A flow member is already phase-indexed and cannot be split by phase
    #[error("Flow member '{member}' is already indexed by phase and cannot be split")]
    UnsupportedFlowMember { member: String },
    /// A member's per-phase sibling does not exist on the state
    #[error("Member '{member}' requires sibling '{sibling}', which the state does not define")]
    MissingSibling { member: String, sibling: String },
    /// A per-phase sibling lacks an entry the member needs
    #[error("Sibling '{sibling}' has no entry for index [{key}]")]
    MissingSiblingIndex { sibling: String, key: String },
    /// A member's name or indexing does not fit its kind
    #[error("Member '{member}' has an unexpected shape: expected {expected}")]
    UnexpectedShape { member: String, expected: &'static str },
    /// Two members of one port resolved to the same expression name
    #[error("Expression '{name}' is already defined on this unit")]
    DuplicateExpression { name: String },
}

/// How a port member relates to the mixed outlet state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// Same value on every port (temperature, pressure)
    Intensive,
    /// Total composition, read from the per-phase composition
    FractionTotal,
    /// Composition already indexed by phase
    FractionByPhase,
    /// Total flow, read from the per-phase flow and scaled
    FlowTotal,
    /// Component flow, read from the per-phase component flow and scaled
    FlowByComponent,
    /// Total molar enthalpy, read from the per-phase enthalpy
    EnthalpyTotal,
    /// Enthalpy already indexed by phase
    EnthalpyByPhase,
}

impl MemberKind {
    /// Whether the port entry is synthesized rather than referenced.
    pub fn is_synthesized(&self) -> bool {
        matches!(
            self,
            MemberKind::FractionTotal
                | MemberKind::FlowTotal
                | MemberKind::FlowByComponent
                | MemberKind::EnthalpyTotal
        )
    }

    /// Whether the split fraction scales the entry.
    pub fn is_split(&self) -> bool {
        matches!(self, MemberKind::FlowTotal | MemberKind::FlowByComponent)
    }

    fn expression_prefix(&self) -> &'static str {
        match self {
            MemberKind::FractionTotal | MemberKind::FractionByPhase => "mole_frac",
            MemberKind::FlowTotal | MemberKind::FlowByComponent => "flow",
            MemberKind::EnthalpyTotal | MemberKind::EnthalpyByPhase => "enth",
            MemberKind::Intensive => "",
        }
    }
}

/// Classifies a port member by name and shape.
///
/// Rules are applied in order:
///
/// 1. no `flow`, `frac` or `enth` in the name: intensive
/// 2. `frac` with `mole` or `mass`: by phase if the name contains `phase`,
///    otherwise total (must be indexed)
/// 3. `flow`: scalar total or component-indexed `X_Y_comp`; phase-indexed
///    flows are rejected
/// 4. `enth`: scalar total, or by phase with `phase` in the name
///
/// Any other fraction (e.g. a vapor fraction) is not carried on outlet ports
/// and yields `Ok(None)`.
pub fn classify(name: &str, indexed: bool) -> Result<Option<MemberKind>, ResolveError> {
    let has = |word: &str| name.contains(word);
    let member = || name.to_string();

    if !has("flow") && !has("frac") && !has("enth") {
        return Ok(Some(MemberKind::Intensive));
    }

    if has("frac") && (has("mole") || has("mass")) {
        if has("phase") {
            return Ok(Some(MemberKind::FractionByPhase));
        }
        if !indexed {
            return Err(ResolveError::UnexpectedShape {
                member: member(),
                expected: "an indexed total fraction",
            });
        }
        return Ok(Some(MemberKind::FractionTotal));
    }

    if has("flow") {
        if has("phase") {
            return Err(ResolveError::UnsupportedFlowMember { member: member() });
        }
        if !indexed {
            return Ok(Some(MemberKind::FlowTotal));
        }
        if !name.ends_with("_comp") {
            return Err(ResolveError::UnexpectedShape {
                member: member(),
                expected: "a component flow named X_Y_comp",
            });
        }
        return Ok(Some(MemberKind::FlowByComponent));
    }

    if has("enth") {
        return match (has("phase"), indexed) {
            (false, false) => Ok(Some(MemberKind::EnthalpyTotal)),
            (false, true) => Err(ResolveError::IndexedTotalEnthalpy { member: member() }),
            (true, _) => Ok(Some(MemberKind::EnthalpyByPhase)),
        };
    }

    Ok(None)
}

/// Name of the per-phase sibling of a member.
///
/// A component-indexed member gets `phase` inserted before its last segment
/// (`mole_frac_comp` -> `mole_frac_phase_comp`); a scalar member gets
/// `_phase` appended (`flow_mol` -> `flow_mol_phase`).
fn phase_sibling(name: &str, kind: MemberKind) -> String {
    match kind {
        MemberKind::FractionTotal | MemberKind::FlowByComponent => match name.rsplit_once('_') {
            Some((head, tail)) => format!("{}_phase_{}", head, tail),
            None => format!("{}_phase", name),
        },
        _ => format!("{}_phase", name),
    }
}

/// Portion of a phase routed to a port.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitFraction {
    /// The whole phase (no side draw)
    Whole,
    /// The side draw share `sf`
    Fraction(VarId),
    /// The main outlet share `1 - sf`
    Complement(VarId),
}

impl SplitFraction {
    /// The fraction as an expression.
    pub fn expr(&self) -> Expr {
        match self {
            SplitFraction::Whole => Expr::constant(1.0),
            SplitFraction::Fraction(id) => Expr::var(*id),
            SplitFraction::Complement(id) => 1.0 - Expr::var(*id),
        }
    }
}

/// Builds outlet ports from the time-indexed mixed outlet states.
pub(crate) struct SplitResolver<'a> {
    outlet: &'a [Box<dyn PropertyState>],
    schema: Vec<(String, MemberKind)>,
    expressions: &'a mut BTreeMap<String, Vec<MemberHandle>>,
}

impl<'a> SplitResolver<'a> {
    /// Classifies the outlet's declared port members.
    ///
    /// The first time point's declaration is the schema for every time point.
    pub(crate) fn new(
        outlet: &'a [Box<dyn PropertyState>],
        expressions: &'a mut BTreeMap<String, Vec<MemberHandle>>,
    ) -> Result<Self, ResolveError> {
        let mut schema = Vec::new();
        if let Some(first) = outlet.first() {
            for (name, handle) in first.port_members() {
                match classify(&name, handle.is_indexed())? {
                    Some(kind) => {
                        debug!(member = %name, ?kind, "classified port member");
                        schema.push((name, kind));
                    }
                    None => debug!(member = %name, "member not carried on outlet ports"),
                }
            }
        }
        Ok(SplitResolver { outlet, schema, expressions })
    }

    #[cfg(test)]
    pub(crate) fn schema(&self) -> &[(String, MemberKind)] {
        &self.schema
    }

    /// Builds one outlet port for `phase` scaled by `fraction`.
    pub(crate) fn resolve_port(
        &mut self,
        port_name: &str,
        phase: Phase,
        fraction: SplitFraction,
    ) -> Result<Port, ResolveError> {
        let mut port = Port::output(port_name);
        let sf = fraction.expr();

        for (name, kind) in &self.schema {
            let mut values = Vec::with_capacity(self.outlet.len());
            for state in self.outlet {
                values.push(resolve_member(state.as_ref(), name, *kind, phase, &sf)?);
            }

            let linkage = if kind.is_synthesized() {
                let expr_name = format!("e_{}_{}", kind.expression_prefix(), port_name);
                if self.expressions.contains_key(&expr_name) {
                    return Err(ResolveError::DuplicateExpression { name: expr_name });
                }
                self.expressions.insert(expr_name.clone(), values.clone());
                Linkage::Expression(expr_name)
            } else {
                Linkage::Reference
            };

            port.add(PortMember::new(name, linkage, values));
        }

        Ok(port)
    }
}

fn lookup(state: &dyn PropertyState, member: &str, sibling: &str) -> Result<MemberHandle, ResolveError> {
    state.member(sibling).ok_or_else(|| ResolveError::MissingSibling {
        member: member.to_string(),
        sibling: sibling.to_string(),
    })
}

fn entry(handle: &MemberHandle, sibling: &str, key: &Key) -> Result<Expr, ResolveError> {
    handle.get(key).cloned().ok_or_else(|| ResolveError::MissingSiblingIndex {
        sibling: sibling.to_string(),
        key: key.to_string(),
    })
}

/// Resolves one member at one time point.
fn resolve_member(
    state: &dyn PropertyState,
    name: &str,
    kind: MemberKind,
    phase: Phase,
    sf: &Expr,
) -> Result<MemberHandle, ResolveError> {
    match kind {
        MemberKind::Intensive | MemberKind::FractionByPhase | MemberKind::EnthalpyByPhase => {
            lookup(state, name, name)
        }
        MemberKind::FlowTotal | MemberKind::EnthalpyTotal => {
            let sibling = phase_sibling(name, kind);
            let handle = lookup(state, name, &sibling)?;
            let value = entry(&handle, &sibling, &Key::Phase(phase))?;
            let value = if kind.is_split() { value * sf.clone() } else { value };
            Ok(MemberHandle::Scalar(value))
        }
        MemberKind::FractionTotal | MemberKind::FlowByComponent => {
            let own = lookup(state, name, name)?;
            let sibling = phase_sibling(name, kind);
            let handle = lookup(state, name, &sibling)?;
            let mut entries = Vec::new();
            for key in own.keys() {
                let phase_key = key.with_phase(phase).ok_or_else(|| {
                    ResolveError::UnexpectedShape {
                        member: name.to_string(),
                        expected: "an index by component",
                    }
                })?;
                let value = entry(&handle, &sibling, &phase_key)?;
                let value = if kind.is_split() { value * sf.clone() } else { value };
                entries.push((key.clone(), value));
            }
            Ok(MemberHandle::Indexed(entries))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ConstraintFamily;
    use crate::properties::ideal::{ComponentData, IdealPackage};
    use crate::properties::{PropertyPackage, PropertyResult, StateArgs, StateBlockArgs};
    use crate::{Var, VariableRegistry};

    #[test]
    fn test_classify_intensive() {
        assert_eq!(classify("temperature", false), Ok(Some(MemberKind::Intensive)));
        assert_eq!(classify("pressure", false), Ok(Some(MemberKind::Intensive)));
    }

    #[test]
    fn test_classify_other_fractions_skipped() {
        assert_eq!(classify("vap_frac", false), Ok(None));
        assert_eq!(classify("phase_frac", true), Ok(None));
    }

    #[test]
    fn test_classify_fractions() {
        assert_eq!(classify("mole_frac_comp", true), Ok(Some(MemberKind::FractionTotal)));
        assert_eq!(classify("mass_frac_comp", true), Ok(Some(MemberKind::FractionTotal)));
        assert_eq!(classify("mole_frac_phase_comp", true), Ok(Some(MemberKind::FractionByPhase)));
        assert!(matches!(
            classify("mole_frac_comp", false),
            Err(ResolveError::UnexpectedShape { .. })
        ));
    }

    #[test]
    fn test_classify_flows() {
        assert_eq!(classify("flow_mol", false), Ok(Some(MemberKind::FlowTotal)));
        assert_eq!(classify("flow_mol_comp", true), Ok(Some(MemberKind::FlowByComponent)));
        assert_eq!(
            classify("flow_mol_phase", true),
            Err(ResolveError::UnsupportedFlowMember { member: "flow_mol_phase".to_string() })
        );
        assert!(matches!(
            classify("flow_mol_species", true),
            Err(ResolveError::UnexpectedShape { .. })
        ));
    }

    #[test]
    fn test_classify_enthalpy() {
        assert_eq!(classify("enth_mol", false), Ok(Some(MemberKind::EnthalpyTotal)));
        assert_eq!(classify("enth_mol_phase", true), Ok(Some(MemberKind::EnthalpyByPhase)));
        assert_eq!(
            classify("enth_mol", true),
            Err(ResolveError::IndexedTotalEnthalpy { member: "enth_mol".to_string() })
        );
        assert_eq!(classify("enth_mol_phase", false), Ok(Some(MemberKind::EnthalpyByPhase)));
    }

    #[test]
    fn test_phase_sibling_names() {
        assert_eq!(phase_sibling("mole_frac_comp", MemberKind::FractionTotal), "mole_frac_phase_comp");
        assert_eq!(phase_sibling("flow_mol_comp", MemberKind::FlowByComponent), "flow_mol_phase_comp");
        assert_eq!(phase_sibling("flow_mass", MemberKind::FlowTotal), "flow_mass_phase");
        assert_eq!(phase_sibling("enth_mol", MemberKind::EnthalpyTotal), "enth_mol_phase");
    }

    #[test]
    fn test_split_fraction_expr() {
        let registry = VariableRegistry::new();
        let sf = registry.create("sf", 0.2);
        assert_eq!(SplitFraction::Whole.expr().eval(&registry), 1.0);
        assert_eq!(SplitFraction::Fraction(sf.id()).expr().eval(&registry), 0.2);
        assert!((SplitFraction::Complement(sf.id()).expr().eval(&registry) - 0.8).abs() < 1e-12);
    }

    fn outlet(members: &[&str], registry: &VariableRegistry) -> Vec<Box<dyn PropertyState>> {
        let package = IdealPackage::new(vec![
            ComponentData::new("benzene", 135.0, 82.0, 30_720.0),
            ComponentData::new("toluene", 157.0, 104.0, 33_180.0),
        ])
        .with_port_members(members);
        let state = package.build_state(registry, "out[0]", 0, &StateBlockArgs::outlet()).unwrap();
        // Liq b, Liq t, Vap b, Vap t
        for (var, value) in state.state_vars().iter().zip([1.0, 3.0, 2.0, 2.0]) {
            var.set_value(value);
        }
        vec![state]
    }

    #[test]
    fn test_duplicate_expression_rejected() {
        let registry = VariableRegistry::new();
        let states = outlet(&["flow_mol", "flow_mol_comp", "mole_frac_comp", "enth_mol"], &registry);
        let mut expressions = BTreeMap::new();
        let mut resolver = SplitResolver::new(&states, &mut expressions).unwrap();
        let port = resolver.resolve_port("liq_out", Phase::Liq, SplitFraction::Whole);

        // flow_mol and flow_mol_comp both map to e_flow_liq_out
        assert_eq!(
            port.unwrap_err(),
            ResolveError::DuplicateExpression { name: "e_flow_liq_out".to_string() }
        );
    }

    #[test]
    fn test_resolve_component_flows_and_fractions() {
        let registry = VariableRegistry::new();
        let states = outlet(&["flow_mol_comp", "mole_frac_comp", "temperature"], &registry);
        let mut expressions = BTreeMap::new();
        let mut resolver = SplitResolver::new(&states, &mut expressions).unwrap();
        assert_eq!(resolver.schema().len(), 3);

        let port = resolver.resolve_port("vap_out", Phase::Vap, SplitFraction::Whole).unwrap();
        let toluene = Key::Comp("toluene".to_string());
        assert_eq!(port.value("flow_mol_comp", 0, Some(&toluene), &registry), Some(2.0));
        let x = port.value("mole_frac_comp", 0, Some(&toluene), &registry).unwrap();
        assert!((x - 0.5).abs() < 1e-12);
        assert_eq!(port.value("temperature", 0, None, &registry), Some(298.15));

        assert!(expressions.contains_key("e_flow_vap_out"));
        assert!(expressions.contains_key("e_mole_frac_vap_out"));
        assert_eq!(expressions.len(), 2);
    }

    #[test]
    fn test_resolve_scaled_total_flow() {
        let registry = VariableRegistry::new();
        let sf = registry.create("liq_side_sf", 0.25);
        let states = outlet(&["flow_mol", "enth_mol_phase"], &registry);
        let mut expressions = BTreeMap::new();
        let mut resolver = SplitResolver::new(&states, &mut expressions).unwrap();

        let draw =
            resolver.resolve_port("liq_side_draw", Phase::Liq, SplitFraction::Fraction(sf.id()));
        let main = resolver.resolve_port("liq_out", Phase::Liq, SplitFraction::Complement(sf.id()));
        let (draw, main) = (draw.unwrap(), main.unwrap());

        assert_eq!(draw.value("flow_mol", 0, None, &registry), Some(1.0));
        assert_eq!(main.value("flow_mol", 0, None, &registry), Some(3.0));
        assert_eq!(draw.get("enth_mol_phase"), main.get("enth_mol_phase"));
        assert_eq!(main.get("enth_mol_phase").unwrap().linkage, Linkage::Reference);
    }

    struct StubState {
        t: Var,
        members: Vec<(String, MemberHandle)>,
        declared: usize,
    }

    impl PropertyState for StubState {
        fn label(&self) -> &str {
            "stub"
        }
        fn temperature(&self) -> &Var {
            &self.t
        }
        fn pressure(&self) -> &Var {
            &self.t
        }
        fn material_flow_terms(&self, _phase: Phase, _component: &str) -> Expr {
            Expr::zero()
        }
        fn enthalpy_flow_terms(&self, _phase: Phase) -> Expr {
            Expr::zero()
        }
        fn port_members(&self) -> Vec<(String, MemberHandle)> {
            self.members.iter().take(self.declared).cloned().collect()
        }
        fn member(&self, name: &str) -> Option<MemberHandle> {
            self.members.iter().find(|(n, _)| n == name).map(|(_, h)| h.clone())
        }
        fn state_vars(&self) -> Vec<Var> {
            vec![self.t.clone()]
        }
        fn variables(&self) -> Vec<VarId> {
            vec![self.t.id()]
        }
        fn constraints(&self) -> Vec<&ConstraintFamily> {
            Vec::new()
        }
        fn has_phase_equilibrium(&self) -> bool {
            true
        }
        fn is_defined_state(&self) -> bool {
            false
        }
        fn initialize(&mut self, _args: Option<&StateArgs>, _verbosity: u8) -> PropertyResult<()> {
            Ok(())
        }
    }

    /// A state whose first `declared` members form its port declaration.
    fn stub(members: Vec<(&str, MemberHandle)>, declared: usize) -> Vec<Box<dyn PropertyState>> {
        let registry = VariableRegistry::new();
        let t = registry.create("T", 300.0);
        let members = members.into_iter().map(|(n, h)| (n.to_string(), h)).collect();
        vec![Box::new(StubState { t, members, declared })]
    }

    #[test]
    fn test_indexed_total_enthalpy_rejected() {
        let states = stub(vec![(
            "enth_mol",
            MemberHandle::Indexed(vec![(Key::Phase(Phase::Liq), Expr::zero())]),
        )], 1);
        let mut expressions = BTreeMap::new();
        let err = SplitResolver::new(&states, &mut expressions).err().unwrap();
        assert_eq!(err, ResolveError::IndexedTotalEnthalpy { member: "enth_mol".to_string() });
    }

    #[test]
    fn test_missing_sibling() {
        let states = stub(vec![("flow_mass", MemberHandle::Scalar(Expr::constant(5.0)))], 1);
        let mut expressions = BTreeMap::new();
        let mut resolver = SplitResolver::new(&states, &mut expressions).unwrap();
        let err = resolver.resolve_port("vap_out", Phase::Vap, SplitFraction::Whole).unwrap_err();
        assert_eq!(
            err,
            ResolveError::MissingSibling {
                member: "flow_mass".to_string(),
                sibling: "flow_mass_phase".to_string()
            }
        );
    }

    #[test]
    fn test_missing_sibling_index() {
        let members = vec![
            ("enth_mol", MemberHandle::Scalar(Expr::constant(40.0))),
            (
                "enth_mol_phase",
                MemberHandle::Indexed(vec![(Key::Phase(Phase::Liq), Expr::constant(30.0))]),
            ),
        ];
        let states = stub(members, 1);
        let mut expressions = BTreeMap::new();
        let mut resolver = SplitResolver::new(&states, &mut expressions).unwrap();
        assert!(resolver.resolve_port("liq_out", Phase::Liq, SplitFraction::Whole).is_ok());
        let err = resolver.resolve_port("vap_out", Phase::Vap, SplitFraction::Whole).unwrap_err();
        assert_eq!(
            err,
            ResolveError::MissingSiblingIndex {
                sibling: "enth_mol_phase".to_string(),
                key: "Vap".to_string()
            }
        );
    }

    #[test]
    fn test_scalar_phase_enthalpy_referenced_and_other_fractions_skipped() {
        let registry = VariableRegistry::new();
        let members = vec![
            ("vap_frac", MemberHandle::Scalar(Expr::constant(0.4))),
            ("enth_mol_phase", MemberHandle::Scalar(Expr::constant(40.0))),
        ];
        let states = stub(members, 2);
        let mut expressions = BTreeMap::new();
        let mut resolver = SplitResolver::new(&states, &mut expressions).unwrap();
        assert_eq!(resolver.schema(), &[("enth_mol_phase".to_string(), MemberKind::EnthalpyByPhase)]);

        let port = resolver.resolve_port("vap_out", Phase::Vap, SplitFraction::Whole).unwrap();
        assert!(port.get("vap_frac").is_none());
        assert_eq!(port.get("enth_mol_phase").unwrap().linkage, Linkage::Reference);
        assert_eq!(port.value("enth_mol_phase", 0, None, &registry), Some(40.0));
        assert!(expressions.is_empty());
    }

    #[test]
    fn test_declared_phase_flow_rejected() {
        let members = vec![(
            "flow_mass_phase",
            MemberHandle::Indexed(vec![(Key::Phase(Phase::Liq), Expr::constant(5.0))]),
        )];
        let states = stub(members, 1);
        let mut expressions = BTreeMap::new();
        let err = SplitResolver::new(&states, &mut expressions);
        assert!(matches!(err, Err(ResolveError::UnsupportedFlowMember { .. })));
    }
}
