//! Ideal two-phase property package.
//!
//! States are defined by per-phase component flows, temperature and pressure.
//! Molar enthalpies use constant heat capacities relative to a reference
//! temperature, with the heat of vaporization added in the vapor phase:
//!
//! ```text
//! h_Liq,j = cp_liq,j (T - T_ref)
//! h_Vap,j = cp_vap,j (T - T_ref) + dh_vap,j
//! ```
//!
//! Phase equilibrium is not computed from first principles. A state built with
//! `has_phase_equilibrium` carries one [`Equilibrium`] relation per component,
//! either constant K-values or a fixed vapor fraction per component.
//!
//! # Example
//!
//! ```
//! use stagewise::VariableRegistry;
//! use stagewise::properties::{Phase, PropertyPackage, StateBlockArgs};
//! use stagewise::properties::ideal::{ComponentData, IdealPackage};
//!
//! let registry = VariableRegistry::new();
//! let package = IdealPackage::new(vec![ComponentData::new("water", 75.3, 33.6, 40_650.0)]);
//!
//! let state = package.build_state(&registry, "feed[0]", 0, &StateBlockArgs::inlet()).unwrap();
//! state.temperature().set_value(298.15);
//!
//! // Liquid at the reference temperature carries no enthalpy
//! assert_eq!(state.enthalpy_flow_terms(Phase::Liq).eval(&registry), 0.0);
//! ```

use super::{
    MemberHandle, Phase, PropertyError, PropertyPackage, PropertyResult, PropertyState, StateArgs,
    StateBlockArgs,
};
use crate::constraint::{Constraint, ConstraintFamily, ConstraintIndex};
use crate::expression::Expr;
use crate::properties::Key;
use crate::{ComponentSet, Var, VarId, VariableRegistry};
use tracing::{debug, info};

/// Default reference temperature for enthalpies (K).
pub const DEFAULT_TEMPERATURE_REF: f64 = 298.15;

/// Port members declared by default.
pub const DEFAULT_PORT_MEMBERS: [&str; 5] =
    ["flow_mol_comp", "temperature", "pressure", "mole_frac_comp", "enth_mol"];

const PHASES: [Phase; 2] = [Phase::Liq, Phase::Vap];

/// Pure-component data.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentData {
    /// Component name
    pub name: String,
    /// Liquid heat capacity (J/mol/K)
    pub cp_liq: f64,
    /// Vapor heat capacity (J/mol/K)
    pub cp_vap: f64,
    /// Heat of vaporization at the reference temperature (J/mol)
    pub dh_vap: f64,
}

impl ComponentData {
    /// Creates component data.
    pub fn new(name: &str, cp_liq: f64, cp_vap: f64, dh_vap: f64) -> Self {
        ComponentData { name: name.to_string(), cp_liq, cp_vap, dh_vap }
    }
}

/// Phase-equilibrium relation applied to outlet states.
#[derive(Debug, Clone, PartialEq)]
pub enum Equilibrium {
    /// `y_j = K_j x_j`, one K-value per component
    ConstantK(Vec<f64>),
    /// Each component leaves with this fraction of its flow in the vapor
    VaporFraction(f64),
}

/// Ideal liquid/vapor property package.
#[derive(Debug, Clone)]
pub struct IdealPackage {
    components: Vec<ComponentData>,
    component_set: ComponentSet,
    equilibrium: Equilibrium,
    port_members: Vec<String>,
}

impl IdealPackage {
    /// Creates a package over the given components.
    ///
    /// Defaults to an even vapor/liquid split as equilibrium relation and
    /// [`DEFAULT_PORT_MEMBERS`] as port members.
    pub fn new(components: Vec<ComponentData>) -> Self {
        let names: Vec<&str> = components.iter().map(|c| c.name.as_str()).collect();
        let component_set = ComponentSet::new(names);
        IdealPackage {
            components,
            component_set,
            equilibrium: Equilibrium::VaporFraction(0.5),
            port_members: DEFAULT_PORT_MEMBERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Sets the equilibrium relation.
    pub fn with_equilibrium(mut self, equilibrium: Equilibrium) -> Self {
        self.equilibrium = equilibrium;
        self
    }

    /// Replaces the declared port members.
    pub fn with_port_members(mut self, members: &[&str]) -> Self {
        self.port_members = members.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Pure-component data in package order.
    pub fn components(&self) -> &[ComponentData] {
        &self.components
    }
}

impl PropertyPackage for IdealPackage {
    fn phase_list(&self) -> &[Phase] {
        &PHASES
    }

    fn component_list(&self) -> &ComponentSet {
        &self.component_set
    }

    fn build_state(
        &self,
        registry: &VariableRegistry,
        label: &str,
        time_index: usize,
        args: &StateBlockArgs,
    ) -> PropertyResult<Box<dyn PropertyState>> {
        let mut temperature_ref = DEFAULT_TEMPERATURE_REF;
        for (name, value) in &args.extra {
            match name.as_str() {
                "temperature_ref" => temperature_ref = *value,
                other => return Err(PropertyError::UnknownArgument(other.to_string())),
            }
        }

        if let Equilibrium::ConstantK(k) = &self.equilibrium {
            if k.len() != self.components.len() {
                return Err(PropertyError::InvalidArgument {
                    member: "equilibrium".to_string(),
                    reason: format!(
                        "{} K-values for {} components",
                        k.len(),
                        self.components.len()
                    ),
                });
            }
        }

        let flow_var = |phase: Phase, comp: &ComponentData| {
            registry.create(format!("{}.flow_mol_phase_comp[{},{}]", label, phase, comp.name), 1.0)
        };
        let flow_liq = self.components.iter().map(|c| flow_var(Phase::Liq, c)).collect();
        let flow_vap = self.components.iter().map(|c| flow_var(Phase::Vap, c)).collect();
        let temperature = registry.create(format!("{}.temperature", label), DEFAULT_TEMPERATURE_REF);
        let pressure = registry.create(format!("{}.pressure", label), 101_325.0);

        let mut state = IdealState {
            label: label.to_string(),
            components: self.components.clone(),
            flow_liq,
            flow_vap,
            temperature,
            pressure,
            temperature_ref,
            port_members: self.port_members.clone(),
            equilibrium: None,
            defined_state: args.defined_state,
        };

        if args.has_phase_equilibrium {
            state.equilibrium = Some(state.equilibrium_constraints(&self.equilibrium, time_index));
        }

        debug!(state = %label, defined = args.defined_state, "built ideal property state");
        Ok(Box::new(state))
    }
}

/// One state of the [`IdealPackage`].
#[derive(Debug)]
pub struct IdealState {
    label: String,
    components: Vec<ComponentData>,
    flow_liq: Vec<Var>,
    flow_vap: Vec<Var>,
    temperature: Var,
    pressure: Var,
    temperature_ref: f64,
    port_members: Vec<String>,
    equilibrium: Option<ConstraintFamily>,
    defined_state: bool,
}

impl IdealState {
    fn flow(&self, phase: Phase, j: usize) -> &Var {
        match phase {
            Phase::Liq => &self.flow_liq[j],
            Phase::Vap => &self.flow_vap[j],
        }
    }

    fn phase_flow(&self, phase: Phase) -> Expr {
        Expr::sum((0..self.components.len()).map(|j| self.flow(phase, j).expr()))
    }

    fn component_flow(&self, j: usize) -> Expr {
        Expr::sum(PHASES.iter().map(|&p| self.flow(p, j).expr()))
    }

    fn total_flow(&self) -> Expr {
        Expr::sum(PHASES.iter().map(|&p| self.phase_flow(p)))
    }

    /// Molar enthalpy of component `j` in `phase`.
    fn enth_mol_phase_comp(&self, phase: Phase, j: usize) -> Expr {
        let comp = &self.components[j];
        let sensible = self.temperature.expr() - self.temperature_ref;
        match phase {
            Phase::Liq => comp.cp_liq * sensible,
            Phase::Vap => comp.cp_vap * sensible + comp.dh_vap,
        }
    }

    fn equilibrium_constraints(&self, relation: &Equilibrium, t: usize) -> ConstraintFamily {
        let mut family = ConstraintFamily::new("equilibrium_constraint");
        for (j, comp) in self.components.iter().enumerate() {
            let f_liq = self.flow(Phase::Liq, j).expr();
            let f_vap = self.flow(Phase::Vap, j).expr();
            let body = match relation {
                Equilibrium::VaporFraction(beta) => f_vap.clone() - *beta * (f_liq + f_vap),
                Equilibrium::ConstantK(k) => {
                    f_vap / self.phase_flow(Phase::Vap) - k[j] * (f_liq / self.phase_flow(Phase::Liq))
                }
            };
            let name = format!("{}.equilibrium_constraint[{},{}]", self.label, t, comp.name);
            family.push(ConstraintIndex::TimeComponent(t, j), Constraint::zero(&name, body));
        }
        family
    }

    fn component_index(&self, name: &str) -> Option<usize> {
        self.components.iter().position(|c| c.name == name)
    }

    fn phase_indexed(&self, value: impl Fn(Phase) -> Expr) -> MemberHandle {
        MemberHandle::Indexed(PHASES.iter().map(|&p| (Key::Phase(p), value(p))).collect())
    }

    fn comp_indexed(&self, value: impl Fn(usize) -> Expr) -> MemberHandle {
        MemberHandle::Indexed(
            self.components
                .iter()
                .enumerate()
                .map(|(j, c)| (Key::Comp(c.name.clone()), value(j)))
                .collect(),
        )
    }

    fn phase_comp_indexed(&self, value: impl Fn(Phase, usize) -> Expr) -> MemberHandle {
        let mut entries = Vec::with_capacity(PHASES.len() * self.components.len());
        for &p in &PHASES {
            for (j, c) in self.components.iter().enumerate() {
                entries.push((Key::PhaseComp(p, c.name.clone()), value(p, j)));
            }
        }
        MemberHandle::Indexed(entries)
    }

    fn apply(&self, member: &str, key: Option<&Key>, value: f64) -> PropertyResult<()> {
        let target = match (member, key) {
            ("temperature", None) => &self.temperature,
            ("pressure", None) => &self.pressure,
            ("flow_mol_phase_comp", Some(Key::PhaseComp(p, name))) => {
                let j = self
                    .component_index(name)
                    .ok_or_else(|| PropertyError::UnknownComponent(name.clone()))?;
                self.flow(*p, j)
            }
            ("temperature" | "pressure" | "flow_mol_phase_comp", _) => {
                return Err(PropertyError::InvalidArgument {
                    member: member.to_string(),
                    reason: "key does not match the member's indexing".to_string(),
                });
            }
            _ => {
                return Err(PropertyError::UnknownMember {
                    state: self.label.clone(),
                    member: member.to_string(),
                });
            }
        };

        // Fixed variables keep their specification
        if !target.is_fixed() {
            target.set_value(value);
        }
        Ok(())
    }
}

impl PropertyState for IdealState {
    fn label(&self) -> &str {
        &self.label
    }

    fn temperature(&self) -> &Var {
        &self.temperature
    }

    fn pressure(&self) -> &Var {
        &self.pressure
    }

    fn material_flow_terms(&self, phase: Phase, component: &str) -> Expr {
        match self.component_index(component) {
            Some(j) => self.flow(phase, j).expr(),
            None => Expr::zero(),
        }
    }

    fn enthalpy_flow_terms(&self, phase: Phase) -> Expr {
        Expr::sum(
            (0..self.components.len())
                .map(|j| self.flow(phase, j).expr() * self.enth_mol_phase_comp(phase, j)),
        )
    }

    fn port_members(&self) -> Vec<(String, MemberHandle)> {
        self.port_members
            .iter()
            .filter_map(|name| self.member(name).map(|handle| (name.clone(), handle)))
            .collect()
    }

    fn member(&self, name: &str) -> Option<MemberHandle> {
        let handle = match name {
            "temperature" => MemberHandle::Scalar(self.temperature.expr()),
            "pressure" => MemberHandle::Scalar(self.pressure.expr()),
            "flow_mol" => MemberHandle::Scalar(self.total_flow()),
            "flow_mol_phase" => self.phase_indexed(|p| self.phase_flow(p)),
            "flow_mol_comp" => self.comp_indexed(|j| self.component_flow(j)),
            "flow_mol_phase_comp" => self.phase_comp_indexed(|p, j| self.flow(p, j).expr()),
            "mole_frac_comp" => self.comp_indexed(|j| self.component_flow(j) / self.total_flow()),
            "mole_frac_phase_comp" => {
                self.phase_comp_indexed(|p, j| self.flow(p, j).expr() / self.phase_flow(p))
            }
            "enth_mol" => {
                let total = Expr::sum(PHASES.iter().map(|&p| self.enthalpy_flow_terms(p)));
                MemberHandle::Scalar(total / self.total_flow())
            }
            "enth_mol_phase" => {
                self.phase_indexed(|p| self.enthalpy_flow_terms(p) / self.phase_flow(p))
            }
            _ => return None,
        };
        Some(handle)
    }

    fn state_vars(&self) -> Vec<Var> {
        let mut vars: Vec<Var> = self.flow_liq.iter().chain(&self.flow_vap).cloned().collect();
        vars.push(self.temperature.clone());
        vars.push(self.pressure.clone());
        vars
    }

    fn variables(&self) -> Vec<VarId> {
        self.state_vars().iter().map(Var::id).collect()
    }

    fn constraints(&self) -> Vec<&ConstraintFamily> {
        self.equilibrium.iter().collect()
    }

    fn has_phase_equilibrium(&self) -> bool {
        self.equilibrium.is_some()
    }

    fn is_defined_state(&self) -> bool {
        self.defined_state
    }

    fn initialize(&mut self, args: Option<&StateArgs>, verbosity: u8) -> PropertyResult<()> {
        if let Some(args) = args {
            for (member, key, value) in args.iter() {
                self.apply(member, key, value)?;
            }
        }

        if verbosity > 1 {
            info!(state = %self.label, guesses = args.map_or(0, StateArgs::len), "state initialized");
        } else {
            debug!(state = %self.label, guesses = args.map_or(0, StateArgs::len), "state initialized");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn btx() -> IdealPackage {
        IdealPackage::new(vec![
            ComponentData::new("benzene", 135.0, 82.0, 30_720.0),
            ComponentData::new("toluene", 157.0, 104.0, 33_180.0),
        ])
    }

    fn set_flows(state: &dyn PropertyState, registry: &VariableRegistry, flows: [f64; 4]) {
        // Order: Liq benzene, Liq toluene, Vap benzene, Vap toluene
        let vars = state.state_vars();
        for (var, value) in vars.iter().zip(flows) {
            registry.set(var.id(), value);
        }
    }

    #[test]
    fn test_package_lists() {
        let package = btx();
        assert_eq!(package.phase_list(), &[Phase::Liq, Phase::Vap]);
        assert_eq!(package.component_list().count(), 2);
    }

    #[test]
    fn test_state_flags() {
        let registry = VariableRegistry::new();
        let package = btx();
        let inlet = package.build_state(&registry, "liq_in[0]", 0, &StateBlockArgs::inlet()).unwrap();
        assert!(inlet.is_defined_state());
        assert!(!inlet.has_phase_equilibrium());
        assert!(inlet.constraints().is_empty());

        let outlet = package.build_state(&registry, "out[0]", 0, &StateBlockArgs::outlet()).unwrap();
        assert!(!outlet.is_defined_state());
        assert!(outlet.has_phase_equilibrium());
        assert_eq!(outlet.constraints()[0].len(), 2);
    }

    #[test]
    fn test_derived_members() {
        let registry = VariableRegistry::new();
        let state = btx().build_state(&registry, "s", 0, &StateBlockArgs::inlet()).unwrap();
        set_flows(state.as_ref(), &registry, [1.0, 3.0, 2.0, 2.0]);

        let benzene = Key::Comp("benzene".to_string());
        let flow_comp = state.member("flow_mol_comp").unwrap();
        assert_eq!(flow_comp.get(&benzene).unwrap().eval(&registry), 3.0);

        let flow_phase = state.member("flow_mol_phase").unwrap();
        assert_eq!(flow_phase.get(&Key::Phase(Phase::Liq)).unwrap().eval(&registry), 4.0);

        let total = state.member("flow_mol").unwrap();
        assert_eq!(total.scalar().unwrap().eval(&registry), 8.0);

        let x = state.member("mole_frac_phase_comp").unwrap();
        let x_liq_benzene = Key::PhaseComp(Phase::Liq, "benzene".to_string());
        assert!((x.get(&x_liq_benzene).unwrap().eval(&registry) - 0.25).abs() < 1e-12);

        let z = state.member("mole_frac_comp").unwrap();
        assert!((z.get(&benzene).unwrap().eval(&registry) - 0.375).abs() < 1e-12);

        assert!(state.member("entr_mol").is_none());
    }

    #[test]
    fn test_enthalpy_terms() {
        let registry = VariableRegistry::new();
        let state = btx().build_state(&registry, "s", 0, &StateBlockArgs::inlet()).unwrap();
        set_flows(state.as_ref(), &registry, [1.0, 0.0, 0.0, 2.0]);
        state.temperature().set_value(DEFAULT_TEMPERATURE_REF + 10.0);

        let h_liq = state.enthalpy_flow_terms(Phase::Liq).eval(&registry);
        assert!((h_liq - 1350.0).abs() < 1e-9);

        let h_vap = state.enthalpy_flow_terms(Phase::Vap).eval(&registry);
        assert!((h_vap - 2.0 * (1040.0 + 33_180.0)).abs() < 1e-9);

        let enth_mol = state.member("enth_mol").unwrap();
        let expected = (h_liq + h_vap) / 3.0;
        assert!((enth_mol.scalar().unwrap().eval(&registry) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_temperature_ref_argument() {
        let registry = VariableRegistry::new();
        let mut extra = BTreeMap::new();
        extra.insert("temperature_ref".to_string(), 350.0);
        let args = StateBlockArgs::inlet().with_extra(extra);
        let state = btx().build_state(&registry, "s", 0, &args).unwrap();
        set_flows(state.as_ref(), &registry, [1.0, 1.0, 0.0, 0.0]);
        state.temperature().set_value(350.0);
        assert_eq!(state.enthalpy_flow_terms(Phase::Liq).eval(&registry), 0.0);
    }

    #[test]
    fn test_unknown_argument() {
        let registry = VariableRegistry::new();
        let mut extra = BTreeMap::new();
        extra.insert("flash_type".to_string(), 1.0);
        let args = StateBlockArgs::inlet().with_extra(extra);
        let Err(err) = btx().build_state(&registry, "s", 0, &args) else {
            panic!("unknown package argument was accepted");
        };
        assert_eq!(err, PropertyError::UnknownArgument("flash_type".to_string()));
    }

    #[test]
    fn test_vapor_fraction_equilibrium() {
        let registry = VariableRegistry::new();
        let package = btx().with_equilibrium(Equilibrium::VaporFraction(0.25));
        let state = package.build_state(&registry, "out", 0, &StateBlockArgs::outlet()).unwrap();
        set_flows(state.as_ref(), &registry, [3.0, 6.0, 1.0, 2.0]);
        assert!(state.constraints()[0].max_residual(&registry) < 1e-12);

        set_flows(state.as_ref(), &registry, [1.0, 1.0, 1.0, 1.0]);
        assert!(state.constraints()[0].max_residual(&registry) > 0.1);
    }

    #[test]
    fn test_constant_k_equilibrium() {
        let registry = VariableRegistry::new();
        let package = btx().with_equilibrium(Equilibrium::ConstantK(vec![2.0, 0.5]));
        let state = package.build_state(&registry, "out", 0, &StateBlockArgs::outlet()).unwrap();
        // Rachford-Rice split of an equimolar feed: half vaporized
        set_flows(state.as_ref(), &registry, [1.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0, 1.0 / 3.0]);
        assert!(state.constraints()[0].max_residual(&registry) < 1e-12);
    }

    #[test]
    fn test_constant_k_length_mismatch() {
        let registry = VariableRegistry::new();
        let package = btx().with_equilibrium(Equilibrium::ConstantK(vec![2.0]));
        let result = package.build_state(&registry, "out", 0, &StateBlockArgs::outlet());
        assert!(matches!(result, Err(PropertyError::InvalidArgument { .. })));
    }

    #[test]
    fn test_port_members() {
        let registry = VariableRegistry::new();
        let package = btx().with_port_members(&["flow_mol", "temperature", "no_such_member"]);
        let state = package.build_state(&registry, "s", 0, &StateBlockArgs::inlet()).unwrap();
        let names: Vec<String> = state.port_members().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["flow_mol", "temperature"]);
    }

    #[test]
    fn test_initialize_applies_guesses() {
        let registry = VariableRegistry::new();
        let mut state = btx().build_state(&registry, "s", 0, &StateBlockArgs::inlet()).unwrap();
        state.pressure().fix_at(2.0e5);

        let args = StateArgs::new()
            .with("temperature", 360.0)
            .with("pressure", 1.0e5)
            .with_indexed("flow_mol_phase_comp", Key::PhaseComp(Phase::Vap, "toluene".into()), 4.0);
        state.initialize(Some(&args), 0).unwrap();

        assert_eq!(state.temperature().value(), 360.0);
        // fixed pressure is left alone
        assert_eq!(state.pressure().value(), 2.0e5);
        let flow = state.member("flow_mol_phase_comp").unwrap();
        let key = Key::PhaseComp(Phase::Vap, "toluene".to_string());
        assert_eq!(flow.get(&key).unwrap().eval(&registry), 4.0);
    }

    #[test]
    fn test_initialize_rejects_unknown_member() {
        let registry = VariableRegistry::new();
        let mut state = btx().build_state(&registry, "s", 0, &StateBlockArgs::inlet()).unwrap();

        let args = StateArgs::new().with("entr_mol", 1.0);
        let err = state.initialize(Some(&args), 0).unwrap_err();
        assert!(matches!(err, PropertyError::UnknownMember { .. }));

        let args = StateArgs::new().with_indexed("temperature", Key::Phase(Phase::Liq), 1.0);
        let err = state.initialize(Some(&args), 0).unwrap_err();
        assert!(matches!(err, PropertyError::InvalidArgument { .. }));

        let args = StateArgs::new()
            .with_indexed("flow_mol_phase_comp", Key::PhaseComp(Phase::Liq, "xylene".into()), 1.0);
        let err = state.initialize(Some(&args), 0).unwrap_err();
        assert_eq!(err, PropertyError::UnknownComponent("xylene".to_string()));
    }
}
