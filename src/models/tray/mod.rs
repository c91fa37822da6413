//! Distillation tray.
//!
//! A tray mixes a liquid inlet from the tray above, a vapor inlet from the
//! tray below and, on a feed tray, an external feed into one outlet state in
//! phase equilibrium. The outlet's liquid and vapor phases leave through
//! `liq_out` and `vap_out`, optionally with part of each phase withdrawn
//! through a side draw.
//!
//! ```text
//!              liq_in   vap_out
//!                 |        ^
//!                 v        |
//!   feed --> [    properties_out    ] --> vap_side_draw
//!                 |        ^          --> liq_side_draw
//!                 v        |
//!             liq_out   vap_in
//! ```
//!
//! Building a tray declares its variables, constraints and ports. Values are
//! found by [`Tray::initialize`] followed by a flowsheet-level solve.

mod balances;
mod config;
mod initialize;
mod split;

pub use balances::BalanceEquationSet;
pub use config::TrayConfig;
pub use initialize::{InitArgs, InitReport, Stage, StageReport};
pub use split::{MemberKind, ResolveError, SplitFraction, classify};

use crate::constraint::{ConstraintFamily, EquationModel};
use crate::port::{HasPorts, Linkage, Port, PortMember};
use crate::properties::{
    MemberHandle, Phase, PropertyError, PropertyPackage, PropertyState, StateBlockArgs,
};
use crate::{TimeSet, Var, VariableRegistry};
use balances::BalanceInputs;
use split::SplitResolver;
use std::collections::BTreeMap;
use tracing::{Span, debug, info_span};

/// Initial value of a side draw split fraction.
const DEFAULT_SPLIT_FRACTION: f64 = 0.01;

/// Result type for tray operations
pub type TrayResult<T> = Result<T, TrayError>;

/// Errors raised while building or initializing a tray.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrayError {
    /// A configured side draw split fraction is free at initialization
    #[error("Side draw split fraction '{0}' must be fixed before initialization")]
    UnfixedSplitFraction(String),
    /// A port could not be built from the outlet state
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The property package rejected a request
    #[error(transparent)]
    Property(#[from] PropertyError),
    /// No port with this name exists on the tray
    #[error("Tray has no port named '{0}'")]
    UnknownPort(String),
}

/// One distillation tray of an equation-oriented flowsheet.
///
/// # Examples
///
/// ```
/// use stagewise::{HasPorts, TimeSet, VariableRegistry};
/// use stagewise::models::{Tray, TrayConfig};
/// use stagewise::properties::ideal::{ComponentData, IdealPackage};
///
/// let registry = VariableRegistry::new();
/// let package = IdealPackage::new(vec![ComponentData::new("water", 75.3, 33.6, 40_650.0)]);
/// let tray = Tray::build(
///     "feed_tray",
///     TrayConfig::new().feed_tray().with_heat_transfer(),
///     &package,
///     &TimeSet::steady(),
///     &registry,
/// )
/// .unwrap();
///
/// assert_eq!(tray.port_count(), (3, 2));
/// assert_eq!(tray.heat_duty().unwrap().value(), 0.0);
/// ```
pub struct Tray {
    name: String,
    config: TrayConfig,
    span: Span,
    registry: VariableRegistry,
    time: TimeSet,
    properties_in_feed: Option<Vec<Box<dyn PropertyState>>>,
    properties_in_liq: Vec<Box<dyn PropertyState>>,
    properties_in_vap: Vec<Box<dyn PropertyState>>,
    properties_out: Vec<Box<dyn PropertyState>>,
    balances: BalanceEquationSet,
    liq_side_sf: Option<Var>,
    vap_side_sf: Option<Var>,
    inlet_ports: Vec<Port>,
    outlet_ports: Vec<Port>,
    expressions: BTreeMap<String, Vec<MemberHandle>>,
}

impl Tray {
    /// Declares a tray's states, balances and ports.
    ///
    /// Inlet states are built without phase equilibrium as defined states;
    /// the outlet state is built with phase equilibrium. Every state receives
    /// `config.property_package_args`.
    pub fn build(
        name: &str,
        config: TrayConfig,
        package: &dyn PropertyPackage,
        time: &TimeSet,
        registry: &VariableRegistry,
    ) -> TrayResult<Self> {
        let span = info_span!("tray", name = %name);
        let _entered = span.clone().entered();

        let extra = config.property_package_args.clone();
        let inlet_args = StateBlockArgs::inlet().with_extra(extra.clone());
        let outlet_args = StateBlockArgs::outlet().with_extra(extra);
        let states = |role: &str, args: &StateBlockArgs| {
            build_states(package, registry, &format!("{}.{}", name, role), time, args)
        };

        let properties_in_feed = if config.is_feed_tray {
            Some(states("properties_in_feed", &inlet_args)?)
        } else {
            None
        };
        let properties_in_liq = states("properties_in_liq", &inlet_args)?;
        let properties_in_vap = states("properties_in_vap", &inlet_args)?;
        let properties_out = states("properties_out", &outlet_args)?;
        debug!(time_points = time.len(), feed = config.is_feed_tray, "built property states");

        let mut inlets: Vec<&[Box<dyn PropertyState>]> = Vec::new();
        if let Some(feed) = &properties_in_feed {
            inlets.push(feed);
        }
        inlets.push(&properties_in_liq);
        inlets.push(&properties_in_vap);
        let inputs = BalanceInputs {
            inlets,
            vapor_inlet: &properties_in_vap,
            outlet: &properties_out,
            phases: package.phase_list(),
            components: package.component_list(),
        };
        let balances = BalanceEquationSet::build(name, &config, &inputs, registry);
        debug!(
            material = balances.material_mixing_equations().len(),
            heat_duty = balances.heat_duty().is_some(),
            delta_p = balances.delta_p().is_some(),
            "declared balances"
        );

        let mut inlet_ports = Vec::new();
        if let Some(feed) = &properties_in_feed {
            inlet_ports.push(pass_through("feed", feed));
        }
        inlet_ports.push(pass_through("liq_in", &properties_in_liq));
        inlet_ports.push(pass_through("vap_in", &properties_in_vap));

        let split_fraction = |enabled: bool, var: &str| {
            enabled.then(|| registry.create(format!("{}.{}", name, var), DEFAULT_SPLIT_FRACTION))
        };
        let liq_side_sf = split_fraction(config.has_liquid_side_draw, "liq_side_sf");
        let vap_side_sf = split_fraction(config.has_vapor_side_draw, "vap_side_sf");

        let mut expressions = BTreeMap::new();
        let mut outlet_ports = Vec::new();
        {
            let mut resolver = SplitResolver::new(&properties_out, &mut expressions)?;
            let outlets = [
                (Phase::Liq, "liq_side_draw", "liq_out", &liq_side_sf),
                (Phase::Vap, "vap_side_draw", "vap_out", &vap_side_sf),
            ];
            for (phase, draw, main, sf) in outlets {
                match sf {
                    Some(sf) => {
                        let id = sf.id();
                        outlet_ports.push(resolver.resolve_port(
                            draw,
                            phase,
                            SplitFraction::Fraction(id),
                        )?);
                        outlet_ports.push(resolver.resolve_port(
                            main,
                            phase,
                            SplitFraction::Complement(id),
                        )?);
                    }
                    None => {
                        outlet_ports.push(resolver.resolve_port(main, phase, SplitFraction::Whole)?)
                    }
                }
            }
        }
        debug!(
            inlets = inlet_ports.len(),
            outlets = outlet_ports.len(),
            expressions = expressions.len(),
            "declared ports"
        );

        Ok(Tray {
            name: name.to_string(),
            config,
            span: span.clone(),
            registry: registry.clone(),
            time: time.clone(),
            properties_in_feed,
            properties_in_liq,
            properties_in_vap,
            properties_out,
            balances,
            liq_side_sf,
            vap_side_sf,
            inlet_ports,
            outlet_ports,
            expressions,
        })
    }

    /// Unit name, the prefix of every variable the tray creates.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the tray was built with.
    pub fn config(&self) -> &TrayConfig {
        &self.config
    }

    /// Time points the balances are indexed over.
    pub fn time(&self) -> &TimeSet {
        &self.time
    }

    /// Registry holding the tray's variables.
    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    /// The tray's logging span.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Looks up any port, inlet or outlet, by name.
    pub fn port(&self, name: &str) -> Option<&Port> {
        self.inlet_ports.iter().chain(&self.outlet_ports).find(|p| p.name == name)
    }

    /// Like [`Tray::port`], but a missing port is an error.
    pub fn require_port(&self, name: &str) -> TrayResult<&Port> {
        self.port(name).ok_or_else(|| TrayError::UnknownPort(name.to_string()))
    }

    /// `feed` (feed trays only), `liq_in`, `vap_in`.
    pub fn inlet_ports(&self) -> &[Port] {
        &self.inlet_ports
    }

    /// Outlet ports, liquid first, each side draw before its main outlet.
    pub fn outlet_ports(&self) -> &[Port] {
        &self.outlet_ports
    }

    /// Heat duty, present only with heat transfer.
    pub fn heat_duty(&self) -> Option<&Var> {
        self.balances.heat_duty()
    }

    /// Pressure drop, present only with pressure change.
    pub fn delta_p(&self) -> Option<&Var> {
        self.balances.delta_p()
    }

    /// Liquid side draw fraction, present only with a liquid side draw.
    pub fn liq_side_sf(&self) -> Option<&Var> {
        self.liq_side_sf.as_ref()
    }

    /// Vapor side draw fraction, present only with a vapor side draw.
    pub fn vap_side_sf(&self) -> Option<&Var> {
        self.vap_side_sf.as_ref()
    }

    /// Balance families and their optional variables.
    pub fn balances(&self) -> &BalanceEquationSet {
        &self.balances
    }

    /// Component balances, indexed `[t, j]`.
    pub fn material_mixing_equations(&self) -> &ConstraintFamily {
        self.balances.material_mixing_equations()
    }

    /// Energy balances, indexed `[t]`.
    pub fn enthalpy_mixing_equations(&self) -> &ConstraintFamily {
        self.balances.enthalpy_mixing_equations()
    }

    /// Pressure balances, indexed `[t]`.
    pub fn pressure_drop_equation(&self) -> &ConstraintFamily {
        self.balances.pressure_drop_equation()
    }

    /// Mixed outlet state at time position `t`.
    pub fn properties_out(&self, t: usize) -> Option<&dyn PropertyState> {
        self.properties_out.get(t).map(|s| s.as_ref())
    }

    /// Liquid inlet state at time position `t`.
    pub fn properties_in_liq(&self, t: usize) -> Option<&dyn PropertyState> {
        self.properties_in_liq.get(t).map(|s| s.as_ref())
    }

    /// Vapor inlet state at time position `t`.
    pub fn properties_in_vap(&self, t: usize) -> Option<&dyn PropertyState> {
        self.properties_in_vap.get(t).map(|s| s.as_ref())
    }

    /// Feed state at time position `t`; `None` on a non-feed tray.
    pub fn properties_in_feed(&self, t: usize) -> Option<&dyn PropertyState> {
        self.properties_in_feed.as_ref()?.get(t).map(|s| s.as_ref())
    }

    /// A synthesized port expression such as `e_flow_liq_out`, one handle per
    /// time point.
    pub fn expression(&self, name: &str) -> Option<&[MemberHandle]> {
        self.expressions.get(name).map(Vec::as_slice)
    }

    /// Names of all synthesized port expressions.
    pub fn expression_names(&self) -> Vec<&str> {
        self.expressions.keys().map(String::as_str).collect()
    }

    fn all_states(&self) -> impl Iterator<Item = &Box<dyn PropertyState>> {
        self.properties_in_feed
            .iter()
            .flatten()
            .chain(&self.properties_in_liq)
            .chain(&self.properties_in_vap)
            .chain(&self.properties_out)
    }
}

impl EquationModel for Tray {
    fn name(&self) -> &str {
        &self.name
    }

    fn constraint_families(&self) -> Vec<&ConstraintFamily> {
        let mut families: Vec<&ConstraintFamily> = self.balances.families().to_vec();
        for state in self.all_states() {
            families.extend(state.constraints());
        }
        families
    }
}

impl HasPorts for Tray {
    fn input_ports(&self) -> Vec<&Port> {
        self.inlet_ports.iter().collect()
    }

    fn output_ports(&self) -> Vec<&Port> {
        self.outlet_ports.iter().collect()
    }
}

fn build_states(
    package: &dyn PropertyPackage,
    registry: &VariableRegistry,
    label: &str,
    time: &TimeSet,
    args: &StateBlockArgs,
) -> TrayResult<Vec<Box<dyn PropertyState>>> {
    time.indices()
        .map(|t| {
            package
                .build_state(registry, &format!("{}[{}]", label, t), t, args)
                .map_err(TrayError::from)
        })
        .collect()
}

/// An inlet port sharing the state's own members.
fn pass_through(name: &str, states: &[Box<dyn PropertyState>]) -> Port {
    let mut port = Port::input(name);
    let declared: Vec<Vec<(String, MemberHandle)>> =
        states.iter().map(|s| s.port_members()).collect();
    if let Some(first) = declared.first() {
        for (k, (member, _)) in first.iter().enumerate() {
            let values = declared.iter().filter_map(|d| d.get(k)).map(|(_, h)| h.clone()).collect();
            port.add(PortMember::new(member, Linkage::Reference, values));
        }
    }
    port
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::degrees_of_freedom;
    use crate::properties::Key;
    use crate::properties::ideal::{ComponentData, Equilibrium, IdealPackage};

    fn package() -> IdealPackage {
        IdealPackage::new(vec![
            ComponentData::new("benzene", 135.0, 82.0, 30_720.0),
            ComponentData::new("toluene", 157.0, 104.0, 33_180.0),
        ])
        .with_equilibrium(Equilibrium::ConstantK(vec![2.5, 0.9]))
    }

    fn build(config: TrayConfig, registry: &VariableRegistry) -> Tray {
        Tray::build("tray", config, &package(), &TimeSet::steady(), registry).unwrap()
    }

    fn names(ports: &[Port]) -> Vec<&str> {
        ports.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_plain_tray_ports() {
        let registry = VariableRegistry::new();
        let tray = build(TrayConfig::new(), &registry);
        assert_eq!(names(tray.inlet_ports()), vec!["liq_in", "vap_in"]);
        assert_eq!(names(tray.outlet_ports()), vec!["liq_out", "vap_out"]);
        assert!(tray.properties_in_feed(0).is_none());
        assert!(tray.liq_side_sf().is_none() && tray.vap_side_sf().is_none());
    }

    #[test]
    fn test_feed_tray_ports() {
        let registry = VariableRegistry::new();
        let tray = build(TrayConfig::new().feed_tray(), &registry);
        assert_eq!(names(tray.inlet_ports()), vec!["feed", "liq_in", "vap_in"]);
        assert!(tray.properties_in_feed(0).is_some());
        assert_eq!(tray.port_count(), (3, 2));
    }

    #[test]
    fn test_side_draw_ports_in_order() {
        let registry = VariableRegistry::new();
        let config = TrayConfig::new().with_liquid_side_draw().with_vapor_side_draw();
        let tray = build(config, &registry);
        assert_eq!(
            names(tray.outlet_ports()),
            vec!["liq_side_draw", "liq_out", "vap_side_draw", "vap_out"]
        );
        assert_eq!(tray.liq_side_sf().unwrap().value(), 0.01);
        assert!(!tray.vap_side_sf().unwrap().is_fixed());
    }

    #[test]
    fn test_accessors_reflect_config() {
        let registry = VariableRegistry::new();
        let config = TrayConfig::new()
            .with_vapor_side_draw()
            .with_heat_transfer()
            .with_pressure_change();
        let tray = build(config, &registry);

        assert_eq!(tray.name(), "tray");
        assert!(tray.config().has_vapor_side_draw && !tray.config().has_liquid_side_draw);
        assert_eq!(tray.time().len(), 1);
        assert_eq!(tray.registry().len(), registry.len());
        assert_eq!(tray.heat_duty().unwrap().name(), "tray.heat_duty");
        assert_eq!(tray.delta_p().unwrap().name(), "tray.deltaP");
        assert!(tray.liq_side_sf().is_none());
        assert_eq!(tray.vap_side_sf().unwrap().name(), "tray.vap_side_sf");
        assert_eq!(tray.balances().heat_duty().map(Var::id), tray.heat_duty().map(Var::id));
        assert_eq!(tray.material_mixing_equations().len(), 2);
        assert_eq!(tray.enthalpy_mixing_equations().len(), 1);
        assert_eq!(tray.pressure_drop_equation().len(), 1);
        assert!(tray.properties_in_liq(0).is_some() && tray.properties_in_liq(1).is_none());
        assert!(tray.properties_in_vap(0).is_some() && tray.properties_in_vap(1).is_none());
    }

    #[test]
    fn test_unknown_port() {
        let registry = VariableRegistry::new();
        let tray = build(TrayConfig::new(), &registry);
        assert!(tray.require_port("vap_in").is_ok());
        assert_eq!(
            tray.require_port("liq_side_draw").unwrap_err(),
            TrayError::UnknownPort("liq_side_draw".to_string())
        );
    }

    #[test]
    fn test_inlet_port_references_state() {
        let registry = VariableRegistry::new();
        let tray = build(TrayConfig::new(), &registry);
        let state = tray.properties_in_liq(0).unwrap();
        state.temperature().set_value(351.0);

        let port = tray.port("liq_in").unwrap();
        assert!(port.iter().all(|m| !m.is_expression()));
        assert_eq!(port.value("temperature", 0, None, &registry), Some(351.0));
    }

    #[test]
    fn test_split_flows_and_shared_members() {
        let registry = VariableRegistry::new();
        let tray = build(TrayConfig::new().with_liquid_side_draw(), &registry);
        let out = tray.properties_out(0).unwrap();
        // Liq b, Liq t, Vap b, Vap t
        for (var, value) in out.state_vars().iter().zip([2.0, 6.0, 1.0, 1.0]) {
            var.set_value(value);
        }
        tray.liq_side_sf().unwrap().fix_at(0.25);

        let draw = tray.port("liq_side_draw").unwrap();
        let main = tray.port("liq_out").unwrap();
        let toluene = Key::Comp("toluene".to_string());
        let f_draw = draw.value("flow_mol_comp", 0, Some(&toluene), &registry).unwrap();
        let f_main = main.value("flow_mol_comp", 0, Some(&toluene), &registry).unwrap();
        assert!((f_draw - 1.5).abs() < 1e-12);
        assert!((f_main - 4.5).abs() < 1e-12);

        let vap = tray.port("vap_out").unwrap();
        let f_vap = vap.value("flow_mol_comp", 0, Some(&toluene), &registry).unwrap();
        assert!((f_vap - 1.0).abs() < 1e-12);

        for member in ["temperature", "pressure", "mole_frac_comp", "enth_mol"] {
            assert_eq!(draw.get(member).unwrap().at(0), main.get(member).unwrap().at(0));
        }
    }

    #[test]
    fn test_expressions_registered_per_port() {
        let registry = VariableRegistry::new();
        let tray = build(TrayConfig::new().with_vapor_side_draw(), &registry);
        for port in ["liq_out", "vap_side_draw", "vap_out"] {
            assert!(tray.expression(&format!("e_flow_{}", port)).is_some());
            assert!(tray.expression(&format!("e_mole_frac_{}", port)).is_some());
            assert!(tray.expression(&format!("e_enth_{}", port)).is_some());
        }
        assert_eq!(tray.expression_names().len(), 9);
    }

    #[test]
    fn test_families_include_equilibrium() {
        let registry = VariableRegistry::new();
        let tray = build(TrayConfig::new(), &registry);
        let families: Vec<&str> = tray.constraint_families().iter().map(|f| f.name()).collect();
        assert_eq!(
            families,
            vec![
                "material_mixing_equations",
                "enthalpy_mixing_equations",
                "pressure_drop_equation",
                "equilibrium_constraint"
            ]
        );
    }

    #[test]
    fn test_square_once_inlets_fixed() {
        let registry = VariableRegistry::new();
        let tray = build(TrayConfig::new(), &registry);
        for t in 0..tray.time().len() {
            for state in [tray.properties_in_liq(t), tray.properties_in_vap(t)] {
                for var in state.unwrap().state_vars() {
                    var.fix();
                }
            }
        }
        assert_eq!(degrees_of_freedom(&tray, &registry), 0);
    }

    #[test]
    fn test_multi_time_states() {
        let registry = VariableRegistry::new();
        let time = TimeSet::new(vec![0.0, 1.0, 2.0]);
        let tray = Tray::build("tray", TrayConfig::new(), &package(), &time, &registry).unwrap();
        assert!(tray.properties_out(2).is_some());
        assert!(tray.properties_out(3).is_none());
        assert_eq!(tray.pressure_drop_equation().len(), 3);
        assert_eq!(tray.port("vap_out").unwrap().get("temperature").unwrap().time_len(), 3);
    }

    #[test]
    fn test_package_args_forwarded() {
        let registry = VariableRegistry::new();
        let config = TrayConfig::new().with_package_arg("phase_count", 3.0);
        let err = Tray::build("tray", config, &package(), &TimeSet::steady(), &registry);
        assert!(matches!(err, Err(TrayError::Property(PropertyError::UnknownArgument(_)))));
    }
}
