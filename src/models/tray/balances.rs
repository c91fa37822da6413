//! Material, energy and pressure balances of a tray.
//!
//! ```text
//! material_mixing_equations[t, j]:  sum_p (inlets - out) material_flow_terms(p, j) == 0
//! enthalpy_mixing_equations[t]:     sum_p (inlets - out) enthalpy_flow_terms(p) + heat_duty == 0
//! pressure_drop_equation[t]:        P_out == P_vap_in - deltaP
//! ```
//!
//! `heat_duty` (positive = heat added to the tray) and `deltaP` exist only when
//! their configuration flag is set.

use super::TrayConfig;
use crate::constraint::{Constraint, ConstraintFamily, ConstraintIndex};
use crate::expression::Expr;
use crate::properties::{Phase, PropertyState};
use crate::{ComponentSet, Var, VariableRegistry};

/// The property states a tray balances over.
pub(crate) struct BalanceInputs<'a> {
    /// Every inlet role (feed, liquid, vapor), each indexed by time
    pub inlets: Vec<&'a [Box<dyn PropertyState>]>,
    /// The vapor inlet, which sets the tray pressure
    pub vapor_inlet: &'a [Box<dyn PropertyState>],
    /// The mixed outlet, indexed by time
    pub outlet: &'a [Box<dyn PropertyState>],
    pub phases: &'a [Phase],
    pub components: &'a ComponentSet,
}

/// Balance constraints and their optional duty/pressure-drop variables.
#[derive(Debug, Clone)]
pub struct BalanceEquationSet {
    pub(crate) material_mixing_equations: ConstraintFamily,
    pub(crate) enthalpy_mixing_equations: ConstraintFamily,
    pub(crate) pressure_drop_equation: ConstraintFamily,
    pub(crate) heat_duty: Option<Var>,
    pub(crate) delta_p: Option<Var>,
}

impl BalanceEquationSet {
    /// Declares the balances of tray `name`.
    pub(crate) fn build(
        name: &str,
        config: &TrayConfig,
        inputs: &BalanceInputs<'_>,
        registry: &VariableRegistry,
    ) -> Self {
        let heat_duty = config
            .has_heat_transfer
            .then(|| registry.create(format!("{}.heat_duty", name), 0.0));
        let delta_p =
            config.has_pressure_change.then(|| registry.create(format!("{}.deltaP", name), 0.0));

        let mut material = ConstraintFamily::new("material_mixing_equations");
        let mut enthalpy = ConstraintFamily::new("enthalpy_mixing_equations");
        let mut pressure = ConstraintFamily::new("pressure_drop_equation");

        for (t, out) in inputs.outlet.iter().enumerate() {
            for (j, comp) in inputs.components.iter().enumerate() {
                let mut terms = Vec::new();
                for &p in inputs.phases {
                    for inlet in &inputs.inlets {
                        terms.push(inlet[t].material_flow_terms(p, comp));
                    }
                    terms.push(-out.material_flow_terms(p, comp));
                }
                let label = format!("{}.material_mixing_equations[{},{}]", name, t, comp);
                material.push(
                    ConstraintIndex::TimeComponent(t, j),
                    Constraint::zero(&label, Expr::sum(terms)),
                );
            }

            let mut terms = Vec::new();
            for &p in inputs.phases {
                for inlet in &inputs.inlets {
                    terms.push(inlet[t].enthalpy_flow_terms(p));
                }
                terms.push(-out.enthalpy_flow_terms(p));
            }
            if let Some(q) = &heat_duty {
                terms.push(q.expr());
            }
            let label = format!("{}.enthalpy_mixing_equations[{}]", name, t);
            enthalpy.push(ConstraintIndex::Time(t), Constraint::zero(&label, Expr::sum(terms)));

            let mut p_in = inputs.vapor_inlet[t].pressure().expr();
            if let Some(dp) = &delta_p {
                p_in = p_in - dp.expr();
            }
            let label = format!("{}.pressure_drop_equation[{}]", name, t);
            pressure.push(
                ConstraintIndex::Time(t),
                Constraint::equality(&label, out.pressure().expr(), p_in),
            );
        }

        BalanceEquationSet {
            material_mixing_equations: material,
            enthalpy_mixing_equations: enthalpy,
            pressure_drop_equation: pressure,
            heat_duty,
            delta_p,
        }
    }

    /// Component material balances, indexed by (time, component).
    pub fn material_mixing_equations(&self) -> &ConstraintFamily {
        &self.material_mixing_equations
    }

    /// Energy balances, indexed by time.
    pub fn enthalpy_mixing_equations(&self) -> &ConstraintFamily {
        &self.enthalpy_mixing_equations
    }

    /// Pressure balances, indexed by time.
    pub fn pressure_drop_equation(&self) -> &ConstraintFamily {
        &self.pressure_drop_equation
    }

    /// Heat duty, present only with heat transfer.
    pub fn heat_duty(&self) -> Option<&Var> {
        self.heat_duty.as_ref()
    }

    /// Pressure drop, present only with pressure change.
    pub fn delta_p(&self) -> Option<&Var> {
        self.delta_p.as_ref()
    }

    /// The three families in declaration order.
    pub(crate) fn families(&self) -> [&ConstraintFamily; 3] {
        [
            &self.material_mixing_equations,
            &self.enthalpy_mixing_equations,
            &self.pressure_drop_equation,
        ]
    }
}
