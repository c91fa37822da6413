//! Exact Jacobians of constraint residuals using `num-dual`.
//!
//! Constraint bodies are [`Expr`](crate::Expr) trees evaluated generically
//! over a [`Scalar`](crate::Scalar). Evaluating every active body in `Dual64`
//! with one unknown seeded gives one Jacobian column.
//!
//! # Example
//!
//! ```
//! use stagewise::{Constraint, VariableRegistry};
//! use stagewise::autodiff::constraint_jacobian;
//!
//! let registry = VariableRegistry::new();
//! let x = registry.create("x", 2.0);
//! let y = registry.create("y", 3.0);
//! let c = Constraint::zero("xy", x.expr() * y.expr());
//!
//! let jac = constraint_jacobian(&[&c], &[x.id(), y.id()], &registry);
//! assert_eq!(jac[(0, 0)], 3.0);
//! assert_eq!(jac[(0, 1)], 2.0);
//! ```

use crate::constraint::Constraint;
use crate::{VarId, VariableRegistry};
use nalgebra::DMatrix;
use num_dual::*;

/// Jacobian of constraint residuals with respect to `unknowns`.
///
/// Rows follow `constraints`, columns follow `unknowns`. Variables outside
/// `unknowns` are held at their registry values.
pub fn constraint_jacobian(
    constraints: &[&Constraint],
    unknowns: &[VarId],
    registry: &VariableRegistry,
) -> DMatrix<f64> {
    let mut jac = DMatrix::zeros(constraints.len(), unknowns.len());

    for (k, seeded) in unknowns.iter().enumerate() {
        let lookup = |id: VarId| {
            let value = Dual64::from(registry.get(id));
            if id == *seeded { value.derivative() } else { value }
        };
        for (i, constraint) in constraints.iter().enumerate() {
            jac[(i, k)] = constraint.body().eval_with(&lookup).eps;
        }
    }

    jac
}

/// Value and gradient of one residual with respect to `unknowns`.
pub fn residual_gradient(
    constraint: &Constraint,
    unknowns: &[VarId],
    registry: &VariableRegistry,
) -> (f64, Vec<f64>) {
    let jac = constraint_jacobian(&[constraint], unknowns, registry);
    let value = constraint.residual(registry);
    (value, jac.row(0).iter().copied().collect())
}
