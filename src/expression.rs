//! Algebraic expressions over registry variables.
//!
//! Balance equations, property relations and synthesized port members are
//! all [`Expr`] trees. An expression never owns variable values; it refers to
//! them by [`VarId`] and is evaluated against a [`VariableRegistry`].
//!
//! Expressions are evaluated generically over a [`Scalar`], which is
//! implemented for `f64` and, with the `autodiff` feature, for
//! `num_dual::Dual64` so Jacobians can be computed exactly.
//!
//! # Example
//!
//! ```
//! use stagewise::{Expr, VariableRegistry};
//!
//! let registry = VariableRegistry::new();
//! let flow = registry.create("flow", 8.0);
//! let sf = registry.create("sf", 0.25);
//!
//! // Main outlet share after a side draw
//! let outlet = flow.expr() * (1.0 - sf.expr());
//! assert_eq!(outlet.eval(&registry), 6.0);
//! ```

use crate::{VarId, VariableRegistry};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Numeric type an expression can be evaluated in.
///
/// | Type | Purpose |
/// |------|---------|
/// | `f64` | Residual evaluation |
/// | `Dual64` | Residual plus one directional derivative (`autodiff`) |
pub trait Scalar:
    Clone
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    /// Lifts a constant into the scalar type.
    fn from_f64(value: f64) -> Self;
}

impl Scalar for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }
}

#[cfg(feature = "autodiff")]
impl Scalar for num_dual::Dual64 {
    fn from_f64(value: f64) -> Self {
        num_dual::Dual64::from(value)
    }
}

/// An algebraic expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A numeric constant
    Const(f64),
    /// A registry variable
    Var(VarId),
    /// Sum of terms
    Sum(Vec<Expr>),
    /// Product of two factors
    Product(Box<Expr>, Box<Expr>),
    /// Quotient of numerator and denominator
    Quotient(Box<Expr>, Box<Expr>),
    /// Negation
    Neg(Box<Expr>),
}

impl Expr {
    /// The constant zero.
    pub fn zero() -> Self {
        Expr::Const(0.0)
    }

    /// A numeric constant.
    pub fn constant(value: f64) -> Self {
        Expr::Const(value)
    }

    /// A variable reference.
    pub fn var(id: VarId) -> Self {
        Expr::Var(id)
    }

    /// Sums an iterator of expressions into one flat sum.
    ///
    /// An empty iterator yields the constant zero.
    pub fn sum<I: IntoIterator<Item = Expr>>(terms: I) -> Self {
        let mut flat = Vec::new();
        for term in terms {
            match term {
                Expr::Sum(inner) => flat.extend(inner),
                Expr::Const(c) if c == 0.0 => {}
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Expr::zero(),
            1 => flat.pop().unwrap_or_else(Expr::zero),
            _ => Expr::Sum(flat),
        }
    }

    /// Evaluates the expression with current registry values.
    pub fn eval(&self, registry: &VariableRegistry) -> f64 {
        self.eval_with(&|id| registry.get(id))
    }

    /// Evaluates the expression with an arbitrary variable lookup.
    pub fn eval_with<S: Scalar>(&self, lookup: &dyn Fn(VarId) -> S) -> S {
        match self {
            Expr::Const(c) => S::from_f64(*c),
            Expr::Var(id) => lookup(*id),
            Expr::Sum(terms) => {
                terms.iter().fold(S::from_f64(0.0), |acc, term| acc + term.eval_with(lookup))
            }
            Expr::Product(a, b) => a.eval_with(lookup) * b.eval_with(lookup),
            Expr::Quotient(a, b) => a.eval_with(lookup) / b.eval_with(lookup),
            Expr::Neg(a) => -a.eval_with(lookup),
        }
    }

    /// Adds every variable referenced by the expression to `out`.
    pub fn collect_variables(&self, out: &mut BTreeSet<VarId>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(id) => {
                out.insert(*id);
            }
            Expr::Sum(terms) => terms.iter().for_each(|t| t.collect_variables(out)),
            Expr::Product(a, b) | Expr::Quotient(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            Expr::Neg(a) => a.collect_variables(out),
        }
    }

    /// Variables referenced by the expression, in id order.
    pub fn variables(&self) -> BTreeSet<VarId> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    /// Returns the constant value if the expression is a bare constant.
    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    /// Returns the variable id if the expression is a bare variable.
    pub fn as_var(&self) -> Option<VarId> {
        match self {
            Expr::Var(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Var(id) => write!(f, "v{}", id.0),
            Expr::Sum(terms) => {
                write!(f, "(")?;
                for (i, term) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    write!(f, "{}", term)?;
                }
                write!(f, ")")
            }
            Expr::Product(a, b) => write!(f, "{}*{}", a, b),
            Expr::Quotient(a, b) => write!(f, "{}/{}", a, b),
            Expr::Neg(a) => write!(f, "-{}", a),
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

impl From<VarId> for Expr {
    fn from(id: VarId) -> Self {
        Expr::Var(id)
    }
}

impl From<&crate::Var> for Expr {
    fn from(var: &crate::Var) -> Self {
        Expr::Var(var.id())
    }
}

impl Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::sum([self, rhs])
    }
}

impl Add<f64> for Expr {
    type Output = Expr;

    fn add(self, rhs: f64) -> Expr {
        Expr::sum([self, Expr::Const(rhs)])
    }
}

impl Add<Expr> for f64 {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::sum([Expr::Const(self), rhs])
    }
}

impl Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::sum([self, -rhs])
    }
}

impl Sub<f64> for Expr {
    type Output = Expr;

    fn sub(self, rhs: f64) -> Expr {
        Expr::sum([self, Expr::Const(-rhs)])
    }
}

impl Sub<Expr> for f64 {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::sum([Expr::Const(self), -rhs])
    }
}

impl Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        match (self.as_constant(), rhs.as_constant()) {
            (Some(a), Some(b)) => Expr::Const(a * b),
            (Some(a), None) if a == 1.0 => rhs,
            (None, Some(b)) if b == 1.0 => self,
            _ => Expr::Product(Box::new(self), Box::new(rhs)),
        }
    }
}

impl Mul<f64> for Expr {
    type Output = Expr;

    fn mul(self, rhs: f64) -> Expr {
        self * Expr::Const(rhs)
    }
}

impl Mul<Expr> for f64 {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::Const(self) * rhs
    }
}

impl Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        Expr::Quotient(Box::new(self), Box::new(rhs))
    }
}

impl Div<f64> for Expr {
    type Output = Expr;

    fn div(self, rhs: f64) -> Expr {
        Expr::Quotient(Box::new(self), Box::new(Expr::Const(rhs)))
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        match self {
            Expr::Const(c) => Expr::Const(-c),
            Expr::Neg(inner) => *inner,
            other => Expr::Neg(Box::new(other)),
        }
    }
}
