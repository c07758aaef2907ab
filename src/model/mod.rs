//! The structured model consumed and produced by the presolve: a list of
//! variable domains, a list of constraints, an optional objective, optional
//! search strategies, and an optional solution hint.

mod constraint;
mod validator;

use std::fmt;

use crate::basic_types::Domain;
use crate::marrow_assert_simple;

pub use constraint::Constraint;
pub use constraint::ConstraintKind;
pub use constraint::LinearConstraint;
pub use validator::validate_model;
pub use validator::InvalidModelError;

/// A signed reference to a model variable.
///
/// A non-negative reference names the variable with that index; the bitwise
/// negation names its arithmetic opposite. For Boolean variables (domain
/// `{0, 1}`) a positive reference reads as "the variable is true" and the
/// negated reference as "the variable is false".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarRef(i32);

impl VarRef {
    pub fn from_index(index: usize) -> VarRef {
        VarRef(index as i32)
    }

    /// The reference to the arithmetic opposite. This is an involution:
    /// `r.negated().negated() == r`.
    pub fn negated(self) -> VarRef {
        VarRef(!self.0)
    }

    pub fn is_positive(self) -> bool {
        self.0 >= 0
    }

    /// The index of the underlying variable.
    pub fn variable(self) -> usize {
        if self.is_positive() {
            self.0 as usize
        } else {
            !self.0 as usize
        }
    }

    /// The positive reference to the same variable.
    pub fn positive(self) -> VarRef {
        if self.is_positive() {
            self
        } else {
            self.negated()
        }
    }
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_positive() {
            write!(f, "x{}", self.variable())
        } else {
            write!(f, "~x{}", self.variable())
        }
    }
}

impl fmt::Debug for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// A linear objective `sum(coeffs[i] * vars[i]) + offset`, to be minimised,
/// with an optional restriction of the objective value (before the offset).
#[derive(Clone, Debug, Default)]
pub struct Objective {
    pub vars: Vec<VarRef>,
    pub coeffs: Vec<i64>,
    pub offset: i64,
    pub domain: Domain,
}

/// How the next decision variable is picked within a [`DecisionStrategy`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VariableSelection {
    #[default]
    ChooseFirst,
    ChooseLowestMin,
    ChooseHighestMax,
    ChooseMinDomainSize,
}

/// How the domain of the chosen variable is split.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValueSelection {
    #[default]
    SelectMinValue,
    SelectMaxValue,
    SelectLowerHalf,
    SelectUpperHalf,
}

/// A per-variable affine view used to preserve a strategy's selection order
/// after variables have been substituted by their affine representative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AffineTransformation {
    pub var: VarRef,
    pub offset: i64,
    pub positive_coeff: i64,
}

/// A user-specified search strategy over a subset of the variables.
#[derive(Clone, Debug, Default)]
pub struct DecisionStrategy {
    pub variables: Vec<VarRef>,
    pub variable_selection: VariableSelection,
    pub value_selection: ValueSelection,
    pub transformations: Vec<AffineTransformation>,
}

/// A (partial) assignment suggested by the user as a starting point.
#[derive(Clone, Debug, Default)]
pub struct SolutionHint {
    pub vars: Vec<VarRef>,
    pub values: Vec<i64>,
}

/// The model: variables with their domains, constraints, and the optional
/// objective / strategies / hint.
#[derive(Clone, Debug, Default)]
pub struct Model {
    pub variables: Vec<Domain>,
    pub constraints: Vec<Constraint>,
    pub objective: Option<Objective>,
    pub search_strategies: Vec<DecisionStrategy>,
    pub solution_hint: Option<SolutionHint>,
}

impl Model {
    /// Adds a variable with the given domain and returns a positive reference
    /// to it.
    pub fn new_variable(&mut self, domain: Domain) -> VarRef {
        marrow_assert_simple!(!domain.is_empty(), "cannot create an empty domain");
        self.variables.push(domain);
        VarRef::from_index(self.variables.len() - 1)
    }

    /// Appends a constraint and returns its index.
    pub fn add_constraint(&mut self, constraint: Constraint) -> usize {
        self.constraints.push(constraint);
        self.constraints.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negation_is_an_involution() {
        for index in [0usize, 1, 17, 4000] {
            let r = VarRef::from_index(index);
            assert_eq!(r.negated().negated(), r);
            assert_eq!(r.negated().variable(), index);
            assert!(!r.negated().is_positive());
        }
    }

    #[test]
    fn positive_ref_of_negated_ref() {
        let r = VarRef::from_index(3).negated();
        assert_eq!(r.positive(), VarRef::from_index(3));
        assert_eq!(r.positive().variable(), 3);
    }
}
