use crate::basic_types::Domain;
use crate::model::VarRef;

/// A linear constraint `sum(coeffs[i] * vars[i]) in rhs`.
#[derive(Clone, Debug, Default)]
pub struct LinearConstraint {
    pub vars: Vec<VarRef>,
    pub coeffs: Vec<i64>,
    pub rhs: Domain,
    /// Set when the constraint was added to materialize an affine relation
    /// between two variables. The linear rewriter must not substitute the
    /// representative back into such a constraint, nor treat its variables as
    /// singleton-removable, since that would unravel the relation.
    pub defining: bool,
}

impl LinearConstraint {
    pub fn new(vars: Vec<VarRef>, coeffs: Vec<i64>, rhs: Domain) -> LinearConstraint {
        LinearConstraint {
            vars,
            coeffs,
            rhs,
            defining: false,
        }
    }
}

impl From<LinearConstraint> for ConstraintKind {
    fn from(linear: LinearConstraint) -> ConstraintKind {
        ConstraintKind::Linear(linear)
    }
}

/// The tagged union of constraint kinds. A cleared constraint keeps its slot
/// as [`ConstraintKind::Empty`] until the final compaction.
#[derive(Clone, Debug, Default)]
pub enum ConstraintKind {
    #[default]
    Empty,
    /// At least one literal is true.
    BoolOr { literals: Vec<VarRef> },
    /// All literals are true (given the enforcement literals).
    BoolAnd { literals: Vec<VarRef> },
    /// At most one literal is true.
    AtMostOne { literals: Vec<VarRef> },
    /// `target = max(vars)`.
    IntMax { target: VarRef, vars: Vec<VarRef> },
    /// `target = min(vars)`.
    IntMin { target: VarRef, vars: Vec<VarRef> },
    /// `target = product(vars)`.
    IntProd { target: VarRef, vars: Vec<VarRef> },
    /// `target = numerator / denominator` (integer division).
    IntDiv {
        target: VarRef,
        numerator: VarRef,
        denominator: VarRef,
    },
    Linear(LinearConstraint),
    /// `vars[index] = target`.
    Element {
        index: VarRef,
        target: VarRef,
        vars: Vec<VarRef>,
    },
    /// The tuple of variables is one of (`negated = false`), or none of
    /// (`negated = true`), the listed rows.
    Table {
        vars: Vec<VarRef>,
        tuples: Vec<Vec<i64>>,
        negated: bool,
    },
    AllDifferent { vars: Vec<VarRef> },
    /// `start + size = end`. Referenced by index from scheduling constraints.
    Interval {
        start: VarRef,
        size: VarRef,
        end: VarRef,
    },
    /// The given intervals (constraint indices) are pairwise disjoint.
    NoOverlap { intervals: Vec<usize> },
    /// At no point in time may the summed demand of the intervals running at
    /// that time exceed the capacity.
    Cumulative {
        intervals: Vec<usize>,
        demands: Vec<VarRef>,
        capacity: VarRef,
    },
    /// The true arc literals form a circuit over all non-isolated nodes.
    Circuit {
        tails: Vec<usize>,
        heads: Vec<usize>,
        literals: Vec<VarRef>,
    },
}

/// A constraint: a kind plus the enforcement literals under which it applies.
/// With an empty enforcement list the constraint always applies.
#[derive(Clone, Debug, Default)]
pub struct Constraint {
    pub enforcement: Vec<VarRef>,
    pub kind: ConstraintKind,
}

impl Constraint {
    pub fn unenforced(kind: ConstraintKind) -> Constraint {
        Constraint {
            enforcement: vec![],
            kind,
        }
    }

    pub fn enforced(enforcement: Vec<VarRef>, kind: ConstraintKind) -> Constraint {
        Constraint { enforcement, kind }
    }

    pub fn empty() -> Constraint {
        Constraint::default()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, ConstraintKind::Empty)
    }

    /// Clears the constraint, leaving an empty slot.
    pub fn clear(&mut self) {
        *self = Constraint::empty();
    }

    pub fn has_enforcement_literal(&self) -> bool {
        !self.enforcement.is_empty()
    }

    /// Applies `f` to every reference that is used as an integer variable.
    pub fn for_each_variable_ref(&mut self, mut f: impl FnMut(&mut VarRef)) {
        match &mut self.kind {
            ConstraintKind::Empty
            | ConstraintKind::BoolOr { .. }
            | ConstraintKind::BoolAnd { .. }
            | ConstraintKind::AtMostOne { .. }
            | ConstraintKind::Circuit { .. }
            | ConstraintKind::NoOverlap { .. } => {}
            ConstraintKind::IntMax { target, vars }
            | ConstraintKind::IntMin { target, vars }
            | ConstraintKind::IntProd { target, vars } => {
                f(target);
                vars.iter_mut().for_each(&mut f);
            }
            ConstraintKind::IntDiv {
                target,
                numerator,
                denominator,
            } => {
                f(target);
                f(numerator);
                f(denominator);
            }
            ConstraintKind::Linear(linear) => linear.vars.iter_mut().for_each(&mut f),
            ConstraintKind::Element {
                index,
                target,
                vars,
            } => {
                f(index);
                f(target);
                vars.iter_mut().for_each(&mut f);
            }
            ConstraintKind::Table { vars, .. } => vars.iter_mut().for_each(&mut f),
            ConstraintKind::AllDifferent { vars } => vars.iter_mut().for_each(&mut f),
            ConstraintKind::Interval { start, size, end } => {
                f(start);
                f(size);
                f(end);
            }
            ConstraintKind::Cumulative {
                demands, capacity, ..
            } => {
                demands.iter_mut().for_each(&mut f);
                f(capacity);
            }
        }
    }

    /// Applies `f` to every reference that is used as a Boolean literal,
    /// including the enforcement literals.
    pub fn for_each_literal_ref(&mut self, mut f: impl FnMut(&mut VarRef)) {
        self.enforcement.iter_mut().for_each(&mut f);
        match &mut self.kind {
            ConstraintKind::BoolOr { literals }
            | ConstraintKind::BoolAnd { literals }
            | ConstraintKind::AtMostOne { literals } => literals.iter_mut().for_each(&mut f),
            ConstraintKind::Circuit { literals, .. } => literals.iter_mut().for_each(&mut f),
            _ => {}
        }
    }

    /// Applies `f` to every interval constraint index.
    pub fn for_each_interval_index(&mut self, mut f: impl FnMut(&mut usize)) {
        match &mut self.kind {
            ConstraintKind::NoOverlap { intervals }
            | ConstraintKind::Cumulative { intervals, .. } => {
                intervals.iter_mut().for_each(&mut f)
            }
            _ => {}
        }
    }

    /// The sorted list of distinct variable indices this constraint touches,
    /// through variable or literal references.
    pub fn referenced_variables(&self) -> Vec<usize> {
        let mut result = Vec::new();
        // The walkers need `&mut self`; a clone keeps the signature honest.
        let mut copy = self.clone();
        copy.for_each_variable_ref(|r| result.push(r.variable()));
        copy.for_each_literal_ref(|r| result.push(r.variable()));
        result.sort_unstable();
        result.dedup();
        result
    }
}
