//! The per-kind constraint rewriters. All of them share one contract: they
//! mutate the constraint in place, may append new constraints to the working
//! or mapping model, may tighten domains through the context, and return true
//! iff the variable-usage graph may have changed (over-approximation is
//! safe).

mod arithmetic;
mod booleans;
mod element;
mod linear;
mod scheduling;

pub(crate) use linear::extract_at_most_one_from_linear;

use crate::model::Constraint;
use crate::model::ConstraintKind;
use crate::model::VarRef;
use crate::presolve::context::PresolveContext;

/// Rewrites the constraint at index `c` once. The constraint is detached from
/// the model for the duration of the rewrite; the usage graph is refreshed
/// before the slot is restored.
pub(crate) fn presolve_one_constraint(c: usize, context: &mut PresolveContext<'_>) -> bool {
    let mut ct = std::mem::take(&mut context.working_model.constraints[c]);

    // Generic pre-pass: substitute equivalence-class representatives.
    if exploit_equivalence_relations(&mut ct, context) {
        context.update_constraint_variable_usage_with(c, &ct);
    }

    // Generic pre-pass: simplify the enforcement literals.
    if ct.presolve_enforcement_literal(context) {
        context.update_constraint_variable_usage_with(c, &ct);
    }

    let changed = match &ct.kind {
        ConstraintKind::Empty => false,
        ConstraintKind::BoolOr { .. } => ct.presolve_bool_or(context),
        ConstraintKind::BoolAnd { .. } => ct.presolve_bool_and(context),
        ConstraintKind::AtMostOne { .. } => ct.presolve_at_most_one(context),
        ConstraintKind::IntMax { .. } => ct.presolve_int_max(context),
        ConstraintKind::IntMin { .. } => ct.presolve_int_min(context),
        ConstraintKind::IntProd { .. } => ct.presolve_int_prod(context),
        ConstraintKind::IntDiv { .. } => ct.presolve_int_div(context),
        ConstraintKind::Linear(_) => {
            let mut changed = false;
            if ct.presolve_linear(context) {
                context.update_constraint_variable_usage_with(c, &ct);
                changed = true;
            }
            if matches!(ct.kind, ConstraintKind::Linear(_)) {
                let old_num_enforcement_literals = ct.enforcement.len();
                ct.extract_enforcement_literal_from_linear(context);
                if ct.enforcement.len() > old_num_enforcement_literals {
                    let _ = ct.presolve_linear(context);
                    context.update_constraint_variable_usage_with(c, &ct);
                    changed = true;
                }
            }
            if matches!(ct.kind, ConstraintKind::Linear(_)) {
                changed |= ct.presolve_linear_on_booleans(context);
            }
            changed
        }
        ConstraintKind::Interval { .. } => ct.presolve_interval(context),
        ConstraintKind::Element { .. } => ct.presolve_element(context),
        ConstraintKind::Table { .. } => ct.presolve_table(context),
        ConstraintKind::AllDifferent { .. } => ct.presolve_all_diff(context),
        ConstraintKind::NoOverlap { .. } => ct.presolve_no_overlap(context),
        ConstraintKind::Cumulative { .. } => ct.presolve_cumulative(context),
        ConstraintKind::Circuit { .. } => ct.presolve_circuit(context),
    };

    context.working_model.constraints[c] = ct;
    changed
}

/// Rewrites every variable reference to its equivalence-class representative
/// (signs preserved), and every literal reference likewise when the class
/// relation is a proper Boolean mapping.
pub(crate) fn exploit_equivalence_relations(
    ct: &mut Constraint,
    context: &mut PresolveContext<'_>,
) -> bool {
    if is_defining(ct) {
        return false;
    }
    let mut changed = false;

    ct.for_each_variable_ref(|r| {
        let var = r.variable();
        let relation = context.var_equiv_relations.get(var);
        if relation.representative != var {
            let representative = VarRef::from_index(relation.representative);
            *r = if (relation.coeff == 1) == r.is_positive() {
                representative
            } else {
                representative.negated()
            };
            changed = true;
        }
    });

    ct.for_each_literal_ref(|r| {
        let var = r.variable();
        let relation = context.get_affine_relation(var);
        if relation.representative == var {
            return;
        }
        // The domains may not be propagated yet, so the class can hold a
        // coeff/offset pair that will force one of the variables later; only
        // the two proper Boolean mappings are substituted here.
        let is_positive = relation.offset == 0 && relation.coeff == 1;
        let is_negative = relation.offset == 1 && relation.coeff == -1;
        if is_positive || is_negative {
            let representative = VarRef::from_index(relation.representative);
            *r = if is_positive == r.is_positive() {
                representative
            } else {
                representative.negated()
            };
            changed = true;
        }
    });
    changed
}

fn is_defining(ct: &Constraint) -> bool {
    matches!(&ct.kind, ConstraintKind::Linear(linear) if linear.defining)
}

impl Constraint {
    /// Drops fixed-true enforcement literals; a fixed-false one satisfies the
    /// constraint trivially and an unused one is fixed false, clearing the
    /// constraint in both cases.
    pub(crate) fn presolve_enforcement_literal(
        &mut self,
        context: &mut PresolveContext<'_>,
    ) -> bool {
        if !self.has_enforcement_literal() {
            return false;
        }

        let old_size = self.enforcement.len();
        let literals = std::mem::take(&mut self.enforcement);
        for literal in literals {
            if context.literal_is_true(literal) {
                context.update_rule_stats("true enforcement literal");
                continue;
            }
            if context.literal_is_false(literal) {
                context.update_rule_stats("false enforcement literal");
                self.clear();
                return true;
            }
            if context.variable_is_unique_and_removable(literal) {
                // Simply set it to false and ignore the constraint.
                context.update_rule_stats("enforcement literal not used");
                context.set_literal_to_false(literal);
                self.clear();
                return true;
            }
            self.enforcement.push(literal);
        }
        self.enforcement.len() != old_size
    }

    /// Rewrites the constraint into a Boolean-or over the negated enforcement
    /// literals; without enforcement the model is infeasible.
    pub(crate) fn mark_constraint_as_false(&mut self, context: &mut PresolveContext<'_>) -> bool {
        if self.has_enforcement_literal() {
            let literals = std::mem::take(&mut self.enforcement)
                .into_iter()
                .map(VarRef::negated)
                .collect();
            self.kind = ConstraintKind::BoolOr { literals };
            self.presolve_bool_or(context)
        } else {
            context.is_unsat = true;
            self.clear();
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_types::Domain;
    use crate::model::Model;

    #[test]
    fn equivalence_substitution_rewrites_to_the_representative() {
        let mut working = Model::default();
        let a = working.new_variable(Domain::new(0, 1));
        let b = working.new_variable(Domain::new(0, 1));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);
        context.add_boolean_equality_relation(a, b);
        let representative = VarRef::from_index(context.get_affine_relation(0).representative);
        let other = if representative == a { b } else { a };

        let mut ct = Constraint::unenforced(ConstraintKind::BoolOr {
            literals: vec![other, other.negated()],
        });
        assert!(exploit_equivalence_relations(&mut ct, &mut context));
        let ConstraintKind::BoolOr { literals } = &ct.kind else {
            panic!("still a bool_or");
        };
        assert_eq!(literals[0], representative);
        assert_eq!(literals[1], representative.negated());
    }

    #[test]
    fn fixed_true_enforcement_literal_is_dropped() {
        let mut working = Model::default();
        let a = working.new_variable(Domain::new(0, 1));
        let b = working.new_variable(Domain::new(0, 1));
        let c = working.new_variable(Domain::new(0, 1));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);
        context.set_literal_to_true(a);

        let mut ct = Constraint::enforced(
            vec![a],
            ConstraintKind::BoolAnd {
                literals: vec![b, c],
            },
        );
        // Give the enforcement variable another use so it is not singleton.
        assert!(ct.presolve_enforcement_literal(&mut context));
        assert!(ct.enforcement.is_empty());
        assert!(!ct.is_empty());
    }

    #[test]
    fn fixed_false_enforcement_literal_clears_the_constraint() {
        let mut working = Model::default();
        let a = working.new_variable(Domain::new(0, 1));
        let b = working.new_variable(Domain::new(0, 1));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);
        context.set_literal_to_false(a);

        let mut ct = Constraint::enforced(
            vec![a],
            ConstraintKind::BoolAnd { literals: vec![b] },
        );
        assert!(ct.presolve_enforcement_literal(&mut context));
        assert!(ct.is_empty());
    }

    #[test]
    fn marking_false_without_enforcement_is_unsat() {
        let mut working = Model::default();
        let _ = working.new_variable(Domain::new(0, 5));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = Constraint::unenforced(ConstraintKind::AllDifferent { vars: vec![] });
        assert!(ct.mark_constraint_as_false(&mut context));
        assert!(context.is_unsat);
    }
}
