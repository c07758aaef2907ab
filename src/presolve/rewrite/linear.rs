use std::collections::BTreeMap;

use crate::basic_types::ClosedInterval;
use crate::basic_types::Domain;
use crate::marrow_assert_eq_simple;
use crate::math::gcd;
use crate::model::Constraint;
use crate::model::ConstraintKind;
use crate::model::LinearConstraint;
use crate::model::VarRef;
use crate::presolve::context::PresolveContext;

/// Chained domain additions are capped at this many intervals; beyond it the
/// partial sum is replaced by its hull.
const DOMAIN_COMPLEXITY_LIMIT: usize = 100;

impl Constraint {
    /// Canonicalizes the linear constraint, tightens its right-hand side and
    /// the variable domains, and extracts affine relations from two-term
    /// equalities.
    pub(crate) fn presolve_linear(&mut self, context: &mut PresolveContext<'_>) -> bool {
        let ConstraintKind::Linear(linear) = &self.kind else {
            unreachable!("dispatched on the constraint kind");
        };
        let was_affine = linear.defining;
        let original_rhs = linear.rhs.clone();
        let original_num_terms = linear.vars.len();
        let entry_vars = linear.vars.clone();
        let entry_coeffs = linear.coeffs.clone();

        let mut graph_changed = false;
        let mut rhs = original_rhs.clone();

        // Regroup the terms on the same variable and fold the fixed ones into
        // the right-hand side. The map keeps the variables sorted.
        let mut sum_of_fixed_terms: i64 = 0;
        let mut var_to_coeff: BTreeMap<usize, i64> = BTreeMap::new();
        for (r, &coeff) in entry_vars.iter().zip(&entry_coeffs) {
            let var = r.variable();
            let coeff = if r.is_positive() { coeff } else { -coeff };
            if coeff == 0 {
                continue;
            }
            if context.is_fixed(r.positive()) {
                sum_of_fixed_terms += coeff * context.min_of(r.positive());
                continue;
            }

            let (representative, coeff) = if !was_affine {
                let relation = context.get_affine_relation(var);
                if relation.representative != var {
                    graph_changed = true;
                    sum_of_fixed_terms += coeff * relation.offset;
                }
                (relation.representative, coeff * relation.coeff)
            } else {
                (var, coeff)
            };
            let entry = var_to_coeff.entry(representative).or_insert(0);
            *entry += coeff;
            if *entry == 0 {
                let _ = var_to_coeff.remove(&representative);
            }
        }

        // Divide everything by the GCD of the coefficients.
        let mut coefficient_gcd: u64 = 0;
        for &coeff in var_to_coeff.values() {
            coefficient_gcd = gcd(coefficient_gcd, coeff.unsigned_abs());
            if coefficient_gcd == 1 {
                break;
            }
        }
        let coefficient_gcd = coefficient_gcd.max(1) as i64;
        if coefficient_gcd > 1 {
            context.update_rule_stats("linear: divide by GCD");
        }

        if var_to_coeff.len() < original_num_terms {
            context.update_rule_stats("linear: fixed or dup variables");
            graph_changed = true;
        }

        if sum_of_fixed_terms != 0 {
            rhs = rhs.addition_with(&Domain::singleton(-sum_of_fixed_terms));
        }
        if coefficient_gcd > 1 {
            rhs = rhs.inverse_multiplication_by(coefficient_gcd);
        }

        let vars: Vec<VarRef> = var_to_coeff.keys().map(|&v| VarRef::from_index(v)).collect();
        let coeffs: Vec<i64> = var_to_coeff.values().map(|&c| c / coefficient_gcd).collect();

        if vars.is_empty() {
            context.update_rule_stats("linear: empty");
            if rhs.contains(0) {
                self.clear();
                return true;
            }
            return self.mark_constraint_as_false(context);
        }

        if vars.len() == 1 && !self.has_enforcement_literal() {
            context.update_rule_stats("linear: size one");
            if coeffs[0] == 1 {
                let _ = context.intersect_domain_with(vars[0], &rhs);
            } else {
                marrow_assert_eq_simple!(coeffs[0], -1);
                let _ = context.intersect_domain_with(vars[0], &rhs.negation());
            }
            self.clear();
            return true;
        }

        // Compute the implied right-hand side from the variable domains
        // through forward partial sums, hulled past the complexity limit.
        let num_vars = vars.len();
        let mut term_domains: Vec<Domain> = Vec::with_capacity(num_vars + 1);
        let mut left_domains: Vec<Domain> = Vec::with_capacity(num_vars + 1);
        left_domains.push(Domain::singleton(0));
        for i in 0..num_vars {
            term_domains
                .push(context.domain_of(vars[i]).continuous_multiplication_by(coeffs[i]));
            let next = left_domains[i]
                .addition_with(&term_domains[i])
                .relaxed_if_too_complex(DOMAIN_COMPLEXITY_LIMIT);
            left_domains.push(next);
        }
        let implied_rhs = left_domains[num_vars].clone();

        let restricted_rhs = rhs.intersection_with(&implied_rhs);
        if restricted_rhs.is_empty() {
            context.update_rule_stats("linear: infeasible");
            return self.mark_constraint_as_false(context);
        }

        // Relax the right-hand side for faster propagation: union with the
        // complement of what is reachable, then drop the intervals that can
        // never be attained.
        let mut rhs_intervals: Vec<ClosedInterval> = Vec::new();
        for interval in restricted_rhs
            .union_with(&implied_rhs.complement())
            .iter()
        {
            if !Domain::new(interval.start, interval.end)
                .intersection_with(&restricted_rhs)
                .is_empty()
            {
                rhs_intervals.push(interval);
            }
        }
        rhs = Domain::from_intervals(rhs_intervals);
        if rhs == Domain::all_values() {
            context.update_rule_stats("linear: always true");
            self.clear();
            return true;
        }
        if rhs != original_rhs {
            context.update_rule_stats("linear: simplified rhs");
        }

        // Propagate the variable bounds.
        if !self.has_enforcement_literal() {
            let mut new_bounds = false;
            let mut right_domain = Domain::singleton(0);
            term_domains.push(rhs.negation());
            for i in (0..num_vars).rev() {
                right_domain = right_domain
                    .addition_with(&term_domains[i + 1])
                    .relaxed_if_too_complex(DOMAIN_COMPLEXITY_LIMIT);
                let new_domain = left_domains[i]
                    .addition_with(&right_domain)
                    .inverse_multiplication_by(-coeffs[i]);
                if context.intersect_domain_with(vars[i], &new_domain) {
                    new_bounds = true;
                }
                if context.is_unsat {
                    return true;
                }
            }
            if new_bounds {
                context.update_rule_stats("linear: reduced variable domains");
            }
        }

        // Detect an affine relation from a two-term equality.
        let mut defining = was_affine;
        if !was_affine && !self.has_enforcement_literal() && rhs.is_fixed() && vars.len() == 2 {
            let value = rhs.min();
            let (v1, v2) = (vars[0], vars[1]);
            let (coeff1, coeff2) = (coeffs[0], coeffs[1]);
            let added = if coeff1 == 1 {
                context.add_affine_relation(v1, v2, -coeff2, value)
            } else if coeff2 == 1 {
                context.add_affine_relation(v2, v1, -coeff1, value)
            } else if coeff1 == -1 {
                context.add_affine_relation(v1, v2, coeff2, -value)
            } else if coeff2 == -1 {
                context.add_affine_relation(v2, v1, coeff1, -value)
            } else {
                false
            };
            if added {
                defining = true;
            }
        }

        self.kind = ConstraintKind::Linear(LinearConstraint {
            vars,
            coeffs,
            rhs,
            defining,
        });
        graph_changed
    }

    /// Coefficient strengthening: a binary variable whose worst-case
    /// contribution alone would violate a one-sided right-hand side is fixed
    /// inside the constraint at its harmless value, and becomes an
    /// enforcement literal for the other value.
    pub(crate) fn extract_enforcement_literal_from_linear(
        &mut self,
        context: &mut PresolveContext<'_>,
    ) {
        let ConstraintKind::Linear(linear) = &mut self.kind else {
            unreachable!("dispatched on the constraint kind");
        };
        if linear.rhs.num_intervals() != 1 {
            return;
        }
        // With two finite bounds no literal can make the constraint always
        // true, because the rhs was relaxed against the implied domain.
        let rhs_is_upper_bounded = linear.rhs.max() != i64::MAX;
        let rhs_is_lower_bounded = linear.rhs.min() != i64::MIN;
        if rhs_is_upper_bounded && rhs_is_lower_bounded {
            return;
        }
        if !rhs_is_upper_bounded && !rhs_is_lower_bounded {
            return;
        }

        let mut min_sum: i64 = 0;
        let mut max_sum: i64 = 0;
        for (r, &coeff) in linear.vars.iter().zip(&linear.coeffs) {
            let term_a = coeff * context.min_of(*r);
            let term_b = coeff * context.max_of(*r);
            min_sum += term_a.min(term_b);
            max_sum += term_a.max(term_b);
        }

        let mut enforcement: Vec<VarRef> = Vec::new();
        let mut i = 0;
        while i < linear.vars.len() {
            let r = linear.vars[i];
            if context.min_of(r) != 0 || context.max_of(r) != 1 {
                i += 1;
                continue;
            }
            let coeff = linear.coeffs[i];

            let fixed_value = if rhs_is_upper_bounded {
                if max_sum - coeff.abs() > linear.rhs.max() {
                    i += 1;
                    continue;
                }
                if coeff > 0 {
                    // Fixing the variable to 1 keeps the constraint; when it
                    // is 0 the constraint holds regardless.
                    enforcement.push(r);
                    max_sum -= coeff;
                    1
                } else {
                    enforcement.push(r.negated());
                    min_sum -= coeff;
                    0
                }
            } else {
                if min_sum + coeff.abs() < linear.rhs.min() {
                    i += 1;
                    continue;
                }
                if coeff > 0 {
                    enforcement.push(r.negated());
                    max_sum -= coeff;
                    0
                } else {
                    enforcement.push(r);
                    min_sum -= coeff;
                    1
                }
            };

            // Remove the term and move its fixed contribution to the rhs.
            linear.rhs = linear
                .rhs
                .addition_with(&Domain::singleton(-coeff * fixed_value));
            let _ = linear.vars.remove(i);
            let _ = linear.coeffs.remove(i);
            context.update_rule_stats("linear: extracted enforcement literal from constraint");
        }
        self.enforcement.extend(enforcement);
    }

    /// Specializes a linear constraint over Boolean variables into its
    /// Boolean form, or into clauses when it has at most three variables.
    pub(crate) fn presolve_linear_on_booleans(
        &mut self,
        context: &mut PresolveContext<'_>,
    ) -> bool {
        let ConstraintKind::Linear(linear) = &self.kind else {
            unreachable!("dispatched on the constraint kind");
        };
        if linear.defining {
            return false;
        }

        let mut min_coeff = i64::MAX;
        let mut max_coeff: i64 = 0;
        let mut min_sum: i64 = 0;
        let mut max_sum: i64 = 0;
        for (r, &coeff) in linear.vars.iter().zip(&linear.coeffs) {
            // The constraint is in canonical form at this point.
            crate::marrow_assert_simple!(r.is_positive());
            crate::marrow_assert_simple!(coeff != 0);
            if context.min_of(*r) != 0 || context.max_of(*r) != 1 {
                return false;
            }
            if coeff > 0 {
                max_sum += coeff;
                min_coeff = min_coeff.min(coeff);
                max_coeff = max_coeff.max(coeff);
            } else {
                // The term reads as its negated Boolean with |coeff|.
                min_sum += coeff;
                min_coeff = min_coeff.min(-coeff);
                max_coeff = max_coeff.max(-coeff);
            }
        }

        let vars = linear.vars.clone();
        let coeffs = linear.coeffs.clone();
        let rhs = linear.rhs.clone();
        crate::marrow_assert_simple!(!rhs.is_empty());

        let positive = |i: usize| {
            if coeffs[i] > 0 {
                vars[i]
            } else {
                vars[i].negated()
            }
        };
        let negative = |i: usize| positive(i).negated();

        if min_sum + min_coeff > rhs.max() {
            // All Booleans are false whenever the constraint is enforced.
            context.update_rule_stats("linear: negative reified and");
            self.kind = ConstraintKind::BoolAnd {
                literals: (0..vars.len()).map(negative).collect(),
            };
            return self.presolve_bool_and(context);
        } else if max_sum - min_coeff < rhs.min() {
            // All Booleans are true whenever the constraint is enforced.
            context.update_rule_stats("linear: positive reified and");
            self.kind = ConstraintKind::BoolAnd {
                literals: (0..vars.len()).map(positive).collect(),
            };
            return self.presolve_bool_and(context);
        } else if min_sum + min_coeff >= rhs.min() && rhs.front().end == i64::MAX {
            // At least one Boolean is true.
            context.update_rule_stats("linear: positive clause");
            self.kind = ConstraintKind::BoolOr {
                literals: (0..vars.len()).map(positive).collect(),
            };
            return self.presolve_bool_or(context);
        } else if max_sum - min_coeff <= rhs.max() && rhs.back().start == i64::MIN {
            // At least one Boolean is false.
            context.update_rule_stats("linear: negative clause");
            self.kind = ConstraintKind::BoolOr {
                literals: (0..vars.len()).map(negative).collect(),
            };
            return self.presolve_bool_or(context);
        } else if !self.has_enforcement_literal()
            && min_sum + max_coeff <= rhs.max()
            && min_sum + 2 * min_coeff > rhs.max()
            && rhs.back().start == i64::MIN
        {
            // At most one Boolean is true.
            context.update_rule_stats("linear: positive at most one");
            self.kind = ConstraintKind::AtMostOne {
                literals: (0..vars.len()).map(positive).collect(),
            };
            return true;
        } else if !self.has_enforcement_literal()
            && max_sum - max_coeff >= rhs.min()
            && max_sum - 2 * min_coeff < rhs.min()
            && rhs.front().end == i64::MAX
        {
            // At most one Boolean is false.
            context.update_rule_stats("linear: negative at most one");
            self.kind = ConstraintKind::AtMostOne {
                literals: (0..vars.len()).map(negative).collect(),
            };
            return true;
        }

        // A small expression is expanded into clauses, one per violating
        // assignment.
        if vars.len() > 3 {
            return false;
        }
        context.update_rule_stats("linear: small Boolean expression");

        for mask in 0..(1u32 << vars.len()) {
            let mut value = 0;
            for i in 0..vars.len() {
                if (mask >> i) & 1 == 1 {
                    value += coeffs[i];
                }
            }
            if rhs.contains(value) {
                continue;
            }

            let literals = (0..vars.len())
                .map(|i| {
                    if (mask >> i) & 1 == 1 {
                        vars[i].negated()
                    } else {
                        vars[i]
                    }
                })
                .collect();
            let _ = context.working_model.add_constraint(Constraint::enforced(
                self.enforcement.clone(),
                ConstraintKind::BoolOr { literals },
            ));
        }
        self.clear();
        true
    }
}

/// Emits at-most-one constraints over pairs of Boolean variables whose
/// combined contribution would overflow either side of the right-hand side.
/// Runs as a separate pass after the fixpoint.
pub(crate) fn extract_at_most_one_from_linear(
    ct: &Constraint,
    context: &mut PresolveContext<'_>,
) {
    if ct.has_enforcement_literal() {
        return;
    }
    let ConstraintKind::Linear(linear) = &ct.kind else {
        return;
    };

    let mut min_sum: i64 = 0;
    let mut max_sum: i64 = 0;
    for (r, &coeff) in linear.vars.iter().zip(&linear.coeffs) {
        let term_a = coeff * context.min_of(*r);
        let term_b = coeff * context.max_of(*r);
        min_sum += term_a.min(term_b);
        max_sum += term_a.max(term_b);
    }

    for overflow_is_max in [true, false] {
        let mut at_most_one: Vec<VarRef> = Vec::new();
        for (r, &coeff) in linear.vars.iter().zip(&linear.coeffs) {
            let r = *r;
            if context.min_of(r) != 0 || context.max_of(r) != 1 {
                continue;
            }
            if overflow_is_max {
                if min_sum + 2 * coeff.abs() > linear.rhs.max() {
                    at_most_one.push(if coeff > 0 { r } else { r.negated() });
                }
            } else if max_sum - 2 * coeff.abs() < linear.rhs.min() {
                at_most_one.push(if coeff > 0 { r.negated() } else { r });
            }
        }
        if at_most_one.len() > 1 {
            if overflow_is_max {
                context.update_rule_stats("linear: extracted at most one (max)");
            } else {
                context.update_rule_stats("linear: extracted at most one (min)");
            }
            let _ = context
                .working_model
                .add_constraint(Constraint::unenforced(ConstraintKind::AtMostOne {
                    literals: at_most_one,
                }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn linear(vars: Vec<VarRef>, coeffs: Vec<i64>, rhs: Domain) -> Constraint {
        Constraint::unenforced(LinearConstraint::new(vars, coeffs, rhs).into())
    }

    #[test]
    fn duplicate_terms_are_merged_and_divided_by_gcd() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 10));
        let y = working.new_variable(Domain::new(0, 10));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        // 2x + 2x + 4y in [0, 8] becomes x + y in [0, 2].
        let mut ct = linear(vec![x, x, y], vec![2, 2, 4], Domain::new(0, 8));
        let _ = ct.presolve_linear(&mut context);
        let ConstraintKind::Linear(result) = &ct.kind else {
            panic!("still linear");
        };
        assert_eq!(result.vars, vec![x, y]);
        assert_eq!(result.coeffs, vec![1, 1]);
        assert_eq!(result.rhs.max(), 2);
        assert_eq!(
            context.stats_by_rule_name().get("linear: divide by GCD"),
            Some(&1)
        );
    }

    #[test]
    fn size_one_constraint_restricts_the_domain() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 10));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = linear(vec![x], vec![1], Domain::new(3, 5));
        let _ = ct.presolve_linear(&mut context);
        assert!(ct.is_empty());
        assert_eq!(context.domain_of(x), Domain::new(3, 5));
    }

    #[test]
    fn variable_domains_are_tightened() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 10));
        let y = working.new_variable(Domain::new(0, 10));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        // x + y <= 5.
        let mut ct = linear(vec![x, y], vec![1, 1], Domain::new(i64::MIN, 5));
        let _ = ct.presolve_linear(&mut context);
        assert_eq!(context.max_of(x), 5);
        assert_eq!(context.max_of(y), 5);
    }

    #[test]
    fn two_term_equality_registers_an_affine_relation() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 10));
        let y = working.new_variable(Domain::new(0, 10));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        // x - y = 0.
        let mut ct = linear(vec![x, y], vec![1, -1], Domain::singleton(0));
        let _ = ct.presolve_linear(&mut context);
        let ConstraintKind::Linear(result) = &ct.kind else {
            panic!("still linear");
        };
        assert!(result.defining);
        let relation = context.get_affine_relation(x.variable());
        let other = context.get_affine_relation(y.variable());
        assert_eq!(relation.representative, other.representative);
    }

    #[test]
    fn infeasible_rhs_is_marked_false() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 2));
        let y = working.new_variable(Domain::new(0, 2));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = linear(vec![x, y], vec![1, 1], Domain::new(10, 20));
        let _ = ct.presolve_linear(&mut context);
        assert!(context.is_unsat);
    }

    #[test]
    fn boolean_sum_at_least_one_becomes_a_clause() {
        let mut working = Model::default();
        let a = working.new_variable(Domain::new(0, 1));
        let b = working.new_variable(Domain::new(0, 1));
        let c = working.new_variable(Domain::new(0, 1));
        let mut mapping = Model::default();
        // Enumeration mode, so the singleton rule does not satisfy the clause
        // by fixing one of its literals.
        let mut context = PresolveContext::new(&mut working, &mut mapping, true);

        // a + b + c >= 1.
        let mut ct = linear(vec![a, b, c], vec![1, 1, 1], Domain::new(1, i64::MAX));
        let _ = ct.presolve_linear(&mut context);
        let _ = ct.presolve_linear_on_booleans(&mut context);
        let ConstraintKind::BoolOr { literals } = &ct.kind else {
            panic!("expected a clause, got {:?}", ct.kind);
        };
        assert_eq!(literals, &vec![a, b, c]);
    }

    #[test]
    fn boolean_sum_at_most_one_is_specialized() {
        let mut working = Model::default();
        let a = working.new_variable(Domain::new(0, 1));
        let b = working.new_variable(Domain::new(0, 1));
        let c = working.new_variable(Domain::new(0, 1));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        // a + b + c <= 1.
        let mut ct = linear(vec![a, b, c], vec![1, 1, 1], Domain::new(i64::MIN, 1));
        let _ = ct.presolve_linear(&mut context);
        assert!(ct.presolve_linear_on_booleans(&mut context));
        let ConstraintKind::AtMostOne { literals } = &ct.kind else {
            panic!("expected an at-most-one, got {:?}", ct.kind);
        };
        assert_eq!(literals, &vec![a, b, c]);
    }

    #[test]
    fn small_boolean_expression_is_expanded_into_clauses() {
        let mut working = Model::default();
        let a = working.new_variable(Domain::new(0, 1));
        let b = working.new_variable(Domain::new(0, 1));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        // a + b != 1, i.e. a == b.
        let mut ct = linear(
            vec![a, b],
            vec![1, 1],
            Domain::from_values(vec![0, 2]),
        );
        assert!(ct.presolve_linear_on_booleans(&mut context));
        assert!(ct.is_empty());
        // Two violating assignments, two excluding clauses.
        assert_eq!(context.working_model.constraints.len(), 2);
    }

    #[test]
    fn enforcement_literal_is_extracted_from_one_sided_constraints() {
        let mut working = Model::default();
        let b = working.new_variable(Domain::new(0, 1));
        let x = working.new_variable(Domain::new(0, 4));
        let y = working.new_variable(Domain::new(0, 4));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        // 10 b + x + y <= 12: when b is 1 we need x + y <= 2, when b is 0
        // the constraint is free, so b becomes an enforcement literal.
        let mut ct = linear(vec![b, x, y], vec![10, 1, 1], Domain::new(i64::MIN, 12));
        ct.extract_enforcement_literal_from_linear(&mut context);
        assert_eq!(ct.enforcement, vec![b]);
        let ConstraintKind::Linear(result) = &ct.kind else {
            panic!("still linear");
        };
        assert_eq!(result.vars, vec![x, y]);
        assert_eq!(result.rhs.max(), 2);
    }

    #[test]
    fn redundant_at_most_one_is_extracted() {
        let mut working = Model::default();
        let a = working.new_variable(Domain::new(0, 1));
        let b = working.new_variable(Domain::new(0, 1));
        let x = working.new_variable(Domain::new(0, 3));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        // 5a + 5b + x <= 8: a and b cannot both be one.
        let ct = linear(vec![a, b, x], vec![5, 5, 1], Domain::new(i64::MIN, 8));
        extract_at_most_one_from_linear(&ct, &mut context);
        assert_eq!(context.working_model.constraints.len(), 1);
        let ConstraintKind::AtMostOne { literals } = &context.working_model.constraints[0].kind
        else {
            panic!("expected an at-most-one");
        };
        assert_eq!(literals, &vec![a, b]);
    }
}
