use std::collections::BTreeMap;

use fnv::FnvHashSet;

use crate::basic_types::Domain;
use crate::marrow_assert_eq_simple;
use crate::model::Constraint;
use crate::model::ConstraintKind;
use crate::model::LinearConstraint;
use crate::model::VarRef;
use crate::presolve::context::PresolveContext;
use crate::presolve::context::OBJECTIVE_CONSTRAINT_INDEX;

/// Replaces a multi-term objective by a single fresh variable defined through
/// a linear equality, so the objective is presolved like a normal constraint.
pub(crate) fn encode_objective_as_single_variable(context: &mut PresolveContext<'_>) {
    let Some(objective) = context.working_model.objective.clone() else {
        return;
    };

    if objective.vars.len() == 1 && objective.coeffs[0] == 1 && objective.vars[0].is_positive() {
        if !objective.domain.is_empty() {
            let _ = context.intersect_domain_with(objective.vars[0], &objective.domain);
        }
        register_objective_usage(context);
        return;
    }

    // The fresh variable ranges over the implied sum, restricted by the
    // objective domain when one was given.
    let mut implied = Domain::singleton(0);
    for (r, &coeff) in objective.vars.iter().zip(&objective.coeffs) {
        implied = implied
            .addition_with(&context.domain_of(*r).continuous_multiplication_by(coeff))
            .relaxed_if_too_complex(1);
    }
    if !objective.domain.is_empty() {
        implied = implied.intersection_with(&objective.domain);
    }
    if implied.is_empty() {
        context.is_unsat = true;
        return;
    }
    let objective_var = context.append_variable(implied);

    let mut vars = objective.vars.clone();
    let mut coeffs = objective.coeffs.clone();
    vars.push(objective_var);
    coeffs.push(-1);
    let _ = context.working_model.add_constraint(Constraint::unenforced(
        LinearConstraint::new(vars, coeffs, Domain::singleton(0)).into(),
    ));
    context.update_new_constraints_variable_usage();

    let objective = context.working_model.objective.as_mut().expect("checked above");
    objective.vars = vec![objective_var];
    objective.coeffs = vec![1];
    objective.domain = Domain::all_values();
    register_objective_usage(context);
}

fn register_objective_usage(context: &mut PresolveContext<'_>) {
    let Some(objective) = &context.working_model.objective else {
        return;
    };
    let vars: Vec<usize> = objective.vars.iter().map(|r| r.variable()).collect();
    for var in vars {
        let _ = context.var_to_constraints[var].insert(OBJECTIVE_CONSTRAINT_INDEX);
    }
}

/// Substitutes objective variables through still-untouched linear equalities,
/// always picking the longest equation with a unit coefficient. A defining
/// equation whose variable becomes otherwise unused moves to the mapping
/// model.
pub(crate) fn expand_objective(context: &mut PresolveContext<'_>) {
    if context.is_unsat {
        return;
    }

    // Consequence of encode_objective_as_single_variable().
    let objective = context.working_model.objective.clone().expect("objective present");
    marrow_assert_eq_simple!(objective.vars.len(), 1);
    marrow_assert_eq_simple!(objective.coeffs[0], 1);

    let mut objective_offset_change: i64 = 0;
    let initial_objective_domain = context.domain_of(objective.vars[0]);

    // Start from the representative of the objective variable.
    let mut objective_map: BTreeMap<usize, i64> = BTreeMap::new();
    {
        let r = objective.vars[0];
        let var = r.variable();
        let relation = context.get_affine_relation(var);
        if relation.representative != var {
            let coeff = if r.is_positive() {
                relation.coeff
            } else {
                -relation.coeff
            };
            let offset = if r.is_positive() {
                relation.offset
            } else {
                -relation.offset
            };
            objective_offset_change += offset;
            let _ = objective_map.insert(relation.representative, coeff);
            let _ = context.var_to_constraints[var].remove(&OBJECTIVE_CONSTRAINT_INDEX);
            let _ = context.var_to_constraints[relation.representative]
                .insert(OBJECTIVE_CONSTRAINT_INDEX);
        } else {
            let _ = objective_map.insert(var, 1);
        }
    }

    // Identify the unenforced linear equalities and how often each variable
    // appears in them.
    let num_constraints = context.working_model.constraints.len();
    let mut relevant_constraints: FnvHashSet<usize> = FnvHashSet::default();
    let mut var_to_num_relevant_constraints = vec![0usize; context.num_variables()];
    for c in 0..num_constraints {
        let ct = &context.working_model.constraints[c];
        if !ct.enforcement.is_empty() {
            continue;
        }
        let ConstraintKind::Linear(linear) = &ct.kind else {
            continue;
        };
        if !linear.rhs.is_fixed() {
            continue;
        }
        let _ = relevant_constraints.insert(c);
        for r in &linear.vars {
            var_to_num_relevant_constraints[r.variable()] += 1;
        }
    }

    // Expand each variable at most once.
    let mut num_expansions = 0;
    let mut processed_vars: FnvHashSet<usize> = FnvHashSet::default();
    while !relevant_constraints.is_empty() {
        // Pick a not-yet-expanded objective variable with candidates left.
        let Some(objective_var) = objective_map
            .keys()
            .copied()
            .find(|var| !processed_vars.contains(var) && var_to_num_relevant_constraints[*var] > 0)
        else {
            break;
        };
        let _ = processed_vars.insert(objective_var);

        let mut expanded_linear_index = None;
        let mut objective_coeff_in_expanded_constraint = 0;
        let mut size_of_expanded_constraint = 0;
        let mut candidates: Vec<i64> = context.var_to_constraints[objective_var]
            .iter()
            .copied()
            .collect();
        candidates.sort_unstable();
        for c in candidates {
            if c == OBJECTIVE_CONSTRAINT_INDEX {
                continue;
            }
            let c = c as usize;
            if !relevant_constraints.remove(&c) {
                continue;
            }
            // This constraint will never be relevant again: it contains the
            // processed objective variable.
            let ConstraintKind::Linear(linear) = &context.working_model.constraints[c].kind
            else {
                unreachable!("only linear constraints are relevant");
            };
            let linear = linear.clone();
            for r in &linear.vars {
                var_to_num_relevant_constraints[r.variable()] -= 1;
            }

            let mut objective_coeff = None;
            for (r, &coeff) in linear.vars.iter().zip(&linear.coeffs) {
                if r.variable() == objective_var {
                    objective_coeff = Some(if r.is_positive() { coeff } else { -coeff });
                }
            }
            let objective_coeff = objective_coeff.expect("the constraint contains the variable");

            // Use the longest equality with a unit coefficient.
            if objective_coeff.abs() == 1 && linear.vars.len() > size_of_expanded_constraint {
                expanded_linear_index = Some(c);
                size_of_expanded_constraint = linear.vars.len();
                objective_coeff_in_expanded_constraint = objective_coeff;
            }
        }

        let Some(expanded_linear_index) = expanded_linear_index else {
            continue;
        };
        context.update_rule_stats("objective: expanded objective constraint");

        let factor = objective_map[&objective_var] / objective_coeff_in_expanded_constraint;
        let _ = objective_map.remove(&objective_var);
        let _ = context.var_to_constraints[objective_var].remove(&OBJECTIVE_CONSTRAINT_INDEX);

        let ConstraintKind::Linear(expanded) =
            &context.working_model.constraints[expanded_linear_index].kind
        else {
            unreachable!("only linear constraints are relevant");
        };
        let expanded = expanded.clone();
        for (r, &coeff) in expanded.vars.iter().zip(&expanded.coeffs) {
            let var = r.variable();
            if var == objective_var {
                continue;
            }
            let mut coeff = -coeff * factor;
            if !r.is_positive() {
                coeff = -coeff;
            }
            let entry = objective_map.entry(var).or_insert_with(|| {
                let _ = context.var_to_constraints[var].insert(OBJECTIVE_CONSTRAINT_INDEX);
                0
            });
            *entry += coeff;
            if *entry == 0 {
                let _ = objective_map.remove(&var);
                let _ = context.var_to_constraints[var].remove(&OBJECTIVE_CONSTRAINT_INDEX);
            }
        }
        objective_offset_change += expanded.rhs.min() * factor;

        // When the expanded variable appears nowhere else and its value can
        // always be reconstructed, the equation moves to the mapping model.
        if context.var_to_constraints[objective_var].len() == 1 {
            let mut implied_domain = expanded.rhs.clone();
            for (r, &coeff) in expanded.vars.iter().zip(&expanded.coeffs) {
                if r.variable() == objective_var {
                    continue;
                }
                implied_domain = implied_domain
                    .addition_with(&context.domain_of(*r).continuous_multiplication_by(-coeff))
                    .relaxed_if_too_complex(1);
            }
            implied_domain =
                implied_domain.inverse_multiplication_by(objective_coeff_in_expanded_constraint);

            if num_expansions == 0
                || implied_domain
                    .is_included_in(&context.domain_of(VarRef::from_index(objective_var)))
            {
                context.update_rule_stats("objective: removed objective constraint");
                let moved = context.working_model.constraints[expanded_linear_index].clone();
                let _ = context.mapping_model.add_constraint(moved);
                context.working_model.constraints[expanded_linear_index].clear();
                context.update_constraint_variable_usage(expanded_linear_index);
            }
        }
        num_expansions += 1;
    }

    // Rewrite the objective from the accumulated map.
    let objective = context.working_model.objective.as_mut().expect("objective present");
    objective.vars = objective_map
        .keys()
        .map(|&var| VarRef::from_index(var))
        .collect();
    objective.coeffs = objective_map.values().copied().collect();
    objective.offset += objective_offset_change;
    objective.domain =
        initial_objective_domain.addition_with(&Domain::singleton(-objective_offset_change));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::model::Objective;

    #[test]
    fn multi_term_objective_gets_a_defining_variable() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 4));
        let y = working.new_variable(Domain::new(0, 4));
        working.objective = Some(Objective {
            vars: vec![x, y],
            coeffs: vec![1, 2],
            offset: 0,
            domain: Domain::empty(),
        });
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        encode_objective_as_single_variable(&mut context);

        let objective = context.working_model.objective.as_ref().unwrap();
        assert_eq!(objective.vars.len(), 1);
        assert_eq!(objective.coeffs, vec![1]);
        let objective_var = objective.vars[0];
        assert_eq!(context.domain_of(objective_var), Domain::new(0, 12));
        // The defining equality is in the model and the objective variable is
        // pinned against singleton elimination.
        assert_eq!(context.working_model.constraints.len(), 1);
        assert!(context.var_to_constraints[objective_var.variable()]
            .contains(&OBJECTIVE_CONSTRAINT_INDEX));
    }

    #[test]
    fn objective_is_expanded_through_the_longest_equality() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 4));
        let y = working.new_variable(Domain::new(0, 4));
        let z = working.new_variable(Domain::new(0, 8));
        // z = x + y, objective = z.
        let _ = working.add_constraint(Constraint::unenforced(
            LinearConstraint::new(vec![x, y, z], vec![1, 1, -1], Domain::singleton(0)).into(),
        ));
        working.objective = Some(Objective {
            vars: vec![z],
            coeffs: vec![1],
            offset: 0,
            domain: Domain::empty(),
        });
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);
        encode_objective_as_single_variable(&mut context);

        expand_objective(&mut context);

        let objective = context.working_model.objective.as_ref().unwrap();
        assert_eq!(objective.vars, vec![x, y]);
        assert_eq!(objective.coeffs, vec![1, 1]);
        // The defining equation moved to the mapping model.
        assert!(context.working_model.constraints[0].is_empty());
        assert_eq!(context.mapping_model.constraints.len(), 1);
    }
}
