use std::collections::VecDeque;

use fnv::FnvHashSet;

use crate::model::ConstraintKind;
use crate::presolve::context::PresolveContext;
use crate::presolve::rewrite::presolve_one_constraint;
use crate::termination::TerminationCondition;

/// Re-activates constraints whose variables moved until nothing changes.
///
/// The worklist is seeded with every constraint. Newly appended constraints
/// join the queue; after each sweep, variables incident to exactly one
/// constraint re-queue that constraint once per `(variable, constraint)`
/// pair so the removable-variable rules trigger. The modified-variable
/// re-activation is sorted to keep runs reproducible.
pub(crate) fn presolve_to_fixpoint(
    context: &mut PresolveContext<'_>,
    termination: &mut dyn TerminationCondition,
) {
    if context.is_unsat {
        return;
    }

    // Used for constraints with a variable unique to them, to call the
    // presolve only once for that reason.
    let mut var_constraint_pair_already_called: FnvHashSet<(usize, usize)> = FnvHashSet::default();

    let mut in_queue = vec![true; context.working_model.constraints.len()];
    let mut queue: VecDeque<usize> = (0..context.working_model.constraints.len()).collect();
    while !queue.is_empty() && !context.is_unsat {
        while !queue.is_empty() && !context.is_unsat {
            if termination.should_stop() {
                return;
            }
            let c = queue.pop_front().expect("non-empty queue");
            in_queue[c] = false;

            let old_num_constraints = context.working_model.constraints.len();
            let changed = presolve_one_constraint(c, context);

            // Queue any newly created constraint.
            let new_num_constraints = context.working_model.constraints.len();
            if new_num_constraints > old_num_constraints {
                context.update_new_constraints_variable_usage();
                in_queue.resize(new_num_constraints, true);
                queue.extend(old_num_constraints..new_num_constraints);
            }

            if changed {
                context.update_constraint_variable_usage(c);
            }
        }

        // Re-add the constraints that own a singleton variable.
        for v in 0..context.var_to_constraints.len() {
            let constraints = &context.var_to_constraints[v];
            if constraints.len() != 1 {
                continue;
            }
            let c = *constraints.iter().next().expect("one element");
            if c < 0 {
                continue;
            }
            let c = c as usize;
            if !var_constraint_pair_already_called.insert((v, c)) {
                continue;
            }
            if !in_queue[c] {
                in_queue[c] = true;
                queue.push_back(c);
            }
        }

        // Re-add the constraints that touch a modified variable. The order
        // must be deterministic because the set iteration order is not.
        let old_queue_size = queue.len();
        for v in context
            .modified_domains
            .positions_set_at_least_once()
            .collect::<Vec<_>>()
        {
            if context.domain_is_empty(crate::model::VarRef::from_index(v)) {
                context.is_unsat = true;
                break;
            }
            if context.is_fixed(crate::model::VarRef::from_index(v)) {
                context.exploit_fixed_domain(v);
            }
            for &c in context.var_to_constraints[v].clone().iter() {
                if c < 0 {
                    continue;
                }
                let c = c as usize;
                if !in_queue[c] {
                    in_queue[c] = true;
                    queue.push_back(c);
                }
            }
        }
        let sorted_tail: Vec<usize> = {
            let mut tail: Vec<usize> = queue.iter().skip(old_queue_size).copied().collect();
            tail.sort_unstable();
            tail
        };
        queue.truncate(old_queue_size);
        queue.extend(sorted_tail);
        context.modified_domains.sparse_clear_all();
    }

    if context.is_unsat {
        return;
    }

    // Interval slots may have been cleared after the no-overlaps and
    // cumulatives referencing them were last rewritten; filter them out.
    for c in 0..context.working_model.constraints.len() {
        let kind_is_scheduling = matches!(
            context.working_model.constraints[c].kind,
            ConstraintKind::NoOverlap { .. } | ConstraintKind::Cumulative { .. }
        );
        if !kind_is_scheduling {
            continue;
        }
        let mut ct = std::mem::take(&mut context.working_model.constraints[c]);
        let changed = match &ct.kind {
            ConstraintKind::NoOverlap { .. } => ct.presolve_no_overlap(context),
            ConstraintKind::Cumulative { .. } => ct.presolve_cumulative(context),
            _ => unreachable!("filtered above"),
        };
        context.working_model.constraints[c] = ct;
        if changed {
            context.update_constraint_variable_usage(c);
        }
    }
    context.update_new_constraints_variable_usage();

    crate::marrow_assert_advanced!(context.constraint_variable_usage_is_consistent());
}
