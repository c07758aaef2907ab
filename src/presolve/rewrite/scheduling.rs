use crate::basic_types::Domain;
use crate::model::Constraint;
use crate::model::ConstraintKind;
use crate::model::VarRef;
use crate::presolve::context::PresolveContext;

impl Constraint {
    /// Drops intervals whose constraint slot has been cleared; empty and
    /// singleton no-overlaps say nothing.
    pub(crate) fn presolve_no_overlap(&mut self, context: &mut PresolveContext<'_>) -> bool {
        let ConstraintKind::NoOverlap { intervals } = &self.kind else {
            unreachable!("dispatched on the constraint kind");
        };
        let old_size = intervals.len();
        let kept: Vec<usize> = intervals
            .iter()
            .copied()
            .filter(|&interval| !context.working_model.constraints[interval].is_empty())
            .collect();

        if kept.len() <= 1 {
            context.update_rule_stats(if kept.is_empty() {
                "no_overlap: no intervals"
            } else {
                "no_overlap: only one interval"
            });
            self.clear();
            return true;
        }
        let changed = kept.len() < old_size;
        self.kind = ConstraintKind::NoOverlap { intervals: kept };
        changed
    }

    /// Drops cleared intervals; degenerates into a no-overlap when every
    /// demand exceeds half the capacity, and further into an all-different
    /// when additionally every duration is one and no interval is optional.
    pub(crate) fn presolve_cumulative(&mut self, context: &mut PresolveContext<'_>) -> bool {
        let ConstraintKind::Cumulative {
            intervals,
            demands,
            capacity,
        } = &self.kind
        else {
            unreachable!("dispatched on the constraint kind");
        };
        let capacity = *capacity;

        let mut kept_intervals: Vec<usize> = Vec::with_capacity(intervals.len());
        let mut kept_demands: Vec<VarRef> = Vec::with_capacity(demands.len());
        for (&interval, &demand) in intervals.iter().zip(demands) {
            if context.working_model.constraints[interval].is_empty() {
                continue;
            }
            kept_intervals.push(interval);
            kept_demands.push(demand);
        }
        let changed = kept_intervals.len() < intervals.len();
        self.kind = ConstraintKind::Cumulative {
            intervals: kept_intervals.clone(),
            demands: kept_demands.clone(),
            capacity,
        };

        if self.has_enforcement_literal() {
            return changed;
        }
        if !context.is_fixed(capacity) {
            return changed;
        }
        let capacity_value = context.min_of(capacity);

        let size = kept_intervals.len();
        let mut start_refs: Vec<VarRef> = Vec::with_capacity(size);
        let mut num_duration_one = 0;
        let mut num_greater_half_capacity = 0;
        let mut has_optional_interval = false;
        for i in 0..size {
            let interval_ct = &context.working_model.constraints[kept_intervals[i]];
            let interval_enforcement = interval_ct.enforcement.clone();
            let ConstraintKind::Interval { start, size: duration, .. } = interval_ct.kind else {
                unreachable!("validated interval reference");
            };
            if !interval_enforcement.is_empty() {
                has_optional_interval = true;
            }
            start_refs.push(start);
            let demand = kept_demands[i];
            if context.is_fixed(duration) && context.min_of(duration) == 1 {
                num_duration_one += 1;
            }
            if context.min_of(duration) == 0 {
                // Zero-duration intervals do not behave the same in a
                // no-overlap, so the conversions below would be wrong.
                return changed;
            }
            let demand_min = context.min_of(demand);
            let demand_max = context.max_of(demand);
            if demand_min > capacity_value / 2 {
                num_greater_half_capacity += 1;
            }
            if demand_min > capacity_value {
                context.update_rule_stats("cumulative: demand_min exceeds capacity");
                if interval_enforcement.is_empty() {
                    context.is_unsat = true;
                } else {
                    context.set_literal_to_false(interval_enforcement[0]);
                }
                return changed;
            } else if demand_max > capacity_value {
                if interval_enforcement.is_empty() {
                    context.update_rule_stats("cumulative: demand_max exceeds capacity");
                    let _ = context.intersect_domain_with(
                        demand,
                        &Domain::new(i64::MIN, capacity_value),
                    );
                } else {
                    // An optional interval cannot simply have its demand
                    // reduced; leave the constraint alone.
                    context
                        .update_rule_stats("cumulative: demand_max of optional interval exceeds capacity");
                    return changed;
                }
            }
        }

        if num_greater_half_capacity == size {
            if num_duration_one == size && !has_optional_interval {
                context.update_rule_stats("cumulative: convert to all_different");
                let _ = context.working_model.add_constraint(Constraint::unenforced(
                    ConstraintKind::AllDifferent { vars: start_refs },
                ));
                self.clear();
                return true;
            } else {
                context.update_rule_stats("cumulative: convert to no_overlap");
                let _ = context.working_model.add_constraint(Constraint::unenforced(
                    ConstraintKind::NoOverlap {
                        intervals: kept_intervals,
                    },
                ));
                self.clear();
                return true;
            }
        }

        changed
    }

    /// Degree-based reasoning on the arc literals of a circuit.
    pub(crate) fn presolve_circuit(&mut self, context: &mut PresolveContext<'_>) -> bool {
        if self.has_enforcement_literal() {
            return false;
        }
        let ConstraintKind::Circuit {
            tails,
            heads,
            literals,
        } = &self.kind
        else {
            unreachable!("dispatched on the constraint kind");
        };
        let tails = tails.clone();
        let heads = heads.clone();
        let literals = literals.clone();

        // Node-indexed arc lists, including the arcs already at false.
        let num_arcs = literals.len();
        let num_nodes = tails
            .iter()
            .chain(heads.iter())
            .map(|&n| n + 1)
            .max()
            .unwrap_or(0);
        let mut incoming_arcs: Vec<Vec<VarRef>> = vec![Vec::new(); num_nodes];
        let mut outgoing_arcs: Vec<Vec<VarRef>> = vec![Vec::new(); num_nodes];
        for i in 0..num_arcs {
            incoming_arcs[heads[i]].push(literals[i]);
            outgoing_arcs[tails[i]].push(literals[i]);
        }

        // A node with a single incoming (or outgoing) arc uses it.
        let mut num_fixed_at_true = 0;
        for node_to_refs in [&incoming_arcs, &outgoing_arcs] {
            for refs in node_to_refs {
                if refs.len() == 1 {
                    if !context.literal_is_true(refs[0]) {
                        num_fixed_at_true += 1;
                        context.set_literal_to_true(refs[0]);
                    }
                    continue;
                }
                // At most one arc per node is true: one true arc forces the
                // others false.
                if let Some(&true_ref) = refs.iter().find(|&&r| context.literal_is_true(r)) {
                    for &r in refs {
                        if r != true_ref {
                            context.set_literal_to_false(r);
                        }
                    }
                }
            }
        }
        if num_fixed_at_true > 0 {
            context.update_rule_stats("circuit: fixed singleton arcs");
        }

        // Remove the false arcs, tracking the successor chosen by the arcs
        // already fixed at true.
        let mut new_tails: Vec<usize> = Vec::with_capacity(num_arcs);
        let mut new_heads: Vec<usize> = Vec::with_capacity(num_arcs);
        let mut new_literals: Vec<VarRef> = Vec::with_capacity(num_arcs);
        let mut num_true = 0;
        let mut circuit_start = None;
        let mut next: Vec<Option<usize>> = vec![None; num_nodes];
        let mut new_in_degree = vec![0usize; num_nodes];
        let mut new_out_degree = vec![0usize; num_nodes];
        for i in 0..num_arcs {
            let r = literals[i];
            if context.literal_is_false(r) {
                continue;
            }
            if context.literal_is_true(r) {
                if next[tails[i]].is_some() {
                    context.is_unsat = true;
                    return true;
                }
                next[tails[i]] = Some(heads[i]);
                if tails[i] != heads[i] {
                    circuit_start = Some(tails[i]);
                }
                num_true += 1;
            }
            new_out_degree[tails[i]] += 1;
            new_in_degree[heads[i]] += 1;
            new_tails.push(tails[i]);
            new_heads.push(heads[i]);
            new_literals.push(r);
        }

        // Every node that appears in some arc must be in the circuit or have
        // a self-arc, so a zero degree after the removals is infeasible.
        for node in 0..num_nodes {
            if incoming_arcs[node].is_empty() && outgoing_arcs[node].is_empty() {
                continue;
            }
            if new_in_degree[node] == 0 || new_out_degree[node] == 0 {
                context.is_unsat = true;
                return true;
            }
        }

        // A complete sub-circuit already fixed at true excludes every other
        // node: their self-arcs become true and all remaining arcs false.
        if let Some(circuit_start) = circuit_start {
            let mut visited = vec![false; num_nodes];
            let mut current = Some(circuit_start);
            while let Some(node) = current {
                if visited[node] {
                    break;
                }
                visited[node] = true;
                current = next[node];
            }
            if current == Some(circuit_start) {
                for i in 0..num_arcs {
                    if visited[tails[i]] {
                        continue;
                    }
                    if tails[i] == heads[i] {
                        context.set_literal_to_true(literals[i]);
                    } else {
                        context.set_literal_to_false(literals[i]);
                    }
                }
                context.update_rule_stats("circuit: fully specified");
                self.clear();
                return true;
            }
        } else if num_true == new_literals.len() {
            // Only true self-loops remain.
            context.update_rule_stats("circuit: empty circuit");
            self.clear();
            return true;
        }

        // A node of degree two links its two arc indicators: one is the
        // negation of the other.
        for node in 0..num_nodes {
            for arc_literals in [&incoming_arcs[node], &outgoing_arcs[node]] {
                let mut live: Vec<VarRef> = Vec::new();
                for &r in arc_literals.iter() {
                    if context.literal_is_false(r) {
                        continue;
                    }
                    if context.literal_is_true(r) {
                        live.clear();
                        break;
                    }
                    live.push(r);
                }
                if live.len() == 2 && live[0] != live[1].negated() {
                    context.update_rule_stats("circuit: degree 2");
                    context.add_boolean_equality_relation(live[0], live[1].negated());
                }
            }
        }

        if new_literals.len() < num_arcs {
            context.update_rule_stats("circuit: removed false arcs");
            self.kind = ConstraintKind::Circuit {
                tails: new_tails,
                heads: new_heads,
                literals: new_literals,
            };
            return true;
        }
        false
    }
}
