use fnv::FnvHashSet;
use itertools::Itertools;

use crate::basic_types::Domain;
use crate::model::Constraint;
use crate::model::ConstraintKind;
use crate::presolve::context::PresolveContext;

impl Constraint {
    /// `vars[index] = target`.
    pub(crate) fn presolve_element(&mut self, context: &mut PresolveContext<'_>) -> bool {
        if self.has_enforcement_literal() {
            return false;
        }
        let ConstraintKind::Element {
            index,
            target,
            vars,
        } = &self.kind
        else {
            unreachable!("dispatched on the constraint kind");
        };
        let (index, target) = (*index, *target);
        let vars = vars.clone();

        let mut reduced_index_domain =
            context.intersect_domain_with(index, &Domain::new(0, vars.len() as i64 - 1));
        if context.is_unsat {
            return true;
        }

        // For every still-reachable index value, feed the union of the cell
        // domains into the target; cells incompatible with the target remove
        // their index value.
        let mut all_constants = true;
        let mut all_included_in_target_domain = true;
        let mut inferred_domain = Domain::empty();
        let target_domain = context.domain_of(target);
        for value in context.domain_of(index).values() {
            let r = vars[value as usize];
            let domain = context.domain_of(r);
            if domain.intersection_with(&target_domain).is_empty() {
                let _ = context
                    .intersect_domain_with(index, &Domain::singleton(value).complement());
                reduced_index_domain = true;
            } else {
                if !domain.is_fixed() {
                    all_constants = false;
                }
                if !domain.is_included_in(&target_domain) {
                    all_included_in_target_domain = false;
                }
                inferred_domain = inferred_domain.union_with(&domain);
            }
        }
        if context.is_unsat {
            return true;
        }
        if reduced_index_domain {
            context.update_rule_stats("element: reduced index domain");
        }
        if context.intersect_domain_with(target, &inferred_domain) {
            if context.is_unsat {
                return true;
            }
            context.update_rule_stats("element: reduced target domain");
        }

        let unique_index =
            context.variable_is_unique_and_removable(index) || context.is_fixed(index);
        if all_constants && unique_index {
            // The constraint is only here to reduce the target domain; it
            // moves to the mapping model so the index can be reconstructed
            // during postsolve.
            context.update_rule_stats("element: trivial target domain reduction");
            let _ = context.mapping_model.add_constraint(self.clone());
            self.clear();
            return true;
        }

        let unique_target =
            context.variable_is_unique_and_removable(target) || context.is_fixed(target);
        if all_included_in_target_domain && unique_target {
            context.update_rule_stats("element: trivial index domain reduction");
            let _ = context.mapping_model.add_constraint(self.clone());
            self.clear();
            return true;
        }

        false
    }

    /// Row-wise and column-wise filtering of a table constraint.
    pub(crate) fn presolve_table(&mut self, context: &mut PresolveContext<'_>) -> bool {
        if self.has_enforcement_literal() {
            return false;
        }
        let ConstraintKind::Table {
            vars,
            tuples,
            negated,
        } = &self.kind
        else {
            unreachable!("dispatched on the constraint kind");
        };
        if *negated {
            return false;
        }
        let vars = vars.clone();
        let tuples = tuples.clone();
        if vars.is_empty() {
            context.update_rule_stats("table: empty constraint");
            self.clear();
            return true;
        }
        let num_vars = vars.len();
        let num_tuples = tuples.len();

        // Drop the rows that have a cell outside the current domains.
        let mut new_tuples: Vec<Vec<i64>> = Vec::with_capacity(num_tuples);
        let mut new_domains: Vec<FnvHashSet<i64>> = vec![FnvHashSet::default(); num_vars];
        'rows: for tuple in &tuples {
            for (j, &value) in tuple.iter().enumerate() {
                if !context.domain_of(vars[j]).contains(value) {
                    continue 'rows;
                }
            }
            new_tuples.push(tuple.clone());
            for (j, &value) in new_tuples.last().unwrap().iter().enumerate() {
                let _ = new_domains[j].insert(value);
            }
        }
        new_tuples.sort_unstable();
        new_tuples.dedup();

        let mut changed = false;
        if new_tuples.len() < num_tuples {
            context.update_rule_stats("table: removed rows");
            changed = true;
        }

        // Intersect each column's variable with the surviving cell values.
        let mut domain_changed = false;
        for (j, values) in new_domains.iter().enumerate() {
            domain_changed |= context.intersect_domain_with(
                vars[j],
                &Domain::from_values(values.iter().copied().collect()),
            );
            if context.is_unsat {
                return true;
            }
        }
        if domain_changed {
            context.update_rule_stats("table: reduced variable domains");
        }
        if num_vars == 1 {
            // The domain update above is all this constraint can say.
            context.update_rule_stats("table: only one column");
            self.clear();
            return true;
        }

        // A table covering the full Cartesian product is vacuous.
        let product: u64 = new_domains
            .iter()
            .fold(1u64, |product, values| {
                product.saturating_mul(values.len() as u64)
            });
        if product == new_tuples.len() as u64 {
            context.update_rule_stats("table: all tuples");
            self.clear();
            return true;
        }

        // Switch to the negated table when the complement is much smaller.
        if new_tuples.len() as f64 > 0.7 * product as f64 {
            let columns: Vec<Vec<i64>> = new_domains
                .iter()
                .map(|values| values.iter().copied().sorted_unstable().collect())
                .collect();
            let mut all_tuples: Vec<Vec<i64>> = Vec::with_capacity(product as usize);
            for i in 0..product as usize {
                let mut tuple = Vec::with_capacity(num_vars);
                let mut index = i;
                for column in &columns {
                    tuple.push(column[index % column.len()]);
                    index /= column.len();
                }
                all_tuples.push(tuple);
            }
            all_tuples.sort_unstable();
            all_tuples.dedup();

            let kept: FnvHashSet<&Vec<i64>> = new_tuples.iter().collect();
            let complement: Vec<Vec<i64>> = all_tuples
                .into_iter()
                .filter(|tuple| !kept.contains(tuple))
                .collect();

            context.update_rule_stats("table: negated");
            self.kind = ConstraintKind::Table {
                vars,
                tuples: complement,
                negated: true,
            };
            return changed;
        }

        if changed {
            self.kind = ConstraintKind::Table {
                vars,
                tuples: new_tuples,
                negated: false,
            };
        }
        changed
    }

    /// All variables take pairwise distinct values.
    pub(crate) fn presolve_all_diff(&mut self, context: &mut PresolveContext<'_>) -> bool {
        if self.has_enforcement_literal() {
            return false;
        }
        let ConstraintKind::AllDifferent { vars } = &self.kind else {
            unreachable!("dispatched on the constraint kind");
        };
        let vars = vars.clone();

        if vars.len() <= 1 {
            context.update_rule_stats("all_diff: empty or one variable");
            self.clear();
            return true;
        }

        // Two identical references can never be distinct.
        if vars
            .iter()
            .map(|r| r.variable())
            .sorted_unstable()
            .tuple_windows()
            .any(|(a, b)| a == b)
        {
            context.update_rule_stats("all_diff: duplicate variables");
            context.is_unsat = true;
            return true;
        }

        // Remove the value of each fixed variable from every other domain,
        // re-running since a removal may fix further variables.
        let mut removed_fixed_values = false;
        let mut processed: FnvHashSet<usize> = FnvHashSet::default();
        loop {
            let mut fixed_value = None;
            for (i, &r) in vars.iter().enumerate() {
                if !processed.contains(&i) && context.is_fixed(r) {
                    let _ = processed.insert(i);
                    fixed_value = Some((i, context.min_of(r)));
                    break;
                }
            }
            let Some((fixed_position, value)) = fixed_value else {
                break;
            };
            for (i, &r) in vars.iter().enumerate() {
                if i == fixed_position {
                    continue;
                }
                removed_fixed_values |= context
                    .intersect_domain_with(r, &Domain::singleton(value).complement());
                if context.is_unsat {
                    return true;
                }
            }
        }
        if removed_fixed_values {
            context.update_rule_stats("all_diff: removed fixed values");
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::model::VarRef;

    #[test]
    fn element_restricts_index_and_target() {
        let mut working = Model::default();
        let a = working.new_variable(Domain::new(2, 2));
        let b = working.new_variable(Domain::new(7, 9));
        let c = working.new_variable(Domain::new(0, 1));
        let index = working.new_variable(Domain::new(-2, 10));
        let target = working.new_variable(Domain::new(2, 8));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = Constraint::unenforced(ConstraintKind::Element {
            index,
            target,
            vars: vec![a, b, c],
        });
        let _ = ct.presolve_element(&mut context);

        // Index 2 points at c whose domain [0, 1] misses the target domain.
        assert_eq!(context.domain_of(index), Domain::new(0, 1));
        // Target collapses to the union of the reachable cells.
        assert_eq!(
            context.domain_of(target),
            Domain::from_values(vec![2, 7, 8])
        );
    }

    #[test]
    fn constant_element_with_free_index_moves_to_the_mapping_model() {
        let mut working = Model::default();
        let a = working.new_variable(Domain::singleton(3));
        let b = working.new_variable(Domain::singleton(5));
        let index = working.new_variable(Domain::new(0, 1));
        let target = working.new_variable(Domain::new(0, 10));
        let c0 = working.add_constraint(Constraint::unenforced(ConstraintKind::Element {
            index,
            target,
            vars: vec![a, b],
        }));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = std::mem::take(&mut context.working_model.constraints[c0]);
        assert!(ct.presolve_element(&mut context));
        assert!(ct.is_empty());
        assert_eq!(context.mapping_model.constraints.len(), 1);
        assert_eq!(context.domain_of(target), Domain::from_values(vec![3, 5]));
    }

    #[test]
    fn table_rows_outside_domains_are_dropped() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 2));
        let y = working.new_variable(Domain::new(0, 2));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = Constraint::unenforced(ConstraintKind::Table {
            vars: vec![x, y],
            tuples: vec![vec![0, 0], vec![1, 5], vec![2, 1]],
            negated: false,
        });
        assert!(ct.presolve_table(&mut context));
        let ConstraintKind::Table { tuples, .. } = &ct.kind else {
            panic!("still a table");
        };
        assert_eq!(tuples.len(), 2);
        // y can only be 0 or 1 now.
        assert_eq!(context.domain_of(y), Domain::new(0, 1));
    }

    #[test]
    fn full_table_is_vacuous() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 1));
        let y = working.new_variable(Domain::new(0, 1));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = Constraint::unenforced(ConstraintKind::Table {
            vars: vec![x, y],
            tuples: vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]],
            negated: false,
        });
        assert!(ct.presolve_table(&mut context));
        assert!(ct.is_empty());
    }

    #[test]
    fn near_full_table_is_negated() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 1));
        let y = working.new_variable(Domain::new(0, 1));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = Constraint::unenforced(ConstraintKind::Table {
            vars: vec![x, y],
            tuples: vec![vec![0, 0], vec![0, 1], vec![1, 0]],
            negated: false,
        });
        let _ = ct.presolve_table(&mut context);
        let ConstraintKind::Table { tuples, negated, .. } = &ct.kind else {
            panic!("still a table");
        };
        assert!(*negated);
        assert_eq!(tuples, &vec![vec![1, 1]]);
    }

    #[test]
    fn all_diff_removes_fixed_values() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::singleton(1));
        let y = working.new_variable(Domain::new(1, 2));
        let z = working.new_variable(Domain::new(1, 3));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = Constraint::unenforced(ConstraintKind::AllDifferent {
            vars: vec![x, y, z],
        });
        let _ = ct.presolve_all_diff(&mut context);
        // y collapses to 2, which then leaves only 3 for z.
        assert_eq!(context.domain_of(y), Domain::singleton(2));
        assert_eq!(context.domain_of(z), Domain::singleton(3));
    }

    #[test]
    fn all_diff_with_duplicate_variable_is_unsat() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 5));
        let y = working.new_variable(Domain::new(0, 5));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = Constraint::unenforced(ConstraintKind::AllDifferent {
            vars: vec![x, y, VarRef::from_index(0)],
        });
        assert!(ct.presolve_all_diff(&mut context));
        assert!(context.is_unsat);
    }
}
