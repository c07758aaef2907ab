use fnv::FnvHashSet;

use crate::basic_types::Domain;
use crate::model::Constraint;
use crate::model::ConstraintKind;
use crate::model::LinearConstraint;
use crate::model::VarRef;
use crate::presolve::context::PresolveContext;

impl Constraint {
    /// `target = max(vars)`.
    pub(crate) fn presolve_int_max(&mut self, context: &mut PresolveContext<'_>) -> bool {
        let ConstraintKind::IntMax { target, vars } = &self.kind else {
            unreachable!("dispatched on the constraint kind");
        };
        let target = *target;
        let mut vars = vars.clone();

        if vars.is_empty() {
            return self.mark_constraint_as_false(context);
        }

        // Pass 1: compute the inferred minimum of the target and remove
        // duplicated arguments. An argument that is the negation of another
        // (or of the target) forces the maximum to be at least zero.
        let mut target_min = context.min_of(target);
        let mut contains_target = false;
        let mut used: FnvHashSet<VarRef> = FnvHashSet::default();
        let mut deduplicated: Vec<VarRef> = Vec::with_capacity(vars.len());
        for &r in &vars {
            if r == target {
                contains_target = true;
            }
            if used.contains(&r) {
                continue;
            }
            if used.contains(&r.negated()) || r == target.negated() {
                target_min = target_min.max(0);
            }
            let _ = used.insert(r);
            deduplicated.push(r);
            target_min = target_min.max(context.min_of(r));
        }
        if deduplicated.len() < vars.len() {
            context.update_rule_stats("int_max: removed dup");
        }
        vars = deduplicated;

        if contains_target {
            // x = max(x, ...) means x >= arg for every other argument.
            context.update_rule_stats("int_max: x = max(x, ...)");
            for &r in &vars {
                if r == target {
                    continue;
                }
                let _ = context.working_model.add_constraint(Constraint::enforced(
                    self.enforcement.clone(),
                    LinearConstraint::new(
                        vec![target, r],
                        vec![1, -1],
                        Domain::new(0, i64::MAX),
                    )
                    .into(),
                ));
            }
            self.clear();
            return true;
        }

        // Update the target domain with the union of the argument domains
        // clipped to the currently possible window.
        let mut domain_reduced = false;
        if self.enforcement.is_empty() {
            let target_max = context.max_of(target);
            let mut inferred_domain = Domain::empty();
            for &r in &vars {
                inferred_domain = inferred_domain.union_with(
                    &context
                        .domain_of(r)
                        .intersection_with(&Domain::new(target_min, target_max)),
                );
            }
            domain_reduced |= context.intersect_domain_with(target, &inferred_domain);
            if context.is_unsat {
                return true;
            }
        }

        // Pass 2: update the argument domains and drop the arguments that can
        // never reach the target.
        let size = vars.len();
        let target_max = context.max_of(target);
        let mut kept: Vec<VarRef> = Vec::with_capacity(size);
        for &r in &vars {
            if self.enforcement.is_empty() {
                domain_reduced |=
                    context.intersect_domain_with(r, &Domain::new(i64::MIN, target_max));
                if context.is_unsat {
                    return true;
                }
            }
            if context.max_of(r) >= target_min {
                kept.push(r);
            }
        }
        if domain_reduced {
            context.update_rule_stats("int_max: reduced domains");
        }

        let mut modified = false;
        if kept.len() < size {
            context.update_rule_stats("int_max: removed variables");
            modified = true;
        }

        if kept.is_empty() {
            return self.mark_constraint_as_false(context);
        }
        if kept.len() == 1 {
            // Convert to an equality. A new constraint is created so that it
            // is processed again from scratch.
            context.update_rule_stats("int_max: converted to equality");
            let _ = context.working_model.add_constraint(Constraint::enforced(
                self.enforcement.clone(),
                LinearConstraint::new(vec![target, kept[0]], vec![1, -1], Domain::singleton(0))
                    .into(),
            ));
            self.clear();
            return true;
        }

        self.kind = ConstraintKind::IntMax { target, vars: kept };
        modified
    }

    /// `target = min(vars)` is `neg(target) = max(neg(vars))`.
    pub(crate) fn presolve_int_min(&mut self, context: &mut PresolveContext<'_>) -> bool {
        let ConstraintKind::IntMin { target, vars } = &self.kind else {
            unreachable!("dispatched on the constraint kind");
        };
        let target = target.negated();
        let vars = vars.iter().map(|r| r.negated()).collect();
        self.kind = ConstraintKind::IntMax { target, vars };
        self.presolve_int_max(context)
    }

    /// `target = product(vars)`.
    pub(crate) fn presolve_int_prod(&mut self, context: &mut PresolveContext<'_>) -> bool {
        if self.has_enforcement_literal() {
            return false;
        }
        let ConstraintKind::IntProd { target, vars } = &self.kind else {
            unreachable!("dispatched on the constraint kind");
        };
        let target = *target;
        let vars = vars.clone();

        if vars.len() == 2 {
            let mut a = vars[0];
            let mut b = vars[1];
            if context.is_fixed(b) {
                std::mem::swap(&mut a, &mut b);
            }
            if context.is_fixed(a) {
                // The binary product with a fixed factor is linear.
                let _ = context.working_model.add_constraint(Constraint::unenforced(
                    LinearConstraint::new(
                        vec![b, target],
                        vec![context.min_of(a), -1],
                        Domain::singleton(0),
                    )
                    .into(),
                ));
                context.update_rule_stats("int_prod: linearize product by constant");
                self.clear();
                return true;
            }
        }

        // Otherwise only the all-Boolean case is presolved.
        if !target.is_positive() {
            return false;
        }
        for &r in &vars {
            if !r.is_positive() || context.min_of(r) < 0 || context.max_of(r) > 1 {
                return false;
            }
        }

        let _ = context.intersect_domain_with(target, &Domain::new(0, 1));
        if context.is_unsat {
            return true;
        }
        context.update_rule_stats("int_prod: all Boolean");

        // target => AND(vars), and target or one factor is false.
        let _ = context.working_model.add_constraint(Constraint::enforced(
            vec![target],
            ConstraintKind::BoolAnd {
                literals: vars.clone(),
            },
        ));
        let mut clause = vec![target];
        clause.extend(vars.iter().map(|r| r.negated()));
        let _ = context
            .working_model
            .add_constraint(Constraint::unenforced(ConstraintKind::BoolOr {
                literals: clause,
            }));
        self.clear();
        true
    }

    /// `target = numerator / denominator`; only the constant-divisor case is
    /// presolved.
    pub(crate) fn presolve_int_div(&mut self, context: &mut PresolveContext<'_>) -> bool {
        let ConstraintKind::IntDiv {
            target,
            numerator,
            denominator,
        } = &self.kind
        else {
            unreachable!("dispatched on the constraint kind");
        };
        let (target, numerator, denominator) = (*target, *numerator, *denominator);
        if !target.is_positive()
            || !numerator.is_positive()
            || !denominator.is_positive()
            || !context.is_fixed(denominator)
        {
            return false;
        }

        let divisor = context.min_of(denominator);
        if divisor == 0 {
            return self.mark_constraint_as_false(context);
        }
        if context.intersect_domain_with(target, &context.domain_of(numerator).division_by(divisor))
        {
            context.update_rule_stats("int_div: updated domain of target in target = X / cte");
        }
        false
    }

    /// `start + size = end`, enforced by three mutual domain intersections.
    pub(crate) fn presolve_interval(&mut self, context: &mut PresolveContext<'_>) -> bool {
        if !self.enforcement.is_empty() {
            return false;
        }
        let ConstraintKind::Interval { start, size, end } = &self.kind else {
            unreachable!("dispatched on the constraint kind");
        };
        let (start, size, end) = (*start, *size, *end);

        let mut changed = false;
        changed |= context.intersect_domain_with(
            end,
            &context.domain_of(start).addition_with(&context.domain_of(size)),
        );
        changed |= context.intersect_domain_with(
            start,
            &context
                .domain_of(end)
                .addition_with(&context.domain_of(size).negation()),
        );
        changed |= context.intersect_domain_with(
            size,
            &context
                .domain_of(end)
                .addition_with(&context.domain_of(start).negation()),
        );
        if changed {
            context.update_rule_stats("interval: reduced domains");
        }

        // This never changes the constraint-variable graph.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn context_with<'a>(
        working: &'a mut Model,
        mapping: &'a mut Model,
    ) -> PresolveContext<'a> {
        PresolveContext::new(working, mapping, false)
    }

    #[test]
    fn max_target_domain_is_union_of_arguments() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 3));
        let y = working.new_variable(Domain::new(5, 7));
        let target = working.new_variable(Domain::new(-10, 10));
        let mut mapping = Model::default();
        let mut context = context_with(&mut working, &mut mapping);

        let mut ct = Constraint::unenforced(ConstraintKind::IntMax {
            target,
            vars: vec![x, y],
        });
        let _ = ct.presolve_int_max(&mut context);

        // max(x, y) is at least 5 (the min of y), so x is dropped and the
        // constraint becomes target = y.
        assert_eq!(context.min_of(target), 5);
        assert_eq!(context.max_of(target), 7);
        assert!(ct.is_empty());
        let appended = context.working_model.constraints.last().unwrap();
        assert!(matches!(&appended.kind, ConstraintKind::Linear(_)));
    }

    #[test]
    fn max_with_duplicate_arguments() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 3));
        let y = working.new_variable(Domain::new(0, 4));
        let target = working.new_variable(Domain::new(0, 10));
        let mut mapping = Model::default();
        let mut context = context_with(&mut working, &mut mapping);

        let mut ct = Constraint::unenforced(ConstraintKind::IntMax {
            target,
            vars: vec![x, y, x],
        });
        let _ = ct.presolve_int_max(&mut context);
        assert_eq!(context.stats_by_rule_name().get("int_max: removed dup"), Some(&1));
    }

    #[test]
    fn max_containing_its_target_splits_into_inequalities() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 3));
        let target = working.new_variable(Domain::new(0, 10));
        let mut mapping = Model::default();
        let mut context = context_with(&mut working, &mut mapping);

        let mut ct = Constraint::unenforced(ConstraintKind::IntMax {
            target,
            vars: vec![target, x],
        });
        assert!(ct.presolve_int_max(&mut context));
        assert!(ct.is_empty());
        assert_eq!(context.working_model.constraints.len(), 1);
    }

    #[test]
    fn min_is_rewritten_through_negations() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(2, 6));
        let y = working.new_variable(Domain::new(4, 9));
        let target = working.new_variable(Domain::new(-20, 20));
        let mut mapping = Model::default();
        let mut context = context_with(&mut working, &mut mapping);

        let mut ct = Constraint::unenforced(ConstraintKind::IntMin {
            target,
            vars: vec![x, y],
        });
        let _ = ct.presolve_int_min(&mut context);
        // min(x, y) ranges over [2, 6].
        assert_eq!(context.min_of(target), 2);
        assert_eq!(context.max_of(target), 6);
    }

    #[test]
    fn product_by_a_constant_becomes_linear() {
        let mut working = Model::default();
        let c = working.new_variable(Domain::singleton(3));
        let x = working.new_variable(Domain::new(0, 5));
        let target = working.new_variable(Domain::new(0, 100));
        let mut mapping = Model::default();
        let mut context = context_with(&mut working, &mut mapping);

        let mut ct = Constraint::unenforced(ConstraintKind::IntProd {
            target,
            vars: vec![c, x],
        });
        assert!(ct.presolve_int_prod(&mut context));
        assert!(ct.is_empty());
        let appended = context.working_model.constraints.last().unwrap();
        let ConstraintKind::Linear(linear) = &appended.kind else {
            panic!("expected a linear constraint");
        };
        assert_eq!(linear.coeffs, vec![3, -1]);
    }

    #[test]
    fn boolean_product_becomes_an_and() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 1));
        let y = working.new_variable(Domain::new(0, 1));
        let z = working.new_variable(Domain::new(0, 10));
        let mut mapping = Model::default();
        let mut context = context_with(&mut working, &mut mapping);

        let mut ct = Constraint::unenforced(ConstraintKind::IntProd {
            target: z,
            vars: vec![x, y],
        });
        assert!(ct.presolve_int_prod(&mut context));
        assert!(ct.is_empty());
        assert_eq!(context.max_of(z), 1);
        assert_eq!(context.working_model.constraints.len(), 2);
        assert!(matches!(
            &context.working_model.constraints[0].kind,
            ConstraintKind::BoolAnd { .. }
        ));
        assert!(matches!(
            &context.working_model.constraints[1].kind,
            ConstraintKind::BoolOr { .. }
        ));
    }

    #[test]
    fn division_by_a_constant_tightens_the_target() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(2, 11));
        let d = working.new_variable(Domain::singleton(3));
        let target = working.new_variable(Domain::new(-100, 100));
        let mut mapping = Model::default();
        let mut context = context_with(&mut working, &mut mapping);

        let mut ct = Constraint::unenforced(ConstraintKind::IntDiv {
            target,
            numerator: x,
            denominator: d,
        });
        let _ = ct.presolve_int_div(&mut context);
        assert_eq!(context.min_of(target), 0);
        assert_eq!(context.max_of(target), 3);
    }

    #[test]
    fn interval_domains_are_mutually_tightened() {
        let mut working = Model::default();
        let start = working.new_variable(Domain::new(0, 10));
        let size = working.new_variable(Domain::new(2, 3));
        let end = working.new_variable(Domain::new(0, 5));
        let mut mapping = Model::default();
        let mut context = context_with(&mut working, &mut mapping);

        let mut ct = Constraint::unenforced(ConstraintKind::Interval { start, size, end });
        let _ = ct.presolve_interval(&mut context);

        assert_eq!(context.max_of(start), 3);
        assert_eq!(context.min_of(end), 2);
    }
}
