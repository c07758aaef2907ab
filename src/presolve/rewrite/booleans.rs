use crate::model::Constraint;
use crate::model::ConstraintKind;
use crate::model::VarRef;
use crate::presolve::context::PresolveContext;

impl Constraint {
    /// At least one literal must be true. Enforcement literals are folded
    /// into the clause; a two-literal clause is normalised into a
    /// half-reified Boolean-and so all implications look the same downstream.
    pub(crate) fn presolve_bool_or(&mut self, context: &mut PresolveContext<'_>) -> bool {
        let ConstraintKind::BoolOr { literals } = &mut self.kind else {
            unreachable!("dispatched on the constraint kind");
        };

        // Move the enforcement literals inside the clause. The referenced
        // variables do not change, so this is not reported as a change.
        if !self.enforcement.is_empty() {
            context.update_rule_stats("bool_or: removed enforcement literal");
            for literal in self.enforcement.drain(..) {
                literals.push(literal.negated());
            }
        }
        let literals = literals.clone();

        let mut changed = false;
        let mut kept: Vec<VarRef> = Vec::with_capacity(literals.len());
        for literal in literals {
            if context.literal_is_false(literal) {
                changed = true;
                continue;
            }
            if context.literal_is_true(literal) {
                context.update_rule_stats("bool_or: always true");
                self.clear();
                return true;
            }
            // The literal is not used anywhere else, so it can simply be set
            // to true (the objective bumps its variables' usage by one).
            if context.variable_is_unique_and_removable(literal) {
                context.update_rule_stats("bool_or: singleton");
                context.set_literal_to_true(literal);
                self.clear();
                return true;
            }
            kept.push(literal);
        }

        if kept.is_empty() {
            context.update_rule_stats("bool_or: empty");
            context.is_unsat = true;
            return true;
        }
        if kept.len() == 1 {
            context.update_rule_stats("bool_or: only one literal");
            context.set_literal_to_true(kept[0]);
            self.clear();
            return true;
        }
        if kept.len() == 2 {
            // For consistency, all implications become half-reified
            // Boolean-ands.
            context.update_rule_stats("bool_or: implications");
            self.enforcement = vec![kept[0].negated()];
            self.kind = ConstraintKind::BoolAnd {
                literals: vec![kept[1]],
            };
            return changed;
        }

        if changed {
            context.update_rule_stats("bool_or: fixed literals");
            self.kind = ConstraintKind::BoolOr { literals: kept };
        }
        changed
    }

    /// All body literals hold under the enforcement literals. Without
    /// enforcement everything is simply fixed true.
    pub(crate) fn presolve_bool_and(&mut self, context: &mut PresolveContext<'_>) -> bool {
        let ConstraintKind::BoolAnd { literals } = &self.kind else {
            unreachable!("dispatched on the constraint kind");
        };
        let literals = literals.clone();

        if self.enforcement.is_empty() {
            context.update_rule_stats("bool_and: non-reified");
            for literal in literals {
                context.set_literal_to_true(literal);
            }
            self.clear();
            return true;
        }

        let mut changed = false;
        let mut kept: Vec<VarRef> = Vec::with_capacity(literals.len());
        for literal in literals {
            if context.literal_is_false(literal) {
                context.update_rule_stats("bool_and: always false");
                return self.mark_constraint_as_false(context);
            }
            if context.literal_is_true(literal) {
                changed = true;
                continue;
            }
            if context.variable_is_unique_and_removable(literal) {
                changed = true;
                context.set_literal_to_true(literal);
                continue;
            }
            kept.push(literal);
        }

        // Unlike a bool_or, a bool_and over no literals is true.
        if kept.is_empty() {
            self.clear();
            return true;
        }

        if changed {
            context.update_rule_stats("bool_and: fixed literals");
            self.kind = ConstraintKind::BoolAnd { literals: kept };
        }
        changed
    }

    /// At most one literal is true: a fixed-true literal forces all others
    /// false, fixed-false literals are dropped.
    pub(crate) fn presolve_at_most_one(&mut self, context: &mut PresolveContext<'_>) -> bool {
        let ConstraintKind::AtMostOne { literals } = &self.kind else {
            unreachable!("dispatched on the constraint kind");
        };
        crate::marrow_assert_simple!(self.enforcement.is_empty());
        let literals = literals.clone();

        let mut changed = false;
        let mut kept: Vec<VarRef> = Vec::with_capacity(literals.len());
        for &literal in &literals {
            if context.literal_is_true(literal) {
                context.update_rule_stats("at_most_one: satisfied");
                for &other in &literals {
                    if other != literal {
                        context.set_literal_to_false(other);
                    }
                }
                self.clear();
                return true;
            }
            if context.literal_is_false(literal) {
                changed = true;
                continue;
            }
            kept.push(literal);
        }

        if kept.is_empty() {
            self.clear();
            return true;
        }

        if changed {
            context.update_rule_stats("at_most_one: removed literals");
            self.kind = ConstraintKind::AtMostOne { literals: kept };
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_types::Domain;
    use crate::model::Model;

    fn boolean_context(n: usize) -> (Model, Model) {
        let mut model = Model::default();
        for _ in 0..n {
            let _ = model.new_variable(Domain::new(0, 1));
        }
        (model, Model::default())
    }

    fn bool_or(literals: Vec<VarRef>) -> Constraint {
        Constraint::unenforced(ConstraintKind::BoolOr { literals })
    }

    #[test]
    fn empty_clause_is_unsat() {
        let (mut working, mut mapping) = boolean_context(1);
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);
        let a = VarRef::from_index(0);
        context.set_literal_to_false(a);

        let mut ct = bool_or(vec![a]);
        assert!(ct.presolve_bool_or(&mut context));
        assert!(context.is_unsat);
    }

    #[test]
    fn unit_clause_fixes_its_literal() {
        let (mut working, mut mapping) = boolean_context(2);
        let a = VarRef::from_index(0);
        let b = VarRef::from_index(1);
        let c0 = working.add_constraint(bool_or(vec![a, b]));
        let _c1 = working.add_constraint(bool_or(vec![a.negated(), b]));
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);
        context.set_literal_to_false(a);

        let mut ct = std::mem::take(&mut context.working_model.constraints[c0]);
        assert!(ct.presolve_bool_or(&mut context));
        assert!(ct.is_empty());
        assert!(context.literal_is_true(b));
    }

    #[test]
    fn binary_clause_becomes_an_implication() {
        let (mut working, mut mapping) = boolean_context(3);
        let a = VarRef::from_index(0);
        let b = VarRef::from_index(1);
        let c = VarRef::from_index(2);
        // Use each variable twice so none is singleton-removable.
        let c0 = working.add_constraint(bool_or(vec![a, b]));
        let _ = working.add_constraint(bool_or(vec![a, b, c]));
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = std::mem::take(&mut context.working_model.constraints[c0]);
        let _ = ct.presolve_bool_or(&mut context);
        assert_eq!(ct.enforcement, vec![a.negated()]);
        let ConstraintKind::BoolAnd { literals } = &ct.kind else {
            panic!("expected an implication");
        };
        assert_eq!(literals, &vec![b]);
    }

    #[test]
    fn singleton_literal_satisfies_the_clause() {
        let (mut working, mut mapping) = boolean_context(2);
        let a = VarRef::from_index(0);
        let b = VarRef::from_index(1);
        let c0 = working.add_constraint(bool_or(vec![a, b]));
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = std::mem::take(&mut context.working_model.constraints[c0]);
        assert!(ct.presolve_bool_or(&mut context));
        assert!(ct.is_empty());
        assert!(context.literal_is_true(a));
    }

    #[test]
    fn unreified_bool_and_fixes_all_literals() {
        let (mut working, mut mapping) = boolean_context(2);
        let a = VarRef::from_index(0);
        let b = VarRef::from_index(1);
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut ct = Constraint::unenforced(ConstraintKind::BoolAnd {
            literals: vec![a, b.negated()],
        });
        assert!(ct.presolve_bool_and(&mut context));
        assert!(ct.is_empty());
        assert!(context.literal_is_true(a));
        assert!(context.literal_is_false(b));
    }

    #[test]
    fn false_body_propagates_to_the_enforcement() {
        let (mut working, mut mapping) = boolean_context(3);
        let e = VarRef::from_index(0);
        let a = VarRef::from_index(1);
        // e and a both appear elsewhere.
        let _ = working.add_constraint(bool_or(vec![e, a, VarRef::from_index(2)]));
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);
        context.set_literal_to_false(a);

        let mut ct = Constraint::enforced(vec![e], ConstraintKind::BoolAnd { literals: vec![a] });
        assert!(ct.presolve_bool_and(&mut context));
        // e must now be false.
        assert!(context.literal_is_false(e));
    }

    #[test]
    fn true_literal_in_at_most_one_forces_the_rest_false() {
        let (mut working, mut mapping) = boolean_context(3);
        let a = VarRef::from_index(0);
        let b = VarRef::from_index(1);
        let c = VarRef::from_index(2);
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);
        context.set_literal_to_true(a);

        let mut ct = Constraint::unenforced(ConstraintKind::AtMostOne {
            literals: vec![a, b, c.negated()],
        });
        assert!(ct.presolve_at_most_one(&mut context));
        assert!(ct.is_empty());
        assert!(context.literal_is_false(b));
        assert!(context.literal_is_true(c));
    }
}
