//! Integration boundary with the pure-SAT clause-database presolver: the
//! Boolean-or and half-reified Boolean-and constraints are extracted into
//! clause form, handed to a [`ClausePresolver`], and the surviving clauses
//! are put back into the model. Any new variables and postsolve clauses the
//! presolver emits are accepted.

use fnv::FnvHashMap;
use log::debug;

use crate::engine::variables::Literal;
use crate::engine::variables::PropositionalVariable;
use crate::model::Constraint;
use crate::model::ConstraintKind;
use crate::model::Model;
use crate::model::VarRef;
use crate::presolve::context::PresolveContext;

/// The interface the presolve expects from a clause-database presolver.
pub trait ClausePresolver {
    fn set_num_variables(&mut self, num_variables: usize);

    fn add_clause(&mut self, clause: &[Literal]);

    /// Simplifies the database; `can_be_removed[v]` marks the variables that
    /// appear nowhere outside the clause database. Returns false when the
    /// database is infeasible.
    fn presolve(&mut self, can_be_removed: &[bool]) -> bool;

    /// The number of variables, including any the presolver introduced.
    fn num_variables(&self) -> usize;

    /// Literals that must hold in every solution.
    fn fixed_literals(&self) -> Vec<Literal>;

    /// The simplified clause database.
    fn clauses(&self) -> Vec<Vec<Literal>>;

    /// Clauses the postsolver must replay to reconstruct eliminated
    /// variables, deepest first.
    fn postsolve_clauses(&self) -> Vec<Vec<Literal>>;
}

/// A clause presolver limited to unit propagation, tautology removal and
/// duplicate-literal removal. It never eliminates variables, so its
/// postsolve recipe is empty.
#[derive(Debug, Default)]
pub struct UnitPropagationPresolver {
    num_variables: usize,
    clauses: Vec<Vec<Literal>>,
    values: Vec<Option<bool>>,
    unsat: bool,
}

impl UnitPropagationPresolver {
    fn literal_value(&self, literal: Literal) -> Option<bool> {
        self.values[literal.variable().index() as usize].map(|value| value == literal.is_positive())
    }

    fn assign(&mut self, literal: Literal) {
        match self.literal_value(literal) {
            Some(false) => self.unsat = true,
            Some(true) => {}
            None => {
                self.values[literal.variable().index() as usize] = Some(literal.is_positive())
            }
        }
    }
}

impl ClausePresolver for UnitPropagationPresolver {
    fn set_num_variables(&mut self, num_variables: usize) {
        self.num_variables = self.num_variables.max(num_variables);
        self.values.resize(self.num_variables, None);
    }

    fn add_clause(&mut self, clause: &[Literal]) {
        let mut clause = clause.to_vec();
        clause.sort_unstable_by_key(|literal| literal.to_u32());
        clause.dedup();
        if clause
            .windows(2)
            .any(|pair| pair[0].variable() == pair[1].variable())
        {
            return;
        }
        self.clauses.push(clause);
    }

    fn presolve(&mut self, _can_be_removed: &[bool]) -> bool {
        loop {
            let mut fixed_something = false;
            let mut remaining = Vec::with_capacity(self.clauses.len());
            for clause in std::mem::take(&mut self.clauses) {
                let mut simplified = Vec::with_capacity(clause.len());
                let mut satisfied = false;
                for literal in clause {
                    match self.literal_value(literal) {
                        Some(true) => {
                            satisfied = true;
                            break;
                        }
                        Some(false) => {}
                        None => simplified.push(literal),
                    }
                }
                if satisfied {
                    continue;
                }
                match simplified.len() {
                    0 => {
                        self.unsat = true;
                        return false;
                    }
                    1 => {
                        self.assign(simplified[0]);
                        if self.unsat {
                            return false;
                        }
                        fixed_something = true;
                    }
                    _ => remaining.push(simplified),
                }
            }
            self.clauses = remaining;
            if !fixed_something {
                return true;
            }
        }
    }

    fn num_variables(&self) -> usize {
        self.num_variables
    }

    fn fixed_literals(&self) -> Vec<Literal> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(var, value)| {
                value.map(|value| {
                    Literal::new(PropositionalVariable::new(var as u32), value)
                })
            })
            .collect()
    }

    fn clauses(&self) -> Vec<Vec<Literal>> {
        self.clauses.clone()
    }

    fn postsolve_clauses(&self) -> Vec<Vec<Literal>> {
        Vec::new()
    }
}

fn convert(r: VarRef) -> Literal {
    Literal::new(
        PropositionalVariable::new(r.variable() as u32),
        r.is_positive(),
    )
}

fn convert_back(literal: Literal) -> VarRef {
    let r = VarRef::from_index(literal.variable().index() as usize);
    if literal.is_positive() {
        r
    } else {
        r.negated()
    }
}

/// Extracts the pure-SAT part of the model, presolves it, and reinstalls the
/// result. Disabled when enumerating all solutions since the clause presolve
/// may remove feasible assignments of unconstrained variables.
pub(crate) fn presolve_pure_sat_part(
    context: &mut PresolveContext<'_>,
    presolver: &mut dyn ClausePresolver,
) {
    if context.is_unsat || context.enumerate_all_solutions {
        return;
    }

    let num_variables = context.num_variables();
    presolver.set_num_variables(num_variables);

    // Load all clauses into the presolver and take them out of the model.
    let mut num_removed_constraints = 0;
    for c in 0..context.working_model.constraints.len() {
        let ct = &context.working_model.constraints[c];
        if ct.has_enforcement_literal() {
            match (&ct.kind, ct.enforcement.len()) {
                (ConstraintKind::BoolAnd { literals }, 1) => {
                    num_removed_constraints += 1;
                    let negated_enforcement = convert(ct.enforcement[0].negated());
                    for &literal in literals.clone().iter() {
                        presolver.add_clause(&[negated_enforcement, convert(literal)]);
                    }
                    context.working_model.constraints[c].clear();
                    context.update_constraint_variable_usage(c);
                }
                _ => {}
            }
            continue;
        }
        if let ConstraintKind::BoolOr { literals } = &ct.kind {
            num_removed_constraints += 1;
            let clause: Vec<Literal> = literals.iter().map(|&r| convert(r)).collect();
            presolver.add_clause(&clause);
            context.working_model.constraints[c].clear();
            context.update_constraint_variable_usage(c);
        }
    }
    if num_removed_constraints == 0 {
        return;
    }

    // Variables used elsewhere (or by the objective) must survive.
    let can_be_removed: Vec<bool> = (0..num_variables)
        .map(|v| context.var_to_constraints[v].is_empty())
        .collect();

    if !presolver.presolve(&can_be_removed) {
        debug!("infeasibility detected during the clause presolve");
        context.is_unsat = true;
        return;
    }

    // Accept any new variables the presolver introduced.
    if presolver.num_variables() > context.num_variables() {
        debug!("new variables added by the clause presolve");
        for _ in context.num_variables()..presolver.num_variables() {
            let _ = context.append_variable(crate::basic_types::Domain::new(0, 1));
        }
    }

    for literal in presolver.fixed_literals() {
        context.set_literal_to_true(convert_back(literal));
        if context.is_unsat {
            return;
        }
    }

    // Reinstall the simplified clauses and record the postsolve ones.
    extract_clauses(&presolver.clauses(), context.working_model);
    context.update_new_constraints_variable_usage();
    extract_clauses(&presolver.postsolve_clauses(), context.mapping_model);
}

/// Adds clause-form constraints to the model, regrouping binary clauses into
/// half-reified Boolean-ands for a more concise result.
fn extract_clauses(clauses: &[Vec<Literal>], model: &mut Model) {
    let mut ref_to_bool_and: FnvHashMap<VarRef, usize> = FnvHashMap::default();
    for clause in clauses {
        if clause.is_empty() {
            continue;
        }

        if clause.len() == 2 {
            let a = convert_back(clause[0]);
            let b = convert_back(clause[1]);
            if let Some(&c) = ref_to_bool_and.get(&a.negated()) {
                let ConstraintKind::BoolAnd { literals } = &mut model.constraints[c].kind else {
                    unreachable!("tracked bool_and index");
                };
                literals.push(b);
            } else if let Some(&c) = ref_to_bool_and.get(&b.negated()) {
                let ConstraintKind::BoolAnd { literals } = &mut model.constraints[c].kind else {
                    unreachable!("tracked bool_and index");
                };
                literals.push(a);
            } else {
                let c = model.add_constraint(Constraint::enforced(
                    vec![a.negated()],
                    ConstraintKind::BoolAnd { literals: vec![b] },
                ));
                let _ = ref_to_bool_and.insert(a.negated(), c);
            }
            continue;
        }

        let literals = clause.iter().map(|&l| convert_back(l)).collect();
        let _ = model.add_constraint(Constraint::unenforced(ConstraintKind::BoolOr { literals }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_types::Domain;

    fn boolean_model(n: usize) -> Model {
        let mut model = Model::default();
        for _ in 0..n {
            let _ = model.new_variable(Domain::new(0, 1));
        }
        model
    }

    #[test]
    fn unit_propagation_fixes_chained_literals() {
        let mut presolver = UnitPropagationPresolver::default();
        presolver.set_num_variables(3);
        let lit =
            |v: usize, sign: bool| Literal::new(PropositionalVariable::new(v as u32), sign);

        presolver.add_clause(&[lit(0, true)]);
        presolver.add_clause(&[lit(0, false), lit(1, true)]);
        presolver.add_clause(&[lit(1, false), lit(2, true)]);

        assert!(presolver.presolve(&[true, true, true]));
        assert_eq!(presolver.fixed_literals().len(), 3);
        assert!(presolver.clauses().is_empty());
    }

    #[test]
    fn contradicting_units_are_unsat() {
        let mut presolver = UnitPropagationPresolver::default();
        presolver.set_num_variables(2);
        let lit =
            |v: usize, sign: bool| Literal::new(PropositionalVariable::new(v as u32), sign);

        presolver.add_clause(&[lit(0, true)]);
        presolver.add_clause(&[lit(0, false), lit(1, true)]);
        presolver.add_clause(&[lit(0, false), lit(1, false)]);

        assert!(!presolver.presolve(&[true, true]));
    }

    #[test]
    fn sat_part_is_extracted_and_reinstalled() {
        let mut working = boolean_model(4);
        let a = VarRef::from_index(0);
        let b = VarRef::from_index(1);
        let c = VarRef::from_index(2);
        let d = VarRef::from_index(3);
        let _ = working.add_constraint(Constraint::unenforced(ConstraintKind::BoolOr {
            literals: vec![a, b, c],
        }));
        let _ = working.add_constraint(Constraint::unenforced(ConstraintKind::BoolOr {
            literals: vec![d],
        }));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        let mut presolver = UnitPropagationPresolver::default();
        presolve_pure_sat_part(&mut context, &mut presolver);

        assert!(!context.is_unsat);
        // The unit clause fixed d; the ternary clause survives.
        assert!(context.literal_is_true(d));
        let live: Vec<_> = context
            .working_model
            .constraints
            .iter()
            .filter(|ct| !ct.is_empty())
            .collect();
        assert_eq!(live.len(), 1);
        assert!(matches!(&live[0].kind, ConstraintKind::BoolOr { .. }));
    }

    #[test]
    fn binary_clauses_are_regrouped_into_bool_and() {
        let mut model = boolean_model(3);
        let lit =
            |v: usize, sign: bool| Literal::new(PropositionalVariable::new(v as u32), sign);
        // ~a | b and ~a | c regroup under the same enforcement literal.
        extract_clauses(
            &[vec![lit(0, false), lit(1, true)], vec![lit(0, false), lit(2, true)]],
            &mut model,
        );
        assert_eq!(model.constraints.len(), 1);
        let ct = &model.constraints[0];
        assert_eq!(ct.enforcement, vec![VarRef::from_index(0)]);
        let ConstraintKind::BoolAnd { literals } = &ct.kind else {
            panic!("expected a bool_and");
        };
        assert_eq!(literals.len(), 2);
    }
}
