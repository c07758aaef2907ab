use fnv::FnvHashMap;
use fnv::FnvHashSet;
use log::debug;

use crate::basic_types::Domain;
use crate::basic_types::SparseBitset;
use crate::marrow_assert_simple;
use crate::model::Constraint;
use crate::model::LinearConstraint;
use crate::model::Model;
use crate::model::VarRef;
use crate::presolve::affine::AffineRelation;
use crate::presolve::affine::AffineRelationStore;

/// The pseudo-constraint index under which the objective registers its
/// variables, preventing their singleton elimination.
pub(crate) const OBJECTIVE_CONSTRAINT_INDEX: i64 = -1;

/// Wraps the model being rewritten with the extra structure the rewriters
/// need: per-variable in-memory domains, the variable/constraint bipartite
/// graph, the affine repositories, the constant pool, rule-hit statistics,
/// and the modification bitset.
pub struct PresolveContext<'a> {
    pub working_model: &'a mut Model,
    pub mapping_model: &'a mut Model,

    /// All affine relations between variables. The constraints used to detect
    /// them stay in the model (marked as defining) so that domains still
    /// propagate through them; they are only dropped once one side becomes
    /// unused.
    pub affine_relations: AffineRelationStore,
    /// The stricter store limited to `|coeff| = 1, offset = 0`.
    pub var_equiv_relations: AffineRelationStore,

    /// One reference variable per constant value seen so far; a second
    /// variable fixed to the same value is merged into its class.
    constant_to_ref: FnvHashMap<i64, usize>,

    /// The two directions of the variable/constraint graph. They agree at
    /// every quiescent point of the fixpoint loop. `var_to_constraints` may
    /// contain [`OBJECTIVE_CONSTRAINT_INDEX`].
    pub constraint_to_vars: Vec<Vec<usize>>,
    pub var_to_constraints: Vec<FnvHashSet<i64>>,

    /// Sticky infeasibility flag; once set every further rewrite is a no-op.
    pub is_unsat: bool,

    /// Disables the presolve rules that would cut off feasible solutions.
    pub enumerate_all_solutions: bool,

    stats_by_rule_name: FnvHashMap<String, u64>,

    /// Variables whose domain (or affine class) changed since the last sweep.
    pub(crate) modified_domains: SparseBitset<usize>,

    domains: Vec<Domain>,
}

impl<'a> PresolveContext<'a> {
    pub fn new(
        working_model: &'a mut Model,
        mapping_model: &'a mut Model,
        enumerate_all_solutions: bool,
    ) -> PresolveContext<'a> {
        let mut context = PresolveContext {
            working_model,
            mapping_model,
            affine_relations: AffineRelationStore::default(),
            var_equiv_relations: AffineRelationStore::default(),
            constant_to_ref: FnvHashMap::default(),
            constraint_to_vars: Vec::new(),
            var_to_constraints: Vec::new(),
            is_unsat: false,
            enumerate_all_solutions,
            stats_by_rule_name: FnvHashMap::default(),
            modified_domains: SparseBitset::default(),
            domains: Vec::new(),
        };
        context.initialize_new_domains();
        context.update_new_constraints_variable_usage();
        context
    }

    /// Creates the internal structure for any new variables in the working
    /// model.
    pub fn initialize_new_domains(&mut self) {
        for i in self.domains.len()..self.working_model.variables.len() {
            self.domains.push(self.working_model.variables[i].clone());
            if self.is_fixed_var(i) {
                self.exploit_fixed_domain(i);
            }
        }
        self.modified_domains.resize(self.domains.len());
        self.var_to_constraints
            .resize(self.domains.len(), FnvHashSet::default());
        self.affine_relations.grow_to(self.domains.len());
        self.var_equiv_relations.grow_to(self.domains.len());
    }

    /// Adds a fresh variable to the working model.
    pub fn append_variable(&mut self, domain: Domain) -> VarRef {
        let r = self.working_model.new_variable(domain);
        self.initialize_new_domains();
        r
    }

    pub fn num_variables(&self) -> usize {
        self.domains.len()
    }

    pub fn domain_is_empty(&self, r: VarRef) -> bool {
        self.domains[r.variable()].is_empty()
    }

    fn is_fixed_var(&self, var: usize) -> bool {
        !self.domains[var].is_empty() && self.domains[var].is_fixed()
    }

    pub fn is_fixed(&self, r: VarRef) -> bool {
        marrow_assert_simple!(!self.domain_is_empty(r));
        self.domains[r.variable()].is_fixed()
    }

    pub fn literal_is_true(&self, literal: VarRef) -> bool {
        if !self.is_fixed(literal) {
            return false;
        }
        if literal.is_positive() {
            self.domains[literal.variable()].min() == 1
        } else {
            self.domains[literal.variable()].max() == 0
        }
    }

    pub fn literal_is_false(&self, literal: VarRef) -> bool {
        if !self.is_fixed(literal) {
            return false;
        }
        if literal.is_positive() {
            self.domains[literal.variable()].max() == 0
        } else {
            self.domains[literal.variable()].min() == 1
        }
    }

    pub fn min_of(&self, r: VarRef) -> i64 {
        if r.is_positive() {
            self.domains[r.variable()].min()
        } else {
            -self.domains[r.variable()].max()
        }
    }

    pub fn max_of(&self, r: VarRef) -> i64 {
        if r.is_positive() {
            self.domains[r.variable()].max()
        } else {
            -self.domains[r.variable()].min()
        }
    }

    pub fn domain_of(&self, r: VarRef) -> Domain {
        if r.is_positive() {
            self.domains[r.variable()].clone()
        } else {
            self.domains[r.variable()].negation()
        }
    }

    /// Whether the referenced variable is Boolean (domain included in
    /// `{0, 1}`).
    pub fn is_boolean(&self, r: VarRef) -> bool {
        let domain = &self.domains[r.variable()];
        domain.min() >= 0 && domain.max() <= 1
    }

    /// True if the variable appears in exactly one constraint and is not
    /// pinned by the objective or enumeration mode.
    pub fn variable_is_unique_and_removable(&self, r: VarRef) -> bool {
        self.var_to_constraints[r.variable()].len() == 1 && !self.enumerate_all_solutions
    }

    /// Returns true iff the domain shrank. An empty intersection sets the
    /// global unsat flag.
    pub fn intersect_domain_with(&mut self, r: VarRef, domain: &Domain) -> bool {
        marrow_assert_simple!(!self.domain_is_empty(r));
        let var = r.variable();
        let domain = if r.is_positive() {
            domain.clone()
        } else {
            domain.negation()
        };
        if self.domains[var].is_included_in(&domain) {
            return false;
        }
        self.domains[var] = self.domains[var].intersection_with(&domain);

        self.modified_domains.set(var);
        if self.domains[var].is_empty() {
            self.is_unsat = true;
        }
        true
    }

    pub fn set_literal_to_false(&mut self, literal: VarRef) {
        let var = literal.variable();
        let value = if literal.is_positive() { 0 } else { 1 };
        if self.is_fixed_var(var) {
            if self.domains[var].min() != value {
                self.is_unsat = true;
            }
        } else {
            let _ = self.intersect_domain_with(literal.positive(), &Domain::singleton(value));
        }
    }

    pub fn set_literal_to_true(&mut self, literal: VarRef) {
        self.set_literal_to_false(literal.negated())
    }

    pub fn update_rule_stats(&mut self, name: &str) {
        *self.stats_by_rule_name.entry(name.to_owned()).or_insert(0) += 1;
    }

    pub fn stats_by_rule_name(&self) -> &FnvHashMap<String, u64> {
        &self.stats_by_rule_name
    }

    /// Recomputes the graph edges incident to constraint `c` from its current
    /// content. This needs to be called each time a constraint is modified.
    pub fn update_constraint_variable_usage(&mut self, c: usize) {
        marrow_assert_simple!(self.constraint_to_vars.len() == self.working_model.constraints.len());
        let used = self.working_model.constraints[c].referenced_variables();
        self.set_constraint_edges(c, used);
    }

    /// Like [`PresolveContext::update_constraint_variable_usage`] but reads
    /// the constraint from the caller, for the window during which a
    /// constraint is detached from the model while being rewritten.
    pub fn update_constraint_variable_usage_with(&mut self, c: usize, ct: &Constraint) {
        let used = ct.referenced_variables();
        self.set_constraint_edges(c, used);
    }

    fn set_constraint_edges(&mut self, c: usize, used: Vec<usize>) {
        for &v in &self.constraint_to_vars[c] {
            let _ = self.var_to_constraints[v].remove(&(c as i64));
        }
        for &v in &used {
            let _ = self.var_to_constraints[v].insert(c as i64);
        }
        self.constraint_to_vars[c] = used;
    }

    /// Registers the edges of all newly appended constraints.
    pub fn update_new_constraints_variable_usage(&mut self) {
        let old_size = self.constraint_to_vars.len();
        let new_size = self.working_model.constraints.len();
        marrow_assert_simple!(old_size <= new_size);
        self.constraint_to_vars.resize(new_size, Vec::new());
        for c in old_size..new_size {
            let used = self.working_model.constraints[c].referenced_variables();
            for &v in &used {
                let _ = self.var_to_constraints[v].insert(c as i64);
            }
            self.constraint_to_vars[c] = used;
        }
    }

    /// Whether the stored graph matches a fresh recomputation. Meant for
    /// debug checks only.
    pub fn constraint_variable_usage_is_consistent(&self) -> bool {
        if self.is_unsat {
            return true;
        }
        if self.constraint_to_vars.len() != self.working_model.constraints.len() {
            debug!("wrong constraint_to_vars size");
            return false;
        }
        for (c, stored) in self.constraint_to_vars.iter().enumerate() {
            if *stored != self.working_model.constraints[c].referenced_variables() {
                debug!("wrong variable usage for constraint {c}");
                return false;
            }
        }
        true
    }

    /// Regroups fixed variables with the same value into one affine class.
    pub fn exploit_fixed_domain(&mut self, var: usize) {
        marrow_assert_simple!(self.is_fixed_var(var));
        let value = self.domains[var].min();
        if let Some(&representative) = self.constant_to_ref.get(&value) {
            if representative != var {
                let _ = self.affine_relations.try_add(var, representative, 1, 0, true, true);
                let _ = self
                    .var_equiv_relations
                    .try_add(var, representative, 1, 0, true, true);
            }
        } else {
            let _ = self.constant_to_ref.insert(value, var);
        }
    }

    /// Records `ref_x = coeff * ref_y + offset` in the repositories, biasing
    /// representative choice so that a class containing a Boolean variable is
    /// represented by a Boolean variable. Returns true when a new relation
    /// was added; the caller must then mark the originating constraint as
    /// defining.
    pub fn add_affine_relation(
        &mut self,
        ref_x: VarRef,
        ref_y: VarRef,
        coeff: i64,
        offset: i64,
    ) -> bool {
        let x = ref_x.variable();
        let y = ref_y.variable();
        if self.is_fixed_var(x) || self.is_fixed_var(y) {
            return false;
        }

        let c = if ref_x.is_positive() == ref_y.is_positive() {
            coeff
        } else {
            -coeff
        };
        let o = if ref_x.is_positive() { offset } else { -offset };

        let rep_x = self.affine_relations.get(x).representative;
        let rep_y = self.affine_relations.get(y).representative;

        // If a Boolean variable appears in this class then its representative
        // must be Boolean too. This is always possible: a Boolean can never
        // be a |coeff| > 1 multiple of another variable unless fixed to zero.
        let mut allow_rep_x = self.domains[rep_x].min() == 0 && self.domains[rep_x].max() == 1;
        let mut allow_rep_y = self.domains[rep_y].min() == 0 && self.domains[rep_y].max() == 1;
        if !allow_rep_x && !allow_rep_y {
            allow_rep_x = true;
            allow_rep_y = true;
        }

        let mut added = self
            .affine_relations
            .try_add(x, y, c, o, allow_rep_x, allow_rep_y);
        if (c == 1 || c == -1) && o == 0 {
            added |= self
                .var_equiv_relations
                .try_add(x, y, c, o, allow_rep_x, allow_rep_y);
        }
        if added {
            // The domains did not change, but this wakes up any constraint
            // containing these variables.
            self.modified_domains.set(x);
            self.modified_domains.set(y);
        }
        added
    }

    /// Records that two literals are equal (`a = b`, or `a = 1 - b` for
    /// opposite signs) and materializes the relation as a defining linear
    /// constraint so the two variables keep propagating into each other.
    pub fn add_boolean_equality_relation(&mut self, ref_a: VarRef, ref_b: VarRef) {
        if ref_a == ref_b {
            return;
        }
        if ref_a == ref_b.negated() {
            self.is_unsat = true;
            return;
        }
        let a = ref_a.variable();
        let b = ref_b.variable();
        let added = if ref_a.is_positive() == ref_b.is_positive() {
            let added = self.affine_relations.try_add(a, b, 1, 0, true, true);
            added | self.var_equiv_relations.try_add(a, b, 1, 0, true, true)
        } else {
            self.affine_relations.try_add(a, b, -1, 1, true, true)
        };
        if !added {
            return;
        }

        self.modified_domains.set(a);
        self.modified_domains.set(b);

        // Keep the relation in the model as well, so the variable usage count
        // stays truthful and the two sides propagate into each other.
        let mut linear = if ref_a.is_positive() == ref_b.is_positive() {
            LinearConstraint::new(
                vec![VarRef::from_index(a), VarRef::from_index(b)],
                vec![1, -1],
                Domain::singleton(0),
            )
        } else {
            LinearConstraint::new(
                vec![VarRef::from_index(a), VarRef::from_index(b)],
                vec![1, 1],
                Domain::singleton(1),
            )
        };
        linear.defining = true;
        let _ = self
            .working_model
            .add_constraint(Constraint::unenforced(linear.into()));
        self.update_new_constraints_variable_usage();
    }

    /// The affine relation of `var` rewritten so that the representative is
    /// the root of the equivalence repository.
    pub fn get_affine_relation(&self, var: usize) -> AffineRelation {
        let mut r = self.affine_relations.get(var);
        let o = self.var_equiv_relations.get(r.representative);
        r.representative = o.representative;
        if o.coeff == -1 {
            r.coeff = -r.coeff;
        }
        r
    }

    /// Writes the in-memory domains back into the working model.
    pub fn sync_model_domains(&mut self) {
        for (var, domain) in self.domains.iter().enumerate() {
            self.working_model.variables[var] = domain.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConstraintKind;

    fn boolean_model(n: usize) -> Model {
        let mut model = Model::default();
        for _ in 0..n {
            let _ = model.new_variable(Domain::new(0, 1));
        }
        model
    }

    #[test]
    fn intersecting_reports_changes_and_unsat() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 10));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        assert!(context.intersect_domain_with(x, &Domain::new(2, 20)));
        assert!(!context.intersect_domain_with(x, &Domain::new(0, 20)));
        assert_eq!(context.min_of(x), 2);
        assert_eq!(context.max_of(x), 10);

        assert!(context.intersect_domain_with(x, &Domain::new(15, 20)));
        assert!(context.is_unsat);
    }

    #[test]
    fn negated_refs_read_the_mirrored_domain() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(2, 7));
        let mut mapping = Model::default();
        let context = PresolveContext::new(&mut working, &mut mapping, false);

        assert_eq!(context.min_of(x.negated()), -7);
        assert_eq!(context.max_of(x.negated()), -2);
        assert_eq!(context.domain_of(x.negated()), Domain::new(-7, -2));
    }

    #[test]
    fn literal_helpers_track_fixed_booleans() {
        let mut working = boolean_model(2);
        let a = VarRef::from_index(0);
        let b = VarRef::from_index(1);
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        context.set_literal_to_true(a);
        context.set_literal_to_false(b);
        assert!(context.literal_is_true(a));
        assert!(context.literal_is_false(a.negated()));
        assert!(context.literal_is_false(b));
        assert!(context.literal_is_true(b.negated()));
    }

    #[test]
    fn boolean_representative_is_kept_boolean() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::new(0, 10));
        let b = working.new_variable(Domain::new(0, 1));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        // x = 5 * b: the Boolean must represent the class.
        assert!(context.add_affine_relation(x, b, 5, 0));
        let relation = context.get_affine_relation(x.variable());
        assert_eq!(relation.representative, b.variable());
    }

    #[test]
    fn fixed_variables_with_equal_value_are_merged() {
        let mut working = Model::default();
        let x = working.new_variable(Domain::singleton(3));
        let y = working.new_variable(Domain::new(0, 5));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        assert!(context.intersect_domain_with(y, &Domain::singleton(3)));
        context.exploit_fixed_domain(y.variable());

        let relation = context.get_affine_relation(y.variable());
        assert_eq!(relation.representative, x.variable());
        assert_eq!(relation.coeff, 1);
        assert_eq!(relation.offset, 0);
    }

    #[test]
    fn usage_graph_stays_consistent() {
        let mut working = boolean_model(3);
        let a = VarRef::from_index(0);
        let b = VarRef::from_index(1);
        let _ = working.add_constraint(Constraint::unenforced(ConstraintKind::BoolOr {
            literals: vec![a, b],
        }));
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        assert!(context.constraint_variable_usage_is_consistent());
        assert!(context.var_to_constraints[0].contains(&0));

        context.working_model.constraints[0].clear();
        context.update_constraint_variable_usage(0);
        assert!(context.var_to_constraints[0].is_empty());
        assert!(context.constraint_variable_usage_is_consistent());
    }

    #[test]
    fn boolean_equality_adds_a_defining_constraint() {
        let mut working = boolean_model(2);
        let a = VarRef::from_index(0);
        let b = VarRef::from_index(1);
        let mut mapping = Model::default();
        let mut context = PresolveContext::new(&mut working, &mut mapping, false);

        context.add_boolean_equality_relation(a, b.negated());
        assert_eq!(context.working_model.constraints.len(), 1);
        let ConstraintKind::Linear(linear) = &context.working_model.constraints[0].kind else {
            panic!("expected a linear constraint");
        };
        assert!(linear.defining);
        assert_eq!(linear.rhs, Domain::singleton(1));
        assert!(context.constraint_variable_usage_is_consistent());

        // a and ~a in one class is a contradiction.
        context.add_boolean_equality_relation(a, a.negated());
        assert!(context.is_unsat);
    }
}
