use std::collections::BTreeMap;

use fnv::FnvHashMap;

use crate::basic_types::Domain;
use crate::basic_types::KeyedVec;
use crate::engine::boolean_trail::BooleanTrail;
use crate::engine::variables::IntegerLiteral;
use crate::engine::variables::IntegerVariable;
use crate::engine::variables::Literal;
use crate::marrow_assert_moderate;
use crate::marrow_assert_simple;

/// A value of a variable together with the literal standing for
/// `variable == value`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueLiteralPair {
    pub value: i64,
    pub literal: Literal,
}

/// Maintains the two-way mapping between bound literals `(var >= bound)` /
/// equality literals `(var == value)` and Boolean literals.
///
/// Associations are created lazily. For every variable an ordered map
/// `bound -> Literal` is kept; when a new bound literal is created it is wired
/// to its neighbours in the map with implications so that the `>=` literals
/// stay monotonic.
///
/// The encoder does not own a clause store: the implications and clauses it
/// produces are buffered and must be drained by the owner (see
/// [`IntegerEncoder::drain_pending_binary_clauses`]). Unit clauses are applied
/// to the [`BooleanTrail`] directly.
#[derive(Debug, Default)]
pub struct IntegerEncoder {
    /// For each variable, the ordered map from bound to the literal standing
    /// for `var >= bound`.
    encoding_by_var: KeyedVec<IntegerVariable, BTreeMap<i64, Literal>>,
    equality_to_associated_literal: FnvHashMap<(IntegerVariable, i64), Literal>,
    /// For each literal, the integer literals it enforces when true.
    reverse_encoding: KeyedVec<Literal, Vec<IntegerLiteral>>,
    is_fully_encoded: KeyedVec<IntegerVariable, bool>,
    /// Bound literals that became true at level zero through the Boolean
    /// layer; consumed by the integer trail at its next propagation.
    newly_fixed_integer_literals: Vec<IntegerLiteral>,
    /// Neighbour implications are emitted by default; probing-style bulk
    /// loading suppresses them until the batched pass runs.
    suppress_implications: bool,
    pending_binary_clauses: Vec<[Literal; 2]>,
    pending_clauses: Vec<Vec<Literal>>,
    num_created_variables: usize,
}

impl IntegerEncoder {
    pub fn new() -> IntegerEncoder {
        IntegerEncoder::default()
    }

    /// Turns off the neighbour implications for newly created associations.
    /// [`IntegerEncoder::add_all_implications_between_associated_literals`]
    /// adds them in bulk and turns them back on.
    pub fn disable_implication_between_literals(&mut self) {
        self.suppress_implications = true;
    }

    pub fn num_created_variables(&self) -> usize {
        self.num_created_variables
    }

    /// Binary clauses produced since the last drain. The owner is responsible
    /// for loading them into its clause store.
    pub fn drain_pending_binary_clauses(&mut self) -> Vec<[Literal; 2]> {
        std::mem::take(&mut self.pending_binary_clauses)
    }

    /// Longer clauses produced since the last drain.
    pub fn drain_pending_clauses(&mut self) -> Vec<Vec<Literal>> {
        std::mem::take(&mut self.pending_clauses)
    }

    pub fn newly_fixed_integer_literals(&self) -> &[IntegerLiteral] {
        &self.newly_fixed_integer_literals
    }

    pub fn clear_newly_fixed_integer_literals(&mut self) {
        self.newly_fixed_integer_literals.clear();
    }

    /// Snaps a bound literal to the domain of its variable: returns the pair
    /// of equivalent canonical forms `(var >= after, var <= before)` where
    /// `after` is the smallest feasible value at or above the bound and
    /// `before` the largest feasible value below it.
    ///
    /// Canonicalization is idempotent: a literal whose bound is feasible maps
    /// to itself.
    pub fn canonicalize(
        &self,
        i_lit: IntegerLiteral,
        domains: &KeyedVec<IntegerVariable, Domain>,
    ) -> (IntegerLiteral, IntegerLiteral) {
        let domain = &domains[i_lit.var];
        let mut after = i_lit.bound;
        let mut before = i_lit.bound - 1;
        marrow_assert_moderate!(before >= domain.min());
        marrow_assert_moderate!(after <= domain.max());

        let mut previous = i64::MIN;
        for interval in domain.iter() {
            if before > previous && before < interval.start {
                before = previous;
            }
            if after > previous && after < interval.start {
                after = interval.start;
            }
            if after <= interval.end {
                break;
            }
            previous = interval.end;
        }
        (
            IntegerLiteral::greater_or_equal(i_lit.var, after),
            IntegerLiteral::lower_or_equal(i_lit.var, before),
        )
    }

    /// Returns the literal standing for the given bound, creating a fresh
    /// Boolean when no association exists yet. Bounds outside the static
    /// domain map to the constant true/false literals.
    pub fn get_or_create_associated_literal(
        &mut self,
        i_lit: IntegerLiteral,
        domains: &KeyedVec<IntegerVariable, Domain>,
        boolean_trail: &mut BooleanTrail,
    ) -> Literal {
        if i_lit.bound <= domains[i_lit.var].min() {
            return boolean_trail.true_literal;
        }
        if i_lit.bound > domains[i_lit.var].max() {
            return boolean_trail.false_literal;
        }

        let (greater_or_equal, lower_or_equal) = self.canonicalize(i_lit, domains);
        if let Some(literal) = self.get_associated_literal(greater_or_equal) {
            return literal;
        }
        if let Some(literal) = self.get_associated_literal(lower_or_equal) {
            return !literal;
        }

        self.num_created_variables += 1;
        let literal = Literal::new(boolean_trail.create_new_variable(), true);
        let _ = self.associate_to_integer_literal(literal, greater_or_equal, domains, boolean_trail);
        literal
    }

    pub fn get_or_create_literal_associated_to_equality(
        &mut self,
        var: IntegerVariable,
        value: i64,
        domains: &KeyedVec<IntegerVariable, Domain>,
        boolean_trail: &mut BooleanTrail,
    ) -> Literal {
        if let Some(&literal) = self.equality_to_associated_literal.get(&(var, value)) {
            return literal;
        }

        self.num_created_variables += 1;
        let literal = Literal::new(boolean_trail.create_new_variable(), true);
        let _ = self.associate_to_integer_equal_value(literal, var, value, domains, boolean_trail);
        literal
    }

    /// Makes `literal` stand for the given bound literal. Returns false when
    /// this creates a root-level conflict.
    pub fn associate_to_integer_literal(
        &mut self,
        literal: Literal,
        i_lit: IntegerLiteral,
        domains: &KeyedVec<IntegerVariable, Domain>,
        boolean_trail: &mut BooleanTrail,
    ) -> bool {
        let domain = &domains[i_lit.var];
        let min = domain.min();
        let max = domain.max();
        if i_lit.bound <= min {
            return boolean_trail.enqueue(literal, None);
        }
        if i_lit.bound > max {
            return boolean_trail.enqueue(!literal, None);
        }

        let (greater_or_equal, lower_or_equal) = self.canonicalize(i_lit, domains);
        self.half_associate_given_literal(greater_or_equal, literal, boolean_trail);
        self.half_associate_given_literal(lower_or_equal, !literal, boolean_trail);

        // Detect the cases >= max and <= min so the corresponding equality
        // literals are registered as well. Both happen at once when the
        // domain has just two values.
        let mut ok = true;
        if greater_or_equal.bound == max {
            ok &= self.associate_to_integer_equal_value(
                literal,
                i_lit.var,
                max,
                domains,
                boolean_trail,
            );
        }
        if -lower_or_equal.bound == min {
            ok &= self.associate_to_integer_equal_value(
                !literal,
                i_lit.var,
                min,
                domains,
                boolean_trail,
            );
        }
        ok
    }

    /// Makes `literal` stand for `var == value`. Returns false when this
    /// creates a root-level conflict.
    pub fn associate_to_integer_equal_value(
        &mut self,
        literal: Literal,
        var: IntegerVariable,
        value: i64,
        domains: &KeyedVec<IntegerVariable, Domain>,
        boolean_trail: &mut BooleanTrail,
    ) -> bool {
        if let Some(&representative) = self.equality_to_associated_literal.get(&(var, value)) {
            // The key is already associated: make the two literals equal.
            if representative != literal {
                self.pending_binary_clauses.push([literal, !representative]);
                self.pending_binary_clauses.push([!literal, representative]);
            }
            return true;
        }
        let _ = self
            .equality_to_associated_literal
            .insert((var, value), literal);
        let _ = self
            .equality_to_associated_literal
            .insert((var.negation(), -value), literal);

        let domain = &domains[var];
        // Fix the literal for values outside the domain and for singletons.
        if !domain.contains(value) {
            return boolean_trail.enqueue(!literal, None);
        }
        if value == domain.min() && value == domain.max() {
            return boolean_trail.enqueue(literal, None);
        }

        // For the first and last value the equality is equivalent to a bound.
        // The recursion stops because the equality key is now registered.
        if value == domain.min() {
            return self.associate_to_integer_literal(
                literal,
                IntegerLiteral::lower_or_equal(var, value),
                domains,
                boolean_trail,
            );
        }
        if value == domain.max() {
            return self.associate_to_integer_literal(
                literal,
                IntegerLiteral::greater_or_equal(var, value),
                domains,
                boolean_trail,
            );
        }

        // (var == value)  <=>  (var >= value) and (var <= value).
        let a = self.get_or_create_associated_literal(
            IntegerLiteral::greater_or_equal(var, value),
            domains,
            boolean_trail,
        );
        let b = self.get_or_create_associated_literal(
            IntegerLiteral::lower_or_equal(var, value),
            domains,
            boolean_trail,
        );
        self.pending_binary_clauses.push([a, !literal]);
        self.pending_binary_clauses.push([b, !literal]);
        self.pending_clauses.push(vec![!a, !b, literal]);
        true
    }

    fn half_associate_given_literal(
        &mut self,
        i_lit: IntegerLiteral,
        literal: Literal,
        boolean_trail: &mut BooleanTrail,
    ) {
        self.reverse_encoding.accomodate(literal, Vec::new());
        self.reverse_encoding.accomodate(!literal, Vec::new());

        if let Some(associated) = self.get_associated_literal(i_lit) {
            if associated != literal {
                self.pending_binary_clauses.push([literal, !associated]);
                self.pending_binary_clauses.push([!literal, associated]);
            }
            return;
        }

        self.add_bound_literal(i_lit, literal);
        if boolean_trail.is_true(literal) && boolean_trail.decision_level() == 0 {
            self.newly_fixed_integer_literals.push(i_lit);
        }
        self.reverse_encoding[literal].push(i_lit);
    }

    /// Registers the `bound -> literal` entry and, unless disabled, wires the
    /// two-sided implications with the neighbouring bounds so that the `>=`
    /// literals stay monotonic.
    fn add_bound_literal(&mut self, i_lit: IntegerLiteral, associated: Literal) {
        self.accomodate_var(i_lit.var);
        let map = &mut self.encoding_by_var[i_lit.var];
        marrow_assert_simple!(!map.contains_key(&i_lit.bound));

        if !self.suppress_implications {
            if let Some((_, &after)) = map.range(i_lit.bound..).next() {
                // after_literal => associated, since a higher bound implies
                // the lower one.
                self.pending_binary_clauses.push([!after, associated]);
            }
            if let Some((_, &before)) = map.range(..i_lit.bound).next_back() {
                // associated => before_literal.
                self.pending_binary_clauses.push([!associated, before]);
            }
        }

        let _ = map.insert(i_lit.bound, associated);
    }

    /// Adds, for every variable, the implication chain between consecutive
    /// associated bound literals, and re-enables per-association implications.
    pub fn add_all_implications_between_associated_literals(&mut self) {
        self.suppress_implications = false;
        for map in self.encoding_by_var.iter() {
            let mut previous: Option<Literal> = None;
            for (_, &literal) in map.iter() {
                if let Some(previous) = previous {
                    // literal => previous.
                    self.pending_binary_clauses.push([!literal, previous]);
                }
                previous = Some(literal);
            }
        }
    }

    pub fn literal_is_associated(&self, i_lit: IntegerLiteral) -> bool {
        self.get_associated_literal(i_lit).is_some()
    }

    pub fn get_associated_literal(&self, i_lit: IntegerLiteral) -> Option<Literal> {
        self.encoding_by_var
            .get(i_lit.var)?
            .get(&i_lit.bound)
            .copied()
    }

    /// The literal associated with the strongest bound at or below the given
    /// one, if any.
    pub fn search_for_literal_at_or_before(&self, i_lit: IntegerLiteral) -> Option<Literal> {
        self.encoding_by_var
            .get(i_lit.var)?
            .range(..=i_lit.bound)
            .next_back()
            .map(|(_, &literal)| literal)
    }

    /// Creates one Boolean per value of the domain and wires
    /// `(var == v) <=> (var >= v) and (var <= v)` plus the consecutive
    /// implications between the bound literals.
    pub fn fully_encode_variable(
        &mut self,
        var: IntegerVariable,
        domains: &KeyedVec<IntegerVariable, Domain>,
        boolean_trail: &mut BooleanTrail,
    ) {
        marrow_assert_simple!(!self.variable_is_fully_encoded(var));
        marrow_assert_simple!(boolean_trail.decision_level() == 0);
        let domain = domains[var].clone();
        marrow_assert_simple!(!domain.is_empty());
        marrow_assert_simple!(
            domain.size() < 100_000,
            "domain too large for a full encoding"
        );

        let values: Vec<i64> = domain.values().collect();

        let mut literals: Vec<Literal> = Vec::with_capacity(values.len());
        if values.len() == 1 {
            literals.push(boolean_trail.true_literal);
        } else if values.len() == 2 {
            let le_first = self.get_or_create_associated_literal(
                IntegerLiteral::lower_or_equal(var, values[0]),
                domains,
                boolean_trail,
            );
            literals.push(le_first);
            literals.push(!le_first);
        } else {
            for &value in &values {
                match self.equality_to_associated_literal.get(&(var, value)) {
                    Some(&literal) => literals.push(literal),
                    None => {
                        literals.push(Literal::new(boolean_trail.create_new_variable(), true))
                    }
                }
            }

            // Create the bound literals in value order; this gives the
            // implications between consecutive bounds for free.
            for i in 0..literals.len() - 1 {
                let le = IntegerLiteral::lower_or_equal(var, values[i]);
                let ge = IntegerLiteral::greater_or_equal(var, values[i + 1]);
                if i == 0 {
                    self.half_associate_given_literal(le, literals[0], boolean_trail);
                    self.half_associate_given_literal(ge, !literals[0], boolean_trail);
                } else if i + 2 == literals.len() {
                    let last = literals[literals.len() - 1];
                    self.half_associate_given_literal(le, !last, boolean_trail);
                    self.half_associate_given_literal(ge, last, boolean_trail);
                } else if !self.literal_is_associated(le) || !self.literal_is_associated(ge) {
                    let fresh = Literal::new(boolean_trail.create_new_variable(), true);
                    self.half_associate_given_literal(le, fresh, boolean_trail);
                    self.half_associate_given_literal(ge, !fresh, boolean_trail);
                }
            }
        }

        for (i, &value) in values.iter().enumerate() {
            let _ = self.associate_to_integer_equal_value(
                literals[i],
                var,
                value,
                domains,
                boolean_trail,
            );
        }

        self.is_fully_encoded.accomodate(var, false);
        self.is_fully_encoded.accomodate(var.negation(), false);
        self.is_fully_encoded[var] = true;
        self.is_fully_encoded[var.negation()] = true;
    }

    pub fn variable_is_fully_encoded(&self, var: IntegerVariable) -> bool {
        self.is_fully_encoded.get(var).copied().unwrap_or(false)
    }

    /// The live `(value, literal)` pairs among the values that have an
    /// equality encoding. A pair whose literal is already true collapses the
    /// result to that single pair.
    pub fn partial_domain_encoding(
        &self,
        var: IntegerVariable,
        domains: &KeyedVec<IntegerVariable, Domain>,
        boolean_trail: &BooleanTrail,
    ) -> Vec<ValueLiteralPair> {
        let domain = &domains[var];
        let mut possible_values = vec![domain.min()];
        if let Some(map) = self.encoding_by_var.get(var) {
            for (&bound, _) in map.iter() {
                if bound >= domain.max() {
                    break;
                }
                if bound > domain.min() {
                    possible_values.push(bound);
                }
            }
        }
        possible_values.push(domain.max());

        let mut encoding = Vec::new();
        for value in possible_values {
            let Some(&literal) = self.equality_to_associated_literal.get(&(var, value)) else {
                continue;
            };
            if boolean_trail.is_true(literal) {
                return vec![ValueLiteralPair { value, literal }];
            }
            if !boolean_trail.is_false(literal) {
                encoding.push(ValueLiteralPair { value, literal });
            }
        }
        encoding
    }

    /// Like [`IntegerEncoder::partial_domain_encoding`] but requires the
    /// variable to be fully encoded, so the result covers the whole domain.
    pub fn full_domain_encoding(
        &self,
        var: IntegerVariable,
        domains: &KeyedVec<IntegerVariable, Domain>,
        boolean_trail: &BooleanTrail,
    ) -> Vec<ValueLiteralPair> {
        marrow_assert_simple!(self.variable_is_fully_encoded(var));
        let mut encoding = Vec::new();
        for value in domains[var].values() {
            let literal = self.equality_to_associated_literal[&(var, value)];
            if boolean_trail.is_true(literal) {
                return vec![ValueLiteralPair { value, literal }];
            }
            if !boolean_trail.is_false(literal) {
                encoding.push(ValueLiteralPair { value, literal });
            }
        }
        encoding
    }

    /// The integer literals enforced by `literal` becoming true.
    pub fn get_integer_literals(&self, literal: Literal) -> &[IntegerLiteral] {
        self.reverse_encoding
            .get(literal)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    fn accomodate_var(&mut self, var: IntegerVariable) {
        self.encoding_by_var.accomodate(var, BTreeMap::new());
    }
}
