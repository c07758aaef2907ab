use std::collections::BinaryHeap;

use fnv::FnvHashMap;
use fnv::FnvHashSet;

use crate::basic_types::Domain;
use crate::basic_types::KeyedVec;
use crate::basic_types::SparseBitset;
use crate::engine::boolean_trail::BooleanTrail;
use crate::engine::integer_encoder::IntegerEncoder;
use crate::engine::variables::IntegerLiteral;
use crate::engine::variables::IntegerVariable;
use crate::engine::variables::Literal;
use crate::marrow_assert_eq_simple;
use crate::marrow_assert_moderate;
use crate::marrow_assert_simple;
use crate::math::cap_mul;

/// One recorded lower-bound change.
#[derive(Clone, Copy, Debug)]
struct TrailEntry {
    bound: i64,
    /// `None` for entries created to hold the reason of a pushed Boolean
    /// literal rather than a bound change.
    var: Option<IntegerVariable>,
    /// The previous trail entry of the same variable, for unwinding.
    prev_trail_index: usize,
    /// Index into the reason storage.
    reason_index: usize,
}

#[derive(Clone, Copy, Debug)]
struct VarInfo {
    current_bound: i64,
    current_trail_index: usize,
}

/// Reversible lower-bound storage with reason tracking.
///
/// Every variable is stored together with its negation, so an upper bound is
/// the negated lower bound of the negation and the trail only ever records
/// lower bounds. Each entry points at the previous entry of the same variable
/// (for unwinding) and at its reason (a set of Boolean literals plus a set of
/// integer literals, chased lazily during conflict explanation).
#[derive(Debug, Default)]
pub struct IntegerTrail {
    vars: KeyedVec<IntegerVariable, VarInfo>,
    domains: KeyedVec<IntegerVariable, Domain>,
    trail: Vec<TrailEntry>,
    /// Speeds up repeated [`IntegerTrail::find_lowest_trail_index_that_explains_bound`]
    /// calls on long propagation chains over the same variable.
    var_trail_index_cache: KeyedVec<IntegerVariable, usize>,
    /// The interval of the initial domain the current lower bound lies in;
    /// advanced lazily to canonicalize enqueued bounds against holes.
    var_current_interval_index: KeyedVec<IntegerVariable, usize>,
    is_ignored_literals: KeyedVec<IntegerVariable, Option<Literal>>,
    /// At index i, the trail size when decision level i+1 started.
    integer_search_levels: Vec<usize>,

    // Reason storage. Reasons are slices into shared append-only buffers,
    // truncated on untrail.
    literals_reason_starts: Vec<usize>,
    literals_reason_buffer: Vec<Literal>,
    bounds_reason_starts: Vec<usize>,
    bounds_reason_buffer: Vec<IntegerLiteral>,
    reason_decision_levels: Vec<usize>,

    constant_map: FnvHashMap<i64, IntegerVariable>,
    conflict: Vec<Literal>,
    /// Variables whose lower bound was pushed; drained by the dispatcher.
    modified_vars: SparseBitset<IntegerVariable>,
    /// Position on the Boolean trail up to which associated literals have
    /// been turned into bounds.
    propagation_trail_index: usize,
    num_enqueues: u64,

    tmp_var_to_trail_index_in_queue: KeyedVec<IntegerVariable, usize>,
}

impl IntegerTrail {
    pub fn num_integer_variables(&self) -> usize {
        self.vars.len()
    }

    pub fn num_enqueues(&self) -> u64 {
        self.num_enqueues
    }

    pub fn num_trail_entries(&self) -> usize {
        self.trail.len()
    }

    /// The conflict produced by the last failed operation, as a set of
    /// Boolean literals that are all currently false; at least one of them
    /// must become true.
    pub fn conflict(&self) -> &[Literal] {
        &self.conflict
    }

    pub fn lower_bound(&self, var: IntegerVariable) -> i64 {
        self.vars[var].current_bound
    }

    pub fn upper_bound(&self, var: IntegerVariable) -> i64 {
        -self.vars[var.negation()].current_bound
    }

    pub fn level_zero_bound(&self, var: IntegerVariable) -> i64 {
        // The initial entries are stored at the front of the trail, one per
        // variable, and are updated in place by level-zero enqueues.
        self.trail[var.id() as usize].bound
    }

    pub fn is_fixed(&self, var: IntegerVariable) -> bool {
        self.lower_bound(var) == self.upper_bound(var)
    }

    pub fn initial_variable_domain(&self, var: IntegerVariable) -> &Domain {
        &self.domains[var]
    }

    pub fn domains(&self) -> &KeyedVec<IntegerVariable, Domain> {
        &self.domains
    }

    pub fn is_optional(&self, var: IntegerVariable) -> bool {
        self.is_ignored_literals[var].is_some()
    }

    pub fn is_ignored_literal(&self, var: IntegerVariable) -> Option<Literal> {
        self.is_ignored_literals[var]
    }

    pub fn is_currently_ignored(&self, var: IntegerVariable, boolean_trail: &BooleanTrail) -> bool {
        self.is_ignored_literals[var]
            .is_some_and(|is_ignored| boolean_trail.is_true(is_ignored))
    }

    /// Marks the variable (and its negation) optional, controlled by the
    /// given literal: when the literal is true the variable is ignored.
    pub fn mark_as_optional(&mut self, var: IntegerVariable, is_ignored: Literal) {
        self.is_ignored_literals[var] = Some(is_ignored);
        self.is_ignored_literals[var.negation()] = Some(is_ignored);
    }

    /// Creates the variable and its negation. Only allowed at level zero.
    pub fn add_integer_variable(&mut self, domain: Domain) -> IntegerVariable {
        marrow_assert_simple!(!domain.is_empty());
        marrow_assert_simple!(self.integer_search_levels.is_empty());
        marrow_assert_eq_simple!(self.vars.len(), self.trail.len());

        let lower_bound = domain.min();
        let upper_bound = domain.max();

        let var = IntegerVariable::from_id(self.vars.len() as u32);
        let _ = self.is_ignored_literals.push(None);
        let _ = self.vars.push(VarInfo {
            current_bound: lower_bound,
            current_trail_index: self.trail.len(),
        });
        let _ = self.var_trail_index_cache.push(self.trail.len());
        let _ = self.var_current_interval_index.push(0);
        self.trail.push(TrailEntry {
            bound: lower_bound,
            var: Some(var),
            prev_trail_index: self.trail.len(),
            reason_index: 0,
        });
        let _ = self.domains.push(domain.clone());

        let negation = var.negation();
        let _ = self.is_ignored_literals.push(None);
        let _ = self.vars.push(VarInfo {
            current_bound: -upper_bound,
            current_trail_index: self.trail.len(),
        });
        let _ = self.var_trail_index_cache.push(self.trail.len());
        let _ = self.var_current_interval_index.push(0);
        self.trail.push(TrailEntry {
            bound: -upper_bound,
            var: Some(negation),
            prev_trail_index: self.trail.len(),
            reason_index: 0,
        });
        let _ = self.domains.push(domain.negation());

        self.modified_vars.resize(self.vars.len());
        self.tmp_var_to_trail_index_in_queue.resize(self.vars.len(), 0);

        var
    }

    /// Interns a constant: asking twice for the same value yields the same
    /// variable.
    pub fn get_or_create_constant_integer_variable(&mut self, value: i64) -> IntegerVariable {
        if let Some(&var) = self.constant_map.get(&value) {
            return var;
        }
        let var = self.add_integer_variable(Domain::singleton(value));
        let _ = self.constant_map.insert(value, var);
        if value != 0 {
            let _ = self.constant_map.insert(-value, var.negation());
        }
        var
    }

    /// Intersects the static domain. Values that fall outside and had an
    /// associated equality literal get those literals fixed to false. Returns
    /// false on a root-level conflict.
    pub fn update_initial_domain(
        &mut self,
        var: IntegerVariable,
        domain: Domain,
        encoder: &IntegerEncoder,
        boolean_trail: &mut BooleanTrail,
    ) -> bool {
        marrow_assert_eq_simple!(boolean_trail.decision_level(), 0);

        let old_domain = &self.domains[var];
        let domain = domain.intersection_with(old_domain);
        if &domain == old_domain {
            return true;
        }
        if domain.is_empty() {
            return false;
        }

        self.domains[var] = domain.clone();
        self.domains[var.negation()] = domain.negation();
        self.var_current_interval_index[var] = 0;
        self.var_current_interval_index[var.negation()] = 0;

        if !self.enqueue(
            IntegerLiteral::greater_or_equal(var, domain.min()),
            &[],
            &[],
            boolean_trail,
            encoder,
        ) {
            return false;
        }
        if !self.enqueue(
            IntegerLiteral::lower_or_equal(var, domain.max()),
            &[],
            &[],
            boolean_trail,
            encoder,
        ) {
            return false;
        }

        // Fix the equality literals of now-excluded values to false.
        for pair in encoder.partial_domain_encoding(var, &self.domains, boolean_trail) {
            if domain.contains(pair.value) {
                continue;
            }
            if boolean_trail.is_true(pair.literal) {
                return false;
            }
            if !boolean_trail.is_false(pair.literal) {
                let _ = boolean_trail.enqueue(!pair.literal, None);
            }
        }
        true
    }

    /// Turns newly assigned associated literals into bounds, and consumes the
    /// encoder's newly fixed literals at level zero. Returns false on
    /// conflict.
    pub fn propagate(
        &mut self,
        boolean_trail: &mut BooleanTrail,
        encoder: &mut IntegerEncoder,
    ) -> bool {
        let level = boolean_trail.decision_level();
        if level > self.integer_search_levels.len() {
            self.integer_search_levels.push(self.trail.len());
            self.reason_decision_levels
                .push(self.literals_reason_starts.len());
            marrow_assert_eq_simple!(level, self.integer_search_levels.len());
        }

        if level == 0 {
            let newly_fixed = encoder.newly_fixed_integer_literals().to_vec();
            for i_lit in newly_fixed {
                if self.is_currently_ignored(i_lit.var, boolean_trail) {
                    continue;
                }
                if !self.enqueue(i_lit, &[], &[], boolean_trail, encoder) {
                    return false;
                }
            }
            encoder.clear_newly_fixed_integer_literals();
        }

        while self.propagation_trail_index < boolean_trail.trail_index() {
            let literal = boolean_trail.literal_at(self.propagation_trail_index);
            self.propagation_trail_index += 1;
            let associated = encoder.get_integer_literals(literal).to_vec();
            for i_lit in associated {
                if self.is_currently_ignored(i_lit.var, boolean_trail) {
                    continue;
                }
                // The reason is simply the associated literal.
                if !self.enqueue(i_lit, &[!literal], &[], boolean_trail, encoder) {
                    return false;
                }
            }
        }
        true
    }

    /// Reverts all bound changes made after `level` and truncates the reason
    /// buffers.
    pub fn untrail(&mut self, level: usize, boolean_trail_index: usize) {
        self.propagation_trail_index = self.propagation_trail_index.min(boolean_trail_index);

        if level >= self.integer_search_levels.len() {
            return;
        }
        let target = self.integer_search_levels[level];
        self.integer_search_levels.truncate(level);
        marrow_assert_simple!(target >= self.vars.len());
        marrow_assert_simple!(target <= self.trail.len());

        for index in (target..self.trail.len()).rev() {
            let entry = self.trail[index];
            let Some(var) = entry.var else {
                continue;
            };
            self.vars[var].current_trail_index = entry.prev_trail_index;
            self.vars[var].current_bound = self.trail[entry.prev_trail_index].bound;
            // The canonicalization interval of the reverted bound is stale.
            self.var_current_interval_index[var] = 0;
        }
        self.trail.truncate(target);

        let old_size = self.reason_decision_levels[level];
        self.reason_decision_levels.truncate(level);
        if old_size < self.literals_reason_starts.len() {
            self.literals_reason_buffer
                .truncate(self.literals_reason_starts[old_size]);
            self.bounds_reason_buffer
                .truncate(self.bounds_reason_starts[old_size]);
            self.literals_reason_starts.truncate(old_size);
            self.bounds_reason_starts.truncate(old_size);
        }
    }

    /// Variables whose lower bound was pushed since the last drain.
    pub fn drain_modified_vars(&mut self) -> Vec<IntegerVariable> {
        let result = self.modified_vars.positions_set_at_least_once().collect();
        self.modified_vars.sparse_clear_all();
        result
    }

    /// Pushes `i_lit` with the given reason. Returns false on conflict, in
    /// which case [`IntegerTrail::conflict`] holds the merged explanation.
    ///
    /// The bound is canonicalized against the holes of the initial domain
    /// before being recorded. For an optional variable whose bound crosses
    /// its upper bound, the `is_ignored` literal is set instead of reporting
    /// a conflict.
    pub fn enqueue(
        &mut self,
        mut i_lit: IntegerLiteral,
        literal_reason: &[Literal],
        integer_reason: &[IntegerLiteral],
        boolean_trail: &mut BooleanTrail,
        encoder: &IntegerEncoder,
    ) -> bool {
        marrow_assert_moderate!(self.reason_is_valid(literal_reason, integer_reason, boolean_trail));

        if self.is_currently_ignored(i_lit.var, boolean_trail) {
            return true;
        }
        if i_lit.bound <= self.vars[i_lit.var].current_bound {
            return true;
        }
        self.num_enqueues += 1;

        let var = i_lit.var;

        // If the bound falls in a hole of the initial domain, snap it to the
        // start of the next interval so only canonical literals are enqueued.
        if self.domains[var].num_intervals() > 1 {
            let size = self.domains[var].num_intervals();
            let mut index = self.var_current_interval_index[var];
            while index < size && i_lit.bound > self.domains[var].interval(index).end {
                index += 1;
            }
            if index == size {
                return self.report_conflict(literal_reason, integer_reason, encoder);
            }
            self.var_current_interval_index[var] = index;
            i_lit.bound = i_lit.bound.max(self.domains[var].interval(index).start);
        }

        // Check whether the domain becomes empty.
        if i_lit.bound > self.upper_bound(var) {
            let ub_reason = IntegerLiteral::lower_or_equal(var, i_lit.bound - 1);

            let ignorable = self.is_optional(var)
                && !boolean_trail.is_false(self.is_ignored_literals[var].unwrap());
            if !ignorable {
                let mut conflict = literal_reason.to_vec();
                if let Some(is_ignored) = self.is_ignored_literals[var] {
                    conflict.push(is_ignored);
                }
                let mut queue = Vec::new();
                self.seed_reason_queue(integer_reason, &mut queue);
                self.seed_reason_queue(&[ub_reason], &mut queue);
                self.merge_reason_into_internal(queue, &mut conflict, encoder);
                self.conflict = conflict;
                return false;
            }

            // Never let the bounds of an optional variable cross; make the
            // variable absent instead.
            let is_ignored = self.is_ignored_literals[var].unwrap();
            if self.integer_search_levels.is_empty() {
                let _ = boolean_trail.enqueue(is_ignored, None);
            } else {
                let mut extended_reason = integer_reason.to_vec();
                extended_reason.push(ub_reason);
                self.enqueue_literal(is_ignored, literal_reason, &extended_reason, boolean_trail);
            }
            return true;
        }

        self.modified_vars.set(var);

        // Enqueue the strongest associated Boolean literal implied by this
        // bound; the weaker ones follow through the chained implications.
        if let Some(associated) = encoder.search_for_literal_at_or_before(i_lit) {
            if !self.enqueue_associated_literal(
                associated,
                self.trail.len(),
                literal_reason,
                integer_reason,
                boolean_trail,
                encoder,
            ) {
                return false;
            }
        }

        // Special case for level zero: no reason is stored and the initial
        // domain is updated in place.
        if self.integer_search_levels.is_empty() {
            self.vars[var].current_bound = i_lit.bound;
            self.trail[var.id() as usize].bound = i_lit.bound;

            self.conflict.clear();
            let hull = Domain::new(self.lower_bound(var), self.upper_bound(var));
            return self.update_initial_domain(var, hull, encoder, boolean_trail);
        }

        // Save the reason.
        let reason_index = self.literals_reason_starts.len();
        self.literals_reason_starts
            .push(self.literals_reason_buffer.len());
        self.literals_reason_buffer.extend_from_slice(literal_reason);
        self.bounds_reason_starts
            .push(self.bounds_reason_buffer.len());
        self.bounds_reason_buffer.extend_from_slice(integer_reason);

        self.trail.push(TrailEntry {
            bound: i_lit.bound,
            var: Some(var),
            prev_trail_index: self.vars[var].current_trail_index,
            reason_index,
        });
        self.vars[var].current_bound = i_lit.bound;
        self.vars[var].current_trail_index = self.trail.len() - 1;
        true
    }

    /// Pushes a Boolean literal justified by integer reasoning; the reason is
    /// stored on this trail.
    pub fn enqueue_literal(
        &mut self,
        literal: Literal,
        literal_reason: &[Literal],
        integer_reason: &[IntegerLiteral],
        boolean_trail: &mut BooleanTrail,
    ) {
        marrow_assert_simple!(boolean_trail.is_unassigned(literal));
        if self.integer_search_levels.is_empty() {
            let _ = boolean_trail.enqueue(literal, None);
            return;
        }

        let reason_index = self.literals_reason_starts.len();
        self.literals_reason_starts
            .push(self.literals_reason_buffer.len());
        self.literals_reason_buffer.extend_from_slice(literal_reason);
        self.bounds_reason_starts
            .push(self.bounds_reason_buffer.len());
        self.bounds_reason_buffer.extend_from_slice(integer_reason);

        self.trail.push(TrailEntry {
            bound: 0,
            var: None,
            prev_trail_index: usize::MAX,
            reason_index,
        });
        let _ = boolean_trail.enqueue(literal, Some(self.trail.len() - 1));
    }

    fn enqueue_associated_literal(
        &mut self,
        literal: Literal,
        trail_index_with_same_reason: usize,
        literal_reason: &[Literal],
        integer_reason: &[IntegerLiteral],
        boolean_trail: &mut BooleanTrail,
        encoder: &IntegerEncoder,
    ) -> bool {
        if boolean_trail.is_unassigned(literal) {
            if self.integer_search_levels.is_empty() {
                let _ = boolean_trail.enqueue(literal, None);
            } else {
                let _ = boolean_trail.enqueue(literal, Some(trail_index_with_same_reason));
            }
            return true;
        }
        if boolean_trail.is_false(literal) {
            let mut conflict = literal_reason.to_vec();
            conflict.push(literal);
            let mut queue = Vec::new();
            self.seed_reason_queue(integer_reason, &mut queue);
            self.merge_reason_into_internal(queue, &mut conflict, encoder);
            self.conflict = conflict;
            return false;
        }
        true
    }

    /// Fills [`IntegerTrail::conflict`] from the given reason and returns
    /// false, for propagators that detect infeasibility themselves.
    pub fn report_conflict(
        &mut self,
        literal_reason: &[Literal],
        integer_reason: &[IntegerLiteral],
        encoder: &IntegerEncoder,
    ) -> bool {
        let mut conflict = literal_reason.to_vec();
        let mut queue = Vec::new();
        self.seed_reason_queue(integer_reason, &mut queue);
        self.merge_reason_into_internal(queue, &mut conflict, encoder);
        self.conflict = conflict;
        false
    }

    /// In debug builds, checks that every literal reason is currently false
    /// and every integer reason currently entailed.
    fn reason_is_valid(
        &self,
        literal_reason: &[Literal],
        integer_reason: &[IntegerLiteral],
        boolean_trail: &BooleanTrail,
    ) -> bool {
        for &literal in literal_reason {
            if !boolean_trail.is_false(literal) {
                return false;
            }
        }
        for i_lit in integer_reason {
            if i_lit.bound > self.vars[i_lit.var].current_bound {
                return false;
            }
        }
        true
    }

    /// The smallest trail index whose entry already enforces the bound, or
    /// `None` when the bound holds at level zero.
    fn find_lowest_trail_index_that_explains_bound(
        &mut self,
        i_lit: IntegerLiteral,
    ) -> Option<usize> {
        marrow_assert_moderate!(i_lit.bound <= self.vars[i_lit.var].current_bound);
        if i_lit.bound <= self.level_zero_bound(i_lit.var) {
            return None;
        }
        let mut trail_index = self.vars[i_lit.var].current_trail_index;

        // Use the cached index if it is still valid; on long propagation
        // chains this turns a quadratic walk into a linear one.
        let cached_index = self.var_trail_index_cache[i_lit.var];
        if cached_index < trail_index {
            let entry = self.trail[cached_index];
            if entry.var == Some(i_lit.var) && entry.bound >= i_lit.bound {
                trail_index = cached_index;
            }
        }

        let mut prev_trail_index = trail_index;
        loop {
            let entry = self.trail[trail_index];
            if entry.bound == i_lit.bound {
                self.var_trail_index_cache[i_lit.var] = trail_index;
                return Some(trail_index);
            }
            if entry.bound < i_lit.bound {
                self.var_trail_index_cache[i_lit.var] = prev_trail_index;
                return Some(prev_trail_index);
            }
            prev_trail_index = trail_index;
            trail_index = entry.prev_trail_index;
        }
    }

    /// Weakens a linear reason `sum(coeffs[i] * (vars[i] >= bounds[i]))` as
    /// far as the slack allows, by walking each literal back on the trail and
    /// greedily picking the literal with the smallest trail index that still
    /// fits under the slack. Shorter-lived bounds give more reusable
    /// explanations.
    pub fn relax_linear_reason(
        &self,
        mut slack: i64,
        coeffs: &[i64],
        reason: &mut [IntegerLiteral],
    ) {
        marrow_assert_simple!(slack >= 0);
        if slack == 0 {
            return;
        }
        let size = reason.len();
        let mut indices: Vec<usize> = Vec::with_capacity(size);
        for (i, i_lit) in reason.iter().enumerate() {
            marrow_assert_moderate!(i_lit.bound == self.lower_bound(i_lit.var));
            marrow_assert_moderate!(coeffs[i] >= 0);
            indices.push(self.vars[i_lit.var].current_trail_index);
        }

        let num_vars = self.vars.len();
        while slack != 0 {
            let mut best: Option<usize> = None;
            for i in 0..size {
                if indices[i] < num_vars {
                    continue; // level zero.
                }
                if best.is_some_and(|b| indices[i] < indices[b]) {
                    continue;
                }
                let entry = self.trail[indices[i]];
                let previous_entry = self.trail[entry.prev_trail_index];
                if cap_mul(coeffs[i], entry.bound - previous_entry.bound) > slack {
                    continue;
                }
                best = Some(i);
            }
            let Some(best) = best else {
                return;
            };

            let entry = self.trail[indices[best]];
            let previous_entry = self.trail[entry.prev_trail_index];
            indices[best] = entry.prev_trail_index;
            reason[best].bound = previous_entry.bound;
            slack -= coeffs[best] * (entry.bound - previous_entry.bound);
        }
    }

    /// Drops the integer literals that hold at level zero.
    pub fn remove_level_zero_bounds(&self, reason: &mut Vec<IntegerLiteral>) {
        reason.retain(|i_lit| i_lit.bound > self.level_zero_bound(i_lit.var));
    }

    /// The minimal-by-trail-index set of Boolean literals explaining the
    /// given bound.
    pub fn reason_for(&mut self, i_lit: IntegerLiteral, encoder: &IntegerEncoder) -> Vec<Literal> {
        let mut reason = Vec::new();
        self.merge_reason_into(&[i_lit], &mut reason, encoder);
        reason
    }

    /// Explains all given integer literals in terms of Boolean literals,
    /// merging shared parts of their derivations.
    pub fn merge_reason_into(
        &mut self,
        literals: &[IntegerLiteral],
        output: &mut Vec<Literal>,
        encoder: &IntegerEncoder,
    ) {
        let mut queue = Vec::new();
        self.seed_reason_queue(literals, &mut queue);
        self.merge_reason_into_internal(queue, output, encoder);
    }

    fn seed_reason_queue(&mut self, literals: &[IntegerLiteral], queue: &mut Vec<usize>) {
        let num_vars = self.vars.len();
        for &i_lit in literals {
            if let Some(trail_index) = self.find_lowest_trail_index_that_explains_bound(i_lit) {
                // Indices below the number of variables are initial entries
                // and need no explanation.
                if trail_index >= num_vars {
                    queue.push(trail_index);
                }
            }
        }
    }

    /// Expands the queued trail entries until everything is explained in
    /// terms of Boolean literals. Entries are processed by decreasing trail
    /// index through a max-heap; per variable only the strongest remaining
    /// bound is kept.
    fn merge_reason_into_internal(
        &mut self,
        queue: Vec<usize>,
        output: &mut Vec<Literal>,
        encoder: &IntegerEncoder,
    ) {
        let mut added_variables: FnvHashSet<_> =
            output.iter().map(|literal| literal.variable()).collect();

        // Queue entries that no longer match this map are stale and skipped:
        // amongst all entries referring to one variable only the one with the
        // largest trail index is valid.
        let mut to_clear = Vec::new();
        for &trail_index in &queue {
            let var = self.trail[trail_index].var.expect("bound entry");
            let slot = &mut self.tmp_var_to_trail_index_in_queue[var];
            *slot = (*slot).max(trail_index);
            to_clear.push(var);
        }

        let mut heap: BinaryHeap<usize> = BinaryHeap::from(queue);
        let mut tmp_deps: Vec<IntegerLiteral> = Vec::new();

        while let Some(trail_index) = heap.pop() {
            let entry = self.trail[trail_index];
            let var = entry.var.expect("bound entry");
            if self.tmp_var_to_trail_index_in_queue[var] != trail_index {
                continue;
            }

            // An associated literal, if any, replaces the stored reason.
            if let Some(associated) =
                encoder.get_associated_literal(IntegerLiteral::greater_or_equal(var, entry.bound))
            {
                output.push(!associated);
                to_clear.push(var);
                self.tmp_var_to_trail_index_in_queue[var] = usize::MAX;
                continue;
            }

            self.append_literals_reason(trail_index, output, &mut added_variables);
            self.tmp_var_to_trail_index_in_queue[var] = 0;

            tmp_deps.clear();
            let (start, end) = self.bounds_reason_range(entry.reason_index);
            tmp_deps.extend_from_slice(&self.bounds_reason_buffer[start..end]);

            let num_vars = self.vars.len();
            let mut has_dependency = false;
            for &dep in &tmp_deps {
                let Some(next_trail_index) = self.find_lowest_trail_index_that_explains_bound(dep)
                else {
                    continue;
                };
                if next_trail_index < num_vars {
                    continue;
                }
                has_dependency = true;

                // Do not add bounds implied by ones already present, e.g. no
                // (x >= 4) when the queue already holds (x >= 7).
                let next_entry = self.trail[next_trail_index];
                let next_var = next_entry.var.expect("bound entry");
                if next_trail_index > self.tmp_var_to_trail_index_in_queue[next_var] {
                    self.tmp_var_to_trail_index_in_queue[next_var] = next_trail_index;
                    to_clear.push(next_var);
                    heap.push(next_trail_index);
                }
            }

            // A leaf: this variable will not be needed again.
            if !has_dependency {
                to_clear.push(var);
                self.tmp_var_to_trail_index_in_queue[var] = usize::MAX;
            }
        }

        for var in to_clear {
            self.tmp_var_to_trail_index_in_queue[var] = 0;
        }
    }

    fn append_literals_reason(
        &self,
        trail_index: usize,
        output: &mut Vec<Literal>,
        added_variables: &mut FnvHashSet<crate::engine::variables::PropositionalVariable>,
    ) {
        let reason_index = self.trail[trail_index].reason_index;
        let start = self.literals_reason_starts[reason_index];
        let end = if reason_index + 1 < self.literals_reason_starts.len() {
            self.literals_reason_starts[reason_index + 1]
        } else {
            self.literals_reason_buffer.len()
        };
        for &literal in &self.literals_reason_buffer[start..end] {
            if added_variables.insert(literal.variable()) {
                output.push(literal);
            }
        }
    }

    fn bounds_reason_range(&self, reason_index: usize) -> (usize, usize) {
        let start = self.bounds_reason_starts[reason_index];
        let end = if reason_index + 1 < self.bounds_reason_starts.len() {
            self.bounds_reason_starts[reason_index + 1]
        } else {
            self.bounds_reason_buffer.len()
        };
        (start, end)
    }
}
