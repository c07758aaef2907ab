use std::collections::VecDeque;

use enumset::EnumSet;
use enumset::EnumSetType;

use crate::basic_types::KeyedVec;
use crate::basic_types::StorageKey;
use crate::engine::boolean_trail::BooleanTrail;
use crate::engine::integer_encoder::IntegerEncoder;
use crate::engine::integer_trail::IntegerTrail;
use crate::engine::trailed::TrailedValues;
use crate::engine::variables::IntegerVariable;
use crate::engine::variables::Literal;

/// Identifies a propagator registered with the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PropagatorId(pub(crate) u32);

impl StorageKey for PropagatorId {
    fn index(&self) -> usize {
        self.0 as usize
    }

    fn create_from_index(index: usize) -> Self {
        PropagatorId(index as u32)
    }
}

/// The kinds of bound changes a propagator can subscribe to on a variable.
#[derive(Debug, EnumSetType)]
pub enum BoundEvent {
    LowerBound,
    UpperBound,
}

/// Everything a propagator may touch while propagating.
pub struct PropagationContext<'a> {
    pub integer_trail: &'a mut IntegerTrail,
    pub encoder: &'a mut IntegerEncoder,
    pub boolean_trail: &'a mut BooleanTrail,
    pub trailed_values: &'a mut TrailedValues,
}

/// A bound-propagation routine scheduled by the dispatcher.
///
/// `propagate` must return false exactly when it detected a conflict, in
/// which case the conflict is available on the integer trail.
pub trait Propagator {
    fn name(&self) -> &str;

    fn propagate(&mut self, context: &mut PropagationContext<'_>) -> bool;

    /// Propagation restricted to the given watch indices (the values passed
    /// at registration time for the triggers that fired). The default runs a
    /// full propagation.
    fn incremental_propagate(
        &mut self,
        context: &mut PropagationContext<'_>,
        _watch_indices: &[u32],
    ) -> bool {
        self.propagate(context)
    }

    /// Called with the level interval `(low, high)` whenever the decision
    /// level moved since the last call, so internal reversible state can be
    /// restored to `low` then advanced to `high`. Propagators that keep
    /// their state in [`TrailedValues`] need not override this.
    fn synchronise(&mut self, _low: usize, _high: usize) {}
}

/// Owns the registered propagators; the dispatcher schedules them by id.
#[derive(Default)]
pub struct PropagatorStore {
    propagators: KeyedVec<PropagatorId, Box<dyn Propagator>>,
}

impl PropagatorStore {
    pub fn len(&self) -> usize {
        self.propagators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.propagators.is_empty()
    }
}

impl std::ops::Index<PropagatorId> for PropagatorStore {
    type Output = Box<dyn Propagator>;

    fn index(&self, id: PropagatorId) -> &Self::Output {
        &self.propagators[id]
    }
}

impl std::ops::IndexMut<PropagatorId> for PropagatorStore {
    fn index_mut(&mut self, id: PropagatorId) -> &mut Self::Output {
        &mut self.propagators[id]
    }
}

#[derive(Clone, Copy, Debug)]
struct Watch {
    id: PropagatorId,
    /// Forwarded to `incremental_propagate` when this trigger fires;
    /// `None` forces a full propagation.
    watch_index: Option<u32>,
}

/// Schedules propagators over a multi-priority queue, driven by newly
/// assigned literals and lower-bound changes on watched variables.
///
/// Priorities are processed in ascending order. Whenever a propagator pushes
/// an integer bound, dispatching restarts at priority zero; whenever it
/// pushes a Boolean literal, control returns to the caller so that the
/// clausal propagation (which runs at strictly higher priority than this
/// dispatcher) can catch up first.
pub struct PropagatorDispatcher {
    queue_by_priority: Vec<VecDeque<PropagatorId>>,
    in_queue: KeyedVec<PropagatorId, bool>,
    literal_to_watcher: KeyedVec<Literal, Vec<Watch>>,
    var_to_watcher: KeyedVec<IntegerVariable, Vec<Watch>>,
    id_to_watch_indices: KeyedVec<PropagatorId, Vec<u32>>,
    id_to_priority: KeyedVec<PropagatorId, u32>,
    id_to_idempotence: KeyedVec<PropagatorId, bool>,
    id_to_level_at_last_call: KeyedVec<PropagatorId, usize>,
    id_to_greatest_common_level_since_last_call: KeyedVec<PropagatorId, usize>,
    propagation_trail_index: usize,
}

impl Default for PropagatorDispatcher {
    fn default() -> Self {
        PropagatorDispatcher::new()
    }
}

impl PropagatorDispatcher {
    pub fn new() -> PropagatorDispatcher {
        PropagatorDispatcher {
            // Default priority is 1, so there are at least two levels.
            queue_by_priority: vec![VecDeque::new(), VecDeque::new()],
            in_queue: KeyedVec::default(),
            literal_to_watcher: KeyedVec::default(),
            var_to_watcher: KeyedVec::default(),
            id_to_watch_indices: KeyedVec::default(),
            id_to_priority: KeyedVec::default(),
            id_to_idempotence: KeyedVec::default(),
            id_to_level_at_last_call: KeyedVec::default(),
            id_to_greatest_common_level_since_last_call: KeyedVec::default(),
            propagation_trail_index: 0,
        }
    }

    /// Registers a propagator with the store and enqueues it once so it runs
    /// at the next propagation.
    pub fn register(
        &mut self,
        propagator: Box<dyn Propagator>,
        store: &mut PropagatorStore,
    ) -> PropagatorId {
        let id = store.propagators.push(propagator);
        let _ = self.in_queue.push(true);
        let _ = self.id_to_watch_indices.push(Vec::new());
        let _ = self.id_to_priority.push(1);
        let _ = self.id_to_idempotence.push(true);
        let _ = self.id_to_level_at_last_call.push(0);
        let _ = self.id_to_greatest_common_level_since_last_call.push(0);
        self.queue_by_priority[1].push_back(id);
        id
    }

    pub fn set_propagator_priority(&mut self, id: PropagatorId, priority: u32) {
        self.id_to_priority[id] = priority;
        if priority as usize >= self.queue_by_priority.len() {
            self.queue_by_priority
                .resize(priority as usize + 1, VecDeque::new());
        }
    }

    /// Declares that one pass of the propagator may not reach its fixpoint,
    /// so a self-triggered change re-enqueues it.
    pub fn notify_propagator_may_not_reach_fixpoint_in_one_pass(&mut self, id: PropagatorId) {
        self.id_to_idempotence[id] = false;
    }

    /// Subscribes the propagator to assignments of the given literal.
    pub fn watch_literal(&mut self, literal: Literal, id: PropagatorId, watch_index: Option<u32>) {
        self.literal_to_watcher.accomodate(literal, Vec::new());
        self.literal_to_watcher.accomodate(!literal, Vec::new());
        self.literal_to_watcher[literal].push(Watch { id, watch_index });
    }

    /// Subscribes the propagator to lower-bound changes of the variable.
    pub fn watch_lower_bound(
        &mut self,
        var: IntegerVariable,
        id: PropagatorId,
        watch_index: Option<u32>,
    ) {
        self.var_to_watcher.accomodate(var, Vec::new());
        self.var_to_watcher
            .accomodate(var.negation(), Vec::new());
        self.var_to_watcher[var].push(Watch { id, watch_index });
    }

    /// Subscribes to the requested bound events of the variable; an upper
    /// bound change is a lower bound change of the negation.
    pub fn watch_integer_variable(
        &mut self,
        var: IntegerVariable,
        events: EnumSet<BoundEvent>,
        id: PropagatorId,
        watch_index: Option<u32>,
    ) {
        if events.contains(BoundEvent::LowerBound) {
            self.watch_lower_bound(var, id, watch_index);
        }
        if events.contains(BoundEvent::UpperBound) {
            self.watch_lower_bound(var.negation(), id, watch_index);
        }
    }

    fn update_calling_needs(
        &mut self,
        integer_trail: &mut IntegerTrail,
        boolean_trail: &BooleanTrail,
    ) {
        // Process any new literal on the Boolean trail.
        while self.propagation_trail_index < boolean_trail.trail_index() {
            let literal = boolean_trail.literal_at(self.propagation_trail_index);
            self.propagation_trail_index += 1;
            let Some(watches) = self.literal_to_watcher.get(literal) else {
                continue;
            };
            for watch in watches.clone() {
                self.enqueue_watch(watch);
            }
        }

        // Process the newly changed lower bounds.
        for var in integer_trail.drain_modified_vars() {
            let Some(watches) = self.var_to_watcher.get(var) else {
                continue;
            };
            for watch in watches.clone() {
                self.enqueue_watch(watch);
            }
        }
    }

    fn enqueue_watch(&mut self, watch: Watch) {
        if !self.in_queue[watch.id] {
            self.in_queue[watch.id] = true;
            self.queue_by_priority[self.id_to_priority[watch.id] as usize].push_back(watch.id);
        }
        if let Some(watch_index) = watch.watch_index {
            self.id_to_watch_indices[watch.id].push(watch_index);
        }
    }

    /// Runs the registered propagators to a fixpoint, or until one of them
    /// pushes a Boolean literal (true is returned and the caller is expected
    /// to run clausal propagation and call again). Returns false on
    /// conflict.
    pub fn propagate(
        &mut self,
        store: &mut PropagatorStore,
        context: &mut PropagationContext<'_>,
    ) -> bool {
        let level = context.boolean_trail.decision_level();
        self.update_calling_needs(context.integer_trail, context.boolean_trail);

        let mut priority = 0;
        while priority < self.queue_by_priority.len() {
            let Some(id) = self.queue_by_priority[priority].pop_front() else {
                priority += 1;
                continue;
            };

            // Make sure reversible structures are up to date before running;
            // nothing expensive happens more than once per level.
            {
                let low = self.id_to_greatest_common_level_since_last_call[id];
                let high = self.id_to_level_at_last_call[id];
                if low < high || level > low {
                    self.id_to_level_at_last_call[id] = level;
                    self.id_to_greatest_common_level_since_last_call[id] = level;
                    store[id].synchronise(low, level);
                }
            }

            let old_integer_timestamp = context.integer_trail.num_enqueues();
            let old_boolean_timestamp = context.boolean_trail.trail_index();

            let watch_indices = std::mem::take(&mut self.id_to_watch_indices[id]);
            let result = if watch_indices.is_empty() {
                store[id].propagate(context)
            } else {
                store[id].incremental_propagate(context, &watch_indices)
            };
            if !result {
                self.in_queue[id] = false;
                return false;
            }

            // At this point the propagator was removed from the queue but
            // `in_queue` is still true. For an idempotent propagator the
            // calling needs are updated first, so a self-triggered change
            // does not re-enqueue it; otherwise the bit is cleared first.
            if self.id_to_idempotence[id] {
                self.update_calling_needs(context.integer_trail, context.boolean_trail);
                self.in_queue[id] = false;
            } else {
                self.in_queue[id] = false;
                self.update_calling_needs(context.integer_trail, context.boolean_trail);
            }

            // An integer push restarts the dispatch at priority zero.
            if context.integer_trail.num_enqueues() > old_integer_timestamp {
                priority = 0;
                continue;
            }

            // A Boolean push returns control to the clausal propagation;
            // since a literal was pushed we are guaranteed to be called
            // again, and we resume from priority zero.
            if context.boolean_trail.trail_index() > old_boolean_timestamp {
                return true;
            }
        }
        true
    }

    pub fn has_pending_work(&self) -> bool {
        self.queue_by_priority.iter().any(|queue| !queue.is_empty())
    }

    /// Clears all queues and watch indices after a backtrack.
    pub fn untrail(&mut self, boolean_trail: &BooleanTrail) {
        for queue in &mut self.queue_by_priority {
            for &id in queue.iter() {
                self.id_to_watch_indices[id].clear();
            }
            queue.clear();
        }
        self.propagation_trail_index = boolean_trail.trail_index();
        for in_queue in self.in_queue.iter_mut() {
            *in_queue = false;
        }

        let level = boolean_trail.decision_level();
        for greatest in self.id_to_greatest_common_level_since_last_call.iter_mut() {
            *greatest = (*greatest).min(level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_types::Domain;
    use crate::engine::variables::IntegerLiteral;

    /// Enforces `y >= x` by forwarding lower bounds of `x` to `y`.
    struct ForwardBound {
        x: IntegerVariable,
        y: IntegerVariable,
        incremental_calls: std::rc::Rc<std::cell::Cell<usize>>,
    }

    impl Propagator for ForwardBound {
        fn name(&self) -> &str {
            "ForwardBound"
        }

        fn propagate(&mut self, context: &mut PropagationContext<'_>) -> bool {
            let bound = context.integer_trail.lower_bound(self.x);
            context.integer_trail.enqueue(
                IntegerLiteral::greater_or_equal(self.y, bound),
                &[],
                &[IntegerLiteral::greater_or_equal(self.x, bound)],
                context.boolean_trail,
                context.encoder,
            )
        }

        fn incremental_propagate(
            &mut self,
            context: &mut PropagationContext<'_>,
            _watch_indices: &[u32],
        ) -> bool {
            self.incremental_calls.set(self.incremental_calls.get() + 1);
            self.propagate(context)
        }
    }

    fn setup() -> (IntegerTrail, BooleanTrail, IntegerEncoder, TrailedValues) {
        (
            IntegerTrail::default(),
            BooleanTrail::default(),
            IntegerEncoder::new(),
            TrailedValues::default(),
        )
    }

    #[test]
    fn bound_changes_wake_registered_propagators() {
        let (mut integer_trail, mut boolean_trail, mut encoder, mut trailed_values) = setup();
        let x = integer_trail.add_integer_variable(Domain::new(0, 10));
        let y = integer_trail.add_integer_variable(Domain::new(0, 10));

        let mut store = PropagatorStore::default();
        let mut dispatcher = PropagatorDispatcher::new();
        let calls = std::rc::Rc::new(std::cell::Cell::new(0));
        let id = dispatcher.register(
            Box::new(ForwardBound {
                x,
                y,
                incremental_calls: calls.clone(),
            }),
            &mut store,
        );
        dispatcher.watch_lower_bound(x, id, Some(0));

        let mut context = PropagationContext {
            integer_trail: &mut integer_trail,
            encoder: &mut encoder,
            boolean_trail: &mut boolean_trail,
            trailed_values: &mut trailed_values,
        };

        // Initial registration runs the propagator once.
        assert!(dispatcher.propagate(&mut store, &mut context));

        assert!(context.integer_trail.enqueue(
            IntegerLiteral::greater_or_equal(x, 7),
            &[],
            &[],
            context.boolean_trail,
            context.encoder,
        ));
        assert!(dispatcher.propagate(&mut store, &mut context));
        assert_eq!(context.integer_trail.lower_bound(y), 7);
        assert!(calls.get() >= 1);
    }

    #[test]
    fn untrail_clears_pending_work() {
        let (mut integer_trail, mut boolean_trail, mut encoder, mut trailed_values) = setup();
        let x = integer_trail.add_integer_variable(Domain::new(0, 10));
        let y = integer_trail.add_integer_variable(Domain::new(0, 10));

        let mut store = PropagatorStore::default();
        let mut dispatcher = PropagatorDispatcher::new();
        let calls = std::rc::Rc::new(std::cell::Cell::new(0));
        let id = dispatcher.register(
            Box::new(ForwardBound {
                x,
                y,
                incremental_calls: calls.clone(),
            }),
            &mut store,
        );
        dispatcher.watch_lower_bound(x, id, Some(0));

        {
            let mut context = PropagationContext {
                integer_trail: &mut integer_trail,
                encoder: &mut encoder,
                boolean_trail: &mut boolean_trail,
                trailed_values: &mut trailed_values,
            };
            assert!(dispatcher.propagate(&mut store, &mut context));
        }

        boolean_trail.increase_decision_level();
        assert!(integer_trail.propagate(&mut boolean_trail, &mut encoder));
        assert!(integer_trail.enqueue(
            IntegerLiteral::greater_or_equal(x, 3),
            &[],
            &[],
            &mut boolean_trail,
            &encoder,
        ));

        integer_trail.untrail(0, 0);
        boolean_trail.untrail(0);
        dispatcher.untrail(&boolean_trail);
        assert!(!dispatcher.has_pending_work());
    }
}
