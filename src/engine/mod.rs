//! The runtime substrate search propagators operate on: the Boolean and
//! integer trails, the literal/bound encoder, the clausal propagator, and the
//! propagator dispatcher.

mod boolean_trail;
mod clausal;
mod dispatcher;
mod integer_encoder;
mod integer_trail;
pub mod propagators;
mod trailed;
pub mod variables;

pub use boolean_trail::BooleanTrail;
pub use clausal::ClausalPropagator;
pub use dispatcher::BoundEvent;
pub use dispatcher::PropagationContext;
pub use dispatcher::Propagator;
pub use dispatcher::PropagatorDispatcher;
pub use dispatcher::PropagatorId;
pub use dispatcher::PropagatorStore;
pub use integer_encoder::IntegerEncoder;
pub use integer_encoder::ValueLiteralPair;
pub use integer_trail::IntegerTrail;
pub use trailed::TrailedInteger;
pub use trailed::TrailedValues;

/// Bundles the engine state so callers can pass it around as one unit.
#[derive(Default)]
pub struct Engine {
    pub boolean_trail: BooleanTrail,
    pub integer_trail: IntegerTrail,
    pub encoder: IntegerEncoder,
    pub clausal: ClausalPropagator,
    pub dispatcher: PropagatorDispatcher,
    pub store: PropagatorStore,
    pub trailed_values: TrailedValues,
}

impl Engine {
    pub fn new() -> Engine {
        Engine {
            encoder: IntegerEncoder::new(),
            ..Default::default()
        }
    }

    /// Loads the clauses buffered by the encoder into the clausal propagator.
    /// Only valid at level zero. Returns false on root conflict.
    pub fn flush_encoder_clauses(&mut self) -> bool {
        for [a, b] in self.encoder.drain_pending_binary_clauses() {
            if !self.clausal.add_clause(vec![a, b], &mut self.boolean_trail) {
                return false;
            }
        }
        for clause in self.encoder.drain_pending_clauses() {
            if !self.clausal.add_clause(clause, &mut self.boolean_trail) {
                return false;
            }
        }
        true
    }

    /// Runs clausal propagation, the trail synchronisation, and the
    /// dispatcher in rotation until nothing changes. Returns false on
    /// conflict.
    pub fn propagate_to_fixpoint(&mut self) -> bool {
        if self.boolean_trail.decision_level() == 0 && !self.flush_encoder_clauses() {
            return false;
        }
        loop {
            let boolean_timestamp = self.boolean_trail.trail_index();
            let integer_timestamp = self.integer_trail.num_enqueues();

            if !self.clausal.propagate(&mut self.boolean_trail) {
                return false;
            }
            if !self
                .integer_trail
                .propagate(&mut self.boolean_trail, &mut self.encoder)
            {
                return false;
            }
            let mut context = PropagationContext {
                integer_trail: &mut self.integer_trail,
                encoder: &mut self.encoder,
                boolean_trail: &mut self.boolean_trail,
                trailed_values: &mut self.trailed_values,
            };
            if !self.dispatcher.propagate(&mut self.store, &mut context) {
                return false;
            }

            if self.boolean_trail.trail_index() == boolean_timestamp
                && self.integer_trail.num_enqueues() == integer_timestamp
                && !self.dispatcher.has_pending_work()
            {
                return true;
            }
        }
    }

    /// Enters a new decision level.
    pub fn increase_decision_level(&mut self) {
        self.boolean_trail.increase_decision_level();
        self.trailed_values.increase_decision_level();
    }

    /// Backtracks every component to the given level.
    pub fn backtrack_to(&mut self, level: usize) {
        if level < self.boolean_trail.decision_level() {
            self.boolean_trail.untrail(level);
        }
        self.integer_trail
            .untrail(level, self.boolean_trail.trail_index());
        // Everything up to here was already propagated, so pending bound
        // notifications are stale.
        let _ = self.integer_trail.drain_modified_vars();
        self.clausal.untrail(&self.boolean_trail);
        self.dispatcher.untrail(&self.boolean_trail);
        self.trailed_values.synchronise(level);
    }
}
