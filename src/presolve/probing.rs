//! Level-zero probing: the model is loaded into the engine, each free
//! Boolean is assumed at both polarities, and everything implied by both
//! branches (failed literals, shared implications, bound intersections,
//! literal equivalences) is fixed back into the presolve context.

use log::debug;

use crate::engine::propagators::LinearConstraintPropagator;
use crate::engine::variables::IntegerLiteral;
use crate::engine::variables::IntegerVariable;
use crate::engine::variables::Literal;
use crate::engine::Engine;
use crate::model::ConstraintKind;
use crate::model::VarRef;
use crate::presolve::context::PresolveContext;
use crate::termination::TerminationCondition;

/// How many literals an at-most-one may have before its pairwise expansion
/// is considered too expensive for probing.
const MAX_AT_MOST_ONE_EXPANSION: usize = 10;

struct ProbingState {
    engine: Engine,
    integer_vars: Vec<IntegerVariable>,
    /// The engine literal standing for `var >= 1` of each Boolean variable.
    boolean_literal: Vec<Option<Literal>>,
}

impl ProbingState {
    fn literal_of(&self, r: VarRef) -> Option<Literal> {
        let literal = self.boolean_literal[r.variable()]?;
        Some(if r.is_positive() { literal } else { !literal })
    }
}

fn load_model(context: &mut PresolveContext<'_>) -> Option<ProbingState> {
    let mut engine = Engine::new();
    let num_variables = context.num_variables();

    let mut integer_vars = Vec::with_capacity(num_variables);
    for var in 0..num_variables {
        let domain = context.domain_of(VarRef::from_index(var));
        integer_vars.push(engine.integer_trail.add_integer_variable(domain));
    }

    let mut boolean_literal: Vec<Option<Literal>> = vec![None; num_variables];
    for var in 0..num_variables {
        if !context.is_boolean(VarRef::from_index(var)) {
            continue;
        }
        let literal = engine.encoder.get_or_create_associated_literal(
            IntegerLiteral::greater_or_equal(integer_vars[var], 1),
            engine.integer_trail.domains(),
            &mut engine.boolean_trail,
        );
        boolean_literal[var] = Some(literal);
    }

    let mut state = ProbingState {
        engine,
        integer_vars,
        boolean_literal,
    };

    // Load the constraints the engine understands.
    for ct in context.working_model.constraints.iter() {
        match (&ct.kind, ct.enforcement.len()) {
            (ConstraintKind::BoolOr { literals }, 0) => {
                let Some(clause) = literals
                    .iter()
                    .map(|&r| state.literal_of(r))
                    .collect::<Option<Vec<_>>>()
                else {
                    continue;
                };
                if !state
                    .engine
                    .clausal
                    .add_clause(clause, &mut state.engine.boolean_trail)
                {
                    return None;
                }
            }
            (ConstraintKind::BoolAnd { literals }, 1) => {
                let Some(enforcement) = state.literal_of(ct.enforcement[0]) else {
                    continue;
                };
                for &r in literals {
                    let Some(literal) = state.literal_of(r) else {
                        continue;
                    };
                    if !state
                        .engine
                        .clausal
                        .add_clause(vec![!enforcement, literal], &mut state.engine.boolean_trail)
                    {
                        return None;
                    }
                }
            }
            (ConstraintKind::AtMostOne { literals }, 0)
                if literals.len() <= MAX_AT_MOST_ONE_EXPANSION =>
            {
                for i in 0..literals.len() {
                    for j in i + 1..literals.len() {
                        let (Some(a), Some(b)) =
                            (state.literal_of(literals[i]), state.literal_of(literals[j]))
                        else {
                            continue;
                        };
                        if !state
                            .engine
                            .clausal
                            .add_clause(vec![!a, !b], &mut state.engine.boolean_trail)
                        {
                            return None;
                        }
                    }
                }
            }
            (ConstraintKind::Linear(linear), 0) => {
                let terms = linear
                    .vars
                    .iter()
                    .zip(&linear.coeffs)
                    .map(|(r, &coeff)| {
                        let var = state.integer_vars[r.variable()];
                        if r.is_positive() {
                            (var, coeff)
                        } else {
                            (var.negation(), coeff)
                        }
                    })
                    .collect::<Vec<_>>();
                let propagator = LinearConstraintPropagator::new(terms, &linear.rhs);
                let id = state
                    .engine
                    .dispatcher
                    .register(Box::new(propagator), &mut state.engine.store);
                for r in &linear.vars {
                    state.engine.dispatcher.watch_integer_variable(
                        state.integer_vars[r.variable()],
                        crate::engine::BoundEvent::LowerBound | crate::engine::BoundEvent::UpperBound,
                        id,
                        None,
                    );
                }
                state
                    .engine
                    .dispatcher
                    .notify_propagator_may_not_reach_fixpoint_in_one_pass(id);
            }
            _ => {}
        }
    }

    Some(state)
}

/// Reads the engine's level-zero bounds back into the context.
fn import_root_bounds(state: &ProbingState, context: &mut PresolveContext<'_>) {
    for (var, &engine_var) in state.integer_vars.iter().enumerate() {
        let domain = state.engine.integer_trail.initial_variable_domain(engine_var);
        let _ = context.intersect_domain_with(VarRef::from_index(var), &domain.clone());
        if context.is_unsat {
            return;
        }
    }
}

/// Fixes Boolean variables implied at level zero, intersects the bounds
/// implied by both polarities of each probe, and records equivalences
/// between literals that follow each other both ways.
pub(crate) fn probe(
    context: &mut PresolveContext<'_>,
    termination: &mut dyn TerminationCondition,
) {
    if context.is_unsat {
        return;
    }
    context.sync_model_domains();

    let Some(mut state) = load_model(context) else {
        context.is_unsat = true;
        return;
    };

    if !state.engine.propagate_to_fixpoint() {
        context.is_unsat = true;
        return;
    }
    import_root_bounds(&state, context);
    if context.is_unsat {
        return;
    }

    let num_engine_vars = state.engine.integer_trail.num_integer_variables();
    let num_probed = state.boolean_literal.len();
    for var in 0..num_probed {
        if termination.should_stop() {
            break;
        }
        let Some(literal) = state.boolean_literal[var] else {
            continue;
        };
        if !state.engine.boolean_trail.is_unassigned(literal) {
            continue;
        }

        // Probe both polarities, remembering what each branch implied.
        let mut branch_bounds: [Vec<i64>; 2] = [Vec::new(), Vec::new()];
        let mut branch_failed = [false, false];
        let mut branch_assignments: [Vec<Option<bool>>; 2] = [Vec::new(), Vec::new()];
        for (branch, polarity) in [(0, true), (1, false)] {
            let decision = if polarity { literal } else { !literal };
            state.engine.increase_decision_level();
            let _ = state.engine.boolean_trail.enqueue(decision, None);
            let ok = state.engine.propagate_to_fixpoint();
            if ok {
                branch_bounds[branch] = (0..num_engine_vars)
                    .map(|id| {
                        state
                            .engine
                            .integer_trail
                            .lower_bound(IntegerVariable::from_id(id as u32))
                    })
                    .collect();
                branch_assignments[branch] = state
                    .boolean_literal
                    .iter()
                    .map(|maybe_literal| {
                        maybe_literal.and_then(|other| {
                            if state.engine.boolean_trail.is_true(other) {
                                Some(true)
                            } else if state.engine.boolean_trail.is_false(other) {
                                Some(false)
                            } else {
                                None
                            }
                        })
                    })
                    .collect();
            } else {
                branch_failed[branch] = true;
            }
            state.engine.backtrack_to(0);
        }

        match branch_failed {
            [true, true] => {
                context.is_unsat = true;
                return;
            }
            [failed_true, failed_false] if failed_true || failed_false => {
                // A failed literal: its negation holds at level zero.
                let fixed = if failed_true { !literal } else { literal };
                debug!("probing fixed {fixed}");
                context.update_rule_stats("probing: failed literal");
                let fixed_ref = VarRef::from_index(var);
                let fixed_ref = if failed_true {
                    fixed_ref.negated()
                } else {
                    fixed_ref
                };
                context.set_literal_to_true(fixed_ref);
                if !state.engine.boolean_trail.enqueue(fixed, None)
                    || !state.engine.propagate_to_fixpoint()
                {
                    context.is_unsat = true;
                    return;
                }
            }
            _ => {
                // Both branches are consistent: whatever they agree on holds.
                for id in 0..num_engine_vars {
                    let bound = branch_bounds[0][id].min(branch_bounds[1][id]);
                    let engine_var = IntegerVariable::from_id(id as u32);
                    if bound > state.engine.integer_trail.lower_bound(engine_var) {
                        context.update_rule_stats("probing: common bound");
                        if !state.engine.integer_trail.enqueue(
                            IntegerLiteral::greater_or_equal(engine_var, bound),
                            &[],
                            &[],
                            &mut state.engine.boolean_trail,
                            &state.engine.encoder,
                        ) {
                            context.is_unsat = true;
                            return;
                        }
                    }
                }
                for other_var in 0..num_probed {
                    if other_var == var {
                        continue;
                    }
                    let (on_true, on_false) = (
                        branch_assignments[0][other_var],
                        branch_assignments[1][other_var],
                    );
                    match (on_true, on_false) {
                        (Some(a), Some(b)) if a == b => {
                            // Implied by both polarities.
                            context.update_rule_stats("probing: implied literal");
                            let other_ref = VarRef::from_index(other_var);
                            context
                                .set_literal_to_true(if a { other_ref } else { other_ref.negated() });
                        }
                        (Some(true), Some(false)) => {
                            context.update_rule_stats("probing: equivalent literals");
                            context.add_boolean_equality_relation(
                                VarRef::from_index(var),
                                VarRef::from_index(other_var),
                            );
                        }
                        (Some(false), Some(true)) => {
                            context.update_rule_stats("probing: equivalent literals");
                            context.add_boolean_equality_relation(
                                VarRef::from_index(var),
                                VarRef::from_index(other_var).negated(),
                            );
                        }
                        _ => {}
                    }
                    if context.is_unsat {
                        return;
                    }
                }
            }
        }

        if !state.engine.propagate_to_fixpoint() {
            context.is_unsat = true;
            return;
        }
    }

    import_root_bounds(&state, context);
}
