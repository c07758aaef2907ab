//! The presolve rewriter: constraint-local simplifiers, the affine
//! equivalence repository, the fixpoint driver, and the post-solve mapping.
//!
//! The presolve works as follows. In a first stage all active constraints are
//! processed to a fixpoint; variables are never deleted (their domains only
//! shrink), constraints are never deleted (they are marked empty), and new
//! variables and constraints may be appended. Constraints needed to undo a
//! reduction are appended to the mapping model. In a second stage the
//! domains are written back, empty constraint slots are compacted, and only
//! the variables still appearing somewhere are kept and renumbered.

mod affine;
mod context;
mod fixpoint;
mod objective;
mod postsolve;
mod probing;
mod rewrite;
mod sat;

use std::time::Duration;

use fnv::FnvHashSet;
use itertools::Itertools;
use log::info;

use crate::basic_types::Domain;
use crate::marrow_assert_moderate;
use crate::model::validate_model;
use crate::model::Constraint;
use crate::model::ConstraintKind;
use crate::model::LinearConstraint;
use crate::model::Model;
use crate::model::VarRef;
use crate::model::VariableSelection;
use crate::termination::Indefinite;
use crate::termination::TerminationCondition;
use crate::termination::TimeBudget;

pub use affine::AffineRelation;
pub use affine::AffineRelationStore;
pub use context::PresolveContext;
pub use postsolve::apply_variable_mapping;
pub use sat::ClausePresolver;
pub use sat::UnitPropagationPresolver;

/// Configuration of the presolve.
#[derive(Debug, Clone)]
pub struct PresolveOptions {
    /// Disables the rules that would cut off feasible solutions (and the
    /// clause presolve), so every solution of the original model survives.
    pub enumerate_all_solutions: bool,
    /// Zero skips the probing stage.
    pub cp_model_probing_level: u32,
    /// Emit the per-rule hit counts when done.
    pub log_info: bool,
    /// Cooperative budget; on expiry the current fixpoint iteration returns
    /// as if it had reached quiescence.
    pub time_limit: Option<Duration>,
}

impl Default for PresolveOptions {
    fn default() -> Self {
        PresolveOptions {
            enumerate_all_solutions: false,
            cp_model_probing_level: 1,
            log_info: false,
            time_limit: None,
        }
    }
}

/// Presolves `working_model` in place into its compacted form, appending the
/// inverse rewrites to `mapping_model` and filling `postsolve_mapping` so
/// that entry `i` names the original index of new variable `i`.
///
/// On infeasibility the working model is replaced by the canonical
/// unsatisfiable model: a single empty Boolean-or.
pub fn presolve(
    options: &PresolveOptions,
    working_model: &mut Model,
    mapping_model: &mut Model,
    postsolve_mapping: &mut Vec<usize>,
) {
    let mut termination: Box<dyn TerminationCondition> = match options.time_limit {
        Some(budget) => Box::new(TimeBudget::starting_now(budget)),
        None => Box::new(Indefinite),
    };

    // The mapping model sees the original strategies.
    mapping_model.search_strategies = working_model.search_strategies.clone();

    postsolve_mapping.clear();
    let num_original_variables = working_model.variables.len();
    let has_objective = working_model.objective.is_some();

    let mut context =
        PresolveContext::new(working_model, mapping_model, options.enumerate_all_solutions);

    // Encode the linear objective so that it is presolved like a normal
    // constraint.
    if has_objective {
        objective::encode_objective_as_single_variable(&mut context);
    }

    // Main propagation loop.
    fixpoint::presolve_to_fixpoint(&mut context, termination.as_mut());

    if options.cp_model_probing_level > 0 {
        probing::probe(&mut context, termination.as_mut());
        fixpoint::presolve_to_fixpoint(&mut context, termination.as_mut());
    }

    remove_unused_equivalent_variables(&mut context);

    // Clause-level presolve of the pure-SAT part. This only removes or fixes
    // variables not used elsewhere, so no further fixpoint is needed.
    let mut clause_presolver = UnitPropagationPresolver::default();
    sat::presolve_pure_sat_part(&mut context, &mut clause_presolver);

    // Extract the redundant at-most-ones from the linear constraints.
    if !context.is_unsat {
        let old_size = context.working_model.constraints.len();
        for c in 0..old_size {
            let ct = std::mem::take(&mut context.working_model.constraints[c]);
            if let ConstraintKind::Linear(linear) = &ct.kind {
                if !linear.defining {
                    rewrite::extract_at_most_one_from_linear(&ct, &mut context);
                }
            }
            context.working_model.constraints[c] = ct;
        }
        context.update_new_constraints_variable_usage();
    }

    if context.is_unsat {
        // The canonical unsatisfiable model: one empty clause. The mapping
        // model still gets the variable definitions so it stays well-formed.
        context.mapping_model.variables = context.working_model.variables.clone();
        drop(context);
        *working_model = Model::default();
        let _ = working_model.add_constraint(Constraint::unenforced(ConstraintKind::BoolOr {
            literals: vec![],
        }));
        return;
    }

    merge_no_overlap_constraints(&mut context);

    if has_objective {
        objective::expand_objective(&mut context);
    }

    marrow_assert_moderate!(context.constraint_variable_usage_is_consistent());

    // Delete the cleared constraint slots, remapping interval references.
    let old_num_constraints = context.working_model.constraints.len();
    let mut interval_mapping: Vec<Option<usize>> = vec![None; old_num_constraints];
    let mut kept_constraints: Vec<Constraint> = Vec::with_capacity(old_num_constraints);
    for c in 0..old_num_constraints {
        let ct = std::mem::take(&mut context.working_model.constraints[c]);
        if ct.is_empty() {
            continue;
        }
        if matches!(ct.kind, ConstraintKind::Interval { .. }) {
            interval_mapping[c] = Some(kept_constraints.len());
        }
        kept_constraints.push(ct);
    }
    for ct in &mut kept_constraints {
        ct.for_each_interval_index(|index| {
            *index = interval_mapping[*index].expect("intervals outlive their users");
        });
    }
    context.working_model.constraints = kept_constraints;

    rewrite_search_strategies(&mut context);

    // Write back the final domains; the mapping model shares the full
    // variable list so the inverse rewrites can reference anything.
    context.sync_model_domains();
    context.mapping_model.variables = context.working_model.variables.clone();

    // Keep only the variables still used somewhere, in the old order.
    let mut mapping: Vec<Option<usize>> = vec![None; context.num_variables()];
    for (var, slot) in mapping.iter_mut().enumerate() {
        if context.var_to_constraints[var].is_empty() && !context.enumerate_all_solutions {
            continue;
        }
        *slot = Some(postsolve_mapping.len());
        postsolve_mapping.push(var);
    }

    if options.log_info {
        info!(
            "presolve: {} -> {} variables",
            num_original_variables,
            postsolve_mapping.len()
        );
        info!(
            "- {} affine relations were detected",
            context.affine_relations.num_relations()
        );
        info!(
            "- {} variable equivalence relations were detected",
            context.var_equiv_relations.num_relations()
        );
        for (name, count) in context
            .stats_by_rule_name()
            .iter()
            .sorted_by(|a, b| a.0.cmp(b.0))
        {
            info!("- rule '{name}' was applied {count} time(s)");
        }
    }
    drop(context);

    apply_variable_mapping(&mapping, working_model);

    marrow_assert_moderate!(validate_model(working_model).is_ok());
    marrow_assert_moderate!(validate_model(mapping_model).is_ok());
}

/// For every variable with an affine representative that itself no longer
/// appears anywhere, the defining relation moves to the mapping model;
/// otherwise it is re-emitted into the working model. The original defining
/// constraints are all cleared first.
fn remove_unused_equivalent_variables(context: &mut PresolveContext<'_>) {
    if context.is_unsat || context.enumerate_all_solutions {
        return;
    }

    for c in 0..context.working_model.constraints.len() {
        let is_defining = matches!(
            &context.working_model.constraints[c].kind,
            ConstraintKind::Linear(linear) if linear.defining
        );
        if is_defining {
            context.working_model.constraints[c].clear();
            context.update_constraint_variable_usage(c);
        }
    }

    for var in 0..context.num_variables() {
        let r = VarRef::from_index(var);
        if context.is_fixed(r) {
            continue;
        }
        let relation = context.get_affine_relation(var);
        if relation.representative == var {
            continue;
        }

        let to_mapping_model = context.var_to_constraints[var].is_empty();
        if to_mapping_model {
            // The variable can be reconstructed from its representative as
            // long as the representative's domain is tight.
            let implied = context
                .domain_of(r)
                .addition_with(&Domain::singleton(-relation.offset))
                .inverse_multiplication_by(relation.coeff);
            let _ = context.intersect_domain_with(
                VarRef::from_index(relation.representative),
                &implied,
            );
            if context.is_unsat {
                return;
            }
        }

        let defining_constraint = Constraint::unenforced(
            LinearConstraint::new(
                vec![r, VarRef::from_index(relation.representative)],
                vec![1, -relation.coeff],
                Domain::singleton(relation.offset),
            )
            .into(),
        );
        if to_mapping_model {
            let _ = context.mapping_model.add_constraint(defining_constraint);
        } else {
            let _ = context.working_model.add_constraint(defining_constraint);
        }
    }

    context.update_new_constraints_variable_usage();
}

/// Merges no-overlap constraints by greedily growing each one inside the
/// pairwise-nonoverlap implication graph; a constraint whose intervals end up
/// covered by a larger one is dropped.
fn merge_no_overlap_constraints(context: &mut PresolveContext<'_>) {
    if context.is_unsat {
        return;
    }

    let mut no_overlap_indices: Vec<usize> = Vec::new();
    let mut cliques: Vec<Vec<usize>> = Vec::new();
    for (c, ct) in context.working_model.constraints.iter().enumerate() {
        if let ConstraintKind::NoOverlap { intervals } = &ct.kind {
            no_overlap_indices.push(c);
            cliques.push(intervals.clone());
        }
    }
    if cliques.len() < 2 {
        return;
    }

    // Pairwise non-overlap edges implied by the existing constraints.
    let mut edges: FnvHashSet<(usize, usize)> = FnvHashSet::default();
    let mut nodes: FnvHashSet<usize> = FnvHashSet::default();
    for clique in &cliques {
        for (i, &a) in clique.iter().enumerate() {
            let _ = nodes.insert(a);
            for &b in &clique[i + 1..] {
                let _ = edges.insert((a.min(b), a.max(b)));
            }
        }
    }
    let adjacent =
        |edges: &FnvHashSet<(usize, usize)>, a: usize, b: usize| edges.contains(&(a.min(b), a.max(b)));

    // Grow the largest cliques first, then drop the ones they absorb.
    let order: Vec<usize> = (0..cliques.len())
        .sorted_by_key(|&i| std::cmp::Reverse(cliques[i].len()))
        .collect();
    let mut absorbed = vec![false; cliques.len()];
    let mut changed = false;
    for &i in &order {
        if absorbed[i] {
            continue;
        }
        let mut clique = cliques[i].clone();
        for &candidate in nodes.iter().sorted_unstable() {
            if clique.contains(&candidate) {
                continue;
            }
            if clique
                .iter()
                .all(|&member| adjacent(&edges, member, candidate))
            {
                clique.push(candidate);
                changed = true;
            }
        }
        let member_set: FnvHashSet<usize> = clique.iter().copied().collect();
        for &j in &order {
            if j == i || absorbed[j] {
                continue;
            }
            if cliques[j].iter().all(|interval| member_set.contains(interval)) {
                absorbed[j] = true;
                changed = true;
            }
        }
        cliques[i] = clique;
    }

    if !changed {
        return;
    }
    context.update_rule_stats("no_overlap: merged constraints");
    for (position, &c) in no_overlap_indices.iter().enumerate() {
        if absorbed[position] {
            context.working_model.constraints[c].clear();
        } else {
            let mut intervals = cliques[position].clone();
            intervals.sort_unstable();
            context.working_model.constraints[c].kind =
                ConstraintKind::NoOverlap { intervals };
        }
        context.update_constraint_variable_usage(c);
    }
}

/// Drops fixed variables from the search strategies, substitutes removed
/// variables by their affine representative (folding the transformation so
/// the selection order is preserved), and deduplicates across strategies.
fn rewrite_search_strategies(context: &mut PresolveContext<'_>) {
    let mut used_variables: FnvHashSet<usize> = FnvHashSet::default();
    let num_strategies = context.working_model.search_strategies.len();
    for s in 0..num_strategies {
        let strategy = context.working_model.search_strategies[s].clone();
        let mut new_variables: Vec<VarRef> = Vec::with_capacity(strategy.variables.len());
        let mut new_transformations = strategy.transformations.clone();
        for &r in &strategy.variables {
            let var = r.variable();
            if context.is_fixed(r) {
                continue;
            }
            // A variable appearing twice adds nothing; keep the first
            // occurrence of the first strategy it occurs in.
            if !used_variables.insert(var) {
                continue;
            }

            if context.var_to_constraints[var].is_empty() {
                let relation = context.get_affine_relation(var);
                if context.var_to_constraints[relation.representative].is_empty() {
                    // The variable was removed entirely; nothing to select.
                    continue;
                }
                let representative = VarRef::from_index(relation.representative);
                let representative = if (relation.coeff > 0) == r.is_positive() {
                    representative
                } else {
                    representative.negated()
                };
                new_variables.push(representative);
                if strategy.variable_selection != VariableSelection::ChooseFirst {
                    new_transformations.push(crate::model::AffineTransformation {
                        var: representative,
                        offset: relation.offset,
                        positive_coeff: relation.coeff.abs(),
                    });
                }
            } else {
                new_variables.push(r);
            }
        }
        let strategy = &mut context.working_model.search_strategies[s];
        strategy.variables = new_variables;
        strategy.transformations = new_transformations;
    }
}
