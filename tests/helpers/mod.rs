//! Shared helpers: a reference evaluator for models, brute-force solution
//! enumeration, and a replay of the mapping model for reconstructing full
//! solutions.

use marrow::model::Constraint;
use marrow::model::ConstraintKind;
use marrow::model::Model;
use marrow::model::VarRef;

pub fn value_of(r: VarRef, values: &[i64]) -> i64 {
    if r.is_positive() {
        values[r.variable()]
    } else {
        -values[r.variable()]
    }
}

fn literal_holds(r: VarRef, values: &[i64]) -> bool {
    value_of(r, values) == 1
}

/// Whether the assignment satisfies the constraint. Scheduling constraints
/// are not produced by the generators used in these tests.
pub fn constraint_holds(ct: &Constraint, values: &[i64]) -> bool {
    if !ct.enforcement.iter().all(|&e| literal_holds(e, values)) {
        return true;
    }
    match &ct.kind {
        ConstraintKind::Empty => true,
        ConstraintKind::BoolOr { literals } => {
            literals.iter().any(|&l| literal_holds(l, values))
        }
        ConstraintKind::BoolAnd { literals } => {
            literals.iter().all(|&l| literal_holds(l, values))
        }
        ConstraintKind::AtMostOne { literals } => {
            literals.iter().filter(|&&l| literal_holds(l, values)).count() <= 1
        }
        ConstraintKind::IntMax { target, vars } => {
            let max = vars.iter().map(|&r| value_of(r, values)).max();
            max == Some(value_of(*target, values))
        }
        ConstraintKind::IntMin { target, vars } => {
            let min = vars.iter().map(|&r| value_of(r, values)).min();
            min == Some(value_of(*target, values))
        }
        ConstraintKind::IntProd { target, vars } => {
            let product: i64 = vars.iter().map(|&r| value_of(r, values)).product();
            product == value_of(*target, values)
        }
        ConstraintKind::IntDiv {
            target,
            numerator,
            denominator,
        } => {
            let denominator = value_of(*denominator, values);
            denominator != 0 && value_of(*numerator, values) / denominator == value_of(*target, values)
        }
        ConstraintKind::Linear(linear) => {
            let sum: i64 = linear
                .vars
                .iter()
                .zip(&linear.coeffs)
                .map(|(&r, &coeff)| coeff * value_of(r, values))
                .sum();
            linear.rhs.contains(sum)
        }
        ConstraintKind::Element {
            index,
            target,
            vars,
        } => {
            let index = value_of(*index, values);
            index >= 0
                && (index as usize) < vars.len()
                && value_of(vars[index as usize], values) == value_of(*target, values)
        }
        ConstraintKind::Table {
            vars,
            tuples,
            negated,
        } => {
            let row: Vec<i64> = vars.iter().map(|&r| value_of(r, values)).collect();
            tuples.contains(&row) != *negated
        }
        ConstraintKind::AllDifferent { vars } => {
            let mut seen = Vec::new();
            for &r in vars {
                let value = value_of(r, values);
                if seen.contains(&value) {
                    return false;
                }
                seen.push(value);
            }
            true
        }
        ConstraintKind::Interval { start, size, end } => {
            value_of(*start, values) + value_of(*size, values) == value_of(*end, values)
        }
        ConstraintKind::Circuit {
            tails,
            heads,
            literals,
        } => circuit_holds(tails, heads, literals, values),
        ConstraintKind::NoOverlap { .. } | ConstraintKind::Cumulative { .. } => {
            unimplemented!("not produced by the test generators")
        }
    }
}

fn circuit_holds(tails: &[usize], heads: &[usize], literals: &[VarRef], values: &[i64]) -> bool {
    let num_nodes = tails
        .iter()
        .chain(heads.iter())
        .map(|&n| n + 1)
        .max()
        .unwrap_or(0);
    let mut next: Vec<Option<usize>> = vec![None; num_nodes];
    let mut in_degree = vec![0usize; num_nodes];
    let mut touched = vec![false; num_nodes];
    for i in 0..literals.len() {
        touched[tails[i]] = true;
        touched[heads[i]] = true;
        if literal_holds(literals[i], values) {
            if next[tails[i]].is_some() {
                return false;
            }
            next[tails[i]] = Some(heads[i]);
            in_degree[heads[i]] += 1;
        }
    }
    // Every touched node has exactly one incoming and one outgoing arc.
    for node in 0..num_nodes {
        if touched[node] && (next[node].is_none() || in_degree[node] != 1) {
            return false;
        }
    }
    // All non-self-loop nodes lie on one circuit.
    let on_circuit: Vec<usize> = (0..num_nodes)
        .filter(|&n| touched[n] && next[n] != Some(n))
        .collect();
    let Some(&start) = on_circuit.first() else {
        return true;
    };
    let mut length = 0;
    let mut current = start;
    loop {
        length += 1;
        current = next[current].expect("checked degree");
        if current == start {
            break;
        }
        if length > num_nodes {
            return false;
        }
    }
    length == on_circuit.len()
}

pub fn is_feasible(model: &Model, values: &[i64]) -> bool {
    model
        .variables
        .iter()
        .enumerate()
        .all(|(var, domain)| domain.contains(values[var]))
        && model.constraints.iter().all(|ct| constraint_holds(ct, values))
}

/// All feasible assignments, by brute force. Only usable on tiny models.
pub fn enumerate_solutions(model: &Model) -> Vec<Vec<i64>> {
    let mut solutions = Vec::new();
    let mut values = vec![0i64; model.variables.len()];
    enumerate_recursive(model, 0, &mut values, &mut solutions);
    solutions
}

fn enumerate_recursive(
    model: &Model,
    var: usize,
    values: &mut Vec<i64>,
    solutions: &mut Vec<Vec<i64>>,
) {
    if var == model.variables.len() {
        if model.constraints.iter().all(|ct| constraint_holds(ct, values)) {
            solutions.push(values.clone());
        }
        return;
    }
    let candidates: Vec<i64> = model.variables[var].values().collect();
    for value in candidates {
        values[var] = value;
        enumerate_recursive(model, var + 1, values, solutions);
    }
}

/// Lifts a solution of the presolved model back to the original variables by
/// replaying the mapping model, deepest reduction first.
pub fn postsolve_solution(
    reduced_solution: &[i64],
    mapping_model: &Model,
    postsolve_mapping: &[usize],
) -> Vec<i64> {
    let num_variables = mapping_model.variables.len();
    let mut values: Vec<Option<i64>> = vec![None; num_variables];
    for (new, &old) in postsolve_mapping.iter().enumerate() {
        values[old] = Some(reduced_solution[new]);
    }

    for ct in mapping_model.constraints.iter().rev() {
        replay_constraint(ct, mapping_model, &mut values);
    }

    // Anything still free is unconstrained; any domain value works.
    values
        .iter()
        .enumerate()
        .map(|(var, value)| value.unwrap_or_else(|| mapping_model.variables[var].min()))
        .collect()
}

fn replay_constraint(ct: &Constraint, mapping_model: &Model, values: &mut [Option<i64>]) {
    match &ct.kind {
        ConstraintKind::Linear(linear) => {
            // Solve for the single unknown term, if any.
            let mut unknown = None;
            let mut known_sum = 0i64;
            for (&r, &coeff) in linear.vars.iter().zip(&linear.coeffs) {
                match values[r.variable()] {
                    Some(value) => {
                        known_sum += coeff * if r.is_positive() { value } else { -value }
                    }
                    None if unknown.is_some() => return,
                    None => unknown = Some((r, coeff)),
                }
            }
            let Some((r, coeff)) = unknown else {
                return;
            };
            // known_sum + coeff * term = rhs value.
            let target = linear.rhs.min() - known_sum;
            if target % coeff != 0 {
                return;
            }
            let term = target / coeff;
            values[r.variable()] = Some(if r.is_positive() { term } else { -term });
        }
        ConstraintKind::Element {
            index,
            target,
            vars,
        } => {
            let target_value = values[target.variable()].map(|v| {
                if target.is_positive() {
                    v
                } else {
                    -v
                }
            });
            // Pick any index whose (constant) cell matches the target.
            for candidate in mapping_model.variables[index.variable()].values() {
                let index_value = if index.is_positive() {
                    candidate
                } else {
                    -candidate
                };
                if index_value < 0 || index_value as usize >= vars.len() {
                    continue;
                }
                let cell = vars[index_value as usize];
                let cell_value = values[cell.variable()].map(|v| {
                    if cell.is_positive() {
                        v
                    } else {
                        -v
                    }
                });
                let Some(cell_value) = cell_value else {
                    continue;
                };
                if target_value.is_some_and(|t| t != cell_value) {
                    continue;
                }
                values[index.variable()] = Some(candidate);
                if target_value.is_none() {
                    values[target.variable()] = Some(if target.is_positive() {
                        cell_value
                    } else {
                        -cell_value
                    });
                }
                return;
            }
        }
        ConstraintKind::BoolOr { literals } => {
            let satisfied = literals.iter().any(|&l| {
                values[l.variable()]
                    .is_some_and(|v| (v == 1) == l.is_positive())
            });
            if satisfied {
                return;
            }
            if let Some(&free) = literals
                .iter()
                .find(|&&l| values[l.variable()].is_none())
            {
                values[free.variable()] = Some(if free.is_positive() { 1 } else { 0 });
            }
        }
        _ => {}
    }
}
