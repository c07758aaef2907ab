use thiserror::Error;

use crate::model::Constraint;
use crate::model::ConstraintKind;
use crate::model::Model;

/// A model-shape violation. These indicate programming errors in whatever
/// produced the model, not runtime inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidModelError {
    #[error("variable {variable} has an empty domain")]
    EmptyDomain { variable: usize },
    #[error("constraint {constraint} references variable {variable} which is out of range")]
    VariableOutOfRange { constraint: usize, variable: usize },
    #[error("constraint {constraint} references constraint {referenced} which is not an interval")]
    NotAnInterval { constraint: usize, referenced: usize },
    #[error("constraint {constraint} uses variable {variable} as a literal but it is not Boolean")]
    NonBooleanLiteral { constraint: usize, variable: usize },
    #[error("constraint {constraint} is malformed: {reason}")]
    MalformedConstraint {
        constraint: usize,
        reason: &'static str,
    },
    #[error("the objective references variable {variable} which is out of range")]
    ObjectiveVariableOutOfRange { variable: usize },
}

/// Checks that every constraint is well-formed, domains are non-empty, and
/// all variable references are in range.
pub fn validate_model(model: &Model) -> Result<(), InvalidModelError> {
    let num_variables = model.variables.len();

    for (variable, domain) in model.variables.iter().enumerate() {
        if domain.is_empty() {
            return Err(InvalidModelError::EmptyDomain { variable });
        }
    }

    for (c, ct) in model.constraints.iter().enumerate() {
        for variable in ct.referenced_variables() {
            if variable >= num_variables {
                return Err(InvalidModelError::VariableOutOfRange {
                    constraint: c,
                    variable,
                });
            }
        }
        // References used as literals must name Boolean variables.
        let mut non_boolean_literal = None;
        let mut copy = ct.clone();
        copy.for_each_literal_ref(|r| {
            let domain = &model.variables[r.variable()];
            if domain.min() < 0 || domain.max() > 1 {
                non_boolean_literal = Some(r.variable());
            }
        });
        if let Some(variable) = non_boolean_literal {
            return Err(InvalidModelError::NonBooleanLiteral {
                constraint: c,
                variable,
            });
        }
        validate_constraint_shape(c, ct, model)?;
    }

    if let Some(objective) = &model.objective {
        if objective.vars.len() != objective.coeffs.len() {
            return Err(InvalidModelError::MalformedConstraint {
                constraint: usize::MAX,
                reason: "objective has mismatched vars/coeffs",
            });
        }
        for r in &objective.vars {
            if r.variable() >= num_variables {
                return Err(InvalidModelError::ObjectiveVariableOutOfRange {
                    variable: r.variable(),
                });
            }
        }
    }

    Ok(())
}

fn validate_constraint_shape(
    c: usize,
    ct: &Constraint,
    model: &Model,
) -> Result<(), InvalidModelError> {
    let malformed = |reason| InvalidModelError::MalformedConstraint {
        constraint: c,
        reason,
    };

    match &ct.kind {
        ConstraintKind::Linear(linear) => {
            if linear.vars.len() != linear.coeffs.len() {
                return Err(malformed("linear has mismatched vars/coeffs"));
            }
        }
        ConstraintKind::Table { vars, tuples, .. } => {
            if tuples.iter().any(|tuple| tuple.len() != vars.len()) {
                return Err(malformed("table row arity does not match its variables"));
            }
        }
        ConstraintKind::Cumulative {
            intervals, demands, ..
        } => {
            if intervals.len() != demands.len() {
                return Err(malformed("cumulative has mismatched intervals/demands"));
            }
            validate_interval_references(c, intervals, model)?;
        }
        ConstraintKind::NoOverlap { intervals } => {
            validate_interval_references(c, intervals, model)?;
        }
        ConstraintKind::Circuit {
            tails,
            heads,
            literals,
        } => {
            if tails.len() != heads.len() || tails.len() != literals.len() {
                return Err(malformed("circuit has mismatched arc lists"));
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_interval_references(
    c: usize,
    intervals: &[usize],
    model: &Model,
) -> Result<(), InvalidModelError> {
    for &referenced in intervals {
        let is_interval = model
            .constraints
            .get(referenced)
            .is_some_and(|ct| matches!(ct.kind, ConstraintKind::Interval { .. }));
        if !is_interval {
            return Err(InvalidModelError::NotAnInterval {
                constraint: c,
                referenced,
            });
        }
    }
    Ok(())
}
