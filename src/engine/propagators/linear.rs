use crate::basic_types::Domain;
use crate::engine::dispatcher::PropagationContext;
use crate::engine::dispatcher::Propagator;
use crate::engine::variables::IntegerLiteral;
use crate::engine::variables::IntegerVariable;
use crate::marrow_assert_moderate;
use crate::math::cap_add;
use crate::math::cap_mul;
use crate::math::div_ceil;
use crate::math::div_floor;

/// Bounds propagation for `lower_bound <= sum(coeffs[i] * vars[i]) <= upper_bound`.
///
/// Terms are normalised at construction so that every coefficient is
/// positive, negating the variable where needed.
#[derive(Debug)]
pub struct LinearConstraintPropagator {
    vars: Vec<IntegerVariable>,
    coeffs: Vec<i64>,
    lower_bound: i64,
    upper_bound: i64,
}

impl LinearConstraintPropagator {
    pub fn new(
        terms: impl IntoIterator<Item = (IntegerVariable, i64)>,
        rhs: &Domain,
    ) -> LinearConstraintPropagator {
        let mut vars = Vec::new();
        let mut coeffs = Vec::new();
        for (var, coeff) in terms {
            marrow_assert_moderate!(coeff != 0);
            if coeff > 0 {
                vars.push(var);
                coeffs.push(coeff);
            } else {
                vars.push(var.negation());
                coeffs.push(-coeff);
            }
        }
        LinearConstraintPropagator {
            vars,
            coeffs,
            lower_bound: rhs.min(),
            upper_bound: rhs.max(),
        }
    }

    fn lower_bound_reason(&self, context: &PropagationContext<'_>) -> Vec<IntegerLiteral> {
        self.vars
            .iter()
            .map(|&var| {
                IntegerLiteral::greater_or_equal(var, context.integer_trail.lower_bound(var))
            })
            .collect()
    }

    fn upper_bound_reason(&self, context: &PropagationContext<'_>) -> Vec<IntegerLiteral> {
        self.vars
            .iter()
            .map(|&var| IntegerLiteral::lower_or_equal(var, context.integer_trail.upper_bound(var)))
            .collect()
    }
}

impl Propagator for LinearConstraintPropagator {
    fn name(&self) -> &str {
        "LinearConstraint"
    }

    fn propagate(&mut self, context: &mut PropagationContext<'_>) -> bool {
        let mut min_sum: i64 = 0;
        let mut max_sum: i64 = 0;
        for (&var, &coeff) in self.vars.iter().zip(&self.coeffs) {
            min_sum = cap_add(
                min_sum,
                cap_mul(coeff, context.integer_trail.lower_bound(var)),
            );
            max_sum = cap_add(
                max_sum,
                cap_mul(coeff, context.integer_trail.upper_bound(var)),
            );
        }

        if min_sum > self.upper_bound {
            let mut reason = self.lower_bound_reason(context);
            context.integer_trail.relax_linear_reason(
                min_sum - self.upper_bound - 1,
                &self.coeffs,
                &mut reason,
            );
            context.integer_trail.remove_level_zero_bounds(&mut reason);
            return context
                .integer_trail
                .report_conflict(&[], &reason, context.encoder);
        }
        if max_sum < self.lower_bound {
            let mut reason = self.upper_bound_reason(context);
            context.integer_trail.relax_linear_reason(
                self.lower_bound - max_sum - 1,
                &self.coeffs,
                &mut reason,
            );
            context.integer_trail.remove_level_zero_bounds(&mut reason);
            return context
                .integer_trail
                .report_conflict(&[], &reason, context.encoder);
        }

        for i in 0..self.vars.len() {
            let var = self.vars[i];
            let coeff = self.coeffs[i];
            let lb = context.integer_trail.lower_bound(var);
            let ub = context.integer_trail.upper_bound(var);

            // sum <= upper_bound tightens the upper bound of each term.
            if min_sum > i64::MIN && self.upper_bound < i64::MAX {
                let slack = self.upper_bound - (min_sum - cap_mul(coeff, lb));
                let new_ub = div_floor(slack, coeff);
                if new_ub < ub {
                    let mut reason: Vec<IntegerLiteral> = Vec::new();
                    for (j, &other) in self.vars.iter().enumerate() {
                        if j != i {
                            reason.push(IntegerLiteral::greater_or_equal(
                                other,
                                context.integer_trail.lower_bound(other),
                            ));
                        }
                    }
                    context.integer_trail.remove_level_zero_bounds(&mut reason);
                    if !context.integer_trail.enqueue(
                        IntegerLiteral::lower_or_equal(var, new_ub),
                        &[],
                        &reason,
                        context.boolean_trail,
                        context.encoder,
                    ) {
                        return false;
                    }
                }
            }

            // sum >= lower_bound tightens the lower bound of each term.
            if max_sum < i64::MAX && self.lower_bound > i64::MIN {
                let slack = self.lower_bound - (max_sum - cap_mul(coeff, ub));
                let new_lb = div_ceil(slack, coeff);
                if new_lb > lb {
                    let mut reason: Vec<IntegerLiteral> = Vec::new();
                    for (j, &other) in self.vars.iter().enumerate() {
                        if j != i {
                            reason.push(IntegerLiteral::lower_or_equal(
                                other,
                                context.integer_trail.upper_bound(other),
                            ));
                        }
                    }
                    context.integer_trail.remove_level_zero_bounds(&mut reason);
                    if !context.integer_trail.enqueue(
                        IntegerLiteral::greater_or_equal(var, new_lb),
                        &[],
                        &reason,
                        context.boolean_trail,
                        context.encoder,
                    ) {
                        return false;
                    }
                }
            }
        }
        true
    }
}
