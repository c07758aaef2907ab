use crate::marrow_assert_simple;
use crate::model::Model;
use crate::model::VarRef;

/// Substitutes every variable reference in constraints, objective, search
/// strategies and solution hint according to `mapping`, where `mapping[old]`
/// is the new index of old variable `old` (or `None` when the variable was
/// removed), and moves the kept variable definitions into the new order.
///
/// Strategy entries and hint entries of removed variables are dropped;
/// constraint and objective references must all survive.
pub fn apply_variable_mapping(mapping: &[Option<usize>], model: &mut Model) {
    let remap = |r: VarRef| -> VarRef {
        let image = mapping[r.variable()].expect("a used variable must have an image");
        let image = VarRef::from_index(image);
        if r.is_positive() {
            image
        } else {
            image.negated()
        }
    };

    for ct in &mut model.constraints {
        ct.for_each_variable_ref(|r| *r = remap(*r));
        ct.for_each_literal_ref(|r| *r = remap(*r));
    }

    if let Some(objective) = &mut model.objective {
        for r in &mut objective.vars {
            *r = remap(*r);
        }
    }

    // Any strategy entry whose variable was removed is dropped.
    for strategy in &mut model.search_strategies {
        strategy
            .variables
            .retain(|r| mapping[r.variable()].is_some());
        for r in &mut strategy.variables {
            *r = remap(*r);
        }
        strategy
            .transformations
            .retain(|t| mapping[t.var.variable()].is_some());
        for transformation in &mut strategy.transformations {
            transformation.var = remap(transformation.var);
        }
    }

    if let Some(hint) = &mut model.solution_hint {
        let mut new_vars = Vec::with_capacity(hint.vars.len());
        let mut new_values = Vec::with_capacity(hint.values.len());
        for (&r, &value) in hint.vars.iter().zip(&hint.values) {
            if mapping[r.variable()].is_some() {
                new_vars.push(remap(r));
                new_values.push(value);
            }
        }
        if new_vars.is_empty() {
            model.solution_hint = None;
        } else {
            hint.vars = new_vars;
            hint.values = new_values;
        }
    }

    // Move the variable definitions into the new index order.
    let num_new_variables = mapping.iter().flatten().count();
    let mut new_variables = vec![crate::basic_types::Domain::empty(); num_new_variables];
    for (old, image) in mapping.iter().enumerate() {
        let Some(image) = image else {
            continue;
        };
        new_variables[*image] = std::mem::take(&mut model.variables[old]);
    }
    model.variables = new_variables;

    marrow_assert_simple!(model.variables.iter().all(|domain| !domain.is_empty()));
}
