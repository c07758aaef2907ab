mod linear;

pub use linear::LinearConstraintPropagator;
