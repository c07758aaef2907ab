//! # Marrow
//! Marrow is the presolve and propagation core of a CP-SAT style solver. It
//! takes a model over integer variables with finite domains and a
//! heterogeneous list of constraints, and produces an equivalent but smaller
//! model together with the bookkeeping needed to reconstruct a solution of
//! the original model from a solution of the reduced one.
//!
//! Next to the presolve itself, the crate exposes the runtime substrate on
//! which search propagators operate:
//! * an integer trail which records bound changes together with their
//!   reasons ([`engine::IntegerTrail`]),
//! * an encoder which links Boolean literals with integer bounds
//!   ([`engine::IntegerEncoder`]),
//! * a dispatcher which schedules propagators to a fixpoint
//!   ([`engine::PropagatorDispatcher`]).
//!
//! # Example
//! ```rust
//! use marrow::model::{Constraint, LinearConstraint, Model, Objective, VarRef};
//! use marrow::basic_types::Domain;
//! use marrow::presolve::{presolve, PresolveOptions};
//!
//! let mut model = Model::default();
//! let x = model.new_variable(Domain::new(0, 10));
//! let y = model.new_variable(Domain::new(0, 10));
//!
//! // Minimise x subject to x + y <= 5 and x - y = 0.
//! model.add_constraint(Constraint::unenforced(
//!     LinearConstraint::new(vec![x, y], vec![1, 1], Domain::new(i64::MIN, 5)).into(),
//! ));
//! model.add_constraint(Constraint::unenforced(
//!     LinearConstraint::new(vec![x, y], vec![1, -1], Domain::new(0, 0)).into(),
//! ));
//! model.objective = Some(Objective {
//!     vars: vec![x],
//!     coeffs: vec![1],
//!     offset: 0,
//!     domain: Domain::empty(),
//! });
//!
//! let mut mapping_model = Model::default();
//! let mut postsolve_mapping = Vec::new();
//! presolve(
//!     &PresolveOptions::default(),
//!     &mut model,
//!     &mut mapping_model,
//!     &mut postsolve_mapping,
//! );
//!
//! // A single variable with domain [0, 2] survives.
//! assert_eq!(model.variables.len(), 1);
//! assert_eq!(model.variables[0], Domain::new(0, 2));
//! ```
pub mod basic_types;
pub mod engine;
pub(crate) mod marrow_asserts;
pub(crate) mod math;
pub mod model;
pub mod presolve;
pub mod termination;

pub use crate::presolve::apply_variable_mapping;
pub use crate::presolve::presolve;
pub use crate::presolve::PresolveOptions;
