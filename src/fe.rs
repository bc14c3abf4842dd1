//! # Discontinuous finite elements
//!
//! Nodal tensor-product Lagrange elements on axis-parallel quadrilaterals.
//! Operators are never assembled; they are applied cell batch by cell
//! batch with the evaluators in [`evaluator`].
pub mod evaluator;
pub mod loops;
pub mod mass;
pub mod quadrature;
pub mod shape;
pub use evaluator::{
    batch_cells, boundary_mask, curl, divergence, face_neighbors, homogeneous_exterior_state,
    interior_mask, CellEvaluator, Coupling, FaceEvaluator, FieldEvaluator, LaneGeometry,
    PolynomialEvaluator,
};
pub use loops::{batch_map, cell_loop, local_matrices};
pub use mass::InverseMassMatrix;
pub use shape::ShapeInfo;
