//! Sparse linear operators and Krylov solvers used to solve the HDG skeleton system.
pub mod gmres;
pub mod operator;

pub use nalgebra_sparse::CsrMatrix;
pub use operator::{IdentityOperator, JacobiPreconditioner, LinearOperator};
