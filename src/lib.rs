//! A hybridized discontinuous Galerkin (HDG) solver for stationary convection-diffusion problems.
//!
//! The interior ("local") unknowns of each element are eliminated by static condensation before
//! assembly, so that the global system only couples the trace unknowns living on the mesh
//! skeleton. After the skeleton system has been solved, the local unknowns are recovered element
//! by element, and a superconvergent post-processed field is computed by a local projection.
//!
//! The typical entry point is [`problem::HdgProblem`].
use nalgebra::RealField;

pub mod assembly;
pub mod basis;
pub mod dense;
pub mod dofs;
pub mod error;
pub mod functions;
pub mod mesh;
pub mod problem;
pub mod quadrature;

pub extern crate hdg_sparse;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

/// Scalar type used by all numerical routines in this crate.
///
/// Used as a trait alias for the traits frequently needed by generic `hdg` routines.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
