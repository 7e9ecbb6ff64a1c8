//! Element-wise superconvergent post-processing.
//!
//! On each element, a field `u*` of one degree higher than the local space is computed such that
//! its gradient matches the recovered flux in the least-squares sense, `(∇u*, ∇w) = -(q_h, ∇w)`,
//! and its mean value matches the mean of the scalar solution. The mean condition replaces the
//! first row of the (singular) gradient system.
use crate::assembly::AssemblyError;
use crate::basis::ReferenceTables;
use crate::dense::{gauss_jordan, vmult};
use crate::dofs::DofMap;
use crate::mesh::QuadMesh2d;
use crate::nalgebra::{DMatrix, DVector, Matrix2, Point2, Scalar, Vector2};
use crate::Real;
use rayon::prelude::*;
use std::cell::Cell;
use std::marker::PhantomData;

/// Per-worker buffers for the projection.
#[derive(Debug)]
pub struct ProjectionScratch<T: Scalar> {
    matrix: DMatrix<T>,
    rhs: DVector<T>,
    solution: DVector<T>,
    gradients: Vec<Vector2<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T: Real> Default for ProjectionScratch<T> {
    fn default() -> Self {
        Self {
            matrix: DMatrix::zeros(0, 0),
            rhs: DVector::zeros(0),
            solution: DVector::zeros(0),
            gradients: Vec::new(),
            _not_sync: PhantomData,
        }
    }
}

impl<T: Real> ProjectionScratch<T> {
    fn prepare(&mut self, n: usize) {
        if self.matrix.nrows() != n {
            self.matrix = DMatrix::zeros(n, n);
            self.rhs = DVector::zeros(n);
            self.solution = DVector::zeros(n);
        }
        self.gradients.resize(n, Vector2::zeros());
        self.matrix.fill(T::zero());
        self.rhs.fill(T::zero());
    }
}

/// Projects the local solution onto the post-processing space of degree `p + 1`.
#[derive(Debug)]
pub struct SuperconvergentProjection<'a, T: Real> {
    mesh: &'a QuadMesh2d<T>,
    dof_map: &'a DofMap,
    /// Local space of degree `p`, tabulated at the post-processing quadrature.
    local_tables: ReferenceTables<T>,
    /// Post-processing space of degree `p + 1`.
    post_tables: ReferenceTables<T>,
}

impl<'a, T: Real> SuperconvergentProjection<'a, T> {
    pub fn new(mesh: &'a QuadMesh2d<T>, dof_map: &'a DofMap) -> Self {
        let degree = dof_map.degree();
        let num_points = degree + 2;
        Self {
            mesh,
            dof_map,
            local_tables: ReferenceTables::new(degree, num_points),
            post_tables: ReferenceTables::new(degree + 1, num_points),
        }
    }

    /// Computes the post-processed coefficients of one element from its local coefficients.
    #[allow(non_snake_case)]
    pub fn project_element(
        &self,
        cell: usize,
        local_solution: &[T],
        scratch: &mut ProjectionScratch<T>,
        post_solution: &mut [T],
    ) -> Result<(), AssemblyError> {
        let n_local = self.dof_map.local_dofs_per_cell();
        let n_post = self.dof_map.post_dofs_per_cell();
        if local_solution.len() != n_local {
            return Err(AssemblyError::DimensionMismatch {
                context: "project_element (local solution)",
                expected: n_local,
                actual: local_solution.len(),
            });
        }
        if post_solution.len() != n_post {
            return Err(AssemblyError::DimensionMismatch {
                context: "project_element (post solution)",
                expected: n_post,
                actual: post_solution.len(),
            });
        }

        scratch.prepare(n_post);
        let element = self.mesh.element(cell);
        let n = self.local_tables.num_functions();
        let (flux_x, rest) = local_solution.split_at(n);
        let (flux_y, scalar) = rest.split_at(n);

        for (q, (&w, xi)) in self
            .post_tables
            .weights()
            .iter()
            .zip(self.post_tables.points())
            .enumerate()
        {
            let J = element.reference_jacobian(xi);
            let JxW = w * J.determinant();
            let J_inv_t = J.try_inverse().map(|j| j.transpose()).unwrap_or_else(Matrix2::zeros);

            let local_values = self.local_tables.values().column(q);
            let mut u_h = T::zero();
            let mut q_h = Vector2::zeros();
            for s in 0..n {
                let phi = local_values[s];
                u_h += scalar[s] * phi;
                q_h += Vector2::new(flux_x[s], flux_y[s]) * phi;
            }

            let post_values = self.post_tables.values().column(q);
            let reference_gradients = self.post_tables.reference_gradients(q);
            for (i, gradient) in scratch.gradients.iter_mut().enumerate() {
                *gradient = J_inv_t * reference_gradients.column(i);
            }

            for i in 1..n_post {
                for j in 0..n_post {
                    scratch.matrix[(i, j)] += scratch.gradients[i].dot(&scratch.gradients[j]) * JxW;
                }
                scratch.rhs[i] -= scratch.gradients[i].dot(&q_h) * JxW;
            }
            for j in 0..n_post {
                scratch.matrix[(0, j)] += post_values[j] * JxW;
            }
            scratch.rhs[0] += u_h * JxW;
        }

        gauss_jordan(&mut scratch.matrix).map_err(|source| AssemblyError::SingularLocalMatrix { element: cell, source })?;
        vmult(&mut scratch.solution, &scratch.matrix, &scratch.rhs, false)
            .map_err(|source| AssemblyError::SingularLocalMatrix { element: cell, source })?;
        post_solution.copy_from_slice(scratch.solution.as_slice());
        Ok(())
    }

    /// Post-processes all elements in parallel.
    pub fn project(&self, local_solution: &DVector<T>) -> Result<DVector<T>, AssemblyError> {
        if local_solution.len() != self.dof_map.num_local_dofs() {
            return Err(AssemblyError::DimensionMismatch {
                context: "project",
                expected: self.dof_map.num_local_dofs(),
                actual: local_solution.len(),
            });
        }
        let n_local = self.dof_map.local_dofs_per_cell();
        let n_post = self.dof_map.post_dofs_per_cell();
        let mut post_solution = DVector::zeros(self.dof_map.num_post_dofs());
        post_solution
            .as_mut_slice()
            .par_chunks_mut(n_post)
            .zip(local_solution.as_slice().par_chunks(n_local))
            .enumerate()
            .try_for_each_init(ProjectionScratch::default, |scratch, (cell, (post, local))| {
                self.project_element(cell, local, scratch, post)
            })?;
        Ok(post_solution)
    }

    /// Evaluates the post-processed field of an element at a reference point.
    pub fn evaluate(&self, post_solution: &[T], reference_coords: &Point2<T>) -> T {
        let basis = self.post_tables.basis();
        let mut values = vec![T::zero(); basis.num_functions()];
        basis.populate_basis(&mut values, reference_coords);
        values
            .iter()
            .zip(post_solution)
            .fold(T::zero(), |acc, (&phi, &c)| acc + phi * c)
    }
}
