//! Restarted GMRES for general (non-symmetric) sparse systems.
use crate::operator::{IdentityOperator, LinearOperator, OperatorError};
use core::fmt;
use log::debug;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut, RealField, Scalar};
use num::Zero;
use std::error::Error;
use std::ops::{Deref, DerefMut};

pub trait GmresStoppingCriterion<T: Scalar> {
    /// Decide convergence from the (approximate) residual norm maintained by GMRES.
    fn has_converged(&self, b_norm: T, residual_norm: T, iteration: usize) -> bool;
}

/// Relative residual tolerance ||r|| <= tol * ||b||.
///
/// GMRES tracks the residual norm of the least-squares problem in the Krylov basis, which
/// equals the true residual up to round-off.
#[derive(Debug, Clone)]
pub struct RelativeResidualCriterion<T: Scalar> {
    tol: T,
}

impl<T: Scalar> RelativeResidualCriterion<T> {
    pub fn new(tol: T) -> Self {
        Self { tol }
    }
}

impl Default for RelativeResidualCriterion<f64> {
    fn default() -> Self {
        Self::new(1e-10)
    }
}

impl<T: RealField + Copy> GmresStoppingCriterion<T> for RelativeResidualCriterion<T> {
    fn has_converged(&self, b_norm: T, residual_norm: T, _iteration: usize) -> bool {
        residual_norm <= self.tol * b_norm
    }
}

#[derive(Debug, Clone)]
pub struct GmresWorkspace<T: Scalar> {
    // Krylov basis v_0, ..., v_m
    basis: Vec<DVector<T>>,
    // Preconditioned directions z_j = P v_j
    directions: Vec<DVector<T>>,
    residual: DVector<T>,
    w: DVector<T>,
    hessenberg: DMatrix<T>,
    cosines: Vec<T>,
    sines: Vec<T>,
    g: Vec<T>,
    y: Vec<T>,
}

impl<T: Scalar + Zero> Default for GmresWorkspace<T> {
    fn default() -> Self {
        Self {
            basis: Vec::new(),
            directions: Vec::new(),
            residual: DVector::zeros(0),
            w: DVector::zeros(0),
            hessenberg: DMatrix::zeros(0, 0),
            cosines: Vec::new(),
            sines: Vec::new(),
            g: Vec::new(),
            y: Vec::new(),
        }
    }
}

impl<T: Scalar + Zero> GmresWorkspace<T> {
    fn prepare(&mut self, dim: usize, restart: usize) {
        self.basis.resize_with(restart + 1, || DVector::zeros(dim));
        self.directions.resize_with(restart, || DVector::zeros(dim));
        for v in self.basis.iter_mut().chain(self.directions.iter_mut()) {
            v.resize_vertically_mut(dim, T::zero());
        }
        self.residual.resize_vertically_mut(dim, T::zero());
        self.w.resize_vertically_mut(dim, T::zero());
        self.hessenberg.resize_mut(restart + 1, restart, T::zero());
        self.cosines.resize(restart, T::zero());
        self.sines.resize(restart, T::zero());
        self.g.resize(restart + 1, T::zero());
        self.y.resize(restart, T::zero());
    }
}

#[derive(Debug)]
enum OwnedOrMutRef<'a, T> {
    Owned(T),
    MutRef(&'a mut T),
}

impl<'a, T> Deref for OwnedOrMutRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

impl<'a, T> DerefMut for OwnedOrMutRef<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

/// Restarted, right-preconditioned GMRES.
///
/// The preconditioner is applied as `A P u = b`, `x = P u`, so the residual monitored by the
/// stopping criterion is the residual of the original system.
#[derive(Debug)]
pub struct Gmres<'a, T, A, P, Criterion>
where
    T: Scalar,
{
    workspace: OwnedOrMutRef<'a, GmresWorkspace<T>>,
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    restart: usize,
    max_iter: Option<usize>,
}

const DEFAULT_RESTART: usize = 50;

impl<'a, T: Scalar + Zero> Gmres<'a, T, (), IdentityOperator, ()> {
    pub fn new() -> Self {
        Self {
            workspace: OwnedOrMutRef::Owned(GmresWorkspace::default()),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            restart: DEFAULT_RESTART,
            max_iter: None,
        }
    }
}

impl<'a, T: Scalar> Gmres<'a, T, (), IdentityOperator, ()> {
    pub fn with_workspace(workspace: &'a mut GmresWorkspace<T>) -> Self {
        Self {
            workspace: OwnedOrMutRef::MutRef(workspace),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            restart: DEFAULT_RESTART,
            max_iter: None,
        }
    }
}

impl<'a, T: Scalar, P, Criterion> Gmres<'a, T, (), P, Criterion> {
    pub fn with_operator<A>(self, operator: A) -> Gmres<'a, T, A, P, Criterion> {
        Gmres {
            workspace: self.workspace,
            operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            restart: self.restart,
            max_iter: self.max_iter,
        }
    }
}

impl<'a, T: Scalar, A, P, Criterion> Gmres<'a, T, A, P, Criterion> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> Gmres<'a, T, A, P2, Criterion> {
        Gmres {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner,
            stopping_criterion: self.stopping_criterion,
            restart: self.restart,
            max_iter: self.max_iter,
        }
    }

    /// Sets the dimension of the Krylov space built before each restart.
    ///
    /// # Panics
    ///
    /// Panics if `restart` is zero.
    pub fn with_restart(self, restart: usize) -> Self {
        assert!(restart > 0, "restart length must be positive");
        Self { restart, ..self }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }
}

impl<'a, T: Scalar, A, P> Gmres<'a, T, A, P, ()> {
    pub fn with_stopping_criterion<Criterion>(self, stopping_criterion: Criterion) -> Gmres<'a, T, A, P, Criterion> {
        Gmres {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion,
            restart: self.restart,
            max_iter: self.max_iter,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(OperatorError),
    PreconditionerError(OperatorError),
    MaxIterationsReached { max_iter: usize },
    /// The Arnoldi process produced a non-finite entry.
    Breakdown,
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => {
                write!(f, "Error applying operator: ")?;
                err.fmt(f)
            }
            Self::PreconditionerError(err) => {
                write!(f, "Error applying preconditioner: ")?;
                err.fmt(f)
            }
            Self::MaxIterationsReached { max_iter } => {
                write!(f, "Max iterations ({}) reached.", max_iter)
            }
            Self::Breakdown => write!(f, "Arnoldi process broke down (non-finite values)"),
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct GmresOutput<T> {
    /// Number of Arnoldi steps (matrix-vector products with the operator) over all restarts.
    pub num_iterations: usize,
    pub num_restarts: usize,
    /// Residual norm estimate at termination.
    pub residual_norm: T,
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError<T> {
    pub output: GmresOutput<T>,
    pub kind: SolveErrorKind,
}

impl<T> SolveError<T> {
    fn new(output: GmresOutput<T>, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }
}

impl<T: fmt::Debug> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GMRES solve failed after {} iterations (residual {:?}). Error: {}",
            self.output.num_iterations, self.output.residual_norm, self.kind
        )
    }
}

impl<T: fmt::Debug> Error for SolveError<T> {}

/// y = Ax
fn apply_operator<'a, T, A>(
    y: impl Into<DVectorViewMut<'a, T>>,
    a: &'a A,
    x: impl Into<DVectorView<'a, T>>,
) -> Result<(), OperatorError>
where
    T: Scalar,
    A: LinearOperator<T>,
{
    a.apply(y.into(), x.into())
}

/// Computes the Givens rotation `(c, s)` that maps `(a, b)` to `(r, 0)`.
fn givens_rotation<T: RealField + Copy>(a: T, b: T) -> (T, T, T) {
    if b == T::zero() {
        (T::one(), T::zero(), a)
    } else {
        let r = a.hypot(b);
        (a / r, b / r, r)
    }
}

impl<'a, T, A, P, Criterion> Gmres<'a, T, A, P, Criterion>
where
    T: RealField + Copy,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
    Criterion: GmresStoppingCriterion<T>,
{
    pub fn solve_with_guess<'b>(
        &mut self,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<GmresOutput<T>, SolveError<T>> {
        self.solve_with_guess_(b.into(), x.into())
    }

    fn solve_with_guess_(&mut self, b: DVectorView<T>, mut x: DVectorViewMut<T>) -> Result<GmresOutput<T>, SolveError<T>> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len());

        let n = x.len();
        // A Krylov space can not grow beyond the dimension of the system
        let m = self.restart.min(n.max(1));
        let mut output = GmresOutput {
            num_iterations: 0,
            num_restarts: 0,
            residual_norm: T::zero(),
        };

        let b_norm = b.norm();
        if b_norm == T::zero() {
            x.fill(T::zero());
            return Ok(output);
        }

        self.workspace.prepare(n, m);
        let ws = &mut *self.workspace;

        loop {
            // r = b - Ax
            if let Err(err) = apply_operator(&mut ws.residual, &self.operator, &x) {
                return Err(SolveError::new(output, OperatorError(err)));
            }
            ws.residual.zip_apply(&b, |r_i, b_i| *r_i = b_i - *r_i);
            let beta = ws.residual.norm();
            output.residual_norm = beta;

            if self
                .stopping_criterion
                .has_converged(b_norm, beta, output.num_iterations)
            {
                return Ok(output);
            }
            if let Some(max_iter) = self.max_iter {
                if output.num_iterations >= max_iter {
                    return Err(SolveError::new(output, MaxIterationsReached { max_iter }));
                }
            }

            ws.basis[0].copy_from(&ws.residual);
            ws.basis[0].unscale_mut(beta);
            ws.g.fill(T::zero());
            ws.g[0] = beta;
            ws.hessenberg.fill(T::zero());

            let mut krylov_dim = 0;
            let mut converged = false;
            for j in 0..m {
                // z_j = P v_j
                if let Err(err) = apply_operator(&mut ws.directions[j], &self.preconditioner, &ws.basis[j]) {
                    return Err(SolveError::new(output, PreconditionerError(err)));
                }
                // w = A z_j
                if let Err(err) = apply_operator(&mut ws.w, &self.operator, &ws.directions[j]) {
                    return Err(SolveError::new(output, OperatorError(err)));
                }

                // Modified Gram-Schmidt against the current basis
                for i in 0..=j {
                    let h_ij = ws.w.dot(&ws.basis[i]);
                    ws.hessenberg[(i, j)] = h_ij;
                    ws.w.axpy(-h_ij, &ws.basis[i], T::one());
                }
                let h_next = ws.w.norm();
                ws.hessenberg[(j + 1, j)] = h_next;

                // Apply previous rotations to the new column
                for i in 0..j {
                    let (c, s) = (ws.cosines[i], ws.sines[i]);
                    let h_i = ws.hessenberg[(i, j)];
                    let h_i1 = ws.hessenberg[(i + 1, j)];
                    ws.hessenberg[(i, j)] = c * h_i + s * h_i1;
                    ws.hessenberg[(i + 1, j)] = -s * h_i + c * h_i1;
                }

                let (c, s, r) = givens_rotation(ws.hessenberg[(j, j)], ws.hessenberg[(j + 1, j)]);
                ws.cosines[j] = c;
                ws.sines[j] = s;
                ws.hessenberg[(j, j)] = r;
                ws.hessenberg[(j + 1, j)] = T::zero();
                ws.g[j + 1] = -s * ws.g[j];
                ws.g[j] = c * ws.g[j];

                output.num_iterations += 1;
                krylov_dim = j + 1;
                let residual_estimate = ws.g[j + 1].abs();
                output.residual_norm = residual_estimate;

                if !residual_estimate.is_finite() || !r.is_finite() {
                    return Err(SolveError::new(output, Breakdown));
                }

                // A zero subdiagonal entry means the Krylov space is invariant, and the
                // least-squares solution is exact.
                if h_next == T::zero()
                    || self
                        .stopping_criterion
                        .has_converged(b_norm, residual_estimate, output.num_iterations)
                {
                    converged = true;
                    break;
                }
                if self
                    .max_iter
                    .map_or(false, |max_iter| output.num_iterations >= max_iter)
                {
                    break;
                }

                ws.basis[j + 1].copy_from(&ws.w);
                ws.basis[j + 1].unscale_mut(h_next);
            }

            // Back substitution for the upper triangular least-squares system H y = g
            for i in (0..krylov_dim).rev() {
                let mut sum = ws.g[i];
                for k in (i + 1)..krylov_dim {
                    sum -= ws.hessenberg[(i, k)] * ws.y[k];
                }
                ws.y[i] = sum / ws.hessenberg[(i, i)];
            }

            // x <- x + sum_i y_i z_i
            for i in 0..krylov_dim {
                x.axpy(ws.y[i], &ws.directions[i], T::one());
            }

            if converged {
                // Report the true residual of the final iterate rather than the estimate
                if let Err(err) = apply_operator(&mut ws.residual, &self.operator, &x) {
                    return Err(SolveError::new(output, OperatorError(err)));
                }
                ws.residual.zip_apply(&b, |r_i, b_i| *r_i = b_i - *r_i);
                output.residual_norm = ws.residual.norm();
                return Ok(output);
            }

            output.num_restarts += 1;
            debug!(
                "GMRES restart {} after {} iterations, residual estimate {}",
                output.num_restarts, output.num_iterations, output.residual_norm
            );
        }
    }
}
