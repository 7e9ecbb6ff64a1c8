//! The element-local solver.
//!
//! For a single element, the local operators are built by one interior quadrature pass and one
//! pass over each of the four faces. In [`LocalMode::Assemble`], the local unknowns are then
//! eliminated by a Schur complement, producing a dense contribution to the skeleton system. In
//! [`LocalMode::Reconstruct`], the skeleton solution is moved to the right-hand side and the
//! local unknowns are recovered.
use crate::assembly::AssemblyError;
use crate::basis::ReferenceTables;
use crate::dense::{gauss_jordan, mmult, vmult, DenseError};
use crate::dofs::{BoundaryCondition, BoundaryConditions, DofMap, LOCAL_COMPONENTS};
use crate::functions::ProblemData;
use crate::mesh::{reference_face_point, QuadMesh2d, FACES_PER_CELL};
use crate::nalgebra::{DMatrix, DVector, DVectorView, Matrix2, Scalar, Vector2};
use crate::Real;
use std::cell::Cell;
use std::marker::PhantomData;

/// Default diffusive part of the stabilization parameter.
pub const DEFAULT_TAU_DIFFUSION: f64 = 5.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LocalMode {
    /// Condense the element onto its trace unknowns.
    Assemble,
    /// Recover the local unknowns from known trace values.
    Reconstruct,
}

/// The dense blocks of the local HDG system of one element.
///
/// With `n_l` local and `n_f` trace unknowns, the element system reads
///
/// ```text
/// [ ll  lf ] [ U ]   [ l_rhs ]
/// [ fl  ff ] [ Λ ] = [ f_rhs ]
/// ```
///
/// where the trace row block carries the opposite sign convention of the one summed into the
/// skeleton system, so that eliminating `U` yields `(ff + fl ll⁻¹ lf) Λ = f_rhs + fl ll⁻¹ l_rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalBlocks<T: Scalar> {
    ll: DMatrix<T>,
    lf: DMatrix<T>,
    fl: DMatrix<T>,
    ff: DMatrix<T>,
    tmp: DMatrix<T>,
    l_rhs: DVector<T>,
    f_rhs: DVector<T>,
    tmp_rhs: DVector<T>,
}

impl<T: Real> Default for LocalBlocks<T> {
    fn default() -> Self {
        Self::zeros(0, 0)
    }
}

impl<T: Real> LocalBlocks<T> {
    pub fn zeros(num_local: usize, num_trace: usize) -> Self {
        Self {
            ll: DMatrix::zeros(num_local, num_local),
            lf: DMatrix::zeros(num_local, num_trace),
            fl: DMatrix::zeros(num_trace, num_local),
            ff: DMatrix::zeros(num_trace, num_trace),
            tmp: DMatrix::zeros(num_trace, num_local),
            l_rhs: DVector::zeros(num_local),
            f_rhs: DVector::zeros(num_trace),
            tmp_rhs: DVector::zeros(num_local),
        }
    }

    /// Builds the blocks from explicitly given matrices, checking that their dimensions agree.
    pub fn from_blocks(
        ll: DMatrix<T>,
        lf: DMatrix<T>,
        fl: DMatrix<T>,
        ff: DMatrix<T>,
        l_rhs: DVector<T>,
        f_rhs: DVector<T>,
    ) -> Result<Self, AssemblyError> {
        let num_local = ll.nrows();
        let num_trace = ff.nrows();
        let check = |context, expected: (usize, usize), actual: (usize, usize)| {
            if expected == actual {
                Ok(())
            } else {
                Err(AssemblyError::DimensionMismatch {
                    context,
                    expected: expected.0 * expected.1,
                    actual: actual.0 * actual.1,
                })
            }
        };
        check("ll", (num_local, num_local), ll.shape())?;
        check("lf", (num_local, num_trace), lf.shape())?;
        check("fl", (num_trace, num_local), fl.shape())?;
        check("ff", (num_trace, num_trace), ff.shape())?;
        check("l_rhs", (num_local, 1), l_rhs.shape())?;
        check("f_rhs", (num_trace, 1), f_rhs.shape())?;
        Ok(Self {
            ll,
            lf,
            fl,
            ff,
            tmp: DMatrix::zeros(num_trace, num_local),
            l_rhs,
            f_rhs,
            tmp_rhs: DVector::zeros(num_local),
        })
    }

    pub fn num_local(&self) -> usize {
        self.ll.nrows()
    }

    pub fn num_trace(&self) -> usize {
        self.ff.nrows()
    }

    fn resize(&mut self, num_local: usize, num_trace: usize) {
        if self.num_local() != num_local || self.num_trace() != num_trace {
            *self = Self::zeros(num_local, num_trace);
        }
    }

    /// Zeros the blocks written by the given mode.
    fn reset(&mut self, mode: LocalMode) {
        self.ll.fill(T::zero());
        self.l_rhs.fill(T::zero());
        if mode == LocalMode::Assemble {
            self.lf.fill(T::zero());
            self.fl.fill(T::zero());
            self.ff.fill(T::zero());
            self.f_rhs.fill(T::zero());
        }
    }

    pub fn ll(&self) -> &DMatrix<T> {
        &self.ll
    }

    pub fn lf(&self) -> &DMatrix<T> {
        &self.lf
    }

    pub fn fl(&self) -> &DMatrix<T> {
        &self.fl
    }

    pub fn ff(&self) -> &DMatrix<T> {
        &self.ff
    }

    pub fn l_rhs(&self) -> &DVector<T> {
        &self.l_rhs
    }

    pub fn f_rhs(&self) -> &DVector<T> {
        &self.f_rhs
    }

    /// The local solution computed by [`recover_local_solution`](Self::recover_local_solution).
    pub fn local_solution(&self) -> &DVector<T> {
        &self.tmp_rhs
    }

    /// Eliminates the local unknowns.
    ///
    /// Afterwards `ll` holds its inverse, `ff` holds the Schur complement `ff + fl ll⁻¹ lf` and
    /// `f_rhs` holds the condensed right-hand side `f_rhs + fl ll⁻¹ l_rhs`.
    pub fn condense(&mut self) -> Result<(), DenseError> {
        gauss_jordan(&mut self.ll)?;
        mmult(&mut self.tmp, &self.fl, &self.ll, false)?;
        vmult(&mut self.f_rhs, &self.tmp, &self.l_rhs, true)?;
        mmult(&mut self.ff, &self.tmp, &self.lf, true)?;
        Ok(())
    }

    /// Solves `ll U = l_rhs`, where `l_rhs` already accounts for the trace values.
    ///
    /// Afterwards `ll` holds its inverse.
    pub fn recover_local_solution(&mut self) -> Result<(), DenseError> {
        gauss_jordan(&mut self.ll)?;
        vmult(&mut self.tmp_rhs, &self.ll, &self.l_rhs, false)
    }
}

/// The condensed contribution of a single element to the skeleton system.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementContribution<T: Scalar> {
    pub element: usize,
    /// Global trace dofs, in the order of the rows of `matrix`.
    pub dof_indices: Vec<usize>,
    pub matrix: DMatrix<T>,
    pub rhs: DVector<T>,
}

/// Per-worker buffers used while processing an element.
///
/// A scratch object must only be used by one worker at a time, hence it is neither `Sync`
/// nor `Clone`.
#[derive(Debug)]
pub struct ElementScratch<T: Scalar> {
    blocks: LocalBlocks<T>,
    flux_values: Vec<Vector2<T>>,
    flux_divergences: Vec<T>,
    scalar_values: Vec<T>,
    scalar_gradients: Vec<Vector2<T>>,
    face_dofs: Vec<usize>,
    face_flux_values: Vec<Vector2<T>>,
    face_scalar_values: Vec<T>,
    element_trace: Vec<T>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T: Real> Default for ElementScratch<T> {
    fn default() -> Self {
        Self {
            blocks: LocalBlocks::default(),
            flux_values: Vec::new(),
            flux_divergences: Vec::new(),
            scalar_values: Vec::new(),
            scalar_gradients: Vec::new(),
            face_dofs: Vec::new(),
            face_flux_values: Vec::new(),
            face_scalar_values: Vec::new(),
            element_trace: Vec::new(),
            _not_sync: PhantomData,
        }
    }
}

impl<T: Real> ElementScratch<T> {
    pub fn blocks(&self) -> &LocalBlocks<T> {
        &self.blocks
    }

    fn prepare(&mut self, num_local: usize, num_trace: usize, dofs_per_face: usize) {
        self.blocks.resize(num_local, num_trace);
        self.flux_values.resize(num_local, Vector2::zeros());
        self.flux_divergences.resize(num_local, T::zero());
        self.scalar_values.resize(num_local, T::zero());
        self.scalar_gradients.resize(num_local, Vector2::zeros());
        let face_local = LOCAL_COMPONENTS * dofs_per_face;
        self.face_dofs.resize(face_local, 0);
        self.face_flux_values.resize(face_local, Vector2::zeros());
        self.face_scalar_values.resize(face_local, T::zero());
        self.element_trace.resize(num_trace, T::zero());
    }
}

/// Read-only context shared by every worker processing elements.
#[derive(Debug)]
pub struct LocalSolver<'a, T: Real> {
    mesh: &'a QuadMesh2d<T>,
    dof_map: &'a DofMap,
    problem: &'a ProblemData,
    boundary_conditions: &'a BoundaryConditions,
    tables: ReferenceTables<T>,
    tau_diffusion: T,
}

impl<'a, T: Real> LocalSolver<'a, T> {
    pub fn new(
        mesh: &'a QuadMesh2d<T>,
        dof_map: &'a DofMap,
        problem: &'a ProblemData,
        boundary_conditions: &'a BoundaryConditions,
        tau_diffusion: T,
    ) -> Self {
        let degree = dof_map.degree();
        Self {
            mesh,
            dof_map,
            problem,
            boundary_conditions,
            tables: ReferenceTables::new(degree, degree + 1),
            tau_diffusion,
        }
    }

    pub fn mesh(&self) -> &'a QuadMesh2d<T> {
        self.mesh
    }

    pub fn dof_map(&self) -> &'a DofMap {
        self.dof_map
    }

    pub fn num_elements(&self) -> usize {
        self.mesh.num_cells()
    }

    /// Condenses an element onto its trace unknowns.
    pub fn assemble_element(
        &self,
        cell: usize,
        scratch: &mut ElementScratch<T>,
    ) -> Result<ElementContribution<T>, AssemblyError> {
        self.prepare_scratch(scratch);
        self.build_local_operators(cell, LocalMode::Assemble, scratch);
        scratch
            .blocks
            .condense()
            .map_err(|source| AssemblyError::SingularLocalMatrix { element: cell, source })?;
        Ok(ElementContribution {
            element: cell,
            dof_indices: self.dof_map.cell_trace_dofs(cell).to_vec(),
            matrix: scratch.blocks.ff.clone(),
            rhs: scratch.blocks.f_rhs.clone(),
        })
    }

    /// Recovers the local unknowns of an element from the global trace values.
    ///
    /// Fails if `trace` is `None`, or if either vector has the wrong length.
    pub fn reconstruct_element(
        &self,
        cell: usize,
        trace: Option<DVectorView<T>>,
        scratch: &mut ElementScratch<T>,
        local_solution: &mut [T],
    ) -> Result<(), AssemblyError> {
        let trace = trace.ok_or(AssemblyError::MissingTraceValues { element: cell })?;
        if trace.len() != self.dof_map.num_trace_dofs() {
            return Err(AssemblyError::DimensionMismatch {
                context: "reconstruct_element (trace)",
                expected: self.dof_map.num_trace_dofs(),
                actual: trace.len(),
            });
        }
        if local_solution.len() != self.dof_map.local_dofs_per_cell() {
            return Err(AssemblyError::DimensionMismatch {
                context: "reconstruct_element (local solution)",
                expected: self.dof_map.local_dofs_per_cell(),
                actual: local_solution.len(),
            });
        }

        self.prepare_scratch(scratch);
        for (local, &global) in self.dof_map.cell_trace_dofs(cell).iter().enumerate() {
            scratch.element_trace[local] = trace[global];
        }
        self.build_local_operators(cell, LocalMode::Reconstruct, scratch);
        scratch
            .blocks
            .recover_local_solution()
            .map_err(|source| AssemblyError::SingularLocalMatrix { element: cell, source })?;
        local_solution.copy_from_slice(scratch.blocks.tmp_rhs.as_slice());
        Ok(())
    }

    fn prepare_scratch(&self, scratch: &mut ElementScratch<T>) {
        scratch.prepare(
            self.dof_map.local_dofs_per_cell(),
            self.dof_map.trace_dofs_per_cell(),
            self.dof_map.dofs_per_face(),
        );
    }

    /// Fills the local blocks of `cell`. The scratch must already be sized by `prepare_scratch`.
    #[allow(non_snake_case)]
    fn build_local_operators(&self, cell: usize, mode: LocalMode, ws: &mut ElementScratch<T>) {
        ws.blocks.reset(mode);

        let element = self.mesh.element(cell);
        let tables = &self.tables;
        let n = tables.num_functions();
        let num_local = self.dof_map.local_dofs_per_cell();
        let m = self.dof_map.dofs_per_face();

        for (q, (&w, xi)) in tables.weights().iter().zip(tables.points()).enumerate() {
            let J = element.reference_jacobian(xi);
            let JxW = w * J.determinant();
            // Degenerate geometry contributes nothing, and the singular block is reported later
            let J_inv_t = J.try_inverse().map(|j| j.transpose()).unwrap_or_else(Matrix2::zeros);
            let x = element.map_reference_coords(xi);
            let convection = self.problem.convection(&x);
            let source = self.problem.source(&x);

            let reference_gradients = tables.reference_gradients(q);
            for s in 0..n {
                let phi = tables.values()[(s, q)];
                let gradient = J_inv_t * reference_gradients.column(s);
                ws.flux_values[s] = Vector2::new(phi, T::zero());
                ws.flux_values[n + s] = Vector2::new(T::zero(), phi);
                ws.flux_values[2 * n + s] = Vector2::zeros();
                ws.flux_divergences[s] = gradient[0];
                ws.flux_divergences[n + s] = gradient[1];
                ws.flux_divergences[2 * n + s] = T::zero();
                ws.scalar_values[s] = T::zero();
                ws.scalar_values[n + s] = T::zero();
                ws.scalar_values[2 * n + s] = phi;
                ws.scalar_gradients[s] = Vector2::zeros();
                ws.scalar_gradients[n + s] = Vector2::zeros();
                ws.scalar_gradients[2 * n + s] = gradient;
            }

            for i in 0..num_local {
                let q_i = &ws.flux_values[i];
                let div_q_i = ws.flux_divergences[i];
                let u_i = ws.scalar_values[i];
                let advected_u_i = ws.scalar_gradients[i].dot(&convection);
                for j in 0..num_local {
                    ws.blocks.ll[(i, j)] += (q_i.dot(&ws.flux_values[j]) - div_q_i * ws.scalar_values[j]
                        + u_i * ws.flux_divergences[j]
                        - advected_u_i * ws.scalar_values[j])
                        * JxW;
                }
                ws.blocks.l_rhs[i] += u_i * source * JxW;
            }
        }

        let trace_values = tables.face_trace_values();
        for face in 0..FACES_PER_CELL {
            let is_neumann = self
                .mesh
                .local_face_boundary_id(cell, face)
                .and_then(|id| self.boundary_conditions.condition(id))
                == Some(BoundaryCondition::Neumann);
            let support = tables.face_support(face);
            let face_values = tables.face_values(face);
            let trace_offset = face * m;

            for (q, (&w, &s)) in tables
                .face_weights()
                .iter()
                .zip(tables.face_parameters())
                .enumerate()
            {
                let xi = reference_face_point(face, s);
                let (normal, line_element) = element.face_normal_and_line_element(face, &xi);
                let JxW = w * line_element;
                let x = element.map_reference_coords(&xi);
                let convection_normal = self.problem.convection(&x).dot(&normal);
                let tau = self.tau_diffusion + convection_normal.abs();

                for (k, &s_index) in support.iter().enumerate() {
                    let phi = face_values[(k, q)];
                    for component in 0..LOCAL_COMPONENTS {
                        let a = component * m + k;
                        ws.face_dofs[a] = component * n + s_index;
                        ws.face_flux_values[a] = match component {
                            0 => Vector2::new(phi, T::zero()),
                            1 => Vector2::new(T::zero(), phi),
                            _ => Vector2::zeros(),
                        };
                        ws.face_scalar_values[a] = if component == 2 { phi } else { T::zero() };
                    }
                }

                if mode == LocalMode::Assemble {
                    for (a, &ii) in ws.face_dofs.iter().enumerate() {
                        let q_n = ws.face_flux_values[a].dot(&normal);
                        let u_i = ws.face_scalar_values[a];
                        for j in 0..m {
                            let jj = trace_offset + j;
                            let tr_j = trace_values[(j, q)];
                            ws.blocks.lf[(ii, jj)] += (q_n + (convection_normal - tau) * u_i) * tr_j * JxW;
                            ws.blocks.fl[(jj, ii)] -= (q_n + tau * u_i) * tr_j * JxW;
                        }
                    }
                    for i in 0..m {
                        let tr_i = trace_values[(i, q)];
                        for j in 0..m {
                            ws.blocks.ff[(trace_offset + i, trace_offset + j)] +=
                                (convection_normal - tau) * tr_i * trace_values[(j, q)] * JxW;
                        }
                    }
                    if is_neumann {
                        let neumann_value = self.problem.neumann_value(&x);
                        for i in 0..m {
                            ws.blocks.f_rhs[trace_offset + i] -= trace_values[(i, q)] * neumann_value * JxW;
                        }
                    }
                }

                for (a, &ii) in ws.face_dofs.iter().enumerate() {
                    let u_i = ws.face_scalar_values[a];
                    for (b, &jj) in ws.face_dofs.iter().enumerate() {
                        ws.blocks.ll[(ii, jj)] += tau * u_i * ws.face_scalar_values[b] * JxW;
                    }
                }

                if mode == LocalMode::Reconstruct {
                    let trace_value = (0..m).fold(T::zero(), |acc, j| {
                        acc + ws.element_trace[trace_offset + j] * trace_values[(j, q)]
                    });
                    for (a, &ii) in ws.face_dofs.iter().enumerate() {
                        let q_n = ws.face_flux_values[a].dot(&normal);
                        let u_i = ws.face_scalar_values[a];
                        ws.blocks.l_rhs[ii] -= (q_n + u_i * (convection_normal - tau)) * trace_value * JxW;
                    }
                }
            }
        }
    }
}
