//! Degree-of-freedom numbering for the element-local and skeleton (trace) spaces, boundary
//! conditions and affine constraints on the skeleton unknowns.
use crate::assembly::AssemblyError;
use crate::basis::LagrangeBasis1d;
use crate::dense::{gauss_jordan, vmult, DenseError};
use crate::mesh::{reference_face_point, BoundaryId, QuadMesh2d, FACES_PER_CELL};
use crate::nalgebra::{DMatrix, DVector, Point2};
use crate::nalgebra_sparse::CsrMatrix;
use crate::quadrature::gauss;
use crate::Real;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::ops::Range;

/// Number of solution components in the local space: two flux components and the scalar.
pub const LOCAL_COMPONENTS: usize = 3;

/// Numbering of the discontinuous local space, the trace space and the post-processing space.
///
/// The local unknowns of a cell are laid out component-wise: the `n = (p + 1)^2` coefficients of
/// the first flux component, then those of the second flux component, then those of the scalar.
/// The trace unknowns of a cell are laid out face by face, each face holding `p + 1`
/// coefficients ordered along the local face parametrization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DofMap {
    degree: usize,
    num_cells: usize,
    num_faces: usize,
    cell_trace_dofs: Vec<usize>,
}

impl DofMap {
    pub fn new<T: Real>(mesh: &QuadMesh2d<T>, degree: usize) -> Self {
        let dofs_per_face = degree + 1;
        let mut cell_trace_dofs = Vec::with_capacity(mesh.num_cells() * FACES_PER_CELL * dofs_per_face);
        for cell in 0..mesh.num_cells() {
            for (local_face, &face) in mesh.cell_faces(cell).iter().enumerate() {
                let flipped = mesh.face_is_flipped(cell, local_face);
                for k in 0..dofs_per_face {
                    let k_global = if flipped { degree - k } else { k };
                    cell_trace_dofs.push(face * dofs_per_face + k_global);
                }
            }
        }
        Self {
            degree,
            num_cells: mesh.num_cells(),
            num_faces: mesh.num_faces(),
            cell_trace_dofs,
        }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    /// Number of scalar basis functions per cell, `(p + 1)^2`.
    pub fn scalar_functions_per_cell(&self) -> usize {
        (self.degree + 1).pow(2)
    }

    pub fn local_dofs_per_cell(&self) -> usize {
        LOCAL_COMPONENTS * self.scalar_functions_per_cell()
    }

    pub fn dofs_per_face(&self) -> usize {
        self.degree + 1
    }

    pub fn trace_dofs_per_cell(&self) -> usize {
        FACES_PER_CELL * self.dofs_per_face()
    }

    pub fn num_local_dofs(&self) -> usize {
        self.num_cells * self.local_dofs_per_cell()
    }

    pub fn num_trace_dofs(&self) -> usize {
        self.num_faces * self.dofs_per_face()
    }

    /// Number of post-processing coefficients per cell, `(p + 2)^2`.
    pub fn post_dofs_per_cell(&self) -> usize {
        (self.degree + 2).pow(2)
    }

    pub fn num_post_dofs(&self) -> usize {
        self.num_cells * self.post_dofs_per_cell()
    }

    /// Global trace dof indices of a cell, in local trace order.
    pub fn cell_trace_dofs(&self, cell: usize) -> &[usize] {
        let n = self.trace_dofs_per_cell();
        &self.cell_trace_dofs[n * cell..n * (cell + 1)]
    }

    /// Range of the trace dofs of a face in the global numbering.
    pub fn face_trace_dofs(&self, face: usize) -> Range<usize> {
        let n = self.dofs_per_face();
        n * face..n * (face + 1)
    }

    /// Range of the local dofs of a cell in the global local-solution vector.
    pub fn local_dof_range(&self, cell: usize) -> Range<usize> {
        let n = self.local_dofs_per_cell();
        n * cell..n * (cell + 1)
    }

    pub fn post_dof_range(&self, cell: usize) -> Range<usize> {
        let n = self.post_dofs_per_cell();
        n * cell..n * (cell + 1)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryCondition {
    /// The trace is constrained to the projection of the exact solution.
    Dirichlet,
    /// The exact solution value is imposed weakly through the face terms.
    Neumann,
}

/// Maps boundary ids to boundary conditions.
///
/// Faces whose id has no entry receive no boundary treatment beyond the natural one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryConditions {
    conditions: BTreeMap<BoundaryId, BoundaryCondition>,
}

impl Default for BoundaryConditions {
    fn default() -> Self {
        Self::new()
            .with(0, BoundaryCondition::Dirichlet)
            .with(1, BoundaryCondition::Neumann)
    }
}

impl BoundaryConditions {
    pub fn new() -> Self {
        Self {
            conditions: BTreeMap::new(),
        }
    }

    pub fn with(mut self, id: BoundaryId, condition: BoundaryCondition) -> Self {
        self.conditions.insert(id, condition);
        self
    }

    pub fn condition(&self, id: BoundaryId) -> Option<BoundaryCondition> {
        self.conditions.get(&id).copied()
    }

    /// Ids that are mapped to a Dirichlet condition.
    pub fn dirichlet_ids(&self) -> impl Iterator<Item = BoundaryId> + '_ {
        self.conditions
            .iter()
            .filter(|&(_, &condition)| condition == BoundaryCondition::Dirichlet)
            .map(|(&id, _)| id)
    }

    /// Logs a warning for every boundary id present in the mesh that has no condition.
    pub fn warn_unmapped_ids<T: Real>(&self, mesh: &QuadMesh2d<T>) {
        let mut unmapped: Vec<_> = mesh
            .faces()
            .iter()
            .filter_map(|face| face.boundary_id())
            .filter(|id| !self.conditions.contains_key(id))
            .collect();
        unmapped.sort_unstable();
        unmapped.dedup();
        for id in unmapped {
            warn!("Boundary id {} has no boundary condition, treating it as natural", id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    DofOutOfBounds { dof: usize },
    /// A constraint line refers to a dof that is itself constrained.
    ChainedConstraint { dof: usize, via: usize },
}

impl fmt::Display for ConstraintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DofOutOfBounds { dof } => write!(f, "Constrained dof {} is out of bounds", dof),
            Self::ChainedConstraint { dof, via } => {
                write!(f, "Constraint on dof {} refers to constrained dof {}", dof, via)
            }
        }
    }
}

impl Error for ConstraintError {}

/// A single constraint `x_dof = sum_j w_j x_{c_j} + g`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintLine<T> {
    pub dof: usize,
    pub entries: Vec<(usize, T)>,
    pub inhomogeneity: T,
}

/// Affine constraints on a set of dofs.
///
/// Constraints are applied during assembly by [`distribute_local_to_global`], which eliminates
/// constrained dofs from the system, and the constrained values are restored afterwards by
/// [`distribute`].
///
/// [`distribute_local_to_global`]: Self::distribute_local_to_global
/// [`distribute`]: Self::distribute
#[derive(Debug, Clone, PartialEq)]
pub struct AffineConstraints<T> {
    num_dofs: usize,
    line_index: Vec<Option<usize>>,
    lines: Vec<ConstraintLine<T>>,
}

impl<T: Real> AffineConstraints<T> {
    pub fn new(num_dofs: usize) -> Self {
        Self {
            num_dofs,
            line_index: vec![None; num_dofs],
            lines: Vec::new(),
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn num_constraints(&self) -> usize {
        self.lines.len()
    }

    pub fn is_constrained(&self, dof: usize) -> bool {
        self.line(dof).is_some()
    }

    pub fn line(&self, dof: usize) -> Option<&ConstraintLine<T>> {
        self.line_index
            .get(dof)
            .copied()
            .flatten()
            .map(|index| &self.lines[index])
    }

    pub fn lines(&self) -> &[ConstraintLine<T>] {
        &self.lines
    }

    /// Adds (or replaces) the constraint line of `dof`.
    pub fn add_line(&mut self, dof: usize, entries: Vec<(usize, T)>, inhomogeneity: T) -> Result<(), ConstraintError> {
        for &(column, _) in &entries {
            if column >= self.num_dofs {
                return Err(ConstraintError::DofOutOfBounds { dof: column });
            }
            if self.is_constrained(column) || column == dof {
                return Err(ConstraintError::ChainedConstraint { dof, via: column });
            }
        }
        if let Some(existing) = self.lines.iter().find(|line| line.entries.iter().any(|&(c, _)| c == dof)) {
            return Err(ConstraintError::ChainedConstraint {
                dof: existing.dof,
                via: dof,
            });
        }
        let line = ConstraintLine {
            dof,
            entries,
            inhomogeneity,
        };
        match self.line_index.get(dof).copied() {
            None => Err(ConstraintError::DofOutOfBounds { dof }),
            Some(Some(index)) => {
                self.lines[index] = line;
                Ok(())
            }
            Some(None) => {
                self.line_index[dof] = Some(self.lines.len());
                self.lines.push(line);
                Ok(())
            }
        }
    }

    /// Constrains `dof` to a fixed value.
    pub fn add_inhomogeneity(&mut self, dof: usize, value: T) -> Result<(), ConstraintError> {
        self.add_line(dof, Vec::new(), value)
    }

    /// Sets every constrained entry of `solution` from its constraint line.
    ///
    /// # Panics
    ///
    /// Panics if the vector does not have one entry per dof.
    pub fn distribute(&self, solution: &mut DVector<T>) {
        assert_eq!(solution.len(), self.num_dofs, "Solution must have one entry per dof");
        for line in &self.lines {
            let value = line
                .entries
                .iter()
                .fold(line.inhomogeneity, |acc, &(column, weight)| acc + weight * solution[column]);
            solution[line.dof] = value;
        }
    }

    /// Global rows that receive the local row associated with `dof`, with their weights.
    fn row_targets(&self, dof: usize) -> Targets<'_, T> {
        match self.line(dof) {
            None => Targets::Free(dof),
            Some(line) => Targets::Constrained(&line.entries),
        }
    }

    /// Collects the global `(row, column)` entries touched when distributing a local matrix
    /// with the given dof indices.
    pub fn populate_sparsity_entries(&self, dof_indices: &[usize], entries: &mut Vec<(usize, usize)>) {
        for &row_dof in dof_indices {
            for (row, _) in self.row_targets(row_dof).iter() {
                for &col_dof in dof_indices {
                    for (col, _) in self.row_targets(col_dof).iter() {
                        entries.push((row, col));
                    }
                }
            }
            if self.is_constrained(row_dof) {
                entries.push((row_dof, row_dof));
            }
        }
    }

    /// Adds a local matrix and right-hand side to the global system, eliminating constrained dofs.
    ///
    /// Columns of constrained dofs are expanded through their constraint lines, with the
    /// inhomogeneities moved to the right-hand side. Rows of constrained dofs are distributed onto
    /// the rows of the dofs they depend on, and the constrained row itself receives a diagonal
    /// entry scaled like the local diagonal together with the matching right-hand side, so that
    /// solving the global system reproduces the constrained value.
    pub fn distribute_local_to_global(
        &self,
        local_matrix: &DMatrix<T>,
        local_rhs: &DVector<T>,
        dof_indices: &[usize],
        matrix: &mut CsrMatrix<T>,
        rhs: &mut DVector<T>,
    ) -> Result<(), AssemblyError> {
        let n = dof_indices.len();
        if local_matrix.nrows() != n || local_matrix.ncols() != n {
            let actual = if local_matrix.nrows() != n {
                local_matrix.nrows()
            } else {
                local_matrix.ncols()
            };
            return Err(AssemblyError::DimensionMismatch {
                context: "distribute_local_to_global (local matrix)",
                expected: n,
                actual,
            });
        }
        if local_rhs.len() != n {
            return Err(AssemblyError::DimensionMismatch {
                context: "distribute_local_to_global (local rhs)",
                expected: n,
                actual: local_rhs.len(),
            });
        }
        if matrix.nrows() != rhs.len() || matrix.nrows() != self.num_dofs {
            return Err(AssemblyError::DimensionMismatch {
                context: "distribute_local_to_global",
                expected: self.num_dofs,
                actual: rhs.len(),
            });
        }

        let diagonal_scale = {
            let sum = local_matrix
                .diagonal()
                .iter()
                .fold(T::zero(), |acc, a| acc + a.abs());
            if sum == T::zero() || n == 0 {
                T::one()
            } else {
                sum / T::from_usize(n).expect("usize must fit in T")
            }
        };

        for (i, &row_dof) in dof_indices.iter().enumerate() {
            for (row, row_weight) in self.row_targets(row_dof).iter() {
                rhs[row] += row_weight * local_rhs[i];
                let mut csr_row = matrix.row_mut(row);
                let (columns, values) = csr_row.cols_and_values_mut();
                for (j, &col_dof) in dof_indices.iter().enumerate() {
                    let a_ij = row_weight * local_matrix[(i, j)];
                    if a_ij == T::zero() {
                        continue;
                    }
                    match self.line(col_dof) {
                        None => add_to_row(columns, values, row, col_dof, a_ij)?,
                        Some(line) => {
                            for &(col, col_weight) in &line.entries {
                                add_to_row(columns, values, row, col, a_ij * col_weight)?;
                            }
                            rhs[row] -= a_ij * line.inhomogeneity;
                        }
                    }
                }
            }

            if let Some(line) = self.line(row_dof) {
                let mut csr_row = matrix.row_mut(row_dof);
                let (columns, values) = csr_row.cols_and_values_mut();
                add_to_row(columns, values, row_dof, row_dof, diagonal_scale)?;
                rhs[row_dof] += diagonal_scale * line.inhomogeneity;
            }
        }

        Ok(())
    }
}

fn add_to_row<T: Real>(columns: &[usize], values: &mut [T], row: usize, col: usize, value: T) -> Result<(), AssemblyError> {
    let index = columns
        .binary_search(&col)
        .map_err(|_| AssemblyError::MissingSparsityEntry { row, col })?;
    values[index] += value;
    Ok(())
}

enum Targets<'a, T> {
    Free(usize),
    Constrained(&'a [(usize, T)]),
}

impl<'a, T: Real> Targets<'a, T> {
    fn iter(&self) -> Box<dyn Iterator<Item = (usize, T)> + 'a> {
        match *self {
            Self::Free(dof) => Box::new(std::iter::once((dof, T::one()))),
            Self::Constrained(entries) => Box::new(entries.iter().copied()),
        }
    }
}

/// Constrains the trace dofs on Dirichlet faces to the L2 projection of `boundary_values` onto
/// the trace space of each face.
pub fn project_dirichlet_boundary_values<T, F>(
    mesh: &QuadMesh2d<T>,
    dof_map: &DofMap,
    boundary_conditions: &BoundaryConditions,
    boundary_values: F,
    constraints: &mut AffineConstraints<T>,
) -> Result<(), DirichletProjectionError>
where
    T: Real,
    F: Fn(&Point2<T>) -> T,
{
    let dirichlet_ids: Vec<_> = boundary_conditions.dirichlet_ids().collect();
    let basis = LagrangeBasis1d::<T>::new(dof_map.degree());
    let n = basis.num_functions();
    let (weights, parameters) = gauss::<T>(dof_map.degree() + 2);

    let mut mass = DMatrix::zeros(n, n);
    let mut rhs = DVector::zeros(n);
    let mut coefficients = DVector::zeros(n);
    let mut values = vec![T::zero(); n];

    for (face_index, face) in mesh.faces().iter().enumerate() {
        let is_dirichlet = face
            .boundary_id()
            .map_or(false, |id| dirichlet_ids.contains(&id));
        if !is_dirichlet {
            continue;
        }

        let (cell, local_face) = face.cells()[0];
        let element = mesh.element(cell);
        mass.fill(T::zero());
        rhs.fill(T::zero());
        for (&w, &s) in weights.iter().zip(&parameters) {
            let xi = reference_face_point(local_face, s);
            let (_, line_element) = element.face_normal_and_line_element(local_face, &xi);
            let x = element.map_reference_coords(&xi);
            let g = boundary_values(&x);
            let jxw = w * line_element;
            basis.populate_basis(&mut values, s);
            for i in 0..n {
                for j in 0..n {
                    mass[(i, j)] += values[i] * values[j] * jxw;
                }
                rhs[i] += values[i] * g * jxw;
            }
        }

        let singular = |err| DirichletProjectionError {
            face: face_index,
            kind: DirichletProjectionErrorKind::SingularFaceMass(err),
        };
        gauss_jordan(&mut mass).map_err(singular)?;
        vmult(&mut coefficients, &mass, &rhs, false).map_err(singular)?;

        let dofs = dof_map.face_trace_dofs(face_index);
        let flipped = mesh.face_is_flipped(cell, local_face);
        for k in 0..n {
            let k_global = if flipped { n - 1 - k } else { k };
            constraints
                .add_inhomogeneity(dofs.start + k_global, coefficients[k])
                .map_err(|err| DirichletProjectionError {
                    face: face_index,
                    kind: DirichletProjectionErrorKind::Constraint(err),
                })?;
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirichletProjectionErrorKind {
    /// The face mass matrix could not be inverted.
    SingularFaceMass(DenseError),
    /// The projected values could not be added to the given constraints, for example because an
    /// existing constraint line depends on a dof of the face.
    Constraint(ConstraintError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirichletProjectionError {
    pub face: usize,
    pub kind: DirichletProjectionErrorKind,
}

impl fmt::Display for DirichletProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to project boundary values on face {}", self.face)
    }
}

impl Error for DirichletProjectionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            DirichletProjectionErrorKind::SingularFaceMass(err) => Some(err),
            DirichletProjectionErrorKind::Constraint(err) => Some(err),
        }
    }
}
