//! Assembly of the skeleton system from element contributions, and parallel drivers for the
//! element-local solver.
use crate::assembly::local::{ElementContribution, ElementScratch, LocalSolver};
use crate::assembly::AssemblyError;
use crate::dofs::{AffineConstraints, DofMap};
use crate::nalgebra::{DVector, DVectorView, Scalar};
use crate::nalgebra_sparse::{pattern::SparsityPattern, CsrMatrix};
use crate::Real;
use log::debug;
use rayon::prelude::*;
use std::cell::RefCell;
use thread_local::ThreadLocal;

/// Default number of elements processed in parallel before their contributions are merged.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// The global sparse system on the skeleton unknowns.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonSystem<T: Scalar> {
    matrix: CsrMatrix<T>,
    rhs: DVector<T>,
}

impl<T: Real> SkeletonSystem<T> {
    /// A zero system with the given sparsity pattern.
    pub fn from_pattern(pattern: SparsityPattern) -> Self {
        let num_rows = pattern.major_dim();
        let nnz = pattern.nnz();
        let matrix = CsrMatrix::try_from_pattern_and_values(pattern, vec![T::zero(); nnz])
            .expect("Value count matches the pattern");
        Self {
            matrix,
            rhs: DVector::zeros(num_rows),
        }
    }

    pub fn matrix(&self) -> &CsrMatrix<T> {
        &self.matrix
    }

    pub fn rhs(&self) -> &DVector<T> {
        &self.rhs
    }

    pub fn into_parts(self) -> (CsrMatrix<T>, DVector<T>) {
        (self.matrix, self.rhs)
    }

    /// Adds the contribution of one element, applying the given constraints.
    pub fn merge(
        &mut self,
        contribution: &ElementContribution<T>,
        constraints: &AffineConstraints<T>,
    ) -> Result<(), AssemblyError> {
        constraints.distribute_local_to_global(
            &contribution.matrix,
            &contribution.rhs,
            &contribution.dof_indices,
            &mut self.matrix,
            &mut self.rhs,
        )
    }
}

/// Builds the sparsity pattern of the skeleton matrix, accounting for the entries introduced
/// by constraint elimination.
pub fn assemble_skeleton_pattern<T: Real>(dof_map: &DofMap, constraints: &AffineConstraints<T>) -> SparsityPattern {
    let num_rows = dof_map.num_trace_dofs();
    let mut coordinates = Vec::new();
    for cell in 0..dof_map.num_cells() {
        constraints.populate_sparsity_entries(dof_map.cell_trace_dofs(cell), &mut coordinates);
    }
    coordinates.par_sort_unstable();
    coordinates.dedup();

    let mut row_offsets = Vec::with_capacity(num_rows + 1);
    let mut column_indices = Vec::with_capacity(coordinates.len());
    row_offsets.push(0);
    let mut current_row = 0;
    for (i, j) in coordinates {
        assert!(i < num_rows, "Coordinates must be in bounds");
        while i > current_row {
            row_offsets.push(column_indices.len());
            current_row += 1;
        }
        column_indices.push(j);
    }
    // Fill out offsets for remaining empty rows
    while row_offsets.len() < num_rows + 1 {
        row_offsets.push(column_indices.len());
    }

    SparsityPattern::try_from_offsets_and_indices(num_rows, num_rows, row_offsets, column_indices)
        .expect("Sorted, deduplicated coordinates form a valid pattern")
}

/// Drives the element-local solver over all elements.
///
/// Elements are processed in chunks: the elements of a chunk are handled in parallel, each
/// worker using its own thread-local scratch, after which the contributions of the chunk are
/// merged serially, in element order. The first error aborts the pass.
#[derive(Debug)]
pub struct HdgAssembler<T: Scalar + Send> {
    workspace: ThreadLocal<RefCell<ElementScratch<T>>>,
    chunk_size: usize,
}

impl<T: Real> Default for HdgAssembler<T> {
    fn default() -> Self {
        Self {
            workspace: ThreadLocal::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl<T: Real> HdgAssembler<T> {
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "Chunk size must be positive");
        self.chunk_size = chunk_size;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Computes the contributions of the given elements in parallel, preserving their order.
    pub fn compute_contributions(
        &self,
        solver: &LocalSolver<T>,
        elements: impl IndexedParallelIterator<Item = usize>,
    ) -> Result<Vec<ElementContribution<T>>, AssemblyError> {
        elements
            .map(|cell| {
                let ws = &mut *self.workspace.get_or_default().borrow_mut();
                solver.assemble_element(cell, ws)
            })
            .collect()
    }

    /// Assembles the condensed skeleton system.
    pub fn assemble_skeleton(
        &self,
        solver: &LocalSolver<T>,
        constraints: &AffineConstraints<T>,
    ) -> Result<SkeletonSystem<T>, AssemblyError> {
        let dof_map = solver.dof_map();
        if constraints.num_dofs() != dof_map.num_trace_dofs() {
            return Err(AssemblyError::DimensionMismatch {
                context: "assemble_skeleton (constraints)",
                expected: dof_map.num_trace_dofs(),
                actual: constraints.num_dofs(),
            });
        }

        let pattern = assemble_skeleton_pattern(dof_map, constraints);
        debug!(
            "Skeleton pattern: {} rows, {} nonzeros",
            pattern.major_dim(),
            pattern.nnz()
        );
        let mut system = SkeletonSystem::from_pattern(pattern);

        let num_elements = solver.num_elements();
        let mut chunk_start = 0;
        while chunk_start < num_elements {
            let chunk_end = (chunk_start + self.chunk_size).min(num_elements);
            let contributions = self.compute_contributions(solver, (chunk_start..chunk_end).into_par_iter())?;
            for contribution in &contributions {
                system.merge(contribution, constraints)?;
            }
            chunk_start = chunk_end;
        }

        Ok(system)
    }

    /// Recovers the local unknowns of all elements from the skeleton solution.
    ///
    /// Each element writes only to its own block of `local_solution`.
    pub fn reconstruct_local(
        &self,
        solver: &LocalSolver<T>,
        trace: Option<&DVector<T>>,
        local_solution: &mut DVector<T>,
    ) -> Result<(), AssemblyError> {
        let dof_map = solver.dof_map();
        if local_solution.len() != dof_map.num_local_dofs() {
            return Err(AssemblyError::DimensionMismatch {
                context: "reconstruct_local",
                expected: dof_map.num_local_dofs(),
                actual: local_solution.len(),
            });
        }
        let n_local = dof_map.local_dofs_per_cell();

        local_solution
            .as_mut_slice()
            .par_chunks_mut(n_local)
            .enumerate()
            .try_for_each(|(cell, block)| {
                let ws = &mut *self.workspace.get_or_default().borrow_mut();
                solver.reconstruct_element(cell, trace.map(|trace| DVectorView::from(trace)), ws, block)
            })
    }
}
