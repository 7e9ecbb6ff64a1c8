//! The top-level solver driver.
//!
//! An [`HdgProblem`] owns the mesh, the dof numbering, the constraints and all solution vectors,
//! and runs the stages of a solve in order: set up, assemble the skeleton system, solve it,
//! reconstruct the local solution, post-process and estimate errors.
use crate::assembly::global::{HdgAssembler, SkeletonSystem, DEFAULT_CHUNK_SIZE};
use crate::assembly::local::{LocalMode, LocalSolver, DEFAULT_TAU_DIFFUSION};
use crate::assembly::postprocess::SuperconvergentProjection;
use crate::assembly::AssemblyError;
use crate::dofs::{project_dirichlet_boundary_values, AffineConstraints, BoundaryConditions, DirichletProjectionError, DofMap};
use crate::error::{
    convergence_rates, estimate_flux_L2_error, estimate_post_L2_error, estimate_scalar_L2_error, SolutionErrors,
};
use crate::functions::ProblemData;
use crate::mesh::QuadMesh2d;
use crate::nalgebra::DVector;
use crate::Real;
use eyre::WrapErr;
use hdg_sparse::gmres::{Gmres, GmresOutput, RelativeResidualCriterion, SolveError};
use hdg_sparse::operator::{JacobiPreconditioner, ZeroDiagonalError};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Settings of the iterative solver for the skeleton system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// The solve stops once `||r|| <= relative_tolerance * ||b||`.
    pub relative_tolerance: f64,
    pub restart: usize,
    /// The iteration limit is this number times the number of skeleton dofs.
    pub max_iterations_per_dof: usize,
    pub jacobi_preconditioner: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            relative_tolerance: 1e-10,
            restart: 50,
            max_iterations_per_dof: 10,
            jacobi_preconditioner: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdgSettings {
    /// Polynomial degree `p` of the local and trace spaces.
    pub degree: usize,
    /// Diffusive part of the stabilization parameter `tau = tau_diffusion + |c . n|`.
    pub tau_diffusion: f64,
    /// Number of elements processed in parallel between serial merges.
    pub chunk_size: usize,
    pub solver: SolverSettings,
    pub problem: ProblemData,
    pub boundary_conditions: BoundaryConditions,
}

impl HdgSettings {
    /// Checks the values that deserialization alone cannot rule out.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.solver.restart == 0 {
            return Err("the GMRES restart length must be positive");
        }
        if !(self.tau_diffusion.is_finite() && self.tau_diffusion > 0.0) {
            return Err("the diffusive stabilization must be positive");
        }
        Ok(())
    }
}

impl Default for HdgSettings {
    fn default() -> Self {
        Self {
            degree: 1,
            tau_diffusion: DEFAULT_TAU_DIFFUSION,
            chunk_size: DEFAULT_CHUNK_SIZE,
            solver: SolverSettings::default(),
            problem: ProblemData::default(),
            boundary_conditions: BoundaryConditions::default(),
        }
    }
}

#[derive(Debug)]
pub enum HdgError<T> {
    Assembly(AssemblyError),
    DirichletProjection(DirichletProjectionError),
    Preconditioner(ZeroDiagonalError),
    Solve(SolveError<T>),
    InvalidSettings(&'static str),
    /// A stage was run before the data it depends on was computed.
    NotReady(&'static str),
}

impl<T> From<AssemblyError> for HdgError<T> {
    fn from(err: AssemblyError) -> Self {
        Self::Assembly(err)
    }
}

impl<T> From<DirichletProjectionError> for HdgError<T> {
    fn from(err: DirichletProjectionError) -> Self {
        Self::DirichletProjection(err)
    }
}

impl<T> From<ZeroDiagonalError> for HdgError<T> {
    fn from(err: ZeroDiagonalError) -> Self {
        Self::Preconditioner(err)
    }
}

impl<T> From<SolveError<T>> for HdgError<T> {
    fn from(err: SolveError<T>) -> Self {
        Self::Solve(err)
    }
}

impl<T: fmt::Debug> fmt::Display for HdgError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assembly(err) => write!(f, "Assembly failed: {}", err),
            Self::DirichletProjection(err) => write!(f, "Boundary setup failed: {}", err),
            Self::Preconditioner(err) => write!(f, "Failed to build preconditioner: {}", err),
            Self::Solve(err) => write!(f, "Skeleton solve failed: {}", err),
            Self::InvalidSettings(message) => write!(f, "Invalid settings: {}", message),
            Self::NotReady(message) => write!(f, "Not ready: {}", message),
        }
    }
}

impl<T: fmt::Debug + 'static> Error for HdgError<T> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Assembly(err) => Some(err),
            Self::DirichletProjection(err) => Some(err),
            Self::Preconditioner(err) => Some(err),
            Self::Solve(err) => Some(err),
            Self::InvalidSettings(_) | Self::NotReady(_) => None,
        }
    }
}

/// Summary of one solve on one mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport<T> {
    pub num_cells: usize,
    pub num_trace_dofs: usize,
    /// Largest cell diameter.
    pub mesh_size: T,
    pub gmres_iterations: usize,
    pub errors: SolutionErrors<T>,
}

#[derive(Debug)]
pub struct HdgProblem<T: Real> {
    mesh: QuadMesh2d<T>,
    settings: HdgSettings,
    dof_map: DofMap,
    constraints: AffineConstraints<T>,
    assembler: HdgAssembler<T>,
    system: Option<SkeletonSystem<T>>,
    trace_solution: Option<DVector<T>>,
    local_solution: Option<DVector<T>>,
    post_solution: Option<DVector<T>>,
}

impl<T: Real> HdgProblem<T> {
    /// Creates a problem on the given mesh and sets up its dofs and constraints.
    ///
    /// Fails with [`HdgError::InvalidSettings`] if the settings do not pass
    /// [`HdgSettings::validate`].
    pub fn new(mesh: QuadMesh2d<T>, settings: HdgSettings) -> Result<Self, HdgError<T>> {
        settings.validate().map_err(HdgError::InvalidSettings)?;
        let (dof_map, constraints) = Self::build_dofs_and_constraints(&mesh, &settings)?;
        let assembler = HdgAssembler::default().with_chunk_size(settings.chunk_size.max(1));
        Ok(Self {
            mesh,
            settings,
            dof_map,
            constraints,
            assembler,
            system: None,
            trace_solution: None,
            local_solution: None,
            post_solution: None,
        })
    }

    fn build_dofs_and_constraints(
        mesh: &QuadMesh2d<T>,
        settings: &HdgSettings,
    ) -> Result<(DofMap, AffineConstraints<T>), HdgError<T>> {
        let dof_map = DofMap::new(mesh, settings.degree);
        settings.boundary_conditions.warn_unmapped_ids(mesh);

        let mut constraints = AffineConstraints::new(dof_map.num_trace_dofs());
        let problem = &settings.problem;
        project_dirichlet_boundary_values(
            mesh,
            &dof_map,
            &settings.boundary_conditions,
            |x| problem.solution(x),
            &mut constraints,
        )?;

        info!("Number of cells: {}", mesh.num_cells());
        info!(
            "Number of skeleton dofs: {} ({} constrained)",
            dof_map.num_trace_dofs(),
            constraints.num_constraints()
        );
        Ok((dof_map, constraints))
    }

    /// Numbers the dofs, builds the boundary constraints and discards all previous results.
    pub fn setup_system(&mut self) -> Result<(), HdgError<T>> {
        let (dof_map, constraints) = Self::build_dofs_and_constraints(&self.mesh, &self.settings)?;
        self.dof_map = dof_map;
        self.constraints = constraints;

        self.system = None;
        self.trace_solution = None;
        self.local_solution = None;
        self.post_solution = None;
        Ok(())
    }

    fn tau_diffusion(&self) -> T {
        T::from_f64(self.settings.tau_diffusion).expect("f64 must fit in T")
    }

    /// Runs the element-local solver over all elements in the given mode.
    ///
    /// [`LocalMode::Assemble`] builds the skeleton system and discards previous solutions.
    /// [`LocalMode::Reconstruct`] recovers the local solution and requires a skeleton solution.
    pub fn assemble_system(&mut self, mode: LocalMode) -> Result<(), HdgError<T>> {
        let solver = LocalSolver::new(
            &self.mesh,
            &self.dof_map,
            &self.settings.problem,
            &self.settings.boundary_conditions,
            self.tau_diffusion(),
        );
        debug!("Running local solver in {:?} mode on {} cells", mode, self.mesh.num_cells());
        match mode {
            LocalMode::Assemble => {
                let system = self.assembler.assemble_skeleton(&solver, &self.constraints)?;
                debug!("Assembled skeleton system with {} nonzeros", system.matrix().nnz());
                self.system = Some(system);
                self.trace_solution = None;
                self.local_solution = None;
                self.post_solution = None;
            }
            LocalMode::Reconstruct => {
                let mut local_solution = DVector::zeros(self.dof_map.num_local_dofs());
                self.assembler
                    .reconstruct_local(&solver, self.trace_solution.as_ref(), &mut local_solution)?;
                debug!("Reconstructed local solution on {} cells", self.mesh.num_cells());
                self.local_solution = Some(local_solution);
                self.post_solution = None;
            }
        }
        Ok(())
    }

    /// Solves the assembled skeleton system, consuming it.
    pub fn solve(&mut self) -> Result<GmresOutput<T>, HdgError<T>> {
        let system = self
            .system
            .take()
            .ok_or(HdgError::NotReady("the skeleton system must be assembled before solving"))?;
        let (matrix, rhs) = system.into_parts();
        let mut solution = DVector::zeros(rhs.len());

        let settings = &self.settings.solver;
        let tolerance = T::from_f64(settings.relative_tolerance).expect("f64 must fit in T");
        let max_iter = settings.max_iterations_per_dof * rhs.len().max(1);
        let output = if settings.jacobi_preconditioner {
            let preconditioner = JacobiPreconditioner::from_csr(&matrix)?;
            Gmres::new()
                .with_operator(&matrix)
                .with_preconditioner(preconditioner)
                .with_stopping_criterion(RelativeResidualCriterion::new(tolerance))
                .with_restart(settings.restart)
                .with_max_iter(max_iter)
                .solve_with_guess(&rhs, &mut solution)?
        } else {
            Gmres::new()
                .with_operator(&matrix)
                .with_stopping_criterion(RelativeResidualCriterion::new(tolerance))
                .with_restart(settings.restart)
                .with_max_iter(max_iter)
                .solve_with_guess(&rhs, &mut solution)?
        };
        info!(
            "GMRES converged in {} iterations ({} restarts), residual norm {}",
            output.num_iterations, output.num_restarts, output.residual_norm
        );

        self.constraints.distribute(&mut solution);
        self.trace_solution = Some(solution);
        Ok(output)
    }

    /// Computes the superconvergent post-processed field from the local solution.
    pub fn postprocess(&mut self) -> Result<(), HdgError<T>> {
        let local_solution = self
            .local_solution
            .as_ref()
            .ok_or(HdgError::NotReady("the local solution must be reconstructed before post-processing"))?;
        let projection = SuperconvergentProjection::new(&self.mesh, &self.dof_map);
        let post_solution = projection.project(local_solution)?;
        self.post_solution = Some(post_solution);
        Ok(())
    }

    /// Computes the $L^2$ errors of all fields with respect to the exact solution.
    pub fn compute_errors(&self) -> Result<SolutionErrors<T>, HdgError<T>> {
        let local_solution = self
            .local_solution
            .as_ref()
            .ok_or(HdgError::NotReady("no local solution to compute errors for"))?;
        let post_solution = self
            .post_solution
            .as_ref()
            .ok_or(HdgError::NotReady("no post-processed solution to compute errors for"))?;
        let problem = &self.settings.problem;
        Ok(SolutionErrors {
            scalar_l2: estimate_scalar_L2_error(&self.mesh, &self.dof_map, local_solution, |x| problem.solution(x)),
            flux_l2: estimate_flux_L2_error(&self.mesh, &self.dof_map, local_solution, |x| problem.flux(x)),
            post_l2: estimate_post_L2_error(&self.mesh, &self.dof_map, post_solution, |x| problem.solution(x)),
        })
    }

    /// Runs all stages on the current mesh.
    pub fn run_cycle(&mut self) -> Result<CycleReport<T>, HdgError<T>> {
        self.assemble_system(LocalMode::Assemble)?;
        let output = self.solve()?;
        self.assemble_system(LocalMode::Reconstruct)?;
        self.postprocess()?;
        let errors = self.compute_errors()?;
        Ok(CycleReport {
            num_cells: self.mesh.num_cells(),
            num_trace_dofs: self.dof_map.num_trace_dofs(),
            mesh_size: self.mesh.max_diameter(),
            gmres_iterations: output.num_iterations,
            errors,
        })
    }

    /// Solves the problem on a sequence of meshes and logs the observed convergence rates.
    pub fn run(meshes: impl IntoIterator<Item = QuadMesh2d<T>>, settings: &HdgSettings) -> eyre::Result<Vec<CycleReport<T>>> {
        let mut reports = Vec::new();
        for (cycle, mesh) in meshes.into_iter().enumerate() {
            info!("Cycle {}", cycle);
            let mut problem =
                Self::new(mesh, settings.clone()).wrap_err_with(|| format!("Failed to set up cycle {}", cycle))?;
            let report = problem
                .run_cycle()
                .wrap_err_with(|| format!("Failed to solve cycle {}", cycle))?;
            reports.push(report);
        }

        let sizes: Vec<_> = reports.iter().map(|report| report.mesh_size).collect();
        let rates = |error: fn(&SolutionErrors<T>) -> T| {
            let errors: Vec<_> = reports.iter().map(|report| error(&report.errors)).collect();
            convergence_rates(&errors, &sizes)
        };
        let scalar_rates = rates(|errors| errors.scalar_l2);
        let flux_rates = rates(|errors| errors.flux_l2);
        let post_rates = rates(|errors| errors.post_l2);
        for (i, report) in reports.iter().enumerate() {
            let rate = |rates: &[T]| i.checked_sub(1).map(|j| format!("{}", rates[j])).unwrap_or_default();
            info!(
                "cells {:>6} | dofs {:>7} | u: {} ({}) | q: {} ({}) | u*: {} ({})",
                report.num_cells,
                report.num_trace_dofs,
                report.errors.scalar_l2,
                rate(&scalar_rates),
                report.errors.flux_l2,
                rate(&flux_rates),
                report.errors.post_l2,
                rate(&post_rates),
            );
        }

        Ok(reports)
    }

    pub fn mesh(&self) -> &QuadMesh2d<T> {
        &self.mesh
    }

    pub fn settings(&self) -> &HdgSettings {
        &self.settings
    }

    pub fn dof_map(&self) -> &DofMap {
        &self.dof_map
    }

    pub fn constraints(&self) -> &AffineConstraints<T> {
        &self.constraints
    }

    /// The assembled skeleton system, if it has been assembled and not yet solved.
    pub fn system(&self) -> Option<&SkeletonSystem<T>> {
        self.system.as_ref()
    }

    pub fn trace_solution(&self) -> Option<&DVector<T>> {
        self.trace_solution.as_ref()
    }

    pub fn local_solution(&self) -> Option<&DVector<T>> {
        self.local_solution.as_ref()
    }

    pub fn post_solution(&self) -> Option<&DVector<T>> {
        self.post_solution.as_ref()
    }
}
