use super::{perturbed_unit_square_mesh, two_cell_mesh_with_flipped_face};
use hdg::assembly::global::{assemble_skeleton_pattern, HdgAssembler, SkeletonSystem};
use hdg::assembly::local::{ElementScratch, LocalBlocks, LocalMode, LocalSolver, DEFAULT_TAU_DIFFUSION};
use hdg::assembly::AssemblyError;
use hdg::dense::DenseError;
use hdg::dofs::{project_dirichlet_boundary_values, AffineConstraints, BoundaryConditions, DofMap};
use hdg::functions::{ConvectionField, ManufacturedSolution, ProblemData};
use hdg::mesh::procedural::create_unit_square_uniform_quad_mesh_2d;
use hdg::mesh::QuadMesh2d;
use hdg::nalgebra::{DMatrix, DVector, DVectorView, Point2};
use hdg::problem::{HdgError, HdgProblem, HdgSettings};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use proptest::prelude::*;
use rayon::prelude::*;

fn linear_problem() -> ProblemData {
    ProblemData::new(
        ManufacturedSolution::Linear {
            constant: 1.0,
            gradient: [2.0, -3.0],
        },
        ConvectionField::Rotation,
    )
}

fn local_system_strategy() -> impl Strategy<Value = (usize, usize, Vec<f64>)> {
    (1usize..=6, 1usize..=4).prop_flat_map(|(num_local, num_trace)| {
        let n = num_local + num_trace;
        let len = n * n + n;
        (Just(num_local), Just(num_trace), prop::collection::vec(-1.0..1.0, len))
    })
}

/// Splits random values into diagonally dominant blocks of a local system.
fn blocks_from_values(
    num_local: usize,
    num_trace: usize,
    values: &[f64],
) -> (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>, DMatrix<f64>, DVector<f64>, DVector<f64>) {
    let n = num_local + num_trace;
    let mut full = DMatrix::from_column_slice(n, n, &values[..n * n]);
    for i in 0..n {
        full[(i, i)] += 2.0 * n as f64;
    }
    let rhs = DVector::from_column_slice(&values[n * n..]);
    (
        full.view((0, 0), (num_local, num_local)).into_owned(),
        full.view((0, num_local), (num_local, num_trace)).into_owned(),
        full.view((num_local, 0), (num_trace, num_local)).into_owned(),
        full.view((num_local, num_local), (num_trace, num_trace)).into_owned(),
        rhs.rows(0, num_local).into_owned(),
        rhs.rows(num_local, num_trace).into_owned(),
    )
}

proptest! {
    #[test]
    fn condensed_system_is_consistent_with_full_system((num_local, num_trace, values) in local_system_strategy()) {
        let (ll, lf, fl, ff, l_rhs, f_rhs) = blocks_from_values(num_local, num_trace, &values);
        let mut blocks = LocalBlocks::from_blocks(
            ll.clone(), lf.clone(), fl.clone(), ff.clone(), l_rhs.clone(), f_rhs.clone()
        ).unwrap();
        prop_assert_eq!(blocks.num_local(), num_local);
        prop_assert_eq!(blocks.num_trace(), num_trace);
        blocks.condense().unwrap();

        let trace = blocks.ff().clone().lu().solve(blocks.f_rhs()).unwrap();
        let local = ll.clone().lu().solve(&(&l_rhs - &lf * &trace)).unwrap();

        // Both block rows of the uncondensed system hold for the recovered unknowns
        let local_residual = &ll * &local + &lf * &trace - &l_rhs;
        let trace_residual = &ff * &trace - &fl * &local - &f_rhs;
        prop_assert!(local_residual.norm() < 1e-10);
        prop_assert!(trace_residual.norm() < 1e-10);

        let mut recovery = LocalBlocks::from_blocks(
            ll, lf.clone(), fl, ff, &l_rhs - &lf * &trace, f_rhs
        ).unwrap();
        recovery.recover_local_solution().unwrap();
        prop_assert!((recovery.local_solution() - &local).norm() < 1e-10);
    }
}

#[test]
fn local_blocks_reject_inconsistent_dimensions() {
    let result = LocalBlocks::<f64>::from_blocks(
        DMatrix::identity(3, 3),
        DMatrix::zeros(3, 2),
        DMatrix::zeros(3, 3),
        DMatrix::identity(2, 2),
        DVector::zeros(3),
        DVector::zeros(2),
    );
    assert!(matches!(
        result,
        Err(AssemblyError::DimensionMismatch { context: "fl", .. })
    ));
}

#[test]
fn condensing_singular_blocks_fails() {
    let mut blocks = LocalBlocks::<f64>::from_blocks(
        DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]),
        DMatrix::zeros(2, 1),
        DMatrix::zeros(1, 2),
        DMatrix::identity(1, 1),
        DVector::zeros(2),
        DVector::zeros(1),
    )
    .unwrap();
    assert!(matches!(blocks.condense(), Err(DenseError::Singular { .. })));
}

#[test]
fn reconstruction_leaves_trace_blocks_untouched() {
    let mesh = perturbed_unit_square_mesh();
    let dof_map = DofMap::new(&mesh, 2);
    let problem = linear_problem();
    let conditions = BoundaryConditions::default();
    let solver = LocalSolver::new(&mesh, &dof_map, &problem, &conditions, DEFAULT_TAU_DIFFUSION);

    let mut scratch = ElementScratch::default();
    let contribution = solver.assemble_element(2, &mut scratch).unwrap();
    assert_eq!(contribution.element, 2);
    assert_eq!(contribution.dof_indices, dof_map.cell_trace_dofs(2));
    let condensed_matrix = scratch.blocks().ff().clone();
    let condensed_rhs = scratch.blocks().f_rhs().clone();
    let lf = scratch.blocks().lf().clone();
    let fl = scratch.blocks().fl().clone();
    assert_eq!(condensed_matrix, contribution.matrix);
    assert_eq!(condensed_rhs, contribution.rhs);

    let trace = DVector::from_fn(dof_map.num_trace_dofs(), |i, _| (i as f64).sin());
    let mut local = vec![0.0; dof_map.local_dofs_per_cell()];
    solver
        .reconstruct_element(2, Some(DVectorView::from(&trace)), &mut scratch, &mut local)
        .unwrap();

    assert_eq!(scratch.blocks().ff(), &condensed_matrix);
    assert_eq!(scratch.blocks().f_rhs(), &condensed_rhs);
    assert_eq!(scratch.blocks().lf(), &lf);
    assert_eq!(scratch.blocks().fl(), &fl);
    assert_eq!(scratch.blocks().local_solution().as_slice(), local.as_slice());
}

#[test]
fn scratch_can_be_reused_across_degrees() {
    let mesh = perturbed_unit_square_mesh();
    let problem = linear_problem();
    let conditions = BoundaryConditions::default();
    let coarse_dofs = DofMap::new(&mesh, 1);
    let fine_dofs = DofMap::new(&mesh, 3);
    let coarse = LocalSolver::new(&mesh, &coarse_dofs, &problem, &conditions, DEFAULT_TAU_DIFFUSION);
    let fine = LocalSolver::new(&mesh, &fine_dofs, &problem, &conditions, DEFAULT_TAU_DIFFUSION);
    let trace = DVector::from_fn(coarse_dofs.num_trace_dofs(), |i, _| (i as f64).cos());

    let mut fresh = ElementScratch::default();
    let mut expected = vec![0.0; coarse_dofs.local_dofs_per_cell()];
    coarse
        .reconstruct_element(1, Some(DVectorView::from(&trace)), &mut fresh, &mut expected)
        .unwrap();
    let expected_contribution = coarse.assemble_element(1, &mut ElementScratch::default()).unwrap();

    let mut reused = ElementScratch::default();
    fine.assemble_element(1, &mut reused).unwrap();
    let mut local = vec![0.0; coarse_dofs.local_dofs_per_cell()];
    coarse
        .reconstruct_element(1, Some(DVectorView::from(&trace)), &mut reused, &mut local)
        .unwrap();
    assert_eq!(local, expected);

    fine.assemble_element(1, &mut reused).unwrap();
    let contribution = coarse.assemble_element(1, &mut reused).unwrap();
    assert_eq!(contribution.matrix, expected_contribution.matrix);
    assert_eq!(contribution.rhs, expected_contribution.rhs);
}

#[test]
fn reconstruction_requires_trace_values() {
    let mesh: QuadMesh2d<f64> = create_unit_square_uniform_quad_mesh_2d(2);
    let dof_map = DofMap::new(&mesh, 1);
    let problem = linear_problem();
    let conditions = BoundaryConditions::default();
    let solver = LocalSolver::new(&mesh, &dof_map, &problem, &conditions, DEFAULT_TAU_DIFFUSION);
    let mut scratch = ElementScratch::default();
    let mut local = vec![0.0; dof_map.local_dofs_per_cell()];

    let result = solver.reconstruct_element(1, None, &mut scratch, &mut local);
    assert_eq!(result, Err(AssemblyError::MissingTraceValues { element: 1 }));

    let short_trace = DVector::zeros(dof_map.num_trace_dofs() - 1);
    let result = solver.reconstruct_element(1, Some(DVectorView::from(&short_trace)), &mut scratch, &mut local);
    assert!(matches!(result, Err(AssemblyError::DimensionMismatch { .. })));

    let trace = DVector::zeros(dof_map.num_trace_dofs());
    let mut short_local = vec![0.0; 3];
    let result = solver.reconstruct_element(1, Some(DVectorView::from(&trace)), &mut scratch, &mut short_local);
    assert!(matches!(result, Err(AssemblyError::DimensionMismatch { .. })));
}

#[test]
fn zero_measure_element_is_reported_as_singular() {
    let vertices = vec![
        Point2::new(0.0, 0.0),
        Point2::new(1.0, 0.0),
        Point2::new(2.0, 0.0),
        Point2::new(3.0, 0.0),
    ];
    let mesh = QuadMesh2d::from_vertices_and_cells(vertices, vec![[0, 1, 2, 3]]).unwrap();
    let dof_map = DofMap::new(&mesh, 1);
    let problem = linear_problem();
    let conditions = BoundaryConditions::default();
    let solver = LocalSolver::new(&mesh, &dof_map, &problem, &conditions, DEFAULT_TAU_DIFFUSION);

    let result = solver.assemble_element(0, &mut ElementScratch::default());
    assert!(matches!(
        result,
        Err(AssemblyError::SingularLocalMatrix { element: 0, .. })
    ));
}

#[test]
fn neumann_faces_only_change_the_trace_rhs() {
    let problem = linear_problem();
    let conditions = BoundaryConditions::default();
    let contribution = |boundary_id_on_right: u8| {
        let mut mesh: QuadMesh2d<f64> = create_unit_square_uniform_quad_mesh_2d(1);
        mesh.assign_boundary_ids(|x| if x.x > 0.999 { boundary_id_on_right } else { 0 });
        let dof_map = DofMap::new(&mesh, 1);
        let solver = LocalSolver::new(&mesh, &dof_map, &problem, &conditions, DEFAULT_TAU_DIFFUSION);
        solver
            .assemble_element(0, &mut ElementScratch::default())
            .unwrap()
    };

    let dirichlet = contribution(0);
    let neumann = contribution(1);
    let unmapped = contribution(5);

    assert_eq!(dirichlet, unmapped);
    assert_eq!(dirichlet.matrix, neumann.matrix);

    // Local face 1 is the right face, and the trace basis sums to one along it, so the change in
    // the rhs of its dofs integrates the boundary data 3 - 3y over the face
    let difference = &neumann.rhs - &dirichlet.rhs;
    for (i, &d) in difference.iter().enumerate() {
        if !(2..4).contains(&i) {
            assert_scalar_eq!(d, 0.0, comp = abs, tol = 1e-12);
        }
    }
    assert_scalar_eq!(difference[2] + difference[3], -1.5, comp = abs, tol = 1e-12);
    // The first dof of the face sits at y = 0, and the integral of (1 - y)(3 - 3y) is 1
    assert_scalar_eq!(difference[2], -1.0, comp = abs, tol = 1e-12);
}

#[test]
fn neumann_faces_with_zero_data_contribute_nothing() {
    let problem = ProblemData::new(
        ManufacturedSolution::Linear {
            constant: 0.0,
            gradient: [0.0, 0.0],
        },
        ConvectionField::Rotation,
    );
    let conditions = BoundaryConditions::default();
    let contribution = |boundary_id: u8| {
        let mut mesh: QuadMesh2d<f64> = create_unit_square_uniform_quad_mesh_2d(2);
        mesh.assign_boundary_ids(|_| boundary_id);
        let dof_map = DofMap::new(&mesh, 2);
        let solver = LocalSolver::new(&mesh, &dof_map, &problem, &conditions, DEFAULT_TAU_DIFFUSION);
        solver
            .assemble_element(3, &mut ElementScratch::default())
            .unwrap()
    };
    assert_eq!(contribution(0), contribution(1));
}

fn constrained_setup(mesh: &QuadMesh2d<f64>, degree: usize) -> (DofMap, ProblemData, BoundaryConditions, AffineConstraints<f64>) {
    let dof_map = DofMap::new(mesh, degree);
    let problem = linear_problem();
    let conditions = BoundaryConditions::default();
    let mut constraints = AffineConstraints::new(dof_map.num_trace_dofs());
    project_dirichlet_boundary_values(mesh, &dof_map, &conditions, |x| problem.solution(x), &mut constraints)
        .unwrap();
    (dof_map, problem, conditions, constraints)
}

#[test]
fn merge_order_does_not_change_the_skeleton_system() {
    let mesh = perturbed_unit_square_mesh();
    let (dof_map, problem, conditions, constraints) = constrained_setup(&mesh, 2);
    let solver = LocalSolver::new(&mesh, &dof_map, &problem, &conditions, DEFAULT_TAU_DIFFUSION);
    let assembler = HdgAssembler::default();

    let contributions = assembler
        .compute_contributions(&solver, (0..mesh.num_cells()).into_par_iter())
        .unwrap();
    assert!(contributions
        .iter()
        .enumerate()
        .all(|(i, contribution)| contribution.element == i));

    let pattern = assemble_skeleton_pattern(&dof_map, &constraints);
    let mut forward = SkeletonSystem::<f64>::from_pattern(pattern.clone());
    let mut reverse = SkeletonSystem::from_pattern(pattern);
    for contribution in &contributions {
        forward.merge(contribution, &constraints).unwrap();
    }
    for contribution in contributions.iter().rev() {
        reverse.merge(contribution, &constraints).unwrap();
    }

    assert_matrix_eq!(
        DMatrix::from(forward.matrix()),
        DMatrix::from(reverse.matrix()),
        comp = abs,
        tol = 1e-12
    );
    assert_matrix_eq!(forward.rhs().clone(), reverse.rhs().clone(), comp = abs, tol = 1e-12);
}

#[test]
fn chunk_size_does_not_change_the_skeleton_system() {
    let mesh = create_unit_square_uniform_quad_mesh_2d(5);
    let (dof_map, problem, conditions, constraints) = constrained_setup(&mesh, 1);
    let solver = LocalSolver::new(&mesh, &dof_map, &problem, &conditions, DEFAULT_TAU_DIFFUSION);

    let reference = HdgAssembler::default()
        .with_chunk_size(1)
        .assemble_skeleton(&solver, &constraints)
        .unwrap();
    for chunk_size in [2, 7, 25, 1000] {
        let assembler = HdgAssembler::default().with_chunk_size(chunk_size);
        assert_eq!(assembler.chunk_size(), chunk_size);
        let system = assembler.assemble_skeleton(&solver, &constraints).unwrap();
        assert_eq!(system, reference);
    }
}

#[test]
fn skeleton_assembly_checks_constraint_dimensions() {
    let mesh = two_cell_mesh_with_flipped_face();
    let (dof_map, problem, conditions, _) = constrained_setup(&mesh, 1);
    let solver = LocalSolver::new(&mesh, &dof_map, &problem, &conditions, DEFAULT_TAU_DIFFUSION);
    let constraints = AffineConstraints::new(dof_map.num_trace_dofs() + 1);
    let result = HdgAssembler::default().assemble_skeleton(&solver, &constraints);
    assert!(matches!(result, Err(AssemblyError::DimensionMismatch { .. })));
}

#[test]
fn constrained_rows_reproduce_boundary_values() {
    let mesh = two_cell_mesh_with_flipped_face();
    let (dof_map, problem, conditions, constraints) = constrained_setup(&mesh, 1);
    let solver = LocalSolver::new(&mesh, &dof_map, &problem, &conditions, DEFAULT_TAU_DIFFUSION);
    let system = HdgAssembler::default()
        .assemble_skeleton(&solver, &constraints)
        .unwrap();

    for line in constraints.lines() {
        let row = system.matrix().row(line.dof);
        assert_eq!(row.col_indices(), &[line.dof]);
        let diagonal = row.values()[0];
        assert!(diagonal > 0.0);
        assert_scalar_eq!(system.rhs()[line.dof] / diagonal, line.inhomogeneity, comp = abs, tol = 1e-12);
    }
}

#[test]
fn stages_must_run_in_order() {
    let mesh: QuadMesh2d<f64> = create_unit_square_uniform_quad_mesh_2d(2);
    let settings = HdgSettings {
        problem: linear_problem(),
        ..HdgSettings::default()
    };
    let mut problem = HdgProblem::new(mesh, settings).unwrap();

    assert!(matches!(problem.solve(), Err(HdgError::NotReady(_))));
    assert!(matches!(problem.postprocess(), Err(HdgError::NotReady(_))));
    assert!(matches!(problem.compute_errors(), Err(HdgError::NotReady(_))));
    assert!(matches!(
        problem.assemble_system(LocalMode::Reconstruct),
        Err(HdgError::Assembly(AssemblyError::MissingTraceValues { .. }))
    ));

    problem
        .assemble_system(LocalMode::Assemble)
        .unwrap();
    assert!(problem.system().is_some());
    problem.solve().unwrap();
    assert!(problem.system().is_none());
    assert!(problem.trace_solution().is_some());
    // The system is consumed by the solve
    assert!(matches!(problem.solve(), Err(HdgError::NotReady(_))));
}
