//! Linear solutions lie in every discrete space, so they must be reproduced up to round-off on
//! affine meshes.
use hdg::basis::LagrangeBasis1d;
use hdg::functions::{ConvectionField, ManufacturedSolution, ProblemData};
use hdg::mesh::procedural::create_rectangular_uniform_quad_mesh_2d;
use hdg::mesh::{reference_face_point, QuadMesh2d, FACES_PER_CELL};
use hdg::nalgebra::{Point2, Vector2};
use hdg::problem::{HdgProblem, HdgSettings, SolverSettings};
use matrixcompare::assert_scalar_eq;

const SOLUTION: ManufacturedSolution = ManufacturedSolution::Linear {
    constant: 0.75,
    gradient: [1.5, -2.0],
};

fn patch_mesh(cells_x: usize, cells_y: usize) -> QuadMesh2d<f64> {
    create_rectangular_uniform_quad_mesh_2d(&Point2::new(-1.0, 0.5), &Vector2::new(3.0, 1.25), cells_x, cells_y)
}

fn patch_settings(degree: usize, convection: ConvectionField) -> HdgSettings {
    HdgSettings {
        degree,
        solver: SolverSettings {
            relative_tolerance: 1e-12,
            restart: 200,
            ..SolverSettings::default()
        },
        problem: ProblemData::new(SOLUTION, convection),
        ..HdgSettings::default()
    }
}

fn assert_patch_test_passes(mesh: QuadMesh2d<f64>, settings: HdgSettings) {
    let degree = settings.degree;
    let mut problem = HdgProblem::new(mesh, settings).unwrap();
    let report = problem.run_cycle().unwrap();
    assert!(report.gmres_iterations <= problem.dof_map().num_trace_dofs());
    assert_scalar_eq!(report.errors.scalar_l2, 0.0, comp = abs, tol = 1e-9);
    assert_scalar_eq!(report.errors.flux_l2, 0.0, comp = abs, tol = 1e-9);
    assert_scalar_eq!(report.errors.post_l2, 0.0, comp = abs, tol = 1e-9);

    // The trace takes the exact values at its nodes, on interior faces as well as on the boundary
    let trace = problem.trace_solution().unwrap();
    let nodes = LagrangeBasis1d::<f64>::new(degree).nodes().to_vec();
    let mesh = problem.mesh();
    for cell in 0..mesh.num_cells() {
        let element = mesh.element(cell);
        for local_face in 0..FACES_PER_CELL {
            for (k, &s) in nodes.iter().enumerate() {
                let dof = problem.dof_map().cell_trace_dofs(cell)[local_face * (degree + 1) + k];
                let x = element.map_reference_coords(&reference_face_point(local_face, s));
                assert_scalar_eq!(trace[dof], SOLUTION.value(&x), comp = abs, tol = 1e-9);
            }
        }
    }
}

#[test]
fn patch_test_linear_rotation() {
    assert_patch_test_passes(patch_mesh(3, 2), patch_settings(1, ConvectionField::Rotation));
    assert_patch_test_passes(patch_mesh(2, 3), patch_settings(2, ConvectionField::Rotation));
}

#[test]
fn patch_test_linear_uniform_convection() {
    let convection = ConvectionField::Uniform { velocity: [2.0, 1.0] };
    assert_patch_test_passes(patch_mesh(4, 3), patch_settings(1, convection.clone()));
    assert_patch_test_passes(patch_mesh(2, 2), patch_settings(3, convection));
}

#[test]
fn patch_test_pure_diffusion() {
    let convection = ConvectionField::Uniform { velocity: [0.0, 0.0] };
    assert_patch_test_passes(patch_mesh(3, 3), patch_settings(1, convection));
}

#[test]
fn patch_test_with_jacobi_preconditioner() {
    let mut settings = patch_settings(2, ConvectionField::Rotation);
    settings.solver.jacobi_preconditioner = true;
    assert_patch_test_passes(patch_mesh(3, 2), settings);
}

#[test]
fn patch_test_is_independent_of_chunk_size() {
    let mut reports = Vec::new();
    for chunk_size in [1, 4, 1000] {
        let mut settings = patch_settings(1, ConvectionField::Rotation);
        settings.chunk_size = chunk_size;
        let mut problem = HdgProblem::new(patch_mesh(4, 4), settings).unwrap();
        problem.run_cycle().unwrap();
        reports.push(problem.trace_solution().unwrap().clone());
    }
    assert_eq!(reports[0], reports[1]);
    assert_eq!(reports[0], reports[2]);
}
