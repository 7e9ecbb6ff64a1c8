use hdg::dofs::{BoundaryCondition, BoundaryConditions};
use hdg::functions::{ConvectionField, ManufacturedSolution, ProblemData};
use hdg::mesh::procedural::create_unit_square_uniform_quad_mesh_2d;
use hdg::problem::{HdgError, HdgProblem, HdgSettings, SolverSettings};

#[test]
fn settings_json_round_trip() {
    let settings = HdgSettings {
        degree: 3,
        tau_diffusion: 2.5,
        chunk_size: 17,
        solver: SolverSettings {
            relative_tolerance: 1e-8,
            restart: 30,
            max_iterations_per_dof: 4,
            jacobi_preconditioner: true,
        },
        problem: ProblemData::new(
            ManufacturedSolution::Trigonometric { frequency: 2.0 },
            ConvectionField::Uniform { velocity: [1.0, -0.5] },
        ),
        boundary_conditions: BoundaryConditions::new().with(2, BoundaryCondition::Neumann),
    };
    let json = serde_json::to_string(&settings).unwrap();
    let deserialized: HdgSettings = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized, settings);
}

#[test]
fn partial_settings_fall_back_to_defaults() {
    let json = r#"{
        "degree": 2,
        "solver": { "restart": 10 },
        "problem": { "solution": { "type": "linear", "constant": 1.0, "gradient": [0.5, 0.25] } }
    }"#;
    let settings: HdgSettings = serde_json::from_str(json).unwrap();
    let defaults = HdgSettings::default();

    assert_eq!(settings.degree, 2);
    assert_eq!(settings.tau_diffusion, defaults.tau_diffusion);
    assert_eq!(settings.chunk_size, defaults.chunk_size);
    assert_eq!(settings.solver.restart, 10);
    assert_eq!(settings.solver.relative_tolerance, defaults.solver.relative_tolerance);
    assert_eq!(
        settings.problem.solution,
        ManufacturedSolution::Linear {
            constant: 1.0,
            gradient: [0.5, 0.25]
        }
    );
    assert_eq!(settings.problem.convection, ConvectionField::Rotation);
    assert_eq!(settings.boundary_conditions, BoundaryConditions::default());
}

#[test]
fn default_settings() {
    let settings = HdgSettings::default();
    assert_eq!(settings.degree, 1);
    assert_eq!(settings.tau_diffusion, 5.0);
    assert_eq!(settings.problem.solution, ManufacturedSolution::GaussianBumps);
    assert_eq!(settings.problem.convection, ConvectionField::Rotation);
    assert_eq!(settings.boundary_conditions.condition(0), Some(BoundaryCondition::Dirichlet));
    assert_eq!(settings.boundary_conditions.condition(1), Some(BoundaryCondition::Neumann));
}

#[test]
fn zero_restart_from_config_is_rejected() {
    let json = r#"{ "solver": { "restart": 0 } }"#;
    let settings: HdgSettings = serde_json::from_str(json).unwrap();
    assert!(settings.validate().is_err());

    let mesh = create_unit_square_uniform_quad_mesh_2d::<f64>(2);
    let result = HdgProblem::new(mesh, settings);
    assert!(matches!(result, Err(HdgError::InvalidSettings(_))));
}

#[test]
fn non_positive_stabilization_is_rejected() {
    for tau_diffusion in [0.0, -1.0, f64::NAN] {
        let settings = HdgSettings {
            tau_diffusion,
            ..HdgSettings::default()
        };
        assert!(settings.validate().is_err());
    }
    assert_eq!(HdgSettings::default().validate(), Ok(()));
}
