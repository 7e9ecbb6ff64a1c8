//! Use the method of manufactured solutions to verify the convergence orders of the HDG solver.
//!
//! The problem is
//!   - Delta u + c . grad u = f
//! on the unit square with Dirichlet boundary conditions, where u = sin(pi x) sin(pi y).
use hdg::error::convergence_rates;
use hdg::functions::{ConvectionField, ManufacturedSolution, ProblemData};
use hdg::mesh::procedural::create_unit_square_uniform_quad_mesh_2d;
use hdg::problem::{CycleReport, HdgProblem, HdgSettings, SolverSettings};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::path::PathBuf;

/// For serializing to JSON for subsequent analysis/plots
#[derive(Serialize, Deserialize)]
struct ErrorSummary {
    name: String,
    degree: usize,
    mesh_sizes: Vec<f64>,
    scalar_errors: Vec<f64>,
    flux_errors: Vec<f64>,
    post_errors: Vec<f64>,
}

impl ErrorSummary {
    fn from_reports(name: &str, degree: usize, reports: &[CycleReport<f64>]) -> Self {
        Self {
            name: name.to_string(),
            degree,
            mesh_sizes: reports.iter().map(|report| report.mesh_size).collect(),
            scalar_errors: reports.iter().map(|report| report.errors.scalar_l2).collect(),
            flux_errors: reports.iter().map(|report| report.errors.flux_l2).collect(),
            post_errors: reports.iter().map(|report| report.errors.post_l2).collect(),
        }
    }
}

fn export_summary(summary: &ErrorSummary) {
    let base_path = PathBuf::from("data/convergence_tests/hdg_mms/");
    create_dir_all(&base_path).unwrap();
    let mut file = File::create(base_path.join(format!("{}.json", summary.name))).unwrap();
    serde_json::to_writer_pretty(&mut file, summary).unwrap();
}

fn run_convergence_study(name: &str, degree: usize, resolutions: &[usize]) -> ErrorSummary {
    let settings = HdgSettings {
        degree,
        solver: SolverSettings {
            relative_tolerance: 1e-12,
            // Never restarts, since the restart length is capped by the number of unknowns
            restart: 1200,
            ..SolverSettings::default()
        },
        problem: ProblemData::new(
            ManufacturedSolution::Trigonometric { frequency: 1.0 },
            ConvectionField::Rotation,
        ),
        ..HdgSettings::default()
    };
    let meshes = resolutions
        .iter()
        .map(|&cells_per_dim| create_unit_square_uniform_quad_mesh_2d(cells_per_dim));
    let reports = HdgProblem::run(meshes, &settings).unwrap();
    let summary = ErrorSummary::from_reports(name, degree, &reports);
    export_summary(&summary);
    summary
}

fn last_rate(errors: &[f64], mesh_sizes: &[f64]) -> f64 {
    *convergence_rates(errors, mesh_sizes).last().unwrap()
}

#[test]
fn hdg_mms_degree_1() {
    let summary = run_convergence_study("degree_1", 1, &[2, 4, 8, 16]);
    let h = &summary.mesh_sizes;

    // Expected orders are p + 1 for the scalar and the flux, and p + 2 after post-processing
    let scalar_rate = last_rate(&summary.scalar_errors, h);
    let flux_rate = last_rate(&summary.flux_errors, h);
    let post_rate = last_rate(&summary.post_errors, h);
    assert!(scalar_rate > 1.8, "scalar rate {}", scalar_rate);
    assert!(flux_rate > 1.7, "flux rate {}", flux_rate);
    assert!(post_rate > 2.6, "post-processed rate {}", post_rate);

    let finest = summary.post_errors.len() - 1;
    assert!(summary.post_errors[finest] < summary.scalar_errors[finest]);
}

#[test]
fn hdg_mms_degree_2() {
    let summary = run_convergence_study("degree_2", 2, &[2, 4, 8]);
    let h = &summary.mesh_sizes;

    let scalar_rate = last_rate(&summary.scalar_errors, h);
    let post_rate = last_rate(&summary.post_errors, h);
    assert!(scalar_rate > 2.6, "scalar rate {}", scalar_rate);
    assert!(post_rate > 3.4, "post-processed rate {}", post_rate);
}
