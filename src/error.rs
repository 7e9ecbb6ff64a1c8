//! Functionality for error estimation.
use crate::basis::ReferenceTables;
use crate::dofs::DofMap;
use crate::mesh::QuadMesh2d;
use crate::nalgebra::{DVector, Point2, Vector2};
use crate::Real;
use itertools::izip;
use rayon::prelude::*;

/// $L^2$ errors of the scalar field, the flux and the post-processed field.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SolutionErrors<T> {
    pub scalar_l2: T,
    pub flux_l2: T,
    pub post_l2: T,
}

/// Integrates `squared_error` over the mesh and returns the square root of the integral.
///
/// `squared_error` receives the coefficients of the element, the basis values at the quadrature
/// point and the physical point.
fn integrate_squared_error<T, F>(
    mesh: &QuadMesh2d<T>,
    tables: &ReferenceTables<T>,
    coefficients: &[T],
    block_size: usize,
    squared_error: F,
) -> T
where
    T: Real,
    F: Fn(&[T], &[T], &Point2<T>) -> T + Sync,
{
    let n = tables.num_functions();
    assert_eq!(coefficients.len(), block_size * mesh.num_cells());

    let total = (0..mesh.num_cells())
        .into_par_iter()
        .map_init(
            || vec![T::zero(); n],
            |phi, cell| {
                let element = mesh.element(cell);
                let element_coefficients = &coefficients[block_size * cell..block_size * (cell + 1)];
                let mut result = T::zero();
                for (q, (&w, xi)) in izip!(tables.weights(), tables.points()).enumerate() {
                    for (s, phi_s) in phi.iter_mut().enumerate() {
                        *phi_s = tables.values()[(s, q)];
                    }
                    let x = element.map_reference_coords(xi);
                    let det = element.reference_jacobian(xi).determinant().abs();
                    result += w * squared_error(element_coefficients, phi.as_slice(), &x) * det;
                }
                result
            },
        )
        .reduce(T::zero, |a, b| a + b);
    total.sqrt()
}

fn evaluate<T: Real>(coefficients: &[T], phi: &[T]) -> T {
    coefficients
        .iter()
        .zip(phi)
        .fold(T::zero(), |acc, (&c, &phi)| acc + c * phi)
}

/// Estimate $\norm{u_h - u}_{L^2}$ for the scalar component of the local solution.
#[allow(non_snake_case)]
pub fn estimate_scalar_L2_error<T: Real>(
    mesh: &QuadMesh2d<T>,
    dof_map: &DofMap,
    local_solution: &DVector<T>,
    u: impl Fn(&Point2<T>) -> T + Sync,
) -> T {
    let tables = ReferenceTables::new(dof_map.degree(), dof_map.degree() + 3);
    let n = tables.num_functions();
    integrate_squared_error(
        mesh,
        &tables,
        local_solution.as_slice(),
        dof_map.local_dofs_per_cell(),
        |coefficients, phi, x| {
            let u_h = evaluate(&coefficients[2 * n..3 * n], phi);
            (u_h - u(x)).powi(2)
        },
    )
}

/// Estimate $\norm{q_h - q}_{L^2}$ for the flux component of the local solution.
#[allow(non_snake_case)]
pub fn estimate_flux_L2_error<T: Real>(
    mesh: &QuadMesh2d<T>,
    dof_map: &DofMap,
    local_solution: &DVector<T>,
    q: impl Fn(&Point2<T>) -> Vector2<T> + Sync,
) -> T {
    let tables = ReferenceTables::new(dof_map.degree(), dof_map.degree() + 3);
    let n = tables.num_functions();
    integrate_squared_error(
        mesh,
        &tables,
        local_solution.as_slice(),
        dof_map.local_dofs_per_cell(),
        |coefficients, phi, x| {
            let q_h = Vector2::new(
                evaluate(&coefficients[0..n], phi),
                evaluate(&coefficients[n..2 * n], phi),
            );
            (q_h - q(x)).norm_squared()
        },
    )
}

/// Estimate $\norm{u^* - u}_{L^2}$ for the post-processed field.
#[allow(non_snake_case)]
pub fn estimate_post_L2_error<T: Real>(
    mesh: &QuadMesh2d<T>,
    dof_map: &DofMap,
    post_solution: &DVector<T>,
    u: impl Fn(&Point2<T>) -> T + Sync,
) -> T {
    let tables = ReferenceTables::new(dof_map.degree() + 1, dof_map.degree() + 3);
    integrate_squared_error(
        mesh,
        &tables,
        post_solution.as_slice(),
        dof_map.post_dofs_per_cell(),
        |coefficients, phi, x| (evaluate(coefficients, phi) - u(x)).powi(2),
    )
}

/// Observed convergence rates `log(e_{i-1} / e_i) / log(h_{i-1} / h_i)` between consecutive
/// refinement levels.
pub fn convergence_rates<T: Real>(errors: &[T], mesh_sizes: &[T]) -> Vec<T> {
    assert_eq!(errors.len(), mesh_sizes.len(), "Need one mesh size per error");
    errors
        .windows(2)
        .zip(mesh_sizes.windows(2))
        .map(|(e, h)| (e[0] / e[1]).ln() / (h[0] / h[1]).ln())
        .collect()
}
