//! Basic procedural mesh generation routines.
use crate::mesh::QuadMesh2d;
use crate::nalgebra::{Point2, Vector2};
use crate::Real;

/// Creates a uniform mesh of the unit square `[0, 1]^2` with `cells_per_dim` cells per axis.
pub fn create_unit_square_uniform_quad_mesh_2d<T: Real>(cells_per_dim: usize) -> QuadMesh2d<T> {
    create_rectangular_uniform_quad_mesh_2d(
        &Point2::origin(),
        &Vector2::new(T::one(), T::one()),
        cells_per_dim,
        cells_per_dim,
    )
}

/// Creates a uniform mesh of the square `[min, max]^2` with `cells_per_dim` cells per axis.
pub fn create_square_uniform_quad_mesh_2d<T: Real>(min: T, max: T, cells_per_dim: usize) -> QuadMesh2d<T> {
    create_rectangular_uniform_quad_mesh_2d(
        &Point2::new(min, min),
        &Vector2::new(max - min, max - min),
        cells_per_dim,
        cells_per_dim,
    )
}

/// Creates a uniform mesh of the rectangle with the given lower-left corner and extents.
///
/// Vertices are numbered row by row from the bottom, and cells are oriented counter-clockwise.
/// An empty mesh is returned if either cell count is zero.
pub fn create_rectangular_uniform_quad_mesh_2d<T: Real>(
    bottom_left: &Point2<T>,
    extents: &Vector2<T>,
    cells_x: usize,
    cells_y: usize,
) -> QuadMesh2d<T> {
    let (vertices, cells) = if cells_x == 0 || cells_y == 0 {
        (Vec::new(), Vec::new())
    } else {
        let to_t = |i: usize| T::from_usize(i).expect("Must be able to fit usize in T");
        let cell_size = Vector2::new(extents.x / to_t(cells_x), extents.y / to_t(cells_y));
        let to_global_vertex_index = |i, j| (cells_x + 1) * j + i;

        let mut vertices = Vec::with_capacity((cells_x + 1) * (cells_y + 1));
        for j in 0..=cells_y {
            for i in 0..=cells_x {
                let offset = Vector2::new(to_t(i) * cell_size.x, to_t(j) * cell_size.y);
                vertices.push(bottom_left + offset);
            }
        }

        let mut cells = Vec::with_capacity(cells_x * cells_y);
        for j in 0..cells_y {
            for i in 0..cells_x {
                cells.push([
                    to_global_vertex_index(i, j),
                    to_global_vertex_index(i + 1, j),
                    to_global_vertex_index(i + 1, j + 1),
                    to_global_vertex_index(i, j + 1),
                ]);
            }
        }
        (vertices, cells)
    };

    QuadMesh2d::from_vertices_and_cells(vertices, cells).expect("Uniform grid is a valid quad mesh")
}

/// The mesh of `[-1, 1]^2` used in the given cycle of a global refinement study.
///
/// The first cycle uses 2 cells per axis. Later cycles alternate between 2 and 3 base
/// subdivisions, each refined `1 + cycle / 2` times, so that consecutive cycles grow by a factor
/// of roughly 1.5 in cells per axis.
pub fn create_refinement_cycle_mesh_2d<T: Real>(cycle: usize) -> QuadMesh2d<T> {
    let cells_per_dim = if cycle == 0 {
        2
    } else {
        (2 + cycle % 2) * 2usize.pow(1 + cycle as u32 / 2)
    };
    create_square_uniform_quad_mesh_2d(-T::one(), T::one(), cells_per_dim)
}
