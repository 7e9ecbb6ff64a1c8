//! Conforming quadrilateral meshes in 2D, with the face (edge) structure needed for trace spaces.
use crate::nalgebra::{Matrix2, Matrix2x4, Point2, Vector2};
use crate::Real;
use fxhash::FxHashMap;
use numeric_literals::replace_float_literals;
use std::error::Error;
use std::fmt;

pub mod procedural;

/// Identifier attached to boundary faces, used to select boundary conditions.
pub type BoundaryId = u8;

/// Number of faces of a quadrilateral.
pub const FACES_PER_CELL: usize = 4;

/// Local vertex indices `(start, end)` of each local face.
///
/// The local faces are ordered as `xi_0 = -1`, `xi_0 = 1`, `xi_1 = -1`, `xi_1 = 1`. Each face is
/// parametrized by the free reference coordinate, running from `start` to `end`.
pub const LOCAL_FACE_VERTICES: [[usize; 2]; FACES_PER_CELL] = [[0, 3], [1, 2], [0, 1], [3, 2]];

/// Maps the face parameter `s` in `[-1, 1]` of the given local face to reference coordinates.
#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
pub fn reference_face_point<T: Real>(local_face: usize, s: T) -> Point2<T> {
    match local_face {
        0 => Point2::new(-1.0, s),
        1 => Point2::new(1.0, s),
        2 => Point2::new(s, -1.0),
        3 => Point2::new(s, 1.0),
        _ => panic!("Local face index {} out of bounds", local_face),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    VertexOutOfBounds { cell: usize, vertex: usize },
    DegenerateFace { cell: usize, local_face: usize },
    /// A face is shared by more than two cells.
    NonManifoldFace { vertices: [usize; 2] },
    /// The vertices of the cell are ordered clockwise.
    InvertedCell { cell: usize },
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VertexOutOfBounds { cell, vertex } => {
                write!(f, "Cell {} references vertex {} which is out of bounds", cell, vertex)
            }
            Self::DegenerateFace { cell, local_face } => {
                write!(f, "Local face {} of cell {} connects a vertex with itself", local_face, cell)
            }
            Self::NonManifoldFace { vertices } => write!(
                f,
                "Face ({}, {}) is shared by more than two cells",
                vertices[0], vertices[1]
            ),
            Self::InvertedCell { cell } => write!(f, "Cell {} is not oriented counter-clockwise", cell),
        }
    }
}

impl Error for MeshError {}

/// A face of the mesh, shared by one (boundary) or two (interior) cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Face {
    /// Global vertex indices, ordered such that `vertices[0] < vertices[1]`.
    vertices: [usize; 2],
    /// `(cell, local face)` pairs of the adjacent cells.
    cells: Vec<(usize, usize)>,
    boundary_id: Option<BoundaryId>,
}

impl Face {
    pub fn vertices(&self) -> [usize; 2] {
        self.vertices
    }

    pub fn cells(&self) -> &[(usize, usize)] {
        &self.cells
    }

    pub fn is_boundary(&self) -> bool {
        self.cells.len() == 1
    }

    /// The boundary id of the face, or `None` for interior faces.
    pub fn boundary_id(&self) -> Option<BoundaryId> {
        self.boundary_id
    }
}

/// A bilinear quadrilateral element, defined by its four vertices in counter-clockwise order.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct QuadElement<T: Real> {
    vertices: [Point2<T>; 4],
}

impl<T: Real> QuadElement<T> {
    pub fn from_vertices(vertices: [Point2<T>; 4]) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Point2<T>; 4] {
        &self.vertices
    }

    #[rustfmt::skip]
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    fn bilinear_gradients(xi: &Point2<T>) -> Matrix2x4<T> {
        let phi_grad = |alpha: T, beta: T| Vector2::new(
            alpha * (1.0 + beta * xi[1]) / 4.0,
            beta * (1.0 + alpha * xi[0]) / 4.0,
        );
        Matrix2x4::from_columns(&[
            phi_grad(-1.0, -1.0),
            phi_grad( 1.0, -1.0),
            phi_grad( 1.0,  1.0),
            phi_grad(-1.0,  1.0),
        ])
    }

    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn map_reference_coords(&self, xi: &Point2<T>) -> Point2<T> {
        let phi = |alpha: T, beta: T| (1.0 + alpha * xi[0]) * (1.0 + beta * xi[1]) / 4.0;
        let [x0, x1, x2, x3] = &self.vertices;
        Point2::from(
            x0.coords * phi(-1.0, -1.0)
                + x1.coords * phi(1.0, -1.0)
                + x2.coords * phi(1.0, 1.0)
                + x3.coords * phi(-1.0, 1.0),
        )
    }

    /// The Jacobian `J_ij = dx_i / dxi_j` of the reference map.
    #[allow(non_snake_case)]
    pub fn reference_jacobian(&self, xi: &Point2<T>) -> Matrix2<T> {
        let X = Matrix2x4::from_fn(|i, j| self.vertices[j][i]);
        let G = Self::bilinear_gradients(xi);
        X * G.transpose()
    }

    /// Outward unit normal and line element `|dx/ds|` at the reference point `xi` on a local face.
    ///
    /// For a degenerate face the line element is zero and the normal is the zero vector.
    pub fn face_normal_and_line_element(&self, local_face: usize, xi: &Point2<T>) -> (Vector2<T>, T) {
        let j = self.reference_jacobian(xi);
        let tangent_axis = if local_face < 2 { 1 } else { 0 };
        let tangent = j.column(tangent_axis).into_owned();
        let length = tangent.norm();
        if length == T::zero() {
            return (Vector2::zeros(), length);
        }
        // Faces 0 and 3 are traversed with the cell on their right-hand side, faces 1 and 2
        // with the cell on their left-hand side
        let normal = match local_face {
            0 | 3 => Vector2::new(-tangent[1], tangent[0]),
            _ => Vector2::new(tangent[1], -tangent[0]),
        };
        (normal / length, length)
    }

    pub fn diameter(&self) -> T {
        let mut diameter = T::zero();
        for i in 0..4 {
            for j in (i + 1)..4 {
                diameter = diameter.max((self.vertices[i] - self.vertices[j]).norm());
            }
        }
        diameter
    }
}

/// A conforming mesh of quadrilaterals with explicit face connectivity.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadMesh2d<T: Real> {
    vertices: Vec<Point2<T>>,
    cells: Vec<[usize; 4]>,
    cell_faces: Vec<[usize; FACES_PER_CELL]>,
    // Whether the local orientation of a face (start -> end) is opposite to the global one
    cell_face_flips: Vec<[bool; FACES_PER_CELL]>,
    faces: Vec<Face>,
}

impl<T: Real> QuadMesh2d<T> {
    /// Builds a mesh from vertices and counter-clockwise cell connectivity.
    ///
    /// All boundary faces are given the boundary id `0`.
    pub fn from_vertices_and_cells(vertices: Vec<Point2<T>>, cells: Vec<[usize; 4]>) -> Result<Self, MeshError> {
        let mut face_lookup = FxHashMap::default();
        let mut faces: Vec<Face> = Vec::new();
        let mut cell_faces = Vec::with_capacity(cells.len());
        let mut cell_face_flips = Vec::with_capacity(cells.len());

        for (cell_index, cell) in cells.iter().enumerate() {
            if let Some(&vertex) = cell.iter().find(|&&v| v >= vertices.len()) {
                return Err(MeshError::VertexOutOfBounds {
                    cell: cell_index,
                    vertex,
                });
            }

            let mut face_indices = [usize::MAX; FACES_PER_CELL];
            let mut flips = [false; FACES_PER_CELL];
            for (local_face, [start, end]) in LOCAL_FACE_VERTICES.iter().enumerate() {
                let (a, b) = (cell[*start], cell[*end]);
                if a == b {
                    return Err(MeshError::DegenerateFace {
                        cell: cell_index,
                        local_face,
                    });
                }
                let key = (a.min(b), a.max(b));
                let face_index = *face_lookup.entry(key).or_insert_with(|| {
                    faces.push(Face {
                        vertices: [key.0, key.1],
                        cells: Vec::with_capacity(2),
                        boundary_id: None,
                    });
                    faces.len() - 1
                });
                let face = &mut faces[face_index];
                if face.cells.len() == 2 {
                    return Err(MeshError::NonManifoldFace { vertices: face.vertices });
                }
                face.cells.push((cell_index, local_face));
                face_indices[local_face] = face_index;
                flips[local_face] = a > b;
            }
            cell_faces.push(face_indices);
            cell_face_flips.push(flips);
        }

        for face in &mut faces {
            if face.cells.len() == 1 {
                face.boundary_id = Some(0);
            }
        }

        let mesh = Self {
            vertices,
            cells,
            cell_faces,
            cell_face_flips,
            faces,
        };

        // Check orientation at the cell centers. Zero-measure cells are let through.
        for cell in 0..mesh.num_cells() {
            let j = mesh.element(cell).reference_jacobian(&Point2::origin());
            if j.determinant() < T::zero() {
                return Err(MeshError::InvertedCell { cell });
            }
        }

        Ok(mesh)
    }

    pub fn vertices(&self) -> &[Point2<T>] {
        &self.vertices
    }

    pub fn cells(&self) -> &[[usize; 4]] {
        &self.cells
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Global face indices of the local faces of a cell.
    pub fn cell_faces(&self, cell: usize) -> &[usize; FACES_PER_CELL] {
        &self.cell_faces[cell]
    }

    /// Whether the parametrization of the local face runs against the global face orientation.
    pub fn face_is_flipped(&self, cell: usize, local_face: usize) -> bool {
        self.cell_face_flips[cell][local_face]
    }

    /// The boundary id of a local face of a cell, or `None` if the face is interior.
    pub fn local_face_boundary_id(&self, cell: usize, local_face: usize) -> Option<BoundaryId> {
        self.faces[self.cell_faces[cell][local_face]].boundary_id
    }

    pub fn element(&self, cell: usize) -> QuadElement<T> {
        let [a, b, c, d] = self.cells[cell];
        QuadElement::from_vertices([self.vertices[a], self.vertices[b], self.vertices[c], self.vertices[d]])
    }

    pub fn face_midpoint(&self, face: usize) -> Point2<T> {
        let [a, b] = self.faces[face].vertices;
        Point2::from((self.vertices[a].coords + self.vertices[b].coords) * T::from_f64(0.5).expect("0.5 must fit in T"))
    }

    /// Sets the boundary id of a boundary face.
    ///
    /// # Panics
    ///
    /// Panics if the face is an interior face.
    pub fn set_boundary_id(&mut self, face: usize, boundary_id: BoundaryId) {
        let face = &mut self.faces[face];
        assert!(face.is_boundary(), "Cannot assign boundary id to interior face");
        face.boundary_id = Some(boundary_id);
    }

    /// Reassigns boundary ids of all boundary faces from their midpoints.
    pub fn assign_boundary_ids(&mut self, mut boundary_id: impl FnMut(&Point2<T>) -> BoundaryId) {
        for face in 0..self.faces.len() {
            if self.faces[face].is_boundary() {
                let midpoint = self.face_midpoint(face);
                self.faces[face].boundary_id = Some(boundary_id(&midpoint));
            }
        }
    }

    /// The largest cell diameter in the mesh.
    pub fn max_diameter(&self) -> T {
        (0..self.num_cells())
            .map(|cell| self.element(cell).diameter())
            .fold(T::zero(), |a, b| a.max(b))
    }
}
