//! Lagrange bases on the reference interval and quadrilateral, and precomputed reference tables.
use crate::mesh::{reference_face_point, FACES_PER_CELL};
use crate::nalgebra::{DMatrix, Dyn, Matrix2xX, MatrixViewMut, Point2, U2};
use crate::quadrature::{gauss, quadrilateral_gauss};
use crate::Real;
use numeric_literals::replace_float_literals;

/// Lagrange polynomials of degree `p` on `[-1, 1]` with `p + 1` equidistant nodes.
///
/// For degree zero, the single node is located at the midpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct LagrangeBasis1d<T> {
    nodes: Vec<T>,
}

impl<T: Real> LagrangeBasis1d<T> {
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn new(degree: usize) -> Self {
        let nodes = if degree == 0 {
            vec![0.0]
        } else {
            let p = T::from_usize(degree).expect("Degree must fit in T");
            (0..=degree)
                .map(|i| -1.0 + 2.0 * T::from_usize(i).expect("Index must fit in T") / p)
                .collect()
        };
        Self { nodes }
    }

    pub fn degree(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn num_functions(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[T] {
        &self.nodes
    }

    pub fn populate_basis(&self, basis_values: &mut [T], x: T) {
        assert_eq!(basis_values.len(), self.num_functions());
        for (i, value) in basis_values.iter_mut().enumerate() {
            let x_i = self.nodes[i];
            *value = self
                .nodes
                .iter()
                .enumerate()
                .filter(|&(m, _)| m != i)
                .fold(T::one(), |acc, (_, &x_m)| acc * (x - x_m) / (x_i - x_m));
        }
    }

    pub fn populate_basis_derivatives(&self, basis_derivatives: &mut [T], x: T) {
        assert_eq!(basis_derivatives.len(), self.num_functions());
        let n = self.num_functions();
        for (i, derivative) in basis_derivatives.iter_mut().enumerate() {
            let x_i = self.nodes[i];
            let mut sum = T::zero();
            for m in (0..n).filter(|&m| m != i) {
                let mut product = T::one() / (x_i - self.nodes[m]);
                for k in (0..n).filter(|&k| k != i && k != m) {
                    product *= (x - self.nodes[k]) / (x_i - self.nodes[k]);
                }
                sum += product;
            }
            *derivative = sum;
        }
    }
}

/// Tensor-product Lagrange basis `Q_p` on the reference quadrilateral `[-1, 1]^2`.
///
/// The basis function with index `i + (p + 1) * j` is associated with the node `(x_i, x_j)`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadrilateralLagrangeBasis<T> {
    basis_1d: LagrangeBasis1d<T>,
}

impl<T: Real> QuadrilateralLagrangeBasis<T> {
    pub fn new(degree: usize) -> Self {
        Self {
            basis_1d: LagrangeBasis1d::new(degree),
        }
    }

    pub fn degree(&self) -> usize {
        self.basis_1d.degree()
    }

    pub fn basis_1d(&self) -> &LagrangeBasis1d<T> {
        &self.basis_1d
    }

    pub fn num_functions(&self) -> usize {
        self.basis_1d.num_functions().pow(2)
    }

    pub fn populate_basis(&self, basis_values: &mut [T], reference_coords: &Point2<T>) {
        assert_eq!(basis_values.len(), self.num_functions());
        let n = self.basis_1d.num_functions();
        let mut values_x = vec![T::zero(); n];
        let mut values_y = vec![T::zero(); n];
        self.basis_1d.populate_basis(&mut values_x, reference_coords.x);
        self.basis_1d.populate_basis(&mut values_y, reference_coords.y);
        for j in 0..n {
            for i in 0..n {
                basis_values[i + n * j] = values_x[i] * values_y[j];
            }
        }
    }

    /// Populates the columns of `basis_gradients` with the reference gradients of each basis function.
    pub fn populate_basis_gradients(&self, mut basis_gradients: MatrixViewMut<T, U2, Dyn>, reference_coords: &Point2<T>) {
        assert_eq!(basis_gradients.ncols(), self.num_functions());
        let n = self.basis_1d.num_functions();
        let mut values_x = vec![T::zero(); n];
        let mut values_y = vec![T::zero(); n];
        let mut derivatives_x = vec![T::zero(); n];
        let mut derivatives_y = vec![T::zero(); n];
        self.basis_1d.populate_basis(&mut values_x, reference_coords.x);
        self.basis_1d.populate_basis(&mut values_y, reference_coords.y);
        self.basis_1d
            .populate_basis_derivatives(&mut derivatives_x, reference_coords.x);
        self.basis_1d
            .populate_basis_derivatives(&mut derivatives_y, reference_coords.y);
        for j in 0..n {
            for i in 0..n {
                basis_gradients[(0, i + n * j)] = derivatives_x[i] * values_y[j];
                basis_gradients[(1, i + n * j)] = values_x[i] * derivatives_y[j];
            }
        }
    }

    /// Indices of the basis functions that do not vanish identically on the given local face.
    ///
    /// The indices are ordered along the face parametrization, so that the `k`-th entry is the
    /// function associated with the `k`-th node of the 1D basis on the face.
    pub fn support_on_face(&self, local_face: usize) -> Vec<usize> {
        let n = self.basis_1d.num_functions();
        let last = n - 1;
        match local_face {
            0 => (0..n).map(|j| n * j).collect(),
            1 => (0..n).map(|j| last + n * j).collect(),
            2 => (0..n).collect(),
            3 => (0..n).map(|i| i + n * last).collect(),
            _ => panic!("Local face index {} out of bounds", local_face),
        }
    }
}

/// Basis values and gradients of a `Q_p` space tabulated at the quadrature points of a cell and
/// of its faces.
#[derive(Debug, Clone)]
pub struct ReferenceTables<T: Real> {
    basis: QuadrilateralLagrangeBasis<T>,
    weights: Vec<T>,
    points: Vec<Point2<T>>,
    /// Column `q` holds the value of every basis function at point `q`.
    values: DMatrix<T>,
    /// Reference gradients, one `2 x n` block per quadrature point.
    gradients: Vec<Matrix2xX<T>>,
    face_weights: Vec<T>,
    face_parameters: Vec<T>,
    face_support: [Vec<usize>; FACES_PER_CELL],
    /// Values of the supported functions of each face, one column per face quadrature point.
    face_values: [DMatrix<T>; FACES_PER_CELL],
    /// Values of the 1D basis at the face quadrature points, used for the trace space.
    face_trace_values: DMatrix<T>,
}

impl<T: Real> ReferenceTables<T> {
    /// Tabulates the basis of the given degree with `num_points_per_dim` Gauss points per axis.
    pub fn new(degree: usize, num_points_per_dim: usize) -> Self {
        let basis = QuadrilateralLagrangeBasis::new(degree);
        let n = basis.num_functions();

        let (weights, points) = quadrilateral_gauss::<T>(num_points_per_dim);
        let mut values = DMatrix::zeros(n, points.len());
        let mut gradients = Vec::with_capacity(points.len());
        for (q, xi) in points.iter().enumerate() {
            let mut column = vec![T::zero(); n];
            basis.populate_basis(&mut column, xi);
            values.column_mut(q).copy_from_slice(&column);
            let mut gradient = Matrix2xX::zeros(n);
            basis.populate_basis_gradients((&mut gradient).into(), xi);
            gradients.push(gradient);
        }

        let (face_weights, face_parameters) = gauss::<T>(num_points_per_dim);
        let face_support: [Vec<usize>; FACES_PER_CELL] = std::array::from_fn(|face| basis.support_on_face(face));
        let face_values = std::array::from_fn(|face| {
            let support = &face_support[face];
            let mut table = DMatrix::zeros(support.len(), face_parameters.len());
            let mut column = vec![T::zero(); n];
            for (q, &s) in face_parameters.iter().enumerate() {
                basis.populate_basis(&mut column, &reference_face_point(face, s));
                for (k, &i) in support.iter().enumerate() {
                    table[(k, q)] = column[i];
                }
            }
            table
        });

        let basis_1d = basis.basis_1d();
        let mut face_trace_values = DMatrix::zeros(basis_1d.num_functions(), face_parameters.len());
        let mut column = vec![T::zero(); basis_1d.num_functions()];
        for (q, &s) in face_parameters.iter().enumerate() {
            basis_1d.populate_basis(&mut column, s);
            face_trace_values.column_mut(q).copy_from_slice(&column);
        }

        Self {
            basis,
            weights,
            points,
            values,
            gradients,
            face_weights,
            face_parameters,
            face_support,
            face_values,
            face_trace_values,
        }
    }

    pub fn basis(&self) -> &QuadrilateralLagrangeBasis<T> {
        &self.basis
    }

    pub fn num_functions(&self) -> usize {
        self.basis.num_functions()
    }

    pub fn weights(&self) -> &[T] {
        &self.weights
    }

    pub fn points(&self) -> &[Point2<T>] {
        &self.points
    }

    pub fn values(&self) -> &DMatrix<T> {
        &self.values
    }

    pub fn reference_gradients(&self, quadrature_point: usize) -> &Matrix2xX<T> {
        &self.gradients[quadrature_point]
    }

    pub fn face_weights(&self) -> &[T] {
        &self.face_weights
    }

    pub fn face_parameters(&self) -> &[T] {
        &self.face_parameters
    }

    pub fn face_support(&self, local_face: usize) -> &[usize] {
        &self.face_support[local_face]
    }

    pub fn face_values(&self, local_face: usize) -> &DMatrix<T> {
        &self.face_values[local_face]
    }

    pub fn face_trace_values(&self) -> &DMatrix<T> {
        &self.face_trace_values
    }
}
