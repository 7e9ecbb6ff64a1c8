use hdg::basis::{LagrangeBasis1d, QuadrilateralLagrangeBasis, ReferenceTables};
use hdg::mesh::{reference_face_point, FACES_PER_CELL};
use hdg::nalgebra::{Matrix2xX, Point2};
use matrixcompare::assert_scalar_eq;
use proptest::prelude::*;

#[test]
fn lagrange_basis_1d_is_nodal() {
    for degree in 0..=4 {
        let basis = LagrangeBasis1d::<f64>::new(degree);
        assert_eq!(basis.degree(), degree);
        assert_eq!(basis.num_functions(), degree + 1);
        let mut values = vec![0.0; basis.num_functions()];
        for (i, &x_i) in basis.nodes().iter().enumerate() {
            basis.populate_basis(&mut values, x_i);
            for (j, &value) in values.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_scalar_eq!(value, expected, comp = abs, tol = 1e-12);
            }
        }
    }
}

#[test]
fn quadrilateral_basis_is_nodal() {
    for degree in 1..=3 {
        let basis = QuadrilateralLagrangeBasis::<f64>::new(degree);
        let nodes = basis.basis_1d().nodes().to_vec();
        let n = nodes.len();
        let mut values = vec![0.0; basis.num_functions()];
        for j in 0..n {
            for i in 0..n {
                basis.populate_basis(&mut values, &Point2::new(nodes[i], nodes[j]));
                for (k, &value) in values.iter().enumerate() {
                    let expected = if k == i + n * j { 1.0 } else { 0.0 };
                    assert_scalar_eq!(value, expected, comp = abs, tol = 1e-12);
                }
            }
        }
    }
}

#[test]
fn basis_functions_outside_face_support_vanish_on_face() {
    for degree in 1..=3 {
        let basis = QuadrilateralLagrangeBasis::<f64>::new(degree);
        let nodes = basis.basis_1d().nodes().to_vec();
        let mut values = vec![0.0; basis.num_functions()];
        for face in 0..FACES_PER_CELL {
            let support = basis.support_on_face(face);
            assert_eq!(support.len(), degree + 1);
            for s in [-0.9, -0.3, 0.1, 0.75] {
                basis.populate_basis(&mut values, &reference_face_point(face, s));
                for (i, &value) in values.iter().enumerate() {
                    if !support.contains(&i) {
                        assert_scalar_eq!(value, 0.0, comp = abs, tol = 1e-12);
                    }
                }
            }
            // The k-th supported function belongs to the k-th node along the face
            for (k, &i) in support.iter().enumerate() {
                basis.populate_basis(&mut values, &reference_face_point(face, nodes[k]));
                assert_scalar_eq!(values[i], 1.0, comp = abs, tol = 1e-12);
            }
        }
    }
}

#[test]
fn reference_tables_integrate_polynomials_exactly() {
    let tables = ReferenceTables::<f64>::new(2, 3);
    assert_eq!(tables.num_functions(), 9);
    assert_eq!(tables.points().len(), 9);
    assert_eq!(tables.values().shape(), (9, 9));

    let area: f64 = tables.weights().iter().sum();
    assert_scalar_eq!(area, 4.0, comp = abs, tol = 1e-13);

    // The integral of x^4 y^2 over the reference square is (2/5) (2/3)
    let moment: f64 = tables
        .weights()
        .iter()
        .zip(tables.points())
        .map(|(w, xi)| w * xi.x.powi(4) * xi.y.powi(2))
        .sum();
    assert_scalar_eq!(moment, 4.0 / 15.0, comp = abs, tol = 1e-13);

    let face_length: f64 = tables.face_weights().iter().sum();
    assert_scalar_eq!(face_length, 2.0, comp = abs, tol = 1e-13);
}

#[test]
fn face_tables_match_direct_evaluation() {
    let tables = ReferenceTables::<f64>::new(2, 4);
    let basis = tables.basis();
    let mut values = vec![0.0; basis.num_functions()];
    let mut trace = vec![0.0; basis.basis_1d().num_functions()];
    for face in 0..FACES_PER_CELL {
        let support = tables.face_support(face);
        let face_values = tables.face_values(face);
        for (q, &s) in tables.face_parameters().iter().enumerate() {
            basis.populate_basis(&mut values, &reference_face_point(face, s));
            basis.basis_1d().populate_basis(&mut trace, s);
            for (k, &i) in support.iter().enumerate() {
                assert_scalar_eq!(face_values[(k, q)], values[i], comp = abs, tol = 1e-14);
                // Supported cell functions restrict to the trace basis on the face
                assert_scalar_eq!(face_values[(k, q)], trace[k], comp = abs, tol = 1e-13);
                assert_scalar_eq!(tables.face_trace_values()[(k, q)], trace[k], comp = abs, tol = 1e-14);
            }
        }
    }
}

proptest! {
    #[test]
    fn quadrilateral_basis_is_partition_of_unity(degree in 0usize..=3, x in -1.0..=1.0, y in -1.0..=1.0) {
        let basis = QuadrilateralLagrangeBasis::<f64>::new(degree);
        let xi = Point2::new(x, y);
        let mut values = vec![0.0; basis.num_functions()];
        basis.populate_basis(&mut values, &xi);
        let sum: f64 = values.iter().sum();
        prop_assert!((sum - 1.0).abs() < 1e-12);

        let mut gradients = Matrix2xX::zeros(basis.num_functions());
        basis.populate_basis_gradients((&mut gradients).into(), &xi);
        let gradient_sum: f64 = gradients.column_sum().norm();
        prop_assert!(gradient_sum < 1e-11);
    }

    #[test]
    fn quadrilateral_basis_gradients_match_finite_differences(
        degree in 1usize..=3,
        x in -0.99..=0.99,
        y in -0.99..=0.99
    ) {
        let basis = QuadrilateralLagrangeBasis::<f64>::new(degree);
        let n = basis.num_functions();
        let h = 1e-6;
        let mut gradients = Matrix2xX::zeros(n);
        basis.populate_basis_gradients((&mut gradients).into(), &Point2::new(x, y));

        let mut plus = vec![0.0; n];
        let mut minus = vec![0.0; n];
        for axis in 0..2 {
            let mut offset = [0.0; 2];
            offset[axis] = h;
            basis.populate_basis(&mut plus, &Point2::new(x + offset[0], y + offset[1]));
            basis.populate_basis(&mut minus, &Point2::new(x - offset[0], y - offset[1]));
            for i in 0..n {
                let derivative = (plus[i] - minus[i]) / (2.0 * h);
                prop_assert!((gradients[(axis, i)] - derivative).abs() < 1e-6);
            }
        }
    }
}
