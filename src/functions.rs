//! Analytic problem data: manufactured solutions, convection fields and derived source terms.
//!
//! The variants are plain data so that they can be selected in configuration files, and every
//! evaluation is a pure function of the point.
use crate::nalgebra::{Point2, Vector2};
use crate::Real;
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Centers of the Gaussian bumps.
const BUMP_CENTERS: [[f64; 2]; 3] = [[-0.5, 0.5], [-0.5, -0.5], [0.5, -0.5]];
const BUMP_WIDTH: f64 = 1.0 / 5.0;

fn convert<T: Real>(value: f64) -> T {
    T::from_f64(value).expect("f64 must fit in T")
}

/// Exact solutions with known derivatives, used to drive and verify the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManufacturedSolution {
    /// A sum of three normalized Gaussian bumps of width `1/5`, centered at `(-1/2, 1/2)`,
    /// `(-1/2, -1/2)` and `(1/2, -1/2)`.
    GaussianBumps,
    /// `u(x) = constant + gradient . x`.
    Linear { constant: f64, gradient: [f64; 2] },
    /// `u(x) = sin(k pi x) sin(k pi y)`.
    Trigonometric { frequency: f64 },
}

impl Default for ManufacturedSolution {
    fn default() -> Self {
        Self::GaussianBumps
    }
}

impl ManufacturedSolution {
    fn bump_normalization<T: Real>() -> T {
        let normalization = 1.0 / ((2.0 * PI).sqrt() * BUMP_WIDTH);
        convert(normalization * normalization)
    }

    pub fn value<T: Real>(&self, x: &Point2<T>) -> T {
        match self {
            Self::GaussianBumps => {
                let w2: T = convert(BUMP_WIDTH * BUMP_WIDTH);
                let sum = BUMP_CENTERS.iter().fold(T::zero(), |acc, center| {
                    let d = x.coords - Vector2::new(convert(center[0]), convert(center[1]));
                    acc + (-d.norm_squared() / w2).exp()
                });
                sum * Self::bump_normalization::<T>()
            }
            Self::Linear { constant, gradient } => {
                convert::<T>(*constant) + x.coords.dot(&Vector2::new(convert(gradient[0]), convert(gradient[1])))
            }
            Self::Trigonometric { frequency } => {
                let k: T = convert(*frequency * PI);
                (k * x.x).sin() * (k * x.y).sin()
            }
        }
    }

    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn gradient<T: Real>(&self, x: &Point2<T>) -> Vector2<T> {
        match self {
            Self::GaussianBumps => {
                let w2: T = convert(BUMP_WIDTH * BUMP_WIDTH);
                let sum = BUMP_CENTERS.iter().fold(Vector2::zeros(), |acc, center| {
                    let d = x.coords - Vector2::new(convert(center[0]), convert(center[1]));
                    acc + d * (-2.0 / w2 * (-d.norm_squared() / w2).exp())
                });
                sum * Self::bump_normalization::<T>()
            }
            Self::Linear { gradient, .. } => Vector2::new(convert(gradient[0]), convert(gradient[1])),
            Self::Trigonometric { frequency } => {
                let k: T = convert(*frequency * PI);
                Vector2::new(
                    k * (k * x.x).cos() * (k * x.y).sin(),
                    k * (k * x.x).sin() * (k * x.y).cos(),
                )
            }
        }
    }

    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn laplacian<T: Real>(&self, x: &Point2<T>) -> T {
        match self {
            Self::GaussianBumps => {
                let w2: T = convert(BUMP_WIDTH * BUMP_WIDTH);
                let sum = BUMP_CENTERS.iter().fold(T::zero(), |acc, center| {
                    let d = x.coords - Vector2::new(convert(center[0]), convert(center[1]));
                    let r2 = d.norm_squared();
                    acc + (-4.0 + 4.0 * r2 / w2) / w2 * (-r2 / w2).exp()
                });
                sum * Self::bump_normalization::<T>()
            }
            Self::Linear { .. } => T::zero(),
            Self::Trigonometric { frequency } => {
                let k: T = convert(*frequency * PI);
                -2.0 * k * k * self.value(x)
            }
        }
    }
}

/// Divergence-free convection fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvectionField {
    /// Rigid rotation `c(x, y) = (y, -x)`.
    Rotation,
    Uniform { velocity: [f64; 2] },
}

impl Default for ConvectionField {
    fn default() -> Self {
        Self::Rotation
    }
}

impl ConvectionField {
    pub fn value<T: Real>(&self, x: &Point2<T>) -> Vector2<T> {
        match self {
            Self::Rotation => Vector2::new(x.y, -x.x),
            Self::Uniform { velocity } => Vector2::new(convert(velocity[0]), convert(velocity[1])),
        }
    }
}

/// The data of the problem `-Δu + c . ∇u = f`, derived from a manufactured solution.
///
/// With the flux defined as `q = -∇u`, the source term is `f = -Δu + c . ∇u`, which holds
/// because every convection field is divergence-free.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemData {
    pub solution: ManufacturedSolution,
    pub convection: ConvectionField,
}

impl ProblemData {
    pub fn new(solution: ManufacturedSolution, convection: ConvectionField) -> Self {
        Self { solution, convection }
    }

    pub fn solution<T: Real>(&self, x: &Point2<T>) -> T {
        self.solution.value(x)
    }

    pub fn solution_gradient<T: Real>(&self, x: &Point2<T>) -> Vector2<T> {
        self.solution.gradient(x)
    }

    /// The exact flux `q = -∇u`.
    pub fn flux<T: Real>(&self, x: &Point2<T>) -> Vector2<T> {
        -self.solution.gradient(x)
    }

    pub fn convection<T: Real>(&self, x: &Point2<T>) -> Vector2<T> {
        self.convection.value(x)
    }

    pub fn source<T: Real>(&self, x: &Point2<T>) -> T {
        -self.solution.laplacian(x) + self.convection(x).dot(&self.solution_gradient(x))
    }

    /// Boundary data on Neumann faces, which is the exact solution value.
    pub fn neumann_value<T: Real>(&self, x: &Point2<T>) -> T {
        self.solution(x)
    }
}
