//! Element-local elimination, skeleton assembly and post-processing.
use crate::dense::DenseError;
use std::error::Error;
use std::fmt;

pub mod global;
pub mod local;
pub mod postprocess;

#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyError {
    /// A block that must be inverted on the given element is singular.
    SingularLocalMatrix { element: usize, source: DenseError },
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Trace values are required to recover the local solution, but were not provided.
    MissingTraceValues { element: usize },
    /// The global matrix has no entry at the given position.
    MissingSparsityEntry { row: usize, col: usize },
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingularLocalMatrix { element, .. } => write!(f, "Singular local matrix on element {}", element),
            Self::DimensionMismatch {
                context,
                expected,
                actual,
            } => write!(
                f,
                "Dimension mismatch in {}: expected {}, got {}",
                context, expected, actual
            ),
            Self::MissingTraceValues { element } => {
                write!(f, "No trace values available to reconstruct element {}", element)
            }
            Self::MissingSparsityEntry { row, col } => {
                write!(f, "Entry ({}, {}) is not part of the sparsity pattern", row, col)
            }
        }
    }
}

impl Error for AssemblyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SingularLocalMatrix { source, .. } => Some(source),
            _ => None,
        }
    }
}
