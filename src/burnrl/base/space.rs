use serde::{Deserialize, Serialize};

/// Observation or action space of a vectorized environment.
///
/// Observations are always handed around flattened, so a `Box` space only
/// contributes its element count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Space {
    /// Continuous values with the given shape.
    Box { shape: Vec<usize> },
    /// One choice out of `n`.
    Discrete(usize),
    /// `n` independent binary choices.
    MultiBinary(usize),
}

impl Space {
    pub fn boxed(shape: impl Into<Vec<usize>>) -> Self {
        Space::Box {
            shape: shape.into(),
        }
    }

    /// Number of `f32` values one element of this space occupies.
    pub fn flat_len(&self) -> usize {
        match self {
            Space::Box { shape } => shape.iter().product(),
            Space::Discrete(_) => 1,
            Space::MultiBinary(n) => *n,
        }
    }
}
