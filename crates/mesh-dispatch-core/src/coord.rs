use core::fmt;
use serde::{Deserialize, Serialize};

/// Integer address of a chunk (or a chunk-grid extent) in the 3D grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: u64,
    pub y: u64,
    pub z: u64,
}

impl ChunkCoord {
    pub const ORIGIN: Self = Self::new(0, 0, 0);

    pub const fn new(x: u64, y: u64, z: u64) -> Self {
        Self { x, y, z }
    }

    /// The three components as separate command-line arguments.
    pub fn to_args(self) -> [String; 3] {
        [self.x.to_string(), self.y.to_string(), self.z.to_string()]
    }

    /// Divides every component by `divisor`, rounding up.
    ///
    /// `divisor` must be non-zero.
    pub const fn div_ceil(self, divisor: u64) -> Self {
        Self {
            x: self.x.div_ceil(divisor),
            y: self.y.div_ceil(divisor),
            z: self.z.div_ceil(divisor),
        }
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl From<[u64; 3]> for ChunkCoord {
    fn from([x, y, z]: [u64; 3]) -> Self {
        Self::new(x, y, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_ceil_rounds_up_per_axis() {
        let bounds = ChunkCoord::new(1004, 697, 42);
        assert_eq!(bounds.div_ceil(2), ChunkCoord::new(502, 349, 21));
        assert_eq!(bounds.div_ceil(4), ChunkCoord::new(251, 175, 11));
        assert_eq!(bounds.div_ceil(8), ChunkCoord::new(126, 88, 6));
    }

    #[test]
    fn args_are_decimal_components() {
        assert_eq!(ChunkCoord::new(248, 0, 0).to_args(), ["248", "0", "0"]);
    }
}
