use serde::{Deserialize, Serialize};

/// Parameters of one linear remap from `[old_min, old_max]` onto
/// `[new_min, new_max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeMap {
    pub old_min: f64,
    pub old_max: f64,
    pub new_min: f64,
    pub new_max: f64,
}

impl RangeMap {
    pub fn new(old_min: f64, old_max: f64, new_min: f64, new_max: f64) -> Self {
        Self {
            old_min,
            old_max,
            new_min,
            new_max,
        }
    }

    /// Maps `value` linearly into the target range.
    ///
    /// A degenerate source range (`old_min == old_max`) maps every value to
    /// the midpoint of the target range.
    pub fn apply(&self, value: f64) -> f64 {
        if self.old_max == self.old_min {
            return (self.new_min + self.new_max) / 2.0;
        }

        self.new_min
            + (value - self.old_min) * (self.new_max - self.new_min) / (self.old_max - self.old_min)
    }

    /// Returns `true` when `value` lies inside the target range, inclusive.
    pub fn contains_target(&self, value: f64) -> bool {
        let (lo, hi) = if self.new_min <= self.new_max {
            (self.new_min, self.new_max)
        } else {
            (self.new_max, self.new_min)
        };
        (lo..=hi).contains(&value)
    }
}

/// Free-function form of [`RangeMap::apply`].
pub fn map_to_range(value: f64, old_min: f64, old_max: f64, new_min: f64, new_max: f64) -> f64 {
    RangeMap::new(old_min, old_max, new_min, new_max).apply(value)
}
