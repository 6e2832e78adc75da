//! Merge tree configuration
//!
//! Options deserialize from JSON with per-field defaults, so a host can pass
//! only the knobs it cares about.
//!
//! ```rust
//! use mergetree_core::MergeTreeOptions;
//!
//! let options = MergeTreeOptions::from_json(r#"{ "max_children": 16 }"#).unwrap();
//! assert_eq!(options.max_children, 16);
//! assert!(options.merge_adjacent);
//! ```

use crate::error::{MergeError, Result};
use serde::{Deserialize, Serialize};

/// Tuning knobs for the segment tree and compaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeTreeOptions {
    /// Maximum children per block before it splits
    pub max_children: usize,

    /// Minimum children per non-root block; compaction repacks below this
    pub min_children: usize,

    /// Coalesce adjacent acknowledged segments during compaction
    pub merge_adjacent: bool,

    /// Run compaction automatically whenever the window's min seq advances
    pub compact_on_advance: bool,
}

impl Default for MergeTreeOptions {
    fn default() -> Self {
        Self {
            max_children: 8,
            min_children: 2,
            merge_adjacent: true,
            compact_on_advance: true,
        }
    }
}

impl MergeTreeOptions {
    /// Parse options from a JSON document, filling unspecified fields
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Check block sizing invariants
    ///
    /// A split produces two halves of `max_children / 2` and `max_children / 2 + 1`,
    /// so `min_children` must not exceed the smaller half.
    pub fn validate(&self) -> Result<()> {
        if self.max_children < 4 {
            return Err(MergeError::InvalidOptions(format!(
                "max_children must be at least 4, got {}",
                self.max_children
            )));
        }
        if self.min_children == 0 || self.min_children > self.max_children / 2 {
            return Err(MergeError::InvalidOptions(format!(
                "min_children must be in 1..={}, got {}",
                self.max_children / 2,
                self.min_children
            )));
        }
        Ok(())
    }
}
