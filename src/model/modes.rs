//! Sampling configuration attached to every node.

use serde::{Deserialize, Serialize};

/// Interpolation used when the presentation layer scales the output.
///
/// Changing this does not invalidate rendered frames; it only affects how the
/// view samples them.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ViewInterpolation {
    #[default]
    Linear,
    Nearest,
}

/// Interpolation used when a downstream node samples this node's output.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Linear,
    Nearest,
}

/// What happens to samples outside the zero-to-one texture bounds.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Extend {
    #[default]
    Zero,
    Hold,
    Loop,
    Mirror,
}

/// Full sampler state for a node.
///
/// `mip_filter` and `compare_function` are persisted as the backend's raw
/// sampler values; the core never interprets them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sampling {
    pub view_interpolation: ViewInterpolation,
    pub interpolation: Interpolation,
    pub extend: Extend,
    pub mip_filter: u32,
    pub compare_function: u32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            view_interpolation: ViewInterpolation::Linear,
            interpolation: Interpolation::Linear,
            extend: Extend::Zero,
            // Raw sampler defaults: linear mip filter, compare never.
            mip_filter: 2,
            compare_function: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_tags_are_lowercase() {
        assert_eq!(
            serde_json::to_string(&Extend::Mirror).unwrap(),
            "\"mirror\""
        );
        let back: Interpolation = serde_json::from_str("\"nearest\"").unwrap();
        assert_eq!(back, Interpolation::Nearest);
    }
}
