//! Frame and resolution types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Output dimensions of a node.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The computed output of a node: an opaque RGBA-ish byte buffer.
///
/// Pixel data is shared, so handing the same frame to every queued completion
/// of a merged render is a pointer copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Arc<Vec<u8>>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: Arc::new(data),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_shares_data() {
        let a = Frame::new(2, 2, vec![255; 16]);
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(b.resolution(), Resolution::new(2, 2));
        assert_eq!(b.data().len(), 16);
    }

    #[test]
    fn resolution_display() {
        assert_eq!(Resolution::new(1920, 1080).to_string(), "1920x1080");
    }
}
