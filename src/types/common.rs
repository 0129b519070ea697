//! Common geometric types shared by buffers and textures.

use bytemuck::{Pod, Zeroable};

/// A 3D extent in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    /// Create a new 3D extent.
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Create a 2D extent (depth = 1).
    pub const fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    /// Extent of the given mip level, clamped to at least one texel per axis.
    pub fn mip_extent(&self, mip: u32) -> Self {
        Self {
            width: (self.width >> mip).max(1),
            height: (self.height >> mip).max(1),
            depth: (self.depth >> mip).max(1),
        }
    }

    /// Number of mip levels in a full chain for this extent.
    pub fn full_mip_count(&self) -> u32 {
        let max_dim = self.width.max(self.height).max(self.depth).max(1);
        32 - max_dim.leading_zeros()
    }
}

/// An axis-aligned rectangle in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle.
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether this rectangle lies fully inside a `width` x `height` area.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|r| r <= width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= height)
    }
}

/// Align `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}
