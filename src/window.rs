//! Pixel-space windows and the block planner used for streamed copies.
//!
//! Merging large rasters band-by-band would require whole-band buffers, so
//! the blocked copy strategy walks a deterministic sequence of rectangular
//! windows instead. The planner emits windows in row-major order (a full
//! row of blocks left to right, then the next row), clipping the rightmost
//! and bottom blocks to the raster extent.
//!
//! # Example
//!
//! ```rust
//! use mergetiff::{plan_blocks, Window};
//!
//! let plan = plan_blocks(100, 50, 64);
//! let windows: Vec<Window> = plan.collect();
//! assert_eq!(windows.len(), 2);
//! assert_eq!(windows[0], Window::new(0, 0, 64, 50));
//! assert_eq!(windows[1], Window::new(64, 0, 36, 50));
//! ```

/// Default maximum block edge, in pixels, for blocked copies.
pub const DEFAULT_BLOCK_DIM: usize = 2048;

/// A rectangular pixel region within a raster.
///
/// Coordinates are 0-based with the origin at the top-left corner. Windows
/// produced by [`plan_blocks`] always lie entirely inside the raster they
/// were planned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Leftmost column of the window.
    pub x: usize,
    /// Topmost row of the window.
    pub y: usize,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
}

impl Window {
    /// Create a window from its top-left corner and dimensions.
    #[must_use]
    pub const fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Window covering an entire raster of the given dimensions.
    #[must_use]
    pub const fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Number of pixels covered.
    #[must_use]
    pub const fn area(&self) -> usize {
        self.width * self.height
    }

    /// True when the window covers no pixels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// One past the rightmost column.
    #[must_use]
    pub const fn x_end(&self) -> usize {
        self.x + self.width
    }

    /// One past the bottom row.
    #[must_use]
    pub const fn y_end(&self) -> usize {
        self.y + self.height
    }

    /// Intersection with another window, or `None` when they are disjoint.
    #[must_use]
    pub fn intersect(&self, other: &Window) -> Option<Window> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let x_end = self.x_end().min(other.x_end());
        let y_end = self.y_end().min(other.y_end());
        if x < x_end && y < y_end {
            Some(Window::new(x, y, x_end - x, y_end - y))
        } else {
            None
        }
    }

    /// True when `other` lies entirely inside this window.
    #[must_use]
    pub fn contains(&self, other: &Window) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x_end() <= self.x_end()
            && other.y_end() <= self.y_end()
    }
}

/// Plan the blocked traversal of a `width` x `height` raster.
///
/// Every returned window is at most `max_block_dim` on a side. The plan is
/// cheap to clone for a restartable traversal, and its length is known up
/// front. A zero-area raster yields an empty plan.
#[must_use]
pub fn plan_blocks(width: usize, height: usize, max_block_dim: usize) -> BlockPlan {
    let block = max_block_dim.max(1);
    BlockPlan {
        width,
        height,
        block,
        next_x: 0,
        next_y: 0,
        remaining: if width == 0 || height == 0 {
            0
        } else {
            width.div_ceil(block) * height.div_ceil(block)
        },
    }
}

/// Lazy row-major sequence of blocked-copy windows.
///
/// Produced by [`plan_blocks`].
#[derive(Debug, Clone)]
pub struct BlockPlan {
    width: usize,
    height: usize,
    block: usize,
    next_x: usize,
    next_y: usize,
    remaining: usize,
}

impl Iterator for BlockPlan {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.remaining == 0 {
            return None;
        }
        let w = self.block.min(self.width - self.next_x);
        let h = self.block.min(self.height - self.next_y);
        let window = Window::new(self.next_x, self.next_y, w, h);
        self.next_x += self.block;
        if self.next_x >= self.width {
            self.next_x = 0;
            self.next_y += self.block;
        }
        self.remaining -= 1;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for BlockPlan {}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collect a plan and verify the exact-tiling property: windows are
    /// in-bounds, within the size limit, mutually disjoint, and cover
    /// every pixel once.
    fn assert_exact_tiling(width: usize, height: usize, block: usize) {
        let windows: Vec<Window> = plan_blocks(width, height, block).collect();
        let mut covered = vec![0u8; width * height];
        for w in &windows {
            assert!(w.width >= 1 && w.width <= block);
            assert!(w.height >= 1 && w.height <= block);
            assert!(w.x_end() <= width && w.y_end() <= height);
            for row in w.y..w.y_end() {
                for col in w.x..w.x_end() {
                    covered[row * width + col] += 1;
                }
            }
        }
        assert!(covered.iter().all(|&c| c == 1), "coverage must be exactly 1");
    }

    #[test]
    fn test_exact_tiling_divisible() {
        assert_exact_tiling(128, 64, 32);
    }

    #[test]
    fn test_exact_tiling_with_edge_clipping() {
        assert_exact_tiling(100, 50, 32);
        assert_exact_tiling(33, 67, 32);
    }

    #[test]
    fn test_block_larger_than_raster() {
        let windows: Vec<Window> = plan_blocks(100, 50, 2048).collect();
        assert_eq!(windows, vec![Window::full(100, 50)]);
    }

    #[test]
    fn test_single_pixel_raster() {
        let windows: Vec<Window> = plan_blocks(1, 1, 256).collect();
        assert_eq!(windows, vec![Window::new(0, 0, 1, 1)]);
    }

    #[test]
    fn test_zero_area_raster_yields_empty_plan() {
        assert_eq!(plan_blocks(0, 50, 64).count(), 0);
        assert_eq!(plan_blocks(100, 0, 64).count(), 0);
    }

    #[test]
    fn test_row_major_order() {
        let windows: Vec<Window> = plan_blocks(70, 70, 32).collect();
        let expected = vec![
            Window::new(0, 0, 32, 32),
            Window::new(32, 0, 32, 32),
            Window::new(64, 0, 6, 32),
            Window::new(0, 32, 32, 32),
            Window::new(32, 32, 32, 32),
            Window::new(64, 32, 6, 32),
            Window::new(0, 64, 32, 6),
            Window::new(32, 64, 32, 6),
            Window::new(64, 64, 6, 6),
        ];
        assert_eq!(windows, expected);
    }

    #[test]
    fn test_plan_is_restartable() {
        let plan = plan_blocks(100, 100, 30);
        let first: Vec<Window> = plan.clone().collect();
        let second: Vec<Window> = plan.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_exact_size_iterator() {
        let mut plan = plan_blocks(100, 50, 32);
        assert_eq!(plan.len(), 4 * 2);
        plan.next();
        assert_eq!(plan.len(), 7);
    }

    #[test]
    fn test_window_intersect() {
        let a = Window::new(0, 0, 10, 10);
        let b = Window::new(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Some(Window::new(5, 5, 5, 5)));
        let c = Window::new(10, 10, 5, 5);
        assert_eq!(a.intersect(&c), None);
    }

    #[test]
    fn test_window_contains() {
        let outer = Window::new(0, 0, 100, 100);
        assert!(outer.contains(&Window::new(10, 10, 20, 20)));
        assert!(!outer.contains(&Window::new(90, 90, 20, 20)));
    }
}
