//! Tiled Fan-Out
//!
//! [`Tiled`] walks a frame with a configurable tile geometry and stride,
//! handing each tile to the process function through the task fan-out. Only
//! tiles lying entirely inside the frame are emitted; a 100×100 frame walked
//! with 16×16 tiles at stride 16 yields exactly 36 of them, row-major.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::Status;
use crate::geometry::Rect;
use crate::task::Fanout;

/// Rectangular tile walker over a frame.
#[derive(Debug)]
pub struct Tiled {
    /// Tile geometry in pixels.
    pub tile_width: i32,
    pub tile_height: i32,
    /// Walk stride in pixels.
    pub stride_x: i32,
    pub stride_y: i32,
    fanout: Fanout,
    emitted: AtomicUsize,
}

impl Tiled {
    /// Creates a walker with the default macro-block geometry (16×16 tiles,
    /// stride 16).
    #[must_use]
    pub fn new(level: i32) -> Self {
        Self {
            tile_width: 16,
            tile_height: 16,
            stride_x: 16,
            stride_y: 16,
            fanout: Fanout::with_level(level),
            emitted: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_geometry(mut self, tile_width: i32, tile_height: i32) -> Self {
        self.tile_width = tile_width;
        self.tile_height = tile_height;
        self
    }

    #[must_use]
    pub fn with_stride(mut self, stride_x: i32, stride_y: i32) -> Self {
        self.stride_x = stride_x;
        self.stride_y = stride_y;
        self
    }

    /// Number of tiles emitted by the last walk.
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Walks `frame` and processes each fully-contained tile.
    pub fn start(&self, frame: Rect, process: impl Fn(Rect) -> Status + Sync) -> Status {
        self.emitted.store(0, Ordering::Relaxed);
        if self.tile_width <= 0
            || self.tile_height <= 0
            || self.stride_x <= 0
            || self.stride_y <= 0
        {
            return Status::Fault(crate::errors::Fault::InvalidRange);
        }

        let (tw, th) = (self.tile_width, self.tile_height);
        let (sx, sy) = (self.stride_x, self.stride_y);
        let (mut x, mut y) = (frame.x, frame.y);
        let emitted = &self.emitted;

        let next = move || {
            loop {
                if y + th > frame.y + frame.height {
                    return None;
                }
                if x + tw > frame.x + frame.width {
                    x = frame.x;
                    y += sy;
                    continue;
                }
                let roi = Rect::new(x, y, tw, th);
                x += sx;
                emitted.fetch_add(1, Ordering::Relaxed);
                return Some(roi);
            }
        };

        self.fanout.run(next, process)
    }

    /// The stored result of the last walk.
    #[must_use]
    pub fn wait(&self) -> Status {
        self.fanout.wait()
    }
}
