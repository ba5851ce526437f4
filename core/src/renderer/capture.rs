//! Per-scanline capture and the deferred-batch cursor (§4.3).
//!
//! Each scanline, the emulator calls `Capture::draw_scanline`, which:
//! 1. checks whether any dirty bit forces a batch flush,
//! 2. applies pending dirty register state to the derived background/
//!    window/sprite models,
//! 3. records this scanline's scroll/affine/window history,
//! 4. advances each affine background's reference point,
//! 5. and leaves the GPU-side flush decision to the caller via
//!    `pending_flush()` — the batch itself (`firstY`) is only reset once
//!    `finish_frame` (or an explicit flush) actually uploads it.

use super::background::Background;
use super::dirty::DirtySet;
use super::window::WindowState;

#[derive(Debug)]
pub struct Capture {
    /// First scanline of the batch not yet flushed to the GPU.
    first_y: usize,
    /// Most recent scanline passed to `draw_scanline`, exclusive upper
    /// bound of the pending batch once flushed.
    last_y: Option<usize>,
    pending_flush: bool,
}

impl Capture {
    pub fn new() -> Self {
        Self {
            first_y: 0,
            last_y: None,
            pending_flush: false,
        }
    }

    pub fn first_y(&self) -> usize {
        self.first_y
    }

    pub fn pending_flush(&self) -> bool {
        self.pending_flush
    }

    /// Returns the `[start, end)` scanline range the caller should flush
    /// right now, or `None` if there is nothing pending. Consumed by
    /// `Renderer::draw_scanline`/`finish_frame` to actually perform the
    /// GPU upload this batch exists for (§4.4).
    pub fn should_flush(&self) -> Option<(usize, usize)> {
        if self.pending_flush {
            self.last_y.map(|last| (self.first_y, last + 1))
        } else {
            None
        }
    }

    /// Call at the start of a new frame (y == 0): clears the batch cursor
    /// and any pending-flush state left over from the previous frame.
    pub fn start_frame(&mut self) {
        self.first_y = 0;
        self.last_y = None;
        self.pending_flush = false;
    }

    /// Marks the current batch as flushed up to (not including) `y`,
    /// resetting the deferred cursor to start a new batch there.
    pub fn mark_flushed(&mut self, y: usize) {
        self.first_y = y;
        self.pending_flush = false;
    }

    /// Runs the per-scanline capture step for scanline `y`. Dirty state
    /// not yet applied to derived models is the caller's responsibility to
    /// apply before calling this (register writes land directly in the
    /// `RegisterFile`/`Background`/`WindowState` side tables as they occur);
    /// this step only decides whether a mid-frame flush is required and
    /// records history.
    pub fn draw_scanline(
        &mut self,
        y: usize,
        dirty: &DirtySet,
        backgrounds: &mut [Background; 4],
        window: &mut WindowState,
    ) {
        // A register or VRAM/palette/OAM write since the last flush forces
        // the accumulated batch to be drawn before this scanline's state
        // changes are allowed to apply to the GPU-visible side.
        if dirty.any() && y > self.first_y {
            self.pending_flush = true;
        }
        self.last_y = Some(y);

        for bg in backgrounds.iter_mut() {
            bg.record_scanline(y);
            bg.advance_affine_reference();
        }
        window.record_scanline(y);
    }
}

impl Default for Capture {
    fn default() -> Self {
        Self::new()
    }
}
