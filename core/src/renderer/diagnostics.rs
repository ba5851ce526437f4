//! Per-frame diagnostics: a log-once-per-error-kind guard so a GPU draw
//! error repeating every scanline doesn't flood the log buffer, plus the
//! renderer's last init-time error for the frontend to surface (§10, §7).

use std::collections::HashSet;

use crate::error::RendererError;

#[derive(Debug, Default)]
pub struct Diagnostics {
    logged_this_frame: HashSet<&'static str>,
    pub last_init_error: Option<RendererError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the per-frame log-once guard; call from `finish_frame`.
    pub fn start_frame(&mut self) {
        self.logged_this_frame.clear();
    }

    /// Logs `message` at `log::Level::Error` the first time `kind` is seen
    /// this frame; subsequent occurrences of the same `kind` are dropped.
    pub fn log_once(&mut self, kind: &'static str, message: &str) {
        if self.logged_this_frame.insert(kind) {
            log::error!("{message}");
        }
    }

    pub fn record_init_error(&mut self, err: RendererError) {
        log::error!("renderer init failed: {err}");
        self.last_init_error = Some(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_kind_logs_once_per_frame() {
        let mut diag = Diagnostics::new();
        diag.log_once("shader", "first");
        assert!(diag.logged_this_frame.contains("shader"));
        diag.log_once("shader", "second");
        assert_eq!(diag.logged_this_frame.len(), 1);
    }

    #[test]
    fn start_frame_clears_the_guard() {
        let mut diag = Diagnostics::new();
        diag.log_once("vram", "oops");
        diag.start_frame();
        assert!(diag.logged_this_frame.is_empty());
    }

    #[test]
    fn record_init_error_keeps_the_last_one() {
        let mut diag = Diagnostics::new();
        diag.record_init_error(RendererError::ResourceAlloc { resource: "texture" });
        assert!(diag.last_init_error.is_some());
    }
}
