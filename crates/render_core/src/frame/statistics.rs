//! Frame counters

use std::fmt;

/// Counters of the last rendered frame plus a running frame total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStatistics {
    /// Frames submitted since initialization
    pub frames_rendered: u64,
    /// Pipelines that recorded a secondary in the last frame
    pub pipelines_executed: usize,
    /// Pipelines that opted out in the last frame
    pub pipelines_skipped: usize,
    /// Draw calls recorded in the last frame
    pub last_frame_draws: usize,
    /// Producer records skipped in the last frame
    pub last_frame_culled: usize,
}

impl FrameStatistics {
    pub(crate) fn begin_frame(&mut self) {
        self.pipelines_executed = 0;
        self.pipelines_skipped = 0;
        self.last_frame_draws = 0;
        self.last_frame_culled = 0;
    }
}

impl fmt::Display for FrameStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {}: {} pipelines, {} skipped, {} draws, {} culled",
            self.frames_rendered, self.pipelines_executed, self.pipelines_skipped, self.last_frame_draws, self.last_frame_culled
        )
    }
}
