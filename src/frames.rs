//! Mouth-frame discovery
//!
//! Frames live under a base directory as 4-digit zero-padded sequential
//! indices starting at `0001.png`. Discovery probes each candidate index
//! up to a generous ceiling and tallies the hits; the tally is resolved to
//! a final, immutable count before the pipeline starts listening.

use std::path::{Path, PathBuf};

use tokio::task::JoinSet;
use tracing::{debug, info};

/// Highest frame index probed during discovery.
pub const DEFAULT_PROBE_LIMIT: usize = 60;

/// An ordered set of mouth frames, indexed 1..=count.
///
/// The count is a raw success tally, so a gap in the numbering (0001 and
/// 0003 present, 0002 missing) overcounts past the gap. That approximation
/// is accepted; a missing probe is never an error.
#[derive(Debug, Clone)]
pub struct FrameSet {
    base_dir: PathBuf,
    discovered: usize,
}

impl FrameSet {
    /// A frame set with an already-known tally.
    pub fn new(base_dir: impl Into<PathBuf>, discovered: usize) -> Self {
        Self {
            base_dir: base_dir.into(),
            discovered,
        }
    }

    /// Probe `base_dir` for sequentially numbered frames.
    ///
    /// Each probe is an independent filesystem lookup; they run
    /// concurrently and the set resolves once all have completed.
    pub async fn discover(base_dir: impl Into<PathBuf>, probe_limit: usize) -> Self {
        let base_dir = base_dir.into();

        let mut probes = JoinSet::new();
        for index in 1..=probe_limit {
            let path = frame_path(&base_dir, index);
            probes.spawn(async move {
                let hit = tokio::fs::metadata(&path)
                    .await
                    .map(|meta| meta.is_file())
                    .unwrap_or(false);
                if !hit {
                    debug!(path = %path.display(), "frame probe miss");
                }
                hit
            });
        }

        let mut discovered = 0;
        while let Some(result) = probes.join_next().await {
            if matches!(result, Ok(true)) {
                discovered += 1;
            }
        }

        info!(dir = %base_dir.display(), discovered, "frame discovery finished");

        Self {
            base_dir,
            discovered,
        }
    }

    /// Number of frames actually found during discovery. May be zero.
    pub fn discovered(&self) -> usize {
        self.discovered
    }

    /// Effective frame count. At least one, so the mapper always has a rest
    /// pose to show even when nothing was found.
    pub fn count(&self) -> usize {
        self.discovered.max(1)
    }

    /// Path of the 1-based frame `index`.
    pub fn frame_path(&self, index: usize) -> PathBuf {
        frame_path(&self.base_dir, index)
    }
}

fn frame_path(base_dir: &Path, index: usize) -> PathBuf {
    base_dir.join(format!("{index:04}.png"))
}
