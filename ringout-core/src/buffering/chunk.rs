//! Fixed-size chunk storage handed to the sink by the drain thread.

use crate::error::{DriverError, Result};
use crate::frame::SILENT_FRAME;

/// Allocate `frames` zeroed frames, reporting allocation failure instead of aborting.
pub(crate) fn alloc_frames(frames: usize) -> Result<Vec<u32>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(frames)
        .map_err(|_| DriverError::Allocation { frames })?;
    buf.resize(frames, SILENT_FRAME);
    Ok(buf)
}

/// One chunk of zero frames, submitted in place of audio on underrun.
///
/// Allocated once at driver init and never written afterwards.
#[derive(Debug)]
pub struct SilenceChunk {
    frames: Box<[u32]>,
}

impl SilenceChunk {
    pub fn new(chunk_frames: usize) -> Result<Self> {
        Ok(Self {
            frames: alloc_frames(chunk_frames)?.into_boxed_slice(),
        })
    }

    pub fn frames(&self) -> &[u32] {
        &self.frames
    }

    /// Number of frames in the chunk.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
