//! Frame-buffer convenience layer for the video pipeline.
//!
//! Wraps allocate/touch with a typed payload so decode and render code can
//! reserve multi-frame buffers in the frame pool and read frames back by
//! buffer id and index.

use crate::block::{BlockId, Payload, Priority};
use crate::error::MemoryResult;
use crate::manager::{AllocationRequest, MemoryManager};
use crate::pool::PoolKind;
use cutforge_core::{FrameBuffer, PixelFormat, SharedFrameBuffer};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Tag carried by every block this layer allocates.
pub const VIDEO_FRAME_TAG: &str = "video_frame";

/// A run of video frames tracked as one block.
pub struct FrameBufferPayload {
    width: u32,
    height: u32,
    channels: u32,
    frames: Vec<SharedFrameBuffer>,
}

impl FrameBufferPayload {
    /// Number of frames in the buffer.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Buffer dimensions as (width, height, channels).
    pub fn dimensions(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.channels)
    }

    /// A shared handle to one frame.
    pub fn frame(&self, index: usize) -> Option<SharedFrameBuffer> {
        self.frames.get(index).cloned()
    }
}

impl Payload for FrameBufferPayload {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Pixel format for a channel count. Single-channel buffers are grayscale;
/// everything else is stored as RGBA (4 bytes per pixel).
fn format_for_channels(channels: u32) -> PixelFormat {
    match channels {
        1 => PixelFormat::Gray8,
        _ => PixelFormat::Rgba8,
    }
}

impl MemoryManager {
    /// Reserve a zeroed multi-frame buffer in the frame pool at High
    /// priority. The accounted size is the payload's true byte count,
    /// stride padding included.
    pub fn create_frame_buffer(
        &self,
        width: u32,
        height: u32,
        channels: u32,
        frame_count: u32,
    ) -> MemoryResult<BlockId> {
        let format = format_for_channels(channels);
        let frames: Vec<SharedFrameBuffer> = (0..frame_count)
            .map(|_| Arc::new(FrameBuffer::new(width, height, format)))
            .collect();
        let size: u64 = frames.iter().map(|f| f.memory_size() as u64).sum();

        let payload = Arc::new(FrameBufferPayload {
            width,
            height,
            channels,
            frames,
        });
        self.allocate(
            AllocationRequest::new(PoolKind::VideoFrames, size, payload)
                .with_priority(Priority::High)
                .with_description(format!(
                    "frame buffer {width}x{height}x{channels}x{frame_count}"
                ))
                .with_tag(VIDEO_FRAME_TAG)
                .with_tag("buffer"),
        )
    }

    /// Read one frame back from a frame buffer. Touches the block.
    /// `None` for an unknown id, a non-frame payload, or an index out of
    /// range.
    pub fn frame(&self, buffer: BlockId, index: usize) -> Option<SharedFrameBuffer> {
        let payload = self.touch(buffer)?;
        payload
            .as_any()
            .downcast_ref::<FrameBufferPayload>()?
            .frame(index)
    }

    /// Deallocate frame-tagged blocks that have not been touched for
    /// longer than `max_age`. Returns how many blocks were removed.
    pub fn sweep_stale_frames(&self, max_age: Duration) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let stale: Vec<(PoolKind, BlockId)> = state
            .pools
            .values()
            .flat_map(|pool| {
                pool.blocks()
                    .filter(|b| b.has_tag(VIDEO_FRAME_TAG))
                    .filter(|b| b.idle_secs() > max_age.as_secs_f64())
                    .map(move |b| (pool.kind(), b.id()))
            })
            .collect();

        let mut removed = 0usize;
        for (kind, id) in stale {
            if self
                .remove_block(state, kind, id, crate::events::FreeReason::Evicted)
                .is_some()
            {
                removed += 1;
            }
        }
        drop(guard);

        if removed > 0 {
            info!(removed, "swept stale frame buffers");
        }
        removed
    }
}
