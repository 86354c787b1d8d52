//! Video and audio bridge.
//!
//! The module pushes each finished frame through `video_refresh` and its audio through
//! `audio_sample` / `audio_sample_batch`, all from inside `run()`.
//!
//! - Video: CPU frames are copied into the instance's [`FrameBuffer`]. When a hardware
//!   renderer is active the module passes null (or the hardware sentinel) and the host reads
//!   the frame back from the renderer instead, with no state or frame lock held. `FrameReady`
//!   is emitted once the buffer lock is released.
//! - Audio: samples are forwarded as `AudioOutput` with the negotiated sample rate; nothing is
//!   forwarded while the sample rate is not positive.
//!
//! While the host runs frames ahead ([`Speculation`]), `Silent` keeps the frame buffer current
//! without notifying and drops audio, and `Skip` ignores both. In both modes a batch reports
//! every frame as accepted.

mod framebuffer;

pub use framebuffer::{FrameBuffer, FrameGuard};

use std::ffi::{c_uint, c_void};
use std::slice;

use tracing::error;

use crate::abi::{PixelFormat, is_hw_frame_buffer_valid};
use crate::events::CoreEvent;
use crate::runtime;
use crate::state::{Shared, Speculation, lock};

/// Row size in bytes when the module does not give one.
pub fn compute_pitch(width: u32, format: PixelFormat) -> usize {
    width as usize * format.bytes_per_pixel()
}

pub(crate) unsafe extern "C" fn video_refresh(
    data: *const c_void,
    width: c_uint,
    height: c_uint,
    pitch: usize,
) {
    runtime::callback("video_refresh", (), |shared| {
        if unsafe { refresh_frame(shared, data, width, height, pitch) } {
            shared.events.emit(CoreEvent::FrameReady);
        }
    })
}

/// Update the frame buffer. Returns whether `FrameReady` should be emitted.
unsafe fn refresh_frame(
    shared: &Shared,
    data: *const c_void,
    width: u32,
    height: u32,
    pitch: usize,
) -> bool {
    let (speculation, format, aspect_ratio) = {
        let state = lock(&shared.state);
        if state.speculation == Speculation::Skip {
            return false;
        }
        let Some(format) = PixelFormat::from_raw(state.pixel_format) else {
            error!(
                format = state.pixel_format,
                "cannot take a frame in an unknown pixel format"
            );
            return false;
        };
        (state.speculation, format, state.av.geometry.aspect_ratio)
    };
    let gpu_frame = data.is_null() || is_hw_frame_buffer_valid(data);

    let mut slot = lock(&shared.renderer);
    if let Some(renderer) = slot.as_mut() {
        if !gpu_frame {
            error!("video data must be null or the hardware frame sentinel when rendering on the GPU");
            return false;
        }
        let pitch = compute_pitch(width, format);
        let mut pixels = vec![0; pitch.saturating_mul(height as usize)];
        renderer.snapshot(format, width, height, pitch, &mut pixels);
        drop(slot);
        lock(&shared.frame).write(format, width, height, pitch, aspect_ratio, &pixels);
    } else {
        drop(slot);
        if data.is_null() {
            // Duplicate of the previous frame.
            return false;
        }
        if gpu_frame {
            error!("hardware frame received without a hardware renderer");
            return false;
        }

        let pitch = if pitch == 0 {
            compute_pitch(width, format)
        } else {
            pitch
        };
        let len = pitch.saturating_mul(height as usize);
        // SAFETY: the module hands over `height` rows of `pitch` bytes.
        let src = unsafe { slice::from_raw_parts(data.cast::<u8>(), len) };
        lock(&shared.frame).write(format, width, height, pitch, aspect_ratio, src);
    }

    speculation == Speculation::Off
}

/// Sample rate to forward audio at, `None` when audio is not forwarded.
fn audio_rate(shared: &Shared) -> Option<f64> {
    let state = lock(&shared.state);
    let rate = state.av.sample_rate;
    (state.speculation == Speculation::Off && rate > 0.0).then_some(rate)
}

pub(crate) unsafe extern "C" fn audio_sample(left: i16, right: i16) {
    runtime::callback("audio_sample", (), |shared| {
        if let Some(rate) = audio_rate(shared) {
            shared.events.emit(CoreEvent::AudioOutput {
                samples: vec![left, right],
                rate,
            });
        }
    })
}

pub(crate) unsafe extern "C" fn audio_sample_batch(data: *const i16, frames: usize) -> usize {
    runtime::callback("audio_sample_batch", 0, |shared| {
        let (speculation, rate) = {
            let state = lock(&shared.state);
            (state.speculation, state.av.sample_rate)
        };
        if speculation != Speculation::Off {
            return frames;
        }
        if rate <= 0.0 || data.is_null() {
            return 0;
        }

        // SAFETY: `frames` interleaved stereo frames.
        let samples = unsafe { slice::from_raw_parts(data, frames * 2) }.to_vec();
        shared.events.emit(CoreEvent::AudioOutput { samples, rate });
        frames
    })
}

#[cfg(test)]
mod tests;
