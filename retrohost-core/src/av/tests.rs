use super::*;

use std::ffi::CStr;
use std::ptr;
use std::sync::{Arc, Weak};
use std::sync::mpsc::Receiver;

use crate::abi::{HwRenderCallback, ProcAddress, hw_context};
use crate::events::EventKind;
use crate::loader::CoreModule;
use crate::renderer::{self, HwRenderRequest, Renderer, RendererFactory};
use crate::state::CoreOptions;
use crate::testing::mock_core::MockCore;

const HW_FRAME: *const c_void = usize::MAX as *const c_void;

struct FillRenderer(u8);

impl Renderer for FillRenderer {
    fn current_framebuffer(&self) -> usize {
        1
    }

    fn proc_address(&self, _name: &CStr) -> ProcAddress {
        None
    }

    fn snapshot(&mut self, _: PixelFormat, _: u32, _: u32, _: usize, out: &mut [u8]) {
        out.fill(self.0);
    }
}

fn shared_with(options: CoreOptions) -> Arc<Shared> {
    let module = CoreModule::from_source(&MockCore).expect("mock core resolves");
    let shared = Arc::new(Shared::new(Arc::new(module), options));
    {
        let mut state = lock(&shared.state);
        state.pixel_format = PixelFormat::Rgb565 as u32;
        state.av.sample_rate = 44100.0;
    }
    shared
}

fn shared() -> Arc<Shared> {
    shared_with(CoreOptions::new())
}

fn install_renderer(shared: &Shared) {
    let mut request = HwRenderCallback {
        context_type: hw_context::OPENGL_CORE,
        context_reset: None,
        get_current_framebuffer: None,
        get_proc_address: None,
        depth: false,
        stencil: false,
        bottom_left_origin: true,
        version_major: 3,
        version_minor: 3,
        cache_context: false,
        context_destroy: None,
        debug_context: false,
    };
    assert!(renderer::set_hw_render(shared, &mut request));
}

fn kinds(rx: &Receiver<CoreEvent>) -> Vec<EventKind> {
    rx.try_iter().map(|event| event.kind()).collect()
}

#[test]
fn missing_pitch_is_computed_from_width() {
    let shared = shared();
    let pixels = vec![0xabu8; 640 * 240];

    assert!(unsafe { refresh_frame(&shared, pixels.as_ptr().cast(), 320, 240, 0) });

    let frame = lock(&shared.frame);
    assert_eq!(frame.format(), PixelFormat::Rgb565);
    assert_eq!((frame.width(), frame.height()), (320, 240));
    assert_eq!(frame.pitch(), 640);
    assert_eq!(frame.pixels().len(), 640 * 240);
    assert!(frame.pixels().iter().all(|&b| b == 0xab));
    assert_eq!(frame.serial(), 1);
}

#[test]
fn explicit_pitch_is_kept() {
    let shared = shared();
    let pixels = vec![1u8; 1024 * 4];

    assert!(unsafe { refresh_frame(&shared, pixels.as_ptr().cast(), 320, 4, 1024) });
    assert_eq!(lock(&shared.frame).pitch(), 1024);
}

#[test]
fn null_frame_is_a_duplicate() {
    let shared = shared();
    assert!(!unsafe { refresh_frame(&shared, ptr::null(), 320, 240, 640) });
    assert_eq!(lock(&shared.frame).serial(), 0);
}

#[test]
fn hardware_sentinel_without_renderer_is_rejected() {
    let shared = shared();
    assert!(!unsafe { refresh_frame(&shared, HW_FRAME, 320, 240, 640) });
    assert_eq!(lock(&shared.frame).serial(), 0);
}

#[test]
fn unknown_pixel_format_drops_the_frame() {
    let shared = shared();
    lock(&shared.state).pixel_format = 9;
    let pixels = [0u8; 16];
    assert!(!unsafe { refresh_frame(&shared, pixels.as_ptr().cast(), 2, 2, 4) });
    assert_eq!(lock(&shared.frame).serial(), 0);
}

#[test]
fn renderer_frames_are_read_back() {
    let factory: RendererFactory =
        Arc::new(|_: &HwRenderRequest| Box::new(FillRenderer(0x5a)) as Box<dyn Renderer>);
    let shared = shared_with(CoreOptions::new().renderer_factory(factory));
    install_renderer(&shared);

    for data in [HW_FRAME, ptr::null()] {
        // The module's pitch is ignored for GPU frames.
        assert!(unsafe { refresh_frame(&shared, data, 16, 8, 4096) });
    }

    let frame = lock(&shared.frame);
    assert_eq!(frame.pitch(), 32);
    assert_eq!(frame.pixels().len(), 32 * 8);
    assert!(frame.pixels().iter().all(|&b| b == 0x5a));
    assert_eq!(frame.serial(), 2);
}

/// Fills the frame with the serial of the frame it replaces, read from the instance.
struct SerialRenderer(Weak<Shared>);

impl Renderer for SerialRenderer {
    fn current_framebuffer(&self) -> usize {
        0
    }

    fn proc_address(&self, _name: &CStr) -> ProcAddress {
        None
    }

    fn snapshot(&mut self, _: PixelFormat, _: u32, _: u32, _: usize, out: &mut [u8]) {
        let Some(shared) = self.0.upgrade() else {
            return;
        };
        assert!(PixelFormat::from_raw(lock(&shared.state).pixel_format).is_some());
        let serial = lock(&shared.frame).serial();
        out.fill(serial as u8 + 0x10);
    }
}

#[test]
fn renderer_may_lock_state_and_frame_while_snapshotting() {
    let shared = shared();
    install_renderer(&shared);
    *lock(&shared.renderer) = Some(Box::new(SerialRenderer(Arc::downgrade(&shared))));

    assert!(unsafe { refresh_frame(&shared, HW_FRAME, 4, 2, 0) });
    assert!(unsafe { refresh_frame(&shared, HW_FRAME, 4, 2, 0) });

    let frame = lock(&shared.frame);
    assert_eq!(frame.serial(), 2);
    assert!(frame.pixels().iter().all(|&b| b == 0x11));
}

#[test]
fn cpu_frame_while_rendering_on_gpu_is_rejected() {
    let shared = shared();
    install_renderer(&shared);
    let pixels = [0xffu8; 32];
    assert!(!unsafe { refresh_frame(&shared, pixels.as_ptr().cast(), 4, 4, 8) });
    assert_eq!(lock(&shared.frame).serial(), 0);
}

#[test]
fn silent_speculation_updates_without_notifying() {
    let shared = shared_with(CoreOptions::new().speculation(Speculation::Silent));
    let pixels = [7u8; 8];
    assert!(!unsafe { refresh_frame(&shared, pixels.as_ptr().cast(), 2, 2, 4) });

    let frame = lock(&shared.frame);
    assert_eq!(frame.serial(), 1);
    assert_eq!(frame.pixels(), &[7u8; 8]);
}

#[test]
fn skip_speculation_ignores_video() {
    let shared = shared_with(CoreOptions::new().speculation(Speculation::Skip));
    let pixels = [7u8; 8];
    assert!(!unsafe { refresh_frame(&shared, pixels.as_ptr().cast(), 2, 2, 4) });
    assert_eq!(lock(&shared.frame).serial(), 0);
}

#[test]
fn video_refresh_emits_frame_ready() {
    let shared = shared();
    let (_, rx) = shared.events.channel();
    let pixels = vec![3u8; 8];

    runtime::call(&shared, move |_| unsafe {
        video_refresh(pixels.as_ptr().cast(), 2, 2, 0);
        video_refresh(ptr::null(), 2, 2, 0);
    })
    .unwrap();

    assert_eq!(kinds(&rx), [EventKind::FrameReady]);
}

#[test]
fn audio_is_forwarded_with_the_sample_rate() {
    let shared = shared();
    let (_, rx) = shared.events.channel();

    let accepted = runtime::call(&shared, |_| unsafe {
        audio_sample(1, -1);
        let batch = [10i16, 11, 20, 21, 30, 31];
        audio_sample_batch(batch.as_ptr(), 3)
    })
    .unwrap();

    assert_eq!(accepted, 3);
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        events,
        [
            CoreEvent::AudioOutput {
                samples: vec![1, -1],
                rate: 44100.0
            },
            CoreEvent::AudioOutput {
                samples: vec![10, 11, 20, 21, 30, 31],
                rate: 44100.0
            },
        ]
    );
}

#[test]
fn audio_without_sample_rate_is_dropped() {
    let shared = shared();
    lock(&shared.state).av.sample_rate = 0.0;
    let (_, rx) = shared.events.channel();

    let accepted = runtime::call(&shared, |_| unsafe {
        audio_sample(1, 1);
        let batch = [0i16; 4];
        audio_sample_batch(batch.as_ptr(), 2)
    })
    .unwrap();

    assert_eq!(accepted, 0);
    assert!(kinds(&rx).is_empty());
}

#[test]
fn speculative_audio_is_consumed_silently() {
    for speculation in [Speculation::Silent, Speculation::Skip] {
        let shared = shared_with(CoreOptions::new().speculation(speculation));
        let (_, rx) = shared.events.channel();

        let accepted = runtime::call(&shared, |_| unsafe {
            audio_sample(1, 1);
            let batch = [0i16; 8];
            audio_sample_batch(batch.as_ptr(), 4)
        })
        .unwrap();

        assert_eq!(accepted, 4, "{speculation:?}");
        assert!(kinds(&rx).is_empty(), "{speculation:?}");
    }
}

#[test]
fn callbacks_outside_a_core_call_are_inert() {
    let batch = [0i16; 2];
    assert_eq!(unsafe { audio_sample_batch(batch.as_ptr(), 1) }, 0);
    unsafe { video_refresh(ptr::null(), 0, 0, 0) };
}
