//! Hardware rendering bridge.
//!
//! A module that renders on the GPU asks for a context with `SET_HW_RENDER`. The host
//! accepts the OpenGL family, installs a [`Renderer`] for the instance and back-fills the two
//! functions the module uses to reach it. Those functions are global slots like every other
//! callback and resolve their instance through `crate::runtime`.

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use tracing::{debug, error};

use crate::abi::{HwRenderCallback, PixelFormat, ProcAddress, hw_context};
use crate::runtime;
use crate::state::{Shared, lock};

/// GPU side of one core instance.
///
/// Methods are called with no core state or frame lock held, so they may query the `Core`.
/// They must not themselves call into the module's hardware render callbacks.
pub trait Renderer: Send {
    /// Framebuffer object the module should render into.
    fn current_framebuffer(&self) -> usize;

    /// Address of a graphics API function, or `None` if unknown.
    fn proc_address(&self, name: &CStr) -> ProcAddress;

    /// Read the finished frame back into `out` (`pitch * height` bytes) in `format`.
    fn snapshot(&mut self, format: PixelFormat, width: u32, height: u32, pitch: usize, out: &mut [u8]);
}

/// Context requested by the module.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HwRenderRequest {
    pub context_type: u32,
    pub version_major: u32,
    pub version_minor: u32,
    pub depth: bool,
    pub stencil: bool,
    pub bottom_left_origin: bool,
    pub debug_context: bool,
}

impl HwRenderRequest {
    pub(crate) fn from_raw(callback: &HwRenderCallback) -> Self {
        Self {
            context_type: callback.context_type,
            version_major: callback.version_major,
            version_minor: callback.version_minor,
            depth: callback.depth,
            stencil: callback.stencil,
            bottom_left_origin: callback.bottom_left_origin,
            debug_context: callback.debug_context,
        }
    }
}

pub type RendererFactory = Arc<dyn Fn(&HwRenderRequest) -> Box<dyn Renderer> + Send + Sync>;

/// Renderer used when the host has no GPU: draws nothing, exposes no functions.
#[derive(Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn current_framebuffer(&self) -> usize {
        0
    }

    fn proc_address(&self, _name: &CStr) -> ProcAddress {
        None
    }

    fn snapshot(&mut self, _: PixelFormat, _: u32, _: u32, _: usize, out: &mut [u8]) {
        out.fill(0);
    }
}

/// `SET_HW_RENDER`. Nothing changes when the context type is refused.
pub(crate) fn set_hw_render(shared: &Shared, callback: &mut HwRenderCallback) -> bool {
    match callback.context_type {
        t if hw_context::is_opengl(t) => {}
        hw_context::VULKAN => {
            error!("cannot set hardware render callback: Vulkan is not supported");
            return false;
        }
        other => {
            error!(
                context_type = other,
                "cannot set hardware render callback for unknown context type"
            );
            return false;
        }
    }

    let request = HwRenderRequest::from_raw(callback);
    let renderer = match &shared.config.renderer_factory {
        Some(factory) => factory(&request),
        None => Box::new(NullRenderer),
    };

    callback.get_current_framebuffer = Some(get_current_framebuffer);
    callback.get_proc_address = Some(get_proc_address);

    *lock(&shared.renderer) = Some(renderer);
    lock(&shared.state).hw_render = Some(*callback);
    debug!(?request, "hardware renderer installed");
    true
}

unsafe extern "C" fn get_current_framebuffer() -> usize {
    runtime::callback("get_current_framebuffer", 0, |shared| {
        lock(&shared.renderer)
            .as_ref()
            .map_or(0, |renderer| renderer.current_framebuffer())
    })
}

unsafe extern "C" fn get_proc_address(sym: *const c_char) -> ProcAddress {
    if sym.is_null() {
        return None;
    }
    runtime::callback("get_proc_address", None, |shared| {
        let name = unsafe { CStr::from_ptr(sym) };
        lock(&shared.renderer)
            .as_ref()
            .and_then(|renderer| renderer.proc_address(name))
    })
}
