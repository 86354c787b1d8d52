//! Per-instance state.
//!
//! This module owns the host-side state that the global callbacks reach through
//! `crate::runtime`.
//!
//! Locking model:
//! - `call_lock` serializes blocking calls into one core; it is held for a whole native call.
//! - `state`, `frame` and `controllers` are short-lived locks taken by callbacks and host
//!   queries. When both are needed, `state` is taken before `frame`.
//! - `renderer` is held only around calls into the host's [`Renderer`] and is never taken
//!   while `state` or `frame` is held.
//! - Lifecycle flags and the function pointers the core registered are read inside the
//!   native call, under `call_lock`.
//! - Events are emitted after every state lock is released.
//!
//! A poisoned lock is recovered: the data behind it is plain values that stay consistent
//! between statements.

use std::ffi::{CString, c_char};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::abi::{DiskControlCallback, GameGeometry, HwRenderCallback, KeyboardEventFn, SystemAvInfo};
use crate::av::FrameBuffer;
use crate::environment::language;
use crate::events::EventHub;
use crate::input::{Controllers, InputDescriptorInfo};
use crate::loader::CoreModule;
use crate::renderer::{Renderer, RendererFactory};
use crate::variables::Variables;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How the frame/audio bridge behaves while the host runs frames ahead speculatively.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Speculation {
    /// Normal operation.
    #[default]
    Off,
    /// Video still updates the frame buffer but `FrameReady` is not emitted. Audio is dropped.
    Silent,
    /// Video and audio are ignored.
    Skip,
}

/// Host-side configuration of one core instance.
#[derive(Clone, Default)]
pub struct CoreOptions {
    system_directory: Option<PathBuf>,
    content_directory: Option<PathBuf>,
    save_directory: Option<PathBuf>,
    overscan: bool,
    locales: Option<Vec<String>>,
    speculation: Speculation,
    renderer_factory: Option<RendererFactory>,
    option_overrides: Vec<(String, String)>,
    worker_stack_size: Option<usize>,
}

impl fmt::Debug for CoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreOptions")
            .field("system_directory", &self.system_directory)
            .field("content_directory", &self.content_directory)
            .field("save_directory", &self.save_directory)
            .field("overscan", &self.overscan)
            .field("locales", &self.locales)
            .field("speculation", &self.speculation)
            .field("renderer_factory", &self.renderer_factory.is_some())
            .field("option_overrides", &self.option_overrides)
            .field("worker_stack_size", &self.worker_stack_size)
            .finish()
    }
}

impl CoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory for firmware/BIOS files (`GET_SYSTEM_DIRECTORY`).
    pub fn system_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.system_directory = Some(path.into());
        self
    }

    /// Directory for core assets (`GET_CONTENT_DIRECTORY`).
    pub fn content_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.content_directory = Some(path.into());
        self
    }

    /// Directory for save data (`GET_SAVE_DIRECTORY`).
    pub fn save_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_directory = Some(path.into());
        self
    }

    pub fn overscan(mut self, overscan: bool) -> Self {
        self.overscan = overscan;
        self
    }

    /// Host locale names in preference order, e.g. `["fr_FR", "en_US"]`.
    /// Defaults to the process locale.
    pub fn locales<I, S>(mut self, locales: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locales = Some(locales.into_iter().map(Into::into).collect());
        self
    }

    pub fn speculation(mut self, speculation: Speculation) -> Self {
        self.speculation = speculation;
        self
    }

    /// Builds the renderer installed by a successful `SET_HW_RENDER`.
    pub fn renderer_factory(mut self, factory: RendererFactory) -> Self {
        self.renderer_factory = Some(factory);
        self
    }

    /// Value to select when the core declares `key`, instead of its first allowed value.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.option_overrides.push((key.into(), value.into()));
        self
    }

    /// Stack size of the threads that carry calls into the core. Cores with deep recursion
    /// may need more than the platform default.
    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }
}

/// Immutable host configuration in the form handed to the module.
pub(crate) struct HostConfig {
    pub system_directory: Option<CString>,
    pub content_directory: Option<CString>,
    pub save_directory: Option<CString>,
    pub libretro_path: Option<CString>,
    pub overscan: bool,
    pub locales: Vec<String>,
    pub renderer_factory: Option<RendererFactory>,
}

impl HostConfig {
    pub(crate) fn dir_ptr(dir: &Option<CString>) -> *const c_char {
        dir.as_ref().map_or(std::ptr::null(), |dir| dir.as_ptr())
    }
}

pub(crate) fn path_to_c_string(path: &Path) -> Option<CString> {
    CString::new(path.to_str()?).ok()
}

/// Geometry as last negotiated with the core.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Geometry {
    pub base_width: u32,
    pub base_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Effective aspect ratio. Derived from the base size when the core declares none.
    pub aspect_ratio: f32,
}

/// Audio/video parameters reported by the core.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AvInfo {
    pub geometry: Geometry,
    pub fps: f64,
    pub sample_rate: f64,
}

/// Mutable state of one instance, behind `Shared::state`.
pub(crate) struct CoreState {
    pub initiated: bool,
    pub game_loaded: bool,
    /// Log domain for messages from the core.
    pub library_name: String,

    // Stored verbatim; interpreted by the video bridge.
    pub pixel_format: u32,
    pub rotation: u32,
    pub av: AvInfo,

    pub variables: Variables,
    pub input_descriptors: Vec<InputDescriptorInfo>,
    pub keyboard: Option<KeyboardEventFn>,
    pub disk_control: Option<DiskControlCallback>,
    pub support_no_game: bool,

    pub hw_render: Option<HwRenderCallback>,

    pub speculation: Speculation,
}

impl CoreState {
    fn new(speculation: Speculation, overrides: &[(String, String)]) -> Self {
        let mut variables = Variables::default();
        for (key, value) in overrides {
            variables.set_override(key, value);
        }

        Self {
            initiated: false,
            game_loaded: false,
            library_name: String::new(),
            pixel_format: crate::abi::PixelFormat::Argb1555 as u32,
            rotation: 0,
            av: AvInfo::default(),
            variables,
            input_descriptors: Vec::new(),
            keyboard: None,
            disk_control: None,
            support_no_game: false,
            hw_render: None,
            speculation,
        }
    }

    /// Renegotiate timing and geometry (`SET_SYSTEM_AV_INFO`, `get_system_av_info`).
    pub fn set_system_av_info(&mut self, info: &SystemAvInfo) {
        self.av.fps = info.timing.fps;
        self.av.sample_rate = info.timing.sample_rate;
        self.set_geometry(&info.geometry);
    }

    /// Renegotiate geometry only (`SET_GEOMETRY`).
    pub fn set_geometry(&mut self, geometry: &GameGeometry) {
        self.av.geometry = Geometry {
            base_width: geometry.base_width,
            base_height: geometry.base_height,
            max_width: geometry.max_width,
            max_height: geometry.max_height,
            aspect_ratio: effective_aspect_ratio(
                geometry.aspect_ratio,
                geometry.base_width,
                geometry.base_height,
            ),
        };
    }

    /// Forget everything the core negotiated during its initialized lifetime.
    pub fn clear_session(&mut self) {
        self.hw_render = None;
        self.keyboard = None;
        self.disk_control = None;
        self.initiated = false;
        self.game_loaded = false;
    }
}

fn effective_aspect_ratio(declared: f32, base_width: u32, base_height: u32) -> f32 {
    if declared > 0.0 {
        declared
    } else if base_height > 0 {
        base_width as f32 / base_height as f32
    } else {
        0.0
    }
}

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a global callback may need to reach.
pub(crate) struct Shared {
    pub id: u64,
    pub module: Arc<CoreModule>,
    pub config: HostConfig,
    pub call_lock: Mutex<()>,
    pub state: Mutex<CoreState>,
    pub frame: Mutex<FrameBuffer>,
    pub controllers: Mutex<Controllers>,
    pub events: EventHub,
    /// Installed by `SET_HW_RENDER`.
    pub renderer: Mutex<Option<Box<dyn Renderer>>>,
    /// Zero keeps the platform default.
    pub worker_stack_size: AtomicUsize,
}

impl Shared {
    pub(crate) fn new(module: Arc<CoreModule>, options: CoreOptions) -> Self {
        let dir = |path: &Option<PathBuf>| path.as_deref().and_then(path_to_c_string);
        let config = HostConfig {
            system_directory: dir(&options.system_directory),
            content_directory: dir(&options.content_directory),
            save_directory: dir(&options.save_directory),
            libretro_path: module.path().and_then(path_to_c_string),
            overscan: options.overscan,
            locales: options.locales.unwrap_or_else(language::host_locales),
            renderer_factory: options.renderer_factory,
        };

        Self {
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            module,
            config,
            call_lock: Mutex::new(()),
            state: Mutex::new(CoreState::new(
                options.speculation,
                &options.option_overrides,
            )),
            frame: Mutex::new(FrameBuffer::default()),
            controllers: Mutex::new(Controllers::default()),
            events: EventHub::default(),
            renderer: Mutex::new(None),
            worker_stack_size: AtomicUsize::new(options.worker_stack_size.unwrap_or(0)),
        }
    }

    /// Forget the session state and drop the renderer.
    pub(crate) fn clear_session(&self) {
        lock(&self.state).clear_session();
        *lock(&self.renderer) = None;
    }
}
