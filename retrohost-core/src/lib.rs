//! retrohost-core: host many libretro cores in one process.
//!
//! A libretro core exposes exactly one global slot per callback type (environment, video
//! refresh, audio sample, audio batch, input poll, input state) and none of them carries user
//! data. This crate still lets any number of [`Core`] instances coexist:
//! - every blocking call into a core runs with thread affinity for that instance
//!   (`crate::runtime`), so a callback can tell which instance it answers for;
//! - environment commands are translated into typed operations on the instance
//!   (`crate::environment`);
//! - video, audio and input callbacks feed the instance's frame buffer, events and controllers.
//!
//! Typical use:
//! ```no_run
//! use retrohost_core::{Core, CoreEvent, CoreOptions, Game};
//!
//! # fn main() -> retrohost_core::Result<()> {
//! let core = Core::open("snes9x_libretro.so", CoreOptions::new().system_directory("bios"))?;
//! core.subscribe_all(|event| {
//!     if let CoreEvent::Message { text, .. } = event {
//!         println!("{text}");
//!     }
//! });
//! core.boot(Some(&Game::from_path("game.sfc")))?;
//! core.run()?;
//! if let Some(frame) = core.acquire_frame() {
//!     let _rgba = frame.to_rgba8888();
//! }
//! # Ok(())
//! # }
//! ```

pub mod abi;
mod av;
mod environment;
mod error;
mod events;
mod input;
mod loader;
mod renderer;
mod runtime;
mod state;
mod variables;

#[cfg(test)]
mod testing;

use std::ffi::{CStr, c_char, c_void};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};

use tracing::{debug, info, warn};

use crate::abi::{GameGeometry, GameInfo, PixelFormat, SystemAvInfo, SystemInfo};
use crate::state::{CoreState, Shared, lock, path_to_c_string};

pub use crate::av::{FrameBuffer, FrameGuard, compute_pitch};
pub use crate::environment::language::{host_locales, language_for};
pub use crate::error::{Error, Result};
pub use crate::events::{CoreEvent, EventKind, ListenerId};
pub use crate::input::{Controller, InputDescriptorInfo, StateController};
pub use crate::loader::{CoreModule, SymbolSource};
pub use crate::renderer::{HwRenderRequest, NullRenderer, Renderer, RendererFactory};
pub use crate::state::{AvInfo, CoreOptions, Geometry, Speculation};
pub use crate::variables::{CoreOption, SetOptionError};

/// What a core reports about itself.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CoreInfo {
    pub library_name: String,
    pub library_version: String,
    /// Content file extensions, without dots.
    pub valid_extensions: Vec<String>,
    /// The core wants a path to the content instead of its bytes.
    pub need_fullpath: bool,
    pub block_extract: bool,
}

/// Content handed to `load_game`.
#[derive(Clone, Debug, Default)]
pub struct Game {
    path: Option<PathBuf>,
    data: Option<Vec<u8>>,
}

impl Game {
    /// Content the core reads itself.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            data: None,
        }
    }

    /// Content already in memory.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            path: None,
            data: Some(data),
        }
    }

    /// Content as the core prefers it: the path alone when it needs the full path, otherwise
    /// the path plus the file's bytes.
    pub fn load(path: impl Into<PathBuf>, info: &CoreInfo) -> io::Result<Self> {
        let path = path.into();
        let data = if info.need_fullpath {
            None
        } else {
            Some(std::fs::read(&path)?)
        };
        Ok(Self {
            path: Some(path),
            data,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }
}

fn owned_c_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: non-null strings from the core are NUL-terminated.
    let value = unsafe { CStr::from_ptr(ptr) };
    value.to_string_lossy().into_owned()
}

fn empty_av_info() -> SystemAvInfo {
    SystemAvInfo {
        geometry: GameGeometry {
            base_width: 0,
            base_height: 0,
            max_width: 0,
            max_height: 0,
            aspect_ratio: 0.0,
        },
        timing: libretro_sys::SystemTiming {
            fps: 0.0,
            sample_rate: 0.0,
        },
    }
}

/// One hosted core instance.
///
/// All blocking methods run the native call with affinity for this instance and wait for it.
/// Calls into one instance are serialized; different instances may be driven concurrently.
pub struct Core {
    shared: Arc<Shared>,
}

impl Core {
    /// Load a core from a shared library and host it.
    pub fn open(path: impl AsRef<Path>, options: CoreOptions) -> Result<Self> {
        Self::new(CoreModule::open(path)?, options)
    }

    /// Host an already resolved module and register the callbacks with it.
    pub fn new(module: impl Into<Arc<CoreModule>>, options: CoreOptions) -> Result<Self> {
        let core = Self {
            shared: Arc::new(Shared::new(module.into(), options)),
        };

        // The environment goes first: a core may issue commands from the other setters.
        core.call(|shared| unsafe {
            shared.module.set_environment(environment::environment);
        })?;
        core.call(|shared| unsafe {
            shared.module.set_video_refresh(av::video_refresh);
            shared.module.set_audio_sample(av::audio_sample);
            shared.module.set_audio_sample_batch(av::audio_sample_batch);
            shared.module.set_input_poll(input::input_poll);
            shared.module.set_input_state(input::input_state);
        })?;

        let info = core.system_info()?;
        info!(
            instance = core.id(),
            name = %info.library_name,
            version = %info.library_version,
            "core hosted"
        );
        Ok(core)
    }

    fn call<R: Send>(&self, f: impl FnOnce(&Shared) -> R + Send) -> Result<R> {
        runtime::call(&self.shared, f)
    }

    /// Process-unique identifier of this instance.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn module(&self) -> &CoreModule {
        &self.shared.module
    }

    pub fn system_info(&self) -> Result<CoreInfo> {
        let info = self.call(|shared| {
            let mut raw = SystemInfo {
                library_name: std::ptr::null(),
                library_version: std::ptr::null(),
                valid_extensions: std::ptr::null(),
                need_fullpath: false,
                block_extract: false,
            };
            unsafe { shared.module.get_system_info(&mut raw) };

            CoreInfo {
                library_name: owned_c_str(raw.library_name),
                library_version: owned_c_str(raw.library_version),
                valid_extensions: owned_c_str(raw.valid_extensions)
                    .split('|')
                    .filter(|ext| !ext.is_empty())
                    .map(str::to_string)
                    .collect(),
                need_fullpath: raw.need_fullpath,
                block_extract: raw.block_extract,
            }
        })?;

        lock(&self.shared.state).library_name = info.library_name.clone();
        Ok(info)
    }

    /// Ask the core for its audio/video parameters and renegotiate with them.
    pub fn system_av_info(&self) -> Result<AvInfo> {
        let raw = self.call(|shared| {
            let mut raw = empty_av_info();
            unsafe { shared.module.get_system_av_info(&mut raw) };
            raw
        })?;

        let mut state = lock(&self.shared.state);
        state.set_system_av_info(&raw);
        Ok(state.av)
    }

    /// Audio/video parameters as last negotiated.
    pub fn av_info(&self) -> AvInfo {
        lock(&self.shared.state).av
    }

    /// `retro_init`. Does nothing when already initialized.
    pub fn init(&self) -> Result<()> {
        if self.is_initiated() {
            return Ok(());
        }
        let initialized = self.call(|shared| {
            if lock(&shared.state).initiated {
                return false;
            }
            unsafe { shared.module.init() };
            lock(&shared.state).initiated = true;
            restore_port_devices(shared);
            true
        })?;
        if initialized {
            debug!(instance = self.id(), "core initialized");
        }
        Ok(())
    }

    /// Load content, or start without content when `game` is `None`.
    pub fn load_game(&self, game: Option<&Game>) -> Result<()> {
        let path = match game.and_then(Game::path) {
            Some(path) => {
                Some(path_to_c_string(path).ok_or_else(|| Error::InvalidPath(path.to_path_buf()))?)
            }
            None => None,
        };
        let data = game.and_then(Game::data);

        self.call(move |shared| {
            if !lock(&shared.state).initiated {
                return Err(Error::NotInitialized);
            }
            unload(shared);

            let path_ptr = path.as_ref().map_or(std::ptr::null(), |p| p.as_ptr());
            let info = GameInfo {
                path: path_ptr,
                data: data.map_or(std::ptr::null(), |d| d.as_ptr().cast::<c_void>()),
                size: data.map_or(0, <[u8]>::len),
                meta: std::ptr::null(),
            };
            // The no-content form passes null.
            let info_ptr: *const GameInfo = if game_is_empty(&info) {
                std::ptr::null()
            } else {
                &info
            };
            if !unsafe { shared.module.load_game(info_ptr) } {
                return Err(Error::LoadRefused);
            }
            lock(&shared.state).game_loaded = true;
            Ok(())
        })?
    }

    /// `init`, `load_game` and `system_av_info` in one go.
    pub fn boot(&self, game: Option<&Game>) -> Result<AvInfo> {
        self.init()?;
        self.load_game(game)?;
        self.system_av_info()
    }

    /// Run one frame.
    pub fn run(&self) -> Result<()> {
        self.call(|shared| {
            check_running(&lock(&shared.state))?;
            unsafe { shared.module.run() };
            Ok(())
        })?
    }

    pub fn reset(&self) -> Result<()> {
        self.call(|shared| {
            check_running(&lock(&shared.state))?;
            unsafe { shared.module.reset() };
            Ok(())
        })?
    }

    /// Does nothing when no game is loaded.
    pub fn unload_game(&self) -> Result<()> {
        if !self.is_game_loaded() {
            return Ok(());
        }
        self.call(unload)
    }

    /// `retro_deinit`, unloading the game first. Does nothing when not initialized.
    pub fn deinit(&self) -> Result<()> {
        if !self.is_initiated() {
            return Ok(());
        }
        let deinitialized = self.call(|shared| {
            if !lock(&shared.state).initiated {
                return false;
            }
            unload(shared);
            unsafe { shared.module.deinit() };
            shared.clear_session();
            true
        })?;
        if deinitialized {
            debug!(instance = self.id(), "core deinitialized");
        }
        Ok(())
    }

    pub fn is_initiated(&self) -> bool {
        lock(&self.shared.state).initiated
    }

    pub fn is_game_loaded(&self) -> bool {
        lock(&self.shared.state).game_loaded
    }

    /// Whether the core declared it can run without content.
    pub fn supports_no_game(&self) -> bool {
        lock(&self.shared.state).support_no_game
    }

    pub fn save_state(&self) -> Result<Vec<u8>> {
        self.call(|shared| {
            if !lock(&shared.state).initiated {
                return Err(Error::NotInitialized);
            }
            let size = unsafe { shared.module.serialize_size() };
            if size == 0 {
                return Err(Error::Serialization);
            }
            let mut data = vec![0u8; size];
            let saved = unsafe { shared.module.serialize(data.as_mut_ptr().cast(), size) };
            saved.then_some(data).ok_or(Error::Serialization)
        })?
    }

    pub fn load_state(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::Serialization);
        }
        self.call(|shared| {
            if !lock(&shared.state).initiated {
                return Err(Error::NotInitialized);
            }
            let restored = unsafe { shared.module.unserialize(data.as_ptr().cast(), data.len()) };
            restored.then_some(()).ok_or(Error::Serialization)
        })?
    }

    // Frame access.

    /// The frame buffer, or `None` before the first frame. Released when the guard drops.
    pub fn acquire_frame(&self) -> Option<FrameGuard<'_>> {
        let frame = lock(&self.shared.frame);
        (frame.serial() > 0).then(|| FrameGuard::new(frame))
    }

    /// Pixel format negotiated by the core, `None` if it sent a value the host does not know.
    pub fn pixel_format(&self) -> Option<PixelFormat> {
        PixelFormat::from_raw(lock(&self.shared.state).pixel_format)
    }

    /// Rotation requested by the core, in steps of 90 degrees counter-clockwise.
    pub fn rotation(&self) -> u32 {
        lock(&self.shared.state).rotation
    }

    pub fn speculation(&self) -> Speculation {
        lock(&self.shared.state).speculation
    }

    pub fn set_speculation(&self, speculation: Speculation) {
        lock(&self.shared.state).speculation = speculation;
    }

    // Hardware rendering.

    /// Context the core requested through `SET_HW_RENDER`, if one is active.
    pub fn hw_render_request(&self) -> Option<HwRenderRequest> {
        let state = lock(&self.shared.state);
        state.hw_render.as_ref().map(HwRenderRequest::from_raw)
    }

    /// Tell the core its hardware context was (re)created. Returns `false` when it asked for
    /// no context or has no reset function.
    pub fn hw_context_reset(&self) -> Result<bool> {
        self.call(|shared| {
            let reset = lock(&shared.state)
                .hw_render
                .and_then(|callback| callback.context_reset);
            let Some(reset) = reset else {
                return false;
            };
            unsafe { reset() };
            true
        })
    }

    // Core options.

    pub fn options(&self) -> Vec<CoreOption> {
        lock(&self.shared.state)
            .variables
            .iter()
            .cloned()
            .collect()
    }

    pub fn option(&self, key: &str) -> Option<CoreOption> {
        lock(&self.shared.state).variables.get(key).cloned()
    }

    /// Change the current value of a declared option. The core sees the change on its next
    /// `GET_VARIABLE_UPDATE`.
    ///
    /// Serialized with the other calls into the core: from another thread this waits for a
    /// running frame to finish.
    pub fn set_option(&self, key: &str, value: &str) -> Result<()> {
        self.call(|shared| lock(&shared.state).variables.set(key, value))??;
        Ok(())
    }

    // Input.

    /// Attach a controller to `port` and tell an initialized core about its device class.
    pub fn attach_controller(&self, port: u32, controller: Arc<dyn Controller>) -> Result<()> {
        let device = controller.device_type();
        lock(&self.shared.controllers).attach(port, controller);
        // An `init` that has not run yet restores the attached port itself.
        if !self.is_initiated() {
            return Ok(());
        }
        self.call(move |shared| {
            if lock(&shared.state).initiated {
                unsafe { shared.module.set_controller_port_device(port, device) };
            }
        })
    }

    pub fn detach_controller(&self, port: u32) -> Option<Arc<dyn Controller>> {
        lock(&self.shared.controllers).detach(port)
    }

    /// Controller answering for ports without an attached one.
    pub fn set_default_controller(&self, controller: Option<Arc<dyn Controller>>) {
        lock(&self.shared.controllers).set_default(controller);
    }

    pub fn input_descriptors(&self) -> Vec<InputDescriptorInfo> {
        lock(&self.shared.state).input_descriptors.clone()
    }

    /// Forward a key event to the core's keyboard callback. Returns `false` when the core
    /// registered none.
    pub fn send_key_event(
        &self,
        down: bool,
        keycode: u32,
        character: u32,
        modifiers: u16,
    ) -> Result<bool> {
        self.call(move |shared| {
            let Some(callback) = lock(&shared.state).keyboard else {
                return false;
            };
            unsafe { callback(down, keycode, character, modifiers) };
            true
        })
    }

    // Disk control.

    pub fn media_count(&self) -> Result<u32> {
        self.call(|shared| {
            let get_num_images = disk_control(shared)?
                .get_num_images
                .ok_or(Error::NoDiskControl)?;
            Ok(unsafe { get_num_images() })
        })?
    }

    pub fn current_media(&self) -> Result<u32> {
        self.call(|shared| {
            let get_image_index = disk_control(shared)?
                .get_image_index
                .ok_or(Error::NoDiskControl)?;
            Ok(unsafe { get_image_index() })
        })?
    }

    /// Swap media: open the tray, select `index`, close the tray.
    pub fn set_current_media(&self, index: u32) -> Result<()> {
        self.call(move |shared| {
            let disk = disk_control(shared)?;
            let (Some(get_num_images), Some(set_eject_state), Some(set_image_index)) = (
                disk.get_num_images,
                disk.set_eject_state,
                disk.set_image_index,
            ) else {
                return Err(Error::NoDiskControl);
            };

            let count = unsafe { get_num_images() };
            if index >= count {
                return Err(Error::InvalidMedia { index, count });
            }
            let selected = unsafe {
                set_eject_state(true);
                let selected = set_image_index(index);
                set_eject_state(false);
                selected
            };
            if selected {
                Ok(())
            } else {
                Err(Error::InvalidMedia { index, count })
            }
        })?
    }

    // Events.

    /// Call `listener` for every event of `kind`. Listeners run on the thread carrying the
    /// core call, with affinity for this instance.
    pub fn subscribe(
        &self,
        kind: EventKind,
        listener: impl Fn(&CoreEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.events.subscribe(Some(kind), listener)
    }

    pub fn subscribe_all(&self, listener: impl Fn(&CoreEvent) + Send + Sync + 'static) -> ListenerId {
        self.shared.events.subscribe(None, listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// Every event from now on, as a channel.
    pub fn events(&self) -> (ListenerId, mpsc::Receiver<CoreEvent>) {
        self.shared.events.channel()
    }
}

fn game_is_empty(info: &GameInfo) -> bool {
    info.path.is_null() && info.data.is_null()
}

// The helpers below run inside a core call, under the instance's call lock.

fn check_running(state: &CoreState) -> Result<()> {
    if !state.initiated {
        Err(Error::NotInitialized)
    } else if !state.game_loaded && !state.support_no_game {
        Err(Error::NoGameLoaded)
    } else {
        Ok(())
    }
}

/// `retro_unload_game` when a game is loaded.
fn unload(shared: &Shared) {
    if !lock(&shared.state).game_loaded {
        return;
    }
    unsafe { shared.module.unload_game() };
    lock(&shared.state).game_loaded = false;
}

/// Tell a freshly initialized core about the controllers attached before it.
fn restore_port_devices(shared: &Shared) {
    let ports: Vec<(u32, u32)> = lock(&shared.controllers)
        .ports()
        .map(|(port, controller)| (port, controller.device_type()))
        .collect();
    for (port, device) in ports {
        unsafe { shared.module.set_controller_port_device(port, device) };
    }
}

fn disk_control(shared: &Shared) -> Result<abi::DiskControlCallback> {
    lock(&shared.state)
        .disk_control
        .ok_or(Error::NoDiskControl)
}

impl Drop for Core {
    fn drop(&mut self) {
        if let Err(err) = self.deinit() {
            warn!(instance = self.id(), error = %err, "failed to deinitialize core on drop");
        }
    }
}
