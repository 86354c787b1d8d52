//! Module loading.
//!
//! Responsibilities:
//! - Open a native core with `libloading` and resolve every entry point by name.
//! - Host a statically linked core through the same path (`SymbolSource`).
//! - Check the API version the module reports.
//!
//! Notes:
//! - The call-through methods on [`CoreModule`] are `unsafe`: the module will call back
//!   into the global slots, so they must only run with affinity established
//!   (see `crate::runtime`).

use std::ffi::{c_uint, c_void};
use std::fmt;
use std::path::{Path, PathBuf};

use libloading::Library;
use libretro_sys::{
    AudioSampleBatchFn, AudioSampleFn, EnvironmentFn, InputPollFn, InputStateFn, VideoRefreshFn,
};
use tracing::debug;

use crate::abi::{self, GameInfo, SystemAvInfo, SystemInfo, symbols};
use crate::error::{Error, Result};

/// Resolves exported symbols by name.
pub trait SymbolSource {
    /// Address of the exported symbol, or `None` if the module does not export it.
    fn symbol(&self, name: &'static str) -> Option<*const c_void>;

    /// File the module was loaded from, when there is one.
    fn path(&self) -> Option<&Path> {
        None
    }
}

struct LibrarySource<'a> {
    library: &'a Library,
    path: &'a Path,
}

impl SymbolSource for LibrarySource<'_> {
    fn symbol(&self, name: &'static str) -> Option<*const c_void> {
        // SAFETY: the symbol is read as an address only; its type is fixed by the caller.
        let symbol = unsafe { self.library.get::<*const c_void>(name.as_bytes()) }.ok()?;
        let address = *symbol;
        (!address.is_null()).then_some(address)
    }

    fn path(&self) -> Option<&Path> {
        Some(self.path)
    }
}

macro_rules! resolve {
    ($source:expr, $name:expr) => {{
        let address = $source.symbol($name).ok_or(Error::MissingSymbol($name))?;
        // SAFETY: the exported symbol has the signature the ABI gives it.
        unsafe { std::mem::transmute::<*const c_void, _>(address) }
    }};
}

/// A loaded native core and its raw entry points.
pub struct CoreModule {
    path: Option<PathBuf>,

    api_version: unsafe extern "C" fn() -> c_uint,
    init: unsafe extern "C" fn(),
    deinit: unsafe extern "C" fn(),
    get_system_info: unsafe extern "C" fn(info: *mut SystemInfo),
    get_system_av_info: unsafe extern "C" fn(info: *mut SystemAvInfo),
    run: unsafe extern "C" fn(),
    reset: unsafe extern "C" fn(),
    load_game: unsafe extern "C" fn(game: *const GameInfo) -> bool,
    unload_game: unsafe extern "C" fn(),
    set_controller_port_device: unsafe extern "C" fn(port: c_uint, device: c_uint),
    serialize_size: unsafe extern "C" fn() -> usize,
    serialize: unsafe extern "C" fn(data: *mut c_void, size: usize) -> bool,
    unserialize: unsafe extern "C" fn(data: *const c_void, size: usize) -> bool,

    set_environment: unsafe extern "C" fn(callback: EnvironmentFn),
    set_video_refresh: unsafe extern "C" fn(callback: VideoRefreshFn),
    set_audio_sample: unsafe extern "C" fn(callback: AudioSampleFn),
    set_audio_sample_batch: unsafe extern "C" fn(callback: AudioSampleBatchFn),
    set_input_poll: unsafe extern "C" fn(callback: InputPollFn),
    set_input_state: unsafe extern "C" fn(callback: InputStateFn),

    // Keeps the code behind the entry points mapped. Declared last so it drops last.
    _library: Option<Library>,
}

impl fmt::Debug for CoreModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreModule")
            .field("path", &self.path)
            .field("dynamic", &self._library.is_some())
            .finish_non_exhaustive()
    }
}

impl CoreModule {
    /// Load a core from a shared library.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initializers; that is inherent to hosting a core.
        let library = unsafe { Library::new(path) }.map_err(|source| Error::Library {
            path: path.to_path_buf(),
            source,
        })?;

        let mut module = Self::from_source(&LibrarySource {
            library: &library,
            path,
        })?;
        module._library = Some(library);
        debug!(path = %path.display(), "core module loaded");
        Ok(module)
    }

    /// Build a module from already-mapped code, such as a statically linked core.
    pub fn from_source(source: &impl SymbolSource) -> Result<Self> {
        let module = Self {
            path: source.path().map(Path::to_path_buf),
            api_version: resolve!(source, symbols::API_VERSION),
            init: resolve!(source, symbols::INIT),
            deinit: resolve!(source, symbols::DEINIT),
            get_system_info: resolve!(source, symbols::GET_SYSTEM_INFO),
            get_system_av_info: resolve!(source, symbols::GET_SYSTEM_AV_INFO),
            run: resolve!(source, symbols::RUN),
            reset: resolve!(source, symbols::RESET),
            load_game: resolve!(source, symbols::LOAD_GAME),
            unload_game: resolve!(source, symbols::UNLOAD_GAME),
            set_controller_port_device: resolve!(source, symbols::SET_CONTROLLER_PORT_DEVICE),
            serialize_size: resolve!(source, symbols::SERIALIZE_SIZE),
            serialize: resolve!(source, symbols::SERIALIZE),
            unserialize: resolve!(source, symbols::UNSERIALIZE),
            set_environment: resolve!(source, symbols::SET_ENVIRONMENT),
            set_video_refresh: resolve!(source, symbols::SET_VIDEO_REFRESH),
            set_audio_sample: resolve!(source, symbols::SET_AUDIO_SAMPLE),
            set_audio_sample_batch: resolve!(source, symbols::SET_AUDIO_SAMPLE_BATCH),
            set_input_poll: resolve!(source, symbols::SET_INPUT_POLL),
            set_input_state: resolve!(source, symbols::SET_INPUT_STATE),
            _library: None,
        };

        // `retro_api_version` never calls back, so it is safe to ask without affinity.
        // SAFETY: resolved above.
        let found = unsafe { (module.api_version)() };
        if found != abi::API_VERSION {
            return Err(Error::ApiVersionMismatch {
                expected: abi::API_VERSION,
                found,
            });
        }

        Ok(module)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // Call-through functions. Every one of them may re-enter the global callbacks.

    pub unsafe fn api_version(&self) -> c_uint {
        unsafe { (self.api_version)() }
    }

    pub unsafe fn init(&self) {
        unsafe { (self.init)() }
    }

    pub unsafe fn deinit(&self) {
        unsafe { (self.deinit)() }
    }

    pub unsafe fn get_system_info(&self, info: *mut SystemInfo) {
        unsafe { (self.get_system_info)(info) }
    }

    pub unsafe fn get_system_av_info(&self, info: *mut SystemAvInfo) {
        unsafe { (self.get_system_av_info)(info) }
    }

    pub unsafe fn run(&self) {
        unsafe { (self.run)() }
    }

    pub unsafe fn reset(&self) {
        unsafe { (self.reset)() }
    }

    pub unsafe fn load_game(&self, game: *const GameInfo) -> bool {
        unsafe { (self.load_game)(game) }
    }

    pub unsafe fn unload_game(&self) {
        unsafe { (self.unload_game)() }
    }

    pub unsafe fn set_controller_port_device(&self, port: c_uint, device: c_uint) {
        unsafe { (self.set_controller_port_device)(port, device) }
    }

    pub unsafe fn serialize_size(&self) -> usize {
        unsafe { (self.serialize_size)() }
    }

    pub unsafe fn serialize(&self, data: *mut c_void, size: usize) -> bool {
        unsafe { (self.serialize)(data, size) }
    }

    pub unsafe fn unserialize(&self, data: *const c_void, size: usize) -> bool {
        unsafe { (self.unserialize)(data, size) }
    }

    pub unsafe fn set_environment(&self, callback: EnvironmentFn) {
        unsafe { (self.set_environment)(callback) }
    }

    pub unsafe fn set_video_refresh(&self, callback: VideoRefreshFn) {
        unsafe { (self.set_video_refresh)(callback) }
    }

    pub unsafe fn set_audio_sample(&self, callback: AudioSampleFn) {
        unsafe { (self.set_audio_sample)(callback) }
    }

    pub unsafe fn set_audio_sample_batch(&self, callback: AudioSampleBatchFn) {
        unsafe { (self.set_audio_sample_batch)(callback) }
    }

    pub unsafe fn set_input_poll(&self, callback: InputPollFn) {
        unsafe { (self.set_input_poll)(callback) }
    }

    pub unsafe fn set_input_state(&self, callback: InputStateFn) {
        unsafe { (self.set_input_state)(callback) }
    }
}
