//! Native module ABI.
//!
//! This module defines the ABI contract between:
//! - **Host**: `retrohost-core` (this crate)
//! - **Module**: a dynamically loaded core exposing the libretro entry points
//!
//! ## Callback model
//! The module keeps exactly one global slot per callback type (environment, video refresh,
//! audio sample, audio sample batch, input poll, input state). None of the slots carries a
//! user-data parameter, so the host recovers "which instance" through `crate::runtime`.
//!
//! ## Where the types come from
//! - Entry point signatures and the plain info structures (`SystemInfo`, `SystemAvInfo`,
//!   `GameGeometry`, `GameInfo`) are taken from `libretro-sys`.
//! - Environment payloads are declared here as `#[repr(C)]` structures. Enumerated fields
//!   (context type, pixel format, log level...) are kept as raw integers so an unknown value
//!   coming from the module is a rejected request instead of an invalid Rust enum.
//!
//! ## ABI Stability
//! Environment opcode values match the historical numbering exactly, including the
//! [`env::EXPERIMENTAL`] and [`env::PRIVATE`] marker bits. Modules encode them literally.

use std::ffi::{c_char, c_uint, c_void};

pub use libretro_sys::{GameGeometry, GameInfo, SystemAvInfo, SystemInfo};

/// API version the host implements. Modules reporting anything else are refused.
pub const API_VERSION: c_uint = libretro_sys::API_VERSION;

/// Exported symbol names resolved from a module.
pub mod symbols {
    pub const API_VERSION: &str = "retro_api_version";
    pub const INIT: &str = "retro_init";
    pub const DEINIT: &str = "retro_deinit";
    pub const GET_SYSTEM_INFO: &str = "retro_get_system_info";
    pub const GET_SYSTEM_AV_INFO: &str = "retro_get_system_av_info";
    pub const RUN: &str = "retro_run";
    pub const RESET: &str = "retro_reset";
    pub const LOAD_GAME: &str = "retro_load_game";
    pub const UNLOAD_GAME: &str = "retro_unload_game";
    pub const SET_CONTROLLER_PORT_DEVICE: &str = "retro_set_controller_port_device";
    pub const SERIALIZE_SIZE: &str = "retro_serialize_size";
    pub const SERIALIZE: &str = "retro_serialize";
    pub const UNSERIALIZE: &str = "retro_unserialize";

    // Callback setters.
    pub const SET_ENVIRONMENT: &str = "retro_set_environment";
    pub const SET_VIDEO_REFRESH: &str = "retro_set_video_refresh";
    pub const SET_AUDIO_SAMPLE: &str = "retro_set_audio_sample";
    pub const SET_AUDIO_SAMPLE_BATCH: &str = "retro_set_audio_sample_batch";
    pub const SET_INPUT_POLL: &str = "retro_set_input_poll";
    pub const SET_INPUT_STATE: &str = "retro_set_input_state";
}

/// Environment opcodes.
///
/// The marker bits do not change an opcode's identity; dispatch matches the full literal value.
pub mod env {
    /// Marks opcodes whose payload may still change.
    pub const EXPERIMENTAL: u32 = 0x10000;
    /// Marks opcodes private to a specific frontend.
    pub const PRIVATE: u32 = 0x20000;

    pub const SET_ROTATION: u32 = 1;
    pub const GET_OVERSCAN: u32 = 2;
    pub const GET_CAN_DUPE: u32 = 3;
    pub const SET_MESSAGE: u32 = 6;
    pub const SHUTDOWN: u32 = 7;
    pub const SET_PERFORMANCE_LEVEL: u32 = 8;
    pub const GET_SYSTEM_DIRECTORY: u32 = 9;
    pub const SET_PIXEL_FORMAT: u32 = 10;
    pub const SET_INPUT_DESCRIPTORS: u32 = 11;
    pub const SET_KEYBOARD_CALLBACK: u32 = 12;
    pub const SET_DISK_CONTROL_INTERFACE: u32 = 13;
    pub const SET_HW_RENDER: u32 = 14;
    pub const GET_VARIABLE: u32 = 15;
    pub const SET_VARIABLES: u32 = 16;
    pub const GET_VARIABLE_UPDATE: u32 = 17;
    pub const SET_SUPPORT_NO_GAME: u32 = 18;
    pub const GET_LIBRETRO_PATH: u32 = 19;
    pub const SET_FRAME_TIME_CALLBACK: u32 = 21;
    pub const SET_AUDIO_CALLBACK: u32 = 22;
    pub const GET_RUMBLE_INTERFACE: u32 = 23;
    pub const GET_INPUT_DEVICE_CAPABILITIES: u32 = 24;
    pub const GET_SENSOR_INTERFACE: u32 = 25 | EXPERIMENTAL;
    pub const GET_CAMERA_INTERFACE: u32 = 26 | EXPERIMENTAL;
    pub const GET_LOG_INTERFACE: u32 = 27;
    pub const GET_PERF_INTERFACE: u32 = 28;
    pub const GET_LOCATION_INTERFACE: u32 = 29;
    /// Also known as `GET_CORE_ASSETS_DIRECTORY`.
    pub const GET_CONTENT_DIRECTORY: u32 = 30;
    pub const GET_SAVE_DIRECTORY: u32 = 31;
    pub const SET_SYSTEM_AV_INFO: u32 = 32;
    pub const SET_PROC_ADDRESS_CALLBACK: u32 = 33;
    pub const SET_SUBSYSTEM_INFO: u32 = 34;
    pub const SET_CONTROLLER_INFO: u32 = 35;
    pub const SET_MEMORY_MAPS: u32 = 36 | EXPERIMENTAL;
    pub const SET_GEOMETRY: u32 = 37;
    pub const GET_USERNAME: u32 = 38;
    pub const GET_LANGUAGE: u32 = 39;
    pub const GET_CURRENT_SOFTWARE_FRAMEBUFFER: u32 = 40 | EXPERIMENTAL;
    pub const GET_HW_RENDER_INTERFACE: u32 = 41 | EXPERIMENTAL;
    pub const SET_SUPPORT_ACHIEVEMENTS: u32 = 42 | EXPERIMENTAL;
    pub const SET_HW_RENDER_CONTEXT_NEGOTIATION_INTERFACE: u32 = 43 | EXPERIMENTAL;
    pub const SET_SERIALIZATION_QUIRKS: u32 = 44;
}

/// Video frame pointer meaning "the frame was rendered on the GPU".
pub fn is_hw_frame_buffer_valid(data: *const c_void) -> bool {
    data as usize == usize::MAX
}

/// Pixel formats a module may negotiate with `SET_PIXEL_FORMAT`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    /// 0RGB1555, native endian. The default until the module negotiates another one.
    Argb1555 = 0,
    /// XRGB8888, native endian.
    Xrgb8888 = 1,
    /// RGB565, native endian.
    Rgb565 = 2,
}

impl PixelFormat {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(PixelFormat::Argb1555),
            1 => Some(PixelFormat::Xrgb8888),
            2 => Some(PixelFormat::Rgb565),
            _ => None,
        }
    }

    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Argb1555 | PixelFormat::Rgb565 => 2,
            PixelFormat::Xrgb8888 => 4,
        }
    }
}

/// Languages reported by `GET_LANGUAGE`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Language {
    English = 0,
    Japanese = 1,
    French = 2,
    Spanish = 3,
    German = 4,
    Italian = 5,
    Dutch = 6,
    PortugueseBrazil = 7,
    PortuguesePortugal = 8,
    Russian = 9,
    Korean = 10,
    ChineseTraditional = 11,
    ChineseSimplified = 12,
    Esperanto = 13,
    Polish = 14,
    Vietnamese = 15,
    Arabic = 16,
}

impl Language {
    pub const DEFAULT: Language = Language::English;
}

/// Hardware context types requested through `SET_HW_RENDER`.
pub mod hw_context {
    pub const NONE: u32 = 0;
    pub const OPENGL: u32 = 1;
    pub const OPENGLES2: u32 = 2;
    pub const OPENGL_CORE: u32 = 3;
    pub const OPENGLES3: u32 = 4;
    pub const OPENGLES_VERSION: u32 = 5;
    pub const VULKAN: u32 = 6;

    /// OpenGL family contexts the host can bridge.
    pub fn is_opengl(context_type: u32) -> bool {
        matches!(
            context_type,
            OPENGL | OPENGLES2 | OPENGL_CORE | OPENGLES3 | OPENGLES_VERSION
        )
    }
}

/// Log levels used by the module log interface.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(LogLevel::Debug),
            1 => Some(LogLevel::Info),
            2 => Some(LogLevel::Warn),
            3 => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Rumble motors addressed by `set_rumble_state`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RumbleEffect {
    Strong = 0,
    Weak = 1,
}

impl RumbleEffect {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(RumbleEffect::Strong),
            1 => Some(RumbleEffect::Weak),
            _ => None,
        }
    }
}

/// `GET_VARIABLE` / `SET_VARIABLES` element.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Variable {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// `SET_MESSAGE` payload.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Message {
    pub msg: *const c_char,
    pub frames: c_uint,
}

/// `SET_INPUT_DESCRIPTORS` element. The array ends with a null `description`.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct InputDescriptor {
    pub port: c_uint,
    pub device: c_uint,
    pub index: c_uint,
    pub id: c_uint,
    pub description: *const c_char,
}

pub type KeyboardEventFn =
    unsafe extern "C" fn(down: bool, keycode: c_uint, character: u32, key_modifiers: u16);

/// `SET_KEYBOARD_CALLBACK` payload.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct KeyboardCallback {
    pub callback: Option<KeyboardEventFn>,
}

pub type SetEjectStateFn = unsafe extern "C" fn(ejected: bool) -> bool;
pub type GetEjectStateFn = unsafe extern "C" fn() -> bool;
pub type GetImageIndexFn = unsafe extern "C" fn() -> c_uint;
pub type SetImageIndexFn = unsafe extern "C" fn(index: c_uint) -> bool;
pub type GetNumImagesFn = unsafe extern "C" fn() -> c_uint;
pub type ReplaceImageIndexFn = unsafe extern "C" fn(index: c_uint, info: *const GameInfo) -> bool;
pub type AddImageIndexFn = unsafe extern "C" fn() -> bool;

/// `SET_DISK_CONTROL_INTERFACE` payload.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct DiskControlCallback {
    pub set_eject_state: Option<SetEjectStateFn>,
    pub get_eject_state: Option<GetEjectStateFn>,
    pub get_image_index: Option<GetImageIndexFn>,
    pub set_image_index: Option<SetImageIndexFn>,
    pub get_num_images: Option<GetNumImagesFn>,
    pub replace_image_index: Option<ReplaceImageIndexFn>,
    pub add_image_index: Option<AddImageIndexFn>,
}

pub type HwContextResetFn = unsafe extern "C" fn();
pub type HwGetCurrentFramebufferFn = unsafe extern "C" fn() -> usize;
pub type ProcAddress = Option<unsafe extern "C" fn()>;
pub type HwGetProcAddressFn = unsafe extern "C" fn(sym: *const c_char) -> ProcAddress;

/// `SET_HW_RENDER` payload.
///
/// The module fills the request fields; the host back-fills `get_current_framebuffer` and
/// `get_proc_address` on success.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct HwRenderCallback {
    /// Raw context type, see [`hw_context`].
    pub context_type: c_uint,
    pub context_reset: Option<HwContextResetFn>,
    pub get_current_framebuffer: Option<HwGetCurrentFramebufferFn>,
    pub get_proc_address: Option<HwGetProcAddressFn>,
    pub depth: bool,
    pub stencil: bool,
    pub bottom_left_origin: bool,
    pub version_major: c_uint,
    pub version_minor: c_uint,
    pub cache_context: bool,
    pub context_destroy: Option<HwContextResetFn>,
    pub debug_context: bool,
}

/// `GET_LOG_INTERFACE` payload.
///
/// The C declaration is a variadic `printf`-style function; the host fills in a function
/// that reads the level and the format string only.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct LogCallback {
    pub log: *const c_void,
}

pub type SetRumbleStateFn = unsafe extern "C" fn(port: c_uint, effect: c_uint, strength: u16) -> bool;

/// `GET_RUMBLE_INTERFACE` payload.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct RumbleInterface {
    pub set_rumble_state: Option<SetRumbleStateFn>,
}

/// Input device classes, as queried by `input_state`.
pub mod device {
    pub const NONE: u32 = libretro_sys::DEVICE_NONE;
    pub const JOYPAD: u32 = libretro_sys::DEVICE_JOYPAD;
    pub const MOUSE: u32 = libretro_sys::DEVICE_MOUSE;
    pub const KEYBOARD: u32 = libretro_sys::DEVICE_KEYBOARD;
    pub const LIGHTGUN: u32 = libretro_sys::DEVICE_LIGHTGUN;
    pub const ANALOG: u32 = libretro_sys::DEVICE_ANALOG;
    pub const POINTER: u32 = libretro_sys::DEVICE_POINTER;

    /// Bits of a device id that select the base class; higher bits select a subclass.
    pub const TYPE_MASK: u32 = 0xff;

    /// Capability bit for a device class, as reported by `GET_INPUT_DEVICE_CAPABILITIES`.
    /// Classes past the width of the mask have no bit.
    pub const fn capability(device: u32) -> u64 {
        match 1u64.checked_shl(device & TYPE_MASK) {
            Some(bit) => bit,
            None => 0,
        }
    }
}
