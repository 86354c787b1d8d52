//! Environment command dispatcher.
//!
//! Responsibilities:
//! - Receive `(cmd, data)` from the module's environment callback and resolve the instance.
//! - Look the opcode up in a static table; unknown opcodes answer `false` untouched.
//! - Interpret the payload per opcode, read or mutate the instance, answer `true`/`false`.
//!
//! Notes:
//! - Opcodes are matched on their literal value, marker bits included.
//! - Handlers never fail loudly: invalid requests and unsupported configurations are logged
//!   with `error!` and answered with `false`.

pub mod language;


use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_uint, c_void};

use lazy_static::lazy_static;
use tracing::{debug, error, info, trace, warn};

use crate::abi::{
    DiskControlCallback, GameGeometry, InputDescriptor, KeyboardCallback, LogCallback, LogLevel,
    Message, RumbleInterface, SystemAvInfo, Variable, env,
};
use crate::events::CoreEvent;
use crate::input::{self, InputDescriptorInfo};
use crate::renderer;
use crate::runtime;
use crate::state::{HostConfig, Shared, lock};

/// Handler for one opcode.
struct Handler {
    command: &'static str,
    /// Payload type, `None` for commands without one.
    payload: Option<&'static str>,
    run: unsafe fn(&Shared, *mut c_void) -> bool,
}

macro_rules! handlers {
    ($($cmd:ident => $payload:expr, $run:ident;)*) => {{
        let mut table = HashMap::new();
        $(
            table.insert(
                env::$cmd,
                Handler {
                    command: stringify!($cmd),
                    payload: $payload,
                    run: $run,
                },
            );
        )*
        table
    }};
}

lazy_static! {
    static ref HANDLERS: HashMap<u32, Handler> = handlers! {
        SET_ROTATION => Some("unsigned"), set_rotation;
        GET_OVERSCAN => Some("bool"), get_overscan;
        GET_CAN_DUPE => Some("bool"), get_can_dupe;
        SET_MESSAGE => Some("retro_message"), set_message;
        SHUTDOWN => None, shutdown;
        GET_SYSTEM_DIRECTORY => Some("const char *"), get_system_directory;
        SET_PIXEL_FORMAT => Some("retro_pixel_format"), set_pixel_format;
        SET_INPUT_DESCRIPTORS => Some("retro_input_descriptor[]"), set_input_descriptors;
        SET_KEYBOARD_CALLBACK => Some("retro_keyboard_callback"), set_keyboard_callback;
        SET_DISK_CONTROL_INTERFACE => Some("retro_disk_control_callback"), set_disk_control_interface;
        SET_HW_RENDER => Some("retro_hw_render_callback"), set_hw_render;
        GET_VARIABLE => Some("retro_variable"), get_variable;
        SET_VARIABLES => Some("retro_variable[]"), set_variables;
        GET_VARIABLE_UPDATE => Some("bool"), get_variable_update;
        SET_SUPPORT_NO_GAME => Some("bool"), set_support_no_game;
        GET_LIBRETRO_PATH => Some("const char *"), get_libretro_path;
        GET_RUMBLE_INTERFACE => Some("retro_rumble_interface"), get_rumble_interface;
        GET_INPUT_DEVICE_CAPABILITIES => Some("uint64_t"), get_input_device_capabilities;
        GET_LOG_INTERFACE => Some("retro_log_callback"), get_log_interface;
        GET_CONTENT_DIRECTORY => Some("const char *"), get_content_directory;
        GET_SAVE_DIRECTORY => Some("const char *"), get_save_directory;
        SET_SYSTEM_AV_INFO => Some("retro_system_av_info"), set_system_av_info;
        SET_GEOMETRY => Some("retro_game_geometry"), set_geometry;
        GET_LANGUAGE => Some("unsigned"), get_language;
    };
}

/// The module's environment callback.
pub(crate) unsafe extern "C" fn environment(cmd: c_uint, data: *mut c_void) -> bool {
    runtime::callback("environment", false, |shared| dispatch(shared, cmd, data))
}

/// Run one environment command against `shared`.
pub(crate) fn dispatch(shared: &Shared, cmd: u32, data: *mut c_void) -> bool {
    let Some(handler) = HANDLERS.get(&cmd) else {
        trace!("unhandled environment command {cmd:#x}");
        return false;
    };

    if let Some(payload) = handler.payload {
        if data.is_null() {
            error!(
                command = handler.command,
                payload, "environment command without its payload"
            );
            return false;
        }
    }

    trace!(command = handler.command, "environment command");
    // SAFETY: `data` is non-null when a payload is expected and points to the structure the
    // opcode defines; that is the module's side of the contract.
    unsafe { (handler.run)(shared, data) }
}

unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    let value = unsafe { CStr::from_ptr(ptr) };
    value.to_str().ok()
}

// Read commands.

unsafe fn get_can_dupe(_: &Shared, data: *mut c_void) -> bool {
    unsafe { *data.cast::<bool>() = true };
    true
}

unsafe fn get_overscan(shared: &Shared, data: *mut c_void) -> bool {
    unsafe { *data.cast::<bool>() = shared.config.overscan };
    true
}

unsafe fn get_system_directory(shared: &Shared, data: *mut c_void) -> bool {
    unsafe { *data.cast::<*const c_char>() = HostConfig::dir_ptr(&shared.config.system_directory) };
    true
}

unsafe fn get_content_directory(shared: &Shared, data: *mut c_void) -> bool {
    unsafe {
        *data.cast::<*const c_char>() = HostConfig::dir_ptr(&shared.config.content_directory)
    };
    true
}

unsafe fn get_save_directory(shared: &Shared, data: *mut c_void) -> bool {
    unsafe { *data.cast::<*const c_char>() = HostConfig::dir_ptr(&shared.config.save_directory) };
    true
}

unsafe fn get_libretro_path(shared: &Shared, data: *mut c_void) -> bool {
    unsafe { *data.cast::<*const c_char>() = HostConfig::dir_ptr(&shared.config.libretro_path) };
    true
}

unsafe fn get_input_device_capabilities(shared: &Shared, data: *mut c_void) -> bool {
    let capabilities = lock(&shared.controllers).capabilities();
    unsafe { *data.cast::<u64>() = capabilities };
    true
}

unsafe fn get_language(shared: &Shared, data: *mut c_void) -> bool {
    let language = language::language_for(shared.config.locales.as_slice());
    unsafe { *data.cast::<c_uint>() = language as c_uint };
    true
}

unsafe fn get_log_interface(_: &Shared, data: *mut c_void) -> bool {
    let log: unsafe extern "C" fn(c_uint, *const c_char) = log_message;
    unsafe { (*data.cast::<LogCallback>()).log = log as *const c_void };
    true
}

unsafe fn get_rumble_interface(_: &Shared, data: *mut c_void) -> bool {
    unsafe { (*data.cast::<RumbleInterface>()).set_rumble_state = Some(input::set_rumble_state) };
    true
}

unsafe fn get_variable(shared: &Shared, data: *mut c_void) -> bool {
    let variable = unsafe { &mut *data.cast::<Variable>() };
    let Some(key) = (unsafe { c_str(variable.key) }) else {
        error!("GET_VARIABLE without a valid key");
        return false;
    };

    match lock(&shared.state).variables.current_ptr(key) {
        Some(value) => {
            variable.value = value;
            true
        }
        None => {
            error!(key, "core requested an undeclared variable");
            variable.value = std::ptr::null();
            false
        }
    }
}

unsafe fn get_variable_update(shared: &Shared, data: *mut c_void) -> bool {
    let updated = lock(&shared.state).variables.take_update();
    unsafe { *data.cast::<bool>() = updated };
    true
}

// Write commands.

unsafe fn set_rotation(shared: &Shared, data: *mut c_void) -> bool {
    lock(&shared.state).rotation = unsafe { *data.cast::<c_uint>() };
    true
}

unsafe fn set_pixel_format(shared: &Shared, data: *mut c_void) -> bool {
    let format = unsafe { *data.cast::<c_uint>() };
    debug!(format, "pixel format negotiated");
    lock(&shared.state).pixel_format = format;
    true
}

unsafe fn set_geometry(shared: &Shared, data: *mut c_void) -> bool {
    let geometry = unsafe { &*data.cast::<GameGeometry>() };
    lock(&shared.state).set_geometry(geometry);
    true
}

unsafe fn set_system_av_info(shared: &Shared, data: *mut c_void) -> bool {
    let info = unsafe { &*data.cast::<SystemAvInfo>() };
    lock(&shared.state).set_system_av_info(info);
    true
}

unsafe fn set_input_descriptors(shared: &Shared, data: *mut c_void) -> bool {
    let first = data.cast::<InputDescriptor>();
    let mut descriptors = Vec::new();
    loop {
        let descriptor = unsafe { &*first.add(descriptors.len()) };
        if descriptor.description.is_null() {
            break;
        }
        descriptors.push(unsafe { InputDescriptorInfo::from_raw(descriptor) });
    }

    debug!(count = descriptors.len(), "input descriptors set");
    lock(&shared.state).input_descriptors = descriptors;
    true
}

unsafe fn set_keyboard_callback(shared: &Shared, data: *mut c_void) -> bool {
    let callback = unsafe { *data.cast::<KeyboardCallback>() };
    lock(&shared.state).keyboard = callback.callback;
    true
}

unsafe fn set_disk_control_interface(shared: &Shared, data: *mut c_void) -> bool {
    let callback = unsafe { *data.cast::<DiskControlCallback>() };
    lock(&shared.state).disk_control = Some(callback);
    true
}

unsafe fn set_hw_render(shared: &Shared, data: *mut c_void) -> bool {
    renderer::set_hw_render(shared, unsafe { &mut *data.cast() })
}

unsafe fn set_support_no_game(shared: &Shared, data: *mut c_void) -> bool {
    lock(&shared.state).support_no_game = unsafe { *data.cast::<bool>() };
    true
}

unsafe fn set_variables(shared: &Shared, data: *mut c_void) -> bool {
    let first = data.cast::<Variable>().cast_const();
    {
        let mut state = lock(&shared.state);
        for i in 0.. {
            let variable = unsafe { &*first.add(i) };
            if variable.key.is_null() || variable.value.is_null() {
                break;
            }
            match unsafe { (c_str(variable.key), c_str(variable.value)) } {
                (Some(key), Some(value)) => state.variables.declare(key, value),
                _ => warn!(index = i, "skipping variable that is not valid UTF-8"),
            }
        }
    }

    shared.events.emit(CoreEvent::VariablesChanged);
    true
}

unsafe fn set_message(shared: &Shared, data: *mut c_void) -> bool {
    let message = unsafe { &*data.cast::<Message>() };
    let text = if message.msg.is_null() {
        String::new()
    } else {
        let msg = unsafe { CStr::from_ptr(message.msg) };
        msg.to_string_lossy().into_owned()
    };

    shared.events.emit(CoreEvent::Message {
        text,
        frames: message.frames,
    });
    true
}

unsafe fn shutdown(shared: &Shared, _: *mut c_void) -> bool {
    info!(instance = shared.id, "core requested shutdown");
    shared.events.emit(CoreEvent::Shutdown);
    true
}

/// Log function handed out by `GET_LOG_INTERFACE`.
///
/// Declared by the module as `printf`-style variadic; only the level and the format string
/// are read, and the format string is forwarded as the message text.
pub(crate) unsafe extern "C" fn log_message(level: c_uint, fmt: *const c_char) {
    runtime::callback("log", (), |shared| {
        let Some(level) = LogLevel::from_raw(level) else {
            debug!(level, "unexpected core log level");
            return;
        };
        if fmt.is_null() {
            return;
        }
        let text = unsafe { CStr::from_ptr(fmt) }
            .to_string_lossy()
            .trim_end()
            .to_string();

        let domain = lock(&shared.state).library_name.clone();
        match level {
            LogLevel::Debug => debug!(target: "retrohost::core", domain = %domain, "{text}"),
            LogLevel::Info => info!(target: "retrohost::core", domain = %domain, "{text}"),
            LogLevel::Warn => warn!(target: "retrohost::core", domain = %domain, "{text}"),
            LogLevel::Error => error!(target: "retrohost::core", domain = %domain, "{text}"),
        }

        shared.events.emit(CoreEvent::Log {
            domain,
            level,
            text,
        });
    })
}
