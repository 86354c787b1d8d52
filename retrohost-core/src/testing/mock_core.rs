//! In-process core for tests.
//!
//! Behaves like a real libretro core: one global slot per callback, no user data, and no
//! knowledge of which host instance it is serving. Frame contents depend only on what the
//! host answers through the callbacks, so concurrent instances must each see their own
//! answers.
//!
//! Per frame (`retro_run`):
//! - polls input and reads joypad A/B/START on port 0;
//! - reads `mock_fill` and fills a 320x240 RGB565 frame with it (plus 0x100 while A is held),
//!   passing a zero pitch; with `mock_renderer` set to a GPU context the hardware sentinel is
//!   passed instead;
//! - sends one audio sample and a 4-frame batch, all samples equal to the fill value;
//! - rumbles port 0 while B is held and requests shutdown while START is held.

use std::ffi::{CStr, c_char, c_uint, c_void};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use libretro_sys::{
    AudioSampleBatchFn, AudioSampleFn, EnvironmentFn, GameGeometry, GameInfo, InputPollFn,
    InputStateFn, SystemAvInfo, SystemInfo, SystemTiming, VideoRefreshFn,
};

use crate::abi::{
    self, DiskControlCallback, HwGetCurrentFramebufferFn, HwRenderCallback, InputDescriptor,
    KeyboardCallback, LogCallback, Message, PixelFormat, RumbleInterface, SetRumbleStateFn,
    Variable, env, hw_context, symbols,
};
use crate::loader::SymbolSource;
use crate::state::lock;

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 240;
pub const SAVE_STATE: &[u8] = b"MOCK";
pub const MEDIA_COUNT: u32 = 3;

static ENVIRONMENT: Mutex<Option<EnvironmentFn>> = Mutex::new(None);
static VIDEO_REFRESH: Mutex<Option<VideoRefreshFn>> = Mutex::new(None);
static AUDIO_SAMPLE: Mutex<Option<AudioSampleFn>> = Mutex::new(None);
static AUDIO_SAMPLE_BATCH: Mutex<Option<AudioSampleBatchFn>> = Mutex::new(None);
static INPUT_POLL: Mutex<Option<InputPollFn>> = Mutex::new(None);
static INPUT_STATE: Mutex<Option<InputStateFn>> = Mutex::new(None);

static RUMBLE: Mutex<Option<SetRumbleStateFn>> = Mutex::new(None);
static CURRENT_FRAMEBUFFER: Mutex<Option<HwGetCurrentFramebufferFn>> = Mutex::new(None);

pub static LAST_KEYCODE: AtomicU32 = AtomicU32::new(0);
static MEDIA_INDEX: AtomicU32 = AtomicU32::new(0);
static TRAY_OPEN: AtomicBool = AtomicBool::new(false);

/// Resolves the mock's entry points, like `dlsym` on a real core.
pub struct MockCore;

impl SymbolSource for MockCore {
    fn symbol(&self, name: &'static str) -> Option<*const c_void> {
        let address = match name {
            symbols::API_VERSION => retro_api_version as *const c_void,
            symbols::INIT => retro_init as *const c_void,
            symbols::DEINIT => retro_deinit as *const c_void,
            symbols::GET_SYSTEM_INFO => retro_get_system_info as *const c_void,
            symbols::GET_SYSTEM_AV_INFO => retro_get_system_av_info as *const c_void,
            symbols::RUN => retro_run as *const c_void,
            symbols::RESET => retro_reset as *const c_void,
            symbols::LOAD_GAME => retro_load_game as *const c_void,
            symbols::UNLOAD_GAME => retro_unload_game as *const c_void,
            symbols::SET_CONTROLLER_PORT_DEVICE => retro_set_controller_port_device as *const c_void,
            symbols::SERIALIZE_SIZE => retro_serialize_size as *const c_void,
            symbols::SERIALIZE => retro_serialize as *const c_void,
            symbols::UNSERIALIZE => retro_unserialize as *const c_void,
            symbols::SET_ENVIRONMENT => retro_set_environment as *const c_void,
            symbols::SET_VIDEO_REFRESH => retro_set_video_refresh as *const c_void,
            symbols::SET_AUDIO_SAMPLE => retro_set_audio_sample as *const c_void,
            symbols::SET_AUDIO_SAMPLE_BATCH => retro_set_audio_sample_batch as *const c_void,
            symbols::SET_INPUT_POLL => retro_set_input_poll as *const c_void,
            symbols::SET_INPUT_STATE => retro_set_input_state as *const c_void,
            _ => return None,
        };
        Some(address)
    }
}

fn environment(cmd: u32, data: *mut c_void) -> bool {
    let callback = *lock(&ENVIRONMENT);
    callback.is_some_and(|callback| unsafe { callback(cmd, data) })
}

/// `GET_VARIABLE` as a core would issue it.
fn variable(key: &CStr) -> Option<String> {
    let mut var = Variable {
        key: key.as_ptr(),
        value: std::ptr::null(),
    };
    if !environment(env::GET_VARIABLE, (&mut var as *mut Variable).cast()) || var.value.is_null() {
        return None;
    }
    let value = unsafe { CStr::from_ptr(var.value) };
    Some(value.to_string_lossy().into_owned())
}

fn log(level: abi::LogLevel, text: &CStr) {
    let mut callback = LogCallback {
        log: std::ptr::null(),
    };
    if environment(env::GET_LOG_INTERFACE, (&mut callback as *mut LogCallback).cast())
        && !callback.log.is_null()
    {
        let log: unsafe extern "C" fn(c_uint, *const c_char) =
            unsafe { std::mem::transmute(callback.log) };
        unsafe { log(level as c_uint, text.as_ptr()) };
    }
}

unsafe extern "C" fn retro_api_version() -> c_uint {
    abi::API_VERSION
}

unsafe extern "C" fn retro_set_environment(callback: EnvironmentFn) {
    *lock(&ENVIRONMENT) = Some(callback);

    let mut variables = [
        Variable {
            key: c"mock_fill".as_ptr(),
            value: c"Fill value; 1|2|3".as_ptr(),
        },
        Variable {
            key: c"mock_renderer".as_ptr(),
            value: c"Renderer; software|opengl_core|vulkan".as_ptr(),
        },
        Variable {
            key: std::ptr::null(),
            value: std::ptr::null(),
        },
    ];
    environment(env::SET_VARIABLES, variables.as_mut_ptr().cast());

    let mut no_game = true;
    environment(env::SET_SUPPORT_NO_GAME, (&mut no_game as *mut bool).cast());
}

unsafe extern "C" fn retro_set_video_refresh(callback: VideoRefreshFn) {
    *lock(&VIDEO_REFRESH) = Some(callback);
}

unsafe extern "C" fn retro_set_audio_sample(callback: AudioSampleFn) {
    *lock(&AUDIO_SAMPLE) = Some(callback);
}

unsafe extern "C" fn retro_set_audio_sample_batch(callback: AudioSampleBatchFn) {
    *lock(&AUDIO_SAMPLE_BATCH) = Some(callback);
}

unsafe extern "C" fn retro_set_input_poll(callback: InputPollFn) {
    *lock(&INPUT_POLL) = Some(callback);
}

unsafe extern "C" fn retro_set_input_state(callback: InputStateFn) {
    *lock(&INPUT_STATE) = Some(callback);
}

unsafe extern "C" fn retro_init() {
    let mut rumble = RumbleInterface {
        set_rumble_state: None,
    };
    environment(env::GET_RUMBLE_INTERFACE, (&mut rumble as *mut RumbleInterface).cast());
    *lock(&RUMBLE) = rumble.set_rumble_state;

    log(abi::LogLevel::Info, c"mock core initialized\n");
}

unsafe extern "C" fn retro_deinit() {}

unsafe extern "C" fn retro_get_system_info(info: *mut SystemInfo) {
    let info = unsafe { &mut *info };
    info.library_name = c"Mock".as_ptr();
    info.library_version = c"1.0".as_ptr();
    info.valid_extensions = c"bin|rom".as_ptr();
    info.need_fullpath = false;
    info.block_extract = false;
}

unsafe extern "C" fn retro_get_system_av_info(info: *mut SystemAvInfo) {
    unsafe {
        *info = SystemAvInfo {
            geometry: GameGeometry {
                base_width: WIDTH,
                base_height: HEIGHT,
                max_width: WIDTH,
                max_height: HEIGHT,
                aspect_ratio: 0.0,
            },
            timing: SystemTiming {
                fps: 60.0,
                sample_rate: 44100.0,
            },
        }
    };
}

unsafe extern "C" fn retro_set_controller_port_device(_port: c_uint, _device: c_uint) {}

unsafe extern "C" fn keyboard_event(down: bool, keycode: c_uint, _character: u32, _modifiers: u16) {
    if down {
        LAST_KEYCODE.store(keycode, Ordering::SeqCst);
    }
}

unsafe extern "C" fn set_eject_state(ejected: bool) -> bool {
    TRAY_OPEN.store(ejected, Ordering::SeqCst);
    true
}

unsafe extern "C" fn get_eject_state() -> bool {
    TRAY_OPEN.load(Ordering::SeqCst)
}

unsafe extern "C" fn get_image_index() -> c_uint {
    MEDIA_INDEX.load(Ordering::SeqCst)
}

unsafe extern "C" fn set_image_index(index: c_uint) -> bool {
    // Media can only be swapped with the tray open.
    if !TRAY_OPEN.load(Ordering::SeqCst) {
        return false;
    }
    MEDIA_INDEX.store(index, Ordering::SeqCst);
    true
}

unsafe extern "C" fn get_num_images() -> c_uint {
    MEDIA_COUNT
}

unsafe extern "C" fn retro_load_game(_game: *const GameInfo) -> bool {
    let mut format = PixelFormat::Rgb565 as c_uint;
    environment(env::SET_PIXEL_FORMAT, (&mut format as *mut c_uint).cast());

    let mut descriptors = [
        InputDescriptor {
            port: 0,
            device: abi::device::JOYPAD,
            index: 0,
            id: libretro_sys::DEVICE_ID_JOYPAD_A,
            description: c"Brighten".as_ptr(),
        },
        InputDescriptor {
            port: 0,
            device: abi::device::JOYPAD,
            index: 0,
            id: libretro_sys::DEVICE_ID_JOYPAD_B,
            description: c"Rumble".as_ptr(),
        },
        InputDescriptor {
            port: 0,
            device: 0,
            index: 0,
            id: 0,
            description: std::ptr::null(),
        },
    ];
    environment(env::SET_INPUT_DESCRIPTORS, descriptors.as_mut_ptr().cast());

    let mut keyboard = KeyboardCallback {
        callback: Some(keyboard_event),
    };
    environment(env::SET_KEYBOARD_CALLBACK, (&mut keyboard as *mut KeyboardCallback).cast());

    let mut disk = DiskControlCallback {
        set_eject_state: Some(set_eject_state),
        get_eject_state: Some(get_eject_state),
        get_image_index: Some(get_image_index),
        set_image_index: Some(set_image_index),
        get_num_images: Some(get_num_images),
        replace_image_index: None,
        add_image_index: None,
    };
    environment(
        env::SET_DISK_CONTROL_INTERFACE,
        (&mut disk as *mut DiskControlCallback).cast(),
    );

    let context_type = match variable(c"mock_renderer").as_deref() {
        Some("opengl_core") => Some(hw_context::OPENGL_CORE),
        Some("vulkan") => Some(hw_context::VULKAN),
        _ => None,
    };
    if let Some(context_type) = context_type {
        let mut hw = HwRenderCallback {
            context_type,
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
        if !environment(env::SET_HW_RENDER, (&mut hw as *mut HwRenderCallback).cast()) {
            return false;
        }
        *lock(&CURRENT_FRAMEBUFFER) = hw.get_current_framebuffer;
    }

    let mut message = Message {
        msg: c"mock loaded".as_ptr(),
        frames: 120,
    };
    environment(env::SET_MESSAGE, (&mut message as *mut Message).cast());
    true
}

unsafe extern "C" fn retro_unload_game() {}

unsafe extern "C" fn retro_reset() {}

fn joypad(id: c_uint) -> bool {
    let input_state = *lock(&INPUT_STATE);
    input_state.is_some_and(|state| unsafe { state(0, abi::device::JOYPAD, 0, id) } != 0)
}

unsafe extern "C" fn retro_run() {
    let poll = *lock(&INPUT_POLL);
    if let Some(poll) = poll {
        unsafe { poll() };
    }
    let brighten = joypad(libretro_sys::DEVICE_ID_JOYPAD_A);
    let rumble = joypad(libretro_sys::DEVICE_ID_JOYPAD_B);
    let shutdown = joypad(libretro_sys::DEVICE_ID_JOYPAD_START);

    let fill: u16 = variable(c"mock_fill")
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    let hardware = matches!(variable(c"mock_renderer").as_deref(), Some("opengl_core"));

    let video = *lock(&VIDEO_REFRESH);
    if let Some(video) = video {
        if hardware {
            let current = *lock(&CURRENT_FRAMEBUFFER);
            if let Some(current) = current {
                // A GPU core binds this framebuffer before drawing.
                let _fbo = unsafe { current() };
            }
            unsafe { video(usize::MAX as *const c_void, WIDTH, HEIGHT, 0) };
        } else {
            let pixel = fill | if brighten { 0x100 } else { 0 };
            let frame = vec![pixel; (WIDTH * HEIGHT) as usize];
            unsafe { video(frame.as_ptr().cast(), WIDTH, HEIGHT, 0) };
        }
    }

    let sample = fill as i16;
    let audio_sample = *lock(&AUDIO_SAMPLE);
    if let Some(audio_sample) = audio_sample {
        unsafe { audio_sample(sample, sample) };
    }
    let batch = *lock(&AUDIO_SAMPLE_BATCH);
    if let Some(batch) = batch {
        let samples = [sample; 8];
        unsafe { batch(samples.as_ptr(), 4) };
    }

    let set_rumble_state = *lock(&RUMBLE);
    if rumble {
        if let Some(set_rumble_state) = set_rumble_state {
            unsafe { set_rumble_state(0, abi::RumbleEffect::Strong as c_uint, 0x8000) };
        }
    }
    if shutdown {
        environment(env::SHUTDOWN, std::ptr::null_mut());
    }
}

unsafe extern "C" fn retro_serialize_size() -> usize {
    SAVE_STATE.len()
}

unsafe extern "C" fn retro_serialize(data: *mut c_void, size: usize) -> bool {
    if size < SAVE_STATE.len() {
        return false;
    }
    unsafe { std::ptr::copy_nonoverlapping(SAVE_STATE.as_ptr(), data.cast::<u8>(), SAVE_STATE.len()) };
    true
}

unsafe extern "C" fn retro_unserialize(data: *const c_void, size: usize) -> bool {
    let state = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size) };
    state == SAVE_STATE
}
