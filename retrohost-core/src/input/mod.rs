//! Input bridge.
//!
//! Responsibilities:
//! - Hold the host controllers attached to each port of an instance.
//! - Implement the module's `input_poll` / `input_state` callbacks against them.
//! - Implement `set_rumble_state` for `GET_RUMBLE_INTERFACE`.
//!
//! Notes:
//! - `input_poll` asks every controller to refresh its snapshot; `input_state` only reads.
//! - A controller only answers for the device classes in its capability mask.

use std::collections::{BTreeMap, HashMap};
use std::ffi::{CStr, c_uint};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::abi::{InputDescriptor, RumbleEffect, device};
use crate::events::CoreEvent;
use crate::runtime;
use crate::state::lock;

/// A host input device plugged into one port.
pub trait Controller: Send + Sync {
    /// Refresh the snapshot `state` reads from. Called once per `input_poll`.
    fn poll(&self) {}

    /// Value of one input, keyed the way the module asks for it.
    fn state(&self, device: u32, index: u32, id: u32) -> i16;

    /// Device classes this controller answers for, see [`device::capability`].
    fn capabilities(&self) -> u64;

    /// Device class reported to the module through `set_controller_port_device`.
    fn device_type(&self) -> u32 {
        device::JOYPAD
    }

    fn supports_rumble(&self) -> bool {
        false
    }
}

/// Controller whose inputs are set by the host.
#[derive(Debug)]
pub struct StateController {
    device_type: u32,
    capabilities: u64,
    rumble: bool,
    values: Mutex<HashMap<(u32, u32, u32), i16>>,
    polls: AtomicU64,
}

impl StateController {
    pub fn new(device_type: u32) -> Self {
        Self {
            device_type,
            capabilities: device::capability(device_type),
            rumble: false,
            values: Mutex::new(HashMap::new()),
            polls: AtomicU64::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: u64) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_rumble(mut self) -> Self {
        self.rumble = true;
        self
    }

    pub fn set(&self, device: u32, index: u32, id: u32, value: i16) {
        lock(&self.values).insert((device, index, id), value);
    }

    /// Shorthand for a joypad button.
    pub fn set_button(&self, id: u32, pressed: bool) {
        self.set(device::JOYPAD, 0, id, pressed.into());
    }

    pub fn clear(&self) {
        lock(&self.values).clear();
    }

    /// Number of times the module polled this controller.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }
}

impl Controller for StateController {
    fn poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    fn state(&self, device: u32, index: u32, id: u32) -> i16 {
        lock(&self.values)
            .get(&(device, index, id))
            .copied()
            .unwrap_or(0)
    }

    fn capabilities(&self) -> u64 {
        self.capabilities
    }

    fn device_type(&self) -> u32 {
        self.device_type
    }

    fn supports_rumble(&self) -> bool {
        self.rumble
    }
}

/// Controllers attached to one instance.
#[derive(Default)]
pub(crate) struct Controllers {
    ports: BTreeMap<u32, Arc<dyn Controller>>,
    // Answers for every port without an attached controller.
    default: Option<Arc<dyn Controller>>,
}

impl Controllers {
    pub(crate) fn attach(&mut self, port: u32, controller: Arc<dyn Controller>) {
        self.ports.insert(port, controller);
    }

    pub(crate) fn detach(&mut self, port: u32) -> Option<Arc<dyn Controller>> {
        self.ports.remove(&port)
    }

    pub(crate) fn set_default(&mut self, controller: Option<Arc<dyn Controller>>) {
        self.default = controller;
    }

    pub(crate) fn get(&self, port: u32) -> Option<Arc<dyn Controller>> {
        self.ports.get(&port).or(self.default.as_ref()).cloned()
    }

    pub(crate) fn ports(&self) -> impl Iterator<Item = (u32, &Arc<dyn Controller>)> {
        self.ports.iter().map(|(port, controller)| (*port, controller))
    }

    fn all(&self) -> Vec<Arc<dyn Controller>> {
        self.ports.values().chain(self.default.iter()).cloned().collect()
    }

    /// Union of the capabilities of every controller.
    pub(crate) fn capabilities(&self) -> u64 {
        self.ports
            .values()
            .chain(self.default.iter())
            .fold(0, |mask, controller| mask | controller.capabilities())
    }
}

/// One entry of `SET_INPUT_DESCRIPTORS`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InputDescriptorInfo {
    pub port: u32,
    pub device: u32,
    pub index: u32,
    pub id: u32,
    pub description: String,
}

impl InputDescriptorInfo {
    /// `raw.description` must be a valid C string.
    pub(crate) unsafe fn from_raw(raw: &InputDescriptor) -> Self {
        Self {
            port: raw.port,
            device: raw.device,
            index: raw.index,
            id: raw.id,
            description: unsafe { CStr::from_ptr(raw.description) }
                .to_string_lossy()
                .into_owned(),
        }
    }
}

pub(crate) unsafe extern "C" fn input_poll() {
    runtime::callback("input_poll", (), |shared| {
        // Controllers are polled without holding the lock; they may take their own.
        let controllers = lock(&shared.controllers).all();
        for controller in controllers {
            controller.poll();
        }
    })
}

pub(crate) unsafe extern "C" fn input_state(
    port: c_uint,
    device: c_uint,
    index: c_uint,
    id: c_uint,
) -> i16 {
    runtime::callback("input_state", 0, |shared| {
        let Some(controller) = lock(&shared.controllers).get(port) else {
            return 0;
        };
        if controller.capabilities() & device::capability(device) == 0 {
            return 0;
        }
        controller.state(device, index, id)
    })
}

/// Function handed out by `GET_RUMBLE_INTERFACE`.
pub(crate) unsafe extern "C" fn set_rumble_state(port: c_uint, effect: c_uint, strength: u16) -> bool {
    runtime::callback("set_rumble_state", false, |shared| {
        let Some(effect) = RumbleEffect::from_raw(effect) else {
            error!(port, effect, "unknown rumble effect");
            return false;
        };
        let supported = lock(&shared.controllers)
            .get(port)
            .is_some_and(|controller| controller.supports_rumble());
        if !supported {
            return false;
        }

        shared.events.emit(CoreEvent::RumbleStateChanged {
            port,
            effect,
            strength,
        });
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_controller_answers_unattached_ports() {
        let mut controllers = Controllers::default();
        let pad = Arc::new(StateController::new(device::JOYPAD));
        pad.set_button(libretro_sys::DEVICE_ID_JOYPAD_A, true);
        controllers.set_default(Some(pad));

        let controller = controllers.get(3).unwrap();
        assert_eq!(controller.state(device::JOYPAD, 0, libretro_sys::DEVICE_ID_JOYPAD_A), 1);
        assert_eq!(controller.state(device::JOYPAD, 0, libretro_sys::DEVICE_ID_JOYPAD_B), 0);
    }

    #[test]
    fn capabilities_are_combined() {
        let mut controllers = Controllers::default();
        controllers.attach(0, Arc::new(StateController::new(device::JOYPAD)));
        controllers.attach(1, Arc::new(StateController::new(device::MOUSE)));
        assert_eq!(
            controllers.capabilities(),
            device::capability(device::JOYPAD) | device::capability(device::MOUSE)
        );

        assert!(controllers.detach(1).is_some());
        assert_eq!(controllers.capabilities(), device::capability(device::JOYPAD));
    }

    #[test]
    fn unknown_device_class_answers_nothing() {
        let mut controllers = Controllers::default();
        controllers.attach(0, Arc::new(StateController::new(65)));
        controllers.attach(1, Arc::new(StateController::new(device::JOYPAD)));
        assert_eq!(controllers.capabilities(), device::capability(device::JOYPAD));
        assert_eq!(controllers.get(0).unwrap().capabilities(), 0);
    }

    #[test]
    fn callbacks_without_affinity_are_inert() {
        assert_eq!(unsafe { input_state(0, device::JOYPAD, 0, 0) }, 0);
        assert!(!unsafe { set_rumble_state(0, 0, 0xffff) });
    }
}
