//! Core option store.
//!
//! A module declares its options with `SET_VARIABLES` as `key = "Description; first|second"`
//! and reads them back with `GET_VARIABLE`. The host can change a current value at any time;
//! the module notices through `GET_VARIABLE_UPDATE`.

use std::collections::{BTreeMap, HashMap};
use std::ffi::{CString, c_char};

/// One declared option.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoreOption {
    pub key: String,
    pub description: String,
    /// Allowed values in declaration order.
    pub values: Vec<String>,
    pub current: String,
}

impl CoreOption {
    /// Parse a declaration value. Without a `"; "` separator the whole string is the only value.
    pub fn parse(key: &str, declaration: &str) -> Self {
        let (description, values) = match declaration.split_once("; ") {
            Some((description, values)) => (
                description.to_string(),
                values.split('|').map(str::to_string).collect::<Vec<_>>(),
            ),
            None => (String::new(), vec![declaration.to_string()]),
        };
        let current = values.first().cloned().unwrap_or_default();

        Self {
            key: key.to_string(),
            description,
            values,
            current,
        }
    }

    pub fn allows(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }
}

#[derive(Debug)]
struct Entry {
    option: CoreOption,
    // Every allowed value, in declaration order. `GET_VARIABLE` hands out pointers into these,
    // so they live as long as the declaration.
    values: Vec<CString>,
    current: usize,
}

impl Entry {
    fn new(option: CoreOption) -> Self {
        let values: Vec<CString> = option.values.iter().map(|v| to_c_string(v)).collect();
        let current = option
            .values
            .iter()
            .position(|v| *v == option.current)
            .unwrap_or_default();
        Self {
            option,
            values,
            current,
        }
    }
}

/// Why a host-side option change was refused.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SetOptionError {
    #[error("the core declared no such option")]
    UnknownKey,
    #[error("the value is not one the core allows")]
    ValueNotAllowed,
}

#[derive(Debug, Default)]
pub struct Variables {
    entries: BTreeMap<String, Entry>,
    overrides: HashMap<String, String>,
    updated: bool,
}

impl Variables {
    /// Insert or replace a declared option. A host override wins over the declared default
    /// when the override is one of the allowed values.
    pub fn declare(&mut self, key: &str, declaration: &str) {
        let mut option = CoreOption::parse(key, declaration);
        if let Some(value) = self.overrides.get(key) {
            if option.allows(value) {
                option.current = value.clone();
            }
        }
        self.entries.insert(key.to_string(), Entry::new(option));
        self.updated = true;
    }

    /// Current value as a NUL-terminated string owned by the store.
    ///
    /// The pointer stays valid until the option is declared again, whatever values the host
    /// selects in between.
    pub fn current_ptr(&self, key: &str) -> Option<*const c_char> {
        let entry = self.entries.get(key)?;
        entry.values.get(entry.current).map(|value| value.as_ptr())
    }

    pub fn get(&self, key: &str) -> Option<&CoreOption> {
        self.entries.get(key).map(|entry| &entry.option)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoreOption> {
        self.entries.values().map(|entry| &entry.option)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SetOptionError> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or(SetOptionError::UnknownKey)?;
        let index = entry
            .option
            .values
            .iter()
            .position(|v| v == value)
            .ok_or(SetOptionError::ValueNotAllowed)?;
        entry.option.current = value.to_string();
        entry.current = index;
        self.updated = true;
        Ok(())
    }

    /// Value applied instead of the first allowed one when `key` is declared.
    pub fn set_override(&mut self, key: &str, value: &str) {
        self.overrides.insert(key.to_string(), value.to_string());
    }

    /// Read and clear the update flag.
    pub fn take_update(&mut self) -> bool {
        std::mem::take(&mut self.updated)
    }
}

fn to_c_string(value: &str) -> CString {
    // Interior NULs cannot come from a C declaration; host values are cut at the first one.
    let bytes = value.split('\0').next().unwrap_or_default();
    CString::new(bytes).unwrap_or_default()
}
