//! Test support.

pub mod mock_core;
