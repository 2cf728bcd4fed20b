//! Shared utilities.

pub mod ip_utils;

pub use ip_utils::{host_of, is_valid_ip};
