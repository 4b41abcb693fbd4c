//! Helpers shared by the unit and integration tests

pub mod test_utils;

pub use test_utils::{TestServer, spawn_test_server, spawn_test_server_with_observer};
