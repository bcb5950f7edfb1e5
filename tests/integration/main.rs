//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that drives one subsystem through the
//! public API against mock adapters.  Everything runs on the host.

mod command_tests;
mod lifecycle_tests;
mod mock_store;
mod settings_tests;
