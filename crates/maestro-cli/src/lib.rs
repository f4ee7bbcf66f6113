//! Library half of the `maestro` binary, so the command implementations can
//! be exercised from integration tests.

pub mod commands;
