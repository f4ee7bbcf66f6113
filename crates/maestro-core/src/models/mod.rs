pub mod agent;
pub mod execution;

pub use agent::*;
pub use execution::*;
