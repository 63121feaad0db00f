// Common utilities and abstractions module
// Logger must be first for macro availability
#[macro_use]
pub mod logger;

pub mod clock;
pub mod constants;
pub mod error;
pub mod utils;
