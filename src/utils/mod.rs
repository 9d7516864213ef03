// Utility functions

pub mod logger;
pub mod retry;

pub use logger::*;
pub use retry::*;
