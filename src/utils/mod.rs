pub mod display;
pub mod logging;

pub use display::*;
