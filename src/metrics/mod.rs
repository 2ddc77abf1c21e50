pub mod cost;
pub mod quality;

pub use cost::*;
pub use quality::*;
