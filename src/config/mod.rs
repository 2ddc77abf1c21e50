pub mod options;
pub mod params;
pub mod presets;
pub mod resolve;
pub mod stage;

pub use options::*;
pub use params::*;
pub use presets::*;
pub use resolve::*;
pub use stage::*;
