pub mod audit;
pub mod build;
pub mod edit_pass1;
pub mod edit_pass2;
pub mod fuse;
pub mod global_check;
pub mod split;

pub use audit::*;
pub use build::*;
pub use edit_pass1::*;
pub use edit_pass2::*;
pub use fuse::*;
pub use global_check::*;
pub use split::*;
