pub mod run;
pub mod section;
pub mod tree;

pub use run::*;
pub use section::*;
pub use tree::*;
