pub mod client;
pub mod gateway;
pub mod mock;
pub mod parsing;
pub mod prompts;
pub mod retry;

pub use client::*;
pub use gateway::*;
pub use mock::*;
pub use parsing::*;
pub use prompts::*;
pub use retry::*;
