//! Request handlers.

pub mod cache;
pub mod health;
pub mod jobs;
pub mod system;

pub use cache::*;
pub use health::*;
pub use jobs::*;
pub use system::*;
