pub mod auth;
pub mod cache;
pub mod config;
pub mod platform;
pub mod util;

pub use auth::*;
pub use cache::*;
pub use config::*;
pub use platform::*;
pub use util::*;
