pub mod calls;
pub mod config;

pub use self::calls::*;
pub use self::config::*;
