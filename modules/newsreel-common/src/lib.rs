pub mod config;
pub mod error;
pub mod text;
pub mod types;

pub use config::Config;
pub use error::NewsreelError;
pub use text::*;
pub use types::*;
