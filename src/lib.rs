pub mod bridge;
pub mod config;
pub mod error;
pub mod tools;
pub mod utils;

pub use bridge::handler::{AppManagers, Host};
pub use config::Config;
pub use error::AppError;
