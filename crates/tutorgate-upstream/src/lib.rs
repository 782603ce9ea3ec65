pub mod config;
pub mod error;
pub mod factory;
pub mod providers;
pub mod retry;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::ProviderError;
pub use factory::*;
pub use retry::*;
pub use traits::*;
pub use types::*;
