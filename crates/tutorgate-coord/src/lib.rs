pub mod config;
pub mod coordinator;
pub mod error;
pub mod factory;
pub mod lease;
pub mod scripts;
pub mod stores;
pub mod traits;
pub mod types;

pub use config::*;
pub use coordinator::*;
pub use error::StoreError;
pub use factory::*;
pub use lease::Lease;
pub use traits::*;
pub use types::*;
