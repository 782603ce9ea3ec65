pub mod config;
pub mod gateway;
pub mod guard;
pub mod http;
pub mod telemetry;

pub use config::{ConfigError, GatewayConfig, LogFormat};
pub use gateway::{Gateway, GatewayParts, GatewayResponse, InboundRequest};
pub use guard::{GuardDecision, PayloadGuard};
pub use http::router;
pub use telemetry::init_tracing;
