use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tutorgate_server::{Gateway, GatewayConfig, LogFormat, init_tracing, router};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match GatewayConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            init_tracing(LogFormat::Text);
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format);

    let gateway = match Gateway::from_config(&config) {
        Ok(gateway) => Arc::new(gateway),
        Err(err) => {
            error!(error = %err, "gateway initialization failed");
            return ExitCode::FAILURE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(bind_addr = %config.bind_addr, error = %err, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    info!(
        bind_addr = %config.bind_addr,
        coordination = gateway.coordination_mode().as_str(),
        "tutorgated listening"
    );

    let app = router(gateway).into_make_service_with_connect_info::<SocketAddr>();
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %err, "server failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
