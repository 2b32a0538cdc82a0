use greeneye::{app, initialize_state, telemetry};

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "greeneye=info,tower_http=info".into()),
        )
        .init();

    let state = initialize_state().await?;

    let recorder = telemetry::setup_metrics_recorder()?;
    let app = app(state).route(
        "/metrics",
        axum::routing::get(move || std::future::ready(recorder.render())),
    );

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(address = %listener.local_addr()?, "server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
