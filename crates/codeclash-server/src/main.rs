use tracing_subscriber::EnvFilter;

use codeclash_server::build_app;
use codeclash_server::config::ServerConfig;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("CODECLASH_LOG_FORMAT").is_ok_and(|v| v == "json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Codeclash server starting");

    let config = ServerConfig::load();
    config.validate();

    let questions = match config.load_questions() {
        Ok(bank) => bank,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load question bank");
            std::process::exit(1);
        },
    };

    let listen_addr = config.listen_addr.clone();
    let (app, _state) = build_app(config, questions);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %listen_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        },
    };
    tracing::info!(addr = %listen_addr, "Listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
    tracing::info!("Codeclash server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
