use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    courier_observability::init();

    let jwt_secret = std::env::var("COURIER_JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("COURIER_JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });

    let cancel = CancellationToken::new();
    let services = match courier_api::app::EnvConfig::from_env() {
        Some(config) => courier_api::app::services::from_env(config, cancel.clone())
            .await
            .expect("failed to wire postgres + redis backends"),
        None => {
            tracing::warn!(
                "COURIER_DATABASE_URL / COURIER_REDIS_URL not set; \
                 running with in-memory backends"
            );
            courier_api::app::in_memory(Default::default()).services
        }
    };

    let app = courier_api::app::build_app(services, &jwt_secret);

    let addr = std::env::var("COURIER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));
    tracing::info!("listening on {}", addr);

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            cancel.cancel();
        }
    };

    if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        tracing::error!(error = %err, "server exited with error");
    }
}
