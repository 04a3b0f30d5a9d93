use env_logger::Env;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use veilguard_trust::{
    auth::{Aes256GcmCipher, JsonLinesSink},
    models::OriginContext,
    routes, Config, TrustService,
};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };
    env_logger::init_from_env(Env::default().default_filter_or(config.rust_log()));
    tracing::debug!(?config, "Configuration loaded");

    let service = match build_service(&config) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!("Failed to initialize trust service: {}", e);
            std::process::exit(1);
        }
    };

    if config.session_sweep_interval_seconds > 0 {
        spawn_session_sweep(service.clone(), Duration::from_secs(config.session_sweep_interval_seconds));
    }

    let app = routes::router(service).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let bind_address = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    tracing::info!("🚀 veilguard-trust listening on http://{}", bind_address);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
    tracing::info!("Server stopped");
}

fn build_service(config: &Config) -> veilguard_trust::Result<TrustService> {
    let cipher = match &config.encryption_key {
        Some(key) => Aes256GcmCipher::from_hex_key(key)?,
        None => {
            tracing::warn!("ENCRYPTION_KEY not set; using a process-local key, sealed data will not survive a restart");
            Aes256GcmCipher::generate()
        }
    };

    let policy = config.security_policy();
    if policy.require_2fa {
        tracing::warn!("REQUIRE_2FA is set but no second-factor verifier is installed; every login will be refused");
    }

    let mut builder = TrustService::builder(policy).with_cipher(Arc::new(cipher));

    match &config.audit_chain_key {
        Some(key) => builder = builder.with_audit_key(key.clone()),
        None => tracing::warn!("AUDIT_CHAIN_KEY not set; audit hashes can only be verified by this process"),
    }

    if let Some(path) = &config.audit_log_path {
        builder = builder.with_audit_sink(Arc::new(JsonLinesSink::open(path)?));
        tracing::info!("Audit events mirrored to {}", path.display());
    }

    let service = builder.build()?;

    if let (Some(principal), Some(secret)) = (&config.admin_bootstrap_principal, &config.admin_bootstrap_secret) {
        service.provision_credential(
            principal,
            &SecretString::from(secret.clone()),
            OriginContext::internal(),
        )?;
        tracing::info!(principal = %principal, "Admin credential provisioned from configuration");
    }

    Ok(service)
}

/// Periodically remove expired sessions and idle login failure counters
fn spawn_session_sweep(service: Arc<TrustService>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let service = service.clone();
            let sweep = move || -> veilguard_trust::Result<()> {
                service.purge_expired_sessions()?;
                service.prune_login_failures()?;
                Ok(())
            };
            match tokio::task::spawn_blocking(sweep).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!("Session sweep failed: {}", e),
                Err(e) => tracing::error!("Session sweep task panicked: {}", e),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT (Ctrl+C), shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
