use clap::Parser;
use coziyoo_core::AppConfig;
use coziyoo_service::{build_router, workers, ServiceState};
use std::net::SocketAddr;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "coziyood", version, about = "Coziyoo marketplace core backend")]
struct Cli {
    /// Socket address to bind, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080", env = "COZIYOO_LISTEN")]
    listen: SocketAddr,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    #[arg(long, default_value_t = 20, env = "COZIYOO_DB_MAX_CONNECTIONS")]
    db_max_connections: u32,
    #[arg(long, default_value_t = 10, env = "COZIYOO_DB_CONNECT_TIMEOUT_SECS")]
    db_connect_timeout_secs: u64,

    /// App-realm JWT signing secret (min 32 chars).
    #[arg(long, env = "COZIYOO_APP_JWT_SECRET", hide_env_values = true)]
    app_jwt_secret: String,
    /// Admin-realm JWT signing secret (min 32 chars).
    #[arg(long, env = "COZIYOO_ADMIN_JWT_SECRET", hide_env_values = true)]
    admin_jwt_secret: String,
    #[arg(long, default_value_t = 900, env = "COZIYOO_ACCESS_TOKEN_TTL_SECS")]
    access_token_ttl_secs: i64,
    #[arg(long, default_value_t = 2_592_000, env = "COZIYOO_REFRESH_TOKEN_TTL_SECS")]
    refresh_token_ttl_secs: i64,

    /// Shared secret for payment webhook signatures (min 16 chars).
    #[arg(long, env = "COZIYOO_PAYMENT_WEBHOOK_SECRET", hide_env_values = true)]
    payment_webhook_secret: String,
    #[arg(long, env = "COZIYOO_PAYMENT_PROVIDER_BASE_URL")]
    payment_provider_base_url: String,

    #[arg(long, env = "COZIYOO_AGENT_RUNTIME_URL")]
    agent_runtime_url: String,
    #[arg(long, env = "COZIYOO_AGENT_RUNTIME_SECRET", hide_env_values = true)]
    agent_runtime_secret: String,
    #[arg(long, env = "LIVEKIT_API_KEY")]
    livekit_api_key: String,
    #[arg(long, env = "LIVEKIT_API_SECRET", hide_env_values = true)]
    livekit_api_secret: String,
    #[arg(long, env = "LIVEKIT_WS_URL")]
    livekit_ws_url: String,

    #[arg(long, default_value_t = 730, env = "COZIYOO_RETENTION_DAYS")]
    retention_days: i64,
    #[arg(long, default_value_t = 24, env = "COZIYOO_APPROVAL_EXPIRY_HOURS")]
    approval_expiry_hours: i64,
    #[arg(long, default_value_t = 1, env = "COZIYOO_PAYMENT_EXPIRY_HOURS")]
    payment_expiry_hours: i64,
    #[arg(long, default_value_t = 24, env = "COZIYOO_AUTO_COMPLETE_HOURS")]
    auto_complete_hours: i64,
}

impl Cli {
    fn into_config(self) -> (SocketAddr, AppConfig) {
        let listen = self.listen;
        let config = AppConfig {
            database_url: self.database_url,
            db_max_connections: self.db_max_connections,
            db_connect_timeout_secs: self.db_connect_timeout_secs,
            app_jwt_secret: self.app_jwt_secret,
            admin_jwt_secret: self.admin_jwt_secret,
            access_token_ttl_secs: self.access_token_ttl_secs,
            refresh_token_ttl_secs: self.refresh_token_ttl_secs,
            payment_webhook_secret: self.payment_webhook_secret,
            payment_provider_base_url: self.payment_provider_base_url,
            agent_runtime_url: self.agent_runtime_url,
            agent_runtime_secret: self.agent_runtime_secret,
            livekit_api_key: self.livekit_api_key,
            livekit_api_secret: self.livekit_api_secret,
            livekit_ws_url: self.livekit_ws_url,
            retention_days: self.retention_days,
            approval_expiry_hours: self.approval_expiry_hours,
            payment_expiry_hours: self.payment_expiry_hours,
            auto_complete_hours: self.auto_complete_hours,
        };
        (listen, config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "coziyoo_service=info,info".to_string()),
        )
        .init();

    let (listen, config) = Cli::parse().into_config();
    let state = ServiceState::bootstrap(config).await?;
    workers::spawn_all(&state);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("coziyoo-service listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
