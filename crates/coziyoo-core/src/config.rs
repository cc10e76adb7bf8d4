use crate::error::CoreError;

const MIN_JWT_SECRET_LEN: usize = 32;
const MIN_WEBHOOK_SECRET_LEN: usize = 16;

/// Typed runtime configuration. Populated from environment/CLI by the
/// service binary and validated once at boot; every component receives the
/// fields it needs from here rather than reading the environment itself.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_secs: u64,

    /// Signing secret for app-realm access tokens.
    pub app_jwt_secret: String,
    /// Signing secret for admin-realm access tokens.
    pub admin_jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,

    pub payment_webhook_secret: String,
    pub payment_provider_base_url: String,

    pub agent_runtime_url: String,
    pub agent_runtime_secret: String,
    pub livekit_api_key: String,
    pub livekit_api_secret: String,
    pub livekit_ws_url: String,

    pub retention_days: i64,
    pub approval_expiry_hours: i64,
    pub payment_expiry_hours: i64,
    pub auto_complete_hours: i64,
}

impl AppConfig {
    /// Fail fast on anything that would make the service unsafe to run.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.database_url.trim().is_empty() {
            return Err(CoreError::Config("DATABASE_URL must be set".into()));
        }
        if self.db_max_connections == 0 {
            return Err(CoreError::Config("db_max_connections must be positive".into()));
        }
        if self.app_jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(CoreError::Config(format!(
                "app JWT secret must be at least {MIN_JWT_SECRET_LEN} chars"
            )));
        }
        if self.admin_jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(CoreError::Config(format!(
                "admin JWT secret must be at least {MIN_JWT_SECRET_LEN} chars"
            )));
        }
        if self.app_jwt_secret == self.admin_jwt_secret {
            return Err(CoreError::Config(
                "app and admin JWT secrets must differ; realms are isolated".into(),
            ));
        }
        if self.payment_webhook_secret.len() < MIN_WEBHOOK_SECRET_LEN {
            return Err(CoreError::Config(format!(
                "payment webhook secret must be at least {MIN_WEBHOOK_SECRET_LEN} chars"
            )));
        }
        if self.access_token_ttl_secs <= 0 || self.refresh_token_ttl_secs <= 0 {
            return Err(CoreError::Config("token TTLs must be positive".into()));
        }
        if self.retention_days <= 0 {
            return Err(CoreError::Config("retention window must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://localhost/coziyoo_test".into(),
        db_max_connections: 5,
        db_connect_timeout_secs: 5,
        app_jwt_secret: "app-secret-0123456789-0123456789-ok".into(),
        admin_jwt_secret: "adm-secret-0123456789-0123456789-ok".into(),
        access_token_ttl_secs: 900,
        refresh_token_ttl_secs: 30 * 24 * 3600,
        payment_webhook_secret: "whsec_test_0123456789".into(),
        payment_provider_base_url: "https://pay.example.test".into(),
        agent_runtime_url: "http://127.0.0.1:8200".into(),
        agent_runtime_secret: "agent-shared-secret".into(),
        livekit_api_key: "lk_key".into(),
        livekit_api_secret: "lk-secret-0123456789-0123456789-ok".into(),
        livekit_ws_url: "wss://livekit.example.test".into(),
        retention_days: 730,
        approval_expiry_hours: 24,
        payment_expiry_hours: 1,
        auto_complete_hours: 24,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_config_passes() {
        test_config().validate().unwrap();
    }

    #[test]
    fn short_app_secret_is_rejected() {
        let mut cfg = test_config();
        cfg.app_jwt_secret = "too-short".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn short_webhook_secret_is_rejected() {
        let mut cfg = test_config();
        cfg.payment_webhook_secret = "tiny".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn identical_realm_secrets_are_rejected() {
        let mut cfg = test_config();
        cfg.admin_jwt_secret = cfg.app_jwt_secret.clone();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_database_url_is_rejected() {
        let mut cfg = test_config();
        cfg.database_url = "  ".into();
        assert!(cfg.validate().is_err());
    }
}
