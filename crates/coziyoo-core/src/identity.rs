//! Identity & sessions: argon2id password hashing, realm-scoped access
//! tokens, and rotating refresh sessions.
//!
//! Invariant handling:
//! - Only a sha256 digest of the refresh token is ever stored.
//! - Refresh rotation revokes the predecessor and inserts the successor in
//!   one transaction.
//! - App and admin tokens are signed with different secrets; a token from
//!   one realm never verifies in the other.

use crate::config::AppConfig;
use crate::db::{Store, Tx};
use crate::error::{unique_violation, CoreError, ErrorCode};
use crate::types::{normalize_display_name, new_short_id, AdminRole, Realm, UserCapability};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct AppUser {
    pub id: Uuid,
    pub short_id: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub display_name: String,
    pub display_name_normalized: String,
    pub capability: UserCapability,
    pub is_active: bool,
    pub country: String,
    pub language: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminUser {
    pub id: Uuid,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub display_name: String,
    pub role: AdminRole,
    pub is_active: bool,
}

/// Token claims. `sid` binds the access token to the session that minted it
/// so logout invalidates outstanding refreshes without a token denylist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub realm: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub realm: Realm,
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Realm-aware token mint/verify. Holds both realm secrets; the realm
/// argument picks which one is used, and verification rejects a token whose
/// embedded realm disagrees with the endpoint's.
#[derive(Clone)]
pub struct TokenSigner {
    app_secret: String,
    admin_secret: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenSigner {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            app_secret: config.app_jwt_secret.clone(),
            admin_secret: config.admin_jwt_secret.clone(),
            access_ttl_secs: config.access_token_ttl_secs,
            refresh_ttl_secs: config.refresh_token_ttl_secs,
        }
    }

    fn secret(&self, realm: Realm) -> &[u8] {
        match realm {
            Realm::App => self.app_secret.as_bytes(),
            Realm::Admin => self.admin_secret.as_bytes(),
        }
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_ttl_secs)
    }

    pub fn mint_access(
        &self,
        realm: Realm,
        user_id: Uuid,
        session_id: Uuid,
        role: &str,
    ) -> Result<(String, i64), CoreError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            sid: session_id,
            realm: realm.as_str().to_string(),
            role: role.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.access_ttl_secs)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret(realm)),
        )
        .map_err(|e| CoreError::Credential(format!("token encode failed: {e}")))?;
        Ok((token, self.access_ttl_secs))
    }

    pub fn verify_access(&self, token: &str, realm: Realm) -> Result<AuthContext, CoreError> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret(realm)),
            &Validation::default(),
        )
        .map_err(|_| CoreError::domain(ErrorCode::TokenInvalid, "invalid or expired token"))?;

        let claims = decoded.claims;
        if claims.realm != realm.as_str() {
            return Err(CoreError::domain(
                ErrorCode::AuthRealmMismatch,
                "token was issued for a different realm",
            ));
        }
        Ok(AuthContext {
            user_id: claims.sub,
            session_id: claims.sid,
            realm,
            role: claims.role,
        })
    }
}

pub fn hash_password(password: &str) -> Result<String, CoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CoreError::Credential(format!("password hash failed: {e}")))
}

pub fn verify_password(stored_hash: &str, password: &str) -> Result<bool, CoreError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| CoreError::Credential(format!("stored hash unreadable: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn new_refresh_token() -> String {
    let mut bytes = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn refresh_token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub user_type: UserCapability,
    pub country: String,
    pub language: String,
}

pub fn validate_registration(req: &RegisterRequest) -> Result<(), CoreError> {
    let mut failed: Vec<&str> = Vec::new();
    if !req.email.contains('@') || req.email.len() < 5 {
        failed.push("email");
    }
    if req.password.len() < 8 {
        failed.push("password");
    }
    if normalize_display_name(&req.display_name).len() < 3 {
        failed.push("displayName");
    }
    if req.country.trim().is_empty() {
        failed.push("country");
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(CoreError::validation(
            "registration body failed validation",
            Some(serde_json::json!({ "fields": failed })),
        ))
    }
}

pub async fn register(tx: &mut Tx<'_>, req: &RegisterRequest) -> Result<AppUser, CoreError> {
    validate_registration(req)?;
    let now = Utc::now();
    let user = AppUser {
        id: Uuid::new_v4(),
        short_id: new_short_id(),
        email: req.email.trim().to_string(),
        password_hash: hash_password(&req.password)?,
        display_name: req.display_name.trim().to_string(),
        display_name_normalized: normalize_display_name(&req.display_name),
        capability: req.user_type,
        is_active: true,
        country: req.country.clone(),
        language: req.language.clone(),
        latitude: None,
        longitude: None,
        created_at: now,
    };

    let inserted = sqlx::query(
        r#"
        INSERT INTO app_users (
            id, short_id, email, password_hash, display_name,
            display_name_normalized, capability, is_active, country, language,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
        "#,
    )
    .bind(user.id)
    .bind(&user.short_id)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.display_name)
    .bind(&user.display_name_normalized)
    .bind(user.capability.as_str())
    .bind(user.is_active)
    .bind(&user.country)
    .bind(&user.language)
    .bind(now)
    .execute(&mut **tx)
    .await;

    match inserted {
        Ok(_) => Ok(user),
        Err(err) => match unique_violation(&err).as_deref() {
            Some("app_users_email_key") => Err(CoreError::domain(
                ErrorCode::EmailTaken,
                "an account with this email already exists",
            )),
            Some("app_users_display_name_key") => Err(CoreError::domain(
                ErrorCode::DisplayNameTaken,
                "this display name is already in use",
            )),
            _ => Err(err.into()),
        },
    }
}

pub async fn find_app_user(store: &Store, user_id: Uuid) -> Result<AppUser, CoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, short_id, email, password_hash, display_name,
               display_name_normalized, capability, is_active, country,
               language, latitude, longitude, created_at
        FROM app_users WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(store.pool())
    .await?
    .ok_or_else(|| CoreError::not_found(ErrorCode::UserNotFound, "user not found"))?;
    app_user_from_row(&row)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub language: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Profile edit. A display-name change re-runs the normalized-uniqueness
/// check at the database.
pub async fn update_profile(
    store: &Store,
    user_id: Uuid,
    update: &ProfileUpdate,
) -> Result<AppUser, CoreError> {
    if let Some(display_name) = &update.display_name {
        if normalize_display_name(display_name).len() < 3 {
            return Err(CoreError::validation(
                "display name is too short",
                Some(serde_json::json!({ "fields": ["displayName"] })),
            ));
        }
    }

    let updated = sqlx::query(
        r#"
        UPDATE app_users
        SET display_name = COALESCE($2, display_name),
            display_name_normalized = COALESCE($3, display_name_normalized),
            language = COALESCE($4, language),
            latitude = COALESCE($5, latitude),
            longitude = COALESCE($6, longitude),
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(update.display_name.as_ref().map(|name| name.trim().to_string()))
    .bind(update.display_name.as_deref().map(normalize_display_name))
    .bind(&update.language)
    .bind(update.latitude)
    .bind(update.longitude)
    .execute(store.pool())
    .await;

    match updated {
        Ok(_) => find_app_user(store, user_id).await,
        Err(err) => match unique_violation(&err).as_deref() {
            Some("app_users_display_name_key") => Err(CoreError::domain(
                ErrorCode::DisplayNameTaken,
                "this display name is already in use",
            )),
            _ => Err(err.into()),
        },
    }
}

/// Soft deactivation: the account stops authenticating but its rows stay
/// for order history and finance. All sessions are revoked.
pub async fn deactivate(store: &Store, user_id: Uuid) -> Result<(), CoreError> {
    let mut tx = store.begin().await?;
    sqlx::query("UPDATE app_users SET is_active = FALSE, updated_at = now() WHERE id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE sessions SET revoked_at = now() WHERE realm = 'app' AND user_id = $1 AND revoked_at IS NULL",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn find_admin_user(store: &Store, admin_id: Uuid) -> Result<AdminUser, CoreError> {
    let row = sqlx::query(
        "SELECT id, email, password_hash, display_name, role, is_active FROM admin_users WHERE id = $1",
    )
    .bind(admin_id)
    .fetch_optional(store.pool())
    .await?
    .ok_or_else(|| CoreError::not_found(ErrorCode::UserNotFound, "admin user not found"))?;
    let role: String = row.try_get("role")?;
    Ok(AdminUser {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        display_name: row.try_get("display_name")?,
        role: AdminRole::parse(&role)?,
        is_active: row.try_get("is_active")?,
    })
}

pub async fn display_name_available(store: &Store, display_name: &str) -> Result<bool, CoreError> {
    let normalized = normalize_display_name(display_name);
    let row = sqlx::query("SELECT 1 AS hit FROM app_users WHERE display_name_normalized = $1")
        .bind(&normalized)
        .fetch_optional(store.pool())
        .await?;
    Ok(row.is_none())
}

fn app_user_from_row(row: &sqlx::postgres::PgRow) -> Result<AppUser, CoreError> {
    let capability: String = row.try_get("capability")?;
    Ok(AppUser {
        id: row.try_get("id")?,
        short_id: row.try_get("short_id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        display_name: row.try_get("display_name")?,
        display_name_normalized: row.try_get("display_name_normalized")?,
        capability: UserCapability::parse(&capability)?,
        is_active: row.try_get("is_active")?,
        country: row.try_get("country")?,
        language: row.try_get("language")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn find_login_subject(
    store: &Store,
    realm: Realm,
    email: &str,
) -> Result<Option<(Uuid, String, String, bool)>, CoreError> {
    let (table, role_expr) = match realm {
        Realm::App => ("app_users", "capability"),
        Realm::Admin => ("admin_users", "role"),
    };
    let query = format!(
        "SELECT id, password_hash, {role_expr} AS role, is_active FROM {table} WHERE lower(email) = lower($1)"
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(store.pool())
        .await?;
    row.map(|row| {
        Ok::<_, CoreError>((
            row.try_get("id")?,
            row.try_get("password_hash")?,
            row.try_get("role")?,
            row.try_get("is_active")?,
        ))
    })
    .transpose()
}

/// Password login. The same `UNAUTHORIZED` answer covers unknown email,
/// wrong password, and deactivated accounts so the endpoint does not oracle
/// account existence.
pub async fn login(
    store: &Store,
    signer: &TokenSigner,
    realm: Realm,
    email: &str,
    password: &str,
) -> Result<TokenPair, CoreError> {
    let denied = || CoreError::domain(ErrorCode::Unauthorized, "invalid credentials");

    let (user_id, password_hash, role, is_active) = find_login_subject(store, realm, email)
        .await?
        .ok_or_else(denied)?;
    if !is_active || !verify_password(&password_hash, password)? {
        return Err(denied());
    }

    let mut tx = store.begin().await?;
    let pair = create_session(&mut tx, signer, realm, user_id, &role).await?;
    tx.commit().await?;
    Ok(pair)
}

async fn create_session(
    tx: &mut Tx<'_>,
    signer: &TokenSigner,
    realm: Realm,
    user_id: Uuid,
    role: &str,
) -> Result<TokenPair, CoreError> {
    let session_id = Uuid::new_v4();
    let refresh_token = new_refresh_token();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO sessions (id, realm, user_id, refresh_token_hash, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(session_id)
    .bind(realm.as_str())
    .bind(user_id)
    .bind(refresh_token_digest(&refresh_token))
    .bind(now + signer.refresh_ttl())
    .bind(now)
    .execute(&mut **tx)
    .await?;

    let (access_token, expires_in) = signer.mint_access(realm, user_id, session_id, role)?;
    Ok(TokenPair {
        access_token,
        refresh_token,
        expires_in,
    })
}

/// Rotate a refresh token: revoke the matched session and create its
/// successor in the same transaction, so exactly one descendant exists.
pub async fn refresh(
    store: &Store,
    signer: &TokenSigner,
    realm: Realm,
    refresh_token: &str,
) -> Result<TokenPair, CoreError> {
    let invalid = || CoreError::domain(ErrorCode::TokenInvalid, "refresh token is not valid");

    let mut tx = store.begin().await?;
    let row = sqlx::query(
        r#"
        SELECT id, user_id FROM sessions
        WHERE refresh_token_hash = $1 AND realm = $2
          AND revoked_at IS NULL AND expires_at > now()
        FOR UPDATE
        "#,
    )
    .bind(refresh_token_digest(refresh_token))
    .bind(realm.as_str())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(invalid)?;

    let session_id: Uuid = row.try_get("id")?;
    let user_id: Uuid = row.try_get("user_id")?;

    sqlx::query("UPDATE sessions SET revoked_at = now() WHERE id = $1")
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

    let role = load_role(&mut tx, realm, user_id).await?.ok_or_else(invalid)?;
    let pair = create_session(&mut tx, signer, realm, user_id, &role).await?;
    tx.commit().await?;
    Ok(pair)
}

async fn load_role(tx: &mut Tx<'_>, realm: Realm, user_id: Uuid) -> Result<Option<String>, CoreError> {
    let query = match realm {
        Realm::App => "SELECT capability AS role FROM app_users WHERE id = $1 AND is_active",
        Realm::Admin => "SELECT role FROM admin_users WHERE id = $1 AND is_active",
    };
    let row = sqlx::query(query).bind(user_id).fetch_optional(&mut **tx).await?;
    row.map(|row| Ok::<_, CoreError>(row.try_get::<String, _>("role")?))
        .transpose()
}

pub async fn logout(store: &Store, session_id: Uuid) -> Result<(), CoreError> {
    sqlx::query("UPDATE sessions SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL")
        .bind(session_id)
        .execute(store.pool())
        .await?;
    Ok(())
}

pub async fn logout_all(store: &Store, realm: Realm, user_id: Uuid) -> Result<u64, CoreError> {
    let result = sqlx::query(
        "UPDATE sessions SET revoked_at = now() WHERE realm = $1 AND user_id = $2 AND revoked_at IS NULL",
    )
    .bind(realm.as_str())
    .bind(user_id)
    .execute(store.pool())
    .await?;
    Ok(result.rows_affected())
}

/// True when the session behind an access token is still live. Used by the
/// auth extractor so revocation takes effect before token expiry.
pub async fn session_is_live(store: &Store, session_id: Uuid) -> Result<bool, CoreError> {
    let row = sqlx::query(
        "SELECT 1 AS live FROM sessions WHERE id = $1 AND revoked_at IS NULL AND expires_at > now()",
    )
    .bind(session_id)
    .fetch_optional(store.pool())
    .await?;
    Ok(row.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn signer() -> TokenSigner {
        TokenSigner::from_config(&test_config())
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("hunter2hunter2").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(&hash, "hunter2hunter2").unwrap());
        assert!(!verify_password(&hash, "wrong-password").unwrap());
    }

    #[test]
    fn access_token_roundtrip() {
        let signer = signer();
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let (token, expires_in) = signer
            .mint_access(Realm::App, user_id, session_id, "both")
            .unwrap();
        assert_eq!(expires_in, 900);

        let ctx = signer.verify_access(&token, Realm::App).unwrap();
        assert_eq!(ctx.user_id, user_id);
        assert_eq!(ctx.session_id, session_id);
        assert_eq!(ctx.role, "both");
    }

    #[test]
    fn realms_do_not_accept_each_other() {
        let signer = signer();
        let (token, _) = signer
            .mint_access(Realm::App, Uuid::new_v4(), Uuid::new_v4(), "buyer")
            .unwrap();
        let err = signer.verify_access(&token, Realm::Admin).unwrap_err();
        assert_eq!(err.code().as_str(), "TOKEN_INVALID");
    }

    #[test]
    fn garbage_token_is_rejected() {
        let err = signer()
            .verify_access("not.a.token", Realm::App)
            .unwrap_err();
        assert_eq!(err.code().as_str(), "TOKEN_INVALID");
    }

    #[test]
    fn refresh_tokens_are_opaque_and_hashed() {
        let token = new_refresh_token();
        assert_eq!(token.len(), 96);
        let digest = refresh_token_digest(&token);
        assert_eq!(digest.len(), 64);
        assert_ne!(digest, token);
        assert_eq!(digest, refresh_token_digest(&token));
    }

    #[test]
    fn registration_validation_names_failed_fields() {
        let req = RegisterRequest {
            email: "nope".into(),
            password: "short".into(),
            display_name: " x ".into(),
            user_type: UserCapability::Buyer,
            country: "TR".into(),
            language: "tr".into(),
        };
        let err = validate_registration(&req).unwrap_err();
        assert_eq!(err.code().as_str(), "VALIDATION_ERROR");
        let details = err.details().unwrap();
        let fields = details["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 3);
    }
}
