//! Relational store adapter: pool bootstrap, schema initialization, and the
//! transaction helper the domain modules build on.
//!
//! The schema is applied as an ordered statement list at boot. Foreign keys
//! default to `ON DELETE RESTRICT`; `CASCADE` is reserved for owned child
//! rows (order items, lot allocations, messages, compliance children).
//! "One active X per subject" rules are partial unique indexes so the
//! database, not the application, is the arbiter under concurrency.

use crate::config::AppConfig;
use crate::error::CoreError;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

pub type Tx<'a> = Transaction<'a, Postgres>;

/// Shared handle over the connection pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(config: &AppConfig) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(config.db_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Pool that defers connecting until first use. Router-level tests use
    /// this to exercise paths that never reach the database.
    pub fn connect_lazy(config: &AppConfig) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect_lazy(&config.database_url)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Tx<'static>, CoreError> {
        Ok(self.pool.begin().await?)
    }

    /// FEFO allocation runs serializable; everything else runs at the
    /// default level with explicit row locks.
    pub async fn begin_serializable(&self) -> Result<Tx<'static>, CoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    pub async fn migrate(&self) -> Result<(), CoreError> {
        for stmt in SCHEMA_STATEMENTS {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

const SCHEMA_STATEMENTS: &[&str] = &[
    // -- identity ---------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS app_users (
        id UUID PRIMARY KEY,
        short_id TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        display_name TEXT NOT NULL,
        display_name_normalized TEXT NOT NULL,
        capability TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        country TEXT NOT NULL,
        language TEXT NOT NULL,
        latitude DOUBLE PRECISION,
        longitude DOUBLE PRECISION,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS app_users_email_key ON app_users (lower(email))"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS app_users_display_name_key
       ON app_users (display_name_normalized)"#,
    r#"
    CREATE TABLE IF NOT EXISTS admin_users (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        display_name TEXT NOT NULL,
        role TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS admin_users_email_key ON admin_users (lower(email))"#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id UUID PRIMARY KEY,
        realm TEXT NOT NULL,
        user_id UUID NOT NULL,
        refresh_token_hash TEXT NOT NULL UNIQUE,
        expires_at TIMESTAMPTZ NOT NULL,
        revoked_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS sessions_user_idx ON sessions (realm, user_id)"#,
    // -- catalog ----------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        sort_order INT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS foods (
        id UUID PRIMARY KEY,
        short_id TEXT NOT NULL UNIQUE,
        seller_id UUID NOT NULL REFERENCES app_users(id) ON DELETE RESTRICT,
        category_id UUID NOT NULL REFERENCES categories(id) ON DELETE RESTRICT,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        price NUMERIC(12,2) NOT NULL,
        allergens JSONB NOT NULL DEFAULT '[]'::jsonb,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        rating NUMERIC(3,2) NOT NULL DEFAULT 0,
        review_count INT NOT NULL DEFAULT 0,
        favorite_count INT NOT NULL DEFAULT 0,
        current_stock INT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS foods_seller_idx ON foods (seller_id)"#,
    r#"
    CREATE TABLE IF NOT EXISTS production_lots (
        id UUID PRIMARY KEY,
        seller_id UUID NOT NULL REFERENCES app_users(id) ON DELETE RESTRICT,
        food_id UUID NOT NULL REFERENCES foods(id) ON DELETE RESTRICT,
        lot_number TEXT NOT NULL UNIQUE,
        produced_at TIMESTAMPTZ NOT NULL,
        use_by TIMESTAMPTZ,
        best_before TIMESTAMPTZ,
        quantity_produced INT NOT NULL,
        quantity_available INT NOT NULL,
        status TEXT NOT NULL,
        recall_reason TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        CONSTRAINT production_lots_quantity_range
            CHECK (quantity_available >= 0 AND quantity_available <= quantity_produced)
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS production_lots_food_idx
       ON production_lots (seller_id, food_id, status)"#,
    // -- orders -----------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id UUID PRIMARY KEY,
        short_id TEXT NOT NULL UNIQUE,
        order_code TEXT NOT NULL UNIQUE,
        buyer_id UUID NOT NULL REFERENCES app_users(id) ON DELETE RESTRICT,
        seller_id UUID NOT NULL REFERENCES app_users(id) ON DELETE RESTRICT,
        status TEXT NOT NULL,
        delivery_type TEXT NOT NULL,
        delivery_address JSONB,
        total_price NUMERIC(12,2) NOT NULL,
        payment_completed BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS orders_buyer_idx ON orders (buyer_id, created_at DESC)"#,
    r#"CREATE INDEX IF NOT EXISTS orders_seller_idx ON orders (seller_id, created_at DESC)"#,
    r#"CREATE INDEX IF NOT EXISTS orders_status_idx ON orders (status, updated_at)"#,
    r#"
    CREATE TABLE IF NOT EXISTS order_items (
        id UUID PRIMARY KEY,
        order_id UUID NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
        food_id UUID NOT NULL REFERENCES foods(id) ON DELETE RESTRICT,
        food_name TEXT NOT NULL,
        unit_price NUMERIC(12,2) NOT NULL,
        quantity INT NOT NULL,
        line_total NUMERIC(12,2) NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS order_items_order_idx ON order_items (order_id)"#,
    r#"
    CREATE TABLE IF NOT EXISTS order_item_lot_allocations (
        id UUID PRIMARY KEY,
        order_item_id UUID NOT NULL REFERENCES order_items(id) ON DELETE CASCADE,
        lot_id UUID NOT NULL REFERENCES production_lots(id) ON DELETE RESTRICT,
        quantity INT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS lot_allocations_lot_idx
       ON order_item_lot_allocations (lot_id)"#,
    r#"
    CREATE TABLE IF NOT EXISTS order_events (
        id UUID PRIMARY KEY,
        order_id UUID NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
        event_type TEXT NOT NULL,
        from_status TEXT,
        to_status TEXT,
        actor_realm TEXT,
        actor_id UUID,
        detail JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS order_events_order_idx
       ON order_events (order_id, created_at)"#,
    // -- payments ---------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS payment_attempts (
        id UUID PRIMARY KEY,
        order_id UUID NOT NULL REFERENCES orders(id) ON DELETE RESTRICT,
        provider TEXT NOT NULL,
        provider_session_id TEXT NOT NULL UNIQUE,
        provider_reference_id TEXT UNIQUE,
        status TEXT NOT NULL,
        signature_valid BOOLEAN,
        callback_payload JSONB NOT NULL DEFAULT '[]'::jsonb,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS payment_attempts_order_idx ON payment_attempts (order_id)"#,
    // -- finance ----------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS commission_settings (
        id UUID PRIMARY KEY,
        commission_rate NUMERIC(5,4) NOT NULL,
        is_active BOOLEAN NOT NULL,
        effective_from TIMESTAMPTZ NOT NULL,
        created_by UUID,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS commission_settings_one_active
       ON commission_settings (is_active) WHERE is_active"#,
    r#"
    CREATE TABLE IF NOT EXISTS order_finance (
        id UUID PRIMARY KEY,
        order_id UUID NOT NULL UNIQUE REFERENCES orders(id) ON DELETE RESTRICT,
        seller_id UUID NOT NULL REFERENCES app_users(id) ON DELETE RESTRICT,
        gross_amount NUMERIC(12,2) NOT NULL,
        commission_rate_snapshot NUMERIC(5,4) NOT NULL,
        commission_amount NUMERIC(12,2) NOT NULL,
        seller_net_amount NUMERIC(12,2) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS order_finance_seller_idx ON order_finance (seller_id)"#,
    r#"
    CREATE TABLE IF NOT EXISTS finance_adjustments (
        id UUID PRIMARY KEY,
        seller_id UUID NOT NULL REFERENCES app_users(id) ON DELETE RESTRICT,
        order_id UUID REFERENCES orders(id) ON DELETE RESTRICT,
        dispute_case_id UUID,
        amount NUMERIC(12,2) NOT NULL,
        reason_code TEXT NOT NULL,
        note TEXT,
        created_by_realm TEXT,
        created_by UUID,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS finance_adjustments_seller_idx
       ON finance_adjustments (seller_id, created_at DESC)"#,
    r#"
    CREATE TABLE IF NOT EXISTS finance_reconciliation_reports (
        id UUID PRIMARY KEY,
        seller_id UUID REFERENCES app_users(id) ON DELETE RESTRICT,
        period_start TIMESTAMPTZ NOT NULL,
        period_end TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL,
        file_url TEXT,
        checksum TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    // -- disputes ---------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS payment_dispute_cases (
        id UUID PRIMARY KEY,
        order_id UUID NOT NULL REFERENCES orders(id) ON DELETE RESTRICT,
        payment_attempt_id UUID REFERENCES payment_attempts(id) ON DELETE RESTRICT,
        case_type TEXT NOT NULL,
        status TEXT NOT NULL,
        reason_code TEXT NOT NULL,
        liability_party TEXT NOT NULL,
        liability_ratio NUMERIC(5,4),
        evidence JSONB NOT NULL DEFAULT '[]'::jsonb,
        opened_by UUID,
        resolved_by UUID,
        resolved_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS dispute_cases_order_idx ON payment_dispute_cases (order_id)"#,
    // -- compliance -------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS seller_compliance_profiles (
        id UUID PRIMARY KEY,
        seller_id UUID NOT NULL UNIQUE REFERENCES app_users(id) ON DELETE RESTRICT,
        status TEXT NOT NULL,
        country TEXT NOT NULL,
        business_name TEXT,
        registration_number TEXT,
        submitted_at TIMESTAMPTZ,
        reviewed_at TIMESTAMPTZ,
        reviewed_by UUID,
        review_note TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS seller_compliance_documents (
        id UUID PRIMARY KEY,
        profile_id UUID NOT NULL REFERENCES seller_compliance_profiles(id) ON DELETE CASCADE,
        doc_type TEXT NOT NULL,
        storage_key TEXT NOT NULL,
        content_type TEXT NOT NULL,
        uploaded_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS seller_compliance_checks (
        id UUID PRIMARY KEY,
        profile_id UUID NOT NULL REFERENCES seller_compliance_profiles(id) ON DELETE CASCADE,
        check_code TEXT NOT NULL,
        required BOOLEAN NOT NULL,
        status TEXT NOT NULL,
        verified_at TIMESTAMPTZ,
        verified_by UUID,
        UNIQUE (profile_id, check_code)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS seller_compliance_events (
        id UUID PRIMARY KEY,
        profile_id UUID NOT NULL REFERENCES seller_compliance_profiles(id) ON DELETE CASCADE,
        event_type TEXT NOT NULL,
        from_status TEXT,
        to_status TEXT,
        actor_realm TEXT,
        actor_id UUID,
        detail JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    // -- disclosure & delivery proof --------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS allergen_disclosure_records (
        id UUID PRIMARY KEY,
        order_id UUID NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
        phase TEXT NOT NULL,
        allergens JSONB NOT NULL,
        confirmation_method TEXT NOT NULL,
        confirmed_by UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (order_id, phase)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS delivery_proof_records (
        id UUID PRIMARY KEY,
        order_id UUID NOT NULL UNIQUE REFERENCES orders(id) ON DELETE CASCADE,
        pin_hash TEXT NOT NULL,
        sent_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        verification_attempts INT NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        verified_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    // -- chat, reviews, favorites, addresses ------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS chats (
        id UUID PRIMARY KEY,
        order_id UUID UNIQUE REFERENCES orders(id) ON DELETE RESTRICT,
        buyer_id UUID NOT NULL REFERENCES app_users(id) ON DELETE RESTRICT,
        seller_id UUID NOT NULL REFERENCES app_users(id) ON DELETE RESTRICT,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id UUID PRIMARY KEY,
        chat_id UUID NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
        sender_id UUID NOT NULL REFERENCES app_users(id) ON DELETE RESTRICT,
        body TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS messages_chat_idx ON messages (chat_id, created_at DESC, id DESC)"#,
    r#"
    CREATE TABLE IF NOT EXISTS reviews (
        id UUID PRIMARY KEY,
        buyer_id UUID NOT NULL REFERENCES app_users(id) ON DELETE RESTRICT,
        food_id UUID NOT NULL REFERENCES foods(id) ON DELETE RESTRICT,
        order_id UUID NOT NULL REFERENCES orders(id) ON DELETE RESTRICT,
        rating INT NOT NULL CHECK (rating BETWEEN 1 AND 5),
        body TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (buyer_id, food_id, order_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS favorites (
        user_id UUID NOT NULL REFERENCES app_users(id) ON DELETE CASCADE,
        food_id UUID NOT NULL REFERENCES foods(id) ON DELETE CASCADE,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (user_id, food_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_addresses (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES app_users(id) ON DELETE CASCADE,
        label TEXT NOT NULL,
        address JSONB NOT NULL,
        is_default BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS user_addresses_one_default
       ON user_addresses (user_id) WHERE is_default"#,
    // -- notifications & media --------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS notification_events (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES app_users(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        payload JSONB NOT NULL,
        read_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS notification_events_user_idx
       ON notification_events (user_id, created_at DESC, id DESC)"#,
    r#"
    CREATE TABLE IF NOT EXISTS media_assets (
        id UUID PRIMARY KEY,
        owner_id UUID NOT NULL REFERENCES app_users(id) ON DELETE RESTRICT,
        kind TEXT NOT NULL,
        storage_key TEXT NOT NULL UNIQUE,
        content_type TEXT NOT NULL,
        byte_size BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    // -- request gating ----------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS idempotency_keys (
        scope TEXT NOT NULL,
        key_hash TEXT NOT NULL,
        request_hash TEXT NOT NULL,
        response_status INT,
        response_body JSONB,
        expires_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (scope, key_hash)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS abuse_risk_events (
        id UUID PRIMARY KEY,
        flow TEXT NOT NULL,
        ip TEXT,
        subject TEXT,
        decision TEXT NOT NULL,
        detail JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS abuse_events_flow_ip_idx
       ON abuse_risk_events (flow, ip, created_at)"#,
    r#"CREATE INDEX IF NOT EXISTS abuse_events_flow_subject_idx
       ON abuse_risk_events (flow, subject, created_at)"#,
    // -- outbox -----------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS outbox_events (
        id UUID PRIMARY KEY,
        event_type TEXT NOT NULL,
        aggregate_type TEXT NOT NULL,
        aggregate_id UUID NOT NULL,
        payload JSONB NOT NULL,
        status TEXT NOT NULL,
        attempt_count INT NOT NULL DEFAULT 0,
        next_attempt_at TIMESTAMPTZ NOT NULL,
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS outbox_claim_idx
       ON outbox_events (status, next_attempt_at)"#,
    r#"
    CREATE TABLE IF NOT EXISTS outbox_dead_letters (
        id UUID PRIMARY KEY,
        event_type TEXT NOT NULL,
        aggregate_type TEXT NOT NULL,
        aggregate_id UUID NOT NULL,
        payload JSONB NOT NULL,
        attempt_count INT NOT NULL,
        last_error TEXT,
        failed_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    // -- audit, retention --------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS admin_audit_logs (
        id UUID PRIMARY KEY,
        admin_id UUID NOT NULL,
        action TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id UUID,
        before_state JSONB,
        after_state JSONB,
        reason TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS admin_audit_entity_idx
       ON admin_audit_logs (entity_type, entity_id)"#,
    r#"
    CREATE TABLE IF NOT EXISTS legal_holds (
        id UUID PRIMARY KEY,
        entity_type TEXT NOT NULL,
        entity_id UUID NOT NULL,
        reason TEXT NOT NULL,
        placed_by UUID NOT NULL,
        released_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (entity_type, entity_id)
    )
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_statement_list_is_well_formed() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            let head = stmt.trim_start();
            assert!(
                head.starts_with("CREATE TABLE IF NOT EXISTS")
                    || head.starts_with("CREATE INDEX IF NOT EXISTS")
                    || head.starts_with("CREATE UNIQUE INDEX IF NOT EXISTS"),
                "unexpected statement: {head}"
            );
        }
    }

    #[test]
    fn money_columns_use_fixed_point() {
        let ddl = SCHEMA_STATEMENTS.join("\n");
        assert!(ddl.contains("total_price NUMERIC(12,2)"));
        assert!(ddl.contains("commission_rate NUMERIC(5,4)"));
        assert!(ddl.contains("commission_rate_snapshot NUMERIC(5,4)"));
    }
}
