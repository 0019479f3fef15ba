//! Imports table definitions
//!
//! Created idempotently at startup. Ids are UUID text, timestamps RFC 3339
//! text, structured columns JSON text.

use sqlx::SqlitePool;
use tally_common::Result;

const PIPELINE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS import_mappings (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        name TEXT NOT NULL,
        source_type TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 1,
        fields TEXT NOT NULL DEFAULT '{}',
        transforms TEXT NOT NULL DEFAULT '{}',
        defaults TEXT NOT NULL DEFAULT '{}',
        dedupe_keys TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (tenant_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS import_batches (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        source_type TEXT NOT NULL,
        origin TEXT NOT NULL,
        file_key TEXT,
        mapping_id TEXT REFERENCES import_mappings(id) ON DELETE RESTRICT,
        status TEXT NOT NULL,
        suggested_parser TEXT,
        classification_confidence REAL,
        ai_enhanced INTEGER NOT NULL DEFAULT 0,
        requires_confirmation INTEGER NOT NULL DEFAULT 0,
        confirmed_by TEXT,
        confirmed_at TEXT,
        classification TEXT,
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_batches_tenant ON import_batches(tenant_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS import_items (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        batch_id TEXT NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
        idx INTEGER NOT NULL,
        raw TEXT NOT NULL,
        normalized TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL,
        errors TEXT NOT NULL DEFAULT '[]',
        dedupe_hash TEXT,
        idempotency_key TEXT NOT NULL,
        promoted_to TEXT,
        promoted_id TEXT,
        promoted_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (tenant_id, idempotency_key)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_items_batch ON import_items(batch_id, idx)",
    "CREATE INDEX IF NOT EXISTS ix_items_dedupe ON import_items(tenant_id, dedupe_hash)",
    // At most one promoted item per logical document and tenant
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS ux_items_promoted_hash
        ON import_items(tenant_id, dedupe_hash)
        WHERE status = 'PROMOTED' AND dedupe_hash IS NOT NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS import_corrections (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        item_id TEXT NOT NULL REFERENCES import_items(id) ON DELETE CASCADE,
        field TEXT NOT NULL,
        old_value TEXT NOT NULL,
        new_value TEXT NOT NULL,
        user_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_corrections_item ON import_corrections(item_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS import_lineage (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        item_id TEXT NOT NULL REFERENCES import_items(id) ON DELETE CASCADE,
        promoted_to TEXT NOT NULL,
        promoted_ref TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_lineage_item ON import_lineage(item_id)",
    r#"
    CREATE TABLE IF NOT EXISTS classification_feedback (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        batch_id TEXT,
        fingerprint TEXT,
        header_tokens TEXT NOT NULL DEFAULT '[]',
        suggested TEXT NOT NULL,
        confirmed TEXT NOT NULL,
        confidence REAL NOT NULL DEFAULT 0,
        heuristic_version INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_feedback_tenant ON classification_feedback(tenant_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS classifier_snapshots (
        version INTEGER PRIMARY KEY,
        weights TEXT NOT NULL,
        metrics TEXT,
        validated INTEGER NOT NULL DEFAULT 0,
        pinned INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_settings (
        tenant_id TEXT PRIMARY KEY,
        default_currency TEXT,
        default_country TEXT,
        require_currency INTEGER,
        require_category INTEGER,
        updated_at TEXT NOT NULL
    )
    "#,
];

/// Business records produced by promotion
const DESTINATION_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        invoice_number TEXT NOT NULL,
        invoice_date TEXT NOT NULL,
        due_date TEXT,
        issuer_name TEXT,
        issuer_tax_id TEXT,
        customer_name TEXT,
        customer_tax_id TEXT,
        net TEXT,
        tax TEXT,
        total TEXT NOT NULL,
        currency TEXT NOT NULL,
        country TEXT,
        description TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bank_transactions (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        date TEXT NOT NULL,
        value_date TEXT,
        description TEXT,
        amount TEXT NOT NULL,
        balance TEXT,
        reference TEXT,
        account TEXT,
        currency TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS expenses (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        date TEXT NOT NULL,
        vendor_name TEXT,
        vendor_tax_id TEXT,
        description TEXT,
        category TEXT,
        amount TEXT NOT NULL,
        tax TEXT,
        currency TEXT NOT NULL,
        payment_method TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        name TEXT NOT NULL,
        sku TEXT,
        barcode TEXT,
        price TEXT,
        cost TEXT,
        category TEXT,
        unit TEXT,
        tax_rate TEXT,
        active INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_products_sku ON products(tenant_id, sku)",
    r#"
    CREATE TABLE IF NOT EXISTS locations (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (tenant_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS product_stock (
        product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
        location_id TEXT NOT NULL REFERENCES locations(id) ON DELETE CASCADE,
        tenant_id TEXT NOT NULL,
        quantity TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (product_id, location_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recipes (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        name TEXT NOT NULL,
        category TEXT,
        yield TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recipe_ingredients (
        id TEXT PRIMARY KEY,
        recipe_id TEXT NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
        ingredient TEXT NOT NULL,
        quantity TEXT,
        unit TEXT
    )
    "#,
];

/// Create every imports and destination table (idempotent)
pub async fn init_import_tables(pool: &SqlitePool) -> Result<()> {
    for statement in PIPELINE_TABLES.iter().chain(DESTINATION_TABLES) {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!(
        statements = PIPELINE_TABLES.len() + DESTINATION_TABLES.len(),
        "Imports schema initialized"
    );
    Ok(())
}
