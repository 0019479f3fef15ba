//! Product and recipe handlers
//!
//! Products are matched to existing rows by promoted id, then sku, then
//! barcode; stock lands in a named location. Recipes are matched by name
//! and their ingredient lines are replaced on every promotion.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{required, text, PromotionContext, PromotionError, PromotionHandler, PromotionOutcome};

pub struct ProductHandler;

impl ProductHandler {
    async fn find_existing(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        existing_promoted_id: Option<&str>,
        record: &Map<String, Value>,
    ) -> Result<Option<String>, PromotionError> {
        let candidates = [
            ("id", existing_promoted_id.map(str::to_string)),
            ("sku", text(record, "sku")),
            ("barcode", text(record, "barcode")),
        ];
        for (column, value) in candidates {
            let Some(value) = value else { continue };
            let found: Option<String> = sqlx::query_scalar(&format!(
                "SELECT id FROM products WHERE tenant_id = ? AND {} = ? LIMIT 1",
                column
            ))
            .bind(tenant_id)
            .bind(&value)
            .fetch_optional(&mut *conn)
            .await?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Location id by name; created on demand only when allowed
    async fn location_id(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        name: &str,
        auto_create: bool,
    ) -> Result<String, PromotionError> {
        let found: Option<String> = sqlx::query_scalar("SELECT id FROM locations WHERE tenant_id = ? AND name = ?")
            .bind(tenant_id)
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
        if let Some(id) = found {
            return Ok(id);
        }
        if !auto_create {
            return Err(PromotionError::Configuration(format!(
                "unknown location '{}' and auto_create_locations is off",
                name
            )));
        }
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO locations (id, tenant_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(tenant_id)
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *conn)
            .await?;
        tracing::info!(tenant_id, location = name, "Location created during promotion");
        Ok(id)
    }
}

#[async_trait]
impl PromotionHandler for ProductHandler {
    fn target(&self) -> &'static str {
        "products"
    }

    async fn promote(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        record: &Map<String, Value>,
        existing_promoted_id: Option<&str>,
        ctx: &PromotionContext,
    ) -> Result<PromotionOutcome, PromotionError> {
        let name = required(record, "name")?;
        let price = text(record, "price");
        if price.is_none() && !ctx.options.allow_missing_price {
            return Err(PromotionError::InvalidRecord(
                "'price' is missing and allow_missing_price is off".into(),
            ));
        }

        // Resolve the stock location before writing anything
        let stock = text(record, "stock");
        let location = match &stock {
            Some(_) => match ctx.options.target_location.clone().or_else(|| text(record, "location")) {
                Some(location) => Some(
                    Self::location_id(conn, tenant_id, &location, ctx.options.auto_create_locations).await?,
                ),
                None => {
                    return Err(PromotionError::Configuration(
                        "record carries stock but no location is known".into(),
                    ))
                }
            },
            None => None,
        };

        let now = Utc::now().to_rfc3339();
        let existing = Self::find_existing(conn, tenant_id, existing_promoted_id, record).await?;
        let id = match existing {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE products SET
                        name = ?, sku = COALESCE(?, sku), barcode = COALESCE(?, barcode),
                        price = COALESCE(?, price), cost = COALESCE(?, cost),
                        category = COALESCE(?, category), unit = COALESCE(?, unit),
                        tax_rate = COALESCE(?, tax_rate), updated_at = ?
                    WHERE tenant_id = ? AND id = ?
                    "#,
                )
                .bind(&name)
                .bind(text(record, "sku"))
                .bind(text(record, "barcode"))
                .bind(&price)
                .bind(text(record, "cost"))
                .bind(text(record, "category"))
                .bind(text(record, "unit"))
                .bind(text(record, "tax_rate"))
                .bind(&now)
                .bind(tenant_id)
                .bind(&id)
                .execute(&mut *conn)
                .await?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO products (
                        id, tenant_id, name, sku, barcode, price, cost, category, unit, tax_rate,
                        active, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(tenant_id)
                .bind(&name)
                .bind(text(record, "sku"))
                .bind(text(record, "barcode"))
                .bind(&price)
                .bind(text(record, "cost"))
                .bind(text(record, "category"))
                .bind(text(record, "unit"))
                .bind(text(record, "tax_rate"))
                .bind(ctx.options.auto_activate)
                .bind(&now)
                .bind(&now)
                .execute(&mut *conn)
                .await?;
                id
            }
        };

        if let (Some(quantity), Some(location_id)) = (stock, location) {
            sqlx::query(
                r#"
                INSERT INTO product_stock (product_id, location_id, tenant_id, quantity, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (product_id, location_id) DO UPDATE SET
                    quantity = excluded.quantity,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&id)
            .bind(&location_id)
            .bind(tenant_id)
            .bind(&quantity)
            .bind(&now)
            .execute(&mut *conn)
            .await?;
        }

        Ok(PromotionOutcome::created(id))
    }
}

/// One recipe line
#[derive(Debug, Clone, PartialEq)]
pub struct IngredientLine {
    pub ingredient: String,
    pub quantity: Option<String>,
    pub unit: Option<String>,
}

/// Ingredient lines from a recipe record.
///
/// `ingredients` holds `name:qty:unit` entries separated by `;` or
/// newlines (qty and unit optional); otherwise the single
/// `ingredient`/`quantity`/`unit` columns describe one line.
pub fn ingredient_lines(record: &Map<String, Value>) -> Vec<IngredientLine> {
    if let Some(list) = text(record, "ingredients") {
        return list
            .split(|c: char| c == ';' || c == '\n')
            .filter_map(|entry| {
                let mut parts = entry.split(':').map(str::trim);
                let ingredient = parts.next().filter(|p| !p.is_empty())?.to_string();
                let quantity = parts.next().filter(|p| !p.is_empty()).map(|q| q.replace(',', "."));
                let unit = parts.next().filter(|p| !p.is_empty()).map(str::to_string);
                Some(IngredientLine {
                    ingredient,
                    quantity,
                    unit,
                })
            })
            .collect();
    }
    match text(record, "ingredient") {
        Some(ingredient) => vec![IngredientLine {
            ingredient,
            quantity: text(record, "quantity"),
            unit: text(record, "unit"),
        }],
        None => Vec::new(),
    }
}

pub struct RecipeHandler;

#[async_trait]
impl PromotionHandler for RecipeHandler {
    fn target(&self) -> &'static str {
        "recipes"
    }

    async fn promote(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        record: &Map<String, Value>,
        existing_promoted_id: Option<&str>,
        _ctx: &PromotionContext,
    ) -> Result<PromotionOutcome, PromotionError> {
        let name = required(record, "name")?;
        let now = Utc::now().to_rfc3339();

        let by_id = match existing_promoted_id {
            Some(id) => sqlx::query("SELECT id FROM recipes WHERE tenant_id = ? AND id = ?")
                .bind(tenant_id)
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
                .map(|row| row.get::<String, _>("id")),
            None => None,
        };
        let existing = match by_id {
            Some(id) => Some(id),
            None => sqlx::query_scalar("SELECT id FROM recipes WHERE tenant_id = ? AND name = ? LIMIT 1")
                .bind(tenant_id)
                .bind(&name)
                .fetch_optional(&mut *conn)
                .await?,
        };

        let id = match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE recipes SET name = ?, category = COALESCE(?, category), yield = COALESCE(?, yield), \
                     updated_at = ? WHERE tenant_id = ? AND id = ?",
                )
                .bind(&name)
                .bind(text(record, "category"))
                .bind(text(record, "yield"))
                .bind(&now)
                .bind(tenant_id)
                .bind(&id)
                .execute(&mut *conn)
                .await?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO recipes (id, tenant_id, name, category, yield, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(tenant_id)
                .bind(&name)
                .bind(text(record, "category"))
                .bind(text(record, "yield"))
                .bind(&now)
                .bind(&now)
                .execute(&mut *conn)
                .await?;
                id
            }
        };

        let lines = ingredient_lines(record);
        if !lines.is_empty() {
            sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = ?")
                .bind(&id)
                .execute(&mut *conn)
                .await?;
            for line in &lines {
                sqlx::query(
                    "INSERT INTO recipe_ingredients (id, recipe_id, ingredient, quantity, unit) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&id)
                .bind(&line.ingredient)
                .bind(&line.quantity)
                .bind(&line.unit)
                .execute(&mut *conn)
                .await?;
            }
        }

        Ok(PromotionOutcome::created(id))
    }
}
