use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

/// 商品行，金额一律以分计
#[derive(Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub stock: i64,
    pub is_active: bool,
    pub created_at: String,
}

/// 商品写入参数
pub struct ProductWriteParams<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub price_cents: i64,
    pub stock: i64,
}

#[derive(Clone)]
pub struct ProductRepository {
    db: SqlitePool,
}

impl ProductRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// 前台商品列表：仅上架商品，最新优先
    pub async fn list_active(&self) -> Result<Vec<ProductRow>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, description, price_cents, stock, is_active, created_at \
             FROM products WHERE is_active = 1 ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// 后台商品列表：含下架商品
    pub async fn list_all(&self) -> Result<Vec<ProductRow>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, description, price_cents, stock, is_active, created_at \
             FROM products ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ProductRow>> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, description, price_cents, stock, is_active, created_at \
             FROM products WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    pub async fn create(&self, p: &ProductWriteParams<'_>) -> Result<ProductRow> {
        let id = ulid::Ulid::new().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO products (id, name, description, price_cents, stock, is_active, created_at) \
             VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&id)
        .bind(p.name)
        .bind(p.description)
        .bind(p.price_cents)
        .bind(p.stock)
        .bind(&now)
        .execute(&self.db)
        .await?;
        Ok(ProductRow {
            id,
            name: p.name.to_owned(),
            description: p.description.map(str::to_owned),
            price_cents: p.price_cents,
            stock: p.stock,
            is_active: true,
            created_at: now,
        })
    }

    pub async fn update(&self, id: &str, p: &ProductWriteParams<'_>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE products SET name = ?, description = ?, price_cents = ?, stock = ? WHERE id = ?",
        )
        .bind(p.name)
        .bind(p.description)
        .bind(p.price_cents)
        .bind(p.stock)
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE products SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// 删除商品。已被订单引用的只做下架，保全历史订单明细。
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let referenced: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM order_items WHERE product_id = ?")
                .bind(id)
                .fetch_one(&self.db)
                .await?;
        if referenced > 0 {
            return self.set_active(id, false).await;
        }
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
