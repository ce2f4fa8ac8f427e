use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

/// 分类及其下可见文章数
#[derive(Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub id: String,
    pub name: String,
    pub post_count: i64,
}

#[derive(Clone)]
pub struct CategoryRepository {
    db: SqlitePool,
}

impl CategoryRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// 全部分类，名称排序；计数只含未隐藏文章
    pub async fn list(&self) -> Result<Vec<CategorySummary>> {
        let rows = sqlx::query_as::<_, CategorySummary>(
            "SELECT c.id, c.name, \
             (SELECT COUNT(*) FROM posts p WHERE p.category_id = c.id AND p.is_hidden = 0) AS post_count \
             FROM categories c ORDER BY c.name COLLATE NOCASE ASC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE id = ?")
            .bind(id)
            .fetch_one(&self.db)
            .await?;
        Ok(count > 0)
    }

    /// 名称查重不分大小写（建表时 COLLATE NOCASE）
    pub async fn name_taken(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE name = ?")
            .bind(name)
            .fetch_one(&self.db)
            .await?;
        Ok(count > 0)
    }

    pub async fn create(&self, name: &str) -> Result<CategorySummary> {
        let id = ulid::Ulid::new().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query("INSERT INTO categories (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(&now)
            .execute(&self.db)
            .await?;
        Ok(CategorySummary {
            id,
            name: name.to_owned(),
            post_count: 0,
        })
    }

    /// 删除分类；其下文章转为未分类（外键 ON DELETE SET NULL）
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::test_pool;

    #[tokio::test]
    async fn name_uniqueness_is_case_insensitive() {
        let pool = test_pool().await;
        let repo = CategoryRepository::new(pool);

        repo.create("Tech").await.unwrap();
        assert!(repo.name_taken("tech").await.unwrap());
        assert!(repo.name_taken("TECH").await.unwrap());
        assert!(!repo.name_taken("Life").await.unwrap());
    }

    #[tokio::test]
    async fn post_count_excludes_hidden_posts() {
        let pool = test_pool().await;
        let repo = CategoryRepository::new(pool.clone());
        let cat = repo.create("随笔").await.unwrap();

        for (i, hidden) in [(0, false), (1, false), (2, true)] {
            sqlx::query(
                "INSERT INTO posts (id, title, content, category_id, is_hidden, created_at, updated_at) \
                 VALUES (?, ?, '', ?, ?, ?, ?)",
            )
            .bind(format!("p{i}"))
            .bind(format!("文 {i}"))
            .bind(&cat.id)
            .bind(hidden)
            .bind("2026-01-01T00:00:00+00:00")
            .bind("2026-01-01T00:00:00+00:00")
            .execute(&pool)
            .await
            .unwrap();
        }

        let list = repo.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].post_count, 2);
    }

    #[tokio::test]
    async fn deleting_category_detaches_posts() {
        let pool = test_pool().await;
        let repo = CategoryRepository::new(pool.clone());
        let cat = repo.create("Tech").await.unwrap();

        sqlx::query(
            "INSERT INTO posts (id, title, content, category_id, created_at, updated_at) \
             VALUES ('p1', '文', '', ?, ?, ?)",
        )
        .bind(&cat.id)
        .bind("2026-01-01T00:00:00+00:00")
        .bind("2026-01-01T00:00:00+00:00")
        .execute(&pool)
        .await
        .unwrap();

        assert!(repo.delete(&cat.id).await.unwrap());

        let category_id: Option<String> =
            sqlx::query_scalar("SELECT category_id FROM posts WHERE id = 'p1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(category_id.is_none());
    }
}
