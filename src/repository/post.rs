use crate::content::{extract_cover_image, extract_excerpt};
use anyhow::Result;
use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

/// 列表查询参数；`include_hidden` 由 API 层根据调用者角色显式决定
pub struct PostListQuery {
    pub page: u32,
    pub page_size: u32,
    pub include_hidden: bool,
    pub category_id: Option<String>,
    pub search: Option<String>,
}

/// 文章写入参数
pub struct PostWriteParams<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub category_id: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub is_hidden: bool,
}

/// 列表页的文章摘要投影
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub id: String,
    pub title: String,
    pub excerpt: String,
    pub create_time: String,
    pub category: Option<String>,
    pub author: Option<String>,
    pub cover_image: Option<String>,
}

pub struct PostPage {
    pub items: Vec<PostSummary>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: i64,
    pub total_pages: u32,
    pub has_more: bool,
}

#[derive(Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PostDetail {
    pub id: String,
    pub title: String,
    pub content: String,
    pub create_time: String,
    pub category: Option<String>,
    pub author: Option<String>,
    pub comment_count: i64,
}

#[derive(Clone)]
pub struct PostRepository {
    db: SqlitePool,
}

impl PostRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// 文章列表（数据库级分页）
    ///
    /// 过滤条件与 COUNT 查询共用，先取总数再取当前页切片，
    /// 按创建时间倒序（最新优先）。
    pub async fn list(&self, query: &PostListQuery) -> Result<PostPage> {
        let page = query.page.max(1);
        let page_size = query.page_size.clamp(1, 100);
        let pattern = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{s}%"));

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM posts p");
        push_filters(&mut count_qb, query, &pattern);
        let total_count: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.db)
            .await?;

        let total_pages = (total_count as u64).div_ceil(page_size as u64) as u32;
        let offset = (page as i64 - 1) * page_size as i64;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT p.id, p.title, p.content, p.created_at, \
             c.name AS category, \
             COALESCE(NULLIF(u.nickname, ''), u.username) AS author \
             FROM posts p \
             LEFT JOIN categories c ON p.category_id = c.id \
             LEFT JOIN users u ON p.user_id = u.id",
        );
        push_filters(&mut qb, query, &pattern);
        qb.push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ")
            .push_bind(page_size as i64)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb.build().fetch_all(&self.db).await?;

        let items = rows
            .iter()
            .map(|row| {
                let content: &str = row.get("content");
                PostSummary {
                    id: row.get("id"),
                    title: row.get("title"),
                    excerpt: extract_excerpt(content),
                    create_time: row.get("created_at"),
                    category: row.get("category"),
                    author: row.get("author"),
                    cover_image: extract_cover_image(content),
                }
            })
            .collect();

        Ok(PostPage {
            items,
            page,
            page_size,
            total_count,
            total_pages,
            has_more: page < total_pages,
        })
    }

    /// 文章详情；不存在或「隐藏且无权限」时返回 None
    pub async fn get_detail(&self, id: &str, include_hidden: bool) -> Result<Option<PostDetail>> {
        let sql = if include_hidden {
            "SELECT p.id, p.title, p.content, p.created_at AS create_time, \
             c.name AS category, \
             COALESCE(NULLIF(u.nickname, ''), u.username) AS author, \
             (SELECT COUNT(*) FROM comments cm WHERE cm.post_id = p.id) AS comment_count \
             FROM posts p \
             LEFT JOIN categories c ON p.category_id = c.id \
             LEFT JOIN users u ON p.user_id = u.id \
             WHERE p.id = ?"
        } else {
            "SELECT p.id, p.title, p.content, p.created_at AS create_time, \
             c.name AS category, \
             COALESCE(NULLIF(u.nickname, ''), u.username) AS author, \
             (SELECT COUNT(*) FROM comments cm WHERE cm.post_id = p.id) AS comment_count \
             FROM posts p \
             LEFT JOIN categories c ON p.category_id = c.id \
             LEFT JOIN users u ON p.user_id = u.id \
             WHERE p.id = ? AND p.is_hidden = 0"
        };

        let detail = sqlx::query_as::<_, PostDetail>(sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(detail)
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM posts WHERE id = ?)")
                .bind(id)
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }

    pub async fn create(&self, p: &PostWriteParams<'_>) -> Result<String> {
        let id = ulid::Ulid::new().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO posts (id, title, content, is_hidden, category_id, user_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(p.title)
        .bind(p.content)
        .bind(p.is_hidden)
        .bind(p.category_id)
        .bind(p.user_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        Ok(id)
    }

    pub async fn update(&self, id: &str, p: &PostWriteParams<'_>) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE posts SET title = ?, content = ?, is_hidden = ?, category_id = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(p.title)
        .bind(p.content)
        .bind(p.is_hidden)
        .bind(p.category_id)
        .bind(&now)
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 切换可见性，返回切换后的 is_hidden；文章不存在返回 None
    pub async fn toggle_visibility(&self, id: &str) -> Result<Option<bool>> {
        let current: Option<bool> =
            sqlx::query_scalar("SELECT is_hidden FROM posts WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.db)
                .await?;

        let Some(hidden) = current else {
            return Ok(None);
        };

        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query("UPDATE posts SET is_hidden = ?, updated_at = ? WHERE id = ?")
            .bind(!hidden)
            .bind(&now)
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(Some(!hidden))
    }

    /// 删除文章及其全部评论（同一事务，保证不留孤儿评论）
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM comments WHERE post_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

/// 列表与计数共用的过滤条件
fn push_filters<'q>(
    qb: &mut QueryBuilder<'q, Sqlite>,
    query: &'q PostListQuery,
    pattern: &'q Option<String>,
) {
    qb.push(" WHERE 1 = 1");
    if !query.include_hidden {
        qb.push(" AND p.is_hidden = 0");
    }
    if let Some(category_id) = &query.category_id {
        qb.push(" AND p.category_id = ").push_bind(category_id);
    }
    if let Some(pattern) = pattern {
        qb.push(" AND (p.title LIKE ")
            .push_bind(pattern)
            .push(" OR p.content LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}
