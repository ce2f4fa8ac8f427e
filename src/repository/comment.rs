use anyhow::Result;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;

/// 未留名访客的默认昵称
pub const DEFAULT_GUEST_NAME: &str = "匿名访客";

/// 作者兜底显示名（理论上不应出现）
const FALLBACK_AUTHOR: &str = "匿名";

/// 扁平加载的评论行（含作者解析所需的用户字段）
#[derive(Clone, sqlx::FromRow)]
pub struct CommentRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub content: String,
    pub created_at: String,
    pub guest_name: Option<String>,
    pub nickname: Option<String>,
    pub username: Option<String>,
}

/// 树形评论节点
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNode {
    pub id: String,
    pub author: String,
    pub content: String,
    pub create_time: String,
    pub parent_id: Option<String>,
    pub children: Vec<CommentNode>,
}

/// 新评论写入参数
pub struct NewComment<'a> {
    pub post_id: &'a str,
    pub content: &'a str,
    pub guest_name: Option<&'a str>,
    pub parent_id: Option<&'a str>,
    /// 已登录作者（id, username, 是否管理员）
    pub user: Option<(&'a str, &'a str, bool)>,
}

/// 刚创建的评论（直接回给前端展示，免二次查库）
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedComment {
    pub id: String,
    pub author: String,
    pub content: String,
    pub create_time: String,
    pub parent_id: Option<String>,
    pub is_approved: bool,
}

/// 后台审核列表行
#[derive(Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdminComment {
    pub id: String,
    pub content: String,
    pub create_time: String,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub is_approved: bool,
    pub post_id: String,
    pub post_title: Option<String>,
}

/// 作者显示名解析：注册用户昵称 > 用户名 > 访客名 > 兜底「匿名」
pub fn resolve_author(
    nickname: Option<&str>,
    username: Option<&str>,
    guest_name: Option<&str>,
) -> String {
    if let Some(username) = username {
        return match nickname {
            Some(n) if !n.is_empty() => n.to_owned(),
            _ => username.to_owned(),
        };
    }
    match guest_name {
        Some(g) if !g.is_empty() => g.to_owned(),
        _ => FALLBACK_AUTHOR.to_owned(),
    }
}

/// 由扁平评论集构建树形结构（显式迭代，不做递归下降）
///
/// 根评论最新优先，仅对根评论分页；每层回复按创建顺序排列。
/// 父评论不在集合内的回复（如父评论未过审）整枝丢弃。
pub fn build_comment_tree(rows: &[CommentRow], page: u32, page_size: u32) -> Vec<CommentNode> {
    let page = page.max(1) as usize;
    let page_size = page_size.clamp(1, 100) as usize;

    let by_id: HashMap<&str, &CommentRow> =
        rows.iter().map(|r| (r.id.as_str(), r)).collect();

    // parent_id -> 回复 id 列表（入参已按创建时间升序，天然保持创建顺序）
    let mut children_of: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut roots: Vec<&CommentRow> = Vec::new();
    for row in rows {
        match row.parent_id.as_deref() {
            None => roots.push(row),
            Some(parent) if by_id.contains_key(parent) => {
                children_of.entry(parent).or_default().push(&row.id);
            }
            Some(_) => {}
        }
    }

    roots.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    let paged_roots: Vec<&str> = roots
        .iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .map(|r| r.id.as_str())
        .collect();

    // 从分页后的根出发广度优先展开，记录装配顺序
    let mut order: Vec<&str> = paged_roots.clone();
    let mut cursor = 0;
    while cursor < order.len() {
        if let Some(kids) = children_of.get(order[cursor]) {
            order.extend(kids.iter().copied());
        }
        cursor += 1;
    }

    // 逆序装配：深层先成形，再整棵挂到父节点
    let mut assembled: HashMap<&str, CommentNode> = HashMap::new();
    for id in order.iter().rev() {
        let Some(row) = by_id.get(id) else { continue };
        let children = children_of
            .get(id)
            .map(|kids| kids.iter().filter_map(|k| assembled.remove(k)).collect())
            .unwrap_or_default();
        assembled.insert(
            *id,
            CommentNode {
                id: row.id.clone(),
                author: resolve_author(
                    row.nickname.as_deref(),
                    row.username.as_deref(),
                    row.guest_name.as_deref(),
                ),
                content: row.content.clone(),
                create_time: row.created_at.clone(),
                parent_id: row.parent_id.clone(),
                children,
            },
        );
    }

    paged_roots
        .iter()
        .filter_map(|id| assembled.remove(id))
        .collect()
}

#[derive(Clone)]
pub struct CommentRepository {
    db: SqlitePool,
}

impl CommentRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// 文章的全部已过审评论，按创建时间升序扁平加载
    pub async fn list_flat(&self, post_id: &str) -> Result<Vec<CommentRow>> {
        let rows = sqlx::query_as::<_, CommentRow>(
            "SELECT c.id, c.parent_id, c.content, c.created_at, c.guest_name, \
             u.nickname, u.username \
             FROM comments c \
             LEFT JOIN users u ON c.user_id = u.id \
             WHERE c.post_id = ? AND c.is_approved = 1 \
             ORDER BY c.created_at ASC, c.id ASC",
        )
        .bind(post_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// 「X 条评论」计数：只数已过审的顶层评论
    pub async fn count(&self, post_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM comments \
             WHERE post_id = ? AND parent_id IS NULL AND is_approved = 1",
        )
        .bind(post_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    /// 创建评论
    ///
    /// 登录用户挂 user_id 并以用户名记录 guest_name；游客未留名时
    /// 落默认昵称。命中敏感词且作者不是管理员时进入审核队列。
    pub async fn create(
        &self,
        nc: &NewComment<'_>,
        spam_keywords: &[String],
    ) -> Result<CreatedComment> {
        let id = ulid::Ulid::new().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let (user_id, guest_name, is_admin) = match nc.user {
            Some((uid, username, admin)) => (Some(uid), username.to_owned(), admin),
            None => {
                let name = match nc.guest_name.map(str::trim) {
                    Some(g) if !g.is_empty() => g.to_owned(),
                    _ => DEFAULT_GUEST_NAME.to_owned(),
                };
                (None, name, false)
            }
        };

        let lowered = nc.content.to_lowercase();
        let is_spam = spam_keywords
            .iter()
            .any(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()));
        let is_approved = !is_spam || is_admin;

        sqlx::query(
            "INSERT INTO comments (id, post_id, parent_id, user_id, guest_name, content, is_approved, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(nc.post_id)
        .bind(nc.parent_id)
        .bind(user_id)
        .bind(&guest_name)
        .bind(nc.content)
        .bind(is_approved)
        .bind(&now)
        .execute(&self.db)
        .await?;

        Ok(CreatedComment {
            id,
            author: guest_name,
            content: nc.content.to_owned(),
            create_time: now,
            parent_id: nc.parent_id.map(str::to_owned),
            is_approved,
        })
    }

    /// 后台评论列表（可按审核状态过滤），最新优先
    pub async fn list_admin(
        &self,
        page: u32,
        page_size: u32,
        approved: Option<bool>,
    ) -> Result<(Vec<AdminComment>, i64)> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let offset = (page as i64 - 1) * page_size as i64;

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM comments c WHERE 1 = 1");
        if let Some(approved) = approved {
            count_qb.push(" AND c.is_approved = ").push_bind(approved);
        }
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.db).await?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT c.id, c.content, c.created_at AS create_time, c.guest_name, \
             c.guest_email, c.is_approved, c.post_id, p.title AS post_title \
             FROM comments c \
             LEFT JOIN posts p ON c.post_id = p.id \
             WHERE 1 = 1",
        );
        if let Some(approved) = approved {
            qb.push(" AND c.is_approved = ").push_bind(approved);
        }
        qb.push(" ORDER BY c.created_at DESC, c.id DESC LIMIT ")
            .push_bind(page_size as i64)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb
            .build_query_as::<AdminComment>()
            .fetch_all(&self.db)
            .await?;
        Ok((rows, total))
    }

    /// 切换审核状态，返回切换后的值；评论不存在返回 None
    pub async fn toggle_approval(&self, id: &str) -> Result<Option<bool>> {
        let current: Option<bool> =
            sqlx::query_scalar("SELECT is_approved FROM comments WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.db)
                .await?;

        let Some(approved) = current else {
            return Ok(None);
        };

        sqlx::query("UPDATE comments SET is_approved = ? WHERE id = ?")
            .bind(!approved)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(Some(!approved))
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// 批量过审，返回实际更新条数
    pub async fn batch_approve(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE comments SET is_approved = 1 WHERE is_approved = 0 AND id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        let result = qb.build().execute(&self.db).await?;
        Ok(result.rows_affected())
    }

    pub async fn batch_delete(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM comments WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        let result = qb.build().execute(&self.db).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::test_pool;

    fn row(
        id: &str,
        parent: Option<&str>,
        created_at: &str,
        guest: Option<&str>,
        nickname: Option<&str>,
        username: Option<&str>,
    ) -> CommentRow {
        CommentRow {
            id: id.to_owned(),
            parent_id: parent.map(str::to_owned),
            content: format!("内容 {id}"),
            created_at: created_at.to_owned(),
            guest_name: guest.map(str::to_owned),
            nickname: nickname.map(str::to_owned),
            username: username.map(str::to_owned),
        }
    }

    #[test]
    fn author_resolution_priority() {
        assert_eq!(resolve_author(Some("Bob"), Some("bob123"), None), "Bob");
        assert_eq!(resolve_author(Some(""), Some("bob123"), None), "bob123");
        assert_eq!(resolve_author(None, None, Some("Alice")), "Alice");
        assert_eq!(resolve_author(None, None, None), "匿名");
    }

    #[test]
    fn tree_nests_replies_to_arbitrary_depth() {
        let rows = vec![
            row("a", None, "2026-01-01T00:00:01+00:00", Some("甲"), None, None),
            row("b", Some("a"), "2026-01-01T00:00:02+00:00", Some("乙"), None, None),
            row("c", Some("b"), "2026-01-01T00:00:03+00:00", Some("丙"), None, None),
            row("d", Some("a"), "2026-01-01T00:00:04+00:00", Some("丁"), None, None),
        ];

        let tree = build_comment_tree(&rows, 1, 10);
        assert_eq!(tree.len(), 1);
        let root = &tree[0];
        assert_eq!(root.id, "a");
        // 回复按创建顺序
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].id, "b");
        assert_eq!(root.children[1].id, "d");
        // 第三层
        assert_eq!(root.children[0].children[0].id, "c");
    }

    #[test]
    fn roots_are_paginated_newest_first() {
        let rows: Vec<CommentRow> = (0..7)
            .map(|i| {
                row(
                    &format!("c{i}"),
                    None,
                    &format!("2026-01-01T00:00:{i:02}+00:00"),
                    Some("访客"),
                    None,
                    None,
                )
            })
            .collect();

        let first = build_comment_tree(&rows, 1, 3);
        assert_eq!(
            first.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            ["c6", "c5", "c4"]
        );

        let last = build_comment_tree(&rows, 3, 3);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id, "c0");
    }

    #[test]
    fn reply_under_missing_parent_is_dropped() {
        // 父评论未过审（不在加载集合内），整枝丢弃
        let rows = vec![
            row("a", None, "2026-01-01T00:00:01+00:00", Some("甲"), None, None),
            row("x", Some("gone"), "2026-01-01T00:00:02+00:00", Some("乙"), None, None),
        ];
        let tree = build_comment_tree(&rows, 1, 10);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, "a");
    }

    #[test]
    fn deep_thread_does_not_overflow() {
        // 千层盖楼，递归实现会爆栈
        let mut rows = vec![row("n0", None, "2026-01-01T00:00:00+00:00", Some("楼主"), None, None)];
        for i in 1..1000 {
            rows.push(row(
                &format!("n{i}"),
                Some(&format!("n{}", i - 1)),
                "2026-01-01T00:00:01+00:00",
                Some("楼中楼"),
                None,
                None,
            ));
        }

        let tree = build_comment_tree(&rows, 1, 10);
        let mut depth = 0;
        let mut node = &tree[0];
        while let Some(child) = node.children.first() {
            node = child;
            depth += 1;
        }
        assert_eq!(depth, 999);
    }

    async fn seed_post(pool: &SqlitePool) -> String {
        let id = ulid::Ulid::new().to_string();
        sqlx::query(
            "INSERT INTO posts (id, title, content, created_at, updated_at) VALUES (?, '文', '', ?, ?)",
        )
        .bind(&id)
        .bind("2026-01-01T00:00:00+00:00")
        .bind("2026-01-01T00:00:00+00:00")
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn guest_name_defaults_when_blank() {
        let pool = test_pool().await;
        let repo = CommentRepository::new(pool.clone());
        let post_id = seed_post(&pool).await;

        let created = repo
            .create(
                &NewComment {
                    post_id: &post_id,
                    content: "Nice post",
                    guest_name: None,
                    parent_id: None,
                    user: None,
                },
                &[],
            )
            .await
            .unwrap();

        assert_eq!(created.author, DEFAULT_GUEST_NAME);
        assert!(created.is_approved);

        let stored: String =
            sqlx::query_scalar("SELECT guest_name FROM comments WHERE id = ?")
                .bind(&created.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored, DEFAULT_GUEST_NAME);
    }

    #[tokio::test]
    async fn spam_keyword_sends_comment_to_review_queue() {
        let pool = test_pool().await;
        let repo = CommentRepository::new(pool.clone());
        let post_id = seed_post(&pool).await;
        let keywords = vec!["casino".to_owned()];

        let spam = repo
            .create(
                &NewComment {
                    post_id: &post_id,
                    content: "Best CASINO in town",
                    guest_name: Some("spammer"),
                    parent_id: None,
                    user: None,
                },
                &keywords,
            )
            .await
            .unwrap();
        assert!(!spam.is_approved);

        // 管理员不受敏感词限制
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, role, created_at) \
             VALUES ('admin-id', 'admin', 'x', 'admin', '2026-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .unwrap();
        let admin = repo
            .create(
                &NewComment {
                    post_id: &post_id,
                    content: "关于 casino 一词的说明",
                    guest_name: None,
                    parent_id: None,
                    user: Some(("admin-id", "admin", true)),
                },
                &keywords,
            )
            .await
            .unwrap();
        assert!(admin.is_approved);

        // 未过审评论不进入公开列表，但出现在审核队列
        let flat = repo.list_flat(&post_id).await.unwrap();
        assert_eq!(flat.len(), 1);
        let (pending, total) = repo.list_admin(1, 10, Some(false)).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(pending[0].id, spam.id);
    }

    #[tokio::test]
    async fn count_only_covers_approved_top_level() {
        let pool = test_pool().await;
        let repo = CommentRepository::new(pool.clone());
        let post_id = seed_post(&pool).await;

        let root = repo
            .create(
                &NewComment {
                    post_id: &post_id,
                    content: "顶层",
                    guest_name: None,
                    parent_id: None,
                    user: None,
                },
                &[],
            )
            .await
            .unwrap();
        repo.create(
            &NewComment {
                post_id: &post_id,
                content: "回复",
                guest_name: None,
                parent_id: Some(&root.id),
                user: None,
            },
            &[],
        )
        .await
        .unwrap();

        assert_eq!(repo.count(&post_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn moderation_toggle_and_batch_ops() {
        let pool = test_pool().await;
        let repo = CommentRepository::new(pool.clone());
        let post_id = seed_post(&pool).await;
        let keywords = vec!["spam".to_owned()];

        let mut ids = Vec::new();
        for i in 0..3 {
            let c = repo
                .create(
                    &NewComment {
                        post_id: &post_id,
                        content: &format!("spam {i}"),
                        guest_name: None,
                        parent_id: None,
                        user: None,
                    },
                    &keywords,
                )
                .await
                .unwrap();
            ids.push(c.id);
        }

        assert_eq!(repo.toggle_approval(&ids[0]).await.unwrap(), Some(true));
        assert_eq!(repo.toggle_approval("missing").await.unwrap(), None);

        // 已过审的不再计入
        assert_eq!(repo.batch_approve(&ids).await.unwrap(), 2);
        assert_eq!(repo.batch_delete(&ids).await.unwrap(), 3);
        assert!(!repo.delete(&ids[0]).await.unwrap());
    }
}
