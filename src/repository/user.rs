use anyhow::Result;
use sqlx::SqlitePool;

/// 用户完整行（仅服务端使用，password_hash 不出仓储层）
#[derive(Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub created_at: String,
}

/// 新用户写入参数
pub struct NewUser<'a> {
    pub username: &'a str,
    pub password_hash: &'a str,
    pub role: &'a str,
    pub nickname: Option<&'a str>,
    pub email: Option<&'a str>,
}

#[derive(Clone)]
pub struct UserRepository {
    db: SqlitePool,
}

impl UserRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, password_hash, role, nickname, email, created_at \
             FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, password_hash, role, nickname, email, created_at \
             FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    pub async fn username_taken(&self, username: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.db)
            .await?;
        Ok(count > 0)
    }

    pub async fn create(&self, nu: &NewUser<'_>) -> Result<UserRow> {
        let id = ulid::Ulid::new().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, role, nickname, email, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(nu.username)
        .bind(nu.password_hash)
        .bind(nu.role)
        .bind(nu.nickname)
        .bind(nu.email)
        .bind(&now)
        .execute(&self.db)
        .await?;
        Ok(UserRow {
            id,
            username: nu.username.to_owned(),
            password_hash: nu.password_hash.to_owned(),
            role: nu.role.to_owned(),
            nickname: nu.nickname.map(str::to_owned),
            email: nu.email.map(str::to_owned),
            created_at: now,
        })
    }

    /// 初始化管理员：已存在则重置密码并提权，否则新建
    pub async fn upsert_admin(&self, username: &str, password_hash: &str) -> Result<UserRow> {
        if let Some(existing) = self.find_by_username(username).await? {
            sqlx::query("UPDATE users SET password_hash = ?, role = 'admin' WHERE id = ?")
                .bind(password_hash)
                .bind(&existing.id)
                .execute(&self.db)
                .await?;
            return Ok(UserRow {
                password_hash: password_hash.to_owned(),
                role: "admin".to_owned(),
                ..existing
            });
        }
        self.create(&NewUser {
            username,
            password_hash,
            role: "admin",
            nickname: None,
            email: None,
        })
        .await
    }
}
