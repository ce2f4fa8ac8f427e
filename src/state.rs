use crate::config::BlogConfig;
use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<BlogConfig>,
    /// 登录速率限制：IP -> 登录尝试时间戳列表
    pub login_limiter: Arc<std::sync::Mutex<HashMap<String, Vec<Instant>>>>,
    /// 评论速率限制：IP -> 最近一次发表时间
    pub comment_limiter: Arc<std::sync::Mutex<HashMap<String, Instant>>>,
    /// 实际使用的 JWT 密钥（优先配置文件，其次数据库持久化自动生成）
    pub jwt_secret: Arc<String>,
}

impl AppState {
    pub async fn new(project_root: PathBuf, config: BlogConfig) -> Result<Self> {
        let db_path = project_root.join("nextblog.db");
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePool::connect(&db_url).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| anyhow::anyhow!("数据库迁移失败：{}", e))?;

        // 解析 JWT secret：配置文件显式设置 > 数据库持久化 > 自动生成
        let jwt_secret = resolve_jwt_secret(&config.auth.jwt_secret, &pool).await?;

        Ok(Self {
            db: pool,
            config: Arc::new(config),
            login_limiter: Arc::new(std::sync::Mutex::new(HashMap::new())),
            comment_limiter: Arc::new(std::sync::Mutex::new(HashMap::new())),
            jwt_secret: Arc::new(jwt_secret),
        })
    }
}

#[cfg(test)]
impl AppState {
    /// 直接由内存库构造，跳过文件路径与迁移（测试池已自带迁移）
    pub(crate) fn for_tests(db: SqlitePool, config: BlogConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
            login_limiter: Arc::new(std::sync::Mutex::new(HashMap::new())),
            comment_limiter: Arc::new(std::sync::Mutex::new(HashMap::new())),
            jwt_secret: Arc::new("测试密钥".to_owned()),
        }
    }
}

const DEFAULT_JWT_SECRET: &str = "CHANGE_ME_IN_PRODUCTION";

/// 配置文件显式设置 > 数据库持久化 > 自动生成新密钥
async fn resolve_jwt_secret(config_secret: &str, db: &SqlitePool) -> Result<String> {
    if config_secret != DEFAULT_JWT_SECRET && !config_secret.is_empty() {
        return Ok(config_secret.to_owned());
    }

    tracing::warn!("JWT secret 未配置或为默认值，将使用自动生成的安全密钥");

    // 尝试从数据库读取已持久化的密钥
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT value FROM site_settings WHERE key = 'jwt_secret'")
            .fetch_optional(db)
            .await?;

    if let Some((secret,)) = existing {
        return Ok(secret);
    }

    // 生成新密钥并持久化到数据库
    let secret = generate_random_secret();
    sqlx::query(
        "INSERT INTO site_settings (key, value) VALUES ('jwt_secret', ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(&secret)
    .execute(db)
    .await?;

    tracing::info!("已自动生成 JWT secret 并持久化到数据库");
    Ok(secret)
}

fn generate_random_secret() -> String {
    use argon2::password_hash::rand_core::{OsRng, RngCore};

    let mut bytes = [0u8; 64];
    OsRng.fill_bytes(&mut bytes);
    // 转为 hex 字符串（128 字符）
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
