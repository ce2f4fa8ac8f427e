use crate::error::{ApiError, ApiResult};
use crate::repository::user::NewUser;
use crate::repository::UserRepository;
use crate::state::AppState;
use anyhow::{Context, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{Json, Response};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// 60 秒窗口内同一 IP 最多尝试登录次数
const LOGIN_ATTEMPT_LIMIT: usize = 5;
const LOGIN_WINDOW: Duration = Duration::from_secs(60);

// ── 数据结构 ──

/// 请求上解码出的登录态
#[derive(Clone)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// 所有请求都会带上的扩展：匿名时为 None
#[derive(Clone)]
pub struct CurrentUser(pub Option<AuthUser>);

#[derive(Deserialize)]
pub struct RegisterPayload {
    pub username: String,
    pub password: String,
    pub nickname: Option<String>,
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    role: String,
    exp: usize,
    jti: String,
}

// ── 密码工具 ──

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("密码哈希失败: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("解析密码哈希失败: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

// ── JWT 工具 ──

fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse().context("无效的时间数值")?;
    let secs = match unit {
        "d" => num * 86400,
        "h" => num * 3600,
        "m" => num * 60,
        "s" => num,
        _ => anyhow::bail!("不支持的时间单位: {unit}"),
    };
    Ok(Duration::from_secs(secs))
}

fn create_jwt(user: &AuthUser, jwt_secret: &str, expires_in: &str) -> Result<String> {
    let duration = parse_duration(expires_in)?;
    let exp = chrono::Utc::now().timestamp() as usize + duration.as_secs() as usize;

    let claims = Claims {
        sub: user.id.clone(),
        username: user.username.clone(),
        role: user.role.clone(),
        exp,
        jti: ulid::Ulid::new().to_string(),
    };

    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .context("JWT 编码失败")
}

fn decode_jwt(token: &str, jwt_secret: &str) -> Result<Claims> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .context("JWT 解码失败")?;
    Ok(data.claims)
}

// ── 中间件 ──

/// 取客户端 IP：反代头优先，退回连接地址
pub fn client_ip(req: &Request) -> String {
    for header in ["x-forwarded-for", "x-real-ip"] {
        if let Some(value) = req.headers().get(header) {
            if let Ok(s) = value.to_str() {
                if let Some(first) = s.split(',').next() {
                    let first = first.trim();
                    if !first.is_empty() {
                        return first.to_owned();
                    }
                }
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// 解析 Bearer token（缺失或无效都按匿名处理），注入 CurrentUser 扩展
pub async fn attach_user(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let user = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| decode_jwt(token, &state.jwt_secret).ok())
        .map(|claims| AuthUser {
            id: claims.sub,
            username: claims.username,
            role: claims.role,
        });

    req.extensions_mut().insert(CurrentUser(user));
    next.run(req).await
}

/// 必须登录
pub async fn require_user(req: Request, next: Next) -> Result<Response, ApiError> {
    match req.extensions().get::<CurrentUser>() {
        Some(CurrentUser(Some(_))) => Ok(next.run(req).await),
        _ => Err(ApiError::Unauthorized),
    }
}

/// 必须管理员
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    match req.extensions().get::<CurrentUser>() {
        Some(CurrentUser(Some(user))) if user.is_admin() => Ok(next.run(req).await),
        Some(CurrentUser(Some(_))) => Err(ApiError::Forbidden),
        _ => Err(ApiError::Unauthorized),
    }
}

// ── 路由处理 ──

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> ApiResult<Json<Value>> {
    let username = payload.username.trim();
    if username.chars().count() < 3 || username.chars().count() > 50 {
        return Err(ApiError::Validation("用户名长度应为 3-50 个字符".into()));
    }
    if payload.password.chars().count() < 6 {
        return Err(ApiError::Validation("密码至少 6 个字符".into()));
    }

    let users = UserRepository::new(state.db.clone());
    if users.username_taken(username).await? {
        return Err(ApiError::Conflict("用户名已被注册".into()));
    }

    let password_hash = hash_password(&payload.password)?;
    let created = users
        .create(&NewUser {
            username,
            password_hash: &password_hash,
            role: "user",
            nickname: payload.nickname.as_deref().map(str::trim).filter(|n| !n.is_empty()),
            email: payload.email.as_deref().map(str::trim).filter(|e| !e.is_empty()),
        })
        .await?;

    tracing::info!(username = %created.username, "新用户注册");
    Ok(crate::api::ok(serde_json::json!({
        "id": created.id,
        "username": created.username,
    })))
}

pub async fn login(State(state): State<AppState>, req: Request) -> ApiResult<Json<Value>> {
    let ip = client_ip(&req);

    // 同一 IP 限 5 次 / 60 秒
    {
        let mut limiter = state
            .login_limiter
            .lock()
            .map_err(|_| anyhow::anyhow!("登录限流锁中毒"))?;
        let now = Instant::now();
        let attempts = limiter.entry(ip.clone()).or_default();
        attempts.retain(|t| now.duration_since(*t) < LOGIN_WINDOW);
        if attempts.len() >= LOGIN_ATTEMPT_LIMIT {
            tracing::warn!(%ip, "登录尝试过于频繁");
            return Err(ApiError::RateLimited);
        }
        attempts.push(now);
    }

    let payload: LoginPayload = crate::api::parse_json_body(req).await?;

    let users = UserRepository::new(state.db.clone());
    let Some(user) = users.find_by_username(payload.username.trim()).await? else {
        return Err(ApiError::Unauthorized);
    };
    if !verify_password(&payload.password, &user.password_hash)? {
        return Err(ApiError::Unauthorized);
    }

    let auth_user = AuthUser {
        id: user.id,
        username: user.username,
        role: user.role,
    };
    let token = create_jwt(
        &auth_user,
        &state.jwt_secret,
        &state.config.auth.jwt_expires_in,
    )?;

    tracing::info!(username = %auth_user.username, "用户登录");
    Ok(crate::api::ok(serde_json::json!({
        "token": token,
        "username": auth_user.username,
        "nickname": user.nickname,
        "role": auth_user.role,
    })))
}
