use crate::api::auth::{client_ip, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::repository::comment::NewComment;
use crate::repository::{CommentRepository, PostRepository};
use crate::state::AppState;
use axum::extract::{Path, Query, Request, State};
use axum::response::Json;
use axum::Extension;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub post_id: String,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayload {
    pub post_id: String,
    pub content: String,
    pub guest_name: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub approved: Option<bool>,
}

#[derive(Deserialize)]
pub struct BatchPayload {
    pub ids: Vec<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let posts = PostRepository::new(state.db.clone());
    if !posts.exists(&params.post_id).await? {
        return Err(ApiError::NotFound("文章不存在".into()));
    }

    let page = params.page.unwrap_or(1).max(1);
    let page_size = params
        .page_size
        .unwrap_or(state.config.api.default_page_size)
        .clamp(1, state.config.api.max_page_size);

    let repo = CommentRepository::new(state.db.clone());
    let rows = repo.list_flat(&params.post_id).await?;
    let total_count = repo.count(&params.post_id).await?;
    let comments = crate::repository::comment::build_comment_tree(&rows, page, page_size);

    // hasMore 以顶层计数推进（原接口语义）
    let has_more = (page as i64) * (page_size as i64) < total_count;
    Ok(Json(json!({
        "success": true,
        "totalCount": total_count,
        "comments": comments,
        "hasMore": has_more,
    })))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    req: Request,
) -> ApiResult<Json<Value>> {
    let ip = client_ip(&req);
    let payload: CreatePayload = crate::api::parse_json_body(req).await?;

    if payload.content.trim().is_empty() {
        return Err(ApiError::Validation("评论内容不能为空".into()));
    }

    let posts = PostRepository::new(state.db.clone());
    if !posts.exists(&payload.post_id).await? {
        return Err(ApiError::NotFound("文章不存在".into()));
    }

    // 同一 IP 两次评论之间的最小间隔
    let window = Duration::from_secs(state.config.comments.rate_limit_seconds);
    {
        let limiter = state
            .comment_limiter
            .lock()
            .map_err(|_| anyhow::anyhow!("评论限流锁中毒"))?;
        if let Some(last) = limiter.get(&ip) {
            if last.elapsed() < window {
                tracing::warn!(%ip, "评论过于频繁");
                return Err(ApiError::RateLimited);
            }
        }
    }

    let repo = CommentRepository::new(state.db.clone());

    if let Some(parent_id) = &payload.parent_id {
        let rows = repo.list_flat(&payload.post_id).await?;
        if !rows.iter().any(|r| &r.id == parent_id) {
            return Err(ApiError::Validation("被回复的评论不存在".into()));
        }
    }

    // 校验全部通过后才占用该 IP 的时间窗
    state
        .comment_limiter
        .lock()
        .map_err(|_| anyhow::anyhow!("评论限流锁中毒"))?
        .insert(ip, Instant::now());

    let user = current
        .0
        .as_ref()
        .map(|u| (u.id.as_str(), u.username.as_str(), u.is_admin()));
    let created = repo
        .create(
            &NewComment {
                post_id: &payload.post_id,
                content: payload.content.trim(),
                guest_name: payload.guest_name.as_deref(),
                parent_id: payload.parent_id.as_deref(),
                user,
            },
            &state.config.comments.spam_keywords,
        )
        .await?;

    Ok(crate::api::ok(created))
}

pub async fn list_admin(
    State(state): State<AppState>,
    Query(params): Query<AdminListParams>,
) -> ApiResult<Json<Value>> {
    let repo = CommentRepository::new(state.db.clone());
    let page = params.page.unwrap_or(1);
    let page_size = params
        .page_size
        .unwrap_or(state.config.api.default_page_size);
    let (comments, total) = repo.list_admin(page, page_size, params.approved).await?;

    Ok(crate::api::ok_with_meta(
        comments,
        json!({ "page": page, "pageSize": page_size, "totalCount": total }),
    ))
}

pub async fn toggle_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let repo = CommentRepository::new(state.db.clone());
    let approved = repo
        .toggle_approval(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("评论不存在".into()))?;
    Ok(crate::api::ok(json!({ "id": id, "isApproved": approved })))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let repo = CommentRepository::new(state.db.clone());
    if !repo.delete(&id).await? {
        return Err(ApiError::NotFound("评论不存在".into()));
    }
    Ok(crate::api::ok(json!({ "id": id })))
}

pub async fn batch_approve(
    State(state): State<AppState>,
    Json(payload): Json<BatchPayload>,
) -> ApiResult<Json<Value>> {
    let repo = CommentRepository::new(state.db.clone());
    let affected = repo.batch_approve(&payload.ids).await?;
    Ok(crate::api::ok(json!({ "affected": affected })))
}

pub async fn batch_delete(
    State(state): State<AppState>,
    Json(payload): Json<BatchPayload>,
) -> ApiResult<Json<Value>> {
    let repo = CommentRepository::new(state.db.clone());
    let affected = repo.batch_delete(&payload.ids).await?;
    Ok(crate::api::ok(json!({ "affected": affected })))
}
