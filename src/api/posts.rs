use crate::api::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::repository::post::{PostListQuery, PostWriteParams};
use crate::repository::{CategoryRepository, PostRepository};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::Extension;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
    pub category_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPayload {
    pub title: String,
    pub content: String,
    pub category_id: Option<String>,
    #[serde(default)]
    pub is_hidden: bool,
}

fn is_admin(current: &CurrentUser) -> bool {
    current.0.as_ref().is_some_and(|u| u.is_admin())
}

pub async fn list(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let repo = PostRepository::new(state.db.clone());
    let page = repo
        .list(&PostListQuery {
            page: params.page.unwrap_or(1),
            page_size: params
                .page_size
                .unwrap_or(state.config.api.default_page_size)
                .min(state.config.api.max_page_size),
            include_hidden: is_admin(&current),
            category_id: params.category_id,
            search: params.search,
        })
        .await?;

    Ok(crate::api::ok_with_meta(
        page.items,
        json!({
            "page": page.page,
            "pageSize": page.page_size,
            "totalCount": page.total_count,
            "totalPages": page.total_pages,
            "hasMore": page.has_more,
        }),
    ))
}

pub async fn detail(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let repo = PostRepository::new(state.db.clone());
    let post = repo
        .get_detail(&id, is_admin(&current))
        .await?
        .ok_or_else(|| ApiError::NotFound("文章不存在".into()))?;
    Ok(crate::api::ok(post))
}

/// 标题与分类校验，创建/更新共用
async fn validate_payload(state: &AppState, payload: &PostPayload) -> ApiResult<()> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::Validation("标题不能为空".into()));
    }
    if let Some(category_id) = &payload.category_id {
        let categories = CategoryRepository::new(state.db.clone());
        if !categories.exists(category_id).await? {
            return Err(ApiError::Validation("分类不存在".into()));
        }
    }
    Ok(())
}

pub async fn create(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(payload): Json<PostPayload>,
) -> ApiResult<Json<Value>> {
    validate_payload(&state, &payload).await?;
    let author_id = current.0.as_ref().map(|u| u.id.as_str());

    let repo = PostRepository::new(state.db.clone());
    let id = repo
        .create(&PostWriteParams {
            title: payload.title.trim(),
            content: &payload.content,
            category_id: payload.category_id.as_deref(),
            user_id: author_id,
            is_hidden: payload.is_hidden,
        })
        .await?;

    tracing::info!(post_id = %id, "文章已创建");
    Ok(crate::api::ok(json!({ "id": id })))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(payload): Json<PostPayload>,
) -> ApiResult<Json<Value>> {
    validate_payload(&state, &payload).await?;
    let author_id = current.0.as_ref().map(|u| u.id.as_str());

    let repo = PostRepository::new(state.db.clone());
    let updated = repo
        .update(
            &id,
            &PostWriteParams {
                title: payload.title.trim(),
                content: &payload.content,
                category_id: payload.category_id.as_deref(),
                user_id: author_id,
                is_hidden: payload.is_hidden,
            },
        )
        .await?;
    if !updated {
        return Err(ApiError::NotFound("文章不存在".into()));
    }
    Ok(crate::api::ok(json!({ "id": id })))
}

pub async fn toggle_visibility(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let repo = PostRepository::new(state.db.clone());
    let hidden = repo
        .toggle_visibility(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("文章不存在".into()))?;
    Ok(crate::api::ok(json!({ "id": id, "isHidden": hidden })))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let repo = PostRepository::new(state.db.clone());
    if !repo.delete(&id).await? {
        return Err(ApiError::NotFound("文章不存在".into()));
    }
    tracing::info!(post_id = %id, "文章已删除");
    Ok(crate::api::ok(json!({ "id": id })))
}
