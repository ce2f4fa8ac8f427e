use crate::error::{ApiError, ApiResult};
use crate::repository::CategoryRepository;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
pub struct CreatePayload {
    pub name: String,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let repo = CategoryRepository::new(state.db.clone());
    Ok(crate::api::ok(repo.list().await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreatePayload>,
) -> ApiResult<Json<Value>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("分类名不能为空".into()));
    }

    let repo = CategoryRepository::new(state.db.clone());
    if repo.name_taken(name).await? {
        return Err(ApiError::Conflict("分类名已存在".into()));
    }
    Ok(crate::api::ok(repo.create(name).await?))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let repo = CategoryRepository::new(state.db.clone());
    if !repo.delete(&id).await? {
        return Err(ApiError::NotFound("分类不存在".into()));
    }
    Ok(crate::api::ok(json!({ "id": id })))
}
