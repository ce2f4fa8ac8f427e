use crate::api::auth::{AuthUser, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::repository::order::{OrderLine, PlaceOrderOutcome, TransitionOutcome};
use crate::repository::{OrderRepository, ProductRepository, ProductWriteParams};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::Extension;
use serde::Deserialize;
use serde_json::{json, Value};

// ── 商品 ──

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPayload {
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub stock: i64,
}

pub async fn list_products(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let repo = ProductRepository::new(state.db.clone());
    Ok(crate::api::ok(repo.list_active().await?))
}

/// 后台商品列表，含已下架商品
pub async fn list_products_admin(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let repo = ProductRepository::new(state.db.clone());
    Ok(crate::api::ok(repo.list_all().await?))
}

pub async fn product_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let repo = ProductRepository::new(state.db.clone());
    let product = repo
        .get(&id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| ApiError::NotFound("商品不存在".into()))?;
    Ok(crate::api::ok(product))
}

fn validate_product(payload: &ProductPayload) -> ApiResult<()> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::Validation("商品名不能为空".into()));
    }
    if payload.price_cents < 0 {
        return Err(ApiError::Validation("价格不能为负".into()));
    }
    if payload.stock < 0 {
        return Err(ApiError::Validation("库存不能为负".into()));
    }
    Ok(())
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<ProductPayload>,
) -> ApiResult<Json<Value>> {
    validate_product(&payload)?;
    let repo = ProductRepository::new(state.db.clone());
    let product = repo
        .create(&ProductWriteParams {
            name: payload.name.trim(),
            description: payload.description.as_deref(),
            price_cents: payload.price_cents,
            stock: payload.stock,
        })
        .await?;
    Ok(crate::api::ok(product))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ProductPayload>,
) -> ApiResult<Json<Value>> {
    validate_product(&payload)?;
    let repo = ProductRepository::new(state.db.clone());
    let updated = repo
        .update(
            &id,
            &ProductWriteParams {
                name: payload.name.trim(),
                description: payload.description.as_deref(),
                price_cents: payload.price_cents,
                stock: payload.stock,
            },
        )
        .await?;
    if !updated {
        return Err(ApiError::NotFound("商品不存在".into()));
    }
    Ok(crate::api::ok(json!({ "id": id })))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let repo = ProductRepository::new(state.db.clone());
    if !repo.delete(&id).await? {
        return Err(ApiError::NotFound("商品不存在".into()));
    }
    Ok(crate::api::ok(json!({ "id": id })))
}

// ── 订单 ──

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub items: Vec<OrderItemPayload>,
    pub remark: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemPayload {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOrderParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub status: Option<String>,
}

/// 登录路由组保证 CurrentUser 非空
fn current_user(current: &CurrentUser) -> ApiResult<&AuthUser> {
    current.0.as_ref().ok_or(ApiError::Unauthorized)
}

pub async fn place_order(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(payload): Json<OrderPayload>,
) -> ApiResult<Json<Value>> {
    let user = current_user(&current)?;
    if payload.items.is_empty() {
        return Err(ApiError::Validation("订单不能为空".into()));
    }
    if payload.items.iter().any(|i| i.quantity <= 0) {
        return Err(ApiError::Validation("数量必须为正".into()));
    }

    let lines: Vec<OrderLine> = payload
        .items
        .iter()
        .map(|i| OrderLine {
            product_id: &i.product_id,
            quantity: i.quantity,
        })
        .collect();

    let repo = OrderRepository::new(state.db.clone());
    match repo.place(&user.id, &lines, payload.remark.as_deref()).await? {
        PlaceOrderOutcome::Placed(detail) => {
            tracing::info!(order_no = %detail.order.order_no, user = %user.username, "新订单");
            Ok(crate::api::ok(detail))
        }
        PlaceOrderOutcome::ProductUnavailable(product_id) => Err(ApiError::Validation(format!(
            "商品不可购买：{product_id}"
        ))),
        PlaceOrderOutcome::InsufficientStock {
            product_id,
            available,
        } => Err(ApiError::Validation(format!(
            "库存不足：{product_id}（剩余 {available}）"
        ))),
    }
}

pub async fn my_orders(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    let user = current_user(&current)?;
    let repo = OrderRepository::new(state.db.clone());
    Ok(crate::api::ok(repo.list_for_user(&user.id).await?))
}

pub async fn order_detail(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = current_user(&current)?;
    let repo = OrderRepository::new(state.db.clone());
    let detail = repo
        .get_detail(&id, &user.id, user.is_admin())
        .await?
        .ok_or_else(|| ApiError::NotFound("订单不存在".into()))?;
    Ok(crate::api::ok(detail))
}

fn transition_response(outcome: TransitionOutcome) -> ApiResult<Json<Value>> {
    match outcome {
        TransitionOutcome::Done(order) => Ok(crate::api::ok(order)),
        TransitionOutcome::NotFound => Err(ApiError::NotFound("订单不存在".into())),
        TransitionOutcome::InvalidState { current } => Err(ApiError::Conflict(format!(
            "订单当前状态为 {current}，不允许该操作"
        ))),
    }
}

pub async fn pay_order(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = current_user(&current)?;
    let repo = OrderRepository::new(state.db.clone());
    transition_response(repo.pay(&id, &user.id).await?)
}

pub async fn confirm_order(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = current_user(&current)?;
    let repo = OrderRepository::new(state.db.clone());
    transition_response(repo.complete(&id, &user.id).await?)
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = current_user(&current)?;
    let repo = OrderRepository::new(state.db.clone());
    transition_response(repo.cancel(&id, &user.id).await?)
}

pub async fn list_orders_admin(
    State(state): State<AppState>,
    Query(params): Query<AdminOrderParams>,
) -> ApiResult<Json<Value>> {
    let repo = OrderRepository::new(state.db.clone());
    let page = params.page.unwrap_or(1);
    let page_size = params
        .page_size
        .unwrap_or(state.config.api.default_page_size);
    let (orders, total) = repo
        .list_admin(page, page_size, params.status.as_deref())
        .await?;
    Ok(crate::api::ok_with_meta(
        orders,
        json!({ "page": page, "pageSize": page_size, "totalCount": total }),
    ))
}
