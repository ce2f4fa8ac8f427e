use axum::http::Method;
use axum::middleware;
use axum::response::Json;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod auth;
pub mod categories;
pub mod comments;
pub mod posts;
pub mod shop;

/// 成功响应：`{"success": true, "data": ...}`
pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// 成功响应，带分页元信息
pub fn ok_with_meta<T: Serialize>(data: T, meta: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data, "meta": meta }))
}

/// 手动解析 JSON 请求体（需要先从 Request 取 IP 的处理器使用）
pub(crate) async fn parse_json_body<T: serde::de::DeserializeOwned>(
    req: axum::extract::Request,
) -> Result<T, crate::error::ApiError> {
    use crate::error::ApiError;
    let bytes = axum::body::to_bytes(req.into_body(), 256 * 1024)
        .await
        .map_err(|e| ApiError::Validation(format!("请求体读取失败：{e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Validation(format!("请求体解析失败：{e}")))
}

pub fn router(state: AppState) -> Router {
    // 无需认证的路由
    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/posts", get(posts::list))
        .route("/api/posts/{id}", get(posts::detail))
        .route("/api/comments", get(comments::list).post(comments::create))
        .route("/api/categories", get(categories::list))
        .route("/api/products", get(shop::list_products))
        .route("/api/products/{id}", get(shop::product_detail));

    // 需要登录的路由
    let user_routes = Router::new()
        .route("/api/orders", post(shop::place_order).get(shop::my_orders))
        .route("/api/orders/{id}", get(shop::order_detail))
        .route("/api/orders/{id}/pay", post(shop::pay_order))
        .route("/api/orders/{id}/confirm", post(shop::confirm_order))
        .route("/api/orders/{id}/cancel", post(shop::cancel_order))
        .route_layer(middleware::from_fn(auth::require_user));

    // 管理端路由
    let admin_routes = Router::new()
        .route("/api/posts", post(posts::create))
        .route("/api/posts/{id}", put(posts::update).delete(posts::remove))
        .route("/api/posts/{id}/visibility", patch(posts::toggle_visibility))
        .route("/api/comments/admin", get(comments::list_admin))
        .route("/api/comments/{id}/approval", patch(comments::toggle_approval))
        .route("/api/comments/{id}", delete(comments::remove))
        .route("/api/comments/batch-approve", post(comments::batch_approve))
        .route("/api/comments/batch-delete", post(comments::batch_delete))
        .route("/api/categories", post(categories::create))
        .route("/api/categories/{id}", delete(categories::remove))
        .route("/api/products", post(shop::create_product))
        .route("/api/products/admin", get(shop::list_products_admin))
        .route(
            "/api/products/{id}",
            put(shop::update_product).delete(shop::delete_product),
        )
        .route("/api/orders/admin", get(shop::list_orders_admin))
        .route_layer(middleware::from_fn(auth::require_admin));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any);

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth::attach_user))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
