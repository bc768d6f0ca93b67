//! API 路由模块
//!
//! # 结构
//!
//! - [`health`] - 健康检查 (公共)
//! - [`products`] - 商品录入 / 补货 / 流水
//! - [`stock`] - 低库存、对账、修正
//! - [`orders`] - 订单生命周期
//! - [`runs`] - 配送批次
//! - [`chat`] - 会话与消息
//! - [`accounts`] - 账号目录 (管理员)
//!
//! `/ws/chat` 由 [`crate::chat::ws`] 自行鉴权 (query 参数令牌)。

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::ServerState;

pub mod accounts;
pub mod chat;
pub mod health;
pub mod orders;
pub mod products;
pub mod runs;
pub mod stock;

/// Build a router with all routes registered (no middleware, no state)
pub fn build_router() -> Router<ServerState> {
    Router::new()
        // Health API - public route
        .merge(health::router())
        // Data APIs - authentication required
        .merge(products::router())
        .merge(stock::router())
        .merge(orders::router())
        .merge(runs::router())
        .merge(chat::router())
        // Admin API
        .merge(accounts::router())
        // Realtime - token in query string
        .route("/ws/chat", get(crate::chat::ws::handle_chat_ws))
}

/// Build a fully configured application with all middleware
///
/// Used by both the HTTP server and router tests
pub fn build_app(state: &ServerState) -> Router<ServerState> {
    build_router()
        // CORS - Handle cross-origin requests
        .layer(CorsLayer::permissive())
        // Trace - Request tracing (logs at INFO level)
        .layer(TraceLayer::new_for_http())
        // Get user context (JWT authentication) - executes before routes, injects CurrentUser
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_auth,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use shared::models::{Account, Role};
    use tower::ServiceExt;

    use crate::auth::JwtConfig;
    use crate::core::Config;

    const ADMIN: i64 = 1;
    const MANAGER: i64 = 2;
    const KEEPER: i64 = 3;
    const CALLER: i64 = 4;
    const DELIVERER: i64 = 5;
    const DISABLED: i64 = 6;

    fn test_state() -> ServerState {
        let mut config = Config::with_overrides("/tmp/depot-api-test", 0);
        config.jwt = JwtConfig {
            secret: "api-test-secret-long-enough-for-hs256".to_string(),
            expiration_minutes: 5,
            issuer: "depot-auth".to_string(),
            audience: "depot-clients".to_string(),
        };
        let state = ServerState::in_memory(config);
        for (id, role, active) in [
            (ADMIN, Role::Admin, true),
            (MANAGER, Role::Manager, true),
            (KEEPER, Role::StockKeeper, true),
            (CALLER, Role::Caller, true),
            (DELIVERER, Role::Deliverer, true),
            (DISABLED, Role::Manager, false),
        ] {
            state
                .accounts
                .upsert(&Account {
                    id,
                    username: format!("user{id}"),
                    display_name: format!("User {id}"),
                    role,
                    is_active: active,
                    created_at: 0,
                })
                .unwrap();
        }
        state
    }

    fn token(state: &ServerState, id: i64) -> String {
        let account = state.accounts.get(id).unwrap().unwrap();
        state
            .jwt_service
            .generate_token(id, &account.username, account.role)
            .unwrap()
    }

    async fn call(
        state: &ServerState,
        method: &str,
        uri: &str,
        user: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(state, id)));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let app = build_app(state).with_state(state.clone());
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn product_body(code: &str, stock: i64) -> Value {
        json!({
            "code": code,
            "name": "Blender",
            "unit_price": "199.00",
            "price_for_two": "349.00",
            "alert_threshold": 2,
            "initial_stock": stock
        })
    }

    fn order_body(product_id: i64, quantity: i64) -> Value {
        json!({
            "client_name": "Salma",
            "client_phone": "+212 600-000000",
            "client_city": "Rabat",
            "product_id": product_id,
            "quantity": quantity
        })
    }

    async fn seed_product(state: &ServerState, code: &str, stock: i64) -> i64 {
        let (status, body) = call(state, "POST", "/api/products", Some(KEEPER), Some(product_body(code, stock))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let state = test_state();
        let (status, body) = call(&state, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_api_requires_active_account() {
        let state = test_state();
        let (status, _) = call(&state, "GET", "/api/products", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&state, "GET", "/api/products", Some(DISABLED), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&state, "GET", "/api/products", Some(CALLER), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_product_intake_gated_by_stock_manage() {
        let state = test_state();
        let (status, _) = call(&state, "POST", "/api/products", Some(CALLER), Some(product_body("SKU-1", 5))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let id = seed_product(&state, "SKU-1", 5).await;
        let (status, body) = call(&state, "GET", &format!("/api/products/{id}"), Some(CALLER), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["available"], 5);

        let (status, body) = call(&state, "GET", &format!("/api/products/{id}/movements"), Some(CALLER), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["kind"], "RESTOCK");

        let (status, _) = call(&state, "POST", "/api/products", Some(KEEPER), Some(product_body("SKU-1", 1))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_transition_gate_follows_target() {
        let state = test_state();
        let product_id = seed_product(&state, "SKU-2", 5).await;
        let (_, order) = call(&state, "POST", "/api/orders", Some(CALLER), Some(order_body(product_id, 2))).await;
        let order_id = order["id"].as_i64().unwrap();
        assert_eq!(order["status"], "NEW");
        assert_eq!(order["amount"], "349.00");

        for to in ["TO_CALL", "VALIDATED"] {
            let (status, body) = call(
                &state,
                "POST",
                &format!("/api/orders/{order_id}/transition"),
                Some(CALLER),
                Some(json!({ "to": to })),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "{body}");
        }

        let (_, run) = call(&state, "POST", "/api/runs", Some(MANAGER), Some(json!({ "deliverer_id": DELIVERER }))).await;
        let run_id = run["id"].as_i64().unwrap();
        let assign = json!({ "to": "ASSIGNED", "run_id": run_id });

        // caller 没有 delivery:manage
        let (status, _) = call(&state, "POST", &format!("/api/orders/{order_id}/transition"), Some(CALLER), Some(assign.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&state, "POST", &format!("/api/orders/{order_id}/transition"), Some(MANAGER), Some(assign)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["deliverer_id"], DELIVERER);

        let (status, body) = call(&state, "POST", &format!("/api/runs/{run_id}/handoff"), Some(KEEPER), None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["movements"], 2);

        let (_, product) = call(&state, "GET", &format!("/api/products/{product_id}"), Some(CALLER), None).await;
        assert_eq!(product["available"], 3);
        assert_eq!(product["reserved_local"], 2);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_conflict() {
        let state = test_state();
        let product_id = seed_product(&state, "SKU-3", 5).await;
        let (_, order) = call(&state, "POST", "/api/orders", Some(CALLER), Some(order_body(product_id, 1))).await;
        let order_id = order["id"].as_i64().unwrap();

        let (status, body) = call(
            &state,
            "POST",
            &format!("/api/orders/{order_id}/transition"),
            Some(ADMIN),
            Some(json!({ "to": "DELIVERED" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "invalid_transition");
    }

    #[tokio::test]
    async fn test_correction_is_admin_only() {
        let state = test_state();
        let product_id = seed_product(&state, "SKU-4", 5).await;
        let correction = json!({ "delta": -1, "reason": "count fix" });

        let (status, _) = call(&state, "POST", &format!("/api/stock/{product_id}/corrections"), Some(MANAGER), Some(correction.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&state, "POST", &format!("/api/stock/{product_id}/corrections"), Some(ADMIN), Some(correction)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["flagged"], true);

        let (status, body) = call(&state, "GET", "/api/stock/negative", Some(MANAGER), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["product_id"], product_id);

        let (status, body) = call(&state, "GET", "/api/stock/audit", Some(MANAGER), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["discrepancies"][0]["discrepancy"], -1);
    }

    #[tokio::test]
    async fn test_bulk_delete_gated() {
        let state = test_state();
        let product_id = seed_product(&state, "SKU-5", 5).await;
        let (_, order) = call(&state, "POST", "/api/orders", Some(CALLER), Some(order_body(product_id, 1))).await;
        let request = json!({ "order_ids": [order["id"]], "reason": "duplicate" });

        let (status, _) = call(&state, "POST", "/api/orders/bulk-delete", Some(MANAGER), Some(request.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&state, "POST", "/api/orders/bulk-delete", Some(ADMIN), Some(request)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["movements"], 0);
    }

    #[tokio::test]
    async fn test_chat_routes() {
        let state = test_state();
        let (status, conversation) = call(
            &state,
            "POST",
            "/api/chat/conversations",
            Some(CALLER),
            Some(json!({ "kind": "PRIVATE", "participant_ids": [DELIVERER] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{conversation}");
        let conversation_id = conversation["id"].as_i64().unwrap();

        let (status, listed) = call(&state, "GET", "/api/chat/conversations", Some(DELIVERER), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["display_name"], "User 4");

        // 非成员读取历史
        let (status, body) = call(
            &state,
            "GET",
            &format!("/api/chat/conversations/{conversation_id}/messages"),
            Some(MANAGER),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "not_participant");

        let (status, _) = call(&state, "GET", "/api/chat/admin/stats", Some(MANAGER), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, stats) = call(&state, "GET", "/api/chat/admin/stats", Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["conversation_count"], 1);
    }

    #[tokio::test]
    async fn test_ws_rejects_missing_token() {
        let state = test_state();
        let (status, _) = call(&state, "GET", "/ws/chat", None, None).await;
        // 非升级请求或缺少令牌都不会建立会话
        assert!(status.is_client_error());
        assert_eq!(state.chat_hub.connection_count(), 0);
    }
}
