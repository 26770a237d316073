//! 路由定义
//!
//! - 健康检查：/health, /wolf/status
//! - 客户端：/wolf/clients[/:client_id]
//! - 设备：/wolf/clients/:client_id/devices[/:device_id]
//! - 测量通道与最新值：/wolf/clients/:client_id/devices/:device_id/drains/*

use super::AppState;
use super::handlers::*;
use axum::{
    Router,
    routing::{get, put},
};

pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/wolf/status", get(status))
        .route("/wolf/clients", get(list_clients))
        .route("/wolf/clients/:client_id", get(get_client))
        .route("/wolf/clients/:client_id/devices", get(list_devices))
        .route("/wolf/clients/:client_id/devices/:device_id", get(get_device))
        .route(
            "/wolf/clients/:client_id/devices/:device_id/drains",
            get(list_drains),
        )
        .route(
            "/wolf/clients/:client_id/devices/:device_id/drains/last",
            get(get_last),
        )
        .route(
            "/wolf/clients/:client_id/devices/:device_id/drains/:measure_id",
            get(get_drain),
        )
        .route(
            "/wolf/clients/:client_id/devices/:device_id/drains/:measure_id/last",
            get(get_measure_last),
        )
        .route(
            "/wolf/clients/:client_id/devices/:device_id/drains/:measure_id/measures",
            put(put_measure),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use domain::{MappingRow, Record, WriteRequest};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use wolf_cache::{FaultReporter, InMemoryCache, MeasurementCache};

    fn row(measure_id: &str, rw: bool) -> MappingRow {
        MappingRow {
            measure_id: measure_id.to_string(),
            description: format!("{measure_id} channel"),
            unit: "V".to_string(),
            measure_type: "f".to_string(),
            rw,
            scale: 1.0,
            offset: 0.0,
            address: "40001".to_string(),
        }
    }

    async fn app() -> (Router, mpsc::Receiver<WriteRequest>) {
        let cache = Arc::new(InMemoryCache::new("1"));
        cache.register_client("plant").await.expect("client");
        cache
            .store_meta("M1", "modbus_tcp.meter", "main meter", &[row("V", false), row("SP", true)])
            .await
            .expect("meta");
        cache
            .store(&Record::new("1", "M1", 1000.0).with_measure("V", 230.0).with_measure("SP", 5.0))
            .await
            .expect("store");
        let (writeback, receiver) = mpsc::channel(1);
        let state = AppState {
            cache,
            writeback,
            faults: FaultReporter::detached(),
        };
        (create_api_router().with_state(state), receiver)
    }

    async fn call(app: Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn lists_clients_and_devices() {
        let (app, _rx) = app().await;
        let (status, json) = call(app.clone(), Method::GET, "/wolf/clients", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"][0]["client_id"], "1");
        assert_eq!(json["data"][0]["description"], "plant");

        let (status, json) = call(app.clone(), Method::GET, "/wolf/clients/1/devices", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["data"][0]["device_descr"], "main meter");

        let (status, _) = call(app, Method::GET, "/wolf/clients/1/devices/NOPE", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn drains_expose_metadata() {
        let (app, _rx) = app().await;
        let (status, json) = call(app.clone(), Method::GET, "/wolf/clients/1/devices/M1/drains", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"].as_array().map(Vec::len), Some(2));

        let (status, json) = call(app, Method::GET, "/wolf/clients/1/devices/M1/drains/SP", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["rw"], true);
        assert_eq!(json["data"]["driver_id"], "modbus_tcp.meter");
    }

    #[tokio::test]
    async fn last_values_can_be_filtered() {
        let (app, _rx) = app().await;
        let (status, json) = call(app.clone(), Method::GET, "/wolf/clients/1/devices/M1/drains/last", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["measures"].as_array().map(Vec::len), Some(2));

        let (status, json) = call(app.clone(), Method::GET, "/wolf/clients/1/devices/M1/drains/V/last", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["measures"][0]["measure_id"], "V");
        assert_eq!(json["data"]["measures"][0]["value"], 230.0);

        let (status, _) = call(app, Method::GET, "/wolf/clients/1/devices/M9/drains/last", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn put_measure_enqueues_write_back() {
        let (app, mut rx) = app().await;
        let uri = "/wolf/clients/1/devices/M1/drains/SP/measures";
        let (status, json) = call(app.clone(), Method::PUT, uri, Some(r#"{"value": 7}"#)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["data"]["measure_id"], "SP");

        let queued = rx.recv().await.expect("queued");
        assert_eq!(queued.device_id, "M1");
        assert_eq!(queued.value, domain::MeasureValue::Int(7));

        let (status, _) = call(app.clone(), Method::PUT, uri, Some(r#"{"other": 1}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(app.clone(), Method::PUT, uri, Some(r#"{"value": 1}"#)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, _) = call(app, Method::PUT, uri, Some(r#"{"value": 2}"#)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
