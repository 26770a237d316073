//! 测量数据 HTTP handlers
//!
//! 只读接口直接查询缓存；写入接口只把请求推入写回队列，由写回消费者串行执行。

use crate::AppState;
use crate::response::{
    ApiResponse, bad_request_error, cache_error, not_found_error, ok, unavailable_error,
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::{MeasureValue, MetaFilter, WriteRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc::error::TrySendError;
use tracing::info;

#[derive(Deserialize)]
pub struct ClientPath {
    pub(crate) client_id: String,
}

#[derive(Deserialize)]
pub struct DevicePath {
    pub(crate) client_id: String,
    pub(crate) device_id: String,
}

#[derive(Deserialize)]
pub struct MeasurePath {
    pub(crate) client_id: String,
    pub(crate) device_id: String,
    pub(crate) measure_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDto {
    pub client_id: String,
    pub device_id: String,
    pub device_descr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureDto {
    pub measure_id: String,
    pub value: MeasureValue,
}

/// 最新值快照，测量值展开为数组。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastDto {
    pub client_id: String,
    pub device_id: String,
    pub ts: f64,
    pub measures: Vec<MeasureDto>,
}

#[derive(Deserialize)]
pub struct WriteBody {
    pub value: MeasureValue,
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

pub async fn status() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "OK" }))
}

pub async fn list_clients(State(state): State<AppState>) -> Response {
    match state.cache.clients(None).await {
        Ok(clients) => ok(clients),
        Err(err) => cache_error(&state.faults, err),
    }
}

pub async fn get_client(State(state): State<AppState>, Path(path): Path<ClientPath>) -> Response {
    match state.cache.clients(Some(&path.client_id)).await {
        Ok(clients) => ok(clients),
        Err(err) => cache_error(&state.faults, err),
    }
}

async fn devices(state: &AppState, filter: MetaFilter) -> Result<Vec<DeviceDto>, Response> {
    let entries = state
        .cache
        .load_meta(&filter)
        .await
        .map_err(|err| cache_error(&state.faults, err))?;
    let mut devices = BTreeMap::new();
    for entry in entries {
        devices
            .entry((entry.client_id.clone(), entry.device_id.clone()))
            .or_insert(DeviceDto {
                client_id: entry.client_id,
                device_id: entry.device_id,
                device_descr: entry.device_descr,
            });
    }
    Ok(devices.into_values().collect())
}

pub async fn list_devices(State(state): State<AppState>, Path(path): Path<ClientPath>) -> Response {
    match devices(&state, MetaFilter::default().client(path.client_id)).await {
        Ok(devices) => ok(devices),
        Err(response) => response,
    }
}

pub async fn get_device(State(state): State<AppState>, Path(path): Path<DevicePath>) -> Response {
    let filter = MetaFilter::default()
        .client(path.client_id)
        .device(path.device_id);
    match devices(&state, filter).await {
        Ok(devices) => match devices.into_iter().next() {
            Some(device) => ok(device),
            None => not_found_error(),
        },
        Err(response) => response,
    }
}

pub async fn list_drains(State(state): State<AppState>, Path(path): Path<DevicePath>) -> Response {
    let filter = MetaFilter::default()
        .client(path.client_id)
        .device(path.device_id);
    match state.cache.load_meta(&filter).await {
        Ok(entries) if entries.is_empty() => not_found_error(),
        Ok(entries) => ok(entries),
        Err(err) => cache_error(&state.faults, err),
    }
}

pub async fn get_drain(State(state): State<AppState>, Path(path): Path<MeasurePath>) -> Response {
    let filter = MetaFilter::default()
        .client(path.client_id)
        .device(path.device_id)
        .measure(path.measure_id);
    match state.cache.load_meta(&filter).await {
        Ok(entries) => match entries.into_iter().next() {
            Some(entry) => ok(entry),
            None => not_found_error(),
        },
        Err(err) => cache_error(&state.faults, err),
    }
}

async fn last(state: &AppState, client_id: &str, device_id: &str, measure_id: Option<&str>) -> Response {
    let record = match state.cache.load_last(client_id, device_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return not_found_error(),
        Err(err) => return cache_error(&state.faults, err),
    };
    let measures: Vec<MeasureDto> = record
        .measures
        .into_iter()
        .filter(|(id, _)| measure_id.is_none_or(|wanted| wanted == id.as_str()))
        .map(|(measure_id, value)| MeasureDto { measure_id, value })
        .collect();
    if measure_id.is_some() && measures.is_empty() {
        return not_found_error();
    }
    ok(LastDto {
        client_id: record.client_id,
        device_id: record.device_id,
        ts: record.ts,
        measures,
    })
}

pub async fn get_last(State(state): State<AppState>, Path(path): Path<DevicePath>) -> Response {
    last(&state, &path.client_id, &path.device_id, None).await
}

pub async fn get_measure_last(
    State(state): State<AppState>,
    Path(path): Path<MeasurePath>,
) -> Response {
    last(&state, &path.client_id, &path.device_id, Some(&path.measure_id)).await
}

pub async fn put_measure(
    State(state): State<AppState>,
    Path(path): Path<MeasurePath>,
    body: Result<Json<WriteBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request_error(rejection.body_text()),
    };
    let request = WriteRequest {
        client_id: path.client_id,
        device_id: path.device_id,
        measure_id: path.measure_id,
        value: body.value,
    };
    match state.writeback.try_send(request.clone()) {
        Ok(()) => {
            info!(
                target: "wolf.http",
                client = %request.client_id,
                device = %request.device_id,
                measure = %request.measure_id,
                "writeback_queued"
            );
            (StatusCode::ACCEPTED, Json(ApiResponse::success(request))).into_response()
        }
        Err(TrySendError::Full(_)) => unavailable_error("write-back queue is full"),
        Err(TrySendError::Closed(_)) => unavailable_error("write-back queue is closed"),
    }
}
