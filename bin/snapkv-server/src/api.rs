//! HTTP API handlers
//!
//! Thin adapter over the orchestrator: parses and validates request
//! shapes, maps core errors to status codes and the
//! `{"status": "error", ...}` body, and exposes the resolved version
//! ids through response headers on the read paths.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use snapkv_common::model::Audit;
use snapkv_common::types::{ContentType, DatasetName, EntryKey, EvictionPolicy, TableName, VersionId};
use snapkv_common::Error;
use snapkv_core::{CreateVersion, LoadEntry, LoadRequest, Orchestrator};
use snapkv_meta_store::NewDataset;
use std::sync::Arc;

pub const ACTIVE_VERSION_HEADER: &str = "x-active-version-id";
pub const VERSION_HEADER: &str = "x-version-id";

/// Shared state for all handlers
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Human-readable backend summary for the healthcheck
    pub backends: String,
    pub worker_count: usize,
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Core error adapted to an HTTP response
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = json!({
            "status": "error",
            "message": err.to_string(),
            "error": err.kind(),
        });
        match &err {
            Error::InvalidVersionState { version, .. }
            | Error::InvalidVersionForDataset { version, .. } => {
                if let Ok(value) = serde_json::to_value(version) {
                    body["version"] = value;
                }
            }
            Error::TablesNotFound { missing } => {
                if let Ok(value) = serde_json::to_value(missing) {
                    body["missing-tables"] = value;
                }
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

fn parse_dataset(raw: &str) -> ApiResult<DatasetName> {
    Ok(DatasetName::new(raw).map_err(Error::from)?)
}

fn parse_table(raw: &str) -> ApiResult<TableName> {
    Ok(TableName::new(raw).map_err(Error::from)?)
}

fn parse_key(raw: &str) -> ApiResult<EntryKey> {
    Ok(EntryKey::new(raw).map_err(Error::from)?)
}

fn parse_version_id(raw: &str) -> ApiResult<VersionId> {
    raw.parse()
        .map_err(|_| Error::validation(format!("invalid version id: {raw}")).into())
}

fn value_to_bytes(value: &Value) -> ApiResult<Bytes> {
    let raw = serde_json::to_vec(value)
        .map_err(|e| Error::internal(format!("encode value: {e}")))?;
    Ok(Bytes::from(raw))
}

fn bytes_to_value(raw: &Bytes) -> Value {
    // entries predating the JSON content-type check may hold raw bytes
    serde_json::from_slice(raw)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
}

fn version_headers(active: Option<VersionId>, version: VersionId) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(active) = active {
        if let Ok(value) = HeaderValue::from_str(&active.to_string()) {
            headers.insert(HeaderName::from_static(ACTIVE_VERSION_HEADER), value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&version.to_string()) {
        headers.insert(HeaderName::from_static(VERSION_HEADER), value);
    }
    headers
}

// ---- Dataset handlers ----

#[derive(Deserialize)]
pub(crate) struct CreateDatasetRequest {
    name: String,
    tables: Vec<String>,
    #[serde(rename = "content-type")]
    content_type: Option<ContentType>,
    #[serde(rename = "eviction-policy")]
    eviction_policy: Option<EvictionPolicy>,
}

pub async fn create_dataset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateDatasetRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = parse_dataset(&request.name)?;
    let tables = request
        .tables
        .iter()
        .map(|t| parse_table(t))
        .collect::<ApiResult<Vec<_>>>()?;
    let dataset = state
        .orchestrator
        .create_dataset(NewDataset {
            name,
            tables,
            content_type: request.content_type,
            eviction_policy: request.eviction_policy,
        })
        .await?;

    let location = format!("/v1/datasets/{}", dataset.name);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(dataset),
    ))
}

pub async fn list_datasets(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.list_datasets().await?))
}

pub async fn get_dataset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let name = parse_dataset(&name)?;
    let dataset = state
        .orchestrator
        .get_dataset(&name)
        .await?
        .ok_or(Error::DatasetNotFound(name))?;
    Ok(Json(dataset))
}

// ---- Version handlers ----

#[derive(Deserialize)]
pub(crate) struct CreateVersionRequest {
    dataset: String,
    label: Option<String>,
    #[serde(rename = "verification-policy")]
    verification_policy: Option<Audit>,
}

pub async fn create_version(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateVersionRequest>,
) -> ApiResult<impl IntoResponse> {
    let version = state
        .orchestrator
        .create_version(CreateVersion {
            dataset: parse_dataset(&request.dataset)?,
            label: request.label,
            verification_policy: request.verification_policy,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

#[derive(Deserialize)]
pub struct ListVersionsQuery {
    dataset: Option<String>,
}

pub async fn list_versions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListVersionsQuery>,
) -> ApiResult<impl IntoResponse> {
    let dataset = query.dataset.as_deref().map(parse_dataset).transpose()?;
    Ok(Json(state.orchestrator.list_versions(dataset.as_ref()).await?))
}

pub async fn get_version(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_version_id(&id)?;
    let version = state
        .orchestrator
        .get_version(&id)
        .await?
        .ok_or(Error::VersionNotFound(id))?;
    Ok(Json(version))
}

pub async fn save_version(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_version_id(&id)?;
    let version = state.orchestrator.save(&id, None).await?;
    Ok((StatusCode::ACCEPTED, Json(version)))
}

pub async fn publish_version(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_version_id(&id)?;
    let version = state.orchestrator.publish(&id, None).await?;
    Ok((StatusCode::ACCEPTED, Json(version)))
}

#[derive(Default, Deserialize)]
pub(crate) struct DiscardRequest {
    reason: Option<String>,
}

pub async fn discard_version(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<DiscardRequest>>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_version_id(&id)?;
    let reason = body.and_then(|Json(request)| request.reason);
    let version = state.orchestrator.discard(&id, reason).await?;
    Ok(Json(version))
}

// ---- Entry handlers ----

#[derive(Deserialize)]
pub struct VersionQuery {
    #[serde(rename = "version-id")]
    version_id: Option<String>,
}

impl VersionQuery {
    fn parse(&self) -> ApiResult<Option<VersionId>> {
        self.version_id.as_deref().map(parse_version_id).transpose()
    }

    fn require(&self) -> ApiResult<VersionId> {
        self.parse()?
            .ok_or_else(|| Error::validation("version-id query parameter is required").into())
    }
}

#[derive(Deserialize)]
pub(crate) struct DatasetEntryBody {
    table: String,
    key: String,
    value: Value,
}

/// POST /v1/datasets/{dataset}?version-id=…
pub async fn load_dataset_entries(
    State(state): State<Arc<AppState>>,
    Path(dataset): Path<String>,
    Query(query): Query<VersionQuery>,
    Json(body): Json<Vec<DatasetEntryBody>>,
) -> ApiResult<impl IntoResponse> {
    let version_id = query.require()?;
    let dataset = parse_dataset(&dataset)?;
    let entries = body
        .iter()
        .map(|entry| {
            Ok(LoadEntry {
                table: parse_table(&entry.table)?,
                key: parse_key(&entry.key)?,
                value: value_to_bytes(&entry.value)?,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;
    let count = state
        .orchestrator
        .load_entries(LoadRequest::new(version_id, dataset, entries))
        .await?;
    Ok(Json(json!({"status": "ok", "entries-loaded": count})))
}

#[derive(Deserialize)]
pub(crate) struct TableEntryBody {
    key: String,
    value: Value,
}

/// POST /v1/datasets/{dataset}/tables/{table}?version-id=…
pub async fn load_table_entries(
    State(state): State<Arc<AppState>>,
    Path((dataset, table)): Path<(String, String)>,
    Query(query): Query<VersionQuery>,
    Json(body): Json<Vec<TableEntryBody>>,
) -> ApiResult<impl IntoResponse> {
    let version_id = query.require()?;
    let dataset = parse_dataset(&dataset)?;
    let table = parse_table(&table)?;
    let items = body
        .iter()
        .map(|entry| Ok((parse_key(&entry.key)?, value_to_bytes(&entry.value)?)))
        .collect::<ApiResult<Vec<_>>>()?;
    let count = state
        .orchestrator
        .load_entries(LoadRequest::for_table(version_id, dataset, table, items))
        .await?;
    Ok(Json(json!({"status": "ok", "entries-loaded": count})))
}

/// GET /v1/datasets/{dataset}/tables/{table}/entries/{key}[?version-id=…]
pub async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path((dataset, table, key)): Path<(String, String, String)>,
    Query(query): Query<VersionQuery>,
) -> ApiResult<impl IntoResponse> {
    let read = state
        .orchestrator
        .get_entry(
            query.parse()?,
            &parse_dataset(&dataset)?,
            &parse_table(&table)?,
            &parse_key(&key)?,
        )
        .await?;
    let headers = version_headers(read.active_version_id, read.version_id);
    Ok((headers, Json(bytes_to_value(&read.value))))
}

#[derive(Deserialize)]
pub(crate) struct KeyRef {
    key: String,
}

/// GET /v1/datasets/{dataset}/tables/{table}/entries[?version-id=…]
///
/// Body is the list of keys to fetch; missing keys are counted and
/// omitted from `data`.
pub async fn get_entries(
    State(state): State<Arc<AppState>>,
    Path((dataset, table)): Path<(String, String)>,
    Query(query): Query<VersionQuery>,
    Json(body): Json<Vec<KeyRef>>,
) -> ApiResult<impl IntoResponse> {
    let keys = body
        .iter()
        .map(|k| parse_key(&k.key))
        .collect::<ApiResult<Vec<_>>>()?;
    let read = state
        .orchestrator
        .get_entries(
            query.parse()?,
            &parse_dataset(&dataset)?,
            &parse_table(&table)?,
            keys,
        )
        .await?;

    let mut data = serde_json::Map::new();
    let mut missing = 0usize;
    for (key, value) in &read.entries {
        match value {
            Some(value) => {
                data.insert(key.to_string(), bytes_to_value(value));
            }
            None => missing += 1,
        }
    }
    let headers = version_headers(read.active_version_id, read.version_id);
    let body = json!({
        "status": "ok",
        "keys-found": data.len(),
        "keys-missing": missing,
        "data": Value::Object(data),
    });
    Ok((headers, Json(body)))
}

// ---- Service handlers ----

pub async fn healthcheck(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "message": format!(
            "backends: {}; workers: {}",
            state.backends, state.worker_count
        ),
    }))
}

pub async fn fallback() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "status": "error",
            "message": "no such route",
            "error": "not-found",
        })),
    )
        .into_response()
}
