//! SnapKV server
//!
//! Loads configuration, wires the configured backends, spawns the async
//! workers, and serves the HTTP API.

mod api;

use anyhow::{Context, Result};
use api::AppState;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use snapkv_common::{BackendType, Config, DocumentStore, MemoryDocumentStore};
use snapkv_core::{Orchestrator, OrchestratorConfig, Worker, WorkerHandle};
use snapkv_entry_store::{DocumentEntryStore, EntryStore, EnvelopeStore, MemoryEntryStore};
use snapkv_meta_store::{
    DocumentMetadataStore, MemoryMetadataStore, MetadataStore, ValidatingMetaStore,
};
use snapkv_queue::{DocumentTaskQueue, MemoryTaskQueue, TaskQueue};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "snapkv-server")]
#[command(about = "SnapKV versioned key-value store server")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/snapkv/server.toml")]
    config: PathBuf,

    /// Listen address, overriding the configured port
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level, overriding the configured level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting SnapKV server");

    let (meta, entries, queue, backends) = build_backends(&config);
    let orchestrator = Orchestrator::new(
        meta.clone(),
        entries,
        queue.clone(),
        OrchestratorConfig {
            operations_topic: config.async_task.operations_topic.clone(),
            ..OrchestratorConfig::default()
        },
    );

    let workers: Vec<WorkerHandle> = (0..config.async_task.workers.max(1))
        .map(|_| {
            Worker::new(
                meta.clone(),
                queue.clone(),
                config.async_task.operations_topic.clone(),
                config.async_task.poll_interval(),
            )
            .spawn()
        })
        .collect();
    info!(count = workers.len(), topic = %config.async_task.operations_topic, "workers running");

    let state = Arc::new(AppState {
        orchestrator,
        backends,
        worker_count: workers.len(),
    });
    let app = router(state, &config.server.context_root);

    let addr: SocketAddr = match &args.listen {
        Some(listen) => listen
            .parse()
            .with_context(|| format!("invalid listen address {listen}"))?,
        None => SocketAddr::from(([0, 0, 0, 0], config.server.port)),
    };
    info!("serving HTTP API on {addr}");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down...");
        })
        .await?;

    for worker in workers {
        worker.stop().await;
    }
    info!("server shut down gracefully");

    Ok(())
}

/// Build the three backend handles from configuration.
///
/// `remote-doc-store` backends share one document-store client. The
/// in-process client stands in until a network client is wired behind
/// the same trait; the table layout is identical either way.
fn build_backends(
    config: &Config,
) -> (
    Arc<dyn MetadataStore>,
    Arc<dyn EntryStore>,
    Arc<dyn TaskQueue>,
    String,
) {
    let document_client: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());

    let meta: Arc<dyn MetadataStore> = match config.meta_data_store.backend {
        BackendType::InMemory => Arc::new(ValidatingMetaStore::new(MemoryMetadataStore::new())),
        BackendType::RemoteDocStore => Arc::new(ValidatingMetaStore::new(
            DocumentMetadataStore::new(
                document_client.clone(),
                config.meta_data_store.dataset_table.clone(),
                config.meta_data_store.version_table.clone(),
            ),
        )),
    };

    let entries: Arc<dyn EntryStore> = match config.kv_store.backend {
        BackendType::InMemory => Arc::new(EnvelopeStore::new(MemoryEntryStore::new())),
        BackendType::RemoteDocStore => Arc::new(EnvelopeStore::new(DocumentEntryStore::new(
            document_client.clone(),
            config.kv_store.table.clone(),
        ))),
    };

    let queue: Arc<dyn TaskQueue> = match config.queue.backend {
        BackendType::InMemory => Arc::new(MemoryTaskQueue::new(config.queue.lease_time())),
        BackendType::RemoteDocStore => Arc::new(DocumentTaskQueue::new(
            document_client,
            config.queue.table.clone(),
            config.queue.lease_time(),
        )),
    };

    let backends = format!(
        "meta-data-store={:?} kv-store={:?} queue={:?}",
        config.meta_data_store.backend, config.kv_store.backend, config.queue.backend
    );
    (meta, entries, queue, backends)
}

/// Assemble the API router, nested under the configured context root.
fn router(state: Arc<AppState>, context_root: &str) -> Router {
    let api = Router::new()
        .route("/v1/datasets", post(api::create_dataset).get(api::list_datasets))
        .route(
            "/v1/datasets/{dataset}",
            get(api::get_dataset).post(api::load_dataset_entries),
        )
        .route(
            "/v1/datasets/{dataset}/tables/{table}",
            post(api::load_table_entries),
        )
        .route(
            "/v1/datasets/{dataset}/tables/{table}/entries",
            get(api::get_entries),
        )
        .route(
            "/v1/datasets/{dataset}/tables/{table}/entries/{key}",
            get(api::get_entry),
        )
        .route("/v1/versions", post(api::create_version).get(api::list_versions))
        .route("/v1/versions/{id}", get(api::get_version))
        .route("/v1/versions/{id}/save", post(api::save_version))
        .route("/v1/versions/{id}/publish", post(api::publish_version))
        .route("/v1/versions/{id}/discard", post(api::discard_version))
        .route("/healthcheck", get(api::healthcheck))
        .fallback(api::fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if context_root.is_empty() || context_root == "/" {
        api
    } else {
        let root = if context_root.starts_with('/') {
            context_root.to_string()
        } else {
            format!("/{context_root}")
        };
        Router::new().nest(&root, api).fallback(api::fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use snapkv_common::config::{KvStoreConfig, MetaStoreConfig, QueueConfig};
    use tower::util::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let config = Config::default();
        let (meta, entries, queue, backends) = build_backends(&config);
        Arc::new(AppState {
            orchestrator: Orchestrator::new(meta, entries, queue, OrchestratorConfig::default()),
            backends,
            worker_count: 0,
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let app = router(test_state(), "");
        let response = app
            .oneshot(Request::get("/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_dataset_and_duplicate() {
        let app = router(test_state(), "");

        let request = || {
            Request::post("/v1/datasets")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"name": "recs", "tables": ["items"]}"#))
                .unwrap()
        };
        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get("location").unwrap(),
            "/v1/datasets/recs"
        );

        // duplicate dataset names surface as 400, not 409
        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "already-exists");
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let app = router(test_state(), "");
        let response = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_context_root_nesting() {
        let app = router(test_state(), "/kv");
        let response = app
            .clone()
            .oneshot(Request::get("/kv/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wrong_state_load_reports_version_context() {
        let app = router(test_state(), "");

        let response = app
            .clone()
            .oneshot(
                Request::post("/v1/datasets")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name": "recs", "tables": ["items"]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(
                Request::post("/v1/versions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"dataset": "recs"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let version = body_json(response).await;
        let id = version["id"].as_str().unwrap().to_string();

        // no worker is running, so the version is still preparing
        let response = app
            .oneshot(
                Request::post(format!("/v1/datasets/recs?version-id={id}"))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"[{"table": "items", "key": "k1", "value": "v"}]"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid-version-state");
        assert_eq!(body["version"]["status"], "preparing");
    }

    #[test]
    fn test_document_backend_construction() {
        let config = Config {
            meta_data_store: MetaStoreConfig {
                backend: BackendType::RemoteDocStore,
                ..MetaStoreConfig::default()
            },
            kv_store: KvStoreConfig {
                backend: BackendType::RemoteDocStore,
                ..KvStoreConfig::default()
            },
            queue: QueueConfig {
                backend: BackendType::RemoteDocStore,
                ..QueueConfig::default()
            },
            ..Config::default()
        };
        let (_, _, _, backends) = build_backends(&config);
        assert!(backends.contains("RemoteDocStore"));
    }
}
