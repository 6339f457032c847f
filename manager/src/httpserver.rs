use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bundlekit_common::{archive, Error};

use crate::fleet::NodeFleet;
use crate::status::StatusService;

/// Port the manager's HTTP server listens on. Agents derive their
/// upload URL from this port.
pub const MANAGER_PORT: u16 = 8080;

/// State shared by the three routes: status read, bundle download and
/// per-node upload.
#[derive(Clone)]
pub struct AppState {
    pub status: StatusService,
    pub fleet: Arc<NodeFleet>,
    /// Working tree during collection; node uploads land under
    /// `<working_dir>/nodes/`.
    pub working_dir: PathBuf,
    /// Directory holding the final archive once packaging completes.
    pub output_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/bundle", get(get_bundle))
        .route("/nodes/{nodeName}", post(create_node_bundle))
        .with_state(state)
}

/// Serves the manager API until the cancellation token fires. Requests
/// may stay open for hours (large uploads from slow nodes), so no
/// artificial request timeout is installed.
pub async fn run(state: AppState, cancel: CancellationToken) -> Result<(), Error> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", MANAGER_PORT)).await?;
    info!("manager http server listening on :{}", MANAGER_PORT);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn get_status(State(state): State<AppState>) -> Response {
    Json(state.status.get()).into_response()
}

async fn get_bundle(State(state): State<AppState>) -> Response {
    let status = state.status.get();
    if status.filename.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let path = state.output_dir.join(&status.filename);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_owned()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}", status.filename),
        ),
    ];
    (headers, Body::from_stream(ReaderStream::new(file))).into_response()
}

async fn create_node_bundle(
    State(state): State<AppState>,
    Path(node_name): Path<String>,
    request: Request,
) -> Response {
    let node_name = node_name.trim().to_owned();
    if !is_valid_node_name(&node_name) {
        return (StatusCode::BAD_REQUEST, "invalid node name").into_response();
    }

    let nodes_dir = state.working_dir.join("nodes");
    if let Err(e) = tokio::fs::create_dir_all(&nodes_dir).await {
        warn!("failed to create nodes dir: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let target = nodes_dir.join(format!("{}.zip", node_name));
    if target.exists() {
        // A completed upload for this node already landed; never
        // overwrite it. The fleet logs the duplicate completion.
        warn!("duplicate node bundle for {}, keeping the first", node_name);
        state.fleet.complete_node(&node_name);
        return StatusCode::CREATED.into_response();
    }

    if let Err(e) = stream_body_to_file(request, &target).await {
        warn!("failed to receive node bundle for {}: {}", node_name, e);
        let _ = tokio::fs::remove_file(&target).await;
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if archive::verify(&target).is_err() {
        let _ = tokio::fs::remove_file(&target).await;
        return (StatusCode::BAD_REQUEST, "malformed zip archive").into_response();
    }

    state.fleet.complete_node(&node_name);
    StatusCode::CREATED.into_response()
}

async fn stream_body_to_file(request: Request, target: &std::path::Path) -> Result<(), Error> {
    let mut file = tokio::fs::File::create(target).await?;
    let mut stream = request.into_body().into_data_stream();
    while let Some(chunk) = stream
        .try_next()
        .await
        .map_err(|e| Error::GenericError(e.to_string()))?
    {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

fn is_valid_node_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && name != "." && name != ".."
}
