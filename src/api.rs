//! HTTP API endpoints used by the admin UI.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::state::AppState;
use crate::types::RosterEntry;

/// Response for `GET /api/info`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub results_dir: String,
    pub language: String,
}

/// List the regular files in the results directory, sorted by name.
///
/// GET /api/files
pub async fn list_files(State(state): State<Arc<AppState>>) -> Response {
    match read_file_names(&state.config.results_dir).await {
        Ok(files) => Json(files).into_response(),
        Err(e) => {
            tracing::error!(
                "Failed to list results directory {}: {}",
                state.config.results_dir.display(),
                e
            );
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn read_file_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// GET /api/info
pub async fn server_info(State(state): State<Arc<AppState>>) -> Json<ServerInfo> {
    Json(ServerInfo {
        results_dir: state.config.results_dir.display().to_string(),
        language: state.config.language.clone(),
    })
}

/// Current roster, same projection as `client_list`.
///
/// GET /api/clients
pub async fn list_clients(State(state): State<Arc<AppState>>) -> Json<Vec<RosterEntry>> {
    Json(state.hub.roster())
}
