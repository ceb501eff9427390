use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::endpoint::AppState;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub server: String,
    pub version: String,
    pub namespaces: usize,
}

#[derive(Serialize)]
pub struct NamespaceSummary {
    pub prefix: String,
    pub server_name: String,
    pub tools: usize,
    pub resources: usize,
    pub prompts: usize,
}

#[derive(Serialize, Default)]
pub struct CapabilityIndex {
    pub tools: Vec<String>,
    pub resources: Vec<String>,
    pub prompts: Vec<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        server: state.descriptor.name.clone(),
        version: state.descriptor.version.clone(),
        namespaces: state.catalog.load().len(),
    })
}

pub async fn list_namespaces(State(state): State<AppState>) -> Json<Vec<NamespaceSummary>> {
    let catalog = state.catalog.load();
    let summaries = catalog
        .namespaces()
        .map(|ns| NamespaceSummary {
            prefix: ns.prefix.clone(),
            server_name: ns.server_name.clone(),
            tools: ns.tools.len(),
            resources: ns.resources.len(),
            prompts: ns.prompts.len(),
        })
        .collect();
    Json(summaries)
}

pub async fn get_namespace(State(state): State<AppState>, Path(prefix): Path<String>) -> Response {
    let catalog = state.catalog.load();
    match catalog.get(&prefix) {
        Some(namespace) => Json(namespace.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, format!("No namespace '{}'", prefix)).into_response(),
    }
}

pub async fn list_capabilities(State(state): State<AppState>) -> Json<CapabilityIndex> {
    let catalog = state.catalog.load();
    let mut index = CapabilityIndex::default();
    for ns in catalog.namespaces() {
        index.tools.extend(ns.tools.iter().map(|c| c.name.clone()));
        index.resources.extend(ns.resources.iter().map(|c| c.name.clone()));
        index.prompts.extend(ns.prompts.iter().map(|c| c.name.clone()));
    }
    Json(index)
}
