//! Retrieval endpoints delegating to the indexer

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::providers::SearchHit;
use crate::server::state::AppState;
use crate::types::Metadata;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct SearchParameters {
    pub top_k: usize,
    pub similarity_threshold: f32,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub parameters: SearchParameters,
    pub total: usize,
    pub results: Vec<SearchHit>,
}

/// POST /api/search - Search indexed documents
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(Error::bad_request("query must not be empty"));
    }

    let retrieval = &state.config().retrieval;
    let parameters = SearchParameters {
        top_k: request.top_k.unwrap_or(retrieval.default_top_k),
        similarity_threshold: request
            .similarity_threshold
            .unwrap_or(retrieval.similarity_threshold),
    };

    let results = state
        .orchestrator()
        .search(
            query,
            Some(parameters.top_k),
            Some(parameters.similarity_threshold),
        )
        .await?;

    Ok(Json(SearchResponse {
        query: query.to_string(),
        parameters,
        total: results.len(),
        results,
    }))
}

/// GET /api/vector-stats - Indexer statistics
pub async fn vector_stats(State(state): State<AppState>) -> Result<Json<Metadata>> {
    Ok(Json(state.orchestrator().index_stats().await?))
}
