//! # Project Directory REST Client
//!
//! Resolves remote project IDs to display names for deployments and users
//! that reference their project by ID only.
//!
//! `GET {base_url}/groups/{projectId}` answers `{"id": "...", "name": "..."}`.

use crate::observability::metrics;
use crate::provider::{ProjectDirectory, ProjectLookupError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, debug_span, Instrument};
use zeroize::Zeroizing;

#[derive(Debug, Deserialize)]
struct GroupResponse {
    name: String,
}

/// REST client for the remote project directory
pub struct HttpProjectDirectory {
    http_client: Client,
    base_url: String,
    token: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for HttpProjectDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProjectDirectory")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpProjectDirectory {
    #[must_use]
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(Zeroizing::new),
        }
    }
}

#[async_trait]
impl ProjectDirectory for HttpProjectDirectory {
    async fn project_name(&self, project_id: &str) -> Result<Option<String>, ProjectLookupError> {
        let span = debug_span!("project_directory.get", project.id = project_id);
        async move {
            let start = Instant::now();
            let url = format!("{}/groups/{}", self.base_url, urlencoding::encode(project_id));

            let mut request = self
                .http_client
                .get(&url)
                .header("Accept", "application/json");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token.as_str());
            }
            let response = request.send().await?;
            metrics::observe_project_lookup_duration(start.elapsed().as_secs_f64());

            match response.status() {
                status if status.is_success() => {
                    let group: GroupResponse = response.json().await?;
                    debug!("Resolved project {} to {:?}", project_id, group.name);
                    Ok(Some(group.name))
                }
                StatusCode::NOT_FOUND => Ok(None),
                status => {
                    let body = response.text().await.unwrap_or_default();
                    metrics::increment_project_lookup_errors();
                    Err(ProjectLookupError::Status {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }
}
