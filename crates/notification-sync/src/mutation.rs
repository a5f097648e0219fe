//! Server side of optimistic read mutations.
//!
//! Local state is flipped by the engine before any of this runs; this module
//! only issues the PATCH calls and tracks which single-id calls are in
//! flight so identical calls are not repeated while one is pending.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::http::HttpClient;
use crate::record::Scope;

const READ_ALL_PATH: &str = "/notifications/read-all";

/// Issues read-state mutations for a scope.
#[derive(Clone)]
pub struct ReadMutations {
    http: Arc<dyn HttpClient>,
}

impl ReadMutations {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    /// `PATCH /notifications/{id}/read`
    pub async fn mark_read(&self, scope: &Scope, id: &str) -> Result<()> {
        let path = format!("/notifications/{}/read", url_segment(id));
        self.http.patch(&path, &scope.mutation_body()).await?;
        debug!(%scope, id, "Server acknowledged read");
        Ok(())
    }

    /// `PATCH /notifications/read-all`
    pub async fn mark_all_read(&self, scope: &Scope) -> Result<()> {
        self.http.patch(READ_ALL_PATH, &scope.mutation_body()).await?;
        debug!(%scope, "Server acknowledged read-all");
        Ok(())
    }
}

/// Percent-encode an id for use as one path segment.
fn url_segment(id: &str) -> String {
    url::form_urlencoded::byte_serialize(id.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// In-flight read mutations, debounced by id.
#[derive(Debug, Default)]
pub struct PendingReads {
    ids: HashSet<String>,
}

impl PendingReads {
    /// Reserve a single-id call. `false` when one is already pending.
    pub fn begin_one(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    pub fn finish_one(&mut self, id: &str) {
        self.ids.remove(id);
    }
}
