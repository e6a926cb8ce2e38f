// Trait seams between the pipeline and the outside world.
//
// RecordSource: paged reads of the unified source view.
// TextCompleter: one chat completion returning the model's raw text.
// FactSink: idempotent merge into the fact store.
//
// Production impls wrap factboard-store and ai-client; the in-memory doubles
// in `testing` let the whole pipeline run without a database or network.

use std::collections::HashMap;

use ai_client::{AiError, ChatAgent, Message};
use async_trait::async_trait;
use factboard_common::{FactEvent, FactboardError, Page, PageCursor, SourceQuery, UpsertOutcome};
use factboard_store::{PgFactSink, PgRecordSource};

// ---------------------------------------------------------------------------
// RecordSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_page(&self, query: &SourceQuery, cursor: PageCursor)
        -> Result<Page, FactboardError>;

    /// Startup reachability check.
    async fn probe(&self) -> Result<(), FactboardError>;
}

#[async_trait]
impl RecordSource for PgRecordSource {
    async fn fetch_page(
        &self,
        query: &SourceQuery,
        cursor: PageCursor,
    ) -> Result<Page, FactboardError> {
        PgRecordSource::fetch_page(self, query, cursor).await
    }

    async fn probe(&self) -> Result<(), FactboardError> {
        PgRecordSource::probe(self).await
    }
}

// ---------------------------------------------------------------------------
// TextCompleter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// Ask the endpoint for a JSON object response.
    pub json_mode: bool,
}

#[async_trait]
pub trait TextCompleter: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, FactboardError>;
}

#[async_trait]
impl TextCompleter for ai_client::OpenAi {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, FactboardError> {
        self.chat(
            vec![
                Message::system(request.system.clone()),
                Message::user(request.user.clone()),
            ],
            request.json_mode,
        )
        .await
        .map_err(llm_error)
    }
}

/// Classify a client error: rate limits, gateway errors and network faults
/// are retried; everything else is terminal for the record.
pub fn llm_error(err: AiError) -> FactboardError {
    if err.is_transient() {
        return FactboardError::TransientConnection(err.to_string());
    }
    match err {
        AiError::EmptyResponse => FactboardError::LlmResponseParse("empty completion".into()),
        other => FactboardError::Llm(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// FactSink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FactSink: Send + Sync {
    async fn upsert(&self, fact: &FactEvent) -> Result<UpsertOutcome, FactboardError>;

    /// Fails when the target table is missing.
    async fn ensure_ready(&self) -> Result<(), FactboardError>;

    /// `url → row_hash` for the given URLs that are already stored.
    async fn stored_hashes(&self, urls: &[String]) -> Result<HashMap<String, String>, FactboardError>;
}

#[async_trait]
impl FactSink for PgFactSink {
    async fn upsert(&self, fact: &FactEvent) -> Result<UpsertOutcome, FactboardError> {
        PgFactSink::upsert(self, fact).await
    }

    async fn ensure_ready(&self) -> Result<(), FactboardError> {
        PgFactSink::ensure_ready(self).await
    }

    async fn stored_hashes(&self, urls: &[String]) -> Result<HashMap<String, String>, FactboardError> {
        PgFactSink::stored_hashes(self, urls).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factboard_common::Transient;

    #[test]
    fn rate_limits_are_retried_auth_failures_are_not() {
        let limited = llm_error(AiError::Api {
            status: 429,
            body: "slow down".into(),
        });
        assert!(limited.is_transient());

        let auth = llm_error(AiError::Api {
            status: 401,
            body: "bad key".into(),
        });
        assert!(matches!(auth, FactboardError::Llm(_)));
        assert!(!auth.is_transient());
    }

    #[test]
    fn empty_completion_is_a_parse_failure() {
        assert!(matches!(
            llm_error(AiError::EmptyResponse),
            FactboardError::LlmResponseParse(_)
        ));
    }
}
