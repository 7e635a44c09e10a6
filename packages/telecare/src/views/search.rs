//! Cross-resource keyword search.

use std::future::Future;

use tokio::sync::watch;
use tracing::warn;

use super::Mounted;
use crate::api::ApiClient;
use crate::error::ApiError;
use crate::models::SearchResults;

pub trait SearchSource: Clone + Send + Sync + 'static {
    fn search(&self, keyword: &str) -> impl Future<Output = Result<SearchResults, ApiError>> + Send;
}

impl SearchSource for ApiClient {
    async fn search(&self, keyword: &str) -> Result<SearchResults, ApiError> {
        ApiClient::search(self, keyword).await
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    pub keyword: String,
    /// `None` until a non-empty keyword has been searched.
    pub results: Option<SearchResults>,
    pub loading: bool,
    pub error: Option<String>,
}

impl SearchState {
    pub fn has_results(&self) -> bool {
        self.results
            .as_ref()
            .is_some_and(|r| r.values().any(|bucket| !bucket.data.is_empty()))
    }
}

pub struct SearchView<S> {
    source: S,
    view: Mounted<SearchState>,
}

impl<S: SearchSource> SearchView<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            view: Mounted::new(SearchState::default()),
        }
    }

    pub fn state(&self) -> SearchState {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.view.subscribe()
    }

    /// Run a search for the trimmed keyword. An empty keyword clears the
    /// results without a request.
    pub async fn search(&self, keyword: &str) -> SearchState {
        let keyword = keyword.trim().to_string();
        if keyword.is_empty() {
            self.view.update(|s| *s = SearchState::default());
            return self.state();
        }

        self.view.update(|s| {
            s.keyword = keyword.clone();
            s.loading = true;
            s.error = None;
        });
        let result = self.source.search(&keyword).await;
        self.view.update(|s| {
            match result {
                Ok(results) => s.results = Some(results),
                Err(e) => {
                    warn!("Search failed: {}", e);
                    s.error = Some(match e {
                        ApiError::Status { message, .. } => message,
                        _ => "Failed to fetch search results".into(),
                    });
                    s.results = None;
                }
            }
            s.loading = false;
        });
        self.state()
    }

    pub fn unmount(self) {
        self.view.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::test_helpers::{FakeBackend, api_config};

    #[tokio::test]
    async fn empty_keyword_clears_without_request() {
        let backend = FakeBackend::spawn().await;
        let api = ApiClient::new(&api_config(&backend)).unwrap();
        api.set_bearer(Some(backend.valid_token()));
        let view = SearchView::new(api);

        let state = view.search(" cardio ").await;
        assert!(state.has_results());
        assert_eq!(state.keyword, "cardio");
        assert_eq!(backend.state.lock().unwrap().search_calls, 1);

        let state = view.search("   ").await;
        assert_eq!(state, SearchState::default());
        assert_eq!(backend.state.lock().unwrap().search_calls, 1);
    }

    #[tokio::test]
    async fn failure_surfaces_backend_message() {
        let backend = FakeBackend::spawn().await;
        let view = SearchView::new(ApiClient::new(&api_config(&backend)).unwrap());

        let state = view.search("cardio").await;
        assert_eq!(state.error.as_deref(), Some("No token provided"));
        assert!(state.results.is_none());
        assert!(!state.loading);
    }
}
