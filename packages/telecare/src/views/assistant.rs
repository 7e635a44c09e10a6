//! AI symptom checker: analysis history and new analyses.

use std::future::Future;

use tokio::sync::watch;
use tracing::warn;

use super::Mounted;
use crate::api::ApiClient;
use crate::error::ApiError;
use crate::models::AiAnalysis;

pub trait AssistantSource: Clone + Send + Sync + 'static {
    fn analysis_history(&self) -> impl Future<Output = Result<Vec<AiAnalysis>, ApiError>> + Send;
    fn analyze_symptoms(
        &self,
        symptoms: &[String],
    ) -> impl Future<Output = Result<AiAnalysis, ApiError>> + Send;
}

impl AssistantSource for ApiClient {
    async fn analysis_history(&self) -> Result<Vec<AiAnalysis>, ApiError> {
        ApiClient::analysis_history(self).await
    }

    async fn analyze_symptoms(&self, symptoms: &[String]) -> Result<AiAnalysis, ApiError> {
        ApiClient::analyze_symptoms(self, symptoms).await
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantState {
    /// Newest first.
    pub history: Vec<AiAnalysis>,
    pub latest: Option<AiAnalysis>,
    pub loading_history: bool,
    pub analyzing: bool,
    pub error: Option<String>,
}

pub struct AssistantView<S> {
    source: S,
    view: Mounted<AssistantState>,
}

impl<S: AssistantSource> AssistantView<S> {
    pub async fn mount(source: S) -> Self {
        let view = Mounted::new(AssistantState {
            loading_history: true,
            ..Default::default()
        });
        let result = source.analysis_history().await;
        view.update(|s| {
            match result {
                Ok(history) => s.history = history,
                Err(e) => {
                    warn!("Analysis history fetch failed: {}", e);
                    s.error = Some("Failed to load analysis history.".into());
                }
            }
            s.loading_history = false;
        });
        Self { source, view }
    }

    pub fn state(&self) -> AssistantState {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AssistantState> {
        self.view.subscribe()
    }

    pub fn dismiss_error(&self) {
        self.view.update(|s| s.error = None);
    }

    /// Analyze comma-separated symptoms. Blank input sends nothing and
    /// yields `Ok(None)`. On failure the error is kept in state and the
    /// caller still holds its input.
    pub async fn analyze(&self, input: &str) -> Result<Option<AiAnalysis>, ApiError> {
        let symptoms = split_symptoms(input);
        if symptoms.is_empty() {
            return Ok(None);
        }

        self.view.update(|s| {
            s.analyzing = true;
            s.latest = None;
        });
        let result = self.source.analyze_symptoms(&symptoms).await;
        self.view.update(|s| {
            match &result {
                Ok(analysis) => {
                    s.latest = Some(analysis.clone());
                    s.history.insert(0, analysis.clone());
                    s.error = None;
                }
                Err(e) => s.error = Some(e.to_string()),
            }
            s.analyzing = false;
        });
        result.map(Some)
    }

    pub fn unmount(self) {
        self.view.kill();
    }
}

/// `"headache, fever ,"` → `["headache", "fever"]`.
pub fn split_symptoms(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
