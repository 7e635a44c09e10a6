pub mod auth;
pub mod live;

use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::api::ApiClient;
use crate::config::{LiveConfig, TelecareConfig};
use crate::live::LiveBridge;
use crate::models::{Appointment, Conversation};
use crate::session::{Session, SessionManager};
use crate::token_store::FileTokenStore;
use crate::views::{AssistantView, SearchView};

/// Everything a command needs, wired from the data directory.
pub struct App {
    pub config: TelecareConfig,
    pub api: ApiClient,
    pub live: LiveConfig,
    pub session: SessionManager<ApiClient>,
}

impl App {
    pub fn new(config: TelecareConfig) -> Result<Self> {
        let (api_config, live) = config.resolve()?;
        let api = ApiClient::new(&api_config).context("Failed to build HTTP client")?;
        let store = Arc::new(FileTokenStore::new(config.token_path()));
        // Shares the bearer slot with `api`.
        let session = SessionManager::new(api.clone(), store);
        Ok(Self {
            config,
            api,
            live,
            session,
        })
    }

    /// Recover the persisted session, or explain why there is none.
    pub async fn require_session(&self) -> Result<Session> {
        if let Err(e) = self.session.initialize().await {
            bail!("{e}");
        }
        self.session
            .current()
            .session
            .context("Not logged in. Run `telecare login <email>` first.")
    }

    pub fn bridge(&self, session: &Session) -> LiveBridge {
        LiveBridge::new(&self.live, Some(session.token.clone()))
    }
}

/// `telecare conversations`: list conversations with their last message.
pub async fn conversations_command(app: &App, json: bool) -> Result<()> {
    let session = app.require_session().await?;
    let conversations = app.api.conversations().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&conversations)?);
        return Ok(());
    }
    if conversations.is_empty() {
        eprintln!("No conversations.");
        return Ok(());
    }
    for conversation in &conversations {
        println!("{}", format_conversation(conversation, session.user.user_id()));
    }
    Ok(())
}

/// `telecare appointments`: list appointments, soonest first.
pub async fn appointments_command(app: &App, json: bool) -> Result<()> {
    app.require_session().await?;
    let mut appointments = app.api.appointments().await?;
    appointments.sort_by_key(|a| a.date_time);

    if json {
        println!("{}", serde_json::to_string_pretty(&appointments)?);
        return Ok(());
    }
    if appointments.is_empty() {
        eprintln!("No appointments.");
        return Ok(());
    }
    for appointment in &appointments {
        println!("{}", format_appointment(appointment));
    }
    Ok(())
}

/// `telecare appointments cancel <id>`
pub async fn cancel_appointment_command(app: &App, id: &str) -> Result<()> {
    app.require_session().await?;
    app.api
        .delete_appointment(id)
        .await
        .with_context(|| format!("Failed to cancel appointment {id}"))?;
    eprintln!("Appointment {id} cancelled.");
    Ok(())
}

/// `telecare analyze "<symptom>, <symptom>"`: run the AI symptom checker.
pub async fn analyze_command(app: &App, symptoms: &str, json: bool) -> Result<()> {
    app.require_session().await?;
    let view = AssistantView::mount(app.api.clone()).await;
    let result = view.analyze(symptoms).await;
    view.unmount();

    let Some(analysis) = result? else {
        bail!("Describe at least one symptom, separated by commas.");
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }
    let report = &analysis.analysis;
    println!("Risk level:          {:?}", report.risk_level);
    println!("Urgency:             {:?}", report.urgency);
    if !report.suggested_specialty.is_empty() {
        println!("Suggested specialty: {}", report.suggested_specialty);
    }
    for recommendation in &report.recommendations {
        println!("  - {recommendation}");
    }
    Ok(())
}

/// `telecare search <keyword>`: search doctors, patients, appointments, ...
pub async fn search_command(app: &App, keyword: &str, json: bool) -> Result<()> {
    app.require_session().await?;
    let view = SearchView::new(app.api.clone());
    let state = view.search(keyword).await;
    view.unmount();

    if let Some(error) = state.error {
        bail!(error);
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&state.results)?);
        return Ok(());
    }
    if !state.has_results() {
        eprintln!("No results for \"{}\".", keyword.trim());
        return Ok(());
    }
    for (kind, bucket) in state.results.iter().flatten() {
        if bucket.data.is_empty() {
            continue;
        }
        let total = bucket
            .pagination
            .map(|p| p.total)
            .unwrap_or(bucket.data.len() as u64);
        println!("{kind} ({total})");
        for hit in &bucket.data {
            println!("  {}", summarize_hit(hit));
        }
    }
    Ok(())
}

fn format_conversation(conversation: &Conversation, me: &str) -> String {
    let others: Vec<String> = conversation
        .participants
        .iter()
        .filter(|p| p.user_id() != me)
        .map(|p| p.display_name())
        .collect();
    let last = conversation
        .last_message
        .as_ref()
        .map(|m| m.content.as_str())
        .unwrap_or("");
    format!(
        "{}  {}  {}  {}",
        conversation.id,
        conversation.last_activity.format("%Y-%m-%d %H:%M"),
        others.join(", "),
        last
    )
}

fn format_appointment(appointment: &Appointment) -> String {
    format!(
        "{}  {}  {:<11}  Dr. {}",
        appointment.id,
        appointment.date_time.format("%Y-%m-%d %H:%M"),
        appointment.status.as_str(),
        appointment.doctor.display_name()
    )
}

/// One-line label for an untyped search hit.
fn summarize_hit(hit: &serde_json::Value) -> String {
    let id = hit["_id"].as_str().unwrap_or("?");
    let first = hit["profile"]["firstName"].as_str();
    let last = hit["profile"]["lastName"].as_str();
    let label = match (first, last) {
        (Some(f), Some(l)) => format!("{f} {l}"),
        (Some(n), None) | (None, Some(n)) => n.to_string(),
        (None, None) => hit["title"]
            .as_str()
            .or_else(|| hit["email"].as_str())
            .or_else(|| hit["status"].as_str())
            .unwrap_or("")
            .to_string(),
    };
    format!("{id}  {label}")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_helpers::{FakeBackend, api_config};
    use serde_json::json;

    pub(crate) fn app_for(backend: &FakeBackend) -> (App, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let config = TelecareConfig::new(Some(tmp.path().to_path_buf())).unwrap();
        let api = ApiClient::new(&api_config(backend)).unwrap();
        let store = Arc::new(FileTokenStore::new(config.token_path()));
        let app = App {
            session: SessionManager::new(api.clone(), store),
            api,
            live: crate::test_helpers::live_config(backend),
            config,
        };
        (app, tmp)
    }

    #[tokio::test]
    async fn require_session_without_token_fails() {
        let backend = FakeBackend::spawn().await;
        let (app, _tmp) = app_for(&backend);
        let err = app.require_session().await.unwrap_err();
        assert!(err.to_string().contains("Not logged in"));
        assert_eq!(backend.state.lock().unwrap().profile_calls, 0);
    }

    #[tokio::test]
    async fn require_session_restores_and_sets_bearer() {
        let backend = FakeBackend::spawn().await;
        let (app, _tmp) = app_for(&backend);
        std::fs::write(app.config.token_path(), backend.valid_token()).unwrap();

        let session = app.require_session().await.unwrap();
        assert_eq!(session.user.user_id(), "u1");
        assert_eq!(app.api.bearer(), Some(backend.valid_token()));
        assert!(app.api.conversations().await.is_ok());
    }

    #[test]
    fn search_hits_are_labelled() {
        assert_eq!(
            summarize_hit(&json!({ "_id": "d1", "profile": { "firstName": "Grace", "lastName": "Hopper" } })),
            "d1  Grace Hopper"
        );
        assert_eq!(
            summarize_hit(&json!({ "_id": "r1", "title": "Blood panel" })),
            "r1  Blood panel"
        );
    }
}
