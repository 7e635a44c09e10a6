//! `telecare login|register|logout|whoami`

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use serde_json::json;

use telecare_auth::{Claims, ErrorResponse};

use super::App;
use crate::api::{Credentials, Registration};
use crate::session::Route;
use crate::token_store::{FileTokenStore, TokenStore};

/// `telecare login <email>`: exchange credentials for a persisted session.
pub async fn login_command(app: &App, email: String, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => prompt("Password: ")?,
    };
    let route = app
        .session
        .login_with_credentials(&Credentials { email, password })
        .await?;
    report_route(app, route);
    Ok(())
}

/// `telecare register <email> --first-name .. --last-name ..`
pub async fn register_command(
    app: &App,
    email: String,
    first_name: String,
    last_name: String,
    password: Option<String>,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => prompt("Choose a password: ")?,
    };
    let registration = Registration::patient(email, password, first_name, last_name);
    match app.session.register(&registration).await? {
        Some(route) => report_route(app, route),
        None => eprintln!("Account created. Log in with `telecare login`."),
    }
    Ok(())
}

/// `telecare logout`: forget the stored token. Works offline.
pub async fn logout_command(app: &App) -> Result<()> {
    app.session.logout().await;
    eprintln!("Logged out.");
    Ok(())
}

/// `telecare whoami`: show the restored session.
pub async fn whoami_command(app: &App, json: bool) -> Result<()> {
    // Diagnose before `require_session`, which discards a rejected token.
    let rejected = json.then(|| stored_token_error(app)).flatten();
    let session = match app.require_session().await {
        Ok(session) => session,
        Err(e) => {
            if let Some(response) = rejected {
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
            return Err(e);
        }
    };
    if json {
        let out = json!({
            "user": session.user,
            "claims": session.claims,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let expires = chrono::DateTime::from_timestamp(session.claims.exp, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| session.claims.exp.to_string());
    println!("{} <{}>", session.user.display_name(), session.user.email);
    println!("  id:       {}", session.user.user_id());
    println!("  role:     {}", session.claims.role);
    println!("  expires:  {expires}");
    if session.user.profile.needs_onboarding() {
        println!("  profile:  incomplete");
    }
    Ok(())
}

fn report_route(app: &App, route: Route) {
    let name = app
        .session
        .current()
        .user()
        .map(|u| u.display_name())
        .unwrap_or_default();
    eprintln!("Logged in as {name}.");
    if route == Route::Onboarding {
        eprintln!("Your profile is incomplete. Finish onboarding before booking appointments.");
    }
}

/// Why the stored token cannot be used, if it is present and unusable.
fn stored_token_error(app: &App) -> Option<ErrorResponse> {
    let token = FileTokenStore::new(app.config.token_path())
        .load()
        .ok()
        .flatten()?;
    Claims::decode_unexpired(&token, chrono::Utc::now().timestamp())
        .err()
        .map(|e| ErrorResponse::from(&e))
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{label}");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::tests::app_for;
    use crate::test_helpers::FakeBackend;
    use telecare_auth::{RecoveryAction, Role, mint_unsigned};

    #[tokio::test]
    async fn expired_stored_token_is_diagnosed() {
        let backend = FakeBackend::spawn().await;
        let (app, _tmp) = app_for(&backend);
        assert!(stored_token_error(&app).is_none());

        let expired = mint_unsigned(&Claims {
            user_id: "u1".into(),
            email: "ada@example.com".into(),
            role: Role::Patient,
            exp: 1,
        });
        std::fs::write(app.config.token_path(), expired).unwrap();

        let response = stored_token_error(&app).unwrap();
        assert_eq!(response.error, "token_expired");
        assert_eq!(response.recovery.action, RecoveryAction::LogIn);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["recovery"]["action"], "log_in");
    }

    #[tokio::test]
    async fn valid_stored_token_has_no_diagnosis() {
        let backend = FakeBackend::spawn().await;
        let (app, _tmp) = app_for(&backend);
        std::fs::write(app.config.token_path(), backend.valid_token()).unwrap();
        assert!(stored_token_error(&app).is_none());
    }
}
