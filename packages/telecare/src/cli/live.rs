//! Commands that hold a live channel open: `dashboard --watch` and `chat`.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::App;
use crate::views::{ChatState, ChatView, DashboardState, DashboardView};

const SESSION_EXPIRED: &str = "Session expired. Run `telecare login <email>` again.";

/// `telecare dashboard [--watch]`
pub async fn dashboard_command(app: &App, watch: bool) -> Result<()> {
    let session = app.require_session().await?;
    let bridge = app.bridge(&session);
    let view = DashboardView::mount(
        app.api.clone(),
        &bridge,
        session.user.user_id(),
        app.live.activity_feed_cap,
    )
    .await;

    print_dashboard(&view.state());
    if watch {
        let mut changes = view.subscribe();
        changes.mark_unchanged();
        eprintln!("Watching for updates. Ctrl-C to stop.");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = app.session.expired() => {
                    eprintln!("{SESSION_EXPIRED}");
                    break;
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = changes.borrow_and_update().clone();
                    println!();
                    print_dashboard(&state);
                }
            }
        }
    }

    view.unmount().await;
    Ok(())
}

/// `telecare chat <conversation-id>`: print history, then send each line
/// typed on stdin and print messages as they arrive.
pub async fn chat_command(app: &App, conversation_id: &str) -> Result<()> {
    let session = app.require_session().await?;
    let bridge = app.bridge(&session);
    let me = session.user.user_id().to_string();
    let view = ChatView::mount(&app.api, &bridge, conversation_id, &me).await;

    let mut changes = view.subscribe();
    let mut printed = print_new_messages(&changes.borrow_and_update(), 0, &me);
    if view.channel_state().is_none() {
        eprintln!("Live chat unavailable; showing history only.");
        view.unmount().await;
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = app.session.expired() => {
                eprintln!("{SESSION_EXPIRED}");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = changes.borrow_and_update().clone();
                printed = print_new_messages(&state, printed, &me);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match view.send(&line).await {
                    Ok(sent) => debug!(sent, "Chat input handled"),
                    Err(e) => eprintln!("Message not sent: {e}"),
                }
            }
        }
    }

    view.unmount().await;
    Ok(())
}

fn print_dashboard(state: &DashboardState) {
    if let Some(error) = &state.error {
        println!("! {error}");
    }
    match &state.stats {
        Some(stats) => {
            println!("Upcoming appointments  {}", stats.upcoming_appointments);
            println!("AI analyses            {}", stats.ai_analyses);
            println!("New messages           {}", stats.new_messages);
            println!("Prescriptions ready    {}", stats.prescriptions_ready);
        }
        None => println!("Stats unavailable"),
    }

    if !state.weekly.is_empty() {
        println!();
        println!("This week");
        for day in &state.weekly {
            println!(
                "  {:<4} {:>3} appointments  {:>3} messages",
                day.day, day.appointments, day.messages
            );
        }
    }

    println!();
    println!("Recent activity");
    if state.activities.is_empty() {
        println!("  (none)");
    }
    for activity in &state.activities {
        println!(
            "  {}  {}",
            activity.timestamp.format("%m-%d %H:%M"),
            activity.description
        );
    }

    if !state.recent_appointments.is_empty() {
        println!();
        println!("Recent appointments");
        for appointment in &state.recent_appointments {
            println!(
                "  {}  {}  Dr. {}",
                appointment.date_time.format("%Y-%m-%d %H:%M"),
                appointment.status.as_str(),
                appointment.doctor.display_name()
            );
        }
    }
}

/// Print messages past index `from`; returns the new count.
fn print_new_messages(state: &ChatState, from: usize, me: &str) -> usize {
    if let Some(error) = &state.error {
        eprintln!("! {error}");
    }
    for message in state.messages.iter().skip(from) {
        let who = if message.sender.user_id() == me {
            "you".to_string()
        } else {
            message.sender.display_name()
        };
        println!(
            "[{}] {}: {}",
            message.created_at.format("%H:%M"),
            who,
            message.content
        );
    }
    state.messages.len()
}
