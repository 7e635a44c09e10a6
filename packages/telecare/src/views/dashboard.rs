//! Dashboard: summary stats, the activity feed, recent appointments, and the
//! weekly chart, kept fresh by the user's live channel.
//!
//! Event handling:
//! - `new-appointment`, `new-message`: re-fetch stats and refresh the chart
//! - `new-analysis`, `new-prescription`: re-fetch stats
//! - `new-activity`: prepend to the feed, newest first, capped
//!
//! Stats are always re-fetched whole. Concurrent re-fetches are not
//! sequenced; whichever response lands last wins.

use std::future::Future;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::Mounted;
use crate::api::ApiClient;
use crate::error::ApiError;
use crate::live::{ChannelHandle, ChannelState, Connect, EventName, Handlers, LiveEvent, Room};
use crate::models::{Activity, Appointment, DailyCount, Stats};

const STATS_ERROR: &str = "Failed to load dashboard stats.";
const ACTIVITIES_ERROR: &str = "Failed to load recent activities.";
const APPOINTMENTS_ERROR: &str = "Failed to load recent appointments.";
const WEEKLY_ERROR: &str = "Failed to load weekly stats.";

pub trait DashboardSource: Clone + Send + Sync + 'static {
    fn stats(&self) -> impl Future<Output = Result<Stats, ApiError>> + Send;
    fn activities(&self) -> impl Future<Output = Result<Vec<Activity>, ApiError>> + Send;
    fn recent_appointments(&self) -> impl Future<Output = Result<Vec<Appointment>, ApiError>> + Send;
    fn weekly_stats(&self) -> impl Future<Output = Result<Vec<DailyCount>, ApiError>> + Send;
}

impl DashboardSource for ApiClient {
    async fn stats(&self) -> Result<Stats, ApiError> {
        ApiClient::stats(self).await
    }

    async fn activities(&self) -> Result<Vec<Activity>, ApiError> {
        ApiClient::activities(self).await
    }

    async fn recent_appointments(&self) -> Result<Vec<Appointment>, ApiError> {
        ApiClient::recent_appointments(self).await
    }

    async fn weekly_stats(&self) -> Result<Vec<DailyCount>, ApiError> {
        ApiClient::weekly_stats(self).await
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
    pub stats: Option<Stats>,
    /// Newest first, never longer than the feed cap.
    pub activities: Vec<Activity>,
    pub recent_appointments: Vec<Appointment>,
    pub weekly: Vec<DailyCount>,
    pub loading_stats: bool,
    pub loading_activities: bool,
    pub loading_appointments: bool,
    /// Dismissible; the view stays usable with whatever data it has.
    pub error: Option<String>,
    /// Bumped each time an event asks the chart to reload.
    pub chart_refreshes: u64,
}

impl DashboardState {
    fn loading() -> Self {
        Self {
            loading_stats: true,
            loading_activities: true,
            loading_appointments: true,
            ..Default::default()
        }
    }
}

pub struct DashboardView<S> {
    source: S,
    view: Mounted<DashboardState>,
    channel: Option<ChannelHandle>,
}

impl<S: DashboardSource> DashboardView<S> {
    /// Open the user's channel, then load everything once.
    pub async fn mount<C: Connect>(
        source: S,
        connector: &C,
        user_id: &str,
        feed_cap: usize,
    ) -> Self {
        let feed_cap = feed_cap.max(1);
        let view = Mounted::new(DashboardState::loading());

        let handlers = handlers(&source, &view, feed_cap);
        let channel = match connector.open(Room::User(user_id.to_string()), handlers).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Dashboard live updates unavailable: {}", e);
                None
            }
        };

        tokio::join!(
            load_stats(source.clone(), view.clone()),
            load_activities(source.clone(), view.clone(), feed_cap),
            load_recent_appointments(source.clone(), view.clone()),
            load_weekly(source.clone(), view.clone()),
        );

        Self {
            source,
            view,
            channel,
        }
    }

    pub fn state(&self) -> DashboardState {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.view.subscribe()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// `None` when the channel could not be opened.
    pub fn channel_state(&self) -> Option<ChannelState> {
        self.channel.as_ref().map(ChannelHandle::state)
    }

    pub fn dismiss_error(&self) {
        self.view.update(|s| s.error = None);
    }

    /// Reload stats on demand, as the live handlers do.
    pub async fn refresh_stats(&self) {
        load_stats(self.source.clone(), self.view.clone()).await;
    }

    pub async fn unmount(mut self) {
        self.view.kill();
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
    }
}

impl<S> Drop for DashboardView<S> {
    fn drop(&mut self) {
        self.view.kill();
    }
}

fn handlers<S: DashboardSource>(
    source: &S,
    view: &Mounted<DashboardState>,
    feed_cap: usize,
) -> Handlers {
    let stats_trigger = |chart: bool| {
        let source = source.clone();
        let view = view.clone();
        move |_: &LiveEvent| {
            if !view.is_alive() {
                return;
            }
            tokio::spawn(load_stats(source.clone(), view.clone()));
            if chart && view.update(|s| s.chart_refreshes += 1) {
                tokio::spawn(load_weekly(source.clone(), view.clone()));
            }
        }
    };

    let feed = view.clone();
    Handlers::new()
        .on(EventName::NewAppointment, stats_trigger(true))
        .on(EventName::NewMessage, stats_trigger(true))
        .on(EventName::NewAnalysis, stats_trigger(false))
        .on(EventName::NewPrescription, stats_trigger(false))
        .on(EventName::NewActivity, move |event: &LiveEvent| {
            match event.payload::<Activity>() {
                Ok(activity) => {
                    feed.update(|s| push_activity(&mut s.activities, activity, feed_cap));
                }
                Err(e) => debug!("Ignoring malformed activity: {}", e),
            }
        })
}

/// Prepend, dropping any earlier copy of the same activity, then cap.
fn push_activity(feed: &mut Vec<Activity>, activity: Activity, cap: usize) {
    feed.retain(|a| a.id != activity.id);
    feed.insert(0, activity);
    feed.truncate(cap);
}

/// A successful fetch only clears the error its own failure raised.
fn clear_error(state: &mut DashboardState, message: &str) {
    if state.error.as_deref() == Some(message) {
        state.error = None;
    }
}

async fn load_stats<S: DashboardSource>(source: S, view: Mounted<DashboardState>) {
    let result = source.stats().await;
    view.update(|s| {
        match result {
            Ok(stats) => {
                s.stats = Some(stats);
                clear_error(s, STATS_ERROR);
            }
            Err(e) => {
                warn!("Stats fetch failed: {}", e);
                s.error = Some(STATS_ERROR.into());
            }
        }
        s.loading_stats = false;
    });
}

async fn load_activities<S: DashboardSource>(
    source: S,
    view: Mounted<DashboardState>,
    feed_cap: usize,
) {
    let result = source.activities().await;
    view.update(|s| {
        match result {
            Ok(fetched) => {
                // Live activities that landed during the fetch are newer.
                let live = std::mem::replace(&mut s.activities, fetched);
                s.activities.truncate(feed_cap);
                for activity in live.into_iter().rev() {
                    push_activity(&mut s.activities, activity, feed_cap);
                }
                clear_error(s, ACTIVITIES_ERROR);
            }
            Err(e) => {
                warn!("Activities fetch failed: {}", e);
                s.error = Some(ACTIVITIES_ERROR.into());
            }
        }
        s.loading_activities = false;
    });
}

async fn load_recent_appointments<S: DashboardSource>(source: S, view: Mounted<DashboardState>) {
    let result = source.recent_appointments().await;
    view.update(|s| {
        match result {
            Ok(appointments) => {
                s.recent_appointments = appointments;
                clear_error(s, APPOINTMENTS_ERROR);
            }
            Err(e) => {
                warn!("Recent appointments fetch failed: {}", e);
                s.error = Some(APPOINTMENTS_ERROR.into());
            }
        }
        s.loading_appointments = false;
    });
}

async fn load_weekly<S: DashboardSource>(source: S, view: Mounted<DashboardState>) {
    let result = source.weekly_stats().await;
    view.update(|s| match result {
        Ok(weekly) => {
            s.weekly = weekly;
            clear_error(s, WEEKLY_ERROR);
        }
        Err(e) => {
            warn!("Weekly stats fetch failed: {}", e);
            s.error = Some(WEEKLY_ERROR.into());
        }
    });
}
