//! Listing a day's events.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use notecal_google::{CalendarClient, CalendarEvent, EventTime, FlowCoordinator};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Prints the events of `date` (default: today), one per line.
pub async fn run(date: Option<NaiveDate>, config: &ClientConfig) -> ClientResult<()> {
    let store = Arc::new(config.open_store());
    let linked = store.credentials()?.ok_or_else(|| {
        ClientError::AuthRequired("no linked account, run `notecal auth` first".to_string())
    })?;

    let coordinator = FlowCoordinator::new(config.auth.flow_config());
    let session = coordinator.connect_session(linked, store)?;
    let client = CalendarClient::new(session, config.auth.request_timeout())?;

    let date = date.unwrap_or_else(|| Local::now().date_naive());
    debug!(%date, "listing events");
    let events = client.events_on(date).await?;

    if events.is_empty() {
        println!("No events on {date}");
    }
    for event in &events {
        println!("{}", event_line(event));
    }
    Ok(())
}

fn event_line(event: &CalendarEvent) -> String {
    let when = match (event.start, event.end) {
        (EventTime::DateTime(start), EventTime::DateTime(end)) => format!(
            "{}-{}",
            start.with_timezone(&Local).format("%H:%M"),
            end.with_timezone(&Local).format("%H:%M")
        ),
        (EventTime::DateTime(start), EventTime::Date(_)) => {
            start.with_timezone(&Local).format("%H:%M").to_string()
        }
        (EventTime::Date(_), _) => "all day".to_string(),
    };

    match &event.location {
        Some(location) => format!("{when}  {} @ {location}", event.title),
        None => format!("{when}  {}", event.title),
    }
}
