//! Waiting helpers built on the event stream

use shorts_dl::{Event, TaskId};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::broadcast;

/// How a task left the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum WaitResult {
    /// Delivery returned Ok
    Delivered,
    /// Delivery returned an error
    DeliveryFailed(String),
    /// Timeout waiting for the task
    Timeout,
    /// Event channel closed or lagged
    ChannelClosed,
}

/// Wait until `id` has passed through delivery
///
/// Subscribe before submitting, or the events may already be gone.
pub async fn wait_for_delivery(
    events: &mut broadcast::Receiver<Event>,
    id: TaskId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Delivered { id: event_id }) if event_id == id => {
                    return WaitResult::Delivered;
                }
                Ok(Event::DeliveryFailed { id: event_id, error }) if event_id == id => {
                    return WaitResult::DeliveryFailed(error);
                }
                Ok(_) => continue,
                Err(_) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Wait until every id in `ids` has passed through delivery
pub async fn wait_for_all(
    events: &mut broadcast::Receiver<Event>,
    ids: &[TaskId],
    timeout: Duration,
) -> bool {
    let mut remaining: HashSet<TaskId> = ids.iter().copied().collect();
    let result = tokio::time::timeout(timeout, async {
        while !remaining.is_empty() {
            match events.recv().await {
                Ok(Event::Delivered { id }) | Ok(Event::DeliveryFailed { id, .. }) => {
                    remaining.remove(&id);
                }
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        true
    })
    .await;

    result.unwrap_or(false)
}

/// Collect events until `stop` matches (inclusive) or the timeout hits
pub async fn collect_events_until(
    events: &mut broadcast::Receiver<Event>,
    stop: impl Fn(&Event) -> bool,
    timeout: Duration,
) -> Vec<Event> {
    let mut collected = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let done = stop(&event);
            collected.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    collected
}
