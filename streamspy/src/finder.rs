//! Stateless search operations over a buffer snapshot.
//!
//! Every function scans newest-to-oldest so the most recently delivered
//! match wins, deserializing matches into the caller's target shape. A
//! filter match whose payload does not fit the target shape is a fatal
//! [`Error::Deserialization`], distinct from "not found".

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{Error, FilterSet, Result, StreamEvent};

/// Outcome of a multi-match search: every collected match in scan order
/// (newest first) and the match count.
#[derive(Debug, Clone, PartialEq)]
pub struct FindResult<T> {
    pub all: Vec<T>,
    pub count: usize,
}

impl<T> FindResult<T> {
    /// The first (most recent) match, if any.
    pub fn first(&self) -> Option<&T> {
        self.all.first()
    }
}

impl<T> Default for FindResult<T> {
    fn default() -> Self {
        Self {
            all: Vec::new(),
            count: 0,
        }
    }
}

/// Scan newest-to-oldest and return the first event whose payload matches
/// the filter set, deserialized into `T`. `Ok(None)` when the snapshot is
/// empty or nothing matches.
pub fn search_latest<T: DeserializeOwned>(
    events: &[Arc<StreamEvent>],
    filters: &FilterSet,
) -> Result<Option<T>> {
    for event in events.iter().rev() {
        if filters.matches(event.payload()) {
            return deserialize(event).map(Some);
        }
    }
    Ok(None)
}

/// Collect every match, newest first.
pub fn find_and_count<T: DeserializeOwned>(
    events: &[Arc<StreamEvent>],
    filters: &FilterSet,
) -> Result<FindResult<T>> {
    let mut result = FindResult::default();

    for event in events.iter().rev() {
        if filters.matches(event.payload()) {
            result.all.push(deserialize(event)?);
            result.count += 1;
        }
    }

    Ok(result)
}

/// Collect matches inside a time window anchored at the first match.
///
/// The first (most recent) match anchors the window; a later-scanned
/// match counts only if |timestamp − anchor timestamp| ≤ `window_ms`.
/// The comparison is always against the anchor, not the previous match,
/// so duplicates both earlier and later than the anchor are caught.
pub fn find_and_count_within_window<T: DeserializeOwned>(
    events: &[Arc<StreamEvent>],
    filters: &FilterSet,
    window_ms: i64,
) -> Result<FindResult<T>> {
    let mut result = FindResult::default();
    let mut anchor_timestamp = 0i64;

    for event in events.iter().rev() {
        if !filters.matches(event.payload()) {
            continue;
        }
        if result.count == 0 {
            anchor_timestamp = event.timestamp_ms();
            result.all.push(deserialize(event)?);
            result.count += 1;
        } else if (event.timestamp_ms() - anchor_timestamp).abs() <= window_ms {
            result.all.push(deserialize(event)?);
            result.count += 1;
        }
    }

    Ok(result)
}

/// Collect matching events without deserializing, newest first.
pub fn find_events(events: &[Arc<StreamEvent>], filters: &FilterSet) -> Vec<Arc<StreamEvent>> {
    events
        .iter()
        .rev()
        .filter(|event| filters.matches(event.payload()))
        .cloned()
        .collect()
}

/// Collect matching events inside the anchor window without
/// deserializing, newest first. Same anchor semantics as
/// [`find_and_count_within_window`].
pub fn find_events_within_window(
    events: &[Arc<StreamEvent>],
    filters: &FilterSet,
    window_ms: i64,
) -> Vec<Arc<StreamEvent>> {
    let mut matches: Vec<Arc<StreamEvent>> = Vec::new();
    let mut anchor_timestamp = 0i64;

    for event in events.iter().rev() {
        if !filters.matches(event.payload()) {
            continue;
        }
        if matches.is_empty() {
            anchor_timestamp = event.timestamp_ms();
            matches.push(event.clone());
        } else if (event.timestamp_ms() - anchor_timestamp).abs() <= window_ms {
            matches.push(event.clone());
        }
    }

    matches
}

/// Count matching events without deserializing them.
pub fn count_matching(events: &[Arc<StreamEvent>], filters: &FilterSet) -> usize {
    events
        .iter()
        .filter(|event| filters.matches(event.payload()))
        .count()
}

fn deserialize<T: DeserializeOwned>(event: &StreamEvent) -> Result<T> {
    serde_json::from_slice(event.payload()).map_err(|e| Error::Deserialization {
        topic: event.topic().to_string(),
        offset: event.offset(),
        target: std::any::type_name::<T>(),
        reason: e.to_string(),
    })
}
