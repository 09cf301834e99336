//! Thread grouping for the chat path.
//!
//! Units sharing a thread anchor are collected into one [`Thread`]; a unit
//! without an anchor forms a single-unit thread keyed by its own id. The
//! thread's anchor timestamp is the anchor unit's timestamp when the anchor
//! was fetched, otherwise the earliest unit's. Replies never move the
//! anchor date.

use std::collections::HashMap;

use crate::models::{NormalizedUnit, Thread};

/// Group a flat unit stream into threads.
///
/// Units inside a thread are sorted by timestamp (ties by source id).
/// Threads are returned ordered by anchor timestamp, then thread id, so
/// processing order does not depend on fetch order.
pub fn group_threads(units: Vec<NormalizedUnit>) -> Vec<Thread> {
    let mut groups: HashMap<String, Vec<NormalizedUnit>> = HashMap::new();
    for unit in units {
        groups
            .entry(unit.thread_id().to_string())
            .or_default()
            .push(unit);
    }

    let mut threads: Vec<Thread> = groups
        .into_iter()
        .filter_map(|(thread_id, mut units)| {
            units.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.source_id.cmp(&b.source_id))
            });
            let anchor_timestamp = units
                .iter()
                .find(|u| u.source_id == thread_id)
                .or_else(|| units.first())
                .map(|u| u.timestamp)?;
            Some(Thread {
                thread_id,
                anchor_timestamp,
                units,
            })
        })
        .collect();

    threads.sort_by(|a, b| {
        a.anchor_timestamp
            .cmp(&b.anchor_timestamp)
            .then_with(|| a.thread_id.cmp(&b.thread_id))
    });
    threads
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Fingerprint;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn unit(id: &str, anchor: Option<&str>, ts: i64) -> NormalizedUnit {
        NormalizedUnit {
            source_id: id.to_string(),
            channel: "eng".to_string(),
            text: format!("text {}", id),
            sender: "Ann".to_string(),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            thread_anchor_id: anchor.map(str::to_string),
            attachments: vec![],
            fingerprint: Fingerprint(id.to_string()),
        }
    }

    #[test]
    fn replies_join_their_anchor() {
        let threads = group_threads(vec![
            unit("r2", Some("p"), 300),
            unit("solo", None, 150),
            unit("p", Some("p"), 100),
            unit("r1", Some("p"), 200),
        ]);
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].thread_id, "p");
        let ids: Vec<_> = threads[0].units.iter().map(|u| u.source_id.as_str()).collect();
        assert_eq!(ids, vec!["p", "r1", "r2"]);
        assert_eq!(threads[1].thread_id, "solo");
        assert_eq!(threads[1].units.len(), 1);
    }

    #[test]
    fn anchor_date_comes_from_first_unit_not_reply() {
        // Anchor late on Nov 10, reply after midnight on Nov 11.
        let anchor_ts = Utc.with_ymd_and_hms(2025, 11, 10, 23, 50, 0).unwrap().timestamp();
        let reply_ts = Utc.with_ymd_and_hms(2025, 11, 11, 0, 10, 0).unwrap().timestamp();
        let threads = group_threads(vec![
            unit("r", Some("a"), reply_ts),
            unit("a", None, anchor_ts),
        ]);
        assert_eq!(threads.len(), 1);
        assert_eq!(
            threads[0].anchor_date(),
            NaiveDate::from_ymd_opt(2025, 11, 10).unwrap()
        );
    }

    #[test]
    fn missing_anchor_falls_back_to_earliest_reply() {
        let threads = group_threads(vec![unit("r2", Some("a"), 500), unit("r1", Some("a"), 400)]);
        assert_eq!(threads[0].anchor_timestamp.timestamp(), 400);
    }

    #[test]
    fn empty_input() {
        assert!(group_threads(Vec::new()).is_empty());
    }
}
