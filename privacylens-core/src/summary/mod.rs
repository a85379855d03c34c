//! Date-bucketed timeline summaries
//!
//! Derived data (Layer 2) is never persisted; every query rebuilds sessions
//! from the canonical rows and merges them with domain contacts:
//!
//! ```text
//! scan_access ──► reconstruct_sessions ──┐
//!                                        ├──► filter ──► bucket by date ──► sort desc
//! scan_domain ───────────────────────────┘
//! ```
//!
//! [`coalesce`] is applied afterwards by presenters, one date at a time.

mod coalesce;
mod sessions;

pub use coalesce::coalesce;
pub use sessions::reconstruct_sessions;

use std::collections::BTreeMap;

use crate::db::Database;
use crate::error::Result;
use crate::types::{AccessSession, DomainRecord, SummaryFilter, TimelineEntry, TypeFilter};

/// Timeline entries keyed by UTC date (`YYYY-MM-DD`).
///
/// Iterate in reverse for newest-first presentation.
pub type Timeline = BTreeMap<String, Vec<TimelineEntry>>;

/// Merged, filtered timeline of one imported file.
pub fn merged_summaries(db: &Database, file: &str, filter: &SummaryFilter) -> Result<Timeline> {
    let wants_access = filter.kind.as_ref().map_or(true, TypeFilter::includes_access);
    let wants_domains = filter.kind.as_ref().map_or(true, TypeFilter::includes_domains);

    let sessions = if wants_access {
        reconstruct_sessions(&db.scan_access(file)?)
    } else {
        Vec::new()
    };
    let domains = if wants_domains {
        db.scan_domain(file)?
    } else {
        Vec::new()
    };

    let timeline = merge_timeline(sessions, domains, filter);
    tracing::debug!(
        file = %file,
        dates = timeline.len(),
        entries = timeline.values().map(Vec::len).sum::<usize>(),
        "Built timeline"
    );
    Ok(timeline)
}

/// Filter, bucket and order sessions and domain contacts.
///
/// Within a date, entries are sorted newest first by timestamp string. The
/// sort is stable and sessions go in first, so on equal timestamps a session
/// precedes a domain contact.
pub fn merge_timeline(
    sessions: Vec<AccessSession>,
    domains: Vec<DomainRecord>,
    filter: &SummaryFilter,
) -> Timeline {
    let mut timeline = Timeline::new();

    let entries = sessions
        .into_iter()
        .map(TimelineEntry::Access)
        .chain(domains.into_iter().map(TimelineEntry::Domain));
    for entry in entries.filter(|e| filter.matches(e)) {
        timeline.entry(entry.date().to_string()).or_default().push(entry);
    }

    for entries in timeline.values_mut() {
        entries.sort_by(|a, b| b.timestamp().cmp(a.timestamp()));
    }
    timeline
}

/// Type filter values a presenter can offer for a file.
///
/// `access`, then `access/<stream>` per distinct stream, then `domain` when
/// the file has domain contacts.
pub fn type_facets(db: &Database, file: &str) -> Result<Vec<TypeFilter>> {
    let mut facets = vec![TypeFilter::AnyAccess];
    facets.extend(
        db.list_access_types(file)?
            .into_iter()
            .map(TypeFilter::Access),
    );
    if db.has_domains(file)? {
        facets.push(TypeFilter::Domain);
    }
    Ok(facets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DomainGeneration, UtcTimestamp};

    fn ts(s: &str) -> UtcTimestamp {
        UtcTimestamp::parse(s).unwrap()
    }

    fn session(id: &str, bundle: &str, start: &str) -> AccessSession {
        let start = ts(start);
        AccessSession {
            session_id: id.to_string(),
            date: start.date().to_string(),
            stream: "photos".to_string(),
            bundle_id: bundle.to_string(),
            start,
            end: None,
            start_estimated: false,
        }
    }

    fn domain(bundle: &str, at: &str) -> DomainRecord {
        DomainRecord {
            bundle_id: bundle.to_string(),
            domain: "example.com".to_string(),
            context: String::new(),
            initiated_type: "AppInitiated".to_string(),
            domain_type: 2,
            timestamp: ts(at),
            first_timestamp: ts(at),
            hits: 1,
            domain_owner: String::new(),
            effective_user_id: None,
            has_app_bundle_name: None,
            generation: DomainGeneration::V3,
        }
    }

    #[test]
    fn test_merge_orders_each_date_descending() {
        let timeline = merge_timeline(
            vec![
                session("a", "com.a", "2021-06-08T09:00:00Z"),
                session("b", "com.a", "2021-06-09T01:00:00Z"),
            ],
            vec![
                domain("com.b", "2021-06-08T12:00:00Z"),
                domain("com.b", "2021-06-08T09:00:00Z"),
            ],
            &SummaryFilter::default(),
        );

        assert_eq!(timeline.keys().collect::<Vec<_>>(), vec!["2021-06-08", "2021-06-09"]);
        let day = &timeline["2021-06-08"];
        let stamps: Vec<_> = day.iter().map(|e| e.timestamp().as_str()).collect();
        assert_eq!(
            stamps,
            vec![
                "2021-06-08T12:00:00.000Z",
                "2021-06-08T09:00:00.000Z",
                "2021-06-08T09:00:00.000Z"
            ]
        );
        // Equal timestamps keep the session first
        assert!(matches!(day[1], TimelineEntry::Access(_)));
    }

    #[test]
    fn test_filters() {
        let sessions = vec![
            session("a", "com.a", "2021-06-08T09:00:00Z"),
            session("b", "com.b", "2021-06-09T09:00:00Z"),
        ];
        let domains = vec![domain("com.a", "2021-06-08T10:00:00Z")];

        let by_bundle = SummaryFilter {
            bundle_id: Some("com.a".to_string()),
            ..Default::default()
        };
        let timeline = merge_timeline(sessions.clone(), domains.clone(), &by_bundle);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline["2021-06-08"].len(), 2);

        let by_date = SummaryFilter {
            date: Some("2021-06-09".to_string()),
            ..Default::default()
        };
        let timeline = merge_timeline(sessions.clone(), domains.clone(), &by_date);
        assert_eq!(timeline.keys().collect::<Vec<_>>(), vec!["2021-06-09"]);

        let access_only = SummaryFilter {
            kind: Some(TypeFilter::AnyAccess),
            ..Default::default()
        };
        let timeline = merge_timeline(sessions.clone(), domains.clone(), &access_only);
        assert!(timeline
            .values()
            .flatten()
            .all(|e| matches!(e, TimelineEntry::Access(_))));

        let other_stream = SummaryFilter {
            kind: Some(TypeFilter::Access("camera".to_string())),
            ..Default::default()
        };
        assert!(merge_timeline(sessions, domains, &other_stream).is_empty());
    }
}
