//! Session reconstruction from paired access events.

use std::collections::HashMap;

use crate::types::{AccessRecord, AccessSession, UtcTimestamp};

struct SessionBuilder {
    session_id: String,
    stream: String,
    bundle_id: String,
    start: Option<UtcTimestamp>,
    end: Option<UtcTimestamp>,
}

impl SessionBuilder {
    fn new(first: &AccessRecord) -> Self {
        Self {
            session_id: first.session_id.clone(),
            stream: first.stream_or_category(),
            bundle_id: first.accessor_id.clone(),
            start: None,
            end: None,
        }
    }

    fn absorb(&mut self, record: &AccessRecord) {
        if record.kind.is_end() {
            self.end = Some(record.timestamp.clone());
        } else if self.start.is_none() {
            self.start = Some(record.timestamp.clone());
        }
    }

    fn finish(self) -> Option<AccessSession> {
        let (start, start_estimated) = match (self.start, &self.end) {
            (Some(start), _) => (start, false),
            (None, Some(end)) => (end.clone(), true),
            (None, None) => return None,
        };
        Some(AccessSession {
            session_id: self.session_id,
            date: start.date().to_string(),
            stream: self.stream,
            bundle_id: self.bundle_id,
            start,
            end: self.end,
            start_estimated,
        })
    }
}

/// Group access records into one session per `session_id`.
///
/// Records are scanned in line order regardless of input order. The first
/// record of a group names its stream and app; the last `intervalEnd` sets
/// the end; the first other event sets the start. A group holding only end
/// events is dated by its end and flagged `start_estimated`.
///
/// Sessions are returned in order of their first line.
pub fn reconstruct_sessions(records: &[AccessRecord]) -> Vec<AccessSession> {
    let mut ordered: Vec<&AccessRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.line_number);

    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut builders: Vec<SessionBuilder> = Vec::new();

    for record in ordered {
        let slot = *index.entry(record.session_id.as_str()).or_insert_with(|| {
            builders.push(SessionBuilder::new(record));
            builders.len() - 1
        });
        builders[slot].absorb(record);
    }

    builders
        .into_iter()
        .filter_map(SessionBuilder::finish)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessGeneration, AccessKind};

    fn record(line: usize, session: &str, kind: AccessKind, at: &str) -> AccessRecord {
        AccessRecord {
            line_number: line,
            stream: None,
            tcc_service: None,
            category: Some("contacts".to_string()),
            accessor_id: "com.example.app".to_string(),
            accessor_id_type: "bundleID".to_string(),
            kind,
            session_id: session.to_string(),
            timestamp: UtcTimestamp::parse(at).unwrap(),
            format_version: None,
            out_of_process: None,
            generation: AccessGeneration::V3,
        }
    }

    #[test]
    fn test_pairs_start_and_end() {
        let sessions = reconstruct_sessions(&[
            record(2, "S1", AccessKind::IntervalEnd, "2021-06-08T09:00:05Z"),
            record(1, "S1", AccessKind::IntervalBegin, "2021-06-08T09:00:00Z"),
        ]);

        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.start.as_str(), "2021-06-08T09:00:00.000Z");
        assert_eq!(s.end.as_ref().unwrap().as_str(), "2021-06-08T09:00:05.000Z");
        assert_eq!(s.date, "2021-06-08");
        assert_eq!(s.stream, "contacts");
        assert!(!s.start_estimated);
    }

    #[test]
    fn test_end_only_session_is_estimated() {
        let sessions = reconstruct_sessions(&[record(
            4,
            "S2",
            AccessKind::IntervalEnd,
            "2021-06-09T00:00:01Z",
        )]);

        let s = &sessions[0];
        assert!(s.start_estimated);
        assert_eq!(s.start, *s.end.as_ref().unwrap());
        assert_eq!(s.date, "2021-06-09");
    }

    #[test]
    fn test_first_start_wins_and_order_follows_first_line() {
        let sessions = reconstruct_sessions(&[
            record(3, "B", AccessKind::Event, "2021-06-08T10:00:00Z"),
            record(1, "A", AccessKind::IntervalBegin, "2021-06-08T09:00:00Z"),
            record(2, "A", AccessKind::Other("intervalStart".to_string()), "2021-06-08T09:30:00Z"),
        ]);

        let ids: Vec<_> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(sessions[0].start.as_str(), "2021-06-08T09:00:00.000Z");
        assert!(sessions[1].end.is_none());
    }
}
