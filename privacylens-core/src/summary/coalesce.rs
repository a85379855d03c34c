//! Presentation-level folding of repeated access entries.

use crate::types::{CoalescedEntry, TimelineEntry};

/// Fold runs of near-identical access entries into one row with a count.
///
/// An access entry absorbs the entries that directly follow it while the
/// leading entry has no end, and each follower has the same stream, the same
/// app and a start within the same second. Domain entries break a run.
/// The leading entry is kept as is, so order and first timestamp survive.
pub fn coalesce(entries: &[TimelineEntry]) -> Vec<CoalescedEntry> {
    let mut rows: Vec<CoalescedEntry> = Vec::with_capacity(entries.len());

    for entry in entries {
        if let Some(last) = rows.last_mut() {
            if absorbs(&last.entry, entry) {
                last.count += 1;
                continue;
            }
        }
        rows.push(CoalescedEntry {
            entry: entry.clone(),
            count: 1,
        });
    }

    rows
}

fn absorbs(lead: &TimelineEntry, next: &TimelineEntry) -> bool {
    match (lead, next) {
        (TimelineEntry::Access(lead), TimelineEntry::Access(next)) => {
            lead.end.is_none()
                && lead.stream == next.stream
                && lead.bundle_id == next.bundle_id
                && lead.start.second() == next.start.second()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessSession, UtcTimestamp};

    fn access(id: &str, stream: &str, start: &str, end: Option<&str>) -> TimelineEntry {
        let start = UtcTimestamp::parse(start).unwrap();
        TimelineEntry::Access(AccessSession {
            session_id: id.to_string(),
            date: start.date().to_string(),
            stream: stream.to_string(),
            bundle_id: "com.example.app".to_string(),
            start,
            end: end.map(|e| UtcTimestamp::parse(e).unwrap()),
            start_estimated: false,
        })
    }

    #[test]
    fn test_three_point_events_in_one_second() {
        let entries = vec![
            access("a", "contacts", "2021-06-08T09:00:00.900Z", None),
            access("b", "contacts", "2021-06-08T09:00:00.500Z", None),
            access("c", "contacts", "2021-06-08T09:00:00.100Z", None),
        ];
        let rows = coalesce(&entries);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 3);
        assert_eq!(rows[0].entry, entries[0]);
    }

    #[test]
    fn test_run_breaks_on_stream_second_or_end() {
        let entries = vec![
            access("a", "contacts", "2021-06-08T09:00:01Z", None),
            access("b", "photos", "2021-06-08T09:00:01Z", None),
            access("c", "photos", "2021-06-08T09:00:00Z", None),
            access("d", "camera", "2021-06-08T08:00:00Z", Some("2021-06-08T08:01:00Z")),
            access("e", "camera", "2021-06-08T08:00:00Z", None),
        ];
        let rows = coalesce(&entries);

        let counts: Vec<_> = rows.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_counts_cover_every_entry() {
        let entries = vec![
            access("a", "contacts", "2021-06-08T09:00:00Z", Some("2021-06-08T09:00:03Z")),
            access("b", "contacts", "2021-06-08T09:00:00Z", None),
            access("c", "contacts", "2021-06-08T09:00:00Z", Some("2021-06-08T09:00:02Z")),
            access("d", "contacts", "2021-06-08T09:00:00Z", None),
        ];
        let rows = coalesce(&entries);

        // "a" has an end so it leads no run; "b" absorbs "c" and "d"
        let counts: Vec<_> = rows.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![1, 3]);
        assert_eq!(counts.iter().sum::<usize>(), entries.len());
    }
}
