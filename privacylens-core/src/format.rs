//! Formatting helpers for timeline output.

use chrono::{DateTime, Utc};

use crate::types::{AccessSession, CoalescedEntry, DomainRecord, TimelineEntry};

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    format_relative_time_from(ts, Utc::now())
}

fn format_relative_time_from(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Clock span of a session: `HH:MM:SS-HH:MM:SS`, or a single clock for
/// point events. An estimated start is prefixed with `~`.
pub fn format_session_span(session: &AccessSession) -> String {
    let start = if session.start_estimated {
        format!("~{}", session.start.clock())
    } else {
        session.start.clock().to_string()
    };
    match &session.end {
        Some(end) if !session.start_estimated => format!("{}-{}", start, end.clock()),
        _ => start,
    }
}

/// One-line rendering of a domain contact.
pub fn format_domain(domain: &DomainRecord) -> String {
    let hits = if domain.hits == 1 {
        "1 hit".to_string()
    } else {
        format!("{} hits", domain.hits)
    };
    format!(
        "{}  {}  {}  {} ({}, since {})",
        domain.timestamp.clock(),
        domain.bundle_id,
        domain.domain,
        hits,
        domain.initiated_type,
        domain.first_timestamp.date()
    )
}

/// One-line rendering of a coalesced timeline row.
pub fn format_entry(row: &CoalescedEntry) -> String {
    match &row.entry {
        TimelineEntry::Access(session) => {
            let mut line = format!(
                "{}  {}  {}",
                format_session_span(session),
                session.bundle_id,
                session.stream
            );
            if row.count > 1 {
                line.push_str(&format!(" ×{}", row.count));
            }
            line
        }
        TimelineEntry::Domain(domain) => format_domain(domain),
    }
}
