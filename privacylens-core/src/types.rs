//! Core domain types for privacylens
//!
//! These types represent the canonical data model that every generation of
//! the App Privacy Report export is normalized into, plus the derived views
//! the summarizer computes on each query.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Access record** | An app's access to a protected resource (photos, contacts, ...) at a point or interval in time |
//! | **Domain record** | An aggregate of an app's network contacts with one hostname: hit count, first and last contact |
//! | **Session** | A start event and its end event (or a lone event) sharing one `identifier` |
//! | **Generation** | One of the incompatible export formats shipped over time |
//! | **Source file** | The identifier a report was imported under; scopes every canonical row |

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================
// Timestamps
// ============================================

/// A canonical UTC instant, `YYYY-MM-DDTHH:MM:SS.mmmZ`.
///
/// Always 24 characters, so string order is chronological order. Only
/// constructed by parsing a date-time with an explicit offset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UtcTimestamp(String);

impl UtcTimestamp {
    /// Parse an RFC 3339 timestamp in any zone (e.g. `2021-06-08T18:48:49.573-05:00`)
    /// and convert it to canonical UTC.
    pub fn parse(value: &str) -> Result<Self> {
        let parsed = DateTime::parse_from_rfc3339(value).map_err(|e| Error::Timestamp {
            value: value.to_string(),
            message: e.to_string(),
        })?;
        Self::from_datetime(parsed.with_timezone(&Utc)).map_err(|e| match e {
            Error::Timestamp { message, .. } => Error::Timestamp {
                value: value.to_string(),
                message,
            },
            other => other,
        })
    }

    /// Canonicalize an instant. Sub-millisecond precision is dropped.
    pub fn from_datetime(dt: DateTime<Utc>) -> Result<Self> {
        if !(0..=9999).contains(&dt.year()) {
            return Err(Error::Timestamp {
                value: dt.to_rfc3339(),
                message: "year outside 0000-9999".to_string(),
            });
        }
        Ok(Self(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// UTC calendar day, `YYYY-MM-DD`
    pub fn date(&self) -> &str {
        &self.0[..10]
    }

    /// Truncated to the second, `YYYY-MM-DDTHH:MM:SS`
    pub fn second(&self) -> &str {
        &self.0[..19]
    }

    /// Wall-clock time of day, `HH:MM:SS`
    pub fn clock(&self) -> &str {
        &self.0[11..19]
    }
}

impl TryFrom<String> for UtcTimestamp {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<UtcTimestamp> for String {
    fn from(ts: UtcTimestamp) -> Self {
        ts.0
    }
}

impl std::fmt::Display for UtcTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================
// Record provenance
// ============================================

/// Record type declared by a `<metadata>` control line or a `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordType {
    Access,
    NetworkActivity,
}

impl RecordType {
    /// Returns the identifier used in the export format
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Access => "access",
            RecordType::NetworkActivity => "networkActivity",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "access" => Ok(RecordType::Access),
            "networkActivity" => Ok(RecordType::NetworkActivity),
            _ => Err(format!("unknown record type: {}", s)),
        }
    }
}

/// Export generation an access record was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessGeneration {
    /// Declared by `<metadata>` version 2, raw `stream` ids
    V1,
    /// Declared by `<metadata>` version 3, adds `category`
    V2,
    /// Self-describing lines with `"type": "access"`
    V3,
}

/// Export generation a domain record was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainGeneration {
    /// Nested `{bundleId: [records]}` object after `<end-of-section>`
    V1,
    /// Declared by `<metadata>` with `recordType: networkActivity`
    V2,
    /// Self-describing lines with `"type": "networkActivity"`
    V3,
}

macro_rules! generation_str {
    ($ty:ident) => {
        impl $ty {
            /// Returns the identifier used in database storage
            pub fn as_str(&self) -> &'static str {
                match self {
                    $ty::V1 => "v1",
                    $ty::V2 => "v2",
                    $ty::V3 => "v3",
                }
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    "v1" => Ok($ty::V1),
                    "v2" => Ok($ty::V2),
                    "v3" => Ok($ty::V3),
                    _ => Err(format!("unknown {}: {}", stringify!($ty), s)),
                }
            }
        }
    };
}

generation_str!(AccessGeneration);
generation_str!(DomainGeneration);

// ============================================
// Access records
// ============================================

/// The `kind` of an access event.
///
/// Only `intervalEnd` closes a session; every other value opens one or is a
/// point event. Unrecognized values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum AccessKind {
    IntervalBegin,
    IntervalEnd,
    Event,
    Other(String),
}

impl AccessKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "intervalBegin" => AccessKind::IntervalBegin,
            "intervalEnd" => AccessKind::IntervalEnd,
            "event" => AccessKind::Event,
            other => AccessKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AccessKind::IntervalBegin => "intervalBegin",
            AccessKind::IntervalEnd => "intervalEnd",
            AccessKind::Event => "event",
            AccessKind::Other(s) => s,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, AccessKind::IntervalEnd)
    }
}

impl From<String> for AccessKind {
    fn from(s: String) -> Self {
        AccessKind::parse(&s)
    }
}

impl From<AccessKind> for String {
    fn from(kind: AccessKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A normalized access event, one per access line of a report.
///
/// Rows are scoped by the source file they were imported from; `line_number`
/// is unique within that file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    /// 1-based physical line in the export
    pub line_number: usize,
    /// Raw stream id, e.g. `com.apple.privacy.accounting.stream.tcc`
    pub stream: Option<String>,
    /// Sub-service qualifier, e.g. `kTCCServicePhotos`
    pub tcc_service: Option<String>,
    /// Resource category, e.g. `photos`
    pub category: Option<String>,
    /// Requesting app, e.g. `com.getdropbox.Dropbox`
    pub accessor_id: String,
    /// Kind of `accessor_id`, e.g. `bundleID`
    pub accessor_id_type: String,
    pub kind: AccessKind,
    /// Correlates the start and end events of one session
    pub session_id: String,
    pub timestamp: UtcTimestamp,
    /// The record's own `version` field, when it had one
    pub format_version: Option<i64>,
    pub out_of_process: Option<bool>,
    pub generation: AccessGeneration,
}

impl AccessRecord {
    /// Display value for the accessed resource, e.g. `photos` or `tcc/kTCCServicePhotos`
    pub fn stream_or_category(&self) -> String {
        crate::ingest::normalize::stream_display(
            self.category.as_deref(),
            self.stream.as_deref(),
            self.tcc_service.as_deref(),
        )
    }
}

// ============================================
// Domain records
// ============================================

/// A normalized network-activity aggregate.
///
/// Natural key within a file: `(bundle_id, domain, context, initiated_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub bundle_id: String,
    /// Hostname contacted
    pub domain: String,
    pub context: String,
    /// e.g. `AppInitiated`, `NonAppInitiated`
    pub initiated_type: String,
    pub domain_type: i64,
    /// Most recent contact
    pub timestamp: UtcTimestamp,
    /// Earliest contact
    pub first_timestamp: UtcTimestamp,
    pub hits: i64,
    pub domain_owner: String,
    /// Only present in the legacy nested format
    pub effective_user_id: Option<i64>,
    /// Only present in the legacy nested format
    pub has_app_bundle_name: Option<String>,
    pub generation: DomainGeneration,
}

// ============================================
// Derived views
// ============================================

/// An access session reconstructed from the events sharing one `session_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessSession {
    pub session_id: String,
    /// UTC day of `start`
    pub date: String,
    pub stream: String,
    pub bundle_id: String,
    pub start: UtcTimestamp,
    pub end: Option<UtcTimestamp>,
    /// Set when only an end event was seen and `start` is that end time
    pub start_estimated: bool,
}

/// One row of the merged per-date timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineEntry {
    Access(AccessSession),
    Domain(DomainRecord),
}

impl TimelineEntry {
    /// Ordering timestamp: session start, or last contact for domains
    pub fn timestamp(&self) -> &UtcTimestamp {
        match self {
            TimelineEntry::Access(session) => &session.start,
            TimelineEntry::Domain(domain) => &domain.timestamp,
        }
    }

    pub fn date(&self) -> &str {
        self.timestamp().date()
    }

    pub fn bundle_id(&self) -> &str {
        match self {
            TimelineEntry::Access(session) => &session.bundle_id,
            TimelineEntry::Domain(domain) => &domain.bundle_id,
        }
    }

    pub fn as_access(&self) -> Option<&AccessSession> {
        match self {
            TimelineEntry::Access(session) => Some(session),
            TimelineEntry::Domain(_) => None,
        }
    }
}

/// A timeline entry after presentation-level coalescing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoalescedEntry {
    #[serde(flatten)]
    pub entry: TimelineEntry,
    /// Number of adjacent entries folded into this one (>= 1)
    pub count: usize,
}

// ============================================
// Query filters
// ============================================

/// Entry type filter: `access`, `access/<stream>` or `domain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeFilter {
    /// Any access session
    AnyAccess,
    /// Access sessions for exactly this stream/category
    Access(String),
    /// Domain contacts only
    Domain,
}

impl TypeFilter {
    pub fn matches(&self, entry: &TimelineEntry) -> bool {
        match (self, entry) {
            (TypeFilter::AnyAccess, TimelineEntry::Access(_)) => true,
            (TypeFilter::Access(stream), TimelineEntry::Access(session)) => {
                &session.stream == stream
            }
            (TypeFilter::Domain, TimelineEntry::Domain(_)) => true,
            _ => false,
        }
    }

    pub fn includes_access(&self) -> bool {
        !matches!(self, TypeFilter::Domain)
    }

    pub fn includes_domains(&self) -> bool {
        matches!(self, TypeFilter::Domain)
    }
}

impl std::fmt::Display for TypeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeFilter::AnyAccess => write!(f, "access"),
            TypeFilter::Access(stream) => write!(f, "access/{}", stream),
            TypeFilter::Domain => write!(f, "domain"),
        }
    }
}

impl std::str::FromStr for TypeFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "access" => Ok(TypeFilter::AnyAccess),
            "domain" | "networkActivity" => Ok(TypeFilter::Domain),
            _ => match s.strip_prefix("access/") {
                Some(stream) if !stream.is_empty() => Ok(TypeFilter::Access(stream.to_string())),
                _ => Err(format!(
                    "unknown type filter: {} (expected access, access/<stream> or domain)",
                    s
                )),
            },
        }
    }
}

/// Optional predicates for a summary query. All unset means everything.
#[derive(Debug, Clone, Default)]
pub struct SummaryFilter {
    /// UTC day, `YYYY-MM-DD`
    pub date: Option<String>,
    pub kind: Option<TypeFilter>,
    pub bundle_id: Option<String>,
}

impl SummaryFilter {
    pub fn matches(&self, entry: &TimelineEntry) -> bool {
        self.date.as_deref().map_or(true, |d| d == entry.date())
            && self.kind.as_ref().map_or(true, |k| k.matches(entry))
            && self
                .bundle_id
                .as_deref()
                .map_or(true, |b| b == entry.bundle_id())
    }
}

// ============================================
// Import ledger
// ============================================

/// Bookkeeping row written after each successful import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub source_file: String,
    /// Hex SHA-256 of the imported text
    pub content_sha256: String,
    pub access_count: usize,
    pub domain_count: usize,
    pub imported_at: DateTime<Utc>,
}
