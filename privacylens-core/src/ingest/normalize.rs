//! Conversion of detected lines into canonical records.
//!
//! Every generation is funnelled into [`AccessRecord`] / [`DomainRecord`] here.
//! Fields a generation does not carry stay `None`; they are never filled
//! with zero or empty defaults.

use super::detect::{AccessLine, DomainLine, DomainV1};
use crate::error::{Error, Result};
use crate::types::{
    AccessGeneration, AccessKind, AccessRecord, DomainGeneration, DomainRecord, UtcTimestamp,
};

/// Namespace prefix carried by raw stream identifiers.
pub const STREAM_PREFIX: &str = "com.apple.privacy.accounting.stream.";

/// Display value for an access record's resource.
///
/// `category` wins when present. Otherwise the stream with its namespace
/// prefix removed, plus `/<tcc_service>` when one is given.
pub fn stream_display(
    category: Option<&str>,
    stream: Option<&str>,
    tcc_service: Option<&str>,
) -> String {
    if let Some(category) = category {
        return category.to_string();
    }
    let base = stream
        .map(|s| s.strip_prefix(STREAM_PREFIX).unwrap_or(s))
        .unwrap_or_default();
    match tcc_service {
        Some(service) => format!("{}/{}", base, service),
        None => base.to_string(),
    }
}

/// Normalize one access line read at `line_number`.
pub fn normalize_access(line_number: usize, line: AccessLine) -> Result<AccessRecord> {
    let record = match line {
        AccessLine::V1(r) => AccessRecord {
            line_number,
            stream: Some(r.stream),
            tcc_service: r.tcc_service,
            category: None,
            accessor_id: r.accessor.identifier,
            accessor_id_type: r.accessor.identifier_type,
            kind: AccessKind::parse(&r.kind),
            session_id: r.identifier,
            timestamp: UtcTimestamp::parse(&r.timestamp)?,
            format_version: Some(r.version),
            out_of_process: None,
            generation: AccessGeneration::V1,
        },
        AccessLine::V2(r) => AccessRecord {
            line_number,
            stream: r.stream,
            tcc_service: r.tcc_service,
            category: Some(r.category),
            accessor_id: r.accessor.identifier,
            accessor_id_type: r.accessor.identifier_type,
            kind: AccessKind::parse(&r.kind),
            session_id: r.identifier,
            timestamp: UtcTimestamp::parse(&r.timestamp)?,
            format_version: r.version,
            out_of_process: None,
            generation: AccessGeneration::V2,
        },
        AccessLine::V3(r) => AccessRecord {
            line_number,
            stream: r.stream,
            tcc_service: r.tcc_service,
            category: Some(r.category),
            accessor_id: r.accessor.identifier,
            accessor_id_type: r.accessor.identifier_type,
            kind: AccessKind::parse(&r.kind),
            session_id: r.identifier,
            timestamp: UtcTimestamp::parse(&r.time_stamp)?,
            format_version: None,
            out_of_process: r.out_of_process,
            generation: AccessGeneration::V3,
        },
    };
    Ok(record)
}

/// Normalize one line-oriented domain record.
pub fn normalize_domain(line: DomainLine) -> Result<DomainRecord> {
    let record = match line {
        DomainLine::V2(r) => DomainRecord {
            bundle_id: r.bundle_id,
            domain: r.domain,
            context: r.context,
            initiated_type: r.initiated_type,
            domain_type: r.domain_type,
            timestamp: UtcTimestamp::parse(&r.time_stamp)?,
            first_timestamp: UtcTimestamp::parse(&r.first_time_stamp)?,
            hits: r.hits,
            domain_owner: r.domain_owner,
            effective_user_id: None,
            has_app_bundle_name: None,
            generation: DomainGeneration::V2,
        },
        DomainLine::V3(r) => DomainRecord {
            bundle_id: r.bundle_id,
            domain: r.domain,
            context: r.context,
            initiated_type: r.initiated_type,
            domain_type: r.domain_type,
            timestamp: UtcTimestamp::parse(&r.time_stamp)?,
            first_timestamp: UtcTimestamp::parse(&r.first_time_stamp)?,
            hits: r.hits,
            domain_owner: r.domain_owner,
            effective_user_id: None,
            has_app_bundle_name: None,
            generation: DomainGeneration::V3,
        },
    };
    check_hits(record)
}

/// Normalize one record of the legacy nested tail; the bundle id is its object key.
pub fn normalize_legacy_domain(bundle_id: &str, r: DomainV1) -> Result<DomainRecord> {
    check_hits(DomainRecord {
        bundle_id: bundle_id.to_string(),
        domain: r.domain,
        context: r.context,
        initiated_type: r.initiated_type,
        domain_type: r.domain_type,
        timestamp: UtcTimestamp::parse(&r.time_stamp)?,
        first_timestamp: UtcTimestamp::parse(&r.first_time_stamp)?,
        hits: r.hits,
        domain_owner: r.domain_owner,
        effective_user_id: Some(r.effective_user_id),
        has_app_bundle_name: Some(r.has_app_bundle_name),
        generation: DomainGeneration::V1,
    })
}

fn check_hits(record: DomainRecord) -> Result<DomainRecord> {
    if record.hits < 1 {
        return Err(Error::Schema(format!(
            "hits must be at least 1, got {}",
            record.hits
        )));
    }
    Ok(record)
}
