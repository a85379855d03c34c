//! Record schema detection.
//!
//! An export is a sequence of JSON lines from one of several generations:
//!
//! ```text
//! {"version":2,"recordType":"access","exportTimestamp":"...","_marker":"<metadata>"}
//! {"stream":"com.apple.privacy.accounting.stream.tcc","accessor":{...},"version":3,...}
//! {"_marker":"<end-of-section>"}
//! {
//!   "com.example.app": [ { "domain": "example.com", ... } ]
//! }
//! ```
//!
//! Older lines are only interpretable through the most recent `<metadata>`
//! declaration, so detection is a fold: [`ParseState::detect`] takes the
//! state and one raw line and returns the next state plus what the line was.
//! Every generation has its own struct with `deny_unknown_fields`, so an
//! extra or missing field is a detection failure.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::normalize::STREAM_PREFIX;
use crate::error::{Error, Result};
use crate::types::RecordType;

const END_OF_SECTION: &str = "<end-of-section>";
const METADATA: &str = "<metadata>";

/// First line of the legacy nested domain tail.
const LEGACY_TAIL_SENTINEL: &str = "{";

// ============================================
// Generation shapes
// ============================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Accessor {
    pub identifier: String,
    pub identifier_type: String,
}

/// Access record declared by metadata version 2.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AccessV1 {
    pub stream: String,
    pub accessor: Accessor,
    pub tcc_service: Option<String>,
    pub identifier: String,
    pub kind: String,
    pub timestamp: String,
    pub version: i64,
}

/// Access record declared by metadata version 3.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AccessV2 {
    pub accessor: Accessor,
    pub category: String,
    pub identifier: String,
    pub kind: String,
    pub timestamp: String,
    pub stream: Option<String>,
    pub tcc_service: Option<String>,
    pub version: Option<i64>,
}

/// Self-describing access record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AccessV3 {
    #[serde(rename = "type")]
    pub record_type: String,
    pub accessor: Accessor,
    pub category: String,
    pub identifier: String,
    pub kind: String,
    pub time_stamp: String,
    pub out_of_process: Option<bool>,
    pub stream: Option<String>,
    pub tcc_service: Option<String>,
}

/// Domain record inside the legacy nested tail.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DomainV1 {
    pub domain: String,
    pub effective_user_id: i64,
    pub domain_type: i64,
    pub time_stamp: String,
    #[serde(rename = "hasApp.bundleName")]
    pub has_app_bundle_name: String,
    pub context: String,
    pub hits: i64,
    pub domain_owner: String,
    pub initiated_type: String,
    pub first_time_stamp: String,
}

/// Domain record declared by `networkActivity` metadata.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DomainV2 {
    pub domain: String,
    pub first_time_stamp: String,
    pub domain_type: i64,
    pub time_stamp: String,
    pub context: String,
    pub initiated_type: String,
    pub hits: i64,
    pub domain_owner: String,
    #[serde(rename = "bundleID")]
    pub bundle_id: String,
}

/// Self-describing domain record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DomainV3 {
    #[serde(rename = "type")]
    pub record_type: String,
    pub domain: String,
    pub first_time_stamp: String,
    pub domain_type: i64,
    pub time_stamp: String,
    pub context: String,
    pub initiated_type: String,
    pub hits: i64,
    pub domain_owner: String,
    #[serde(rename = "bundleID")]
    pub bundle_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessLine {
    V1(AccessV1),
    V2(AccessV2),
    V3(AccessV3),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainLine {
    V2(DomainV2),
    V3(DomainV3),
}

// ============================================
// Detection
// ============================================

/// A `<metadata>` declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Declaration {
    pub record_type: RecordType,
    pub version: i64,
}

/// What one line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Detected {
    /// Whitespace-only line
    Blank,
    Metadata(Declaration),
    EndOfSection,
    /// The rest of the file is the nested legacy domain object
    LegacyTail,
    Access(AccessLine),
    Domain(DomainLine),
}

/// Parse state threaded through the lines of one export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseState {
    pub declared: Option<Declaration>,
    pub end_of_section: bool,
}

impl ParseState {
    /// Classify one raw line.
    ///
    /// Returns the state for the following line. Errors carry no line
    /// context; the importer attaches it.
    pub fn detect(self, line: &str) -> Result<(ParseState, Detected)> {
        if line.trim().is_empty() {
            return Ok((self, Detected::Blank));
        }
        if self.end_of_section && line.trim_end() == LEGACY_TAIL_SENTINEL {
            return Ok((self, Detected::LegacyTail));
        }

        let value: Value = serde_json::from_str(line)
            .map_err(|e| Error::Schema(format!("expected JSON: {}", e)))?;
        let obj = match &value {
            Value::Object(obj) => obj,
            _ => return Err(Error::Schema("expected a JSON object".to_string())),
        };

        // Rules 1 and 2: control lines
        if let Some(marker) = obj.get("_marker") {
            return match marker.as_str() {
                Some(END_OF_SECTION) => Ok((
                    ParseState {
                        end_of_section: true,
                        ..self
                    },
                    Detected::EndOfSection,
                )),
                Some(METADATA) => {
                    let declaration = parse_declaration(obj)?;
                    tracing::debug!(
                        record_type = %declaration.record_type,
                        version = declaration.version,
                        "Metadata declared"
                    );
                    Ok((
                        ParseState {
                            declared: Some(declaration),
                            ..self
                        },
                        Detected::Metadata(declaration),
                    ))
                }
                Some(other) => Err(Error::Schema(format!("unknown marker {:?}", other))),
                None => Err(Error::Schema("_marker must be a string".to_string())),
            };
        }

        // Rule 3: self-describing lines
        if let Some(record_type) = obj.get("type").cloned() {
            let detected = match record_type.as_str() {
                Some("access") => Detected::Access(AccessLine::V3(shape(value, "v3 access")?)),
                Some("networkActivity") => {
                    Detected::Domain(DomainLine::V3(shape(value, "v3 network activity")?))
                }
                _ => return Err(Error::Schema(format!("unexpected type {}", record_type))),
            };
            return Ok((self, detected));
        }

        // Rule 4: older lines, resolved through the declaration
        let looks_like_record = obj.get("version").map_or(false, Value::is_number)
            || obj.get("category").map_or(false, Value::is_string)
            || obj.get("bundleID").map_or(false, Value::is_string);
        if !looks_like_record {
            return Err(Error::Schema(
                "expected an access or network activity record".to_string(),
            ));
        }

        let declared = self.declared.ok_or_else(|| {
            Error::Schema("record appears before any <metadata> declaration".to_string())
        })?;
        let detected = match (declared.record_type, declared.version) {
            (RecordType::Access, 2) => {
                let record: AccessV1 = shape(value, "v1 access")?;
                validate_v1(&record)?;
                Detected::Access(AccessLine::V1(record))
            }
            (RecordType::Access, 3) => Detected::Access(AccessLine::V2(shape(value, "v2 access")?)),
            (RecordType::Access, version) => {
                return Err(Error::Schema(format!(
                    "unsupported access format version {}",
                    version
                )))
            }
            (RecordType::NetworkActivity, _) => {
                Detected::Domain(DomainLine::V2(shape(value, "v2 network activity")?))
            }
        };
        Ok((self, detected))
    }
}

fn parse_declaration(obj: &Map<String, Value>) -> Result<Declaration> {
    let record_type = obj
        .get("recordType")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<RecordType>().ok())
        .ok_or_else(|| {
            Error::Schema(
                "metadata must declare recordType access or networkActivity".to_string(),
            )
        })?;
    let version = obj
        .get("version")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Schema("metadata must declare an integer version".to_string()))?;
    Ok(Declaration {
        record_type,
        version,
    })
}

fn validate_v1(record: &AccessV1) -> Result<()> {
    if record.version != 3 {
        return Err(Error::Schema(format!(
            "v1 access record must carry version 3, got {}",
            record.version
        )));
    }
    if !record.stream.starts_with(STREAM_PREFIX) {
        return Err(Error::Schema(format!(
            "v1 access stream must start with {}",
            STREAM_PREFIX
        )));
    }
    Ok(())
}

fn shape<T: DeserializeOwned>(value: Value, label: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Schema(format!("not a {} record: {}", label, e)))
}

/// Parse the legacy tail: one object mapping bundle ids to domain record arrays.
///
/// Returns `(bundle_id, record, rendered)` in key order, where `rendered` is
/// the record's compact JSON for error reports.
pub fn parse_legacy_tail(text: &str) -> Result<Vec<(String, DomainV1, String)>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::Schema(format!("legacy domain section is not JSON: {}", e)))?;
    let obj = match value {
        Value::Object(obj) => obj,
        _ => {
            return Err(Error::Schema(
                "legacy domain section must be an object".to_string(),
            ))
        }
    };

    let mut records = Vec::new();
    for (bundle_id, entries) in obj {
        let entries = match entries {
            Value::Array(entries) => entries,
            other => {
                return Err(Error::Schema(format!(
                    "legacy domain records for {} must be an array, found {}",
                    bundle_id, other
                )))
            }
        };
        for entry in entries {
            let rendered = entry.to_string();
            let record: DomainV1 = shape(entry, "v1 network activity")
                .map_err(|e| Error::Schema(format!("{} in {}", e, rendered)))?;
            records.push((bundle_id.clone(), record, rendered));
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1_ACCESS: &str = r#"{"stream":"com.apple.privacy.accounting.stream.tcc","accessor":{"identifier":"com.getdropbox.Dropbox","identifierType":"bundleID"},"tccService":"kTCCServicePhotos","identifier":"0C3F","kind":"intervalBegin","timestamp":"2021-06-08T18:48:49.573-05:00","version":3}"#;
    const V2_ACCESS: &str = r#"{"accessor":{"identifier":"com.getdropbox.Dropbox","identifierType":"bundleID"},"category":"photos","identifier":"A1","kind":"intervalEnd","timestamp":"2021-06-25T09:00:00.000-05:00","version":3}"#;
    const V3_DOMAIN: &str = r#"{"type":"networkActivity","domain":"example.com","firstTimeStamp":"2021-09-20T10:00:00.000-05:00","domainType":2,"timeStamp":"2021-09-21T10:00:00.000-05:00","context":"","initiatedType":"AppInitiated","hits":3,"domainOwner":"","bundleID":"com.example.app"}"#;

    fn declared(record_type: RecordType, version: i64) -> ParseState {
        ParseState {
            declared: Some(Declaration {
                record_type,
                version,
            }),
            end_of_section: false,
        }
    }

    #[test]
    fn test_metadata_updates_state() {
        let line = r#"{"version":2,"recordType":"access","exportTimestamp":"2021-06-11T13:46:18.386-05:00","_marker":"<metadata>"}"#;
        let (state, detected) = ParseState::default().detect(line).unwrap();
        let expected = Declaration {
            record_type: RecordType::Access,
            version: 2,
        };
        assert_eq!(detected, Detected::Metadata(expected));
        assert_eq!(state.declared, Some(expected));
    }

    #[test]
    fn test_metadata_requires_fields() {
        let missing_version = r#"{"recordType":"access","_marker":"<metadata>"}"#;
        assert!(ParseState::default().detect(missing_version).is_err());
        let bad_type = r#"{"recordType":"other","version":1,"_marker":"<metadata>"}"#;
        assert!(ParseState::default().detect(bad_type).is_err());
    }

    #[test]
    fn test_unknown_marker_fails() {
        let err = ParseState::default()
            .detect(r#"{"_marker":"<something-new>"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown marker"));
    }

    #[test]
    fn test_declared_version_selects_access_generation() {
        let (_, detected) = declared(RecordType::Access, 2).detect(V1_ACCESS).unwrap();
        assert!(matches!(detected, Detected::Access(AccessLine::V1(_))));

        let (_, detected) = declared(RecordType::Access, 3).detect(V2_ACCESS).unwrap();
        assert!(matches!(detected, Detected::Access(AccessLine::V2(_))));

        // A V1 line under a V2 declaration lacks `category`
        assert!(declared(RecordType::Access, 3).detect(V1_ACCESS).is_err());
        assert!(declared(RecordType::Access, 9).detect(V2_ACCESS).is_err());
    }

    #[test]
    fn test_v1_requires_version_three_and_stream_prefix() {
        let wrong_version = V1_ACCESS.replace(r#""version":3"#, r#""version":4"#);
        assert!(declared(RecordType::Access, 2).detect(&wrong_version).is_err());

        let wrong_stream = V1_ACCESS.replace("com.apple.privacy.accounting.stream.tcc", "tcc");
        assert!(declared(RecordType::Access, 2).detect(&wrong_stream).is_err());
    }

    #[test]
    fn test_older_record_without_declaration_fails() {
        let err = ParseState::default().detect(V2_ACCESS).unwrap_err();
        assert!(err.to_string().contains("<metadata>"));
    }

    #[test]
    fn test_self_describing_ignores_declaration() {
        let (state, detected) = declared(RecordType::Access, 2).detect(V3_DOMAIN).unwrap();
        assert!(matches!(detected, Detected::Domain(DomainLine::V3(_))));
        assert_eq!(state, declared(RecordType::Access, 2));
    }

    #[test]
    fn test_unknown_type_and_extra_field_fail() {
        let unknown = V3_DOMAIN.replace("networkActivity", "bluetooth");
        assert!(ParseState::default().detect(&unknown).is_err());

        let extra = V3_DOMAIN.replace(r#""hits":3"#, r#""hits":3,"extra":true"#);
        let err = ParseState::default().detect(&extra).unwrap_err();
        assert!(err.to_string().contains("extra"));
    }

    #[test]
    fn test_non_record_lines_fail() {
        assert!(ParseState::default().detect("not json").is_err());
        assert!(ParseState::default().detect("[1,2]").is_err());
        assert!(ParseState::default().detect(r#"{"hello":"world"}"#).is_err());
    }

    #[test]
    fn test_legacy_sentinel_only_after_end_of_section() {
        assert!(ParseState::default().detect("{").is_err());

        let (state, detected) = ParseState::default()
            .detect(r#"{"_marker":"<end-of-section>"}"#)
            .unwrap();
        assert_eq!(detected, Detected::EndOfSection);
        let (_, detected) = state.detect("{").unwrap();
        assert_eq!(detected, Detected::LegacyTail);
    }

    #[test]
    fn test_parse_legacy_tail() {
        let tail = r#"{
  "com.example.app" : [
    {"domain":"example.com","effectiveUserId":501,"domainType":2,"timeStamp":"2021-06-08T11:00:00-05:00","hasApp.bundleName":"com.example.app","context":"","hits":4,"domainOwner":"","initiatedType":"AppInitiated","firstTimeStamp":"2021-06-08T10:00:00-05:00"}
  ]
}"#;
        let records = parse_legacy_tail(tail).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "com.example.app");
        assert_eq!(records[0].1.hits, 4);

        assert!(parse_legacy_tail(r#"{"com.example.app": {}}"#).is_err());
        assert!(parse_legacy_tail(r#"{"com.example.app": [{"domain":"x"}]}"#).is_err());
    }
}
