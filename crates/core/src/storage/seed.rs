//! Bulk metadata loading from the curated seed CSV.
//!
//! Columns: `channel_id, title?, firm_type, target_audience, content_type, has_legacy_media`.
//! `target_audience` is either a JSON array of tags or a bare tag.

use crate::domain::metadata::{ChannelMetadata, MetadataFields};
use crate::storage::metadata::upsert_metadata;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeedReport {
    pub loaded: Vec<String>,
    pub rejected: Vec<SeedRejection>,
    /// Rows skipped because `channel_id` was blank.
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedRejection {
    /// 1-based line number in the file, header included.
    pub line: usize,
    pub channel_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
struct SeedRecord {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    firm_type: Option<String>,
    #[serde(default)]
    target_audience: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    has_legacy_media: Option<String>,
}

#[derive(Debug)]
pub struct ParsedSeed {
    pub rows: Vec<ChannelMetadata>,
    pub report: SeedReport,
}

/// Parses and validates seed rows without touching the store.
pub fn parse_seed<R: Read>(reader: R) -> anyhow::Result<ParsedSeed> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .context("failed to read seed CSV headers")?
        .clone();

    let mut rows = Vec::new();
    let mut report = SeedReport::default();

    for result in csv_reader.records() {
        let raw = match result {
            Ok(raw) => raw,
            Err(err) => {
                report.rejected.push(SeedRejection {
                    line: err.position().map(line_of).unwrap_or_default(),
                    channel_id: None,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        // Line where the record starts; quoted fields may span several lines.
        let line = raw.position().map(line_of).unwrap_or_default();

        let record = match raw.deserialize::<SeedRecord>(Some(&headers)) {
            Ok(r) => r,
            Err(err) => {
                report.rejected.push(SeedRejection {
                    line,
                    channel_id: None,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        let Some(channel_id) = record
            .channel_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
        else {
            report.dropped += 1;
            continue;
        };

        match record_into_metadata(&channel_id, record) {
            Ok(meta) => rows.push(meta),
            Err(reason) => report.rejected.push(SeedRejection {
                line,
                channel_id: Some(channel_id),
                reason,
            }),
        }
    }

    Ok(ParsedSeed { rows, report })
}

fn line_of(pos: &csv::Position) -> usize {
    usize::try_from(pos.line()).unwrap_or(usize::MAX)
}

/// Loads the seed file into the metadata table; seed values replace existing rows.
///
/// A missing file is not an error: it is logged and nothing is loaded.
pub async fn load_metadata_seed(
    pool: &SqlitePool,
    path: &Path,
    now: DateTime<Utc>,
) -> anyhow::Result<SeedReport> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "metadata seed file not found; skipping");
            return Ok(SeedReport::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open seed file {}", path.display()))
        }
    };

    let ParsedSeed { rows, mut report } = parse_seed(file)?;

    for meta in rows {
        upsert_metadata(pool, &meta, now).await?;
        report.loaded.push(meta.channel_id);
    }

    for rejection in &report.rejected {
        tracing::warn!(
            line = rejection.line,
            channel_id = rejection.channel_id.as_deref().unwrap_or(""),
            reason = %rejection.reason,
            "seed row rejected"
        );
    }
    tracing::info!(
        path = %path.display(),
        loaded = report.loaded.len(),
        rejected = report.rejected.len(),
        dropped = report.dropped,
        "loaded channel metadata seed"
    );

    Ok(report)
}

/// Coerces a raw `target_audience` cell into tags.
///
/// - blank or `None` gives no tags
/// - a value starting with `[` is parsed as a JSON array of strings; malformed JSON gives no tags
/// - anything else is a single tag
pub fn coerce_target_audience(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Vec::new();
    };
    if raw.eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    if raw.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(raw).unwrap_or_default();
    }
    vec![raw.to_string()]
}

/// `true/false/1/0/yes/no`, case-insensitive. Blank is `false`.
pub fn parse_flag(raw: Option<&str>) -> Option<bool> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Some(false),
        Some("true" | "1" | "yes" | "y" | "t") => Some(true),
        Some("false" | "0" | "no" | "n" | "f") => Some(false),
        Some(_) => None,
    }
}

fn record_into_metadata(channel_id: &str, record: SeedRecord) -> Result<ChannelMetadata, String> {
    let has_legacy_media = parse_flag(record.has_legacy_media.as_deref()).ok_or_else(|| {
        format!(
            "invalid has_legacy_media: {:?}",
            record.has_legacy_media.as_deref().unwrap_or_default()
        )
    })?;

    let fields = MetadataFields {
        title: record.title,
        description: None,
        firm_type: record.firm_type.filter(|s| !s.eq_ignore_ascii_case("none")),
        target_audience: coerce_target_audience(record.target_audience.as_deref()),
        content_type: record.content_type.filter(|s| !s.eq_ignore_ascii_case("none")),
        has_legacy_media,
    };

    fields
        .validate_and_into_metadata(channel_id)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metadata::{AudienceTag, ContentType, FirmType};
    use crate::storage::metadata::get_channel_metadata;
    use crate::storage::Store;
    use std::io::Write;

    const SEED: &str = r#"channel_id,title,firm_type,target_audience,content_type,has_legacy_media
UC1,One,wealth management,institutional,long-form,True
UC2,,etf management,"[""institutional"",""general""]",both,false
,Orphan,podcast,general,both,false
UC3,Three,crypto,general,both,false
UC4,Four,podcast,[not json,short-form,0
"#;

    #[test]
    fn coerces_bare_string_and_json_array_audiences() {
        assert_eq!(coerce_target_audience(Some("institutional")), vec!["institutional"]);
        assert_eq!(
            coerce_target_audience(Some(r#"["institutional","general"]"#)),
            vec!["institutional", "general"]
        );
        assert!(coerce_target_audience(Some("[broken")).is_empty());
        assert!(coerce_target_audience(Some("None")).is_empty());
        assert!(coerce_target_audience(None).is_empty());
    }

    #[test]
    fn parses_flags() {
        assert_eq!(parse_flag(Some("True")), Some(true));
        assert_eq!(parse_flag(Some("0")), Some(false));
        assert_eq!(parse_flag(None), Some(false));
        assert_eq!(parse_flag(Some("maybe")), None);
    }

    #[test]
    fn parses_rows_and_reports_rejections() {
        let parsed = parse_seed(SEED.as_bytes()).unwrap();

        assert_eq!(parsed.report.dropped, 1);
        assert_eq!(parsed.report.rejected.len(), 1);
        assert_eq!(parsed.report.rejected[0].line, 5);
        assert_eq!(parsed.report.rejected[0].channel_id.as_deref(), Some("UC3"));

        let ids: Vec<_> = parsed.rows.iter().map(|r| r.channel_id.as_str()).collect();
        assert_eq!(ids, vec!["UC1", "UC2", "UC4"]);

        let uc1 = &parsed.rows[0];
        assert_eq!(uc1.firm_type, Some(FirmType::WealthManagement));
        assert_eq!(uc1.target_audience.len(), 1);
        assert!(uc1.target_audience.contains(AudienceTag::Institutional));
        assert!(uc1.has_legacy_media);

        let uc2 = &parsed.rows[1];
        assert_eq!(uc2.title, None);
        assert_eq!(uc2.target_audience.len(), 2);
        assert!(uc2.target_audience.contains(AudienceTag::General));
        assert_eq!(uc2.content_type, Some(ContentType::Both));

        let uc4 = &parsed.rows[2];
        assert!(uc4.target_audience.is_empty());
    }

    #[test]
    fn rejection_lines_account_for_multiline_fields() {
        let csv = "channel_id,title,firm_type,target_audience,content_type,has_legacy_media\n\
                   UC1,\"Two\nline title\",podcast,general,both,false\n\
                   UC2,Two,crypto,general,both,false\n";
        let parsed = parse_seed(csv.as_bytes()).unwrap();

        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].title.as_deref(), Some("Two\nline title"));
        assert_eq!(parsed.report.rejected.len(), 1);
        assert_eq!(parsed.report.rejected[0].channel_id.as_deref(), Some("UC2"));
        assert_eq!(parsed.report.rejected[0].line, 4);
    }

    #[test]
    fn title_column_is_optional() {
        let csv = "channel_id,firm_type,target_audience,content_type,has_legacy_media\nUC1,podcast,general,both,false\n";
        let parsed = parse_seed(csv.as_bytes()).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].title, None);
    }

    #[tokio::test]
    async fn seed_values_win_over_existing_rows() {
        let store = Store::open_in_memory().await.unwrap();
        let now = Utc::now();
        crate::storage::metadata::insert_metadata_stub(
            store.pool(),
            &ChannelMetadata::stub("UC1", "Fetched", None),
            now,
        )
        .await
        .unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SEED.as_bytes()).unwrap();

        let report = load_metadata_seed(store.pool(), file.path(), now).await.unwrap();
        assert_eq!(report.loaded, vec!["UC1", "UC2", "UC4"]);

        let uc1 = &get_channel_metadata(store.pool(), Some("UC1")).await.unwrap()[0];
        assert_eq!(uc1.firm_type, Some(FirmType::WealthManagement));
        assert!(get_channel_metadata(store.pool(), Some("UC3")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_seed_file_loads_nothing() {
        let store = Store::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let report = load_metadata_seed(store.pool(), &dir.path().join("absent.csv"), Utc::now())
            .await
            .unwrap();
        assert_eq!(report, SeedReport::default());
    }
}
