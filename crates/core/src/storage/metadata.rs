use crate::domain::metadata::{ChannelMetadata, ContentType, FirmType, MetadataFields, TargetAudience};
use crate::storage::StoreContext;
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Validates `fields` and inserts or fully replaces the metadata row for `channel_id`.
///
/// Out-of-domain values fail with a [`crate::error::ChanbenchError::Validation`] root cause and
/// nothing is written.
pub async fn upsert_channel_metadata(
    pool: &SqlitePool,
    channel_id: &str,
    fields: MetadataFields,
    now: DateTime<Utc>,
) -> anyhow::Result<ChannelMetadata> {
    let metadata = fields.validate_and_into_metadata(channel_id)?;
    upsert_metadata(pool, &metadata, now).await
}

/// Inserts or fully replaces an already validated metadata row.
pub async fn upsert_metadata(
    pool: &SqlitePool,
    metadata: &ChannelMetadata,
    now: DateTime<Utc>,
) -> anyhow::Result<ChannelMetadata> {
    let target_audience = serde_json::to_string(&metadata.target_audience)
        .context("serialize target_audience failed")?;

    sqlx::query(
        "INSERT INTO channel_metadata \
           (channel_id, title, description, firm_type, target_audience, content_type, has_legacy_media, last_updated) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (channel_id) DO UPDATE SET \
           title = excluded.title, \
           description = excluded.description, \
           firm_type = excluded.firm_type, \
           target_audience = excluded.target_audience, \
           content_type = excluded.content_type, \
           has_legacy_media = excluded.has_legacy_media, \
           last_updated = excluded.last_updated",
    )
    .bind(&metadata.channel_id)
    .bind(&metadata.title)
    .bind(&metadata.description)
    .bind(metadata.firm_type.map(|v| v.as_str()))
    .bind(target_audience)
    .bind(metadata.content_type.map(|v| v.as_str()))
    .bind(metadata.has_legacy_media)
    .bind(now)
    .execute(pool)
    .await
    .with_store_context(|| format!("upsert channel_metadata failed for {}", metadata.channel_id))?;

    Ok(ChannelMetadata {
        last_updated: Some(now),
        ..metadata.clone()
    })
}

/// Writes the placeholder row for a newly fetched channel. An existing row always wins.
///
/// Returns whether a row was inserted.
pub async fn insert_metadata_stub(
    pool: &SqlitePool,
    stub: &ChannelMetadata,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let res = sqlx::query(
        "INSERT INTO channel_metadata \
           (channel_id, title, description, firm_type, target_audience, content_type, has_legacy_media, last_updated) \
         VALUES (?, ?, ?, NULL, '[]', NULL, 0, ?) \
         ON CONFLICT (channel_id) DO NOTHING",
    )
    .bind(&stub.channel_id)
    .bind(&stub.title)
    .bind(&stub.description)
    .bind(now)
    .execute(pool)
    .await
    .with_store_context(|| format!("insert channel_metadata stub failed for {}", stub.channel_id))?;

    Ok(res.rows_affected() > 0)
}

/// One channel's metadata, or every row (ordered by channel id) when `channel_id` is `None`.
pub async fn get_channel_metadata(
    pool: &SqlitePool,
    channel_id: Option<&str>,
) -> anyhow::Result<Vec<ChannelMetadata>> {
    let rows = match channel_id {
        Some(id) => {
            sqlx::query_as::<_, MetadataRow>(
                "SELECT channel_id, title, description, firm_type, target_audience, content_type, \
                        has_legacy_media, last_updated \
                 FROM channel_metadata \
                 WHERE channel_id = ?",
            )
            .bind(id.trim())
            .fetch_all(pool)
            .await
            .store_context("select channel_metadata failed")?
        }
        None => {
            sqlx::query_as::<_, MetadataRow>(
                "SELECT channel_id, title, description, firm_type, target_audience, content_type, \
                        has_legacy_media, last_updated \
                 FROM channel_metadata \
                 ORDER BY channel_id ASC",
            )
            .fetch_all(pool)
            .await
            .store_context("select channel_metadata failed")?
        }
    };

    rows.into_iter().map(MetadataRow::into_metadata).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct MetadataRow {
    channel_id: String,
    title: Option<String>,
    description: Option<String>,
    firm_type: Option<String>,
    target_audience: String,
    content_type: Option<String>,
    has_legacy_media: bool,
    last_updated: DateTime<Utc>,
}

impl MetadataRow {
    fn into_metadata(self) -> anyhow::Result<ChannelMetadata> {
        decode_metadata(
            self.channel_id,
            self.title,
            self.description,
            self.firm_type.as_deref(),
            &self.target_audience,
            self.content_type.as_deref(),
            self.has_legacy_media,
            Some(self.last_updated),
        )
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn decode_metadata(
    channel_id: String,
    title: Option<String>,
    description: Option<String>,
    firm_type: Option<&str>,
    target_audience: &str,
    content_type: Option<&str>,
    has_legacy_media: bool,
    last_updated: Option<DateTime<Utc>>,
) -> anyhow::Result<ChannelMetadata> {
    let firm_type = firm_type.map(|s| s.parse::<FirmType>()).transpose()?;
    let content_type = content_type.map(|s| s.parse::<ContentType>()).transpose()?;
    let target_audience = serde_json::from_str::<TargetAudience>(target_audience)
        .with_context(|| format!("invalid target_audience in DB for channel_id={channel_id}"))?;

    Ok(ChannelMetadata {
        channel_id,
        title,
        description,
        firm_type,
        target_audience,
        content_type,
        has_legacy_media,
        last_updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metadata::AudienceTag;
    use crate::error::ChanbenchError;
    use crate::storage::Store;
    use chrono::TimeZone;

    fn fields(firm_type: &str, audience: &[&str]) -> MetadataFields {
        MetadataFields {
            title: Some("Channel One".to_string()),
            description: None,
            firm_type: Some(firm_type.to_string()),
            target_audience: audience.iter().map(|s| s.to_string()).collect(),
            content_type: Some("long-form".to_string()),
            has_legacy_media: false,
        }
    }

    #[tokio::test]
    async fn upsert_twice_keeps_one_row_with_latest_values() {
        let store = Store::open_in_memory().await.unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        upsert_channel_metadata(store.pool(), "UC1", fields("podcast", &["general"]), t1)
            .await
            .unwrap();
        let mut second = fields("wealth management", &["institutional", "accredited"]);
        second.has_legacy_media = true;
        upsert_channel_metadata(store.pool(), "UC1", second, t2)
            .await
            .unwrap();

        let rows = get_channel_metadata(store.pool(), None).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.firm_type, Some(FirmType::WealthManagement));
        assert!(row.target_audience.contains(AudienceTag::Institutional));
        assert!(!row.target_audience.contains(AudienceTag::General));
        assert!(row.has_legacy_media);
        assert_eq!(row.last_updated, Some(t2));
    }

    #[tokio::test]
    async fn invalid_enum_value_is_rejected_and_not_persisted() {
        let store = Store::open_in_memory().await.unwrap();
        let now = Utc::now();

        let err = upsert_channel_metadata(store.pool(), "UC1", fields("crypto", &[]), now)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChanbenchError>(),
            Some(ChanbenchError::Validation { field: "firm_type", .. })
        ));
        assert!(get_channel_metadata(store.pool(), Some("UC1"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn stub_never_overwrites_existing_row() {
        let store = Store::open_in_memory().await.unwrap();
        let now = Utc::now();

        upsert_channel_metadata(store.pool(), "UC1", fields("podcast", &["general"]), now)
            .await
            .unwrap();
        let inserted = insert_metadata_stub(
            store.pool(),
            &ChannelMetadata::stub("UC1", "Fetched Title", Some("desc")),
            now,
        )
        .await
        .unwrap();
        assert!(!inserted);

        let row = &get_channel_metadata(store.pool(), Some("UC1")).await.unwrap()[0];
        assert_eq!(row.firm_type, Some(FirmType::Podcast));
        assert_eq!(row.title.as_deref(), Some("Channel One"));

        let inserted = insert_metadata_stub(
            store.pool(),
            &ChannelMetadata::stub("UC2", "Second", None),
            now,
        )
        .await
        .unwrap();
        assert!(inserted);
        let row = &get_channel_metadata(store.pool(), Some("UC2")).await.unwrap()[0];
        assert_eq!(row.firm_type, None);
        assert!(row.target_audience.is_empty());
        assert_eq!(row.title.as_deref(), Some("Second"));
    }

    #[tokio::test]
    async fn check_constraint_guards_raw_writes() {
        let store = Store::open_in_memory().await.unwrap();
        let res = sqlx::query(
            "INSERT INTO channel_metadata (channel_id, firm_type, last_updated) VALUES ('UC9', 'bank', '2024-01-01T00:00:00Z')",
        )
        .execute(store.pool())
        .await;
        assert!(res.is_err());
    }
}
