use crate::error::ChanbenchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FirmType {
    #[serde(rename = "wealth management")]
    WealthManagement,
    #[serde(rename = "etf management")]
    EtfManagement,
    #[serde(rename = "data & analytics")]
    DataAnalytics,
    #[serde(rename = "investor research")]
    InvestorResearch,
    #[serde(rename = "podcast")]
    Podcast,
}

impl FirmType {
    pub const ALL: [FirmType; 5] = [
        FirmType::WealthManagement,
        FirmType::EtfManagement,
        FirmType::DataAnalytics,
        FirmType::InvestorResearch,
        FirmType::Podcast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FirmType::WealthManagement => "wealth management",
            FirmType::EtfManagement => "etf management",
            FirmType::DataAnalytics => "data & analytics",
            FirmType::InvestorResearch => "investor research",
            FirmType::Podcast => "podcast",
        }
    }
}

impl FromStr for FirmType {
    type Err = ChanbenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == needle)
            .ok_or_else(|| ChanbenchError::validation("firm_type", s))
    }
}

impl fmt::Display for FirmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    LongForm,
    ShortForm,
    Both,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [ContentType::LongForm, ContentType::ShortForm, ContentType::Both];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::LongForm => "long-form",
            ContentType::ShortForm => "short-form",
            ContentType::Both => "both",
        }
    }
}

impl FromStr for ContentType {
    type Err = ChanbenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == needle)
            .ok_or_else(|| ChanbenchError::validation("content_type", s))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudienceTag {
    Institutional,
    Accredited,
    General,
}

impl AudienceTag {
    pub const ALL: [AudienceTag; 3] = [
        AudienceTag::Institutional,
        AudienceTag::Accredited,
        AudienceTag::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AudienceTag::Institutional => "institutional",
            AudienceTag::Accredited => "accredited",
            AudienceTag::General => "general",
        }
    }
}

impl FromStr for AudienceTag {
    type Err = ChanbenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == needle)
            .ok_or_else(|| ChanbenchError::validation("target_audience", s))
    }
}

/// Order-irrelevant set of audience tags. Serialized as a sorted JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetAudience(BTreeSet<AudienceTag>);

impl TargetAudience {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn try_from_tags<I, S>(tags: I) -> Result<Self, ChanbenchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = BTreeSet::new();
        for tag in tags {
            let tag = tag.as_ref();
            if tag.trim().is_empty() {
                continue;
            }
            out.insert(tag.parse::<AudienceTag>()?);
        }
        Ok(Self(out))
    }

    pub fn contains(&self, tag: AudienceTag) -> bool {
        self.0.contains(&tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = AudienceTag> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<AudienceTag> for TargetAudience {
    fn from_iter<T: IntoIterator<Item = AudienceTag>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Curated attributes for one channel. At most one row per `channel_id` is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub channel_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub firm_type: Option<FirmType>,
    pub target_audience: TargetAudience,
    pub content_type: Option<ContentType>,
    pub has_legacy_media: bool,
    /// Set by the store on every upsert.
    pub last_updated: Option<DateTime<Utc>>,
}

impl ChannelMetadata {
    /// Placeholder written the first time a channel's statistics are fetched.
    pub fn stub(channel_id: &str, title: &str, description: Option<&str>) -> Self {
        Self {
            channel_id: channel_id.trim().to_string(),
            title: non_blank(Some(title)),
            description: non_blank(description),
            firm_type: None,
            target_audience: TargetAudience::empty(),
            content_type: None,
            has_legacy_media: false,
            last_updated: None,
        }
    }
}

/// Loosely typed metadata input, as entered by a person or read from a seed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFields {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub firm_type: Option<String>,
    #[serde(default)]
    pub target_audience: Vec<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub has_legacy_media: bool,
}

impl MetadataFields {
    pub fn validate_and_into_metadata(
        self,
        channel_id: &str,
    ) -> Result<ChannelMetadata, ChanbenchError> {
        let channel_id = channel_id.trim();
        if channel_id.is_empty() {
            return Err(ChanbenchError::validation("channel_id", channel_id));
        }

        let firm_type = non_blank(self.firm_type.as_deref())
            .map(|s| s.parse::<FirmType>())
            .transpose()?;
        let content_type = non_blank(self.content_type.as_deref())
            .map(|s| s.parse::<ContentType>())
            .transpose()?;
        let target_audience = TargetAudience::try_from_tags(&self.target_audience)?;

        Ok(ChannelMetadata {
            channel_id: channel_id.to_string(),
            title: non_blank(self.title.as_deref()),
            description: non_blank(self.description.as_deref()),
            firm_type,
            target_audience,
            content_type,
            has_legacy_media: self.has_legacy_media,
            last_updated: None,
        })
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
