use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Token counters as written by the API. Every field may be absent.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

/// Nested `message` object used by the CLI transcript layout.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct MessageBody {
    #[serde(default, deserialize_with = "lenient")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<RawUsage>,
}

/// One parsed log line.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct RawLogRecord {
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(
        default,
        rename = "sessionId",
        alias = "session_id",
        deserialize_with = "lenient"
    )]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<RawUsage>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<MessageBody>,
}

impl RawLogRecord {
    /// Model identifier, top-level first, then the nested message.
    pub fn model(&self) -> Option<&str> {
        self.model
            .as_deref()
            .or_else(|| self.message.as_ref().and_then(|m| m.model.as_deref()))
    }

    /// Usage block, top-level first, then the nested message.
    pub fn usage(&self) -> Option<&RawUsage> {
        self.usage
            .as_ref()
            .or_else(|| self.message.as_ref().and_then(|m| m.usage.as_ref()))
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|s| !s.is_empty())
    }
}

// A field of the wrong shape (e.g. `message` as a plain string) becomes None
// so the rest of the record survives
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|v| serde_json::from_value(v).ok()))
}

// Unparseable timestamps become None instead of rejecting the whole line
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}
