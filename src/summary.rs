use crate::model::canonical_url;
use crate::validate::{validate, Violation};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Validated summary artifact for one item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredSummary {
    #[serde(deserialize_with = "text")]
    pub title: String,
    #[serde(deserialize_with = "text")]
    pub podcaster: String,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub guest: Option<String>,
    pub summary: SummaryBody,
    #[serde(default, deserialize_with = "text_list", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    /// Extra fields the generator emitted; kept so the artifact loses nothing.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryBody {
    #[serde(deserialize_with = "text")]
    pub essence: String,
    #[serde(deserialize_with = "text_list")]
    pub top_takeaways: Vec<String>,
    #[serde(deserialize_with = "text_list")]
    pub game_changing_ideas: Vec<String>,
    #[serde(deserialize_with = "text_list")]
    pub things_you_can_do: Vec<String>,
    #[serde(deserialize_with = "text")]
    pub why_this_matters: String,
}

impl StructuredSummary {
    /// Validate `record` and convert it. Any violation rejects the record.
    pub fn from_value(record: Value) -> Result<Self, Vec<Violation>> {
        let violations = validate(&record);
        if !violations.is_empty() {
            return Err(violations);
        }
        serde_json::from_value(record).map_err(|err| vec![Violation::Malformed(err.to_string())])
    }

    /// Fill tags and source link when the generator left them out. The item
    /// id always wins over whatever id the generator echoed back.
    pub fn attach(&mut self, item_id: &str, tags: &[String]) {
        if self.tags.is_empty() {
            self.tags = tags.to_vec();
        }
        if self.video_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
            self.video_url = Some(canonical_url(item_id));
        }
        self.video_id = Some(item_id.to_string());
    }

    /// Link to the source, derived from the id when no URL was stored.
    pub fn link(&self) -> Option<String> {
        self.video_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| self.video_id.as_deref().map(canonical_url))
    }
}

fn scalar_to_string(v: Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.into_iter().filter_map(scalar_to_string).collect();
            Some(parts.join(" "))
        }
        other @ Value::Object(_) => Some(other.to_string()),
    }
}

fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(scalar_to_string(v).unwrap_or_default())
}

fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(v.and_then(scalar_to_string).filter(|s| !s.trim().is_empty()))
}

fn text_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(items.into_iter().filter_map(scalar_to_string).collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(serde::de::Error::custom(format!("expected a list, got {}", other))),
    }
}
