//! Turns raw `itabs:*` attribute pairs into a validated [`MetadataRecord`].

use serde_json::Value;

use super::types::{MetadataRecord, Tab, TabContent};

/// Attribute name/value pairs in document order.
pub type RawPairs = Vec<(String, String)>;

const ENABLED_FIELD: &str = "itabs:enabled";
const TITLE_FIELD: &str = "itabs:title";
const DESCRIPTION_FIELD: &str = "itabs:description";
const IMAGE_FIELD: &str = "itabs:image";
const TAB_PREFIX: &str = "itabs:tab:";

/// Build a record from raw attribute pairs.
///
/// Scalars take their last occurrence. Tabs keep the position of their first
/// occurrence and the value of their last. Without `itabs:enabled` set to
/// exactly `"true"` the result is [`MetadataRecord::disabled`] and nothing
/// else is looked at.
pub fn normalize(pairs: &[(String, String)]) -> MetadataRecord {
  let enabled = pairs
    .iter()
    .rev()
    .find(|(key, _)| key == ENABLED_FIELD)
    .is_some_and(|(_, value)| value == "true");

  if !enabled {
    return MetadataRecord::disabled();
  }

  let mut record = MetadataRecord {
    enabled: true,
    ..MetadataRecord::default()
  };
  let mut tabs: Vec<(String, String)> = Vec::new();

  for (key, value) in pairs {
    match key.as_str() {
      TITLE_FIELD => record.title = value.clone(),
      DESCRIPTION_FIELD => record.description = value.clone(),
      IMAGE_FIELD => {
        record.image = Some(value.trim().to_string()).filter(|image| !image.is_empty());
      }
      _ => {
        let Some(name) = key.strip_prefix(TAB_PREFIX) else {
          continue;
        };
        if name.is_empty() {
          continue;
        }
        match tabs.iter_mut().find(|(existing, _)| existing == name) {
          Some(slot) => slot.1 = value.clone(),
          None => tabs.push((name.to_string(), value.clone())),
        }
      }
    }
  }

  record.tabs = tabs
    .into_iter()
    .map(|(name, raw)| Tab {
      content: parse_tab_content(&raw),
      name,
    })
    .collect();

  record
}

/// Interpret a tab value as key/value rows, falling back to plain text.
pub fn parse_tab_content(raw: &str) -> TabContent {
  match structured_rows(raw) {
    Some(rows) => TabContent::Structured(rows),
    None => TabContent::Text(raw.to_string()),
  }
}

fn structured_rows(raw: &str) -> Option<Vec<(String, String)>> {
  let trimmed = raw.trim();
  if !trimmed.starts_with('{') {
    return None;
  }

  // Authors often write the literal with single quotes inside a double-quoted attribute
  let value: Value = serde_json::from_str(trimmed)
    .or_else(|_| serde_json::from_str(&trimmed.replace('\'', "\"")))
    .ok()?;

  value
    .as_object()?
    .iter()
    .map(|(key, value)| scalar_text(value).map(|text| (key.clone(), text)))
    .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}
