use serde::{Deserialize, Serialize};

/// Content of a single preview tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TabContent {
  /// Free-form text, shown as-is
  Text(String),
  /// Key/value rows in declaration order
  Structured(Vec<(String, String)>),
}

/// A named tab of a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
  pub name: String,
  pub content: TabContent,
}

/// Validated preview metadata for one URL.
///
/// A record with `enabled == false` is a negative result: the page did not
/// opt in to previews. It carries no fields and is never rendered, but it is
/// cached like any other record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
  pub enabled: bool,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
  /// Tabs in the order the page declared them
  #[serde(default)]
  pub tabs: Vec<Tab>,
}

impl MetadataRecord {
  /// The negative result for pages without an explicit opt-in.
  pub fn disabled() -> Self {
    Self::default()
  }

  pub fn tab(&self, name: &str) -> Option<&TabContent> {
    self
      .tabs
      .iter()
      .find(|tab| tab.name == name)
      .map(|tab| &tab.content)
  }

  pub fn tab_names(&self) -> impl Iterator<Item = &str> {
    self.tabs.iter().map(|tab| tab.name.as_str())
  }
}
