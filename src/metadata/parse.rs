//! Extraction of `itabs:*` attributes from an HTML document.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

use super::normalize::RawPairs;
use crate::error::ParseError;

/// Turns a fetched document into raw attribute pairs.
pub trait DocumentParser: Send + Sync {
  fn parse(&self, document: &str) -> Result<RawPairs, ParseError>;
}

/// Reads `<meta name="itabs:…" content="…">` tags (or `property=` instead of
/// `name=`) in document order.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaTagParser;

const NAMESPACE: &str = "itabs:";

// Quoted attribute values may contain '>' (structured tab literals do)
static META_TAG: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"(?is)<meta\b((?:[^>"']|"[^"]*"|'[^']*')*)>"#).expect("valid regex"));

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>/]+))"#)
    .expect("valid regex")
});

static ENTITY: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z]+);").expect("valid regex"));

impl DocumentParser for MetaTagParser {
  fn parse(&self, document: &str) -> Result<RawPairs, ParseError> {
    if !document.contains('<') {
      return Err(ParseError::NoMarkup);
    }

    let pairs = META_TAG
      .captures_iter(document)
      .filter_map(|tag| {
        let attributes = attributes(&tag[1]);
        let name = attributes
          .get("name")
          .or_else(|| attributes.get("property"))?;
        if !name.starts_with(NAMESPACE) {
          return None;
        }
        let content = attributes.get("content")?;
        Some((name.clone(), decode_entities(content)))
      })
      .collect();

    Ok(pairs)
  }
}

fn attributes(source: &str) -> HashMap<String, String> {
  ATTRIBUTE
    .captures_iter(source)
    .map(|attr| {
      let value = attr
        .get(2)
        .or_else(|| attr.get(3))
        .or_else(|| attr.get(4))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
      (attr[1].to_ascii_lowercase(), value)
    })
    .collect()
}

fn decode_entities(raw: &str) -> String {
  ENTITY
    .replace_all(raw, |caps: &Captures| {
      let entity = &caps[1];
      let decoded = match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => entity.strip_prefix('#').and_then(|code| {
          let number = match code.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse().ok(),
          };
          number.and_then(char::from_u32)
        }),
      };
      decoded.map_or_else(|| caps[0].to_string(), String::from)
    })
    .into_owned()
}
