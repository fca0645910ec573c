//! Link preview metadata: the validated record, the attribute normalizer and
//! the default document parser.

mod normalize;
mod parse;
mod types;

pub use normalize::{normalize, parse_tab_content, RawPairs};
pub use parse::{DocumentParser, MetaTagParser};
pub use types::{MetadataRecord, Tab, TabContent};
