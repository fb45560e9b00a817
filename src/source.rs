//! Reader for the exported post list.
//!
//! The export is one JSON object keyed by source key (usually the post URL),
//! each value looking like:
//!
//! ```json
//! { "media_details": [{ "url": "https://cdn/.../clip.mp4" }],
//!   "post_info": { "caption": "Hi #fun" } }
//! ```
//!
//! Key order in the file is the processing order. Entries that do not have a
//! media URL are kept, paired with their [`ParseError`], so the batch can log
//! them at the right point and move on.

use std::fs;
use std::io;
use std::path::Path;

use serde_json::Value;

use crate::error::{ConfigError, ParseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub media_url: String,
    pub caption: String,
}

impl SourceItem {
    pub fn from_value(value: &Value) -> Result<Self, ParseError> {
        let object = value.as_object().ok_or(ParseError::NotAnObject)?;

        let media_url = object
            .get("media_details")
            .and_then(Value::as_array)
            .and_then(|details| details.first())
            .and_then(|first| first.get("url"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(ParseError::MissingMediaUrl)?
            .to_string();

        let caption = match object.get("post_info").and_then(|info| info.get("caption")) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(caption)) => caption.clone(),
            Some(_) => return Err(ParseError::InvalidCaption),
        };

        Ok(Self { media_url, caption })
    }
}

/// One member of the source object, parsed or not.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub key: String,
    pub item: Result<SourceItem, ParseError>,
}

pub fn load_source_list(path: &Path) -> Result<Vec<SourceEntry>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            ConfigError::MissingFile {
                what: "source list",
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::InvalidSourceList {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        }
    })?;

    parse_source_list(&content).map_err(|reason| ConfigError::InvalidSourceList {
        path: path.to_path_buf(),
        reason,
    })
}

pub fn parse_source_list(content: &str) -> Result<Vec<SourceEntry>, String> {
    let value: Value = serde_json::from_str(content).map_err(|err| err.to_string())?;
    let Value::Object(members) = value else {
        return Err("top-level value is not an object".to_string());
    };

    Ok(members
        .into_iter()
        .map(|(key, value)| {
            let item = SourceItem::from_value(&value);
            SourceEntry { key, item }
        })
        .collect())
}
