//! Formats the downstream IIIF service reads without conversion.

use std::collections::HashSet;

/// Action of the precomputed conversion looked up for non-native masters.
pub const CONVERT_ACTION: &str = "convert";

/// Parameter string of that conversion.
pub const CONVERT_PARAMS: &str = "formatpng";

/// Predicate table of IIIF-native mime types.
///
/// Matching ignores case and any `;` parameters on the mime type.
#[derive(Debug, Clone)]
pub struct IiifFormats {
    native: HashSet<String>,
}

impl Default for IiifFormats {
    fn default() -> Self {
        Self::new(["image/png", "image/tiff"])
    }
}

impl IiifFormats {
    pub fn new<I, T>(formats: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self {
            native: formats.into_iter().map(|f| normalize(f.as_ref())).collect(),
        }
    }

    /// Add another native format.
    pub fn with_format(mut self, mime_type: &str) -> Self {
        self.native.insert(normalize(mime_type));
        self
    }

    pub fn is_native(&self, mime_type: &str) -> bool {
        self.native.contains(&normalize(mime_type))
    }
}

fn normalize(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}
