use std::path::Path;

use crate::KeyValue;

/// Emits `(word, "1")` for every whitespace-separated word.
pub fn map(_filename: &Path, contents: &str) -> Vec<KeyValue> {
    contents
        .split_whitespace()
        .map(|w| KeyValue::new(w, "1"))
        .collect()
}

pub fn reduce(_key: &str, values: &[String]) -> String {
    values.len().to_string()
}
