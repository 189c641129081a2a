//! Line-oriented input: `<key> <payload>` per line.

use std::path::Path;

use contracts::{BatchKey, Item};
use tokio::io::{AsyncBufRead, BufReader};

use crate::error::{CliError, Result};

pub type InputReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Open `path`, or stdin when `None`
pub async fn open(path: Option<&Path>) -> Result<InputReader> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}

/// Parse one input line.
///
/// Blank lines and `#` comments yield `None`. The key is the first
/// whitespace-separated word; the rest of the line, leading whitespace
/// stripped, is the payload.
pub fn parse_line(line_no: u64, line: &str) -> Result<Option<(BatchKey, Item)>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (key, payload) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| CliError::malformed_line(line_no, "expected `<key> <payload>`"))?;
    let payload = payload.trim_start();

    Ok(Some((BatchKey::from(key), Item::from(payload.to_string()))))
}
