//! Identifier input files.

use anyhow::Context;
use leadgen_core::Identifier;
use std::path::Path;

/// Parse identifiers, one per line.
///
/// Blank lines and lines starting with `#` are ignored. Any other line that
/// is not a valid identifier is an error naming its line number.
pub fn parse_identifiers(text: &str) -> anyhow::Result<Vec<Identifier>> {
    let mut identifiers = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let identifier = Identifier::new(line)
            .with_context(|| format!("line {}: invalid identifier {line:?}", index + 1))?;
        identifiers.push(identifier);
    }

    Ok(identifiers)
}

/// Read and parse an identifier file.
pub async fn read_identifiers(path: &Path) -> anyhow::Result<Vec<Identifier>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_identifiers(&text).with_context(|| format!("in {}", path.display()))
}
