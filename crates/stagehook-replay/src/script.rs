//! Recorded event scripts, one JSON object per line

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// One line of a script
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScriptLine {
    /// An event as the server would push it
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
    /// Advance the render loop
    Frames {
        frames: u32,
        #[serde(default = "default_dt")]
        dt: f32,
    },
}

fn default_dt() -> f32 {
    1.0 / 60.0
}

/// Parse a script, skipping blank lines and `#` comments.
///
/// Returns each line with its 1-based line number.
pub fn parse_script(content: &str) -> Result<Vec<(usize, ScriptLine)>> {
    let mut lines = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line: ScriptLine = serde_json::from_str(trimmed)
            .with_context(|| format!("line {}: not a script entry", index + 1))?;
        lines.push((index + 1, line));
    }
    Ok(lines)
}
