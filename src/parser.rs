//! Parses free-form AI text into structured command records.
//!
//! Commands look like `[Category:Type, key:value, data:{...}]` and may be
//! wrapped in a `<command>...</command>` block. Bracket and brace depth are
//! counted explicitly so nested brackets inside JSON payloads never terminate
//! a command early. Malformed commands are dropped with a diagnostic; they
//! never abort the batch.

use serde_json::{Map, Value};
use tracing::{debug, warn};

/// A command as extracted from text, before typed decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCommand {
    pub category: String,
    pub kind: String,
    pub data: Map<String, Value>,
}

/// Extract every well-formed command from a block of AI text, in textual
/// order.
pub fn parse_commands(text: &str) -> Vec<RawCommand> {
    let content = command_block(text).unwrap_or(text).trim();
    if content.is_empty() {
        return Vec::new();
    }

    let bytes = content.as_bytes();
    let mut commands = Vec::new();
    let mut search = 0;

    while search < bytes.len() {
        let start = match bytes[search..].iter().position(|&b| b == b'[') {
            Some(offset) => search + offset,
            None => break,
        };

        let mut depth = 1usize;
        let mut end = None;
        for (i, &b) in bytes.iter().enumerate().skip(start + 1) {
            match b {
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(end) => {
                if let Some(command) = parse_single_command(&content[start + 1..end]) {
                    commands.push(command);
                }
                search = end + 1;
            }
            None => {
                warn!(
                    remainder = &content[start..],
                    "unmatched '[' in command text, skipping"
                );
                search = start + 1;
            }
        }
    }

    commands
}

/// Restrict parsing to the first `<command>...</command>` block when present.
fn command_block(text: &str) -> Option<&str> {
    let open = text.find("<command>")?;
    let rest = &text[open + "<command>".len()..];
    let close = rest.find("</command>")?;
    Some(&rest[..close])
}

/// Parse the contents of a single bracketed span.
///
/// The `data:{...}` JSON block is isolated first (brace counting), then the
/// remainder is split into the `category:type` header and simple key:value
/// pairs. JSON fields win on key collision.
fn parse_single_command(span: &str) -> Option<RawCommand> {
    let mut working = span.trim().to_string();
    let mut json_data = Map::new();

    if let Some(marker) = working.find("data:{") {
        let json_start = marker + "data:".len();
        let mut depth = 0usize;
        let mut json_end = None;
        for (i, b) in working.as_bytes().iter().enumerate().skip(json_start) {
            match b {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        json_end = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }

        match json_end {
            Some(json_end) => {
                let json_str = &working[json_start..=json_end];
                match serde_json::from_str::<Value>(json_str) {
                    Ok(Value::Object(map)) => {
                        json_data = map;
                        // Also consume the comma that preceded the block.
                        let mut cut = marker;
                        if working[..cut].trim_end().ends_with(',') {
                            cut = working[..cut].rfind(',').unwrap_or(cut);
                        }
                        working.truncate(cut);
                    }
                    Ok(other) => {
                        warn!(payload = %other, "command data payload is not a JSON object");
                        return None;
                    }
                    Err(e) => {
                        warn!(error = %e, payload = json_str, "invalid JSON in command data");
                        return None;
                    }
                }
            }
            None => {
                warn!(span, "no matching '}}' for command data block");
            }
        }
    }

    let mut parts = working
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let header = match parts.next() {
        Some(h) => h,
        None => {
            warn!(span, "command has no category/type header");
            return None;
        }
    };
    let (category, kind) = match header.split_once(':') {
        Some((category, kind)) if !category.trim().is_empty() && !kind.trim().is_empty() => {
            (category.trim().to_string(), kind.trim().to_string())
        }
        _ => {
            warn!(header, "invalid command header");
            return None;
        }
    };

    let mut data = Map::new();
    for part in parts {
        if let Some((key, value)) = part.split_once(':') {
            let key = key.trim();
            if !key.is_empty() {
                data.insert(key.to_string(), Value::String(value.trim().to_string()));
            }
        }
    }

    // JSON-block fields overwrite same-named simple pairs.
    for (key, value) in json_data {
        data.insert(key, value);
    }

    debug!(%category, %kind, "parsed command");
    Some(RawCommand {
        category,
        kind,
        data,
    })
}
