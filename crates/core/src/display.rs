//! Display helpers for text shown to the caller.

/// Tags whose content is model scaffolding, never user-facing text.
const HIDDEN_BLOCKS: &[(&str, &str)] = &[
    ("<think>", "</think>"),
    ("<thinking>", "</thinking>"),
    ("<tool_call>", "</tool_call>"),
];

/// Clean streamed assistant text for display.
///
/// Removes hidden blocks (an unterminated block hides everything after its
/// opening tag, which is what a half-streamed block looks like), collapses
/// runs of blank lines and trims. May return an empty string.
pub fn sanitize_for_display(text: &str) -> String {
    let mut visible = text.to_string();
    for (open, close) in HIDDEN_BLOCKS {
        visible = strip_blocks(&visible, open, close);
    }

    let mut out = String::with_capacity(visible.len());
    let mut blank_run = 0;
    for line in visible.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

fn strip_blocks(text: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + open.len()..];
        match after_open.find(close) {
            Some(end) => rest = &after_open[end + close.len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Coerce a tool result payload into a display string.
///
/// A string is used as-is; an object with a `result` field uses that field;
/// an MCP-style `{content: [{type: "text", text}]}` result joins its text
/// blocks; anything else is JSON-encoded.
pub fn display_tool_output(result: &serde_json::Value) -> String {
    use serde_json::Value;

    match result {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Object(map) => {
            if let Some(inner) = map.get("result") {
                return match inner {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
            }
            if let Some(Value::Array(blocks)) = map.get("content") {
                let texts: Vec<&str> = blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect();
                if !texts.is_empty() {
                    return texts.join("\n");
                }
            }
            result.to_string()
        }
        other => other.to_string(),
    }
}
