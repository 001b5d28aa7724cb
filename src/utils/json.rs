/// Strip a surrounding markdown code fence, if any. Models asked for strict
/// JSON frequently wrap it in ```json fences anyway.
///
/// Line-oriented: an opening fence is a leading ``` followed by nothing but
/// a language tag on its own line, a closing fence is a trailing ``` after
/// the payload. Either may appear without the other.
pub fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();

    if let Some(after_ticks) = body.strip_prefix("```") {
        let (tag, payload) = match after_ticks.split_once('\n') {
            Some((first_line, rest)) => (first_line, rest),
            None => (after_ticks, ""),
        };
        if is_language_tag(tag.trim()) {
            body = payload;
        }
    }

    if let Some(payload) = body.trim_end().strip_suffix("```") {
        body = payload;
    }

    body.trim()
}

fn is_language_tag(tag: &str) -> bool {
    tag.chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '+' | '-' | '_'))
}

/// Parse a model response as JSON, tolerating code fences and leading
/// chatter before the first brace.
pub fn parse_json_response(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    let unfenced = strip_code_fence(text.trim());
    match serde_json::from_str(unfenced) {
        Ok(value) => Ok(value),
        Err(e) => {
            if let Some(start) = unfenced.find('{') {
                if let Some(end) = unfenced.rfind('}') {
                    if end > start {
                        return serde_json::from_str(&unfenced[start..=end]);
                    }
                }
            }
            Err(e)
        }
    }
}
