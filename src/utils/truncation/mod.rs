use crate::utils::regex::RegexPatterns;
use serde_json::Value;

/// Shrink a tool result to at most roughly `max_chars`, pretty-printing JSON
/// so the kept prefix stays readable.
pub fn truncate_tool_result(result: &str, max_chars: usize) -> String {
    let clean = RegexPatterns::ansi_escape()
        .replace_all(result, "")
        .to_string();

    if clean.len() <= max_chars {
        return clean;
    }

    // Too small for a marker; hard cut.
    if max_chars < 120 {
        let safe = floor_char_boundary(&clean, max_chars);
        return clean[..safe].to_string();
    }

    let stripped = clean.trim_start();
    if (stripped.starts_with('{') || stripped.starts_with('['))
        && let Ok(parsed) = serde_json::from_str::<Value>(&clean)
        && let Ok(pretty) = serde_json::to_string_pretty(&parsed)
    {
        if pretty.len() <= max_chars {
            return pretty;
        }
        let safe_budget = floor_char_boundary(&pretty, max_chars - 120);
        return format!(
            "{}\n\n... [JSON truncated - showed {} of {} chars]",
            &pretty[..safe_budget],
            safe_budget,
            pretty.len()
        );
    }

    let safe_budget = floor_char_boundary(&clean, max_chars - 100);
    format!(
        "{}\n\n... [truncated - showed {} of {} chars]",
        &clean[..safe_budget],
        safe_budget,
        clean.len()
    )
}

/// Cut `text` to at most `max_chars` bytes on a char boundary, adding an ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let safe = floor_char_boundary(text, max_chars);
    format!("{}…", &text[..safe])
}

/// Largest byte index <= `index` that is a valid char boundary.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests;
