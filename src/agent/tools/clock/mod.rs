use crate::agent::tools::base::{ExecutionContext, Tool, ToolResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};
use serde_json::{Value, json};

pub struct CurrentTimeTool;

/// Parse `+HH:MM`, `-HH:MM`, `+HH` or `Z` into a fixed offset.
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None => (rest.parse::<i32>().ok()?, 0),
    };
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn describe(now: DateTime<Utc>, offset: Option<FixedOffset>) -> Value {
    let mut out = json!({
        "utc": now.to_rfc3339(),
        "unix": now.timestamp(),
        "local": now.with_timezone(&Local).to_rfc3339(),
    });
    if let Some(offset) = offset {
        let shifted = now.with_timezone(&offset);
        out["requested"] = json!({
            "offset": offset.to_string(),
            "time": shifted.to_rfc3339(),
            "weekday": shifted.format("%A").to_string(),
        });
    }
    out
}

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &'static str {
        "current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current date and time. Optionally pass a UTC offset like '+02:00'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset": {
                    "type": "string",
                    "description": "Offset from UTC, e.g. '+05:30' or '-08:00'"
                }
            }
        })
    }

    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> Result<ToolResult> {
        let offset = match params["utc_offset"].as_str() {
            Some(raw) => match parse_offset(raw) {
                Some(offset) => Some(offset),
                None => {
                    return Ok(ToolResult::error(format!(
                        "Invalid utc_offset '{}', expected something like '+02:00'",
                        raw
                    )));
                }
            },
            None => None,
        };
        Ok(ToolResult::json(&describe(Utc::now(), offset)))
    }
}

#[cfg(test)]
mod tests;
