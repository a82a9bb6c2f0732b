use super::*;
use chrono::TimeZone;

#[test]
fn test_parse_offset() {
    assert_eq!(parse_offset("+02:00"), FixedOffset::east_opt(7200));
    assert_eq!(parse_offset("-05:30"), FixedOffset::east_opt(-19800));
    assert_eq!(parse_offset("+9"), FixedOffset::east_opt(9 * 3600));
    assert_eq!(parse_offset("Z"), FixedOffset::east_opt(0));
    assert_eq!(parse_offset("02:00"), None);
    assert_eq!(parse_offset("+25:00"), None);
    assert_eq!(parse_offset(""), None);
}

#[test]
fn test_describe_with_offset() {
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
    let out = describe(now, FixedOffset::east_opt(3600));
    assert_eq!(out["unix"], now.timestamp());
    assert_eq!(out["requested"]["time"], "2024-03-02T00:30:00+01:00");
    assert_eq!(out["requested"]["weekday"], "Saturday");
}

#[tokio::test]
async fn test_invalid_offset_is_error_result() {
    let result = CurrentTimeTool
        .execute(json!({"utc_offset": "noon"}), &ExecutionContext::default())
        .await
        .unwrap();
    assert!(result.is_error);
}

#[tokio::test]
async fn test_plain_call() {
    let result = CurrentTimeTool
        .execute(json!({}), &ExecutionContext::default())
        .await
        .unwrap();
    let parsed: Value = serde_json::from_str(&result.content).unwrap();
    assert!(parsed["utc"].is_string());
    assert!(parsed.get("requested").is_none());
}
