use super::*;

#[test]
fn test_short_result_untouched() {
    assert_eq!(truncate_tool_result("hello", 100), "hello");
}

#[test]
fn test_ansi_stripped() {
    assert_eq!(truncate_tool_result("\x1b[32mok\x1b[0m", 100), "ok");
}

#[test]
fn test_long_text_gets_marker() {
    let long = "x".repeat(5000);
    let out = truncate_tool_result(&long, 1000);
    assert!(out.len() < 1100);
    assert!(out.contains("[truncated - showed 900 of 5000 chars]"));
}

#[test]
fn test_long_json_truncated_as_json() {
    let items: Vec<String> = (0..500).map(|i| format!("item-{}", i)).collect();
    let json = serde_json::to_string(&items).unwrap();
    let out = truncate_tool_result(&json, 500);
    assert!(out.contains("[JSON truncated"));
}

#[test]
fn test_tiny_limit_hard_cut_respects_char_boundary() {
    let text = "ééééééééééé";
    let out = truncate_tool_result(text, 5);
    assert!(out.len() <= 5);
    assert!(text.starts_with(&out));
}

#[test]
fn test_truncate_chars() {
    assert_eq!(truncate_chars("short", 10), "short");
    assert_eq!(truncate_chars("abcdefghij", 4), "abcd…");
}
