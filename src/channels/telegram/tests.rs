use super::*;

fn list(entries: &[&str]) -> Vec<String> {
    entries.iter().map(ToString::to_string).collect()
}

#[test]
fn test_empty_allow_list_admits_everyone() {
    assert!(is_allowed(&[], 1, None));
}

#[test]
fn test_allow_by_id() {
    let allow = list(&["12345"]);
    assert!(is_allowed(&allow, 12345, None));
    assert!(!is_allowed(&allow, 54321, None));
}

#[test]
fn test_allow_by_username() {
    let allow = list(&["@Alice", "bob"]);
    assert!(is_allowed(&allow, 1, Some("alice")));
    assert!(is_allowed(&allow, 2, Some("Bob")));
    assert!(!is_allowed(&allow, 3, Some("carol")));
    assert!(!is_allowed(&allow, 4, None));
}

#[test]
fn test_channel_name() {
    let channel = TelegramChannel::new(
        TelegramConfig {
            enabled: true,
            token: "123:abc".to_string(),
            allow_from: vec![],
        },
        Arc::new(Mutex::new(MessageBus::default())),
    );
    assert_eq!(channel.name(), "telegram");
}
