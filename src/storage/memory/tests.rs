use super::*;
use crate::providers::base::Message;

#[tokio::test]
async fn test_get_or_create_returns_fresh_user() {
    let storage = MemoryStorage::new();
    let user = storage.get_or_create_user(7).await.unwrap();
    assert_eq!(user.id, 7);
    assert!(user.messages.is_empty());
    assert_eq!(storage.len().await, 1);
}

#[tokio::test]
async fn test_save_then_reload_sees_changes() {
    let storage = MemoryStorage::new();
    let mut user = storage.get_or_create_user(1).await.unwrap();
    user.info = "likes tea".to_string();
    storage.add_message(&mut user, Message::user("hi"), None).await.unwrap();

    let reloaded = storage.get_or_create_user(1).await.unwrap();
    assert_eq!(reloaded.info, "likes tea");
    assert_eq!(reloaded.messages.len(), 1);
    assert_eq!(reloaded.messages[0].id, Some(0));
}

#[tokio::test]
async fn test_unsaved_mutation_is_invisible() {
    let storage = MemoryStorage::new();
    let mut user = storage.get_or_create_user(2).await.unwrap();
    user.info = "draft".to_string();

    let reloaded = storage.get_or_create_user(2).await.unwrap();
    assert!(reloaded.info.is_empty());
}
