//! Tests for conversation context extraction.

use chrono::{DateTime, Duration, TimeZone, Utc};
use muninn::config::AssistantSettings;
use muninn::{ChatKind, ContextBuilder, HistoryMessage, MuninnError};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn msg(id: i64, username: Option<&str>, text: &str, minutes_ago: i64) -> HistoryMessage {
    HistoryMessage {
        message_id: id,
        user_id: 100 + id,
        username: username.map(str::to_string),
        text: text.to_string(),
        date: now() - Duration::minutes(minutes_ago),
    }
}

fn builder(settings: AssistantSettings) -> ContextBuilder {
    ContextBuilder::new(settings, "@muninn_bot", "@TargetBot")
}

#[test]
fn extract_basic_context() {
    let ctx = builder(AssistantSettings::default())
        .extract(-4242, 7, 99, "  @muninn_bot find a book  ", vec![], now())
        .unwrap();
    assert_eq!(ctx.message_text, "@muninn_bot find a book");
    assert_eq!(ctx.chat_kind, ChatKind::Group);
    assert_eq!(ctx.created_at, now());
    assert!(ctx.history.is_empty());
}

#[test]
fn empty_text_rejected() {
    let err = builder(AssistantSettings::default())
        .extract(-4242, 7, 99, "   ", vec![], now())
        .unwrap_err();
    assert!(matches!(err, MuninnError::InvalidInput(_)));
}

#[test]
fn history_sorted_and_windowed() {
    let settings = AssistantSettings {
        context_window_size: 2,
        ..AssistantSettings::default()
    };
    let history = vec![
        msg(3, None, "third", 1),
        msg(1, None, "first", 30),
        msg(2, None, "second", 10),
    ];
    let kept = builder(settings).filter_history(history, now());
    let texts: Vec<&str> = kept.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["second", "third"]);
}

#[test]
fn stale_and_empty_history_dropped() {
    let history = vec![
        msg(1, None, "yesterday", 24 * 60 + 1),
        msg(2, None, "   ", 5),
        msg(3, None, "recent", 5),
    ];
    let kept = builder(AssistantSettings::default()).filter_history(history, now());
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].text, "recent");
}

#[test]
fn target_bot_and_mentions_can_be_excluded() {
    let settings = AssistantSettings {
        include_target_bot_responses: false,
        include_mentions: false,
        ..AssistantSettings::default()
    };
    let history = vec![
        msg(1, Some("TargetBot"), "here are results", 5),
        msg(2, None, "/search@TargetBot dune", 4),
        msg(3, None, "hey @Muninn_Bot help", 3),
        msg(4, None, "plain chatter", 2),
    ];
    let kept = builder(settings).filter_history(history, now());
    let texts: Vec<&str> = kept.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["plain chatter"]);
}

#[test]
fn history_disabled() {
    let settings = AssistantSettings {
        include_history: false,
        ..AssistantSettings::default()
    };
    let kept = builder(settings).filter_history(vec![msg(1, None, "hi", 1)], now());
    assert!(kept.is_empty());
}

#[test]
fn oversized_context_drops_oldest_history() {
    let settings = AssistantSettings {
        max_context_length: 500,
        ..AssistantSettings::default()
    };
    let history = vec![
        msg(1, None, &"a".repeat(300), 3),
        msg(2, None, &"b".repeat(150), 2),
    ];
    let builder = builder(settings);
    let ctx = builder.extract(-4242, 7, 99, &"q".repeat(100), history, now()).unwrap();

    assert_eq!(ctx.history.len(), 1);
    assert!(ctx.history[0].text.starts_with('b'));
    assert!(ctx.text_len() <= 500);
    builder.validate(&ctx).unwrap();
}

#[test]
fn validate_rejects_missing_ids() {
    let builder = builder(AssistantSettings::default());
    let mut ctx = builder.extract(-4242, 7, 99, "hello", vec![], now()).unwrap();
    ctx.user_id = 0;
    assert!(builder.validate(&ctx).is_err());
}

#[test]
fn channel_ids() {
    assert!(muninn::context::is_channel_id(-1001234567890));
    assert!(!muninn::context::is_channel_id(-4242));
    assert_eq!(ChatKind::from_chat_id(1), ChatKind::Private);
}
