//! Wire format of serialized events: the `type` tag carries the dotted
//! discriminator, fields are camelCase, and enums use their wire spelling.

use chrono::Utc;
use pulse_core::model::{
    ContentKind, DomainEvent, FlagReason, FlagSeverity, PaymentMethod,
};

#[test]
fn type_tag_and_field_names_match_the_wire_contract() {
    let event = DomainEvent::PostCreated {
        post_id: "p1".to_string(),
        author_id: "a1".to_string(),
        content: "hello".to_string(),
        media_urls: vec!["https://cdn/p1.jpg".to_string()],
        hashtags: vec![],
        mentions: vec![],
        created_at: Utc::now(),
    };

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "post.created");
    assert_eq!(value["postId"], "p1");
    assert_eq!(value["authorId"], "a1");
    assert_eq!(value["mediaUrls"][0], "https://cdn/p1.jpg");
}

#[test]
fn enum_fields_use_screaming_snake_case() {
    let event = DomainEvent::ContentFlagged {
        content_id: "c1".to_string(),
        content_type: ContentKind::Video,
        reason: FlagReason::HateSpeech,
        flagged_by: "mod-1".to_string(),
        severity: FlagSeverity::Critical,
        flagged_at: Utc::now(),
    };

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "content.flagged");
    assert_eq!(value["contentType"], "VIDEO");
    assert_eq!(value["reason"], "HATE_SPEECH");
    assert_eq!(value["severity"], "CRITICAL");
}

#[test]
fn events_survive_a_queue_round_trip() {
    let event = DomainEvent::PaymentCompleted {
        payment_id: "pay-1".to_string(),
        user_id: "u1".to_string(),
        amount_cents: 12_500,
        transaction_id: "tx-9".to_string(),
        completed_at: Utc::now(),
    };

    let bytes = serde_json::to_vec(&event).unwrap();
    let decoded: DomainEvent = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(decoded.event_type(), "payment.completed");
    match decoded {
        DomainEvent::PaymentCompleted {
            payment_id,
            amount_cents,
            ..
        } => {
            assert_eq!(payment_id, "pay-1");
            assert_eq!(amount_cents, 12_500);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn untagged_payloads_are_rejected() {
    let err = serde_json::from_str::<DomainEvent>(r#"{"postId": "p1"}"#);
    assert!(err.is_err());

    let err = serde_json::from_str::<DomainEvent>(r#"{"type": "no.such.event"}"#);
    assert!(err.is_err());
}

#[test]
fn payment_method_round_trips() {
    let event = DomainEvent::PaymentInitiated {
        payment_id: "pay-1".to_string(),
        user_id: "u1".to_string(),
        amount_cents: 500,
        currency: "EGP".to_string(),
        method: PaymentMethod::VodafoneCash,
        initiated_at: Utc::now(),
    };

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["method"], "VODAFONE_CASH");
}
