// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::agent::AgentId;

#[test]
fn envelope_uses_type_field() {
    let msg = Message::new(
        "status:report",
        AgentId::new("w-1"),
        Recipient::Broadcast,
        serde_json::json!({"load": 2}),
    );
    let json = serde_json::to_value(&msg).unwrap();

    assert_eq!(json["type"], "status:report");
    assert_eq!(json["sender"], "w-1");
    assert_eq!(json["recipient"]["scope"], "broadcast");
    assert_eq!(json["payload"]["load"], 2);
    assert!(json.get("correlation_id").is_none());
}

#[test]
fn direct_recipient_roundtrip() {
    let msg = Message::new(
        "control:ping",
        AgentId::new("w-1"),
        Recipient::Agent(AgentId::new("w-2")),
        serde_json::Value::Null,
    );
    let json = serde_json::to_string(&msg).unwrap();
    let parsed: Message = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.recipient, Recipient::Agent(AgentId::new("w-2")));
    assert_eq!(parsed.kind, "control:ping");
}

#[test]
fn wants_reply_needs_both_fields() {
    let mut msg = Message::new(
        "q",
        AgentId::new("a"),
        Recipient::Agent(AgentId::new("b")),
        serde_json::Value::Null,
    );
    assert!(!msg.wants_reply());

    msg.correlation_id = Some("c-1".into());
    assert!(!msg.wants_reply());

    msg.reply_to = Some("agent:reply:c-1".into());
    assert!(msg.wants_reply());
}

#[test]
fn recipient_display() {
    assert_eq!(Recipient::Broadcast.to_string(), "broadcast");
    assert_eq!(Recipient::Class("render".into()).to_string(), "class:render");
    assert_eq!(
        Recipient::Agent(AgentId::new("w-3")).to_string(),
        "agent:w-3"
    );
}
