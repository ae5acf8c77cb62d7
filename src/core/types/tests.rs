use super::*;
use serde_json::json;

#[test]
fn test_chat_request_serde_roundtrip_skips_unset_fields() {
    let mut req = ChatCompletionRequest::new(
        "gpt-4o",
        vec![Message::text(MessageRole::User, "hello")],
    );
    req.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::Auto));
    req.stop = Some(StopSequences::Single("END".to_string()));

    let value = serde_json::to_value(&req).expect("request should serialize");

    assert!(value.get("temperature").is_none());
    assert!(value.get("tools").is_none());
    assert!(value.get("response_format").is_none());
    assert_eq!(value.get("tool_choice"), Some(&json!("auto")));
    assert_eq!(value.get("stop"), Some(&json!("END")));
    assert_eq!(value["messages"][0]["content"], json!("hello"));

    let roundtrip: ChatCompletionRequest =
        serde_json::from_value(value).expect("request should deserialize");
    assert_eq!(roundtrip, req);
}

#[test]
fn test_message_roles_are_a_closed_set() {
    let parsed: Message = serde_json::from_value(json!({"role": "tool", "content": "42"}))
        .expect("known role should decode");
    assert_eq!(parsed.role, MessageRole::Tool);

    let unknown = serde_json::from_value::<Message>(json!({"role": "narrator", "content": "hi"}));
    assert!(unknown.is_err());
}

#[test]
fn test_content_parts_decode_into_tagged_variants() {
    let message: Message = serde_json::from_value(json!({
        "role": "user",
        "content": [
            {"type": "text", "text": "what is this?"},
            {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
            {"type": "image", "source": {"media_type": "image/png"}}
        ]
    }))
    .expect("parts should decode");

    let Some(MessageContent::Parts(parts)) = &message.content else {
        panic!("expected part content, got {:?}", message.content);
    };
    assert_eq!(parts.len(), 3);
    assert!(matches!(parts[0], ContentPart::Text { .. }));
    assert!(parts[1].is_image());
    assert!(parts[2].is_image());
    assert!(message.has_image());

    let unknown = serde_json::from_value::<Message>(json!({
        "role": "user",
        "content": [{"type": "hologram", "data": "?"}]
    }));
    assert!(unknown.is_err());
}

#[test]
fn test_vendor_image_part_keeps_its_fields() {
    let part: ContentPart =
        serde_json::from_value(json!({"type": "image", "source": {"data": "AAAA"}}))
            .expect("image part should decode");
    let value = serde_json::to_value(&part).expect("image part should serialize");
    assert_eq!(value, json!({"type": "image", "source": {"data": "AAAA"}}));
}

#[test]
fn test_plain_text_content_stays_a_string() {
    let message = Message::text(MessageRole::Assistant, "done");
    assert_eq!(
        message.content,
        Some(MessageContent::Text("done".to_string()))
    );
    assert_eq!(
        serde_json::to_value(&message).expect("message should serialize")["content"],
        json!("done")
    );
    assert!(!message.has_image());
}

#[test]
fn test_response_tolerates_missing_envelope_fields() {
    let response: ChatCompletionResponse = serde_json::from_value(json!({
        "choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}]
    }))
    .expect("response should decode");

    assert!(response.object.is_empty());
    assert_eq!(response.created, 0);
    assert_eq!(response.choices[0].message.role, MessageRole::Assistant);
    assert_eq!(response.choices[0].message.content.as_deref(), Some("hi"));
}

#[test]
fn test_usage_total_tokens_derivation() {
    let explicit = Usage {
        prompt_tokens: 2,
        completion_tokens: 3,
        total_tokens: 99,
    };
    assert_eq!(explicit.derived_total_tokens(), 99);

    let derived = Usage {
        prompt_tokens: 2,
        completion_tokens: 3,
        total_tokens: 0,
    };
    assert_eq!(derived.derived_total_tokens(), 5);
}

#[test]
fn test_provider_id_serializes_as_plain_string() {
    assert_eq!(
        serde_json::to_value(ProviderId::Copilot).expect("serialize"),
        json!("copilot")
    );
    let other: ProviderId = serde_json::from_value(json!("acme")).expect("deserialize");
    assert_eq!(other, ProviderId::Other("acme".to_string()));
    assert_eq!(other.to_string(), "acme");
}

#[test]
fn test_model_catalog_membership() {
    let catalog = ModelCatalog {
        models: vec![ModelInfo {
            id: "gpt-4o".to_string(),
            provider: ProviderId::Copilot,
            display_name: Some("GPT-4o".to_string()),
            vendor: None,
            context_window: None,
            max_output_tokens: None,
            supports_tools: true,
            supports_vision: true,
            supports_streaming: true,
        }],
    };

    assert!(catalog.contains("gpt-4o"));
    assert!(!catalog.contains("gpt-4"));
    assert_eq!(
        catalog.get("gpt-4o").and_then(|m| m.display_name.as_deref()),
        Some("GPT-4o")
    );
    assert_eq!(catalog.len(), 1);
}
