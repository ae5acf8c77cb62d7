use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde_json::json;

use super::*;
use crate::core::types::{
    ContentPart, ImageUrl, Message, MessageContent, MessageRole, StopSequences, ToolChoice,
    ToolChoiceMode,
};

fn header<'a>(wire: &'a WireRequest<ChatCompletionRequest>, name: &str) -> Option<&'a str> {
    wire.headers.get(name).and_then(|value| value.to_str().ok())
}

fn image_part() -> ContentPart {
    ContentPart::ImageUrl {
        image_url: ImageUrl {
            url: "data:image/png;base64,AAAA".to_string(),
            detail: None,
        },
    }
}

#[test]
fn test_initiator_is_user_until_assistant_or_tool_appears() {
    let first_turn = vec![
        Message::text(MessageRole::System, "be brief"),
        Message::text(MessageRole::User, "hi"),
        Message::text(MessageRole::User, "again"),
    ];
    assert_eq!(initiator(&first_turn), Initiator::User);
    assert_eq!(initiator(&[]), Initiator::User);

    // Decided on the caller's roles, before system messages are sent as assistant.
    let system_then_user = vec![
        Message::text(MessageRole::System, "be brief"),
        Message::text(MessageRole::User, "hi"),
    ];
    assert_eq!(initiator(&system_then_user), Initiator::User);
    let wire = CopilotTranslator
        .build_wire_request(
            &ChatCompletionRequest::new("gpt-4o", system_then_user),
            "tok",
        )
        .expect("wire request");
    assert_eq!(wire.body.messages[0].role, MessageRole::Assistant);
    assert_eq!(header(&wire, "x-initiator"), Some("user"));

    let mut follow_up = first_turn.clone();
    follow_up.push(Message::text(MessageRole::Assistant, "hello"));
    assert_eq!(initiator(&follow_up), Initiator::Agent);

    let mut tool_turn = first_turn;
    tool_turn.push(Message::text(MessageRole::Tool, "{}"));
    assert_eq!(initiator(&tool_turn), Initiator::Agent);
    assert_eq!(Initiator::Agent.as_str(), "agent");
}

#[test]
fn test_vision_flag_tracks_any_image_part() {
    let text_only = vec![
        Message::text(MessageRole::User, "describe"),
        Message::parts(
            MessageRole::User,
            vec![ContentPart::Text {
                text: "plain".to_string(),
            }],
        ),
    ];
    assert!(!has_image_content(&text_only));

    let mut with_image_url = text_only.clone();
    with_image_url.push(Message::parts(
        MessageRole::User,
        vec![
            ContentPart::Text {
                text: "look".to_string(),
            },
            image_part(),
        ],
    ));
    assert!(has_image_content(&with_image_url));

    let vendor_image: ContentPart =
        serde_json::from_value(json!({"type": "image", "source": {"data": "AAAA"}}))
            .expect("image part");
    let mut with_vendor_image = text_only;
    with_vendor_image.push(Message::parts(MessageRole::Assistant, vec![vendor_image]));
    assert!(has_image_content(&with_vendor_image));
}

#[test]
fn test_wire_request_headers_for_streaming_first_turn() {
    let mut req = ChatCompletionRequest::new(
        "gpt-4o",
        vec![Message::text(MessageRole::User, "hello")],
    );
    req.stream = true;

    let wire = CopilotTranslator
        .build_wire_request(&req, "cop-token")
        .expect("wire request");

    assert_eq!(header(&wire, AUTHORIZATION.as_str()), Some("Bearer cop-token"));
    assert_eq!(header(&wire, ACCEPT.as_str()), Some("text/event-stream"));
    assert_eq!(
        header(&wire, USER_AGENT.as_str()),
        Some("GitHubCopilotChat/0.26.7")
    );
    assert_eq!(header(&wire, "copilot-integration-id"), Some("vscode-chat"));
    assert_eq!(header(&wire, "openai-intent"), Some("conversation-panel"));
    assert_eq!(header(&wire, "x-initiator"), Some("user"));
    assert_eq!(header(&wire, "editor-version"), Some(EDITOR_VERSION));
    assert_eq!(
        header(&wire, "editor-plugin-version"),
        Some(EDITOR_PLUGIN_VERSION)
    );
    assert!(header(&wire, "x-github-api-version").is_some());
    assert!(header(&wire, "copilot-vision-request").is_none());
    assert!(header(&wire, CONTENT_TYPE.as_str()).is_none());

    let request_id = header(&wire, "x-request-id").expect("request id");
    assert!(Uuid::parse_str(request_id).is_ok());
}

#[test]
fn test_wire_request_varies_only_in_request_id() {
    let req = ChatCompletionRequest::new(
        "gpt-4o",
        vec![
            Message::text(MessageRole::User, "hi"),
            Message::text(MessageRole::Assistant, "hello"),
            Message::parts(MessageRole::User, vec![image_part()]),
        ],
    );

    let first = CopilotTranslator
        .build_wire_request(&req, "tok")
        .expect("first");
    let second = CopilotTranslator
        .build_wire_request(&req, "tok")
        .expect("second");

    assert_eq!(header(&first, ACCEPT.as_str()), Some("application/json"));
    assert_eq!(header(&first, "x-initiator"), Some("agent"));
    assert_eq!(header(&first, "copilot-vision-request"), Some("true"));
    assert_ne!(header(&first, "x-request-id"), header(&second, "x-request-id"));

    for (name, value) in &first.headers {
        if name.as_str() != "x-request-id" {
            assert_eq!(second.headers.get(name), Some(value), "header {name}");
        }
    }
}

#[test]
fn test_body_remaps_system_role_and_forwards_fields() {
    let mut req = ChatCompletionRequest::new(
        "claude-sonnet-4",
        vec![
            Message::text(MessageRole::System, "rules"),
            Message::text(MessageRole::User, "go"),
        ],
    );
    req.temperature = Some(0.5);
    req.max_tokens = Some(256);
    req.stop = Some(StopSequences::Single("END".to_string()));
    req.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::Auto));
    req.parallel_tool_calls = Some(false);

    let wire = CopilotTranslator
        .build_wire_request(&req, "tok")
        .expect("wire request");

    assert_eq!(wire.body.messages[0].role, MessageRole::Assistant);
    assert_eq!(
        wire.body.messages[0].content,
        Some(MessageContent::Text("rules".to_string()))
    );
    assert_eq!(wire.body.messages[1].role, MessageRole::User);
    assert_eq!(req.messages[0].role, MessageRole::System);

    let encoded = serde_json::to_value(&wire.body).expect("encode");
    assert_eq!(encoded["model"], "claude-sonnet-4");
    assert_eq!(encoded["temperature"], 0.5);
    assert_eq!(encoded["max_tokens"], 256);
    assert_eq!(encoded["stop"], "END");
    assert_eq!(encoded["tool_choice"], "auto");
    assert_eq!(encoded["parallel_tool_calls"], false);
    assert_eq!(encoded["stream"], false);
    assert!(encoded.get("top_p").is_none());
}

#[test]
fn test_invalid_token_is_rejected_as_protocol_error() {
    let req = ChatCompletionRequest::new("gpt-4o", vec![Message::text(MessageRole::User, "hi")]);

    let error = CopilotTranslator
        .build_wire_request(&req, "bad\r\ntoken")
        .expect_err("newline in token");

    assert!(matches!(error, ProviderError::Protocol { .. }));
}
