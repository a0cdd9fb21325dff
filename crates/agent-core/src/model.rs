use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use waymark_core_types::ActionKind;

/// Role of a conversation turn exchanged with the model service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    /// Human operator, composite context and tool responses.
    User,
    /// Model output, including its tool calls.
    Assistant,
    /// System generated instructions or policies.
    System,
}

/// Opaque snapshot of the environment returned by an actuator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    /// Location the snapshot was taken at.
    pub location: String,
    pub mime_type: String,
    /// Raw snapshot bytes (a PNG screenshot for browser actuators).
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Where the snapshot was persisted, if the actuator keeps artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl Observation {
    pub fn png(location: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            location: location.into(),
            mime_type: "image/png".to_string(),
            data,
            path: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the matching response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            args: match args {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub name: String,
    pub response: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Observation { observation: Observation },
    ToolCall { call: ToolCall },
    ToolResponse { response: ToolResponse },
}

/// A single conversational message sent to or received from the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: ConversationRole,
    pub parts: Vec<ContentPart>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: ConversationRole, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            parts,
            timestamp: Utc::now(),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(
            ConversationRole::User,
            vec![ContentPart::Text { text: text.into() }],
        )
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.parts.iter().filter_map(|part| match part {
            ContentPart::ToolCall { call } => Some(call),
            _ => None,
        })
    }

    pub fn tool_responses(&self) -> impl Iterator<Item = &ToolResponse> {
        self.parts.iter().filter_map(|part| match part {
            ContentPart::ToolResponse { response } => Some(response),
            _ => None,
        })
    }
}

/// Parsed model output for one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelResponse {
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub text: Option<String>,
    /// Provider payload kept for diagnostics.
    #[serde(default)]
    pub raw: Value,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// No tool calls and no non-blank text.
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty()
            && self
                .text
                .as_deref()
                .map(|text| text.trim().is_empty())
                .unwrap_or(true)
    }

    /// The assistant turn that echoes this response into the conversation.
    pub fn to_turn(&self) -> ConversationTurn {
        let mut parts = Vec::new();
        if let Some(text) = self.text.as_ref().filter(|text| !text.trim().is_empty()) {
            parts.push(ContentPart::Text { text: text.clone() });
        }
        for call in &self.tool_calls {
            parts.push(ContentPart::ToolCall { call: call.clone() });
        }
        ConversationTurn::new(ConversationRole::Assistant, parts)
    }
}

/// Function declaration advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One declaration per action in the closed action vocabulary.
pub fn action_tool_schemas() -> Vec<ToolSchema> {
    ActionKind::ALL
        .iter()
        .map(|kind| ToolSchema {
            name: kind.as_str().to_string(),
            description: kind.description().to_string(),
            parameters: parameters_for(*kind),
        })
        .collect()
}

fn parameters_for(kind: ActionKind) -> Value {
    let coordinate = |axis: &str| {
        json!({
            "type": "integer",
            "minimum": 0,
            "maximum": 1000,
            "description": format!("Normalized {axis} coordinate (0-1000)."),
        })
    };
    let direction = json!({
        "type": "string",
        "enum": ["up", "down", "left", "right"],
    });

    let mut properties = Map::new();
    match kind {
        ActionKind::Navigate => {
            properties.insert("url".into(), json!({"type": "string"}));
        }
        ActionKind::ClickAt | ActionKind::HoverAt => {
            properties.insert("x".into(), coordinate("x"));
            properties.insert("y".into(), coordinate("y"));
        }
        ActionKind::TypeTextAt => {
            properties.insert("x".into(), coordinate("x"));
            properties.insert("y".into(), coordinate("y"));
            properties.insert("text".into(), json!({"type": "string"}));
            properties.insert(
                "press_enter".into(),
                json!({"type": "boolean", "default": true}),
            );
            properties.insert(
                "clear_before_typing".into(),
                json!({"type": "boolean", "default": true}),
            );
        }
        ActionKind::ScrollDocument => {
            properties.insert("direction".into(), direction);
        }
        ActionKind::ScrollAt => {
            properties.insert("x".into(), coordinate("x"));
            properties.insert("y".into(), coordinate("y"));
            properties.insert("direction".into(), direction);
            properties.insert(
                "magnitude".into(),
                json!({"type": "integer", "minimum": 0, "default": 800}),
            );
        }
        ActionKind::KeyCombination => {
            properties.insert("keys".into(), json!({"type": "string"}));
        }
        ActionKind::DragAndDrop => {
            properties.insert("x".into(), coordinate("x"));
            properties.insert("y".into(), coordinate("y"));
            properties.insert("destination_x".into(), coordinate("x"));
            properties.insert("destination_y".into(), coordinate("y"));
        }
        ActionKind::OpenWebBrowser
        | ActionKind::Wait5Seconds
        | ActionKind::GoBack
        | ActionKind::GoForward
        | ActionKind::Search => {}
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": kind.required_arguments(),
    })
}
