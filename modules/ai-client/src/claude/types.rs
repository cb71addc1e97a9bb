use serde::{Deserialize, Serialize};

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl WireMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

// =============================================================================
// System blocks and prompt caching
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CacheControl {
    #[serde(rename = "type")]
    pub control_type: String,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            control_type: "ephemeral".to_string(),
        }
    }
}

/// A system prompt block. Marking a block with `cache_control` lets the
/// provider reuse its processed prefix across requests that share it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl SystemBlock {
    pub fn cached(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: text.into(),
            cache_control: Some(CacheControl::ephemeral()),
        }
    }
}

// =============================================================================
// Tool definition (structured output channel)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ToolDefinitionWire {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

// =============================================================================
// Chat request
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<Vec<SystemBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinitionWire>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 1024,
            messages: Vec::new(),
            system: None,
            temperature: None,
            tools: None,
            tool_choice: None,
        }
    }

    pub fn system_cached(mut self, text: impl Into<String>) -> Self {
        self.system
            .get_or_insert_with(Vec::new)
            .push(SystemBlock::cached(text));
        self
    }

    pub fn message(mut self, message: WireMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Force all output through a single structured-response tool.
    pub fn forced_tool(mut self, name: &str, description: &str, schema: serde_json::Value) -> Self {
        self.tools.get_or_insert_with(Vec::new).push(ToolDefinitionWire {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: schema,
        });
        self.tool_choice = Some(serde_json::json!({"type": "tool", "name": name}));
        self
    }
}

// =============================================================================
// Chat response
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatResponse {
    pub fn text(&self) -> Option<String> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.clone()),
            _ => None,
        })
    }

    pub fn tool_input(&self) -> Option<&serde_json::Value> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::ToolUse { input, .. } => Some(input),
            _ => None,
        })
    }
}

// =============================================================================
// Message Batches
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub(crate) struct BatchRequestItem {
    pub custom_id: String,
    pub params: ChatRequest,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct BatchCreateBody {
    pub requests: Vec<BatchRequestItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BatchMeta {
    pub id: String,
    pub processing_status: String,
    #[serde(default)]
    pub results_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BatchResultLine {
    pub custom_id: String,
    pub result: BatchResult,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BatchResult {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: Option<ChatResponse>,
}
