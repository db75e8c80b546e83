use serde_json::Value;

/// Appended to the text slot while a reply is still streaming
pub const CURSOR: &str = "▌";

/// Id and name of a tool invocation announced by `chunk`.
///
/// Only `event.contentBlockStart.start.toolUse` is inspected; anything else
/// yields `(None, None)`.
pub fn extract_tool_start(chunk: &Value) -> (Option<String>, Option<String>) {
    let tool_use = &chunk["event"]["contentBlockStart"]["start"]["toolUse"];
    let field = |key: &str| {
        tool_use
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    (field("toolUseId"), field("name"))
}

/// Text carried by `chunk`: the `data` field first, then `delta.text`.
pub fn extract_text(chunk: &Value) -> String {
    [&chunk["data"], &chunk["delta"]["text"]]
        .into_iter()
        .filter_map(Value::as_str)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// What a streamed chunk means to the chat loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    ToolStart { id: String, name: String },
    Text(String),
    /// Contributes no text and no announcement
    Unrecognized,
}

impl StreamChunk {
    /// Classify `chunk`. A chunk carrying both a tool start and text yields
    /// both, tool start first.
    pub fn decode(chunk: &Value) -> Vec<StreamChunk> {
        let mut decoded = Vec::new();
        if let (Some(id), Some(name)) = extract_tool_start(chunk) {
            if !id.is_empty() && !name.is_empty() {
                decoded.push(StreamChunk::ToolStart { id, name });
            }
        }
        let text = extract_text(chunk);
        if !text.is_empty() {
            decoded.push(StreamChunk::Text(text));
        }
        if decoded.is_empty() {
            decoded.push(StreamChunk::Unrecognized);
        }
        decoded
    }
}
