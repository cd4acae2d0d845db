//! Gemini Live `BidiGenerateContent` wire messages.
//!
//! Outbound messages are plain serde structs. Inbound messages are parsed
//! field by field so that one malformed field never costs the rest of the
//! frame: the bad field is dropped and its path recorded.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::config::{SessionConfig, ToolDefinition};
use crate::error::{LiveError, Result};
use crate::events::{GroundingReference, Part, Scheduling, ToolCallRequest, ToolResponse};

/// MIME type of captured microphone frames.
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

// ── Client → server ─────────────────────────────────────────────────────

/// One client frame. Exactly one field is set.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<Setup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input: Option<RealtimeInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_content: Option<ClientContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_response: Option<ToolResponse>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Value>,
}

/// A role-tagged list of parts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    /// `user` or `model`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Parts in order.
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    media_chunks: Option<Vec<MediaChunk>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

/// A realtime audio or image chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    /// MIME type, e.g. [`INPUT_AUDIO_MIME`].
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent {
    turns: Vec<Content>,
    turn_complete: bool,
}

impl ClientMessage {
    /// The session setup frame, always the first frame on a connection.
    pub fn setup(config: &SessionConfig) -> Self {
        let mut generation_config = json!({
            "responseModalities": config.response_modalities,
        });

        if let Some(voice) = &config.voice {
            generation_config["speechConfig"] = json!({
                "voiceConfig": {
                    "prebuiltVoiceConfig": {
                        "voiceName": voice
                    }
                }
            });
        }

        if let Some(temp) = config.temperature {
            generation_config["temperature"] = json!(temp);
        }

        let system_instruction = config
            .instruction
            .as_ref()
            .map(|text| Content { role: None, parts: vec![Part::text(text.clone())] });

        Self {
            setup: Some(Setup {
                model: config.model.clone(),
                system_instruction,
                generation_config,
                tools: convert_tools(&config.tools),
                input_audio_transcription: config.input_transcription.then(|| json!({})),
                output_audio_transcription: config.output_transcription.then(|| json!({})),
            }),
            ..Default::default()
        }
    }

    /// Realtime media chunks.
    pub fn media(chunks: Vec<MediaChunk>) -> Self {
        Self {
            realtime_input: Some(RealtimeInput { media_chunks: Some(chunks), text: None }),
            ..Default::default()
        }
    }

    /// Low-latency realtime text.
    pub fn realtime_text(text: impl Into<String>) -> Self {
        Self {
            realtime_input: Some(RealtimeInput { media_chunks: None, text: Some(text.into()) }),
            ..Default::default()
        }
    }

    /// A complete user turn.
    pub fn client_content(parts: Vec<Part>, turn_complete: bool) -> Self {
        Self {
            client_content: Some(ClientContent {
                turns: vec![Content { role: Some("user".to_string()), parts }],
                turn_complete,
            }),
            ..Default::default()
        }
    }

    /// Tool results.
    pub fn tool_response(response: ToolResponse) -> Self {
        Self { tool_response: Some(response), ..Default::default() }
    }

    /// Short name of the populated field, used in logs.
    pub fn kind(&self) -> &'static str {
        if self.setup.is_some() {
            "setup"
        } else if self.realtime_input.is_some() {
            "realtimeInput"
        } else if self.client_content.is_some() {
            "clientContent"
        } else if self.tool_response.is_some() {
            "toolResponse"
        } else {
            "empty"
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_frame(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| LiveError::protocol(format!("JSON serialize error: {}", e)))
    }
}

/// Build the `tools` setup entry from declarations. `None` when there are none.
pub fn convert_tools(tools: &[ToolDefinition]) -> Option<Vec<Value>> {
    if tools.is_empty() {
        return None;
    }
    let function_declarations: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description.clone().unwrap_or_default(),
                "parameters": t.parameters.clone().unwrap_or_else(|| json!({ "type": "object", "properties": {} }))
            })
        })
        .collect();

    Some(vec![json!({ "functionDeclarations": function_declarations })])
}

// ── Server → client ─────────────────────────────────────────────────────

/// A transcription delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcription {
    /// Delta text.
    pub text: String,
    /// Whether the segment is settled.
    pub is_final: bool,
}

/// The `serverContent` payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerContent {
    /// Parts of `modelTurn`, if present.
    pub model_turn: Option<Vec<Part>>,
    /// The user interrupted the agent.
    pub interrupted: bool,
    /// The agent's turn is over.
    pub turn_complete: bool,
    /// Generation is over.
    pub generation_complete: bool,
    /// User speech-to-text.
    pub input_transcription: Option<Transcription>,
    /// Agent speech-to-text.
    pub output_transcription: Option<Transcription>,
    /// References from `groundingMetadata`.
    pub grounding: Option<Vec<GroundingReference>>,
}

/// A parsed server frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMessage {
    /// `setupComplete` was present.
    pub setup_complete: bool,
    /// `toolCall.functionCalls`.
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// `toolCallCancellation.ids`.
    pub cancelled_ids: Option<Vec<String>>,
    /// `serverContent`.
    pub server_content: Option<ServerContent>,
    /// Paths of recognised fields that were malformed and skipped.
    pub dropped_fields: Vec<String>,
}

impl ServerMessage {
    /// Parse a text frame. Fails only when the frame is not a JSON object.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| LiveError::protocol(format!("Parse error: {}", e)))?;
        Self::from_value(&value)
    }

    /// Interpret an already-decoded frame.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(obj) = value else {
            return Err(LiveError::protocol("Server frame is not a JSON object"));
        };

        let mut msg = ServerMessage { setup_complete: obj.contains_key("setupComplete"), ..Default::default() };
        let dropped = &mut msg.dropped_fields;

        if let Some(tool_call) = object_field(obj, "toolCall", "toolCall", dropped) {
            msg.tool_calls = array_field(tool_call, "functionCalls", "toolCall.functionCalls", dropped)
                .map(|calls| parse_function_calls(calls, dropped));
        }

        if let Some(cancel) = object_field(obj, "toolCallCancellation", "toolCallCancellation", dropped) {
            msg.cancelled_ids = take(cancel, "ids", "toolCallCancellation.ids", dropped);
        }

        if let Some(content) = object_field(obj, "serverContent", "serverContent", dropped) {
            msg.server_content = Some(parse_server_content(content, dropped));
        }

        Ok(msg)
    }
}

fn parse_server_content(content: &Map<String, Value>, dropped: &mut Vec<String>) -> ServerContent {
    let model_turn = object_field(content, "modelTurn", "serverContent.modelTurn", dropped)
        .and_then(|turn| array_field(turn, "parts", "serverContent.modelTurn.parts", dropped))
        .map(|parts| {
            parts
                .iter()
                .enumerate()
                .filter_map(|(i, raw)| match serde_json::from_value::<Part>(raw.clone()) {
                    Ok(part) => Some(part),
                    Err(_) => {
                        dropped.push(format!("serverContent.modelTurn.parts[{i}]"));
                        None
                    }
                })
                .collect()
        });

    ServerContent {
        model_turn,
        interrupted: take(content, "interrupted", "serverContent.interrupted", dropped).unwrap_or(false),
        turn_complete: take(content, "turnComplete", "serverContent.turnComplete", dropped)
            .unwrap_or(false),
        generation_complete: take(
            content,
            "generationComplete",
            "serverContent.generationComplete",
            dropped,
        )
        .unwrap_or(false),
        input_transcription: parse_transcription(content, "inputTranscription", dropped),
        output_transcription: parse_transcription(content, "outputTranscription", dropped),
        grounding: object_field(content, "groundingMetadata", "serverContent.groundingMetadata", dropped)
            .map(parse_grounding),
    }
}

fn parse_transcription(
    content: &Map<String, Value>,
    key: &str,
    dropped: &mut Vec<String>,
) -> Option<Transcription> {
    let path = format!("serverContent.{key}");
    let obj = object_field(content, key, &path, dropped)?;
    let text: String = take(obj, "text", &format!("{path}.text"), dropped).unwrap_or_default();
    let is_final = take(obj, "isFinal", &format!("{path}.isFinal"), dropped)
        .or_else(|| take(obj, "finished", &format!("{path}.finished"), dropped))
        .unwrap_or(false);
    Some(Transcription { text, is_final })
}

fn parse_function_calls(calls: &[Value], dropped: &mut Vec<String>) -> Vec<ToolCallRequest> {
    calls
        .iter()
        .enumerate()
        .filter_map(|(i, raw)| {
            let path = format!("toolCall.functionCalls[{i}]");
            let Some(call) = raw.as_object() else {
                dropped.push(path);
                return None;
            };
            let id: Option<String> = take(call, "id", &format!("{path}.id"), dropped);
            let name: Option<String> = take(call, "name", &format!("{path}.name"), dropped);
            let (Some(id), Some(name)) = (id, name) else {
                dropped.push(path);
                return None;
            };
            let args = take(call, "args", &format!("{path}.args"), dropped).unwrap_or_default();
            let hint: Option<String> = take(call, "scheduling", &format!("{path}.scheduling"), dropped);
            Some(ToolCallRequest { id, name, args, scheduling: Scheduling::from_hint(hint.as_deref()) })
        })
        .collect()
}

fn parse_grounding(metadata: &Map<String, Value>) -> Vec<GroundingReference> {
    let Some(chunks) = metadata.get("groundingChunks").and_then(Value::as_array) else {
        return Vec::new();
    };
    chunks
        .iter()
        .filter_map(|chunk| {
            let source = ["web", "retrievedContext", "maps"]
                .iter()
                .find_map(|key| chunk.get(*key))?;
            let uri = source.get("uri").and_then(Value::as_str)?;
            Some(GroundingReference {
                uri: uri.to_string(),
                title: source.get("title").and_then(Value::as_str).map(str::to_string),
            })
        })
        .collect()
}

/// Deserialize `obj[key]`, recording `path` if present but malformed.
fn take<T: DeserializeOwned>(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    dropped: &mut Vec<String>,
) -> Option<T> {
    let raw = obj.get(key)?;
    match serde_json::from_value(raw.clone()) {
        Ok(v) => Some(v),
        Err(_) => {
            dropped.push(path.to_string());
            None
        }
    }
}

fn object_field<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &str,
    dropped: &mut Vec<String>,
) -> Option<&'a Map<String, Value>> {
    match obj.get(key)? {
        Value::Object(inner) => Some(inner),
        _ => {
            dropped.push(path.to_string());
            None
        }
    }
}

fn array_field<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &str,
    dropped: &mut Vec<String>,
) -> Option<&'a [Value]> {
    match obj.get(key)? {
        Value::Array(items) => Some(items.as_slice()),
        _ => {
            dropped.push(path.to_string());
            None
        }
    }
}
