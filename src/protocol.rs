//! JSON messages exchanged with the live conversational endpoint.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::audio::{EncodedChunk, PcmFormat};
use crate::config::Config;
use crate::error::SessionResult;
use crate::transport::TransportEvent;

// ======================== Client → server ========================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: &'a str,
    generation_config: GenerationConfig<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: [Blob; 1],
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

/// First message on a new connection: model, voice and system instruction.
pub fn setup_message(config: &Config) -> SessionResult<String> {
    let system_instruction = if config.system_instruction.is_empty() {
        None
    } else {
        Some(Content {
            parts: [TextPart {
                text: &config.system_instruction,
            }],
        })
    };
    let msg = SetupMessage {
        setup: Setup {
            model: &config.model,
            generation_config: GenerationConfig {
                response_modalities: ["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: &config.voice_name,
                        },
                    },
                },
            },
            system_instruction,
        },
    };
    Ok(serde_json::to_string(&msg)?)
}

/// Wrap one microphone chunk as a realtime input message.
pub fn realtime_input(chunk: &EncodedChunk) -> SessionResult<String> {
    let msg = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [Blob {
                mime_type: chunk.mime_type(),
                data: STANDARD.encode(&chunk.data),
            }],
        },
    };
    Ok(serde_json::to_string(&msg)?)
}

// ======================== Server → client ========================

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    go_away: Option<Value>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Deserialize, Debug, Default)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<Blob>,
    text: Option<String>,
}

/// A parsed server message.
#[derive(Debug, Default, PartialEq)]
pub struct ServerUpdate {
    pub setup_complete: bool,
    pub events: Vec<TransportEvent>,
}

/// Parse one server message into transport events.
///
/// Audio parts come first, in order, then `Interrupted`, then `TurnComplete`.
/// A part with bad base64 or a non-PCM mime type is dropped with a warning.
/// Returns `None` if the text is not a server message at all.
pub fn parse_server_message(text: &str, fallback_rate: u32) -> Option<ServerUpdate> {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("Ignoring non-protocol message: {}", e);
            return None;
        }
    };

    let mut update = ServerUpdate {
        setup_complete: msg.setup_complete.is_some(),
        events: Vec::new(),
    };

    if let Some(go_away) = msg.go_away {
        warn!(%go_away, "Server is going away");
    }

    if let Some(content) = msg.server_content {
        let parts = content.model_turn.map(|t| t.parts).unwrap_or_default();
        for part in parts {
            if let Some(text) = part.text {
                debug!(%text, "Model text part");
            }
            let Some(blob) = part.inline_data else {
                continue;
            };
            match decode_blob(&blob, fallback_rate) {
                Ok(chunk) => update.events.push(TransportEvent::ChunkReceived(chunk)),
                Err(e) => warn!("Dropping inbound audio part: {}", e),
            }
        }
        if content.interrupted {
            update.events.push(TransportEvent::Interrupted);
        }
        if content.turn_complete {
            update.events.push(TransportEvent::TurnComplete);
        }
    }

    Some(update)
}

fn decode_blob(blob: &Blob, fallback_rate: u32) -> SessionResult<EncodedChunk> {
    let format = PcmFormat::from_mime(&blob.mime_type, fallback_rate)?;
    let data = STANDARD
        .decode(blob.data.as_bytes())
        .map_err(|e| crate::error::SessionError::Decode(format!("bad base64 payload: {}", e)))?;
    Ok(EncodedChunk::new(data, format))
}
