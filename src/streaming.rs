//! Streaming translator: provider stream frames → canonical SSE chunks.
//!
//! The output contract is fixed: a sequence of `data: {json}\n\n` frames
//! terminated by `data: [DONE]\n\n`, with the usage-bearing final chunk
//! strictly before the terminator. Upstream Bedrock framing is
//! newline-delimited JSON; a small framer re-assembles frames across chunk
//! boundaries and a per-connection translator state machine emits chunks.

use crate::error::AppError;
use crate::models::openai::{
    BlockDelta, BlockDeltaPayload, ChatCompletionChunk, ChunkChoice, Delta, FunctionCallDelta,
    ToolCallDelta, Usage,
};
use crate::providers::converse::converse_usage;
use crate::providers::family::ModelFamily;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::Pin;

pub const METRICS_TRAILER: &str = "amazon-bedrock-invocationMetrics";

/// Per-connection translator state.
///
/// `current_tool_index` is monotonic non-decreasing: it equals the number of
/// distinct tool-use starts seen minus one.
pub struct StreamState {
    pub id: String,
    pub created: u64,
    pub model: String,
    pub current_tool_index: i64,
    pub stop_reason: Option<String>,
    pub strict: bool,
    done: bool,
}

impl StreamState {
    pub fn new(model: &str, strict: bool) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp() as u64,
            model: model.to_string(),
            current_tool_index: -1,
            stop_reason: None,
            strict,
            done: false,
        }
    }

    fn chunk(&self, delta: Delta, finish_reason: Option<String>, usage: Option<Usage>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }

    fn final_chunk(&mut self, usage: Option<Usage>) -> ChatCompletionChunk {
        self.done = true;
        let usage = usage.map(|u| if self.strict { u.strip_cache_fields() } else { u });
        self.chunk(Delta::default(), self.stop_reason.clone(), usage)
    }
}

/// A translator consumes upstream frames and yields canonical chunks.
/// After the usage-bearing final chunk it reports done; the SSE adapter then
/// appends `[DONE]`.
pub trait StreamTranslator: Send {
    fn on_frame(&mut self, frame: &Value) -> Result<Vec<ChatCompletionChunk>, AppError>;
    fn is_done(&self) -> bool;
    fn state_mut(&mut self) -> &mut StreamState;
}

// ============================================================
// Converse stream
// ============================================================

/// Translator for `/converse-stream` frames.
pub struct ConverseTranslator {
    state: StreamState,
}

impl ConverseTranslator {
    pub fn new(model: &str, strict: bool) -> Self {
        Self {
            state: StreamState::new(model, strict),
        }
    }
}

impl StreamTranslator for ConverseTranslator {
    fn on_frame(&mut self, frame: &Value) -> Result<Vec<ChatCompletionChunk>, AppError> {
        let mut chunks = Vec::new();

        // Stop reason is recorded but held back until the usage frame.
        if let Some(stop_reason) = frame["stopReason"].as_str() {
            self.state.stop_reason = Some(stop_reason.to_string());
        }

        if let Some(tool_use) = frame["start"]["toolUse"].as_object() {
            self.state.current_tool_index += 1;
            chunks.push(self.state.chunk(
                Delta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index: self.state.current_tool_index as u32,
                        id: tool_use
                            .get("toolUseId")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        tool_type: Some("function".to_string()),
                        function: Some(FunctionCallDelta {
                            name: tool_use
                                .get("name")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            arguments: Some(String::new()),
                        }),
                    }]),
                    ..Default::default()
                },
                None,
                None,
            ));
        }

        if let Some(delta) = frame.get("delta") {
            if let Some(input) = delta["toolUse"]["input"].as_str() {
                if self.state.current_tool_index < 0 {
                    return Err(AppError::Stream(
                        "tool input delta before any tool-use start".to_string(),
                    ));
                }
                chunks.push(self.state.chunk(
                    Delta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index: self.state.current_tool_index as u32,
                            id: None,
                            tool_type: None,
                            function: Some(FunctionCallDelta {
                                name: None,
                                arguments: Some(input.to_string()),
                            }),
                        }]),
                        ..Default::default()
                    },
                    None,
                    None,
                ));
            }

            if let Some(text) = delta["text"].as_str() {
                let block_index = frame["contentBlockIndex"].as_u64().unwrap_or(0) as u32;
                chunks.push(self.state.chunk(
                    Delta {
                        content: Some(text.to_string()),
                        content_blocks: if self.state.strict {
                            None
                        } else {
                            Some(vec![BlockDelta {
                                index: block_index,
                                delta: BlockDeltaPayload {
                                    text: Some(text.to_string()),
                                    ..Default::default()
                                },
                            }])
                        },
                        ..Default::default()
                    },
                    None,
                    None,
                ));
            }

            if let Some(reasoning) = delta.get("reasoningContent") {
                // Strict compliance exposes plain content only; reasoning
                // deltas have no standard projection and are dropped.
                if !self.state.strict {
                    let block_index = frame["contentBlockIndex"].as_u64().unwrap_or(0) as u32;
                    let payload = BlockDeltaPayload {
                        thinking: reasoning["text"].as_str().map(str::to_string),
                        signature: reasoning["signature"].as_str().map(str::to_string),
                        data: reasoning["redactedContent"].as_str().map(str::to_string),
                        ..Default::default()
                    };
                    if payload.thinking.is_some()
                        || payload.signature.is_some()
                        || payload.data.is_some()
                    {
                        chunks.push(self.state.chunk(
                            Delta {
                                content_blocks: Some(vec![BlockDelta {
                                    index: block_index,
                                    delta: payload,
                                }]),
                                ..Default::default()
                            },
                            None,
                            None,
                        ));
                    }
                }
            }
        }

        if let Some(usage) = frame.get("usage").filter(|u| u.is_object()) {
            let usage = converse_usage(usage, self.state.strict);
            chunks.push(self.state.final_chunk(Some(usage)));
        }

        Ok(chunks)
    }

    fn is_done(&self) -> bool {
        self.state.done
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }
}

// ============================================================
// Invoke streams (one framing per family)
// ============================================================

/// Translator for `/invoke-with-response-stream` chunks. Each frame is one
/// JSON object with family-specific fields; the final frame carries the
/// `amazon-bedrock-invocationMetrics` trailer.
pub struct InvokeTranslator {
    state: StreamState,
    family: ModelFamily,
}

impl InvokeTranslator {
    pub fn new(family: ModelFamily, model: &str, strict: bool) -> Result<Self, AppError> {
        match family {
            ModelFamily::TitanText
            | ModelFamily::CohereCommand
            | ModelFamily::Llama2
            | ModelFamily::Llama3
            | ModelFamily::Mistral
            | ModelFamily::Anthropic => Ok(Self {
                state: StreamState::new(model, strict),
                family,
            }),
            other => Err(AppError::unsupported(
                &format!("streaming for {} models", other.as_str()),
                "bedrock",
            )),
        }
    }

    fn text_and_stop(&self, frame: &Value) -> (Option<String>, Option<String>) {
        match self.family {
            ModelFamily::TitanText => (
                frame["outputText"].as_str().map(str::to_string),
                frame["completionReason"].as_str().map(str::to_string),
            ),
            ModelFamily::CohereCommand => (
                frame["text"].as_str().map(str::to_string),
                frame["finish_reason"].as_str().map(str::to_string),
            ),
            ModelFamily::Llama2 | ModelFamily::Llama3 => (
                frame["generation"].as_str().map(str::to_string),
                frame["stop_reason"].as_str().map(str::to_string),
            ),
            ModelFamily::Mistral => {
                let output = &frame["outputs"][0];
                (
                    output["text"].as_str().map(str::to_string),
                    output["stop_reason"].as_str().map(str::to_string),
                )
            }
            ModelFamily::Anthropic => (
                frame["delta"]["text"]
                    .as_str()
                    .or_else(|| frame["completion"].as_str())
                    .map(str::to_string),
                frame["delta"]["stop_reason"]
                    .as_str()
                    .or_else(|| frame["stop_reason"].as_str())
                    .map(str::to_string),
            ),
            _ => (None, None),
        }
    }
}

impl StreamTranslator for InvokeTranslator {
    fn on_frame(&mut self, frame: &Value) -> Result<Vec<ChatCompletionChunk>, AppError> {
        let mut chunks = Vec::new();
        let (text, stop) = self.text_and_stop(frame);

        if let Some(stop) = stop {
            self.state.stop_reason = Some(stop);
        }
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            chunks.push(self.state.chunk(
                Delta {
                    content: Some(text),
                    ..Default::default()
                },
                None,
                None,
            ));
        }

        if let Some(metrics) = frame.get(METRICS_TRAILER) {
            let prompt = metrics["inputTokenCount"].as_u64().unwrap_or(0);
            let completion = metrics["outputTokenCount"].as_u64().unwrap_or(0);
            let usage = Usage::from_counts(prompt, completion, None, None);
            chunks.push(self.state.final_chunk(Some(usage)));
        }

        Ok(chunks)
    }

    fn is_done(&self) -> bool {
        self.state.done
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }
}

// ============================================================
// NDJSON framing
// ============================================================

/// Buffers upstream bytes and yields complete newline-delimited frames.
#[derive(Default)]
pub struct NdjsonFramer {
    buf: Vec<u8>,
}

impl NdjsonFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        lines
    }

    /// Hand back whatever is buffered at end-of-stream.
    pub fn finish(&mut self) -> Option<String> {
        let tail = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        if tail.is_empty() {
            None
        } else {
            Some(tail)
        }
    }
}

// ============================================================
// SSE adapter
// ============================================================

/// Output wire shape for streamed responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseShape {
    ChatCompletion,
    TextCompletion,
}

fn chunk_event(chunk: &ChatCompletionChunk, shape: SseShape) -> Event {
    let payload = match shape {
        SseShape::ChatCompletion => serde_json::to_string(chunk),
        SseShape::TextCompletion => {
            let choice = chunk.choices.first();
            serde_json::to_string(&serde_json::json!({
                "id": chunk.id.replacen("chatcmpl-", "cmpl-", 1),
                "object": "text_completion",
                "created": chunk.created,
                "model": chunk.model,
                "choices": [{
                    "text": choice.and_then(|c| c.delta.content.clone()).unwrap_or_default(),
                    "index": 0,
                    "finish_reason": choice.and_then(|c| c.finish_reason.clone()),
                }],
                "usage": chunk.usage,
            }))
        }
    };
    Event::default().data(payload.unwrap_or_else(|_| "{}".to_string()))
}

struct SsePump {
    upstream: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    framer: NdjsonFramer,
    translator: Box<dyn StreamTranslator>,
    shape: SseShape,
    pending: VecDeque<Event>,
    finished: bool,
}

impl SsePump {
    fn enqueue_frame(&mut self, raw: &str) {
        match serde_json::from_str::<Value>(raw) {
            Ok(frame) => match self.translator.on_frame(&frame) {
                Ok(chunks) => {
                    for chunk in &chunks {
                        self.pending.push_back(chunk_event(chunk, self.shape));
                    }
                    if self.translator.is_done() {
                        self.pending.push_back(Event::default().data("[DONE]"));
                        self.finished = true;
                    }
                }
                Err(e) => self.close_with_error(&e.to_string()),
            },
            Err(e) => self.close_with_error(&format!("malformed stream frame: {}", e)),
        }
    }

    /// A malformed frame ends the stream in-band: one final chunk with
    /// `finish_reason:"error"`, then `[DONE]`. No further deltas.
    fn close_with_error(&mut self, message: &str) {
        tracing::error!(error = %message, "Stream translation failed");
        let state = self.translator.state_mut();
        state.stop_reason = Some("error".to_string());
        let chunk = state.final_chunk(None);
        self.pending.push_back(chunk_event(&chunk, self.shape));
        self.pending.push_back(Event::default().data("[DONE]"));
        self.finished = true;
    }

    fn close_at_eof(&mut self) {
        if !self.translator.is_done() {
            // Upstream ended without a usage frame; close with whatever stop
            // reason was recorded so the client still sees a terminator.
            let state = self.translator.state_mut();
            let chunk = state.final_chunk(None);
            self.pending.push_back(chunk_event(&chunk, self.shape));
        }
        self.pending.push_back(Event::default().data("[DONE]"));
        self.finished = true;
    }
}

/// Drive a provider response stream through a translator and emit SSE.
pub fn sse_response(
    response: reqwest::Response,
    translator: Box<dyn StreamTranslator>,
    shape: SseShape,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let pump = SsePump {
        upstream: Box::pin(response.bytes_stream()),
        framer: NdjsonFramer::new(),
        translator,
        shape,
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures::stream::unfold(pump, |mut pump| async move {
        loop {
            if let Some(event) = pump.pending.pop_front() {
                return Some((Ok(event), pump));
            }
            if pump.finished {
                return None;
            }

            match pump.upstream.next().await {
                Some(Ok(bytes)) => {
                    let lines = pump.framer.push(&bytes);
                    for line in lines {
                        if pump.finished {
                            break;
                        }
                        pump.enqueue_frame(&line);
                    }
                }
                Some(Err(e)) => {
                    pump.close_with_error(&format!("upstream read failed: {}", e));
                }
                None => {
                    if let Some(tail) = pump.framer.finish() {
                        pump.enqueue_frame(&tail);
                    }
                    if !pump.finished {
                        pump.close_at_eof();
                    }
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Feed a list of already-parsed frames through a translator.
/// Test/bridge helper mirroring the SSE path without the network.
pub fn translate_frames(
    translator: &mut dyn StreamTranslator,
    frames: &[Value],
) -> Result<Vec<ChatCompletionChunk>, AppError> {
    let mut chunks = Vec::new();
    for frame in frames {
        chunks.extend(translator.on_frame(frame)?);
        if translator.is_done() {
            break;
        }
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scenario_b_tool_call_stream() {
        let mut translator =
            ConverseTranslator::new("anthropic.claude-3-sonnet-20240229-v1:0", false);
        let frames = vec![
            json!({"start": {"toolUse": {"toolUseId": "t1", "name": "get_time"}}}),
            json!({"delta": {"toolUse": {"input": "{}"}}}),
            json!({"stopReason": "tool_use"}),
            json!({"usage": {"inputTokens": 10, "outputTokens": 3, "totalTokens": 13}}),
        ];

        let chunks = translate_frames(&mut translator, &frames).unwrap();
        assert_eq!(chunks.len(), 3);

        let start = chunks[0].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(start[0].index, 0);
        assert_eq!(start[0].id.as_deref(), Some("t1"));
        assert_eq!(start[0].tool_type.as_deref(), Some("function"));
        assert_eq!(
            start[0].function.as_ref().unwrap().name.as_deref(),
            Some("get_time")
        );
        assert_eq!(
            start[0].function.as_ref().unwrap().arguments.as_deref(),
            Some("")
        );
        assert!(chunks[0].choices[0].delta.content.is_none());

        let args = chunks[1].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(args[0].index, 0);
        assert_eq!(
            args[0].function.as_ref().unwrap().arguments.as_deref(),
            Some("{}")
        );

        let last = &chunks[2];
        assert!(last.choices[0].delta.content.is_none());
        assert!(last.choices[0].delta.tool_calls.is_none());
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("tool_use"));
        let usage = last.usage.as_ref().unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 3);
        assert_eq!(usage.total_tokens, 13);
        assert!(translator.is_done());
    }

    #[test]
    fn test_tool_index_monotonic_across_calls() {
        let mut translator = ConverseTranslator::new("m", false);
        let frames = vec![
            json!({"start": {"toolUse": {"toolUseId": "t1", "name": "a"}}}),
            json!({"delta": {"toolUse": {"input": "{\"x\""}}}),
            json!({"delta": {"toolUse": {"input": ":1}"}}}),
            json!({"start": {"toolUse": {"toolUseId": "t2", "name": "b"}}}),
            json!({"delta": {"toolUse": {"input": "{}"}}}),
            json!({"stopReason": "tool_use"}),
            json!({"usage": {"inputTokens": 1, "outputTokens": 1}}),
        ];
        let chunks = translate_frames(&mut translator, &frames).unwrap();

        let indices: Vec<u32> = chunks
            .iter()
            .flat_map(|c| c.choices[0].delta.tool_calls.iter().flatten())
            .map(|t| t.index)
            .collect();
        assert_eq!(indices, vec![0, 0, 0, 1, 1]);
        // Non-decreasing, starting at 0
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));

        // Partial argument fragments for index 0 reassemble into valid JSON
        let args: String = chunks
            .iter()
            .flat_map(|c| c.choices[0].delta.tool_calls.iter().flatten())
            .filter(|t| t.index == 0)
            .filter_map(|t| t.function.as_ref().and_then(|f| f.arguments.clone()))
            .collect();
        assert_eq!(
            serde_json::from_str::<Value>(&args).unwrap(),
            json!({"x": 1})
        );
    }

    #[test]
    fn test_text_delta_with_content_blocks() {
        let mut translator = ConverseTranslator::new("m", false);
        let chunks = translator
            .on_frame(&json!({"contentBlockIndex": 0, "delta": {"text": "Hel"}}))
            .unwrap();
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hel"));
        let blocks = chunks[0].choices[0].delta.content_blocks.as_ref().unwrap();
        assert_eq!(blocks[0].index, 0);
        assert_eq!(blocks[0].delta.text.as_deref(), Some("Hel"));
    }

    #[test]
    fn test_strict_mode_suppresses_content_blocks_and_reasoning() {
        let mut translator = ConverseTranslator::new("m", true);
        let chunks = translator
            .on_frame(&json!({"delta": {"text": "Hi"}}))
            .unwrap();
        assert!(chunks[0].choices[0].delta.content_blocks.is_none());

        let reasoning = translator
            .on_frame(&json!({"delta": {"reasoningContent": {"text": "thinking…"}}}))
            .unwrap();
        assert!(reasoning.is_empty());
    }

    #[test]
    fn test_reasoning_deltas_emitted_when_not_strict() {
        let mut translator = ConverseTranslator::new("m", false);
        let chunks = translator
            .on_frame(&json!({"contentBlockIndex": 1, "delta": {"reasoningContent": {"text": "hmm"}}}))
            .unwrap();
        let blocks = chunks[0].choices[0].delta.content_blocks.as_ref().unwrap();
        assert_eq!(blocks[0].index, 1);
        assert_eq!(blocks[0].delta.thinking.as_deref(), Some("hmm"));
        assert!(chunks[0].choices[0].delta.content.is_none());

        let redacted = translator
            .on_frame(&json!({"delta": {"reasoningContent": {"redactedContent": "AAAA"}}}))
            .unwrap();
        let blocks = redacted[0].choices[0].delta.content_blocks.as_ref().unwrap();
        assert_eq!(blocks[0].delta.data.as_deref(), Some("AAAA"));
    }

    #[test]
    fn test_stream_content_reassembles_to_unary_content() {
        let mut translator = ConverseTranslator::new("m", false);
        let frames = vec![
            json!({"delta": {"text": "Hel"}}),
            json!({"delta": {"text": "lo."}}),
            json!({"stopReason": "end_turn"}),
            json!({"usage": {"inputTokens": 7, "outputTokens": 2}}),
        ];
        let chunks = translate_frames(&mut translator, &frames).unwrap();

        let content: String = chunks
            .iter()
            .filter_map(|c| c.choices[0].delta.content.clone())
            .collect();
        assert_eq!(content, "Hello.");
        assert_eq!(
            chunks.last().unwrap().choices[0].finish_reason.as_deref(),
            Some("end_turn")
        );
    }

    #[test]
    fn test_usage_cache_tokens_on_final_chunk() {
        let mut translator = ConverseTranslator::new("m", false);
        let chunks = translator
            .on_frame(&json!({"usage": {
                "inputTokens": 10,
                "outputTokens": 2,
                "cacheReadInputTokens": 4
            }}))
            .unwrap();
        let usage = chunks[0].usage.as_ref().unwrap();
        assert_eq!(usage.cache_read_input_tokens, Some(4));
        assert_eq!(usage.total_tokens, 16);
    }

    #[test]
    fn test_tool_input_before_start_is_stream_error() {
        let mut translator = ConverseTranslator::new("m", false);
        let err = translator
            .on_frame(&json!({"delta": {"toolUse": {"input": "{}"}}}))
            .unwrap_err();
        assert!(matches!(err, AppError::Stream(_)));
    }

    #[test]
    fn test_titan_invoke_stream() {
        let mut translator =
            InvokeTranslator::new(ModelFamily::TitanText, "amazon.titan-text-express-v1", false)
                .unwrap();
        let frames = vec![
            json!({"outputText": "Hello", "completionReason": null}),
            json!({
                "outputText": ".",
                "completionReason": "FINISH",
                "amazon-bedrock-invocationMetrics": {"inputTokenCount": 5, "outputTokenCount": 2}
            }),
        ];
        let chunks = translate_frames(&mut translator, &frames).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hello"));
        let last = chunks.last().unwrap();
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("FINISH"));
        assert_eq!(last.usage.as_ref().unwrap().total_tokens, 7);
    }

    #[test]
    fn test_mistral_invoke_stream() {
        let mut translator = InvokeTranslator::new(
            ModelFamily::Mistral,
            "mistral.mistral-7b-instruct-v0:2",
            false,
        )
        .unwrap();
        let frames = vec![
            json!({"outputs": [{"text": "Hi", "stop_reason": null}]}),
            json!({
                "outputs": [{"text": "", "stop_reason": "stop"}],
                "amazon-bedrock-invocationMetrics": {"inputTokenCount": 3, "outputTokenCount": 1}
            }),
        ];
        let chunks = translate_frames(&mut translator, &frames).unwrap();
        let last = chunks.last().unwrap();
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(last.usage.as_ref().unwrap().prompt_tokens, 3);
    }

    #[test]
    fn test_ndjson_framer_reassembles_split_lines() {
        let mut framer = NdjsonFramer::new();
        assert!(framer.push(b"{\"a\":").is_empty());
        let lines = framer.push(b"1}\n{\"b\":2}\n{\"c\"");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(framer.finish().as_deref(), Some("{\"c\""));
        assert!(framer.finish().is_none());
    }

    #[test]
    fn test_text_completion_shape_event() {
        let state = StreamState::new("cohere.command-text-v14", false);
        let chunk = state.chunk(
            Delta {
                content: Some("hi".to_string()),
                ..Default::default()
            },
            None,
            None,
        );
        let event = chunk_event(&chunk, SseShape::TextCompletion);
        let rendered = format!("{:?}", event);
        assert!(rendered.contains("text_completion"));
    }
}
