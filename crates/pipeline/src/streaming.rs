//! Streaming Reassembler: buffers a stream of [`openai::ChatCompletionChunk`]s
//! into one complete [`openai::ChatCompletionResponse`].
//!
//! The channel parser and tool-call corrector both need the complete
//! assistant turn to do their work — channel tags can straddle chunk
//! boundaries, and a tool call can't be schema-checked until its arguments
//! have fully arrived. So despite the backend speaking SSE, this proxy does
//! not forward partial text to the client; it reassembles first, runs the
//! correction pipeline over the whole response, and only then re-emits it
//! (in one shot, or re-chunked for its own SSE response to the client).
//!
//! This means a slow-to-finish backend stream is a slow-to-start client
//! stream rather than a trickle — a deliberate tradeoff, recorded in
//! `DESIGN.md`, in exchange for actually being able to run the correction
//! pipeline at all.

use std::collections::BTreeMap;

use futures::{Stream, StreamExt};

use crate::{
    error::{PipelineError, PipelineResult},
    messages::openai::{self, ChatChoice, ChatCompletionResponse, ChatMessage, ChatRole, FinishReason, ObjectType, ToolCall, ToolCallType, Usage},
};

/// Per-tool-call accumulator, indexed by the backend's streaming `index`.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates one choice's delta stream (text plus any tool calls) across
/// however many chunks it takes to complete.
#[derive(Debug, Default)]
struct ChoiceAccumulator {
    role: Option<ChatRole>,
    content: String,
    has_content: bool,
    tool_calls: BTreeMap<usize, ToolCallAccumulator>,
    finish_reason: Option<FinishReason>,
}

/// Reassembles a chunk stream into a complete response. On a clean finish
/// (an explicit `finish_reason` on every open choice) the reassembled
/// response carries that reason; on upstream disconnect mid-stream, per the
/// documented failure-semantics table, the reassembler synthesizes a
/// `finish_reason: Length` rather than silently truncating.
pub async fn reassemble(
    mut chunks: impl Stream<Item = PipelineResult<openai::ChatCompletionChunk>> + Unpin,
) -> PipelineResult<ChatCompletionResponse> {
    let mut id = String::new();
    let mut model = String::new();
    let mut created = 0u64;
    let mut usage = None;
    let mut choices: BTreeMap<u32, ChoiceAccumulator> = BTreeMap::new();
    let mut saw_any_chunk = false;
    let mut disconnected = false;

    loop {
        match chunks.next().await {
            Some(Ok(chunk)) => {
                saw_any_chunk = true;
                if id.is_empty() {
                    id = chunk.id;
                }
                if model.is_empty() {
                    model = chunk.model;
                }
                if created == 0 {
                    created = chunk.created;
                }
                if let Some(chunk_usage) = chunk.usage {
                    usage = Some(chunk_usage);
                }

                for delta in chunk.choices {
                    let acc = choices.entry(delta.index).or_default();

                    if let Some(role) = delta.delta.role {
                        acc.role = Some(role);
                    }
                    if let Some(content) = delta.delta.content {
                        acc.content.push_str(&content);
                        acc.has_content = true;
                    }
                    if let Some(tool_calls) = delta.delta.tool_calls {
                        for tool_call in tool_calls {
                            apply_tool_call_delta(acc, tool_call);
                        }
                    }
                    if let Some(finish_reason) = delta.finish_reason {
                        acc.finish_reason = Some(finish_reason);
                    }
                }
            }
            Some(Err(e)) => {
                log::warn!("upstream stream errored mid-response: {e}");
                disconnected = true;
                break;
            }
            None => break,
        }
    }

    if !saw_any_chunk {
        return Err(PipelineError::Upstream {
            status: 0,
            message: "upstream stream closed before sending any chunks".to_string(),
        });
    }

    let response_choices = choices
        .into_iter()
        .map(|(index, acc)| {
            let tool_calls = if acc.tool_calls.is_empty() {
                None
            } else {
                Some(
                    acc.tool_calls
                        .into_values()
                        .map(|t| ToolCall {
                            id: t.id,
                            tool_type: ToolCallType::Function,
                            function: openai::FunctionCall {
                                name: t.name,
                                arguments: t.arguments,
                            },
                        })
                        .collect(),
                )
            };

            let finish_reason = acc.finish_reason.unwrap_or_else(|| {
                if disconnected {
                    FinishReason::Length
                } else if tool_calls.is_some() {
                    FinishReason::ToolCalls
                } else {
                    FinishReason::Stop
                }
            });

            ChatChoice {
                index,
                message: ChatMessage {
                    role: acc.role.unwrap_or(ChatRole::Assistant),
                    content: acc.has_content.then_some(acc.content),
                    tool_calls,
                    tool_call_id: None,
                },
                finish_reason,
            }
        })
        .collect();

    Ok(ChatCompletionResponse {
        id,
        object: ObjectType::ChatCompletion,
        created,
        model,
        choices: response_choices,
        usage: usage.unwrap_or(Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }),
    })
}

fn apply_tool_call_delta(acc: &mut ChoiceAccumulator, tool_call: openai::StreamingToolCall) {
    match tool_call {
        openai::StreamingToolCall::Start { index, id, function, .. } => {
            let entry = acc.tool_calls.entry(index).or_default();
            entry.id = id;
            entry.name = function.name;
            entry.arguments.push_str(&function.arguments);
        }
        openai::StreamingToolCall::Delta { index, function } => {
            let entry = acc.tool_calls.entry(index).or_default();
            entry.arguments.push_str(&function.arguments);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::openai::{ChatChoiceDelta, ChatCompletionChunk, ChatMessageDelta, FunctionDelta, FunctionStart};
    use futures::stream;

    fn chunk(index: u32, delta: ChatMessageDelta, finish_reason: Option<FinishReason>) -> PipelineResult<ChatCompletionChunk> {
        Ok(ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            object: ObjectType::ChatCompletionChunk,
            created: 1,
            model: "test-model".to_string(),
            system_fingerprint: None,
            choices: vec![ChatChoiceDelta {
                index,
                logprobs: None,
                delta,
                finish_reason,
            }],
            usage: None,
        })
    }

    #[tokio::test]
    async fn reassembles_text_deltas_into_complete_message() {
        let chunks = vec![
            chunk(
                0,
                ChatMessageDelta {
                    role: Some(ChatRole::Assistant),
                    content: Some("Hel".to_string()),
                    ..Default::default()
                },
                None,
            ),
            chunk(
                0,
                ChatMessageDelta {
                    content: Some("lo".to_string()),
                    ..Default::default()
                },
                Some(FinishReason::Stop),
            ),
        ];

        let response = reassemble(stream::iter(chunks)).await.unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hello"));
        assert_eq!(response.choices[0].finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn reassembles_tool_call_arguments_split_across_chunks() {
        let chunks = vec![
            chunk(
                0,
                ChatMessageDelta {
                    role: Some(ChatRole::Assistant),
                    tool_calls: Some(vec![openai::StreamingToolCall::Start {
                        index: 0,
                        id: "call_1".to_string(),
                        r#type: ToolCallType::Function,
                        function: FunctionStart {
                            name: "Read".to_string(),
                            arguments: "{\"file_".to_string(),
                        },
                    }]),
                    ..Default::default()
                },
                None,
            ),
            chunk(
                0,
                ChatMessageDelta {
                    tool_calls: Some(vec![openai::StreamingToolCall::Delta {
                        index: 0,
                        function: FunctionDelta {
                            arguments: "path\":\"a.rs\"}".to_string(),
                        },
                    }]),
                    ..Default::default()
                },
                Some(FinishReason::ToolCalls),
            ),
        ];

        let response = reassemble(stream::iter(chunks)).await.unwrap();
        let tool_calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(tool_calls[0].function.name, "Read");
        assert_eq!(tool_calls[0].function.arguments, "{\"file_path\":\"a.rs\"}");
    }

    #[tokio::test]
    async fn disconnect_mid_stream_synthesizes_length_finish_reason() {
        let chunks = vec![
            chunk(
                0,
                ChatMessageDelta {
                    role: Some(ChatRole::Assistant),
                    content: Some("partial".to_string()),
                    ..Default::default()
                },
                None,
            ),
            Err(PipelineError::Upstream {
                status: 0,
                message: "connection reset".to_string(),
            }),
        ];

        let response = reassemble(stream::iter(chunks)).await.unwrap();
        assert_eq!(response.choices[0].finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn empty_stream_is_an_error() {
        let chunks: Vec<PipelineResult<ChatCompletionChunk>> = vec![];
        assert!(reassemble(stream::iter(chunks)).await.is_err());
    }
}
