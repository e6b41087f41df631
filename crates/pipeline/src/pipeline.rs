//! Orchestrates one inbound request through every stage in order: routing,
//! schema repair and tool filtering, system-message rewriting, tool-necessity
//! classification, forward translation, the upstream call (streaming or not,
//! with failover), channel parsing, tool-call correction, and backward
//! translation. Loop detection runs first and can short-circuit the whole
//! chain without ever reaching upstream.
//!
//! Generalized from the teacher's deleted `LlmServerInner` request-handling
//! body: that type dispatched across several provider backends picked at
//! request time; here there is exactly one fixed chain, so the dispatch
//! collapses into a single straight-line function.

use std::sync::atomic::{AtomicU64, Ordering};

use config::Config;

use crate::{
    channel::{self, ChannelHistory},
    classifier,
    corrector::{self, CorrectionContext, CorrectionOutcome},
    error::PipelineResult,
    health::HealthManager,
    loop_detector,
    messages::{anthropic, openai, unified},
    router, schema_repair, streaming, system_message, tool_filter, upstream,
};

/// Shared, process-wide state threaded into every request.
#[derive(Default)]
pub struct PipelineState {
    /// Per-endpoint circuit breaker and round-robin cursors.
    pub health: HealthManager,
    /// Total requests handled since process start.
    pub requests_total: AtomicU64,
    /// Upstream calls that exhausted failover across every endpoint in a pool.
    pub upstream_failures_total: AtomicU64,
    /// Responses whose tool calls were run through the corrector.
    pub corrections_total: AtomicU64,
    /// Requests short-circuited by the loop detector before reaching upstream.
    pub loop_detections_total: AtomicU64,
}

impl PipelineState {
    /// A fresh, zeroed state for a new process.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Run the full pipeline for one inbound Anthropic Messages request.
pub async fn handle(state: &PipelineState, config: &Config, mut request: anthropic::AnthropicChatRequest) -> PipelineResult<anthropic::AnthropicChatResponse> {
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    if config.print_system_message {
        if let Some(system) = &request.system {
            log::info!("inbound system message: {}", system.clone().into_text());
        }
    }

    let loop_detection = loop_detector::detect(&request.messages);
    if loop_detection.has_loop() {
        state.loop_detections_total.fetch_add(1, Ordering::Relaxed);
        let text = loop_detection
            .recommendation()
            .unwrap_or_else(|| "This conversation appears to be stuck in a loop.".to_string());
        log::warn!("loop detected ({:?}), short-circuiting without calling upstream: {text}", loop_detection.kind);
        return Ok(synthesized_text_response(&request.model, text));
    }

    let resolved = router::route(config, &request.model);
    let pool_key = resolved.pool_key;
    let endpoints = resolved.endpoints.to_vec();
    let api_key = resolved.api_key.clone();
    let target_model = resolved.target_model.to_string();

    if let Some(tools) = request.tools.take() {
        let tools = schema_repair::repair_tools(tools, config.harmony.strict_mode)?;
        let tools = tool_filter::apply(tools, &config.skip_tools, &config.overrides.tool_descriptions);

        if config.print_tool_schemas {
            for tool in &tools {
                log::debug!("tool schema: {} -> {}", tool.name, tool.input_schema);
            }
        }

        request.tools = Some(tools);
    }

    if let Some(system) = request.system.take() {
        let text = system_message::rewrite(&system.into_text(), &config.overrides.system_message);
        request.system = Some(anthropic::AnthropicSystem::Text(text));
    }

    let decision = classifier::classify(&request.messages);
    if decision.require_tools && request.tools.as_ref().is_some_and(|t| !t.is_empty()) {
        let currently_auto = matches!(request.tool_choice, None | Some(anthropic::AnthropicToolChoice::Auto));
        if currently_auto {
            log::debug!("tool-necessity classifier forced tool_choice=any: {}", decision.reason);
            request.tool_choice = Some(anthropic::AnthropicToolChoice::Any);
        }
    }

    let recent_assistant_tool_names = recent_assistant_tool_names(&request.messages);
    let channel_history = if config.harmony.parsing_enabled {
        build_channel_history(&request.messages, config.harmony.debug)
    } else {
        ChannelHistory::new()
    };
    let want_stream = request.stream.unwrap_or(false);

    request.model = target_model;

    let unified_tools: Vec<unified::UnifiedTool> = request
        .tools
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|tool| unified::UnifiedTool {
            function: unified::UnifiedFunction {
                name: tool.name,
                description: tool.description,
                parameters: tool.input_schema,
                strict: None,
            },
        })
        .collect();

    let mut unified_request = unified::UnifiedRequest::from(request);
    if let Some(preserved) = channel_history.preserved_content() {
        unified_request.system = Some(match unified_request.system {
            Some(system) => format!("{system}\n\n{preserved}"),
            None => preserved,
        });
    }

    let openai_request = openai::ChatCompletionRequest::from(unified_request);

    let openai_response = if want_stream {
        let chunks = upstream::call_streaming_with_failover(
            pool_key,
            &endpoints,
            &api_key,
            &state.health,
            &config.circuit_breaker,
            &openai_request,
            upstream::DEFAULT_TIMEOUT,
        )
        .await;

        let chunks = match chunks {
            Ok(chunks) => chunks,
            Err(error) => {
                state.upstream_failures_total.fetch_add(1, Ordering::Relaxed);
                return Err(error);
            }
        };

        streaming::reassemble(Box::pin(chunks)).await?
    } else {
        let result = upstream::call_with_failover(
            pool_key,
            &endpoints,
            &api_key,
            &state.health,
            &config.circuit_breaker,
            &openai_request,
            upstream::DEFAULT_TIMEOUT,
        )
        .await;

        match result {
            Ok(response) => response,
            Err(error) => {
                state.upstream_failures_total.fetch_add(1, Ordering::Relaxed);
                return Err(error);
            }
        }
    };

    let mut unified_response = unified::UnifiedResponse::from(openai_response);

    if let Some(choice) = unified_response.choices.first_mut() {
        if config.harmony.parsing_enabled {
            if let unified::UnifiedContentContainer::Text(text) = &choice.message.content {
                let parsed = channel::parse(text);
                if parsed.has_harmony {
                    if config.harmony.debug {
                        log::debug!("channel parser: {} segment(s) in response body", parsed.segments.len());
                    }
                    choice.message.content = unified::UnifiedContentContainer::Text(parsed.response_text);
                }
            }
        }

        let tool_calls = choice.message.tool_calls.take().unwrap_or_default();
        if !tool_calls.is_empty() {
            state.corrections_total.fetch_add(1, Ordering::Relaxed);
            let correction_model = &config.correction_model;
            let ctx = CorrectionContext::new(&unified_tools, &state.health, correction_model, &config.circuit_breaker, &recent_assistant_tool_names);

            match corrector::correct(tool_calls, &ctx).await {
                CorrectionOutcome::ToolCalls(calls) => {
                    choice.message.tool_calls = if calls.is_empty() { None } else { Some(calls) };
                }
                CorrectionOutcome::ReplaceWithText(text) => {
                    choice.message.tool_calls = None;
                    choice.message.content = unified::UnifiedContentContainer::Text(text);
                    choice.finish_reason = Some(unified::UnifiedFinishReason::Stop);
                    unified_response.stop_reason = Some(unified::UnifiedStopReason::EndTurn);
                }
            }
        }
    }

    Ok(anthropic::AnthropicChatResponse::from(unified_response))
}

fn recent_assistant_tool_names(messages: &[anthropic::AnthropicMessage]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.role == anthropic::AnthropicRole::Assistant)
        .flat_map(|m| {
            m.content.iter().filter_map(|block| match block {
                anthropic::AnthropicContent::ToolUse { name, .. } => Some(name.clone()),
                _ => None,
            })
        })
        .collect()
}

/// Replay the inbound conversation's assistant turns through the channel
/// parser to reconstruct carry-forward state. No history is stored
/// server-side between requests; each request rebuilds it from the
/// conversation the client resent.
fn build_channel_history(messages: &[anthropic::AnthropicMessage], debug: bool) -> ChannelHistory {
    let mut history = ChannelHistory::new();

    for (index, message) in messages.iter().enumerate() {
        if message.role != anthropic::AnthropicRole::Assistant {
            continue;
        }

        let had_tool_use = message.content.iter().any(|b| matches!(b, anthropic::AnthropicContent::ToolUse { .. }));

        for block in &message.content {
            if let anthropic::AnthropicContent::Text { text } = block {
                let parsed = channel::parse(text);
                if parsed.has_harmony {
                    if debug {
                        log::debug!("channel history: observing message {index} ({} segment(s))", parsed.segments.len());
                    }
                    history.observe(index, &parsed, had_tool_use);
                }
            }
        }
    }

    history.truncate(messages.len());
    history
}

fn synthesized_text_response(model: &str, text: String) -> anthropic::AnthropicChatResponse {
    anthropic::AnthropicChatResponse {
        id: format!("msg_{}", uuid::Uuid::new_v4()),
        r#type: "message".to_string(),
        role: anthropic::AnthropicRole::Assistant,
        content: vec![anthropic::AnthropicContent::Text { text }],
        model: model.to_string(),
        stop_reason: Some(anthropic::AnthropicStopReason::EndTurn),
        stop_sequence: None,
        usage: anthropic::AnthropicUsage {
            input_tokens: 0,
            output_tokens: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn test_config() -> Config {
        Config {
            big_model: config::ModelEndpointConfig {
                model: "gpt-4o".to_string(),
                endpoints: vec!["http://big".to_string()],
                api_key: SecretString::from("big-key".to_string()),
            },
            small_model: config::ModelEndpointConfig {
                model: "gpt-4o-mini".to_string(),
                endpoints: vec!["http://small".to_string()],
                api_key: SecretString::from("small-key".to_string()),
            },
            correction_model: config::ModelEndpointConfig {
                model: "gpt-4o-mini".to_string(),
                endpoints: vec![],
                api_key: SecretString::from("unused".to_string()),
            },
            ..Default::default()
        }
    }

    fn simple_request() -> anthropic::AnthropicChatRequest {
        anthropic::AnthropicChatRequest {
            model: "claude-3-5-sonnet".to_string(),
            messages: vec![anthropic::AnthropicMessage {
                role: anthropic::AnthropicRole::User,
                content: vec![anthropic::AnthropicContent::Text {
                    text: "hello".to_string(),
                }],
            }],
            max_tokens: 1024,
            system: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: Some(false),
            metadata: None,
            tools: None,
            tool_choice: None,
        }
    }

    #[tokio::test]
    async fn loop_detection_short_circuits_without_calling_upstream() {
        let state = PipelineState::new();
        let config = test_config();

        let mut request = simple_request();
        let repeated = serde_json::json!({ "command": "ls" });
        for _ in 0..3 {
            request.messages.push(anthropic::AnthropicMessage {
                role: anthropic::AnthropicRole::Assistant,
                content: vec![anthropic::AnthropicContent::ToolUse {
                    id: "toolu_1".to_string(),
                    name: "Bash".to_string(),
                    input: repeated.clone(),
                }],
            });
        }

        let response = handle(&state, &config, request).await.unwrap();

        assert_eq!(state.loop_detections_total.load(Ordering::Relaxed), 1);
        let anthropic::AnthropicContent::Text { text } = &response.content[0] else {
            panic!("expected text content");
        };
        assert!(text.contains("Bash"));
    }
}
