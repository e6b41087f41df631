//! Tool-Call Corrector: repairs malformed tool calls the backend emits
//! before they reach the client, in three escalating tiers — cheap semantic
//! rewrites, structural validators, and, only if those don't resolve it, one
//! LLM-assisted correction call per configured endpoint.
//!
//! A tool call that already satisfies its schema is returned untouched and
//! never triggers a network call — correction is corrective, not a second
//! opinion on every response.

use std::time::Duration;

use config::{CircuitBreakerConfig, ModelEndpointConfig};
use serde_json::Value;

use crate::{
    health::HealthManager,
    messages::{
        openai,
        unified::{UnifiedArguments, UnifiedFunctionCall, UnifiedTool, UnifiedToolCall},
    },
    upstream,
};

/// Parameter-name typos this proxy has seen backends make, mapped to the
/// name the tool actually expects.
const PARAMETER_TYPOS: &[(&str, &str)] = &[("filename", "file_path"), ("cmd", "command"), ("directory", "path"), ("query_string", "query")];

/// Case/spelling typos in tool names themselves.
const NAME_TYPOS: &[(&str, &str)] = &[
    ("read", "Read"),
    ("write", "Write"),
    ("edit", "Edit"),
    ("bash", "Bash"),
    ("grep", "Grep"),
    ("glob", "Glob"),
    ("websearch", "WebSearch"),
    ("webfetch", "WebFetch"),
    ("task", "Task"),
    ("todowrite", "TodoWrite"),
    ("exitplanmode", "ExitPlanMode"),
];

const COMPLETION_MARKERS: &[&str] = &["completed", "all tasks completed", "successfully", "finished", "done implementing", "already implemented"];

/// Tools whose recent use signals the plan has likely already been executed.
const IMPLEMENTATION_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "Bash"];

/// Everything the corrector needs beyond the tool call itself: the schemas
/// available this turn, the health-guarded correction pool, and enough
/// recent history to run the `ExitPlanMode` misuse guard.
pub struct CorrectionContext<'a> {
    pub tools: &'a [UnifiedTool],
    pub health: &'a HealthManager,
    pub correction_model: &'a ModelEndpointConfig,
    pub circuit_breaker: &'a CircuitBreakerConfig,
    pub recent_assistant_tool_names: &'a [String],
    pub attempt_timeout: Duration,
}

impl<'a> CorrectionContext<'a> {
    pub fn new(
        tools: &'a [UnifiedTool],
        health: &'a HealthManager,
        correction_model: &'a ModelEndpointConfig,
        circuit_breaker: &'a CircuitBreakerConfig,
        recent_assistant_tool_names: &'a [String],
    ) -> Self {
        Self {
            tools,
            health,
            correction_model,
            circuit_breaker,
            recent_assistant_tool_names,
            attempt_timeout: upstream::DEFAULT_TIMEOUT,
        }
    }
}

/// Result of running the corrector over one assistant turn's tool calls.
pub enum CorrectionOutcome {
    /// Tool calls to forward, corrected where needed.
    ToolCalls(Vec<UnifiedToolCall>),
    /// `ExitPlanMode` misuse was detected: replace the turn with this
    /// educational text instead of forwarding any tool call.
    ReplaceWithText(String),
}

fn arguments_as_value(arguments: &UnifiedArguments) -> Value {
    match arguments {
        UnifiedArguments::Value(value) => value.clone(),
        UnifiedArguments::String(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
    }
}

fn schema_violation(call: &UnifiedToolCall, tools: &[UnifiedTool]) -> Option<String> {
    let Some(tool) = tools.iter().find(|t| t.function.name == call.function.name) else {
        return Some(format!("no known tool named '{}'", call.function.name));
    };

    let value = arguments_as_value(&call.function.arguments);
    let Some(obj) = value.as_object() else {
        return Some("arguments did not parse as a JSON object".to_string());
    };

    if let Some(required) = tool.function.parameters.get("required").and_then(Value::as_array) {
        for name in required {
            if let Some(key) = name.as_str() {
                if !obj.contains_key(key) {
                    return Some(format!("missing required property '{key}'"));
                }
            }
        }
    }

    None
}

/// `WebFetch{url="file://PATH"}` is really a `Read` call in disguise —
/// backends that don't have a native file-read tool sometimes reach for
/// `file://` URLs through whatever fetch tool they do have.
fn fix_file_url_webfetch(mut call: UnifiedToolCall) -> UnifiedToolCall {
    if !call.function.name.eq_ignore_ascii_case("WebFetch") {
        return call;
    }

    let value = arguments_as_value(&call.function.arguments);
    let Some(url) = value.get("url").and_then(Value::as_str) else {
        return call;
    };
    let Some(path) = url.strip_prefix("file://") else {
        return call;
    };

    call.function.name = "Read".to_string();
    call.function.arguments = UnifiedArguments::Value(serde_json::json!({ "file_path": path }));
    call
}

fn fix_name_typo(mut call: UnifiedToolCall) -> UnifiedToolCall {
    let normalized = call.function.name.to_ascii_lowercase().replace(['-', ' '], "");
    if let Some((_, canonical)) = NAME_TYPOS.iter().find(|(typo, _)| *typo == normalized) {
        if call.function.name != *canonical {
            call.function.name = canonical.to_string();
        }
    }
    call
}

fn fix_parameter_typos(mut call: UnifiedToolCall) -> UnifiedToolCall {
    let mut value = arguments_as_value(&call.function.arguments);
    let Some(obj) = value.as_object_mut() else {
        return call;
    };

    for (wrong, right) in PARAMETER_TYPOS {
        if obj.contains_key(*wrong) && !obj.contains_key(*right) {
            if let Some(v) = obj.remove(*wrong) {
                obj.insert((*right).to_string(), v);
            }
        }
    }

    call.function.arguments = UnifiedArguments::Value(value);
    call
}

/// A slash-command invocation (`/review-pr 123`) handed to an arbitrary tool
/// isn't a tool call at all; it's meant for the `Task` tool's `prompt` field.
fn lift_slash_command(mut call: UnifiedToolCall) -> UnifiedToolCall {
    let value = arguments_as_value(&call.function.arguments);

    let command_text = value
        .get("command")
        .and_then(Value::as_str)
        .or_else(|| value.as_str())
        .filter(|s| s.trim_start().starts_with('/'));

    let Some(command_text) = command_text else {
        return call;
    };

    let description = command_text.split_whitespace().next().unwrap_or("command").trim_start_matches('/').to_string();

    call.function.name = "Task".to_string();
    call.function.arguments = UnifiedArguments::Value(serde_json::json!({
        "description": description,
        "prompt": command_text,
    }));
    call
}

fn apply_semantic_fixes(call: UnifiedToolCall) -> UnifiedToolCall {
    let call = fix_name_typo(call);
    let call = fix_file_url_webfetch(call);
    let call = fix_parameter_typos(call);
    lift_slash_command(call)
}

/// Tool-specific structural checks that go beyond "is this valid JSON with
/// the required keys": shapes that are syntactically fine per the generic
/// schema check but semantically broken for this particular tool.
fn apply_structural_fixes(mut call: UnifiedToolCall) -> UnifiedToolCall {
    if call.function.name == "TodoWrite" {
        let mut value = arguments_as_value(&call.function.arguments);
        if let Some(obj) = value.as_object_mut() {
            if let Some(todos) = obj.get("todos") {
                if !todos.is_array() {
                    // A single todo sent bare instead of wrapped in a list.
                    let wrapped = Value::Array(vec![todos.clone()]);
                    obj.insert("todos".to_string(), wrapped);
                }
            }
        }
        call.function.arguments = UnifiedArguments::Value(value);
    }

    call
}

fn exit_plan_mode_guard(call: &UnifiedToolCall, ctx: &CorrectionContext<'_>) -> Option<String> {
    if call.function.name != "ExitPlanMode" {
        return None;
    }

    let value = arguments_as_value(&call.function.arguments);
    let plan_text = value.get("plan").and_then(Value::as_str).unwrap_or_default().to_ascii_lowercase();

    let has_completion_marker = COMPLETION_MARKERS.iter().any(|marker| plan_text.contains(marker));
    let recent_has_implementation_call = ctx
        .recent_assistant_tool_names
        .iter()
        .rev()
        .take(3)
        .any(|name| IMPLEMENTATION_TOOLS.iter().any(|t| t.eq_ignore_ascii_case(name)));

    if has_completion_marker && recent_has_implementation_call {
        Some(
            "It looks like this plan describes work that has already been carried out rather than work still to \
             be approved. If the task is done, just summarize what changed; `ExitPlanMode` is for proposing a plan \
             before acting on it, not for reporting on one already executed."
                .to_string(),
        )
    } else {
        None
    }
}

/// One correction attempt via the LLM-assisted fallback: ask the correction
/// model pool to produce fixed arguments for `call`, given the reason its
/// schema check failed. Falls back to the original call, unchanged, if every
/// endpoint in the pool fails or the response can't be parsed as JSON.
async fn llm_fallback(call: UnifiedToolCall, reason: &str, ctx: &CorrectionContext<'_>) -> UnifiedToolCall {
    let prompt = format!(
        "A tool call failed validation: {reason}.\n\
         Tool: {}\n\
         Arguments: {}\n\
         Return corrected arguments as a single JSON object, nothing else.",
        call.function.name,
        arguments_as_value(&call.function.arguments),
    );

    let request = openai::ChatCompletionRequest {
        model: ctx.correction_model.model.clone(),
        messages: vec![openai::ChatMessage {
            role: openai::ChatRole::User,
            content: Some(prompt),
            tool_calls: None,
            tool_call_id: None,
        }],
        temperature: Some(0.0),
        max_tokens: Some(512),
        top_p: None,
        frequency_penalty: None,
        presence_penalty: None,
        stop: None,
        stream: Some(false),
        tools: None,
        tool_choice: None,
        parallel_tool_calls: None,
    };

    let result = upstream::call_with_failover(
        "correction",
        &ctx.correction_model.endpoints,
        &ctx.correction_model.api_key,
        ctx.health,
        ctx.circuit_breaker,
        &request,
        ctx.attempt_timeout,
    )
    .await;

    match result {
        Ok(response) => {
            let Some(content) = response.choices.first().and_then(|c| c.message.content.as_deref()) else {
                log::warn!("correction endpoint returned no content for tool '{}'; keeping original call", call.function.name);
                return call;
            };

            match serde_json::from_str::<Value>(content.trim()) {
                Ok(fixed_arguments) => UnifiedToolCall {
                    function: UnifiedFunctionCall {
                        arguments: UnifiedArguments::Value(fixed_arguments),
                        ..call.function
                    },
                    ..call
                },
                Err(e) => {
                    log::warn!("correction endpoint response for tool '{}' wasn't valid JSON: {e}", call.function.name);
                    call
                }
            }
        }
        Err(error) => {
            log::warn!("correction endpoint pool exhausted for tool '{}': {error}", call.function.name);
            call
        }
    }
}

fn correction_endpoints_configured(endpoints: &[String]) -> bool {
    !endpoints.is_empty()
}

/// Correct one assistant turn's tool calls. An empty `tool_calls` returns
/// immediately with no work done, per the pre-validation skip.
pub async fn correct(tool_calls: Vec<UnifiedToolCall>, ctx: &CorrectionContext<'_>) -> CorrectionOutcome {
    if tool_calls.is_empty() {
        return CorrectionOutcome::ToolCalls(tool_calls);
    }

    let mut corrected = Vec::with_capacity(tool_calls.len());

    for call in tool_calls {
        if let Some(text) = exit_plan_mode_guard(&call, ctx) {
            return CorrectionOutcome::ReplaceWithText(text);
        }

        let call = apply_semantic_fixes(call);
        let call = apply_structural_fixes(call);

        let call = match schema_violation(&call, ctx.tools) {
            Some(reason) if correction_endpoints_configured(&ctx.correction_model.endpoints) => {
                log::info!("tool call '{}' failed schema check ({reason}); escalating to LLM-assisted correction", call.function.name);
                llm_fallback(call, &reason, ctx).await
            }
            Some(reason) => {
                log::warn!("tool call '{}' failed schema check ({reason}) and no correction endpoints are configured", call.function.name);
                call
            }
            None => call,
        };

        corrected.push(call);
    }

    CorrectionOutcome::ToolCalls(corrected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::UnifiedFunction;
    use secrecy::SecretString;
    use serde_json::json;

    fn tool(name: &str, schema: Value) -> UnifiedTool {
        UnifiedTool {
            function: UnifiedFunction {
                name: name.to_string(),
                description: "a tool".to_string(),
                parameters: schema,
                strict: None,
            },
        }
    }

    fn call(id: &str, name: &str, arguments: Value) -> UnifiedToolCall {
        UnifiedToolCall {
            id: id.to_string(),
            function: UnifiedFunctionCall {
                name: name.to_string(),
                arguments: UnifiedArguments::Value(arguments),
            },
        }
    }

    fn no_correction_model() -> ModelEndpointConfig {
        ModelEndpointConfig {
            model: "unused".to_string(),
            endpoints: vec![],
            api_key: SecretString::from("unused".to_string()),
        }
    }

    #[tokio::test]
    async fn semantic_fix_rewrites_file_url_webfetch_to_read() {
        // Scenario 2: WebFetch{url:"file:///tmp/a.txt"} -> Read{file_path:"/tmp/a.txt"}.
        let tools = vec![tool("Read", json!({ "type": "object", "required": ["file_path"] }))];
        let health = HealthManager::new();
        let cb = CircuitBreakerConfig::for_testing();
        let recent = vec![];
        let ctx = CorrectionContext::new(&tools, &health, &no_correction_model(), &cb, &recent);

        let calls = vec![call("toolu_1", "WebFetch", json!({ "url": "file:///tmp/a.txt" }))];

        let outcome = correct(calls, &ctx).await;
        let CorrectionOutcome::ToolCalls(corrected) = outcome else {
            panic!("expected tool calls");
        };

        assert_eq!(corrected[0].function.name, "Read");
        assert_eq!(arguments_as_value(&corrected[0].function.arguments)["file_path"], "/tmp/a.txt");
    }

    #[tokio::test]
    async fn tool_call_satisfying_schema_is_unchanged_without_network() {
        let tools = vec![tool("Read", json!({ "type": "object", "required": ["file_path"] }))];
        let health = HealthManager::new();
        let cb = CircuitBreakerConfig::for_testing();
        let recent = vec![];
        // Correction model has no endpoints; if the corrector tried a network
        // call here it would have nothing to call and fall through to the
        // "no endpoints configured" branch instead of panicking, but a
        // well-formed call should never reach that branch at all.
        let ctx = CorrectionContext::new(&tools, &health, &no_correction_model(), &cb, &recent);

        let calls = vec![call("toolu_1", "Read", json!({ "file_path": "/tmp/a.txt" }))];
        let outcome = correct(calls.clone(), &ctx).await;

        let CorrectionOutcome::ToolCalls(corrected) = outcome else {
            panic!("expected tool calls");
        };
        assert_eq!(arguments_as_value(&corrected[0].function.arguments), arguments_as_value(&calls[0].function.arguments));
    }

    #[tokio::test]
    async fn name_case_typo_is_corrected() {
        let tools = vec![tool("Bash", json!({ "type": "object", "required": ["command"] }))];
        let health = HealthManager::new();
        let cb = CircuitBreakerConfig::for_testing();
        let recent = vec![];
        let ctx = CorrectionContext::new(&tools, &health, &no_correction_model(), &cb, &recent);

        let calls = vec![call("toolu_1", "bash", json!({ "command": "ls" }))];
        let outcome = correct(calls, &ctx).await;

        let CorrectionOutcome::ToolCalls(corrected) = outcome else {
            panic!("expected tool calls");
        };
        assert_eq!(corrected[0].function.name, "Bash");
    }

    #[tokio::test]
    async fn exit_plan_mode_misuse_is_replaced_with_text() {
        let tools = vec![tool("ExitPlanMode", json!({ "type": "object" }))];
        let health = HealthManager::new();
        let cb = CircuitBreakerConfig::for_testing();
        let recent = vec!["Edit".to_string()];
        let ctx = CorrectionContext::new(&tools, &health, &no_correction_model(), &cb, &recent);

        let calls = vec![call("toolu_1", "ExitPlanMode", json!({ "plan": "All tasks completed successfully." }))];
        let outcome = correct(calls, &ctx).await;

        assert!(matches!(outcome, CorrectionOutcome::ReplaceWithText(_)));
    }

    #[tokio::test]
    async fn exit_plan_mode_without_prior_edits_passes_through() {
        let tools = vec![tool("ExitPlanMode", json!({ "type": "object" }))];
        let health = HealthManager::new();
        let cb = CircuitBreakerConfig::for_testing();
        let recent: Vec<String> = vec![];
        let ctx = CorrectionContext::new(&tools, &health, &no_correction_model(), &cb, &recent);

        let calls = vec![call("toolu_1", "ExitPlanMode", json!({ "plan": "Step 1: do X. Step 2: do Y." }))];
        let outcome = correct(calls, &ctx).await;

        assert!(matches!(outcome, CorrectionOutcome::ToolCalls(_)));
    }
}
