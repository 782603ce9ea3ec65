use std::sync::Arc;
use std::time::Instant;

use axum::http::HeaderMap;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use tutorgate_coord::{CoordinationMode, Coordinator, build_store};
use tutorgate_core::{
    GuardLimits, IdentityKey, PayloadClamps, RetrievalLimits, content_texts,
    extract_student_question, extraction_warnings, rank, resolve_identity_key,
};
use tutorgate_materials::{InMemoryMaterialStore, JsonFileMaterialStore, MaterialStore};
use tutorgate_upstream::{
    CompletionProvider, CompletionProviderConfig, RetryContext, RetryPolicy,
    build_completion_provider, call_with_retry,
};

use crate::config::{ConfigError, GatewayConfig};
use crate::guard::PayloadGuard;

const MISSING_UPSTREAM: &str = "Upstream API key missing on server";
const PROXY_FAILED: &str = "Proxy failed";

#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub route: String,
    pub headers: HeaderMap,
    pub peer_addr: Option<String>,
    pub body: Value,
    pub explicit_user_id: Option<String>,
}

impl InboundRequest {
    pub fn new(route: impl Into<String>, headers: HeaderMap, body: Value) -> Self {
        Self {
            route: route.into(),
            headers,
            peer_addr: None,
            body,
            explicit_user_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Value,
    pub retry_attempts: u32,
}

impl GatewayResponse {
    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }),
            retry_attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Everything a [`Gateway`] runs on, for callers that wire their own parts.
pub struct GatewayParts {
    pub coordinator: Arc<Coordinator>,
    pub provider: Option<Arc<dyn CompletionProvider>>,
    pub materials: Arc<dyn MaterialStore>,
    pub guard: GuardLimits,
    pub retrieval: RetrievalLimits,
    pub retry: RetryPolicy,
}

/// Admission, grounding and upstream forwarding for AI requests.
pub struct Gateway {
    guard: PayloadGuard,
    coordinator: Arc<Coordinator>,
    provider: Option<Arc<dyn CompletionProvider>>,
    materials: Arc<dyn MaterialStore>,
    retrieval: RetrievalLimits,
    retry: RetryPolicy,
}

impl Gateway {
    pub fn new(parts: GatewayParts) -> Self {
        Self {
            guard: PayloadGuard::new(parts.guard, Arc::clone(&parts.coordinator)),
            coordinator: parts.coordinator,
            provider: parts.provider,
            materials: parts.materials,
            retrieval: parts.retrieval,
            retry: parts.retry,
        }
    }

    pub fn from_config(cfg: &GatewayConfig) -> Result<Self, ConfigError> {
        let shared = cfg.store.clone().map(build_store).transpose()?;
        let coordinator = Arc::new(Coordinator::new(cfg.coordination.clone(), shared));

        let provider = cfg
            .upstream
            .clone()
            .map(|c| build_completion_provider(CompletionProviderConfig::OpenAiCompatible(c)))
            .transpose()?;
        if provider.is_none() {
            warn!("no upstream api key configured; chat requests will fail");
        }

        let materials: Arc<dyn MaterialStore> = match &cfg.materials_db {
            Some(path) => Arc::new(JsonFileMaterialStore::open(path)?),
            None => Arc::new(InMemoryMaterialStore::new()),
        };

        Ok(Self::new(GatewayParts {
            coordinator,
            provider,
            materials,
            guard: cfg.guard,
            retrieval: cfg.retrieval,
            retry: cfg.retry,
        }))
    }

    pub fn coordination_mode(&self) -> CoordinationMode {
        self.coordinator.mode()
    }

    pub async fn handle(&self, req: InboundRequest) -> GatewayResponse {
        let identity = resolve_identity_key(
            &req.headers,
            req.explicit_user_id.as_deref(),
            req.peer_addr.as_deref(),
        );
        let mut log = RequestLog::start(&req.route, &identity);

        let res = self.dispatch(&req.route, identity, req.body).await;
        log.finish(&res);
        res
    }

    async fn dispatch(&self, route: &str, identity: IdentityKey, mut body: Value) -> GatewayResponse {
        let Some(provider) = self.provider.as_ref() else {
            error!(route, "upstream api key missing; refusing request");
            return GatewayResponse::error(500, MISSING_UPSTREAM);
        };

        let decision = self.guard.evaluate(route, identity, &body).await;
        let lease = match decision.outcome {
            Ok(lease) => lease,
            Err(rejection) => {
                debug!(route, identity = %decision.identity, reason = rejection.reason(), "request rejected");
                return GatewayResponse::error(rejection.status(), rejection.message());
            }
        };

        decision.clamps.apply(&mut body);
        self.ground(route, &decision.identity, &decision.clamps, &mut body)
            .await;

        let ctx = RetryContext {
            route,
            identity: decision.identity.as_str(),
        };
        let payload = &body;
        let provider = provider.as_ref();
        let outcome = lease
            .hold_while(call_with_retry(&self.retry, &ctx, move |_| provider.complete(payload)))
            .await;

        lease.release().await;

        match outcome {
            Ok(done) => GatewayResponse {
                status: done.response.status,
                body: done.response.body,
                retry_attempts: done.retry_attempts,
            },
            Err(failure) => {
                error!(
                    route,
                    identity = %decision.identity,
                    retry_attempts = failure.retry_attempts,
                    error = %failure.source,
                    "upstream call failed"
                );
                GatewayResponse {
                    retry_attempts: failure.retry_attempts,
                    ..GatewayResponse::error(500, PROXY_FAILED)
                }
            }
        }
    }

    /// Adds class-material context when the request names a class and some
    /// material matches the question. Any failure leaves the body ungrounded.
    async fn ground(
        &self,
        route: &str,
        identity: &IdentityKey,
        clamps: &PayloadClamps,
        body: &mut Value,
    ) {
        let Some(class_code) = body
            .get("classCode")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(ToString::to_string)
        else {
            return;
        };
        let Some(query) = grounding_query(body) else {
            return;
        };

        let materials = match self.materials.materials_for_class(&class_code).await {
            Ok(materials) => materials,
            Err(err) => {
                warn!(
                    event = "grounding_unavailable",
                    route,
                    identity = %identity,
                    class_code = %class_code,
                    store = self.materials.name(),
                    error = %err,
                    "material lookup failed; forwarding without grounding"
                );
                return;
            }
        };

        for warning in extraction_warnings(&materials) {
            warn!(
                event = "material_extraction_warning",
                route,
                class_code = %class_code,
                source = %warning.source_name,
                excerpt = %warning.excerpt,
                "material text carries extraction warnings"
            );
        }

        let mut limits = self.retrieval;
        if let Some(top_k) = requested_top_k(body) {
            limits.max_chunks = limits.max_chunks.min(top_k);
        }

        let selection = rank(&query, &materials, &limits);
        if selection.is_empty() {
            debug!(route, class_code = %class_code, "no material matched the question");
            return;
        }
        debug!(
            route,
            class_code = %class_code,
            chunks = selection.len(),
            chars = selection.total_chars,
            "grounding request with class materials"
        );
        insert_grounding(body, clamps.context(&selection.render_context()));
    }
}

/// Emits the single `ai_request` line for a request, including when the
/// handling future is dropped before it completes.
struct RequestLog {
    route: String,
    identity: String,
    started: Instant,
    outcome: Option<(u16, u32)>,
}

/// Status logged for requests abandoned before a response was produced.
const CLIENT_CLOSED: u16 = 499;

impl RequestLog {
    fn start(route: &str, identity: &IdentityKey) -> Self {
        Self {
            route: route.to_string(),
            identity: identity.to_string(),
            started: Instant::now(),
            outcome: None,
        }
    }

    fn finish(&mut self, res: &GatewayResponse) {
        self.outcome = Some((res.status, res.retry_attempts));
    }
}

impl Drop for RequestLog {
    fn drop(&mut self) {
        let cancelled = self.outcome.is_none();
        let (status, retry_attempts) = self.outcome.unwrap_or((CLIENT_CLOSED, 0));
        info!(
            event = "ai_request",
            route = %self.route,
            identity = %self.identity,
            duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            success = !cancelled && (200..300).contains(&status),
            status,
            retry_attempts,
            cancelled,
        );
    }
}

/// The question to rank materials against: top-level `message`, else the last
/// user message, else `input`.
fn grounding_query(body: &Value) -> Option<String> {
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        return Some(extract_student_question(message).trim().to_string()).filter(|q| !q.is_empty());
    }

    let from_messages = body
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| {
            messages
                .iter()
                .rev()
                .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        })
        .and_then(|m| m.get("content"))
        .map(|content| content_texts(content).join(" "));
    if let Some(query) = from_messages.filter(|q| !q.trim().is_empty()) {
        return Some(query);
    }

    body.get("input")
        .and_then(Value::as_str)
        .map(|input| extract_student_question(input).trim().to_string())
        .filter(|q| !q.is_empty())
}

fn requested_top_k(body: &Value) -> Option<usize> {
    let retrieval = body.get("retrieval");
    [
        body.get("topK"),
        body.get("top_k"),
        retrieval.and_then(|r| r.get("topK")),
        retrieval.and_then(|r| r.get("top_k")),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_u64)
    .and_then(|k| usize::try_from(k).ok())
}

/// Puts grounding after the leading system messages, or into `context` for
/// payloads without a message list.
fn insert_grounding(body: &mut Value, context: String) {
    let Some(obj) = body.as_object_mut() else {
        return;
    };

    if let Some(messages) = obj.get_mut("messages").and_then(Value::as_array_mut) {
        let at = messages
            .iter()
            .take_while(|m| m.get("role").and_then(Value::as_str) == Some("system"))
            .count();
        messages.insert(at, json!({ "role": "system", "content": context }));
        return;
    }

    let merged = match obj.get("context").and_then(Value::as_str) {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}\n\n{context}"),
        _ => context,
    };
    obj.insert("context".to_string(), Value::String(merged));
}
