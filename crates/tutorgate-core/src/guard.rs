use std::fmt;

use serde_json::{Map, Value};

use crate::text::{char_len, truncate_chars};

pub const MATERIALS_CONTEXT_START: &str = "MATERIALS_CONTEXT:";
pub const MATERIALS_CONTEXT_END: &str = "END_MATERIALS_CONTEXT";
pub const STUDENT_QUESTION_MARKER: &str = "STUDENT_QUESTION:";

const PROCESSING_FLAGS: &[&str] = &[
    "materialsProcessing",
    "isProcessing",
    "processingMaterials",
    "pendingEmbeddings",
    "pendingChunks",
    "pendingExtraction",
    "pdfExtractionInProgress",
    "chunkingInProgress",
    "embeddingInProgress",
];

const PROCESSING_STATUS_FIELDS: &[&str] = &["materialStatus", "processingStatus", "status"];

const PROCESSING_STATUS_WORDS: &[&str] = &["processing", "extracting", "chunking", "embedding"];

const TOP_K_FIELDS: &[&str] = &["topK", "top_k"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardLimits {
    pub max_user_message_chars: usize,
    pub max_top_k: u64,
    pub max_context_chars: usize,
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self {
            max_user_message_chars: 4000,
            max_top_k: 8,
            max_context_chars: 20_000,
        }
    }
}

/// Why a request was turned away before reaching the upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardRejection {
    MessageTooLong,
    MaterialsProcessing,
    RequestInProgress,
    RateLimited,
}

impl GuardRejection {
    pub fn status(self) -> u16 {
        match self {
            Self::MessageTooLong => 400,
            Self::MaterialsProcessing => 409,
            Self::RequestInProgress | Self::RateLimited => 429,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::MessageTooLong => "Message too long.",
            Self::MaterialsProcessing => "Materials still processing.",
            Self::RequestInProgress => "Another AI request is in progress.",
            Self::RateLimited => "Rate limit exceeded.",
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::MessageTooLong => "message_too_long",
            Self::MaterialsProcessing => "materials_processing",
            Self::RequestInProgress => "request_in_progress",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.status())
    }
}

/// The purely computational guard checks, in evaluation order.
pub fn precheck(body: &Value, limits: &GuardLimits) -> Result<(), GuardRejection> {
    if user_message_too_long(body, limits.max_user_message_chars) {
        return Err(GuardRejection::MessageTooLong);
    }
    if has_processing_signal(body) {
        return Err(GuardRejection::MaterialsProcessing);
    }
    Ok(())
}

/// Text after the last `STUDENT_QUESTION:` marker, or the whole text.
pub fn extract_student_question(raw: &str) -> &str {
    raw.rfind(STUDENT_QUESTION_MARKER)
        .and_then(|idx| raw.get(idx + STUDENT_QUESTION_MARKER.len()..))
        .map_or(raw, str::trim)
}

/// User-authored text carried by one message `content` value.
pub fn content_texts(content: &Value) -> Vec<&str> {
    match content {
        Value::String(text) => vec![extract_student_question(text)],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                item.get("text")
                    .and_then(Value::as_str)
                    .or_else(|| item.get("content").and_then(Value::as_str))
            })
            .map(extract_student_question)
            .collect(),
        Value::Object(obj) => obj
            .get("text")
            .and_then(Value::as_str)
            .map(extract_student_question)
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

/// Every user-authored text field of a chat-style payload.
pub fn user_texts(body: &Value) -> Vec<&str> {
    let mut out = Vec::new();
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        out.push(message);
    }
    if let Some(input) = body.get("input").and_then(Value::as_str) {
        out.push(extract_student_question(input));
    }
    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        for msg in messages {
            if msg.get("role").and_then(Value::as_str) != Some("user") {
                continue;
            }
            if let Some(content) = msg.get("content") {
                out.extend(content_texts(content));
            }
        }
    }
    out
}

pub fn user_message_too_long(body: &Value, max_chars: usize) -> bool {
    user_texts(body)
        .into_iter()
        .any(|text| char_len(text) > max_chars)
}

pub fn has_processing_signal(body: &Value) -> bool {
    let Some(obj) = body.as_object() else {
        return false;
    };

    if PROCESSING_FLAGS
        .iter()
        .any(|flag| obj.get(*flag).and_then(Value::as_bool) == Some(true))
    {
        return true;
    }

    PROCESSING_STATUS_FIELDS.iter().any(|field| {
        obj.get(*field).and_then(Value::as_str).is_some_and(|status| {
            let lowered = status.to_lowercase();
            PROCESSING_STATUS_WORDS
                .iter()
                .any(|word| lowered.contains(word))
        })
    })
}

/// Pure clamps handed out with an admission and applied to the payload
/// before it is forwarded upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadClamps {
    pub max_top_k: u64,
    pub max_context_chars: usize,
}

impl From<&GuardLimits> for PayloadClamps {
    fn from(limits: &GuardLimits) -> Self {
        Self {
            max_top_k: limits.max_top_k.max(1),
            max_context_chars: limits.max_context_chars,
        }
    }
}

impl PayloadClamps {
    /// Bounds a retrieval count to `[1, max_top_k]`; anything non-numeric,
    /// non-finite or not positive becomes `max_top_k`.
    pub fn top_k(&self, value: &Value) -> u64 {
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(n) if n.is_finite() && n > 0.0 => {
                let floored = n.floor();
                if floored < 1.0 {
                    1
                } else {
                    (floored as u64).min(self.max_top_k)
                }
            }
            _ => self.max_top_k,
        }
    }

    /// Truncates the sentinel-delimited materials context to the budget and
    /// leaves the surrounding text alone. Without complete sentinels the whole
    /// text is bounded instead.
    pub fn context(&self, text: &str) -> String {
        let Some(start) = text.find(MATERIALS_CONTEXT_START) else {
            return truncate_chars(text, self.max_context_chars).to_string();
        };
        let body_start = start + MATERIALS_CONTEXT_START.len();
        let Some(body_len) = text
            .get(body_start..)
            .and_then(|rest| rest.find(MATERIALS_CONTEXT_END))
        else {
            return truncate_chars(text, self.max_context_chars).to_string();
        };
        let body_end = body_start + body_len;

        let (Some(prefix), Some(context), Some(suffix)) = (
            text.get(..body_start),
            text.get(body_start..body_end),
            text.get(body_end..),
        ) else {
            return truncate_chars(text, self.max_context_chars).to_string();
        };

        format!(
            "{prefix}{}{suffix}",
            truncate_chars(context, self.max_context_chars)
        )
    }

    /// Applies both clamps to every payload field known to carry a retrieval
    /// count or model context.
    pub fn apply(&self, body: &mut Value) {
        let Some(obj) = body.as_object_mut() else {
            return;
        };

        self.clamp_top_k_fields(obj);
        self.clamp_context_field(obj, "context");
        self.clamp_context_field(obj, "appendedContext");
        self.clamp_context_field(obj, "input");

        if let Some(retrieval) = obj.get_mut("retrieval").and_then(Value::as_object_mut) {
            self.clamp_top_k_fields(retrieval);
            self.clamp_context_field(retrieval, "context");
        }

        if let Some(messages) = obj.get_mut("messages").and_then(Value::as_array_mut) {
            for msg in messages {
                let Some(content) = msg.get_mut("content") else {
                    continue;
                };
                match content {
                    Value::String(text) => *text = self.context(text),
                    Value::Array(items) => {
                        for item in items.iter_mut().filter_map(Value::as_object_mut) {
                            self.clamp_context_field(item, "text");
                            self.clamp_context_field(item, "content");
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn clamp_top_k_fields(&self, obj: &mut Map<String, Value>) {
        for field in TOP_K_FIELDS {
            if let Some(value) = obj.get_mut(*field) {
                *value = Value::from(self.top_k(value));
            }
        }
    }

    fn clamp_context_field(&self, obj: &mut Map<String, Value>, field: &str) {
        if let Some(Value::String(text)) = obj.get_mut(field) {
            *text = self.context(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn clamps() -> PayloadClamps {
        PayloadClamps::from(&GuardLimits::default())
    }

    #[test]
    fn message_length_boundary_is_inclusive() {
        let limits = GuardLimits::default();
        let ok = json!({ "message": "a".repeat(4000) });
        let too_long = json!({ "message": "a".repeat(4001) });
        assert_eq!(precheck(&ok, &limits), Ok(()));
        assert_eq!(precheck(&too_long, &limits), Err(GuardRejection::MessageTooLong));
        assert_eq!(GuardRejection::MessageTooLong.status(), 400);
    }

    #[test]
    fn only_user_messages_are_measured() {
        let body = json!({
            "messages": [
                { "role": "system", "content": "s".repeat(9000) },
                { "role": "assistant", "content": "a".repeat(9000) },
                { "role": "user", "content": "short question" }
            ]
        });
        assert!(!user_message_too_long(&body, 4000));

        let body = json!({
            "messages": [
                { "role": "user", "content": [
                    { "type": "text", "text": "fine" },
                    { "type": "text", "content": "x".repeat(4001) }
                ]}
            ]
        });
        assert!(user_message_too_long(&body, 4000));

        let body = json!({ "messages": [{ "role": "user", "content": { "text": "y".repeat(4001) } }] });
        assert!(user_message_too_long(&body, 4000));
    }

    #[test]
    fn gateway_composed_prefix_is_not_counted() {
        let content = format!(
            "MATERIALS_CONTEXT:{}END_MATERIALS_CONTEXT\nSTUDENT_QUESTION: what is osmosis?",
            "m".repeat(10_000)
        );
        let body = json!({ "messages": [{ "role": "user", "content": content }] });
        assert!(!user_message_too_long(&body, 4000));
        assert_eq!(user_texts(&body), vec!["what is osmosis?"]);
    }

    #[test]
    fn input_field_is_measured_after_marker() {
        let limits = GuardLimits::default();
        let too_long = json!({ "input": "a".repeat(4001) });
        assert_eq!(precheck(&too_long, &limits), Err(GuardRejection::MessageTooLong));

        let composed = json!({
            "input": format!("{}\nSTUDENT_QUESTION: why?", "m".repeat(9000))
        });
        assert_eq!(precheck(&composed, &limits), Ok(()));
        assert_eq!(user_texts(&composed), vec!["why?"]);
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let body = json!({ "message": "é".repeat(4000) });
        assert!(!user_message_too_long(&body, 4000));
    }

    #[test]
    fn processing_flags_and_statuses_conflict() {
        assert!(has_processing_signal(&json!({ "pendingEmbeddings": true })));
        assert!(has_processing_signal(&json!({ "materialStatus": "PDF Extracting (2/5)" })));
        assert!(has_processing_signal(&json!({ "status": "chunking" })));
        assert!(!has_processing_signal(&json!({ "pendingEmbeddings": false, "status": "ready" })));
        assert!(!has_processing_signal(&json!({ "isProcessing": "true" })));
        assert!(!has_processing_signal(&json!("processing")));

        let limits = GuardLimits::default();
        let rejected = precheck(&json!({ "isProcessing": true }), &limits);
        assert_eq!(rejected, Err(GuardRejection::MaterialsProcessing));
        assert_eq!(GuardRejection::MaterialsProcessing.status(), 409);
    }

    #[test]
    fn length_check_runs_before_processing_check() {
        let body = json!({ "message": "a".repeat(5000), "isProcessing": true });
        assert_eq!(precheck(&body, &GuardLimits::default()), Err(GuardRejection::MessageTooLong));
    }

    #[test]
    fn top_k_is_bounded() {
        let c = clamps();
        assert_eq!(c.top_k(&json!(3)), 3);
        assert_eq!(c.top_k(&json!(3.9)), 3);
        assert_eq!(c.top_k(&json!(0.5)), 1);
        assert_eq!(c.top_k(&json!(50)), 8);
        assert_eq!(c.top_k(&json!(0)), 8);
        assert_eq!(c.top_k(&json!(-2)), 8);
        assert_eq!(c.top_k(&json!("4")), 4);
        assert_eq!(c.top_k(&json!("lots")), 8);
        assert_eq!(c.top_k(&Value::Null), 8);
    }

    #[test]
    fn context_clamp_only_touches_delimited_region() {
        let c = PayloadClamps {
            max_top_k: 8,
            max_context_chars: 5,
        };
        let text = "intro MATERIALS_CONTEXT:abcdefghij END_MATERIALS_CONTEXT outro";
        assert_eq!(
            c.context(text),
            "intro MATERIALS_CONTEXT:abcdeEND_MATERIALS_CONTEXT outro"
        );
        assert_eq!(c.context("no sentinels here"), "no se");
        assert_eq!(c.context("MATERIALS_CONTEXT: unterminated"), "MATER");
    }

    #[test]
    fn apply_reaches_nested_fields() {
        let c = PayloadClamps {
            max_top_k: 8,
            max_context_chars: 3,
        };
        let mut body = json!({
            "topK": 100,
            "top_k": -1,
            "retrieval": { "topK": "2", "context": "abcdef" },
            "context": "MATERIALS_CONTEXT:abcdefEND_MATERIALS_CONTEXT",
            "appendedContext": "xyzxyz",
            "input": "MATERIALS_CONTEXT:abcdefEND_MATERIALS_CONTEXT\nSTUDENT_QUESTION: q",
            "messages": [
                { "role": "system", "content": "MATERIALS_CONTEXT:123456END_MATERIALS_CONTEXT tail" },
                { "role": "user", "content": [{ "type": "text", "text": "hello" }] }
            ]
        });
        c.apply(&mut body);
        assert_eq!(body["topK"], json!(8));
        assert_eq!(body["top_k"], json!(8));
        assert_eq!(body["retrieval"]["topK"], json!(2));
        assert_eq!(body["retrieval"]["context"], json!("abc"));
        assert_eq!(body["context"], json!("MATERIALS_CONTEXT:abcEND_MATERIALS_CONTEXT"));
        assert_eq!(body["appendedContext"], json!("xyz"));
        assert_eq!(
            body["input"],
            json!("MATERIALS_CONTEXT:abcEND_MATERIALS_CONTEXT\nSTUDENT_QUESTION: q")
        );
        assert_eq!(
            body["messages"][0]["content"],
            json!("MATERIALS_CONTEXT:123END_MATERIALS_CONTEXT tail")
        );
        assert_eq!(body["messages"][1]["content"][0]["text"], json!("hel"));
    }
}
