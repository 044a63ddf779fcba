use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use switchyard_common::RequestId;

use crate::config::Candidate;
use crate::errors::ValidationError;
use crate::provider::ParamBounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Chat,
    Completion,
    Embedding,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Chat => "chat",
            OperationKind::Completion => "completion",
            OperationKind::Embedding => "embedding",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(OperationKind::Chat),
            "completion" => Ok(OperationKind::Completion),
            "embedding" | "embeddings" => Ok(OperationKind::Embedding),
            other => Err(ValidationError::new(
                "operation",
                format!("unknown operation kind `{other}`"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Ordered content of a request; the variant must match the operation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Messages(Vec<Message>),
    Prompt(String),
    Inputs(Vec<String>),
}

impl Payload {
    fn expected_for(operation: OperationKind) -> &'static str {
        match operation {
            OperationKind::Chat => "messages",
            OperationKind::Completion => "prompt",
            OperationKind::Embedding => "inputs",
        }
    }

    fn matches(&self, operation: OperationKind) -> bool {
        matches!(
            (self, operation),
            (Payload::Messages(_), OperationKind::Chat)
                | (Payload::Prompt(_), OperationKind::Completion)
                | (Payload::Inputs(_), OperationKind::Embedding)
        )
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Messages(messages) => messages.iter().all(|m| m.content.trim().is_empty()),
            Payload::Prompt(prompt) => prompt.trim().is_empty(),
            Payload::Inputs(inputs) => inputs.iter().all(|i| i.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Provider-specific knobs passed through untouched.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Caller overrides applied on top of the routing policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePreferences {
    /// Explicit primary provider; the request model is used with it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Replaces the policy's fallback list when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallbacks: Option<Vec<Candidate>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub id: RequestId,
    pub operation: OperationKind,
    pub model: String,
    pub payload: Payload,
    #[serde(default)]
    pub params: GenerationParams,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub preferences: RoutePreferences,
}

impl CanonicalRequest {
    pub fn new(operation: OperationKind, model: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: RequestId::new(),
            operation,
            model: model.into(),
            payload,
            params: GenerationParams::default(),
            stream: false,
            preferences: RoutePreferences::default(),
        }
    }

    pub fn chat(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self::new(OperationKind::Chat, model, Payload::Messages(messages))
    }

    pub fn completion(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(
            OperationKind::Completion,
            model,
            Payload::Prompt(prompt.into()),
        )
    }

    pub fn embedding(model: impl Into<String>, inputs: Vec<String>) -> Self {
        Self::new(OperationKind::Embedding, model, Payload::Inputs(inputs))
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_preferences(mut self, preferences: RoutePreferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Provider-independent checks; run before routing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::new("model", "must not be empty"));
        }
        if !self.payload.matches(self.operation) {
            return Err(ValidationError::new(
                "payload",
                format!(
                    "{} requests carry `{}`",
                    self.operation,
                    Payload::expected_for(self.operation)
                ),
            ));
        }
        if self.payload.is_empty() {
            return Err(ValidationError::new("payload", "must not be empty"));
        }
        if self.operation == OperationKind::Embedding && self.stream {
            return Err(ValidationError::new(
                "stream",
                "embedding requests cannot stream",
            ));
        }
        if let Some(temperature) = self.params.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(ValidationError::new("temperature", "must be within [0, 2]"));
        }
        if let Some(top_p) = self.params.top_p
            && !(0.0..=1.0).contains(&top_p)
        {
            return Err(ValidationError::new("top_p", "must be within [0, 1]"));
        }
        if self.params.max_tokens == Some(0) {
            return Err(ValidationError::new("max_tokens", "must be > 0"));
        }
        if let Some(provider) = &self.preferences.provider
            && provider.trim().is_empty()
        {
            return Err(ValidationError::new(
                "preferences.provider",
                "must not be blank",
            ));
        }
        Ok(())
    }

    /// Checks the parameters against one provider's declared limits.
    pub fn check_bounds(&self, bounds: &ParamBounds) -> Result<(), ValidationError> {
        if let (Some(max), Some(requested)) = (bounds.max_tokens, self.params.max_tokens)
            && requested > max
        {
            return Err(ValidationError::new(
                "max_tokens",
                format!("{requested} exceeds provider limit {max}"),
            ));
        }
        if let (Some((lo, hi)), Some(value)) = (bounds.temperature, self.params.temperature)
            && !(lo..=hi).contains(&value)
        {
            return Err(ValidationError::new(
                "temperature",
                format!("{value} outside provider range [{lo}, {hi}]"),
            ));
        }
        if let (Some((lo, hi)), Some(value)) = (bounds.top_p, self.params.top_p)
            && !(lo..=hi).contains(&value)
        {
            return Err(ValidationError::new(
                "top_p",
                format!("{value} outside provider range [{lo}, {hi}]"),
            ));
        }
        if let Some(max) = bounds.max_stop_sequences
            && self.params.stop.len() > max
        {
            return Err(ValidationError::new(
                "stop",
                format!("at most {max} stop sequences"),
            ));
        }
        Ok(())
    }
}

/// Transport-facing shape: the operation kind is still free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub operation: String,
    pub model: String,
    pub payload: Payload,
    #[serde(default)]
    pub params: GenerationParams,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub preferences: RoutePreferences,
}

impl RawRequest {
    pub fn canonicalize(self) -> Result<CanonicalRequest, ValidationError> {
        let operation = self.operation.parse::<OperationKind>()?;
        let request = CanonicalRequest {
            id: self.id.unwrap_or_default(),
            operation,
            model: self.model.trim().to_string(),
            payload: self.payload,
            params: self.params,
            stream: self.stream,
            preferences: self.preferences,
        };
        request.validate()?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(operation: &str, payload: Payload) -> RawRequest {
        RawRequest {
            id: None,
            operation: operation.to_string(),
            model: "m".to_string(),
            payload,
            params: GenerationParams::default(),
            stream: false,
            preferences: RoutePreferences::default(),
        }
    }

    #[test]
    fn unknown_operation_rejected() {
        let err = raw("rerank", Payload::Prompt("x".into()))
            .canonicalize()
            .unwrap_err();
        assert_eq!(err.field, "operation");
    }

    #[test]
    fn blank_payload_rejected() {
        let err = raw(
            "chat",
            Payload::Messages(vec![Message::user("  "), Message::user("")]),
        )
        .canonicalize()
        .unwrap_err();
        assert_eq!(err.field, "payload");

        let err = raw("embedding", Payload::Inputs(vec![]))
            .canonicalize()
            .unwrap_err();
        assert_eq!(err.field, "payload");
    }

    #[test]
    fn payload_must_match_operation() {
        let err = raw("completion", Payload::Messages(vec![Message::user("hi")]))
            .canonicalize()
            .unwrap_err();
        assert_eq!(err.field, "payload");
    }

    #[test]
    fn canonicalize_keeps_supplied_id() {
        let id = RequestId::new();
        let mut request = raw("Chat", Payload::Messages(vec![Message::user("hi")]));
        request.id = Some(id);
        let canonical = request.canonicalize().unwrap();
        assert_eq!(canonical.id, id);
        assert_eq!(canonical.operation, OperationKind::Chat);
    }

    #[test]
    fn provider_bounds_checked_separately() {
        let request = CanonicalRequest::completion("m", "hello").with_params(GenerationParams {
            max_tokens: Some(4096),
            temperature: Some(1.5),
            ..Default::default()
        });
        assert!(request.validate().is_ok());

        let bounds = ParamBounds {
            max_tokens: Some(1024),
            ..Default::default()
        };
        assert_eq!(request.check_bounds(&bounds).unwrap_err().field, "max_tokens");

        let bounds = ParamBounds {
            temperature: Some((0.0, 1.0)),
            ..Default::default()
        };
        assert_eq!(
            request.check_bounds(&bounds).unwrap_err().field,
            "temperature"
        );
        assert!(request.check_bounds(&ParamBounds::default()).is_ok());
    }

    #[test]
    fn generic_ranges_enforced() {
        let request = CanonicalRequest::completion("m", "x").with_params(GenerationParams {
            top_p: Some(1.5),
            ..Default::default()
        });
        assert_eq!(request.validate().unwrap_err().field, "top_p");
    }
}
