use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Payload or metadata object
pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ToolType {
    /// Cheap, deterministic, runs on every file
    Tool,
    /// Repository-wide build step (graph, vector index)
    Builder,
    /// LLM-backed, runs on the filtered subset
    Agent,
}

/// Uniform result of one analyzer invocation, success or failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub tool_name: String,
    pub tool_type: ToolType,
    pub file_path: Option<String>,
    pub execution_time_ms: u64,
    pub payload: Payload,
    #[serde(default)]
    pub metadata: Payload,
}

impl EventEnvelope {
    pub fn success(
        tool_name: impl Into<String>,
        tool_type: ToolType,
        file_path: Option<String>,
        execution_time_ms: u64,
        version: &str,
        payload: Payload,
    ) -> Self {
        let mut metadata = Payload::new();
        metadata.insert("tool_version".into(), json!(version));
        metadata.insert("success".into(), json!(true));
        metadata.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        Self {
            tool_name: tool_name.into(),
            tool_type,
            file_path,
            execution_time_ms,
            payload,
            metadata,
        }
    }

    pub fn failure(
        tool_name: impl Into<String>,
        tool_type: ToolType,
        file_path: Option<String>,
        execution_time_ms: u64,
        version: &str,
        error_type: &str,
        error: &str,
    ) -> Self {
        let mut payload = Payload::new();
        payload.insert("error".into(), json!(error));
        payload.insert("success".into(), json!(false));

        let mut metadata = Payload::new();
        metadata.insert("tool_version".into(), json!(version));
        metadata.insert("success".into(), json!(false));
        metadata.insert("error_type".into(), json!(error_type));
        metadata.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        Self {
            tool_name: tool_name.into(),
            tool_type,
            file_path,
            execution_time_ms,
            payload,
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.metadata
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn error(&self) -> Option<&str> {
        self.payload.get("error").and_then(Value::as_str)
    }

    pub fn error_type(&self) -> Option<&str> {
        self.metadata.get("error_type").and_then(Value::as_str)
    }

    /// Numeric payload field, `default` when absent
    pub fn payload_f64(&self, key: &str, default: f64) -> f64 {
        self.payload
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }

    /// Length of an array payload field, or the value of a numeric one
    pub fn payload_count(&self, key: &str) -> usize {
        match self.payload.get(key) {
            Some(Value::Array(items)) => items.len(),
            Some(value) => value.as_u64().map_or(0, |n| n as usize),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tool_type_wire_names() {
        assert_eq!(serde_json::to_value(ToolType::Tool).unwrap(), json!("TOOL"));
        assert_eq!(serde_json::to_value(ToolType::Builder).unwrap(), json!("BUILDER"));
        assert_eq!(
            serde_json::from_value::<ToolType>(json!("AGENT")).unwrap(),
            ToolType::Agent
        );
    }

    #[test]
    fn failure_envelope_shape() {
        let envelope = EventEnvelope::failure(
            "PYLINT_TOOL",
            ToolType::Tool,
            Some("a.py".into()),
            12,
            "2.17",
            "Timeout",
            "Timed out after 30000ms",
        );
        assert!(!envelope.is_success());
        assert_eq!(envelope.error(), Some("Timed out after 30000ms"));
        assert_eq!(envelope.payload.get("success"), Some(&json!(false)));
        assert_eq!(envelope.error_type(), Some("Timeout"));
        assert!(envelope.metadata.contains_key("timestamp"));

        let text = serde_json::to_string(&envelope).unwrap();
        let back: EventEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn payload_helpers() {
        let mut payload = Payload::new();
        payload.insert("score".into(), json!(7.5));
        payload.insert("errors".into(), json!([1, 2, 3]));
        payload.insert("bugs".into(), json!(2));
        let envelope =
            EventEnvelope::success("T", ToolType::Tool, None, 0, "1", payload);
        assert_eq!(envelope.payload_f64("score", 10.0), 7.5);
        assert_eq!(envelope.payload_f64("missing", 10.0), 10.0);
        assert_eq!(envelope.payload_count("errors"), 3);
        assert_eq!(envelope.payload_count("bugs"), 2);
        assert_eq!(envelope.payload_count("missing"), 0);
    }
}
