use serde::{Deserialize, Serialize};
use serde_json::json;

/// Structured output of an extraction call. Field-for-field the same shape
/// as the JSON schema below, so the two stay in lockstep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionResult {
    pub keywords: Vec<String>,
    pub primary_symptom: String,
    pub root_cause: String,
    pub summary: String,
    pub solution: String,
    pub solution_type: String,
    pub components: Vec<String>,
    pub processes: Vec<String>,
    pub main_component: String,
    pub main_process: String,
    pub confidence: f32,
    pub model_version: String,
}

pub static EXTRACTION_SYSTEM_MESSAGE: &str = "You analyze a single scrubbed work order record \
and extract a fixed-shape structured summary. Do not invent facts not present in the input. \
If a field cannot be determined, use an empty string, empty array, or 0.0 confidence as \
appropriate.";

/// JSON schema passed to `ResponseFormat::JsonSchema` so the model's
/// response is constrained to `ExtractionResult`'s shape.
pub fn extraction_json_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "keywords": { "type": "array", "items": { "type": "string" } },
            "primary_symptom": { "type": "string" },
            "root_cause": { "type": "string" },
            "summary": { "type": "string" },
            "solution": { "type": "string" },
            "solution_type": { "type": "string" },
            "components": { "type": "array", "items": { "type": "string" } },
            "processes": { "type": "array", "items": { "type": "string" } },
            "main_component": { "type": "string" },
            "main_process": { "type": "string" },
            "confidence": { "type": "number" },
            "model_version": { "type": "string" }
        },
        "required": [
            "keywords", "primary_symptom", "root_cause", "summary", "solution",
            "solution_type", "components", "processes", "main_component",
            "main_process", "confidence", "model_version"
        ],
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_round_trips_a_sample_result() {
        let sample = ExtractionResult {
            keywords: vec!["pump".to_string(), "vibration".to_string()],
            primary_symptom: "excess vibration".to_string(),
            root_cause: "bearing wear".to_string(),
            summary: "pump bearing replaced after vibration complaint".to_string(),
            solution: "replaced bearing assembly".to_string(),
            solution_type: "repair".to_string(),
            components: vec!["bearing".to_string()],
            processes: vec!["maintenance".to_string()],
            main_component: "bearing".to_string(),
            main_process: "maintenance".to_string(),
            confidence: 0.82,
            model_version: "gpt-test".to_string(),
        };

        let serialized = serde_json::to_string(&sample).expect("serialize");
        let parsed: ExtractionResult = serde_json::from_str(&serialized).expect("deserialize");
        assert_eq!(sample, parsed);
    }

    #[test]
    fn schema_declares_every_extraction_result_field_as_required() {
        let schema = extraction_json_schema();
        let required = schema["required"].as_array().expect("required array");
        assert_eq!(required.len(), 12);
    }
}
