use serde_json::Value;

use crate::error::ApiError;

/// Maximum text length of a single line
pub const MAX_LINE_LENGTH: usize = 5000;
/// Maximum number of lines per request
pub const MAX_LINES: usize = 100;

/// Parse a combine request body into its `lines`.
pub fn parse_lines(body: &[u8]) -> Result<Vec<String>, ApiError> {
    let json: Value = serde_json::from_slice(body)
        .map_err(|_| ApiError::InvalidInput("request body is not valid JSON".to_string()))?;
    validate_lines(&json)
}

/// Validate the `lines` field of an already parsed body
pub fn validate_lines(body: &Value) -> Result<Vec<String>, ApiError> {
    let lines = match body.get("lines") {
        None | Some(Value::Null) => {
            return Err(ApiError::InvalidInput("`lines` is required".to_string()));
        }
        Some(Value::Array(lines)) => lines,
        Some(_) => {
            return Err(ApiError::InvalidInput("`lines` must be an array of strings".to_string()));
        }
    };

    if lines.is_empty() {
        return Err(ApiError::InvalidInput("`lines` cannot be empty".to_string()));
    }
    if lines.len() > MAX_LINES {
        return Err(ApiError::InvalidInput(format!(
            "Too many lines (max {})",
            MAX_LINES
        )));
    }

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let text = line.as_str().ok_or_else(|| {
                ApiError::InvalidInput(format!("Line {} is not a string", i))
            })?;
            if text.trim().is_empty() {
                return Err(ApiError::InvalidInput(format!("Line {} is empty", i)));
            }
            if text.chars().count() > MAX_LINE_LENGTH {
                return Err(ApiError::InvalidInput(format!(
                    "Line {} too long (max {} characters)",
                    i, MAX_LINE_LENGTH
                )));
            }
            Ok(text.to_string())
        })
        .collect()
}
