use std::sync::LazyLock;

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::AppError;

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("JSON object pattern is valid"));

/// JSON body extractor that reports bad payloads as [`AppError::MalformedPayload`].
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                warn!("Rejected payload: {rejection}");
                AppError::MalformedPayload
            })?;

        Ok(Self(value))
    }
}

/// Step increments arrive as numbers or numeric strings. Anything else counts as one step.
pub fn parse_steps(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.trunc() as i64))
            .unwrap_or(1),
        Some(Value::String(text)) => leading_integer(text).unwrap_or(1),
        _ => 1,
    }
}

/// Integer prefix of `text`, so "120 steps" reads as 120.
fn leading_integer(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let digits_start = usize::from(text.starts_with(['-', '+']));
    let digits = text[digits_start..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(text.len(), |end| digits_start + end);

    text[..digits].parse().ok()
}

pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) if text.trim().is_empty() => Some(0.0),
        Value::String(text) => text.trim().parse().ok().filter(|n: &f64| n.is_finite()),
        Value::Null => Some(0.0),
        _ => None,
    }
}

/// First `{` to last `}` of a model reply, which may wrap the object in prose or code fences.
pub fn extract_json(text: &str) -> Option<&str> {
    JSON_OBJECT.find(text).map(|found| found.as_str())
}

/// JavaScript-style truthiness for loosely typed request fields.
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_steps() {
        assert_eq!(parse_steps(Some(&json!(42))), 42);
        assert_eq!(parse_steps(Some(&json!(7.9))), 7);
        assert_eq!(parse_steps(Some(&json!("120"))), 120);
        assert_eq!(parse_steps(Some(&json!(" 120 steps"))), 120);
        assert_eq!(parse_steps(Some(&json!("-5"))), -5);
    }

    #[test]
    fn test_parse_steps_defaults_to_one() {
        assert_eq!(parse_steps(None), 1);
        assert_eq!(parse_steps(Some(&json!("abc"))), 1);
        assert_eq!(parse_steps(Some(&json!(""))), 1);
        assert_eq!(parse_steps(Some(&json!("-"))), 1);
        assert_eq!(parse_steps(Some(&json!(null))), 1);
        assert_eq!(parse_steps(Some(&json!([3]))), 1);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(&json!(3.5)), Some(3.5));
        assert_eq!(parse_number(&json!("12")), Some(12.0));
        assert_eq!(parse_number(&json!("")), Some(0.0));
        assert_eq!(parse_number(&json!("twelve")), None);
        assert_eq!(parse_number(&json!({"kg": 1})), None);
    }

    #[test]
    fn test_extract_json() {
        let reply = "Here you go:\n```json\n{\"bill_type\": \"gas\", \"nested\": {\"a\": 1}}\n```";

        assert_eq!(
            extract_json(reply),
            Some("{\"bill_type\": \"gas\", \"nested\": {\"a\": 1}}")
        );
        assert_eq!(extract_json("no object here"), None);
    }

    #[test]
    fn test_is_present() {
        assert!(is_present(Some(&json!(4))));
        assert!(is_present(Some(&json!("Delhi"))));
        assert!(!is_present(Some(&json!(0))));
        assert!(!is_present(Some(&json!(""))));
        assert!(!is_present(None));
    }
}
