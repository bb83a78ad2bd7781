//! Send one statement through a running proxy and print the result.

use anyhow::{Context, Result};
use serde_json::Value;

/// Parse each `--param` as JSON, falling back to a plain string.
fn parse_params(raw: &[String]) -> Option<Vec<Value>> {
    if raw.is_empty() {
        return None;
    }
    Some(
        raw.iter()
            .map(|param| {
                serde_json::from_str(param).unwrap_or_else(|_| Value::String(param.clone()))
            })
            .collect(),
    )
}

/// Execute `text` against the proxy at `url` and print the JSON result.
pub async fn execute(url: &str, text: &str, params: &[String], retry: bool) -> Result<()> {
    let client = super::client(url, retry)?;
    let result = client
        .query(text, parse_params(params))
        .await
        .with_context(|| format!("Query against {url} failed"))?;

    let output = serde_json::to_string_pretty(&result).context("Failed to encode result")?;
    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params(&[]), None);
        assert_eq!(
            parse_params(&["42".to_string(), "true".to_string(), "alice".to_string()]),
            Some(vec![json!(42), json!(true), json!("alice")])
        );
        assert_eq!(
            parse_params(&["\"42\"".to_string()]),
            Some(vec![json!("42")])
        );
    }
}
