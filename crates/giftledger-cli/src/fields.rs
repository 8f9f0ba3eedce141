// Field parsing for --set flags
//
// Builds a JSON object from key=value pairs. Dotted keys nest:
// carrier.name=DPD becomes { "carrier": { "name": "DPD" } }.
// Values that parse as JSON scalars (true, false, null, numbers) keep their
// type; anything else is stored as a string.

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

/// Parses `key=value` arguments into a JSON object.
pub fn parse_fields(args: &[String]) -> Result<Value> {
    let mut root = Map::new();
    for arg in args {
        let (key, raw) = arg
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid field '{}'. Expected 'key=value'", arg))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("Empty key in field: '{}'", arg));
        }
        set_path(&mut root, key, scalar(raw.trim()))?;
    }
    Ok(Value::Object(root))
}

fn scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Null | Value::Number(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn set_path(root: &mut Map<String, Value>, key: &str, value: Value) -> Result<()> {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(anyhow!("Invalid key path '{}': empty segment", key));
    }

    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| anyhow!("Empty key path"))?;
    let mut current = root;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match slot {
            Value::Object(map) => map,
            _ => {
                return Err(anyhow!(
                    "Cannot set '{}': '{}' already holds a value",
                    key,
                    segment
                ))
            }
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scalars_keep_their_type() {
        let fields = parse_fields(&args(&["shipped=true", "parcels=2", "note=left at door", "eta=null"])).unwrap();
        assert_eq!(fields["shipped"], true);
        assert_eq!(fields["parcels"], 2);
        assert_eq!(fields["note"], "left at door");
        assert!(fields["eta"].is_null());
    }

    #[test]
    fn test_tracking_numbers_stay_strings() {
        let fields = parse_fields(&args(&["tracking=LT123456789"])).unwrap();
        assert_eq!(fields["tracking"], "LT123456789");
    }

    #[test]
    fn test_dotted_keys_nest_and_merge() {
        let fields = parse_fields(&args(&["carrier.name=DPD", "carrier.service=parcel"])).unwrap();
        assert_eq!(fields["carrier"]["name"], "DPD");
        assert_eq!(fields["carrier"]["service"], "parcel");
    }

    #[test]
    fn test_value_may_contain_equals() {
        let fields = parse_fields(&args(&["url=https://t.example/?id=7"])).unwrap();
        assert_eq!(fields["url"], "https://t.example/?id=7");
    }

    #[test]
    fn test_rejects_malformed_fields() {
        assert!(parse_fields(&args(&["no_equals"])).is_err());
        assert!(parse_fields(&args(&["=value"])).is_err());
        assert!(parse_fields(&args(&["a..b=1"])).is_err());
        let err = parse_fields(&args(&["carrier=DPD", "carrier.name=DPD"])).unwrap_err();
        assert!(err.to_string().contains("already holds a value"));
    }

    #[test]
    fn test_empty_input_is_empty_object() {
        let fields = parse_fields(&[]).unwrap();
        assert!(fields.as_object().unwrap().is_empty());
    }
}
