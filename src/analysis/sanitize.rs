//! Pre-parse repair of analyze-form response bodies.
//!
//! The analysis service serialises undetectable measurements with the
//! non-standard `NaN` literal (and, for overflowing values, `Infinity`).
//! Strict JSON parsers reject those tokens, so they are rewritten to `null`
//! on the raw text before any structured parsing happens. Only tokens in
//! value position (after `:`, `[` or `,`) outside string literals are
//! touched; surrounding separators and whitespace are kept as-is, so
//! `"knee_angle": NaN` becomes `"knee_angle": null`.

use std::borrow::Cow;

/// Longest first so `-Infinity` is not read as `-` + `Infinity`.
const NON_FINITE_LITERALS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

/// Rewrite non-finite numeric literals to `null`.
///
/// Returns the input unchanged (borrowed) when there is nothing to repair.
pub fn sanitize(raw: &str) -> Cow<'_, str> {
    let bytes = raw.as_bytes();
    let mut repaired: Option<String> = None;
    let mut copied = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut prev: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
                prev = Some(b);
            }
            i += 1;
            continue;
        }

        match b {
            b'"' => {
                in_string = true;
                i += 1;
            }
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            _ => {
                if matches!(prev, Some(b':' | b'[' | b',')) {
                    if let Some(literal) = literal_at(bytes, i) {
                        let out = repaired.get_or_insert_with(|| String::with_capacity(raw.len()));
                        out.push_str(&raw[copied..i]);
                        out.push_str("null");
                        i += literal.len();
                        copied = i;
                        prev = Some(b'l');
                        continue;
                    }
                }
                prev = Some(b);
                i += 1;
            }
        }
    }

    match repaired {
        Some(mut out) => {
            out.push_str(&raw[copied..]);
            Cow::Owned(out)
        }
        None => Cow::Borrowed(raw),
    }
}

fn literal_at(bytes: &[u8], at: usize) -> Option<&'static str> {
    let rest = &bytes[at..];
    NON_FINITE_LITERALS.into_iter().find(|lit| {
        rest.starts_with(lit.as_bytes())
            && rest
                .get(lit.len())
                .map_or(true, |next| !(next.is_ascii_alphanumeric() || *next == b'_'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_replaces_colon_nan() {
        let raw = r#"{"knee_angle": NaN}"#;
        assert_eq!(sanitize(raw), r#"{"knee_angle": null}"#);
    }

    #[test]
    fn test_replaces_every_occurrence() {
        let raw = r#"{"hip_angle": NaN, "knee_angle": NaN, "torso_angle": 12.5}"#;
        let fixed = sanitize(raw);
        let parsed: Value = serde_json::from_str(&fixed).unwrap();
        let expected: Value =
            serde_json::from_str(r#"{"hip_angle": null, "knee_angle": null, "torso_angle": 12.5}"#)
                .unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_full_analyze_body_parses() {
        let raw = r#"{"analysis":{"overall":"good","measurements":{"knee_angle": NaN},"issues":[]},"keypoints":[]}"#;
        assert!(serde_json::from_str::<Value>(raw).is_err());

        let parsed: Value = serde_json::from_str(&sanitize(raw)).unwrap();
        assert_eq!(parsed["analysis"]["measurements"]["knee_angle"], Value::Null);
        assert_eq!(parsed["analysis"]["issues"], json!([]));
        assert!(parsed.get("session").is_none());
    }

    #[test]
    fn test_no_space_and_array_positions() {
        let raw = r#"{"a":NaN,"k":[[NaN, NaN],[1.0,Infinity]],"b":-Infinity}"#;
        let parsed: Value = serde_json::from_str(&sanitize(raw)).unwrap();
        assert_eq!(parsed, json!({"a": null, "k": [[null, null], [1.0, null]], "b": null}));
    }

    #[test]
    fn test_string_contents_untouched() {
        let raw = r#"{"issue": "angle: NaN, retry", "quoted": "say \"x\": NaN"}"#;
        assert!(matches!(sanitize(raw), Cow::Borrowed(_)));
    }

    #[test]
    fn test_clean_body_is_borrowed() {
        let raw = r#"{"analysis":{"overall":"good","measurements":{"knee_angle":101.2}}}"#;
        assert!(matches!(sanitize(raw), Cow::Borrowed(s) if s == raw));
    }

    #[test]
    fn test_identifier_prefix_not_replaced() {
        let raw = r#"{"a": NaNx}"#;
        assert_eq!(sanitize(raw), raw);
    }

    #[test]
    fn test_non_ascii_strings_survive() {
        let raw = r#"{"overall": "良い", "hip_angle": NaN}"#;
        assert_eq!(sanitize(raw), r#"{"overall": "良い", "hip_angle": null}"#);
    }
}
