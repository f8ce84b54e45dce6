//! Named value transforms
//!
//! Layout files pick one of these by name instead of embedding code:
//!
//! ```json
//! "TRANSFORM": "trim"
//! "TRANSFORM": {"substring_before": " "}
//! "TRANSFORM": {"token": 1}
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Pure string transform applied to the selected raw value before typing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Trim,
    Lowercase,
    Uppercase,
    /// Text before the first occurrence of the delimiter (whole value if absent)
    SubstringBefore(String),
    /// Text after the first occurrence of the delimiter (nothing if absent)
    SubstringAfter(String),
    /// Zero-based whitespace separated token
    Token(usize),
}

impl Transform {
    /// Apply the transform. `None` means the value disappears.
    pub fn apply<'a>(&self, raw: &'a str) -> Option<Cow<'a, str>> {
        let out: Cow<'a, str> = match self {
            Transform::Trim => Cow::Borrowed(raw.trim()),
            Transform::Lowercase => Cow::Owned(raw.to_lowercase()),
            Transform::Uppercase => Cow::Owned(raw.to_uppercase()),
            Transform::SubstringBefore(delim) => match raw.find(delim.as_str()) {
                Some(pos) => Cow::Borrowed(&raw[..pos]),
                None => Cow::Borrowed(raw),
            },
            Transform::SubstringAfter(delim) => {
                let pos = raw.find(delim.as_str())?;
                Cow::Borrowed(&raw[pos + delim.len()..])
            },
            Transform::Token(n) => Cow::Borrowed(raw.split_whitespace().nth(*n)?),
        };

        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// Describe why the transform's parameters are unusable, if they are
    pub(crate) fn problem(&self) -> Option<&'static str> {
        match self {
            Transform::SubstringBefore(d) | Transform::SubstringAfter(d) if d.is_empty() => {
                Some("delimiter must not be empty")
            },
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn apply(t: Transform, raw: &str) -> Option<String> {
        t.apply(raw).map(|c| c.into_owned())
    }

    #[test]
    fn test_substring_before() {
        let t = Transform::SubstringBefore("-".into());
        assert_eq!(apply(t.clone(), "BSYNRYMUTXBXSQ-UHFFFAOYSA-N").as_deref(), Some("BSYNRYMUTXBXSQ"));
        assert_eq!(apply(t.clone(), "nodelimiter").as_deref(), Some("nodelimiter"));
        assert_eq!(apply(t, "-leading"), None);
    }

    #[test]
    fn test_substring_after() {
        let t = Transform::SubstringAfter("=".into());
        assert_eq!(apply(t.clone(), "InChI=1S/CH4/h1H4").as_deref(), Some("1S/CH4/h1H4"));
        assert_eq!(apply(t, "no equals sign"), None);
    }

    #[test]
    fn test_token_and_case() {
        assert_eq!(apply(Transform::Token(1), "a  b c").as_deref(), Some("b"));
        assert_eq!(apply(Transform::Token(5), "a b"), None);
        assert_eq!(apply(Transform::Uppercase, "ccO").as_deref(), Some("CCO"));
        assert_eq!(apply(Transform::Trim, "   "), None);
    }

    #[test]
    fn test_deserialize_names() {
        let t: Transform = serde_json::from_str(r#""lowercase""#).unwrap();
        assert_eq!(t, Transform::Lowercase);
        let t: Transform = serde_json::from_str(r#"{"substring_before": " "}"#).unwrap();
        assert_eq!(t, Transform::SubstringBefore(" ".into()));
        let t: Transform = serde_json::from_str(r#"{"token": 2}"#).unwrap();
        assert_eq!(t, Transform::Token(2));
        assert!(serde_json::from_str::<Transform>(r#""eval""#).is_err());
    }

    #[test]
    fn test_empty_delimiter_is_a_problem() {
        assert!(Transform::SubstringAfter(String::new()).problem().is_some());
        assert!(Transform::Trim.problem().is_none());
    }
}
