//! Literal URLs
//!
//! Scalar property values are stored inline in the link target as a
//! `literal://` URL so that they can take part in triples like any other node.

use serde_json::{Number, Value};
use thiserror::Error;

const PREFIX: &str = "literal://";

/// Errors decoding a literal URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiteralError {
    /// The URL does not use the `literal://` scheme.
    #[error("not a literal url: {0}")]
    NotLiteral(String),

    /// The scheme is recognised but the encoding is not.
    #[error("unsupported literal encoding '{0}'")]
    UnsupportedEncoding(String),

    /// The payload could not be decoded.
    #[error("malformed literal payload: {reason}")]
    Malformed {
        /// What went wrong
        reason: String,
    },
}

/// An inline scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `literal://string:<url-encoded>`
    String(String),
    /// `literal://number:<n>`; integers stay integers, floats stay floats
    Number(Number),
    /// `literal://json:<url-encoded json>`
    Json(Value),
}

impl Literal {
    /// Literal string value.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Pick the narrowest encoding for a JSON value.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::String(s.clone()),
            Value::Number(n) => Self::Number(n.clone()),
            other => Self::Json(other.clone()),
        }
    }

    /// Whether `url` uses the literal scheme.
    pub fn is_literal_url(url: &str) -> bool {
        url.starts_with(PREFIX)
    }

    /// Render as a link target.
    pub fn to_url(&self) -> String {
        match self {
            Self::String(s) => format!("{PREFIX}string:{}", urlencoding::encode(s)),
            Self::Number(n) => format!("{PREFIX}number:{n}"),
            Self::Json(v) => format!("{PREFIX}json:{}", urlencoding::encode(&v.to_string())),
        }
    }

    /// Parse a link target back into a value.
    pub fn from_url(url: &str) -> Result<Self, LiteralError> {
        let rest = url
            .strip_prefix(PREFIX)
            .ok_or_else(|| LiteralError::NotLiteral(url.to_string()))?;
        let (encoding, payload) = rest
            .split_once(':')
            .ok_or_else(|| LiteralError::UnsupportedEncoding(rest.to_string()))?;

        match encoding {
            "string" => Ok(Self::String(decode(payload)?)),
            "number" => payload
                .parse::<Number>()
                .map(Self::Number)
                .map_err(|e| LiteralError::Malformed {
                    reason: format!("{e}"),
                }),
            "json" => serde_json::from_str(&decode(payload)?)
                .map(Self::Json)
                .map_err(|e| LiteralError::Malformed {
                    reason: format!("{e}"),
                }),
            other => Err(LiteralError::UnsupportedEncoding(other.to_string())),
        }
    }

    /// The decoded value as JSON.
    pub fn to_value(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Number(n) => Value::Number(n.clone()),
            Self::Json(v) => v.clone(),
        }
    }

    /// Text of a string literal.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

fn decode(payload: &str) -> Result<String, LiteralError> {
    urlencoding::decode(payload)
        .map(|s| s.into_owned())
        .map_err(|e| LiteralError::Malformed {
            reason: format!("{e}"),
        })
}
