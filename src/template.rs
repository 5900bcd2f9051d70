//! Placeholder resolution for response and webhook templates.
//!
//! Templates embed `${{ ... }}` expressions that draw values from the
//! request body and headers or generate fresh data. A text that is exactly
//! one placeholder resolves to the native value (numbers stay numbers);
//! placeholders interleaved with literal text are stringified in place.
//!
//! # Supported Expressions
//!
//! - `body.<a.b.c>` - dotted traversal of the decoded request body
//! - `header.<name>` - case-insensitive header lookup
//! - `iterator` / `iterator.<a.b.c>` - the current array-mapping element
//! - `now` - current UTC timestamp (RFC 3339, second precision)
//! - `after <N> <unit>` / `before <N> <unit>` - `now` shifted by the offset
//! - `uuid` - a random v4 identifier
//! - `random [min] [max]` - integer in `[min, max)`, defaults `[0, 1000000)`
//! - `digit [count]` / `letter [count]` - random character strings

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use axum::http::HeaderMap;
use rand::Rng;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();
static TIME_OFFSET_REGEX: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX.get_or_init(|| Regex::new(r"\$\{\{([^}]*)\}\}").unwrap())
}

fn time_offset_regex() -> &'static Regex {
    TIME_OFFSET_REGEX.get_or_init(|| {
        Regex::new(r"^(after|before) ([0-9]+) (millisecond|second|minute|hour|day)s?$").unwrap()
    })
}

/// Reasons a single placeholder fails to resolve.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("path `{0}` not found in request body")]
    BodyPath(String),

    #[error("header `{0}` not found")]
    Header(String),

    #[error("no iterator in scope")]
    NoIterator,

    #[error("path `{0}` not found in iterator")]
    IteratorPath(String),

    #[error("invalid argument in `{0}`")]
    Argument(String),

    #[error("unrecognized expression `{0}`")]
    Unrecognized(String),
}

/// Time source for `now` and relative-offset expressions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Evaluates placeholders against one request.
///
/// A resolver is immutable. [`Resolver::with_iterator`] derives a child
/// scoped to one array element without touching the parent, so per-element
/// expansion can run concurrently.
#[derive(Clone)]
pub struct Resolver {
    body: Arc<Map<String, Value>>,
    headers: Arc<HeaderMap>,
    iterator: Option<Arc<Value>>,
    clock: Arc<dyn Clock>,
}

impl Resolver {
    /// Create a resolver over the decoded request body and headers.
    pub fn new(body: Map<String, Value>, headers: HeaderMap) -> Self {
        Self::with_clock(body, headers, Arc::new(SystemClock))
    }

    /// Create a resolver with an explicit time source.
    pub fn with_clock(body: Map<String, Value>, headers: HeaderMap, clock: Arc<dyn Clock>) -> Self {
        Self {
            body: Arc::new(body),
            headers: Arc::new(headers),
            iterator: None,
            clock,
        }
    }

    /// Derive a resolver scoped to one array-mapping element.
    pub fn with_iterator(&self, value: Value) -> Self {
        let mut child = self.clone();
        child.iterator = Some(Arc::new(value));
        child
    }

    /// Resolve every placeholder in `text`.
    ///
    /// Text without placeholders is returned unchanged. When mixing
    /// placeholders with literal text, a placeholder that fails to resolve
    /// is logged and left blank; the rest of the text still renders.
    pub fn resolve(&self, text: &str) -> Result<Value, ResolveError> {
        let regex = placeholder_regex();

        let Some(first) = regex.find(text) else {
            return Ok(Value::String(text.to_string()));
        };
        if first.start() == 0 && first.end() == text.len() {
            let expression = &text[3..text.len() - 2];
            return self.evaluate(expression.trim());
        }

        let mut output = String::new();
        let mut last = 0;
        for captures in regex.captures_iter(text) {
            let whole = captures.get(0).unwrap();
            output.push_str(&text[last..whole.start()]);
            match self.evaluate(captures[1].trim()) {
                Ok(value) => output.push_str(&stringify(&value)),
                Err(error) => warn!(%error, "placeholder left blank"),
            }
            last = whole.end();
        }
        output.push_str(&text[last..]);

        Ok(Value::String(output))
    }

    fn evaluate(&self, expression: &str) -> Result<Value, ResolveError> {
        if let Some(path) = expression.strip_prefix("body.") {
            return traverse(&self.body, path)
                .ok_or_else(|| ResolveError::BodyPath(path.to_string()));
        }

        if let Some(name) = expression.strip_prefix("header.") {
            return self.header_value(name);
        }

        if expression == "iterator" || expression == "iterator." {
            let iterator = self.iterator.as_deref().ok_or(ResolveError::NoIterator)?;
            return Ok(iterator.clone());
        }
        if let Some(path) = expression.strip_prefix("iterator.") {
            let iterator = self.iterator.as_deref().ok_or(ResolveError::NoIterator)?;
            let root = iterator
                .as_object()
                .ok_or_else(|| ResolveError::IteratorPath(path.to_string()))?;
            return traverse(root, path)
                .ok_or_else(|| ResolveError::IteratorPath(path.to_string()));
        }

        if expression == "now" {
            return Ok(Value::String(format_timestamp(self.clock.now())));
        }

        if let Some(captures) = time_offset_regex().captures(expression) {
            let amount: i64 = captures[2]
                .parse()
                .map_err(|_| ResolveError::Argument(expression.to_string()))?;
            let offset = match &captures[3] {
                "millisecond" => Duration::milliseconds(amount),
                "second" => Duration::seconds(amount),
                "minute" => Duration::minutes(amount),
                "hour" => Duration::hours(amount),
                _ => Duration::days(amount),
            };
            let offset = if &captures[1] == "before" { -offset } else { offset };
            return Ok(Value::String(format_timestamp(self.clock.now() + offset)));
        }

        if expression == "uuid" {
            return Ok(Value::String(Uuid::new_v4().to_string()));
        }

        if expression == "random" || expression.starts_with("random ") {
            return random_int(expression);
        }

        if expression == "digit" || expression.starts_with("digit ") {
            return random_digits(expression);
        }

        if expression == "letter" || expression.starts_with("letter ") {
            return random_letters(expression);
        }

        Err(ResolveError::Unrecognized(expression.to_string()))
    }

    fn header_value(&self, name: &str) -> Result<Value, ResolveError> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(|value| Value::String(value.to_string()))
            .ok_or_else(|| ResolveError::Header(name.to_string()))
    }
}

/// Dotted traversal; every intermediate segment must resolve to an object.
fn traverse(root: &Map<String, Value>, path: &str) -> Option<Value> {
    let mut current = root;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        let value = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(value.clone());
        }
        current = value.as_object()?;
    }
    None
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Stringify a resolved value for embedding into surrounding literal text.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn random_int(expression: &str) -> Result<Value, ResolveError> {
    let segments: Vec<&str> = expression.split_whitespace().collect();

    let mut min: i64 = 0;
    let mut max: i64 = 1_000_000;

    if segments.len() > 3 {
        return Err(ResolveError::Argument(expression.to_string()));
    }
    if segments.len() >= 2 {
        min = segments[1]
            .parse()
            .map_err(|_| ResolveError::Argument(expression.to_string()))?;
    }
    if segments.len() == 3 {
        max = segments[2]
            .parse()
            .map_err(|_| ResolveError::Argument(expression.to_string()))?;
    }
    if min >= max {
        return Err(ResolveError::Argument(expression.to_string()));
    }

    let value = rand::thread_rng().gen_range(min..max);
    Ok(Value::from(value))
}

fn parse_count(expression: &str) -> Result<usize, ResolveError> {
    let segments: Vec<&str> = expression.split_whitespace().collect();
    match segments.len() {
        1 => Ok(1),
        2 => segments[1]
            .parse()
            .map_err(|_| ResolveError::Argument(expression.to_string())),
        _ => Err(ResolveError::Argument(expression.to_string())),
    }
}

fn random_digits(expression: &str) -> Result<Value, ResolveError> {
    let count = parse_count(expression)?;
    let mut rng = rand::thread_rng();
    let digits: String = (0..count)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect();
    Ok(Value::String(digits))
}

fn random_letters(expression: &str) -> Result<Value, ResolveError> {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

    let count = parse_count(expression)?;
    let mut rng = rand::thread_rng();
    let letters: String = (0..count)
        .map(|_| char::from(LETTERS[rng.gen_range(0..LETTERS.len())]))
        .collect();
    Ok(Value::String(letters))
}
