//! Message envelope types: body, headers, delivery options.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default time a requester waits for a reply.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Body
// =============================================================================

/// Opaque, shareable message payload.
///
/// Bodies are delivered in-process and never serialized; consumers recover the
/// concrete value with [`downcast_ref`](Body::downcast_ref). Text is always
/// stored as `String`.
#[derive(Clone, Default)]
pub struct Body(Option<Arc<dyn Any + Send + Sync>>);

impl Body {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// A body carrying no payload.
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.as_ref().is_some_and(|v| v.is::<T>())
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Shorthand for a `String` payload.
    pub fn as_str(&self) -> Option<&str> {
        self.downcast_ref::<String>().map(String::as_str)
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

impl From<()> for Body {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.0, self.as_str()) {
            (None, _) => f.write_str("Body(empty)"),
            (Some(_), Some(text)) => write!(f, "Body({text:?})"),
            (Some(_), None) => f.write_str("Body(..)"),
        }
    }
}

// =============================================================================
// Headers
// =============================================================================

/// Ordered multimap of message headers with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value, keeping existing values for the same name.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.push((name.into(), value.into()));
        self
    }

    /// Replaces every value of `name` with `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.remove(&name);
        self.0.push((name, value.into()));
        self
    }

    /// Builder-style [`add`](Self::add).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(name, value);
        self
    }

    /// Returns the first value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// =============================================================================
// DeliveryOptions
// =============================================================================

/// Per-send options: reply timeout and extra headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOptions {
    pub timeout: Duration,
    pub headers: Headers,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SEND_TIMEOUT,
            headers: Headers::new(),
        }
    }
}

impl DeliveryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }
}

// =============================================================================
// Message
// =============================================================================

/// A message as delivered to a consumer.
#[derive(Debug, Clone)]
pub struct Message {
    address: String,
    headers: Headers,
    body: Body,
    reply_address: Option<String>,
}

impl Message {
    pub fn new(address: impl Into<String>, body: impl Into<Body>) -> Self {
        Self {
            address: address.into(),
            headers: Headers::new(),
            body: body.into(),
            reply_address: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_reply_address(mut self, reply_address: impl Into<String>) -> Self {
        self.reply_address = Some(reply_address.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn reply_address(&self) -> Option<&str> {
        self.reply_address.as_deref()
    }

    /// Splits the message into its parts.
    pub fn into_parts(self) -> (String, Headers, Body, Option<String>) {
        (self.address, self.headers, self.body, self.reply_address)
    }
}
