//! Messages and message sources

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::source::Payload;

/// Header linking row messages back to the poll that produced them
pub const CORRELATION_ID: &str = "correlation_id";
/// 1-based position of a row message within its poll
pub const SEQUENCE_NUMBER: &str = "sequence_number";
/// Id of the message whose processing failed
pub const FAILED_MESSAGE_ID: &str = "failed_message_id";
/// Name of the error channel that should receive failures of this message
pub const ERROR_CHANNEL: &str = "error_channel";

/// Message metadata: a unique id, a creation timestamp and free-form headers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageHeaders {
    id: Uuid,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    values: BTreeMap<String, String>,
}

impl MessageHeaders {
    /// Fresh headers with a new id and the current time
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            values: BTreeMap::new(),
        }
    }

    /// Fresh headers carrying the given values
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut headers = Self::new();
        headers.extend(values);
        headers
    }

    /// Message id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Get a header value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Set a header value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Set several header values
    pub fn extend<I, K, V>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.values
            .extend(values.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// Free-form header values
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Headers for a message derived from this one: new id, same free-form
    /// values, correlated back to this message
    pub fn derive(&self) -> Self {
        let mut headers = Self::with_values(self.values.clone());
        headers.insert(CORRELATION_ID, self.id.to_string());
        headers
    }
}

impl Default for MessageHeaders {
    fn default() -> Self {
        Self::new()
    }
}

/// A payload with headers
#[derive(Debug, Clone, Serialize)]
pub struct Message<P> {
    headers: MessageHeaders,
    payload: P,
}

impl<P> Message<P> {
    /// Wrap a payload with fresh headers
    pub fn new(payload: P) -> Self {
        Self::with_headers(payload, MessageHeaders::new())
    }

    /// Wrap a payload with the given headers
    pub fn with_headers(payload: P, headers: MessageHeaders) -> Self {
        Self { headers, payload }
    }

    /// Message headers
    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// Message payload
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Take the payload
    pub fn into_payload(self) -> P {
        self.payload
    }

    /// Split into headers and payload
    pub fn into_parts(self) -> (MessageHeaders, P) {
        (self.headers, self.payload)
    }
}

/// A failure reported on an error channel
#[derive(Debug)]
pub struct ErrorMessage {
    headers: MessageHeaders,
    error: Error,
    component_type: &'static str,
}

impl ErrorMessage {
    /// Wrap a failure raised by a component
    pub fn new(error: Error, component_type: &'static str) -> Self {
        Self {
            headers: MessageHeaders::new(),
            error,
            component_type,
        }
    }

    /// Wrap a failure raised while handling `failed`
    pub fn for_message(error: Error, component_type: &'static str, failed: &MessageHeaders) -> Self {
        let mut headers = failed.derive();
        headers.insert(FAILED_MESSAGE_ID, failed.id().to_string());
        Self {
            headers,
            error,
            component_type,
        }
    }

    /// Error message headers
    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// The failure
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Take the failure
    pub fn into_error(self) -> Error {
        self.error
    }

    /// Type of the component that failed
    pub fn component_type(&self) -> &'static str {
        self.component_type
    }
}

/// A pollable producer of messages
pub trait MessageSource<T>: Send + Sync {
    /// Poll once and wrap the result in a message.
    ///
    /// Returns without touching the database; the payload's handle does the I/O.
    fn receive(&self) -> Result<Message<Payload<T>>>;

    /// Component type name used in logs and error messages
    fn component_type(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_unique() {
        let a = MessageHeaders::new();
        let b = MessageHeaders::new();
        assert_ne!(a.id(), b.id());
        assert!(a.values().is_empty());
    }

    #[test]
    fn test_derive_correlates() {
        let parent = MessageHeaders::with_values([("source", "orders")]);
        let child = parent.derive();

        assert_ne!(child.id(), parent.id());
        assert_eq!(child.get("source"), Some("orders"));
        assert_eq!(
            child.get(CORRELATION_ID),
            Some(parent.id().to_string().as_str())
        );
    }

    #[test]
    fn test_error_message_links_failed_message() {
        let failed = MessageHeaders::new();
        let msg = ErrorMessage::for_message(Error::Uninitialized, "test", &failed);

        assert_eq!(
            msg.headers().get(FAILED_MESSAGE_ID),
            Some(failed.id().to_string().as_str())
        );
        assert_eq!(msg.component_type(), "test");
        assert!(matches!(msg.error(), Error::Uninitialized));
    }

    #[test]
    fn test_message_serializes_headers_and_payload() {
        let mut headers = MessageHeaders::new();
        headers.insert("k", "v");
        let message = Message::with_headers(serde_json::json!({"id": 1}), headers);

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["payload"]["id"], 1);
        assert_eq!(json["headers"]["values"]["k"], "v");
        assert!(json["headers"]["id"].is_string());
    }
}
