//! Assembled events.

use bytes::Bytes;

use super::frame::ContentHeader;
use crate::error::{Error, Result};
use super::method::Method;
use super::value::{FieldTable, Value};

/// One method received from the broker, together with its content (if the
/// method carries any).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Channel the event arrived on.
    pub channel: u16,
    /// The method.
    pub method: Method,
    /// Method fields; every declared field is present.
    pub properties: FieldTable,
    /// Content header, for content-bearing methods.
    pub header: Option<ContentHeader>,
    /// Complete body, for content-bearing methods.
    pub body: Option<Bytes>,
}

impl Event {
    /// Event without content.
    pub fn new(channel: u16, method: Method, properties: FieldTable) -> Self {
        Self {
            channel,
            method,
            properties,
            header: None,
            body: None,
        }
    }

    /// A method field by name.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// A string-valued method field.
    pub fn str_property(&self, name: &str) -> Option<&str> {
        self.property(name).and_then(Value::as_str)
    }

    /// An integer-valued method field.
    pub fn int_property(&self, name: &str) -> Option<i64> {
        self.property(name).and_then(Value::as_int)
    }

    /// Delivery tag of a `basic_deliver` or `basic_get_ok`.
    pub fn delivery_tag(&self) -> Option<u64> {
        self.int_property("delivery_tag")
            .and_then(|t| u64::try_from(t).ok())
    }

    /// Body bytes, empty for events without content.
    pub fn body(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }

    /// Message properties from the content header.
    pub fn message_properties(&self) -> Option<&FieldTable> {
        self.header.as_ref().map(|h| &h.properties)
    }
}

/// `delivery_tag` as a field value. Field integers are signed, so tags above
/// `i64::MAX` are rejected.
pub(crate) fn delivery_tag_value(delivery_tag: u64) -> Result<Value> {
    i64::try_from(delivery_tag)
        .map(Value::Int)
        .map_err(|_| Error::Encoding(format!("delivery_tag {} out of range", delivery_tag)))
}
