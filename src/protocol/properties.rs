//! Typed message properties carried in the content header.

use super::value::{FieldTable, Value};

/// `delivery_mode` value for messages the broker may drop on restart.
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;
/// `delivery_mode` value for messages persisted by the broker.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Properties of a `basic` class message.
///
/// Only properties that are set are put on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Option<FieldTable>,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<u64>,
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub cluster_id: Option<String>,
}

impl BasicProperties {
    /// Mark the message persistent (or transient).
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.delivery_mode = Some(if persistent {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        });
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn headers(mut self, headers: FieldTable) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// True if `delivery_mode` is persistent.
    pub fn is_persistent(&self) -> bool {
        self.delivery_mode == Some(DELIVERY_MODE_PERSISTENT)
    }

    /// Properties as a field table (the `type` property is keyed `type`).
    pub fn to_table(&self) -> FieldTable {
        let mut table = FieldTable::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                table.insert(key.to_string(), value);
            }
        };

        put("content_type", self.content_type.clone().map(Value::from));
        put("content_encoding", self.content_encoding.clone().map(Value::from));
        put("headers", self.headers.clone().map(Value::Table));
        put("delivery_mode", self.delivery_mode.map(Value::from));
        put("priority", self.priority.map(Value::from));
        put("correlation_id", self.correlation_id.clone().map(Value::from));
        put("reply_to", self.reply_to.clone().map(Value::from));
        put("expiration", self.expiration.clone().map(Value::from));
        put("message_id", self.message_id.clone().map(Value::from));
        put("timestamp", self.timestamp.map(Value::Timestamp));
        put("type", self.kind.clone().map(Value::from));
        put("user_id", self.user_id.clone().map(Value::from));
        put("app_id", self.app_id.clone().map(Value::from));
        put("cluster_id", self.cluster_id.clone().map(Value::from));
        table
    }

    /// Read properties back from a content header table. Unknown keys and
    /// values of the wrong kind are ignored.
    pub fn from_table(table: &FieldTable) -> Self {
        let string = |key: &str| table.get(key).and_then(Value::as_str).map(str::to_string);
        let octet = |key: &str| {
            table
                .get(key)
                .and_then(Value::as_int)
                .and_then(|v| u8::try_from(v).ok())
        };

        Self {
            content_type: string("content_type"),
            content_encoding: string("content_encoding"),
            headers: table.get("headers").and_then(Value::as_table).cloned(),
            delivery_mode: octet("delivery_mode"),
            priority: octet("priority"),
            correlation_id: string("correlation_id"),
            reply_to: string("reply_to"),
            expiration: string("expiration"),
            message_id: string("message_id"),
            timestamp: match table.get("timestamp") {
                Some(Value::Timestamp(t)) => Some(*t),
                Some(Value::Int(t)) => u64::try_from(*t).ok(),
                _ => None,
            },
            kind: string("type"),
            user_id: string("user_id"),
            app_id: string("app_id"),
            cluster_id: string("cluster_id"),
        }
    }
}
