//! Option structs for channel operations.
//!
//! Every struct implements `Default` with the broker's defaults, so callers
//! only spell out what they change:
//!
//! ```
//! use amqp_session::channel::QueueDeclareOptions;
//!
//! let options = QueueDeclareOptions { durable: true, ..Default::default() };
//! assert!(!options.exclusive);
//! ```

use crate::field_table;
use crate::protocol::{BasicProperties, FieldTable};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeDeclareOptions {
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub arguments: FieldTable,
}

impl ExchangeDeclareOptions {
    pub(crate) fn to_table(&self, exchange: &str, kind: &str) -> FieldTable {
        field_table! {
            "exchange" => exchange,
            "type" => kind,
            "passive" => self.passive,
            "durable" => self.durable,
            "auto_delete" => self.auto_delete,
            "internal" => self.internal,
            "arguments" => self.arguments.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeDeleteOptions {
    pub if_unused: bool,
}

/// Options shared by exchange and queue (un)binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindOptions {
    pub routing_key: String,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDeclareOptions {
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: FieldTable,
}

impl QueueDeclareOptions {
    pub(crate) fn to_table(&self, queue: &str) -> FieldTable {
        field_table! {
            "queue" => queue,
            "passive" => self.passive,
            "durable" => self.durable,
            "exclusive" => self.exclusive,
            "auto_delete" => self.auto_delete,
            "arguments" => self.arguments.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDeleteOptions {
    pub if_unused: bool,
    pub if_empty: bool,
}

/// Prefetch limits for `basic_qos`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QosOptions {
    pub prefetch_count: u16,
    pub prefetch_size: u32,
    /// Apply to the whole connection instead of this channel.
    pub global: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumeOptions {
    pub no_local: bool,
    /// Deliveries are considered acknowledged as soon as they are sent.
    pub no_ack: bool,
    pub exclusive: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetOptions {
    pub no_ack: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NackOptions {
    pub multiple: bool,
    pub requeue: bool,
}

impl Default for NackOptions {
    fn default() -> Self {
        Self {
            multiple: false,
            requeue: true,
        }
    }
}

/// Options for `basic_publish`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    /// Return the message if it cannot be routed to any queue.
    pub mandatory: bool,
    /// Return the message if it cannot be delivered to a consumer right away.
    pub immediate: bool,
    /// Message properties for the content header.
    pub properties: BasicProperties,
}

impl PublishOptions {
    /// Shorthand for persistent delivery with otherwise default options.
    pub fn persistent() -> Self {
        Self {
            properties: BasicProperties::default().persistent(true),
            ..Self::default()
        }
    }

    pub(crate) fn to_table(&self, exchange: &str, routing_key: &str) -> FieldTable {
        field_table! {
            "exchange" => exchange,
            "routing_key" => routing_key,
            "mandatory" => self.mandatory,
            "immediate" => self.immediate,
        }
    }
}
