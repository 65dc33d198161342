//! Closed registry of protocol methods.
//!
//! Every method the broker protocol defines is one [`Method`] variant backed
//! by a static [`MethodInfo`] row: numeric id (`class << 16 | method`), wire
//! name, whether content frames follow it, and its ordered field list.

use std::fmt;
use std::str::FromStr;

use super::value::{FieldTable, Value};
use crate::error::UsageError;

/// Wire type of a method field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Single bit, `Value::Bool`.
    Bit,
    /// 8-bit unsigned.
    Octet,
    /// 16-bit unsigned.
    Short,
    /// 32-bit unsigned.
    Long,
    /// 64-bit unsigned (stored as a non-negative `i64`).
    LongLong,
    /// Byte string of at most 255 bytes.
    ShortStr,
    /// Byte string of at most 2^32-1 bytes.
    LongStr,
    /// Field table.
    Table,
}

impl FieldKind {
    /// Value used when a field is absent.
    pub fn zero(self) -> Value {
        match self {
            FieldKind::Bit => Value::Bool(false),
            FieldKind::Octet | FieldKind::Short | FieldKind::Long | FieldKind::LongLong => {
                Value::Int(0)
            }
            FieldKind::ShortStr | FieldKind::LongStr => Value::Bytes(bytes::Bytes::new()),
            FieldKind::Table => Value::Table(FieldTable::new()),
        }
    }

    /// Check that `value` can be carried by a field of this kind.
    pub fn check(self, value: &Value) -> Result<(), String> {
        let max_int = match self {
            FieldKind::Octet => Some(u8::MAX as i64),
            FieldKind::Short => Some(u16::MAX as i64),
            FieldKind::Long => Some(u32::MAX as i64),
            FieldKind::LongLong => Some(i64::MAX),
            _ => None,
        };

        match (self, value) {
            (FieldKind::Bit, Value::Bool(_)) => Ok(()),
            (_, Value::Int(i)) if max_int.is_some() => match max_int {
                Some(max) if (0..=max).contains(i) => Ok(()),
                _ => Err(format!("integer {} out of range for {:?}", i, self)),
            },
            (FieldKind::ShortStr, Value::Bytes(b)) if b.len() > 255 => {
                Err(format!("short string of {} bytes exceeds 255", b.len()))
            }
            (FieldKind::ShortStr, Value::Bytes(_)) => Ok(()),
            (FieldKind::LongStr, Value::Bytes(b)) if b.len() as u64 > u32::MAX as u64 => {
                Err(format!("long string of {} bytes is too long", b.len()))
            }
            (FieldKind::LongStr, Value::Bytes(_)) => Ok(()),
            (FieldKind::Table, Value::Table(_)) => Ok(()),
            (kind, value) => Err(format!("expected {:?}, got {}", kind, value.kind_name())),
        }
    }
}

/// One declared field of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Property key.
    pub name: &'static str,
    /// Wire type.
    pub kind: FieldKind,
}

/// Static description of a method.
#[derive(Debug)]
pub struct MethodInfo {
    /// The variant this row describes.
    pub method: Method,
    /// `class_id << 16 | method_id`.
    pub id: u32,
    /// Wire name, e.g. `queue_declare`.
    pub name: &'static str,
    /// Whether a content header and body follow the method frame.
    pub has_content: bool,
    /// Declared fields in wire order.
    pub fields: &'static [Field],
}

macro_rules! methods {
    ($(
        $variant:ident = $id:literal, $name:literal, $content:literal,
            [ $( $field:literal : $kind:ident ),* $(,)? ];
    )*) => {
        /// A protocol method (operation or notification type).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Method {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant,
            )*
        }

        static METHODS: &[MethodInfo] = &[
            $(
                MethodInfo {
                    method: Method::$variant,
                    id: $id,
                    name: $name,
                    has_content: $content,
                    fields: &[ $( Field { name: $field, kind: FieldKind::$kind } ),* ],
                },
            )*
        ];
    };
}

methods! {
    ConnectionStart = 0x000A_000A, "connection_start", false,
        ["version_major": Octet, "version_minor": Octet, "server_properties": Table,
         "mechanisms": LongStr, "locales": LongStr];
    ConnectionStartOk = 0x000A_000B, "connection_start_ok", false,
        ["client_properties": Table, "mechanism": ShortStr, "response": LongStr,
         "locale": ShortStr];
    ConnectionSecure = 0x000A_0014, "connection_secure", false, ["challenge": LongStr];
    ConnectionSecureOk = 0x000A_0015, "connection_secure_ok", false, ["response": LongStr];
    ConnectionTune = 0x000A_001E, "connection_tune", false,
        ["channel_max": Short, "frame_max": Long, "heartbeat": Short];
    ConnectionTuneOk = 0x000A_001F, "connection_tune_ok", false,
        ["channel_max": Short, "frame_max": Long, "heartbeat": Short];
    ConnectionOpen = 0x000A_0028, "connection_open", false,
        ["virtual_host": ShortStr, "capabilities": ShortStr, "insist": Bit];
    ConnectionOpenOk = 0x000A_0029, "connection_open_ok", false, ["known_hosts": ShortStr];
    ConnectionClose = 0x000A_0032, "connection_close", false,
        ["reply_code": Short, "reply_text": ShortStr, "class_id": Short, "method_id": Short];
    ConnectionCloseOk = 0x000A_0033, "connection_close_ok", false, [];
    ConnectionBlocked = 0x000A_003C, "connection_blocked", false, ["reason": ShortStr];
    ConnectionUnblocked = 0x000A_003D, "connection_unblocked", false, [];

    ChannelOpen = 0x0014_000A, "channel_open", false, ["out_of_band": ShortStr];
    ChannelOpenOk = 0x0014_000B, "channel_open_ok", false, ["channel_id": LongStr];
    ChannelFlow = 0x0014_0014, "channel_flow", false, ["active": Bit];
    ChannelFlowOk = 0x0014_0015, "channel_flow_ok", false, ["active": Bit];
    ChannelClose = 0x0014_0028, "channel_close", false,
        ["reply_code": Short, "reply_text": ShortStr, "class_id": Short, "method_id": Short];
    ChannelCloseOk = 0x0014_0029, "channel_close_ok", false, [];

    AccessRequest = 0x001E_000A, "access_request", false,
        ["realm": ShortStr, "exclusive": Bit, "passive": Bit, "active": Bit, "write": Bit,
         "read": Bit];
    AccessRequestOk = 0x001E_000B, "access_request_ok", false, ["ticket": Short];

    ExchangeDeclare = 0x0028_000A, "exchange_declare", false,
        ["ticket": Short, "exchange": ShortStr, "type": ShortStr, "passive": Bit, "durable": Bit,
         "auto_delete": Bit, "internal": Bit, "nowait": Bit, "arguments": Table];
    ExchangeDeclareOk = 0x0028_000B, "exchange_declare_ok", false, [];
    ExchangeDelete = 0x0028_0014, "exchange_delete", false,
        ["ticket": Short, "exchange": ShortStr, "if_unused": Bit, "nowait": Bit];
    ExchangeDeleteOk = 0x0028_0015, "exchange_delete_ok", false, [];
    ExchangeBind = 0x0028_001E, "exchange_bind", false,
        ["ticket": Short, "destination": ShortStr, "source": ShortStr, "routing_key": ShortStr,
         "nowait": Bit, "arguments": Table];
    ExchangeBindOk = 0x0028_001F, "exchange_bind_ok", false, [];
    ExchangeUnbind = 0x0028_0028, "exchange_unbind", false,
        ["ticket": Short, "destination": ShortStr, "source": ShortStr, "routing_key": ShortStr,
         "nowait": Bit, "arguments": Table];
    ExchangeUnbindOk = 0x0028_0033, "exchange_unbind_ok", false, [];

    QueueDeclare = 0x0032_000A, "queue_declare", false,
        ["ticket": Short, "queue": ShortStr, "passive": Bit, "durable": Bit, "exclusive": Bit,
         "auto_delete": Bit, "nowait": Bit, "arguments": Table];
    QueueDeclareOk = 0x0032_000B, "queue_declare_ok", false,
        ["queue": ShortStr, "message_count": Long, "consumer_count": Long];
    QueueBind = 0x0032_0014, "queue_bind", false,
        ["ticket": Short, "queue": ShortStr, "exchange": ShortStr, "routing_key": ShortStr,
         "nowait": Bit, "arguments": Table];
    QueueBindOk = 0x0032_0015, "queue_bind_ok", false, [];
    QueuePurge = 0x0032_001E, "queue_purge", false,
        ["ticket": Short, "queue": ShortStr, "nowait": Bit];
    QueuePurgeOk = 0x0032_001F, "queue_purge_ok", false, ["message_count": Long];
    QueueDelete = 0x0032_0028, "queue_delete", false,
        ["ticket": Short, "queue": ShortStr, "if_unused": Bit, "if_empty": Bit, "nowait": Bit];
    QueueDeleteOk = 0x0032_0029, "queue_delete_ok", false, ["message_count": Long];
    QueueUnbind = 0x0032_0032, "queue_unbind", false,
        ["ticket": Short, "queue": ShortStr, "exchange": ShortStr, "routing_key": ShortStr,
         "arguments": Table];
    QueueUnbindOk = 0x0032_0033, "queue_unbind_ok", false, [];

    BasicQos = 0x003C_000A, "basic_qos", false,
        ["prefetch_size": Long, "prefetch_count": Short, "global": Bit];
    BasicQosOk = 0x003C_000B, "basic_qos_ok", false, [];
    BasicConsume = 0x003C_0014, "basic_consume", false,
        ["ticket": Short, "queue": ShortStr, "consumer_tag": ShortStr, "no_local": Bit,
         "no_ack": Bit, "exclusive": Bit, "nowait": Bit, "arguments": Table];
    BasicConsumeOk = 0x003C_0015, "basic_consume_ok", false, ["consumer_tag": ShortStr];
    BasicCancel = 0x003C_001E, "basic_cancel", false, ["consumer_tag": ShortStr, "nowait": Bit];
    BasicCancelOk = 0x003C_001F, "basic_cancel_ok", false, ["consumer_tag": ShortStr];
    BasicPublish = 0x003C_0028, "basic_publish", true,
        ["ticket": Short, "exchange": ShortStr, "routing_key": ShortStr, "mandatory": Bit,
         "immediate": Bit];
    BasicReturn = 0x003C_0032, "basic_return", true,
        ["reply_code": Short, "reply_text": ShortStr, "exchange": ShortStr,
         "routing_key": ShortStr];
    BasicDeliver = 0x003C_003C, "basic_deliver", true,
        ["consumer_tag": ShortStr, "delivery_tag": LongLong, "redelivered": Bit,
         "exchange": ShortStr, "routing_key": ShortStr];
    BasicGet = 0x003C_0046, "basic_get", false,
        ["ticket": Short, "queue": ShortStr, "no_ack": Bit];
    BasicGetOk = 0x003C_0047, "basic_get_ok", true,
        ["delivery_tag": LongLong, "redelivered": Bit, "exchange": ShortStr,
         "routing_key": ShortStr, "message_count": Long];
    BasicGetEmpty = 0x003C_0048, "basic_get_empty", false, ["cluster_id": ShortStr];
    BasicAck = 0x003C_0050, "basic_ack", false, ["delivery_tag": LongLong, "multiple": Bit];
    BasicReject = 0x003C_005A, "basic_reject", false, ["delivery_tag": LongLong, "requeue": Bit];
    BasicRecoverAsync = 0x003C_0064, "basic_recover_async", false, ["requeue": Bit];
    BasicRecover = 0x003C_006E, "basic_recover", false, ["requeue": Bit];
    BasicRecoverOk = 0x003C_006F, "basic_recover_ok", false, [];
    BasicNack = 0x003C_0078, "basic_nack", false,
        ["delivery_tag": LongLong, "multiple": Bit, "requeue": Bit];

    ConfirmSelect = 0x0055_000A, "confirm_select", false, ["nowait": Bit];
    ConfirmSelectOk = 0x0055_000B, "confirm_select_ok", false, [];

    TxSelect = 0x005A_000A, "tx_select", false, [];
    TxSelectOk = 0x005A_000B, "tx_select_ok", false, [];
    TxCommit = 0x005A_0014, "tx_commit", false, [];
    TxCommitOk = 0x005A_0015, "tx_commit_ok", false, [];
    TxRollback = 0x005A_001E, "tx_rollback", false, [];
    TxRollbackOk = 0x005A_001F, "tx_rollback_ok", false, [];
}

impl Method {
    /// Static table row for this method.
    #[inline]
    pub fn info(self) -> &'static MethodInfo {
        &METHODS[self as usize]
    }

    /// Every method in table order.
    pub fn all() -> impl Iterator<Item = Method> {
        METHODS.iter().map(|info| info.method)
    }

    /// Numeric id (`class << 16 | method`).
    #[inline]
    pub fn id(self) -> u32 {
        self.info().id
    }

    /// Class id (upper 16 bits of the id).
    #[inline]
    pub fn class_id(self) -> u16 {
        (self.id() >> 16) as u16
    }

    /// Method id within its class (lower 16 bits of the id).
    #[inline]
    pub fn method_id(self) -> u16 {
        (self.id() & 0xFFFF) as u16
    }

    /// Wire name.
    #[inline]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Whether content frames follow this method.
    #[inline]
    pub fn has_content(self) -> bool {
        self.info().has_content
    }

    /// Declared fields in wire order.
    #[inline]
    pub fn fields(self) -> &'static [Field] {
        self.info().fields
    }

    /// Look up a method by numeric id.
    pub fn from_id(id: u32) -> Option<Method> {
        METHODS.iter().find(|info| info.id == id).map(|info| info.method)
    }

    /// Look up a method by wire name.
    pub fn from_name(name: &str) -> Option<Method> {
        METHODS
            .iter()
            .find(|info| info.name == name)
            .map(|info| info.method)
    }

    /// Close notifications are handed to error recovery instead of being stored.
    #[inline]
    pub fn is_close_notification(self) -> bool {
        matches!(self, Method::ChannelClose | Method::ConnectionClose)
    }

    /// Validate `properties` against the field list and fill absent fields
    /// with their zero value.
    ///
    /// Unknown keys, wrong value kinds and out-of-range integers are errors.
    pub fn normalize(self, properties: &FieldTable) -> Result<FieldTable, String> {
        let fields = self.fields();

        if let Some(unknown) = properties
            .keys()
            .find(|key| !fields.iter().any(|f| f.name == key.as_str()))
        {
            return Err(format!("{} has no field {:?}", self.name(), unknown));
        }

        let mut normalized = FieldTable::new();
        for field in fields {
            let value = match properties.get(field.name) {
                Some(value) => {
                    field
                        .kind
                        .check(value)
                        .map_err(|e| format!("{}.{}: {}", self.name(), field.name, e))?;
                    value.clone()
                }
                None => field.kind.zero(),
            };
            normalized.insert(field.name.to_string(), value);
        }
        Ok(normalized)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::from_name(s).ok_or_else(|| UsageError::UnknownMethod(s.to_string()))
    }
}
