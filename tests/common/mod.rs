//! In-process mock broker for integration tests.
//!
//! Speaks the default frame codec over `tokio::io::duplex`. Each
//! `Client::start` gets a fresh broker connection task; queues, exchanges
//! and the received-method log are shared by all connections of one
//! [`MockBroker`].

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use amqp_session::codec::{FrameCodec, MsgPackFrameCodec};
use amqp_session::protocol::{content_frames, ContentHeader, Frame, FramePayload, PROTOCOL_HEADER};
use amqp_session::transport::{BoxFuture, Connector, Transport};
use amqp_session::{field_table, Client, ClientBuilder, FieldTable, Method};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Message {
    pub exchange: String,
    pub routing_key: String,
    pub properties: FieldTable,
    pub body: Bytes,
}

/// One-shot misbehavior, triggered by the next occurrence of a method.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Answer with `channel_close` carrying this reply code.
    CloseChannel(u16),
    /// Answer with `connection_close` carrying this reply code.
    CloseConnection(u16),
    /// Do not answer at all.
    Ignore,
}

struct State {
    queues: HashMap<String, VecDeque<Message>>,
    exchanges: HashSet<String>,
    /// `(exchange, routing_key, queue)`
    bindings: Vec<(String, String, String)>,
    faults: HashMap<Method, Fault>,
    received: Vec<(u16, Method)>,
    channel_max: u16,
    connections: usize,
    next_name: u64,
}

#[derive(Clone)]
pub struct MockBroker {
    state: Arc<Mutex<State>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::with_channel_max(2047)
    }

    pub fn with_channel_max(channel_max: u16) -> Self {
        let exchanges = ["", "amq.direct", "amq.fanout", "amq.topic"]
            .iter()
            .map(|e| e.to_string())
            .collect();
        Self {
            state: Arc::new(Mutex::new(State {
                queues: HashMap::new(),
                exchanges,
                bindings: Vec::new(),
                faults: HashMap::new(),
                received: Vec::new(),
                channel_max,
                connections: 0,
                next_name: 0,
            })),
        }
    }

    pub fn builder(&self) -> ClientBuilder {
        Client::builder()
            .protocol_timeout(Duration::from_secs(5))
            .connector(MockConnector {
                state: self.state.clone(),
            })
    }

    pub fn client(&self) -> Client {
        self.builder().build().unwrap()
    }

    /// A client that has already logged in.
    pub async fn started(&self) -> Client {
        let client = self.client();
        client.start().await.unwrap();
        client
    }

    pub fn inject(&self, method: Method, fault: Fault) {
        self.state.lock().unwrap().faults.insert(method, fault);
    }

    pub fn received(&self) -> Vec<(u16, Method)> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn count(&self, channel: u16, method: Method) -> usize {
        self.state
            .lock()
            .unwrap()
            .received
            .iter()
            .filter(|&&(ch, m)| ch == channel && m == method)
            .count()
    }

    pub fn count_any(&self, method: Method) -> usize {
        self.state
            .lock()
            .unwrap()
            .received
            .iter()
            .filter(|&&(_, m)| m == method)
            .count()
    }

    pub fn queue_len(&self, queue: &str) -> Option<usize> {
        self.state.lock().unwrap().queues.get(queue).map(VecDeque::len)
    }

    pub fn add_message(&self, queue: &str, body: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.queues.entry(queue.to_string()).or_default().push_back(Message {
            exchange: String::new(),
            routing_key: queue.to_string(),
            properties: FieldTable::new(),
            body: Bytes::copy_from_slice(body),
        });
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }
}

struct MockConnector {
    state: Arc<Mutex<State>>,
}

impl Connector for MockConnector {
    fn connect<'a>(
        &'a self,
        _host: &'a str,
        _port: u16,
    ) -> BoxFuture<'a, amqp_session::Result<Box<dyn Transport>>> {
        let state = self.state.clone();
        Box::pin(async move {
            let (client, server) = tokio::io::duplex(1 << 20);
            state.lock().unwrap().connections += 1;
            tokio::spawn(async move {
                let mut conn = BrokerConn::new(server, state);
                if let Err(e) = conn.run().await {
                    eprintln!("mock broker connection failed: {}", e);
                }
                conn.finish();
            });
            Ok(Box::new(client) as Box<dyn Transport>)
        })
    }
}

#[derive(Debug, Clone)]
struct Consumer {
    channel: u16,
    tag: String,
    queue: String,
    no_ack: bool,
}

struct Publishing {
    channel: u16,
    exchange: String,
    routing_key: String,
    size: u64,
    properties: FieldTable,
    body: BytesMut,
}

enum Outcome {
    Reply(Vec<Frame>),
    CloseChannel(u16, String),
    CloseConnection(u16, String),
    /// Send the frames, then end the connection.
    ReplyThenStop(Vec<Frame>),
    Stop,
}

fn text(p: &FieldTable, key: &str) -> String {
    p.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

fn flag(p: &FieldTable, key: &str) -> bool {
    p.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn int(p: &FieldTable, key: &str) -> i64 {
    p.get(key).and_then(|v| v.as_int()).unwrap_or(0)
}

fn not_found(what: String) -> Outcome {
    Outcome::CloseChannel(404, format!("NOT_FOUND - {}", what))
}

fn route(state: &mut State, msg: Message) {
    if msg.exchange.is_empty() {
        if let Some(queue) = state.queues.get_mut(&msg.routing_key) {
            queue.push_back(msg);
        }
        return;
    }
    let targets: Vec<String> = state
        .bindings
        .iter()
        .filter(|(ex, key, _)| *ex == msg.exchange && *key == msg.routing_key)
        .map(|(_, _, queue)| queue.clone())
        .collect();
    for target in targets {
        if let Some(queue) = state.queues.get_mut(&target) {
            queue.push_back(msg.clone());
        }
    }
}

struct BrokerConn {
    stream: DuplexStream,
    codec: MsgPackFrameCodec,
    buf: BytesMut,
    state: Arc<Mutex<State>>,
    frame_max: u32,
    channels: HashSet<u16>,
    /// Channels closed by us, waiting for `channel_close_ok`.
    closing: HashSet<u16>,
    publishing: Option<Publishing>,
    consumers: Vec<Consumer>,
    unacked: Vec<(u16, u64, String, Message)>,
    next_tag: HashMap<u16, u64>,
    prefetch: HashMap<u16, u16>,
    tx: HashMap<u16, Vec<Message>>,
    confirms: HashMap<u16, u64>,
}

impl BrokerConn {
    fn new(stream: DuplexStream, state: Arc<Mutex<State>>) -> Self {
        Self {
            stream,
            codec: MsgPackFrameCodec::with_max_frame_size(0),
            buf: BytesMut::new(),
            state,
            frame_max: 0,
            channels: HashSet::new(),
            closing: HashSet::new(),
            publishing: None,
            consumers: Vec::new(),
            unacked: Vec::new(),
            next_tag: HashMap::new(),
            prefetch: HashMap::new(),
            tx: HashMap::new(),
            confirms: HashMap::new(),
        }
    }

    async fn run(&mut self) -> Result<(), BoxError> {
        let mut header = [0u8; 8];
        self.stream.read_exact(&mut header).await?;
        if &header[..] != PROTOCOL_HEADER {
            return Err("bad protocol header".into());
        }

        self.send(&[Frame::method(
            0,
            Method::ConnectionStart,
            field_table! {
                "version_major" => 0u8,
                "version_minor" => 9u8,
                "server_properties" => field_table! { "product" => "mock-broker" },
                "mechanisms" => "AMQPLAIN PLAIN",
                "locales" => "en_US",
            },
        )])
        .await?;

        while let Some(frame) = self.recv().await? {
            let channel = frame.channel;
            match frame.payload {
                FramePayload::Method { method, properties } => {
                    if !self.on_method(channel, method, properties).await? {
                        return Ok(());
                    }
                }
                FramePayload::Header(header) => self.on_header(channel, header).await?,
                FramePayload::Body(body) => self.on_body(channel, body).await?,
                FramePayload::Heartbeat => {}
            }
        }
        Ok(())
    }

    /// Requeue everything left unacknowledged.
    fn finish(&mut self) {
        let mut state = self.state.lock().unwrap();
        for (_, _, queue, msg) in self.unacked.drain(..) {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.push_front(msg);
            }
        }
    }

    async fn recv(&mut self) -> Result<Option<Frame>, BoxError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(frame));
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Ok(None);
            }
        }
    }

    async fn send(&mut self, frames: &[Frame]) -> Result<(), BoxError> {
        if frames.is_empty() {
            return Ok(());
        }
        let mut out = BytesMut::new();
        for frame in frames {
            self.codec.encode(frame, &mut out)?;
        }
        self.stream.write_all(&out).await?;
        Ok(())
    }

    async fn on_method(
        &mut self,
        channel: u16,
        method: Method,
        p: FieldTable,
    ) -> Result<bool, BoxError> {
        let fault = {
            let mut state = self.state.lock().unwrap();
            state.received.push((channel, method));
            state.faults.remove(&method)
        };

        if channel != 0 && self.closing.contains(&channel) && method != Method::ChannelCloseOk {
            return Ok(true);
        }

        let outcome = match fault {
            Some(Fault::Ignore) => return Ok(true),
            Some(Fault::CloseChannel(code)) => Outcome::CloseChannel(code, "injected".into()),
            Some(Fault::CloseConnection(code)) => Outcome::CloseConnection(code, "injected".into()),
            None if channel == 0 => self.on_connection_method(method, &p),
            None => self.on_channel_method(channel, method, &p),
        };
        self.apply(channel, method, outcome).await
    }

    async fn apply(
        &mut self,
        channel: u16,
        method: Method,
        outcome: Outcome,
    ) -> Result<bool, BoxError> {
        match outcome {
            Outcome::Reply(mut frames) => {
                frames.extend(self.deliveries());
                self.send(&frames).await?;
                Ok(true)
            }
            Outcome::CloseChannel(code, reply_text) => {
                self.drop_channel(channel);
                self.closing.insert(channel);
                self.send(&[Frame::method(
                    channel,
                    Method::ChannelClose,
                    field_table! {
                        "reply_code" => code,
                        "reply_text" => reply_text,
                        "class_id" => method.class_id(),
                        "method_id" => method.method_id(),
                    },
                )])
                .await?;
                Ok(true)
            }
            Outcome::CloseConnection(code, reply_text) => {
                self.send(&[Frame::method(
                    0,
                    Method::ConnectionClose,
                    field_table! {
                        "reply_code" => code,
                        "reply_text" => reply_text,
                        "class_id" => method.class_id(),
                        "method_id" => method.method_id(),
                    },
                )])
                .await?;
                while let Some(frame) = self.recv().await? {
                    let close_ok = frame.method_kind() == Some(Method::ConnectionCloseOk);
                    if frame.channel == 0 && close_ok {
                        self.state
                            .lock()
                            .unwrap()
                            .received
                            .push((0, Method::ConnectionCloseOk));
                        break;
                    }
                }
                Ok(false)
            }
            Outcome::ReplyThenStop(frames) => {
                self.send(&frames).await?;
                Ok(false)
            }
            Outcome::Stop => Ok(false),
        }
    }

    fn drop_channel(&mut self, channel: u16) {
        self.channels.remove(&channel);
        self.consumers.retain(|c| c.channel != channel);
        self.tx.remove(&channel);
        self.confirms.remove(&channel);
        if self.publishing.as_ref().is_some_and(|p| p.channel == channel) {
            self.publishing = None;
        }
        self.requeue(channel, |_| true);
    }

    fn requeue(&mut self, channel: u16, pick: impl Fn(u64) -> bool) {
        let mut state = self.state.lock().unwrap();
        let mut kept = Vec::new();
        for (ch, tag, queue, msg) in self.unacked.drain(..) {
            if ch == channel && pick(tag) {
                if let Some(q) = state.queues.get_mut(&queue) {
                    q.push_front(msg);
                }
            } else {
                kept.push((ch, tag, queue, msg));
            }
        }
        self.unacked = kept;
    }

    fn next_delivery_tag(&mut self, channel: u16) -> u64 {
        let tag = self.next_tag.entry(channel).or_insert(0);
        *tag += 1;
        *tag
    }

    fn on_connection_method(&mut self, method: Method, p: &FieldTable) -> Outcome {
        let reply = |m: Method, props: FieldTable| Outcome::Reply(vec![Frame::method(0, m, props)]);
        match method {
            Method::ConnectionStartOk => {
                if text(p, "mechanism") != "PLAIN" {
                    return Outcome::CloseConnection(403, "ACCESS_REFUSED".into());
                }
                let channel_max = self.state.lock().unwrap().channel_max;
                reply(
                    Method::ConnectionTune,
                    field_table! {
                        "channel_max" => channel_max,
                        "frame_max" => 131_072u32,
                        "heartbeat" => 0u16,
                    },
                )
            }
            Method::ConnectionTuneOk => {
                self.frame_max = int(p, "frame_max") as u32;
                Outcome::Reply(Vec::new())
            }
            Method::ConnectionOpen => reply(Method::ConnectionOpenOk, FieldTable::new()),
            Method::ConnectionClose => Outcome::ReplyThenStop(vec![Frame::method(
                0,
                Method::ConnectionCloseOk,
                FieldTable::new(),
            )]),
            Method::ConnectionCloseOk => Outcome::Stop,
            other => {
                Outcome::CloseConnection(503, format!("COMMAND_INVALID - {} on channel 0", other))
            }
        }
    }

    fn on_channel_method(&mut self, channel: u16, method: Method, p: &FieldTable) -> Outcome {
        let reply =
            |m: Method, props: FieldTable| Outcome::Reply(vec![Frame::method(channel, m, props)]);

        match method {
            Method::ChannelOpen => {
                if !self.channels.insert(channel) {
                    let text = format!("CHANNEL_ERROR - channel {} already open", channel);
                    return Outcome::CloseConnection(504, text);
                }
                return reply(Method::ChannelOpenOk, FieldTable::new());
            }
            Method::ChannelCloseOk => {
                self.closing.remove(&channel);
                return Outcome::Reply(Vec::new());
            }
            _ if !self.channels.contains(&channel) => {
                let text = format!("CHANNEL_ERROR - channel {} not open", channel);
                return Outcome::CloseConnection(504, text);
            }
            Method::ChannelClose => {
                self.drop_channel(channel);
                return reply(Method::ChannelCloseOk, FieldTable::new());
            }
            _ => {}
        }

        let state = self.state.clone();
        let mut st = state.lock().unwrap();

        match method {
            Method::ExchangeDeclare => {
                let name = text(p, "exchange");
                if flag(p, "passive") && !st.exchanges.contains(&name) {
                    return not_found(format!("no exchange '{}'", name));
                }
                st.exchanges.insert(name);
                reply(Method::ExchangeDeclareOk, FieldTable::new())
            }
            Method::ExchangeDelete => {
                let name = text(p, "exchange");
                if !st.exchanges.remove(&name) {
                    return not_found(format!("no exchange '{}'", name));
                }
                st.bindings.retain(|(ex, _, _)| *ex != name);
                reply(Method::ExchangeDeleteOk, FieldTable::new())
            }
            Method::ExchangeBind | Method::ExchangeUnbind => {
                for key in ["source", "destination"] {
                    let name = text(p, key);
                    if !st.exchanges.contains(&name) {
                        return not_found(format!("no exchange '{}'", name));
                    }
                }
                if method == Method::ExchangeBind {
                    reply(Method::ExchangeBindOk, FieldTable::new())
                } else {
                    reply(Method::ExchangeUnbindOk, FieldTable::new())
                }
            }
            Method::QueueDeclare => {
                let mut name = text(p, "queue");
                if name.is_empty() {
                    st.next_name += 1;
                    name = format!("amq.gen-{}", st.next_name);
                }
                if flag(p, "passive") && !st.queues.contains_key(&name) {
                    return not_found(format!("no queue '{}'", name));
                }
                let message_count = st.queues.entry(name.clone()).or_default().len() as u32;
                let consumer_count =
                    self.consumers.iter().filter(|c| c.queue == name).count() as u32;
                reply(
                    Method::QueueDeclareOk,
                    field_table! {
                        "queue" => name,
                        "message_count" => message_count,
                        "consumer_count" => consumer_count,
                    },
                )
            }
            Method::QueueBind => {
                let (queue, exchange) = (text(p, "queue"), text(p, "exchange"));
                if !st.queues.contains_key(&queue) {
                    return not_found(format!("no queue '{}'", queue));
                }
                if !st.exchanges.contains(&exchange) {
                    return not_found(format!("no exchange '{}'", exchange));
                }
                let binding = (exchange, text(p, "routing_key"), queue);
                if !st.bindings.contains(&binding) {
                    st.bindings.push(binding);
                }
                reply(Method::QueueBindOk, FieldTable::new())
            }
            Method::QueueUnbind => {
                let binding = (text(p, "exchange"), text(p, "routing_key"), text(p, "queue"));
                st.bindings.retain(|b| *b != binding);
                reply(Method::QueueUnbindOk, FieldTable::new())
            }
            Method::QueuePurge => {
                let name = text(p, "queue");
                match st.queues.get_mut(&name) {
                    Some(queue) => {
                        let count = queue.len() as u32;
                        queue.clear();
                        reply(Method::QueuePurgeOk, field_table! { "message_count" => count })
                    }
                    None => not_found(format!("no queue '{}'", name)),
                }
            }
            Method::QueueDelete => {
                let name = text(p, "queue");
                match st.queues.remove(&name) {
                    Some(queue) => {
                        self.consumers.retain(|c| c.queue != name);
                        st.bindings.retain(|(_, _, q)| *q != name);
                        reply(
                            Method::QueueDeleteOk,
                            field_table! { "message_count" => queue.len() as u32 },
                        )
                    }
                    None => not_found(format!("no queue '{}'", name)),
                }
            }
            Method::BasicQos => {
                self.prefetch.insert(channel, int(p, "prefetch_count") as u16);
                reply(Method::BasicQosOk, FieldTable::new())
            }
            Method::BasicConsume => {
                let queue = text(p, "queue");
                if !st.queues.contains_key(&queue) {
                    return not_found(format!("no queue '{}'", queue));
                }
                let mut tag = text(p, "consumer_tag");
                if tag.is_empty() {
                    st.next_name += 1;
                    tag = format!("amq.ctag-{}", st.next_name);
                }
                self.consumers.push(Consumer {
                    channel,
                    tag: tag.clone(),
                    queue,
                    no_ack: flag(p, "no_ack"),
                });
                reply(Method::BasicConsumeOk, field_table! { "consumer_tag" => tag })
            }
            Method::BasicCancel => {
                let tag = text(p, "consumer_tag");
                self.consumers.retain(|c| !(c.channel == channel && c.tag == tag));
                reply(Method::BasicCancelOk, field_table! { "consumer_tag" => tag })
            }
            Method::BasicPublish => {
                self.publishing = Some(Publishing {
                    channel,
                    exchange: text(p, "exchange"),
                    routing_key: text(p, "routing_key"),
                    size: 0,
                    properties: FieldTable::new(),
                    body: BytesMut::new(),
                });
                Outcome::Reply(Vec::new())
            }
            Method::BasicGet => {
                let name = text(p, "queue");
                let Some(queue) = st.queues.get_mut(&name) else {
                    return not_found(format!("no queue '{}'", name));
                };
                let Some(msg) = queue.pop_front() else {
                    return reply(Method::BasicGetEmpty, FieldTable::new());
                };
                let remaining = queue.len() as u32;
                drop(st);

                let tag = self.next_delivery_tag(channel);
                let frames = content_frames(
                    channel,
                    Method::BasicGetOk,
                    field_table! {
                        "delivery_tag" => tag as i64,
                        "redelivered" => false,
                        "exchange" => msg.exchange.as_str(),
                        "routing_key" => msg.routing_key.as_str(),
                        "message_count" => remaining,
                    },
                    msg.properties.clone(),
                    msg.body.clone(),
                    self.frame_max,
                );
                if !flag(p, "no_ack") {
                    self.unacked.push((channel, tag, name, msg));
                }
                Outcome::Reply(frames)
            }
            Method::BasicAck => {
                drop(st);
                let (tag, multiple) = (int(p, "delivery_tag") as u64, flag(p, "multiple"));
                self.unacked.retain(|(ch, t, _, _)| {
                    !(*ch == channel && (*t == tag || (multiple && *t <= tag)))
                });
                Outcome::Reply(Vec::new())
            }
            Method::BasicNack | Method::BasicReject => {
                drop(st);
                let tag = int(p, "delivery_tag") as u64;
                let multiple = flag(p, "multiple");
                let matches = move |t: u64| t == tag || (multiple && t <= tag);
                if flag(p, "requeue") {
                    self.requeue(channel, matches);
                } else {
                    self.unacked.retain(|(ch, t, _, _)| !(*ch == channel && matches(*t)));
                }
                Outcome::Reply(Vec::new())
            }
            Method::BasicRecover => {
                drop(st);
                self.requeue(channel, |_| true);
                reply(Method::BasicRecoverOk, FieldTable::new())
            }
            Method::ConfirmSelect => {
                self.confirms.entry(channel).or_insert(0);
                reply(Method::ConfirmSelectOk, FieldTable::new())
            }
            Method::TxSelect => {
                self.tx.entry(channel).or_default();
                reply(Method::TxSelectOk, FieldTable::new())
            }
            Method::TxCommit => {
                if let Some(buffered) = self.tx.get_mut(&channel) {
                    for msg in buffered.drain(..) {
                        route(&mut st, msg);
                    }
                }
                reply(Method::TxCommitOk, FieldTable::new())
            }
            Method::TxRollback => {
                if let Some(buffered) = self.tx.get_mut(&channel) {
                    buffered.clear();
                }
                reply(Method::TxRollbackOk, FieldTable::new())
            }
            other => Outcome::CloseConnection(540, format!("NOT_IMPLEMENTED - {}", other)),
        }
    }

    async fn on_header(&mut self, channel: u16, header: ContentHeader) -> Result<(), BoxError> {
        match self.publishing.as_mut() {
            Some(publishing) if publishing.channel == channel => {
                publishing.size = header.body_size;
                publishing.properties = header.properties;
                if header.body_size == 0 {
                    self.complete_publish().await?;
                }
                Ok(())
            }
            _ => Err(format!("unexpected content header on channel {}", channel).into()),
        }
    }

    async fn on_body(&mut self, channel: u16, body: Bytes) -> Result<(), BoxError> {
        match self.publishing.as_mut() {
            Some(publishing) if publishing.channel == channel => {
                publishing.body.extend_from_slice(&body);
                if publishing.body.len() as u64 >= publishing.size {
                    self.complete_publish().await?;
                }
                Ok(())
            }
            _ => Err(format!("unexpected body on channel {}", channel).into()),
        }
    }

    async fn complete_publish(&mut self) -> Result<(), BoxError> {
        let Some(publishing) = self.publishing.take() else {
            return Ok(());
        };
        let channel = publishing.channel;
        let msg = Message {
            exchange: publishing.exchange,
            routing_key: publishing.routing_key,
            properties: publishing.properties,
            body: publishing.body.freeze(),
        };

        match self.tx.get_mut(&channel) {
            Some(buffered) => buffered.push(msg),
            None => route(&mut self.state.lock().unwrap(), msg),
        }

        let mut frames = Vec::new();
        if let Some(seq) = self.confirms.get_mut(&channel) {
            *seq += 1;
            frames.push(Frame::method(
                channel,
                Method::BasicAck,
                field_table! { "delivery_tag" => *seq as i64, "multiple" => false },
            ));
        }
        frames.extend(self.deliveries());
        self.send(&frames).await
    }

    /// Push queued messages to this connection's consumers, within prefetch.
    fn deliveries(&mut self) -> Vec<Frame> {
        let state = self.state.clone();
        let mut st = state.lock().unwrap();
        let mut frames = Vec::new();

        for consumer in self.consumers.clone() {
            loop {
                if !consumer.no_ack {
                    let limit = self.prefetch.get(&consumer.channel).copied().unwrap_or(0) as usize;
                    let in_flight = self
                        .unacked
                        .iter()
                        .filter(|(ch, _, _, _)| *ch == consumer.channel)
                        .count();
                    if limit > 0 && in_flight >= limit {
                        break;
                    }
                }
                let queue = st.queues.get_mut(&consumer.queue);
                let Some(msg) = queue.and_then(VecDeque::pop_front) else {
                    break;
                };

                let tag = self.next_delivery_tag(consumer.channel);
                frames.extend(content_frames(
                    consumer.channel,
                    Method::BasicDeliver,
                    field_table! {
                        "consumer_tag" => consumer.tag.as_str(),
                        "delivery_tag" => tag as i64,
                        "redelivered" => false,
                        "exchange" => msg.exchange.as_str(),
                        "routing_key" => msg.routing_key.as_str(),
                    },
                    msg.properties.clone(),
                    msg.body.clone(),
                    self.frame_max,
                ));
                if !consumer.no_ack {
                    self.unacked
                        .push((consumer.channel, tag, consumer.queue.clone(), msg));
                }
            }
        }
        frames
    }
}
