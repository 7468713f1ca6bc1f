// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker and recording helpers for unit tests.

use crate::{
    broker::{
        Acknowledger, BrokerChannel, BrokerConnection, BrokerConnector, CloseReason,
        Confirmation, Delivery, DeliveryStream, OutboundMessage, PendingConfirm, QueueInfo,
    },
    consumer::DeliveryObserver,
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::{future, stream, StreamExt};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::{mpsc, oneshot};
use tracing::subscriber::DefaultGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogEvent {
    Read(u64),
    Ack(u64),
    AckFailed(u64),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<LogEvent>>>);

impl EventLog {
    pub(crate) fn push(&self, event: LogEvent) {
        self.0.lock().unwrap().push(event);
    }

    pub(crate) fn events(&self) -> Vec<LogEvent> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn acks(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, LogEvent::Ack(_)))
            .count()
    }
}

pub(crate) struct RecordingAcker {
    tag: u64,
    log: EventLog,
    fail: bool,
}

impl RecordingAcker {
    pub(crate) fn new(tag: u64, log: EventLog) -> Self {
        RecordingAcker {
            tag,
            log,
            fail: false,
        }
    }

    pub(crate) fn failing(tag: u64, log: EventLog) -> Self {
        RecordingAcker {
            tag,
            log,
            fail: true,
        }
    }
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self, _multiple: bool) -> Result<(), AmqpError> {
        if self.fail {
            self.log.push(LogEvent::AckFailed(self.tag));
            return Err(AmqpError::AckMessageError("channel closed".to_owned()));
        }
        self.log.push(LogEvent::Ack(self.tag));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingObserver {
    bodies: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub(crate) fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

impl DeliveryObserver for RecordingObserver {
    fn observe(&self, delivery: &Delivery) {
        self.bodies
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&delivery.body).into_owned());
    }
}

/// Formatted tracing output collected for assertions.
///
/// The subscriber is installed as the thread default, so it sees tasks spawned
/// on a current-thread test runtime too.
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub(crate) fn install(&self) -> DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        String::from_utf8_lossy(&self.0.lock().unwrap()).contains(needle)
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Broker operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FakeOp {
    Dial,
    OpenChannel,
    DeclareExchange,
    DeclareQueue,
    Bind,
    Consume,
    Cancel,
    Close,
    ConfirmSelect,
    Publish,
}

struct Consumer {
    queue: String,
    conn: u64,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, ExchangeDefinition>,
    queues: HashMap<String, QueueDefinition>,
    bindings: Vec<QueueBinding>,
    backlog: HashMap<String, VecDeque<OutboundMessage>>,
    consumers: HashMap<String, Consumer>,
    close_notifiers: Vec<(u64, oneshot::Sender<CloseReason>)>,
    failures: HashSet<FakeOp>,
    ops: Vec<FakeOp>,
    next_tag: u64,
    next_conn: u64,
    nack_publishes: bool,
    open_connections: usize,
    disconnected: bool,
    log: EventLog,
}

impl State {
    fn check(&mut self, op: FakeOp) -> Result<(), String> {
        self.ops.push(op);
        if self.failures.contains(&op) {
            return Err(format!("injected {op:?} failure"));
        }
        if self.disconnected && op != FakeOp::Dial {
            return Err("connection is closed".to_owned());
        }
        Ok(())
    }

    fn route(&mut self, message: &OutboundMessage) -> Result<(), String> {
        let Some(exchange) = self.exchanges.get(&message.exchange) else {
            return Err(format!("NOT_FOUND - no exchange '{}'", message.exchange));
        };
        let fanout = exchange.kind == ExchangeKind::Fanout;

        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| {
                b.exchange_name == message.exchange && (fanout || b.routing_key == message.routing_key)
            })
            .map(|b| b.queue_name.clone())
            .collect();

        for queue in targets {
            self.backlog
                .entry(queue.clone())
                .or_default()
                .push_back(message.clone());
            self.flush(&queue);
        }

        Ok(())
    }

    /// Moves backlog messages to a live consumer of `queue`, if any.
    fn flush(&mut self, queue: &str) {
        let Some(sender) = self
            .consumers
            .values()
            .find(|c| c.queue == queue)
            .map(|c| c.sender.clone())
        else {
            return;
        };

        while let Some(message) = self.backlog.get_mut(queue).and_then(VecDeque::pop_front) {
            self.next_tag += 1;
            let tag = self.next_tag;
            let delivery = Delivery::new(
                tag,
                message.body.clone(),
                Box::new(RecordingAcker::new(tag, self.log.clone())),
            )
            .with_route(&message.exchange, &message.routing_key)
            .with_headers(message.headers.clone());

            if sender.send(delivery).is_err() {
                break;
            }
        }
    }
}

/// A broker that lives in memory.
#[derive(Clone, Default)]
pub(crate) struct FakeBroker {
    state: Arc<Mutex<State>>,
}

impl FakeBroker {
    pub(crate) fn new() -> Self {
        FakeBroker::default()
    }

    pub(crate) fn connector(&self) -> FakeConnector {
        FakeConnector {
            state: self.state.clone(),
        }
    }

    /// A channel that belongs to no connection.
    pub(crate) fn channel(&self) -> Arc<dyn BrokerChannel> {
        Arc::new(FakeChannel::new(0, self.state.clone()))
    }

    pub(crate) fn fail(&self, op: FakeOp) {
        self.state.lock().unwrap().failures.insert(op);
    }

    pub(crate) fn nack_publishes(&self) {
        self.state.lock().unwrap().nack_publishes = true;
    }

    /// Simulates the broker dropping every connection.
    pub(crate) fn disconnect(&self, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.disconnected = true;
        state.consumers.clear();
        for (_, tx) in state.close_notifiers.drain(..) {
            let _ = tx.send(CloseReason::new(reason));
        }
    }

    pub(crate) fn ops(&self) -> Vec<FakeOp> {
        self.state.lock().unwrap().ops.clone()
    }

    pub(crate) fn log(&self) -> EventLog {
        self.state.lock().unwrap().log.clone()
    }

    pub(crate) fn exchange_count(&self) -> usize {
        self.state.lock().unwrap().exchanges.len()
    }

    pub(crate) fn queue_count(&self) -> usize {
        self.state.lock().unwrap().queues.len()
    }

    pub(crate) fn binding_count(&self) -> usize {
        self.state.lock().unwrap().bindings.len()
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.state.lock().unwrap().consumers.len()
    }

    pub(crate) fn open_connections(&self) -> usize {
        self.state.lock().unwrap().open_connections
    }

    pub(crate) fn backlog(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .backlog
            .get(queue)
            .map_or(0, VecDeque::len)
    }
}

pub(crate) struct FakeConnector {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl BrokerConnector for FakeConnector {
    async fn dial(&self, uri: &str) -> Result<Box<dyn BrokerConnection>, AmqpError> {
        let mut state = self.state.lock().unwrap();
        state
            .check(FakeOp::Dial)
            .map_err(|reason| AmqpError::DialError(format!("{uri}: {reason}")))?;
        state.disconnected = false;
        state.open_connections += 1;
        state.next_conn += 1;

        Ok(Box::new(FakeConnection {
            id: state.next_conn,
            state: self.state.clone(),
        }))
    }
}

struct FakeConnection {
    id: u64,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        self.state
            .lock()
            .unwrap()
            .check(FakeOp::OpenChannel)
            .map_err(AmqpError::ChannelError)?;

        Ok(Arc::new(FakeChannel::new(self.id, self.state.clone())))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.check(FakeOp::Close).map_err(AmqpError::CloseError)?;

        let id = self.id;
        state.open_connections = state.open_connections.saturating_sub(1);
        state.consumers.retain(|_, c| c.conn != id);
        state.close_notifiers.retain(|(conn, _)| *conn != id);
        Ok(())
    }

    fn notify_close(&self) -> oneshot::Receiver<CloseReason> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().unwrap().close_notifiers.push((self.id, tx));
        rx
    }
}

struct FakeChannel {
    conn: u64,
    confirm_mode: AtomicBool,
    state: Arc<Mutex<State>>,
}

impl FakeChannel {
    fn new(conn: u64, state: Arc<Mutex<State>>) -> Self {
        FakeChannel {
            conn,
            confirm_mode: AtomicBool::new(false),
            state,
        }
    }
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        let err = |reason: String| AmqpError::DeclareExchangeError {
            name: def.name.clone(),
            reason,
        };
        state.check(FakeOp::DeclareExchange).map_err(err)?;

        match state.exchanges.get(&def.name).cloned() {
            Some(existing) if existing.kind != def.kind || existing.durable != def.durable => {
                Err(err("PRECONDITION_FAILED - inequivalent arg".to_owned()))
            }
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(def.name.clone(), def.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<QueueInfo, AmqpError> {
        let mut state = self.state.lock().unwrap();
        let err = |reason: String| AmqpError::DeclareQueueError {
            name: def.name.clone(),
            reason,
        };
        state.check(FakeOp::DeclareQueue).map_err(err)?;

        match state.queues.get(&def.name).cloned() {
            Some(existing) if existing.durable != def.durable => {
                return Err(err("PRECONDITION_FAILED - inequivalent arg 'durable'".to_owned()))
            }
            Some(_) => {}
            None => {
                state.queues.insert(def.name.clone(), def.clone());
            }
        }

        Ok(QueueInfo {
            name: def.name.clone(),
            messages: state.backlog.get(&def.name).map_or(0, VecDeque::len) as u32,
            consumers: state
                .consumers
                .values()
                .filter(|c| c.queue == def.name)
                .count() as u32,
        })
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        let err = |reason: String| AmqpError::BindingQueueError {
            queue: binding.queue_name.clone(),
            exchange: binding.exchange_name.clone(),
            reason,
        };
        state.check(FakeOp::Bind).map_err(err)?;

        if !state.exchanges.contains_key(&binding.exchange_name) {
            return Err(err(format!(
                "NOT_FOUND - no exchange '{}'",
                binding.exchange_name
            )));
        }
        if !state.queues.contains_key(&binding.queue_name) {
            return Err(err(format!("NOT_FOUND - no queue '{}'", binding.queue_name)));
        }
        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, AmqpError> {
        let mut state = self.state.lock().unwrap();
        state
            .check(FakeOp::Consume)
            .map_err(AmqpError::ConsumerDeclarationError)?;

        if !state.queues.contains_key(queue) {
            return Err(AmqpError::ConsumerDeclarationError(format!(
                "NOT_FOUND - no queue '{queue}'"
            )));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.consumers.insert(
            consumer_tag.to_owned(),
            Consumer {
                queue: queue.to_owned(),
                conn: self.conn,
                sender,
            },
        );
        state.flush(queue);

        let log = state.log.clone();
        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|d| (d, receiver))
        })
        .map(move |delivery| {
            log.push(LogEvent::Read(delivery.delivery_tag));
            Ok(delivery)
        })
        .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.check(FakeOp::Cancel).map_err(AmqpError::CancelError)?;

        match state.consumers.remove(consumer_tag) {
            Some(_) => Ok(()),
            None => Err(AmqpError::CancelError(format!(
                "NOT_FOUND - unknown consumer tag '{consumer_tag}'"
            ))),
        }
    }

    async fn confirm_select(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state
            .check(FakeOp::ConfirmSelect)
            .map_err(AmqpError::ConfirmSelectError)?;
        self.confirm_mode.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<PendingConfirm, AmqpError> {
        let mut state = self.state.lock().unwrap();
        state
            .check(FakeOp::Publish)
            .map_err(AmqpError::PublishingError)?;
        state.route(message).map_err(AmqpError::PublishingError)?;

        let confirmation = match (self.confirm_mode.load(Ordering::SeqCst), state.nack_publishes) {
            (false, _) => Confirmation::NotRequested,
            (true, false) => Confirmation::Ack,
            (true, true) => Confirmation::Nack,
        };
        Ok(Box::pin(future::ready(Ok(confirmation))))
    }
}
