//! # Messages
//!
//! A [`Message`] is the unit of work that travels through a
//! [`MessageQueue`](crate::MessageQueue). Every message carries a
//! [`MessageCategory`] discriminant that the worker uses to pick the managers
//! that may consume it; the payload itself is opaque to the dispatch layer.
//!
//! Ownership moves with the message: a producer gives it to the queue on
//! enqueue, the worker takes it back out in a batch, and a manager takes it
//! when it accepts it. A manager that declines hands the message back so the
//! next manager can be offered the same value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Identifier assigned to a client connection by the connection layer.
pub type ConnectionId = u64;

/// Optional id used to tie a follow-up message to the request that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Closed set of message categories used for dispatch.
///
/// Managers declare the categories they handle and the worker builds one
/// handler list per category when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageCategory {
    /// A decoded client packet.
    Packet,
    /// Connection lifecycle notification.
    Connection,
    /// One fixed-cadence server tick.
    Tick,
    /// A deferred callback to run on the consuming worker.
    Execute,
    /// Inter-server or inter-component notification.
    Internal,
}

impl MessageCategory {
    /// Number of categories, used to size dispatch tables.
    pub const COUNT: usize = 5;

    /// Every category, in table order.
    pub const ALL: [MessageCategory; Self::COUNT] = [
        MessageCategory::Packet,
        MessageCategory::Connection,
        MessageCategory::Tick,
        MessageCategory::Execute,
        MessageCategory::Internal,
    ];

    /// Position of this category in a dispatch table.
    pub const fn index(self) -> usize {
        match self {
            MessageCategory::Packet => 0,
            MessageCategory::Connection => 1,
            MessageCategory::Tick => 2,
            MessageCategory::Execute => 3,
            MessageCategory::Internal => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            MessageCategory::Packet => "packet",
            MessageCategory::Connection => "connection",
            MessageCategory::Tick => "tick",
            MessageCategory::Execute => "execute",
            MessageCategory::Internal => "internal",
        }
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client packet after framing has been removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMessage {
    /// Connection the packet arrived on
    pub connection: ConnectionId,
    /// Command code read from the packet header
    pub command_code: u16,
    /// Remaining packet bytes
    pub payload: Vec<u8>,
}

/// Lifecycle notifications for a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection was accepted and bound to a worker queue.
    Connected {
        connection: ConnectionId,
        remote_addr: SocketAddr,
    },
    /// The connection was closed by either side.
    Closed { connection: ConnectionId },
    /// The connection went quiet for longer than the configured timeout.
    TimedOut { connection: ConnectionId },
}

impl ConnectionEvent {
    pub fn connection(&self) -> ConnectionId {
        match self {
            ConnectionEvent::Connected { connection, .. }
            | ConnectionEvent::Closed { connection }
            | ConnectionEvent::TimedOut { connection } => *connection,
        }
    }
}

/// Notifications exchanged between server components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNotification {
    /// Short routing key, e.g. `"account_logout"`
    pub kind: String,
    /// Opaque body
    pub body: Vec<u8>,
}

/// A deferred callback carried by an `Execute` message.
///
/// The closure runs exactly once, on the thread of the worker that consumes
/// the message.
pub struct Work {
    label: &'static str,
    callback: Box<dyn FnOnce() + Send + 'static>,
}

impl Work {
    /// Wraps a closure as deferred work.
    pub fn new<F>(label: &'static str, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            label,
            callback: Box::new(callback),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Runs the callback, consuming the work item.
    pub fn run(self) {
        (self.callback)()
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work").field("label", &self.label).finish()
    }
}

/// Payload of a message.
#[derive(Debug)]
pub enum MessageBody {
    Packet(PacketMessage),
    Connection(ConnectionEvent),
    Tick,
    Execute(Work),
    Internal(InternalNotification),
}

/// A typed unit of work.
#[derive(Debug)]
pub struct Message {
    correlation: Option<CorrelationId>,
    body: MessageBody,
}

impl Message {
    pub fn new(body: MessageBody) -> Self {
        Self {
            correlation: None,
            body,
        }
    }

    /// Attaches a correlation id.
    pub fn with_correlation(mut self, correlation: CorrelationId) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn tick() -> Self {
        Self::new(MessageBody::Tick)
    }

    pub fn execute(work: Work) -> Self {
        Self::new(MessageBody::Execute(work))
    }

    pub fn packet(connection: ConnectionId, command_code: u16, payload: Vec<u8>) -> Self {
        Self::new(MessageBody::Packet(PacketMessage {
            connection,
            command_code,
            payload,
        }))
    }

    pub fn connection(event: ConnectionEvent) -> Self {
        Self::new(MessageBody::Connection(event))
    }

    pub fn internal(kind: impl Into<String>, body: Vec<u8>) -> Self {
        Self::new(MessageBody::Internal(InternalNotification {
            kind: kind.into(),
            body,
        }))
    }

    /// The dispatch category of this message.
    pub fn category(&self) -> MessageCategory {
        match self.body {
            MessageBody::Packet(_) => MessageCategory::Packet,
            MessageBody::Connection(_) => MessageCategory::Connection,
            MessageBody::Tick => MessageCategory::Tick,
            MessageBody::Execute(_) => MessageCategory::Execute,
            MessageBody::Internal(_) => MessageCategory::Internal,
        }
    }

    pub fn correlation(&self) -> Option<CorrelationId> {
        self.correlation
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Splits the message into its correlation id and body.
    pub fn into_parts(self) -> (Option<CorrelationId>, MessageBody) {
        (self.correlation, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_category_table_is_exhaustive() {
        for (position, category) in MessageCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), position);
        }
    }

    #[test]
    fn test_message_categories() {
        assert_eq!(Message::tick().category(), MessageCategory::Tick);
        assert_eq!(
            Message::packet(7, 0x0001, vec![1, 2]).category(),
            MessageCategory::Packet
        );
        assert_eq!(
            Message::connection(ConnectionEvent::Closed { connection: 3 }).category(),
            MessageCategory::Connection
        );
        assert_eq!(
            Message::execute(Work::new("noop", || {})).category(),
            MessageCategory::Execute
        );
        assert_eq!(
            Message::internal("relay", Vec::new()).category(),
            MessageCategory::Internal
        );
    }

    #[test]
    fn test_work_runs_once_when_consumed() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let work = Work::new("flag", move || flag.store(true, Ordering::SeqCst));
        assert_eq!(work.label(), "flag");
        work.run();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_correlation_is_preserved() {
        let message = Message::tick().with_correlation(CorrelationId(42));
        assert_eq!(message.correlation(), Some(CorrelationId(42)));
        let (correlation, body) = message.into_parts();
        assert_eq!(correlation, Some(CorrelationId(42)));
        assert!(matches!(body, MessageBody::Tick));
    }
}
