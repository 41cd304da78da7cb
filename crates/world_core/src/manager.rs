//! # Managers and dispatch
//!
//! A [`Manager`] is a stateless dispatch policy. It declares the
//! [`MessageCategory`] values it supports and is offered every message of
//! those categories that reaches its worker. Several managers may share a
//! category; they are asked in registration order until one accepts.
//!
//! Managers are `Send + Sync` and usually shared between workers through an
//! `Arc`, so any state they touch must be owned elsewhere and reached through
//! handles they were constructed with.
//!
//! ## Outcomes
//!
//! * [`Disposition::Handled`] - the manager consumed the message.
//! * [`Disposition::Declined`] - the manager hands the message back; the next
//!   manager is offered it. If every manager declines the message is simply
//!   dropped; that is not an error.
//! * `Err(ManagerError)` - the manager accepted the message but failed to
//!   process it. The failure is logged and counted by the worker.

use crate::error::{ManagerError, QueueClosed};
use crate::message::{Message, MessageCategory};
use crate::queue::MessageQueue;
use crate::time::{ServerTime, SharedTimeSource};
use std::fmt;
use std::sync::Arc;

/// Queue type shared by every worker.
pub type WorkerQueue = MessageQueue<Message>;

/// What a manager did with a message it was offered.
#[derive(Debug)]
pub enum Disposition {
    /// The message was consumed.
    Handled,
    /// The message is returned untouched for the next manager.
    Declined(Message),
}

/// A message handler registered with one or more workers.
pub trait Manager: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Categories this manager wants to be offered.
    fn supported_categories(&self) -> &[MessageCategory];

    /// Processes or declines one message.
    fn process_message(
        &self,
        ctx: &WorkerContext,
        message: Message,
    ) -> Result<Disposition, ManagerError>;
}

/// Handles a manager can use while processing a message.
#[derive(Clone)]
pub struct WorkerContext {
    worker_name: Arc<str>,
    queue: Arc<WorkerQueue>,
    time: SharedTimeSource,
}

impl WorkerContext {
    pub fn new(worker_name: Arc<str>, queue: Arc<WorkerQueue>, time: SharedTimeSource) -> Self {
        Self {
            worker_name,
            queue,
            time,
        }
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// The queue of the worker running this manager.
    pub fn queue(&self) -> &Arc<WorkerQueue> {
        &self.queue
    }

    pub fn time(&self) -> &SharedTimeSource {
        &self.time
    }

    pub fn server_time(&self) -> ServerTime {
        self.time.server_time()
    }

    /// Enqueues a follow-up message on this worker's own queue.
    pub fn enqueue_follow_up(&self, message: Message) -> Result<(), ManagerError> {
        self.queue
            .enqueue(message)
            .map_err(|QueueClosed(_)| ManagerError::QueueClosed)
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("worker_name", &self.worker_name)
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Result of dispatching one message through a [`DispatchTable`].
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A manager consumed the message.
    Handled { manager: String },
    /// No manager accepted the message.
    Unhandled,
    /// A manager accepted the message and failed.
    Failed { manager: String, error: ManagerError },
}

/// Category-indexed lists of managers, built once when a worker starts.
#[derive(Clone, Default)]
pub struct DispatchTable {
    routes: [Vec<Arc<dyn Manager>>; MessageCategory::COUNT],
}

impl DispatchTable {
    /// Builds the table from managers in registration order.
    pub fn build(managers: &[Arc<dyn Manager>]) -> Self {
        let mut table = Self::default();
        for manager in managers {
            for category in manager.supported_categories() {
                let route = &mut table.routes[category.index()];
                // A manager listing a category twice is still asked once.
                if !route.iter().any(|m| Arc::ptr_eq(m, manager)) {
                    route.push(manager.clone());
                }
            }
        }
        table
    }

    /// Managers registered for `category`, in offer order.
    pub fn managers_for(&self, category: MessageCategory) -> &[Arc<dyn Manager>] {
        &self.routes[category.index()]
    }

    /// Offers `message` to each manager for its category until one accepts.
    pub fn dispatch(&self, ctx: &WorkerContext, message: Message) -> DispatchOutcome {
        let mut message = message;
        for manager in self.managers_for(message.category()) {
            match manager.process_message(ctx, message) {
                Ok(Disposition::Handled) => {
                    return DispatchOutcome::Handled {
                        manager: manager.name().to_string(),
                    }
                }
                Ok(Disposition::Declined(returned)) => message = returned,
                Err(error) => {
                    return DispatchOutcome::Failed {
                        manager: manager.name().to_string(),
                        error,
                    }
                }
            }
        }
        DispatchOutcome::Unhandled
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for category in MessageCategory::ALL {
            let names: Vec<&str> = self.managers_for(category).iter().map(|m| m.name()).collect();
            map.entry(&category.as_str(), &names);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBody;
    use crate::time::ManualTimeSource;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        categories: Vec<MessageCategory>,
        accept: bool,
        fail: bool,
        seen: Mutex<Vec<&'static str>>,
    }

    impl Recorder {
        fn new(name: &'static str, categories: Vec<MessageCategory>, accept: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                categories,
                accept,
                fail: false,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Manager for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn supported_categories(&self) -> &[MessageCategory] {
            &self.categories
        }

        fn process_message(
            &self,
            _ctx: &WorkerContext,
            message: Message,
        ) -> Result<Disposition, ManagerError> {
            self.seen.lock().unwrap().push(message.category().as_str());
            if self.fail {
                return Err(ManagerError::Failed("boom".into()));
            }
            if self.accept {
                Ok(Disposition::Handled)
            } else {
                Ok(Disposition::Declined(message))
            }
        }
    }

    fn context() -> WorkerContext {
        WorkerContext::new(
            Arc::from("test"),
            Arc::new(MessageQueue::new()),
            Arc::new(ManualTimeSource::default()),
        )
    }

    #[test]
    fn test_offers_in_registration_order_until_handled() {
        let declining = Recorder::new("declining", vec![MessageCategory::Tick], false);
        let accepting = Recorder::new("accepting", vec![MessageCategory::Tick], true);
        let never = Recorder::new("never", vec![MessageCategory::Tick], true);
        let managers: Vec<Arc<dyn Manager>> =
            vec![declining.clone(), accepting.clone(), never.clone()];
        let table = DispatchTable::build(&managers);

        let outcome = table.dispatch(&context(), Message::tick());
        assert!(matches!(outcome, DispatchOutcome::Handled { ref manager } if manager == "accepting"));
        assert_eq!(declining.seen.lock().unwrap().len(), 1);
        assert_eq!(accepting.seen.lock().unwrap().len(), 1);
        assert!(never.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unhandled_is_not_failure() {
        let declining = Recorder::new("declining", vec![MessageCategory::Packet], false);
        let table = DispatchTable::build(&[declining as Arc<dyn Manager>]);

        assert!(matches!(
            table.dispatch(&context(), Message::packet(1, 2, vec![])),
            DispatchOutcome::Unhandled
        ));
        // No manager at all for this category.
        assert!(matches!(
            table.dispatch(&context(), Message::tick()),
            DispatchOutcome::Unhandled
        ));
    }

    #[test]
    fn test_failure_is_reported_with_manager_name() {
        let failing = Arc::new(Recorder {
            name: "failing",
            categories: vec![MessageCategory::Internal],
            accept: true,
            fail: true,
            seen: Mutex::new(Vec::new()),
        });
        let table = DispatchTable::build(&[failing as Arc<dyn Manager>]);

        match table.dispatch(&context(), Message::internal("x", vec![])) {
            DispatchOutcome::Failed { manager, error } => {
                assert_eq!(manager, "failing");
                assert!(matches!(error, ManagerError::Failed(_)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_follow_up_lands_on_own_queue() {
        let ctx = context();
        ctx.enqueue_follow_up(Message::tick()).unwrap();
        let mut out = Vec::new();
        ctx.queue().try_dequeue_all(&mut out);
        assert!(matches!(out[0].body(), MessageBody::Tick));

        ctx.queue().close();
        assert!(matches!(
            ctx.enqueue_follow_up(Message::tick()),
            Err(ManagerError::QueueClosed)
        ));
    }

    #[test]
    fn test_table_lists_managers_per_category() {
        let both = Recorder::new(
            "both",
            vec![MessageCategory::Tick, MessageCategory::Execute, MessageCategory::Tick],
            true,
        );
        let table = DispatchTable::build(&[both as Arc<dyn Manager>]);
        assert_eq!(table.managers_for(MessageCategory::Tick).len(), 1);
        assert_eq!(table.managers_for(MessageCategory::Execute).len(), 1);
        assert!(table.managers_for(MessageCategory::Packet).is_empty());
    }
}
