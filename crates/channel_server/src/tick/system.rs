//! Managers that run ticks and deferred work on a worker.

use super::handler::TickHandler;
use std::sync::Arc;
use tracing::trace;
use world_core::{
    Disposition, Manager, ManagerError, Message, MessageBody, MessageCategory, WorkerContext,
};

/// Runs the tick on the worker that receives `Tick` messages.
pub struct SystemManager {
    handler: Arc<TickHandler>,
}

impl SystemManager {
    pub fn new(handler: Arc<TickHandler>) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &Arc<TickHandler> {
        &self.handler
    }
}

impl Manager for SystemManager {
    fn name(&self) -> &str {
        "system"
    }

    fn supported_categories(&self) -> &[MessageCategory] {
        &[MessageCategory::Tick]
    }

    fn process_message(
        &self,
        ctx: &WorkerContext,
        message: Message,
    ) -> Result<Disposition, ManagerError> {
        if !matches!(message.body(), MessageBody::Tick) {
            return Ok(Disposition::Declined(message));
        }
        let report = self.handler.run_tick(ctx.queue());
        trace!(
            "⏰ Tick at {} delivered {} scheduled item(s)",
            report.tick_time,
            report.scheduled_delivered
        );
        Ok(Disposition::Handled)
    }
}

/// Runs `Execute` work on whichever worker it was enqueued on.
#[derive(Debug, Default)]
pub struct WorkExecutor;

impl Manager for WorkExecutor {
    fn name(&self) -> &str {
        "work_executor"
    }

    fn supported_categories(&self) -> &[MessageCategory] {
        &[MessageCategory::Execute]
    }

    fn process_message(
        &self,
        ctx: &WorkerContext,
        message: Message,
    ) -> Result<Disposition, ManagerError> {
        match message.into_parts() {
            (_, MessageBody::Execute(work)) => {
                trace!("▶️ {} running '{}'", ctx.worker_name(), work.label());
                work.run();
                Ok(Disposition::Handled)
            }
            (correlation, body) => {
                let mut message = Message::new(body);
                if let Some(correlation) = correlation {
                    message = message.with_correlation(correlation);
                }
                Ok(Disposition::Declined(message))
            }
        }
    }
}
