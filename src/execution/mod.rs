//! Live order handling: gateway boundary, deduplication, retry backoff, lifecycle state machine.

pub mod gateway;
pub mod idempotency;
pub mod lifecycle;
pub mod observer;
pub mod retry;

pub use gateway::{ExecutionGateway, GatewayEvent, GatewayRequest, OrderHandle, PaperGateway};
#[cfg(test)]
pub use gateway::MockExecutionGateway;
pub use lifecycle::{
    ErrorApplied, FillApplied, LifecycleSettings, OrderLifecycleHandler, OrderRecord, OrderStatus,
    SubmissionOutcome,
};
pub use observer::{ObserverDelivery, ObserverEventKind, ObserverRegistry, OrderObserver};
pub use retry::{RetryDecision, RetryPolicy};
