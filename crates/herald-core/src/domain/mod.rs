//! Domain model (IDs, task record, state machine, actions, errors, events).

pub mod action;
pub mod attempt;
pub mod decision;
pub mod errors;
pub mod events;
pub mod executor;
pub mod ids;
pub mod inbound;
pub mod message;
pub mod retry;
pub mod state;
pub mod task;

pub use action::{Action, CallbackData, CallbackDataError};
pub use attempt::{AttemptOutcome, DispatchAttempt};
pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{
    ErrorKind, GatewayError, HeraldError, InvalidTransition, QueueError, StoreError,
    ValidationError,
};
pub use events::DomainEvent;
pub use executor::Executor;
pub use ids::{
    CallbackToken, DealId, ExecutorId, MessageRef, MessagingIdentity, PolicyId, TaskId,
};
pub use inbound::{CallbackEvent, InboundEvent};
pub use message::{ActionButton, RenderedMessage};
pub use retry::RetryPolicy;
pub use state::{AdminAuthority, Rewind, TaskStatus, Transition};
pub use task::{Association, NewTask, Task, TaskPatch};
