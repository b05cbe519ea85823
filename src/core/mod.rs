pub mod application;
pub mod command;
pub mod error;
pub mod subscription;

pub use application::Application;
pub use command::{Command, TaskId, UnitOfWork};
pub use error::{FatalSignal, TaskError, TaskFailure};
pub use subscription::{IntervalError, MessageStream, Recipe, Subscription, SubscriptionKey};
