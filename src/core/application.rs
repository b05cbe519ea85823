//! Callback contract implemented by applications driven through the bridge

use super::command::Command;
use super::error::TaskFailure;
use super::subscription::Subscription;

/// An interactive application whose callbacks run on the host thread.
///
/// None of these methods may block. Anything slow goes into the returned
/// [`Command`] or [`Subscription`] and comes back later as a message.
pub trait Application: Sized {
    type Message: Send + 'static;
    type Flags;

    /// Build the initial state and any startup work.
    fn new(flags: Self::Flags) -> (Self, Command<Self::Message>);

    fn title(&self) -> String {
        String::from("hostbridge")
    }

    /// Handle a message. Calls are serialized by the host.
    fn update(&mut self, message: Self::Message) -> Command<Self::Message>;

    /// Handle a recoverable failure from a command or subscription.
    fn on_failure(&mut self, failure: TaskFailure) -> Command<Self::Message> {
        tracing::warn!(%failure, "unhandled task failure");
        Command::none()
    }

    fn view(&self) -> String;

    /// Streams to keep running for the current state.
    fn subscriptions(&self) -> Subscription<Self::Message> {
        Subscription::none()
    }

    fn should_exit(&self) -> bool {
        false
    }
}
