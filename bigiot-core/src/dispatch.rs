//! Routes remote commands to the local actuator.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::message::ProtocolMessage;

/// Output the device drives in response to commands.
pub trait Actuator: Send + Sync + 'static {
    fn activate(&self);
    fn deactivate(&self);
}

impl<T: Actuator + ?Sized> Actuator for Arc<T> {
    fn activate(&self) {
        (**self).activate();
    }

    fn deactivate(&self) {
        (**self).deactivate();
    }
}

/// The command verbs this device understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Play,
    Stop,
}

impl Verb {
    /// `None` for anything outside the known vocabulary.
    pub fn parse(verb: &str) -> Option<Self> {
        match verb {
            "play" => Some(Self::Play),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a dispatched message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Activated,
    Deactivated,
    /// Not a command, or a verb outside the vocabulary.
    Ignored,
}

#[derive(Debug)]
pub struct CommandDispatcher<A> {
    actuator: A,
}

impl<A: Actuator> CommandDispatcher<A> {
    pub fn new(actuator: A) -> Self {
        Self { actuator }
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Apply one inbound message. Unknown verbs are a no-op.
    pub fn dispatch(&self, msg: &ProtocolMessage) -> Dispatched {
        let ProtocolMessage::Command(cmd) = msg else {
            return Dispatched::Ignored;
        };
        let argument = cmd.argument();
        match Verb::parse(cmd.verb()) {
            Some(Verb::Play) => {
                info!(?argument, "play");
                self.actuator.activate();
                Dispatched::Activated
            }
            Some(Verb::Stop) => {
                info!(?argument, "stop");
                self.actuator.deactivate();
                Dispatched::Deactivated
            }
            None => {
                debug!(verb = cmd.verb(), "ignoring unknown command");
                Dispatched::Ignored
            }
        }
    }
}
