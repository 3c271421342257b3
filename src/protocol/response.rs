use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Attributes;
use crate::psearch::control::EntryChangeNotification;

/// Entry handed to the protocol layer for one search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchEntry {
    pub dn: String,
    pub attributes: Attributes,
    /// Set on persistent-search notifications when requested
    pub change: Option<EntryChangeNotification>,
}

/// Terminal outcome of a request.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    Compare(bool),
    Failed(Error),
}

impl Outcome {
    /// Directory protocol result code.
    pub fn result_code(&self) -> u32 {
        match self {
            Outcome::Success => 0,
            Outcome::Compare(false) => 5,
            Outcome::Compare(true) => 6,
            Outcome::Failed(e) => e.result_code(),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Failed(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::Compare(_))
    }
}

impl From<Result<()>> for Outcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Outcome::Success,
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// Callback surface of the protocol layer for one request.
///
/// `send` may be called any number of times; `end` exactly once, except for
/// registered persistent searches, which never end while registered.
pub trait ResponseSink: Send + Sync {
    fn send(&self, entry: SearchEntry, hide_operational: bool) -> Result<()>;

    fn end(&self, outcome: Outcome);
}

#[derive(Debug)]
pub enum SinkMessage {
    Entry(SearchEntry),
    End(Outcome),
}

/// Forwards responses over an unbounded channel. Sending fails once the
/// receiving side (the connection) is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<SinkMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<SinkMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelSink { sender }, receiver)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl ResponseSink for ChannelSink {
    fn send(&self, mut entry: SearchEntry, hide_operational: bool) -> Result<()> {
        if hide_operational {
            entry.attributes = entry.attributes.without_operational();
        }
        self.sender
            .send(SinkMessage::Entry(entry))
            .map_err(|_| Error::new(ErrorKind::OperationsError, "connection closed".to_string()))
    }

    fn end(&self, outcome: Outcome) {
        if self.sender.send(SinkMessage::End(outcome)).is_err() {
            log::debug!("response dropped, connection closed");
        }
    }
}
