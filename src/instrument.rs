//! Observation of protocol traffic and operations.
//!
//! A [`Connection`](../conn/struct.Connection.html) with an attached
//! [`Instrument`](trait.Instrument.html) calls it synchronously, in place, for
//! every frame written, every unit read and decoded, and at the end of every
//! operation. [`EventBus`](struct.EventBus.html) is a ready-made instrument which
//! fans events out to per-kind subscribers over unbounded channels:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ldapwire::{EventBus, EventKind, Ldap, LdapConnSettings};
//!
//! # fn main() -> ldapwire::result::Result<()> {
//! let bus = Arc::new(EventBus::new());
//! let mut searches = bus.subscribe(EventKind::Search);
//! let settings = LdapConnSettings::new().set_instrument(bus.clone());
//! let mut ldap = Ldap::with_settings(settings, "ldap://localhost:2389")?;
//! ldap.search("dc=example,dc=org", ldapwire::Scope::Subtree, "(objectClass=*)", vec!["cn"])?;
//! while let Ok(event) = searches.try_recv() {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Mutex;

use crate::pdu::{AppTag, Pdu};
use crate::protocol::RawUnit;
use crate::result::{self, LdapResult};
use crate::RequestId;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Names of instrumentation events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Write,
    Read,
    ParsePdu,
    Bind,
    Search,
    SearchMessagesUnread,
    Add,
    Modify,
    Delete,
    Rename,
    Compare,
    Extended,
    StartTls,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Write => "write",
            EventKind::Read => "read",
            EventKind::ParsePdu => "parse_pdu",
            EventKind::Bind => "bind",
            EventKind::Search => "search",
            EventKind::SearchMessagesUnread => "search_messages_unread",
            EventKind::Add => "add",
            EventKind::Modify => "modify",
            EventKind::Delete => "delete",
            EventKind::Rename => "rename",
            EventKind::Compare => "compare",
            EventKind::Extended => "extended",
            EventKind::StartTls => "start_tls",
        }
    }
}

/// Outcome of a transport step. Errors are carried as their message,
/// since the error type can't be cloned to every subscriber.
pub type StepResult = std::result::Result<(), String>;

pub(crate) fn step<T>(res: &result::Result<T>) -> StepResult {
    match res {
        Ok(_) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

/// Instrumentation payload.
#[derive(Clone, Debug)]
pub enum Event {
    /// A request frame was handed to the socket.
    Write {
        message_id: RequestId,
        content_length: usize,
        result: StepResult,
    },
    /// A read from the socket finished, before decoding the protocol op.
    /// `unit` is present if the read succeeded.
    Read {
        unit: Option<RawUnit>,
        result: StepResult,
    },
    /// A unit was decoded, whether or not anyone was waiting for it. On a
    /// decoding failure, only `message_id` and `result` are meaningful.
    ParsePdu {
        message_id: RequestId,
        app_tag: Option<AppTag>,
        pdu: Option<Pdu>,
        result: StepResult,
    },
    Bind { result: LdapResult },
    Search {
        base: String,
        filter: String,
        entries: usize,
        result: LdapResult,
    },
    /// PDUs for a finished search were still buffered.
    SearchMessagesUnread {
        message_id: RequestId,
        unread: usize,
    },
    /// Any other finished operation; `kind` names it.
    Operation { kind: EventKind, result: LdapResult },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Write { .. } => EventKind::Write,
            Event::Read { .. } => EventKind::Read,
            Event::ParsePdu { .. } => EventKind::ParsePdu,
            Event::Bind { .. } => EventKind::Bind,
            Event::Search { .. } => EventKind::Search,
            Event::SearchMessagesUnread { .. } => EventKind::SearchMessagesUnread,
            Event::Operation { kind, .. } => *kind,
        }
    }

    /// Outcome of a write, read or decode.
    pub fn step_result(&self) -> Option<&StepResult> {
        match self {
            Event::Write { result, .. }
            | Event::Read { result, .. }
            | Event::ParsePdu { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Operation result carried by the event, if any.
    pub fn result(&self) -> Option<&LdapResult> {
        match self {
            Event::Bind { result }
            | Event::Search { result, .. }
            | Event::Operation { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// Synchronous observer of connection events.
pub trait Instrument: Send + Sync {
    fn instrument(&self, event: Event);
}

/// Publish/subscribe sink for events.
///
/// Each subscriber gets its own channel; events of a kind nobody subscribed to
/// are dropped. A subscriber which drops its receiver is forgotten on the next
/// publish of that kind.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<(EventKind, UnboundedSender<Event>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Receive every future event of `kind`.
    pub fn subscribe(&self, kind: EventKind) -> UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((kind, tx));
        rx
    }
}

impl Instrument for EventBus {
    fn instrument(&self, event: Event) {
        let kind = event.kind();
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|(k, tx)| *k != kind || tx.send(event.clone()).is_ok());
    }
}
