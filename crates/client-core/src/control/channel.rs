//! Per-remote control channel
//!
//! One entry per remote identity holds the current data connection, whether
//! it has signalled `open`, and the encoded messages submitted before that.
//! The buffer is flushed once, in submission order, when `open` arrives.
//!
//! A newer data connection for the same remote replaces the current one.
//! The replaced connection is retired rather than closed so that a
//! simultaneous open from both ends cannot tear down both connections;
//! messages arriving on a retired link are still delivered, but only the
//! current link's `open`/`closed` events change the entry's state.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::message::ControlMessage;
use super::ControlChannelError;
use crate::identity::LocalIdentity;
use crate::substrate::{DataConnection, DataEvent, DataLink, RegistrationHandle};

/// Subscriber invoked for every decoded inbound message
pub type MessageHandler = Arc<dyn Fn(&LocalIdentity, &ControlMessage) + Send + Sync>;

/// Identifies one data connection attached to an entry
pub type LinkId = u64;

/// A data connection the owner must pump events from
#[derive(Debug)]
pub struct AttachedLink {
    pub remote: LocalIdentity,
    pub link_id: LinkId,
    pub events: mpsc::UnboundedReceiver<DataEvent>,
}

struct ChannelEntry {
    connection: Option<Arc<dyn DataConnection>>,
    link_id: LinkId,
    open: bool,
    pending: VecDeque<String>,
    retired: Vec<Arc<dyn DataConnection>>,
}

impl ChannelEntry {
    fn new() -> Self {
        Self {
            connection: None,
            link_id: 0,
            open: false,
            pending: VecDeque::new(),
            retired: Vec::new(),
        }
    }

    fn close_all(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
        for conn in self.retired.drain(..) {
            conn.close();
        }
        self.open = false;
    }
}

/// Control channels of one session, keyed by remote identity
pub struct ControlChannel {
    entries: HashMap<LocalIdentity, ChannelEntry>,
    subscribers: Vec<MessageHandler>,
    next_link_id: LinkId,
}

impl fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlChannel")
            .field("remotes", &self.entries.keys().collect::<Vec<_>>())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl Default for ControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlChannel {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            subscribers: Vec::new(),
            next_link_id: 0,
        }
    }

    /// Open a channel to `remote` unless one is already cached
    ///
    /// Returns the new link for the caller to pump, or `None` when an
    /// existing connection was reused.
    pub fn open(
        &mut self,
        remote: &LocalIdentity,
        registration: Option<&dyn RegistrationHandle>,
    ) -> Result<Option<AttachedLink>, ControlChannelError> {
        if self
            .entries
            .get(remote)
            .is_some_and(|e| e.connection.is_some())
        {
            return Ok(None);
        }
        let registration = registration.ok_or(ControlChannelError::NotRegistered)?;
        let link = registration
            .connect_data(remote)
            .map_err(|e| ControlChannelError::SendFailed {
                remote: remote.to_string(),
                reason: e.to_string(),
            })?;
        debug!(remote = %remote, "Opening control channel");
        Ok(Some(self.attach(remote.clone(), link)))
    }

    /// Adopt a data connection (inbound, or just dialed) as the current one
    pub fn attach(&mut self, remote: LocalIdentity, link: DataLink) -> AttachedLink {
        self.next_link_id += 1;
        let link_id = self.next_link_id;
        let entry = self
            .entries
            .entry(remote.clone())
            .or_insert_with(ChannelEntry::new);
        if let Some(previous) = entry.connection.replace(link.connection) {
            debug!(remote = %remote, "Replacing cached control connection");
            entry.retired.push(previous);
        }
        entry.link_id = link_id;
        entry.open = false;

        AttachedLink {
            remote,
            link_id,
            events: link.events,
        }
    }

    /// Send `message` to `remote`, buffering until the channel is open
    pub fn send(
        &mut self,
        remote: &LocalIdentity,
        message: &ControlMessage,
    ) -> Result<(), ControlChannelError> {
        let encoded = message.encode().map_err(|e| ControlChannelError::Encode {
            reason: e.to_string(),
        })?;
        let entry = self
            .entries
            .entry(remote.clone())
            .or_insert_with(ChannelEntry::new);

        match (&entry.connection, entry.open) {
            (Some(conn), true) => {
                conn.send(&encoded)
                    .map_err(|e| ControlChannelError::SendFailed {
                        remote: remote.to_string(),
                        reason: e.to_string(),
                    })?;
                debug!(remote = %remote, message = %message, "Control message sent");
            }
            _ => {
                entry.pending.push_back(encoded);
                debug!(
                    remote = %remote,
                    message = %message,
                    pending = entry.pending.len(),
                    "Control channel not open, message buffered"
                );
            }
        }
        Ok(())
    }

    /// Register a subscriber for every decoded inbound message
    pub fn on_message(&mut self, handler: MessageHandler) {
        self.subscribers.push(handler);
    }

    /// Process one event from a pumped link
    ///
    /// Returns the decoded message, if the event carried a valid one.
    pub fn handle_event(
        &mut self,
        remote: &LocalIdentity,
        link_id: LinkId,
        event: DataEvent,
    ) -> Option<ControlMessage> {
        match event {
            DataEvent::Message(payload) => self.deliver(remote, &payload),
            DataEvent::Open => {
                self.mark_open(remote, link_id);
                None
            }
            DataEvent::Closed => {
                if let Some(entry) = self.current_entry(remote, link_id) {
                    entry.connection = None;
                    entry.open = false;
                    info!(remote = %remote, "Control channel closed");
                }
                None
            }
            DataEvent::Error(reason) => {
                warn!(remote = %remote, error = %reason, "Control channel error");
                if let Some(entry) = self.current_entry(remote, link_id) {
                    entry.connection = None;
                    entry.open = false;
                }
                None
            }
        }
    }

    /// Close and forget the channel to `remote`, dropping unsent messages
    pub fn close(&mut self, remote: &LocalIdentity) {
        if let Some(mut entry) = self.entries.remove(remote) {
            if !entry.pending.is_empty() {
                debug!(remote = %remote, dropped = entry.pending.len(), "Discarding unsent control messages");
            }
            entry.close_all();
        }
    }

    /// Close every channel
    pub fn close_all(&mut self) {
        for (_, mut entry) in self.entries.drain() {
            entry.close_all();
        }
    }

    /// Whether the channel to `remote` has an open connection
    pub fn is_open(&self, remote: &LocalIdentity) -> bool {
        self.entries
            .get(remote)
            .is_some_and(|e| e.open && e.connection.is_some())
    }

    /// Messages buffered for `remote`
    pub fn pending_count(&self, remote: &LocalIdentity) -> usize {
        self.entries.get(remote).map_or(0, |e| e.pending.len())
    }

    fn current_entry(&mut self, remote: &LocalIdentity, link_id: LinkId) -> Option<&mut ChannelEntry> {
        self.entries
            .get_mut(remote)
            .filter(|e| e.link_id == link_id)
    }

    fn mark_open(&mut self, remote: &LocalIdentity, link_id: LinkId) {
        let Some(entry) = self.current_entry(remote, link_id) else {
            debug!(remote = %remote, link_id, "Ignoring open from a replaced link");
            return;
        };
        entry.open = true;
        let Some(conn) = entry.connection.clone() else {
            return;
        };

        let mut flushed = 0;
        while let Some(encoded) = entry.pending.pop_front() {
            if let Err(e) = conn.send(&encoded) {
                warn!(remote = %remote, error = %e, "Flushing buffered control message failed");
                entry.pending.push_front(encoded);
                entry.open = false;
                break;
            }
            flushed += 1;
        }
        info!(remote = %remote, flushed, "Control channel open");
    }

    fn deliver(&self, remote: &LocalIdentity, payload: &str) -> Option<ControlMessage> {
        match ControlMessage::decode(payload) {
            Ok(message) => {
                debug!(remote = %remote, message = %message, "Control message received");
                for handler in &self.subscribers {
                    handler(remote, &message);
                }
                Some(message)
            }
            Err(e) => {
                warn!(remote = %remote, error = %e, "Dropping undecodable control message");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::SubstrateError;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct RecordingConnection {
        sent: Mutex<Vec<String>>,
        closed: Mutex<bool>,
    }

    impl DataConnection for RecordingConnection {
        fn id(&self) -> &str {
            "rec"
        }

        fn remote(&self) -> &LocalIdentity {
            unreachable!("not used by the channel")
        }

        fn send(&self, text: &str) -> Result<(), SubstrateError> {
            if *self.closed.lock() {
                return Err(SubstrateError::Closed);
            }
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        fn close(&self) {
            *self.closed.lock() = true;
        }
    }

    fn bob() -> LocalIdentity {
        LocalIdentity::parse("bob").unwrap()
    }

    fn link(conn: &Arc<RecordingConnection>) -> (DataLink, mpsc::UnboundedSender<DataEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            DataLink {
                connection: conn.clone(),
                events: rx,
            },
            tx,
        )
    }

    #[test]
    fn sends_before_open_flush_once_in_order() {
        let mut channel = ControlChannel::new();
        let conn = Arc::new(RecordingConnection::default());
        let (data_link, _tx) = link(&conn);
        let attached = channel.attach(bob(), data_link);

        channel.send(&bob(), &ControlMessage::StimulusStart).unwrap();
        channel.send(&bob(), &ControlMessage::VideoEnabled(false)).unwrap();
        channel.send(&bob(), &ControlMessage::StimulusStop).unwrap();
        assert!(conn.sent.lock().is_empty());
        assert_eq!(channel.pending_count(&bob()), 3);

        channel.handle_event(&bob(), attached.link_id, DataEvent::Open);
        channel.handle_event(&bob(), attached.link_id, DataEvent::Open);
        assert_eq!(
            *conn.sent.lock(),
            vec!["stimulus-start", "video-disabled", "stimulus-stop"]
        );
        assert_eq!(channel.pending_count(&bob()), 0);

        channel.send(&bob(), &ControlMessage::VideoEnabled(true)).unwrap();
        assert_eq!(conn.sent.lock().len(), 4);
    }

    #[test]
    fn sends_without_any_connection_wait_for_attach() {
        let mut channel = ControlChannel::new();
        channel.send(&bob(), &ControlMessage::StimulusStart).unwrap();
        assert!(!channel.is_open(&bob()));

        let conn = Arc::new(RecordingConnection::default());
        let (data_link, _tx) = link(&conn);
        let attached = channel.attach(bob(), data_link);
        channel.handle_event(&bob(), attached.link_id, DataEvent::Open);
        assert_eq!(*conn.sent.lock(), vec!["stimulus-start"]);
    }

    #[test]
    fn subscribers_see_decoded_messages_only() {
        let mut channel = ControlChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        channel.on_message(Arc::new(move |_remote, msg| sink.lock().push(msg.clone())));

        assert_eq!(
            channel.handle_event(&bob(), 1, DataEvent::Message("stimulus-start".into())),
            Some(ControlMessage::StimulusStart)
        );
        assert_eq!(
            channel.handle_event(&bob(), 1, DataEvent::Message("not a tag".into())),
            None
        );
        assert_eq!(*seen.lock(), vec![ControlMessage::StimulusStart]);
    }

    #[test]
    fn replaced_link_events_do_not_close_the_current_one() {
        let mut channel = ControlChannel::new();
        let old = Arc::new(RecordingConnection::default());
        let new = Arc::new(RecordingConnection::default());
        let (old_link, _a) = link(&old);
        let (new_link, _b) = link(&new);

        let first = channel.attach(bob(), old_link);
        let second = channel.attach(bob(), new_link);
        channel.handle_event(&bob(), second.link_id, DataEvent::Open);
        channel.handle_event(&bob(), first.link_id, DataEvent::Closed);

        assert!(channel.is_open(&bob()));
        channel.send(&bob(), &ControlMessage::StimulusStop).unwrap();
        assert_eq!(*new.sent.lock(), vec!["stimulus-stop"]);
        assert!(old.sent.lock().is_empty());
    }

    #[test]
    fn close_closes_current_and_retired_connections() {
        let mut channel = ControlChannel::new();
        let old = Arc::new(RecordingConnection::default());
        let new = Arc::new(RecordingConnection::default());
        let (old_link, _a) = link(&old);
        let (new_link, _b) = link(&new);
        channel.attach(bob(), old_link);
        channel.attach(bob(), new_link);

        channel.close(&bob());
        assert!(*old.closed.lock());
        assert!(*new.closed.lock());
        assert_eq!(channel.pending_count(&bob()), 0);
    }

    #[test]
    fn open_without_registration_is_an_error() {
        let mut channel = ControlChannel::new();
        assert!(matches!(
            channel.open(&bob(), None),
            Err(ControlChannelError::NotRegistered)
        ));
    }
}
