//! Mock Transport for Testing
//!
//! Provides MockTransport so the lifecycle manager and dispatcher can be
//! exercised without a gateway or a real network.

use super::event_stream::{event_channel, EventSender, EventStream};
use super::traits::*;
use crate::address::Address;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Mock transport for testing
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    sent_messages: Vec<SentMessage>,
    failing_recipients: HashSet<Address>,
    group_members: HashMap<GroupId, Vec<Address>>,
    failing_groups: HashSet<GroupId>,
    connect_calls: Vec<Option<Credential>>,
    connect_failures: VecDeque<TransportError>,
    scripted_sessions: VecDeque<Vec<TransportEvent>>,
    session: Option<EventSender>,
    disconnects: usize,
    acknowledged: Vec<Credential>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub to: Address,
    pub text: String,
}

impl MockTransport {
    /// Create new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an event into the current session
    pub fn emit(&self, event: TransportEvent) -> TransportResult<()> {
        let state = self.state.lock().unwrap();
        match &state.session {
            Some(sender) => sender.send(event),
            None => Err(TransportError::NotConnected),
        }
    }

    /// Events delivered right after the next successful `connect()`
    pub fn script_next_session(&self, events: Vec<TransportEvent>) {
        self.state
            .lock()
            .unwrap()
            .scripted_sessions
            .push_back(events);
    }

    /// Make the next `connect()` fail with `error`
    pub fn fail_next_connect(&self, error: TransportError) {
        self.state.lock().unwrap().connect_failures.push_back(error);
    }

    /// Every send to `recipient` fails until `restore_sends_to` is called
    pub fn fail_sends_to(&self, recipient: Address) {
        self.state.lock().unwrap().failing_recipients.insert(recipient);
    }

    pub fn restore_sends_to(&self, recipient: &Address) {
        self.state.lock().unwrap().failing_recipients.remove(recipient);
    }

    pub fn set_group_members(&self, group: GroupId, members: Vec<Address>) {
        self.state.lock().unwrap().group_members.insert(group, members);
    }

    pub fn fail_fetches_for(&self, group: GroupId) {
        self.state.lock().unwrap().failing_groups.insert(group);
    }

    /// Get sent messages for assertions
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent_messages.clone()
    }

    /// Number of successful sends to `recipient`
    pub fn sent_to(&self, recipient: &Address) -> usize {
        self.state
            .lock()
            .unwrap()
            .sent_messages
            .iter()
            .filter(|m| &m.to == recipient)
            .count()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connect_calls.len()
    }

    /// Credential passed to each `connect()` call, in order
    pub fn connect_credentials(&self) -> Vec<Option<Credential>> {
        self.state.lock().unwrap().connect_calls.clone()
    }

    /// Credentials acknowledged as stored, in order
    pub fn acknowledged_credentials(&self) -> Vec<Credential> {
        self.state.lock().unwrap().acknowledged.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    pub fn has_session(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .session
            .as_ref()
            .is_some_and(|s| !s.is_closed())
    }

    /// Clear all state
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        *state = MockState::default();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, credential: Option<&Credential>) -> TransportResult<EventStream> {
        let mut state = self.state.lock().unwrap();
        state.connect_calls.push(credential.cloned());

        if let Some(error) = state.connect_failures.pop_front() {
            return Err(error);
        }

        let (stream, sender) = event_channel();
        if let Some(events) = state.scripted_sessions.pop_front() {
            for event in events {
                sender.send(event)?;
            }
        }
        state.session = Some(sender);
        Ok(stream)
    }

    async fn send_message(&self, to: &Address, text: &str) -> TransportResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_recipients.contains(to) {
            return Err(TransportError::Rejected(format!("delivery to {} refused", to)));
        }
        state.sent_messages.push(SentMessage {
            to: to.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn fetch_group_members(&self, group: &GroupId) -> TransportResult<Vec<Address>> {
        let state = self.state.lock().unwrap();
        if state.failing_groups.contains(group) {
            return Err(TransportError::Network(format!("fetch {} failed", group)));
        }
        state
            .group_members
            .get(group)
            .cloned()
            .ok_or_else(|| TransportError::Rejected(format!("unknown group {}", group)))
    }

    async fn acknowledge_credentials(&self, credential: &Credential) -> TransportResult<()> {
        self.state
            .lock()
            .unwrap()
            .acknowledged
            .push(credential.clone());
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().unwrap();
        state.session = None;
        state.disconnects += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_message() {
        let transport = MockTransport::new();
        let recipient = Address::from("user1@net");

        transport.send_message(&recipient, "Hello").await.unwrap();

        let sent = transport.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "Hello");
        assert_eq!(transport.sent_to(&recipient), 1);
    }

    #[tokio::test]
    async fn test_failing_recipient() {
        let transport = MockTransport::new();
        let recipient = Address::from("user1@net");
        transport.fail_sends_to(recipient.clone());

        assert!(transport.send_message(&recipient, "Hi").await.is_err());
        assert!(transport.sent_messages().is_empty());

        transport.restore_sends_to(&recipient);
        transport.send_message(&recipient, "Hi").await.unwrap();
        assert_eq!(transport.sent_to(&recipient), 1);
    }

    #[tokio::test]
    async fn test_scripted_session_and_emit() {
        let transport = MockTransport::new();
        transport.script_next_session(vec![TransportEvent::Opened {
            own_address: Address::from("bot@net"),
        }]);

        let mut stream = transport.connect(None).await.unwrap();
        assert!(matches!(
            stream.next().await,
            Some(TransportEvent::Opened { .. })
        ));

        transport
            .emit(TransportEvent::PairingChallenge("code".to_string()))
            .unwrap();
        assert_eq!(
            stream.next().await,
            Some(TransportEvent::PairingChallenge("code".to_string()))
        );
        assert_eq!(transport.connect_credentials(), vec![None]);
    }

    #[tokio::test]
    async fn test_connect_failure_is_consumed_once() {
        let transport = MockTransport::new();
        transport.fail_next_connect(TransportError::Network("unreachable".to_string()));

        assert!(transport.connect(None).await.is_err());
        assert!(transport.connect(None).await.is_ok());
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream() {
        let transport = MockTransport::new();
        let mut stream = transport
            .connect(Some(&Credential(vec![1, 2, 3])))
            .await
            .unwrap();

        transport.disconnect().await;
        assert!(stream.next().await.is_none());
        assert_eq!(transport.disconnect_count(), 1);
        assert!(!transport.has_session());
    }

    #[tokio::test]
    async fn test_group_members() {
        let transport = MockTransport::new();
        let group = GroupId::new("g1");
        transport.set_group_members(group.clone(), vec![Address::from("a@net")]);

        let members = transport.fetch_group_members(&group).await.unwrap();
        assert_eq!(members, vec![Address::from("a@net")]);

        transport.fail_fetches_for(group.clone());
        assert!(transport.fetch_group_members(&group).await.is_err());
        assert!(transport
            .fetch_group_members(&GroupId::new("other"))
            .await
            .is_err());
    }
}
