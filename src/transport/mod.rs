//! Messaging-network transport
//!
//! The capability set the core consumes ({connect, send_message,
//! fetch_group_members, events}) plus the gateway bridge and the test mock.

pub mod bridge;
pub mod event_stream;
pub mod mock;
pub mod traits;

pub use bridge::{BridgeConfig, BridgeTransport};
pub use event_stream::{event_channel, EventSender, EventStream};
pub use mock::MockTransport;
pub use traits::{
    Credential, DisconnectCause, GroupId, MembershipAction, MembershipEvent, Transport,
    TransportError, TransportEvent, TransportResult,
};
