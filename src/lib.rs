#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

//! `PiHive`: the coordination broker of a multi-agent chat network, plus the
//! client session library every agent embeds.
//!
//! The broker owns the live roster, routes point-to-point and group messages,
//! arbitrates the advisory file-reservation table and tracks presence. Each
//! agent holds one WebSocket session to it; the [`inbox`] serializes inbound
//! conversation into the agent's LLM turn loop.

pub mod broker;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod inbox;
pub mod protocol;
pub mod reservation;

pub use broker::{start as start_broker, Broker, BrokerHandle};
pub use client::{AbortHandle, HiveClient, ListenerId};
pub use config::{BrokerConfig, ClientConfig};
pub use error::{HiveError, Result};
pub use identity::{AgentIdentity, IdentityArgs};
pub use inbox::{ConversationRuntime, Inbox, TranscriptMessage, TranscriptRole};
pub use protocol::{AgentInfo, AgentRecord, AgentStatus, BrokerRecord, Reservation, ReservationMap};
