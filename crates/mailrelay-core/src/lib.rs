//! Core relay logic for mailrelay
//!
//! Accepts mail on a loopback listener, splits batched notifications and
//! relays every part to every recipient through an OAuth2-authenticated
//! submission server.

pub mod config;
mod error;
mod listener;
mod relay;
pub mod splitter;

pub use error::{CoreError, CoreResult};
pub use listener::{
    dispatch, fan_out, ConnectionState, DispatchReport, InboundListener, ListenerConfig,
    ListenerHandle, RelayHandler,
};
pub use relay::{Deliver, OutboundDelivery, OutboundRelay};
pub use splitter::{split, SubMessage, SubMessages};
