#![deny(unsafe_code)]

//! Outbound adapters: the voice-agent dispatch RPC, LiveKit room token
//! minting, and the notification publisher seam. Everything here talks to
//! the outside world; the core never does.

pub mod dispatch;
pub mod livekit;
pub mod notify;

pub use dispatch::{AgentDispatchClient, DispatchRequest};
pub use livekit::{mint_room_token, RoomTokenRequest};
pub use notify::{LogNotificationPublisher, NotificationPublisher};
