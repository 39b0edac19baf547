//! Protocol module for decoding sensor notifications.

pub mod notification;

pub use notification::{decode, decode_at, parse_notification, parse_payload, PAYLOAD_LEN};
