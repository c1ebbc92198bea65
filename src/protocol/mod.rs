//! Protocol module for decoding characteristic payloads.

pub mod decoder;

pub use decoder::{decode_base64_payload, decode_centi_value, decode_reading};
