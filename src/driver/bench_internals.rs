//! Various driver internals which need to be exported for benchmarking.
//!
//! Included if using the `"internals"` feature flag.
//! You should not and/or cannot use these as part of a normal application.

pub use super::{
    crypto::{CryptoState, KEY_SIZE, NONCE_SIZE, TAG_SIZE},
    rtp::{packet_size, read_header, write_header, RtpHeader, RTP_HEADER_LEN},
    sequence::{SequenceClass, SequenceTracker},
};
