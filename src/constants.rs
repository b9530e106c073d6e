//! Constants affecting driver function and API handling.

use audiopus::{Bitrate, SampleRate};
use std::time::Duration;

/// The voice gateway version used by the library.
pub const VOICE_GATEWAY_VERSION: u8 = 4;

/// Default sample rate of audio handed to the driver.
pub const SAMPLE_RATE: SampleRate = SampleRate::Hz48000;

/// Sample rate of audio handed to the driver, as a raw number.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// Clock rate of the RTP timestamp field for Opus traffic.
///
/// This is fixed at 48kHz irrespective of the sample rate of the encoded audio.
pub const RTP_CLOCK_RATE: u32 = 48_000;

/// Default bitrate for audio.
pub const DEFAULT_BITRATE: Bitrate = Bitrate::BitsPerSecond(128_000);

/// Length (in milliseconds) of the default audio frame.
pub const FRAME_LEN_MS: u32 = 20;

/// Frame durations (in milliseconds) which may be sent over a connection.
pub const VALID_FRAME_DURATIONS: [u32; 3] = [20, 40, 60];

/// Maximum packet size for a voice packet.
///
/// Set a safe amount below the Ethernet MTU to avoid fragmentation/rejection.
pub const VOICE_PACKET_MAX: usize = 1460;

/// Delay between sends of UDP keepalive frames.
pub const UDP_KEEPALIVE_GAP_MS: u64 = 5_000;

/// Type-converted delay between sends of UDP keepalive frames.
pub const UDP_KEEPALIVE_GAP: Duration = Duration::from_millis(UDP_KEEPALIVE_GAP_MS);

/// Age after which an unanswered keepalive is forgotten.
pub const UDP_KEEPALIVE_EXPIRY: Duration = Duration::from_millis(3 * UDP_KEEPALIVE_GAP_MS);

/// Heartbeat interval used when the server's is unusable.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest heartbeat interval honoured from the server.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(250);

/// Size of a UDP keepalive datagram: one little-endian `u64` counter.
pub const KEEPALIVE_LEN: usize = 8;

/// Smallest datagram which can hold an RTP header and at least one byte of payload.
pub const MIN_RTP_PACKET_LEN: usize = 13;

/// Size of an IP discovery request or response.
pub const IP_DISCOVERY_LEN: usize = 74;

/// Value of the length field in an IP discovery request.
pub const IP_DISCOVERY_BODY_LEN: u16 = 70;

/// Opus silent frame, used to signal speech start and end (and prevent audio glitching).
pub const SILENT_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Number of silent frames sent once outgoing audio runs dry.
pub const TRAILING_SILENCE_FRAMES: usize = 3;

/// Number of silent frames sent when a connection first becomes active.
pub const PRIMING_SILENCE_FRAMES: usize = 3;

/// The one (and only) RTP version.
pub const RTP_VERSION: u8 = 2;

/// Profile type used by Opus audio traffic.
pub const RTP_PROFILE_TYPE: u8 = 120;

/// Marker byte which may precede received Opus payloads after an extension block.
pub const RTP_PAYLOAD_MARKER: u8 = 0x90;

/// Base unit of the packet pacing clock.
///
/// Every frame duration advances the pacing deadline by a whole multiple of this unit.
pub const PACING_UNIT: Duration = Duration::from_millis(5);

/// Amount the sender may fall behind its pacing deadline before the clock is reset.
pub const MAX_PACING_LAG: Duration = Duration::from_millis(200);

/// Gap size from which lost packets are reported as a loss burst.
pub const LOSS_BURST_WARN: u64 = 5;

/// Default number of frames held by the outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 25;

/// Default maximum number of concealment frames synthesized for one gap.
pub const DEFAULT_MAX_CONCEALMENT_FRAMES: usize = 10;

/// Largest volume modifier accepted by a transmit sink.
pub const MAX_VOLUME: f32 = 2.5;
