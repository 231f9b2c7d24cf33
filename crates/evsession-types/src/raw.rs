//! Raw event records as the kernel reports them.
//!
//! On the descriptor every event is one fixed-size record:
//!   [i64 seconds][i64 microseconds][u16 type][u16 code][i32 value]
//! in native byte order, 24 bytes in total.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Size of one record on the wire.
pub const RECORD_SIZE: usize = 24;

/// Kernel timestamp attached to every record.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct Timestamp {
    pub seconds: i64,
    pub microseconds: i64,
}

impl Timestamp {
    pub const fn new(seconds: i64, microseconds: i64) -> Self {
        Self {
            seconds,
            microseconds,
        }
    }

    /// Convert to a [`SystemTime`]. Negative components clamp to the epoch.
    pub fn to_system_time(self) -> SystemTime {
        let secs = u64::try_from(self.seconds).unwrap_or(0);
        let micros = u64::try_from(self.microseconds).unwrap_or(0);
        UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_micros(micros)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            seconds: i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
            microseconds: i64::from(since.subsec_micros()),
        }
    }
}

/// One kernel-reported event: an immutable `(type, code, value)` triple plus
/// its timestamp.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct RawEvent {
    pub time: Timestamp,
    pub type_id: u16,
    pub code_id: u16,
    pub value: i32,
}

impl RawEvent {
    /// A record with a zero timestamp. The kernel stamps injected events
    /// itself, so this is what writers use.
    pub const fn new(type_id: u16, code_id: u16, value: i32) -> Self {
        Self {
            time: Timestamp::new(0, 0),
            type_id,
            code_id,
            value,
        }
    }

    pub const fn with_time(time: Timestamp, type_id: u16, code_id: u16, value: i32) -> Self {
        Self {
            time,
            type_id,
            code_id,
            value,
        }
    }

    /// The bare triple, without the timestamp.
    pub const fn triple(&self) -> (u16, u16, i32) {
        (self.type_id, self.code_id, self.value)
    }

    /// Decode one record from its on-descriptor representation.
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Result<Self, CodecError> {
        let (event, _) = bincode::decode_from_slice(bytes, record_config())
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(event)
    }

    /// Encode this record in its on-descriptor representation.
    pub fn to_bytes(&self) -> Result<[u8; RECORD_SIZE], CodecError> {
        let mut buf = [0u8; RECORD_SIZE];
        let written = bincode::encode_into_slice(*self, &mut buf, record_config())
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        debug_assert_eq!(written, RECORD_SIZE);
        Ok(buf)
    }
}

/// Decode a buffer holding any number of whole records.
pub fn decode_records(buf: &[u8]) -> Result<Vec<RawEvent>, CodecError> {
    if buf.len() % RECORD_SIZE != 0 {
        return Err(CodecError::Truncated {
            got: buf.len(),
            expected: RECORD_SIZE,
        });
    }

    buf.chunks_exact(RECORD_SIZE)
        .map(|chunk| {
            let mut record = [0u8; RECORD_SIZE];
            record.copy_from_slice(chunk);
            RawEvent::from_bytes(&record)
        })
        .collect()
}

#[cfg(target_endian = "little")]
fn record_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

#[cfg(target_endian = "big")]
fn record_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_big_endian()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_twenty_four_bytes_in_kernel_order() {
        let event = RawEvent::with_time(Timestamp::new(1, 2), 0x01, 30, 1);
        let bytes = event.to_bytes().unwrap();

        assert_eq!(&bytes[0..8], &1i64.to_ne_bytes());
        assert_eq!(&bytes[8..16], &2i64.to_ne_bytes());
        assert_eq!(&bytes[16..18], &1u16.to_ne_bytes());
        assert_eq!(&bytes[18..20], &30u16.to_ne_bytes());
        assert_eq!(&bytes[20..24], &1i32.to_ne_bytes());
        assert_eq!(RawEvent::from_bytes(&bytes).unwrap(), event);
    }

    #[test]
    fn negative_values_survive_the_codec() {
        let event = RawEvent::new(0x02, 0x08, -120);
        let bytes = event.to_bytes().unwrap();
        assert_eq!(RawEvent::from_bytes(&bytes).unwrap().value, -120);
    }

    #[test]
    fn decode_records_splits_a_batch() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&RawEvent::new(0x01, 30, 1).to_bytes().unwrap());
        buf.extend_from_slice(&RawEvent::new(0x00, 0, 0).to_bytes().unwrap());

        let events = decode_records(&buf).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].triple(), (0x01, 30, 1));
        assert_eq!(events[1].triple(), (0x00, 0, 0));
    }

    #[test]
    fn decode_records_rejects_partial_record() {
        let err = decode_records(&[0u8; RECORD_SIZE + 3]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { got: 27, .. }));
    }

    #[test]
    fn timestamp_from_system_time() {
        let time = UNIX_EPOCH + Duration::new(5, 250_000_000);
        let ts = Timestamp::from(time);
        assert_eq!(ts, Timestamp::new(5, 250_000));
        assert_eq!(ts.to_system_time(), time);
    }
}
