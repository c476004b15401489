//! Frame synchronizer
//!
//! Turns an unbounded, arbitrarily fragmented byte stream into decoded
//! events. The buffer never grows past [`MAX_NOISE_BYTES`] while no magic is
//! in sight, and a run of more than [`MAX_INVALID_FRAMES`] bad frames throws
//! the whole buffer away so the stream can realign on fresh data.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use super::{decode_frame, DecodedEvent, PacketType, HEADER_LEN, MAGIC, MIN_FRAME_LEN};

/// Bytes of magic-free noise kept around before the oldest are dropped
pub const MAX_NOISE_BYTES: usize = 256;

/// Invalid frames tolerated before the buffer is cleared
pub const MAX_INVALID_FRAMES: u32 = 10;

/// Counters describing what the synchronizer has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Frames that decoded successfully
    pub frames_decoded: u64,
    /// Candidate frames (or unknown type bytes) that were rejected
    pub frames_rejected: u64,
    /// Bytes discarded as noise, including buffers cleared on resync
    pub bytes_discarded: u64,
    /// Times the buffer was cleared after too many invalid frames
    pub resyncs: u64,
}

/// Accumulates raw bytes and yields complete, validated events
#[derive(Debug, Default)]
pub struct FrameSynchronizer {
    buffer: Vec<u8>,
    invalid_count: u32,
    stats: SyncStats,
}

impl FrameSynchronizer {
    /// Create an empty synchronizer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event that became complete
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedEvent> {
        let mut events = Vec::new();
        self.buffer.extend_from_slice(chunk);

        while self.buffer.len() >= MIN_FRAME_LEN {
            let Some(start) = find_magic(&self.buffer) else {
                if self.buffer.len() > MAX_NOISE_BYTES {
                    let excess = self.buffer.len() - MAX_NOISE_BYTES;
                    self.discard_front(excess);
                }
                break;
            };

            if start > 0 {
                let text = String::from_utf8_lossy(&self.buffer[..start]);
                let text = text.trim();
                if !text.is_empty() {
                    debug!(text, "non-binary data before frame");
                }
                self.discard_front(start);
            }

            if self.buffer.len() < HEADER_LEN {
                break;
            }

            let code = self.buffer[3];
            let Some(kind) = PacketType::inbound(code) else {
                // Drop a single byte so a magic shifted by one is still found
                debug!(code, "unknown frame type");
                self.discard_front(1);
                self.note_invalid();
                continue;
            };

            let frame_len = kind.frame_len();
            if self.buffer.len() < frame_len {
                break;
            }

            let frame: Vec<u8> = self.buffer.drain(..frame_len).collect();
            match decode_frame(&frame) {
                Ok(event) => {
                    self.invalid_count = 0;
                    self.stats.frames_decoded += 1;
                    events.push(event);
                }
                Err(e) => {
                    debug!(kind = kind.name(), error = %e, "dropping invalid frame");
                    self.note_invalid();
                }
            }
        }

        events
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consecutive invalid frames since the last good one or resync
    pub fn invalid_count(&self) -> u32 {
        self.invalid_count
    }

    /// Lifetime counters
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Forget any partial data, e.g. after the port was reopened
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.invalid_count = 0;
    }

    fn discard_front(&mut self, count: usize) {
        self.buffer.drain(..count);
        self.stats.bytes_discarded += count as u64;
    }

    fn note_invalid(&mut self) {
        self.invalid_count += 1;
        self.stats.frames_rejected += 1;
        if self.invalid_count > MAX_INVALID_FRAMES {
            warn!(
                invalid = self.invalid_count,
                buffered = self.buffer.len(),
                "too many invalid frames, resynchronizing"
            );
            self.stats.bytes_discarded += self.buffer.len() as u64;
            self.stats.resyncs += 1;
            self.buffer.clear();
            self.invalid_count = 0;
        }
    }
}

fn find_magic(buf: &[u8]) -> Option<usize> {
    let mut marker = [0u8; 2];
    LittleEndian::write_u16(&mut marker, MAGIC);
    buf.windows(2).position(|w| w == marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuilder;

    fn data_frame(ms: u32) -> Vec<u8> {
        FrameBuilder::new(PacketType::Data)
            .u32_le(ms)
            .f32_le(1.5)
            .byte(0)
            .build()
    }

    #[test]
    fn test_waits_for_partial_frame() {
        let frame = data_frame(10);
        let mut sync = FrameSynchronizer::new();
        assert!(sync.push(&frame[..9]).is_empty());
        assert_eq!(sync.buffered(), 9);
        assert_eq!(sync.push(&frame[9..]).len(), 1);
        assert_eq!(sync.buffered(), 0);
    }

    #[test]
    fn test_noise_buffer_is_bounded() {
        let mut sync = FrameSynchronizer::new();
        sync.push(&[0x55; 1000]);
        assert_eq!(sync.buffered(), MAX_NOISE_BYTES);
        sync.push(&[0x55; 10]);
        assert_eq!(sync.buffered(), MAX_NOISE_BYTES);
    }

    #[test]
    fn test_unknown_type_drops_one_byte() {
        let mut sync = FrameSynchronizer::new();
        // magic + version + unknown type, followed by filler
        sync.push(&[0xB2, 0xA1, 0x01, 0x7E, 0, 0, 0, 0, 0]);
        assert_eq!(sync.invalid_count(), 1);
        // first byte dropped, no further magic: remaining bytes kept as noise
        assert_eq!(sync.buffered(), 8);
    }

    #[test]
    fn test_shifted_magic_recovered_after_unknown_type() {
        // stray magic immediately before a real frame
        let mut stream = vec![0xB2, 0xA1];
        stream.extend(data_frame(7));
        let mut sync = FrameSynchronizer::new();
        let events = sync.push(&stream);
        assert_eq!(events.len(), 1);
        assert_eq!(sync.invalid_count(), 0);
    }

    #[test]
    fn test_resync_clears_buffer() {
        let mut bad = data_frame(1);
        bad[10] ^= 0xFF;
        let mut sync = FrameSynchronizer::new();
        for _ in 0..MAX_INVALID_FRAMES {
            sync.push(&bad);
        }
        assert_eq!(sync.invalid_count(), MAX_INVALID_FRAMES);
        sync.push(&bad);
        assert_eq!(sync.invalid_count(), 0);
        assert_eq!(sync.stats().resyncs, 1);
    }

    #[test]
    fn test_unknown_type_storm_triggers_resync() {
        let header = [0xB2, 0xA1, 0x01, 0x7E];
        let storm: Vec<u8> = header.iter().copied().cycle().take(header.len() * 12).collect();

        let mut sync = FrameSynchronizer::new();
        assert!(sync.push(&storm).is_empty());
        assert_eq!(sync.stats().resyncs, 1);
        assert_eq!(sync.stats().frames_rejected, u64::from(MAX_INVALID_FRAMES) + 1);
        assert_eq!(sync.invalid_count(), 0);
        assert_eq!(sync.buffered(), 0);

        assert_eq!(sync.push(&data_frame(3)).len(), 1);
    }

    #[test]
    fn test_good_frame_resets_invalid_count() {
        let mut bad = data_frame(1);
        bad[14] ^= 0xFF;
        let mut sync = FrameSynchronizer::new();
        sync.push(&bad);
        sync.push(&bad);
        assert_eq!(sync.invalid_count(), 2);
        assert_eq!(sync.push(&data_frame(2)).len(), 1);
        assert_eq!(sync.invalid_count(), 0);
        assert_eq!(sync.stats().frames_decoded, 1);
        assert_eq!(sync.stats().frames_rejected, 2);
    }
}
