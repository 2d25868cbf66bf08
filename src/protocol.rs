use bytes::{Buf, Bytes};

/// Sentinel tag in byte 0 of an absolute-count frame
pub const REP_COUNT_TAG: u8 = 0xAA;

/// Marker searched for in text payloads
pub const TEXT_REP_MARKER: &str = "rep";

/// Count-reset command written to the rep counter.
///
/// A tagged zero count: the device sets its running total back to 0.
pub const RESET_COMMAND: [u8; 2] = [REP_COUNT_TAG, 0x00];

/// A notification payload recognized by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepFrame {
    /// Device running total since its last reset, as reported
    AbsoluteCount(u32),
    /// One notification per rep
    Pulse,
    /// Text payload carrying the rep marker
    TextMarker,
}

/// Number of reps to deliver for one payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepDelta(pub u32);

impl RepDelta {
    /// Reps carried by this delta
    #[must_use]
    pub const fn reps(self) -> u32 {
        self.0
    }
}

impl RepFrame {
    /// Decode a raw payload, trying absolute count, pulse, then text.
    ///
    /// Returns `None` for anything unrecognized.
    ///
    /// Frame layouts:
    /// - Absolute count: `[REP_COUNT_TAG, count, ..]`
    /// - Pulse: a single byte in `(0, target_reps]` that is not the tag
    /// - Text: UTF-8 containing "rep" in any case
    #[must_use]
    pub fn decode(data: &[u8], target_reps: u32) -> Option<Self> {
        let mut buf = data;

        if buf.remaining() >= 2 && buf[0] == REP_COUNT_TAG {
            buf.advance(1);
            return Some(Self::AbsoluteCount(u32::from(buf.get_u8())));
        }

        if let [byte] = data {
            let value = u32::from(*byte);
            if *byte != REP_COUNT_TAG && value > 0 && value <= target_reps {
                return Some(Self::Pulse);
            }
            return None;
        }

        match std::str::from_utf8(data) {
            Ok(text) if text.to_ascii_lowercase().contains(TEXT_REP_MARKER) => {
                Some(Self::TextMarker)
            }
            _ => None,
        }
    }
}

/// Turns recognized frames into rep deltas against the device's running count.
///
/// Owns `last_absolute_count`; only the two reset points touch it from outside.
/// Absolute counts are clamped to the set's target before the delta is taken.
///
/// After [`await_device_reset`](Self::await_device_reset) the device may still
/// report its old total until the reset command lands. Absolute frames are
/// discarded until one reports less than the old baseline.
#[derive(Debug, Clone, Default)]
pub struct RepDecoder {
    last_absolute_count: u32,
    pending_reset: Option<u32>,
}

impl RepDecoder {
    /// Decoder with a zero baseline
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_absolute_count: 0,
            pending_reset: None,
        }
    }

    /// Device count at the last accepted absolute frame
    #[must_use]
    pub const fn last_absolute_count(&self) -> u32 {
        self.last_absolute_count
    }

    /// Absolute frames are held back until the device confirms its reset
    #[must_use]
    pub const fn is_awaiting_reset(&self) -> bool {
        self.pending_reset.is_some()
    }

    /// Baseline back to zero for a device that is already reset
    pub fn reset(&mut self) {
        self.last_absolute_count = 0;
        self.pending_reset = None;
    }

    /// Baseline back to zero while a reset command is still on its way
    pub fn await_device_reset(&mut self) {
        if self.last_absolute_count > 0 {
            self.pending_reset = Some(self.last_absolute_count);
        }
        self.last_absolute_count = 0;
    }

    /// Decode a payload and compute the reps it adds
    pub fn decode(&mut self, data: &[u8], target_reps: u32) -> Option<RepDelta> {
        match RepFrame::decode(data, target_reps)? {
            RepFrame::AbsoluteCount(reported) => {
                if let Some(previous) = self.pending_reset {
                    if reported >= previous {
                        return None;
                    }
                    self.pending_reset = None;
                }

                let count = reported.min(target_reps);
                let delta = count.saturating_sub(self.last_absolute_count);
                if delta == 0 {
                    return None;
                }
                self.last_absolute_count = count;
                Some(RepDelta(delta))
            }
            RepFrame::Pulse | RepFrame::TextMarker => Some(RepDelta(1)),
        }
    }
}

/// Command bytes that zero the device's running count
#[must_use]
pub fn reset_command() -> Bytes {
    Bytes::from_static(&RESET_COMMAND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_frame_takes_priority() {
        assert_eq!(
            RepFrame::decode(&[REP_COUNT_TAG, 4], 10),
            Some(RepFrame::AbsoluteCount(4))
        );
        // trailing bytes are ignored
        assert_eq!(
            RepFrame::decode(&[REP_COUNT_TAG, 2, 0xFF, 0x00], 10),
            Some(RepFrame::AbsoluteCount(2))
        );
    }

    #[test]
    fn test_absolute_count_is_clamped_to_target() {
        assert_eq!(
            RepFrame::decode(&[REP_COUNT_TAG, 42], 12),
            Some(RepFrame::AbsoluteCount(42))
        );

        let mut decoder = RepDecoder::new();
        assert_eq!(decoder.decode(&[REP_COUNT_TAG, 42], 12), Some(RepDelta(12)));
        assert_eq!(decoder.last_absolute_count(), 12);
    }

    #[test]
    fn test_single_byte_pulse() {
        assert_eq!(RepFrame::decode(&[1], 10), Some(RepFrame::Pulse));
        assert_eq!(RepFrame::decode(&[10], 10), Some(RepFrame::Pulse));
        assert_eq!(RepFrame::decode(&[0], 10), None);
        assert_eq!(RepFrame::decode(&[11], 10), None);
        assert_eq!(RepFrame::decode(&[REP_COUNT_TAG], 200), None);
    }

    #[test]
    fn test_text_marker_fallback() {
        assert_eq!(RepFrame::decode(b"REP", 10), Some(RepFrame::TextMarker));
        assert_eq!(RepFrame::decode(b"rep:3", 10), Some(RepFrame::TextMarker));
        assert_eq!(RepFrame::decode(b"hello", 10), None);
        assert_eq!(RepFrame::decode(&[0xFF, 0xFE, 0x00], 10), None);
        assert_eq!(RepFrame::decode(&[], 10), None);
    }

    #[test]
    fn test_absolute_deltas() {
        let mut decoder = RepDecoder::new();

        let reps: Vec<u32> = [[REP_COUNT_TAG, 3], [REP_COUNT_TAG, 3], [REP_COUNT_TAG, 7]]
            .iter()
            .map(|frame| decoder.decode(frame, 10).map_or(0, RepDelta::reps))
            .collect();

        assert_eq!(reps, vec![3, 0, 4]);
        assert_eq!(decoder.last_absolute_count(), 7);
    }

    #[test]
    fn test_stale_lower_count_is_ignored() {
        let mut decoder = RepDecoder::new();
        assert_eq!(decoder.decode(&[REP_COUNT_TAG, 5], 10), Some(RepDelta(5)));
        assert_eq!(decoder.decode(&[REP_COUNT_TAG, 2], 10), None);
        assert_eq!(decoder.last_absolute_count(), 5);
    }

    #[test]
    fn test_reset_restores_full_count() {
        let mut decoder = RepDecoder::new();
        decoder.decode(&[REP_COUNT_TAG, 6], 10);

        decoder.reset();
        assert_eq!(decoder.last_absolute_count(), 0);
        assert_eq!(decoder.decode(&[REP_COUNT_TAG, 4], 10), Some(RepDelta(4)));
    }

    #[test]
    fn test_old_total_ignored_until_device_resets() {
        let mut decoder = RepDecoder::new();
        decoder.decode(&[REP_COUNT_TAG, 10], 10);

        decoder.await_device_reset();
        assert!(decoder.is_awaiting_reset());
        assert_eq!(decoder.last_absolute_count(), 0);

        // repeated and overshooting totals from before the reset
        assert_eq!(decoder.decode(&[REP_COUNT_TAG, 10], 8), None);
        assert_eq!(decoder.decode(&[REP_COUNT_TAG, 11], 8), None);

        assert_eq!(decoder.decode(&[REP_COUNT_TAG, 0], 8), None);
        assert!(!decoder.is_awaiting_reset());
        assert_eq!(decoder.decode(&[REP_COUNT_TAG, 2], 8), Some(RepDelta(2)));
    }

    #[test]
    fn test_first_count_after_reset_confirms_it() {
        let mut decoder = RepDecoder::new();
        decoder.decode(&[REP_COUNT_TAG, 6], 10);
        decoder.await_device_reset();

        assert_eq!(decoder.decode(&[REP_COUNT_TAG, 1], 10), Some(RepDelta(1)));
        assert!(!decoder.is_awaiting_reset());
    }

    #[test]
    fn test_reset_clears_pending_confirmation() {
        let mut decoder = RepDecoder::new();
        decoder.decode(&[REP_COUNT_TAG, 6], 10);
        decoder.await_device_reset();

        decoder.reset();
        assert!(!decoder.is_awaiting_reset());
        assert_eq!(decoder.decode(&[REP_COUNT_TAG, 6], 10), Some(RepDelta(6)));
    }

    #[test]
    fn test_nothing_to_confirm_from_zero_baseline() {
        let mut decoder = RepDecoder::new();
        decoder.await_device_reset();
        assert!(!decoder.is_awaiting_reset());
        assert_eq!(decoder.decode(&[REP_COUNT_TAG, 3], 10), Some(RepDelta(3)));
    }

    #[test]
    fn test_pulse_and_text_leave_baseline_alone() {
        let mut decoder = RepDecoder::new();
        decoder.decode(&[REP_COUNT_TAG, 3], 10);

        assert_eq!(decoder.decode(&[1], 10), Some(RepDelta(1)));
        assert_eq!(decoder.decode(b"rep", 10), Some(RepDelta(1)));
        assert_eq!(decoder.last_absolute_count(), 3);
    }

    #[test]
    fn test_reset_command_bytes() {
        let bytes = reset_command();
        assert_eq!(bytes.len(), 2);
        assert_eq!(bytes[0], REP_COUNT_TAG);
        assert_eq!(bytes[1], 0);
    }
}
