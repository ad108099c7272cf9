//! Infrared shot encoding.
//!
//! A shot is a frame of ten carrier bursts: a start marker, the shooter's
//! 8-bit id (most significant bit first, short burst = 0, long burst = 1) and
//! an end marker. Only burst *durations* matter here; whatever modulates the
//! bursts onto a carrier lives outside the core.

use crate::clock::Millis;
use crate::participant::ParticipantId;

/// Bursts in one complete frame: start + 8 payload bits + end.
pub const FRAME_BURSTS: usize = 10;

/// Silence that separates two frames on a receiver.
pub const FRAME_GAP_MS: Millis = 100;

/// Burst durations in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalTiming {
    pub marker_us: u32,
    pub zero_us: u32,
    pub one_us: u32,
    pub tolerance_us: u32,
}

impl SignalTiming {
    /// Competition timing. The long bit is twice the short bit and the
    /// tolerance is a quarter of the short bit, so no two windows overlap.
    pub const STANDARD: SignalTiming = SignalTiming {
        marker_us: 2400,
        zero_us: 600,
        one_us: 1200,
        tolerance_us: 150,
    };

    fn within(&self, observed: u32, nominal: u32) -> bool {
        observed.abs_diff(nominal) <= self.tolerance_us
    }
}

impl Default for SignalTiming {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// One classified burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Marker,
    Zero,
    One,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("frame has {0} bursts, expected {FRAME_BURSTS}")]
    WrongLength(usize),
    #[error("burst {index} ({duration_us}us) matches no symbol")]
    Unclassified { index: usize, duration_us: u32 },
    #[error("frame does not open with a start marker")]
    MissingStart,
    #[error("frame does not close with an end marker")]
    MissingEnd,
    #[error("marker burst at payload position {0}")]
    MarkerInPayload(usize),
    #[error("originator id 0 is reserved")]
    ReservedId,
}

/// Classify one observed duration with the standard timing.
pub fn classify(duration_us: u32) -> Option<Symbol> {
    classify_with(&SignalTiming::STANDARD, duration_us)
}

pub fn classify_with(timing: &SignalTiming, duration_us: u32) -> Option<Symbol> {
    if timing.within(duration_us, timing.marker_us) {
        Some(Symbol::Marker)
    } else if timing.within(duration_us, timing.one_us) {
        Some(Symbol::One)
    } else if timing.within(duration_us, timing.zero_us) {
        Some(Symbol::Zero)
    } else {
        None
    }
}

/// Encode a shooter id as a frame of burst durations.
pub fn encode(originator: ParticipantId) -> Vec<u32> {
    encode_with(&SignalTiming::STANDARD, originator)
}

pub fn encode_with(timing: &SignalTiming, originator: ParticipantId) -> Vec<u32> {
    let mut bursts = Vec::with_capacity(FRAME_BURSTS);
    bursts.push(timing.marker_us);
    for bit in (0..8).rev() {
        if (originator >> bit) & 1 == 1 {
            bursts.push(timing.one_us);
        } else {
            bursts.push(timing.zero_us);
        }
    }
    bursts.push(timing.marker_us);
    bursts
}

/// Decode a frame of observed burst durations back into the shooter id.
pub fn decode(bursts: &[u32]) -> Result<ParticipantId, SignalError> {
    decode_with(&SignalTiming::STANDARD, bursts)
}

pub fn decode_with(timing: &SignalTiming, bursts: &[u32]) -> Result<ParticipantId, SignalError> {
    if bursts.len() != FRAME_BURSTS {
        return Err(SignalError::WrongLength(bursts.len()));
    }

    let mut symbols = [Symbol::Marker; FRAME_BURSTS];
    for (index, &duration_us) in bursts.iter().enumerate() {
        symbols[index] = classify_with(timing, duration_us)
            .ok_or(SignalError::Unclassified { index, duration_us })?;
    }

    if symbols[0] != Symbol::Marker {
        return Err(SignalError::MissingStart);
    }
    if symbols[FRAME_BURSTS - 1] != Symbol::Marker {
        return Err(SignalError::MissingEnd);
    }

    let mut id: u8 = 0;
    for (position, symbol) in symbols[1..FRAME_BURSTS - 1].iter().enumerate() {
        id <<= 1;
        match symbol {
            Symbol::One => id |= 1,
            Symbol::Zero => {},
            Symbol::Marker => return Err(SignalError::MarkerInPayload(position)),
        }
    }

    if id == 0 {
        return Err(SignalError::ReservedId);
    }
    Ok(id)
}

/// Groups raw burst observations from one receiver into frames.
///
/// A silence longer than [`FRAME_GAP_MS`] discards any partial frame; a frame
/// is decoded as soon as it holds [`FRAME_BURSTS`] bursts.
#[derive(Debug, Default)]
pub struct BurstAssembler {
    timing: SignalTiming,
    pending: Vec<u32>,
    last_burst_at: Option<Millis>,
    rejected: u64,
}

impl BurstAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one burst observed at `at`. Returns the decoded shooter id when
    /// this burst completes a valid frame.
    pub fn push(&mut self, duration_us: u32, at: Millis) -> Option<ParticipantId> {
        if let Some(last) = self.last_burst_at
            && at.saturating_sub(last) > FRAME_GAP_MS
            && !self.pending.is_empty()
        {
            tracing::debug!(bursts = self.pending.len(), "Discarding partial IR frame");
            self.rejected += 1;
            self.pending.clear();
        }
        self.last_burst_at = Some(at);
        self.pending.push(duration_us);

        if self.pending.len() < FRAME_BURSTS {
            return None;
        }

        let frame = std::mem::take(&mut self.pending);
        match decode_with(&self.timing, &frame) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::debug!(error = %e, "Rejected IR frame");
                self.rejected += 1;
                None
            },
        }
    }

    /// Frames dropped as partial or invalid since creation.
    pub fn rejected_frames(&self) -> u64 {
        self.rejected
    }
}
