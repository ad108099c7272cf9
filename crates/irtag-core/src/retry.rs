use std::collections::BTreeMap;

use crate::clock::Millis;
use crate::participant::ParticipantId;
use crate::protocol::Message;

#[derive(Debug, Clone)]
struct Pending {
    message: Message,
    remaining: u32,
    next_at: Millis,
}

/// Repeats control messages over a lossy link.
///
/// The first copy is sent by the caller; the queue then hands back the same
/// message `resends` more times, `interval_ms` apart. At most one control
/// message is pending per recipient: scheduling a newer one drops the older.
#[derive(Debug)]
pub struct RetryQueue {
    interval_ms: Millis,
    resends: u32,
    pending: BTreeMap<ParticipantId, Pending>,
}

impl RetryQueue {
    pub fn new(interval_ms: Millis, resends: u32) -> Self {
        Self {
            interval_ms,
            resends,
            pending: BTreeMap::new(),
        }
    }

    pub fn schedule(&mut self, recipient: ParticipantId, message: Message, now: Millis) {
        if self.resends == 0 {
            self.pending.remove(&recipient);
            return;
        }
        if let Some(old) = self.pending.get(&recipient) {
            tracing::debug!(
                participant = recipient,
                superseded = old.message.kind(),
                by = message.kind(),
                "Control message superseded"
            );
        }
        self.pending.insert(
            recipient,
            Pending {
                message,
                remaining: self.resends,
                next_at: now.saturating_add(self.interval_ms),
            },
        );
    }

    /// Messages whose next resend is due at `now`.
    pub fn due(&mut self, now: Millis) -> Vec<(ParticipantId, Message)> {
        let mut out = Vec::new();
        let interval_ms = self.interval_ms;
        self.pending.retain(|&recipient, pending| {
            if now < pending.next_at {
                return true;
            }
            out.push((recipient, pending.message.clone()));
            pending.remaining -= 1;
            pending.next_at = now.saturating_add(interval_ms);
            pending.remaining > 0
        });
        out
    }

    pub fn cancel(&mut self, recipient: ParticipantId) {
        self.pending.remove(&recipient);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
