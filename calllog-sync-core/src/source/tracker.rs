//! Call direction and duration from call-state history
//!
//! The telephony signal only reports IDLE, RINGING and OFFHOOK. Direction is
//! inferred from how the call reached OFFHOOK:
//!
//! | Sequence | Direction | Start | Duration |
//! |----------|-----------|-------|----------|
//! | IDLE → OFFHOOK → IDLE | Outgoing | offhook | offhook → idle |
//! | IDLE → RINGING → OFFHOOK → IDLE | Incoming | ringing | offhook → idle |
//! | IDLE → RINGING → IDLE | Missed | ringing | 0 |

use crate::types::{CallDirection, CallEnded, CallState, CallStateChange};

#[derive(Debug, Clone)]
struct ActiveCall {
    number: String,
    started_at_ms: i64,
    answered_at_ms: Option<i64>,
    rang: bool,
}

impl ActiveCall {
    fn note_number(&mut self, number: &str) {
        if !number.is_empty() {
            self.number = number.to_string();
        }
    }

    fn finish(self, ended_at_ms: i64) -> CallEnded {
        let direction = match (self.rang, self.answered_at_ms) {
            (false, _) => CallDirection::Outgoing,
            (true, Some(_)) => CallDirection::Incoming,
            (true, None) => CallDirection::Missed,
        };
        let duration_sec = self
            .answered_at_ms
            .map(|answered| {
                let talk_ms = ended_at_ms.saturating_sub(answered).max(0);
                u32::try_from(talk_ms / 1000).unwrap_or(u32::MAX)
            })
            .unwrap_or(0);

        CallEnded {
            number: self.number,
            timestamp_ms: self.started_at_ms,
            direction,
            duration_sec,
        }
    }
}

/// Tracks the call in progress and emits a [`CallEnded`] when it goes idle.
#[derive(Debug, Default)]
pub struct CallStateTracker {
    call: Option<ActiveCall>,
}

impl CallStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transition; returns the finished call on the transition to idle.
    pub fn observe(&mut self, change: &CallStateChange) -> Option<CallEnded> {
        match change.state {
            CallState::Ringing => {
                match &mut self.call {
                    Some(call) => call.note_number(&change.number),
                    None => {
                        self.call = Some(ActiveCall {
                            number: change.number.clone(),
                            started_at_ms: change.at_ms,
                            answered_at_ms: None,
                            rang: true,
                        });
                    }
                }
                None
            }
            CallState::OffHook => {
                match &mut self.call {
                    Some(call) => {
                        call.note_number(&change.number);
                        if call.answered_at_ms.is_none() {
                            call.answered_at_ms = Some(change.at_ms);
                        }
                    }
                    None => {
                        self.call = Some(ActiveCall {
                            number: change.number.clone(),
                            started_at_ms: change.at_ms,
                            answered_at_ms: Some(change.at_ms),
                            rang: false,
                        });
                    }
                }
                None
            }
            CallState::Idle => {
                let ended = self.call.take().map(|mut call| {
                    call.note_number(&change.number);
                    call.finish(change.at_ms)
                });
                if ended.is_none() {
                    tracing::trace!("Idle with no call in progress");
                }
                ended
            }
        }
    }

    /// Whether a call is currently in progress
    pub fn in_call(&self) -> bool {
        self.call.is_some()
    }
}
