use core::fmt;

use crate::handoff::Handoff;
use crate::pulse::RawFrame;

/// What the capture completion hands to the sampling task.
///
/// Only the symbol count crosses the queue; the symbols stay in the
/// channel's receive buffer until the task copies them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Number of symbols written to the receive buffer.
    Captured(usize),
    /// Posted on teardown to cut the bounded wait short.
    Cancel,
}

/// A receive channel that records (level, duration) symbols after a trigger.
///
/// `arm` returns immediately; the completion is delivered through the
/// handoff the channel was registered with when the line goes idle or the
/// buffer fills.
pub trait CaptureChannel {
    type Error: fmt::Debug + fmt::Display;

    fn arm(&mut self) -> Result<(), Self::Error>;

    /// Copies the first `len` symbols of the last finished capture.
    ///
    /// Valid until the next `arm`.
    fn frame(&self, len: usize) -> RawFrame;

    /// Abandons a capture that never completed so the next `arm` succeeds.
    fn disarm(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Completion interrupt body: post the symbol count and nothing else.
///
/// Runs in interrupt context, so no copying, no decoding, no logging and no
/// blocking. Returns whether a context switch is warranted.
pub fn on_capture_done<H>(handoff: &H, num_symbols: usize) -> bool
where
    H: Handoff<Completion> + ?Sized,
{
    handoff.offer(Completion::Captured(num_symbols))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::SlotHandoff;
    use std::time::Duration;

    #[test]
    fn posts_only_the_symbol_count() {
        let handoff = SlotHandoff::new();
        assert!(!on_capture_done(&handoff, 42));
        assert_eq!(handoff.take(Duration::ZERO), Some(Completion::Captured(42)));
        assert!(core::mem::size_of::<Completion>() <= 2 * core::mem::size_of::<usize>());
    }

    #[test]
    fn second_completion_wins() {
        let handoff = SlotHandoff::new();
        on_capture_done(&handoff, 1);
        on_capture_done(&handoff, 3);
        assert_eq!(handoff.overwritten(), 1);
        assert_eq!(handoff.take(Duration::ZERO), Some(Completion::Captured(3)));
    }
}
