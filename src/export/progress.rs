//! Progress events and the cancellation token.
//!
//! Delivery is fan-out and fire-and-forget: consumers that fall behind or
//! disconnect never block the driver.

use crate::foundation::error::{ReelError, ReelResult};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Export lifecycle stage; transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExportStage {
    /// Validation passed; caches and the audio mix are being prepared.
    Initializing,
    /// The frame loop is running.
    Processing,
    /// Frames are flushed; the muxer is finalizing the container.
    Finalizing,
    /// The MP4 was delivered to the byte-sink.
    Complete,
    /// Terminal: the cancellation token fired.
    Cancelled,
    /// Terminal: a fatal error stopped the export.
    Error,
}

impl ExportStage {
    /// Return `true` for the three terminal stages.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Error)
    }
}

/// One progress record; emitted at least every 10 frames during processing
/// and at every stage transition.
#[derive(Clone, Debug)]
pub struct ProgressEvent {
    /// Last frame index handed to the encoder.
    pub current_frame: u64,
    /// Total frames in the run (`N + 1`).
    pub total_frames: u64,
    /// Completion percentage in `[0, 100]`.
    pub percentage: f32,
    /// Current lifecycle stage.
    pub stage: ExportStage,
    /// `elapsed / k * (N - k)` seconds, once at least one frame is done.
    pub estimated_time_remaining: Option<f64>,
    /// Rendered frames per wall-clock second.
    pub render_speed: Option<f64>,
    /// Failure description for the `Error` stage.
    pub error: Option<String>,
}

impl ProgressEvent {
    pub(crate) fn stage_only(stage: ExportStage, total_frames: u64) -> Self {
        Self {
            current_frame: 0,
            total_frames,
            percentage: if stage == ExportStage::Complete {
                100.0
            } else {
                0.0
            },
            stage,
            estimated_time_remaining: None,
            render_speed: None,
            error: None,
        }
    }
}

/// Write-by-driver, read-by-many progress fan-out.
#[derive(Default, Debug)]
pub struct ProgressBus {
    senders: Vec<Sender<ProgressEvent>>,
}

impl ProgressBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber; events published afterwards are delivered to it.
    pub fn subscribe(&mut self) -> Receiver<ProgressEvent> {
        let (tx, rx) = unbounded();
        self.senders.push(tx);
        rx
    }

    /// Deliver an event to every live subscriber without blocking.
    pub fn publish(&self, event: &ProgressEvent) {
        for tx in &self.senders {
            let _ = tx.send(event.clone());
        }
    }
}

/// Cooperative cancellation signal observed at every suspension point.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an unsignalled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation; observed at the driver's next suspension point.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Return `true` once [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Convert a signalled token into the cancellation error.
    pub fn check(&self) -> ReelResult<()> {
        if self.is_cancelled() {
            return Err(ReelError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_order_forward() {
        assert!(ExportStage::Initializing < ExportStage::Processing);
        assert!(ExportStage::Processing < ExportStage::Finalizing);
        assert!(ExportStage::Finalizing < ExportStage::Complete);
        assert!(ExportStage::Complete.is_terminal());
        assert!(ExportStage::Cancelled.is_terminal());
        assert!(!ExportStage::Processing.is_terminal());
    }

    #[test]
    fn bus_fans_out_to_all_subscribers() {
        let mut bus = ProgressBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        bus.publish(&ProgressEvent::stage_only(ExportStage::Initializing, 10));
        assert_eq!(rx1.recv().unwrap().stage, ExportStage::Initializing);
        assert_eq!(rx2.recv().unwrap().stage, ExportStage::Initializing);
    }

    #[test]
    fn dropped_subscriber_does_not_block_publish() {
        let mut bus = ProgressBus::new();
        drop(bus.subscribe());
        bus.publish(&ProgressEvent::stage_only(ExportStage::Complete, 1));
    }

    #[test]
    fn cancel_token_checks() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(token.check().unwrap_err().is_cancelled());
        // Clones observe the same signal.
        assert!(token.clone().is_cancelled());
    }
}
