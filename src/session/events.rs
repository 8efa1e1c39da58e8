//! Typed events emitted by the pipeline for UI collaborators.
//!
//! Rendering is a separate subscriber; the pipeline never touches widgets.

use tokio::sync::broadcast;

use super::controller::CaptureState;
use crate::analysis::{format_percentage, ScoreBand};
use crate::audio::TabInfo;

/// Management score prepared for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDisplay {
    pub score: u8,
    /// e.g. `"45%"`.
    pub display: String,
    pub band: ScoreBand,
}

impl MetricDisplay {
    pub fn new(score: u8) -> Self {
        Self {
            score,
            display: format_percentage(score),
            band: ScoreBand::classify(score),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StateChanged(CaptureState),
    TimerTick { elapsed_ms: u64 },
    MetricUpdated {
        advice: Option<String>,
        management: Option<MetricDisplay>,
    },
    TabSelectionChanged { tab: Option<TabInfo> },
}

/// Broadcast fan-out for pipeline events. Emission never blocks; events
/// sent with no subscribers are discarded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_display_mid_band() {
        let metric = MetricDisplay::new(45);

        assert_eq!(metric.display, "45%");
        assert_eq!(metric.band, ScoreBand::Mid);
    }

    #[test]
    fn test_metric_display_band_edges() {
        assert_eq!(MetricDisplay::new(29).band, ScoreBand::Low);
        assert_eq!(MetricDisplay::new(30).band, ScoreBand::Mid);
        assert_eq!(MetricDisplay::new(50).band, ScoreBand::Mid);
        assert_eq!(MetricDisplay::new(51).band, ScoreBand::High);
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscriber() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(PipelineEvent::TimerTick { elapsed_ms: 1000 });

        match rx.recv().await.unwrap() {
            PipelineEvent::TimerTick { elapsed_ms } => assert_eq!(elapsed_ms, 1000),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.emit(PipelineEvent::TimerTick { elapsed_ms: 0 });
    }
}
