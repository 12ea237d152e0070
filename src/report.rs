//! Playback accounting and the final statistics report
//!
//! Every timeline message lands in exactly one bucket: validated
//! (played), incorrect (rejected while decoding) or redundant (dropped by
//! the normalizer), so `generated = validated + incorrect + redundant`
//! holds when the report is emitted. Pins the player injects itself are
//! tallied separately as synthetic.

/// Counters and delay statistics for one playback run.
#[derive(Debug, Clone, Default)]
pub struct PlayReporting {
    /// Wall time spent building and normalizing the worklist, in ms.
    pub processing_ms: u128,
    /// Timeline messages that reached the decoder with a bound device.
    pub total_generated: usize,
    /// Messages accepted and still present after normalization.
    pub total_validated: usize,
    /// Messages rejected while decoding.
    pub total_incorrect: usize,
    /// Messages dropped by the redundancy pass.
    pub total_redundant: usize,
    /// Player-injected pins (clock pulses, MMC, inserted note-offs).
    pub total_synthetic: usize,
    /// Accumulated lateness shifted onto later deadlines, in ms.
    pub total_drag: f64,
    /// Sum of per-pin dispatch delays, in ms.
    pub total_delay: f64,
    pub maximum_delay: f64,
    pub minimum_delay: f64,
    pub average_delay: f64,
    pub sd_delay: f64,
}

impl PlayReporting {
    pub fn new() -> Self {
        Self::default()
    }

    /// A timeline message reached the decoder.
    pub fn message_seen(&mut self) {
        self.total_generated += 1;
    }

    /// The message decoded cleanly and became a pin.
    pub fn message_accepted(&mut self) {
        self.total_validated += 1;
    }

    /// The message was rejected while decoding.
    pub fn message_rejected(&mut self) {
        self.total_incorrect += 1;
    }

    /// The player injected a pin of its own.
    pub fn pin_injected(&mut self) {
        self.total_synthetic += 1;
    }

    /// The normalizer dropped a pin.
    pub fn pin_dropped(&mut self, synthetic: bool) {
        if synthetic {
            self.total_synthetic -= 1;
        } else {
            self.total_redundant += 1;
            self.total_validated -= 1;
        }
    }

    /// Fold the measured per-pin delays into min/max/mean/stddev.
    pub fn compute_delay_stats(&mut self, delays: &[f64]) {
        if delays.is_empty() {
            return;
        }
        for &delay_ms in delays {
            self.total_delay += delay_ms;
            self.maximum_delay = self.maximum_delay.max(delay_ms);
        }
        self.minimum_delay = self.maximum_delay;
        self.average_delay = self.total_delay / delays.len() as f64;
        let mut variance = 0.0;
        for &delay_ms in delays {
            self.minimum_delay = self.minimum_delay.min(delay_ms);
            variance += (delay_ms - self.average_delay).powi(2);
        }
        self.sd_delay = (variance / delays.len() as f64).sqrt();
    }

    /// Log the post-build accounting block.
    pub fn log_data_summary(&self, resultant: usize) {
        log::info!("Data stats reporting:");
        log::info!("    Messages processing time (ms):       {:>10}", self.processing_ms);
        log::info!("    Total generated messages (decoded):  {:>10}", self.total_generated);
        log::info!("    Total validated messages (accepted): {:>10}", self.total_validated);
        log::info!("    Total incorrect messages (excluded): {:>10}", self.total_incorrect);
        log::info!("    Total redundant messages (excluded): {:>10}", self.total_redundant);
        log::info!("    Total synthetic pins (injected):     {:>10}", self.total_synthetic);
        log::info!("    Total resultant pins (playable):     {:>10}", resultant);
    }

    /// Log the post-playback timing block.
    pub fn log_delay_summary(&self) {
        log::info!("Timing stats reporting:");
        log::info!("    Total drag (ms):                     {:>14.3}", self.total_drag);
        log::info!("    Cumulative delay (ms):               {:>14.3}", self.total_delay);
        log::info!("    Maximum delay (ms):                  {:>14.3}", self.maximum_delay);
        log::info!("    Minimum delay (ms):                  {:>14.3}", self.minimum_delay);
        log::info!("    Average delay (ms):                  {:>14.3}", self.average_delay);
        log::info!("    Standard deviation of delays (ms):   {:>14.3}", self.sd_delay);
    }
}
