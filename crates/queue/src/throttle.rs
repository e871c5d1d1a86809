use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outbound bandwidth limits and adaptation cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// How often the per-period byte counter resets.
    pub refresh_interval_ms: u64,
    /// How often the budget adapts to observed resends.
    pub adjust_interval_ms: u64,
    pub start_bytes_per_sec: usize,
    pub min_bytes_per_sec: usize,
    pub max_bytes_per_sec: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 200,
            adjust_interval_ms: 1000,
            start_bytes_per_sec: 200_000,
            min_bytes_per_sec: 5_000,
            max_bytes_per_sec: 200_000,
        }
    }
}

impl ThrottleConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Bytes allowed in one refresh period at `bytes_per_sec`.
    fn per_period(&self, bytes_per_sec: usize) -> usize {
        (bytes_per_sec as u128 * self.refresh_interval_ms as u128 / 1000) as usize
    }
}

/// Per-period byte budget that grows while the link keeps up and shrinks
/// in proportion to resent traffic.
#[derive(Debug, Clone)]
pub struct BandwidthThrottle {
    config: ThrottleConfig,
    budget: usize,
    min_budget: usize,
    max_budget: usize,
    sent: usize,
    resent: usize,
    until_adjust_ms: i64,
}

impl BandwidthThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        let min_budget = config.per_period(config.min_bytes_per_sec);
        let max_budget = config.per_period(config.max_bytes_per_sec).max(min_budget);
        let budget = config
            .per_period(config.start_bytes_per_sec)
            .clamp(min_budget, max_budget);
        Self {
            until_adjust_ms: config.adjust_interval_ms as i64,
            config,
            budget,
            min_budget,
            max_budget,
            sent: 0,
            resent: 0,
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Bytes allowed in the current refresh period.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Bytes sent in the current refresh period.
    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn can_send(&self) -> bool {
        self.sent < self.budget
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.sent = self.sent.saturating_add(bytes);
    }

    pub fn record_resent(&mut self, bytes: usize) {
        self.resent = self.resent.saturating_add(bytes);
    }

    /// Close the current refresh period. Call once per `refresh_interval`.
    pub fn refresh(&mut self) {
        self.until_adjust_ms -= self.config.refresh_interval_ms as i64;
        if self.until_adjust_ms <= 0 {
            self.adjust();
            self.resent = 0;
            self.until_adjust_ms += self.config.adjust_interval_ms as i64;
        }
        self.sent = 0;
    }

    fn adjust(&mut self) {
        let before = self.budget;
        if self.resent == 0 {
            if self.sent >= self.budget {
                self.budget = self.budget.saturating_mul(105) / 100;
            }
        } else {
            let adjust_ms = self.config.adjust_interval_ms.max(1) as u128;
            let refresh_ms = self.config.refresh_interval_ms as u128;
            let resent_per_period = (self.resent as u128 * refresh_ms / adjust_ms) as usize;
            self.budget = self.budget.saturating_sub(resent_per_period);
        }
        self.budget = self.budget.clamp(self.min_budget, self.max_budget);
        if self.budget != before {
            tracing::debug!(before, after = self.budget, resent = self.resent, "throttle adjusted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ThrottleConfig {
        ThrottleConfig {
            refresh_interval_ms: 100,
            adjust_interval_ms: 100,
            start_bytes_per_sec: 10_000,
            min_bytes_per_sec: 1_000,
            max_bytes_per_sec: 20_000,
        }
    }

    #[test]
    fn defaults_match_reference_link() {
        let throttle = BandwidthThrottle::new(ThrottleConfig::default());
        // 200 KB/s over a 200 ms period.
        assert_eq!(throttle.budget(), 40_000);
        assert_eq!(throttle.config().refresh_interval(), Duration::from_millis(200));
    }

    #[test]
    fn budget_blocks_once_spent() {
        let mut throttle = BandwidthThrottle::new(config());
        assert_eq!(throttle.budget(), 1_000);
        assert!(throttle.can_send());
        throttle.record_sent(1_000);
        assert!(!throttle.can_send());
        throttle.refresh();
        assert_eq!(throttle.sent(), 0);
        assert!(throttle.can_send());
    }

    #[test]
    fn saturated_clean_link_grows_five_percent() {
        let mut throttle = BandwidthThrottle::new(config());
        throttle.record_sent(1_000);
        throttle.refresh();
        assert_eq!(throttle.budget(), 1_050);
    }

    #[test]
    fn idle_link_does_not_grow() {
        let mut throttle = BandwidthThrottle::new(config());
        throttle.record_sent(10);
        throttle.refresh();
        assert_eq!(throttle.budget(), 1_000);
    }

    #[test]
    fn resends_shrink_budget_and_clamp_to_minimum() {
        let mut throttle = BandwidthThrottle::new(config());
        throttle.record_resent(300);
        throttle.refresh();
        assert_eq!(throttle.budget(), 700);

        throttle.record_resent(10_000);
        throttle.refresh();
        assert_eq!(throttle.budget(), 100);
    }

    #[test]
    fn growth_clamps_to_maximum() {
        let mut throttle = BandwidthThrottle::new(config());
        for _ in 0..100 {
            throttle.record_sent(throttle.budget());
            throttle.refresh();
        }
        assert_eq!(throttle.budget(), 2_000);
    }

    #[test]
    fn adjusts_only_on_adjust_interval() {
        let mut throttle = BandwidthThrottle::new(ThrottleConfig {
            adjust_interval_ms: 300,
            ..config()
        });
        throttle.record_resent(300);
        throttle.refresh();
        throttle.refresh();
        assert_eq!(throttle.budget(), 1_000);
        throttle.refresh();
        assert_eq!(throttle.budget(), 900);
    }
}
