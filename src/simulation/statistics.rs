//! Protocol counters.
//!
//! A passive sink fed by the flood protocol. Counters only grow until
//! [`Statistics::reset`] is called explicitly.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    pub data_sent: u64,
    pub data_delivered: u64,
    pub origin_acked: u64,
    pub relays_data: u64,
    pub relays_ack: u64,
    pub ttl_drops: u64,
    pub shadow_drops: u64,
    pub dup_ignored: u64,
    /// Completed round trips contributing to the hop and latency sums.
    pub deliveries: u64,
    pub total_hops: u64,
    pub latency_sum_ms: f64,
}

impl Statistics {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fraction of originated DATA messages whose ACK made it back.
    pub fn success_rate(&self) -> Option<f64> {
        (self.data_sent > 0).then(|| self.origin_acked as f64 / self.data_sent as f64)
    }

    pub fn average_hops(&self) -> Option<f64> {
        (self.deliveries > 0).then(|| self.total_hops as f64 / self.deliveries as f64)
    }

    pub fn average_latency_ms(&self) -> Option<f64> {
        (self.deliveries > 0).then(|| self.latency_sum_ms / self.deliveries as f64)
    }
}

fn fmt_optional(value: Option<f64>, precision: usize, suffix: &str) -> String {
    match value {
        Some(v) => format!("{:.*}{}", precision, v, suffix),
        None => "-".to_string(),
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<18} {}", "Data sent", self.data_sent)?;
        writeln!(f, "{:<18} {}", "Delivered", self.data_delivered)?;
        writeln!(f, "{:<18} {}", "Origin acked", self.origin_acked)?;
        writeln!(f, "{:<18} {}", "Relays (DATA)", self.relays_data)?;
        writeln!(f, "{:<18} {}", "Relays (ACK)", self.relays_ack)?;
        writeln!(f, "{:<18} {}", "TTL drops", self.ttl_drops)?;
        writeln!(f, "{:<18} {}", "Shadow drops", self.shadow_drops)?;
        writeln!(f, "{:<18} {}", "Duplicates", self.dup_ignored)?;
        writeln!(f, "{:<18} {}", "Success rate", fmt_optional(self.success_rate().map(|r| r * 100.0), 1, " %"))?;
        writeln!(f, "{:<18} {}", "Avg hops", fmt_optional(self.average_hops(), 2, ""))?;
        write!(f, "{:<18} {}", "Avg latency", fmt_optional(self.average_latency_ms(), 0, " ms"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_values_are_none_without_samples() {
        let stats = Statistics::default();
        assert_eq!(stats.success_rate(), None);
        assert_eq!(stats.average_hops(), None);
        assert_eq!(stats.average_latency_ms(), None);
        assert!(stats.to_string().contains(&format!("{:<18} -", "Avg hops")));
    }

    #[test]
    fn averages_use_completed_deliveries() {
        let mut stats = Statistics {
            data_sent: 4,
            origin_acked: 2,
            deliveries: 2,
            total_hops: 3,
            latency_sum_ms: 5000.0,
            ..Default::default()
        };
        assert_eq!(stats.success_rate(), Some(0.5));
        assert_eq!(stats.average_hops(), Some(1.5));
        assert_eq!(stats.average_latency_ms(), Some(2500.0));

        stats.reset();
        assert_eq!(stats, Statistics::default());
    }
}
