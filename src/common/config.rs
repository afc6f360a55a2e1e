//! Simulation parameters and their TOML loading.
//!
//! Every setter clamps its input into the documented interval instead of
//! failing, so a config assembled from user input, a scene file or a TOML file
//! is always valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Channel bandwidths the radio supports, in kHz.
pub const BANDWIDTHS_KHZ: [u32; 3] = [125, 250, 500];

/// Validated simulation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    spreading_factor: u8,
    bandwidth_khz: u32,
    coding_rate: u8,
    max_retransmissions: i32,
    meters_per_pixel: f64,
    frequency_mhz: f64,
    default_tx_dbm: f64,
    server_tx_dbm: f64,
    realistic: bool,
    base_range_px: f64,
    base_rx_threshold: f64,
    fade_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            spreading_factor: 7,
            bandwidth_khz: 125,
            coding_rate: 5,
            max_retransmissions: 2,
            meters_per_pixel: 2.0,
            frequency_mhz: 868.0,
            default_tx_dbm: 10.0,
            server_tx_dbm: 14.0,
            realistic: true,
            base_range_px: 340.0,
            base_rx_threshold: 0.08,
            fade_rate: 0.005,
        }
    }
}

/// Clamp `value` into [lo, hi]; non-finite input keeps `current`.
fn clamp_or(value: f64, lo: f64, hi: f64, current: f64) -> f64 {
    if value.is_finite() { value.clamp(lo, hi) } else { current }
}

impl SimulationConfig {
    pub fn spreading_factor(&self) -> u8 {
        self.spreading_factor
    }

    pub fn set_spreading_factor(&mut self, value: f64) {
        self.spreading_factor = clamp_or(value.round(), 7.0, 12.0, self.spreading_factor as f64) as u8;
    }

    pub fn bandwidth_khz(&self) -> u32 {
        self.bandwidth_khz
    }

    /// Snap to the nearest supported bandwidth; non-finite or non-positive input selects 125 kHz.
    pub fn set_bandwidth_khz(&mut self, value: f64) {
        self.bandwidth_khz = if !value.is_finite() || value <= 0.0 {
            BANDWIDTHS_KHZ[0]
        } else {
            BANDWIDTHS_KHZ
                .into_iter()
                .min_by(|a, b| (*a as f64 - value).abs().total_cmp(&(*b as f64 - value).abs()))
                .unwrap_or(BANDWIDTHS_KHZ[0])
        };
    }

    /// Coding rate denominator, 4/5 … 4/8.
    pub fn coding_rate(&self) -> u8 {
        self.coding_rate
    }

    pub fn set_coding_rate(&mut self, value: f64) {
        self.coding_rate = clamp_or(value.round(), 5.0, 8.0, self.coding_rate as f64) as u8;
    }

    /// TTL given to freshly originated DATA.
    pub fn max_retransmissions(&self) -> i32 {
        self.max_retransmissions
    }

    pub fn set_max_retransmissions(&mut self, value: f64) {
        self.max_retransmissions = clamp_or(value.round(), 0.0, 10.0, self.max_retransmissions as f64) as i32;
    }

    pub fn meters_per_pixel(&self) -> f64 {
        self.meters_per_pixel
    }

    pub fn set_meters_per_pixel(&mut self, value: f64) {
        self.meters_per_pixel = clamp_or(value, 0.001, 10_000.0, self.meters_per_pixel);
    }

    pub fn frequency_mhz(&self) -> f64 {
        self.frequency_mhz
    }

    pub fn set_frequency_mhz(&mut self, value: f64) {
        self.frequency_mhz = clamp_or(value, 100.0, 10_000.0, self.frequency_mhz);
    }

    /// Transmit power new hives start with, and the fallback for unknown emitters.
    pub fn default_tx_dbm(&self) -> f64 {
        self.default_tx_dbm
    }

    pub fn set_default_tx_dbm(&mut self, value: f64) {
        self.default_tx_dbm = clamp_or(value, 0.0, 30.0, self.default_tx_dbm);
    }

    pub fn server_tx_dbm(&self) -> f64 {
        self.server_tx_dbm
    }

    pub fn set_server_tx_dbm(&mut self, value: f64) {
        self.server_tx_dbm = clamp_or(value, 0.0, 30.0, self.server_tx_dbm);
    }

    pub fn realistic(&self) -> bool {
        self.realistic
    }

    pub fn set_realistic(&mut self, value: bool) {
        self.realistic = value;
    }

    pub fn base_range_px(&self) -> f64 {
        self.base_range_px
    }

    pub fn set_base_range_px(&mut self, value: f64) {
        self.base_range_px = clamp_or(value, 80.0, 4000.0, self.base_range_px);
    }

    pub fn base_rx_threshold(&self) -> f64 {
        self.base_rx_threshold
    }

    pub fn set_base_rx_threshold(&mut self, value: f64) {
        self.base_rx_threshold = clamp_or(value, 0.005, 0.3, self.base_rx_threshold);
    }

    /// Simplified-mode fade lost per 16.67 ms frame.
    pub fn fade_rate(&self) -> f64 {
        self.fade_rate
    }

    pub fn set_fade_rate(&mut self, value: f64) {
        self.fade_rate = clamp_or(value, 0.0005, 0.05, self.fade_rate);
    }

    /// Apply every value present in `file` through the clamping setters.
    pub fn apply(&mut self, file: &ConfigFile) {
        if let Some(v) = file.spreading_factor {
            self.set_spreading_factor(v);
        }
        if let Some(v) = file.bandwidth_khz {
            self.set_bandwidth_khz(v);
        }
        if let Some(v) = file.coding_rate {
            self.set_coding_rate(v);
        }
        if let Some(v) = file.max_retransmissions {
            self.set_max_retransmissions(v);
        }
        if let Some(v) = file.meters_per_pixel {
            self.set_meters_per_pixel(v);
        }
        if let Some(v) = file.frequency_mhz {
            self.set_frequency_mhz(v);
        }
        if let Some(v) = file.default_tx_dbm {
            self.set_default_tx_dbm(v);
        }
        if let Some(v) = file.server_tx_dbm {
            self.set_server_tx_dbm(v);
        }
        if let Some(v) = file.realistic {
            self.set_realistic(v);
        }
        if let Some(v) = file.base_range_px {
            self.set_base_range_px(v);
        }
        if let Some(v) = file.base_rx_threshold {
            self.set_base_rx_threshold(v);
        }
        if let Some(v) = file.fade_rate {
            self.set_fade_rate(v);
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    /// * `config_path` - Path to the config.toml file
    ///
    /// # Returns
    /// * `Ok(SimulationConfig)` with every present key applied and clamped
    /// * `Err(String)` with a descriptive error message otherwise
    pub fn load(config_path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(config_path).map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))?;
        let mut config = Self::default();
        config.apply(&file);
        Ok(config)
    }

    /// Derive the config path from a scene file path.
    ///
    /// Replaces the scene filename with "config.toml" in the same directory.
    pub fn config_path_from_scene(scene_path: &str) -> PathBuf {
        let scene = Path::new(scene_path);
        scene.parent().unwrap_or(Path::new(".")).join("config.toml")
    }
}

/// Raw, unvalidated configuration as written in TOML. Missing keys keep defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConfigFile {
    pub spreading_factor: Option<f64>,
    pub bandwidth_khz: Option<f64>,
    pub coding_rate: Option<f64>,
    pub max_retransmissions: Option<f64>,
    pub meters_per_pixel: Option<f64>,
    pub frequency_mhz: Option<f64>,
    pub default_tx_dbm: Option<f64>,
    pub server_tx_dbm: Option<f64>,
    pub realistic: Option<bool>,
    pub base_range_px: Option<f64>,
    pub base_rx_threshold: Option<f64>,
    pub fade_rate: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_clamp_out_of_range_values() {
        let mut c = SimulationConfig::default();
        c.set_spreading_factor(3.0);
        assert_eq!(c.spreading_factor(), 7);
        c.set_spreading_factor(40.0);
        assert_eq!(c.spreading_factor(), 12);
        c.set_coding_rate(f64::NAN);
        assert_eq!(c.coding_rate(), 5);
        c.set_max_retransmissions(-4.0);
        assert_eq!(c.max_retransmissions(), 0);
        c.set_meters_per_pixel(0.0);
        assert_eq!(c.meters_per_pixel(), 0.001);
        c.set_default_tx_dbm(99.0);
        assert_eq!(c.default_tx_dbm(), 30.0);
    }

    #[test]
    fn bandwidth_snaps_to_nearest_supported_value() {
        let mut c = SimulationConfig::default();
        c.set_bandwidth_khz(240.0);
        assert_eq!(c.bandwidth_khz(), 250);
        c.set_bandwidth_khz(1000.0);
        assert_eq!(c.bandwidth_khz(), 500);
        c.set_bandwidth_khz(-5.0);
        assert_eq!(c.bandwidth_khz(), 125);
        c.set_bandwidth_khz(500.0);
        c.set_bandwidth_khz(f64::INFINITY);
        assert_eq!(c.bandwidth_khz(), 125);
    }

    #[test]
    fn toml_keys_are_kebab_case_and_clamped() {
        let c = SimulationConfig::from_toml_str(
            r#"
            spreading-factor = 9
            bandwidth-khz = 500
            meters-per-pixel = 0.5
            realistic = false
            fade-rate = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(c.spreading_factor(), 9);
        assert_eq!(c.bandwidth_khz(), 500);
        assert_eq!(c.meters_per_pixel(), 0.5);
        assert!(!c.realistic());
        assert_eq!(c.fade_rate(), 0.05);
        assert_eq!(c.coding_rate(), 5);
    }

    #[test]
    fn parse_failure_is_reported() {
        let err = SimulationConfig::from_toml_str("spreading-factor = \"fast\"").unwrap_err();
        assert!(err.starts_with("Failed to parse config file"));
    }

    #[test]
    fn config_path_sits_next_to_scene() {
        assert_eq!(SimulationConfig::config_path_from_scene("scenes/farm.json"), PathBuf::from("scenes/config.toml"));
    }
}
