//! Radio signal calculations.
//!
//! Contains helpers for:
//! - LoRa receiver sensitivity per spreading factor and bandwidth
//! - Free-space path loss and its inverse (maximum range at the sensitivity threshold)
//! - Closed-form range and threshold scaling used by the simplified propagation mode
//! - Exponential material absorption and the sector-weight to dB conversion
//!
//! Units:
//! - Power: dBm
//! - Distance: meters in the physical model; world units (px) are converted by the caller
//! - Frequency: MHz

/// Sensitivity used when the spreading factor has no table entry.
pub const SENSITIVITY_FALLBACK_DBM: f64 = -125.0;

/// Smallest distance fed into the path loss formula, in meters.
pub const MIN_PATH_DISTANCE_M: f64 = 0.001;

/// Loss assumed for a sector attenuated below `NEAR_TOTAL_OBSTRUCTION_WEIGHT`.
pub const NEAR_TOTAL_OBSTRUCTION_DB: f64 = 60.0;
pub const NEAR_TOTAL_OBSTRUCTION_WEIGHT: f64 = 0.1;

/// Simplified-mode output bounds.
pub const SIMPLIFIED_RANGE_MIN_PX: f64 = 80.0;
pub const SIMPLIFIED_RANGE_MAX_PX: f64 = 4000.0;
pub const SIMPLIFIED_THRESHOLD_MIN: f64 = 0.01;
pub const SIMPLIFIED_THRESHOLD_MAX: f64 = 0.2;

/// Realistic-mode maximum wave radius bounds, in world units.
pub const REALISTIC_RADIUS_MIN_PX: f64 = 10.0;
pub const REALISTIC_RADIUS_MAX_PX: f64 = 200_000.0;

/// Receiver sensitivity in dBm for a LoRa configuration.
///
/// Baseline values are for 125 kHz; wider channels lose sensitivity.
///
/// ```text
/// SF7 -118, SF8 -121, SF9 -124, SF10 -127, SF11 -129.5, SF12 -132
/// 250 kHz: +3 dB, 500 kHz: +6 dB
/// ```
pub fn sensitivity_dbm(spreading_factor: u8, bandwidth_khz: u32) -> f64 {
    let base = match spreading_factor {
        7 => -118.0,
        8 => -121.0,
        9 => -124.0,
        10 => -127.0,
        11 => -129.5,
        12 => -132.0,
        _ => SENSITIVITY_FALLBACK_DBM,
    };
    let bandwidth_penalty = match bandwidth_khz {
        250 => 3.0,
        500 => 6.0,
        _ => 0.0,
    };
    base + bandwidth_penalty
}

/// Free-space path loss in dB.
///
/// # Formula
///
/// ```text
/// FSPL = 32.44 + 20 × log₁₀(f_MHz) + 20 × log₁₀(max(0.001, d_km))
/// ```
///
/// # Parameters
///
/// - `distance_m`: Distance between transmitter and receiver in meters
/// - `frequency_mhz`: Carrier frequency in MHz
///
/// # Returns
///
/// Path loss in decibels (dB). Distances below 1 m are evaluated at 1 m.
pub fn free_space_path_loss_db(distance_m: f64, frequency_mhz: f64) -> f64 {
    let distance_km = (distance_m / 1000.0).max(MIN_PATH_DISTANCE_M);
    32.44 + 20.0 * frequency_mhz.log10() + 20.0 * distance_km.log10()
}

/// Distance at which free-space path loss equals the link budget, in meters.
///
/// # Formula
///
/// ```text
/// d_km = 10^((P_tx - S - (32.44 + 20 × log₁₀(f_MHz))) / 20)
/// ```
///
/// Where `S` is `sensitivity_dbm(spreading_factor, bandwidth_khz)`. The result
/// never goes below 1 m.
pub fn max_range_meters(spreading_factor: u8, bandwidth_khz: u32, tx_power_dbm: f64, frequency_mhz: f64) -> f64 {
    let budget = tx_power_dbm - sensitivity_dbm(spreading_factor, bandwidth_khz);
    let fixed_loss = 32.44 + 20.0 * frequency_mhz.log10();
    let distance_km = 10f64.powf((budget - fixed_loss) / 20.0);
    (distance_km * 1000.0).max(1.0)
}

/// Maximum wave radius in world units for the realistic model.
pub fn realistic_max_radius_px(range_m: f64, meters_per_pixel: f64) -> f64 {
    (range_m / meters_per_pixel.max(0.0001)).clamp(REALISTIC_RADIUS_MIN_PX, REALISTIC_RADIUS_MAX_PX)
}

/// Legacy scaling factor of the simplified propagation mode.
///
/// Higher spreading factors and coding rates reach further; 125 kHz gets the
/// largest bandwidth bonus.
pub fn range_factor(spreading_factor: u8, bandwidth_khz: u32, coding_rate: u8) -> f64 {
    let sf = spreading_factor.clamp(7, 12) as f64;
    let cr = coding_rate.clamp(5, 8) as f64;
    let sf_factor = 1.0 + (sf - 7.0) * 0.24;
    let bw_factor = match bandwidth_khz {
        500 => 0.9,
        250 => 1.0,
        _ => 1.2,
    };
    let cr_factor = 1.0 + (cr - 5.0) * 0.05;
    sf_factor * bw_factor * cr_factor
}

/// Simplified-mode wave range in world units, clamped to [80, 4000].
pub fn simplified_range_px(base_range_px: f64, spreading_factor: u8, bandwidth_khz: u32, coding_rate: u8) -> f64 {
    (base_range_px * range_factor(spreading_factor, bandwidth_khz, coding_rate)).clamp(SIMPLIFIED_RANGE_MIN_PX, SIMPLIFIED_RANGE_MAX_PX)
}

/// Simplified-mode reception threshold on the combined sector weight, clamped to [0.01, 0.2].
pub fn simplified_rx_threshold(base_threshold: f64, spreading_factor: u8, bandwidth_khz: u32, coding_rate: u8) -> f64 {
    (base_threshold / range_factor(spreading_factor, bandwidth_khz, coding_rate)).clamp(SIMPLIFIED_THRESHOLD_MIN, SIMPLIFIED_THRESHOLD_MAX)
}

/// Fraction of amplitude surviving a pass through a material.
///
/// # Formula
///
/// ```text
/// factor = e^(-k × d)
/// ```
///
/// Where `k` is the absorption coefficient (1/m) and `d` the thickness in
/// meters. The result lies in [0, 1] for non-negative inputs.
pub fn absorption_factor(absorption: f64, thickness_m: f64) -> f64 {
    (-absorption * thickness_m.max(0.0)).exp().clamp(0.0, 1.0)
}

/// Obstacle loss in dB implied by a sector weight.
pub fn obstacle_loss_db(sector_weight: f64) -> f64 {
    if sector_weight < NEAR_TOTAL_OBSTRUCTION_WEIGHT {
        NEAR_TOTAL_OBSTRUCTION_DB
    } else {
        -10.0 * sector_weight.max(1e-6).log10()
    }
}

/// Link budget: `P_rx = P_tx - PL - L_obstacle`.
pub fn received_power_dbm(tx_power_dbm: f64, path_loss_db: f64, obstacle_loss_db: f64) -> f64 {
    tx_power_dbm - path_loss_db - obstacle_loss_db
}

/// Reception decision; the sensitivity boundary counts as received.
pub fn link_closes(received_dbm: f64, sensitivity_dbm: f64) -> bool {
    received_dbm >= sensitivity_dbm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitivity_table_and_bandwidth_correction() {
        for (sf, expect) in [(7, -118.0), (8, -121.0), (9, -124.0), (10, -127.0), (11, -129.5), (12, -132.0)] {
            assert_eq!(sensitivity_dbm(sf, 125), expect);
        }
        assert_eq!(sensitivity_dbm(7, 250), -115.0);
        assert_eq!(sensitivity_dbm(7, 500), -112.0);
        assert_eq!(sensitivity_dbm(6, 125), SENSITIVITY_FALLBACK_DBM);
    }

    #[test]
    fn path_loss_matches_reference_values() {
        // 1 km at 868 MHz ≈ 91.21 dB
        let pl = free_space_path_loss_db(1000.0, 868.0);
        assert!((pl - 91.2104).abs() < 0.01, "pl = {}", pl);
        // Sub-meter distances are floored to 1 m
        assert_eq!(free_space_path_loss_db(0.0, 868.0), free_space_path_loss_db(1.0, 868.0));
    }

    #[test]
    fn max_range_inverts_path_loss_at_sensitivity() {
        let range = max_range_meters(7, 125, 10.0, 868.0);
        let pl = free_space_path_loss_db(range, 868.0);
        assert!((10.0 - pl - sensitivity_dbm(7, 125)).abs() < 1e-6);
        // Hopeless budgets still report at least one meter
        assert_eq!(max_range_meters(7, 125, -500.0, 868.0), 1.0);
    }

    #[test]
    fn max_range_grows_with_tx_power_and_spreading_factor() {
        let low = max_range_meters(7, 125, 0.0, 868.0);
        let high = max_range_meters(7, 125, 20.0, 868.0);
        let slow = max_range_meters(12, 125, 0.0, 868.0);
        assert!(low < high);
        assert!(low < slow);
    }

    #[test]
    fn simplified_outputs_stay_in_bounds() {
        assert!((range_factor(7, 125, 5) - 1.2).abs() < 1e-9);
        assert_eq!(simplified_range_px(10.0, 7, 125, 5), SIMPLIFIED_RANGE_MIN_PX);
        assert_eq!(simplified_range_px(1e9, 12, 125, 8), SIMPLIFIED_RANGE_MAX_PX);
        assert!((simplified_range_px(340.0, 7, 125, 5) - 408.0).abs() < 1e-9);
        assert_eq!(simplified_rx_threshold(10.0, 7, 125, 5), SIMPLIFIED_THRESHOLD_MAX);
        assert_eq!(simplified_rx_threshold(0.0, 7, 125, 5), SIMPLIFIED_THRESHOLD_MIN);
    }

    #[test]
    fn absorption_factor_decreases_with_coefficient() {
        let thin = absorption_factor(0.1, 10.0);
        let thick = absorption_factor(0.5, 10.0);
        assert!(thick < thin);
        assert_eq!(absorption_factor(0.1, 0.0), 1.0);
    }

    #[test]
    fn obstacle_loss_switches_to_fixed_penalty_below_threshold() {
        assert_eq!(obstacle_loss_db(0.05), NEAR_TOTAL_OBSTRUCTION_DB);
        assert!((obstacle_loss_db(0.1) - 10.0).abs() < 1e-9);
        assert_eq!(obstacle_loss_db(1.0), 0.0);
    }

    #[test]
    fn reception_boundary_is_inclusive() {
        let sens = sensitivity_dbm(7, 125);
        let rx = received_power_dbm(-100.0, 18.0, 0.0);
        assert_eq!(rx, sens);
        assert!(link_closes(rx, sens));
        assert!(!link_closes(rx - 0.001, sens));
    }
}
