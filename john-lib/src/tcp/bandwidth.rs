//! In-memory bandwidth accounting reported to the control plane via `Ping`
//! (C10). No counters are persisted; a restart resets them to zero.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::BandwidthConfig;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Default)]
pub struct Bandwidth {
    uplink: AtomicU64,
    downlink: AtomicU64,
    last_alive_unix: AtomicI64,
}

impl Bandwidth {
    pub fn record_uplink(&self, bytes: u64) {
        self.uplink.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_downlink(&self, bytes: u64) {
        self.downlink.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn mark_alive_now(&self) {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
        self.last_alive_unix.store(now, Ordering::Relaxed);
    }

    /// Builds the `Ping` response body: the configured quota, not the
    /// counters themselves — the control plane already tracks usage
    /// separately and asks only "what's my ceiling".
    pub fn ping_response(&self, config: &BandwidthConfig) -> PingResp {
        PingResp {
            bandwidth_limit: BandwidthLimit {
                uplink_limit: config.uplink_limit,
                downlink_limit: config.downlink_limit,
                reset_time: next_midnight_utc_rfc3339(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BandwidthLimit {
    #[serde(rename = "UplinkLimit")]
    pub uplink_limit: u64,
    #[serde(rename = "DownlinkLimit")]
    pub downlink_limit: u64,
    #[serde(rename = "ResetTime")]
    pub reset_time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingResp {
    #[serde(rename = "BandwidthLimit")]
    pub bandwidth_limit: BandwidthLimit,
}

/// RFC3339 timestamp for the next UTC midnight, formatted without pulling
/// in a date/time crate the rest of the corpus doesn't use.
fn next_midnight_utc_rfc3339() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    let next_midnight = ((now / SECONDS_PER_DAY) + 1) * SECONDS_PER_DAY;
    format_unix_as_rfc3339(next_midnight)
}

fn format_unix_as_rfc3339(unix_secs: i64) -> String {
    let days_since_epoch = unix_secs.div_euclid(SECONDS_PER_DAY);
    let (year, month, day) = civil_from_days(days_since_epoch);
    format!("{year:04}-{month:02}-{day:02}T00:00:00Z")
}

/// Howard Hinnant's days-from-civil algorithm, inverted: proleptic
/// Gregorian calendar date from a day count since the Unix epoch.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_response_reports_configured_limits() {
        let bw = Bandwidth::default();
        let config = BandwidthConfig { uplink_limit: 1000, downlink_limit: 2000 };
        let resp = bw.ping_response(&config);
        assert_eq!(resp.bandwidth_limit.uplink_limit, 1000);
        assert_eq!(resp.bandwidth_limit.downlink_limit, 2000);
        assert!(resp.bandwidth_limit.reset_time.ends_with("T00:00:00Z"));
    }

    #[test]
    fn epoch_day_zero_is_1970_01_01() {
        assert_eq!(format_unix_as_rfc3339(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn known_date_decodes_correctly() {
        // 2024-03-01T00:00:00Z
        assert_eq!(format_unix_as_rfc3339(1_709_251_200), "2024-03-01T00:00:00Z");
    }
}
