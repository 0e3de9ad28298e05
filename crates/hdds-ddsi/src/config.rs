// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Domain configuration.
//!
//! [`DdsiConfig`] holds every tunable the protocol core reads. Build it with
//! [`DdsiConfig::builder`] or, with the `config-loaders` feature, load it from
//! a YAML file where all durations are given in milliseconds:
//!
//! ```yaml
//! hb_interval_sched_ms: 50
//! whc_highwater_mark: 1048576
//! retransmit_merging: adaptive
//! ```

use std::time::Duration;

use crate::error::{Error, Result};

/// Retransmit merging policy.
///
/// With merging, a retransmit requested by one reader is sent to all matched
/// readers, and further requests for the same sample within the merging
/// period are suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config-loaders", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(rename_all = "lowercase"))]
pub enum RetransmitMerging {
    #[default]
    Never,
    Adaptive,
    Always,
}

/// Tunables of the DDSI core.
#[derive(Debug, Clone, PartialEq)]
pub struct DdsiConfig {
    /// Base heartbeat interval.
    pub hb_interval_sched: Duration,
    /// Lower bound on the adapted heartbeat interval.
    pub hb_interval_sched_min: Duration,
    /// Upper bound on the backed-off heartbeat interval.
    pub hb_interval_sched_max: Duration,
    /// Minimum interval between ack-requesting heartbeats under backpressure.
    pub hb_interval_min: Duration,

    pub whc_lowwater_mark: u64,
    pub whc_highwater_mark: u64,
    pub whc_init_highwater_mark: u64,
    /// Grow the high-water mark toward `whc_highwater_mark` instead of blocking.
    pub whc_adaptive: bool,

    pub max_sample_size: u64,
    pub fragment_size: u32,
    pub max_message_size: u32,
    pub max_rexmit_burst_size: u32,
    /// Extra initial-burst allowance, percent of the smallest receive buffer.
    pub init_transmit_extra_pct: u32,
    /// Receive buffer size assumed for proxy readers that did not report one.
    pub default_receive_buffer_size: u32,

    pub writer_linger_duration: Duration,
    pub retransmit_merging: RetransmitMerging,
    pub retransmit_merging_period: Duration,
    /// Rebase window after a pre-emptive ACKNACK (0 disables).
    pub accelerate_rexmit_block_size: u32,

    pub handshake_initial_delay: Duration,
    pub handshake_retry_interval: Duration,
    pub handshake_resend_interval: Duration,
    pub handshake_timeout: Duration,
    pub pending_crypto_match_expiry: Duration,

    /// Window during which ACKNACKs with non-increasing counts are dropped.
    pub ack_accept_timeout: Duration,
    /// Number of entity ids per participant.
    pub entity_id_limit: u32,
}

impl Default for DdsiConfig {
    fn default() -> Self {
        Self {
            hb_interval_sched: Duration::from_millis(100),
            hb_interval_sched_min: Duration::from_millis(20),
            hb_interval_sched_max: Duration::from_secs(8),
            hb_interval_min: Duration::from_millis(5),
            whc_lowwater_mark: 1024,
            whc_highwater_mark: 500 * 1024,
            whc_init_highwater_mark: 30 * 1024,
            whc_adaptive: true,
            max_sample_size: i32::MAX as u64,
            fragment_size: 1344,
            max_message_size: 14720,
            max_rexmit_burst_size: 1024 * 1024,
            init_transmit_extra_pct: u32::MAX,
            default_receive_buffer_size: 128 * 1024,
            writer_linger_duration: Duration::from_secs(1),
            retransmit_merging: RetransmitMerging::Never,
            retransmit_merging_period: Duration::from_millis(5),
            accelerate_rexmit_block_size: 0,
            handshake_initial_delay: Duration::ZERO,
            handshake_retry_interval: Duration::from_secs(1),
            handshake_resend_interval: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(100),
            pending_crypto_match_expiry: Duration::from_secs(300),
            ack_accept_timeout: Duration::from_millis(500),
            entity_id_limit: 1 << 22,
        }
    }
}

impl DdsiConfig {
    pub fn builder() -> DdsiConfigBuilder {
        DdsiConfigBuilder::default()
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.whc_lowwater_mark > self.whc_highwater_mark {
            return Err(Error::BadParameter(format!(
                "whc_lowwater_mark ({}) exceeds whc_highwater_mark ({})",
                self.whc_lowwater_mark, self.whc_highwater_mark
            )));
        }
        if self.whc_init_highwater_mark > self.whc_highwater_mark {
            return Err(Error::BadParameter(
                "whc_init_highwater_mark exceeds whc_highwater_mark".to_string(),
            ));
        }
        if self.hb_interval_sched_min > self.hb_interval_sched_max {
            return Err(Error::BadParameter(
                "hb_interval_sched_min exceeds hb_interval_sched_max".to_string(),
            ));
        }
        if self.fragment_size == 0 || self.fragment_size > self.max_message_size {
            return Err(Error::BadParameter(format!(
                "fragment_size {} must be in 1..={}",
                self.fragment_size, self.max_message_size
            )));
        }
        if self.entity_id_limit < 2 {
            return Err(Error::BadParameter("entity_id_limit must be at least 2".to_string()));
        }
        Ok(())
    }

    /// Load from a YAML file.
    #[cfg(feature = "config-loaders")]
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::BadParameter(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Parse YAML text; absent keys keep their defaults.
    #[cfg(feature = "config-loaders")]
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: loader::ConfigFile = serde_yaml::from_str(text)
            .map_err(|e| Error::BadParameter(format!("invalid configuration: {}", e)))?;
        let cfg = file.apply(Self::default());
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Builder for [`DdsiConfig`].
#[derive(Debug, Clone, Default)]
pub struct DdsiConfigBuilder {
    cfg: DdsiConfig,
}

impl DdsiConfigBuilder {
    pub fn hb_interval(mut self, sched: Duration, min: Duration, max: Duration) -> Self {
        self.cfg.hb_interval_sched = sched;
        self.cfg.hb_interval_sched_min = min;
        self.cfg.hb_interval_sched_max = max;
        self
    }

    pub fn hb_interval_min(mut self, d: Duration) -> Self {
        self.cfg.hb_interval_min = d;
        self
    }

    /// Set low, initial-high and maximum-high water marks in bytes.
    pub fn whc_marks(mut self, low: u64, init_high: u64, high: u64) -> Self {
        self.cfg.whc_lowwater_mark = low;
        self.cfg.whc_init_highwater_mark = init_high;
        self.cfg.whc_highwater_mark = high;
        self
    }

    pub fn whc_adaptive(mut self, enabled: bool) -> Self {
        self.cfg.whc_adaptive = enabled;
        self
    }

    pub fn max_sample_size(mut self, bytes: u64) -> Self {
        self.cfg.max_sample_size = bytes;
        self
    }

    pub fn fragment_size(mut self, bytes: u32) -> Self {
        self.cfg.fragment_size = bytes;
        self
    }

    pub fn max_rexmit_burst_size(mut self, bytes: u32) -> Self {
        self.cfg.max_rexmit_burst_size = bytes;
        self
    }

    pub fn init_transmit_extra_pct(mut self, pct: u32) -> Self {
        self.cfg.init_transmit_extra_pct = pct;
        self
    }

    pub fn writer_linger_duration(mut self, d: Duration) -> Self {
        self.cfg.writer_linger_duration = d;
        self
    }

    pub fn retransmit_merging(mut self, mode: RetransmitMerging, period: Duration) -> Self {
        self.cfg.retransmit_merging = mode;
        self.cfg.retransmit_merging_period = period;
        self
    }

    pub fn accelerate_rexmit_block_size(mut self, n: u32) -> Self {
        self.cfg.accelerate_rexmit_block_size = n;
        self
    }

    pub fn handshake_timing(mut self, initial_delay: Duration, retry: Duration, resend: Duration) -> Self {
        self.cfg.handshake_initial_delay = initial_delay;
        self.cfg.handshake_retry_interval = retry;
        self.cfg.handshake_resend_interval = resend;
        self
    }

    pub fn handshake_timeout(mut self, d: Duration) -> Self {
        self.cfg.handshake_timeout = d;
        self
    }

    pub fn pending_crypto_match_expiry(mut self, d: Duration) -> Self {
        self.cfg.pending_crypto_match_expiry = d;
        self
    }

    pub fn entity_id_limit(mut self, n: u32) -> Self {
        self.cfg.entity_id_limit = n;
        self
    }

    pub fn build(self) -> Result<DdsiConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

#[cfg(feature = "config-loaders")]
mod loader {
    use std::time::Duration;

    use serde::Deserialize;

    use super::{DdsiConfig, RetransmitMerging};

    /// On-disk shape: every field optional, durations in milliseconds.
    #[derive(Debug, Default, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub(super) struct ConfigFile {
        hb_interval_sched_ms: Option<u64>,
        hb_interval_sched_min_ms: Option<u64>,
        hb_interval_sched_max_ms: Option<u64>,
        hb_interval_min_ms: Option<u64>,
        whc_lowwater_mark: Option<u64>,
        whc_highwater_mark: Option<u64>,
        whc_init_highwater_mark: Option<u64>,
        whc_adaptive: Option<bool>,
        max_sample_size: Option<u64>,
        fragment_size: Option<u32>,
        max_message_size: Option<u32>,
        max_rexmit_burst_size: Option<u32>,
        init_transmit_extra_pct: Option<u32>,
        default_receive_buffer_size: Option<u32>,
        writer_linger_duration_ms: Option<u64>,
        retransmit_merging: Option<RetransmitMerging>,
        retransmit_merging_period_ms: Option<u64>,
        accelerate_rexmit_block_size: Option<u32>,
        handshake_initial_delay_ms: Option<u64>,
        handshake_retry_interval_ms: Option<u64>,
        handshake_resend_interval_ms: Option<u64>,
        handshake_timeout_ms: Option<u64>,
        pending_crypto_match_expiry_ms: Option<u64>,
        ack_accept_timeout_ms: Option<u64>,
        entity_id_limit: Option<u32>,
    }

    fn ms(v: Option<u64>, target: &mut Duration) {
        if let Some(v) = v {
            *target = Duration::from_millis(v);
        }
    }

    fn set<T>(v: Option<T>, target: &mut T) {
        if let Some(v) = v {
            *target = v;
        }
    }

    impl ConfigFile {
        pub(super) fn apply(self, mut c: DdsiConfig) -> DdsiConfig {
            ms(self.hb_interval_sched_ms, &mut c.hb_interval_sched);
            ms(self.hb_interval_sched_min_ms, &mut c.hb_interval_sched_min);
            ms(self.hb_interval_sched_max_ms, &mut c.hb_interval_sched_max);
            ms(self.hb_interval_min_ms, &mut c.hb_interval_min);
            set(self.whc_lowwater_mark, &mut c.whc_lowwater_mark);
            set(self.whc_highwater_mark, &mut c.whc_highwater_mark);
            set(self.whc_init_highwater_mark, &mut c.whc_init_highwater_mark);
            set(self.whc_adaptive, &mut c.whc_adaptive);
            set(self.max_sample_size, &mut c.max_sample_size);
            set(self.fragment_size, &mut c.fragment_size);
            set(self.max_message_size, &mut c.max_message_size);
            set(self.max_rexmit_burst_size, &mut c.max_rexmit_burst_size);
            set(self.init_transmit_extra_pct, &mut c.init_transmit_extra_pct);
            set(self.default_receive_buffer_size, &mut c.default_receive_buffer_size);
            ms(self.writer_linger_duration_ms, &mut c.writer_linger_duration);
            set(self.retransmit_merging, &mut c.retransmit_merging);
            ms(self.retransmit_merging_period_ms, &mut c.retransmit_merging_period);
            set(self.accelerate_rexmit_block_size, &mut c.accelerate_rexmit_block_size);
            ms(self.handshake_initial_delay_ms, &mut c.handshake_initial_delay);
            ms(self.handshake_retry_interval_ms, &mut c.handshake_retry_interval);
            ms(self.handshake_resend_interval_ms, &mut c.handshake_resend_interval);
            ms(self.handshake_timeout_ms, &mut c.handshake_timeout);
            ms(self.pending_crypto_match_expiry_ms, &mut c.pending_crypto_match_expiry);
            ms(self.ack_accept_timeout_ms, &mut c.ack_accept_timeout);
            set(self.entity_id_limit, &mut c.entity_id_limit);
            c
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = DdsiConfig::default();
        assert_eq!(c.hb_interval_sched, Duration::from_millis(100));
        assert_eq!(c.whc_highwater_mark, 512_000);
        assert_eq!(c.fragment_size, 1344);
        assert_eq!(c.handshake_timeout, Duration::from_secs(100));
        assert!(c.validate().is_ok(), "defaults must be consistent");
    }

    #[test]
    fn test_builder_validation() {
        let err = DdsiConfig::builder().whc_marks(10_000, 100, 1_000).build();
        assert!(matches!(err, Err(Error::BadParameter(_))));
        let ok = DdsiConfig::builder()
            .whc_marks(100, 500, 1_000)
            .writer_linger_duration(Duration::from_secs(2))
            .build()
            .expect("valid config");
        assert_eq!(ok.whc_init_highwater_mark, 500);
        assert_eq!(ok.writer_linger_duration, Duration::from_secs(2));
    }

    #[cfg(feature = "config-loaders")]
    #[test]
    fn test_yaml_file_overrides_defaults() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "hb_interval_sched_ms: 50\nretransmit_merging: adaptive\nwhc_adaptive: false"
        )
        .expect("write yaml");
        let c = DdsiConfig::from_yaml_file(file.path()).expect("load yaml");
        assert_eq!(c.hb_interval_sched, Duration::from_millis(50));
        assert_eq!(c.retransmit_merging, RetransmitMerging::Adaptive);
        assert!(!c.whc_adaptive);
        assert_eq!(c.fragment_size, 1344, "absent keys keep defaults");
    }

    #[cfg(feature = "config-loaders")]
    #[test]
    fn test_yaml_rejects_unknown_key() {
        assert!(DdsiConfig::from_yaml_str("no_such_knob: 1").is_err());
    }
}
