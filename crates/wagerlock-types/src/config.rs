//! Configuration types for the escrow orchestrator.
//!
//! Everything here is plain serde data with defaults from [`constants`];
//! loading it from a file or the environment is the host process's job.

use std::{path::PathBuf, time::Duration};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Address, EscrowError, Result, constants};

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// The escrow program every message is addressed to. Required.
    pub contract_address: Option<Address>,
    /// Where per-room counters and active ids are persisted.
    pub state_file: PathBuf,
    /// House fee as a fraction of the pot (0.05 = 5%).
    pub fee_rate: Decimal,
    /// Value attached to each outbound message to pay for execution.
    pub operation_value: Decimal,
    pub retry: RetryConfig,
    pub sequencer: SequencerConfig,
    pub monitor: MonitorConfig,
    pub activation: ActivationConfig,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            contract_address: None,
            state_file: PathBuf::from(constants::DEFAULT_STATE_FILE),
            fee_rate: Decimal::new(constants::DEFAULT_FEE_RATE_BPS, 4),
            operation_value: Decimal::new(
                constants::DEFAULT_OPERATION_VALUE_NANO,
                constants::COIN_DECIMALS,
            ),
            retry: RetryConfig::default(),
            sequencer: SequencerConfig::default(),
            monitor: MonitorConfig::default(),
            activation: ActivationConfig::default(),
        }
    }
}

impl EscrowConfig {
    /// Check the configuration before anything is spawned.
    ///
    /// # Errors
    /// Returns [`EscrowError::Configuration`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(EscrowError::Configuration(msg.to_string()));
        if self.contract_address.is_none() {
            return bad("contract_address is not set");
        }
        if self.fee_rate.is_sign_negative() || self.fee_rate >= Decimal::ONE {
            return bad("fee_rate must be in [0, 1)");
        }
        if self.operation_value.is_sign_negative() {
            return bad("operation_value must not be negative");
        }
        if self.retry.max_attempts == 0 {
            return bad("retry.max_attempts must be at least 1");
        }
        if self.sequencer.confirm_attempts == 0 || self.activation.attempts == 0 {
            return bad("confirmation and activation attempts must be at least 1");
        }
        if self.sequencer.confirm_interval.is_zero()
            || self.monitor.poll_interval.is_zero()
            || self.activation.interval.is_zero()
        {
            return bad("poll intervals must be non-zero");
        }
        if self.monitor.deposit_timeout.is_zero() {
            return bad("monitor.deposit_timeout must be non-zero");
        }
        Ok(())
    }

    /// The contract address, or a configuration error if unset.
    pub fn contract(&self) -> Result<Address> {
        self.contract_address
            .ok_or_else(|| EscrowError::Configuration("contract_address is not set".to_string()))
    }
}

/// Exponential backoff for rate-limited RPCs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each time.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(constants::DEFAULT_RETRY_BASE_MS),
        }
    }
}

/// Transaction sequencer timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Pause between reading the seqno and sending.
    pub settle_delay: Duration,
    /// Seqno polls after a send before giving up on confirmation.
    pub confirm_attempts: u32,
    pub confirm_interval: Duration,
    /// Validity window of each signed message, in seconds.
    pub message_ttl_secs: u32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(constants::DEFAULT_SETTLE_DELAY_MS),
            confirm_attempts: constants::DEFAULT_CONFIRM_ATTEMPTS,
            confirm_interval: Duration::from_millis(constants::DEFAULT_CONFIRM_INTERVAL_MS),
            message_ttl_secs: constants::DEFAULT_MESSAGE_TTL_SECS,
        }
    }
}

/// Deposit monitor timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Hard deadline for quorum; a refund is sent when it passes.
    pub deposit_timeout: Duration,
    /// Delay before the extra poll of a manual "check now".
    pub check_now_grace: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(constants::DEFAULT_DEPOSIT_POLL_MS),
            deposit_timeout: Duration::from_millis(constants::DEFAULT_DEPOSIT_TIMEOUT_MS),
            check_now_grace: Duration::from_millis(constants::DEFAULT_CHECK_NOW_GRACE_MS),
        }
    }
}

/// Bounded wait for a created game to show up as active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationConfig {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            attempts: constants::DEFAULT_ACTIVATION_ATTEMPTS,
            interval: Duration::from_millis(constants::DEFAULT_ACTIVATION_INTERVAL_MS),
        }
    }
}
