//! Address settings resolution.
//!
//! Sizes each address from its plan's broker share, either against the
//! process-wide `BROKER_GLOBAL_MAX_SIZE` (split across partitions) or against
//! the broker's own default `maxSizeBytes`.

use crate::config::GlobalConfig;
use crate::management::ManagementResult;
use crate::model::{AddressSettings, DesiredAddress};
use std::future::Future;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SizeParseError {
    #[error("empty size string")]
    Empty,
    #[error("invalid size {0:?}")]
    Invalid(String),
    #[error("unknown size suffix {suffix:?} in {input:?}")]
    UnknownSuffix { input: String, suffix: String },
}

/// Parse a size string with binary multipliers: `"64MB"` is 64 × 1024 × 1024.
pub fn parse_size(input: &str) -> Result<u64, SizeParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SizeParseError::Empty);
    }
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| SizeParseError::Invalid(input.to_string()))?;
    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        other => {
            return Err(SizeParseError::UnknownSuffix {
                input: input.to_string(),
                suffix: other.to_string(),
            })
        }
    };
    Ok((value * multiplier as f64).round() as u64)
}

/// Scale `total` bytes by a broker share; rounds to the nearest byte.
fn share_of(total: u64, share: f64, divisor: u32) -> u64 {
    (total as f64 * share / f64::from(divisor.max(1))).round() as u64
}

#[derive(Debug, Clone, Default)]
pub struct AddressSettingsResolver {
    global_max_size: Option<u64>,
}

impl AddressSettingsResolver {
    pub fn new(global: &GlobalConfig) -> Result<Self, SizeParseError> {
        let global_max_size = global
            .broker_global_max_size
            .as_deref()
            .map(parse_size)
            .transpose()?;
        Ok(Self { global_max_size })
    }

    pub fn global_max_size(&self) -> Option<u64> {
        self.global_max_size
    }

    /// Whether resolving this address would consult the broker default size.
    pub fn needs_broker_default(&self, address: &DesiredAddress) -> bool {
        self.global_max_size.is_none() && address.broker_share().is_some()
    }

    /// Resolve against an already-known broker default.
    pub fn resolve_with(
        &self,
        address: &DesiredAddress,
        broker_default: Option<u64>,
    ) -> AddressSettings {
        let mut settings = AddressSettings::default();
        if let Some(share) = address.broker_share() {
            let share = if (0.0..=1.0).contains(&share) {
                share
            } else {
                tracing::warn!(address = %address.address, share, "broker share outside [0, 1], clamping");
                share.clamp(0.0, 1.0)
            };
            settings.max_size_bytes = match (self.global_max_size, broker_default) {
                (Some(global), _) => Some(share_of(global, share, address.partitions())),
                (None, Some(default)) => Some(share_of(default, share, 1)),
                (None, None) => None,
            };
        }
        if let Some(ttl) = address.message_ttl() {
            settings.min_expiry_delay = ttl.minimum;
            settings.max_expiry_delay = ttl.maximum;
        }
        settings
    }

    /// Resolve, awaiting `broker_default` only when the global size is unset and
    /// the plan requests a broker share.
    pub async fn resolve<F>(
        &self,
        address: &DesiredAddress,
        broker_default: F,
    ) -> ManagementResult<AddressSettings>
    where
        F: Future<Output = ManagementResult<Option<u64>>>,
    {
        let default = if self.needs_broker_default(address) {
            broker_default.await?
        } else {
            None
        };
        Ok(self.resolve_with(address, default))
    }
}
