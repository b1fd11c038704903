//! Environment-overridable knobs (§10.3), feature-gated on `figment_config`
//! the same way the crate's `figment` dependency is already declared
//! optional. `format`/`load` still take explicit arguments per spec.md §6;
//! `VeaConfig` is an opt-in convenience for callers (stress harnesses,
//! CLIs built on top of this crate) that want `VEA_`-prefixed environment
//! overrides of the compiled-in defaults from `constants.rs`.

use crate::constants;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VeaConfig {
    pub block_sz: u32,
    pub hdr_blks: u32,
    pub bitmap_feature: bool,
    pub aging_expiry_secs: u32,
    pub flush_debounce_secs: u32,
    pub unmap_threshold_mb: u64,
    pub max_flush_frags: usize,
}

impl Default for VeaConfig {
    fn default() -> Self {
        VeaConfig {
            block_sz: constants::BLK_SZ,
            hdr_blks: 1,
            bitmap_feature: true,
            aging_expiry_secs: constants::AGING_EXPIRY_SECS,
            flush_debounce_secs: constants::FLUSH_DEBOUNCE_SECS,
            unmap_threshold_mb: constants::UNMAP_THRESHOLD_MB,
            max_flush_frags: constants::MAX_FLUSH_FRAGS,
        }
    }
}

impl VeaConfig {
    /// `compat` bits implied by this config's feature toggles.
    pub fn compat(&self) -> u32 {
        if self.bitmap_feature {
            constants::COMPAT_FEATURE_BITMAP
        } else {
            0
        }
    }
}

/// Resolve a [`VeaConfig`] from compiled-in defaults, overridden by any
/// `VEA_`-prefixed environment variables (e.g. `VEA_BLOCK_SZ=65536`).
#[cfg(feature = "figment_config")]
pub fn resolved() -> Result<VeaConfig, figment::Error> {
    use figment::{
        providers::{Env, Serialized},
        Figment,
    };
    Figment::from(Serialized::defaults(VeaConfig::default()))
        .merge(Env::prefixed("VEA_"))
        .extract()
}

#[cfg(not(feature = "figment_config"))]
pub fn resolved() -> Result<VeaConfig, std::convert::Infallible> {
    Ok(VeaConfig::default())
}

#[cfg(all(test, feature = "figment_config"))]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let cfg = VeaConfig::default();
        assert_eq!(cfg.block_sz, constants::BLK_SZ);
        assert_eq!(cfg.compat(), constants::COMPAT_FEATURE_BITMAP);
    }

    #[test]
    fn env_override_block_sz() {
        std::env::set_var("VEA_BLOCK_SZ", "65536");
        let cfg = resolved().unwrap();
        assert_eq!(cfg.block_sz, 65536);
        std::env::remove_var("VEA_BLOCK_SZ");
    }
}
