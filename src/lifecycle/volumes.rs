//! Ephemeral session volume names
//!
//! Each build gets its own layers and app volumes. Uniqueness comes from a
//! random suffix, so concurrent builds on one host never share a volume.

use rand::{Rng, RngCore};

pub const LAYERS_VOLUME_PREFIX: &str = "pack-layers-";
pub const APP_VOLUME_PREFIX: &str = "pack-app-";

/// Length of the random lowercase suffix
pub const SUFFIX_LEN: usize = 10;

/// Names of the volumes owned by one build session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionVolumes {
    pub layers: String,
    pub app: String,
}

impl SessionVolumes {
    /// Generate fresh names from `rng`
    pub fn generate(rng: &mut dyn RngCore) -> Self {
        Self {
            layers: format!("{}{}", LAYERS_VOLUME_PREFIX, random_suffix(rng, SUFFIX_LEN)),
            app: format!("{}{}", APP_VOLUME_PREFIX, random_suffix(rng, SUFFIX_LEN)),
        }
    }
}

/// `len` random lowercase ASCII letters
pub fn random_suffix(rng: &mut dyn RngCore, len: usize) -> String {
    (0..len)
        .map(|_| char::from(b'a' + rng.gen_range(0..26u8)))
        .collect()
}
