//! Persistent build caches
//!
//! Caches are named volumes that outlive a single build so that rebuilding
//! the same image can reuse layers. Each image has two: a build cache used by
//! restore/export/cache phases, and a launch cache used by export when
//! working against the local daemon.
//!
//! # Naming
//!
//! | Purpose | Volume name |
//! |---------|-------------|
//! | build | `pack-cache-<sha256(image)[..12]>.build` |
//! | launch | `pack-cache-<sha256(image)[..12]>.launch` |

pub mod volume;

pub use volume::{Cache, CachePurpose, VolumeCache};
