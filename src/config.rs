//! Startup configuration (spec.md §5's `max_prepared` resource cap plus the
//! WAL payload ceiling and coordinator-mode flag from §4.2/§3), loaded with
//! the same warn-and-fall-back-to-default style as the teacher crate's
//! `CheckpointPolicy::from_env`.

const DEFAULT_MAX_PREPARED: usize = 64;
const DEFAULT_MAX_GID_LEN: usize = crate::ids::MAX_GID_LEN;
const DEFAULT_MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TwoPhaseConfig {
    /// Slab capacity (`max_prepared_transactions`). `0` disables the
    /// subsystem (spec.md §5): `reserve` always fails.
    pub max_prepared: usize,
    /// Upper bound on an accepted GID, in bytes. Must not exceed
    /// [`crate::ids::MAX_GID_LEN`]; configurable downward only.
    pub max_gid_len: usize,
    /// Ceiling on the assembled prepare-record payload length, checked
    /// before WAL insertion (spec.md §3, §7).
    pub max_payload_len: usize,
    /// Allows `finish_prepared` to target a GXact in a different database
    /// than the caller's own (spec.md §4.2).
    pub coordinator_mode: bool,
}

impl Default for TwoPhaseConfig {
    fn default() -> Self {
        TwoPhaseConfig {
            max_prepared: DEFAULT_MAX_PREPARED,
            max_gid_len: DEFAULT_MAX_GID_LEN,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            coordinator_mode: false,
        }
    }
}

impl TwoPhaseConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        TwoPhaseConfig {
            max_prepared: parse_env_usize(
                "TWOPHASE_MAX_PREPARED",
                default.max_prepared,
                0,
            ),
            max_gid_len: parse_env_usize(
                "TWOPHASE_MAX_GID_LEN",
                default.max_gid_len,
                1,
            )
            .min(crate::ids::MAX_GID_LEN),
            max_payload_len: parse_env_usize(
                "TWOPHASE_MAX_PAYLOAD_LEN",
                default.max_payload_len,
                64,
            ),
            coordinator_mode: parse_env_bool("TWOPHASE_COORDINATOR_MODE", default.coordinator_mode),
        }
    }
}

fn parse_env_usize(name: &str, default: usize, min: usize) -> usize {
    let Ok(raw) = std::env::var(name) else {
        return default;
    };
    match raw.parse::<usize>() {
        Ok(v) if v >= min => v,
        Ok(_) => {
            eprintln!("WARNING: {} must be >= {}, using default {}", name, min, default);
            default
        }
        Err(_) => {
            eprintln!(
                "WARNING: {} is not a valid integer ({:?}), using default {}",
                name, raw, default
            );
            default
        }
    }
}

fn parse_env_bool(name: &str, default: bool) -> bool {
    let Ok(raw) = std::env::var(name) else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            eprintln!(
                "WARNING: {} is not a valid boolean ({:?}), using default {}",
                name, raw, default
            );
            default
        }
    }
}
