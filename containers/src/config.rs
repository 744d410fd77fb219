/// Chain timing parameters.
///
/// These are protocol constants, not tunables: slot arithmetic and
/// wall-clock slot derivation depend on them on both sides of the wire.

/// Number of consecutive slots grouped into one epoch.
pub const SLOTS_PER_EPOCH: u64 = 32;

/// Wall-clock duration of a single slot, in seconds.
pub const SECONDS_PER_SLOT: u64 = 12;
