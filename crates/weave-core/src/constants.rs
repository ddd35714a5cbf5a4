//! ─── Protocol constants ──────────────────────────────────────────────────────
//!
//! Every value here is normative (§6 of the design document this crate
//! implements): nodes that disagree on any of these cannot reach the same
//! stable state.

// ── Witness list / main chain ─────────────────────────────────────────────────

/// Size of the witness list.
pub const WITNESS_COUNT: usize = 12;

/// Number of distinct witness-authored units required on a best-parent chain
/// before a unit's `witnessed_level` is considered reached.
pub const MAJORITY_OF_WITNESSES: usize = 7;

// ── Unit shape limits ──────────────────────────────────────────────────────────

pub const MAX_PARENTS_PER_UNIT: usize = 16;
pub const MIN_PARENTS_PER_UNIT: usize = 1;
pub const MAX_AUTHORS_PER_UNIT: usize = 16;
pub const MAX_MESSAGES_PER_UNIT: usize = 128;
pub const MAX_INPUTS_PER_PAYMENT_MESSAGE: usize = 128;
pub const MAX_OUTPUTS_PER_PAYMENT_MESSAGE: usize = 128;

/// Maximum serialized unit size.
pub const MAX_UNIT_LENGTH: usize = 5 * 1024 * 1024;

/// Maximum wire frame size accepted before decoding (P8).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

// ── Formula evaluator (C8) ─────────────────────────────────────────────────────

/// Definition / formula complexity ceiling (count of tree nodes evaluated).
pub const MAX_COMPLEXITY: u32 = 100;

/// Total primitive-operation budget per evaluation.
pub const MAX_OPS: u32 = 2000;

pub const MAX_AA_STRING_LENGTH: usize = 4096;
pub const MAX_STATE_VAR_NAME_LENGTH: usize = 128;
pub const MAX_STATE_VAR_VALUE_LENGTH: usize = 1024;
pub const MAX_HASH_INPUT_LENGTH: usize = 65536;
pub const MAX_AA_NESTING: u32 = 20;

// ── Network (C10) ───────────────────────────────────────────────────────────────

pub const STALLED_TIMEOUT_SECS: u64 = 5;
pub const RESPONSE_TIMEOUT_SECS: u64 = 60;
pub const PURGE_BATCH_SIZE: usize = 500;
pub const MAX_HANDLERS_PER_PENDING_REQUEST: usize = 64;

/// Bound on `program`/`program_version` strings in the `version` justsaying body.
pub const MAX_VERSION_STRING_BYTES: usize = 1024;

// ── Asset / commission defaults ─────────────────────────────────────────────────

/// Sentinel identifying the native base asset in AA `bounce_fees`/balance maps.
pub const BASE_ASSET_LABEL: &str = "base";

/// Genesis timestamp: 2026-01-01 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: i64 = 1_767_225_600;

/// Total fixed base-asset supply, issued entirely at genesis.
pub const TOTAL_SUPPLY_BYTES: u128 = 1_000_000_000_000_000;
