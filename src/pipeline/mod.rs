//! Wire message types shared across the per-call pipeline stages (spec §3).

pub mod messages;
