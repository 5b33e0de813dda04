//! Tripwire — BLAKE3 desired-state hashing and the stack event log.

pub mod eventlog;
pub mod hasher;
