// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Construction-time configuration for a `HiomapDevice` (SPEC_FULL.md §9.4).
//!
//! The wire-negotiated parameters — protocol version, block-size shift,
//! flash geometry, the BMC-advertised timeout — live on `Session` and are
//! never user-configurable. This is strictly the host-side retry/backoff
//! policy layered on top of them, the kind of small, code-level
//! configuration struct the teacher's drivers take at construction (e.g.
//! `ServerImpl`'s fields in `drv-mock-gimlet-hf-server`) rather than the
//! file-based `serde`+`toml` configuration the teacher reserves for its
//! host build tooling.

/// Retry/backoff policy for a [`crate::HiomapDevice`].
pub struct SessionConfig {
    /// How many additional attempts a `WindowIO` transfer gets — each one
    /// preceded by invalidating and renegotiating the window — before the
    /// failure is surfaced as `FlashError::IoError` (spec.md §7). `1`
    /// matches the spec's mandated behavior ("retried once after window
    /// re-create; then surfaced"); `0` disables the retry entirely.
    pub max_window_retries: u8,
    /// Called with the retry number (starting at `1`) just before each
    /// retry's renegotiation, so a caller can back off — sleep, yield, poll
    /// some outer queue — before the façade re-issues the request. The
    /// default is a no-op.
    pub poll: Box<dyn Fn(u8) + Send + Sync>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_window_retries: 1, poll: Box::new(|_| {}) }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("max_window_retries", &self.max_window_retries)
            .finish_non_exhaustive()
    }
}
