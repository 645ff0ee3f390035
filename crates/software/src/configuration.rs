//! This module contains the tunables of the control loop, including the [`FailurePolicy`] that decides whether a
//! misbehaving editor or a failed write can take the device down.

use embassy_time::Duration;

/// How the device reacts to failures that say nothing about the health of the persisted configuration: malformed or
/// unknown messages, transport timeouts and failed commits.
///
/// Failures while loading the configuration at start-up are always fatal regardless of policy, since there is no
/// trustworthy configuration to continue with.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailurePolicy {
    /// Report the failure to the editor, then enter the terminal fatal error state. The device has to be power
    /// cycled. Useful on the bench, where a halt is easier to notice than an error reply.
    Halt,
    /// Report the failure to the editor and keep running with the configuration already in memory.
    #[default]
    Recover,
}

/// Tunables for [`Program`](crate::program::Program).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// See [`FailurePolicy`].
    pub failure_policy: FailurePolicy,
    /// Longest wait for the rest of a message once its first byte has arrived.
    pub read_timeout: Duration,
    /// Largest message accepted from the transport, in bytes.
    pub max_message_len: usize,
    /// Largest record read from or written to storage, in bytes, including version byte and terminator.
    pub max_record_len: usize,
    /// Pause between ticks while running.
    pub tick_interval: Duration,
    /// How long status screens (e.g. "Saved settings") stay up.
    pub status_hold: Duration,
    /// How long each frame of the greeting stays up.
    pub welcome_frame_hold: Duration,
    /// Pause after ticks that have nothing to wait for, such as a state change.
    pub idle_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            read_timeout: Duration::from_secs(2),
            max_message_len: 8192,
            max_record_len: 4096,
            tick_interval: Duration::from_millis(1),
            status_hold: Duration::from_millis(2000),
            welcome_frame_hold: Duration::from_millis(750),
            idle_interval: Duration::from_millis(250),
        }
    }
}
