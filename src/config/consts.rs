// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

/// Default bound on a step, in seconds
pub const DEFAULT_STEP_TIMEOUT_SECONDS: u64 = 300;
/// Default bound on a probe, in seconds
pub const DEFAULT_PROBE_TIMEOUT_SECONDS: u64 = 300;
/// Default bound on a reset, in seconds; resets also build device state
pub const DEFAULT_RESET_TIMEOUT_SECONDS: u64 = 1200;
/// Steps between two kernel profile reports
pub const DEFAULT_PROFILE_INTERVAL_STEPS: u64 = 100;
