// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::RuntimeError;
use crate::supervisor::protocol::{Pass, Report};

/// Collects one completion per child for the pass in flight.
///
/// Completions may arrive in any order. When several children fail, the
/// error reported upward is the last one received. An error noted while no
/// pass is running is carried into the next completion.
#[derive(Debug, Default)]
pub struct FanIn {
    pass: Option<Pass>,
    pending: usize,
    error: Option<RuntimeError>,
}

impl FanIn {
    pub fn is_busy(&self) -> bool {
        self.pass.is_some()
    }

    /// Starts waiting for `children` completions. With no children the pass
    /// is complete immediately.
    pub fn begin(&mut self, pass: Pass, children: usize) -> Option<Report> {
        if children == 0 {
            return Some(pass.done(self.error.take()));
        }
        self.pass = Some(pass);
        self.pending = children;
        None
    }

    pub fn note_error(&mut self, error: RuntimeError) {
        self.error = Some(error);
    }

    /// Records one child completion; returns the upward report once all have arrived.
    pub fn record(&mut self, pass: Pass, error: Option<RuntimeError>) -> Result<Option<Report>, RuntimeError> {
        match self.pass {
            None => {
                return Err(RuntimeError::protocol(
                    "fan-in",
                    format!("{} completion with no pass in flight", pass.label()),
                ))
            }
            Some(running) if running != pass => {
                return Err(RuntimeError::protocol(
                    "fan-in",
                    format!("{} completion during a {} pass", pass.label(), running.label()),
                ))
            }
            Some(_) => {}
        }
        if let Some(error) = error {
            self.error = Some(error);
        }
        self.pending -= 1;
        if self.pending > 0 {
            return Ok(None);
        }
        self.pass = None;
        Ok(Some(pass.done(self.error.take())))
    }
}
