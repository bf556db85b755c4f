// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Messages exchanged between supervisors.
//!
//! Every supervisor owns one unbounded mailbox of [`Envelope`]s. Commands
//! travel down from the parent, reports travel up tagged with the child's
//! index. Because a supervisor handles its mailbox in order, a Step always
//! reaches a child before any field data produced during that step.

use tokio::sync::{mpsc, oneshot};

use crate::circuit::FieldRef;
use crate::errors::RuntimeError;
use crate::memory::FieldMemory;
use crate::observability::messages::supervisor::ReportDropped;
use crate::observability::messages::StructuredLog;

/// The two kinds of evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Step,
    Reset,
}

impl Pass {
    pub fn command(self) -> Command {
        match self {
            Pass::Step => Command::Step,
            Pass::Reset => Command::Reset,
        }
    }

    pub fn done(self, error: Option<RuntimeError>) -> Report {
        match self {
            Pass::Step => Report::StepDone(error),
            Pass::Reset => Report::ResetDone(error),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Pass::Step => "step",
            Pass::Reset => "reset",
        }
    }
}

/// A copy of one field, taken between steps.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeData {
    pub field: FieldRef,
    pub memory: FieldMemory,
}

pub type ProbeReply = oneshot::Sender<Result<ProbeData, RuntimeError>>;

#[derive(Debug)]
pub enum Command {
    Step,
    Reset,
    ProbeField { field: FieldRef, reply: ProbeReply },
    /// Data for the input proxies standing in for `field`.
    FieldData { field: FieldRef, data: FieldMemory },
    /// Encoded [`Command::FieldData`] crossing a node boundary.
    FieldFrame { frame: Vec<u8> },
}

impl Command {
    pub fn label(&self) -> &'static str {
        match self {
            Command::Step => "Step",
            Command::Reset => "Reset",
            Command::ProbeField { .. } => "ProbeField",
            Command::FieldData { .. } => "FieldData",
            Command::FieldFrame { .. } => "FieldFrame",
        }
    }
}

#[derive(Debug)]
pub enum Report {
    StepDone(Option<RuntimeError>),
    ResetDone(Option<RuntimeError>),
    /// `field` was produced and has consumers outside the reporting child.
    FieldData { field: FieldRef, data: FieldMemory },
}

impl Report {
    pub fn label(&self) -> &'static str {
        match self {
            Report::StepDone(_) => "StepDone",
            Report::ResetDone(_) => "ResetDone",
            Report::FieldData { .. } => "FieldData",
        }
    }
}

#[derive(Debug)]
pub enum Envelope {
    Down(Command),
    Up { child: usize, report: Report },
}

pub type Mailbox = mpsc::UnboundedReceiver<Envelope>;

/// Sending half of a supervisor's mailbox.
#[derive(Debug, Clone)]
pub struct Address {
    name: String,
    sender: mpsc::UnboundedSender<Envelope>,
}

impl Address {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.sender
            .send(Envelope::Down(command))
            .map_err(|_| RuntimeError::SupervisorGone(self.name.clone()))
    }

    /// Link a child uses to report back into this mailbox.
    pub fn uplink(&self, child: usize) -> UpLink {
        UpLink {
            child,
            sender: self.sender.clone(),
        }
    }
}

pub fn mailbox(name: impl Into<String>) -> (Address, Mailbox) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        Address {
            name: name.into(),
            sender,
        },
        receiver,
    )
}

/// A child's route to its parent.
#[derive(Debug, Clone)]
pub struct UpLink {
    child: usize,
    sender: mpsc::UnboundedSender<Envelope>,
}

impl UpLink {
    pub fn send(&self, report: Report) {
        let label = report.label();
        if self
            .sender
            .send(Envelope::Up {
                child: self.child,
                report,
            })
            .is_err()
        {
            ReportDropped {
                child: self.child,
                report: label,
            }
            .log();
        }
    }
}
