// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Routing core shared by node and cluster supervisors.
//!
//! A hub fans passes out to its children, collects their completions,
//! routes probes to the child owning the kernel and moves field data
//! between children. Anything it was unable to build at start-up is kept as
//! a sticky error and returned for every later command.

use std::collections::{HashMap, HashSet};

use tokio_util::sync::CancellationToken;

use crate::circuit::{FieldRef, KernelId};
use crate::errors::RuntimeError;
use crate::memory::FieldMemory;
use crate::observability::messages::supervisor::{
    ChildReportedError, CommandRejected, FieldRouted, InitializationFailed, StickyErrorReplayed,
    SupervisorStopped,
};
use crate::observability::messages::StructuredLog;
use crate::proto::{decode_field_data, encode_field_data};
use crate::supervisor::fan_in::FanIn;
use crate::supervisor::protocol::{Address, Command, Envelope, Mailbox, Pass, ProbeReply, Report, UpLink};

/// Where things live among a hub's children.
#[derive(Debug, Default, Clone)]
pub struct Routes {
    /// Child holding each kernel of the original circuit.
    pub owners: HashMap<KernelId, usize>,
    /// Children holding an input proxy for each field.
    pub field_consumers: HashMap<FieldRef, Vec<usize>>,
    /// Fields to pass upward because consumers live outside this hub.
    pub exports: HashSet<FieldRef>,
}

pub struct Hub {
    name: String,
    up: UpLink,
    children: Vec<Address>,
    routes: Routes,
    /// Cross-node traffic travels as encoded frames.
    encode_frames: bool,
    init_error: Option<RuntimeError>,
    fan_in: FanIn,
}

impl Hub {
    pub fn new(name: impl Into<String>, up: UpLink, children: Vec<Address>, routes: Routes, encode_frames: bool) -> Self {
        Self {
            name: name.into(),
            up,
            children,
            routes,
            encode_frames,
            init_error: None,
            fan_in: FanIn::default(),
        }
    }

    /// A hub with no children that answers everything with `error`.
    pub fn failed(name: impl Into<String>, up: UpLink, error: RuntimeError) -> Self {
        let name = name.into();
        InitializationFailed {
            component: &name,
            error: &error,
        }
        .log();
        Self {
            init_error: Some(error),
            ..Self::new(name, up, Vec::new(), Routes::default(), false)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> usize {
        self.children.len()
    }

    pub fn handle(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Down(Command::Step) => self.begin(Pass::Step),
            Envelope::Down(Command::Reset) => self.begin(Pass::Reset),
            Envelope::Down(Command::ProbeField { field, reply }) => self.route_probe(field, reply),
            Envelope::Down(Command::FieldData { field, data }) => {
                self.route_down(field, data, None);
            }
            Envelope::Down(Command::FieldFrame { frame }) => match decode_field_data(&frame) {
                Ok((field, data)) => {
                    self.route_down(field, data, None);
                }
                Err(error) => self.reject("FieldFrame", error),
            },
            Envelope::Up {
                child,
                report: Report::StepDone(error),
            } => self.complete(child, Pass::Step, error),
            Envelope::Up {
                child,
                report: Report::ResetDone(error),
            } => self.complete(child, Pass::Reset, error),
            Envelope::Up {
                child,
                report: Report::FieldData { field, data },
            } => self.route_up(child, field, data),
        }
    }

    fn begin(&mut self, pass: Pass) {
        if let Some(error) = &self.init_error {
            StickyErrorReplayed {
                component: &self.name,
                command: pass.label(),
            }
            .log();
            self.up.send(pass.done(Some(error.clone())));
            return;
        }
        if self.fan_in.is_busy() {
            let error = RuntimeError::protocol(&self.name, format!("{} while a pass is in flight", pass.label()));
            CommandRejected {
                component: &self.name,
                command: pass.label(),
                reason: "a pass is already in flight",
            }
            .log();
            self.up.send(pass.done(Some(error)));
            return;
        }
        if let Some(report) = self.fan_in.begin(pass, self.children.len()) {
            self.up.send(report);
            return;
        }
        for index in 0..self.children.len() {
            if let Err(error) = self.children[index].send(pass.command()) {
                self.complete(index, pass, Some(error));
            }
        }
    }

    fn complete(&mut self, child: usize, pass: Pass, error: Option<RuntimeError>) {
        if let Some(error) = &error {
            ChildReportedError {
                component: &self.name,
                child: self.children.get(child).map(Address::name).unwrap_or("?"),
                error,
            }
            .log();
        }
        match self.fan_in.record(pass, error) {
            Ok(Some(report)) => self.up.send(report),
            Ok(None) => {}
            Err(violation) => CommandRejected {
                component: &self.name,
                command: pass.label(),
                reason: &violation.to_string(),
            }
            .log(),
        }
    }

    fn route_probe(&mut self, field: FieldRef, reply: ProbeReply) {
        if let Some(error) = &self.init_error {
            let _ = reply.send(Err(error.clone()));
            return;
        }
        match self.routes.owners.get(&field.kernel) {
            // A failed send drops `reply`; the requester sees the closed channel.
            Some(&child) => {
                let _ = self.children[child].send(Command::ProbeField { field, reply });
            }
            None => {
                let _ = reply.send(Err(RuntimeError::UnknownField(field)));
            }
        }
    }

    /// Delivers `field` to every consuming child except `from`.
    fn route_down(&mut self, field: FieldRef, data: FieldMemory, from: Option<usize>) -> usize {
        let Some(consumers) = self.routes.field_consumers.get(&field) else {
            if from.is_none() {
                self.reject(
                    "FieldData",
                    RuntimeError::protocol(&self.name, format!("no child consumes {field}")),
                );
            }
            return 0;
        };
        let mut delivered = 0;
        let mut failures = Vec::new();
        for &child in consumers.iter().filter(|&&child| Some(child) != from) {
            let command = if self.encode_frames {
                Command::FieldFrame {
                    frame: encode_field_data(field, &data),
                }
            } else {
                Command::FieldData {
                    field,
                    data: data.clone(),
                }
            };
            match self.children[child].send(command) {
                Ok(()) => delivered += 1,
                Err(error) => failures.push(error),
            }
        }
        for error in failures {
            self.fan_in.note_error(error);
        }
        delivered
    }

    fn route_up(&mut self, child: usize, field: FieldRef, data: FieldMemory) {
        let exported = self.routes.exports.contains(&field);
        if exported {
            self.up.send(Report::FieldData {
                field,
                data: data.clone(),
            });
        }
        let targets = self.route_down(field, data, Some(child));
        FieldRouted {
            component: &self.name,
            field: &field.to_string(),
            targets,
            exported,
        }
        .log();
    }

    fn reject(&mut self, command: &str, error: RuntimeError) {
        CommandRejected {
            component: &self.name,
            command,
            reason: &error.to_string(),
        }
        .log();
        self.fan_in.note_error(error);
    }

    /// Handles the mailbox until it closes or `shutdown` fires.
    pub async fn run(mut self, mut mailbox: Mailbox, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                envelope = mailbox.recv() => match envelope {
                    Some(envelope) => self.handle(envelope),
                    None => break,
                },
            }
        }
        SupervisorStopped { component: &self.name }.log();
    }
}
