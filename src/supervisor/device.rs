// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Per-device evaluation.
//!
//! A device supervisor owns one partition: its static kernel order, its
//! register file and the input proxies standing in for fields computed
//! elsewhere. A pass runs in three phases:
//!
//! 1. On Step every flip-flop swaps master and slave. Reset instead calls
//!    each op's `reset` on its reset outputs.
//! 2. Kernels launch in schedule order. An input proxy whose data has not
//!    arrived suspends the pass; the mailbox keeps being served and the pass
//!    resumes when the data shows up. An output proxy sends its field upward.
//! 3. Launch timings are folded into per-kernel statistics and the
//!    completion is reported.
//!
//! A failed launch aborts the pass. Output proxies that did not run yet
//! still send their field, with whatever the register holds, so devices
//! waiting on it are not left hanging.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::circuit::{FieldRef, Kernel, KernelCategory};
use crate::engine::allocator::{allocate, AllocatorOptions, Binding, FlipFlopRole, RegisterAllocation};
use crate::engine::partitioner::{DeviceKind, DeviceSlot, Partition};
use crate::engine::proxy::{InputProxy, ProxyStep};
use crate::errors::{CompileError, KernelError, RuntimeError};
use crate::memory::{BufferKind, FieldMemory, FieldMemoryPool, FieldType, FieldViewMut};
use crate::observability::messages::device::{
    DeviceStarted, ExportsFlushed, KernelLaunchFailed, KernelProfile, PassCompleted, StaleProxyDataDropped,
};
use crate::observability::messages::supervisor::{CommandRejected, SupervisorStopped};
use crate::observability::messages::StructuredLog;
use crate::proto::decode_field_data;
use crate::supervisor::protocol::{Command, Envelope, Mailbox, Pass, ProbeData, Report, UpLink};
use crate::supervisor::SupervisorOptions;

/// Kernels remembered for annotating a failed launch.
const LAUNCH_WINDOW: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Latch(usize),
    Master(usize),
    Slave(usize),
}

#[derive(Debug, Clone, Copy)]
enum Purpose {
    Read,
    Write,
    Reset,
}

#[derive(Debug, Clone)]
struct Access {
    target: Target,
    field_type: FieldType,
}

struct ScheduledKernel {
    kernel: Kernel,
    inputs: Vec<Access>,
    outputs: Vec<Access>,
    reset_outputs: Vec<Access>,
}

#[derive(Debug)]
enum LaunchFailure {
    Kernel(KernelError),
    Runtime(RuntimeError),
}

impl From<RuntimeError> for LaunchFailure {
    fn from(error: RuntimeError) -> Self {
        LaunchFailure::Runtime(error)
    }
}

#[derive(Debug)]
enum Slot {
    /// Not materialized yet.
    Vacant,
    Ready(FieldMemory),
    /// Lent out to a running kernel.
    InUse,
}

/// Physical buffers for one device. Latches come first, then each
/// flip-flop's two halves.
struct RegisterFile {
    slots: Vec<Slot>,
    storage: Vec<FieldType>,
    latches: usize,
    front: Vec<usize>,
    kind: BufferKind,
    pool: Arc<FieldMemoryPool>,
}

impl RegisterFile {
    fn new(allocation: &RegisterAllocation, pool: Arc<FieldMemoryPool>) -> Self {
        let mut storage: Vec<FieldType> = allocation.latches().iter().map(|l| l.storage.clone()).collect();
        for flip_flop in allocation.flip_flops() {
            storage.push(flip_flop.field_type.clone());
            storage.push(flip_flop.field_type.clone());
        }
        Self {
            slots: storage.iter().map(|_| Slot::Vacant).collect(),
            storage,
            latches: allocation.latches().len(),
            front: vec![0; allocation.flip_flops().len()],
            kind: allocation.buffer_kind(),
            pool,
        }
    }

    fn resolve(&self, target: Target) -> usize {
        match target {
            Target::Latch(latch) => latch,
            Target::Master(flip_flop) => self.latches + 2 * flip_flop + self.front[flip_flop],
            Target::Slave(flip_flop) => self.latches + 2 * flip_flop + (1 - self.front[flip_flop]),
        }
    }

    fn flip(&mut self) {
        for front in &mut self.front {
            *front = 1 - *front;
        }
    }

    fn ensure(&mut self, slot: usize) {
        if matches!(self.slots[slot], Slot::Vacant) {
            self.slots[slot] = Slot::Ready(self.pool.acquire(&self.storage[slot], self.kind));
        }
    }

    fn take(&mut self, slot: usize) -> Result<FieldMemory, RuntimeError> {
        self.ensure(slot);
        match mem::replace(&mut self.slots[slot], Slot::InUse) {
            Slot::Ready(memory) => Ok(memory),
            other => {
                self.slots[slot] = other;
                Err(RuntimeError::Internal(format!("register {slot} is bound twice in one launch")))
            }
        }
    }

    fn restore(&mut self, slot: usize, memory: FieldMemory) {
        self.slots[slot] = Slot::Ready(memory);
    }

    fn memory(&self, slot: usize) -> Result<&FieldMemory, RuntimeError> {
        match &self.slots[slot] {
            Slot::Ready(memory) => Ok(memory),
            Slot::Vacant => Err(RuntimeError::Internal(format!("register {slot} read before allocation"))),
            Slot::InUse => Err(RuntimeError::Internal(format!(
                "register {slot} is both read and written by one launch"
            ))),
        }
    }

    /// A copy of the register viewed as `field_type`; zeros if never written.
    fn snapshot(&self, slot: usize, field_type: &FieldType) -> Result<FieldMemory, RuntimeError> {
        match &self.slots[slot] {
            Slot::Vacant => Ok(FieldMemory::new(field_type.clone(), self.kind)),
            _ => Ok(self.memory(slot)?.view_as(field_type).to_memory(self.kind)),
        }
    }

    fn load(&mut self, slot: usize, field_type: &FieldType, data: &FieldMemory) -> Result<(), RuntimeError> {
        let mut memory = self.take(slot)?;
        let copied = memory.view_mut_as(field_type).copy_from(data.read());
        self.restore(slot, memory);
        Ok(copied?)
    }

    fn launch(&mut self, entry: &ScheduledKernel, pass: Pass) -> Result<(), LaunchFailure> {
        let (inputs, outputs) = match pass {
            Pass::Step => (entry.inputs.as_slice(), entry.outputs.as_slice()),
            Pass::Reset => (&[][..], entry.reset_outputs.as_slice()),
        };
        let input_slots: Vec<usize> = inputs.iter().map(|a| self.resolve(a.target)).collect();
        let output_slots: Vec<usize> = outputs.iter().map(|a| self.resolve(a.target)).collect();
        for &slot in &input_slots {
            self.ensure(slot);
        }

        let mut taken = Vec::with_capacity(output_slots.len());
        for &slot in &output_slots {
            match self.take(slot) {
                Ok(memory) => taken.push(memory),
                Err(error) => {
                    for (&slot, memory) in output_slots.iter().zip(taken) {
                        self.restore(slot, memory);
                    }
                    return Err(error.into());
                }
            }
        }

        let result = self.run_op(entry, pass, inputs, &input_slots, outputs, &mut taken);
        for (&slot, memory) in output_slots.iter().zip(taken) {
            self.restore(slot, memory);
        }
        result
    }

    fn run_op(
        &self,
        entry: &ScheduledKernel,
        pass: Pass,
        inputs: &[Access],
        input_slots: &[usize],
        outputs: &[Access],
        taken: &mut [FieldMemory],
    ) -> Result<(), LaunchFailure> {
        let views = input_slots
            .iter()
            .zip(inputs)
            .map(|(&slot, access)| Ok(self.memory(slot)?.view_as(&access.field_type)))
            .collect::<Result<Vec<_>, RuntimeError>>()?;
        let mut output_views: Vec<FieldViewMut<'_>> = taken
            .iter_mut()
            .zip(outputs)
            .map(|(memory, access)| memory.view_mut_as(&access.field_type))
            .collect();
        let op = &entry.kernel.op;
        match pass {
            Pass::Step => op.compute(&views, &mut output_views),
            Pass::Reset => op.reset(&mut output_views),
        }
        .map_err(LaunchFailure::Kernel)
    }
}

impl Drop for RegisterFile {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            if let Slot::Ready(memory) = slot {
                self.pool.release(memory);
            }
        }
    }
}

/// Launch statistics for one kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KernelStats {
    pub invocations: u64,
    pub total: Duration,
    pub max: Duration,
}

impl KernelStats {
    fn record(&mut self, elapsed: Duration) {
        self.invocations += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
    }

    pub fn mean(&self) -> Duration {
        if self.invocations == 0 {
            return Duration::ZERO;
        }
        self.total / self.invocations as u32
    }
}

struct PassState {
    pass: Pass,
    cursor: usize,
    started: Instant,
    recent: VecDeque<usize>,
    launched: Vec<(usize, Duration)>,
}

impl PassState {
    fn new(pass: Pass) -> Self {
        Self {
            pass,
            cursor: 0,
            started: Instant::now(),
            recent: VecDeque::with_capacity(LAUNCH_WINDOW),
            launched: Vec::new(),
        }
    }

    fn remember(&mut self, index: usize) {
        if self.recent.len() == LAUNCH_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(index);
    }

    fn record(&mut self, index: usize, elapsed: Duration) {
        self.remember(index);
        self.launched.push((index, elapsed));
    }
}

enum DeviceState {
    Idle,
    /// Suspended on the input proxy at `cursor`.
    Running(PassState),
}

pub struct DeviceSupervisor {
    name: String,
    up: UpLink,
    program: Vec<ScheduledKernel>,
    registers: RegisterFile,
    allocation: RegisterAllocation,
    field_types: HashMap<FieldRef, FieldType>,
    proxies: HashMap<usize, InputProxy>,
    proxy_index: HashMap<FieldRef, usize>,
    state: DeviceState,
    deferred_error: Option<RuntimeError>,
    stats: Vec<KernelStats>,
    steps: u64,
    options: SupervisorOptions,
}

fn access(
    allocation: &RegisterAllocation,
    field: FieldRef,
    field_type: &FieldType,
    purpose: Purpose,
) -> Result<Access, CompileError> {
    let binding = allocation
        .binding(field)
        .ok_or_else(|| CompileError::internal(format!("field {field} has no register")))?;
    let target = match binding {
        Binding::Latch { latch, .. } => Target::Latch(latch),
        Binding::FlipFlop { flip_flop, role } => match (role, purpose) {
            (FlipFlopRole::Master, _) => Target::Master(flip_flop),
            (FlipFlopRole::Slave, _) => Target::Slave(flip_flop),
            (FlipFlopRole::Pipelined, Purpose::Write) => Target::Slave(flip_flop),
            (FlipFlopRole::Pipelined, Purpose::Read | Purpose::Reset) => Target::Master(flip_flop),
        },
    };
    Ok(Access {
        target,
        field_type: field_type.clone(),
    })
}

impl DeviceSupervisor {
    /// Allocates registers for `partition` and checks they fit on `slot`.
    pub fn new(
        slot: &DeviceSlot,
        partition: &Partition,
        options: &SupervisorOptions,
        pool: Arc<FieldMemoryPool>,
        up: UpLink,
    ) -> Result<Self, CompileError> {
        let circuit = &partition.circuit;
        let allocation = allocate(
            circuit,
            &partition.schedule,
            AllocatorOptions {
                buffer_sharing: options.buffer_sharing,
                latch_binning: options.latch_binning,
                queue_order: slot.queue_order,
                buffer_kind: options.buffer_kind,
            },
        )?;
        allocation.check_capacity(slot.address, slot.memory_bytes)?;

        let field_types: HashMap<FieldRef, FieldType> = circuit
            .kernels()
            .flat_map(|kernel| kernel.output_fields().map(|(field, ty)| (field, ty.clone())))
            .collect();

        let mut program = Vec::with_capacity(partition.schedule.len());
        let mut proxies = HashMap::new();
        let mut proxy_index = HashMap::new();
        for id in partition.schedule.iter() {
            let kernel = circuit
                .kernel(id)
                .ok_or_else(|| CompileError::internal(format!("schedule names unknown kernel {id}")))?;
            let inputs = kernel
                .inputs
                .iter()
                .map(|&field| {
                    let field_type = field_types
                        .get(&field)
                        .ok_or_else(|| CompileError::internal(format!("input {field} of {} is not produced", kernel.name)))?;
                    access(&allocation, field, field_type, Purpose::Read)
                })
                .collect::<Result<Vec<_>, _>>()?;
            let outputs = kernel
                .output_fields()
                .map(|(field, ty)| access(&allocation, field, ty, Purpose::Write))
                .collect::<Result<Vec<_>, _>>()?;
            let reset_outputs = kernel
                .output_fields()
                .map(|(field, ty)| access(&allocation, field, ty, Purpose::Reset))
                .collect::<Result<Vec<_>, _>>()?;

            if let KernelCategory::InputProxy { source } = kernel.category {
                proxies.insert(program.len(), InputProxy::new(source));
                proxy_index.insert(source, program.len());
            }
            program.push(ScheduledKernel {
                kernel: kernel.clone(),
                inputs,
                outputs,
                reset_outputs,
            });
        }

        let name = match slot.kind {
            DeviceKind::Accelerator => slot.address.to_string(),
            DeviceKind::Cpu => format!("node{}/cpu", slot.address.node),
        };
        DeviceStarted {
            device: &name,
            kernels: program.len(),
            latches: allocation.latches().len(),
            flip_flops: allocation.flip_flops().len(),
            bytes: allocation.bytes_required(),
        }
        .log();

        Ok(Self {
            name,
            up,
            stats: vec![KernelStats::default(); program.len()],
            registers: RegisterFile::new(&allocation, pool),
            program,
            allocation,
            field_types,
            proxies,
            proxy_index,
            state: DeviceState::Idle,
            deferred_error: None,
            steps: 0,
            options: options.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Statistics by kernel name, in schedule order.
    pub fn stats(&self) -> Vec<(&str, KernelStats)> {
        self.program
            .iter()
            .zip(&self.stats)
            .map(|(entry, stats)| (entry.kernel.name.as_str(), *stats))
            .collect()
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.state, DeviceState::Running(_))
    }

    pub fn handle(&mut self, command: Command) {
        match command {
            Command::Step => self.begin(Pass::Step),
            Command::Reset => self.begin(Pass::Reset),
            Command::ProbeField { field, reply } => {
                let _ = reply.send(self.probe(field));
            }
            Command::FieldData { field, data } => self.deliver(field, data),
            Command::FieldFrame { frame } => match decode_field_data(&frame) {
                Ok((field, data)) => self.deliver(field, data),
                Err(error) => self.fail(error),
            },
        }
    }

    fn begin(&mut self, pass: Pass) {
        if self.is_suspended() {
            CommandRejected {
                component: &self.name,
                command: pass.label(),
                reason: "a pass is still waiting for field data",
            }
            .log();
            let error = RuntimeError::protocol(&self.name, format!("{} while a pass is running", pass.label()));
            self.up.send(pass.done(Some(error)));
            return;
        }

        // A pass's Step arrives ahead of its data, so anything held here was
        // sent for an aborted earlier pass.
        for proxy in self.proxies.values_mut() {
            if proxy.clear() {
                StaleProxyDataDropped {
                    device: &self.name,
                    field: &proxy.source().to_string(),
                }
                .log();
            }
        }

        let mut state = PassState::new(pass);
        if let Some(error) = self.deferred_error.take() {
            self.abort(state, error);
            return;
        }
        match pass {
            Pass::Step => self.registers.flip(),
            Pass::Reset => {
                for index in 0..self.program.len() {
                    if let Err(failure) = self.registers.launch(&self.program[index], Pass::Reset) {
                        let error = self.annotate(&state, index, failure);
                        self.abort(state, error);
                        return;
                    }
                    state.remember(index);
                }
                state.recent.clear();
            }
        }
        self.advance(state);
    }

    /// Evaluates from the cursor until the pass completes or suspends.
    fn advance(&mut self, mut state: PassState) {
        while state.cursor < self.program.len() {
            let index = state.cursor;
            let started = Instant::now();
            if let Some(proxy) = self.proxies.get_mut(&index) {
                match proxy.on_step() {
                    Ok(ProxyStep::Pending) => {
                        self.state = DeviceState::Running(state);
                        return;
                    }
                    Ok(ProxyStep::Ready(data)) => {
                        if let Err(error) = self.load_proxy(index, &data) {
                            return self.abort(state, error);
                        }
                    }
                    Err(error) => return self.abort(state, error),
                }
            } else {
                if let Err(failure) = self.registers.launch(&self.program[index], Pass::Step) {
                    let error = self.annotate(&state, index, failure);
                    return self.abort(state, error);
                }
                if let KernelCategory::OutputProxy { source } = self.program[index].kernel.category {
                    if let Err(error) = self.export(index, source) {
                        return self.abort(state, error);
                    }
                }
            }
            state.record(index, started.elapsed());
            state.cursor += 1;
        }
        self.finish(state, None);
    }

    fn load_proxy(&mut self, index: usize, data: &FieldMemory) -> Result<(), RuntimeError> {
        let access = &self.program[index].outputs[0];
        let slot = self.registers.resolve(access.target);
        self.registers.load(slot, &access.field_type, data)
    }

    fn export(&self, index: usize, source: FieldRef) -> Result<(), RuntimeError> {
        let access = &self.program[index].inputs[0];
        let data = self
            .registers
            .snapshot(self.registers.resolve(access.target), &access.field_type)?;
        self.up.send(Report::FieldData { field: source, data });
        Ok(())
    }

    fn deliver(&mut self, field: FieldRef, data: FieldMemory) {
        let Some(&index) = self.proxy_index.get(&field) else {
            let error = RuntimeError::protocol(&self.name, format!("data for {field} which has no input proxy here"));
            return self.fail(error);
        };
        let Some(proxy) = self.proxies.get_mut(&index) else {
            return self.fail(RuntimeError::Internal(format!("input proxy {index} missing")));
        };
        match proxy.on_data(data) {
            Ok(None) => {}
            Ok(Some(data)) => self.resume(index, data),
            Err(error) => self.fail(error),
        }
    }

    fn resume(&mut self, index: usize, data: FieldMemory) {
        let DeviceState::Running(mut state) = mem::replace(&mut self.state, DeviceState::Idle) else {
            return self.fail(RuntimeError::Internal(format!(
                "input proxy {index} completed outside a pass"
            )));
        };
        if state.cursor != index {
            let error = RuntimeError::Internal(format!(
                "input proxy {index} completed while suspended at {}",
                state.cursor
            ));
            return self.abort(state, error);
        }
        let started = Instant::now();
        if let Err(error) = self.load_proxy(index, &data) {
            return self.abort(state, error);
        }
        state.record(index, started.elapsed());
        state.cursor += 1;
        self.advance(state);
    }

    /// Aborts the running pass with `error`, or keeps it for the next one.
    fn fail(&mut self, error: RuntimeError) {
        match mem::replace(&mut self.state, DeviceState::Idle) {
            DeviceState::Running(state) => self.abort(state, error),
            DeviceState::Idle => {
                CommandRejected {
                    component: &self.name,
                    command: "FieldData",
                    reason: &error.to_string(),
                }
                .log();
                self.deferred_error = Some(error);
            }
        }
    }

    fn annotate(&self, state: &PassState, index: usize, failure: LaunchFailure) -> RuntimeError {
        match failure {
            LaunchFailure::Runtime(error) => error,
            LaunchFailure::Kernel(source) => {
                let kernel = self.program[index].kernel.name.clone();
                let preceding: Vec<String> = state
                    .recent
                    .iter()
                    .map(|&i| self.program[i].kernel.name.clone())
                    .collect();
                KernelLaunchFailed {
                    device: &self.name,
                    kernel: &kernel,
                    preceding: &preceding,
                    error: &source,
                }
                .log();
                RuntimeError::KernelLaunch {
                    kernel,
                    preceding,
                    source,
                }
            }
        }
    }

    fn abort(&mut self, state: PassState, error: RuntimeError) {
        let mut flushed = 0;
        for index in state.cursor..self.program.len() {
            if let KernelCategory::OutputProxy { source } = self.program[index].kernel.category {
                if self.export(index, source).is_ok() {
                    flushed += 1;
                }
            }
        }
        if flushed > 0 {
            ExportsFlushed {
                device: &self.name,
                count: flushed,
            }
            .log();
        }
        // Data still on its way for the proxy we were waiting on is stale now.
        if let Some(proxy) = self.proxies.get_mut(&state.cursor) {
            proxy.clear();
        }
        self.finish(state, Some(error));
    }

    fn finish(&mut self, mut state: PassState, error: Option<RuntimeError>) {
        for (index, elapsed) in state.launched.drain(..) {
            self.stats[index].record(elapsed);
        }
        if state.pass == Pass::Step {
            self.steps += 1;
        }
        PassCompleted {
            device: &self.name,
            pass: state.pass.label(),
            kernels: state.cursor,
            duration: state.started.elapsed(),
            failed: error.is_some(),
        }
        .log();
        let profile = &self.options.profile;
        if state.pass == Pass::Step
            && profile.enabled
            && profile.interval_steps > 0
            && self.steps % profile.interval_steps == 0
        {
            self.log_profile();
        }
        self.state = DeviceState::Idle;
        self.up.send(state.pass.done(error));
    }

    fn log_profile(&self) {
        for (name, stats) in self.stats() {
            if stats.invocations == 0 {
                continue;
            }
            KernelProfile {
                device: &self.name,
                kernel: name,
                steps: self.steps,
                invocations: stats.invocations,
                total: stats.total,
                max: stats.max,
            }
            .log();
        }
    }

    fn probe(&self, field: FieldRef) -> Result<ProbeData, RuntimeError> {
        let binding = self.allocation.binding(field).ok_or(RuntimeError::UnknownField(field))?;
        let field_type = self.field_types.get(&field).ok_or(RuntimeError::UnknownField(field))?;
        let target = match binding {
            Binding::Latch { shared: true, .. } => return Err(RuntimeError::FieldNotProbeable(field)),
            Binding::Latch { latch, .. } => Target::Latch(latch),
            Binding::FlipFlop {
                flip_flop,
                role: FlipFlopRole::Slave,
            } => Target::Slave(flip_flop),
            Binding::FlipFlop { flip_flop, .. } => Target::Master(flip_flop),
        };
        let memory = self.registers.snapshot(self.registers.resolve(target), field_type)?;
        Ok(ProbeData { field, memory })
    }

    pub async fn run(mut self, mut mailbox: Mailbox, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                envelope = mailbox.recv() => match envelope {
                    Some(Envelope::Down(command)) => self.handle(command),
                    Some(Envelope::Up { report, .. }) => CommandRejected {
                        component: &self.name,
                        command: report.label(),
                        reason: "devices have no children",
                    }
                    .log(),
                    None => break,
                },
            }
        }
        SupervisorStopped { component: &self.name }.log();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::cpu::{AddOp, AddScalarOp, ConstantOp, RampSensorOp, RecurrenceOp};
    use crate::backends::stub::{CountingOp, FailingOp};
    use crate::circuit::test_support::{add_scalar, constant};
    use crate::circuit::{CircuitBuilder, DeviceAddress, KernelCircuit, KernelId};
    use crate::engine::allocator::QueueOrder;
    use crate::engine::partitioner::{partition, AllocationMode, Topology};
    use crate::engine::scheduler::schedule;
    use crate::supervisor::protocol::mailbox;
    use tokio::sync::oneshot;

    struct Rig {
        device: DeviceSupervisor,
        parent: Mailbox,
        pool: Arc<FieldMemoryPool>,
    }

    fn slot(memory_bytes: Option<u64>) -> DeviceSlot {
        DeviceSlot {
            address: DeviceAddress::new(0, 0),
            kind: DeviceKind::Accelerator,
            queue_order: QueueOrder::InOrder,
            memory_bytes,
        }
    }

    fn whole(circuit: KernelCircuit) -> Partition {
        let schedule = schedule(&circuit);
        Partition {
            device: DeviceAddress::new(0, 0),
            circuit,
            schedule,
        }
    }

    fn rig_for(partition: &Partition, slot: &DeviceSlot) -> Rig {
        let (parent_address, parent) = mailbox("node0");
        let pool = Arc::new(FieldMemoryPool::new());
        let device = DeviceSupervisor::new(
            slot,
            partition,
            &SupervisorOptions::default(),
            pool.clone(),
            parent_address.uplink(0),
        )
        .unwrap();
        Rig { device, parent, pool }
    }

    fn rig(circuit: KernelCircuit) -> Rig {
        rig_for(&whole(circuit), &slot(None))
    }

    impl Rig {
        fn run(&mut self, command: Command) -> Option<RuntimeError> {
            self.device.handle(command);
            self.done()
        }

        fn done(&mut self) -> Option<RuntimeError> {
            loop {
                match self.parent.try_recv().unwrap() {
                    Envelope::Up {
                        report: Report::StepDone(error) | Report::ResetDone(error),
                        ..
                    } => return error,
                    Envelope::Up {
                        report: Report::FieldData { .. },
                        ..
                    } => continue,
                    other => panic!("unexpected {other:?}"),
                }
            }
        }

        fn probe(&mut self, field: FieldRef) -> Result<Vec<f32>, RuntimeError> {
            let (reply, mut answer) = oneshot::channel();
            self.device.handle(Command::ProbeField { field, reply });
            answer.try_recv().unwrap().map(|probe| probe.memory.read().to_vec())
        }
    }

    fn counter() -> (KernelCircuit, FieldRef) {
        let t = FieldType::scalar();
        let mut builder = CircuitBuilder::new();
        let a = builder.recurrent("a", Arc::new(RecurrenceOp::new(0.0)), t.clone());
        let next = builder.kernel("next", Arc::new(AddScalarOp::new(1.0)), vec![a], t).unwrap();
        builder.feed(a, next).unwrap();
        (builder.build().unwrap(), a)
    }

    #[test]
    fn test_counter_counts_steps_after_reset() {
        let (circuit, a) = counter();
        let mut rig = rig(circuit);
        assert!(rig.run(Command::Reset).is_none());
        assert_eq!(rig.probe(a).unwrap(), vec![0.0]);
        for _ in 0..5 {
            assert!(rig.run(Command::Step).is_none());
        }
        assert_eq!(rig.probe(a).unwrap(), vec![5.0]);

        assert!(rig.run(Command::Reset).is_none());
        assert_eq!(rig.probe(a).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_sensor_consumers_see_previous_load() {
        let t = FieldType::scalar();
        let mut builder = CircuitBuilder::new();
        let ramp = builder.sensor("ramp", Arc::new(RampSensorOp::new(1.0, 1.0)), t.clone());
        let seen = builder.kernel("seen", Arc::new(AddScalarOp::new(0.0)), vec![ramp], t).unwrap();
        builder.probe(seen.kernel).unwrap();
        let mut rig = rig(builder.build().unwrap());

        rig.run(Command::Reset);
        assert_eq!(rig.probe(seen).unwrap(), vec![1.0]);
        // The first step still sees the load made during reset.
        rig.run(Command::Step);
        assert_eq!(rig.probe(seen).unwrap(), vec![1.0]);
        rig.run(Command::Step);
        assert_eq!(rig.probe(seen).unwrap(), vec![2.0]);
    }

    #[test]
    fn test_kernel_failure_names_preceding_launches() {
        let t = FieldType::scalar();
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("load", constant(1.0), t.clone());
        let b = builder.kernel("scale", add_scalar(1.0), vec![a], t.clone()).unwrap();
        let c = builder.kernel("shift", add_scalar(1.0), vec![b], t.clone()).unwrap();
        builder.kernel("explode", Arc::new(FailingOp::new("boom")), vec![c], t).unwrap();
        let mut rig = rig(builder.build().unwrap());

        match rig.run(Command::Step) {
            Some(RuntimeError::KernelLaunch { kernel, preceding, .. }) => {
                assert_eq!(kernel, "explode");
                assert_eq!(preceding, vec!["scale".to_string(), "shift".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        // The device stays usable.
        assert!(matches!(rig.run(Command::Step), Some(RuntimeError::KernelLaunch { .. })));
        assert!(!rig.device.is_suspended());
    }

    #[test]
    fn test_shared_latch_is_not_probeable() {
        let t = FieldType::scalar_field(&[4]);
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("a", constant(1.0), t.clone());
        let b = builder.kernel("b", add_scalar(1.0), vec![a], t.clone()).unwrap();
        let c = builder.kernel("c", add_scalar(1.0), vec![b], t.clone()).unwrap();
        let d = builder.kernel("d", add_scalar(1.0), vec![c], t).unwrap();
        let mut rig = rig(builder.build().unwrap());

        rig.run(Command::Step);
        assert!(matches!(rig.probe(b), Err(RuntimeError::FieldNotProbeable(_))));
        assert_eq!(rig.probe(d).unwrap(), vec![4.0; 4]);
        assert!(matches!(
            rig.probe(FieldRef::from(KernelId(99))),
            Err(RuntimeError::UnknownField(_))
        ));
    }

    #[test]
    fn test_unwritten_register_probes_as_zeros() {
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("a", constant(7.0), FieldType::scalar_field(&[3]));
        let mut rig = rig(builder.build().unwrap());
        assert_eq!(rig.probe(a).unwrap(), vec![0.0; 3]);
        rig.run(Command::Step);
        assert_eq!(rig.probe(a).unwrap(), vec![7.0; 3]);
    }

    #[test]
    fn test_out_of_memory_fails_construction() {
        let (circuit, _) = counter();
        let partition = whole(circuit);
        let (parent_address, _parent) = mailbox("node0");
        let err = DeviceSupervisor::new(
            &slot(Some(4)),
            &partition,
            &SupervisorOptions::default(),
            Arc::new(FieldMemoryPool::new()),
            parent_address.uplink(0),
        )
        .err()
        .unwrap();
        assert!(matches!(err, CompileError::OutOfDeviceMemory { .. }));
    }

    #[test]
    fn test_registers_return_to_pool_on_drop() {
        let (circuit, _) = counter();
        let mut rig = rig(circuit);
        rig.run(Command::Step);
        assert!(rig.pool.outstanding() > 0);
        let pool = rig.pool.clone();
        drop(rig);
        assert_eq!(pool.outstanding(), 0);
        assert!(pool.pooled() > 0);
    }

    #[test]
    fn test_stats_count_launches() {
        let counting = CountingOp::new();
        let (computes, _) = counting.counters();
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("a", constant(1.0), FieldType::scalar());
        builder
            .kernel("count", Arc::new(counting), vec![a], FieldType::scalar())
            .unwrap();
        let mut rig = rig(builder.build().unwrap());
        for _ in 0..3 {
            rig.run(Command::Step);
        }
        let stats = rig.device.stats();
        let (_, count) = stats.iter().find(|(name, _)| *name == "count").unwrap();
        assert_eq!(count.invocations, 3);
        assert_eq!(computes.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    /// Two partitions of `a(sensor) -> b(+1) -> c(+1)` with `b` pinned to a second device.
    fn split() -> (Vec<Partition>, Topology, FieldRef) {
        let t = FieldType::scalar();
        let mut builder = CircuitBuilder::new();
        let a = builder.sensor("a", Arc::new(RampSensorOp::new(10.0, 0.0)), t.clone());
        let b = builder.kernel("b", add_scalar(1.0), vec![a], t.clone()).unwrap();
        let c = builder.kernel("c", add_scalar(1.0), vec![b], t).unwrap();
        builder.place(a.kernel, DeviceAddress::new(0, 0)).unwrap();
        builder.place(b.kernel, DeviceAddress::new(0, 1)).unwrap();
        builder.place(c.kernel, DeviceAddress::new(0, 0)).unwrap();
        let topology = Topology::new(vec![(
            "node0".to_string(),
            vec![(QueueOrder::InOrder, None), (QueueOrder::InOrder, None)],
            false,
        )]);
        let plan = partition(&builder.build().unwrap(), AllocationMode::MultiDevice, &topology).unwrap();
        (plan.partitions, topology, c)
    }

    #[test]
    fn test_input_proxy_suspends_until_data_arrives() {
        let (partitions, topology, _) = split();
        let first = &partitions[0];
        let mut rig = rig_for(first, topology.device(first.device).unwrap());

        rig.device.handle(Command::Step);
        // The output proxy for `a` has run; the input proxy for `b` is waiting.
        let forwarded = match rig.parent.try_recv().unwrap() {
            Envelope::Up {
                report: Report::FieldData { field, data },
                ..
            } => (field, data),
            other => panic!("unexpected {other:?}"),
        };
        assert!(rig.device.is_suspended());
        assert!(rig.parent.try_recv().is_err());

        // The second device would compute b = a + 1 and send it back.
        let b_field = partitions[1]
            .circuit
            .kernels()
            .find(|k| k.name == "b")
            .map(|k| FieldRef::from(k.id))
            .unwrap();
        let b_data = FieldMemory::from_data(FieldType::scalar(), vec![forwarded.1.read()[0] + 1.0]).unwrap();
        rig.device.handle(Command::FieldData {
            field: b_field,
            data: b_data,
        });
        assert!(rig.done().is_none());
        assert!(!rig.device.is_suspended());
    }

    #[test]
    fn test_data_after_step_resumes_that_step() {
        let (partitions, topology, c) = split();
        let first = &partitions[0];
        let mut rig = rig_for(first, topology.device(first.device).unwrap());
        let b_field = partitions[1]
            .circuit
            .kernels()
            .find(|k| k.name == "b")
            .map(|k| FieldRef::from(k.id))
            .unwrap();

        rig.device.handle(Command::Step);
        rig.device.handle(Command::FieldData {
            field: b_field,
            data: FieldMemory::from_data(FieldType::scalar(), vec![41.0]).unwrap(),
        });
        assert!(rig.done().is_none());
        assert_eq!(rig.probe(c).unwrap(), vec![42.0]);
    }

    #[test]
    fn test_data_left_from_an_earlier_pass_is_dropped() {
        let (partitions, topology, c) = split();
        let first = &partitions[0];
        let mut rig = rig_for(first, topology.device(first.device).unwrap());
        let b_field = partitions[1]
            .circuit
            .kernels()
            .find(|k| k.name == "b")
            .map(|k| FieldRef::from(k.id))
            .unwrap();
        let data = |value: f32| FieldMemory::from_data(FieldType::scalar(), vec![value]).unwrap();

        rig.device.handle(Command::FieldData {
            field: b_field,
            data: data(99.0),
        });
        rig.device.handle(Command::Step);
        assert!(rig.device.is_suspended());

        rig.device.handle(Command::FieldData {
            field: b_field,
            data: data(41.0),
        });
        assert!(rig.done().is_none());
        assert_eq!(rig.probe(c).unwrap(), vec![42.0]);
    }

    #[test]
    fn test_data_for_a_later_proxy_waits_for_the_cursor() {
        let t = FieldType::scalar();
        let mut builder = CircuitBuilder::new();
        let a = builder.sensor("a", Arc::new(RampSensorOp::new(10.0, 0.0)), t.clone());
        let b = builder.kernel("b", add_scalar(1.0), vec![a], t.clone()).unwrap();
        let d = builder.kernel("d", add_scalar(2.0), vec![a], t.clone()).unwrap();
        let total = builder.kernel("total", Arc::new(AddOp), vec![b, d], t).unwrap();
        builder.place(a.kernel, DeviceAddress::new(0, 0)).unwrap();
        builder.place(b.kernel, DeviceAddress::new(0, 1)).unwrap();
        builder.place(d.kernel, DeviceAddress::new(0, 1)).unwrap();
        builder.place(total.kernel, DeviceAddress::new(0, 0)).unwrap();
        let topology = Topology::new(vec![(
            "node0".to_string(),
            vec![(QueueOrder::InOrder, None), (QueueOrder::InOrder, None)],
            false,
        )]);
        let plan = partition(&builder.build().unwrap(), AllocationMode::MultiDevice, &topology).unwrap();
        let first = plan
            .partitions
            .iter()
            .find(|p| p.device == DeviceAddress::new(0, 0))
            .unwrap();
        let waiting: Vec<FieldRef> = first
            .schedule
            .iter()
            .filter_map(|id| match first.circuit.kernel(id)?.category {
                KernelCategory::InputProxy { source } => Some(source),
                _ => None,
            })
            .collect();
        assert_eq!(waiting.len(), 2);
        let mut rig = rig_for(first, topology.device(first.device).unwrap());
        let data = |value: f32| FieldMemory::from_data(FieldType::scalar(), vec![value]).unwrap();

        rig.device.handle(Command::Step);
        assert!(rig.device.is_suspended());

        // The second proxy's data lands while the pass waits on the first.
        rig.device.handle(Command::FieldData {
            field: waiting[1],
            data: data(12.0),
        });
        assert!(rig.device.is_suspended());
        rig.device.handle(Command::FieldData {
            field: waiting[0],
            data: data(11.0),
        });
        assert!(rig.done().is_none());
        assert!(!rig.device.is_suspended());
        assert_eq!(rig.probe(total).unwrap(), vec![23.0]);
    }

    #[test]
    fn test_step_while_suspended_is_a_protocol_violation() {
        let (partitions, topology, _) = split();
        let first = &partitions[0];
        let mut rig = rig_for(first, topology.device(first.device).unwrap());
        rig.device.handle(Command::Step);
        assert!(matches!(
            rig.run(Command::Step),
            Some(RuntimeError::ProtocolViolation { .. })
        ));
        assert!(rig.device.is_suspended());
    }

    #[test]
    fn test_duplicate_data_aborts_the_running_pass() {
        let (partitions, topology, _) = split();
        let second = &partitions[1];
        let mut rig = rig_for(second, topology.device(second.device).unwrap());
        let a_field = second
            .circuit
            .kernels()
            .find_map(|k| match k.category {
                KernelCategory::InputProxy { source } => Some(source),
                _ => None,
            })
            .unwrap();
        let data = || FieldMemory::from_data(FieldType::scalar(), vec![1.0]).unwrap();

        // Idle: the duplicate is remembered and fails the next pass.
        rig.device.handle(Command::FieldData { field: a_field, data: data() });
        rig.device.handle(Command::FieldData { field: a_field, data: data() });
        assert!(matches!(
            rig.run(Command::Step),
            Some(RuntimeError::ProtocolViolation { .. })
        ));
        // The stale buffer was dropped; a clean step works again.
        rig.device.handle(Command::Step);
        rig.device.handle(Command::FieldData { field: a_field, data: data() });
        assert!(rig.done().is_none());
    }

    #[test]
    fn test_abort_flushes_unsent_exports() {
        let t = FieldType::scalar();
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("a", Arc::new(ConstantOp::new(1.0)), t.clone());
        let bad = builder
            .kernel("bad", Arc::new(FailingOp::new("boom")), vec![a], t.clone())
            .unwrap();
        let fwd = builder.kernel("fwd", add_scalar(1.0), vec![bad], t.clone()).unwrap();
        let far = builder.kernel("far", add_scalar(1.0), vec![fwd], t).unwrap();
        builder.place(a.kernel, DeviceAddress::new(0, 0)).unwrap();
        builder.place(bad.kernel, DeviceAddress::new(0, 0)).unwrap();
        builder.place(fwd.kernel, DeviceAddress::new(0, 0)).unwrap();
        builder.place(far.kernel, DeviceAddress::new(0, 1)).unwrap();
        let topology = Topology::new(vec![(
            "node0".to_string(),
            vec![(QueueOrder::InOrder, None), (QueueOrder::InOrder, None)],
            false,
        )]);
        let plan = partition(&builder.build().unwrap(), AllocationMode::MultiDevice, &topology).unwrap();
        let first = &plan.partitions[0];
        let mut rig = rig_for(first, topology.device(first.device).unwrap());

        rig.device.handle(Command::Step);
        match rig.parent.try_recv().unwrap() {
            Envelope::Up {
                report: Report::FieldData { field, .. },
                ..
            } => assert_eq!(field, fwd),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(rig.done(), Some(RuntimeError::KernelLaunch { .. })));
    }
}
