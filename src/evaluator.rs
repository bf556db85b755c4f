// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! External façade over the supervision hierarchy.
//!
//! The [`Evaluator`] turns the message protocol into request/reply calls.
//! Every wait is bounded: a call that outlives its timeout returns
//! [`RuntimeError::Timeout`], and the next call waits for the owed reply
//! before sending anything, so a reply is never credited to the wrong call. The first step or probe on a circuit that
//! was never reset issues a reset first, since freshly allocated registers
//! hold nothing meaningful.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use the_cogwheel::backends::cpu::{AddScalarOp, RecurrenceOp};
//! use the_cogwheel::circuit::CircuitBuilder;
//! use the_cogwheel::engine::Topology;
//! use the_cogwheel::evaluator::{Evaluator, Timeouts};
//! use the_cogwheel::memory::FieldType;
//! use the_cogwheel::supervisor::SupervisorOptions;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = CircuitBuilder::new();
//! let count = builder.recurrent("count", Arc::new(RecurrenceOp::new(0.0)), FieldType::scalar());
//! let next = builder.kernel("next", Arc::new(AddScalarOp::new(1.0)), vec![count], FieldType::scalar())?;
//! builder.feed(count, next)?;
//! let circuit = builder.build()?;
//!
//! let evaluator = Evaluator::start(&circuit, &Topology::single(), SupervisorOptions::default(), Timeouts::default());
//! evaluator.step_n(5).await?;
//! assert_eq!(evaluator.probe(count).await?.read(), &[5.0]);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::circuit::{FieldRef, KernelCircuit};
use crate::engine::partitioner::Topology;
use crate::errors::RuntimeError;
use crate::memory::{FieldMemory, FieldMemoryPool};
use crate::observability::messages::evaluator::{
    EvaluatorStarted, ImplicitReset, LateReplySettled, OperationTimedOut, RunStopped, UnexpectedMessage,
};
use crate::observability::messages::StructuredLog;
use crate::supervisor::protocol::{mailbox, Address, Command, Envelope, Mailbox, Pass, ProbeData, Report};
use crate::supervisor::{ClusterSupervisor, SupervisorOptions};

/// Upper bounds on how long each call waits for the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    pub step: Duration,
    pub probe: Duration,
    pub reset: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(300),
            probe: Duration::from_secs(300),
            reset: Duration::from_secs(1200),
        }
    }
}

/// The evaluator's link to the top of the hierarchy.
#[async_trait]
pub trait SupervisorHandle: Send {
    fn send(&mut self, command: Command) -> Result<(), RuntimeError>;

    /// The next report from the hierarchy, or `None` once it has stopped.
    async fn next_report(&mut self) -> Option<Report>;
}

/// Handle onto a spawned [`ClusterSupervisor`].
pub struct ClusterHandle {
    cluster: Address,
    reports: Mailbox,
}

#[async_trait]
impl SupervisorHandle for ClusterHandle {
    fn send(&mut self, command: Command) -> Result<(), RuntimeError> {
        self.cluster.send(command)
    }

    async fn next_report(&mut self) -> Option<Report> {
        loop {
            match self.reports.recv().await? {
                Envelope::Up { report, .. } => return Some(report),
                Envelope::Down(command) => UnexpectedMessage {
                    received: command.label(),
                }
                .log(),
            }
        }
    }
}

struct Session {
    handle: Box<dyn SupervisorHandle>,
    reset_done: bool,
    /// Pass whose reply is still owed for a call that timed out.
    overdue: Option<Pass>,
    time: u64,
}

impl Session {
    async fn pass(&mut self, pass: Pass, after: Duration) -> Result<(), RuntimeError> {
        self.settle(pass, after).await?;
        self.handle.send(pass.command())?;
        match tokio::time::timeout(after, self.next_done()).await {
            Ok(done) => {
                let (completed, error) = done?;
                if completed != pass {
                    return Err(RuntimeError::protocol(
                        "evaluator",
                        format!("{} completion while waiting for {}", completed.label(), pass.label()),
                    ));
                }
                error.map_or(Ok(()), Err)
            }
            Err(_) => {
                self.overdue = Some(pass);
                Err(Self::timed_out(pass.label(), after))
            }
        }
    }

    /// Waits out the reply owed for an earlier timed-out pass, so the
    /// hierarchy is idle before `pass` is sent. The late outcome still moves
    /// the clock.
    async fn settle(&mut self, pass: Pass, after: Duration) -> Result<(), RuntimeError> {
        let Some(owed) = self.overdue else {
            return Ok(());
        };
        let (completed, error) = match tokio::time::timeout(after, self.next_done()).await {
            Ok(done) => done?,
            Err(_) => return Err(Self::timed_out(pass.label(), after)),
        };
        self.overdue = None;
        if completed != owed {
            return Err(RuntimeError::protocol(
                "evaluator",
                format!("{} completion while {} was owed", completed.label(), owed.label()),
            ));
        }
        LateReplySettled {
            report: completed.label(),
            failed: error.is_some(),
        }
        .log();
        if error.is_none() {
            match completed {
                Pass::Step => self.time += 1,
                Pass::Reset => {
                    self.reset_done = true;
                    self.time = 0;
                }
            }
        }
        Ok(())
    }

    async fn next_done(&mut self) -> Result<(Pass, Option<RuntimeError>), RuntimeError> {
        loop {
            let report = self
                .handle
                .next_report()
                .await
                .ok_or_else(|| RuntimeError::SupervisorGone("cluster".to_string()))?;
            match report {
                Report::StepDone(error) => return Ok((Pass::Step, error)),
                Report::ResetDone(error) => return Ok((Pass::Reset, error)),
                Report::FieldData { .. } => UnexpectedMessage { received: "field data" }.log(),
            }
        }
    }

    fn timed_out(operation: &'static str, after: Duration) -> RuntimeError {
        OperationTimedOut { operation, after }.log();
        RuntimeError::Timeout { operation, after }
    }

    async fn reset(&mut self, timeouts: &Timeouts) -> Result<(), RuntimeError> {
        self.pass(Pass::Reset, timeouts.reset).await?;
        self.reset_done = true;
        self.time = 0;
        Ok(())
    }

    async fn ensure_reset(&mut self, operation: &str, timeouts: &Timeouts) -> Result<(), RuntimeError> {
        if !self.reset_done {
            ImplicitReset { operation }.log();
            self.reset(timeouts).await?;
        }
        Ok(())
    }

    async fn step(&mut self, timeouts: &Timeouts) -> Result<(), RuntimeError> {
        self.ensure_reset("step", timeouts).await?;
        self.pass(Pass::Step, timeouts.step).await?;
        self.time += 1;
        Ok(())
    }

    async fn probe(&mut self, field: FieldRef, timeouts: &Timeouts) -> Result<ProbeData, RuntimeError> {
        self.ensure_reset("probe", timeouts).await?;
        let (reply, answer) = oneshot::channel();
        self.handle.send(Command::ProbeField { field, reply })?;
        match tokio::time::timeout(timeouts.probe, answer).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RuntimeError::SupervisorGone("cluster".to_string())),
            Err(_) => Err(Self::timed_out("probe", timeouts.probe)),
        }
    }
}

struct RunControl {
    stop: CancellationToken,
    task: JoinHandle<Result<u64, RuntimeError>>,
}

pub struct Evaluator {
    session: Arc<Mutex<Session>>,
    timeouts: Timeouts,
    shutdown: CancellationToken,
    running: std::sync::Mutex<Option<RunControl>>,
}

impl Evaluator {
    /// Spawns the supervision hierarchy for `circuit`. Must be called from
    /// within a tokio runtime.
    pub fn start(circuit: &KernelCircuit, topology: &Topology, options: SupervisorOptions, timeouts: Timeouts) -> Self {
        let shutdown = CancellationToken::new();
        let (parent, reports) = mailbox("evaluator");
        let pool = Arc::new(FieldMemoryPool::new());
        let cluster = ClusterSupervisor::spawn(circuit, topology, &options, pool, parent.uplink(0), &shutdown);
        EvaluatorStarted {
            mode: options.mode.label(),
            kernels: circuit.len(),
            nodes: topology.nodes.len(),
        }
        .log();
        let mut evaluator = Self::with_handle(Box::new(ClusterHandle { cluster, reports }), timeouts);
        evaluator.shutdown = shutdown;
        evaluator
    }

    pub fn with_handle(handle: Box<dyn SupervisorHandle>, timeouts: Timeouts) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session {
                handle,
                reset_done: false,
                overdue: None,
                time: 0,
            })),
            timeouts,
            shutdown: CancellationToken::new(),
            running: std::sync::Mutex::new(None),
        }
    }

    pub async fn reset(&self) -> Result<(), RuntimeError> {
        self.session.lock().await.reset(&self.timeouts).await
    }

    pub async fn step(&self) -> Result<(), RuntimeError> {
        self.session.lock().await.step(&self.timeouts).await
    }

    /// Steps `count` times, stopping at the first failure.
    pub async fn step_n(&self, count: u64) -> Result<(), RuntimeError> {
        let mut session = self.session.lock().await;
        for _ in 0..count {
            session.step(&self.timeouts).await?;
        }
        Ok(())
    }

    /// Steps completed since the last reset.
    pub async fn time(&self) -> u64 {
        self.session.lock().await.time
    }

    /// A copy of `field` as of the last completed step.
    pub async fn probe(&self, field: FieldRef) -> Result<FieldMemory, RuntimeError> {
        let probe = self.session.lock().await.probe(field, &self.timeouts).await?;
        Ok(probe.memory)
    }

    /// Copies `field` into `destination`, then hands it to `callback`.
    pub async fn read_field<F>(&self, field: FieldRef, destination: &mut FieldMemory, callback: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(&FieldMemory),
    {
        let probe = self.session.lock().await.probe(field, &self.timeouts).await?;
        probe.memory.copy_to(destination)?;
        callback(destination);
        Ok(())
    }

    /// Steps continuously in the background until [`Evaluator::stop`] or a failure.
    pub fn run(&self) -> Result<(), RuntimeError> {
        let mut running = self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if running.as_ref().is_some_and(|control| !control.task.is_finished()) {
            return Err(RuntimeError::protocol("evaluator", "run while already running"));
        }
        let stop = self.shutdown.child_token();
        let session = self.session.clone();
        let timeouts = self.timeouts;
        let token = stop.clone();
        let task = tokio::spawn(async move {
            let mut steps = 0;
            while !token.is_cancelled() {
                session.lock().await.step(&timeouts).await?;
                steps += 1;
            }
            Ok(steps)
        });
        *running = Some(RunControl { stop, task });
        Ok(())
    }

    /// Ends a free run and returns the number of steps it completed.
    pub async fn stop(&self) -> Result<u64, RuntimeError> {
        let control = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| RuntimeError::protocol("evaluator", "stop without run"))?;
        control.stop.cancel();
        let outcome = control
            .task
            .await
            .map_err(|e| RuntimeError::Internal(format!("run task failed: {e}")))?;
        match &outcome {
            Ok(steps) => RunStopped {
                steps: *steps,
                failed: false,
            }
            .log(),
            Err(_) => RunStopped {
                steps: self.time().await,
                failed: true,
            }
            .log(),
        }
        outcome
    }
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::cpu::{AddOp, AddScalarOp, ConstantOp, RampSensorOp, RecurrenceOp, ScaleOp};
    use crate::backends::stub::{FailingOp, SlowOp};
    use crate::circuit::{CircuitBuilder, DeviceAddress};
    use crate::engine::allocator::{allocate, AllocatorOptions, Binding, QueueOrder};
    use crate::engine::partitioner::AllocationMode;
    use crate::engine::scheduler::schedule;
    use std::sync::atomic::Ordering;
    use crate::memory::{BufferKind, FieldType};
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    fn quick() -> Timeouts {
        Timeouts {
            step: Duration::from_millis(50),
            probe: Duration::from_millis(50),
            reset: Duration::from_millis(50),
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

    fn single(circuit: &KernelCircuit) -> Evaluator {
        Evaluator::start(circuit, &Topology::single(), SupervisorOptions::default(), Timeouts::default())
    }

    /// Never answers anything.
    struct Silent;

    #[async_trait]
    impl SupervisorHandle for Silent {
        fn send(&mut self, _command: Command) -> Result<(), RuntimeError> {
            Ok(())
        }

        async fn next_report(&mut self) -> Option<Report> {
            std::future::pending().await
        }
    }

    /// Answers each pass after the next scripted delay.
    struct Delayed {
        delays: VecDeque<Duration>,
        sender: mpsc::UnboundedSender<Report>,
        receiver: mpsc::UnboundedReceiver<Report>,
    }

    impl Delayed {
        fn new(delays: &[u64]) -> Self {
            let (sender, receiver) = mpsc::unbounded_channel();
            Self {
                delays: delays.iter().map(|ms| Duration::from_millis(*ms)).collect(),
                sender,
                receiver,
            }
        }
    }

    #[async_trait]
    impl SupervisorHandle for Delayed {
        fn send(&mut self, command: Command) -> Result<(), RuntimeError> {
            let report = match command {
                Command::Step => Report::StepDone(None),
                Command::Reset => Report::ResetDone(None),
                _ => return Ok(()),
            };
            let delay = self.delays.pop_front().unwrap_or_default();
            let sender = self.sender.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = sender.send(report);
            });
            Ok(())
        }

        async fn next_report(&mut self) -> Option<Report> {
            self.receiver.recv().await
        }
    }

    #[tokio::test]
    async fn test_counter_reads_five_after_five_steps() {
        let (circuit, a) = counter();
        let evaluator = single(&circuit);
        evaluator.step_n(5).await.unwrap();
        assert_eq!(evaluator.probe(a).await.unwrap().read(), &[5.0]);
        assert_eq!(evaluator.time().await, 5);

        evaluator.reset().await.unwrap();
        assert_eq!(evaluator.time().await, 0);
        assert_eq!(evaluator.probe(a).await.unwrap().read(), &[0.0]);
    }

    #[tokio::test]
    async fn test_probe_before_any_step_resets_implicitly() {
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("a", Arc::new(ConstantOp::new(10.0)), FieldType::scalar_field(&[2]));
        let circuit = builder.build().unwrap();
        let evaluator = single(&circuit);
        assert_eq!(evaluator.probe(a).await.unwrap().read(), &[10.0, 10.0]);
    }

    #[tokio::test]
    async fn test_chain_with_sharing_stays_consistent() {
        let t = FieldType::scalar_field(&[16]);
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("a", Arc::new(ConstantOp::new(10.0)), t.clone());
        let x = builder.kernel("x", Arc::new(AddScalarOp::new(1.0)), vec![a], t.clone()).unwrap();
        let y = builder.kernel("y", Arc::new(ScaleOp::new(2.0)), vec![x], t.clone()).unwrap();
        let z = builder.kernel("z", Arc::new(ScaleOp::new(0.5)), vec![y], t.clone()).unwrap();
        let b = builder.kernel("b", Arc::new(AddScalarOp::new(0.0)), vec![z], t.clone()).unwrap();
        let circuit = builder.build().unwrap();

        // x is dead once y has run, so z reuses its latch.
        let allocation = allocate(&circuit, &schedule(&circuit), AllocatorOptions::default()).unwrap();
        match (allocation.binding(x), allocation.binding(z)) {
            (
                Some(Binding::Latch {
                    latch: first,
                    shared: true,
                }),
                Some(Binding::Latch {
                    latch: second,
                    shared: true,
                }),
            ) => assert_eq!(first, second),
            other => panic!("unexpected bindings {other:?}"),
        }

        let evaluator = single(&circuit);
        let expected = FieldMemory::from_data(t.clone(), vec![11.0; 16]).unwrap();
        for _ in 0..3 {
            evaluator.step().await.unwrap();
            assert_eq!(evaluator.probe(b).await.unwrap().compare_linf(&expected), 0.0);
            assert_eq!(evaluator.probe(a).await.unwrap().read(), &[10.0; 16]);
            assert!(matches!(
                evaluator.probe(x).await,
                Err(RuntimeError::FieldNotProbeable(_))
            ));
        }
        assert_eq!(evaluator.time().await, 3);
    }

    #[tokio::test]
    async fn test_deep_chain_with_shared_latches() {
        let t = FieldType::scalar_field(&[8]);
        let mut builder = CircuitBuilder::new();
        let mut last = builder.constant("a", Arc::new(ConstantOp::new(1.0)), t.clone());
        let first = last;
        for i in 0..6 {
            last = builder
                .kernel(format!("k{i}"), Arc::new(AddScalarOp::new(1.0)), vec![last], t.clone())
                .unwrap();
        }
        let sum = builder.kernel("sum", Arc::new(AddOp), vec![last, first], t).unwrap();
        let circuit = builder.build().unwrap();
        let evaluator = single(&circuit);

        for _ in 0..3 {
            evaluator.step().await.unwrap();
            assert_eq!(evaluator.probe(sum).await.unwrap().read(), &[8.0; 8]);
        }
    }

    #[tokio::test]
    async fn test_silent_supervisor_times_out() {
        let evaluator = Evaluator::with_handle(Box::new(Silent), quick());
        let started = tokio::time::Instant::now();
        match evaluator.step().await {
            Err(RuntimeError::Timeout { operation, after }) => {
                // The implicit reset is what times out first.
                assert_eq!(operation, "reset");
                assert_eq!(after, Duration::from_millis(50));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_step_timeout_after_successful_reset() {
        let evaluator = Evaluator::with_handle(Box::new(Delayed::new(&[0, 500])), quick());
        evaluator.reset().await.unwrap();
        assert!(matches!(
            evaluator.step().await,
            Err(RuntimeError::Timeout { operation: "step", .. })
        ));
        assert_eq!(evaluator.time().await, 0);
    }

    #[tokio::test]
    async fn test_late_reply_is_settled_before_the_next_pass() {
        let evaluator = Evaluator::with_handle(Box::new(Delayed::new(&[0, 100, 0])), quick());
        evaluator.reset().await.unwrap();
        assert!(evaluator.step().await.is_err());
        tokio::time::sleep(Duration::from_millis(150)).await;

        // The late step still completed, then the new one ran.
        evaluator.step().await.unwrap();
        assert_eq!(evaluator.time().await, 2);
    }

    #[tokio::test]
    async fn test_reply_still_owed_times_out_the_next_call() {
        let evaluator = Evaluator::with_handle(Box::new(Delayed::new(&[0, 500, 0])), quick());
        evaluator.reset().await.unwrap();
        assert!(evaluator.step().await.is_err());
        assert!(matches!(
            evaluator.step().await,
            Err(RuntimeError::Timeout { operation: "step", .. })
        ));
        tokio::time::sleep(Duration::from_millis(500)).await;
        evaluator.step().await.unwrap();
        assert_eq!(evaluator.time().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_step_after_timeout_runs_on_the_hierarchy() {
        let t = FieldType::scalar();
        let slow = SlowOp::new(Arc::new(AddScalarOp::new(1.0)), Duration::from_millis(300));
        let delay = slow.switch();
        let mut builder = CircuitBuilder::new();
        let a = builder.recurrent("a", Arc::new(RecurrenceOp::new(0.0)), t.clone());
        let next = builder.kernel("next", Arc::new(slow), vec![a], t).unwrap();
        builder.feed(a, next).unwrap();
        let circuit = builder.build().unwrap();
        let timeouts = Timeouts {
            step: Duration::from_millis(250),
            probe: Duration::from_secs(2),
            reset: Duration::from_secs(2),
        };
        let evaluator = Evaluator::start(&circuit, &Topology::single(), SupervisorOptions::default(), timeouts);

        delay.store(false, Ordering::SeqCst);
        evaluator.reset().await.unwrap();
        delay.store(true, Ordering::SeqCst);
        assert!(matches!(
            evaluator.step().await,
            Err(RuntimeError::Timeout { operation: "step", .. })
        ));

        delay.store(false, Ordering::SeqCst);
        evaluator.step().await.unwrap();
        assert_eq!(evaluator.time().await, 2);
        assert_eq!(evaluator.probe(a).await.unwrap().read(), &[2.0]);
    }

    #[tokio::test]
    async fn test_out_of_memory_is_reported_on_every_call() {
        let (circuit, a) = counter();
        let topology = Topology::new(vec![("node0".to_string(), vec![(QueueOrder::InOrder, Some(4))], false)]);
        let evaluator = Evaluator::start(&circuit, &topology, SupervisorOptions::default(), Timeouts::default());

        for _ in 0..2 {
            assert!(matches!(evaluator.reset().await, Err(RuntimeError::Initialization { .. })));
        }
        assert!(matches!(evaluator.step().await, Err(RuntimeError::Initialization { .. })));
        assert!(matches!(evaluator.probe(a).await, Err(RuntimeError::Initialization { .. })));
    }

    #[tokio::test]
    async fn test_kernel_failure_is_annotated() {
        let t = FieldType::scalar();
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("a", Arc::new(ConstantOp::new(1.0)), t.clone());
        let b = builder.kernel("b", Arc::new(ScaleOp::new(2.0)), vec![a], t.clone()).unwrap();
        builder.kernel("c", Arc::new(FailingOp::new("boom")), vec![b], t).unwrap();
        let circuit = builder.build().unwrap();
        let evaluator = single(&circuit);

        match evaluator.step().await {
            Err(RuntimeError::KernelLaunch {
                kernel,
                preceding,
                source,
            }) => {
                assert_eq!(kernel, "c");
                assert_eq!(preceding, vec!["a".to_string(), "b".to_string()]);
                assert!(source.to_string().contains("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(evaluator.time().await, 0);
    }

    #[tokio::test]
    async fn test_multi_device_end_to_end() {
        let t = FieldType::scalar_field(&[4]);
        let mut builder = CircuitBuilder::new();
        let ramp = builder.sensor("ramp", Arc::new(RampSensorOp::new(0.0, 1.0)), t.clone());
        let bias = builder.constant("bias", Arc::new(ConstantOp::new(100.0)), t.clone());
        let doubled = builder.kernel("doubled", Arc::new(ScaleOp::new(2.0)), vec![ramp], t.clone()).unwrap();
        let total = builder.kernel("total", Arc::new(AddOp), vec![doubled, bias], t).unwrap();
        builder.place(ramp.kernel, DeviceAddress::new(0, 0)).unwrap();
        builder.place(bias.kernel, DeviceAddress::new(0, 0)).unwrap();
        builder.place(doubled.kernel, DeviceAddress::new(0, 1)).unwrap();
        builder.place(total.kernel, DeviceAddress::new(0, 0)).unwrap();
        let circuit = builder.build().unwrap();

        let topology = Topology::new(vec![(
            "node0".to_string(),
            vec![(QueueOrder::InOrder, None), (QueueOrder::OutOfOrder, None)],
            true,
        )]);
        let options = SupervisorOptions {
            mode: AllocationMode::MultiDevice,
            ..SupervisorOptions::default()
        };
        let evaluator = Evaluator::start(&circuit, &topology, options, Timeouts::default());

        // Reset loads 0; step n sees load n - 1.
        evaluator.step_n(3).await.unwrap();
        assert_eq!(evaluator.probe(total).await.unwrap().read(), &[104.0; 4]);
    }

    #[tokio::test]
    async fn test_cluster_end_to_end() {
        let t = FieldType::scalar();
        let mut builder = CircuitBuilder::new();
        let a = builder.recurrent("a", Arc::new(RecurrenceOp::new(0.0)), t.clone());
        let next = builder.kernel("next", Arc::new(AddScalarOp::new(1.0)), vec![a], t.clone()).unwrap();
        builder.feed(a, next).unwrap();
        let remote = builder.kernel("remote", Arc::new(ScaleOp::new(10.0)), vec![a], t.clone()).unwrap();
        let back = builder.kernel("back", Arc::new(AddOp), vec![remote, a], t).unwrap();
        builder.place(a.kernel, DeviceAddress::new(0, 0)).unwrap();
        builder.place(remote.kernel, DeviceAddress::new(1, 0)).unwrap();
        builder.place(back.kernel, DeviceAddress::new(0, 0)).unwrap();
        let circuit = builder.build().unwrap();

        let topology = Topology::new(vec![
            ("node0".to_string(), vec![(QueueOrder::InOrder, None)], false),
            ("node1".to_string(), vec![(QueueOrder::InOrder, None)], false),
        ]);
        let options = SupervisorOptions {
            mode: AllocationMode::Cluster,
            buffer_kind: BufferKind::Pinned,
            ..SupervisorOptions::default()
        };
        let evaluator = Evaluator::start(&circuit, &topology, options, Timeouts::default());

        evaluator.step_n(4).await.unwrap();
        assert_eq!(evaluator.probe(a).await.unwrap().read(), &[4.0]);
        assert_eq!(evaluator.probe(back).await.unwrap().read(), &[44.0]);
    }

    #[tokio::test]
    async fn test_read_field_copies_and_calls_back() {
        let (circuit, a) = counter();
        let evaluator = single(&circuit);
        evaluator.step_n(2).await.unwrap();

        let mut destination = FieldMemory::new(FieldType::scalar(), BufferKind::Direct);
        let mut seen = Vec::new();
        evaluator
            .read_field(a, &mut destination, |memory| seen.extend_from_slice(memory.read()))
            .await
            .unwrap();
        assert_eq!(destination.read(), &[2.0]);
        assert_eq!(seen, vec![2.0]);

        let mut wrong = FieldMemory::new(FieldType::scalar_field(&[3]), BufferKind::Direct);
        assert!(matches!(
            evaluator.read_field(a, &mut wrong, |_| {}).await,
            Err(RuntimeError::Memory(_))
        ));
    }

    #[tokio::test]
    async fn test_run_until_stopped() {
        let (circuit, a) = counter();
        let evaluator = single(&circuit);
        evaluator.run().unwrap();
        assert!(evaluator.run().is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let steps = evaluator.stop().await.unwrap();
        assert!(steps > 0);
        assert_eq!(evaluator.time().await, steps);
        assert_eq!(evaluator.probe(a).await.unwrap().read(), &[steps as f32]);
        assert!(evaluator.stop().await.is_err());
    }
}
