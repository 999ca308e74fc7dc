// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduling policy and the process table it is applied to.
//!
//! The scheduler is driven from outside by calls standing in for the
//! systick interrupt (`tick`) and for the kernel calls ukProcs make. Time
//! only advances on `tick`, which makes runs reproducible.

use ukabi::{
    Asid, BlockReason, CleanupOutcome, Options, Priority, ProcId, ProcState,
    SchedState,
};

use crate::err::{FatalError, ProcError, SchedulingTimeout, SpawnError};
use crate::proc::{self, Charge, Proc};
use crate::shbuf::SharedBufferTable;
use crate::store::DescriptorStore;
use crate::time::Timestamp;

/// Scheduling parameters of a session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SchedulingPolicy {
    /// Least important priority in use.
    pub priority_max: Priority,
    /// Systicks of CPU a terminating process gets to clean up.
    pub cleanup_quantum: u32,
    /// Longest run of idle systicks tolerated; zero means unbounded.
    pub idle_duration_max: u32,
}

impl SchedulingPolicy {
    pub fn from_options(options: &Options) -> Self {
        Self {
            priority_max: Priority(options.priority_max),
            cleanup_quantum: options.cleanup_quantum,
            idle_duration_max: options.idle_duration_max,
        }
    }

    pub fn idle_watchdog(&self) -> Option<u32> {
        (self.idle_duration_max != 0).then_some(self.idle_duration_max)
    }
}

pub struct Scheduler<'s> {
    store: &'s DescriptorStore,
    policy: SchedulingPolicy,
    procs: Vec<Option<Proc<'s>>>,
    /// Generation of each slot, bumped each time the slot is reused.
    generations: Vec<u8>,
    /// Slot of the process holding the CPU.
    current: Option<usize>,
    now: Timestamp,
    /// Consecutive systicks with nothing to run.
    idle_run: u32,
    next_queue_pos: u64,
    buffers: SharedBufferTable<'s>,
}

impl<'s> Scheduler<'s> {
    /// Creates a scheduler with an empty process table of
    /// `options.ukproc_count_max` slots.
    pub fn new(store: &'s DescriptorStore, options: &Options) -> Self {
        let slots = options.ukproc_count_max as usize;
        Self {
            store,
            policy: SchedulingPolicy::from_options(options),
            procs: (0..slots).map(|_| None).collect(),
            generations: vec![0; slots],
            current: None,
            now: Timestamp::ZERO,
            idle_run: 0,
            next_queue_pos: 0,
            buffers: SharedBufferTable::from_store(store, options),
        }
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn idle_run(&self) -> u32 {
        self.idle_run
    }

    /// The process holding the CPU, if any.
    pub fn current(&self) -> Option<ProcId> {
        let slot = self.current?;
        self.procs.get(slot)?.as_ref().map(Proc::id)
    }

    pub fn proc(&self, id: ProcId) -> Option<&Proc<'s>> {
        self.procs
            .get(id.slot())?
            .as_ref()
            .filter(|p| p.id() == id)
    }

    pub fn state(&self, id: ProcId) -> Option<ProcState> {
        self.proc(id).map(Proc::state)
    }

    /// The session's shared buffers. Buffers managed by a ukProc return to
    /// their owner when it terminates.
    pub fn shared_buffers(&self) -> &SharedBufferTable<'s> {
        &self.buffers
    }

    pub fn shared_buffers_mut(&mut self) -> &mut SharedBufferTable<'s> {
        &mut self.buffers
    }

    /// Processes that have not terminated.
    pub fn live(&self) -> impl Iterator<Item = &Proc<'s>> {
        self.procs
            .iter()
            .flatten()
            .filter(|p| !p.state().is_terminated())
    }

    pub fn find(&self, asid: Asid) -> Option<ProcId> {
        self.live().find(|p| p.asid() == asid).map(Proc::id)
    }

    fn take_queue_pos(&mut self) -> u64 {
        let pos = self.next_queue_pos;
        self.next_queue_pos += 1;
        pos
    }

    /// Creates a Ready ukProc for the ukApp `asid`.
    ///
    /// A ukApp has at most one live ukProc; a slot held by a terminated
    /// process is reused.
    pub fn instantiate(&mut self, asid: Asid) -> Result<ProcId, SpawnError> {
        let store: &'s DescriptorStore = self.store;
        let desc = store.get(asid).ok_or(SpawnError::UnknownApp(asid))?;

        if self.find(asid).is_some() {
            return Err(SpawnError::AlreadyLive(asid));
        }

        let slot = self
            .procs
            .iter()
            .position(|p| match p {
                None => true,
                Some(p) => p.state().is_terminated(),
            })
            .ok_or(SpawnError::NoFreeSlot)?;
        if self.procs[slot].is_some() {
            self.generations[slot] = self.generations[slot].wrapping_add(1);
        }

        // Slot counts are bounded by the ukProc constraint, well below 256.
        let id = ProcId::for_slot_and_gen(slot as u8, self.generations[slot]);
        let pos = self.take_queue_pos();
        self.procs[slot] = Some(Proc::from_descriptor(id, asid, desc, pos));
        log::debug!("{id} instantiated for ukApp `{}`", desc.name);
        Ok(id)
    }

    fn live_mut(&mut self, id: ProcId) -> Result<&mut Proc<'s>, ProcError> {
        match self.procs.get_mut(id.slot()) {
            Some(Some(p)) if p.id() == id && !p.state().is_terminated() => Ok(p),
            _ => Err(ProcError::Stale(id)),
        }
    }

    fn running_mut(&mut self, id: ProcId) -> Result<&mut Proc<'s>, ProcError> {
        if self.current != Some(id.slot()) {
            self.live_mut(id)?;
            return Err(ProcError::NotRunning(id));
        }
        let p = self.live_mut(id)?;
        if p.state() != ProcState::Healthy(SchedState::Running) {
            return Err(ProcError::NotRunning(id));
        }
        Ok(p)
    }

    /// Decides which process holds the CPU from now on.
    ///
    /// The running process keeps the CPU unless a strictly more important
    /// process is waiting for it. Otherwise the most important waiting
    /// process is picked, the one queued longest among equals.
    pub fn schedule(&mut self) -> Option<ProcId> {
        let current = self.current;
        let challenger = proc::priority_scan(&self.procs, |p| {
            p.is_schedulable() && Some(p.id().slot()) != current
        })
        .map(|(slot, p)| (slot, p.priority()));

        if let Some(slot) = current {
            let running = match self.procs[slot].as_mut() {
                Some(p) if p.is_schedulable() => p,
                _ => {
                    self.current = None;
                    return self.schedule();
                }
            };
            match challenger {
                Some((_, prio))
                    if prio.is_more_important_than(running.priority()) =>
                {
                    log::debug!("{} preempted", running.id());
                    running.preempt();
                }
                _ => return Some(running.id()),
            }
        }

        let (slot, _) = challenger?;
        let p = self.procs[slot].as_mut()?;
        p.dispatch();
        self.current = Some(slot);
        Some(p.id())
    }

    /// The running process gives up the CPU. Without a delay it goes to the
    /// back of its priority band straight away; with one it is blocked until
    /// the delay has elapsed.
    pub fn yield_now(
        &mut self,
        id: ProcId,
        delay: Option<u32>,
    ) -> Result<(), ProcError> {
        self.running_mut(id)?;
        let now = self.now;
        let pos = self.take_queue_pos();
        let p = self.live_mut(id)?;
        match delay.filter(|&d| d != 0) {
            None => p.make_ready(pos),
            Some(d) => p.block(BlockReason::Yield, Some(now.after(d))),
        }
        self.current = None;
        Ok(())
    }

    /// The running process waits for an IPC message, for at most `timeout`
    /// systicks if given.
    pub fn wait_ipc(
        &mut self,
        id: ProcId,
        timeout: Option<u32>,
    ) -> Result<(), ProcError> {
        self.wait(id, BlockReason::Ipc, timeout)
    }

    /// The running process waits for an I/O completion, for at most
    /// `timeout` systicks if given.
    pub fn wait_io(
        &mut self,
        id: ProcId,
        timeout: Option<u32>,
    ) -> Result<(), ProcError> {
        self.wait(id, BlockReason::Io, timeout)
    }

    fn wait(
        &mut self,
        id: ProcId,
        reason: BlockReason,
        timeout: Option<u32>,
    ) -> Result<(), ProcError> {
        let deadline = timeout.map(|t| self.now.after(t));
        self.running_mut(id)?.block(reason, deadline);
        self.current = None;
        Ok(())
    }

    /// An IPC message arrived for `id`.
    pub fn deliver_ipc(&mut self, id: ProcId) -> Result<(), ProcError> {
        self.wake(id, BlockReason::Ipc)
    }

    /// An I/O operation `id` waited for completed.
    pub fn complete_io(&mut self, id: ProcId) -> Result<(), ProcError> {
        self.wake(id, BlockReason::Io)
    }

    fn wake(&mut self, id: ProcId, reason: BlockReason) -> Result<(), ProcError> {
        if self.live_mut(id)?.state()
            != ProcState::Healthy(SchedState::Blocked(reason))
        {
            return Err(ProcError::NotWaiting(id));
        }
        let pos = self.take_queue_pos();
        self.live_mut(id)?.make_ready(pos);
        Ok(())
    }

    /// Asks for `id` to be terminated. Whatever its state, the process goes
    /// through Cleanup, where it gets at most the cleanup quantum of CPU
    /// time.
    pub fn request_termination(&mut self, id: ProcId) -> Result<(), ProcError> {
        if let ProcState::Cleanup { .. } = self.live_mut(id)?.state() {
            return Err(ProcError::Terminating(id));
        }
        let pos = if self.current == Some(id.slot()) {
            None
        } else {
            Some(self.take_queue_pos())
        };
        let quantum = self.policy.cleanup_quantum;
        self.live_mut(id)?.begin_cleanup(quantum, pos);
        log::debug!("{id} entering cleanup");
        Ok(())
    }

    /// The process finished its cleanup in time.
    pub fn cleanup_done(&mut self, id: ProcId) -> Result<(), ProcError> {
        let p = self.live_mut(id)?;
        if !matches!(p.state(), ProcState::Cleanup { .. }) {
            return Err(ProcError::NotTerminating(id));
        }
        p.terminate(CleanupOutcome::Completed);
        let asid = p.asid();
        if self.current == Some(id.slot()) {
            self.current = None;
        }
        self.buffers.release_managed_by(asid);
        log::debug!("{id} terminated");
        Ok(())
    }

    /// Advances time by one systick.
    ///
    /// Charges the tick to the running process, wakes processes whose
    /// timeouts expired and reschedules. Cleanup overruns are contained to
    /// the process concerned and are returned; running out of idle budget
    /// ends the session.
    pub fn tick(&mut self) -> Result<Vec<SchedulingTimeout>, FatalError> {
        self.now = self.now.next();
        let mut overruns = Vec::new();

        if let Some(slot) = self.current {
            let charge = match self.procs[slot].as_mut() {
                Some(p) => p.charge_tick(),
                None => Charge::Continue,
            };
            match charge {
                Charge::Continue => {}
                Charge::QuantumExpired => {
                    let pos = self.take_queue_pos();
                    if let Some(p) = self.procs[slot].as_mut() {
                        p.make_ready(pos);
                    }
                    self.current = None;
                }
                Charge::CleanupOverrun => {
                    self.current = None;
                    if let Some(p) = self.procs[slot].as_ref() {
                        log::warn!(
                            "{} (ukApp `{}`) overran its cleanup quantum",
                            p.id(),
                            p.descriptor().name
                        );
                        overruns.push(SchedulingTimeout::CleanupOverrun {
                            proc: p.id(),
                        });
                        let asid = p.asid();
                        self.buffers.release_managed_by(asid);
                    }
                }
            }
        }

        let woken = proc::process_timers(
            &mut self.procs,
            self.now,
            &mut self.next_queue_pos,
        );
        if woken > 0 {
            log::trace!("{woken} ukProcs woken at {:?}", self.now);
        }

        if self.schedule().is_some() {
            self.idle_run = 0;
        } else {
            self.idle_run = self.idle_run.saturating_add(1);
            if let Some(max) = self.policy.idle_watchdog() {
                if self.idle_run > max {
                    let timeout = SchedulingTimeout::IdleWatchdog {
                        ticks: self.idle_run,
                    };
                    log::error!("{timeout}");
                    return Err(timeout.into());
                }
            }
        }

        Ok(overruns)
    }
}
