// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of ukProcs, the running instances of ukApps.

use ukabi::{
    Asid, BlockReason, CleanupOutcome, Priority, ProcId, ProcState, SchedState,
};

use crate::descs::UkAppDesc;
use crate::time::Timestamp;

/// Internal representation of a ukProc.
///
/// The fields are private to this module so that state changes go through
/// the transition methods below, which keep the timer, quantum and queue
/// position consistent with the state.
#[derive(Clone, Debug)]
pub struct Proc<'s> {
    id: ProcId,
    asid: Asid,
    /// Static description of the ukApp this process runs.
    descriptor: &'s UkAppDesc,
    state: ProcState,
    /// Systicks left before the process is requeued behind its peers.
    quantum_left: u32,
    /// Time at which a blocked process becomes Ready again, if it has a
    /// timeout.
    deadline: Option<Timestamp>,
    /// Position in the ready queue: among processes of equal priority the
    /// smallest value has been waiting the longest.
    queued_at: u64,
}

/// Result of charging a systick of CPU time to the running process.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Charge {
    Continue,
    QuantumExpired,
    CleanupOverrun,
}

impl<'s> Proc<'s> {
    /// Creates a Ready process for `descriptor`.
    pub fn from_descriptor(
        id: ProcId,
        asid: Asid,
        descriptor: &'s UkAppDesc,
        queued_at: u64,
    ) -> Self {
        Proc {
            id,
            asid,
            descriptor,
            state: SchedState::Ready.into(),
            quantum_left: descriptor.quantum,
            deadline: None,
            queued_at,
        }
    }

    pub fn id(&self) -> ProcId {
        self.id
    }

    pub fn asid(&self) -> Asid {
        self.asid
    }

    pub fn descriptor(&self) -> &'s UkAppDesc {
        self.descriptor
    }

    pub fn priority(&self) -> Priority {
        self.descriptor.priority
    }

    pub fn state(&self) -> ProcState {
        self.state
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    pub fn quantum_left(&self) -> u32 {
        self.quantum_left
    }

    /// Checks if the process could use the CPU if it were given it. This
    /// includes a process that is already running.
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self.state,
            ProcState::Healthy(SchedState::Ready | SchedState::Running)
                | ProcState::Cleanup { .. }
        )
    }

    pub(crate) fn make_ready(&mut self, queued_at: u64) {
        self.state = SchedState::Ready.into();
        self.deadline = None;
        self.quantum_left = self.descriptor.quantum;
        self.queued_at = queued_at;
    }

    /// Takes the CPU away without requeueing: the process keeps its place
    /// in line and what is left of its quantum.
    pub(crate) fn preempt(&mut self) {
        if self.state == ProcState::Healthy(SchedState::Running) {
            self.state = SchedState::Ready.into();
        }
    }

    pub(crate) fn dispatch(&mut self) {
        if self.state == ProcState::Healthy(SchedState::Ready) {
            self.state = SchedState::Running.into();
        }
    }

    pub(crate) fn block(&mut self, reason: BlockReason, deadline: Option<Timestamp>) {
        self.state = SchedState::Blocked(reason).into();
        self.deadline = deadline;
    }

    pub(crate) fn begin_cleanup(&mut self, remaining: u32, queued_at: Option<u64>) {
        self.state = ProcState::Cleanup { remaining };
        self.deadline = None;
        if let Some(q) = queued_at {
            self.queued_at = q;
        }
    }

    pub(crate) fn terminate(&mut self, outcome: CleanupOutcome) {
        self.state = ProcState::Terminated(outcome);
        self.deadline = None;
    }

    /// Charges one systick to the process, which is assumed to hold the CPU.
    pub(crate) fn charge_tick(&mut self) -> Charge {
        match self.state {
            ProcState::Healthy(SchedState::Running) => {
                self.quantum_left = self.quantum_left.saturating_sub(1);
                if self.quantum_left == 0 {
                    Charge::QuantumExpired
                } else {
                    Charge::Continue
                }
            }
            ProcState::Cleanup { remaining } => {
                let remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    self.terminate(CleanupOutcome::Overrun);
                    Charge::CleanupOverrun
                } else {
                    self.state = ProcState::Cleanup { remaining };
                    Charge::Continue
                }
            }
            _ => Charge::Continue,
        }
    }
}

/// Scans the process table for the most deserving candidate.
///
/// Among the processes that satisfy `pred`, returns the most important one.
/// If several share that priority, prefers the one that has been queued the
/// longest; queue positions are unique so this always settles it.
pub fn priority_scan<'a, 's>(
    procs: &'a [Option<Proc<'s>>],
    pred: impl Fn(&Proc<'s>) -> bool,
) -> Option<(usize, &'a Proc<'s>)> {
    let mut choice: Option<(usize, &Proc<'s>)> = None;
    for (slot, p) in procs.iter().enumerate() {
        let Some(p) = p else { continue };
        if !pred(p) {
            continue;
        }

        if let Some((_, best)) = choice {
            let better = p.priority().is_more_important_than(best.priority())
                || (p.priority() == best.priority()
                    && p.queued_at < best.queued_at);
            if !better {
                continue;
            }
        }

        choice = Some((slot, p));
    }
    choice
}

/// Wakes every blocked process whose timeout has expired by `now`, queueing
/// them in slot order. Returns the number of processes woken.
pub fn process_timers(
    procs: &mut [Option<Proc<'_>>],
    now: Timestamp,
    next_queue_pos: &mut u64,
) -> usize {
    let mut woken = 0;
    for p in procs.iter_mut().flatten() {
        let Some(deadline) = p.deadline else { continue };
        if deadline > now {
            continue;
        }
        p.deadline = None;
        if let ProcState::Healthy(SchedState::Blocked(_)) = p.state {
            p.make_ready(*next_queue_pos);
            *next_queue_pos += 1;
            woken += 1;
        }
    }
    woken
}
