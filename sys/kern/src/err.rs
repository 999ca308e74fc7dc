// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Errors come in two tiers. `ConfigError` describes one defect in one
//! table entry and is what the individual tables return. During session
//! startup any of them escalates to a `FatalError`, which also covers the
//! whole-session checks and the idle watchdog. The remaining types are
//! recoverable refusals of runtime requests.

use thiserror::Error;
use ukabi::{AddressBlock, Asid, ProcId};

use crate::shbuf::Credentials;

/// A configuration entry that was rejected.
///
/// `context` names the entry being checked, e.g. "ukApp `attest` extra block
/// `sram3`".
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("{context}: {block} overlaps {other}")]
    Overlap {
        context: String,
        block: AddressBlock,
        other: AddressBlock,
    },
    #[error("{context}: {detail}")]
    OutOfRange { context: String, detail: String },
    #[error("{context}: {value:#x} is not a multiple of {align:#x}")]
    Misaligned {
        context: String,
        value: u32,
        align: u32,
    },
    #[error("{context}: {count} entries declared, at most {max} allowed")]
    CountMismatch {
        context: String,
        count: usize,
        max: usize,
    },
    #[error("{context}: `{name}` is declared more than once")]
    DuplicateName { context: String, name: String },
    #[error("{context}: `{name}` does not name anything declared")]
    UnknownReference { context: String, name: String },
}

/// Problem that prevents the session from starting, or from continuing.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum FatalError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(
        "option `{name}` is {value}, supported values are {min}..={max}"
    )]
    Option {
        name: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("{count} ukApps declared for {max} ukProc slots")]
    ProcSlots { count: usize, max: usize },
    #[error("{total} shared buffers declared, at most {max} allowed")]
    SharedBufferBudget { total: usize, max: usize },
    #[error("{total} DMA streams declared, at most {max} allowed")]
    DmaBudget { total: usize, max: usize },
    #[error("{total} PIRQ grants for {supported} supported interrupt lines")]
    PirqBudget { total: usize, supported: usize },
    #[error(
        "register table authorizes {actual} registers, {declared} declared"
    )]
    RegisterCount { declared: u32, actual: u32 },
    #[error("register table holds {actual} ranges, {declared} declared")]
    RegisterRangeCount { declared: u32, actual: usize },
    #[error(
        "registry holds {actual} authorized extra blocks, {declared} declared"
    )]
    AuthorizedBlockCount { declared: u32, actual: usize },
    #[error(
        "systick period is {systick_cputick} CPU ticks, needs at least twice \
         the call time limit of {limit}"
    )]
    CallTimeMargin { systick_cputick: u64, limit: u32 },
    #[error(transparent)]
    Scheduling(#[from] SchedulingTimeout),
}

/// A time budget that ran out.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum SchedulingTimeout {
    /// Nothing was schedulable for longer than the idle duration allows.
    /// Always fatal.
    #[error("no ukProc was schedulable for {ticks} systicks in a row")]
    IdleWatchdog { ticks: u32 },
    /// A terminating process did not finish its cleanup in time. Only the
    /// process concerned is affected: it has been forcibly terminated.
    #[error("{proc} overran its cleanup quantum and was terminated")]
    CleanupOverrun { proc: ProcId },
}

impl SchedulingTimeout {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SchedulingTimeout::IdleWatchdog { .. })
    }
}

/// Refusal to create a ukProc.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum SpawnError {
    #[error("no ukApp descriptor with {0}")]
    UnknownApp(Asid),
    #[error("ukApp with {0} already has a live ukProc")]
    AlreadyLive(Asid),
    #[error("every ukProc slot is in use")]
    NoFreeSlot,
}

/// Refusal of a request about an existing ukProc.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum ProcError {
    #[error("{0} does not name a live ukProc")]
    Stale(ProcId),
    #[error("{0} is not running")]
    NotRunning(ProcId),
    #[error("{0} is not waiting for that event")]
    NotWaiting(ProcId),
    #[error("{0} is already terminating")]
    Terminating(ProcId),
    #[error("{0} has not been asked to terminate")]
    NotTerminating(ProcId),
}

/// Refusal of a shared buffer request.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum TransferError {
    #[error("no such shared buffer")]
    UnknownBuffer,
    #[error("no ukApp descriptor with {0}")]
    UnknownApp(Asid),
    #[error("{0} does not currently manage the buffer")]
    NotManager(Asid),
    #[error("{0} does not own the buffer")]
    NotOwner(Asid),
    #[error("{asid} lacks the {needed:?} credentials on the buffer")]
    MissingCredentials { asid: Asid, needed: Credentials },
    #[error("{0} holds no credentials on the buffer")]
    NotGranted(Asid),
    #[error("{0} already holds credentials on the buffer")]
    AlreadyGranted(Asid),
    #[error("credentials of {0}, owner or manager of the buffer, are fixed")]
    FixedCredentials(Asid),
    #[error("buffer is still managed by {0}")]
    InUse(Asid),
    #[error("a buffer cannot be transferred to its current manager")]
    SelfTransfer,
    #[error("buffer has already been granted to {limit} distinct ukApps")]
    TargetLimit { limit: u32 },
}
