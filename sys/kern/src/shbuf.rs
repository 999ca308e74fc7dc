// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared buffers and their transfer protocol.
//!
//! A shared buffer starts out managed by the ukApp that declares it, its
//! owner. Before the buffer can be handed to another ukApp, that ukApp has to
//! be granted credentials on it: which of reading, writing, granting further
//! credentials and handing the buffer on it may do while managing it. The
//! owner holds every right and keeps access to the contents throughout.
//!
//! Grants outlive transfers, so a buffer can move back and forth between the
//! ukApps holding credentials. Only the owner can clear them, and only while
//! the buffer is back in its hands. Over the lifetime of the table, a buffer
//! can be granted to a bounded number of distinct ukApps besides its owner;
//! clearing the grants does not give that budget back.
//!
//! When the managing ukProc terminates, the buffer returns to its owner and
//! every grant is cleared.

use ukabi::{AccessOp, Asid, Options};

use crate::descs::SharedBufferDesc;
use crate::err::TransferError;
use crate::store::DescriptorStore;

/// Index of a buffer in a `SharedBufferTable`, in declaration order across
/// all ukApps.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SharedBufferId(pub u8);

bitflags::bitflags! {
    /// Rights on a shared buffer granted to a ukApp other than its owner.
    /// They take effect while that ukApp manages the buffer.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Credentials: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// May grant credentials to further ukApps.
        const ADD_CREDENTIALS = 1 << 2;
        /// May hand the buffer to another ukApp holding credentials.
        const TRANSFER = 1 << 3;
    }
}

#[derive(Clone, Debug)]
struct SharedBuffer<'s> {
    owner: Asid,
    desc: &'s SharedBufferDesc,
    manager: Asid,
    grants: Vec<(Asid, Credentials)>,
    /// Distinct ukApps ever granted credentials on the buffer.
    reached: Vec<Asid>,
}

impl SharedBuffer<'_> {
    fn credentials(&self, asid: Asid) -> Option<Credentials> {
        if asid == self.owner {
            return Some(Credentials::all());
        }
        self.grants
            .iter()
            .find(|(a, _)| *a == asid)
            .map(|&(_, c)| c)
    }

    /// Fails unless `asid` manages the buffer and holds `needed`.
    fn check_manager(
        &self,
        asid: Asid,
        needed: Credentials,
    ) -> Result<(), TransferError> {
        if self.manager != asid {
            return Err(TransferError::NotManager(asid));
        }
        match self.credentials(asid) {
            Some(c) if c.contains(needed) => Ok(()),
            _ => Err(TransferError::MissingCredentials { asid, needed }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SharedBufferTable<'s> {
    buffers: Vec<SharedBuffer<'s>>,
    grant_limit: u32,
    app_count: usize,
}

impl<'s> SharedBufferTable<'s> {
    pub fn from_store(store: &'s DescriptorStore, options: &Options) -> Self {
        let buffers = store
            .iter()
            .flat_map(|(owner, app)| {
                app.shared_buffers.iter().map(move |desc| SharedBuffer {
                    owner,
                    desc,
                    manager: owner,
                    grants: Vec::new(),
                    reached: Vec::new(),
                })
            })
            .collect();
        Self {
            buffers,
            grant_limit: options.shared_buffer_transfer_target_max,
            app_count: store.len(),
        }
    }

    fn buffer(&self, id: SharedBufferId) -> Result<&SharedBuffer<'s>, TransferError> {
        self.buffers
            .get(usize::from(id.0))
            .ok_or(TransferError::UnknownBuffer)
    }

    fn buffer_mut(
        &mut self,
        id: SharedBufferId,
    ) -> Result<&mut SharedBuffer<'s>, TransferError> {
        self.buffers
            .get_mut(usize::from(id.0))
            .ok_or(TransferError::UnknownBuffer)
    }

    fn check_app(&self, asid: Asid) -> Result<(), TransferError> {
        if asid.index() >= self.app_count {
            return Err(TransferError::UnknownApp(asid));
        }
        Ok(())
    }

    /// Looks up the buffer `owner` declared under `label`.
    pub fn find(&self, owner: Asid, label: &str) -> Option<SharedBufferId> {
        self.buffers
            .iter()
            .position(|b| b.owner == owner && b.desc.label == label)
            // The global budget keeps buffer counts within a u8.
            .map(|i| SharedBufferId(i as u8))
    }

    pub fn descriptor(&self, id: SharedBufferId) -> Option<&'s SharedBufferDesc> {
        self.buffer(id).ok().map(|b| b.desc)
    }

    pub fn owner(&self, id: SharedBufferId) -> Option<Asid> {
        self.buffer(id).ok().map(|b| b.owner)
    }

    pub fn manager(&self, id: SharedBufferId) -> Option<Asid> {
        self.buffer(id).ok().map(|b| b.manager)
    }

    /// Credentials `asid` holds on the buffer. The owner holds them all.
    pub fn credentials(&self, id: SharedBufferId, asid: Asid) -> Option<Credentials> {
        self.buffer(id).ok()?.credentials(asid)
    }

    /// ukApps other than the owner holding credentials, in grant order.
    pub fn grants(&self, id: SharedBufferId) -> &[(Asid, Credentials)] {
        self.buffer(id).map_or(&[][..], |b| b.grants.as_slice())
    }

    /// Distinct ukApps other than the owner the buffer has been granted to
    /// so far, including grants since cleared.
    pub fn targets(&self, id: SharedBufferId) -> &[Asid] {
        self.buffer(id).map_or(&[][..], |b| b.reached.as_slice())
    }

    /// Whether `asid` may currently `op` the contents of the buffer. The
    /// owner always can; anyone else only while managing it, and as far as
    /// its credentials allow.
    pub fn can_access(&self, asid: Asid, id: SharedBufferId, op: AccessOp) -> bool {
        let Ok(b) = self.buffer(id) else {
            return false;
        };
        if b.owner == asid {
            return true;
        }
        let needed = match op {
            AccessOp::Read => Credentials::READ,
            AccessOp::Write => Credentials::WRITE,
        };
        b.manager == asid
            && b.credentials(asid).is_some_and(|c| c.contains(needed))
    }

    /// Grants `credentials` on the buffer to `to`, at the request of
    /// `caller`: the owner, or the manager if it may add credentials.
    ///
    /// Credentials already granted cannot be changed short of a reset, and
    /// the owner's and manager's own can never be.
    pub fn add_credentials(
        &mut self,
        id: SharedBufferId,
        caller: Asid,
        to: Asid,
        credentials: Credentials,
    ) -> Result<(), TransferError> {
        self.check_app(to)?;
        let limit = self.grant_limit;
        let buf = self.buffer_mut(id)?;
        if caller != buf.owner {
            buf.check_manager(caller, Credentials::ADD_CREDENTIALS)?;
        }
        if to == buf.owner || to == buf.manager {
            return Err(TransferError::FixedCredentials(to));
        }
        if buf.grants.iter().any(|(a, _)| *a == to) {
            return Err(TransferError::AlreadyGranted(to));
        }
        if !buf.reached.contains(&to) {
            if buf.reached.len() >= limit as usize {
                return Err(TransferError::TargetLimit { limit });
            }
            buf.reached.push(to);
        }
        buf.grants.push((to, credentials));
        log::debug!(
            "shared buffer `{}` of {}: {to} granted {credentials:?}",
            buf.desc.label,
            buf.owner
        );
        Ok(())
    }

    /// Clears every grant on the buffer. Only the owner may, and only while
    /// it manages the buffer.
    pub fn reset_credentials(
        &mut self,
        id: SharedBufferId,
        caller: Asid,
    ) -> Result<(), TransferError> {
        let buf = self.buffer_mut(id)?;
        if caller != buf.owner {
            return Err(TransferError::NotOwner(caller));
        }
        if buf.manager != buf.owner {
            return Err(TransferError::InUse(buf.manager));
        }
        buf.grants.clear();
        Ok(())
    }

    /// Hands the buffer from its current manager `from` to `to`.
    ///
    /// Returning the buffer to its owner is always allowed. Otherwise `from`
    /// needs the transfer credential, and `to` must have been granted
    /// credentials.
    pub fn transfer(
        &mut self,
        id: SharedBufferId,
        from: Asid,
        to: Asid,
    ) -> Result<(), TransferError> {
        self.check_app(to)?;
        let buf = self.buffer_mut(id)?;
        if buf.manager != from {
            return Err(TransferError::NotManager(from));
        }
        if to == from {
            return Err(TransferError::SelfTransfer);
        }
        if to != buf.owner {
            buf.check_manager(from, Credentials::TRANSFER)?;
            if buf.credentials(to).is_none() {
                return Err(TransferError::NotGranted(to));
            }
        }
        buf.manager = to;
        log::debug!(
            "shared buffer `{}` of {} now managed by {to}",
            buf.desc.label,
            buf.owner
        );
        Ok(())
    }

    /// Returns every buffer managed by `asid` to its owner, clearing its
    /// grants. Called once the ukProc of `asid` has terminated; gives the
    /// number of buffers returned.
    pub fn release_managed_by(&mut self, asid: Asid) -> usize {
        let mut released = 0;
        for buf in &mut self.buffers {
            if buf.manager == asid && buf.owner != asid {
                buf.manager = buf.owner;
                buf.grants.clear();
                released += 1;
                log::debug!(
                    "shared buffer `{}` returned to {} from terminated {asid}",
                    buf.desc.label,
                    buf.owner
                );
            }
        }
        released
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrblock::AddressBlockRegistry;
    use crate::descs::UkAppDesc;
    use crate::mcureg::RegisterAccessTable;
    use crate::platform::PlatformLayout;
    use ukabi::{AddressBlock, Priority};

    fn store() -> DescriptorStore {
        let mut apps: Vec<_> = ["owner", "crypto", "net", "log"]
            .iter()
            .map(|n| UkAppDesc::new(*n, Priority(2), 10))
            .collect();
        apps[0].shared_buffers = vec![
            SharedBufferDesc {
                label: "msg".into(),
                block: AddressBlock::new(0x2004_0000, 0x400),
            },
            SharedBufferDesc {
                label: "key".into(),
                block: AddressBlock::new(0x2004_0400, 0x100),
            },
        ];
        let mut store = DescriptorStore::new();
        store
            .load(
                &Options::default(),
                &PlatformLayout::stm32h5(),
                &AddressBlockRegistry::new(),
                &RegisterAccessTable::new(),
                apps,
            )
            .unwrap();
        store
    }

    const OWNER: Asid = Asid(0);
    const CRYPTO: Asid = Asid(1);
    const NET: Asid = Asid(2);
    const LOG: Asid = Asid(3);

    const RELAY: Credentials = Credentials::READ
        .union(Credentials::WRITE)
        .union(Credentials::TRANSFER);

    #[test]
    fn buffers_start_with_their_owner() {
        let store = store();
        let table = SharedBufferTable::from_store(&store, &Options::default());
        assert_eq!(table.len(), 2);
        let key = table.find(OWNER, "key").unwrap();
        assert_eq!(key, SharedBufferId(1));
        assert_eq!(table.manager(key), Some(OWNER));
        assert_eq!(table.credentials(key, OWNER), Some(Credentials::all()));
        assert_eq!(table.credentials(key, NET), None);
        assert!(table.find(CRYPTO, "key").is_none());
        assert!(table.can_access(OWNER, key, AccessOp::Write));
        assert!(!table.can_access(NET, key, AccessOp::Read));
    }

    #[test]
    fn transfer_needs_credentials_on_target() {
        let store = store();
        let mut table = SharedBufferTable::from_store(&store, &Options::default());
        let msg = table.find(OWNER, "msg").unwrap();

        assert_eq!(
            table.transfer(msg, OWNER, CRYPTO),
            Err(TransferError::NotGranted(CRYPTO))
        );
        table
            .add_credentials(msg, OWNER, CRYPTO, Credentials::READ)
            .unwrap();
        table.transfer(msg, OWNER, CRYPTO).unwrap();
        assert_eq!(table.manager(msg), Some(CRYPTO));
        assert!(table.can_access(CRYPTO, msg, AccessOp::Read));
        assert!(!table.can_access(CRYPTO, msg, AccessOp::Write));
        assert!(table.can_access(OWNER, msg, AccessOp::Write), "owner keeps access");
    }

    #[test]
    fn grants_are_bounded_but_transfers_are_free() {
        let store = store();
        let mut table = SharedBufferTable::from_store(&store, &Options::default());
        let msg = table.find(OWNER, "msg").unwrap();

        table.add_credentials(msg, OWNER, CRYPTO, RELAY).unwrap();
        table.add_credentials(msg, OWNER, NET, RELAY).unwrap();
        // A third ukApp is one too many.
        assert_eq!(
            table.add_credentials(msg, OWNER, LOG, RELAY),
            Err(TransferError::TargetLimit { limit: 2 })
        );

        for _ in 0..50 {
            table.transfer(msg, OWNER, CRYPTO).unwrap();
            table.transfer(msg, CRYPTO, NET).unwrap();
            table.transfer(msg, NET, OWNER).unwrap();
        }
        assert_eq!(table.grants(msg), [(CRYPTO, RELAY), (NET, RELAY)]);

        // The other buffer has its own budget.
        let key = table.find(OWNER, "key").unwrap();
        table.add_credentials(key, OWNER, LOG, RELAY).unwrap();
    }

    #[test]
    fn only_owner_resets_and_only_when_holding() {
        let store = store();
        let mut table = SharedBufferTable::from_store(&store, &Options::default());
        let msg = table.find(OWNER, "msg").unwrap();
        table.add_credentials(msg, OWNER, CRYPTO, RELAY).unwrap();
        table.add_credentials(msg, OWNER, NET, RELAY).unwrap();
        table.transfer(msg, OWNER, CRYPTO).unwrap();

        assert_eq!(
            table.reset_credentials(msg, CRYPTO),
            Err(TransferError::NotOwner(CRYPTO))
        );
        assert_eq!(
            table.reset_credentials(msg, OWNER),
            Err(TransferError::InUse(CRYPTO))
        );

        table.transfer(msg, CRYPTO, OWNER).unwrap();
        table.reset_credentials(msg, OWNER).unwrap();
        assert!(table.grants(msg).is_empty());
        assert_eq!(
            table.transfer(msg, OWNER, CRYPTO),
            Err(TransferError::NotGranted(CRYPTO))
        );
        // Grants can be made again, but only to ukApps already reached.
        assert_eq!(
            table.add_credentials(msg, OWNER, LOG, RELAY),
            Err(TransferError::TargetLimit { limit: 2 })
        );
        table
            .add_credentials(msg, OWNER, CRYPTO, Credentials::READ)
            .unwrap();
        assert_eq!(table.targets(msg), [CRYPTO, NET]);
    }

    #[test]
    fn manager_needs_rights_to_pass_buffer_on() {
        let store = store();
        let mut table = SharedBufferTable::from_store(&store, &Options::default());
        let msg = table.find(OWNER, "msg").unwrap();
        table
            .add_credentials(msg, OWNER, CRYPTO, Credentials::READ)
            .unwrap();
        table.transfer(msg, OWNER, CRYPTO).unwrap();

        assert_eq!(
            table.add_credentials(msg, CRYPTO, NET, Credentials::READ),
            Err(TransferError::MissingCredentials {
                asid: CRYPTO,
                needed: Credentials::ADD_CREDENTIALS
            })
        );
        // The owner may grant even while the buffer is away.
        table.add_credentials(msg, OWNER, NET, RELAY).unwrap();
        assert_eq!(
            table.transfer(msg, CRYPTO, NET),
            Err(TransferError::MissingCredentials {
                asid: CRYPTO,
                needed: Credentials::TRANSFER
            })
        );
        // Handing it back to the owner needs no rights.
        table.transfer(msg, CRYPTO, OWNER).unwrap();
        table.transfer(msg, OWNER, NET).unwrap();
        assert_eq!(
            table.add_credentials(msg, LOG, CRYPTO, Credentials::READ),
            Err(TransferError::NotManager(LOG))
        );
    }

    #[test]
    fn granting_rules() {
        let store = store();
        let mut table = SharedBufferTable::from_store(&store, &Options::default());
        let msg = table.find(OWNER, "msg").unwrap();
        let chain = Credentials::ADD_CREDENTIALS | Credentials::TRANSFER;
        table.add_credentials(msg, OWNER, CRYPTO, chain).unwrap();
        table.transfer(msg, OWNER, CRYPTO).unwrap();

        assert_eq!(
            table.add_credentials(msg, CRYPTO, OWNER, Credentials::READ),
            Err(TransferError::FixedCredentials(OWNER))
        );
        assert_eq!(
            table.add_credentials(msg, OWNER, CRYPTO, Credentials::READ),
            Err(TransferError::FixedCredentials(CRYPTO))
        );
        table
            .add_credentials(msg, CRYPTO, NET, Credentials::READ)
            .unwrap();
        assert_eq!(
            table.add_credentials(msg, OWNER, NET, RELAY),
            Err(TransferError::AlreadyGranted(NET))
        );
        assert_eq!(table.credentials(msg, NET), Some(Credentials::READ));
        assert_eq!(
            table.add_credentials(msg, OWNER, Asid(9), Credentials::READ),
            Err(TransferError::UnknownApp(Asid(9)))
        );
    }

    #[test]
    fn only_manager_transfers() {
        let store = store();
        let mut table = SharedBufferTable::from_store(&store, &Options::default());
        let msg = table.find(OWNER, "msg").unwrap();
        table.add_credentials(msg, OWNER, CRYPTO, RELAY).unwrap();
        table.add_credentials(msg, OWNER, NET, RELAY).unwrap();

        assert_eq!(
            table.transfer(msg, CRYPTO, NET),
            Err(TransferError::NotManager(CRYPTO))
        );
        table.transfer(msg, OWNER, CRYPTO).unwrap();
        // Having handed it over, the owner can no longer move it.
        assert_eq!(
            table.transfer(msg, OWNER, NET),
            Err(TransferError::NotManager(OWNER))
        );
        assert_eq!(
            table.transfer(msg, CRYPTO, CRYPTO),
            Err(TransferError::SelfTransfer)
        );
        assert_eq!(
            table.transfer(msg, CRYPTO, Asid(9)),
            Err(TransferError::UnknownApp(Asid(9)))
        );
        assert_eq!(
            table.transfer(SharedBufferId(7), OWNER, NET),
            Err(TransferError::UnknownBuffer)
        );
    }

    #[test]
    fn terminated_manager_returns_buffer_to_owner() {
        let store = store();
        let mut table = SharedBufferTable::from_store(&store, &Options::default());
        let msg = table.find(OWNER, "msg").unwrap();
        let key = table.find(OWNER, "key").unwrap();
        table.add_credentials(msg, OWNER, CRYPTO, RELAY).unwrap();
        table.add_credentials(msg, OWNER, NET, RELAY).unwrap();
        table.add_credentials(key, OWNER, NET, RELAY).unwrap();
        table.transfer(msg, OWNER, CRYPTO).unwrap();

        assert_eq!(table.release_managed_by(NET), 0);
        assert_eq!(table.grants(key), [(NET, RELAY)]);

        assert_eq!(table.release_managed_by(CRYPTO), 1);
        assert_eq!(table.manager(msg), Some(OWNER));
        assert!(table.grants(msg).is_empty());
        assert!(!table.can_access(CRYPTO, msg, AccessOp::Read));
        assert_eq!(table.targets(msg), [CRYPTO, NET]);
        assert_eq!(table.release_managed_by(OWNER), 0);
    }

    #[test]
    fn limit_follows_options() {
        let store = store();
        let options = Options {
            shared_buffer_transfer_target_max: 1,
            ..Options::default()
        };
        let mut table = SharedBufferTable::from_store(&store, &options);
        let msg = table.find(OWNER, "msg").unwrap();
        table.add_credentials(msg, OWNER, CRYPTO, RELAY).unwrap();
        assert_eq!(
            table.add_credentials(msg, OWNER, NET, RELAY),
            Err(TransferError::TargetLimit { limit: 1 })
        );
    }
}
