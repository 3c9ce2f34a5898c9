//! The ordered chain of hops on one circuit.
//!
//! Hops are kept in an arena, each one linked to the hops before and after
//! it; the hop after the last one is the first one again.  A [`HopId`] names
//! a hop for as long as it exists, and is never reused for another hop, so a
//! `HopId` that outlives its hop is simply rejected.

use std::fmt;

use slotmap_careful::SlotMap;
use tor_cell::relaycell::RelayCellFormat;
use tor_error::internal;
use tor_linkspec::{ChanTarget, OwnedChanTarget};
use tracing::{debug, trace};

use crate::congestion::CongestionControl;
use crate::crypto::{HopCrypto, RelayCellBody, RelayCryptoAlg, SENDME_TAG_LEN};
use crate::flowctl::FlowCtrlParams;
use crate::hop::{HopNum, HopState, HopStatus, PendingHandshake};
use crate::{Error, Result};

slotmap_careful::new_key_type! {
    /// Identifies a hop on a [`HopChain`].
    pub struct HopId;
}

/// A hop, with its place in the ring.
struct Node {
    /// The hop itself.
    hop: HopState,
    /// The hop after this one.  For the last hop, this is the head.
    next: HopId,
    /// The hop before this one.  For the head, this is the last hop.
    prev: HopId,
}

/// The hops of a circuit, in the order in which the circuit was extended.
///
/// The first hop (the "head") is the one adjacent to us.  Hops become usable
/// strictly in order: a hop may only start waiting for keys once the hop
/// before it is open.
///
/// Dropping a `HopChain` destroys all of its hops, and wipes their keys.
pub struct HopChain {
    /// Every hop on the chain.
    nodes: SlotMap<HopId, Node>,
    /// The first hop, if there are any hops.
    head: Option<HopId>,
    /// Parameters for the windows of new hops.
    params: FlowCtrlParams,
}

static_assertions::assert_impl_all!(HopChain: Send);

impl HopChain {
    /// Construct a new, empty chain, whose hops will use `params`.
    pub fn new(params: FlowCtrlParams) -> Self {
        HopChain {
            nodes: SlotMap::with_key(),
            head: None,
            params,
        }
    }

    /// Return the flow-control parameters that new hops are given.
    pub fn params(&self) -> &FlowCtrlParams {
        &self.params
    }

    /// Return the number of hops on this chain.
    pub fn hop_count(&self) -> usize {
        self.nodes.len()
    }

    /// Return true if there are no hops on this chain.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Return the first hop, if any.
    pub fn head(&self) -> Option<HopId> {
        self.head
    }

    /// Return the last hop, if any.
    pub fn tail(&self) -> Option<HopId> {
        self.head.map(|h| self.nodes[h].prev)
    }

    /// Return the hop after `id`.
    ///
    /// The hop after the last hop is the head.
    pub fn next(&self, id: HopId) -> Result<HopId> {
        Ok(self.node(id)?.next)
    }

    /// Return the hop before `id`.
    ///
    /// The hop before the head is the last hop.
    pub fn prev(&self, id: HopId) -> Result<HopId> {
        Ok(self.node(id)?.prev)
    }

    /// Return the hop `id`.
    pub fn hop(&self, id: HopId) -> Result<&HopState> {
        Ok(&self.node(id)?.hop)
    }

    /// Return the hop `id`, for flow control.
    pub fn hop_mut(&mut self, id: HopId) -> Result<&mut HopState> {
        Ok(&mut self.node_mut(id)?.hop)
    }

    /// Return the position of `id` on this chain.
    pub fn hop_num(&self, id: HopId) -> Result<HopNum> {
        let (idx, _) = self
            .iter()
            .enumerate()
            .find(|(_, (hop_id, _))| *hop_id == id)
            .ok_or(Error::NoSuchHop)?;
        let idx = u8::try_from(idx).map_err(|_| internal!("Too many hops on a circuit"))?;
        Ok(idx.into())
    }

    /// Return an iterator over the hops of this chain, from the head.
    pub fn iter(&self) -> HopChainIter<'_> {
        HopChainIter {
            chain: self,
            next: self.head,
            remaining: self.nodes.len(),
        }
    }

    /// Return the ids of the hops on this chain, from the head.
    pub fn hop_ids(&self) -> impl Iterator<Item = HopId> + '_ {
        self.iter().map(|(id, _)| id)
    }

    /// Return the first hop that isn't open yet.
    ///
    /// This is the hop that the circuit is currently being extended to, or
    /// will be next.  Return None if every hop is open.
    pub fn first_non_open(&self) -> Option<HopId> {
        self.iter()
            .find(|(_, hop)| hop.status() != HopStatus::Open)
            .map(|(id, _)| id)
    }

    /// Add a new, closed hop to `relay` at the end of this chain.
    ///
    /// We keep our own copy of `relay`'s identities and addresses.
    pub fn append<T>(&mut self, relay: &T) -> HopId
    where
        T: ChanTarget + ?Sized,
    {
        let hop = HopState::new(OwnedChanTarget::from_chan_target(relay), &self.params);
        let id = self.nodes.insert_with_key(|id| Node {
            hop,
            next: id,
            prev: id,
        });

        if let Some(head) = self.head {
            let tail = self.nodes[head].prev;
            let node = &mut self.nodes[id];
            node.prev = tail;
            node.next = head;
            self.nodes[tail].next = id;
            self.nodes[head].prev = id;
        } else {
            self.head = Some(id);
        }

        trace!(hop = %self.display_hop(id), "Appended hop");
        self.debug_check();
        id
    }

    /// Record that we've sent the handshake that extends the circuit to `id`,
    /// and keep `handshake` until it completes.
    ///
    /// The hop must be closed, and the hop before it (if any) must be open.
    /// On failure, nothing changes.
    pub fn begin_extend(&mut self, id: HopId, handshake: PendingHandshake) -> Result<()> {
        let node = self.node(id)?;
        self.check_status(id, &node.hop, HopStatus::Closed)?;
        if Some(id) != self.head && self.nodes[node.prev].hop.status() != HopStatus::Open {
            return Err(Error::HopOutOfOrder {
                hop: self.hop_num(id)?,
            });
        }

        let hop = &mut self.nodes[id].hop;
        hop.set_handshake(handshake);
        hop.set_status(HopStatus::AwaitingKeys);
        trace!(hop = %self.display_hop(id), "Hop is awaiting keys");
        self.debug_check();
        Ok(())
    }

    /// Give back the handshake in progress with `id`, if there is one.
    pub fn take_handshake(&mut self, id: HopId) -> Result<Option<PendingHandshake>> {
        Ok(self.hop_mut(id)?.take_handshake())
    }

    /// Key the hop `id` for `alg` with the key material from its handshake,
    /// and open it.
    ///
    /// If `reverse` is set, the forward and backward halves of the key
    /// material trade places.  The hop must be awaiting keys.  On success any
    /// handshake state that's left is dropped.
    ///
    /// On failure, the hop stays as it was: it is up to the caller whether to
    /// retry or tear down the circuit.
    pub fn init_hop_crypto(
        &mut self,
        id: HopId,
        alg: RelayCryptoAlg,
        key_material: &[u8],
        reverse: bool,
    ) -> Result<()> {
        self.check_status(id, self.hop(id)?, HopStatus::AwaitingKeys)?;
        let crypto = HopCrypto::new(alg, key_material, reverse)?;
        self.nodes[id].hop.install_crypto(crypto);
        debug!(hop = %self.display_hop(id), %alg, "Hop is open");
        self.debug_check();
        Ok(())
    }

    /// Change the relay cell format of `id`.
    ///
    /// This is only allowed before the hop opens.
    pub fn set_relay_cell_format(&mut self, id: HopId, format: RelayCellFormat) -> Result<()> {
        self.check_not_open(id)?;
        self.nodes[id].hop.set_relay_cell_format(format);
        Ok(())
    }

    /// Make `id` use `cc` for congestion control.
    ///
    /// This is only allowed before the hop opens, and only once.
    pub fn attach_congestion_control(
        &mut self,
        id: HopId,
        cc: Box<dyn CongestionControl>,
    ) -> Result<()> {
        self.check_not_open(id)?;
        let hop = &mut self.nodes[id].hop;
        if hop.congestion_control().is_some() {
            return Err(internal!("Congestion control attached twice").into());
        }
        hop.set_congestion_control(cc);
        trace!(hop = %self.display_hop(id), "Attached congestion control");
        Ok(())
    }

    /// Return the SENDME tag of the last cell that `id` originated or
    /// recognized.
    ///
    /// Return None unless the hop is open.
    pub fn sendme_tag(&self, id: HopId) -> Option<&[u8]> {
        self.hop(id).ok()?.sendme_tag()
    }

    /// Remove the hop `id` from this chain, and destroy it.
    ///
    /// This works for a hop in any state.  Its keys are wiped, and its
    /// handshake and congestion control state are dropped.  `id` is no longer
    /// valid afterwards.
    pub fn destroy_hop(&mut self, id: HopId) -> Result<()> {
        let hop = self.display_hop(id);
        let node = self.nodes.remove(id).ok_or(Error::NoSuchHop)?;
        if node.next == id {
            self.head = None;
        } else {
            self.nodes[node.prev].next = node.next;
            self.nodes[node.next].prev = node.prev;
            if self.head == Some(id) {
                self.head = Some(node.next);
            }
        }
        drop(node);
        debug!(%hop, "Destroyed hop");
        self.debug_check();
        Ok(())
    }

    /// Destroy every hop on this chain, from the head, and then the chain
    /// itself.
    ///
    /// This is what dropping the chain does.
    pub fn destroy(self) {
        drop(self);
    }

    /// Apply every layer of encryption that `cell` needs to reach the hop
    /// `target`.
    ///
    /// `target` originates the cell, and then each hop from `target` back to
    /// the head encrypts it.  Every one of those hops is open, since
    /// `target` must be.
    ///
    /// Return the tag that an authenticated SENDME for this cell will carry.
    pub fn encrypt_outbound(
        &mut self,
        cell: &mut RelayCellBody,
        target: HopId,
    ) -> Result<[u8; SENDME_TAG_LEN]> {
        self.check_status(target, self.hop(target)?, HopStatus::Open)?;
        let tag = *self.crypto_mut(target)?.originate(cell);

        let mut id = target;
        while Some(id) != self.head {
            id = self.nodes[id].prev;
            self.crypto_mut(id)?.encrypt_outbound(cell);
        }
        Ok(tag)
    }

    /// Remove layers of encryption from an inbound `cell`, from the head
    /// onwards, until some hop recognizes it as its own.
    ///
    /// Return that hop, and the cell's SENDME tag.  If no open hop recognizes
    /// the cell, it is corrupt or forged.
    pub fn decrypt_inbound(
        &mut self,
        cell: &mut RelayCellBody,
    ) -> Result<(HopId, [u8; SENDME_TAG_LEN])> {
        let head = self
            .head
            .filter(|h| self.nodes[*h].hop.status() == HopStatus::Open)
            .ok_or_else(|| Error::CircProto("Received a relay cell with no open hops".into()))?;

        let mut id = head;
        loop {
            let Some(crypto) = self.nodes[id].hop.crypto_mut() else {
                break;
            };
            if let Some(tag) = crypto.decrypt_inbound(cell) {
                return Ok((id, *tag));
            }
            id = self.nodes[id].next;
            if id == head {
                break;
            }
        }
        Err(Error::BadCellAuth)
    }

    /// Check every invariant of this chain, and panic if one is broken.
    ///
    /// A broken invariant here means a bug in our own code, or in code that
    /// misused ours: hops opened out of order, keys on a hop that isn't open,
    /// windows that overflowed, links that disagree.  This is not for
    /// checking anything that came from the network.
    pub fn assert_consistent(&self) {
        let Some(head) = self.head else {
            assert!(self.nodes.is_empty(), "Chain has hops but no head");
            return;
        };

        let mut id = head;
        let mut n = 0_usize;
        loop {
            let node = self
                .nodes
                .get(id)
                .unwrap_or_else(|| panic!("Chain links to a missing hop"));
            let num = HopNum::from(u8::try_from(n).unwrap_or(u8::MAX));
            assert_eq!(
                self.nodes.get(node.next).map(|nx| nx.prev),
                Some(id),
                "Hop {} is not the hop before its next hop",
                num.display(),
            );
            node.hop.assert_consistent(num);
            if id != head && node.hop.status() != HopStatus::Closed {
                let prev = &self.nodes[node.prev].hop;
                assert_eq!(
                    prev.status(),
                    HopStatus::Open,
                    "Hop {} is {}, but the hop before it is {}",
                    num.display(),
                    node.hop.status(),
                    prev.status(),
                );
            }

            n += 1;
            assert!(n <= self.nodes.len(), "Chain does not return to its head");
            id = node.next;
            if id == head {
                break;
            }
        }
        assert_eq!(n, self.nodes.len(), "Chain doesn't reach every hop");
    }

    /// Run [`assert_consistent`](Self::assert_consistent) in debug builds.
    fn debug_check(&self) {
        if cfg!(debug_assertions) {
            self.assert_consistent();
        }
    }

    /// Return the node for `id`.
    fn node(&self, id: HopId) -> Result<&Node> {
        self.nodes.get(id).ok_or(Error::NoSuchHop)
    }

    /// Return the node for `id`, mutably.
    fn node_mut(&mut self, id: HopId) -> Result<&mut Node> {
        self.nodes.get_mut(id).ok_or(Error::NoSuchHop)
    }

    /// Return the crypto of `id`, which we know to be open.
    fn crypto_mut(&mut self, id: HopId) -> Result<&mut HopCrypto> {
        self.node_mut(id)?
            .hop
            .crypto_mut()
            .ok_or_else(|| internal!("Open hop without crypto").into())
    }

    /// Return an error unless `hop` (which is `id`) is in `expected` state.
    fn check_status(&self, id: HopId, hop: &HopState, expected: HopStatus) -> Result<()> {
        let found = hop.status();
        if found == expected {
            Ok(())
        } else {
            Err(Error::BadHopState {
                hop: self.hop_num(id)?,
                expected,
                found,
            })
        }
    }

    /// Return an error if `id` is open already (or doesn't exist).
    fn check_not_open(&self, id: HopId) -> Result<()> {
        let found = self.hop(id)?.status();
        if found == HopStatus::Open {
            return Err(Error::BadHopState {
                hop: self.hop_num(id)?,
                expected: HopStatus::AwaitingKeys,
                found,
            });
        }
        Ok(())
    }

    /// Return something that displays the position of `id`, for logging.
    fn display_hop(&self, id: HopId) -> String {
        match self.hop_num(id) {
            Ok(num) => num.display().to_string(),
            Err(_) => "#?".into(),
        }
    }
}

impl Drop for HopChain {
    fn drop(&mut self) {
        let n_hops = self.nodes.len();
        while let Some(head) = self.head {
            let next = self.nodes.get(head).map(|node| node.next);
            drop(self.nodes.remove(head));
            self.head = next.filter(|n| *n != head);
        }
        if n_hops > 0 {
            debug!(n_hops, "Tore down hop chain");
        }
    }
}

impl fmt::Debug for HopChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|(_, hop)| hop)).finish()
    }
}

/// An iterator over the hops of a [`HopChain`], from the head.
#[derive(Clone)]
pub struct HopChainIter<'a> {
    /// The chain we're iterating over.
    chain: &'a HopChain,
    /// The hop we'll return next.
    next: Option<HopId>,
    /// How many hops we have yet to return.
    remaining: usize,
}

impl<'a> Iterator for HopChainIter<'a> {
    type Item = (HopId, &'a HopState);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.next?;
        let node = self.chain.nodes.get(id)?;
        self.remaining -= 1;
        self.next = Some(node.next);
        Some((id, &node.hop))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for HopChainIter<'_> {}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;
    use crate::congestion::Vegas;
    use crate::congestion::params::CongestionControlParams;
    use crate::crypto::RelayCrypt;
    use assert_matches::assert_matches;
    use rand::RngCore;
    use tor_basic_utils::test_rng::testing_rng;
    use tor_linkspec::HasRelayIds;
    use tracing_test::traced_test;

    fn relay(n: u8) -> OwnedChanTarget {
        OwnedChanTarget::builder()
            .ed_identity([n; 32].into())
            .rsa_identity([n; 20].into())
            .build()
            .unwrap()
    }

    fn keys(n: u8) -> Vec<u8> {
        vec![n; 72]
    }

    fn open(chain: &mut HopChain, id: HopId, n: u8) {
        chain
            .begin_extend(id, PendingHandshake::new(()))
            .unwrap();
        chain
            .init_hop_crypto(id, RelayCryptoAlg::Tor1, &keys(n), false)
            .unwrap();
    }

    fn chain_of(n: u8) -> (HopChain, Vec<HopId>) {
        let mut chain = HopChain::new(FlowCtrlParams::default());
        let ids = (0..n).map(|i| chain.append(&relay(i))).collect();
        (chain, ids)
    }

    #[test]
    fn empty() {
        let chain = HopChain::new(FlowCtrlParams::default());
        assert!(chain.is_empty());
        assert_eq!(chain.hop_count(), 0);
        assert!(chain.head().is_none());
        assert!(chain.tail().is_none());
        assert!(chain.first_non_open().is_none());
        assert_eq!(chain.iter().count(), 0);
        chain.assert_consistent();
    }

    #[test]
    fn links() {
        let (chain, ids) = chain_of(1);
        assert_eq!(chain.next(ids[0]).unwrap(), ids[0]);
        assert_eq!(chain.prev(ids[0]).unwrap(), ids[0]);

        let (chain, ids) = chain_of(4);
        assert_eq!(chain.head(), Some(ids[0]));
        assert_eq!(chain.tail(), Some(ids[3]));
        assert_eq!(chain.hop_ids().collect::<Vec<_>>(), ids);
        assert_eq!(chain.next(ids[3]).unwrap(), ids[0]);
        assert_eq!(chain.prev(ids[0]).unwrap(), ids[3]);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(chain.hop_num(*id).unwrap(), HopNum::from(i as u8));
            assert!(
                chain
                    .hop(*id)
                    .unwrap()
                    .relay()
                    .same_relay_ids(&relay(i as u8))
            );
        }
        assert_eq!(chain.iter().len(), 4);
    }

    #[test]
    #[traced_test]
    fn lifecycle() {
        let (mut chain, ids) = chain_of(3);
        assert_eq!(chain.first_non_open(), Some(ids[0]));

        // Can't skip ahead.
        let e = chain
            .begin_extend(ids[1], PendingHandshake::new(()))
            .unwrap_err();
        assert_matches!(e, Error::HopOutOfOrder { hop } if hop == HopNum::from(1));
        assert_eq!(chain.hop(ids[1]).unwrap().status(), HopStatus::Closed);

        // Can't key a hop we never extended to.
        let e = chain
            .init_hop_crypto(ids[0], RelayCryptoAlg::Tor1, &keys(0), false)
            .unwrap_err();
        assert_matches!(
            e,
            Error::BadHopState {
                expected: HopStatus::AwaitingKeys,
                found: HopStatus::Closed,
                ..
            }
        );

        chain
            .begin_extend(ids[0], PendingHandshake::new(String::from("ntor")))
            .unwrap();
        assert!(chain.hop(ids[0]).unwrap().has_pending_handshake());
        // Only once.
        assert_matches!(
            chain.begin_extend(ids[0], PendingHandshake::new(())),
            Err(Error::BadHopState { .. })
        );

        chain
            .init_hop_crypto(ids[0], RelayCryptoAlg::Tor1, &keys(0), false)
            .unwrap();
        assert_eq!(chain.hop(ids[0]).unwrap().status(), HopStatus::Open);
        assert!(!chain.hop(ids[0]).unwrap().has_pending_handshake());
        assert_eq!(chain.first_non_open(), Some(ids[1]));
        assert!(logs_contain("Hop is open"));

        open(&mut chain, ids[1], 1);
        open(&mut chain, ids[2], 2);
        assert!(chain.first_non_open().is_none());
        chain.assert_consistent();
    }

    #[test]
    fn handshake_is_handed_back() {
        let (mut chain, ids) = chain_of(1);
        chain
            .begin_extend(ids[0], PendingHandshake::new(42_u64))
            .unwrap();
        let hs = chain.take_handshake(ids[0]).unwrap().unwrap();
        assert_eq!(hs.downcast::<u64>().unwrap(), 42);
        assert!(chain.take_handshake(ids[0]).unwrap().is_none());
    }

    #[test]
    fn bad_keys_leave_hop_waiting() {
        let (mut chain, ids) = chain_of(1);
        chain
            .begin_extend(ids[0], PendingHandshake::new(()))
            .unwrap();
        let e = chain
            .init_hop_crypto(ids[0], RelayCryptoAlg::Tor1, &[0; 71], false)
            .unwrap_err();
        assert_matches!(e, Error::BadKeyMaterial { expected: 72, got: 71, .. });
        let hop = chain.hop(ids[0]).unwrap();
        assert_eq!(hop.status(), HopStatus::AwaitingKeys);
        assert!(hop.sendme_tag().is_none());
        assert!(hop.has_pending_handshake());
        chain.assert_consistent();
    }

    #[test]
    #[should_panic(expected = "Hop #3 is awaiting keys, but the hop before it is closed")]
    fn awaiting_keys_out_of_order() {
        let (mut chain, ids) = chain_of(3);
        open(&mut chain, ids[0], 0);
        chain.nodes[ids[2]].hop.force_status(HopStatus::AwaitingKeys);
        chain.assert_consistent();
    }

    #[test]
    #[should_panic(expected = "Hop #3 is open, but the hop before it is closed")]
    fn open_out_of_order() {
        let (mut chain, ids) = chain_of(3);
        open(&mut chain, ids[0], 0);
        // Key the third hop while the second is still closed.
        let crypto = HopCrypto::new(RelayCryptoAlg::Tor1, &keys(2), false).unwrap();
        chain.nodes[ids[2]].hop.install_crypto(crypto);
        assert_eq!(chain.hop(ids[1]).unwrap().status(), HopStatus::Closed);
        chain.assert_consistent();
    }

    #[test]
    #[should_panic(expected = "Hop #1 is open but lacks crypto")]
    fn open_without_crypto() {
        let (mut chain, ids) = chain_of(1);
        chain.nodes[ids[0]].hop.force_status(HopStatus::Open);
        chain.assert_consistent();
    }

    #[test]
    fn settings_before_open() {
        let (mut chain, ids) = chain_of(2);
        chain
            .set_relay_cell_format(ids[0], RelayCellFormat::V1)
            .unwrap();
        assert_matches!(
            chain.hop(ids[0]).unwrap().relay_cell_format(),
            RelayCellFormat::V1
        );
        chain
            .attach_congestion_control(
                ids[0],
                Box::new(Vegas::new(&CongestionControlParams::default())),
            )
            .unwrap();
        assert_matches!(
            chain.attach_congestion_control(
                ids[0],
                Box::new(Vegas::new(&CongestionControlParams::default())),
            ),
            Err(Error::Bug(_))
        );

        open(&mut chain, ids[0], 0);
        assert_matches!(
            chain.set_relay_cell_format(ids[0], RelayCellFormat::V0),
            Err(Error::BadHopState { found: HopStatus::Open, .. })
        );
        assert_matches!(
            chain.attach_congestion_control(
                ids[0],
                Box::new(Vegas::new(&CongestionControlParams::default())),
            ),
            Err(Error::BadHopState { .. })
        );
        assert!(chain.hop(ids[0]).unwrap().congestion_control().is_some());
        assert!(chain.hop(ids[1]).unwrap().congestion_control().is_none());
    }

    #[test]
    #[traced_test]
    fn destroy_hops() {
        let (mut chain, ids) = chain_of(4);
        open(&mut chain, ids[0], 0);
        open(&mut chain, ids[1], 1);

        // Middle.
        chain.destroy_hop(ids[1]).unwrap();
        assert_eq!(chain.hop_ids().collect::<Vec<_>>(), vec![ids[0], ids[2], ids[3]]);
        assert_matches!(chain.hop(ids[1]), Err(Error::NoSuchHop));
        assert_matches!(chain.destroy_hop(ids[1]), Err(Error::NoSuchHop));
        assert!(chain.sendme_tag(ids[1]).is_none());
        assert!(logs_contain("Destroyed hop"));

        // Head.
        chain.destroy_hop(ids[0]).unwrap();
        assert_eq!(chain.head(), Some(ids[2]));
        assert_eq!(chain.prev(ids[2]).unwrap(), ids[3]);

        // Tail.
        chain.destroy_hop(ids[3]).unwrap();
        assert_eq!(chain.next(ids[2]).unwrap(), ids[2]);

        // Last.
        chain.destroy_hop(ids[2]).unwrap();
        assert!(chain.is_empty());
        assert!(chain.head().is_none());
        chain.assert_consistent();
    }

    #[test]
    fn layered_crypto() {
        let mut rng = testing_rng();
        let (mut chain, ids) = chain_of(3);
        let mut relays: Vec<Box<dyn RelayCrypt + Send>> = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            open(&mut chain, *id, i as u8);
            relays.push(
                HopCrypto::relay_side(RelayCryptoAlg::Tor1, &keys(i as u8), false).unwrap(),
            );
        }

        for target in 0..3 {
            for _ in 0..20 {
                let mut orig = [0_u8; 509];
                rng.fill_bytes(&mut orig);
                let mut cell: RelayCellBody = Box::new(orig).into();

                // Outbound: only `target` recognizes the cell.
                let tag = chain.encrypt_outbound(&mut cell, ids[target]).unwrap();
                assert_eq!(chain.sendme_tag(ids[target]).unwrap(), &tag[..]);
                for (i, relay) in relays.iter_mut().enumerate().take(target + 1) {
                    assert_eq!(relay.decrypt_outbound(&mut cell), i == target);
                }
                assert_eq!(&cell.as_ref()[11..], &orig[11..]);

                // Inbound, from `target`.
                rng.fill_bytes(&mut orig);
                let mut cell: RelayCellBody = Box::new(orig).into();
                relays[target].originate(&mut cell);
                for relay in relays[..=target].iter_mut().rev() {
                    relay.encrypt_inbound(&mut cell);
                }
                let (hop, tag) = chain.decrypt_inbound(&mut cell).unwrap();
                assert_eq!(hop, ids[target]);
                assert_eq!(chain.sendme_tag(hop).unwrap(), &tag[..]);
                assert_eq!(&cell.as_ref()[11..], &orig[11..]);
            }
        }

        // Nobody recognizes junk.
        let mut cell: RelayCellBody = Box::new([0x5a; 509]).into();
        assert_matches!(chain.decrypt_inbound(&mut cell), Err(Error::BadCellAuth));
    }

    #[test]
    fn crypto_needs_open_hops() {
        let (mut chain, ids) = chain_of(2);
        let mut cell: RelayCellBody = Box::new([0; 509]).into();
        assert_matches!(
            chain.decrypt_inbound(&mut cell),
            Err(Error::CircProto(_))
        );
        assert_matches!(
            chain.encrypt_outbound(&mut cell, ids[0]),
            Err(Error::BadHopState { .. })
        );

        // Inbound cells only get as far as the open hops.
        open(&mut chain, ids[0], 0);
        assert_matches!(chain.decrypt_inbound(&mut cell), Err(Error::BadCellAuth));
        assert_matches!(
            chain.encrypt_outbound(&mut cell, ids[1]),
            Err(Error::BadHopState { .. })
        );
    }

    #[test]
    #[traced_test]
    fn drop_chain() {
        let (mut chain, ids) = chain_of(3);
        open(&mut chain, ids[0], 0);
        chain.destroy();
        assert!(logs_contain("Tore down hop chain"));
    }
}
