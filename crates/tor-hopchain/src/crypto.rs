//! Relay cell cryptography for a single hop.
//!
//! A client shares two cryptographic states with every relay on its circuit:
//! one for "outbound" cells (away from the client), and one for "inbound"
//! cells (towards the client).  We call each of those a "layer".  A
//! [`HopCrypto`] holds both layers for one hop, as keyed from the output of
//! that hop's circuit-extension handshake.
//!
//! The handshake produces a blob of key material.  For the algorithms here
//! (`tor1`, see [`RelayCryptoAlg`]) that blob is split, in order, into a
//! forward digest seed `Df`, a backward digest seed `Db`, a forward cipher key
//! `Kf` and a backward cipher key `Kb`.  The two ends of a handshake derive
//! the same blob; when they need to use it in mirrored roles (as the two
//! ends of an onion-service rendezvous do), one of them keys with `reverse`
//! set, which swaps the forward and backward halves.

mod tor1;

use std::fmt;

use tor_cell::chancell::BoxedCellBody;
use tracing::trace;

use crate::Result;
use crate::util::wipe;

pub use tor1::RelayCrypt;

/// The length of the tag that we include (with this algorithm) in an
/// authenticated SENDME message.
pub const SENDME_TAG_LEN: usize = 20;

/// Type for the body of a relay cell.
#[derive(Clone, derive_more::From, derive_more::Into)]
pub struct RelayCellBody(BoxedCellBody);

impl AsRef<[u8]> for RelayCellBody {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}
impl AsMut<[u8]> for RelayCellBody {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0[..]
    }
}

/// A relay cell encryption algorithm, together with its key layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum RelayCryptoAlg {
    /// The original relay crypto: AES-128-CTR with running SHA-1 digests.
    ///
    /// Keyed from 72 bytes: `Df` (20), `Db` (20), `Kf` (16), `Kb` (16).
    Tor1,
    /// The variant of `tor1` used on the last hop of a v3 onion-service
    /// rendezvous circuit: AES-256-CTR with running SHA3-256 digests.
    ///
    /// Keyed from 128 bytes: `Df` (32), `Db` (32), `Kf` (32), `Kb` (32).
    Tor1Hsv3,
}

impl RelayCryptoAlg {
    /// Return the number of bytes of key material needed to key this algorithm.
    pub fn key_material_len(&self) -> usize {
        match self {
            RelayCryptoAlg::Tor1 => tor1::Tor1RelayCrypto::seed_len(),
            RelayCryptoAlg::Tor1Hsv3 => tor1::Tor1Hsv3RelayCrypto::seed_len(),
        }
    }
}

impl fmt::Display for RelayCryptoAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayCryptoAlg::Tor1 => write!(f, "tor1"),
            RelayCryptoAlg::Tor1Hsv3 => write!(f, "tor1-hsv3"),
        }
    }
}

/// A client's view of the cryptographic state shared with a single relay on a
/// circuit, as used for outbound cells.
pub(crate) trait OutboundClientLayer {
    /// Prepare a RelayCellBody to be sent to the relay at this layer, and
    /// encrypt it.
    ///
    /// Return the authentication tag.
    fn originate_for(&mut self, cell: &mut RelayCellBody) -> &[u8];
    /// Encrypt a RelayCellBody to be decrypted by this layer.
    fn encrypt_outbound(&mut self, cell: &mut RelayCellBody);
}

/// A client's view of the crypto state shared with a single relay on a circuit,
/// as used for inbound cells.
pub(crate) trait InboundClientLayer {
    /// Decrypt a CellBody that passed through this layer.
    ///
    /// Return an authentication tag if this layer is the originator.
    fn decrypt_inbound(&mut self, cell: &mut RelayCellBody) -> Option<&[u8]>;
}

/// The keyed relay-cell crypto that a client shares with one hop.
///
/// This only exists for hops that are open: it is created from the key
/// material that the hop's handshake produced, and it is wiped when the hop
/// is destroyed.
pub struct HopCrypto {
    /// Which algorithm we were keyed for.
    alg: RelayCryptoAlg,
    /// The layer for cells we send to (or through) this hop.
    fwd: Box<dyn OutboundClientLayer + Send>,
    /// The layer for cells we receive from (or through) this hop.
    back: Box<dyn InboundClientLayer + Send>,
    /// The authentication tag of the most recent cell that this hop either
    /// originated or recognized.
    ///
    /// SENDMEs for this hop are bound to this value.  Any encryption or
    /// decryption at this hop can change it.
    sendme_tag: [u8; SENDME_TAG_LEN],
}

impl HopCrypto {
    /// Key a new `HopCrypto` for `alg` from `key_material`.
    ///
    /// If `reverse` is set, the forward and backward halves of the key
    /// material trade places.
    ///
    /// Fails if `key_material` is not exactly
    /// [`alg.key_material_len()`](RelayCryptoAlg::key_material_len) bytes long.
    pub fn new(alg: RelayCryptoAlg, key_material: &[u8], reverse: bool) -> Result<Self> {
        let (fwd, back): (
            Box<dyn OutboundClientLayer + Send>,
            Box<dyn InboundClientLayer + Send>,
        ) = match alg {
            RelayCryptoAlg::Tor1 => {
                let (f, b) = tor1::Tor1RelayCrypto::initialize(alg, key_material)?.split(reverse);
                (Box::new(f), Box::new(b))
            }
            RelayCryptoAlg::Tor1Hsv3 => {
                let (f, b) =
                    tor1::Tor1Hsv3RelayCrypto::initialize(alg, key_material)?.split(reverse);
                (Box::new(f), Box::new(b))
            }
        };
        trace!(%alg, reverse, "Keyed relay crypto for hop");
        Ok(HopCrypto {
            alg,
            fwd,
            back,
            sendme_tag: [0; SENDME_TAG_LEN],
        })
    }

    /// Key the relay's side of a hop for `alg` from `key_material`.
    ///
    /// This is what the relay at the far end of a hop holds: it is keyed from
    /// the same material as the client's [`HopCrypto`].
    pub fn relay_side(
        alg: RelayCryptoAlg,
        key_material: &[u8],
        reverse: bool,
    ) -> Result<Box<dyn RelayCrypt + Send>> {
        Ok(match alg {
            RelayCryptoAlg::Tor1 => Box::new(
                tor1::Tor1RelayCrypto::initialize(alg, key_material)?.into_relay(reverse),
            ),
            RelayCryptoAlg::Tor1Hsv3 => Box::new(
                tor1::Tor1Hsv3RelayCrypto::initialize(alg, key_material)?.into_relay(reverse),
            ),
        })
    }

    /// Return the algorithm this hop was keyed for.
    pub fn alg(&self) -> RelayCryptoAlg {
        self.alg
    }

    /// Return the SENDME tag of the most recent cell that this hop originated
    /// or recognized.
    pub fn sendme_tag(&self) -> &[u8] {
        &self.sendme_tag[..]
    }

    /// Prepare `cell` to be delivered to this hop, and apply this hop's layer
    /// of encryption to it.
    ///
    /// Returns the tag that an authenticated SENDME for this cell will carry.
    pub(crate) fn originate(&mut self, cell: &mut RelayCellBody) -> &[u8; SENDME_TAG_LEN] {
        let tag = self.fwd.originate_for(cell);
        self.sendme_tag.copy_from_slice(&tag[..SENDME_TAG_LEN]);
        &self.sendme_tag
    }

    /// Apply this hop's layer of encryption to a cell headed for a hop
    /// further along the circuit.
    pub(crate) fn encrypt_outbound(&mut self, cell: &mut RelayCellBody) {
        self.fwd.encrypt_outbound(cell);
    }

    /// Remove this hop's layer of encryption from an inbound cell.
    ///
    /// Returns the cell's tag if this hop originated the cell.
    pub(crate) fn decrypt_inbound(
        &mut self,
        cell: &mut RelayCellBody,
    ) -> Option<&[u8; SENDME_TAG_LEN]> {
        let tag = self.back.decrypt_inbound(cell)?;
        self.sendme_tag.copy_from_slice(&tag[..SENDME_TAG_LEN]);
        Some(&self.sendme_tag)
    }
}

impl Drop for HopCrypto {
    fn drop(&mut self) {
        // The layers wipe their own keys and digests when dropped.
        wipe::poison(&mut self.sendme_tag[..]);
    }
}

impl fmt::Debug for HopCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HopCrypto")
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

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
    use crate::Error;
    use assert_matches::assert_matches;
    use rand::RngCore;
    use tor_basic_utils::test_rng::testing_rng;

    #[test]
    fn key_lengths() {
        assert_eq!(RelayCryptoAlg::Tor1.key_material_len(), 20 + 20 + 16 + 16);
        assert_eq!(RelayCryptoAlg::Tor1Hsv3.key_material_len(), 32 * 4);
    }

    #[test]
    fn wrong_length() {
        let k = [0x11_u8; 71];
        let err = HopCrypto::new(RelayCryptoAlg::Tor1, &k[..], false).unwrap_err();
        assert_matches!(
            err,
            Error::BadKeyMaterial {
                alg: RelayCryptoAlg::Tor1,
                expected: 72,
                got: 71
            }
        );

        let k = [0x11_u8; 72];
        assert!(HopCrypto::new(RelayCryptoAlg::Tor1Hsv3, &k[..], false).is_err());
        assert!(HopCrypto::relay_side(RelayCryptoAlg::Tor1, &k[..71], false).is_err());
    }

    fn random_cell(rng: &mut impl RngCore) -> ([u8; 509], RelayCellBody) {
        let mut orig = [0_u8; 509];
        rng.fill_bytes(&mut orig);
        let cell: RelayCellBody = Box::new(orig).into();
        (orig, cell)
    }

    fn one_hop_roundtrip(alg: RelayCryptoAlg) {
        let mut rng = testing_rng();
        let mut k = vec![0_u8; alg.key_material_len()];
        rng.fill_bytes(&mut k);

        let mut client = HopCrypto::new(alg, &k, false).unwrap();
        let mut relay = HopCrypto::relay_side(alg, &k, false).unwrap();
        assert_eq!(client.alg(), alg);

        for _ in 0..50 {
            // Towards the relay.
            let (orig, mut cell) = random_cell(&mut rng);
            let tag = *client.originate(&mut cell);
            assert_eq!(client.sendme_tag(), &tag[..]);
            assert_ne!(&cell.as_ref()[11..], &orig[11..]);
            assert!(relay.decrypt_outbound(&mut cell));
            assert_eq!(&cell.as_ref()[11..], &orig[11..]);

            // Towards the client.
            let (orig, mut cell) = random_cell(&mut rng);
            relay.originate(&mut cell);
            relay.encrypt_inbound(&mut cell);
            let tag = client.decrypt_inbound(&mut cell).copied();
            assert!(tag.is_some());
            assert_eq!(client.sendme_tag(), &tag.unwrap()[..]);
            assert_eq!(&cell.as_ref()[11..], &orig[11..]);
        }
    }

    #[test]
    fn roundtrip_tor1() {
        one_hop_roundtrip(RelayCryptoAlg::Tor1);
    }

    #[test]
    fn roundtrip_tor1_hsv3() {
        one_hop_roundtrip(RelayCryptoAlg::Tor1Hsv3);
    }

    #[test]
    fn reversed_ends_interoperate() {
        // Two clients keyed from the same material, one of them reversed,
        // can talk to each other directly.  This is the rendezvous case.
        let k: Vec<u8> = (0..128).collect();
        let mut a = HopCrypto::new(RelayCryptoAlg::Tor1Hsv3, &k, false).unwrap();
        let mut b = HopCrypto::new(RelayCryptoAlg::Tor1Hsv3, &k, true).unwrap();

        let mut rng = testing_rng();
        for _ in 0..10 {
            let (orig, mut cell) = random_cell(&mut rng);
            let sent_tag = *a.originate(&mut cell);
            let got_tag = b.decrypt_inbound(&mut cell).copied();
            assert_eq!(got_tag, Some(sent_tag));
            assert_eq!(&cell.as_ref()[11..], &orig[11..]);

            let (orig, mut cell) = random_cell(&mut rng);
            let sent_tag = *b.originate(&mut cell);
            let got_tag = a.decrypt_inbound(&mut cell).copied();
            assert_eq!(got_tag, Some(sent_tag));
            assert_eq!(&cell.as_ref()[11..], &orig[11..]);
        }

        // Without the reversal, they don't.
        let mut c = HopCrypto::new(RelayCryptoAlg::Tor1Hsv3, &k, false).unwrap();
        let (_, mut cell) = random_cell(&mut rng);
        a.originate(&mut cell);
        assert!(c.decrypt_inbound(&mut cell).is_none());
    }

    #[test]
    fn junk_is_not_recognized() {
        let k = [0x42_u8; 72];
        let mut client = HopCrypto::new(RelayCryptoAlg::Tor1, &k, false).unwrap();
        let before = client.sendme_tag().to_vec();
        let mut cell: RelayCellBody = Box::new([0x55_u8; 509]).into();
        assert!(client.decrypt_inbound(&mut cell).is_none());
        assert_eq!(client.sendme_tag(), &before[..]);
    }
}
