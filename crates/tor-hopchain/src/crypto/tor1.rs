//! An implementation of Tor's current relay cell cryptography.
//!
//! These are not very good algorithms; they were the best we could come up
//! with in ~2002.  They are somewhat inefficient, and vulnerable to tagging
//! attacks.
//!
//! This design is called `tor1`; it does not have a generally recognized
//! name.

use cipher::{KeyIvInit, StreamCipher};
use digest::Digest;
use digest::generic_array::GenericArray;
use typenum::Unsigned;

use super::{InboundClientLayer, OutboundClientLayer, RelayCellBody, RelayCryptoAlg};
use crate::util::wipe::{self, FlatState};
use crate::util::ct;
use crate::{Error, Result};

/// Where the `recognized` field lives in a relay cell body.
const RECOGNIZED_RANGE: std::ops::Range<usize> = 1..3;
/// Where the `digest` field lives in a relay cell body.
const DIGEST_RANGE: std::ops::Range<usize> = 5..9;
/// What the `digest` field holds while we compute the digest.
const EMPTY_DIGEST: &[u8] = &[0, 0, 0, 0];

/// The relay's side of a hop's crypto state.
///
/// This is the counterpart to a client's `HopCrypto`: the relay decrypts the
/// cells that the client sends outbound, and encrypts the ones it sends back.
pub trait RelayCrypt {
    /// Prepare a cell body to be sent towards the client.
    fn originate(&mut self, cell: &mut RelayCellBody);
    /// Encrypt a cell body to be sent towards the client.
    fn encrypt_inbound(&mut self, cell: &mut RelayCellBody);
    /// Decrypt a cell body that was sent away from the client.
    ///
    /// Return true if it is addressed to us.
    fn decrypt_outbound(&mut self, cell: &mut RelayCellBody) -> bool;
}

/// One layer of shared cryptographic state between a relay and a client for
/// a single hop, in a single direction.
///
/// It is parameterized on a stream cipher and a digest type: most circuits
/// use AES-128-CTR and SHA1, but v3 onion services use AES-256-CTR and SHA-3.
pub(super) struct CryptState<SC: StreamCipher, D: Digest + Clone + Default + FlatState> {
    /// Stream cipher for en/decrypting cell bodies.  Keyed with `Kf` or `Kb`.
    cipher: SC,
    /// Running digest for authenticating cells.  Seeded with `Df` or `Db`.
    digest: D,
    /// Most recent digest value generated by this crypto.
    last_digest_val: GenericArray<u8, D::OutputSize>,
}

/// Both layers shared between a client and one relay: `fwd` for cells sent
/// away from the client, `back` for cells sent towards it.
pub(super) struct CryptStatePair<SC: StreamCipher, D: Digest + Clone + Default + FlatState> {
    /// State for cells sent away from the client.
    fwd: CryptState<SC, D>,
    /// State for cells sent towards the client.
    back: CryptState<SC, D>,
}

/// Standard `tor1` relay crypto.
pub(super) type Tor1RelayCrypto =
    CryptStatePair<tor_llcrypto::cipher::aes::Aes128Ctr, tor_llcrypto::d::Sha1>;

/// `tor1` relay crypto as used on the last hop of an onion-service
/// rendezvous circuit.
pub(super) type Tor1Hsv3RelayCrypto =
    CryptStatePair<tor_llcrypto::cipher::aes::Aes256Ctr, tor_llcrypto::d::Sha3_256>;

impl<SC, D> CryptStatePair<SC, D>
where
    SC: StreamCipher + KeyIvInit,
    D: Digest + Clone + Default + FlatState,
{
    /// Return the number of bytes of key material that `initialize` needs.
    pub(super) fn seed_len() -> usize {
        SC::KeySize::to_usize() * 2 + D::OutputSize::to_usize() * 2
    }

    /// Key a new pair from `seed`, laid out as `Df | Db | Kf | Kb`.
    pub(super) fn initialize(alg: RelayCryptoAlg, mut seed: &[u8]) -> Result<Self> {
        if seed.len() != Self::seed_len() {
            return Err(Error::BadKeyMaterial {
                alg,
                expected: Self::seed_len(),
                got: seed.len(),
            });
        }

        // Advances `seed` by `n` bytes, returning the advanced bytes
        let mut take_seed = |n: usize| -> &[u8] {
            let res = &seed[..n];
            seed = &seed[n..];
            res
        };

        let dlen = D::OutputSize::to_usize();
        let keylen = SC::KeySize::to_usize();

        let df = take_seed(dlen);
        let db = take_seed(dlen);
        let kf = take_seed(keylen);
        let kb = take_seed(keylen);

        Ok(CryptStatePair {
            fwd: CryptState::new(kf, df),
            back: CryptState::new(kb, db),
        })
    }

    /// Swap the two directions if `reverse` is set.
    fn oriented(mut self, reverse: bool) -> Self {
        if reverse {
            std::mem::swap(&mut self.fwd, &mut self.back);
        }
        self
    }

    /// Split this pair into a client's outbound and inbound layers.
    pub(super) fn split(self, reverse: bool) -> (CryptState<SC, D>, CryptState<SC, D>) {
        let CryptStatePair { fwd, back } = self.oriented(reverse);
        (fwd, back)
    }

    /// Turn this pair into the relay's end of the hop.
    pub(super) fn into_relay(self, reverse: bool) -> Self {
        self.oriented(reverse)
    }
}

impl<SC, D> CryptState<SC, D>
where
    SC: StreamCipher + KeyIvInit,
    D: Digest + Clone + Default + FlatState,
{
    /// Construct a new layer from a cipher key and a digest seed.
    ///
    /// The cipher runs in counter mode from an all-zero IV.
    fn new(key: &[u8], digest_seed: &[u8]) -> Self {
        CryptState {
            cipher: SC::new(key.into(), &Default::default()),
            digest: D::new().chain_update(digest_seed),
            last_digest_val: GenericArray::default(),
        }
    }
}

impl<SC: StreamCipher, D: Digest + Clone + Default + FlatState> Drop for CryptState<SC, D> {
    fn drop(&mut self) {
        // The cipher zeroizes its own key schedule.
        wipe::wipe_state(&mut self.digest);
        wipe::poison(&mut self.last_digest_val[..]);
    }
}

impl<SC: StreamCipher, D: Digest + Clone + Default + FlatState> RelayCrypt
    for CryptStatePair<SC, D>
{
    fn originate(&mut self, cell: &mut RelayCellBody) {
        let mut d_ignored = GenericArray::default();
        cell.set_digest(&mut self.back.digest, &mut d_ignored);
    }
    fn encrypt_inbound(&mut self, cell: &mut RelayCellBody) {
        self.back.cipher.apply_keystream(cell.as_mut());
    }
    fn decrypt_outbound(&mut self, cell: &mut RelayCellBody) -> bool {
        self.fwd.cipher.apply_keystream(cell.as_mut());
        let mut d_ignored = GenericArray::default();
        cell.is_recognized(&mut self.fwd.digest, &mut d_ignored)
    }
}

impl<SC: StreamCipher, D: Digest + Clone + Default + FlatState> OutboundClientLayer
    for CryptState<SC, D>
{
    fn originate_for(&mut self, cell: &mut RelayCellBody) -> &[u8] {
        cell.set_digest(&mut self.digest, &mut self.last_digest_val);
        self.encrypt_outbound(cell);
        // SHA3-256 tags get truncated here.
        &self.last_digest_val[..super::SENDME_TAG_LEN]
    }
    fn encrypt_outbound(&mut self, cell: &mut RelayCellBody) {
        self.cipher.apply_keystream(cell.as_mut());
    }
}

impl<SC: StreamCipher, D: Digest + Clone + Default + FlatState> InboundClientLayer
    for CryptState<SC, D>
{
    fn decrypt_inbound(&mut self, cell: &mut RelayCellBody) -> Option<&[u8]> {
        self.cipher.apply_keystream(cell.as_mut());
        if cell.is_recognized(&mut self.digest, &mut self.last_digest_val) {
            Some(&self.last_digest_val[..super::SENDME_TAG_LEN])
        } else {
            None
        }
    }
}

/// Functions on RelayCellBody that implement the digest/recognized
/// algorithm.
///
/// A cell is addressed to its current recipient if its two-byte `recognized`
/// field is all-zero, and its four-byte `digest` field holds a prefix of the
/// running digest of every cell so far to this recipient (this one included,
/// with the digest field zeroed).
impl RelayCellBody {
    /// Prepare a cell body by setting its digest and recognized field.
    fn set_digest<D: Digest + Clone>(
        &mut self,
        d: &mut D,
        used_digest: &mut GenericArray<u8, D::OutputSize>,
    ) {
        let body = self.as_mut();
        body[RECOGNIZED_RANGE].fill(0);
        body[DIGEST_RANGE].fill(0);

        d.update(&body[..]);
        *used_digest = d.clone().finalize();
        body[DIGEST_RANGE].copy_from_slice(&used_digest[..DIGEST_RANGE.len()]);
    }

    /// Check whether this just-decrypted cell is now an authenticated
    /// plaintext.
    ///
    /// On success, the running digest `d` absorbs the cell, and `rcvd` holds
    /// the full digest.  Otherwise neither is touched: either further
    /// decryption is required, or the cell is corrupt.
    fn is_recognized<D: Digest + Clone>(
        &self,
        d: &mut D,
        rcvd: &mut GenericArray<u8, D::OutputSize>,
    ) -> bool {
        let body = self.as_ref();
        if !ct::is_zero(&body[RECOGNIZED_RANGE]) {
            return false;
        }

        let mut dtmp = d.clone();
        dtmp.update(&body[..DIGEST_RANGE.start]);
        dtmp.update(EMPTY_DIGEST);
        dtmp.update(&body[DIGEST_RANGE.end..]);
        let dtmp_clone = dtmp.clone();
        let result = dtmp.finalize();

        if ct::bytes_eq(&body[DIGEST_RANGE], &result[..DIGEST_RANGE.len()]) {
            *d = dtmp_clone;
            *rcvd = result;
            return true;
        }

        false
    }
}
