//! Define an error type for the tor-hopchain crate.
use thiserror::Error;
use tor_error::{ErrorKind, HasKind};

use crate::crypto::RelayCryptoAlg;
use crate::hop::{HopNum, HopStatus};

/// An error type for the tor-hopchain crate.
///
/// These are the failures that the code driving a circuit is expected to
/// handle: it decides whether to retry a hop, or to tear the circuit down.
/// Broken internal invariants are not reported here; they panic.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// We were asked about a hop that isn't on this chain.
    ///
    /// Usually this means that the hop has already been destroyed.
    #[error("No such hop on this circuit")]
    NoSuchHop,
    /// Tried to start extending to a hop before the hop in front of it was
    /// open.
    #[error("Hop {} can't await keys before the hop before it is open", .hop.display())]
    HopOutOfOrder {
        /// The hop we tried to move forward.
        hop: HopNum,
    },
    /// Tried to do something with a hop that its lifecycle state doesn't
    /// permit.
    #[error("Hop {} is {found}, but needed to be {expected}", .hop.display())]
    BadHopState {
        /// The hop in question.
        hop: HopNum,
        /// The state the operation requires.
        expected: HopStatus,
        /// The state the hop is actually in.
        found: HopStatus,
    },
    /// The key material we were given can't key this algorithm.
    #[error("Wrong key material length for {alg}: expected {expected} bytes, got {got}")]
    BadKeyMaterial {
        /// The algorithm we were keying.
        alg: RelayCryptoAlg,
        /// How many bytes the algorithm needs.
        expected: usize,
        /// How many bytes we got.
        got: usize,
    },
    /// Protocol violation at the circuit level.
    ///
    /// This covers flow-control violations: data beyond what a window
    /// permits, and SENDMEs that we did not expect or could not authenticate.
    #[error("Circuit protocol violation: {0}")]
    CircProto(String),
    /// The authentication information on this cell was completely wrong,
    /// or the cell was corrupted.
    #[error("Bad relay cell authentication")]
    BadCellAuth,
    /// There was a programming error somewhere in our code, or the calling code.
    #[error("Programming error")]
    Bug(#[from] tor_error::Bug),
}

impl HasKind for Error {
    fn kind(&self) -> ErrorKind {
        use Error as E;
        use ErrorKind as EK;
        match self {
            E::NoSuchHop => EK::BadApiUsage,
            E::HopOutOfOrder { .. } => EK::BadApiUsage,
            E::BadHopState { .. } => EK::BadApiUsage,
            E::BadKeyMaterial { .. } => EK::BadApiUsage,
            E::CircProto(_) => EK::TorProtocolViolation,
            E::BadCellAuth => EK::TorProtocolViolation,
            E::Bug(e) => e.kind(),
        }
    }
}
