//! The state of a single hop on a circuit.

use std::any::Any;
use std::fmt;
use std::time::Instant;

use tor_cell::relaycell::RelayCellFormat;
use tor_error::internal;
use tor_linkspec::OwnedChanTarget;

use crate::congestion::{CongestionControl, CongestionSignals};
use crate::crypto::{HopCrypto, SENDME_TAG_LEN};
use crate::flowctl::{
    CIRCWINDOW_START, DeliverWindow, FlowCtrlParams, PackageWindow, SendmeValidator,
};
use crate::{Error, Result};

/// Type to store hop indices on a circuit.
///
/// Hop indices are zero-based: "0" denotes the first hop on the circuit.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct HopNum(u8);

impl HopNum {
    /// Return an object that implements [`Display`](std::fmt::Display) for printing `HopNum`s.
    ///
    /// This will display the `HopNum` as a 1-indexed value (the string representation of the first
    /// hop is `"#1"`).
    ///
    /// To display the zero-based underlying representation of the `HopNum`, use
    /// [`Debug`](std::fmt::Debug).
    pub fn display(&self) -> HopNumDisplay {
        HopNumDisplay(*self)
    }
}

/// A helper for displaying [`HopNum`]s.
///
/// The [`Display`](std::fmt::Display) of this type displays the `HopNum` as a 1-based index
/// prefixed with the number sign (`#`).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct HopNumDisplay(HopNum);

impl fmt::Display for HopNumDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", u16::from(self.0.0) + 1)
    }
}

impl From<HopNum> for u8 {
    fn from(hop: HopNum) -> u8 {
        hop.0
    }
}

impl From<u8> for HopNum {
    fn from(v: u8) -> HopNum {
        HopNum(v)
    }
}

impl From<HopNum> for usize {
    fn from(hop: HopNum) -> usize {
        usize::from(hop.0)
    }
}

/// Where a hop is in its lifecycle.
///
/// Hops only ever move forward through these states.  A hop that fails is
/// destroyed, not moved back.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[non_exhaustive]
pub enum HopStatus {
    /// We have chosen the relay, but haven't asked to extend to it yet.
    Closed,
    /// We've sent the handshake that extends the circuit to this hop, and are
    /// waiting for the key material that comes back.
    AwaitingKeys,
    /// The hop is keyed and can carry traffic.
    Open,
}

impl fmt::Display for HopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HopStatus::Closed => "closed",
            HopStatus::AwaitingKeys => "awaiting keys",
            HopStatus::Open => "open",
        };
        f.write_str(s)
    }
}

/// The state of a circuit-extension handshake that is still in progress.
///
/// This is opaque to us: the handshake code puts whatever it needs in here,
/// and gets it back with [`downcast`](PendingHandshake::downcast).
pub struct PendingHandshake(Box<dyn Any + Send>);

impl PendingHandshake {
    /// Wrap `state` as a pending handshake.
    pub fn new<T: Any + Send>(state: T) -> Self {
        PendingHandshake(Box::new(state))
    }

    /// Return true if this handshake state is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Recover the handshake state, if it is a `T`.
    ///
    /// Otherwise, give it back unchanged.
    pub fn downcast<T: Any>(self) -> std::result::Result<T, Self> {
        self.0.downcast::<T>().map(|b| *b).map_err(PendingHandshake)
    }
}

impl fmt::Debug for PendingHandshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PendingHandshake").finish_non_exhaustive()
    }
}

/// Everything a client knows about one hop of a circuit.
///
/// A `HopState` lives inside a [`HopChain`](crate::HopChain), which enforces
/// the order in which hops open.  What the chain hands out directly is the
/// read-only view and the flow-control operations.
pub struct HopState {
    /// Where we are in the lifecycle.
    status: HopStatus,
    /// The relay this hop goes to.
    ///
    /// This is our own copy; we don't depend on the directory for it.
    relay: OwnedChanTarget,
    /// The keyed relay crypto.  Present exactly when `status` is `Open`.
    crypto: Option<HopCrypto>,
    /// The handshake in progress, if any.  Only ever present while `AwaitingKeys`.
    handshake: Option<PendingHandshake>,
    /// The relay cell format negotiated for this hop.
    cell_format: RelayCellFormat,
    /// Send-side window.  Not consulted if `cc` is present.
    package_window: PackageWindow,
    /// Receive-side window.
    deliver_window: DeliverWindow,
    /// Tags of cells that we expect SENDMEs for.
    sendme_validator: SendmeValidator,
    /// Congestion control, if this hop uses it.
    ///
    /// Keep this after `relay`: fields are released in order.
    cc: Option<Box<dyn CongestionControl>>,
}

impl HopState {
    /// Construct a new closed hop to `relay`, with fresh windows.
    pub(crate) fn new(relay: OwnedChanTarget, params: &FlowCtrlParams) -> Self {
        HopState {
            status: HopStatus::Closed,
            relay,
            crypto: None,
            handshake: None,
            cell_format: RelayCellFormat::V0,
            package_window: PackageWindow::new(params),
            deliver_window: DeliverWindow::new(params),
            sendme_validator: SendmeValidator::new(),
            cc: None,
        }
    }

    /// Return where this hop is in its lifecycle.
    pub fn status(&self) -> HopStatus {
        self.status
    }

    /// Return the relay this hop goes to.
    pub fn relay(&self) -> &OwnedChanTarget {
        &self.relay
    }

    /// Return the relay cell format negotiated for this hop.
    pub fn relay_cell_format(&self) -> RelayCellFormat {
        self.cell_format
    }

    /// Return true if there is a handshake in progress with this hop.
    pub fn has_pending_handshake(&self) -> bool {
        self.handshake.is_some()
    }

    /// Return the SENDME tag of the last cell this hop originated or
    /// recognized, or None if the hop isn't open.
    pub fn sendme_tag(&self) -> Option<&[u8]> {
        self.crypto.as_ref().map(HopCrypto::sendme_tag)
    }

    /// Return the congestion control attached to this hop, if any.
    pub fn congestion_control(&self) -> Option<&dyn CongestionControl> {
        self.cc.as_deref()
    }

    /// Return true if flow control (or congestion control) allows us to send
    /// a data cell towards this hop.
    pub fn can_send(&self) -> bool {
        match &self.cc {
            Some(cc) => cc.can_send(),
            None => self.package_window.window() > 0,
        }
    }

    /// Account for a data cell that we just sent towards this hop, at `now`.
    ///
    /// Call this right after the cell went through
    /// [`HopChain::encrypt_outbound`](crate::HopChain::encrypt_outbound): the
    /// cell's tag is the hop's current SENDME tag.
    ///
    /// Sending a cell that [`can_send`](Self::can_send) didn't allow is a
    /// protocol violation.
    pub fn note_data_sent(&mut self, now: Instant) -> Result<()> {
        let crypto = self
            .crypto
            .as_ref()
            .ok_or_else(|| Error::from(internal!("Sent data on a hop that isn't open")))?;
        let mut tag = [0_u8; SENDME_TAG_LEN];
        tag.copy_from_slice(crypto.sendme_tag());

        let record_tag = match &mut self.cc {
            Some(cc) => {
                if !cc.can_send() {
                    return Err(Error::CircProto(
                        "Sent a data cell past the congestion window".into(),
                    ));
                }
                cc.data_sent(now)?;
                cc.is_next_cell_sendme()
            }
            None => self.package_window.take()?,
        };
        if record_tag {
            self.sendme_validator.record(&tag);
        }
        Ok(())
    }

    /// Account for a circuit SENDME that this hop sent us, carrying `tag`, at
    /// `now`.
    ///
    /// The tag has to match the one we recorded for the cell it
    /// acknowledges; anything else is a protocol violation.
    pub fn note_sendme_received(
        &mut self,
        tag: &[u8],
        now: Instant,
        signals: CongestionSignals,
    ) -> Result<()> {
        // Nothing else happens until the SENDME is authenticated.
        self.sendme_validator.validate(tag)?;
        match &mut self.cc {
            Some(cc) => cc.sendme_received(now, signals),
            None => self.package_window.put().map(|_| ()),
        }
    }

    /// Account for a data cell that we just received from this hop.
    ///
    /// Return true if we now owe the hop a SENDME.  Receiving a cell that the
    /// deliver window doesn't allow is a protocol violation.
    pub fn note_data_received(&mut self) -> Result<bool> {
        self.deliver_window.take()
    }

    /// Account for a circuit SENDME that we just sent to this hop.
    pub fn note_sendme_sent(&mut self) -> Result<()> {
        self.deliver_window.put().map(|_| ())
    }

    /// Return how many more data cells the package window allows.
    ///
    /// With congestion control attached, this is not what decides; see
    /// [`congestion_control`](Self::congestion_control).
    pub fn package_window(&self) -> u32 {
        self.package_window.window()
    }

    /// Return how many more data cells we will accept from this hop.
    pub fn deliver_window(&self) -> u32 {
        self.deliver_window.window()
    }

    /// Return the number of SENDMEs we are waiting for from this hop.
    pub fn n_sendmes_expected(&self) -> usize {
        self.sendme_validator.n_expected()
    }

    /// Move this hop to `status`.  The chain checks that this is allowed.
    pub(crate) fn set_status(&mut self, status: HopStatus) {
        self.status = status;
    }

    /// Store the handshake in progress.
    pub(crate) fn set_handshake(&mut self, handshake: PendingHandshake) {
        self.handshake = Some(handshake);
    }

    /// Take back the handshake in progress.
    pub(crate) fn take_handshake(&mut self) -> Option<PendingHandshake> {
        self.handshake.take()
    }

    /// Install the keyed crypto, and drop what's left of the handshake.
    pub(crate) fn install_crypto(&mut self, crypto: HopCrypto) {
        self.crypto = Some(crypto);
        self.handshake = None;
        self.status = HopStatus::Open;
    }

    /// Return the keyed crypto, if the hop is open.
    pub(crate) fn crypto_mut(&mut self) -> Option<&mut HopCrypto> {
        self.crypto.as_mut()
    }

    /// Change the relay cell format.
    pub(crate) fn set_relay_cell_format(&mut self, format: RelayCellFormat) {
        self.cell_format = format;
    }

    /// Attach congestion control.
    pub(crate) fn set_congestion_control(&mut self, cc: Box<dyn CongestionControl>) {
        self.cc = Some(cc);
    }

    /// Panic if this hop's fields disagree with each other.
    ///
    /// `hop` is only used in the panic message.
    pub(crate) fn assert_consistent(&self, hop: HopNum) {
        assert_eq!(
            self.crypto.is_some(),
            self.status == HopStatus::Open,
            "Hop {} is {} but {} crypto",
            hop.display(),
            self.status,
            if self.crypto.is_some() { "has" } else { "lacks" },
        );
        assert!(
            self.handshake.is_none() || self.status == HopStatus::AwaitingKeys,
            "Hop {} is {} but has a pending handshake",
            hop.display(),
            self.status,
        );
        assert!(
            self.package_window.window() <= self.package_window.max(),
            "Hop {} package window overflowed",
            hop.display(),
        );
        assert!(
            self.deliver_window.window() <= CIRCWINDOW_START,
            "Hop {} deliver window overflowed",
            hop.display(),
        );
    }
}

impl Drop for HopState {
    fn drop(&mut self) {
        // Key material goes first, then the handshake.  The relay identity
        // and the congestion control state follow in field order.
        drop(self.crypto.take());
        drop(self.handshake.take());
    }
}

impl fmt::Debug for HopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HopState")
            .field("status", &self.status)
            .field("cell_format", &self.cell_format)
            .field("package_window", &self.package_window.window())
            .field("deliver_window", &self.deliver_window.window())
            .field("congestion_control", &self.cc.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl HopState {
    /// Force this hop into `status`, bypassing every check.
    pub(crate) fn force_status(&mut self, status: HopStatus) {
        self.status = status;
    }
}
