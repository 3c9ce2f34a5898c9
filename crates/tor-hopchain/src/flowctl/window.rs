//! Package and deliver windows, and SENDME tag bookkeeping.

use std::collections::VecDeque;

use tor_error::internal;

use super::params::FlowCtrlParams;
use crate::crypto::SENDME_TAG_LEN;
use crate::util::ct;
use crate::{Error, Result};

/// The deliver window that every hop starts with.
///
/// This is fixed by the protocol: it is how much the other side is allowed
/// to send us before it hears from us.
pub const CIRCWINDOW_START: u32 = 1000;

/// Send-side flow-control window for one hop.
#[derive(Clone, Debug)]
pub struct PackageWindow {
    /// Cells we can still send.
    window: u32,
    /// The largest value `window` may reach.
    max: u32,
    /// How much a SENDME adds to `window`.
    increment: u32,
}

impl PackageWindow {
    /// Construct a new package window from `params`.
    pub fn new(params: &FlowCtrlParams) -> Self {
        PackageWindow {
            window: params.package_window_start(),
            max: params.package_window_max(),
            increment: params.sendme_inc(),
        }
    }

    /// Remove one cell from this window, for a cell we are about to send.
    ///
    /// On success, return true if the tag of this cell needs to be recorded,
    /// since the SENDME that acknowledges it will carry it.
    ///
    /// It is a protocol violation to send a cell when the window is empty.
    pub fn take(&mut self) -> Result<bool> {
        self.window = self
            .window
            .checked_sub(1)
            .ok_or_else(|| Error::CircProto("Package window empty".into()))?;
        Ok(self.window % self.increment == 0)
    }

    /// Add one SENDME's worth of cells back to this window.
    ///
    /// Return the new window size.
    pub fn put(&mut self) -> Result<u32> {
        let new_window = self
            .window
            .checked_add(self.increment)
            .filter(|w| *w <= self.max)
            .ok_or_else(|| Error::CircProto("Received a SENDME when none was expected".into()))?;
        self.window = new_window;
        Ok(new_window)
    }

    /// Return the number of cells we can still send.
    pub fn window(&self) -> u32 {
        self.window
    }

    /// Return the largest value this window may reach.
    pub(crate) fn max(&self) -> u32 {
        self.max
    }
}

/// Receive-side flow-control window for one hop.
#[derive(Clone, Debug)]
pub struct DeliverWindow {
    /// Cells we can still accept.
    window: u32,
    /// How much each SENDME we send adds to `window`.
    increment: u32,
}

impl DeliverWindow {
    /// Construct a new deliver window, using the increment from `params`.
    ///
    /// The window always starts at [`CIRCWINDOW_START`].
    pub fn new(params: &FlowCtrlParams) -> Self {
        DeliverWindow {
            window: CIRCWINDOW_START,
            increment: params.sendme_inc(),
        }
    }

    /// Remove one cell from this window, for a data cell we just received.
    ///
    /// On success, return true if we now owe the other side a SENDME.  That
    /// stays true until the caller sends one and calls [`put`](Self::put).
    ///
    /// Receiving a cell when the window is empty is a protocol violation.
    pub fn take(&mut self) -> Result<bool> {
        self.window = self.window.checked_sub(1).ok_or_else(|| {
            Error::CircProto("Received a data cell in violation of a window".into())
        })?;
        Ok(self.sendme_due())
    }

    /// Account for a SENDME that we just sent.
    ///
    /// Return the new window size.
    pub fn put(&mut self) -> Result<u32> {
        if !self.sendme_due() {
            return Err(internal!("Sent a SENDME that wasn't due").into());
        }
        self.window += self.increment;
        Ok(self.window)
    }

    /// Return true if we owe the other side a SENDME.
    fn sendme_due(&self) -> bool {
        self.window <= CIRCWINDOW_START - self.increment
    }

    /// Return the number of cells we can still accept.
    pub fn window(&self) -> u32 {
        self.window
    }
}

/// The tags of the cells whose SENDMEs we are still waiting for.
///
/// SENDMEs have to arrive in the order in which their cells were sent, so
/// this is a queue.
#[derive(Clone, Debug, Default)]
pub struct SendmeValidator {
    /// The tags we expect, oldest first.
    tags: VecDeque<[u8; SENDME_TAG_LEN]>,
}

impl SendmeValidator {
    /// Construct a new, empty validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `tag` as the one the next unmatched SENDME has to carry.
    pub fn record(&mut self, tag: &[u8; SENDME_TAG_LEN]) {
        self.tags.push_back(*tag);
    }

    /// Check `tag`, taken from a SENDME we just received, against the oldest
    /// tag we are waiting for.
    ///
    /// The expected tag is consumed either way.  Any failure is a protocol
    /// violation.
    pub fn validate(&mut self, tag: &[u8]) -> Result<()> {
        let expected = self
            .tags
            .pop_front()
            .ok_or_else(|| Error::CircProto("Received a SENDME when none was expected".into()))?;
        if !ct::bytes_eq(&expected[..], tag) {
            return Err(Error::CircProto("Mismatched tag on circuit SENDME".into()));
        }
        Ok(())
    }

    /// Return the number of SENDMEs we are waiting for.
    pub fn n_expected(&self) -> usize {
        self.tags.len()
    }
}
