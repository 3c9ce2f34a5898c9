//! Circuit-level flow control for a single hop.
//!
//! Each hop has two windows.  The *package window* bounds how many data cells
//! we may still send towards the hop before it acknowledges some of them with a
//! SENDME; the *deliver window* bounds how many we may still accept from it
//! before we owe it a SENDME of our own.
//!
//! SENDMEs are authenticated: every `sendme_inc`-th cell that we send, we
//! remember its relay crypto tag, and the SENDME that acknowledges it has to
//! carry that same tag.  A [`SendmeValidator`] keeps those tags.
//!
//! When a hop has congestion control attached, that replaces the package
//! window (see [`crate::congestion`]), but SENDME authentication and the
//! deliver window work the same way.

pub mod params;
mod window;

pub use params::{FlowCtrlParams, FlowCtrlParamsBuilder};
pub use window::{CIRCWINDOW_START, DeliverWindow, PackageWindow, SendmeValidator};
