#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]
//! Per-hop state for the hops of a Tor circuit.
//!
//! # Overview
//!
//! The `tor-hopchain` crate is part of
//! [Arti](https://gitlab.torproject.org/tpo/core/arti/), a project to
//! implement [Tor](https://www.torproject.org/) in Rust.
//!
//! A client that builds a circuit shares a separate set of keys with every
//! relay on that circuit, and keeps separate flow-control windows for each of
//! them.  This crate holds that per-hop state, in the order in which the
//! circuit was extended, and makes sure that it is only used the way the
//! protocol allows:
//!
//!   * A [`HopChain`] is the ordered, circular list of hops on one circuit.
//!   * Each hop is a [`HopState`]: it records which relay it talks to, where it
//!     is in its lifecycle ([`HopStatus`]), its relay-cell crypto (once keyed),
//!     and its [`flowctl`] windows.
//!   * Hops become usable strictly in order: a hop can only start waiting for
//!     keys once every hop before it is open.
//!
//! Once every hop is keyed, the chain can apply the layered relay-cell
//! encryption for outbound cells ([`HopChain::encrypt_outbound`]) and peel it
//! off inbound ones ([`HopChain::decrypt_inbound`]).
//!
//! ## Not in this crate
//!
//! This crate does no network I/O.  It doesn't choose relays, it doesn't
//! perform circuit-extension handshakes, and it doesn't encode or decode relay
//! messages.  The handshake code hands us key material; the circuit reactor
//! asks us which hop needs attention next and how much data it may send.
//!
//! # Design notes
//!
//! Every operation here is synchronous and bounded in time.  A chain is owned
//! by exactly one circuit reactor; nothing in this crate is shared between
//! threads, so there are no locks.
//!
//! Mistakes in how this crate is driven come in two flavors.  Operational
//! failures (bad key material, a protocol violation from the network) are
//! returned as [`Error`]s.  Internal inconsistencies (a hop opened out of
//! order, a window that went negative) mean that our own code is broken, and
//! [`HopChain::assert_consistent`] panics when it finds one.

// @@ begin lint list maintained by maint/add_warning @@
#![cfg_attr(not(ci_arti_stable), allow(renamed_and_removed_lints))]
#![cfg_attr(not(ci_arti_nightly), allow(unknown_lints))]
#![deny(missing_docs)]
#![warn(noop_method_call)]
#![deny(unreachable_pub)]
#![warn(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::cargo_common_metadata)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::checked_conversions)]
#![warn(clippy::cognitive_complexity)]
#![deny(clippy::debug_assert_with_mut_call)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]
#![deny(clippy::expl_impl_clone_on_copy)]
#![deny(clippy::fallible_impl_from)]
#![deny(clippy::implicit_clone)]
#![deny(clippy::large_stack_arrays)]
#![warn(clippy::manual_ok_or)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_pass_by_value)]
#![warn(clippy::option_option)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![deny(clippy::ref_option_ref)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::trait_duplication_in_bounds)]
#![deny(clippy::unchecked_duration_subtraction)]
#![deny(clippy::unnecessary_wraps)]
#![warn(clippy::unseparated_literal_suffix)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::let_unit_value)] // This can reasonably be done for explicitness
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::significant_drop_in_scrutinee)] // arti/-/merge_requests/588/#note_2812945
#![allow(clippy::result_large_err)] // temporary workaround for arti#587
#![allow(clippy::needless_raw_string_hashes)] // complained-about code is fine, often best
#![allow(clippy::needless_lifetimes)] // See arti#1765
//! <!-- @@ end lint list maintained by maint/add_warning @@ -->

mod chain;
pub mod congestion;
pub mod crypto;
pub mod flowctl;
mod hop;
mod util;

pub use chain::{HopChain, HopChainIter, HopId};
pub use hop::{HopNum, HopNumDisplay, HopState, HopStatus, PendingHandshake};
pub use util::err::Error;

/// A Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
