// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Verifiable secret sharing with proactive share recovery for replicated
//! services
//!
//! A replicated service tolerating `f` Byzantine faults among `n = 3f + 1`
//! replicas can keep data confidential by storing only Shamir shares of it:
//! any `f` replicas together learn nothing. A client splits every secret
//! into shares, one per replica, and commits to the sharing polynomial so
//! each replica can verify the share it receives.
//!
//! Shares must survive a replica losing its state. The scheme implemented
//! here lets `f + 1` peers rebuild a replica's share without any of them
//! learning it: each peer sends its share blinded by a point of a witness
//! polynomial dealt by the client, and the recovering replica removes the
//! blinding with a distributed pseudorandom function evaluated jointly by
//! the same peers.
//!
//! The crate provides:
//! - [`vssr`]: the sharing scheme, with the [`ClientScheme`] and
//!   [`ServerScheme`] roles and single-share recovery.
//! - [`dprf`]: the distributed PRF that produces the blinding values.
//! - [`commitment`]: linear and constant-size commitments to sharings.
//! - [`messages`] and [`extractor`]: the request and response formats of a
//!   confidential service.
//! - [`state`] and [`replica`]: the confidential state of a replica, its
//!   log, and the glue to an ordering layer.
//! - [`transfer`]: blinded transfer of a whole state to a recovering
//!   replica.
//!
//! The ordering layer itself is out of scope: it is represented by the
//! [`replica::ConfidentialReplica`] entry points and the
//! [`transfer::StateRequestTransport`] trait.

#![warn(missing_docs)]

#[macro_use]
pub mod errors;

pub mod cipher;
pub mod commitment;
pub mod config;
pub mod dprf;
pub mod extractor;
pub mod messages;
mod parameters;
mod polynomial;
mod protocol;
pub mod replica;
mod serialization;
pub mod state;
pub mod transfer;
mod utils;
pub mod vssr;

pub use config::VssrConfig;
pub use errors::{InternalError, Result};
pub use protocol::{ProcessId, ShareholderId, View};
pub use utils::CurvePoint;
pub use vssr::{ClientScheme, ServerScheme, VssrScheme};
