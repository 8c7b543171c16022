// Copyright (C) 2020-2025  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! This crate verifies X.509 certificate chains of hardware key attestations against a pinned
//! root of trust.
//!
//! # Details
//!
//! The primary API this crate offers is [`X5Chain::verify`], which takes the DER encoded
//! certificates of an attestation statement, a [`TrustAnchor`] and the verification time.
//!
//! Vendors pin their attestation roots in different forms. Apple publishes a root certificate,
//! while Google publishes the root public key only. [`TrustAnchor::from_pem`] accepts either.
//!
//! The crate also offers a [`Builder`], a lightweight certificate authority for tests and demo
//! software, which issues attestation-shaped chains with custom extensions.
//!
//! # Examples
//!
//! ```no_run
//! let root = std::fs::read_to_string("path-to-pinned-root.pem").expect("read pinned root");
//! let anchor = bhx5chain::TrustAnchor::from_pem(&root).expect("valid anchor");
//!
//! // DER encoded certificates, in any order
//! let certificates: Vec<Vec<u8>> = Vec::new();
//! let now = 1_700_000_000;
//!
//! let chain = bhx5chain::X5Chain::verify(&certificates, &anchor, now).expect("trusted chain");
//! let leaf_key = chain.leaf_certificate_key().expect("leaf key");
//! ```

mod anchor;
mod builder;
mod error;
mod x5chain;

pub use anchor::*;
pub use builder::*;
pub use error::*;
pub use x5chain::*;
