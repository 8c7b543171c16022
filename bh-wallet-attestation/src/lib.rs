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

//! This crate implements the wallet provider side of mobile wallet attestation.
//!
//! # Details
//!
//! A wallet instance is identified by its hardware key tag, the standard base64 SHA-256
//! digest of the public point of a key held in the secure hardware of the device. The
//! [`WalletProvider`] drives its lifecycle:
//!
//! 1. [`WalletProvider::issue_nonce`] issues a single-use nonce, either anonymous or bound to an
//!    identity session.
//! 2. [`WalletProvider::register_instance`] verifies a device attestation over that nonce with
//!    [`bh_device_attestation`], redeems the nonce and persists the instance through a
//!    [`WalletStore`]. Identity bound nonces are resolved to a [`Person`] by an
//!    [`IdentityResolver`].
//! 3. [`WalletProvider::process_assertion`] verifies an instance assertion, a JWT signed by the
//!    hardware key, and issues a wallet attestation confirming the key in its `cnf` claim.
//! 4. [`WalletProvider::verify_attestation`] verifies a wallet attestation presented later and
//!    resolves the instance it was issued to.
//!
//! The [`TxCodeCache`] keeps transaction codes of credential offers out of the offer itself.
//!
//! Every failure is a [`WalletError`]; [`WalletError::rejection`] names the offending field and
//! the reason in a form fit for a response body.
//!
//! # Examples
//!
//! ```no_run
//! use bh_device_attestation::AttestationVerifier;
//! use bh_wallet_attestation::{
//!     test_utils::{InMemoryWalletStore, StaticIdentityResolver},
//!     Configuration, WalletProvider,
//! };
//!
//! # async fn run(configuration: Configuration, assertion: &str, now: u64) {
//! let provider = WalletProvider::from_configuration(
//!     &configuration,
//!     AttestationVerifier::with_pinned_roots().expect("pinned roots"),
//!     InMemoryWalletStore::new(),
//!     StaticIdentityResolver::new(),
//! )
//! .expect("valid configuration");
//!
//! match provider.process_assertion(assertion, now).await {
//!     Ok(response) => println!("{}", serde_json::to_string(&response).unwrap()),
//!     Err(err) => println!("rejected {:?}", err.error.rejection()),
//! }
//! # }
//! ```
//!
//! # Features
//!
//! - `axum` maps [`WalletError`] to HTTP status codes,
//! - `test-utils` exposes the `test_utils` module with in-memory collaborators.

mod assertion;
mod attestation_jwt;
mod cache;
mod config;
mod error;
mod nonce;
mod provider;
mod signing_key;
mod store;
#[cfg(any(feature = "test-utils", test))]
pub mod test_utils;
mod tx_code;

pub use assertion::{ASSERTION_TYP, ASSERTION_TYPE};
pub use attestation_jwt::{
    WalletAttestationClaims, WalletAttestationEntry, WalletAttestationHeader,
    WalletAttestationResponse, WALLET_ATTESTATION_FORMAT, WALLET_ATTESTATION_TYP,
};
pub use cache::*;
pub use config::*;
pub use error::*;
pub use nonce::{NonceResponse, NonceService, ANONYMOUS, NONCE_VERSION_HEADER};
pub use provider::{AttestationRequest, WalletMetadata, WalletProvider};
pub use signing_key::{certificate_kid, WalletSigningKey};
pub use store::*;
pub use tx_code::*;
