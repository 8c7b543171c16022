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

//! This crate verifies hardware key attestations of mobile wallet instances.
//!
//! # Details
//!
//! Two vendor formats are supported, both carried in a CBOR attestation object:
//!
//! - Android hardware-backed key attestation, trusted through the pinned Google root public
//!   key, and accepted only for keys held in StrongBox,
//! - Apple App Attest, trusted through the pinned Apple App Attestation Root CA.
//!
//! The primary API is [`AttestationVerifier::verify`]. It checks the certificate chain, that the
//! statement is bound to the expected challenge, and that the caller-supplied hardware key tag
//! identifies the attested key. On success it returns a [`VerifiedAttestation`] with the
//! attested public key in PEM format.
//!
//! Every failure is an [`AttestationError`], which names the offending request field through
//! [`AttestationError::rejection`].
//!
//! # Examples
//!
//! ```no_run
//! use bh_device_attestation::AttestationVerifier;
//!
//! let verifier = AttestationVerifier::with_pinned_roots().expect("pinned roots");
//!
//! # let (statement, challenge, hardware_key_tag, now) = ("", [0u8; 32], "", 0);
//! match verifier.verify(statement, &challenge, hardware_key_tag, now) {
//!     Ok(verified) => println!("{}", verified.public_key()),
//!     Err(err) => println!("rejected {:?}", err.error.rejection()),
//! }
//! ```
//!
//! # Features
//!
//! The `test-utils` feature exposes the `test_utils` module, which generates statements bound
//! to test authorities.

mod android;
mod apple;
mod error;
mod roots;
mod statement;
#[cfg(any(feature = "test-utils", test))]
pub mod test_utils;
mod verifier;

pub use android::{
    certs_issued, AndroidVerifier, KeyDescription, SecurityLevel, KEY_DESCRIPTION_OID,
    PROVISIONING_INFO_OID,
};
pub use apple::{expected_nonce, parse_nonce, AppleVerifier, NONCE_OID};
pub use error::*;
pub use roots::*;
pub use statement::*;
pub use verifier::{AttestationVerifier, DeviceType, PlatformVerifier, VerifiedAttestation};
