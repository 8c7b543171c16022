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

use std::{num::NonZeroUsize, ops::Shr};

use bherror::traits::{ErrorContext as _, ForeignError as _};
use openssl::{
    asn1::{Asn1Integer, Asn1Object, Asn1OctetString, Asn1Time},
    bn::BigNum,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private, Public},
    x509::{
        extension::{AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectKeyIdentifier},
        X509Builder, X509Extension, X509Name, X509NameBuilder, X509NameRef, X509,
    },
};
use rand::RngCore;

use crate::{Error, Result};

type PrivateKey = PKey<Private>;
type PublicKey = PKey<Public>;

/// X.509v3
///
/// See [RFC 5280 - section 4.1.2.1](https://datatracker.ietf.org/doc/html/rfc5280#section-4.1.2.1)
const VERSION: i32 = 2;

/// Length of the certificate serial number in bits.
///
/// See [RFC 5280 - section 4.1.2.2](https://datatracker.ietf.org/doc/html/rfc5280#section-4.1.2.2),
/// and this answer from [stackoverflow](https://stackoverflow.com/a/55277597).
const SERIAL_NUMBER_BITS: usize = 159;

/// Hardcoded duration of the validity period for issued certificates.
const VALIDITY_PERIOD_IN_DAYS: u32 = 365 * 10;

/// A non-critical X.509 extension with an arbitrary OID and DER encoded value.
///
/// Used to embed vendor attestation data (key descriptions, nonces, provisioning info) in issued
/// leaf certificates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomExtension {
    /// Dotted-decimal OID of the extension.
    pub oid: String,
    /// DER encoded `extnValue` contents.
    pub value: Vec<u8>,
}

impl CustomExtension {
    /// Creates a new [`CustomExtension`].
    pub fn new(oid: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            oid: oid.into(),
            value,
        }
    }

    fn build(&self) -> Result<X509Extension> {
        let oid = Asn1Object::from_str(&self.oid)
            .foreign_err(|| Error::Builder)
            .ctx(|| format!("invalid extension OID {}", self.oid))?;
        let value = Asn1OctetString::new_from_bytes(&self.value)
            .foreign_err(|| Error::Builder)
            .ctx(|| "cannot create extension value")?;

        X509Extension::new_from_der(&oid, false, &value)
            .foreign_err(|| Error::Builder)
            .ctx(|| "cannot create custom extension")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Authority,
    Leaf,
}

/// A lightweight certificate authority issuing attestation-shaped certificate chains.
///
/// # Use case
///
/// The purpose of this builder is being able to programatically generate a leaf
/// certificate with a non-trivial certificate chain and vendor-specific extensions, without
/// having to shell out to e.g. the `openssl` tool.
///
/// The primary use cases are tests or demo software - this is not a
/// production-grade CA implementation.
#[derive(Clone, Debug)]
pub struct Builder {
    certificate: X509,
    private_key: PrivateKey,
}

impl Builder {
    /// Creates a new self-signed root authority with a freshly generated P-256 key.
    pub fn self_signed_root(common_name: &str) -> Result<Self> {
        let private_key = generate_private_key()?;
        let public_key = public_part(&private_key)?;
        let subject_name = build_name(&[("CN", common_name)])?;

        let certificate = issue_certificate(
            &private_key,
            None,
            &public_key,
            &subject_name,
            Role::Authority,
            &[],
        )
        .ctx(|| "couldn't issue root certificate")?;

        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// Issues an intermediate authority signed by this one.
    ///
    /// `subject` entries are `(field, value)` pairs using OpenSSL short names, e.g.
    /// `("O", "StrongBox")` or `("title", "TEE")`.
    pub fn issue_intermediate(&self, subject: &[(&str, &str)]) -> Result<Self> {
        let private_key = generate_private_key()?;
        let public_key = public_part(&private_key)?;
        let subject_name = build_name(subject)?;

        let certificate = issue_certificate(
            &self.private_key,
            Some(&self.certificate),
            &public_key,
            &subject_name,
            Role::Authority,
            &[],
        )
        .ctx(|| "couldn't issue intermediate certificate")?;

        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// Issues an end-entity certificate for `public_key`, carrying the digital signature key
    /// usage and the given `extensions`.
    pub fn issue_leaf(
        &self,
        public_key: &PublicKey,
        subject: &[(&str, &str)],
        extensions: &[CustomExtension],
    ) -> Result<X509> {
        let subject_name = build_name(subject)?;

        issue_certificate(
            &self.private_key,
            Some(&self.certificate),
            public_key,
            &subject_name,
            Role::Leaf,
            extensions,
        )
        .ctx(|| "couldn't issue leaf certificate")
    }

    /// The certificate of this authority.
    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// The public key of this authority in PEM (SubjectPublicKeyInfo) format.
    pub fn public_key_pem(&self) -> Result<String> {
        let pem = self
            .private_key
            .public_key_to_pem()
            .foreign_err(|| Error::Builder)?;

        String::from_utf8(pem).foreign_err(|| Error::Builder)
    }
}

fn generate_private_key() -> Result<PrivateKey> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).foreign_err(|| Error::Builder)?;
    let key = EcKey::generate(&group)
        .foreign_err(|| Error::Builder)
        .ctx(|| "couldn't generate key")?;

    PKey::from_ec_key(key).foreign_err(|| Error::Builder)
}

fn public_part(private_key: &PrivateKey) -> Result<PublicKey> {
    let der = private_key
        .public_key_to_der()
        .foreign_err(|| Error::Builder)?;

    PKey::public_key_from_der(&der).foreign_err(|| Error::Builder)
}

fn build_name(entries: &[(&str, &str)]) -> Result<X509Name> {
    let mut name = X509NameBuilder::new()
        .foreign_err(|| Error::Builder)
        .ctx(|| "couldn't create `subject_name`")?;

    for (field, value) in entries {
        name.append_entry_by_text(field, value)
            .foreign_err(|| Error::Builder)
            .ctx(|| format!("couldn't append {field} to `subject_name`"))?;
    }

    Ok(name.build())
}

/// Generate a vector of `n_bits`-many random bits which are not all zero,
/// represented as a big endian byte vector of minimum size.
///
/// All-zero bits are avoided using rejection sampling, with at most a constant
/// number of attempts.
fn generate_random_nonzero_bits_big_endian(n_bits: NonZeroUsize) -> Result<Vec<u8>> {
    let mut rng = rand::rng();

    let bytes: usize = n_bits.get().div_ceil(8);
    let leading_zeros: u32 = (bytes * 8 - n_bits.get()) as u32;
    let most_significant_byte_mask: u8 = u8::MAX.shr(leading_zeros);

    let mut sample = vec![0u8; bytes];

    const MAX_ITERATIONS: usize = 256;
    for _ in 0..MAX_ITERATIONS {
        rng.fill_bytes(&mut sample);
        sample[0] &= most_significant_byte_mask;

        if !sample.iter().all(|b| *b == 0) {
            return Ok(sample);
        }
    }

    Err(bherror::Error::root(Error::Builder).ctx("Failed to generate a nonzero random bit vector"))
}

/// See this [stackexchange answer](https://crypto.stackexchange.com/questions/257/unpredictability-of-x-509-serial-numbers)
/// for more details.
fn generate_random_serial_number() -> Result<Asn1Integer> {
    let bits = NonZeroUsize::new(SERIAL_NUMBER_BITS)
        .ok_or_else(|| bherror::Error::root(Error::Builder))?;
    let serial_number = generate_random_nonzero_bits_big_endian(bits)?;

    BigNum::from_slice(&serial_number)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot create serial number")?
        .to_asn1_integer()
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot create asn1 integer")
}

/// Low-level method for creation of certificates.
///
/// An `issuer` of [`None`] makes the certificate self-signed.
fn issue_certificate(
    issuer_key: &PrivateKey,
    issuer: Option<&X509>,
    subject_public_key: &PublicKey,
    subject_name: &X509Name,
    role: Role,
    extensions: &[CustomExtension],
) -> Result<X509> {
    let mut cert_builder = X509::builder()
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot create cert builder")?;
    cert_builder
        .set_version(VERSION)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot set cert version")?;

    let serial_number = generate_random_serial_number()?;
    cert_builder
        .set_serial_number(&serial_number)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot set serial number")?;

    cert_builder
        .set_pubkey(subject_public_key)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot set public key")?;
    let issuer_name: &X509NameRef = match issuer {
        Some(issuer) => issuer.subject_name(),
        None => subject_name,
    };

    cert_builder
        .set_subject_name(subject_name)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot set subject name")?;
    cert_builder
        .set_issuer_name(issuer_name)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot set issuer name")?;

    set_validity(&mut cert_builder)?;

    let mut basic_constraints = BasicConstraints::new();
    if role == Role::Authority {
        basic_constraints.critical().ca();
    }
    let basic_constraints = basic_constraints
        .build()
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot create basic_constraints")?;
    cert_builder
        .append_extension(basic_constraints)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot append basic constraints")?;

    let mut key_usage = KeyUsage::new();
    match role {
        Role::Authority => key_usage.key_cert_sign().crl_sign().critical(),
        Role::Leaf => key_usage.digital_signature().critical(),
    };
    let key_usage = key_usage
        .build()
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot create key_usage")?;
    cert_builder
        .append_extension(key_usage)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot append key usage")?;

    let subject_key_identifier = SubjectKeyIdentifier::new()
        .build(&cert_builder.x509v3_context(issuer.map(|issuer| &**issuer), None))
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot create subject_key_identifier")?;
    cert_builder
        .append_extension(subject_key_identifier)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot append subject key identifier")?;

    if let Some(issuer) = issuer {
        let authority_key_identifier = AuthorityKeyIdentifier::new()
            .keyid(false)
            .issuer(false)
            .build(&cert_builder.x509v3_context(Some(&**issuer), None))
            .foreign_err(|| Error::Builder)
            .ctx(|| "Cannot create authority_key_identifier")?;
        cert_builder
            .append_extension(authority_key_identifier)
            .foreign_err(|| Error::Builder)
            .ctx(|| "Cannot append authority key identifier")?;
    }

    for extension in extensions {
        cert_builder
            .append_extension(extension.build()?)
            .foreign_err(|| Error::Builder)
            .ctx(|| format!("Cannot append extension {}", extension.oid))?;
    }

    cert_builder
        .sign(issuer_key, MessageDigest::sha256())
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot sign certificate")?;

    Ok(cert_builder.build())
}

fn set_validity(cert_builder: &mut X509Builder) -> Result<()> {
    let not_before = Asn1Time::days_from_now(0)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot create `not_before` time")?;
    cert_builder
        .set_not_before(&not_before)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot set `not_before` time")?;

    let not_after = Asn1Time::days_from_now(VALIDITY_PERIOD_IN_DAYS)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot create `not_after` time")?;
    cert_builder
        .set_not_after(&not_after)
        .foreign_err(|| Error::Builder)
        .ctx(|| "Cannot set `not_after` time")
}

#[cfg(test)]
mod tests {
    use openssl::x509::X509VerifyResult;

    use super::*;

    #[test]
    fn issues_chain_linked_by_signatures() {
        let root = Builder::self_signed_root("root").unwrap();
        let intermediate = root.issue_intermediate(&[("O", "StrongBox")]).unwrap();

        let leaf_key = public_part(&generate_private_key().unwrap()).unwrap();
        let leaf = intermediate
            .issue_leaf(&leaf_key, &[("CN", "leaf")], &[])
            .unwrap();

        assert_eq!(
            root.certificate().issued(intermediate.certificate()),
            X509VerifyResult::OK
        );
        assert_eq!(
            intermediate.certificate().issued(&leaf),
            X509VerifyResult::OK
        );
        assert!(leaf.verify(&intermediate.certificate().public_key().unwrap()).unwrap());
    }

    #[test]
    fn leaf_carries_custom_extension() {
        let root = Builder::self_signed_root("root").unwrap();
        let leaf_key = public_part(&generate_private_key().unwrap()).unwrap();
        // OCTET STRING "abc"
        let value = vec![0x04, 0x03, b'a', b'b', b'c'];

        let leaf = root
            .issue_leaf(
                &leaf_key,
                &[("CN", "leaf")],
                &[CustomExtension::new("1.2.3.4.5", value.clone())],
            )
            .unwrap();

        let der = leaf.to_der().unwrap();
        let (_, parsed) = x509_parser::parse_x509_certificate(&der).unwrap();
        let extension = parsed
            .extensions()
            .iter()
            .find(|extension| extension.oid.to_id_string() == "1.2.3.4.5")
            .unwrap();
        assert_eq!(extension.value, value.as_slice());
    }

    #[test]
    fn invalid_extension_oid_is_rejected() {
        let root = Builder::self_signed_root("root").unwrap();
        let leaf_key = public_part(&generate_private_key().unwrap()).unwrap();

        let err = root
            .issue_leaf(
                &leaf_key,
                &[],
                &[CustomExtension::new("not an oid", vec![0x05, 0x00])],
            )
            .unwrap_err();
        assert_eq!(err.error, Error::Builder);
    }

    #[test]
    fn random_bits_respect_bit_length() {
        for bits in [1usize, 7, 8, 9, 159] {
            let sample =
                generate_random_nonzero_bits_big_endian(NonZeroUsize::new(bits).unwrap()).unwrap();
            assert_eq!(sample.len(), bits.div_ceil(8));
            assert!(sample.iter().any(|b| *b != 0));
            assert!(sample[0] <= u8::MAX >> (sample.len() * 8 - bits));
        }
    }
}
