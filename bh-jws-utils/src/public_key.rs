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

use bherror::{
    traits::{ErrorContext as _, ForeignError as _, PropagateError as _},
    Error, Result,
};
use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcGroupRef, EcKey, EcPointRef, PointConversionForm},
    nid::Nid,
    pkey::{Id, PKey, Public},
    rsa::Rsa,
    sha::sha256,
};
use serde_json::Value;

use crate::{
    error::{CryptoError, FormatError},
    json_object,
    utils::{base64_url_decode, base64_url_encode},
    JwkPublic,
};

pub(crate) const KTY_EC: &str = "EC";
pub(crate) const KTY_RSA: &str = "RSA";

/// Supported elliptic curves with their JWK `crv` name and coordinate size in bytes.
const CURVES: [(Nid, &str, usize); 3] = [
    (Nid::X9_62_PRIME256V1, "P-256", 32),
    (Nid::SECP384R1, "P-384", 48),
    (Nid::SECP521R1, "P-521", 66),
];

/// SHA-256 digest identifying a public key.
///
/// For EC keys this is the digest of the uncompressed point (`0x04 || X || Y`); for RSA keys the
/// digest of the PKCS#1 `RSAPublicKey` DER, i.e. of the modulus and public exponent.
pub type KeyTag = [u8; 32];

fn curve_by_nid(nid: Nid) -> Option<(&'static str, usize)> {
    CURVES
        .iter()
        .find(|(curve, _, _)| *curve == nid)
        .map(|(_, name, size)| (*name, *size))
}

fn curve_by_name(name: &str) -> Option<(Nid, usize)> {
    CURVES
        .iter()
        .find(|(_, curve, _)| *curve == name)
        .map(|(nid, _, size)| (*nid, *size))
}

/// Parses a public JWK of key type `EC` (P-256, P-384, P-521) or `RSA`.
///
/// Any other `kty` fails with [`FormatError::UnsupportedKeyType`].
pub fn public_key_from_jwk(jwk: &JwkPublic) -> Result<PKey<Public>, FormatError> {
    let kty = jwk_str(jwk, "kty")?;

    match kty {
        KTY_EC => ec_public_key_from_jwk(jwk),
        KTY_RSA => rsa_public_key_from_jwk(jwk),
        other => Err(Error::root(FormatError::UnsupportedKeyType(other.to_owned()))),
    }
}

fn ec_public_key_from_jwk(jwk: &JwkPublic) -> Result<PKey<Public>, FormatError> {
    let crv = jwk_str(jwk, "crv")?;
    let (nid, size) = curve_by_name(crv).ok_or_else(|| {
        Error::root(FormatError::JwkParsingFailed(format!(
            "unsupported curve {crv}"
        )))
    })?;

    let x = jwk_coordinate(jwk, "x", size)?;
    let y = jwk_coordinate(jwk, "y", size)?;

    let group = EcGroup::from_curve_name(nid)
        .foreign_err(|| FormatError::JwkParsingFailed("unknown curve".to_owned()))?;
    let key = EcKey::from_public_key_affine_coordinates(&group, &x, &y).foreign_err(|| {
        FormatError::JwkParsingFailed("coordinate construction failed".to_owned())
    })?;

    PKey::from_ec_key(key)
        .foreign_err(|| FormatError::JwkParsingFailed("invalid EC key".to_owned()))
}

fn rsa_public_key_from_jwk(jwk: &JwkPublic) -> Result<PKey<Public>, FormatError> {
    let n = jwk_big_num(jwk, "n")?;
    let e = jwk_big_num(jwk, "e")?;

    let key = Rsa::from_public_components(n, e)
        .foreign_err(|| FormatError::JwkParsingFailed("invalid RSA components".to_owned()))?;

    PKey::from_rsa(key).foreign_err(|| FormatError::JwkParsingFailed("invalid RSA key".to_owned()))
}

/// Converts an EC or RSA public key to a public JWK, optionally with a `kid`.
pub fn public_key_to_jwk(key: &PKey<Public>, kid: Option<&str>) -> Result<JwkPublic, CryptoError> {
    let mut jwk = match key.id() {
        Id::EC => {
            let ec = key.ec_key().foreign_err(|| CryptoError::CryptoBackend)?;
            ec_public_key_to_jwk(&ec)?
        }
        Id::RSA => {
            let rsa = key.rsa().foreign_err(|| CryptoError::CryptoBackend)?;
            json_object!({
                "kty": KTY_RSA,
                "n": base64_url_encode(rsa.n().to_vec()),
                "e": base64_url_encode(rsa.e().to_vec()),
            })
        }
        _ => {
            return Err(Error::root(CryptoError::Unsupported(
                "only EC and RSA keys can be represented as JWK".to_owned(),
            )))
        }
    };

    if let Some(kid) = kid {
        jwk.insert("kid".to_owned(), Value::String(kid.to_owned()));
    }

    Ok(jwk)
}

pub(crate) fn ec_public_key_to_jwk(key: &EcKey<Public>) -> Result<JwkPublic, CryptoError> {
    let (crv, size) = key
        .group()
        .curve_name()
        .and_then(curve_by_nid)
        .ok_or_else(|| Error::root(CryptoError::Unsupported("EC curve".to_owned())))?;
    let (x, y) = to_affine_coords(key.public_key(), key.group(), size)?;

    Ok(json_object!({
        "kty": KTY_EC,
        "crv": crv,
        "x": base64_url_encode(x),
        "y": base64_url_encode(y),
    }))
}

/// Returns the affine coordinates of the point, left padded to `size` bytes.
pub(crate) fn to_affine_coords(
    point: &EcPointRef,
    group: &EcGroupRef,
    size: usize,
) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let mut x = BigNum::new().foreign_err(|| CryptoError::CryptoBackend)?;
    let mut y = BigNum::new().foreign_err(|| CryptoError::CryptoBackend)?;
    let mut ctx = BigNumContext::new().foreign_err(|| CryptoError::CryptoBackend)?;
    point
        .affine_coordinates(group, &mut x, &mut y, &mut ctx)
        .foreign_err(|| CryptoError::CryptoBackend)?;

    let x = x
        .to_vec_padded(size as i32)
        .foreign_err(|| CryptoError::CryptoBackend)?;
    let y = y
        .to_vec_padded(size as i32)
        .foreign_err(|| CryptoError::CryptoBackend)?;

    Ok((x, y))
}

/// Computes the [`KeyTag`] of an EC or RSA public key.
pub fn public_key_tag(key: &PKey<Public>) -> Result<KeyTag, CryptoError> {
    match key.id() {
        Id::EC => {
            let ec = key.ec_key().foreign_err(|| CryptoError::CryptoBackend)?;
            let mut ctx = BigNumContext::new().foreign_err(|| CryptoError::CryptoBackend)?;
            let point = ec
                .public_key()
                .to_bytes(ec.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)
                .foreign_err(|| CryptoError::InvalidPublicKey)?;

            Ok(sha256(&point))
        }
        Id::RSA => {
            let der = key
                .rsa()
                .foreign_err(|| CryptoError::CryptoBackend)?
                .public_key_to_der_pkcs1()
                .foreign_err(|| CryptoError::InvalidPublicKey)?;

            Ok(sha256(&der))
        }
        _ => Err(Error::root(CryptoError::Unsupported(
            "key tags exist for EC and RSA keys only".to_owned(),
        ))),
    }
}

/// Computes the [`KeyTag`] of the key described by a public JWK.
pub fn jwk_key_tag(jwk: &JwkPublic) -> Result<KeyTag, FormatError> {
    let key = public_key_from_jwk(jwk)?;

    public_key_tag(&key).with_err(|| FormatError::JwkParsingFailed("unusable key".to_owned()))
}

/// Encodes a public key as a PEM `PUBLIC KEY` (SubjectPublicKeyInfo) block.
pub fn public_key_to_pem(key: &PKey<Public>) -> Result<String, CryptoError> {
    let pem = key
        .public_key_to_pem()
        .foreign_err(|| CryptoError::InvalidPublicKey)?;

    String::from_utf8(pem).foreign_err(|| CryptoError::CryptoBackend)
}

/// Decodes a PEM `PUBLIC KEY` (SubjectPublicKeyInfo) block.
pub fn public_key_from_pem(pem: &str) -> Result<PKey<Public>, CryptoError> {
    PKey::public_key_from_pem(pem.as_bytes())
        .foreign_err(|| CryptoError::InvalidPublicKey)
        .ctx(|| "invalid PEM public key")
}

pub(crate) fn jwk_str<'a>(jwk: &'a JwkPublic, field: &str) -> Result<&'a str, FormatError> {
    jwk.get(field)
        .ok_or_else(|| {
            Error::root(FormatError::JwkParsingFailed(format!(
                "missing \"{}\" field",
                field
            )))
        })?
        .as_str()
        .ok_or_else(|| {
            Error::root(FormatError::JwkParsingFailed(format!(
                "\"{}\" is not a string",
                field
            )))
        })
}

fn jwk_bytes(jwk: &JwkPublic, field: &str) -> Result<Vec<u8>, FormatError> {
    let encoded = jwk_str(jwk, field)?;

    base64_url_decode(encoded)
        .foreign_err(|| FormatError::JwkParsingFailed(format!("decoding \"{}\" failed", field)))
}

fn jwk_big_num(jwk: &JwkPublic, field: &str) -> Result<BigNum, FormatError> {
    let bytes = jwk_bytes(jwk, field)?;

    BigNum::from_slice(&bytes)
        .foreign_err(|| FormatError::JwkParsingFailed("Failed to construct BigNum".to_owned()))
}

fn jwk_coordinate(jwk: &JwkPublic, field: &str, size: usize) -> Result<BigNum, FormatError> {
    let bytes = jwk_bytes(jwk, field)?;

    if bytes.len() != size {
        return Err(Error::root(FormatError::JwkParsingFailed(format!(
            "coordinate \"{}\" must be {} bytes long",
            field, size
        ))));
    }

    BigNum::from_slice(&bytes)
        .foreign_err(|| FormatError::JwkParsingFailed("Failed to construct BigNum".to_owned()))
}
