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

use std::str::FromStr;

use bh_jws_utils::{base64_url_decode, base64_url_encode};
use bherror::{
    traits::{ErrorContext as _, ForeignError as _},
    Error,
};
use ciborium::Value;

use crate::{AttestationError, Result};

const FORMAT: &str = "fmt";
const STATEMENT: &str = "attStmt";
const X5C: &str = "x5c";
const RECEIPT: &str = "receipt";
const AUTH_DATA: &str = "authData";

/// The vendor format of an [`AttestationStatement`], read from its `fmt` member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttestationFormat {
    /// Android hardware-backed key attestation.
    Android,
    /// Apple App Attest.
    Apple,
}

impl AttestationFormat {
    /// The canonical `fmt` identifier of this format.
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::Android => "android-key",
            Self::Apple => "apple-appattest",
        }
    }
}

impl FromStr for AttestationFormat {
    type Err = Error<AttestationError>;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "android-key" | "android" => Ok(Self::Android),
            "apple-appattest" | "apple" => Ok(Self::Apple),
            _ => Err(Error::root(AttestationError::UnsupportedFormat(
                s.to_owned(),
            ))),
        }
    }
}

/// A decoded attestation object.
///
/// On the wire this is a base64url (unpadded) encoded CBOR map:
///
/// ```text
/// {
///   "fmt": "android-key" | "android" | "apple-appattest" | "apple",
///   "attStmt": { "x5c": [bytes, ...], ? "receipt": bytes },
///   ? "authData": bytes
/// }
/// ```
///
/// Unknown members are ignored. Apple statements must carry `authData`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationStatement {
    format: AttestationFormat,
    x5c: Vec<Vec<u8>>,
    receipt: Option<Vec<u8>>,
    auth_data: Option<Vec<u8>>,
}

impl AttestationStatement {
    /// Creates a statement of the given `format` carrying the DER encoded certificates `x5c`.
    pub fn new(format: AttestationFormat, x5c: Vec<Vec<u8>>) -> Self {
        Self {
            format,
            x5c,
            receipt: None,
            auth_data: None,
        }
    }

    /// Sets the authenticator data.
    pub fn with_auth_data(mut self, auth_data: Vec<u8>) -> Self {
        self.auth_data = Some(auth_data);
        self
    }

    /// Sets the App Attest receipt.
    pub fn with_receipt(mut self, receipt: Vec<u8>) -> Self {
        self.receipt = Some(receipt);
        self
    }

    /// Decodes a base64url (unpadded) encoded statement.
    pub fn from_base64url(encoded: &str) -> Result<Self> {
        let bytes = base64_url_decode(encoded)
            .foreign_err(|| AttestationError::DecodingError)
            .ctx(|| "statement is not base64url")?;

        Self::from_cbor(&bytes)
    }

    /// Decodes a CBOR encoded statement.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value: Value = ciborium::from_reader(bytes)
            .foreign_err(|| AttestationError::DecodingError)
            .ctx(|| "statement is not CBOR")?;
        let mut object = into_map(value, "attestation object")?;

        let format = take(&mut object, FORMAT)
            .ok_or_else(|| missing(FORMAT))?
            .into_text()
            .map_err(|_| invalid(FORMAT, "a text string"))?
            .parse::<AttestationFormat>()?;

        let mut statement = into_map(
            take(&mut object, STATEMENT).ok_or_else(|| missing(STATEMENT))?,
            STATEMENT,
        )?;

        let x5c = take(&mut statement, X5C)
            .ok_or_else(|| missing(X5C))?
            .into_array()
            .map_err(|_| invalid(X5C, "an array"))?
            .into_iter()
            .map(Value::into_bytes)
            .collect::<std::result::Result<Vec<_>, _>>()
            // `map_err` must be used because underlying error is not `StdErr`
            .map_err(|_| invalid(X5C, "an array of byte strings"))?;
        if x5c.is_empty() {
            return Err(invalid(X5C, "a non-empty array"));
        }

        let receipt = take(&mut statement, RECEIPT)
            .map(|receipt| {
                receipt
                    .into_bytes()
                    .map_err(|_| invalid(RECEIPT, "a byte string"))
            })
            .transpose()?;
        let auth_data = take(&mut object, AUTH_DATA)
            .map(|auth_data| {
                auth_data
                    .into_bytes()
                    .map_err(|_| invalid(AUTH_DATA, "a byte string"))
            })
            .transpose()?;

        if format == AttestationFormat::Apple && auth_data.is_none() {
            return Err(missing(AUTH_DATA));
        }

        Ok(Self {
            format,
            x5c,
            receipt,
            auth_data,
        })
    }

    /// Encodes the statement as CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut statement = vec![(
            Value::Text(X5C.to_owned()),
            Value::Array(self.x5c.iter().cloned().map(Value::Bytes).collect()),
        )];
        if let Some(receipt) = &self.receipt {
            statement.push((Value::Text(RECEIPT.to_owned()), Value::Bytes(receipt.clone())));
        }

        let mut object = vec![
            (
                Value::Text(FORMAT.to_owned()),
                Value::Text(self.format.identifier().to_owned()),
            ),
            (Value::Text(STATEMENT.to_owned()), Value::Map(statement)),
        ];
        if let Some(auth_data) = &self.auth_data {
            object.push((
                Value::Text(AUTH_DATA.to_owned()),
                Value::Bytes(auth_data.clone()),
            ));
        }

        let mut bytes = Vec::new();
        ciborium::into_writer(&Value::Map(object), &mut bytes)
            .foreign_err(|| AttestationError::DecodingError)
            .ctx(|| "cannot encode statement")?;

        Ok(bytes)
    }

    /// Encodes the statement as base64url (unpadded) CBOR, the form accepted by
    /// [`AttestationStatement::from_base64url`].
    pub fn to_base64url(&self) -> Result<String> {
        Ok(base64_url_encode(self.to_cbor()?))
    }

    /// The statement format.
    pub fn format(&self) -> AttestationFormat {
        self.format
    }

    /// The DER encoded certificates, in the order they were sent.
    pub fn x5c(&self) -> &[Vec<u8>] {
        &self.x5c
    }

    /// The App Attest receipt, if sent.
    pub fn receipt(&self) -> Option<&[u8]> {
        self.receipt.as_deref()
    }

    /// The authenticator data, if sent.
    pub fn auth_data(&self) -> Option<&[u8]> {
        self.auth_data.as_deref()
    }
}

fn into_map(value: Value, name: &str) -> Result<Vec<(Value, Value)>> {
    value.into_map().map_err(|_| invalid(name, "a map"))
}

fn take(entries: &mut Vec<(Value, Value)>, key: &str) -> Option<Value> {
    let index = entries
        .iter()
        .position(|(entry_key, _)| entry_key.as_text() == Some(key))?;

    Some(entries.swap_remove(index).1)
}

fn missing(name: &str) -> Error<AttestationError> {
    Error::root(AttestationError::DecodingError).ctx(format!("`{name}` is missing"))
}

fn invalid(name: &str, expected: &str) -> Error<AttestationError> {
    Error::root(AttestationError::DecodingError).ctx(format!("`{name}` must be {expected}"))
}
