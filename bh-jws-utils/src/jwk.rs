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

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A public JWK as a plain JSON object.
///
/// Members are checked where the key is used, e.g. by
/// [`public_key_from_jwk`](crate::public_key_from_jwk).
pub type JwkPublic = Map<String, Value>;

/// A JWK Set, as published by the wallet provider for verifying wallet attestations.
///
/// Either no key has a `kid` or every key has a distinct string `kid`, see
/// [RFC7517 section 5](https://datatracker.ietf.org/doc/html/rfc7517#section-5).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(try_from = "JwkSetUnverified")]
pub struct JwkSet {
    keys: Vec<JwkPublic>,
}

impl JwkSet {
    /// Create empty `JwkSet`.
    pub fn empty() -> Self {
        JwkSet { keys: vec![] }
    }

    /// Create a `JwkSet`, checking the `kid` rules.
    pub fn new(keys: Vec<JwkPublic>) -> Result<Self, &'static str> {
        JwkSetUnverified { keys }.try_into()
    }

    /// The keys of this set.
    pub fn keys(&self) -> &[JwkPublic] {
        &self.keys
    }

    /// Finds the key with the given `kid`.
    pub fn find(&self, kid: &str) -> Option<&JwkPublic> {
        self.keys
            .iter()
            .find(|jwk| jwk.get("kid").and_then(Value::as_str) == Some(kid))
    }
}

/// Deserialized form of [`JwkSet`] before its `kid` rules are checked.
#[derive(Deserialize, Debug)]
struct JwkSetUnverified {
    keys: Vec<JwkPublic>,
}

impl TryFrom<JwkSetUnverified> for JwkSet {
    type Error = &'static str;

    fn try_from(value: JwkSetUnverified) -> std::result::Result<Self, Self::Error> {
        let keys = value.keys;
        let with_kid = keys.iter().filter(|jwk| jwk.contains_key("kid")).count();

        if with_kid == 0 {
            return Ok(JwkSet { keys });
        }
        if with_kid != keys.len() {
            return Err("Some of the provided JWKs contain kid parameter values and some don't");
        }

        let mut seen = HashSet::new();
        for kid in keys.iter().filter_map(|jwk| jwk.get("kid")) {
            let kid = kid
                .as_str()
                .ok_or("JWK contains a `kid` parameter that is not a string")?;
            if !seen.insert(kid) {
                return Err("Provided JWKs contain duplicate kid parameter values");
            }
        }

        Ok(JwkSet { keys })
    }
}
