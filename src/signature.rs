// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! HMAC-SHA256 signing shared by gateway adapters and webhook checks.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::LedgerError;

type HmacSha256 = Hmac<Sha256>;

/// An empty key signs and verifies nothing.
fn mac(secret: &str, message: &[u8]) -> Result<HmacSha256, LedgerError> {
    if secret.is_empty() {
        return Err(LedgerError::Validation("signing key is empty".into()));
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| LedgerError::Validation("invalid signing key".into()))?;
    mac.update(message);
    Ok(mac)
}

/// Hex-encoded HMAC-SHA256 of `message`.
pub fn sign_hex(secret: &str, message: &[u8]) -> Result<String, LedgerError> {
    Ok(hex::encode(mac(secret, message)?.finalize().into_bytes()))
}

/// Base64-encoded HMAC-SHA256 of `message`.
pub fn sign_base64(secret: &str, message: &[u8]) -> Result<String, LedgerError> {
    Ok(BASE64.encode(mac(secret, message)?.finalize().into_bytes()))
}

/// Constant-time check of a hex signature. Malformed hex never verifies.
pub fn verify_hex(secret: &str, message: &[u8], signature: &str) -> bool {
    match (hex::decode(signature.trim()), mac(secret, message)) {
        (Ok(bytes), Ok(mac)) => mac.verify_slice(&bytes).is_ok(),
        _ => false,
    }
}

/// Constant-time check of a base64 signature.
pub fn verify_base64(secret: &str, message: &[u8], signature: &str) -> bool {
    match (BASE64.decode(signature.trim()), mac(secret, message)) {
        (Ok(bytes), Ok(mac)) => mac.verify_slice(&bytes).is_ok(),
        _ => false,
    }
}
