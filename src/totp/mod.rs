//! RFC 6238 time-based one-time passwords.
//!
//! Pure functions only: secret generation, code computation, window checks,
//! enrollment URIs and their QR codes. Persistence and per-identity
//! serialization live in the TOTP service.

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use qrcode::render::unicode;
use qrcode::{EcLevel, QrCode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

use crate::error::{CredentialError, ValidationError};

pub const MIN_PERIOD: u32 = 10;
pub const MAX_PERIOD: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "SHA1")]
    Sha1,
    #[serde(rename = "SHA256")]
    Sha256,
    #[serde(rename = "SHA512")]
    Sha512,
}

impl Algorithm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    /// Secret length in bytes, matching the HMAC block output size.
    #[must_use]
    pub const fn secret_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            "SHA512" => Ok(Self::Sha512),
            _ => Err(ValidationError::new(
                "algorithm",
                format!("expected SHA1, SHA256 or SHA512, got '{s}'"),
            )),
        }
    }
}

/// Code parameters shared by the issuer and the authenticator app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotpParams {
    digits: u32,
    period: u32,
    algorithm: Algorithm,
}

impl TotpParams {
    pub fn new(digits: u32, period: u32, algorithm: Algorithm) -> Result<Self, ValidationError> {
        if !matches!(digits, 6 | 8) {
            return Err(ValidationError::new(
                "digits",
                format!("must be 6 or 8, got {digits}"),
            ));
        }
        if !(MIN_PERIOD..=MAX_PERIOD).contains(&period) {
            return Err(ValidationError::new(
                "period",
                format!("must be between {MIN_PERIOD} and {MAX_PERIOD} seconds, got {period}"),
            ));
        }
        Ok(Self {
            digits,
            period,
            algorithm,
        })
    }

    #[must_use]
    pub const fn digits(&self) -> u32 {
        self.digits
    }

    #[must_use]
    pub const fn period(&self) -> u32 {
        self.period
    }

    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// `floor(unix_time / period)`
    #[must_use]
    pub const fn step_at(&self, unix_time: u64) -> u64 {
        unix_time / self.period as u64
    }
}

/// Fresh random secret sized for the algorithm (at least 160 bits).
#[must_use]
pub fn generate_secret(algorithm: Algorithm) -> Vec<u8> {
    let mut secret = vec![0u8; algorithm.secret_len()];
    rand::rng().fill(secret.as_mut_slice());
    secret
}

#[must_use]
pub fn encode_secret(secret: &[u8]) -> String {
    BASE32_NOPAD.encode(secret)
}

/// Accepts the forms authenticator apps display: lowercase, grouped with
/// spaces, or padded with `=`.
pub fn decode_secret(encoded: &str) -> Result<Vec<u8>, CredentialError> {
    let cleaned: String = encoded
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let secret = BASE32_NOPAD
        .decode(cleaned.as_bytes())
        .map_err(|_| CredentialError::MalformedSecret)?;

    if secret.is_empty() {
        return Err(CredentialError::MalformedSecret);
    }
    Ok(secret)
}

fn mac<M>(key: &[u8], message: &[u8]) -> Result<Vec<u8>, CredentialError>
where
    M: Mac + hmac::digest::KeyInit,
{
    let mut mac = <M as Mac>::new_from_slice(key).map_err(|_| CredentialError::MalformedSecret)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HOTP value for one counter (RFC 4226 dynamic truncation).
pub fn hotp(secret: &[u8], counter: u64, params: &TotpParams) -> Result<u32, CredentialError> {
    let message = counter.to_be_bytes();
    let digest = match params.algorithm {
        Algorithm::Sha1 => mac::<Hmac<Sha1>>(secret, &message)?,
        Algorithm::Sha256 => mac::<Hmac<Sha256>>(secret, &message)?,
        Algorithm::Sha512 => mac::<Hmac<Sha512>>(secret, &message)?,
    };

    let offset = usize::from(digest[digest.len() - 1] & 0x0f);
    let binary = u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) & 0x7fff_ffff;

    Ok(binary % 10u32.pow(params.digits))
}

/// Zero-padded code for a time-step.
pub fn code_at_step(secret: &[u8], step: u64, params: &TotpParams) -> Result<String, CredentialError> {
    let value = hotp(secret, step, params)?;
    Ok(format!("{value:0width$}", width = params.digits as usize))
}

pub fn code_at(secret: &[u8], unix_time: u64, params: &TotpParams) -> Result<String, CredentialError> {
    code_at_step(secret, params.step_at(unix_time), params)
}

/// Checks `code` against the steps around `unix_time` and returns the step it
/// matched.
///
/// Steps at or below `last_used_step` are never accepted; a code that only
/// matches such a step is reported as a replay.
pub fn verify(
    secret: &[u8],
    code: &str,
    unix_time: u64,
    skew_steps: u32,
    last_used_step: Option<u64>,
    params: &TotpParams,
) -> Result<u64, CredentialError> {
    let code = code.trim();
    if code.len() != params.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CredentialError::InvalidCode);
    }

    let current = params.step_at(unix_time);
    let first = current.saturating_sub(u64::from(skew_steps));
    let last = current.saturating_add(u64::from(skew_steps));

    let mut replayed = false;
    for step in first..=last {
        let expected = code_at_step(secret, step, params)?;
        if !bool::from(expected.as_bytes().ct_eq(code.as_bytes())) {
            continue;
        }
        if last_used_step.is_some_and(|used| step <= used) {
            replayed = true;
            continue;
        }
        return Ok(step);
    }

    Err(if replayed {
        CredentialError::Replay
    } else {
        CredentialError::InvalidCode
    })
}

/// `otpauth://` URI understood by authenticator apps.
#[must_use]
pub fn provisioning_uri(issuer: &str, label: &str, encoded_secret: &str, params: &TotpParams) -> String {
    let account = urlencoding::encode(&format!("{issuer}:{label}")).into_owned();
    let mut uri = format!(
        "otpauth://totp/{account}?secret={encoded_secret}&issuer={}&digits={}&period={}",
        urlencoding::encode(issuer),
        params.digits,
        params.period
    );
    if params.algorithm != Algorithm::Sha1 {
        uri.push_str("&algorithm=");
        uri.push_str(params.algorithm.as_str());
    }
    uri
}

/// Renders an enrollment URI as a QR code for the terminal, two modules per
/// character row, light on dark.
pub fn qr_code(uri: &str) -> Result<String, ValidationError> {
    let code = QrCode::with_error_correction_level(uri, EcLevel::M)
        .map_err(|e| ValidationError::new("uri", format!("cannot be encoded as a QR code: {e}")))?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
