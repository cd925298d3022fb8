//! Permission record normalization.
//!
//! Stored permissions are loosely typed: addresses in any case, byte fields
//! with or without padding, salts as hex strings or numbers. [`normalize`]
//! turns one into a [`Permission`] with fixed-width fields or fails with a
//! [`ValidationError`]. It performs no network calls.

use alloy_primitives::{Address, B256, Bytes, U256, hex};
use serde::{Deserialize, Serialize};

use crate::{
    contracts::{Caveat, Delegation},
    error::ValidationError,
};

mod caveats;
pub use caveats::{CaveatTerms, PeriodTransferTerms};

/// Authority value of a root delegation.
pub const ROOT_AUTHORITY: B256 = B256::repeat_byte(0xff);

/// Permission as stored by the permission source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPermission {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub delegator: Option<String>,
    #[serde(default)]
    pub delegate: Option<String>,
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default)]
    pub caveats: Vec<RawCaveat>,
    /// Hex string or JSON number.
    #[serde(default)]
    pub salt: Option<serde_json::Value>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl RawPermission {
    /// Whether the stored record is marked `ACTIVE`. A record without a
    /// status is not.
    pub fn is_active(&self) -> bool {
        self.status.as_deref().is_some_and(|status| status.trim().eq_ignore_ascii_case("ACTIVE"))
    }
}

/// Caveat as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCaveat {
    #[serde(default)]
    pub enforcer: Option<String>,
    #[serde(default)]
    pub terms: Option<String>,
    #[serde(default)]
    pub args: Option<String>,
}

/// A caveat with typed fields. Read, never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaveatRecord {
    pub enforcer: Address,
    pub terms: Bytes,
    pub args: Bytes,
}

/// Kind of signature on a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    /// 65-byte ECDSA signature from an externally owned account.
    Eoa,
    /// Anything else, validated by the delegator contract (EIP-1271).
    Contract,
}

/// A canonical, signed permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub delegator: Address,
    pub delegate: Address,
    pub authority: B256,
    pub caveats: Vec<CaveatRecord>,
    pub salt: B256,
    pub signature: Bytes,
}

impl Permission {
    /// Whether this delegation is not chained to a parent delegation.
    pub fn is_root(&self) -> bool {
        self.authority == ROOT_AUTHORITY
    }

    /// Classifies the signature by length.
    pub fn signature_kind(&self) -> SignatureKind {
        if self.signature.len() == 65 { SignatureKind::Eoa } else { SignatureKind::Contract }
    }

    /// Decodes every caveat's terms.
    pub fn caveat_terms(&self, period_transfer_enforcer: Option<Address>) -> Vec<CaveatTerms> {
        self.caveats
            .iter()
            .map(|caveat| CaveatTerms::decode(caveat, period_transfer_enforcer))
            .collect()
    }

    /// The ABI struct the DelegationManager expects.
    pub fn to_delegation(&self) -> Delegation {
        Delegation {
            delegate: self.delegate,
            delegator: self.delegator,
            authority: self.authority,
            caveats: self
                .caveats
                .iter()
                .map(|caveat| Caveat {
                    enforcer: caveat.enforcer,
                    terms: caveat.terms.clone(),
                    args: caveat.args.clone(),
                })
                .collect(),
            salt: U256::from_be_bytes(self.salt.0),
            signature: self.signature.clone(),
        }
    }
}

/// Normalizes a stored permission for redemption by `active_account`.
pub fn normalize(
    raw: &RawPermission,
    active_account: Address,
) -> Result<Permission, ValidationError> {
    let delegator = parse_address("delegator", raw.delegator.as_deref())?;
    let delegate = parse_address("delegate", raw.delegate.as_deref())?;

    let signature = match raw.signature.as_deref().map(str::trim) {
        None | Some("") | Some("0x") => return Err(ValidationError::MissingSignature),
        Some(value) => parse_bytes("signature", value)?,
    };

    if active_account != delegate {
        return Err(ValidationError::DelegateMismatch { active: active_account, delegate });
    }

    let authority = pad_to_word("authority", raw.authority.as_deref().unwrap_or_default())?;
    let salt = match &raw.salt {
        None | Some(serde_json::Value::Null) => B256::ZERO,
        Some(serde_json::Value::String(value)) => pad_to_word("salt", value)?,
        Some(serde_json::Value::Number(number)) => number
            .as_u64()
            .map(|value| B256::from(U256::from(value)))
            .ok_or_else(|| invalid("salt", "number is not a non-negative integer"))?,
        Some(_) => return Err(invalid("salt", "expected a hex string or a number")),
    };

    let caveats = raw
        .caveats
        .iter()
        .enumerate()
        .map(|(index, caveat)| {
            let enforcer = caveat
                .enforcer
                .as_deref()
                .ok_or(ValidationError::MissingField("caveats.enforcer"))?
                .parse::<Address>()
                .map_err(|_| invalid(format!("caveats[{index}].enforcer"), "not an address"))?;
            let terms = caveat.terms.as_deref().unwrap_or("0x");
            let args = caveat.args.as_deref().unwrap_or("0x");
            Ok(CaveatRecord {
                enforcer,
                terms: parse_bytes(&format!("caveats[{index}].terms"), terms)?,
                args: parse_bytes(&format!("caveats[{index}].args"), args)?,
            })
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;

    Ok(Permission { delegator, delegate, authority, caveats, salt, signature })
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidBytes { field: field.into(), reason: reason.into() }
}

fn parse_address(field: &'static str, value: Option<&str>) -> Result<Address, ValidationError> {
    let value = value.map(str::trim).filter(|value| !value.is_empty());
    let value = value.ok_or(ValidationError::MissingField(field))?;
    value
        .parse::<Address>()
        .map_err(|_| ValidationError::InvalidAddress { field, value: value.to_string() })
}

fn parse_bytes(field: &str, value: &str) -> Result<Bytes, ValidationError> {
    let digits = value.trim().trim_start_matches("0x");
    hex::decode(digits).map(Bytes::from).map_err(|err| invalid(field, err.to_string()))
}

/// Left-pads a hex value to 32 bytes. Empty and `0x` become zero.
fn pad_to_word(field: &'static str, value: &str) -> Result<B256, ValidationError> {
    let digits = value.trim().trim_start_matches("0x");
    if digits.len() > 64 {
        return Err(invalid(field, format!("{} hex digits exceed 32 bytes", digits.len())));
    }
    let padded = format!("{digits:0>64}");
    let mut word = [0u8; 32];
    hex::decode_to_slice(&padded, &mut word).map_err(|err| invalid(field, err.to_string()))?;
    Ok(B256::from(word))
}
