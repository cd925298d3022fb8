use alloy_primitives::{Address, U256};

use super::CaveatRecord;

/// Decoded meaning of a caveat's `terms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaveatTerms {
    /// ERC20 period transfer limit.
    PeriodTransfer(PeriodTransferTerms),
    /// Terms this crate does not interpret. Still passed through untouched.
    Unrecognized {
        /// Enforcer the caveat names.
        enforcer: Address,
        /// Why it was not decoded.
        reason: &'static str,
    },
}

impl CaveatTerms {
    /// Decodes `caveat` given the known period transfer enforcer.
    ///
    /// The enforcer address decides the layout. Terms are never guessed from
    /// their length alone.
    pub fn decode(caveat: &CaveatRecord, period_transfer_enforcer: Option<Address>) -> Self {
        if period_transfer_enforcer != Some(caveat.enforcer) {
            return Self::Unrecognized { enforcer: caveat.enforcer, reason: "unknown enforcer" };
        }
        match PeriodTransferTerms::decode(&caveat.terms) {
            Some(terms) => Self::PeriodTransfer(terms),
            None => Self::Unrecognized {
                enforcer: caveat.enforcer,
                reason: "period transfer terms have the wrong length",
            },
        }
    }

    /// The period transfer terms, if that is what this is.
    pub const fn as_period_transfer(&self) -> Option<&PeriodTransferTerms> {
        match self {
            Self::PeriodTransfer(terms) => Some(terms),
            Self::Unrecognized { .. } => None,
        }
    }
}

/// `token ‖ periodAmount ‖ periodDuration ‖ startDate`, packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodTransferTerms {
    pub token: Address,
    /// Maximum amount per period, in token base units.
    pub period_amount: U256,
    /// Period length in seconds.
    pub period_duration: U256,
    /// Unix timestamp of the first period.
    pub start_date: U256,
}

impl PeriodTransferTerms {
    /// Exact encoded size of the terms.
    pub const ENCODED_LEN: usize = 20 + 32 * 3;

    /// Decodes packed terms. `None` unless the length is exact.
    pub fn decode(terms: &[u8]) -> Option<Self> {
        if terms.len() != Self::ENCODED_LEN {
            return None;
        }
        let word = |offset: usize| U256::from_be_slice(&terms[offset..offset + 32]);
        Some(Self {
            token: Address::from_slice(&terms[..20]),
            period_amount: word(20),
            period_duration: word(52),
            start_date: word(84),
        })
    }

    /// Whether the first period has begun at `now` (unix seconds).
    pub fn has_started(&self, now: u64) -> bool {
        self.start_date <= U256::from(now)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Bytes, address};

    use super::*;

    const ENFORCER: Address = address!("474e3ae7e169e940607cc624da8a15eb120139ab");
    const TOKEN: Address = address!("3a13c20987ac0e6840d9cb6e917085f72d17e698");

    fn packed_terms(amount: u64, duration: u64, start: u64) -> Bytes {
        let mut terms = TOKEN.to_vec();
        terms.extend_from_slice(&U256::from(amount).to_be_bytes::<32>());
        terms.extend_from_slice(&U256::from(duration).to_be_bytes::<32>());
        terms.extend_from_slice(&U256::from(start).to_be_bytes::<32>());
        terms.into()
    }

    #[test]
    fn decodes_period_transfer_terms_for_known_enforcer() {
        let caveat = CaveatRecord {
            enforcer: ENFORCER,
            terms: packed_terms(5_000_000, 86_400, 1_700_000_000),
            args: Bytes::new(),
        };

        let decoded = CaveatTerms::decode(&caveat, Some(ENFORCER));
        let terms = decoded.as_period_transfer().unwrap();
        assert_eq!(terms.token, TOKEN);
        assert_eq!(terms.period_amount, U256::from(5_000_000));
        assert_eq!(terms.period_duration, U256::from(86_400));
        assert!(terms.has_started(1_700_000_000));
        assert!(!terms.has_started(1_699_999_999));
    }

    #[test]
    fn unknown_enforcer_is_not_decoded_even_with_matching_length() {
        let caveat = CaveatRecord {
            enforcer: Address::repeat_byte(0x42),
            terms: packed_terms(1, 1, 1),
            args: Bytes::new(),
        };
        assert!(matches!(
            CaveatTerms::decode(&caveat, Some(ENFORCER)),
            CaveatTerms::Unrecognized { reason: "unknown enforcer", .. }
        ));
    }

    #[test]
    fn truncated_terms_are_unrecognized() {
        let mut terms = packed_terms(1, 1, 1).to_vec();
        terms.pop();
        let caveat = CaveatRecord { enforcer: ENFORCER, terms: terms.into(), args: Bytes::new() };
        assert!(CaveatTerms::decode(&caveat, Some(ENFORCER)).as_period_transfer().is_none());
    }
}
