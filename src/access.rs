//! Redemption code classification.
//!
//! Codes are classified once at the boundary into a [`CodeType`]; everything downstream
//! reads the rules attached to the variant instead of looking at the code text again.

use crate::aggregate::CertificationTier;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CodeType {
    ClassAccess,
    Premium,
    Friend,
    Individual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRules {
    /// Leading character marking the code type; `None` for the default type.
    pub prefix: Option<char>,
    pub min_len: usize,
    pub max_len: usize,
    /// Days the redeemed access lasts; `None` for access bound to class membership.
    pub valid_days: Option<u32>,
    /// Tier a student needs before they may hand out codes of this type.
    pub min_sharer_tier: Option<CertificationTier>,
}

const CLASS_ACCESS_RULES: CodeRules = CodeRules {
    prefix: None,
    min_len: 4,
    max_len: 12,
    valid_days: None,
    min_sharer_tier: None,
};

const PREMIUM_RULES: CodeRules = CodeRules {
    prefix: Some('P'),
    min_len: 8,
    max_len: 16,
    valid_days: Some(365),
    min_sharer_tier: None,
};

const FRIEND_RULES: CodeRules = CodeRules {
    prefix: Some('F'),
    min_len: 8,
    max_len: 12,
    valid_days: Some(30),
    min_sharer_tier: Some(CertificationTier::Foundation),
};

const INDIVIDUAL_RULES: CodeRules = CodeRules {
    prefix: Some('I'),
    min_len: 8,
    max_len: 16,
    valid_days: Some(180),
    min_sharer_tier: None,
};

impl CodeRules {
    /// Whether a student at `tier` has reached the sharing threshold of these rules.
    pub fn unlocked_by(&self, tier: CertificationTier) -> bool {
        self.min_sharer_tier.is_none_or(|min| tier >= min)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeError {
    Empty,
    InvalidCharacters,
    InvalidLength { code_type: CodeType, len: usize },
}

impl fmt::Display for CodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeError::Empty => write!(f, "code is empty"),
            CodeError::InvalidCharacters => write!(f, "code may only contain letters and digits"),
            CodeError::InvalidLength { code_type, len } => {
                let rules = code_type.rules();
                write!(
                    f,
                    "{} code must be {}-{} characters long, got {}",
                    code_type, rules.min_len, rules.max_len, len
                )
            }
        }
    }
}

impl std::error::Error for CodeError {}

impl CodeType {
    pub const ALL: [CodeType; 4] = [
        CodeType::ClassAccess,
        CodeType::Premium,
        CodeType::Friend,
        CodeType::Individual,
    ];

    pub fn rules(&self) -> &'static CodeRules {
        match self {
            CodeType::ClassAccess => &CLASS_ACCESS_RULES,
            CodeType::Premium => &PREMIUM_RULES,
            CodeType::Friend => &FRIEND_RULES,
            CodeType::Individual => &INDIVIDUAL_RULES,
        }
    }

    /// Normalizes a code (trimmed, uppercased) and determines its type.
    pub fn classify(raw: &str) -> Result<(CodeType, String), CodeError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(CodeError::Empty);
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CodeError::InvalidCharacters);
        }

        let first = code.chars().next();
        let code_type = Self::ALL
            .into_iter()
            .find(|t| t.rules().prefix.is_some() && t.rules().prefix == first)
            .unwrap_or(CodeType::ClassAccess);

        let rules = code_type.rules();
        if !(rules.min_len..=rules.max_len).contains(&code.len()) {
            // A short code with a type letter in front is still a plausible class code.
            if code_type != CodeType::ClassAccess
                && (CLASS_ACCESS_RULES.min_len..=CLASS_ACCESS_RULES.max_len).contains(&code.len())
            {
                return Ok((CodeType::ClassAccess, code));
            }
            return Err(CodeError::InvalidLength {
                code_type,
                len: code.len(),
            });
        }
        Ok((code_type, code))
    }

    /// Whether a student holding `tier` may share codes of this type.
    pub fn shareable_at(&self, tier: CertificationTier) -> bool {
        self.rules().unlocked_by(tier)
    }

    /// Code types a student at `tier` may hand out.
    pub fn shareable_types(tier: CertificationTier) -> Vec<CodeType> {
        Self::ALL
            .into_iter()
            .filter(|t| t.shareable_at(tier))
            .collect()
    }
}

impl fmt::Display for CodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodeType::ClassAccess => "class access",
            CodeType::Premium => "premium",
            CodeType::Friend => "friend",
            CodeType::Individual => "individual",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_codes_are_the_default_type() {
        assert_eq!(
            CodeType::classify(" evt2024 "),
            Ok((CodeType::ClassAccess, "EVT2024".to_string()))
        );
        assert_eq!(
            CodeType::classify("ab12"),
            Ok((CodeType::ClassAccess, "AB12".to_string()))
        );
    }

    #[test]
    fn prefixed_codes_carry_their_type() {
        assert_eq!(CodeType::classify("P1234567890").unwrap().0, CodeType::Premium);
        assert_eq!(CodeType::classify("f1234567").unwrap().0, CodeType::Friend);
        assert_eq!(CodeType::classify("I12345678").unwrap().0, CodeType::Individual);
    }

    #[test]
    fn short_prefixed_codes_fall_back_to_class_access() {
        assert_eq!(CodeType::classify("PHYS1").unwrap().0, CodeType::ClassAccess);
        assert_eq!(CodeType::classify("FLEET22").unwrap().0, CodeType::ClassAccess);
    }

    #[test]
    fn malformed_codes_are_rejected() {
        assert_eq!(CodeType::classify("   "), Err(CodeError::Empty));
        assert_eq!(CodeType::classify("EV-101"), Err(CodeError::InvalidCharacters));
        assert_eq!(
            CodeType::classify("ABC"),
            Err(CodeError::InvalidLength {
                code_type: CodeType::ClassAccess,
                len: 3
            })
        );
        assert!(matches!(
            CodeType::classify("P12345678901234567"),
            Err(CodeError::InvalidLength {
                code_type: CodeType::Premium,
                ..
            })
        ));
    }

    #[test]
    fn sharing_rules_read_the_derived_tier() {
        assert!(!CodeType::Friend.shareable_at(CertificationTier::None));
        assert!(CodeType::Friend.shareable_at(CertificationTier::Foundation));
        assert!(CodeType::Friend.shareable_at(CertificationTier::Certified));
        assert!(CodeType::Premium.shareable_at(CertificationTier::None));
        assert_eq!(CodeType::Premium.rules().valid_days, Some(365));
        assert_eq!(CodeType::ClassAccess.rules().valid_days, None);
    }

    #[test]
    fn shareable_types_grow_with_the_tier() {
        assert_eq!(
            CodeType::shareable_types(CertificationTier::None),
            vec![CodeType::ClassAccess, CodeType::Premium, CodeType::Individual]
        );
        assert_eq!(
            CodeType::shareable_types(CertificationTier::Foundation).len(),
            CodeType::ALL.len()
        );
        assert!(FRIEND_RULES.unlocked_by(CertificationTier::Certified));
    }
}
