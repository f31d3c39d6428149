//! Common id aliases and small shared enums

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Campaign row id
pub type CampaignId = i32;

/// Subscriber row id
pub type SubscriberId = i64;

/// Queue item row id
pub type QueueItemId = i64;

/// Bounce classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BounceType {
    Hard,
    Soft,
    Complaint,
}

impl BounceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BounceType::Hard => "hard",
            BounceType::Soft => "soft",
            BounceType::Complaint => "complaint",
        }
    }
}

impl fmt::Display for BounceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BounceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hard" => Ok(BounceType::Hard),
            "soft" => Ok(BounceType::Soft),
            "complaint" => Ok(BounceType::Complaint),
            other => Err(format!("unknown bounce type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounce_type_round_trip() {
        for t in [BounceType::Hard, BounceType::Soft, BounceType::Complaint] {
            assert_eq!(t.as_str().parse::<BounceType>().unwrap(), t);
        }
        assert!("bogus".parse::<BounceType>().is_err());
    }
}
