use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseEnumError;

/// How a swap moves coverage between two people.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapType {
    /// Both people trade their weeks.
    OneToOne,
    /// The target takes over the source week; nothing is given back.
    Absorb,
}

impl SwapType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneToOne => "ONE_TO_ONE",
            Self::Absorb => "ABSORB",
        }
    }
}

impl fmt::Display for SwapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONE_TO_ONE" => Ok(Self::OneToOne),
            "ABSORB" => Ok(Self::Absorb),
            other => Err(ParseEnumError {
                kind: "swap type",
                value: other.to_owned(),
            }),
        }
    }
}

/// Lifecycle of a swap record. `RolledBack` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Executed,
    RolledBack,
}

impl SwapStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Executed => "EXECUTED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXECUTED" => Ok(Self::Executed),
            "ROLLED_BACK" => Ok(Self::RolledBack),
            other => Err(ParseEnumError {
                kind: "swap status",
                value: other.to_owned(),
            }),
        }
    }
}
