//! Concurrency-control strategies

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How an update guards against lost updates.
///
/// The two strategies share all control flow and differ only in the read
/// mode and the write predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStrategy {
    /// Plain read, then `UPDATE ... WHERE id = ? AND version = ?`
    #[default]
    Optimistic,
    /// `SELECT ... FOR UPDATE`, then `UPDATE ... WHERE id = ?`
    Pessimistic,
}

/// Row read mode used inside a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadMode {
    /// Non-locking read of the latest committed row
    Plain,
    /// Exclusive row lock held until the transaction ends
    ForUpdate,
}

impl LockStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Optimistic => "optimistic",
            Self::Pessimistic => "pessimistic",
        }
    }

    pub fn read_mode(&self) -> ReadMode {
        match self {
            Self::Optimistic => ReadMode::Plain,
            Self::Pessimistic => ReadMode::ForUpdate,
        }
    }

    pub fn all() -> &'static [Self] {
        &[Self::Optimistic, Self::Pessimistic]
    }
}

impl fmt::Display for LockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown strategy name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown lock strategy '{0}' (expected optimistic or pessimistic)")]
pub struct ParseStrategyError(String);

impl FromStr for LockStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "optimistic" => Ok(Self::Optimistic),
            "pessimistic" => Ok(Self::Pessimistic),
            other => Err(ParseStrategyError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_mode_per_strategy() {
        assert_eq!(LockStrategy::Optimistic.read_mode(), ReadMode::Plain);
        assert_eq!(LockStrategy::Pessimistic.read_mode(), ReadMode::ForUpdate);
    }

    #[test]
    fn parse_roundtrips_display() {
        for strategy in LockStrategy::all() {
            assert_eq!(strategy.to_string().parse::<LockStrategy>(), Ok(*strategy));
        }
        assert_eq!("  Pessimistic ".parse(), Ok(LockStrategy::Pessimistic));
    }

    #[test]
    fn parse_rejects_unknown() {
        let err = "serializable".parse::<LockStrategy>().unwrap_err();
        assert!(err.to_string().contains("serializable"));
    }
}
