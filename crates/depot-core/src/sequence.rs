//! # Document Sequences
//!
//! Pure arithmetic behind the SequenceAllocator: computing the next value of
//! a sequence row, handling exhaustion and wrap-around, and formatting the
//! document number. The row lock and the write-back live in depot-db.
//!
//! ## Allocation Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  next = last_number + increment_by                                      │
//! │                                                                         │
//! │  next < min_value ──────────────► next = min_value                     │
//! │                                                                         │
//! │  next > max_value ──┬── auto_reset = false ──► SequenceExhausted       │
//! │                     │                                                   │
//! │                     └── auto_reset = true ───► next = min_value        │
//! │                                                 cycle += 1 (logged)    │
//! │                                                                         │
//! │  formatted = prefix + zero_pad(next, pad_width)      e.g. ISS-00001    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::validation::ValidationResult;

// =============================================================================
// Entity Type
// =============================================================================

/// Document families that draw numbers from their own sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    IssueVouchers,
    ReturnVouchers,
    TransferVouchers,
    Payments,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::IssueVouchers,
        EntityType::ReturnVouchers,
        EntityType::TransferVouchers,
        EntityType::Payments,
    ];

    /// Storage name of the entity type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::IssueVouchers => "issue_vouchers",
            EntityType::ReturnVouchers => "return_vouchers",
            EntityType::TransferVouchers => "transfer_vouchers",
            EntityType::Payments => "payments",
        }
    }

    /// Prefix used when no configuration supplies one.
    pub fn default_prefix(&self) -> &'static str {
        match self {
            EntityType::IssueVouchers => "ISS-",
            EntityType::ReturnVouchers => "RET-",
            EntityType::TransferVouchers => "TRF-",
            EntityType::Payments => "PAY-",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "entity_type".to_string(),
                allowed: EntityType::ALL.iter().map(|e| e.as_str().to_string()).collect(),
            })
    }
}

// =============================================================================
// Sequence Configuration
// =============================================================================

/// One (entity_type, year) counter row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SequenceConfig {
    pub entity_type: EntityType,
    pub year: i32,
    pub prefix: String,
    /// Minimum digits of the numeric part.
    pub pad_width: i64,
    /// Last value handed out (`min_value - increment_by` before the first).
    pub last_number: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub increment_by: i64,
    /// Wrap to `min_value` on exhaustion and derive next year's row automatically.
    pub auto_reset: bool,
    /// Number of wrap-arounds within this year.
    pub cycle: i64,
}

impl SequenceConfig {
    /// Default configuration for an entity type and year.
    pub fn default_for(entity_type: EntityType, year: i32) -> Self {
        let pad_width = match entity_type {
            EntityType::ReturnVouchers => 6,
            _ => 5,
        };
        SequenceConfig {
            entity_type,
            year,
            prefix: entity_type.default_prefix().to_string(),
            pad_width,
            last_number: 0,
            min_value: 1,
            max_value: 999_999,
            increment_by: 1,
            auto_reset: true,
            cycle: 0,
        }
    }

    /// Checks that the range and step are usable.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.increment_by <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "increment_by".to_string(),
            });
        }
        if self.min_value < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "min_value".to_string(),
            });
        }
        if self.max_value < self.min_value {
            return Err(ValidationError::InvalidFormat {
                field: "max_value".to_string(),
                reason: format!("must be >= min_value ({})", self.min_value),
            });
        }
        if !(1..=18).contains(&self.pad_width) {
            return Err(ValidationError::OutOfRange {
                field: "pad_width".to_string(),
                min: 1,
                max: 18,
            });
        }
        Ok(())
    }

    /// Computes the next value without mutating the row.
    ///
    /// ## Errors
    /// `SequenceExhausted` when the range is used up and `auto_reset` is off.
    pub fn advance(&self) -> CoreResult<Advance> {
        let mut value = self.last_number.saturating_add(self.increment_by);
        let mut cycle = self.cycle;
        let mut wrapped = false;

        if value > self.max_value {
            if !self.auto_reset {
                return Err(CoreError::SequenceExhausted {
                    entity_type: self.entity_type.to_string(),
                    year: self.year,
                    max_value: self.max_value,
                });
            }
            value = self.min_value;
            cycle += 1;
            wrapped = true;
        }

        if value < self.min_value {
            value = self.min_value;
        }

        Ok(Advance {
            value,
            cycle,
            wrapped,
        })
    }

    /// Formats a value with this row's prefix and width.
    pub fn format(&self, value: i64) -> String {
        format_number(&self.prefix, self.pad_width, value)
    }

    /// Values still available before exhaustion in the current cycle.
    pub fn remaining(&self) -> i64 {
        let next = self.last_number.saturating_add(self.increment_by).max(self.min_value);
        if next > self.max_value {
            0
        } else {
            (self.max_value - next) / self.increment_by + 1
        }
    }

    /// Whether `value` lies inside the configured range.
    pub fn contains(&self, value: i64) -> bool {
        value >= self.min_value && value <= self.max_value
    }

    /// Row for `year` derived from this one, positioned so the first
    /// allocation yields `min_value`.
    pub fn roll_over(&self, year: i32) -> Self {
        SequenceConfig {
            year,
            last_number: self.min_value - self.increment_by,
            cycle: 0,
            ..self.clone()
        }
    }
}

/// Result of advancing a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub value: i64,
    pub cycle: i64,
    /// True when this allocation wrapped back to `min_value`.
    pub wrapped: bool,
}

/// Formats `{prefix}{value zero-padded to width}`.
///
/// ## Example
/// ```rust
/// use depot_core::sequence::format_number;
///
/// assert_eq!(format_number("ISS-", 5, 1), "ISS-00001");
/// assert_eq!(format_number("RET-", 6, 1), "RET-000001");
/// ```
pub fn format_number(prefix: &str, width: i64, value: i64) -> String {
    let width = width.max(1) as usize;
    format!("{}{:0width$}", prefix, value, width = width)
}

// =============================================================================
// Document Number
// =============================================================================

/// A number issued by the SequenceAllocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DocumentNumber {
    pub entity_type: EntityType,
    pub year: i32,
    pub cycle: i64,
    pub value: i64,
    pub formatted: String,
    #[ts(as = "String")]
    pub issued_at: DateTime<Utc>,
}

impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
