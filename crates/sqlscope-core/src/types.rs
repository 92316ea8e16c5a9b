//! Declared column types.

use serde::{Deserialize, Serialize};

/// The logical SQL type a field declares.
///
/// Dialects map this onto their concrete column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SqlType {
    Bool,
    SmallInt,
    Int,
    #[default]
    BigInt,
    Float,
    Double,
    Decimal,
    Text,
    Bytes,
    Timestamp,
    Json,
}

impl SqlType {
    /// Whether the type is an integer family member.
    pub const fn is_integer(self) -> bool {
        matches!(self, SqlType::SmallInt | SqlType::Int | SqlType::BigInt)
    }

    /// Whether the type stores a point in time.
    pub const fn is_time(self) -> bool {
        matches!(self, SqlType::Timestamp)
    }
}
