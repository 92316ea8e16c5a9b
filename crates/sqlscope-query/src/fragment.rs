//! Condition fragments.
//!
//! A fragment is one accumulated clause piece: a [`Condition`] plus the
//! positional [`Arg`]s that fill its `?` placeholders. The condition enum is
//! closed, so rendering matches every shape exhaustively.

use chrono::NaiveDateTime;
use sqlscope_core::{DynModel, Model, Value};

/// Shape of a where/or/not/having condition.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Equality on the target's primary key.
    PrimaryKey(Value),
    /// Membership of the primary key in a list.
    PrimaryKeys(Vec<Value>),
    /// Column → value pairs, joined with `AND`. NULL values test `IS NULL`.
    Map(Vec<(String, Value)>),
    /// Equality on every non-blank column of a record.
    Record(Box<dyn DynModel>),
    /// Literal SQL with `?` placeholders. A purely numeric string is treated
    /// as a primary key; a bare column name in a `not` condition negates it.
    Sql(String),
}

impl Condition {
    /// Conjunction of column equalities.
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Condition::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Equality on the record's non-blank fields.
    pub fn record<M: Model>(record: M) -> Self {
        Condition::Record(Box::new(record))
    }

    /// Primary-key membership.
    pub fn keys<V: Into<Value>>(keys: impl IntoIterator<Item = V>) -> Self {
        Condition::PrimaryKeys(keys.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for Condition {
    fn from(sql: &str) -> Self {
        Condition::Sql(sql.to_string())
    }
}

impl From<String> for Condition {
    fn from(sql: String) -> Self {
        Condition::Sql(sql)
    }
}

macro_rules! impl_primary_key_condition {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Condition {
                fn from(key: $ty) -> Self {
                    Condition::PrimaryKey(Value::from(key))
                }
            }

            impl From<Vec<$ty>> for Condition {
                fn from(keys: Vec<$ty>) -> Self {
                    Condition::keys(keys)
                }
            }
        )*
    };
}

impl_primary_key_condition!(i32, i64, u32, u64);

impl From<Vec<String>> for Condition {
    fn from(keys: Vec<String>) -> Self {
        Condition::keys(keys)
    }
}

impl From<Vec<Value>> for Condition {
    fn from(keys: Vec<Value>) -> Self {
        Condition::PrimaryKeys(keys)
    }
}

/// A raw SQL expression with its own bound arguments, inlined where it is used.
///
/// ```ignore
/// search.filter("price > ?", args![expr("cost * ? + ?", vec![2.into(), 100.into()])])
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SqlExpr {
    pub sql: String,
    pub args: Vec<Value>,
}

/// Build a [`SqlExpr`].
pub fn expr(sql: impl Into<String>, args: Vec<Value>) -> SqlExpr {
    SqlExpr {
        sql: sql.into(),
        args,
    }
}

/// One positional argument of a fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Bound as a single placeholder.
    Value(Value),
    /// Expands to comma-joined placeholders; empty expands to `NULL`.
    List(Vec<Value>),
    /// Inlined SQL with its own bound arguments.
    Expr(SqlExpr),
}

impl From<SqlExpr> for Arg {
    fn from(expr: SqlExpr) -> Self {
        Arg::Expr(expr)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Arg {
    fn from(values: Vec<T>) -> Self {
        Arg::List(values.into_iter().map(Into::into).collect())
    }
}

macro_rules! impl_value_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::Value(Value::from(value))
                }
            }
        )*
    };
}

impl_value_arg!(
    Value,
    bool,
    i8,
    i16,
    i32,
    i64,
    u32,
    u64,
    usize,
    f32,
    f64,
    String,
    &str,
    &String,
    NaiveDateTime,
);

impl<T: Into<Value>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        Arg::Value(value.map_or(Value::Null, Into::into))
    }
}

/// Build a `Vec<Arg>` from heterogeneous values.
///
/// ```ignore
/// search.filter("name = ? AND age > ?", args!["jinzhu", 20])
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Arg::from($arg)),+]
    };
}

/// A condition with its positional arguments.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub condition: Condition,
    pub args: Vec<Arg>,
}

impl Fragment {
    pub fn new(condition: impl Into<Condition>, args: Vec<Arg>) -> Self {
        Self {
            condition: condition.into(),
            args,
        }
    }

    /// The literal SQL text, for fragments built from strings.
    pub fn sql(&self) -> Option<&str> {
        match &self.condition {
            Condition::Sql(sql) => Some(sql),
            _ => None,
        }
    }
}
