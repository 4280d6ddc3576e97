//! Field descriptors: the storage type of a column, its DDL, and the
//! conversion between what SQLite stores and what domain code works with.
//!
//! `normalize` turns a storage [`Value`] into a [`FieldValue`];
//! `denormalize` goes the other way. For every descriptor,
//! `normalize(denormalize(v)) == v` up to the type's granularity: dates keep
//! only the calendar day, fixed-point numbers only `precision` decimals.

use crate::error::{Error, Result};
use crate::value::Value;
use chrono::NaiveDate;

const DATE_FORMAT: &str = "%Y-%m-%d";
const STORED_DATE_FORMAT: &str = "%Y-%m-%d 00:00:00.000";

/// A fieldless enum stored by member name.
///
/// Usually implemented through [`storage_enum!`](crate::storage_enum).
pub trait StorageEnum: Sized + Copy + 'static {
    /// Type name, used in error messages.
    const NAME: &'static str;
    /// Stored names of every member, in declaration order.
    const NAMES: &'static [&'static str];

    fn name(&self) -> &'static str;

    fn from_name(name: &str) -> Option<Self>;
}

/// Declares a fieldless enum together with the names it is stored under.
///
/// ```
/// fingame_store::storage_enum! {
///     /// Types of bank objects
///     pub enum TypeOfBank {
///         Bank = "BANK",
///     }
/// }
/// ```
#[macro_export]
macro_rules! storage_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $stored:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $crate::StorageEnum for $name {
            const NAME: &'static str = stringify!($name);
            const NAMES: &'static [&'static str] = &[$($stored),+];

            fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $stored),+
                }
            }

            fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($stored => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

/// The member set of a [`StorageEnum`], captured without its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumDomain {
    pub name: &'static str,
    pub members: &'static [&'static str],
}

impl EnumDomain {
    pub fn of<E: StorageEnum>() -> Self {
        Self {
            name: E::NAME,
            members: E::NAMES,
        }
    }

    /// Resolves a stored name to the member.
    pub fn member(&self, name: &str) -> Result<EnumMember> {
        self.members
            .iter()
            .find(|m| **m == name)
            .map(|m| EnumMember {
                enum_name: self.name,
                name: m,
            })
            .ok_or_else(|| Error::InvalidEnumValue {
                enum_name: self.name,
                value: name.to_string(),
            })
    }

    fn longest(&self) -> usize {
        self.members.iter().map(|m| m.len()).max().unwrap_or(0)
    }
}

/// A validated member of some [`StorageEnum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumMember {
    pub enum_name: &'static str,
    pub name: &'static str,
}

impl EnumMember {
    pub fn of<E: StorageEnum>(member: E) -> Self {
        Self {
            enum_name: E::NAME,
            name: member.name(),
        }
    }

    /// Typed member, if this belongs to `E`.
    pub fn to<E: StorageEnum>(&self) -> Option<E> {
        (self.enum_name == E::NAME)
            .then(|| E::from_name(self.name))
            .flatten()
    }
}

/// A domain-side value, after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Text(String),
    Enum(EnumMember),
    Date(NaiveDate),
    Fixed(f64),
}

impl FieldValue {
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Integer(_) => "integer",
            FieldValue::Text(_) => "text",
            FieldValue::Enum(_) => "enum member",
            FieldValue::Date(_) => "date",
            FieldValue::Fixed(_) => "fixed-point number",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn from_enum<E: StorageEnum>(member: E) -> Self {
        FieldValue::Enum(EnumMember::of(member))
    }

    /// Typed enum member; `Ok(None)` for null.
    pub fn to_enum<E: StorageEnum>(&self) -> Result<Option<E>> {
        match self {
            FieldValue::Null => Ok(None),
            FieldValue::Enum(member) => {
                member
                    .to::<E>()
                    .map(Some)
                    .ok_or_else(|| Error::InvalidEnumValue {
                        enum_name: E::NAME,
                        value: member.name.to_string(),
                    })
            }
            other => Err(Error::Conversion {
                expected: "enum member",
                found: other.kind(),
            }),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(v: NaiveDate) -> Self {
        FieldValue::Date(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Fixed(v)
    }
}

impl From<EnumMember> for FieldValue {
    fn from(v: EnumMember) -> Self {
        FieldValue::Enum(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

/// Typed extraction from a [`FieldValue`].
pub trait FromField: Sized {
    fn from_field(value: &FieldValue) -> Result<Self>;
}

impl FromField for i64 {
    fn from_field(value: &FieldValue) -> Result<Self> {
        match value {
            FieldValue::Integer(v) => Ok(*v),
            other => Err(Error::Conversion {
                expected: "integer",
                found: other.kind(),
            }),
        }
    }
}

impl FromField for String {
    fn from_field(value: &FieldValue) -> Result<Self> {
        match value {
            FieldValue::Text(v) => Ok(v.clone()),
            other => Err(Error::Conversion {
                expected: "text",
                found: other.kind(),
            }),
        }
    }
}

impl FromField for NaiveDate {
    fn from_field(value: &FieldValue) -> Result<Self> {
        match value {
            FieldValue::Date(v) => Ok(*v),
            other => Err(Error::Conversion {
                expected: "date",
                found: other.kind(),
            }),
        }
    }
}

impl FromField for f64 {
    fn from_field(value: &FieldValue) -> Result<Self> {
        match value {
            FieldValue::Fixed(v) => Ok(*v),
            other => Err(Error::Conversion {
                expected: "fixed-point number",
                found: other.kind(),
            }),
        }
    }
}

impl<T: FromField> FromField for Option<T> {
    fn from_field(value: &FieldValue) -> Result<Self> {
        match value {
            FieldValue::Null => Ok(None),
            other => T::from_field(other).map(Some),
        }
    }
}

/// Storage type of one column.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Integer,
    /// The table's primary key, assigned by SQLite on insert.
    Identifier,
    /// Key of a row in another entity's table. Not enforced by the database.
    ForeignKey { references: String },
    String { length: usize },
    Enum(EnumDomain),
    /// Calendar date, stored as `YYYY-MM-DD 00:00:00.000`.
    Date,
    /// Decimal number stored as an integer scaled by `10^precision`.
    Fixed { precision: u32 },
}

/// Descriptor for one field: its kind plus nullability.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldType {
    kind: FieldKind,
    nullable: bool,
}

impl FieldType {
    fn nullable(kind: FieldKind) -> Self {
        Self {
            kind,
            nullable: true,
        }
    }

    pub fn integer() -> Self {
        Self::nullable(FieldKind::Integer)
    }

    pub fn identifier() -> Self {
        Self {
            kind: FieldKind::Identifier,
            nullable: false,
        }
    }

    pub fn foreign_key(references: impl Into<String>) -> Self {
        Self::nullable(FieldKind::ForeignKey {
            references: references.into(),
        })
    }

    pub fn string(length: usize) -> Self {
        Self::nullable(FieldKind::String { length })
    }

    pub fn enumeration<E: StorageEnum>() -> Self {
        Self::nullable(FieldKind::Enum(EnumDomain::of::<E>()))
    }

    pub fn date() -> Self {
        Self::nullable(FieldKind::Date)
    }

    pub fn fixed(precision: u32) -> Self {
        Self::nullable(FieldKind::Fixed { precision })
    }

    /// Currency: fixed point with two decimals.
    pub fn money() -> Self {
        Self::fixed(2)
    }

    /// Adds the `NOT NULL` constraint.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn allows_null(&self) -> bool {
        self.nullable
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, FieldKind::Identifier)
    }

    /// Name of the referenced entity, for foreign keys.
    pub fn references(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::ForeignKey { references } => Some(references),
            _ => None,
        }
    }

    /// Column type as written in `CREATE TABLE`.
    pub fn ddl(&self) -> String {
        let null_clause = if self.nullable { "" } else { " NOT NULL" };
        match &self.kind {
            FieldKind::Identifier => format!("INTEGER PRIMARY KEY{null_clause}"),
            FieldKind::Integer | FieldKind::ForeignKey { .. } | FieldKind::Fixed { .. } => {
                format!("INTEGER{null_clause}")
            }
            FieldKind::String { length } => format!("VARCHAR({length}){null_clause}"),
            FieldKind::Enum(domain) => format!("VARCHAR({}){null_clause}", domain.longest()),
            FieldKind::Date => format!("VARCHAR(10){null_clause}"),
        }
    }

    /// Storage value to domain value.
    pub fn normalize(&self, value: Value) -> Result<FieldValue> {
        if value.is_null() {
            return Ok(FieldValue::Null);
        }
        match (&self.kind, value) {
            (
                FieldKind::Integer | FieldKind::Identifier | FieldKind::ForeignKey { .. },
                Value::Integer(v),
            ) => Ok(FieldValue::Integer(v)),
            (FieldKind::String { .. }, Value::Text(v)) => Ok(FieldValue::Text(v)),
            (FieldKind::Enum(domain), Value::Text(v)) => domain.member(&v).map(FieldValue::Enum),
            (FieldKind::Date, Value::Text(v)) => {
                let day = v.split(' ').next().unwrap_or_default();
                NaiveDate::parse_from_str(day, DATE_FORMAT)
                    .map(FieldValue::Date)
                    .map_err(|_| Error::Conversion {
                        expected: "YYYY-MM-DD date",
                        found: "TEXT",
                    })
            }
            (FieldKind::Fixed { precision }, Value::Integer(v)) => {
                Ok(FieldValue::Fixed(v as f64 / scale(*precision)))
            }
            (FieldKind::Fixed { precision }, Value::Real(v)) => {
                Ok(FieldValue::Fixed(v / scale(*precision)))
            }
            (_, other) => Err(Error::Conversion {
                expected: self.storage_kind(),
                found: other.kind(),
            }),
        }
    }

    /// Domain value to storage value.
    pub fn denormalize(&self, value: &FieldValue) -> Result<Value> {
        match (&self.kind, value) {
            (_, FieldValue::Null) => Ok(Value::Null),
            (
                FieldKind::Integer | FieldKind::Identifier | FieldKind::ForeignKey { .. },
                FieldValue::Integer(v),
            ) => Ok(Value::Integer(*v)),
            (FieldKind::String { .. }, FieldValue::Text(v)) => Ok(Value::Text(v.clone())),
            (FieldKind::Enum(domain), FieldValue::Enum(member)) => {
                if member.enum_name != domain.name {
                    return Err(Error::InvalidEnumValue {
                        enum_name: domain.name,
                        value: format!("{}::{}", member.enum_name, member.name),
                    });
                }
                // Enum names are not unique across modules, so the member
                // itself must belong to this domain.
                domain.member(member.name).map(|m| Value::Text(m.name.to_string()))
            }
            (FieldKind::Enum(domain), FieldValue::Text(name)) => {
                domain.member(name).map(|m| Value::Text(m.name.to_string()))
            }
            (FieldKind::Date, FieldValue::Date(day)) => {
                Ok(Value::Text(day.format(STORED_DATE_FORMAT).to_string()))
            }
            (FieldKind::Fixed { precision }, FieldValue::Fixed(v)) => {
                let scaled = (v * scale(*precision)).round_ties_even();
                if !scaled.is_finite() || scaled.abs() > i64::MAX as f64 {
                    return Err(Error::Conversion {
                        expected: "fixed-point number within INTEGER range",
                        found: "fixed-point number",
                    });
                }
                Ok(Value::Integer(scaled as i64))
            }
            (FieldKind::Fixed { precision }, FieldValue::Integer(v)) => 10_i64
                .checked_pow(*precision)
                .and_then(|factor| v.checked_mul(factor))
                .map(Value::Integer)
                .ok_or(Error::Conversion {
                    expected: "fixed-point number within INTEGER range",
                    found: "integer",
                }),
            (_, other) => Err(Error::Conversion {
                expected: self.domain_kind(),
                found: other.kind(),
            }),
        }
    }

    fn storage_kind(&self) -> &'static str {
        match self.kind {
            FieldKind::Integer
            | FieldKind::Identifier
            | FieldKind::ForeignKey { .. }
            | FieldKind::Fixed { .. } => "INTEGER",
            FieldKind::String { .. } | FieldKind::Enum(_) | FieldKind::Date => "TEXT",
        }
    }

    fn domain_kind(&self) -> &'static str {
        match self.kind {
            FieldKind::Integer | FieldKind::Identifier | FieldKind::ForeignKey { .. } => "integer",
            FieldKind::String { .. } => "text",
            FieldKind::Enum(_) => "enum member",
            FieldKind::Date => "date",
            FieldKind::Fixed { .. } => "fixed-point number",
        }
    }
}

fn scale(precision: u32) -> f64 {
    10_f64.powi(i32::try_from(precision).unwrap_or(i32::MAX))
}
