//! Tenant schema registry types and evolution rules.
//!
//! A [`Schema`] is an ordered list of [`Column`] definitions tied to one
//! `(tenant_id, schema_version)` pair. [`Schema::evolve`] implements the
//! additive/widening evolution policy: new nullable columns and numeric
//! type widening are accepted, everything else is rejected.

#[cfg(test)]
mod tests;

use crate::encoding::{Decode, Encode, EncodingError, decode_vec, encode_vec};
use crate::engine::utils::Value;

// ------------------------------------------------------------------------------------------------
// ColumnType
// ------------------------------------------------------------------------------------------------

/// The type of a single column's values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    I32,
    I64,
    F32,
    F64,
    Bytes,
    String,
    Timestamp,
    Decimal { precision: u8, scale: u8 },
    Uuid,
    FixedBytes { len: u32 },
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Struct(Vec<Column>),
}

impl ColumnType {
    /// Returns `true` if `self` can be widened to `other` without
    /// reinterpreting already-written bytes (numeric widening only).
    fn widens_to(&self, other: &ColumnType) -> bool {
        matches!(
            (self, other),
            (ColumnType::I32, ColumnType::I64) | (ColumnType::F32, ColumnType::F64)
        )
    }

    /// Returns `true` if a non-null `value` conforms to this column type.
    fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ColumnType::Bool, Value::Bool(_))
                | (ColumnType::I32, Value::I32(_))
                | (ColumnType::I64, Value::I64(_))
                | (ColumnType::F32, Value::F32(_))
                | (ColumnType::F64, Value::F64(_))
                | (ColumnType::Bytes, Value::Bytes(_))
                | (ColumnType::String, Value::String(_))
                | (ColumnType::Timestamp, Value::Timestamp(_))
                | (ColumnType::Decimal { .. }, Value::Decimal { .. })
                | (ColumnType::Uuid, Value::Uuid(_))
                | (ColumnType::FixedBytes { .. }, Value::FixedBytes(_))
                | (ColumnType::List(_), Value::List(_))
        )
    }
}

// ------------------------------------------------------------------------------------------------
// Column
// ------------------------------------------------------------------------------------------------

/// One column definition within a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Schema
// ------------------------------------------------------------------------------------------------

/// A versioned, ordered set of columns for one tenant's logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub tenant_id: String,
    pub version: u32,
    pub columns: Vec<Column>,
}

/// Error returned when a proposed schema evolution is rejected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("column '{0}' removed by evolution")]
    ColumnRemoved(String),

    #[error("column '{0}' type narrowed or changed incompatibly")]
    IncompatibleTypeChange(String),

    #[error("column '{0}' nullability changed for existing data")]
    NullabilityChanged(String),

    #[error("new column '{0}' must be nullable")]
    NewColumnNotNullable(String),

    #[error("schema version must increase strictly (have {have}, got {got})")]
    VersionNotIncreasing { have: u32, got: u32 },

    #[error("row has {actual} columns, schema expects {expected}")]
    RowShapeMismatch { expected: usize, actual: usize },

    #[error("column '{0}' is not nullable but row supplied null")]
    NullInNonNullableColumn(String),

    #[error("column '{column}' value does not match its declared type")]
    ColumnTypeMismatch { column: String },
}

impl Schema {
    pub fn new(tenant_id: impl Into<String>, version: u32, columns: Vec<Column>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            version,
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Validates `next` as an evolution of `self`.
    ///
    /// Accepted: adding nullable columns, widening `I32→I64` / `F32→F64`.
    /// Rejected: column removal, type narrowing, nullability changes on
    /// existing columns, non-increasing version numbers.
    pub fn evolve(&self, next: &Schema) -> Result<(), SchemaError> {
        if next.version <= self.version {
            return Err(SchemaError::VersionNotIncreasing {
                have: self.version,
                got: next.version,
            });
        }

        for existing in &self.columns {
            let Some(updated) = next.column(&existing.name) else {
                return Err(SchemaError::ColumnRemoved(existing.name.clone()));
            };

            if updated.column_type != existing.column_type
                && !existing.column_type.widens_to(&updated.column_type)
            {
                return Err(SchemaError::IncompatibleTypeChange(existing.name.clone()));
            }

            if updated.nullable != existing.nullable && !updated.nullable {
                return Err(SchemaError::NullabilityChanged(existing.name.clone()));
            }
        }

        for added in &next.columns {
            if self.column(&added.name).is_none() && !added.nullable {
                return Err(SchemaError::NewColumnNotNullable(added.name.clone()));
            }
        }

        Ok(())
    }

    /// Validates a row's column values against this schema's column list,
    /// positionally: shape, nullability, and declared type must all match.
    pub fn validate_row(&self, columns: &[Value]) -> Result<(), SchemaError> {
        if columns.len() != self.columns.len() {
            return Err(SchemaError::RowShapeMismatch { expected: self.columns.len(), actual: columns.len() });
        }

        for (column, value) in self.columns.iter().zip(columns) {
            if matches!(value, Value::Null) {
                if !column.nullable {
                    return Err(SchemaError::NullInNonNullableColumn(column.name.clone()));
                }
                continue;
            }
            if !column.column_type.accepts(value) {
                return Err(SchemaError::ColumnTypeMismatch { column: column.name.clone() });
            }
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Encode / Decode
// ------------------------------------------------------------------------------------------------

impl Encode for ColumnType {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            ColumnType::Bool => 0u32.encode_to(buf),
            ColumnType::I32 => 1u32.encode_to(buf),
            ColumnType::I64 => 2u32.encode_to(buf),
            ColumnType::F32 => 3u32.encode_to(buf),
            ColumnType::F64 => 4u32.encode_to(buf),
            ColumnType::Bytes => 5u32.encode_to(buf),
            ColumnType::String => 6u32.encode_to(buf),
            ColumnType::Timestamp => 7u32.encode_to(buf),
            ColumnType::Decimal { precision, scale } => {
                8u32.encode_to(buf)?;
                precision.encode_to(buf)?;
                scale.encode_to(buf)
            }
            ColumnType::Uuid => 9u32.encode_to(buf),
            ColumnType::FixedBytes { len } => {
                10u32.encode_to(buf)?;
                len.encode_to(buf)
            }
            ColumnType::List(inner) => {
                11u32.encode_to(buf)?;
                inner.encode_to(buf)
            }
            ColumnType::Map(k, v) => {
                12u32.encode_to(buf)?;
                k.encode_to(buf)?;
                v.encode_to(buf)
            }
            ColumnType::Struct(cols) => {
                13u32.encode_to(buf)?;
                encode_vec(cols, buf)
            }
        }
    }
}

impl Decode for ColumnType {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut off) = u32::decode_from(buf)?;
        match tag {
            0 => Ok((ColumnType::Bool, off)),
            1 => Ok((ColumnType::I32, off)),
            2 => Ok((ColumnType::I64, off)),
            3 => Ok((ColumnType::F32, off)),
            4 => Ok((ColumnType::F64, off)),
            5 => Ok((ColumnType::Bytes, off)),
            6 => Ok((ColumnType::String, off)),
            7 => Ok((ColumnType::Timestamp, off)),
            8 => {
                let (precision, n) = u8::decode_from(&buf[off..])?;
                off += n;
                let (scale, n) = u8::decode_from(&buf[off..])?;
                off += n;
                Ok((ColumnType::Decimal { precision, scale }, off))
            }
            9 => Ok((ColumnType::Uuid, off)),
            10 => {
                let (len, n) = u32::decode_from(&buf[off..])?;
                off += n;
                Ok((ColumnType::FixedBytes { len }, off))
            }
            11 => {
                let (inner, n) = ColumnType::decode_from(&buf[off..])?;
                off += n;
                Ok((ColumnType::List(Box::new(inner)), off))
            }
            12 => {
                let (k, n) = ColumnType::decode_from(&buf[off..])?;
                off += n;
                let (v, n) = ColumnType::decode_from(&buf[off..])?;
                off += n;
                Ok((ColumnType::Map(Box::new(k), Box::new(v)), off))
            }
            13 => {
                let (cols, n) = decode_vec::<Column>(&buf[off..])?;
                off += n;
                Ok((ColumnType::Struct(cols), off))
            }
            _ => Err(EncodingError::InvalidTag {
                tag,
                type_name: "ColumnType",
            }),
        }
    }
}

impl Encode for Column {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.name.encode_to(buf)?;
        self.column_type.encode_to(buf)?;
        self.nullable.encode_to(buf)
    }
}

impl Decode for Column {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (name, mut off) = String::decode_from(buf)?;
        let (column_type, n) = ColumnType::decode_from(&buf[off..])?;
        off += n;
        let (nullable, n) = bool::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Column {
                name,
                column_type,
                nullable,
            },
            off,
        ))
    }
}

impl Encode for Schema {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.tenant_id.encode_to(buf)?;
        self.version.encode_to(buf)?;
        encode_vec(&self.columns, buf)
    }
}

impl Decode for Schema {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tenant_id, mut off) = String::decode_from(buf)?;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (columns, n) = decode_vec::<Column>(&buf[off..])?;
        off += n;
        Ok((
            Schema {
                tenant_id,
                version,
                columns,
            },
            off,
        ))
    }
}
