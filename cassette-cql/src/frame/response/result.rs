//! CQL protocol-level representation of a `RESULT` response.
//!
//! Decoding stops at the row data: the raw rows are handed to a
//! caller-supplied [`RowsBuilder`] together with the decoded metadata.

use std::result::Result as StdResult;
use std::sync::Arc;

use bytes::Bytes;

use crate::frame::frame_errors::{
    CqlResultParseError, CqlTypeParseError, LowLevelDeserializationError,
    ResultMetadataParseError, RowsParseError,
};
use crate::frame::types;

const FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;

/// Keyspace and table a column belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableSpec {
    pub ks_name: String,
    pub table_name: String,
}

/// Type of a column, as described by a type option in result metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Custom(String),
    Ascii,
    BigInt,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Text,
    Varint,
    Timeuuid,
    Inet,
    Date,
    Time,
    SmallInt,
    TinyInt,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Set(Box<ColumnType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub table_spec: TableSpec,
    pub name: String,
    pub typ: ColumnType,
}

/// Shape of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultMetadata {
    pub col_count: usize,
    /// Present when all columns share one keyspace and table.
    pub global_table_spec: Option<TableSpec>,
    pub col_specs: Vec<ColumnSpec>,
}

impl ResultMetadata {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.col_specs.iter().position(|spec| spec.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetKeyspace {
    pub keyspace_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub id: Bytes,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    pub change: String,
    pub keyspace: String,
    pub table: String,
}

/// Consumes the rows part of a RESULT::Rows body.
///
/// `raw_rows` is bounded to the frame body: reading past its end fails
/// instead of reaching into the next frame.
pub trait RowsBuilder {
    type Output;

    fn build(
        &mut self,
        metadata: ResultMetadata,
        rows_count: usize,
        raw_rows: &mut &[u8],
    ) -> StdResult<Self::Output, RowsParseError>;
}

/// One row of raw cell values, `None` for null cells.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    pub columns: Vec<Option<Bytes>>,
}

/// Rows kept as raw cell bytes, as produced by [`RawRowsBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rows {
    pub metadata: ResultMetadata,
    pub rows: Vec<Row>,
}

impl Rows {
    /// The first column of the first row, decoded as UTF-8 text.
    pub fn first_text(&self) -> Option<StdResult<&str, std::str::Utf8Error>> {
        let cell = self.rows.first()?.columns.first()?.as_ref()?;
        Some(std::str::from_utf8(cell))
    }
}

/// Splits each row into its raw cells without interpreting them.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawRowsBuilder;

impl RowsBuilder for RawRowsBuilder {
    type Output = Rows;

    fn build(
        &mut self,
        metadata: ResultMetadata,
        rows_count: usize,
        raw_rows: &mut &[u8],
    ) -> StdResult<Rows, RowsParseError> {
        let mut rows = Vec::with_capacity(rows_count);
        for row_index in 0..rows_count {
            let mut columns = Vec::with_capacity(metadata.col_count);
            for column_index in 0..metadata.col_count {
                let cell = types::read_bytes_opt(raw_rows).map_err(|err| {
                    RowsParseError::CellParseError {
                        row_index,
                        column_index,
                        err,
                    }
                })?;
                columns.push(cell.map(Bytes::copy_from_slice));
            }
            rows.push(Row { columns });
        }
        Ok(Rows { metadata, rows })
    }
}

/// Drops the row data, keeping only the metadata and the number of rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct RowCountBuilder;

impl RowsBuilder for RowCountBuilder {
    type Output = (ResultMetadata, usize);

    fn build(
        &mut self,
        metadata: ResultMetadata,
        rows_count: usize,
        _raw_rows: &mut &[u8],
    ) -> StdResult<Self::Output, RowsParseError> {
        Ok((metadata, rows_count))
    }
}

/// Adapts a closure into a [`RowsBuilder`].
pub struct FnRowsBuilder<F>(pub F);

impl<T, F> RowsBuilder for FnRowsBuilder<F>
where
    F: FnMut(ResultMetadata, usize, &mut &[u8]) -> StdResult<T, RowsParseError>,
{
    type Output = T;

    fn build(
        &mut self,
        metadata: ResultMetadata,
        rows_count: usize,
        raw_rows: &mut &[u8],
    ) -> StdResult<T, RowsParseError> {
        (self.0)(metadata, rows_count, raw_rows)
    }
}

impl RowsParseError {
    pub fn custom(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        RowsParseError::Custom(Arc::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Result<T = Rows> {
    Void,
    Rows(T),
    SetKeyspace(SetKeyspace),
    Prepared(Prepared),
    SchemaChange(SchemaChange),
}

fn deser_type(buf: &mut &[u8]) -> StdResult<ColumnType, CqlTypeParseError> {
    use ColumnType::*;
    let id = types::read_short(buf).map_err(CqlTypeParseError::TypeIdParseError)?;
    Ok(match id {
        0x0000 => {
            let type_str = types::read_string(buf)
                .map_err(CqlTypeParseError::CustomTypeNameParseError)?;
            Custom(type_str.to_owned())
        }
        0x0001 => Ascii,
        0x0002 => BigInt,
        0x0003 => Blob,
        0x0004 => Boolean,
        0x0005 => Counter,
        0x0006 => Decimal,
        0x0007 => Double,
        0x0008 => Float,
        0x0009 => Int,
        // 0x000A is the legacy "text" id, an alias of varchar.
        0x000A | 0x000D => Text,
        0x000B => Timestamp,
        0x000C => Uuid,
        0x000E => Varint,
        0x000F => Timeuuid,
        0x0010 => Inet,
        0x0011 => Date,
        0x0012 => Time,
        0x0013 => SmallInt,
        0x0014 => TinyInt,
        0x0020 => List(Box::new(deser_type(buf)?)),
        0x0021 => Map(Box::new(deser_type(buf)?), Box::new(deser_type(buf)?)),
        0x0022 => Set(Box::new(deser_type(buf)?)),
        id => return Err(CqlTypeParseError::TypeNotImplemented(id)),
    })
}

fn deser_table_spec(buf: &mut &[u8]) -> StdResult<TableSpec, LowLevelDeserializationError> {
    let ks_name = types::read_string(buf)?.to_owned();
    let table_name = types::read_string(buf)?.to_owned();
    Ok(TableSpec {
        ks_name,
        table_name,
    })
}

fn deser_result_metadata(buf: &mut &[u8]) -> StdResult<ResultMetadata, ResultMetadataParseError> {
    let flags = types::read_int(buf).map_err(ResultMetadataParseError::FlagsParseError)?;
    let global_tables_spec = flags & FLAG_GLOBAL_TABLES_SPEC != 0;

    let col_count =
        types::read_int_length(buf).map_err(ResultMetadataParseError::ColumnCountParseError)?;

    let global_table_spec = global_tables_spec
        .then(|| deser_table_spec(buf))
        .transpose()
        .map_err(ResultMetadataParseError::GlobalTableSpecParseError)?;

    // Never trust the count for preallocation, a column takes at least 4 bytes.
    let mut col_specs = Vec::with_capacity(col_count.min(buf.len() / 4));
    for column_index in 0..col_count {
        let table_spec = match &global_table_spec {
            Some(spec) => spec.clone(),
            None => deser_table_spec(buf).map_err(|err| {
                ResultMetadataParseError::TableSpecParseError { column_index, err }
            })?,
        };
        let name = types::read_string(buf)
            .map_err(|err| ResultMetadataParseError::ColumnNameParseError { column_index, err })?
            .to_owned();
        let typ = deser_type(buf)
            .map_err(|err| ResultMetadataParseError::ColumnTypeParseError { column_index, err })?;
        col_specs.push(ColumnSpec {
            table_spec,
            name,
            typ,
        });
    }

    Ok(ResultMetadata {
        col_count,
        global_table_spec,
        col_specs,
    })
}

fn deser_rows<B: RowsBuilder>(
    buf: &mut &[u8],
    builder: &mut B,
) -> StdResult<B::Output, CqlResultParseError> {
    let metadata = deser_result_metadata(buf)?;
    let rows_count = types::read_int_length(buf).map_err(RowsParseError::RowsCountParseError)?;
    Ok(builder.build(metadata, rows_count, buf)?)
}

fn deser_set_keyspace(buf: &mut &[u8]) -> StdResult<SetKeyspace, CqlResultParseError> {
    let keyspace_name = types::read_string(buf)
        .map_err(CqlResultParseError::SetKeyspaceParseError)?
        .to_string();

    Ok(SetKeyspace { keyspace_name })
}

fn deser_prepared(buf: &mut &[u8]) -> StdResult<Prepared, CqlResultParseError> {
    let id = Bytes::copy_from_slice(
        types::read_short_bytes(buf).map_err(CqlResultParseError::PreparedParseError)?,
    );
    let metadata = deser_result_metadata(buf)?;
    Ok(Prepared { id, metadata })
}

fn deser_schema_change(buf: &mut &[u8]) -> StdResult<SchemaChange, CqlResultParseError> {
    let mut read = |buf: &mut &[u8]| {
        types::read_string(buf)
            .map(ToOwned::to_owned)
            .map_err(CqlResultParseError::SchemaChangeParseError)
    };
    Ok(SchemaChange {
        change: read(buf)?,
        keyspace: read(buf)?,
        table: read(buf)?,
    })
}

/// Decodes a RESULT body. Only a Rows result invokes `builder`.
pub fn deserialize<B: RowsBuilder>(
    buf: &mut &[u8],
    builder: &mut B,
) -> StdResult<Result<B::Output>, CqlResultParseError> {
    use self::Result::*;
    Ok(
        match types::read_int(buf).map_err(CqlResultParseError::ResultIdParseError)? {
            0x0001 => Void,
            0x0002 => Rows(deser_rows(buf, builder)?),
            0x0003 => SetKeyspace(deser_set_keyspace(buf)?),
            0x0004 => Prepared(deser_prepared(buf)?),
            0x0005 => SchemaChange(deser_schema_change(buf)?),
            id => return Err(CqlResultParseError::UnknownResultId(id)),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    struct PanickingBuilder;

    impl RowsBuilder for PanickingBuilder {
        type Output = ();

        fn build(&mut self, _: ResultMetadata, _: usize, _: &mut &[u8]) -> StdResult<(), RowsParseError> {
            panic!("builder must not be invoked for non-rows results");
        }
    }

    fn rows_body(global: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        types::write_int(0x0002, &mut buf);
        types::write_int(if global { FLAG_GLOBAL_TABLES_SPEC } else { 0 }, &mut buf);
        types::write_int(2, &mut buf);
        if global {
            types::write_string("system", &mut buf).unwrap();
            types::write_string("local", &mut buf).unwrap();
        }
        for (name, type_id) in [("cluster_name", 0x000D_u16), ("tokens", 0x0022)] {
            if !global {
                types::write_string("system", &mut buf).unwrap();
                types::write_string("local", &mut buf).unwrap();
            }
            types::write_string(name, &mut buf).unwrap();
            types::write_short(type_id, &mut buf);
            if type_id == 0x0022 {
                types::write_short(0x000D, &mut buf);
            }
        }
        // rows
        types::write_int(1, &mut buf);
        types::write_bytes(b"Test Cluster", &mut buf).unwrap();
        types::write_bytes_opt(None::<&[u8]>, &mut buf).unwrap();
        buf
    }

    #[test]
    fn rows_with_global_and_per_column_table_spec() {
        for global in [true, false] {
            let body = rows_body(global);
            let result = deserialize(&mut &body[..], &mut RawRowsBuilder).unwrap();
            let Result::Rows(rows) = result else {
                panic!("expected rows, got {result:?}");
            };

            assert_eq!(rows.metadata.col_count, 2);
            assert_eq!(rows.metadata.global_table_spec.is_some(), global);
            let spec = &rows.metadata.col_specs[1];
            assert_eq!(spec.table_spec.ks_name, "system");
            assert_eq!(spec.table_spec.table_name, "local");
            assert_eq!(spec.typ, ColumnType::Set(Box::new(ColumnType::Text)));
            assert_eq!(rows.metadata.column_index("tokens"), Some(1));

            assert_eq!(rows.rows.len(), 1);
            assert_eq!(rows.first_text(), Some(Ok("Test Cluster")));
            assert_eq!(rows.rows[0].columns[1], None);
        }
    }

    #[test]
    fn builder_sees_only_row_bytes() {
        let body = rows_body(true);
        let mut builder = FnRowsBuilder(|metadata: ResultMetadata, count, raw: &mut &[u8]| {
            assert_eq!(metadata.col_specs[0].name, "cluster_name");
            // "Test Cluster" cell (4 + 12) and a null cell (4)
            assert_eq!(raw.len(), 20);
            Ok(count)
        });
        assert_matches!(deserialize(&mut &body[..], &mut builder), Ok(Result::Rows(1)));
    }

    #[test]
    fn truncated_row_reports_cell() {
        let mut body = rows_body(true);
        body.truncate(body.len() - 2);
        assert_matches!(
            deserialize(&mut &body[..], &mut RawRowsBuilder),
            Err(CqlResultParseError::RowsParseError(RowsParseError::CellParseError {
                row_index: 0,
                column_index: 1,
                ..
            }))
        );
    }

    #[test]
    fn non_rows_results_skip_builder() {
        let mut void = Vec::new();
        types::write_int(0x0001, &mut void);
        assert_eq!(deserialize(&mut &void[..], &mut PanickingBuilder).unwrap(), Result::Void);

        let mut set_ks = Vec::new();
        types::write_int(0x0003, &mut set_ks);
        types::write_string("analytics", &mut set_ks).unwrap();
        assert_eq!(
            deserialize(&mut &set_ks[..], &mut PanickingBuilder).unwrap(),
            Result::SetKeyspace(SetKeyspace {
                keyspace_name: "analytics".to_owned()
            })
        );

        let mut schema = Vec::new();
        types::write_int(0x0005, &mut schema);
        for s in ["CREATED", "analytics", "events"] {
            types::write_string(s, &mut schema).unwrap();
        }
        assert_matches!(
            deserialize(&mut &schema[..], &mut PanickingBuilder),
            Ok(Result::SchemaChange(SchemaChange { change, .. })) if change == "CREATED"
        );

        let mut prepared = Vec::new();
        types::write_int(0x0004, &mut prepared);
        types::write_short_bytes(&[0xAB, 0xCD], &mut prepared).unwrap();
        types::write_int(0, &mut prepared);
        types::write_int(0, &mut prepared);
        assert_matches!(
            deserialize(&mut &prepared[..], &mut PanickingBuilder),
            Ok(Result::Prepared(Prepared { id, metadata })) if id[..] == [0xAB, 0xCD] && metadata.col_count == 0
        );
    }

    #[test]
    fn unknown_result_kind() {
        let mut body = Vec::new();
        types::write_int(0x0042, &mut body);
        assert_matches!(
            deserialize(&mut &body[..], &mut RawRowsBuilder),
            Err(CqlResultParseError::UnknownResultId(0x42))
        );
    }

    #[test]
    fn unsupported_column_type() {
        let mut body = Vec::new();
        types::write_int(0x0002, &mut body);
        types::write_int(0, &mut body);
        types::write_int(1, &mut body);
        for s in ["ks", "t", "c"] {
            types::write_string(s, &mut body).unwrap();
        }
        types::write_short(0x0030, &mut body);
        assert_matches!(
            deserialize(&mut &body[..], &mut RawRowsBuilder),
            Err(CqlResultParseError::ResultMetadataParseError(
                ResultMetadataParseError::ColumnTypeParseError {
                    column_index: 0,
                    err: CqlTypeParseError::TypeNotImplemented(0x0030)
                }
            ))
        );
    }
}
