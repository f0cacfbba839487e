//! Binary encoding of partitions for the object store and durable storage.
//!
//! Structure and plain values go through serde and bincode; tables and
//! series are embedded as arrow IPC streams.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use arrow::datatypes::{Field, Schema};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use shards_common::CommonError;

use crate::error::{Result, ShardError};
use crate::shard::{NdArray, Series, Shard, Value};
use crate::table::concat_tables;

#[derive(Serialize, Deserialize)]
enum WireShard {
    Table(Vec<u8>),
    Series(Vec<u8>),
    Array(NdArray),
    List(Vec<WireShard>),
    Tuple(Vec<WireShard>),
    Map(BTreeMap<String, WireShard>),
    Scalar(Value),
}

fn to_wire(shard: &Shard) -> Result<WireShard> {
    Ok(match shard {
        Shard::Table(batch) => WireShard::Table(table_to_ipc(batch)?),
        Shard::Series(series) => {
            let schema = Arc::new(Schema::new(vec![Field::new(
                series.name(),
                series.values().data_type().clone(),
                true,
            )]));
            let batch = RecordBatch::try_new(schema, vec![series.values().clone()])?;
            WireShard::Series(table_to_ipc(&batch)?)
        }
        Shard::Array(array) => WireShard::Array(array.clone()),
        Shard::List(items) => WireShard::List(items.iter().map(to_wire).collect::<Result<_>>()?),
        Shard::Tuple(items) => WireShard::Tuple(items.iter().map(to_wire).collect::<Result<_>>()?),
        Shard::Map(map) => WireShard::Map(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), to_wire(v)?)))
                .collect::<Result<_>>()?,
        ),
        Shard::Scalar(value) => WireShard::Scalar(value.clone()),
    })
}

fn from_wire(wire: WireShard) -> Result<Shard> {
    Ok(match wire {
        WireShard::Table(bytes) => Shard::Table(ipc_to_table(&bytes)?),
        WireShard::Series(bytes) => {
            let batch = ipc_to_table(&bytes)?;
            if batch.num_columns() != 1 {
                return Err(CommonError::deserialization_error(format!(
                    "series payload has {} columns",
                    batch.num_columns()
                ))
                .into());
            }
            let name = batch.schema().field(0).name().clone();
            Shard::Series(Series::new(name, batch.column(0).clone()))
        }
        WireShard::Array(array) => Shard::Array(array),
        WireShard::List(items) => {
            Shard::List(items.into_iter().map(from_wire).collect::<Result<_>>()?)
        }
        WireShard::Tuple(items) => {
            Shard::Tuple(items.into_iter().map(from_wire).collect::<Result<_>>()?)
        }
        WireShard::Map(map) => Shard::Map(
            map.into_iter()
                .map(|(k, v)| Ok((k, from_wire(v)?)))
                .collect::<Result<_>>()?,
        ),
        WireShard::Scalar(value) => Shard::Scalar(value),
    })
}

fn table_to_ipc(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut writer = StreamWriter::try_new(Vec::new(), &batch.schema())?;
    writer.write(batch)?;
    writer.finish()?;
    Ok(writer.into_inner()?)
}

fn ipc_to_table(bytes: &[u8]) -> Result<RecordBatch> {
    let reader = StreamReader::try_new(Cursor::new(bytes), None)?;
    let schema = reader.schema();
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    concat_tables(&schema, &batches)
}

/// Serialize any serde value with the standard bincode configuration.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        ShardError::Store(CommonError::serialization_error_with_source(
            "failed to encode value",
            e,
        ))
    })
}

pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| {
            ShardError::Store(CommonError::deserialization_error_with_source(
                "failed to decode value",
                e,
            ))
        })?;
    Ok(value)
}

/// Encode a partition as one self-contained blob.
pub fn encode_partition(elements: &[Shard]) -> Result<Vec<u8>> {
    let wire = elements.iter().map(to_wire).collect::<Result<Vec<_>>>()?;
    encode_value(&wire)
}

pub fn decode_partition(bytes: &[u8]) -> Result<Vec<Shard>> {
    let wire: Vec<WireShard> = decode_value(bytes)?;
    wire.into_iter().map(from_wire).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array};
    use arrow::datatypes::DataType;

    #[test]
    fn test_mixed_partition_survives_encoding() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(Float64Array::from(vec![Some(0.5), None, Some(1.5)])),
            ],
        )
        .unwrap();
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), Shard::Array(NdArray::from_vec(vec![1.0, 2.0])));
        let partition = vec![
            Shard::Table(batch),
            Shard::Series(Series::new("s", Arc::new(Int64Array::from(vec![4, 5])))),
            Shard::Tuple(vec![Shard::Map(map), Shard::Scalar(Value::from("label"))]),
        ];

        let bytes = encode_partition(&partition).unwrap();
        assert_eq!(decode_partition(&bytes).unwrap(), partition);
    }

    #[test]
    fn test_empty_table_keeps_schema() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
        let empty = RecordBatch::new_empty(schema.clone());
        let decoded = decode_partition(&encode_partition(&[Shard::Table(empty)]).unwrap()).unwrap();
        let table = decoded[0].as_table().unwrap();
        assert_eq!(table.num_rows(), 0);
        assert_eq!(table.schema(), schema);
    }

    #[test]
    fn test_garbage_is_a_deserialization_error() {
        let err = decode_partition(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(
            err,
            ShardError::Store(CommonError::DeserializationError { .. })
        ));
    }
}
