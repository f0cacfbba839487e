//! Row-level helpers over arrow record batches.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{Array, AsArray, UInt32Array};
use arrow::compute::{concat_batches, take_record_batch};
use arrow::datatypes::{
    DataType, Field, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type, Schema,
    SchemaRef, UInt8Type, UInt16Type, UInt32Type, UInt64Type,
};
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};

use crate::error::{Result, ShardError};
use crate::partitioner::{HashPartitioner, Partitioner};
use crate::shard::Value;

/// Read row `i` of an arrow array as a [`Value`].
pub fn array_value(array: &dyn Array, i: usize) -> Result<Value> {
    if array.is_null(i) {
        return Ok(Value::Null);
    }
    let value = match array.data_type() {
        DataType::Boolean => Value::Bool(array.as_boolean().value(i)),
        DataType::Int8 => Value::Int(array.as_primitive::<Int8Type>().value(i).into()),
        DataType::Int16 => Value::Int(array.as_primitive::<Int16Type>().value(i).into()),
        DataType::Int32 => Value::Int(array.as_primitive::<Int32Type>().value(i).into()),
        DataType::Int64 => Value::Int(array.as_primitive::<Int64Type>().value(i)),
        DataType::UInt8 => Value::Int(array.as_primitive::<UInt8Type>().value(i).into()),
        DataType::UInt16 => Value::Int(array.as_primitive::<UInt16Type>().value(i).into()),
        DataType::UInt32 => Value::Int(array.as_primitive::<UInt32Type>().value(i).into()),
        DataType::UInt64 => {
            let v = array.as_primitive::<UInt64Type>().value(i);
            Value::Int(i64::try_from(v).map_err(|_| {
                ShardError::UnsupportedType(format!("{} does not fit a signed integer", v))
            })?)
        }
        DataType::Float32 => Value::Float(array.as_primitive::<Float32Type>().value(i).into()),
        DataType::Float64 => Value::Float(array.as_primitive::<Float64Type>().value(i)),
        DataType::Utf8 => Value::Str(array.as_string::<i32>().value(i).to_string()),
        DataType::LargeUtf8 => Value::Str(array.as_string::<i64>().value(i).to_string()),
        other => {
            return Err(ShardError::UnsupportedType(format!(
                "column type {} has no scalar representation",
                other
            )));
        }
    };
    Ok(value)
}

/// Distinct values of a column in first-seen order.
pub fn distinct_values(array: &dyn Array) -> Result<Vec<Value>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for i in 0..array.len() {
        let value = array_value(array, i)?;
        if seen.insert(value.clone()) {
            out.push(value);
        }
    }
    Ok(out)
}

/// The output bucket of every row, hashing the row-format encoding of
/// `column` so equal values always share a bucket.
pub fn row_buckets(
    batch: &RecordBatch,
    column: usize,
    partitioner: &HashPartitioner,
) -> Result<Vec<usize>> {
    let field = batch.schema().field(column).clone();
    let converter = RowConverter::new(vec![SortField::new(field.data_type().clone())])?;
    let rows = converter.convert_columns(&[batch.column(column).clone()])?;
    Ok(rows
        .iter()
        .map(|row| Partitioner::<[u8]>::get_partition(partitioner, row.as_ref()))
        .collect())
}

/// Split `batch` into `n` sub-batches by bucket. Buckets without rows are
/// `None`.
pub fn split_by_bucket(
    batch: &RecordBatch,
    buckets: &[usize],
    n: usize,
) -> Result<Vec<Option<RecordBatch>>> {
    let mut indices: Vec<Vec<u32>> = vec![Vec::new(); n];
    for (row, bucket) in buckets.iter().enumerate() {
        let row = u32::try_from(row).map_err(|_| {
            ShardError::UnsupportedOperation("table has too many rows to shuffle".to_string())
        })?;
        indices[*bucket].push(row);
    }
    indices
        .into_iter()
        .map(|rows| {
            if rows.is_empty() {
                Ok(None)
            } else {
                Ok(Some(take_record_batch(batch, &UInt32Array::from(rows))?))
            }
        })
        .collect()
}

/// `schema` with every field made nullable that is nullable in any of
/// `batches`.
fn widen_nullability(schema: &SchemaRef, batches: &[RecordBatch]) -> SchemaRef {
    let nullable: Vec<bool> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| {
            field.is_nullable()
                || batches
                    .iter()
                    .any(|b| b.schema().fields().get(i).is_some_and(|f| f.is_nullable()))
        })
        .collect();
    if schema
        .fields()
        .iter()
        .zip(&nullable)
        .all(|(field, nullable)| field.is_nullable() == *nullable)
    {
        return Arc::clone(schema);
    }
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .zip(nullable)
        .map(|(field, nullable)| field.as_ref().clone().with_nullable(nullable))
        .collect();
    Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()))
}

/// Concatenate batches under `schema`; an empty input yields an empty table
/// with that schema. Fields nullable in any batch are nullable in the result.
pub fn concat_tables(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<RecordBatch> {
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(Arc::clone(schema)));
    }
    let target = widen_nullability(schema, batches);
    let aligned = batches
        .iter()
        .map(|batch| {
            if batch.schema() == target {
                Ok(batch.clone())
            } else {
                RecordBatch::try_new(Arc::clone(&target), batch.columns().to_vec())
            }
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(concat_batches(&target, &aligned)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array, StringArray};

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Utf8, false),
            Field::new("v", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["a", "b", "a", "c", "b"])),
                Arc::new(Float64Array::from(vec![Some(1.0), None, Some(3.0), Some(4.0), Some(5.0)])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_array_value() {
        let b = batch();
        assert_eq!(array_value(b.column(0).as_ref(), 3).unwrap(), Value::from("c"));
        assert_eq!(array_value(b.column(1).as_ref(), 1).unwrap(), Value::Null);
        let ints = Int64Array::from(vec![9]);
        assert_eq!(array_value(&ints, 0).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_distinct_values_first_seen_order() {
        let b = batch();
        let values = distinct_values(b.column(0).as_ref()).unwrap();
        assert_eq!(values, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    }

    #[test]
    fn test_equal_keys_share_a_bucket() {
        let b = batch();
        let buckets = row_buckets(&b, 0, &HashPartitioner::new(3)).unwrap();
        assert_eq!(buckets[0], buckets[2]);
        assert_eq!(buckets[1], buckets[4]);
        assert!(buckets.iter().all(|x| *x < 3));
    }

    #[test]
    fn test_split_by_bucket_preserves_rows() {
        let b = batch();
        let buckets = vec![0, 1, 0, 1, 1];
        let parts = split_by_bucket(&b, &buckets, 3).unwrap();
        assert_eq!(parts[0].as_ref().unwrap().num_rows(), 2);
        assert_eq!(parts[1].as_ref().unwrap().num_rows(), 3);
        assert!(parts[2].is_none());

        let all: Vec<RecordBatch> = parts.into_iter().flatten().collect();
        let merged = concat_tables(&b.schema(), &all).unwrap();
        assert_eq!(merged.num_rows(), 5);
        assert_eq!(concat_tables(&b.schema(), &[]).unwrap().num_rows(), 0);
    }

    #[test]
    fn test_concat_widens_nullability() {
        let strict = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)])),
            vec![Arc::new(Int64Array::from(vec![1, 2]))],
        )
        .unwrap();
        let loose = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)])),
            vec![Arc::new(Int64Array::from(vec![Some(3), None]))],
        )
        .unwrap();

        let merged = concat_tables(&strict.schema(), &[strict.clone(), loose]).unwrap();
        assert_eq!(merged.num_rows(), 4);
        assert!(merged.schema().field(0).is_nullable());
        assert_eq!(merged.column(0).null_count(), 1);

        let unchanged = concat_tables(&strict.schema(), &[strict.clone(), strict.clone()]).unwrap();
        assert_eq!(unchanged.schema(), strict.schema());
    }
}
