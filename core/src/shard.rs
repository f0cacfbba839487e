//! The element model: what a single partition element can hold.
//!
//! A partition is an ordered `Vec<Shard>`. Tables and series are backed by
//! arrow; n-dimensional arrays use a flat row-major buffer with a shape.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use arrow::array::{Array, ArrayRef};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardError};
use crate::partitioner::even_split_ranges;
use crate::table::array_value;

pub(crate) const NO_SELECTION: &str = "No selection operation available for this element";

/// A single scalar value.
///
/// Floats compare and hash by bit pattern so values can be deduplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    Int64,
    Float64,
    Utf8,
}

/// Flat storage of an [`NdArray`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
}

impl ArrayData {
    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::Bool => ArrayData::Bool(Vec::new()),
            DType::Int64 => ArrayData::Int64(Vec::new()),
            DType::Float64 => ArrayData::Float64(Vec::new()),
            DType::Utf8 => ArrayData::Utf8(Vec::new()),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::Bool(_) => DType::Bool,
            ArrayData::Int64(_) => DType::Int64,
            ArrayData::Float64(_) => DType::Float64,
            ArrayData::Utf8(_) => DType::Utf8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::Float64(v) => v.len(),
            ArrayData::Utf8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value(&self, i: usize) -> Option<Value> {
        match self {
            ArrayData::Bool(v) => v.get(i).map(|x| Value::Bool(*x)),
            ArrayData::Int64(v) => v.get(i).map(|x| Value::Int(*x)),
            ArrayData::Float64(v) => v.get(i).map(|x| Value::Float(*x)),
            ArrayData::Utf8(v) => v.get(i).map(|x| Value::Str(x.clone())),
        }
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        match self {
            ArrayData::Bool(v) => ArrayData::Bool(v[start..end].to_vec()),
            ArrayData::Int64(v) => ArrayData::Int64(v[start..end].to_vec()),
            ArrayData::Float64(v) => ArrayData::Float64(v[start..end].to_vec()),
            ArrayData::Utf8(v) => ArrayData::Utf8(v[start..end].to_vec()),
        }
    }

    fn extend(&mut self, other: &ArrayData) -> bool {
        match (self, other) {
            (ArrayData::Bool(a), ArrayData::Bool(b)) => a.extend_from_slice(b),
            (ArrayData::Int64(a), ArrayData::Int64(b)) => a.extend_from_slice(b),
            (ArrayData::Float64(a), ArrayData::Float64(b)) => a.extend_from_slice(b),
            (ArrayData::Utf8(a), ArrayData::Utf8(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }
}

impl From<Vec<bool>> for ArrayData {
    fn from(v: Vec<bool>) -> Self {
        ArrayData::Bool(v)
    }
}

impl From<Vec<i64>> for ArrayData {
    fn from(v: Vec<i64>) -> Self {
        ArrayData::Int64(v)
    }
}

impl From<Vec<f64>> for ArrayData {
    fn from(v: Vec<f64>) -> Self {
        ArrayData::Float64(v)
    }
}

impl From<Vec<String>> for ArrayData {
    fn from(v: Vec<String>) -> Self {
        ArrayData::Utf8(v)
    }
}

/// A dense n-dimensional array stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl NdArray {
    pub fn new(shape: Vec<usize>, data: impl Into<ArrayData>) -> Result<Self> {
        let data = data.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ShardError::InconsistentShape(format!(
                "shape {:?} needs {} values but {} were given",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// A one-dimensional array.
    pub fn from_vec(data: impl Into<ArrayData>) -> Self {
        let data = data.into();
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// An array with zero rows and the given trailing dimensions.
    pub fn empty_rows(dtype: DType, trailing: &[usize]) -> Self {
        let mut shape = Vec::with_capacity(trailing.len() + 1);
        shape.push(0);
        shape.extend_from_slice(trailing);
        Self {
            shape,
            data: ArrayData::empty(dtype),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Length of the leading axis; `None` for zero-dimensional arrays.
    pub fn len(&self) -> Option<usize> {
        self.shape.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    fn row_width(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Rows `[start, end)` along the leading axis.
    pub fn slice_rows(&self, start: usize, end: usize) -> NdArray {
        let rows = self.len().unwrap_or(0);
        let end = end.min(rows);
        let start = start.min(end);
        let width = self.row_width();
        let mut shape = self.shape.clone();
        if let Some(first) = shape.first_mut() {
            *first = end - start;
        }
        NdArray {
            shape,
            data: self.data.slice(start * width, end * width),
        }
    }

    /// Row `i` along the leading axis: a scalar for 1-D arrays, otherwise a
    /// sub-array with one dimension less.
    pub fn row(&self, i: usize) -> std::result::Result<Shard, String> {
        let rows = match self.len() {
            Some(rows) => rows,
            None => return Err(NO_SELECTION.to_string()),
        };
        if i >= rows {
            return Err(format!("Invalid key {} for an array of {} rows", i, rows));
        }
        if self.ndim() == 1 {
            return self
                .data
                .value(i)
                .map(Shard::Scalar)
                .ok_or_else(|| format!("Invalid key {}", i));
        }
        let width = self.row_width();
        Ok(Shard::Array(NdArray {
            shape: self.shape[1..].to_vec(),
            data: self.data.slice(i * width, (i + 1) * width),
        }))
    }

    /// Concatenate along axis 0.
    pub fn concat(arrays: &[NdArray]) -> Result<NdArray> {
        let first = arrays.first().ok_or_else(|| {
            ShardError::InvalidArgument("cannot concatenate zero arrays".to_string())
        })?;
        if first.ndim() == 0 {
            return Err(ShardError::InconsistentShape(
                "zero-dimensional arrays cannot be concatenated".to_string(),
            ));
        }
        let trailing = &first.shape[1..];
        let mut data = ArrayData::empty(first.dtype());
        let mut rows = 0;
        for array in arrays {
            if array.ndim() == 0 || &array.shape[1..] != trailing {
                return Err(ShardError::InconsistentShape(format!(
                    "cannot concatenate shape {:?} with shape {:?}",
                    array.shape, first.shape
                )));
            }
            if !data.extend(&array.data) {
                return Err(ShardError::UnsupportedType(format!(
                    "cannot concatenate {:?} with {:?}",
                    array.dtype(),
                    first.dtype()
                )));
            }
            rows += array.shape[0];
        }
        let mut shape = first.shape.clone();
        shape[0] = rows;
        Ok(NdArray { shape, data })
    }

    /// Split into `n` contiguous pieces along axis 0; when the length does not
    /// divide evenly the leading pieces get one extra row.
    pub fn array_split(&self, n: usize) -> Vec<NdArray> {
        even_split_ranges(self.len().unwrap_or(0), n)
            .into_iter()
            .map(|r| self.slice_rows(r.start, r.end))
            .collect()
    }
}

/// A named one-dimensional column.
#[derive(Debug, Clone)]
pub struct Series {
    name: String,
    values: ArrayRef,
}

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.values.as_ref() == other.values.as_ref()
    }
}

impl Series {
    pub fn new(name: impl Into<String>, values: ArrayRef) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &ArrayRef {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, i: usize) -> Result<Value> {
        array_value(self.values.as_ref(), i)
    }
}

/// The kind of a collection's elements, detected from its first element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Table,
    Series,
    Array,
    List,
    Tuple,
    Map,
    Scalar,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Table => "table",
            ElementKind::Series => "series",
            ElementKind::Array => "array",
            ElementKind::List => "list",
            ElementKind::Tuple => "tuple",
            ElementKind::Map => "map",
            ElementKind::Scalar => "scalar",
        };
        f.write_str(name)
    }
}

/// Key for [`Shard::get`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShardKey {
    Index(usize),
    Name(String),
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardKey::Index(i) => write!(f, "{}", i),
            ShardKey::Name(n) => write!(f, "{:?}", n),
        }
    }
}

impl From<usize> for ShardKey {
    fn from(i: usize) -> Self {
        ShardKey::Index(i)
    }
}

impl From<&str> for ShardKey {
    fn from(name: &str) -> Self {
        ShardKey::Name(name.to_string())
    }
}

impl From<String> for ShardKey {
    fn from(name: String) -> Self {
        ShardKey::Name(name)
    }
}

/// One element of a partition.
#[derive(Debug, Clone, PartialEq)]
pub enum Shard {
    Table(RecordBatch),
    Series(Series),
    Array(NdArray),
    List(Vec<Shard>),
    Tuple(Vec<Shard>),
    Map(BTreeMap<String, Shard>),
    Scalar(Value),
}

impl Shard {
    pub fn kind(&self) -> ElementKind {
        match self {
            Shard::Table(_) => ElementKind::Table,
            Shard::Series(_) => ElementKind::Series,
            Shard::Array(_) => ElementKind::Array,
            Shard::List(_) => ElementKind::List,
            Shard::Tuple(_) => ElementKind::Tuple,
            Shard::Map(_) => ElementKind::Map,
            Shard::Scalar(_) => ElementKind::Scalar,
        }
    }

    /// Number of rows or items, or `None` for elements without a length.
    pub fn len(&self) -> Option<usize> {
        match self {
            Shard::Table(batch) => Some(batch.num_rows()),
            Shard::Series(series) => Some(series.len()),
            Shard::Array(array) => array.len(),
            Shard::List(items) | Shard::Tuple(items) => Some(items.len()),
            Shard::Map(map) => Some(map.len()),
            Shard::Scalar(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Select a column, item or row by key.
    pub fn get(&self, key: &ShardKey) -> std::result::Result<Shard, String> {
        let invalid = || format!("Invalid key {} for this {}", key, self.kind());
        match (self, key) {
            (Shard::Table(batch), ShardKey::Name(name)) => batch
                .column_by_name(name)
                .map(|column| Shard::Series(Series::new(name.clone(), column.clone())))
                .ok_or_else(invalid),
            (Shard::Series(series), ShardKey::Index(i)) if *i < series.len() => series
                .value(*i)
                .map(Shard::Scalar)
                .map_err(|e| e.to_string()),
            (Shard::Array(array), ShardKey::Index(i)) => array.row(*i),
            (Shard::List(items) | Shard::Tuple(items), ShardKey::Index(i)) => {
                items.get(*i).cloned().ok_or_else(invalid)
            }
            (Shard::Map(map), ShardKey::Name(name)) => map.get(name).cloned().ok_or_else(invalid),
            (Shard::Scalar(_), _) => Err(NO_SELECTION.to_string()),
            _ => Err(invalid()),
        }
    }

    /// The non-container leaves, depth first; map entries in key order.
    pub fn leaves(&self) -> Vec<&Shard> {
        match self {
            Shard::List(items) | Shard::Tuple(items) => {
                items.iter().flat_map(|item| item.leaves()).collect()
            }
            Shard::Map(map) => map.values().flat_map(|item| item.leaves()).collect(),
            leaf => vec![leaf],
        }
    }

    /// Rebuild this element's container structure around new leaves, taken
    /// in the order [`Shard::leaves`] yields them.
    pub fn pack_leaves(&self, leaves: &mut impl Iterator<Item = Shard>) -> Option<Shard> {
        match self {
            Shard::List(items) => items
                .iter()
                .map(|item| item.pack_leaves(leaves))
                .collect::<Option<Vec<_>>>()
                .map(Shard::List),
            Shard::Tuple(items) => items
                .iter()
                .map(|item| item.pack_leaves(leaves))
                .collect::<Option<Vec<_>>>()
                .map(Shard::Tuple),
            Shard::Map(map) => map
                .iter()
                .map(|(k, item)| item.pack_leaves(leaves).map(|packed| (k.clone(), packed)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Shard::Map),
            _ => leaves.next(),
        }
    }

    pub fn as_table(&self) -> Option<&RecordBatch> {
        match self {
            Shard::Table(batch) => Some(batch),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Shard::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn int(v: i64) -> Shard {
        Shard::Scalar(Value::Int(v))
    }
}

impl From<RecordBatch> for Shard {
    fn from(batch: RecordBatch) -> Self {
        Shard::Table(batch)
    }
}

impl From<NdArray> for Shard {
    fn from(array: NdArray) -> Self {
        Shard::Array(array)
    }
}

impl From<Series> for Shard {
    fn from(series: Series) -> Self {
        Shard::Series(series)
    }
}

impl From<Value> for Shard {
    fn from(value: Value) -> Self {
        Shard::Scalar(value)
    }
}
