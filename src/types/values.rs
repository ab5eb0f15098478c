//! Runtime value types
//!
//! A blob holds exactly one `Val`. Numeric kernels treat `Int`, `Num` and
//! `Tensor` uniformly through [`Val::numeric`], with single-element values
//! broadcasting against tensors.

use crate::errors::KernelError;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

/* ===================== Values ===================== */

/// Runtime value stored in a blob
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Val {
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(String),
    Tensor(Tensor),
    /// Execution-record stack created by `CreateScope`. Lives only in memory.
    #[serde(skip)]
    Scope(ScopeRef),
}

/// Dense row-major f64 tensor; `data.len()` is the product of `shape`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

#[derive(Deserialize)]
struct RawTensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = KernelError;

    fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
        Tensor::new(raw.shape, raw.data)
    }
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, KernelError> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(KernelError::Shape(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                numel,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    fn is_consistent(&self) -> bool {
        self.data.len() == self.shape.iter().product::<usize>()
    }

    pub fn filled(shape: Vec<usize>, value: f64) -> Self {
        let numel = shape.iter().product();
        Self {
            shape,
            data: vec![value; numel],
        }
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Int(a), Val::Int(b)) => a == b,
            (Val::Num(a), Val::Num(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::Tensor(a), Val::Tensor(b)) => a == b,
            (Val::Scope(a), Val::Scope(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Shape plus flattened data of a numeric value
#[derive(Debug, Clone, PartialEq)]
pub struct Numeric {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
    /// Both the value and its origin were integers
    pub integral: bool,
}

impl Val {
    /// Short type name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Num(_) => "num",
            Val::Str(_) => "str",
            Val::Tensor(_) => "tensor",
            Val::Scope(_) => "scope",
        }
    }

    /// Convert to a branch/loop decision.
    ///
    /// Only single boolean-convertible scalars qualify; anything else
    /// (strings, multi-element tensors, scope handles) returns `None`.
    pub fn as_condition(&self) -> Option<bool> {
        match self {
            Val::Bool(b) => Some(*b),
            Val::Int(i) => Some(*i != 0),
            Val::Num(n) => Some(*n != 0.0),
            Val::Tensor(t) if t.numel() == 1 => Some(t.data[0] != 0.0),
            _ => None,
        }
    }

    /// Numeric view of the value, `None` for non-numeric values.
    ///
    /// Booleans count as 0/1 so comparison results can feed arithmetic.
    pub fn numeric(&self) -> Option<Numeric> {
        match self {
            Val::Bool(b) => Some(Numeric {
                shape: vec![],
                data: vec![if *b { 1.0 } else { 0.0 }],
                integral: true,
            }),
            Val::Int(i) => Some(Numeric {
                shape: vec![],
                data: vec![*i as f64],
                integral: true,
            }),
            Val::Num(n) => Some(Numeric {
                shape: vec![],
                data: vec![*n],
                integral: false,
            }),
            Val::Tensor(t) if t.is_consistent() => Some(Numeric {
                shape: t.shape.clone(),
                data: t.data.clone(),
                integral: false,
            }),
            Val::Tensor(_) | Val::Str(_) | Val::Scope(_) => None,
        }
    }

    /// Build a value back from numeric parts. Rank-0 shapes become scalars.
    pub fn from_numeric(shape: Vec<usize>, data: Vec<f64>, integral: bool) -> Val {
        if shape.is_empty() && data.len() == 1 {
            if integral {
                Val::Int(data[0] as i64)
            } else {
                Val::Num(data[0])
            }
        } else {
            Val::Tensor(Tensor { shape, data })
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Int(i) => Some(*i as f64),
            Val::Num(n) => Some(*n),
            Val::Tensor(t) if t.numel() == 1 => Some(t.data[0]),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Val::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Val {
    fn from(v: bool) -> Self {
        Val::Bool(v)
    }
}

impl From<i64> for Val {
    fn from(v: i64) -> Self {
        Val::Int(v)
    }
}

impl From<i32> for Val {
    fn from(v: i32) -> Self {
        Val::Int(v as i64)
    }
}

impl From<f64> for Val {
    fn from(v: f64) -> Self {
        Val::Num(v)
    }
}

impl From<&str> for Val {
    fn from(v: &str) -> Self {
        Val::Str(v.to_string())
    }
}

impl From<Tensor> for Val {
    fn from(v: Tensor) -> Self {
        Val::Tensor(v)
    }
}

/* ===================== Execution Records ===================== */

/// Blob values captured for one block execution (one loop iteration, one
/// taken branch, one `Do` invocation).
pub type Snapshot = BTreeMap<String, Val>;

/// Everything recorded by one execution of a recording control operator.
///
/// `If` and `Do` record a single iteration; `While` records one snapshot per
/// body iteration. When a retention bound applies, the oldest iterations are
/// evicted and `first_retained` moves forward.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionRecord {
    iterations: VecDeque<Snapshot>,
    first_retained: usize,
    total: usize,
}

impl ExecutionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record holding exactly one snapshot
    pub fn single(snapshot: Snapshot) -> Self {
        let mut record = Self::new();
        record.push(snapshot, None);
        record
    }

    /// Append the snapshot of the next iteration.
    ///
    /// Returns the evicted iteration index when `limit` forced one out.
    pub fn push(&mut self, snapshot: Snapshot, limit: Option<usize>) -> Option<usize> {
        self.iterations.push_back(snapshot);
        self.total += 1;
        match limit {
            Some(max) if self.iterations.len() > max => {
                self.iterations.pop_front();
                let evicted = self.first_retained;
                self.first_retained += 1;
                Some(evicted)
            }
            _ => None,
        }
    }

    /// Number of iterations that were executed (retained or not)
    pub fn total(&self) -> usize {
        self.total
    }

    /// Snapshot for `iteration`, `None` if it was never recorded or was evicted
    pub fn iteration(&self, iteration: usize) -> Option<&Snapshot> {
        if iteration < self.first_retained {
            return None;
        }
        self.iterations.get(iteration - self.first_retained)
    }
}

/// LIFO stack of execution records, shared by reference between the
/// workspace that created it and every child workspace that reads it.
#[derive(Debug, Clone, Default)]
pub struct ScopeRef(Rc<RefCell<Vec<ExecutionRecord>>>);

impl ScopeRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: ExecutionRecord) {
        self.0.borrow_mut().push(record);
    }

    pub fn pop(&self) -> Option<ExecutionRecord> {
        self.0.borrow_mut().pop()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn ptr_eq(&self, other: &ScopeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_conversion() {
        assert_eq!(Val::Bool(true).as_condition(), Some(true));
        assert_eq!(Val::Int(0).as_condition(), Some(false));
        assert_eq!(Val::Num(0.5).as_condition(), Some(true));
        assert_eq!(
            Val::Tensor(Tensor::new(vec![1], vec![0.0]).unwrap()).as_condition(),
            Some(false)
        );
        assert_eq!(Val::Tensor(Tensor::filled(vec![2], 1.0)).as_condition(), None);
        assert_eq!(Val::Str("yes".into()).as_condition(), None);
    }

    #[test]
    fn test_record_eviction_keeps_latest_iterations() {
        let mut record = ExecutionRecord::new();
        for i in 0..4 {
            let mut snap = Snapshot::new();
            snap.insert("i".to_string(), Val::Int(i));
            record.push(snap, Some(2));
        }

        assert_eq!(record.total(), 4);
        assert!(record.iteration(0).is_none());
        assert!(record.iteration(1).is_none());
        assert_eq!(record.iteration(3).unwrap().get("i"), Some(&Val::Int(3)));
    }

    #[test]
    fn test_scope_ref_is_shared_between_clones() {
        let scope = ScopeRef::new();
        let alias = scope.clone();
        alias.push(ExecutionRecord::new());

        assert_eq!(scope.len(), 1);
        assert!(Val::Scope(scope.clone()) == Val::Scope(alias));
        assert!(Val::Scope(scope) != Val::Scope(ScopeRef::new()));
    }

    #[test]
    fn test_tensor_rejects_mismatched_data() {
        assert!(Tensor::new(vec![], vec![]).is_err());
        assert!(Tensor::new(vec![2, 2], vec![1.0; 3]).is_err());
        assert!(Tensor::new(vec![0], vec![]).is_ok());

        let bad: Result<Val, _> =
            serde_json::from_str(r#"{"t":"Tensor","v":{"shape":[],"data":[]}}"#);
        assert!(bad.is_err());
        let good: Val =
            serde_json::from_str(r#"{"t":"Tensor","v":{"shape":[2],"data":[1.0,2.0]}}"#).unwrap();
        assert_eq!(good, Val::Tensor(Tensor::new(vec![2], vec![1.0, 2.0]).unwrap()));
    }

    #[test]
    fn test_hand_built_inconsistent_tensor_is_not_numeric() {
        let t = Val::Tensor(Tensor {
            shape: vec![],
            data: vec![],
        });
        assert!(t.numeric().is_none());
    }

    #[test]
    fn test_val_json_shape() {
        let json = serde_json::to_string(&Val::Num(2.0)).unwrap();
        assert_eq!(json, r#"{"t":"Num","v":2.0}"#);
    }
}
