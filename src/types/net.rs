//! Net and operator definitions
//!
//! A `Net` is an ordered operator list plus the scope annotation the
//! resolver attaches to it. Control operators carry their sub-nets inline.

use super::values::Val;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Static operator parameters (exponent, fill value, ...)
pub type Args = BTreeMap<String, Val>;

/* ===================== Net ===================== */

/// Ordered operator sequence.
///
/// `locals`, `external_inputs` and `external_outputs` are filled in by the
/// scope resolver; a hand-written net gets them from `resolve_net`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Net {
    pub name: String,
    pub ops: Vec<Operator>,
    /// Names first bound inside this net
    #[serde(default)]
    pub locals: Vec<String>,
    /// Names read here but bound by an enclosing block
    #[serde(default)]
    pub external_inputs: Vec<String>,
    /// Names bound by an enclosing block and updated here
    #[serde(default)]
    pub external_outputs: Vec<String>,
}

impl Net {
    pub fn new(name: impl Into<String>, ops: Vec<Operator>) -> Self {
        Self {
            name: name.into(),
            ops,
            ..Default::default()
        }
    }

    /// Every name the net touches from outside, reads and updates
    pub fn externals(&self) -> BTreeSet<String> {
        self.external_inputs
            .iter()
            .chain(self.external_outputs.iter())
            .cloned()
            .collect()
    }

    /// Externals plus locals: everything a recorded snapshot can hold
    pub fn snapshot_names(&self) -> Vec<String> {
        let mut names = self.externals();
        names.extend(self.locals.iter().cloned());
        names.into_iter().collect()
    }

    /// Parse the JSON form produced by [`Net::to_json`]. The result is not
    /// resolved; pass it through `resolve_net` before running it.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/* ===================== Operators ===================== */

/// A registered compute operator, opaque to the control-flow engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeOp {
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub args: Args,
}

impl ComputeOp {
    pub fn new(op_type: impl Into<String>, inputs: Vec<String>, outputs: Vec<String>) -> Self {
        Self {
            op_type: op_type.into(),
            inputs,
            outputs,
            args: Args::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Val>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn arg(&self, key: &str) -> Option<&Val> {
        self.args.get(key)
    }
}

/// Direction of a `Do` / `Replay` blob binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
    InOut,
}

impl Direction {
    pub fn is_input(self) -> bool {
        matches!(self, Direction::Input | Direction::InOut)
    }

    pub fn is_output(self) -> bool {
        matches!(self, Direction::Output | Direction::InOut)
    }
}

/// Outer-name to inner-name mapping across a workspace boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobBinding {
    pub outer: String,
    pub inner: String,
    pub direction: Direction,
}

impl BlobBinding {
    pub fn input(outer: impl Into<String>, inner: impl Into<String>) -> Self {
        Self {
            outer: outer.into(),
            inner: inner.into(),
            direction: Direction::Input,
        }
    }

    pub fn output(inner: impl Into<String>, outer: impl Into<String>) -> Self {
        Self {
            outer: outer.into(),
            inner: inner.into(),
            direction: Direction::Output,
        }
    }

    pub fn in_out(outer: impl Into<String>, inner: impl Into<String>) -> Self {
        Self {
            outer: outer.into(),
            inner: inner.into(),
            direction: Direction::InOut,
        }
    }
}

/// How many times a `Replay` runs its body per popped record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    /// Once, against the record's only snapshot
    Block,
    /// Once per recorded iteration, last iteration first
    Loop,
}

/// Operator node
///
/// `If` and `While` run in the caller's workspace unless `isolated` is set,
/// in which case each block execution gets a child workspace and only the
/// block's external outputs are written back. `scope`, when present, names a
/// `CreateScope` blob that receives one execution record per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Operator {
    Compute(ComputeOp),
    If {
        cond: String,
        then_net: Net,
        #[serde(default)]
        else_net: Option<Net>,
        #[serde(default)]
        isolated: bool,
        #[serde(default)]
        scope: Option<String>,
    },
    While {
        cond_net: Net,
        cond: String,
        body: Net,
        #[serde(default)]
        isolated: bool,
        #[serde(default)]
        scope: Option<String>,
    },
    Do {
        net: Net,
        blob_map: Vec<BlobBinding>,
        #[serde(default)]
        scope: Option<String>,
    },
    CreateScope {
        output: String,
    },
    HasScope {
        scope: String,
        output: String,
    },
    /// Backward counterpart of a recording block, produced by the gradient pass
    Replay {
        scope: String,
        body: Net,
        mode: ReplayMode,
        /// Names restored from the snapshot into the replay workspace
        restores: Vec<String>,
        blob_map: Vec<BlobBinding>,
    },
}

impl Operator {
    pub fn compute(op_type: impl Into<String>, inputs: &[&str], outputs: &[&str]) -> Self {
        Operator::Compute(ComputeOp::new(
            op_type,
            inputs.iter().map(|s| s.to_string()).collect(),
            outputs.iter().map(|s| s.to_string()).collect(),
        ))
    }

    /// Operator type name for logs and errors
    pub fn kind(&self) -> &str {
        match self {
            Operator::Compute(op) => &op.op_type,
            Operator::If { .. } => "If",
            Operator::While { .. } => "While",
            Operator::Do { .. } => "Do",
            Operator::CreateScope { .. } => "CreateScope",
            Operator::HasScope { .. } => "HasScope",
            Operator::Replay { .. } => "Replay",
        }
    }

    /// Names this operator may write in the net that contains it.
    ///
    /// Relies on sub-net annotations for control operators.
    pub fn writes(&self) -> BTreeSet<String> {
        match self {
            Operator::Compute(op) => op.outputs.iter().cloned().collect(),
            Operator::If {
                then_net, else_net, ..
            } => {
                let mut names: BTreeSet<String> =
                    then_net.external_outputs.iter().cloned().collect();
                if let Some(else_net) = else_net {
                    names.extend(else_net.external_outputs.iter().cloned());
                }
                names
            }
            Operator::While { cond_net, body, .. } => cond_net
                .external_outputs
                .iter()
                .chain(body.external_outputs.iter())
                .cloned()
                .collect(),
            Operator::Do { blob_map, .. } | Operator::Replay { blob_map, .. } => blob_map
                .iter()
                .filter(|b| b.direction.is_output())
                .map(|b| b.outer.clone())
                .collect(),
            Operator::CreateScope { output } | Operator::HasScope { output, .. } => {
                BTreeSet::from([output.clone()])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_reads_tagged_operators() {
        let net = Net::from_json(
            r#"{
                "name": "main",
                "ops": [
                    {"t": "CreateScope", "output": "s"},
                    {"t": "While", "cond": "c",
                     "cond_net": {"name": "cond", "ops": [
                        {"t": "Compute", "op_type": "LT", "inputs": ["i", "n"], "outputs": ["c"]}
                     ]},
                     "body": {"name": "body", "ops": [
                        {"t": "Compute", "op_type": "Add", "inputs": ["i", "one"], "outputs": ["i"]}
                     ]}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(net.ops.len(), 2);
        assert_eq!(net.ops[1].kind(), "While");
        assert_eq!(net.ops[0].writes(), BTreeSet::from(["s".to_string()]));
        // Control operators report writes from resolver annotations only
        assert!(net.ops[1].writes().is_empty());
        assert_eq!(Net::from_json(&net.to_json().unwrap()).unwrap(), net);
    }

    #[test]
    fn test_from_json_rejects_unknown_operator_tag() {
        assert!(Net::from_json(r#"{"name": "n", "ops": [{"t": "Goto"}]}"#).is_err());
    }
}
