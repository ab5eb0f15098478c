//! Closure-based net construction
//!
//! `NetBuilder` resolves scope as operators are added, so a visibility error
//! surfaces at the call that introduced it and `build()` never returns a
//! partially valid net.
//!
//! ```ignore
//! let mut b = NetBuilder::with_scope("net", &["x"]);
//! b.constant(0.0, "zero")?;
//! let cond = b.op_auto("GT", &["x", "zero"])?;
//! b.if_else(
//!     &cond,
//!     |b| b.op_with_args("Pow", &["x"], &["y"], args! { "exponent" => 2.0 }),
//!     |b| b.op_with_args("Pow", &["x"], &["y"], args! { "exponent" => 3.0 }),
//! )?;
//! let net = b.build()?;
//! ```

use super::ScopeResolver;
use crate::errors::{BuildError, BuildResult};
use crate::types::{Args, BlobBinding, ComputeOp, Net, Operator, Val};

pub struct NetBuilder {
    name: String,
    resolver: ScopeResolver,
    /// Operator lists of the open blocks, innermost last
    blocks: Vec<Vec<Operator>>,
    isolated: bool,
    next_auto: usize,
}

impl NetBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_scope(name, &[] as &[&str])
    }

    /// Builder for a net whose driver feeds `initial_scope` before running it
    pub fn with_scope<S: AsRef<str>>(name: impl Into<String>, initial_scope: &[S]) -> Self {
        let name = name.into();
        Self {
            resolver: ScopeResolver::new(initial_scope, &name),
            name,
            blocks: vec![Vec::new()],
            isolated: true,
            next_auto: 0,
        }
    }

    /// Whether `If`/`While` blocks get their own child workspace (default true)
    pub fn isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }

    /// Whether `name` can be read at the current position
    pub fn is_visible(&self, name: &str) -> bool {
        self.resolver.is_visible(name)
    }

    fn push(&mut self, op: Operator) -> BuildResult<()> {
        self.blocks
            .last_mut()
            .ok_or_else(|| BuildError::InvalidNet("no open block".to_string()))?
            .push(op);
        Ok(())
    }

    fn auto_name(&mut self, op_type: &str) -> String {
        let name = format!("{}#{}", op_type.to_lowercase(), self.next_auto);
        self.next_auto += 1;
        name
    }

    /* ===================== Compute ===================== */

    pub fn op(&mut self, op_type: &str, inputs: &[&str], outputs: &[&str]) -> BuildResult<()> {
        self.op_with_args(op_type, inputs, outputs, Args::new())
    }

    pub fn op_with_args(
        &mut self,
        op_type: &str,
        inputs: &[&str],
        outputs: &[&str],
        args: Args,
    ) -> BuildResult<()> {
        let mut op = ComputeOp::new(
            op_type,
            inputs.iter().map(|s| s.to_string()).collect(),
            outputs.iter().map(|s| s.to_string()).collect(),
        );
        op.args = args;
        self.compute(op)
    }

    /// Add an already assembled compute operator
    pub fn compute(&mut self, op: ComputeOp) -> BuildResult<()> {
        for input in &op.inputs {
            self.resolver.read(input)?;
        }
        for output in &op.outputs {
            self.resolver.write(output);
        }
        self.push(Operator::Compute(op))
    }

    /// Single-output operator writing to a generated name, returned
    pub fn op_auto(&mut self, op_type: &str, inputs: &[&str]) -> BuildResult<String> {
        let out = self.auto_name(op_type);
        self.op(op_type, inputs, &[out.as_str()])?;
        Ok(out)
    }

    pub fn constant(&mut self, value: impl Into<Val>, out: &str) -> BuildResult<()> {
        self.compute(
            ComputeOp::new("ConstantFill", vec![], vec![out.to_string()]).with_arg("value", value),
        )
    }

    pub fn constant_auto(&mut self, value: impl Into<Val>) -> BuildResult<String> {
        let out = self.auto_name("const");
        self.constant(value, &out)?;
        Ok(out)
    }

    /* ===================== Blocks ===================== */

    fn block<F>(&mut self, label: &str, f: F) -> BuildResult<Net>
    where
        F: FnOnce(&mut Self) -> BuildResult<()>,
    {
        self.resolver.enter_block(label);
        self.blocks.push(Vec::new());
        f(self)?;
        let ops = self.pop_block()?;
        Ok(self.resolver.exit_block()?.into_net(label, ops))
    }

    fn pop_block(&mut self) -> BuildResult<Vec<Operator>> {
        if self.blocks.len() <= 1 {
            return Err(BuildError::InvalidNet("unbalanced block".to_string()));
        }
        self.blocks
            .pop()
            .ok_or_else(|| BuildError::InvalidNet("unbalanced block".to_string()))
    }

    pub fn if_then<T>(&mut self, cond: &str, then_fn: T) -> BuildResult<()>
    where
        T: FnOnce(&mut Self) -> BuildResult<()>,
    {
        self.resolver.read(cond)?;
        let then_net = self.block("then", then_fn)?;
        self.push(Operator::If {
            cond: cond.to_string(),
            then_net,
            else_net: None,
            isolated: self.isolated,
            scope: None,
        })
    }

    pub fn if_else<T, E>(&mut self, cond: &str, then_fn: T, else_fn: E) -> BuildResult<()>
    where
        T: FnOnce(&mut Self) -> BuildResult<()>,
        E: FnOnce(&mut Self) -> BuildResult<()>,
    {
        self.resolver.read(cond)?;
        let then_net = self.block("then", then_fn)?;
        let else_net = self.block("else", else_fn)?;
        self.push(Operator::If {
            cond: cond.to_string(),
            then_net,
            else_net: Some(else_net),
            isolated: self.isolated,
            scope: None,
        })
    }

    /// `cond_fn` builds the condition block and returns its boolean blob
    pub fn while_loop<C, B>(&mut self, cond_fn: C, body_fn: B) -> BuildResult<()>
    where
        C: FnOnce(&mut Self) -> BuildResult<String>,
        B: FnOnce(&mut Self) -> BuildResult<()>,
    {
        self.resolver.enter_block("cond");
        self.blocks.push(Vec::new());
        let cond = cond_fn(self)?;
        self.resolver.read(&cond)?;
        let cond_ops = self.pop_block()?;
        let cond_net = self.resolver.exit_block()?.into_net("cond", cond_ops);

        let body = self.block("body", body_fn)?;
        self.push(Operator::While {
            cond_net,
            cond,
            body,
            isolated: self.isolated,
            scope: None,
        })
    }

    /// Run `inner_fn`'s net in a fresh child workspace wired through `blob_map`
    pub fn do_block<F>(&mut self, blob_map: Vec<BlobBinding>, inner_fn: F) -> BuildResult<()>
    where
        F: FnOnce(&mut NetBuilder) -> BuildResult<()>,
    {
        super::check_bindings(&blob_map)?;
        let inner_inputs: Vec<&str> = blob_map
            .iter()
            .filter(|b| b.direction.is_input())
            .map(|b| b.inner.as_str())
            .collect();

        let mut inner = NetBuilder::with_scope("do", inner_inputs.as_slice()).isolated(self.isolated);
        inner_fn(&mut inner)?;
        for binding in blob_map.iter().filter(|b| b.direction.is_output()) {
            inner.resolver.read(&binding.inner)?;
        }
        let net = inner.build()?;

        for binding in blob_map.iter().filter(|b| b.direction.is_input()) {
            self.resolver.read(&binding.outer)?;
        }
        for binding in blob_map.iter().filter(|b| b.direction.is_output()) {
            self.resolver.write(&binding.outer);
        }
        self.push(Operator::Do {
            net,
            blob_map,
            scope: None,
        })
    }

    /* ===================== Scopes ===================== */

    pub fn create_scope(&mut self, output: &str) -> BuildResult<()> {
        self.resolver.write(output);
        self.push(Operator::CreateScope {
            output: output.to_string(),
        })
    }

    pub fn has_scope(&mut self, scope: &str, output: &str) -> BuildResult<()> {
        self.resolver.read(scope)?;
        self.resolver.write(output);
        self.push(Operator::HasScope {
            scope: scope.to_string(),
            output: output.to_string(),
        })
    }

    /// Close the net and return it annotated
    pub fn build(mut self) -> BuildResult<Net> {
        if self.blocks.len() != 1 {
            return Err(BuildError::InvalidNet(format!(
                "{} blocks still open",
                self.blocks.len() - 1
            )));
        }
        let ops = self.blocks.pop().unwrap_or_default();
        Ok(self.resolver.exit_block()?.into_net(self.name, ops))
    }
}

/// Build an `Args` map: `args! { "exponent" => 2.0 }`
#[macro_export]
macro_rules! args {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut args = $crate::types::Args::new();
        $(args.insert($key.to_string(), $crate::types::Val::from($value));)*
        args
    }};
}
