//! Method registry for dispatching invocations by name.
//!
//! Each method is described by its ordered parameter types and a thunk that
//! receives already-decoded arguments. Names are matched case-insensitively.
//!
//! # Example
//!
//! ```ignore
//! use hubwire_hub::{MethodRegistry, MethodReturn, ParamType};
//! use hubwire_protocol::ValueKind;
//!
//! let mut registry = MethodRegistry::new();
//! registry.register("SimpleInt", vec![ParamType::Value(ValueKind::I64)], |args| {
//!     let value: i64 = args.get(0)?;
//!     MethodReturn::value(&(value + 1))
//! });
//! ```

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use hubwire_protocol::ValueKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Error type returned by method bodies.
pub type MethodError = Box<dyn StdError + Send + Sync>;

/// Result type for method thunks.
pub type MethodResult = Result<MethodReturn, MethodError>;

pub(crate) type Thunk = dyn Fn(HubArgs) -> MethodResult + Send + Sync;

/// The semantic type of one method parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// Decoded from the next positional argument.
    Value(ValueKind),
    /// Bound to the next announced stream id; items arrive through a channel.
    Upstream(ValueKind),
}

impl ParamType {
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}

/// What a method produced.
pub enum MethodReturn {
    /// Nothing; the completion carries no result.
    Unit,
    /// A single result value.
    Value(Value),
    /// Several results, sent as one JSON array.
    Values(Vec<Value>),
    /// A result that arrives later. Dropping the sender without a value fails the invocation.
    Pending(oneshot::Receiver<Value>),
    /// Items streamed to the caller, followed by a completion when the channel closes.
    Stream(mpsc::Receiver<Value>),
}

impl MethodReturn {
    /// Serialize a single result value.
    pub fn value<T: Serialize + ?Sized>(value: &T) -> MethodResult {
        Ok(Self::Value(serde_json::to_value(value)?))
    }
}

impl std::fmt::Debug for MethodReturn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unit => f.write_str("Unit"),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Values(v) => f.debug_tuple("Values").field(v).finish(),
            Self::Pending(_) => f.write_str("Pending"),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

enum HubArg {
    Value(Value),
    Upstream(Option<mpsc::Receiver<Value>>),
}

/// Bound arguments handed to a method thunk, in parameter order.
pub struct HubArgs {
    args: Vec<HubArg>,
}

impl HubArgs {
    pub(crate) fn new() -> Self {
        Self { args: Vec::new() }
    }

    pub(crate) fn push_value(&mut self, value: Value) {
        self.args.push(HubArg::Value(value));
    }

    pub(crate) fn push_upstream(&mut self, receiver: mpsc::Receiver<Value>) {
        self.args.push(HubArg::Upstream(Some(receiver)));
    }

    /// Decode the value parameter at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, MethodError> {
        match self.args.get(index) {
            Some(HubArg::Value(value)) => Ok(T::deserialize(value)?),
            Some(HubArg::Upstream(_)) => {
                Err(format!("parameter {index} is a stream, not a value").into())
            }
            None => Err(format!("no parameter at index {index}").into()),
        }
    }

    /// The raw JSON value of the value parameter at `index`.
    pub fn value(&self, index: usize) -> Option<&Value> {
        match self.args.get(index) {
            Some(HubArg::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Take the channel bound to the streaming parameter at `index`.
    ///
    /// Each upstream can be taken once.
    pub fn upstream(&mut self, index: usize) -> Result<mpsc::Receiver<Value>, MethodError> {
        match self.args.get_mut(index) {
            Some(HubArg::Upstream(slot)) => slot
                .take()
                .ok_or_else(|| format!("stream parameter {index} already taken").into()),
            Some(HubArg::Value(_)) => {
                Err(format!("parameter {index} is a value, not a stream").into())
            }
            None => Err(format!("no parameter at index {index}").into()),
        }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// A registered method.
#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    params: Vec<ParamType>,
    invoke: Arc<Thunk>,
}

impl MethodDescriptor {
    /// Name as registered (original casing).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    pub fn value_param_count(&self) -> usize {
        self.params.iter().filter(|p| !p.is_upstream()).count()
    }

    pub fn upstream_param_count(&self) -> usize {
        self.params.iter().filter(|p| p.is_upstream()).count()
    }

    pub(crate) fn thunk(&self) -> Arc<Thunk> {
        Arc::clone(&self.invoke)
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Registry mapping method names to descriptors.
#[derive(Debug, Default, Clone)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodDescriptor>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method. A later registration under the same name (ignoring case) replaces it.
    ///
    /// The body runs on tokio's blocking pool, so it may block briefly and may
    /// spawn tasks. Work that waits a long time should return
    /// [`MethodReturn::Pending`] or [`MethodReturn::Stream`] instead of holding
    /// a blocking thread.
    pub fn register<F>(&mut self, name: &str, params: Vec<ParamType>, method: F) -> &mut Self
    where
        F: Fn(HubArgs) -> MethodResult + Send + Sync + 'static,
    {
        let descriptor = MethodDescriptor {
            name: name.to_string(),
            params,
            invoke: Arc::new(method),
        };
        if self
            .methods
            .insert(name.to_lowercase(), descriptor)
            .is_some()
        {
            tracing::warn!(method = %name, "method registered twice; keeping the latest");
        }
        self
    }

    /// Find a method by name, ignoring case.
    pub fn lookup(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(&name.to_lowercase())
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.values().map(|m| m.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
