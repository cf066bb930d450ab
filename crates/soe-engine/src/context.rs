//! Per-execution context store.
//!
//! Context maps field names to **history lists**: every write appends, the
//! last element is the field's current value, and the full list is its
//! accumulated value. Two names are reserved: `__operational__` (engine
//! counters and signal history) and `__parent__` (child-to-parent link).
//!
//! The wire shape persisted through [`ContextBackend`](crate::traits::ContextBackend)
//! is a flat JSON object — plain fields as arrays, the reserved namespaces
//! as nested objects.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::errors::ContextError;
use crate::types::{OPERATIONAL_KEY, PARENT_KEY, RESERVED_PREFIX};

// ---------------------------------------------------------------------------
// Operational state
// ---------------------------------------------------------------------------

/// Engine-managed operational namespace: signal history and counters.
///
/// Workflows may read it through templates
/// (`{{ context.__operational__.llm_calls }}`); writes from workflows are
/// ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalState {
    /// Every signal dispatched so far, in dispatch order.
    pub signals: Vec<String>,
    /// Node name → completed activation count.
    pub nodes: BTreeMap<String, u64>,
    pub llm_calls: u64,
    pub tool_calls: u64,
    pub errors: u64,
    pub main_execution_id: String,
}

impl OperationalState {
    pub fn new(main_execution_id: impl Into<String>) -> Self {
        Self {
            signals: Vec::new(),
            nodes: BTreeMap::new(),
            llm_calls: 0,
            tool_calls: 0,
            errors: 0,
            main_execution_id: main_execution_id.into(),
        }
    }
}

/// Link from a child execution back to its parent (`__parent__`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentLink {
    pub parent_execution_id: String,
    pub main_execution_id: String,
    #[serde(default)]
    pub signals_to_parent: Vec<String>,
    #[serde(default)]
    pub context_updates_to_parent: Vec<String>,
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Typed, history-preserving key/value state for one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    fields: BTreeMap<String, Vec<Value>>,
    operational: OperationalState,
    parent: Option<ParentLink>,
}

impl ExecutionContext {
    /// Fresh root context: `main_execution_id` equals the execution id.
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            fields: BTreeMap::new(),
            operational: OperationalState::new(execution_id),
            parent: None,
        }
    }

    /// Child context: each seed entry becomes a one-element history, the
    /// parent link is attached, and `main_execution_id` is inherited.
    pub fn new_child(seed: BTreeMap<String, Value>, parent: ParentLink) -> Self {
        let fields = seed.into_iter().map(|(k, v)| (k, vec![v])).collect();
        Self {
            fields,
            operational: OperationalState::new(parent.main_execution_id.clone()),
            parent: Some(parent),
        }
    }

    /// Fresh context seeded from an initial-context map. Reserved names are
    /// rejected — the public API never writes engine namespaces.
    pub fn from_initial(
        execution_id: &str,
        initial: BTreeMap<String, Value>,
    ) -> Result<Self, ContextError> {
        let mut ctx = Self::new(execution_id);
        for (name, value) in initial {
            ctx.set_field(&name, value)?;
        }
        Ok(ctx)
    }

    /// Copy of this context with the engine namespaces stripped, ready for
    /// context inheritance into a new execution.
    pub fn inheritable_copy(&self) -> BTreeMap<String, Vec<Value>> {
        self.fields.clone()
    }

    /// Rebuild a context from inherited histories plus a fresh operational
    /// state for `execution_id`, then append initial entries.
    pub fn from_inherited(
        execution_id: &str,
        histories: BTreeMap<String, Vec<Value>>,
        initial: BTreeMap<String, Value>,
    ) -> Result<Self, ContextError> {
        let mut ctx = Self {
            fields: histories,
            operational: OperationalState::new(execution_id),
            parent: None,
        };
        for (name, value) in initial {
            ctx.set_field(&name, value)?;
        }
        Ok(ctx)
    }

    /// Latest value of a field, if present.
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).and_then(|h| h.last())
    }

    /// Full history of a field (empty if absent).
    ///
    /// A history holding exactly one element that is itself a list returns
    /// that inner list — the convention that lets initial context seed a
    /// fan-out field with a plain list.
    pub fn get_accumulated(&self, name: &str) -> Vec<Value> {
        match self.fields.get(name) {
            None => Vec::new(),
            Some(history) => match history.as_slice() {
                [Value::Array(inner)] => inner.clone(),
                other => other.to_vec(),
            },
        }
    }

    /// Raw history list of a field, without the single-list flattening.
    pub fn get_history(&self, name: &str) -> Option<&[Value]> {
        self.fields.get(name).map(|h| h.as_slice())
    }

    /// Append a value to a field's history, creating it on first write.
    /// Reserved names are rejected.
    pub fn set_field(&mut self, name: &str, value: Value) -> Result<(), ContextError> {
        if name.starts_with(RESERVED_PREFIX) {
            return Err(ContextError::ReservedField { name: name.into() });
        }
        self.fields.entry(name.to_string()).or_default().push(value);
        Ok(())
    }

    /// Names of all plain (non-reserved) fields.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Plain fields with their raw histories.
    pub fn fields(&self) -> &BTreeMap<String, Vec<Value>> {
        &self.fields
    }

    pub fn operational(&self) -> &OperationalState {
        &self.operational
    }

    pub(crate) fn operational_mut(&mut self) -> &mut OperationalState {
        &mut self.operational
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub fn main_execution_id(&self) -> &str {
        &self.operational.main_execution_id
    }

    /// The operational namespace as a JSON value, for template views and
    /// the `soe_get_context` built-in.
    pub fn operational_value(&self) -> Value {
        serde_json::to_value(&self.operational).unwrap_or(Value::Null)
    }

    /// Read-only view for templating: current value per field, with the
    /// reserved namespaces included verbatim.
    pub fn unwrapped_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, history) in &self.fields {
            if let Some(last) = history.last() {
                map.insert(name.clone(), last.clone());
            }
        }
        map.insert(OPERATIONAL_KEY.into(), self.operational_value());
        if let Some(parent) = &self.parent {
            map.insert(
                PARENT_KEY.into(),
                serde_json::to_value(parent).unwrap_or(Value::Null),
            );
        }
        Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// Wire (de)serialization
// ---------------------------------------------------------------------------

impl Serialize for ExecutionContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = 1 + usize::from(self.parent.is_some());
        let mut map = serializer.serialize_map(Some(self.fields.len() + extra))?;
        for (name, history) in &self.fields {
            map.serialize_entry(name, history)?;
        }
        map.serialize_entry(OPERATIONAL_KEY, &self.operational)?;
        if let Some(parent) = &self.parent {
            map.serialize_entry(PARENT_KEY, parent)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ExecutionContext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut raw = BTreeMap::<String, Value>::deserialize(deserializer)?;

        let operational = match raw.remove(OPERATIONAL_KEY) {
            Some(v) => serde_json::from_value(v).map_err(D::Error::custom)?,
            None => return Err(D::Error::custom("context missing __operational__")),
        };
        let parent = match raw.remove(PARENT_KEY) {
            Some(v) => Some(serde_json::from_value(v).map_err(D::Error::custom)?),
            None => None,
        };

        let mut fields = BTreeMap::new();
        for (name, value) in raw {
            let history = match value {
                Value::Array(items) => items,
                other => vec![other],
            };
            fields.insert(name, history);
        }

        Ok(Self {
            fields,
            operational,
            parent,
        })
    }
}
