//! Configuration Surface
//!
//! Every tunable component exposes a [`ParamSet`]: an ordered list of named,
//! trait-tagged parameters. A parameter couples a typed [`Value`] with an
//! optional validator (range, saturation, whitelist or name mapping) and an
//! optional update trigger.
//!
//! Two orthogonal tags drive the lifecycle:
//!
//! - [`Access`]: who may write. `Configurable` parameters freeze when the
//!   set is locked, `Settable` parameters stay writable, `Locked` parameters
//!   are never writable through the configuration surface.
//! - [`Policy`]: when the trigger applies. `Immediate` on every successful
//!   set, `Callable` only while the owning set is locked (run-time controls
//!   such as `running`), `Locked` never.
//!
//! Locking a set is the commit point: a pipeline refuses to run until its
//! parameters are locked. Triggers capture `Arc` handles to component state,
//! never the component itself, so owning structs stay movable after triggers
//! are installed.
//!
//! Sets serialise to a flat JSON object (`name` → value) for persistence.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::{Fault, Result};

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f32),
    Str(String),
    IntList(Vec<i64>),
    FloatList(Vec<f32>),
}

impl Value {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::IntList(_) => "int-list",
            Self::FloatList(_) => "float-list",
        }
    }

    fn same_kind(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}
impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Who may write a parameter, relative to the lock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    /// Writable until the set is locked.
    #[default]
    Configurable,
    /// Writable at any time.
    Settable,
    /// Never writable through the configuration surface.
    Locked,
}

/// When a parameter's update trigger runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Trigger on every successful set.
    #[default]
    Immediate,
    /// Trigger only while the owning set is locked.
    Callable,
    /// Trigger never runs.
    Locked,
}

/// Acceptance rule applied before a value is stored.
#[derive(Debug, Clone)]
pub enum Validator {
    /// Reject numeric values outside `[min, max]`.
    Range { min: f64, max: f64 },
    /// Clamp numeric values into `[min, max]`.
    Saturating { min: f64, max: f64 },
    /// Accept only listed strings.
    WhiteList(Vec<String>),
    /// Accept listed names, remapping the stored value to the mapped
    /// integer.
    Mapping(FxHashMap<String, i64>),
}

type Trigger = Box<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// One named, trait-tagged parameter.
pub struct Parameter {
    name: String,
    description: String,
    access: Access,
    policy: Policy,
    value: Value,
    validator: Option<Validator>,
    trigger: Option<Trigger>,
}

impl std::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("access", &self.access)
            .field("policy", &self.policy)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl Parameter {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            access: Access::default(),
            policy: Policy::default(),
            value: value.into(),
            validator: None,
            trigger: None,
        }
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub const fn settable(mut self) -> Self {
        self.access = Access::Settable;
        self
    }

    #[must_use]
    pub const fn configurable(mut self) -> Self {
        self.access = Access::Configurable;
        self
    }

    #[must_use]
    pub const fn immutable(mut self) -> Self {
        self.access = Access::Locked;
        self
    }

    #[must_use]
    pub const fn immediate(mut self) -> Self {
        self.policy = Policy::Immediate;
        self
    }

    #[must_use]
    pub const fn callable(mut self) -> Self {
        self.policy = Policy::Callable;
        self
    }

    #[must_use]
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.validator = Some(Validator::Range { min, max });
        self
    }

    #[must_use]
    pub fn saturating(mut self, min: f64, max: f64) -> Self {
        self.validator = Some(Validator::Saturating { min, max });
        self
    }

    #[must_use]
    pub fn whitelist<S: Into<String>>(mut self, entries: impl IntoIterator<Item = S>) -> Self {
        self.validator = Some(Validator::WhiteList(
            entries.into_iter().map(Into::into).collect(),
        ));
        self
    }

    #[must_use]
    pub fn mapping<S: Into<String>>(mut self, entries: impl IntoIterator<Item = (S, i64)>) -> Self {
        self.validator = Some(Validator::Mapping(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ));
        self
    }

    /// Installs the update trigger. Triggers must capture shared state
    /// handles (`Arc`), never the owning component.
    #[must_use]
    pub fn on_update(mut self, trigger: impl Fn(&Value) -> Result<()> + Send + Sync + 'static) -> Self {
        self.trigger = Some(Box::new(trigger));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    fn validate(&self, value: Value) -> Result<Value> {
        let Some(validator) = &self.validator else {
            return Ok(value);
        };
        match validator {
            Validator::Range { min, max } => {
                let v = numeric(&value).ok_or(Fault::TypeMismatch)?;
                if v < *min || v > *max {
                    return Err(Fault::InvalidRange);
                }
                Ok(value)
            }
            Validator::Saturating { min, max } => Ok(saturate(value, *min, *max)),
            Validator::WhiteList(entries) => {
                let name = value.as_str().ok_or(Fault::TypeMismatch)?;
                if entries.iter().any(|e| e == name) {
                    Ok(value)
                } else {
                    Err(Fault::InvalidValue)
                }
            }
            Validator::Mapping(entries) => {
                let name = value.as_str().ok_or(Fault::TypeMismatch)?;
                if entries.contains_key(name) {
                    Ok(value)
                } else {
                    Err(Fault::InvalidValue)
                }
            }
        }
    }

    /// Integer a mapped name resolves to, if this parameter is a mapping.
    #[must_use]
    pub fn mapped(&self) -> Option<i64> {
        match (&self.validator, &self.value) {
            (Some(Validator::Mapping(entries)), Value::Str(name)) => {
                entries.get(name).copied()
            }
            _ => None,
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(f64::from(*v)),
        _ => None,
    }
}

fn saturate(value: Value, min: f64, max: f64) -> Value {
    match value {
        Value::Int(v) => Value::Int((v as f64).clamp(min, max) as i64),
        Value::Float(v) => Value::Float(f64::from(v).clamp(min, max) as f32),
        Value::IntList(v) => Value::IntList(
            v.into_iter()
                .map(|x| (x as f64).clamp(min, max) as i64)
                .collect(),
        ),
        Value::FloatList(v) => Value::FloatList(
            v.into_iter()
                .map(|x| f64::from(x).clamp(min, max) as f32)
                .collect(),
        ),
        other => other,
    }
}

/// An ordered, lockable set of parameters owned by one component.
#[derive(Debug, Default)]
pub struct ParamSet {
    name: String,
    locked: bool,
    params: Vec<Parameter>,
}

impl ParamSet {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locked: false,
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn locked(&self) -> bool {
        self.locked
    }

    /// Adds a parameter; the name must be unique within the set.
    pub fn expose(&mut self, parameter: Parameter) -> Result<()> {
        if self.find(parameter.name()).is_some() {
            return Err(Fault::InvalidRequest);
        }
        self.params.push(parameter);
        Ok(())
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Current value of a parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.find(name).map(Parameter::value)
    }

    /// Ordered parameter listing.
    #[must_use]
    pub fn list(&self) -> &[Parameter] {
        &self.params
    }

    /// Appends an entry to a whitelist parameter (engine registries grow
    /// their selection whitelist this way).
    pub fn allow(&mut self, name: &str, entry: impl Into<String>) -> Result<()> {
        let param = self
            .params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or(Fault::NotExisting)?;
        match &mut param.validator {
            Some(Validator::WhiteList(entries)) => {
                entries.push(entry.into());
                Ok(())
            }
            _ => Err(Fault::TypeMismatch),
        }
    }

    /// Validates and stores a new value, then runs the trigger when the
    /// policy allows.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let locked = self.locked;
        let param = self
            .params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or(Fault::NotExisting)?;

        match param.access {
            Access::Settable => {}
            Access::Configurable if !locked => {}
            Access::Configurable => return Err(Fault::InvalidRequest),
            Access::Locked => return Err(Fault::InvalidRequest),
        }

        let value = value.into();
        if !param.value.same_kind(&value) {
            return Err(Fault::TypeMismatch);
        }
        let value = param.validate(value)?;
        param.value = value;

        let run_trigger = match param.policy {
            Policy::Immediate => true,
            Policy::Callable => locked,
            Policy::Locked => false,
        };
        if run_trigger {
            if let Some(trigger) = &param.trigger {
                trigger(&param.value)?;
            }
        }
        Ok(())
    }

    /// Commits the configuration: Configurable parameters freeze and
    /// Callable triggers arm.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Flat `name` → value JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for p in &self.params {
            if let Ok(v) = serde_json::to_value(&p.value) {
                map.insert(p.name.clone(), v);
            }
        }
        serde_json::Value::Object(map)
    }

    /// Applies a previously persisted JSON object through [`ParamSet::set`].
    pub fn apply_json(&mut self, json: &serde_json::Value) -> Result<()> {
        let map = json.as_object().ok_or(Fault::TypeMismatch)?;
        for (name, raw) in map {
            let current = self.get(name).ok_or(Fault::NotExisting)?;
            let value: Value = match current {
                Value::Bool(_) => Value::Bool(raw.as_bool().ok_or(Fault::TypeMismatch)?),
                Value::Int(_) => Value::Int(raw.as_i64().ok_or(Fault::TypeMismatch)?),
                Value::Float(_) => Value::Float(raw.as_f64().ok_or(Fault::TypeMismatch)? as f32),
                Value::Str(_) => Value::Str(raw.as_str().ok_or(Fault::TypeMismatch)?.to_owned()),
                Value::IntList(_) | Value::FloatList(_) => {
                    serde_json::from_value(raw.clone()).map_err(|_| Fault::TypeMismatch)?
                }
            };
            self.set(name, value)?;
        }
        Ok(())
    }
}
