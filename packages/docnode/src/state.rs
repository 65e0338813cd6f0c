//! # Node State
//!
//! Typed, sparse per-node state. Each field of a node type is described by a
//! [`StateCodec`]: a decoder from raw JSON (which must produce the field's
//! default when given nothing) and an encoder back to JSON.
//!
//! Fields are named by a typed [`Field`] handle, so reads come back as the
//! codec's value type:
//!
//! ```rust,ignore
//! let value = Field::new("value", string(""));
//! let text = NodeDefinition::new("text").with_state(&value);
//!
//! doc.set(&id, &value, "hello".to_string())?;
//! assert_eq!(doc.get(&id, &value)?, "hello");
//! ```
//!
//! Custom accessor methods are extension traits over [`StateMut`], which only
//! applies to fields of one codec type:
//!
//! ```rust,ignore
//! trait Increment {
//!     fn increment(&mut self) -> DocResult<()>;
//! }
//!
//! impl Increment for StateMut<'_, NumberState> {
//!     fn increment(&mut self) -> DocResult<()> {
//!         self.update(|n| n + 1.0)
//!     }
//! }
//! ```

use crate::errors::{DocError, DocResult};
use crate::id_generator::NodeId;
use crate::Document;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// Decoder/encoder pair for one state field
pub trait StateCodec: 'static {
    type Value: Clone + PartialEq + fmt::Debug + 'static;

    /// Decode a raw JSON value. `None` must yield the default value.
    fn from_json(&self, json: Option<&Value>) -> Self::Value;

    /// Encode a value back to JSON
    fn to_json(&self, value: &Self::Value) -> serde_json::Result<Value>;
}

/// Type-erased state value stored in a node
pub trait StateValue: fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn clone_value(&self) -> Box<dyn StateValue>;
    fn eq_value(&self, other: &dyn StateValue) -> bool;
    fn value_type(&self) -> TypeId;
}

impl<T> StateValue for T
where
    T: Any + Clone + PartialEq + fmt::Debug,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_value(&self) -> Box<dyn StateValue> {
        Box::new(self.clone())
    }

    fn eq_value(&self, other: &dyn StateValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |other| self == other)
    }

    fn value_type(&self) -> TypeId {
        TypeId::of::<T>()
    }
}

impl Clone for Box<dyn StateValue> {
    fn clone(&self) -> Self {
        self.as_ref().clone_value()
    }
}

/// Codec with its value type erased; one per registered field
pub(crate) trait ErasedCodec {
    fn decode(&self, json: Option<&Value>) -> Box<dyn StateValue>;
    /// `None` if `value` is not this codec's value type
    fn encode(&self, value: &dyn StateValue) -> Option<serde_json::Result<Value>>;
    fn value_type(&self) -> TypeId;
}

impl<C: StateCodec> ErasedCodec for C {
    fn decode(&self, json: Option<&Value>) -> Box<dyn StateValue> {
        Box::new(self.from_json(json))
    }

    fn encode(&self, value: &dyn StateValue) -> Option<serde_json::Result<Value>> {
        let value = value.as_any().downcast_ref::<C::Value>()?;
        Some(self.to_json(value))
    }

    fn value_type(&self) -> TypeId {
        TypeId::of::<C::Value>()
    }
}

/// Typed name of a state field
pub struct Field<C: StateCodec> {
    name: String,
    codec: Rc<C>,
}

impl<C: StateCodec> Field<C> {
    pub fn new(name: impl Into<String>, codec: C) -> Self {
        Self {
            name: name.into(),
            codec: Rc::new(codec),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub(crate) fn erased(&self) -> Rc<dyn ErasedCodec> {
        self.codec.clone()
    }
}

impl<C: StateCodec> Clone for Field<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<C: StateCodec> fmt::Debug for Field<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field").field("name", &self.name).finish()
    }
}

// ── Built-in codecs ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StringState {
    default: String,
}

/// String field; non-string input decodes to `default`
pub fn string(default: impl Into<String>) -> StringState {
    StringState {
        default: default.into(),
    }
}

impl StateCodec for StringState {
    type Value = String;

    fn from_json(&self, json: Option<&Value>) -> String {
        match json {
            Some(Value::String(s)) => s.clone(),
            _ => self.default.clone(),
        }
    }

    fn to_json(&self, value: &String) -> serde_json::Result<Value> {
        Ok(Value::String(value.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct NumberState {
    default: f64,
}

/// Number field; non-numeric input decodes to `default`
pub fn number(default: f64) -> NumberState {
    NumberState { default }
}

impl StateCodec for NumberState {
    type Value = f64;

    fn from_json(&self, json: Option<&Value>) -> f64 {
        json.and_then(Value::as_f64).unwrap_or(self.default)
    }

    fn to_json(&self, value: &f64) -> serde_json::Result<Value> {
        // integral values encode without a fraction, like JSON numbers elsewhere
        if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
            return Ok(Value::from(*value as i64));
        }
        serde_json::to_value(value)
    }
}

#[derive(Debug, Clone)]
pub struct BooleanState {
    default: bool,
}

/// Boolean field, encoded compactly as `0` / `1`
pub fn boolean(default: bool) -> BooleanState {
    BooleanState { default }
}

impl StateCodec for BooleanState {
    type Value = bool;

    fn from_json(&self, json: Option<&Value>) -> bool {
        match json.and_then(Value::as_u64) {
            Some(0) => false,
            Some(1) => true,
            _ => self.default,
        }
    }

    fn to_json(&self, value: &bool) -> serde_json::Result<Value> {
        Ok(Value::from(u8::from(*value)))
    }
}

/// Field holding any serde type; undecodable input yields `T::default()`
pub struct JsonState<T> {
    _marker: PhantomData<fn() -> T>,
}

pub fn json<T>() -> JsonState<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + PartialEq + fmt::Debug + 'static,
{
    JsonState {
        _marker: PhantomData,
    }
}

impl<T> StateCodec for JsonState<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + PartialEq + fmt::Debug + 'static,
{
    type Value = T;

    fn from_json(&self, json: Option<&Value>) -> T {
        json.and_then(|json| T::deserialize(json).ok())
            .unwrap_or_default()
    }

    fn to_json(&self, value: &T) -> serde_json::Result<Value> {
        serde_json::to_value(value)
    }
}

/// Closure-backed codec, see [`define_state`] and [`define_state_with`]
pub struct CustomState<V, D, E> {
    decode: D,
    encode: E,
    _marker: PhantomData<fn() -> V>,
}

type SerdeEncode<V> = fn(&V) -> serde_json::Result<Value>;

fn serde_encode<V: Serialize>(value: &V) -> serde_json::Result<Value> {
    serde_json::to_value(value)
}

/// Define a field whose values are already natural JSON (serde-encodable).
pub fn define_state<V, D>(from_json: D) -> CustomState<V, D, SerdeEncode<V>>
where
    V: Serialize + Clone + PartialEq + fmt::Debug + 'static,
    D: Fn(Option<&Value>) -> V + 'static,
{
    CustomState {
        decode: from_json,
        encode: serde_encode::<V>,
        _marker: PhantomData,
    }
}

/// Define a field with an explicit encoder, for values that are not JSON.
pub fn define_state_with<V, D, E>(from_json: D, to_json: E) -> CustomState<V, D, E>
where
    V: Clone + PartialEq + fmt::Debug + 'static,
    D: Fn(Option<&Value>) -> V + 'static,
    E: Fn(&V) -> serde_json::Result<Value> + 'static,
{
    CustomState {
        decode: from_json,
        encode: to_json,
        _marker: PhantomData,
    }
}

impl<V, D, E> StateCodec for CustomState<V, D, E>
where
    V: Clone + PartialEq + fmt::Debug + 'static,
    D: Fn(Option<&Value>) -> V + 'static,
    E: Fn(&V) -> serde_json::Result<Value> + 'static,
{
    type Value = V;

    fn from_json(&self, json: Option<&Value>) -> V {
        (self.decode)(json)
    }

    fn to_json(&self, value: &V) -> serde_json::Result<Value> {
        (self.encode)(value)
    }
}

// ── Accessors ──────────────────────────────────────────────────────────────

/// Read accessor for one field of one node, from [`Document::state`].
pub struct State<'a, C: StateCodec> {
    doc: &'a Document,
    id: NodeId,
    field: &'a Field<C>,
}

impl<'a, C: StateCodec> State<'a, C> {
    pub(crate) fn new(doc: &'a Document, id: NodeId, field: &'a Field<C>) -> Self {
        Self { doc, id, field }
    }

    pub fn get(&self) -> DocResult<&'a C::Value> {
        self.doc.get(&self.id, self.field)
    }

    pub fn get_prev(&self) -> DocResult<(bool, C::Value)> {
        self.doc.get_prev(&self.id, self.field)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }
}

/// Mutable accessor for one field of one node.
///
/// Obtained from [`Document::state_mut`]. Extension traits implemented for
/// `StateMut<'_, MyCodec>` add custom methods to fields of that codec.
pub struct StateMut<'a, C: StateCodec> {
    doc: &'a mut Document,
    id: NodeId,
    field: &'a Field<C>,
}

impl<'a, C: StateCodec> StateMut<'a, C> {
    pub(crate) fn new(doc: &'a mut Document, id: NodeId, field: &'a Field<C>) -> Self {
        Self { doc, id, field }
    }

    pub fn get(&self) -> DocResult<&C::Value> {
        self.doc.get(&self.id, self.field)
    }

    /// Value at the start of the transaction, see [`Document::get_prev`]
    pub fn get_prev(&self) -> DocResult<(bool, C::Value)> {
        self.doc.get_prev(&self.id, self.field)
    }

    pub fn set(&mut self, value: C::Value) -> DocResult<()> {
        self.doc.set(&self.id, self.field, value)
    }

    pub fn update(&mut self, f: impl FnOnce(&C::Value) -> C::Value) -> DocResult<()> {
        self.doc.update(&self.id, self.field, f)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn document(&mut self) -> &mut Document {
        self.doc
    }
}

pub(crate) fn type_mismatch(node_type: &str, field: &str) -> DocError {
    DocError::StateTypeMismatch {
        node_type: node_type.to_string(),
        field: field.to_string(),
    }
}
