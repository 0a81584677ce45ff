//! Dynamic request inputs and parameter preparation.
//!
//! A [`Request`] is the dynamic input handed to the engine by the host: a
//! bag of named fields. Address, write value and device key are configured
//! as expressions over those fields and resolved per invocation through the
//! [`Evaluate`] capability, so the same engine instance can target a
//! different address or host for every request.
//!
//! [`ParamBuilder::build`] turns one request into a validated
//! [`RequestParams`]. It has no side effects and never touches the network;
//! any failure is a [`PreparationError`] and the operation is dropped before
//! an attempt is made.

use crate::error::{EvalError, PreparationError};
use crate::protocol::Operation;
use crate::transport::DeviceKey;
use std::collections::HashMap;
use std::sync::Arc;

/// A scalar-or-sequence value produced by expression evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Value>),
}

impl Value {
    /// A register/coil address: an integer within `0..=65535`.
    pub fn as_address(&self) -> Option<u16> {
        match self {
            Value::Int(n) => u16::try_from(*n).ok(),
            _ => None,
        }
    }

    /// A single coil state. Integers are accepted with the usual non-zero
    /// meaning, so expressions like `1` work for coil writes.
    pub fn as_coil(&self) -> Option<bool> {
        match self {
            Value::Bool(state) => Some(*state),
            Value::Int(n) => Some(*n != 0),
            _ => None,
        }
    }

    /// A single register word.
    pub fn as_register(&self) -> Option<u16> {
        match self {
            Value::Int(n) => u16::try_from(*n).ok(),
            _ => None,
        }
    }

    fn as_coil_seq(&self) -> Option<Vec<bool>> {
        match self {
            Value::Seq(values) => values.iter().map(Value::as_coil).collect(),
            _ => None,
        }
    }

    fn as_register_seq(&self) -> Option<Vec<u16>> {
        match self {
            Value::Seq(values) => values.iter().map(Value::as_register).collect(),
            _ => None,
        }
    }

    fn from_evalexpr(value: evalexpr::Value) -> Option<Self> {
        match value {
            evalexpr::Value::Boolean(state) => Some(Value::Bool(state)),
            evalexpr::Value::Int(n) => Some(Value::Int(n)),
            evalexpr::Value::Float(x) => Some(Value::Float(x)),
            evalexpr::Value::String(s) => Some(Value::Str(s)),
            evalexpr::Value::Tuple(values) => values
                .into_iter()
                .map(Value::from_evalexpr)
                .collect::<Option<Vec<_>>>()
                .map(Value::Seq),
            evalexpr::Value::Empty => None,
        }
    }

    fn to_evalexpr(&self) -> evalexpr::Value {
        match self {
            Value::Bool(state) => evalexpr::Value::Boolean(*state),
            Value::Int(n) => evalexpr::Value::Int(*n),
            Value::Float(x) => evalexpr::Value::Float(*x),
            Value::Str(s) => evalexpr::Value::String(s.clone()),
            Value::Seq(values) => {
                evalexpr::Value::Tuple(values.iter().map(Value::to_evalexpr).collect())
            }
        }
    }
}

/// One logical request from the input source: named fields that address,
/// value and device expressions may refer to.
#[derive(Debug, Clone, Default)]
pub struct Request {
    fields: HashMap<String, Value>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

/// Evaluates an expression against a request.
///
/// Implementations must be side-effect-free; the engine may evaluate the
/// same expression any number of times with different requests.
pub trait Evaluate: Send + Sync {
    fn evaluate(&self, expr: &str, request: &Request) -> Result<Value, EvalError>;
}

/// The default evaluator, backed by the `evalexpr` crate. Request fields are
/// exposed as variables, so `"base + 2"` resolves against a request carrying
/// a `base` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprEvaluator;

impl Evaluate for ExprEvaluator {
    fn evaluate(&self, expr: &str, request: &Request) -> Result<Value, EvalError> {
        use evalexpr::ContextWithMutableVariables;

        let mut context = evalexpr::HashMapContext::new();
        for (name, value) in request.fields() {
            context
                .set_value(name.clone(), value.to_evalexpr())
                .map_err(|err| EvalError(err.to_string()))?;
        }
        let value = evalexpr::eval_with_context(expr, &context)
            .map_err(|err| EvalError(err.to_string()))?;
        Value::from_evalexpr(value)
            .ok_or_else(|| EvalError(format!("expression '{expr}' produced no value")))
    }
}

/// The value attached to a write operation. Single and multiple writes carry
/// distinct shapes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(rename_all = "snake_case"))]
pub enum WriteValue {
    Coil(bool),
    Coils(Vec<bool>),
    Register(u16),
    Registers(Vec<u16>),
}

/// The validated wire-level parameters for one operation, built fresh per
/// invocation. Only the fields the operation requires are populated.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RequestParams {
    pub device: DeviceKey,
    pub address: u16,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub count: Option<u16>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub value: Option<WriteValue>,
}

/// Prepares [`RequestParams`] for a fixed operation from per-request input.
pub struct ParamBuilder {
    operation: Operation,
    device: DeviceKey,
    device_expr: Option<String>,
    address_expr: String,
    value_expr: Option<String>,
    count: Option<u16>,
    evaluator: Arc<dyn Evaluate>,
}

impl ParamBuilder {
    /// Starting address defaults to `"0"`, matching the usual configuration
    /// default for this kind of block.
    pub fn new(operation: Operation, device: DeviceKey, evaluator: Arc<dyn Evaluate>) -> Self {
        Self {
            operation,
            device,
            device_expr: None,
            address_expr: String::from("0"),
            value_expr: None,
            count: None,
            evaluator,
        }
    }

    /// The expression yielding the starting address.
    pub fn address_expr(mut self, expr: impl Into<String>) -> Self {
        self.address_expr = expr.into();
        self
    }

    /// The expression yielding the write value. Ignored by reads.
    pub fn value_expr(mut self, expr: impl Into<String>) -> Self {
        self.value_expr = Some(expr.into());
        self
    }

    /// The number of coils/registers to read. Ignored by writes; reads
    /// without a count read a single coil/register on the wire.
    pub fn count(mut self, count: u16) -> Self {
        self.count = Some(count);
        self
    }

    /// An expression yielding the device key per request. When absent the
    /// static device key is used for every request.
    pub fn device_expr(mut self, expr: impl Into<String>) -> Self {
        self.device_expr = Some(expr.into());
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Builds the parameter set for one request.
    pub fn build(&self, request: &Request) -> Result<RequestParams, PreparationError> {
        let device = self.resolve_device(request)?;
        let address = self.resolve_address(request)?;

        let count = if self.operation.requires_count() {
            match self.count {
                Some(0) => return Err(PreparationError::InvalidCount(0)),
                other => other,
            }
        } else {
            None
        };

        let value = if self.operation.requires_value() {
            Some(self.resolve_value(request)?)
        } else {
            None
        };

        Ok(RequestParams {
            device,
            address,
            count,
            value,
        })
    }

    fn resolve_device(&self, request: &Request) -> Result<DeviceKey, PreparationError> {
        let Some(expr) = &self.device_expr else {
            return Ok(self.device.clone());
        };
        match self.evaluator.evaluate(expr, request) {
            Ok(Value::Str(key)) if !key.is_empty() => Ok(DeviceKey::from(key)),
            Ok(other) => Err(PreparationError::InvalidDevice(format!(
                "expected a non-empty string, got {other:?}"
            ))),
            Err(err) => Err(PreparationError::InvalidDevice(err.to_string())),
        }
    }

    fn resolve_address(&self, request: &Request) -> Result<u16, PreparationError> {
        let value = self
            .evaluator
            .evaluate(&self.address_expr, request)
            .map_err(|err| PreparationError::InvalidAddress(err.to_string()))?;
        value
            .as_address()
            .ok_or_else(|| PreparationError::InvalidAddress(format!("got {value:?}")))
    }

    fn resolve_value(&self, request: &Request) -> Result<WriteValue, PreparationError> {
        let Some(expr) = &self.value_expr else {
            return Err(PreparationError::InvalidValue(String::from(
                "no value expression configured",
            )));
        };
        let value = self
            .evaluator
            .evaluate(expr, request)
            .map_err(|err| PreparationError::InvalidValue(err.to_string()))?;
        let mismatch = || {
            PreparationError::InvalidValue(format!(
                "operation {} cannot take {value:?}",
                self.operation
            ))
        };
        match self.operation {
            Operation::WriteSingleCoil => value.as_coil().map(WriteValue::Coil).ok_or_else(mismatch),
            Operation::WriteMultipleCoils => value
                .as_coil_seq()
                .map(WriteValue::Coils)
                .ok_or_else(mismatch),
            Operation::WriteSingleRegister => value
                .as_register()
                .map(WriteValue::Register)
                .ok_or_else(mismatch),
            Operation::WriteMultipleRegisters => value
                .as_register_seq()
                .map(WriteValue::Registers)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        }
    }
}
