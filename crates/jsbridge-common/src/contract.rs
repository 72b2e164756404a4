//! Interface contracts.
//!
//! A contract is the declared, ordered set of method signatures a proxy
//! exposes. Both proxy directions are generated from one, and the same
//! signatures drive the argument and return type checks made at call time.
//!
//! Contracts can be built in code or deserialized from JSON:
//!
//! ```json
//! {
//!   "name": "Calculator",
//!   "methods": [
//!     { "name": "calcSum", "params": ["i32", "i32"], "returns": "i32" }
//!   ]
//! }
//! ```

use crate::error::{BridgeError, Result};
use crate::types::ValueType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Signature of a single contract method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ValueType>,
    #[serde(default = "void")]
    pub returns: ValueType,
}

fn void() -> ValueType {
    ValueType::Void
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, params: Vec<ValueType>, returns: ValueType) -> Self {
        Self {
            name: name.into(),
            params,
            returns,
        }
    }

    /// Number of arguments a call must supply. Arity is exact.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Checks an argument count against the declared arity.
    pub fn check_arity(&self, supplied: usize) -> Result<()> {
        if supplied != self.params.len() {
            return Err(BridgeError::argument_mismatch(
                &self.name,
                format!("expected {} argument(s), got {}", self.params.len(), supplied),
            ));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RawContract {
    name: String,
    #[serde(default)]
    methods: Vec<MethodSignature>,
}

impl TryFrom<RawContract> for InterfaceContract {
    type Error = BridgeError;

    fn try_from(raw: RawContract) -> Result<Self> {
        InterfaceContract::new(raw.name, raw.methods)
    }
}

/// A named set of uniquely named methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawContract")]
pub struct InterfaceContract {
    name: String,
    methods: Vec<MethodSignature>,
}

impl InterfaceContract {
    /// Creates a contract, rejecting empty or duplicate (overloaded) method names.
    pub fn new(name: impl Into<String>, methods: Vec<MethodSignature>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BridgeError::InvalidContract(
                "contract name must not be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for method in &methods {
            if method.name.trim().is_empty() {
                return Err(BridgeError::InvalidContract(format!(
                    "contract '{name}' declares a method with an empty name"
                )));
            }
            if !seen.insert(method.name.as_str()) {
                return Err(BridgeError::InvalidContract(format!(
                    "method '{}' of '{}' is overloaded; overloads are not supported",
                    method.name, name
                )));
            }
        }

        Ok(Self { name, methods })
    }

    pub fn builder(name: impl Into<String>) -> ContractBuilder {
        ContractBuilder {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Parses a contract from its JSON description.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&MethodSignature> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Looks up a method, failing with an argument mismatch when it is not declared.
    pub fn require(&self, name: &str) -> Result<&MethodSignature> {
        self.method(name).ok_or_else(|| {
            BridgeError::argument_mismatch(
                name,
                format!("method is not declared by contract '{}'", self.name),
            )
        })
    }
}

/// Incremental builder for [`InterfaceContract`]; validation happens in `build`.
#[derive(Debug, Clone)]
pub struct ContractBuilder {
    name: String,
    methods: Vec<MethodSignature>,
}

impl ContractBuilder {
    pub fn method(
        mut self,
        name: impl Into<String>,
        params: Vec<ValueType>,
        returns: ValueType,
    ) -> Self {
        self.methods.push(MethodSignature::new(name, params, returns));
        self
    }

    pub fn signature(mut self, signature: MethodSignature) -> Self {
        self.methods.push(signature);
        self
    }

    pub fn build(self) -> Result<InterfaceContract> {
        InterfaceContract::new(self.name, self.methods)
    }
}
