//! The surface consumed from the reflection collaborator.
//!
//! Rust has no runtime reflection, so the collaborator hands the gateway
//! ready-made reflections: the method names, the declared parameter
//! prototypes, and an invocation thunk that has already captured its
//! target.

use codec::Value;

pub type InvokeFn = Box<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// A declared parameter: its name and, when the signature carries one,
/// the declared type used by parameter casting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub type_name: Option<String>,
}

impl Param {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: None,
        }
    }

    pub fn typed(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: Some(type_name.to_string()),
        }
    }
}

/// What an invocation thunk is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A free function.
    Free,
    /// A static method on the named class.
    Static(String),
    /// A method bound to an instance of the named class.
    Instance(String),
}

pub struct MethodReflection {
    pub name: String,
    pub prototypes: Vec<Vec<Param>>,
    pub target: Target,
    pub invoke: InvokeFn,
}

impl MethodReflection {
    pub fn new(
        name: &str,
        prototypes: Vec<Vec<Param>>,
        invoke: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            target: Target::Free,
            prototypes,
            invoke: Box::new(invoke),
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }
}

pub struct ClassReflection {
    pub name: String,
    /// Arguments appended to every call, fixed at registration time.
    pub fixed_args: Vec<Value>,
    pub methods: Vec<MethodReflection>,
}

impl ClassReflection {
    pub fn new(name: &str, methods: Vec<MethodReflection>) -> Self {
        Self {
            name: name.to_string(),
            fixed_args: Vec::new(),
            methods,
        }
    }

    pub fn with_fixed_args(mut self, fixed_args: Vec<Value>) -> Self {
        self.fixed_args = fixed_args;
        self
    }
}

pub struct FunctionReflection {
    pub name: String,
    pub fixed_args: Vec<Value>,
    pub prototypes: Vec<Vec<Param>>,
    pub invoke: InvokeFn,
}

impl FunctionReflection {
    pub fn new(
        name: &str,
        prototypes: Vec<Vec<Param>>,
        invoke: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            fixed_args: Vec::new(),
            prototypes,
            invoke: Box::new(invoke),
        }
    }

    pub fn with_fixed_args(mut self, fixed_args: Vec<Value>) -> Self {
        self.fixed_args = fixed_args;
        self
    }
}
