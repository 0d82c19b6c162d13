//! Qualified-name dispatch table.
//!
//! The table maps `namespace.Class.method` (or the bare short name when
//! no namespace was supplied) to the invocable built from the
//! reflection collaborator. Registrations happen at configuration time;
//! a duplicate qualified name is a configuration error, never deferred
//! to dispatch time.

use crate::{
    Error,
    reflect::{ClassReflection, FunctionReflection, InvokeFn, Param, Target},
};

use ahash::{HashMap, HashMapExt};
use codec::Value;

pub struct Dispatchable {
    pub qualified_name: String,
    pub prototypes: Vec<Vec<Param>>,
    pub fixed_args: Vec<Value>,
    pub target: Target,
    invoke: InvokeFn,
}

impl Dispatchable {
    pub fn invoke(&self, args: &[Value]) -> Result<Value, String> {
        (self.invoke)(args)
    }
}

#[derive(Default)]
pub struct DispatchTable {
    entries: HashMap<String, Dispatchable>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::with_capacity(64),
        }
    }

    /// Register every method of a reflected class under
    /// `[namespace.]Class.method`.
    pub fn register_class(
        &mut self,
        reflection: ClassReflection,
        namespace: Option<&str>,
    ) -> Result<(), Error> {
        for method in reflection.methods {
            let short = format!("{}.{}", reflection.name, method.name);
            self.insert(Dispatchable {
                qualified_name: qualified_name(namespace, &short),
                prototypes: method.prototypes,
                fixed_args: reflection.fixed_args.clone(),
                target: method.target,
                invoke: method.invoke,
            })?;
        }

        Ok(())
    }

    /// Register a reflected free function under `[namespace.]name`.
    pub fn register_function(
        &mut self,
        reflection: FunctionReflection,
        namespace: Option<&str>,
    ) -> Result<(), Error> {
        self.insert(Dispatchable {
            qualified_name: qualified_name(namespace, &reflection.name),
            prototypes: reflection.prototypes,
            fixed_args: reflection.fixed_args,
            target: Target::Free,
            invoke: reflection.invoke,
        })
    }

    pub fn get(&self, qualified_name: &str) -> Option<&Dispatchable> {
        self.entries.get(qualified_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, entry: Dispatchable) -> Result<(), Error> {
        if self.entries.contains_key(&entry.qualified_name) {
            return Err(Error::DuplicateName(entry.qualified_name));
        }

        log::debug!("register: target={}", entry.qualified_name);
        self.entries.insert(entry.qualified_name.clone(), entry);
        Ok(())
    }
}

fn qualified_name(namespace: Option<&str>, short: &str) -> String {
    match namespace {
        Some(namespace) if !namespace.is_empty() => format!("{}.{}", namespace, short),
        _ => short.to_string(),
    }
}
