//! Parameter casting.
//!
//! Deserialized arguments arrive as generic records; when the invocable
//! declares class types for its positions, the records are retagged into
//! typed objects so user code sees the classes it declared. Builtin type
//! names are left alone, `T[]` casts element-wise over a sequence, and a
//! scalar in a class position is nulled out.

use crate::reflect::Param;

use codec::{Trait, TypeRegistry, Value};

/// Declared type names that never trigger a cast, compared case
/// insensitively.
const BUILTIN_TYPES: &[&str] = &[
    "null", "mixed", "void", "unknown", "bool", "boolean", "number", "int", "integer", "double",
    "float", "string", "array", "object", "anonymous-record",
];

pub fn cast_parameters(registry: &TypeRegistry, prototypes: &[Vec<Param>], args: &mut [Value]) {
    for index in 0..args.len() {
        let Some(declared) = declared_type(prototypes, index) else {
            continue;
        };

        if let Some(element) = declared.strip_suffix("[]") {
            if skipped(element) {
                continue;
            }

            if let Value::Array(array) = &args[index] {
                let mut array = array.borrow_mut();
                for item in array.dense.iter_mut() {
                    let cast = cast_single(registry, element, item.clone());
                    *item = cast;
                }
            }

            continue;
        }

        if skipped(&declared) {
            continue;
        }

        args[index] = cast_single(registry, &declared, args[index].clone());
    }
}

fn declared_type(prototypes: &[Vec<Param>], index: usize) -> Option<String> {
    prototypes
        .iter()
        .find_map(|prototype| prototype.get(index).and_then(|it| it.type_name.clone()))
}

fn skipped(name: &str) -> bool {
    BUILTIN_TYPES.iter().any(|it| name.eq_ignore_ascii_case(it))
}

fn cast_single(registry: &TypeRegistry, declared: &str, value: Value) -> Value {
    // the declaration may use either side of the alias map.
    let target = registry.class_of(declared).to_string();

    match &value {
        Value::Object(object) => {
            let matches = {
                let alias = &object.borrow().traits.alias;
                *alias == target || alias == declared
            };

            if matches {
                return value;
            }

            // a record of another shape: retag and copy members by name.
            let object = object.borrow();
            let fields: Vec<(String, Value)> = object
                .traits
                .sealed_names
                .iter()
                .cloned()
                .zip(object.sealed.iter().cloned())
                .chain(object.dynamic.iter().cloned())
                .collect();

            Value::object(Trait::dynamic(&target), Vec::new(), fields)
        }
        Value::Array(array) => {
            let array = array.borrow();
            if array.dense.is_empty() {
                // an associative sequence doubles as a record.
                Value::object(Trait::dynamic(&target), Vec::new(), array.associative.clone())
            } else {
                value.clone()
            }
        }
        Value::Null | Value::Undefined => value,
        _ => Value::Null,
    }
}
