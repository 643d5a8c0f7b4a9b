//! Attribute access and method binding

use std::rc::Rc;

use crate::bytecode::{BoundMethod, ClassObject, Value};

use super::error::{RuntimeErrorKind, RuntimeResult};
use super::methods;
use super::Vm;

fn attribute_error<T>(message: String) -> RuntimeResult<T> {
    Err(RuntimeErrorKind::AttributeError(message).into())
}

/// Bind functions found on a class to the receiver; other class
/// attributes are returned as they are
fn bind(receiver: &Value, attr: Value) -> Value {
    match attr {
        Value::Function(_) | Value::NativeFunction(_) => Value::BoundMethod(Rc::new(BoundMethod {
            receiver: receiver.clone(),
            method: attr,
        })),
        other => other,
    }
}

impl Vm {
    /// `obj.name`
    pub(crate) fn get_attr(&mut self, object: &Value, name: &str) -> RuntimeResult<Value> {
        match object {
            Value::Instance(instance) => {
                if let Some(value) = instance.attrs.borrow().get(name) {
                    return Ok(value.clone());
                }
                if name == "__class__" {
                    return Ok(Value::Class(Rc::clone(&instance.class)));
                }
                match instance.class.lookup(name) {
                    Some(attr) => Ok(bind(object, attr)),
                    None => attribute_error(format!(
                        "'{}' object has no attribute '{name}'",
                        instance.class.name
                    )),
                }
            }
            Value::Exception(exc) => {
                if name == "args" {
                    return Ok(Value::tuple(exc.args.borrow().clone()));
                }
                if let Some(value) = exc.attrs.borrow().get(name) {
                    return Ok(value.clone());
                }
                if name == "__class__" {
                    return Ok(Value::Class(Rc::clone(&exc.class)));
                }
                match exc.class.lookup(name) {
                    Some(attr) => Ok(bind(object, attr)),
                    None => attribute_error(format!(
                        "'{}' object has no attribute '{name}'",
                        exc.class.name
                    )),
                }
            }
            Value::Class(class) => {
                if name == "__name__" {
                    return Ok(Value::str(&class.name));
                }
                if let Some(attr) = class.lookup(name) {
                    return Ok(attr);
                }
                // `str.upper` and friends: unbound built-in methods
                if class.constructor.is_some() {
                    if let Some(method) = methods::lookup(&class.name, name) {
                        return Ok(Value::NativeFunction(method));
                    }
                }
                attribute_error(format!("type object '{}' has no attribute '{name}'", class.name))
            }
            Value::Module(module) => {
                if name == "__name__" {
                    return Ok(Value::str(&module.name));
                }
                module.namespace.get(name).map_or_else(
                    || attribute_error(format!("module '{}' has no attribute '{name}'", module.name)),
                    Ok,
                )
            }
            Value::Function(function) if name == "__name__" => Ok(Value::str(&function.name)),
            Value::NativeFunction(native) if name == "__name__" => Ok(Value::str(native.name)),
            _ => match methods::lookup(object.type_name(), name) {
                Some(method) => Ok(bind(object, Value::NativeFunction(method))),
                None => attribute_error(format!(
                    "'{}' object has no attribute '{name}'",
                    object.type_name()
                )),
            },
        }
    }

    /// `obj.name = value`
    pub(crate) fn set_attr(&mut self, object: &Value, name: &str, value: Value) -> RuntimeResult<()> {
        match object {
            Value::Instance(instance) => {
                instance.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Exception(exc) => {
                if name == "args" {
                    *exc.args.borrow_mut() = self.collect_iter(value)?;
                } else {
                    exc.attrs.borrow_mut().insert(name.to_string(), value);
                }
                Ok(())
            }
            Value::Class(class) if class.constructor.is_none() => {
                class.namespace.set(name, value);
                Ok(())
            }
            Value::Module(module) => {
                module.namespace.set(name, value);
                Ok(())
            }
            _ => attribute_error(format!(
                "'{}' object has no attribute '{name}'",
                object.type_name()
            )),
        }
    }

    /// `del obj.name`
    pub(crate) fn del_attr(&mut self, object: &Value, name: &str) -> RuntimeResult<()> {
        let removed = match object {
            Value::Instance(instance) => instance.attrs.borrow_mut().shift_remove(name).is_some(),
            Value::Exception(exc) => exc.attrs.borrow_mut().shift_remove(name).is_some(),
            Value::Class(class) => class.namespace.remove(name).is_some(),
            Value::Module(module) => module.namespace.remove(name).is_some(),
            _ => false,
        };
        if removed {
            Ok(())
        } else {
            attribute_error(format!(
                "'{}' object has no attribute '{name}'",
                object.type_name()
            ))
        }
    }

    /// A dunder method of an instance's class, bound to the instance.
    /// Instance attributes are not consulted.
    pub(crate) fn lookup_special(&self, receiver: &Value, name: &str) -> Option<Value> {
        let class = match receiver {
            Value::Instance(instance) => &instance.class,
            Value::Exception(exc) => &exc.class,
            _ => return None,
        };
        class.lookup(name).map(|attr| bind(receiver, attr))
    }

    /// The class of any value; built-in values map to the built-in classes
    pub(crate) fn class_of(&self, value: &Value) -> Rc<ClassObject> {
        match value {
            Value::Instance(instance) => Rc::clone(&instance.class),
            Value::Exception(exc) => Rc::clone(&exc.class),
            other => self
                .classes
                .types
                .get(other.type_name())
                .cloned()
                .unwrap_or_else(|| Rc::clone(&self.classes.object)),
        }
    }

    /// `hasattr(obj, name)`
    pub(crate) fn has_attr(&mut self, object: &Value, name: &str) -> RuntimeResult<bool> {
        match self.get_attr(object, name) {
            Ok(_) => Ok(true),
            Err(err) if matches!(err.kind, RuntimeErrorKind::AttributeError(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
