//! The iteration protocol

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::{CallArgs, IterState, Value};

use super::error::{type_error, RuntimeResult};
use super::generator::GenStep;
use super::Vm;

/// Work an adapter iterator has to do outside the state borrow, since it
/// calls back into the VM
enum Pending {
    Enumerate(Value),
    Zip(Vec<Value>),
    Map(Value, Value),
    Filter(Value, Value),
}

impl Vm {
    /// `iter(value)`
    pub(crate) fn get_iter(&mut self, value: Value) -> RuntimeResult<Value> {
        let state = match value {
            Value::List(list) => IterState::List { list, index: 0 },
            Value::Tuple(items) => IterState::Seq { items, index: 0 },
            Value::Str(s) => IterState::Seq {
                items: s.chars().map(|c| Value::str(c.to_string())).collect(),
                index: 0,
            },
            Value::Dict(entries) => IterState::Seq {
                items: entries.borrow().keys().map(|k| k.value().clone()).collect(),
                index: 0,
            },
            Value::Range(range) => IterState::Range {
                next: range.start,
                stop: range.stop,
                step: range.step,
            },
            Value::Generator(_) | Value::Iterator(_) => return Ok(value),
            Value::Instance(_) => {
                return match self.call_special(&value, "__iter__", Vec::new())? {
                    Some(iterator) => Ok(iterator),
                    None => type_error(format!("'{}' object is not iterable", value.type_name())),
                };
            }
            other => return type_error(format!("'{}' object is not iterable", other.type_name())),
        };
        Ok(Value::iterator(state))
    }

    /// Advance an iterator; `None` when it is exhausted
    pub(crate) fn iter_next(&mut self, iterator: &Value) -> RuntimeResult<Option<Value>> {
        match iterator {
            Value::Iterator(state) => self.builtin_next(state),
            Value::Generator(generator) => match self.resume_generator(generator, Value::None)? {
                GenStep::Yielded(value) => Ok(Some(value)),
                GenStep::Complete(_) => Ok(None),
            },
            Value::Instance(_) => {
                let Some(method) = self.lookup_special(iterator, "__next__") else {
                    return type_error(format!("'{}' object is not an iterator", iterator.type_name()));
                };
                match self.call_sync(method, CallArgs::default()) {
                    Ok(value) => Ok(Some(value)),
                    Err(err) if self.stop_iteration_value(&err).is_some() => Ok(None),
                    Err(err) => Err(err),
                }
            }
            other => type_error(format!("'{}' object is not an iterator", other.type_name())),
        }
    }

    fn builtin_next(&mut self, state: &Rc<RefCell<IterState>>) -> RuntimeResult<Option<Value>> {
        let pending = match &mut *state.borrow_mut() {
            IterState::Seq { items, index } => {
                let item = items.get(*index).cloned();
                *index += usize::from(item.is_some());
                return Ok(item);
            }
            IterState::List { list, index } => {
                let item = list.borrow().get(*index).cloned();
                *index += usize::from(item.is_some());
                return Ok(item);
            }
            IterState::Range { next, stop, step } => {
                let current = *next;
                if (*step > 0 && current < *stop) || (*step < 0 && current > *stop) {
                    *next = current.checked_add(*step).unwrap_or(*stop);
                    return Ok(Some(Value::Int(current)));
                }
                return Ok(None);
            }
            IterState::Enumerate { inner, .. } => Pending::Enumerate(inner.clone()),
            IterState::Zip { inners } => Pending::Zip(inners.clone()),
            IterState::Map { function, inner } => Pending::Map(function.clone(), inner.clone()),
            IterState::Filter { function, inner } => Pending::Filter(function.clone(), inner.clone()),
        };

        match pending {
            Pending::Enumerate(inner) => {
                let Some(item) = self.iter_next(&inner)? else {
                    return Ok(None);
                };
                let mut state = state.borrow_mut();
                let IterState::Enumerate { count, .. } = &mut *state else {
                    return Ok(None);
                };
                let index = *count;
                *count += 1;
                Ok(Some(Value::tuple(vec![Value::Int(index), item])))
            }
            Pending::Zip(inners) => {
                if inners.is_empty() {
                    return Ok(None);
                }
                let mut items = Vec::with_capacity(inners.len());
                for inner in &inners {
                    match self.iter_next(inner)? {
                        Some(item) => items.push(item),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::tuple(items)))
            }
            Pending::Map(function, inner) => match self.iter_next(&inner)? {
                Some(item) => self.call_sync(function, CallArgs::positional(vec![item])).map(Some),
                None => Ok(None),
            },
            Pending::Filter(function, inner) => {
                while let Some(item) = self.iter_next(&inner)? {
                    let keep = if function.is_none() {
                        self.truthy(&item)?
                    } else {
                        let verdict =
                            self.call_sync(function.clone(), CallArgs::positional(vec![item.clone()]))?;
                        self.truthy(&verdict)?
                    };
                    if keep {
                        return Ok(Some(item));
                    }
                }
                Ok(None)
            }
        }
    }

    /// Drain any iterable into a vector
    pub(crate) fn collect_iter(&mut self, value: Value) -> RuntimeResult<Vec<Value>> {
        match &value {
            Value::List(items) => return Ok(items.borrow().clone()),
            Value::Tuple(items) => return Ok(items.to_vec()),
            _ => {}
        }
        let iterator = self.get_iter(value)?;
        let mut items = Vec::new();
        while let Some(item) = self.iter_next(&iterator)? {
            items.push(item);
        }
        Ok(items)
    }
}
