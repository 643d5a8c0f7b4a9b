//! Calling functions, methods and classes

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::{
    CallArgs, ClassObject, Dict, DictKey, ExceptionObject, Function, Generator, Instance, Value,
};

use super::error::{type_error, RuntimeErrorKind, RuntimeResult};
use super::frame::{Frame, ReturnAction};
use super::{FrameExit, Vm};

/// Result of starting a call
pub(crate) enum Invoked {
    /// The call completed with this value
    Value(Value),
    /// A frame was pushed; its result arrives when it returns
    Frame,
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn quoted_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

impl Vm {
    /// Start a call. Functions push a frame; everything else completes
    /// immediately.
    pub(crate) fn invoke(&mut self, callee: Value, mut args: CallArgs) -> RuntimeResult<Invoked> {
        match callee {
            Value::Function(function) => {
                if function.code.is_generator {
                    let frame = self.bind_frame(&function, args, ReturnAction::Push)?;
                    let generator = Generator::new(function.name.clone(), frame);
                    return Ok(Invoked::Value(Value::Generator(Rc::new(RefCell::new(generator)))));
                }
                if args.keywords.is_empty() {
                    if let Some(value) = self.try_jit_call(&function, &args.positional) {
                        return Ok(Invoked::Value(value));
                    }
                }
                let mut frame = self.bind_frame(&function, args, ReturnAction::Push)?;
                frame.warm = self.is_warm(&frame);
                self.push_frame(frame)?;
                Ok(Invoked::Frame)
            }
            Value::NativeFunction(native) => {
                if native.arity >= 0 {
                    let expected = native.arity as usize;
                    let given = args.positional.len();
                    if given != expected || !args.keywords.is_empty() {
                        return type_error(format!(
                            "{}() takes exactly {expected} argument{} ({given} given)",
                            native.name,
                            plural(expected)
                        ));
                    }
                }
                (native.function)(self, args).map(Invoked::Value)
            }
            Value::BoundMethod(method) => {
                args.positional.insert(0, method.receiver.clone());
                self.invoke(method.method.clone(), args)
            }
            Value::Class(class) => self.instantiate(&class, args),
            Value::Instance(_) => match self.lookup_special(&callee, "__call__") {
                Some(method) => self.invoke(method, args),
                None => type_error(format!("'{}' object is not callable", callee.type_name())),
            },
            other => type_error(format!("'{}' object is not callable", other.type_name())),
        }
    }

    /// Call and run to completion; used by natives that call back into
    /// user code and by dunder dispatch
    pub(crate) fn call_sync(&mut self, callee: Value, args: CallArgs) -> RuntimeResult<Value> {
        match self.invoke(callee, args)? {
            Invoked::Value(value) => Ok(value),
            Invoked::Frame => {
                let base = self.frames.len() - 1;
                match self.run_frames(base)? {
                    FrameExit::Return(value) => Ok(value),
                    FrameExit::Yield(..) => Err(RuntimeErrorKind::Internal(
                        "yield escaped a synchronous call".to_string(),
                    )
                    .into()),
                }
            }
        }
    }

    /// Create an instance of `class` and start its `__init__`
    fn instantiate(&mut self, class: &Rc<ClassObject>, mut args: CallArgs) -> RuntimeResult<Invoked> {
        if let Some(constructor) = class.constructor {
            return constructor(self, args).map(Invoked::Value);
        }
        let instance = if class.is_exception {
            Value::Exception(ExceptionObject::new(Rc::clone(class), args.positional.clone()))
        } else {
            Value::Instance(Instance::new(Rc::clone(class)))
        };
        match class.lookup("__init__") {
            Some(Value::Function(init)) => {
                args.positional.insert(0, instance.clone());
                let frame = self.bind_frame(&init, args, ReturnAction::Construct { instance })?;
                self.push_frame(frame)?;
                Ok(Invoked::Frame)
            }
            Some(init) => {
                args.positional.insert(0, instance.clone());
                self.call_sync(init, args)?;
                Ok(Invoked::Value(instance))
            }
            None if class.is_exception => Ok(Invoked::Value(instance)),
            None if !args.positional.is_empty() || !args.keywords.is_empty() => {
                type_error(format!("{}() takes no arguments", class.name))
            }
            None => Ok(Invoked::Value(instance)),
        }
    }

    /// Push a frame, enforcing the depth limit
    pub(crate) fn push_frame(&mut self, frame: Frame) -> RuntimeResult<()> {
        if self.frames.len() >= self.max_frames {
            return Err(RuntimeErrorKind::RecursionError.into());
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Bind arguments to a new frame for `function`
    pub(crate) fn bind_frame(
        &mut self,
        function: &Rc<Function>,
        args: CallArgs,
        action: ReturnAction,
    ) -> RuntimeResult<Frame> {
        let code = Rc::clone(&function.code);
        let spec = code.params;
        let name = &function.name;
        let mut frame = Frame::new(Rc::clone(&code), Rc::clone(&function.globals), &function.cells, action);

        // 1. positional
        let npos = spec.positional as usize;
        let mut positional = args.positional;
        let surplus = if positional.len() > npos {
            positional.split_off(npos)
        } else {
            Vec::new()
        };
        if !surplus.is_empty() && spec.vararg.is_none() {
            let given = npos + surplus.len();
            return type_error(format!(
                "{name}() takes {npos} positional argument{} but {given} {} given",
                plural(npos),
                if given == 1 { "was" } else { "were" }
            ));
        }
        for (slot, value) in positional.into_iter().enumerate() {
            frame.locals[slot] = Some(value);
        }

        // 2. keywords by name
        let named = code.named_params();
        let mut extra_keywords = Dict::new();
        for (keyword, value) in args.keywords {
            match named.iter().position(|p| *p == *keyword) {
                Some(slot) if frame.locals[slot].is_some() => {
                    return type_error(format!("{name}() got multiple values for argument '{keyword}'"));
                }
                Some(slot) => frame.locals[slot] = Some(value),
                None if spec.kwarg.is_some() => {
                    extra_keywords.insert(DictKey::from(&*keyword), value);
                }
                None => {
                    return type_error(format!("{name}() got an unexpected keyword argument '{keyword}'"));
                }
            }
        }

        // 3. defaults for the trailing positional parameters
        let first_default = npos.saturating_sub(function.defaults.len());
        let mut missing = Vec::new();
        for slot in 0..npos {
            if frame.locals[slot].is_some() {
                continue;
            }
            if slot >= first_default {
                frame.locals[slot] = Some(function.defaults[slot - first_default].clone());
            } else {
                missing.push(named[slot].as_str());
            }
        }
        if !missing.is_empty() {
            return type_error(format!(
                "{name}() missing {} required positional argument{}: {}",
                missing.len(),
                plural(missing.len()),
                quoted_list(&missing)
            ));
        }

        // 4. *args
        if let Some(slot) = spec.vararg {
            frame.locals[slot as usize] = Some(Value::tuple(surplus));
        }

        // 5. **kwargs
        if let Some(slot) = spec.kwarg {
            frame.locals[slot as usize] = Some(Value::dict(extra_keywords));
        }

        // 6. keyword-only parameters
        let mut missing = Vec::new();
        for (offset, param) in code.kwonly_names().iter().enumerate() {
            let slot = npos + offset;
            if frame.locals[slot].is_none() {
                match function.kwdefaults.get(param) {
                    Some(default) => frame.locals[slot] = Some(default.clone()),
                    None => missing.push(param.as_str()),
                }
            }
        }
        if !missing.is_empty() {
            return type_error(format!(
                "{name}() missing {} required keyword-only argument{}: {}",
                missing.len(),
                plural(missing.len()),
                quoted_list(&missing)
            ));
        }

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_lists_read_naturally() {
        assert_eq!(quoted_list(&["a"]), "'a'");
        assert_eq!(quoted_list(&["a", "b"]), "'a' and 'b'");
        assert_eq!(quoted_list(&["a", "b", "c"]), "'a', 'b' and 'c'");
    }
}
