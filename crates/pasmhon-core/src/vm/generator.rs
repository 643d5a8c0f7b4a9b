//! Generator suspension and resumption

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::{Generator, GeneratorState, Value};

use super::error::{RuntimeErrorKind, RuntimeResult};
use super::{FrameExit, Vm};

/// Outcome of resuming a generator
#[derive(Debug)]
pub(crate) enum GenStep {
    Yielded(Value),
    /// The generator finished, with its return value
    Complete(Value),
}

impl Vm {
    /// Run a generator until it yields or finishes.
    ///
    /// `sent` becomes the value of the suspended `yield` expression; it
    /// must be `None` for a generator that has not started.
    pub(crate) fn resume_generator(
        &mut self,
        generator: &Rc<RefCell<Generator>>,
        sent: Value,
    ) -> RuntimeResult<GenStep> {
        let mut frame = {
            let mut gen = generator.borrow_mut();
            match gen.state {
                GeneratorState::Finished => return Ok(GenStep::Complete(Value::None)),
                GeneratorState::Running => {
                    return Err(RuntimeErrorKind::ValueError("generator already executing".to_string()).into());
                }
                GeneratorState::Created if !sent.is_none() => {
                    return Err(RuntimeErrorKind::TypeError(
                        "can't send non-None value to a just-started generator".to_string(),
                    )
                    .into());
                }
                GeneratorState::Created | GeneratorState::Suspended => {}
            }
            let Some(frame) = gen.frame.take() else {
                gen.state = GeneratorState::Finished;
                return Ok(GenStep::Complete(Value::None));
            };
            if gen.state == GeneratorState::Suspended {
                // value of the `yield` expression
                let mut frame = frame;
                frame.push(sent);
                gen.state = GeneratorState::Running;
                frame
            } else {
                gen.state = GeneratorState::Running;
                frame
            }
        };

        frame.warm = false;
        if let Err(err) = self.push_frame(*frame) {
            generator.borrow_mut().state = GeneratorState::Finished;
            return Err(err);
        }
        let base = self.frames.len() - 1;
        let outcome = self.run_frames(base);

        let mut gen = generator.borrow_mut();
        match outcome {
            Ok(FrameExit::Yield(value, frame)) => {
                gen.frame = Some(frame);
                gen.state = GeneratorState::Suspended;
                Ok(GenStep::Yielded(value))
            }
            Ok(FrameExit::Return(value)) => {
                gen.state = GeneratorState::Finished;
                Ok(GenStep::Complete(value))
            }
            Err(err) => {
                gen.state = GeneratorState::Finished;
                Err(err)
            }
        }
    }

    /// `gen.close()`: drop the suspended frame. `finally` blocks of the
    /// abandoned frame do not run.
    pub(crate) fn close_generator(generator: &Rc<RefCell<Generator>>) {
        let mut gen = generator.borrow_mut();
        gen.frame = None;
        gen.state = GeneratorState::Finished;
    }
}
