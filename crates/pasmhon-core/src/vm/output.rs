//! Output sink for `print`
//!
//! Program output normally goes to stdout. Inside [`with_output_capture`]
//! it is collected into a thread-local buffer instead, which is how the
//! tests and the ELF image writer observe what a program printed.

use std::cell::RefCell;
use std::io::Write;

thread_local! {
    static OUTPUT_BUFFER: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Output collected by [`with_output_capture`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputCapture {
    pub stdout: String,
}

impl OutputCapture {
    /// Captured output split into lines
    #[must_use]
    pub fn lines(&self) -> Vec<&str> {
        self.stdout.lines().collect()
    }
}

/// Run `f` with program output captured.
///
/// Captures nest: the inner capture sees only its own output and the
/// outer buffer is restored afterwards.
pub fn with_output_capture<F, R>(f: F) -> (R, OutputCapture)
where
    F: FnOnce() -> R,
{
    let previous = OUTPUT_BUFFER.with(|cell| cell.borrow_mut().replace(String::new()));
    let result = f();
    let stdout = OUTPUT_BUFFER
        .with(|cell| std::mem::replace(&mut *cell.borrow_mut(), previous))
        .unwrap_or_default();
    (result, OutputCapture { stdout })
}

/// Write program output to the active capture, or to stdout
pub(crate) fn write_output(text: &str) {
    let captured = OUTPUT_BUFFER.with(|cell| match cell.borrow_mut().as_mut() {
        Some(buffer) => {
            buffer.push_str(text);
            true
        }
        None => false,
    });
    if !captured {
        let mut stdout = std::io::stdout().lock();
        // A closed stdout is not an error the program can observe
        let _ = stdout.write_all(text.as_bytes());
        if text.ends_with('\n') {
            let _ = stdout.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_collects_output() {
        let ((), output) = with_output_capture(|| {
            write_output("Hello");
            write_output(", World!\n");
        });
        assert_eq!(output.stdout, "Hello, World!\n");
        assert_eq!(output.lines(), vec!["Hello, World!"]);
    }

    #[test]
    fn captures_nest() {
        let (inner, outer) = with_output_capture(|| {
            write_output("outer\n");
            let ((), inner) = with_output_capture(|| write_output("inner\n"));
            write_output("again\n");
            inner
        });
        assert_eq!(inner.stdout, "inner\n");
        assert_eq!(outer.stdout, "outer\nagain\n");
    }

    #[test]
    fn returns_the_closure_result() {
        let (value, output) = with_output_capture(|| 42);
        assert_eq!(value, 42);
        assert!(output.stdout.is_empty());
    }
}
