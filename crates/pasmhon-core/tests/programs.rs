//! Whole programs run through the interpreter with output captured

use pasmhon_core::config::JitConfig;
use pasmhon_core::{run_captured, RunError, RuntimeConfig};

fn interpreted() -> RuntimeConfig {
    RuntimeConfig {
        jit: JitConfig {
            enabled: false,
            ..JitConfig::default()
        },
        ..RuntimeConfig::default()
    }
}

fn output_of(source: &str) -> Vec<String> {
    let (result, output) = run_captured(source, "<test>", &interpreted());
    if let Err(err) = result {
        panic!("program failed: {err}\noutput so far:\n{}", output.stdout);
    }
    output.lines().iter().map(ToString::to_string).collect()
}

#[test]
fn literals_print_plainly() {
    let source = "print(3)\nprint(3.5)\nprint(True)\nprint('text')\nprint(None)\n";
    assert_eq!(output_of(source), ["3", "3.5", "True", "text", "None"]);
}

#[test]
fn globals_add_up() {
    assert_eq!(output_of("a = 1\nb = 2\nprint(a + b)\n"), ["3"]);
}

#[test]
fn comments_and_blank_lines_are_ignored() {
    let source = "# header\n\nx = 1  # trailing\n\n    # indented comment\nprint(x)\n";
    assert_eq!(output_of(source), ["1"]);
}

#[test]
fn recursive_factorial() {
    let source = "\
def factorial(n):
    if n <= 1:
        return 1
    return n * factorial(n - 1)

print(factorial(10))
";
    assert_eq!(output_of(source), ["3628800"]);
}

#[test]
fn except_clauses_match_by_class() {
    let source = "\
try:
    try:
        1 // 0
    except ValueError:
        print('wrong handler')
except ZeroDivisionError as e:
    print('caught', e)

try:
    raise KeyError('k')
except LookupError:
    print('base class matches')
";
    assert_eq!(
        output_of(source),
        ["caught integer division or modulo by zero", "base class matches"]
    );
}

#[test]
fn closures_share_cells() {
    let source = "\
def make():
    x = 1
    def get():
        return x
    x = 2
    return get

print(make()())

def counter():
    count = 0
    def bump():
        nonlocal count
        count = count + 1
        return count
    return bump

c = counter()
c()
c()
print(c())
";
    assert_eq!(output_of(source), ["2", "3"]);
}

#[test]
fn generators_yield_then_stop() {
    let source = "\
def gen():
    yield 1
    yield 2
    yield 3

g = gen()
print(next(g))
print(next(g))
print(next(g))
try:
    next(g)
except StopIteration:
    print('done')
print(list(gen()))
";
    assert_eq!(output_of(source), ["1", "2", "3", "done", "[1, 2, 3]"]);
}

#[test]
fn parameters_bind_defaults_varargs_and_keywords() {
    let source = "\
def f(a, b=2, *rest, c=3, **extra):
    print(a, b, rest, c, extra)

f(1)
f(1, 5, 6, 7, c=8, z=9)
f(b=4, a=0)
";
    assert_eq!(
        output_of(source),
        ["1 2 () 3 {}", "1 5 (6, 7) 8 {'z': 9}", "0 4 () 3 {}"]
    );
}

#[test]
fn missing_arguments_are_type_errors() {
    let source = "\
def f(a, b):
    return a
try:
    f(1)
except TypeError:
    print('type error')
";
    assert_eq!(output_of(source), ["type error"]);
}

#[test]
fn attributes_resolve_through_base_classes() {
    let source = "\
class Animal:
    sound = '...'
    def __init__(self, name):
        self.name = name
    def speak(self):
        return self.name + ' says ' + self.sound

class Dog(Animal):
    sound = 'woof'

class Puppy(Dog):
    def speak(self):
        return Dog.speak(self) + '!'

print(Puppy('rex').speak())
print(Animal('cat').speak())
print(isinstance(Puppy('a'), Animal), isinstance(Animal('b'), Dog))
";
    assert_eq!(
        output_of(source),
        ["rex says woof!", "cat says ...", "True False"]
    );
}

#[test]
fn finally_runs_on_every_exit() {
    let source = "\
def f():
    try:
        return 1
    finally:
        print('cleanup')

print(f())
for i in range(3):
    try:
        break
    finally:
        print('break', i)
try:
    try:
        raise ValueError('x')
    finally:
        print('unwinding')
except ValueError:
    print('caught')
";
    assert_eq!(
        output_of(source),
        ["cleanup", "1", "break 0", "unwinding", "caught"]
    );
}

#[test]
fn with_calls_exit_on_exceptions() {
    let source = "\
class Manager:
    def __init__(self, swallow):
        self.swallow = swallow
    def __enter__(self):
        print('enter')
        return self
    def __exit__(self, kind, value, tb):
        print('exit', value)
        return self.swallow

with Manager(True) as m:
    raise ValueError('boom')
print('after')

with Manager(False):
    print('body')

try:
    with Manager(False):
        raise KeyError('kept')
except KeyError:
    print('propagated')
";
    assert_eq!(
        output_of(source),
        [
            "enter",
            "exit boom",
            "after",
            "enter",
            "body",
            "exit None",
            "enter",
            "exit 'kept'",
            "propagated",
        ]
    );
}

#[test]
fn comprehensions_have_their_own_scope() {
    let source = "\
x = 10
squares = [x * x for x in range(4)]
print(squares, x)
print({k: k * 2 for k in range(3)})
print([i for i in range(10) if i % 3 == 0])
";
    assert_eq!(
        output_of(source),
        ["[0, 1, 4, 9] 10", "{0: 0, 1: 2, 2: 4}", "[0, 3, 6, 9]"]
    );
}

#[test]
fn slicing_lists_and_strings() {
    let source = "\
xs = [0, 1, 2, 3, 4, 5]
print(xs[1:4], xs[::2], xs[::-1], xs[-2:])
print('hello'[1:3], (1, 2, 3)[1:])
";
    assert_eq!(
        output_of(source),
        ["[1, 2, 3] [0, 2, 4] [5, 4, 3, 2, 1, 0] [4, 5]", "el (2, 3)"]
    );
}

#[test]
fn true_division_is_float() {
    assert_eq!(output_of("print(7 / 2, 7 // 2, -7 // 2, 6 / 3)\n"), ["3.5 3 -4 2.0"]);
}

#[test]
fn string_concatenation_needs_strings() {
    let source = "\
print('a' + 'b')
try:
    'a' + 1
except TypeError:
    print('no implicit str')
print('n=' + str(1))
";
    assert_eq!(output_of(source), ["ab", "no implicit str", "n=1"]);
}

#[test]
fn imports_load_sibling_modules() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("helper.pa"),
        "VALUE = 41\ndef bump(x):\n    return x + 1\n",
    )
    .unwrap();
    let main = dir.path().join("main.pa");
    let source = "\
import helper
print(helper.bump(helper.VALUE))
from helper import bump
print(bump(1))
try:
    import missing_module
except ImportError:
    print('missing')
";
    std::fs::write(&main, source).unwrap();

    let (result, output) = run_captured(source, &main.display().to_string(), &interpreted());
    assert!(result.is_ok(), "{:?}", result.err());
    assert_eq!(output.lines(), ["42", "2", "missing"]);
}

#[test]
fn uncaught_exceptions_surface_as_runtime_errors() {
    let (result, output) = run_captured("print('before')\nraise ValueError('bad')\n", "t.pa", &interpreted());
    assert_eq!(output.stdout, "before\n");
    match result {
        Err(RunError::Runtime(err)) => {
            assert_eq!(err.class_name(), "ValueError");
            assert_eq!(err.message(), "bad");
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
}
