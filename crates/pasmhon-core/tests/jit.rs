//! Programs run with and without compiled code must print the same thing

use pasmhon_core::config::JitConfig;
use pasmhon_core::jit::JitStats;
use pasmhon_core::{compile_source, with_output_capture, RuntimeConfig, Vm};

fn config(enabled: bool, threshold: u32) -> RuntimeConfig {
    RuntimeConfig {
        jit: JitConfig {
            enabled,
            call_threshold: threshold,
            loop_threshold: threshold,
        },
        ..RuntimeConfig::default()
    }
}

/// Output of `source` and the JIT counters, if the JIT was available
fn run(source: &str, config: &RuntimeConfig) -> (String, Option<JitStats>) {
    let code = compile_source(source, "<test>").expect("compiles");
    let mut vm = Vm::new(config);
    let (result, output) = with_output_capture(|| vm.run_module(code));
    if let Err(err) = result {
        panic!("program failed: {err}");
    }
    (output.stdout, vm.jit_stats())
}

fn same_output(source: &str, threshold: u32) -> Option<JitStats> {
    let (interpreted, none) = run(source, &config(false, threshold));
    assert!(none.is_none());
    let (compiled, stats) = run(source, &config(true, threshold));
    assert_eq!(interpreted, compiled);
    stats
}

const FACTORIAL: &str = "\
def factorial(n):
    if n <= 1:
        return 1
    return n * factorial(n - 1)

i = 0
while i < 50:
    result = factorial(10)
    i = i + 1
print(result)
";

#[test]
fn factorial_after_promotion() {
    let (output, _) = run(FACTORIAL, &config(false, 2));
    assert_eq!(output, "3628800\n");
    if let Some(stats) = same_output(FACTORIAL, 2) {
        assert!(stats.compiled >= 1, "{stats:?}");
        assert!(stats.native_runs >= 1, "{stats:?}");
    }
}

#[test]
fn long_loop_matches_the_interpreter() {
    let source = "\
def total(n):
    s = 0
    i = 1
    while i <= n:
        s = s + i
        i = i + 1
    return s

print(total(1000000))
";
    let (output, _) = run(source, &config(false, 10));
    assert_eq!(output, "500000500000\n");
    if let Some(stats) = same_output(source, 10) {
        assert!(stats.native_runs >= 1, "{stats:?}");
    }
}

#[test]
fn type_change_mid_loop_deoptimizes() {
    let source = "\
def g(i):
    if i < 500:
        return i
    return 0.5

def run(n):
    s = 0
    i = 0
    while i < n:
        s = s + g(i)
        i = i + 1
    return s

print(run(1000))
";
    let (output, _) = run(source, &config(false, 10));
    assert_eq!(output, "125000.0\n");
    if let Some(stats) = same_output(source, 10) {
        assert!(stats.deopts >= 1, "{stats:?}");
    }
}

#[test]
fn float_loops_and_mixed_arithmetic() {
    let source = "\
def mean(n):
    total = 0.0
    i = 0
    while i < n:
        total = total + i / 2
        i = i + 1
    return total / n

def mixed(n):
    s = 0
    i = 0
    while i < n:
        if i == 500:
            s = s + 0.5
        s = s + i
        i = i + 1
    return s

print(mean(1000))
print(mixed(1000))
";
    same_output(source, 5);
}

#[test]
fn errors_in_compiled_code_still_raise() {
    let source = "\
def div(a, b):
    return a // b

i = 0
while i < 20:
    div(10, 3)
    i = i + 1
try:
    div(1, 0)
except ZeroDivisionError:
    print('caught')
try:
    div(9223372036854775807 * 1, 1) * 2
except OverflowError:
    print('overflow')
";
    same_output(source, 3);
    let (output, _) = run(source, &config(true, 3));
    assert_eq!(output, "caught\noverflow\n");
}

#[test]
fn rebinding_a_callee_is_observed() {
    let source = "\
def one(x):
    return 1

def caller(n):
    s = 0
    i = 0
    while i < n:
        s = s + one(i)
        i = i + 1
    return s

print(caller(100))
def one(x):
    return 2
print(caller(100))
";
    let (output, _) = run(source, &config(true, 5));
    assert_eq!(output, "100\n200\n");
}
