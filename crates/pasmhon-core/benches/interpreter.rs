//! Interpreter against compiled code on the sum loop and `factorial`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use pasmhon_core::config::JitConfig;
use pasmhon_core::{compile_source, with_output_capture, RuntimeConfig, Vm};

const SUM_LOOP: &str = "\
def total(n):
    s = 0
    i = 1
    while i <= n:
        s = s + i
        i = i + 1
    return s

print(total(1000000))
";

const FACTORIAL: &str = "\
def factorial(n):
    if n <= 1:
        return 1
    return n * factorial(n - 1)

i = 0
while i < 2000:
    factorial(20)
    i = i + 1
";

fn config(jit: bool) -> RuntimeConfig {
    RuntimeConfig {
        jit: JitConfig {
            enabled: jit,
            ..JitConfig::default()
        },
        ..RuntimeConfig::default()
    }
}

fn bench_program(c: &mut Criterion, name: &str, source: &str) {
    let code = compile_source(source, name).expect("benchmark program compiles");
    let mut group = c.benchmark_group(name);
    group.sample_size(10);
    for (label, jit) in [("interpreter", false), ("jit", true)] {
        let config = config(jit);
        group.bench_with_input(BenchmarkId::from_parameter(label), &config, |b, config| {
            b.iter(|| {
                let mut vm = Vm::new(config);
                let (result, output) = with_output_capture(|| vm.run_module(code.clone()));
                black_box((result.is_ok(), output));
            });
        });
    }
    group.finish();
}

fn bench_sum_loop(c: &mut Criterion) {
    bench_program(c, "sum_loop", SUM_LOOP);
}

fn bench_factorial(c: &mut Criterion) {
    bench_program(c, "factorial", FACTORIAL);
}

criterion_group!(benches, bench_sum_loop, bench_factorial);
criterion_main!(benches);
