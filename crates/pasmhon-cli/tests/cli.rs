//! Run the `pasmhon` binary on scratch scripts

use std::path::Path;
use std::process::{Command, Output};

fn script(dir: &Path, name: &str, source: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, source).unwrap();
    path
}

fn pasmhon(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pasmhon"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("PASMHON_NO_JIT")
        .output()
        .expect("binary runs")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn successful_programs_exit_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(dir.path(), "ok.pa", "a = 1\nb = 2\nprint(a + b)\n");
    let output = pasmhon(&[path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert_eq!(stdout(&output), "3\n");
}

#[test]
fn py_files_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(dir.path(), "ok.py", "print('py')\n");
    let output = pasmhon(&["--no-jit", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "py\n");
}

#[test]
fn syntax_errors_exit_one_with_a_caret() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(dir.path(), "bad.pa", "x = 1\nif x\n    x = 2\n");
    let path = path.to_str().unwrap();
    let output = pasmhon(&[path]);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.starts_with(&format!("{path}:2:5: SyntaxError: ")), "{err}");
    assert!(err.contains("    if x\n        ^\n"), "{err}");
    assert!(stdout(&output).is_empty());
}

#[test]
fn uncaught_exceptions_exit_one_with_a_traceback() {
    let dir = tempfile::tempdir().unwrap();
    let source = "def inner():\n    raise ValueError('nope')\n\ndef outer():\n    inner()\n\nprint('start')\nouter()\n";
    let path = script(dir.path(), "raise.pa", source);
    let path = path.to_str().unwrap();
    let output = pasmhon(&[path]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout(&output), "start\n");
    let err = stderr(&output);
    assert!(err.contains("Traceback (innermost first):\n"), "{err}");
    assert!(err.contains(&format!("  at inner ({path}:2)")), "{err}");
    assert!(err.contains(&format!("  at outer ({path}:5)")), "{err}");
    assert!(err.trim_end().ends_with("ValueError: nope"), "{err}");
}

#[test]
fn usage_errors_exit_two() {
    assert_eq!(pasmhon(&[]).status.code(), Some(2));
    assert_eq!(pasmhon(&["--no-such-flag", "x.pa"]).status.code(), Some(2));
}

#[test]
fn unreadable_files_exit_two() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.pa");
    let output = pasmhon(&[missing.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("cannot read"));
}

#[test]
fn dump_bytecode_lists_every_code_object() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(dir.path(), "dump.pa", "def f(x):\n    return x + 1\nprint(f(1))\n");
    let output = pasmhon(&["--dump-bytecode", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));
    let listing = stdout(&output);
    assert!(listing.contains("module <module>"), "{listing}");
    assert!(listing.contains(" f ("), "{listing}");
    assert!(!listing.contains("\n2\n"), "the program must not run");
}

#[test]
fn jit_flags_do_not_change_output() {
    let dir = tempfile::tempdir().unwrap();
    let source = "\
def total(n):
    s = 0
    i = 0
    while i < n:
        s = s + i
        i = i + 1
    return s
print(total(100000))
";
    let path = script(dir.path(), "loop.pa", source);
    let path = path.to_str().unwrap();
    let jit = pasmhon(&["--jit-threshold", "10", "-vv", path]);
    let interpreted = pasmhon(&["--no-jit", path]);
    assert_eq!(jit.status.code(), Some(0));
    assert_eq!(stdout(&jit), "4999950000\n");
    assert_eq!(stdout(&jit), stdout(&interpreted));
}

#[test]
fn invalid_config_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = script(dir.path(), "cfg.toml", "[jit]\nbogus = 1\n");
    let path = script(dir.path(), "ok.pa", "print(1)\n");
    let output = pasmhon(&["--config", config.to_str().unwrap(), path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn emit_elf_writes_an_image_of_the_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(dir.path(), "hello.pa", "print('hello')\nprint(6 * 7)\n");
    let image = dir.path().join("hello.elf");
    let output = pasmhon(&["--emit-elf", image.to_str().unwrap(), path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert_eq!(stdout(&output), "hello\n42\n");

    let bytes = std::fs::read(&image).unwrap();
    assert_eq!(&bytes[..4], b"\x7fELF");
    assert_eq!(&bytes[0x100..], b"hello\n42\n");
}

#[test]
fn failing_programs_produce_no_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(dir.path(), "fail.pa", "print('partial')\nraise RuntimeError('stop')\n");
    let image = dir.path().join("fail.elf");
    let output = pasmhon(&["--emit-elf", image.to_str().unwrap(), path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout(&output), "partial\n");
    assert!(!image.exists());
}
