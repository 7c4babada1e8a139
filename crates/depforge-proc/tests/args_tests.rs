// SPDX-License-Identifier: MIT OR Apache-2.0
//! Argument formatting and shell quoting tests.
//!
//! No tracing subscriber is installed in this binary, so verbosity-gated
//! arguments behave as they would in a quiet orchestrator run.

use std::path::Path;

use depforge_proc::{ArgGate, ArgOpts, Process, shell_quote};

fn nospace() -> ArgOpts {
    ArgOpts {
        nospace: true,
        ..ArgOpts::default()
    }
}

#[test]
fn plain_args_render_in_order() {
    let p = Process::new()
        .binary("cmake")
        .arg("--build")
        .arg(Path::new("build/zlib"))
        .arg_named("-j", 8, ArgOpts::default());
    assert_eq!(p.shell_command(), "cmake --build build/zlib -j 8");
}

#[test]
fn nospace_and_trailing_equals_join_name_and_value() {
    let p = Process::new()
        .binary("configure")
        .arg_named("--prefix=", "/opt/dep", ArgOpts::default())
        .arg_named("-DFOO", "bar", nospace());
    assert_eq!(p.shell_command(), "configure --prefix=/opt/dep -DFOObar");
}

#[test]
fn named_arg_without_value_renders_the_name_alone() {
    let p = Process::new()
        .binary("tool")
        .arg_named("--verbose", "", ArgOpts::default());
    assert_eq!(p.shell_command(), "tool --verbose");
}

#[test]
fn forward_slashes_normalize_path_separators() {
    let opts = ArgOpts {
        forward_slashes: true,
        ..ArgOpts::default()
    };
    let p = Process::new()
        .binary("tool")
        .arg_with(Path::new(r"sub\dir\file"), opts);
    assert_eq!(p.shell_command(), "tool sub/dir/file");
}

#[test]
fn debug_gated_args_are_dropped_when_logging_is_quiet() {
    let opts = ArgOpts {
        gate: ArgGate::DebugOnly,
        ..ArgOpts::default()
    };
    let p = Process::new().binary("tool").arg_with("-v", opts);
    assert_eq!(p.shell_command(), "tool");
}

#[test]
fn quiet_gated_args_are_kept_when_logging_is_quiet() {
    let opts = ArgOpts {
        gate: ArgGate::QuietOnly,
        ..ArgOpts::default()
    };
    let p = Process::new().binary("tool").arg_with("-quiet", opts);
    assert_eq!(p.shell_command(), "tool -quiet");
}

#[test]
fn shell_quote_passes_plain_words_and_quotes_the_rest() {
    assert_eq!(shell_quote("plain-word_1.0/x"), "plain-word_1.0/x");
    assert_eq!(shell_quote("two words"), "'two words'");
    assert_eq!(shell_quote(""), "''");
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
}

#[test]
fn raw_commands_render_verbatim() {
    let p = Process::raw("cat in.txt | sort -u > out.txt");
    assert_eq!(p.shell_command(), "cat in.txt | sort -u > out.txt");
}
