//! # Test Utilities
//!
//! Helpers for running "ui tests", or executing forth code at test time.
//!
//! ## UI Tests
//!
//! Each line of a ui test is one of:
//!
//! * Frontmatter, before any other non-comment line. Currently accepted:
//!     * `( prelude BOOL )`: whether to load [`PRELUDE`] first (default `true`)
//! * Comment lines, starting with `#`.
//! * Successful input lines, starting with `> ...`.
//! * Successful output lines, starting with `< ...`.
//!     * Any successful input line can have zero or more output lines
//!     * If *no* output lines are given, ANY output is accepted/ignored.
//!     * Successful input lines must not raise diagnostics.
//! * Input lines that must raise at least one diagnostic, starting with `! ...`.
//! * Unsuccessful input lines, starting with `x ...`. The machine must stop
//!   with a fatal error. There is no way to specify which error yet.
//!
//! Every input line is fed to the same machine, followed by a newline.
//!
//! ### Example
//!
//! ```rust
//! # use forth16::testutil::blocking_runtest;
//! #
//! # blocking_runtest(r#"
//! > : star 42 emit ;
//! > star star
//! < **
//!
//! ! starb
//! x : boom [ 1 , ] ; boom
//! # "#)
//! ```
//!
//! Doctests like the one above only build with `--all-features`, since this
//! module is otherwise test-only.

use std::io::Cursor;

use crate::{Error, Forth, Halt, Params, PRELUDE};

pub type TestForth = Forth<Cursor<Vec<u8>>, Vec<u8>>;

/// A machine with empty input that writes into a `Vec`, with the prelude
/// loaded.
pub fn test_forth(params: Params) -> TestForth {
    let mut forth = Forth::new(Cursor::new(Vec::new()), Vec::new(), params).unwrap();
    load_prelude(&mut forth);
    forth
}

pub fn load_prelude(forth: &mut TestForth) {
    forth.set_input(Cursor::new(PRELUDE.as_bytes().to_vec()));
    assert_eq!(forth.run(), Ok(Halt::EndOfInput));
    assert!(forth.take_diagnostics().is_empty());
}

/// Run `src` to the end, returning everything it printed.
pub fn eval(forth: &mut TestForth, src: &str) -> Result<String, Error> {
    forth.output_mut().clear();
    forth.set_input(Cursor::new(src.as_bytes().to_vec()));
    let halt = forth.run()?;
    assert_eq!(halt, Halt::EndOfInput);
    Ok(String::from_utf8_lossy(forth.output()).into_owned())
}

/// Run the given forth ui test against a fresh VM.
///
/// Does accept frontmatter (see above).
pub fn blocking_runtest(contents: &str) {
    blocking_runtest_params(contents, Params::default())
}

/// Like [`blocking_runtest`], with the given VM settings.
pub fn blocking_runtest_params(contents: &str, params: Params) {
    let tokd = tokenize(contents, true).unwrap();
    let mut forth = Forth::new(Cursor::new(Vec::new()), Vec::new(), params).unwrap();
    if tokd.prelude {
        load_prelude(&mut forth);
    }
    blocking_steps_with(&tokd.steps, &mut forth);
}

/// Run the given forth ui-test against the given forth vm.
///
/// Does not accept ui-tests with frontmatter configuration (will panic)
pub fn blocking_runtest_with(forth: &mut TestForth, contents: &str) {
    let tokd = tokenize(contents, false).unwrap();
    blocking_steps_with(&tokd.steps, forth);
}

fn check_output(res: Result<Halt, Error>, outcome: &Outcome, forth: &mut TestForth) {
    let output = String::from_utf8_lossy(forth.output()).into_owned();
    let diags = forth.take_diagnostics();
    println!("< {output}");
    match (res, outcome) {
        (Ok(Halt::EndOfInput), Outcome::OkAnyOutput) if diags.is_empty() => {}
        (Ok(Halt::EndOfInput), Outcome::OkWithOutput(exp)) if diags.is_empty() => {
            let act_lines = output.lines().collect::<Vec<&str>>();
            assert_eq!(act_lines.len(), exp.len(), "output: {output:?}");
            act_lines.iter().zip(exp.iter()).for_each(|(a, e)| {
                assert_eq!(a.trim_end(), e.trim_end());
            })
        }
        (Ok(Halt::EndOfInput), Outcome::Diagnostic) if !diags.is_empty() => {}
        (Err(_e), Outcome::FatalError) => {}
        (res, exp) => {
            eprintln!("Error!");
            eprintln!("Expected: {exp:?}");
            eprintln!("Got: {res:?}");
            eprintln!("Diagnostics: {diags:?}");
            eprintln!("Output:\n{output}");
            panic!();
        }
    }
}

// Runs the given steps against the given forth VM.
//
// Panics on any mismatch
fn blocking_steps_with(steps: &[Step], forth: &mut TestForth) {
    for Step { input, output: outcome } in steps {
        println!("> {input}");
        forth.output_mut().clear();
        forth.set_input(Cursor::new(format!("{input}\n").into_bytes()));
        let res = forth.run();
        check_output(res, outcome, forth);
    }
}

#[derive(Debug)]
enum Outcome {
    OkAnyOutput,
    OkWithOutput(Vec<String>),
    Diagnostic,
    FatalError,
}

#[derive(Debug)]
struct Step {
    input: String,
    output: Outcome,
}

#[derive(Debug)]
struct Tokenized {
    prelude: bool,
    steps: Vec<Step>,
}

fn tokenize(contents: &str, allow_frontmatter: bool) -> Result<Tokenized, ()> {
    let mut output = Tokenized {
        prelude: true,
        steps: Vec::new(),
    };
    let mut frontmatter_done = !allow_frontmatter;

    for line in contents.lines() {
        let (tok, remain) = if let Some(t) = line.trim_start().split_once(' ') {
            t
        } else {
            continue;
        };

        match tok {
            ">" | "!" | "x" => {
                frontmatter_done = true;
                output.steps.push(Step {
                    input: remain.to_string(),
                    output: match tok {
                        ">" => Outcome::OkAnyOutput,
                        "!" => Outcome::Diagnostic,
                        _ => Outcome::FatalError,
                    },
                });
            }
            "<" => {
                frontmatter_done = true;
                let cur_step = output.steps.last_mut().ok_or(())?;
                let expected_out = remain.to_string();
                match &mut cur_step.output {
                    Outcome::OkAnyOutput => {
                        cur_step.output = Outcome::OkWithOutput(vec![expected_out]);
                    }
                    Outcome::OkWithOutput(o) => o.push(expected_out),
                    Outcome::Diagnostic => panic!("Diagnostic lines can't set output"),
                    Outcome::FatalError => panic!("Fatal error can't set output"),
                }
            }
            "(" => {
                let mut split = remain.split_whitespace();
                match split.next() {
                    Some("prelude") => {
                        assert!(!frontmatter_done, "Unexpected frontmatter settings!");
                        output.prelude = split.next().unwrap().parse::<bool>().unwrap();
                        assert_eq!(Some(")"), split.next());
                    }
                    _ => panic!("Unknown frontmatter: {line}"),
                }
            }
            _ => {}
        }
    }

    Ok(output)
}
