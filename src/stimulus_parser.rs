// Copyright 2026 Cornell University
// released under MIT License

use pest::{error::InputLocation, iterators::Pair, Parser};
use pest_derive::Parser;
use thiserror::Error;

use crate::diagnostic::*;
use crate::sequence::{BusOp, Stimulus};

#[derive(Parser)]
#[grammar = "stimulus.pest"]
struct StimulusParser;

#[derive(Error, Debug)]
pub enum StimulusError {
    #[error("failed to load stimulus file: {0}")]
    Load(#[from] std::io::Error),
    /// Already reported through the `DiagnosticHandler`
    #[error("{0}")]
    Syntax(String),
}

/// Parses a stimulus file (specified at `filepath`) using a particular `DiagnosticHandler`
pub fn parse_stimulus_file(
    filepath: impl AsRef<std::path::Path>,
    handler: &mut DiagnosticHandler,
) -> Result<Stimulus, StimulusError> {
    let filename = filepath.as_ref().to_string_lossy().to_string();
    let input = std::fs::read_to_string(filepath)?;
    parse_stimulus(&filename, &input, handler)
}

/// Parses stimulus text, registering it with `handler` under `filename`
pub fn parse_stimulus(
    filename: &str,
    input: &str,
    handler: &mut DiagnosticHandler,
) -> Result<Stimulus, StimulusError> {
    let fileid = handler.add_file(filename.to_string(), input.to_string());

    let file = match StimulusParser::parse(Rule::file, input) {
        Ok(mut pairs) => pairs.next(),
        Err(err) => {
            // Handle lexing errors
            let (start, end) = match err.location {
                InputLocation::Pos(start) => (start, start),
                InputLocation::Span(span) => span,
            };
            let msg = format!("Lexing failed: {}", err.variant.message());
            handler.emit_diagnostic_lexing(&msg, fileid, start, end, Level::Error);
            return Err(StimulusError::Syntax(msg));
        }
    };

    let mut stimulus = Stimulus::new();
    for op_pair in file.into_iter().flat_map(|f| f.into_inner()) {
        if op_pair.as_rule() != Rule::operation {
            continue;
        }
        let span = op_pair.as_span();
        let loc = SourceLoc {
            file_id: fileid,
            start: span.start(),
            end: span.end(),
        };
        let op = parse_operation(op_pair, handler, fileid)?;
        stimulus.push_at(op, loc);
    }
    Ok(stimulus)
}

/// Number of arguments each operation takes
fn arity(name: &str) -> Option<usize> {
    match name {
        "poll" | "read" | "check" | "delay" | "expect" => Some(1),
        "write" | "cover" => Some(2),
        _ => None,
    }
}

fn parse_operation(
    op_pair: Pair<Rule>,
    handler: &mut DiagnosticHandler,
    fileid: usize,
) -> Result<BusOp, StimulusError> {
    let mut inner = op_pair.clone().into_inner();

    // First element is always the operation name
    let Some(name_pair) = inner.next() else {
        return Err(error_at("Missing operation name", &op_pair, handler, fileid));
    };
    let name = name_pair.as_str();
    let Some(expected) = arity(name) else {
        let msg = format!("Unknown operation `{name}`");
        return Err(error_at(&msg, &name_pair, handler, fileid));
    };

    let mut args = vec![];
    if let Some(arglist) = inner.next() {
        for arg in arglist.into_inner() {
            args.push(parse_arg(arg, handler, fileid)?);
        }
    }
    if args.len() != expected {
        let msg = format!(
            "`{name}` expects {expected} argument(s) but found {}",
            args.len()
        );
        return Err(error_at(&msg, &op_pair, handler, fileid));
    }

    let op = match (name, args.as_slice()) {
        ("poll", &[address]) => BusOp::Poll { address },
        ("write", &[value, address]) => BusOp::Write { value, address },
        ("read", &[address]) => BusOp::Read {
            address,
            verify: false,
        },
        ("check", &[address]) => BusOp::Read {
            address,
            verify: true,
        },
        ("delay", &[ns]) => BusOp::Delay(ns),
        ("expect", &[value]) => BusOp::Expect(value),
        ("cover", &[a, b]) => BusOp::CoverInputs { a, b },
        _ => {
            let msg = format!("Unsupported operation `{name}`");
            return Err(error_at(&msg, &op_pair, handler, fileid));
        }
    };
    Ok(op)
}

/// Parses one integer literal in decimal, `0b` binary or `0x` hex notation
fn parse_arg(
    arg_pair: Pair<Rule>,
    handler: &mut DiagnosticHandler,
    fileid: usize,
) -> Result<u64, StimulusError> {
    let Some(literal) = arg_pair.clone().into_inner().next() else {
        return Err(error_at("Missing argument", &arg_pair, handler, fileid));
    };
    let text = literal.as_str();
    let (digits, radix) = match literal.as_rule() {
        Rule::binary_integer => (&text[2..], 2),
        Rule::hex_integer => (&text[2..], 16),
        Rule::decimal_integer => (text, 10),
        other => {
            let msg = format!("Unexpected argument type: {:?}", other);
            return Err(error_at(&msg, &literal, handler, fileid));
        }
    };
    u64::from_str_radix(&digits.replace('_', ""), radix).map_err(|e| {
        let msg = format!("Invalid integer '{}': {}", text, e);
        error_at(&msg, &literal, handler, fileid)
    })
}

fn error_at(
    msg: &str,
    pair: &Pair<Rule>,
    handler: &mut DiagnosticHandler,
    fileid: usize,
) -> StimulusError {
    handler.emit_diagnostic_parsing(msg, fileid, pair, Level::Error);
    StimulusError::Syntax(msg.to_string())
}
