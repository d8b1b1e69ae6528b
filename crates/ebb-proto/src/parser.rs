//! A line parser for the EBB command protocol.
//!
//! Lines are tokenized with `nom` into a command code and a list of signed
//! decimal arguments, then shaped into a typed [`Command`]. Argument
//! positions in errors are 1-based, matching how the commands are
//! documented (`SM,<duration>,<axis1>,...`).

use crate::{
    commands::{Command, LowLevelAxis},
    ParseError,
};
use nom::{
    bytes::complete::take_while1,
    character::complete::{char, digit1, one_of, space0},
    combinator::{opt, recognize},
    multi::separated_list1,
    sequence::{pair, preceded},
    IResult,
};

/// The command code: one or more ASCII letters.
fn command_code(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphabetic())(input)
}

/// One signed decimal argument.
fn decimal(input: &str) -> IResult<&str, &str> {
    preceded(space0, recognize(pair(opt(one_of("+-")), digit1)))(input)
}

/// The comma-led argument tail of a line: `,123,-45,...`.
fn arg_tail(input: &str) -> IResult<&str, Vec<&str>> {
    preceded(char(','), separated_list1(char(','), decimal))(input)
}

/// Parsed argument list with 1-based accessors mirroring the firmware's
/// required/optional extraction.
struct Args {
    values: Vec<i64>,
}

impl Args {
    fn parse(tail: &str) -> Result<Self, ParseError> {
        if tail.is_empty() {
            return Ok(Self { values: Vec::new() });
        }
        let (rest, tokens) =
            arg_tail(tail).map_err(|_| ParseError::InvalidNumber { index: 1 })?;
        let mut values = Vec::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            let value: i64 = token
                .parse()
                .map_err(|_| ParseError::InvalidNumber { index: i + 1 })?;
            values.push(value);
        }
        if !rest.is_empty() {
            return Err(ParseError::InvalidNumber {
                index: values.len() + 1,
            });
        }
        Ok(Self { values })
    }

    fn required(&self, command: &'static str, index: usize) -> Result<i64, ParseError> {
        self.values
            .get(index - 1)
            .copied()
            .ok_or(ParseError::MissingParameter { command, index })
    }

    fn optional(&self, index: usize) -> Option<i64> {
        self.values.get(index - 1).copied()
    }

    fn finish(self, max: usize) -> Result<(), ParseError> {
        if self.values.len() > max {
            return Err(ParseError::TooManyParameters);
        }
        Ok(())
    }
}

fn to_u8(value: i64, index: usize) -> Result<u8, ParseError> {
    u8::try_from(value).map_err(|_| ParseError::ParameterOutsideLimit { index })
}

fn to_u32(value: i64, index: usize) -> Result<u32, ParseError> {
    u32::try_from(value).map_err(|_| ParseError::ParameterOutsideLimit { index })
}

fn to_i32(value: i64, index: usize) -> Result<i32, ParseError> {
    i32::try_from(value).map_err(|_| ParseError::ParameterOutsideLimit { index })
}

/// Parses one command line (terminator and surrounding whitespace
/// tolerated) into a typed [`Command`].
pub fn parse_line(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::EmptyCommand);
    }

    let (tail, code) =
        command_code(line).map_err(|_| ParseError::UnknownCommand(line.to_string()))?;
    let code = code.to_ascii_uppercase();
    let args = Args::parse(tail)?;

    match code.as_str() {
        "EM" => {
            let axis1 = to_u8(args.required("EM", 1)?, 1)?;
            let axis2 = args.optional(2).map(|v| to_u8(v, 2)).transpose()?;
            args.finish(2)?;
            Ok(Command::EnableMotors { axis1, axis2 })
        }
        "SM" => {
            let duration_ms = to_u32(args.required("SM", 1)?, 1)?;
            let s1 = to_i32(args.required("SM", 2)?, 2)?;
            let s2 = args.optional(3).map(|v| to_i32(v, 3)).transpose()?.unwrap_or(0);
            let s3 = args.optional(4).map(|v| to_i32(v, 4)).transpose()?.unwrap_or(0);
            args.finish(4)?;
            Ok(Command::Move {
                duration_ms,
                steps: [s1, s2, s3],
            })
        }
        "AM" => {
            let initial_rate = to_u32(args.required("AM", 1)?, 1)?;
            let final_rate = to_u32(args.required("AM", 2)?, 2)?;
            let steps1 = to_i32(args.required("AM", 3)?, 3)?;
            let steps2 = to_i32(args.required("AM", 4)?, 4)?;
            args.finish(4)?;
            Ok(Command::AccelMove {
                initial_rate,
                final_rate,
                steps1,
                steps2,
            })
        }
        "LM" => {
            let axis1 = LowLevelAxis {
                step_add: to_u32(args.required("LM", 1)?, 1)?,
                steps: to_i32(args.required("LM", 2)?, 2)?,
                step_add_inc: to_i32(args.required("LM", 3)?, 3)?,
            };
            let axis2 = LowLevelAxis {
                step_add: to_u32(args.required("LM", 4)?, 4)?,
                steps: to_i32(args.required("LM", 5)?, 5)?,
                step_add_inc: to_i32(args.required("LM", 6)?, 6)?,
            };
            args.finish(6)?;
            Ok(Command::LowLevelMove { axis1, axis2 })
        }
        "XM" => {
            let duration_ms = to_u32(args.required("XM", 1)?, 1)?;
            let steps_a = to_i32(args.required("XM", 2)?, 2)?;
            let steps_b = to_i32(args.required("XM", 3)?, 3)?;
            args.finish(3)?;
            Ok(Command::MixedMove {
                duration_ms,
                steps_a,
                steps_b,
            })
        }
        "HM" => {
            let step_rate = to_u32(args.required("HM", 1)?, 1)?;
            args.finish(1)?;
            Ok(Command::Home { step_rate })
        }
        "ES" => {
            args.finish(0)?;
            Ok(Command::EmergencyStop)
        }
        "QM" => {
            args.finish(0)?;
            Ok(Command::QueryMotors)
        }
        "QS" => {
            args.finish(0)?;
            Ok(Command::QuerySteps)
        }
        "CS" => {
            args.finish(0)?;
            Ok(Command::ClearSteps)
        }
        _ => Err(ParseError::UnknownCommand(code)),
    }
}
