use std::{fmt, str::FromStr};

use nom::{
    Finish, IResult, Parser,
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, space0, u16},
    combinator::{all_consuming, opt},
    sequence::preceded,
};
use thiserror::Error;

/// A wind report in the tool-facing `"DDD @ SS G GG"` notation.
///
/// `direction` is `None` for variable (`VRB`) winds. An empty input parses to
/// the all-`None` value (calm / not reported).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindString {
    pub direction: Option<u16>,
    pub speed: Option<u16>,
    pub gust: Option<u16>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindParseError {
    #[error("malformed wind string: {0:?}")]
    Malformed(String),
    #[error("wind direction {0} out of range 0-360")]
    DirectionOutOfRange(u16),
}

impl WindString {
    pub fn is_calm(&self) -> bool {
        self.speed.unwrap_or(0) == 0
    }
}

pub fn nom_wind_string(input: &str) -> IResult<&str, WindString> {
    alt((nom_variable_wind, nom_steady_wind)).parse(input)
}

fn nom_variable_wind(input: &str) -> IResult<&str, WindString> {
    (preceded(tag("VRB"), nom_at_speed), opt(nom_gust))
        .map(|(speed, gust)| WindString {
            direction: None,
            speed: Some(speed),
            gust,
        })
        .parse(input)
}

fn nom_steady_wind(input: &str) -> IResult<&str, WindString> {
    (u16, nom_at_speed, opt(nom_gust))
        .map(|(direction, speed, gust)| WindString {
            direction: Some(direction),
            speed: Some(speed),
            gust,
        })
        .parse(input)
}

fn nom_at_speed(input: &str) -> IResult<&str, u16> {
    preceded((space0, char('@'), space0), u16).parse(input)
}

fn nom_gust(input: &str) -> IResult<&str, u16> {
    preceded((space0, char('G'), space0), u16).parse(input)
}

impl FromStr for WindString {
    type Err = WindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(WindString::default());
        }
        let (_, wind) = all_consuming(nom_wind_string)
            .parse(trimmed)
            .finish()
            .map_err(|_| WindParseError::Malformed(s.to_string()))?;
        if let Some(dir) = wind.direction
            && dir > 360
        {
            return Err(WindParseError::DirectionOutOfRange(dir));
        }
        Ok(wind)
    }
}

/// Canonical formatter; `parse` of the output round-trips to the same value.
impl fmt::Display for WindString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.direction, self.speed) {
            (None, None) => Ok(()),
            (None, Some(speed)) => {
                write!(f, "VRB @ {}", speed)?;
                self.fmt_gust(f)
            }
            (Some(dir), speed) => {
                write!(f, "{:03} @ {}", dir, speed.unwrap_or(0))?;
                self.fmt_gust(f)
            }
        }
    }
}

impl WindString {
    fn fmt_gust(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gust {
            Some(gust) => write!(f, " G {}", gust),
            None => Ok(()),
        }
    }
}
