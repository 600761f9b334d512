//! `-v`/`--verbose` and `WEBAPP_LOG_LEVEL`.

use clap::{builder::ValueParser, Arg, ArgAction, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level per verbosity count. Warnings are on by default so the generated
/// admin password reaches the operator.
const LEVELS: [Level; 4] = [Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];

/// Level for a verbosity count, saturating at `TRACE`.
#[must_use]
pub fn level(verbosity: u8) -> Level {
    LEVELS[usize::from(verbosity).min(LEVELS.len() - 1)]
}

/// Accepts a level name or its count, `warn`/`0` through `trace`/`3`.
fn parse_verbosity(value: &str) -> Result<u8, String> {
    let value = value.trim();
    let position = match value.parse::<usize>() {
        Ok(count) => (count < LEVELS.len()).then_some(count),
        Err(_) => LEVELS
            .iter()
            .position(|level| level.as_str().eq_ignore_ascii_case(value)),
    };
    position
        .and_then(|count| u8::try_from(count).ok())
        .ok_or_else(|| format!("invalid log level {value:?}, expected warn, info, debug or trace"))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Increase verbosity: -v INFO, -vv DEBUG, -vvv TRACE (default: WARN)")
            .env("WEBAPP_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(ValueParser::from(parse_verbosity)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_map_to_levels() {
        assert_eq!(level(0), Level::WARN);
        assert_eq!(level(1), Level::INFO);
        assert_eq!(level(2), Level::DEBUG);
        assert_eq!(level(3), Level::TRACE);
        assert_eq!(level(9), Level::TRACE);
    }

    #[test]
    fn names_and_counts_parse() {
        assert_eq!(parse_verbosity("WARN"), Ok(0));
        assert_eq!(parse_verbosity(" debug "), Ok(2));
        assert_eq!(parse_verbosity("3"), Ok(3));
        assert!(parse_verbosity("4").is_err());
        assert!(parse_verbosity("error").is_err());
        assert!(parse_verbosity("loud").is_err());
    }
}
