use console::{style, StyledObject};
use std::fmt::Display;

use crate::providers::teamcity::RUNNING_STATE;

/// A build that has not settled yet.
pub fn pending(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn success(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn failure(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}

/// Web URLs of queued builds.
pub fn link(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).cyan().underlined()
}

pub fn dim(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn heading(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

/// Colours a TeamCity build state: running is pending, a missing state is a
/// failure, anything else has settled.
pub fn build_state(state: Option<&str>) -> StyledObject<String> {
    match state {
        Some(RUNNING_STATE) => pending(RUNNING_STATE),
        Some(state) => success(state),
        None => failure("unknown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_state_text() {
        assert_eq!(
            console::strip_ansi_codes(&build_state(Some("running")).to_string()),
            "running"
        );
        assert_eq!(
            console::strip_ansi_codes(&build_state(Some("finished")).to_string()),
            "finished"
        );
        assert_eq!(
            console::strip_ansi_codes(&build_state(None).to_string()),
            "unknown"
        );
    }
}
