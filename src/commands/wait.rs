//! [`Wait`] command: pauses the sequence for a fixed duration.
//!
//! Sequence syntax: `WAIT 5s`, `WAIT 1h30m` or `WAIT 90`

use crate::command::{BuiltinCommand, Context};
use crate::error::{CommandError, SyntaxError};
use crate::parser::parse_duration;
use async_trait::async_trait;
use log::debug;
use std::time::Duration;

/// Pauses execution for a fixed duration before running the next command.
pub struct Wait {
    pub duration: Duration,
}

impl Wait {
    pub const NAME: &'static str = "WAIT";
    pub const USAGE: &'static str = "WAIT <time>";
    pub const DESCRIPTION: &'static str = "sleep for the given time, e.g. 5s, 2m30s, 1h";
    pub const ARGC: &'static [usize] = &[1];
}

#[async_trait(?Send)]
impl BuiltinCommand for Wait {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn parse(args: &[String]) -> Result<Self, SyntaxError> {
        Ok(Self {
            duration: parse_duration(&args[0])?,
        })
    }

    async fn execute(&self, _ctx: &mut Context<'_>) -> Result<String, CommandError> {
        debug!("waiting {:?}", self.duration);
        tokio::time::sleep(self.duration).await;
        Ok(String::new())
    }
}
