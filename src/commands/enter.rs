//! [`Enter`] command: sends a bare line terminator.

use crate::command::{BuiltinCommand, Context, DEFAULT_BUILTIN_TIMEOUT, ShellCommand};
use crate::error::{CommandError, SyntaxError};
use async_trait::async_trait;

/// Presses enter and waits for the prompt to come back.
pub struct Enter;

impl Enter {
    pub const NAME: &'static str = "ENTER";
    pub const USAGE: &'static str = "ENTER";
    pub const DESCRIPTION: &'static str = "send an empty line and wait for the prompt";
    pub const ARGC: &'static [usize] = &[0];
}

#[async_trait(?Send)]
impl BuiltinCommand for Enter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn parse(_args: &[String]) -> Result<Self, SyntaxError> {
        Ok(Self)
    }

    async fn execute(&self, ctx: &mut Context<'_>) -> Result<String, CommandError> {
        let cmd = ShellCommand::new("").with_timeout(DEFAULT_BUILTIN_TIMEOUT);
        ctx.session().run(&cmd).await
    }
}
