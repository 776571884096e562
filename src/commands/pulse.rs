//! [`Pulse`] command: keeps an idle console from timing out.

use crate::command::{BuiltinCommand, Context, ShellCommand};
use crate::error::{CommandError, SyntaxError};
use async_trait::async_trait;

/// Prints an empty line once an hour, forever.
const KEEPALIVE: &str = "while :; do echo ''; sleep 3600; done";

/// Starts a keep-alive loop in the session without waiting for it.
pub struct Pulse;

impl Pulse {
    pub const NAME: &'static str = "PULSE";
    pub const USAGE: &'static str = "PULSE";
    pub const DESCRIPTION: &'static str = "start a keep-alive loop in the session";
    pub const ARGC: &'static [usize] = &[0];
}

#[async_trait(?Send)]
impl BuiltinCommand for Pulse {
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
        let cmd = ShellCommand::new(KEEPALIVE).fire_and_forget();
        ctx.session().run(&cmd).await
    }
}
