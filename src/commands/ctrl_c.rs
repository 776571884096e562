//! [`CtrlC`] command: interrupts whatever runs in the session.

use crate::command::{BuiltinCommand, Context};
use crate::error::{CommandError, SyntaxError};
use async_trait::async_trait;

/// Sends an interrupt character (0x03) to the session.
pub struct CtrlC;

impl CtrlC {
    pub const NAME: &'static str = "CTRL-C";
    pub const USAGE: &'static str = "CTRL-C";
    pub const DESCRIPTION: &'static str = "send an interrupt (ctrl-c) to the current session";
    pub const ARGC: &'static [usize] = &[0];
}

#[async_trait(?Send)]
impl BuiltinCommand for CtrlC {
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
        ctx.session().interrupt().await
    }
}
