//! [`Close`] command: tears down the current session.

use crate::command::{BuiltinCommand, Context};
use crate::error::{CommandError, SyntaxError};
use async_trait::async_trait;

/// Closes the session. The next shell command opens a new one.
pub struct Close;

impl Close {
    pub const NAME: &'static str = "CLOSE";
    pub const USAGE: &'static str = "CLOSE";
    pub const DESCRIPTION: &'static str = "close the current session";
    pub const ARGC: &'static [usize] = &[0];
}

#[async_trait(?Send)]
impl BuiltinCommand for Close {
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
        ctx.session().close().await;
        Ok(String::new())
    }
}
