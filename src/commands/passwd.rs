//! [`Passwd`] command: answers a password prompt.
//!
//! The password never reaches a log: the command is sent as a secret, which
//! also skips echo handling since terminals do not echo it.

use crate::command::{BuiltinCommand, Context, DEFAULT_BUILTIN_TIMEOUT, ShellCommand};
use crate::error::{CommandError, SyntaxError};
use async_trait::async_trait;
use log::warn;
use std::time::Duration;

/// Attempts before a missing prompt is reported.
const PASSWD_RETRY: u32 = 3;
const PASSWD_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct Passwd {
    password: String,
}

impl Passwd {
    pub const NAME: &'static str = "PASSWD";
    pub const USAGE: &'static str = "PASSWD <password>";
    pub const DESCRIPTION: &'static str = "send a password without logging it";
    pub const ARGC: &'static [usize] = &[1];
}

#[async_trait(?Send)]
impl BuiltinCommand for Passwd {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn parse(args: &[String]) -> Result<Self, SyntaxError> {
        Ok(Self {
            password: args[0].clone(),
        })
    }

    async fn execute(&self, ctx: &mut Context<'_>) -> Result<String, CommandError> {
        let cmd = ShellCommand::new(self.password.as_str())
            .with_timeout(DEFAULT_BUILTIN_TIMEOUT)
            .secret();
        let mut attempt = 1;
        loop {
            match ctx.session().run(&cmd).await {
                Err(CommandError::Timeout { .. }) if attempt < PASSWD_RETRY => {
                    warn!("no prompt after password, retrying ({attempt}/{PASSWD_RETRY})");
                    attempt += 1;
                    tokio::time::sleep(PASSWD_RETRY_DELAY).await;
                }
                result => return result,
            }
        }
    }
}
