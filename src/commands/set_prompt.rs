//! [`SetPrompt`] command: changes the pattern that marks command completion.
//!
//! Sequence syntax: `SETPROMPT <pattern>`, e.g. `SETPROMPT login:` or
//! `SETPROMPT root@\w+:~#`

use crate::command::{BuiltinCommand, Context};
use crate::error::{CommandError, SyntaxError};
use crate::pattern::Pattern;
use async_trait::async_trait;
use log::info;

pub struct SetPrompt {
    pub prompt: Pattern,
}

impl SetPrompt {
    pub const NAME: &'static str = "SETPROMPT";
    pub const USAGE: &'static str = "SETPROMPT <prompt>";
    pub const DESCRIPTION: &'static str = "set the prompt that marks the end of a command";
    pub const ARGC: &'static [usize] = &[1];
}

#[async_trait(?Send)]
impl BuiltinCommand for SetPrompt {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn parse(args: &[String]) -> Result<Self, SyntaxError> {
        Ok(Self {
            prompt: Pattern::new(args[0].as_str()),
        })
    }

    async fn execute(&self, ctx: &mut Context<'_>) -> Result<String, CommandError> {
        info!("prompt set to `{}`", self.prompt);
        ctx.session().set_prompt(self.prompt.clone());
        Ok(String::new())
    }
}
