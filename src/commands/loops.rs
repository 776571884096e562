//! [`Loop`] command: replays a named subsequence.
//!
//! Sequence syntax: `LOOP <symbol> <count>`. The symbol must be defined by a
//! `SUBSEQUENCE` block earlier in the same file.

use crate::command::{BuiltinCommand, Context};
use crate::error::{CommandError, SyntaxError};
use async_trait::async_trait;

pub struct Loop {
    pub symbol: String,
    pub loops: u32,
}

impl Loop {
    pub const NAME: &'static str = "LOOP";
    pub const USAGE: &'static str = "LOOP <symbol> <loops>";
    pub const DESCRIPTION: &'static str = "run a named subsequence a number of times";
    pub const ARGC: &'static [usize] = &[2];
}

#[async_trait(?Send)]
impl BuiltinCommand for Loop {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn parse(args: &[String]) -> Result<Self, SyntaxError> {
        let loops = args[1].parse().map_err(|_| SyntaxError::InvalidValue {
            what: "loop count",
            value: args[1].clone(),
        })?;
        Ok(Self {
            symbol: args[0].clone(),
            loops,
        })
    }

    fn references(&self) -> Option<&str> {
        Some(&self.symbol)
    }

    async fn execute(&self, ctx: &mut Context<'_>) -> Result<String, CommandError> {
        ctx.run_subsequence(&self.symbol, self.loops).await
    }
}
