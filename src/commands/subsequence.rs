//! [`Subsequence`] and [`EndSubsequence`]: markers delimiting a named range
//! of commands that `LOOP` can replay.
//!
//! ```text
//! SUBSEQUENCE reboot
//! reboot ; 5
//! WAIT 2m
//! ENDSUBSEQUENCE
//! LOOP reboot 10
//! ```
//!
//! The commands between the markers still run once in place. The markers
//! themselves are consumed by the parser and never executed.

use crate::command::{BuiltinCommand, Context, Region};
use crate::error::{CommandError, SyntaxError};
use async_trait::async_trait;

pub struct Subsequence {
    pub symbol: String,
}

pub struct EndSubsequence;

impl Subsequence {
    pub const NAME: &'static str = "SUBSEQUENCE";
    pub const USAGE: &'static str = "SUBSEQUENCE <symbol> ... ENDSUBSEQUENCE";
    pub const DESCRIPTION: &'static str = "start a named range of commands";
    pub const ARGC: &'static [usize] = &[1];
}

impl EndSubsequence {
    pub const NAME: &'static str = "ENDSUBSEQUENCE";
    pub const USAGE: &'static str = "SUBSEQUENCE <symbol> ... ENDSUBSEQUENCE";
    pub const DESCRIPTION: &'static str = "end the open named range of commands";
    pub const ARGC: &'static [usize] = &[0];
}

#[async_trait(?Send)]
impl BuiltinCommand for Subsequence {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn parse(args: &[String]) -> Result<Self, SyntaxError> {
        Ok(Self {
            symbol: args[0].clone(),
        })
    }

    fn is_sequenced(&self) -> bool {
        false
    }

    fn region(&self) -> Option<Region> {
        Some(Region::Open(self.symbol.clone()))
    }

    async fn execute(&self, _ctx: &mut Context<'_>) -> Result<String, CommandError> {
        Ok(String::new())
    }
}

#[async_trait(?Send)]
impl BuiltinCommand for EndSubsequence {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn parse(_args: &[String]) -> Result<Self, SyntaxError> {
        Ok(Self)
    }

    fn is_sequenced(&self) -> bool {
        false
    }

    fn region(&self) -> Option<Region> {
        Some(Region::Close)
    }

    async fn execute(&self, _ctx: &mut Context<'_>) -> Result<String, CommandError> {
        Ok(String::new())
    }
}
