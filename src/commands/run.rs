//! [`Run`] and [`RunWait`] commands: start another sequence in a child worker.
//!
//! Sequence syntax: `RUN <file> [loops]` and `RUN_WAIT <file> [loops]`.
//! A relative file is looked up next to the sequence that names it.

use crate::command::{BuiltinCommand, Context};
use crate::error::{CommandError, SyntaxError};
use async_trait::async_trait;

/// Starts a child worker and continues at once.
pub struct Run {
    pub file: String,
    pub loops: u32,
}

/// Starts a child worker and waits for it to exit.
pub struct RunWait {
    pub file: String,
    pub loops: u32,
}

impl Run {
    pub const NAME: &'static str = "RUN";
    pub const USAGE: &'static str = "RUN <sequence file> [loops]";
    pub const DESCRIPTION: &'static str = "run a sequence file in a new worker";
    pub const ARGC: &'static [usize] = &[1, 2];
}

impl RunWait {
    pub const NAME: &'static str = "RUN_WAIT";
    pub const USAGE: &'static str = "RUN_WAIT <sequence file> [loops]";
    pub const DESCRIPTION: &'static str =
        "run a sequence file in a new worker and wait for it to finish";
    pub const ARGC: &'static [usize] = &[1, 2];
}

/// File and loop count. Counts below one are raised to one.
fn parse_run_args(args: &[String]) -> Result<(String, u32), SyntaxError> {
    let loops = match args.get(1) {
        Some(raw) => {
            let n: i64 = raw.parse().map_err(|_| SyntaxError::InvalidValue {
                what: "loop count",
                value: raw.clone(),
            })?;
            n.clamp(1, i64::from(u32::MAX)) as u32
        }
        None => 1,
    };
    Ok((args[0].clone(), loops))
}

#[async_trait(?Send)]
impl BuiltinCommand for Run {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn parse(args: &[String]) -> Result<Self, SyntaxError> {
        let (file, loops) = parse_run_args(args)?;
        Ok(Self { file, loops })
    }

    async fn execute(&self, ctx: &mut Context<'_>) -> Result<String, CommandError> {
        ctx.spawn_worker(&self.file, self.loops, false).await
    }
}

#[async_trait(?Send)]
impl BuiltinCommand for RunWait {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn parse(args: &[String]) -> Result<Self, SyntaxError> {
        let (file, loops) = parse_run_args(args)?;
        Ok(Self { file, loops })
    }

    async fn execute(&self, ctx: &mut Context<'_>) -> Result<String, CommandError> {
        ctx.spawn_worker(&self.file, self.loops, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_loops() {
        let run = Run::parse(&args(&["boot.seq"])).unwrap();
        assert_eq!(run.file, "boot.seq");
        assert_eq!(run.loops, 1);
    }

    #[test]
    fn test_loops_are_at_least_one() {
        assert_eq!(Run::parse(&args(&["a.seq", "0"])).unwrap().loops, 1);
        assert_eq!(RunWait::parse(&args(&["a.seq", "-4"])).unwrap().loops, 1);
        assert_eq!(RunWait::parse(&args(&["a.seq", "12"])).unwrap().loops, 12);
    }

    #[test]
    fn test_loops_must_be_numeric() {
        assert!(Run::parse(&args(&["a.seq", "many"])).is_err());
    }
}
