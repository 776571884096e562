//! [`Find`] command: searches a list of directories for a file.
//!
//! Sequence syntax: `FIND <file> <dir1,dir2,...>`. Each entry is entered with
//! `cd` (UEFI volume names such as `FS0:` and entries that already are a `cd`
//! command are sent as written). The first directory change whose output
//! mentions the file ends the search and leaves the session there.

use crate::command::{BuiltinCommand, Context, DEFAULT_BUILTIN_TIMEOUT, ShellCommand};
use crate::error::{CommandError, SyntaxError};
use crate::parser::split_list;
use crate::pattern::Pattern;
use async_trait::async_trait;
use log::{info, warn};
use regex::Regex;
use std::sync::LazyLock;

static VOLUME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^FS\d+:$").expect("static volume regex"));

pub struct Find {
    pub file: Pattern,
    pub dirs: Vec<String>,
}

impl Find {
    pub const NAME: &'static str = "FIND";
    pub const USAGE: &'static str = "FIND <file> <dir1,dir2,...>";
    pub const DESCRIPTION: &'static str = "change into the first directory containing a file";
    pub const ARGC: &'static [usize] = &[2];

    /// Command that enters `dir`.
    fn change_dir(dir: &str) -> String {
        if VOLUME.is_match(dir) || dir == "cd" || dir.starts_with("cd ") {
            dir.to_string()
        } else {
            format!("cd {dir}")
        }
    }

    /// Walk the directories. Returns whether the file was found and the
    /// output of the last directory visited.
    pub async fn search(&self, ctx: &mut Context<'_>) -> Result<(bool, String), CommandError> {
        let mut output = String::new();
        for dir in &self.dirs {
            let enter = ShellCommand::new(Self::change_dir(dir)).with_timeout(DEFAULT_BUILTIN_TIMEOUT);
            output = ctx.session().run(&enter).await?;
            if self.file.matches(&output) {
                info!("found {} in {dir}", self.file);
                return Ok((true, output));
            }
        }
        Ok((false, output))
    }
}

#[async_trait(?Send)]
impl BuiltinCommand for Find {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn parse(args: &[String]) -> Result<Self, SyntaxError> {
        let dirs = split_list(&args[1], ',');
        if dirs.is_empty() {
            return Err(SyntaxError::Usage { usage: Self::USAGE });
        }
        Ok(Self {
            file: Pattern::new(args[0].as_str()),
            dirs,
        })
    }

    async fn execute(&self, ctx: &mut Context<'_>) -> Result<String, CommandError> {
        let (found, output) = self.search(ctx).await?;
        if !found {
            warn!("{} not found in {}", self.file, self.dirs.join(", "));
        }
        Ok(output)
    }
}
