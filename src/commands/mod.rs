mod close;
mod ctrl_c;
mod enter;
mod find;
mod loops;
mod passwd;
mod pulse;
mod run;
mod set_prompt;
mod subsequence;
mod wait;

pub use close::Close;
pub use ctrl_c::CtrlC;
pub use enter::Enter;
pub use find::Find;
pub use loops::Loop;
pub use passwd::Passwd;
pub use pulse::Pulse;
pub use run::{Run, RunWait};
pub use set_prompt::SetPrompt;
pub use subsequence::{EndSubsequence, Subsequence};
pub use wait::Wait;
