//! Script-side shim: runs user scripts inside the sandbox.
//!
//! The worker spawns one `python3` child per execution. A prelude injected
//! ahead of the user script defines the execution contract in the script's
//! namespace:
//!
//! - `settings.get(key)` / `settings.keys()` - credential values injected as
//!   environment variables at child spawn
//! - `llm.complete(prompt, model="default")` - suspends the script until the
//!   host supplies a response
//! - `set_result(value)` - stores the structured execution result
//!
//! The prelude talks to the worker over a Unix domain socket with one JSON
//! object per line: `llm_request`, `done`, and `error` events flow out of the
//! script; `{"response": ...}` lines flow back into a blocked
//! `llm.complete`. The language-level pause never crosses the process
//! boundary - the worker only ever sees the event stream.

pub mod protocol;

#[cfg(unix)]
mod runner;
#[cfg(unix)]
pub use runner::{ScriptRun, ScriptStep, ShimError};
