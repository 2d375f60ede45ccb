//! CLI command implementations.
//!
//! | Module  | Commands handled |
//! |---------|------------------|
//! | `run`   | `Run`            |
//! | `serve` | `Serve`          |
//! | `goals` | `Goals`          |

pub mod goals;
pub mod run;
pub mod serve;

pub use goals::cmd_goals;
pub use run::{RunOptions, cmd_run};
pub use serve::{ServeOptions, cmd_serve};
