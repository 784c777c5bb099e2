//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `observe`  | `Observe`        |
//! | `simulate` | `Simulate`       |
//! | `status`   | `Status`         |
//! | `config`   | `Config`         |

pub mod config;
pub mod observe;
pub mod simulate;
pub mod status;

pub use config::cmd_config;
pub use observe::cmd_observe;
pub use simulate::{SimulateArgs, cmd_simulate};
pub use status::cmd_status;
