//! In-memory stand-ins for the filesystem and process seams.

mod filesystem;
mod runner;
mod scenarios;

pub use filesystem::MockFs;
pub use runner::MockRunner;
pub use scenarios::{
    CLIENTS_OUTPUT, CONFIG_OUTPUT, DATABASES_OUTPUT, POOLS_OUTPUT, VERSION_OUTPUT,
};
