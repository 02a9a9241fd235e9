// Core of the procmon process supervisor: dependency-ordered startup,
// lockfile-based liveness and control, and a mutually-monitoring pair of
// supervisor instances.
pub mod config;
pub mod control;
pub mod engine;
pub mod errors;
pub mod lockfile;
pub mod logger;
pub mod monitor;
pub mod resolver;
pub mod supervisor;
pub mod table;
pub mod timestamp;

// tests
#[path = "../src/tests/lockfile_test.rs"]
mod lockfile_test;

#[path = "../src/tests/config_test.rs"]
mod config_test;

#[path = "../src/tests/resolver_test.rs"]
mod resolver_test;

#[path = "../src/tests/timestamp_test.rs"]
mod timestamp_test;

#[path = "../src/tests/control_test.rs"]
mod control_test;

#[path = "../src/tests/engine_test.rs"]
mod engine_test;

#[path = "../src/tests/monitor_test.rs"]
mod monitor_test;
