//! voxpair server binary.
//! Run with: cargo run --bin voxpair-server

use std::process::ExitCode;

use voxpair::start_voxpair;

fn main() -> ExitCode {
    start_voxpair::run()
}
