//! verax CLI binary
//!
//! Minimal entrypoint; all logic lives in the library. cli::run() handles
//! every output path including errors and returns the exit code to map.

fn main() {
    if let Err(code) = verax::cli::run() {
        std::process::exit(code.as_i32());
    }
}
