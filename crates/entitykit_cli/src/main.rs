//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `entitykit_core` linkage.
//! - Start file logging under the default store directory.
//! - Print where stores without an explicit location would be created.

use entitykit_core::{core_version, default_log_level, default_store_directory, init_logging};

fn main() {
    let store_dir = default_store_directory();
    let log_dir = store_dir.join("logs");
    match init_logging(default_log_level(), &log_dir) {
        Ok(()) => {
            log::info!(
                "event=cli_start module=cli status=ok version={}",
                core_version()
            );
            println!("entitykit_core log_dir={}", log_dir.display());
        }
        Err(err) => eprintln!("entitykit_core logging disabled: {err}"),
    }

    println!("entitykit_core version={}", core_version());
    println!("entitykit_core store_dir={}", store_dir.display());
}
