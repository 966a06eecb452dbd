//! Version command.

use anyhow::Result;
use treadle_types::API_VERSION;

use super::Context;

pub fn run(ctx: &Context) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    if ctx.json_output {
        println!(
            "{}",
            serde_json::json!({ "version": version, "apiVersion": API_VERSION })
        );
    } else {
        println!("treadle {version} ({API_VERSION})");
    }
    Ok(())
}
