//! Version command implementation.

use crate::error::Result;
use crate::index::SUPPORTED_EXTENSIONS;
use crate::storage::schema::CURRENT_SCHEMA_VERSION;
use serde::Serialize;

#[derive(Serialize)]
struct VersionOutput<'a> {
    version: &'a str,
    build: &'a str,
    schema_version: i32,
    image_formats: &'a [&'a str],
}

/// Execute the version command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let output = VersionOutput {
        version: env!("CARGO_PKG_VERSION"),
        build: if cfg!(debug_assertions) { "dev" } else { "release" },
        schema_version: CURRENT_SCHEMA_VERSION,
        image_formats: SUPPORTED_EXTENSIONS,
    };

    if json {
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("atlas {} ({})", output.version, output.build);
    println!("index schema v{}, atlas formats: {}", output.schema_version, output.image_formats.join(", "));
    Ok(())
}
