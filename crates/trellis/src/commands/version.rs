//! `trellis version` -- print version, build info, and platform.

use anyhow::Result;
use serde::Serialize;

use crate::context::RuntimeContext;
use crate::output::output_json;

/// Build identifier, stamped via `TRELLIS_BUILD` at compile time.
const BUILD: &str = {
    match option_env!("TRELLIS_BUILD") {
        Some(b) => b,
        None => "dev",
    }
};

#[derive(Serialize)]
struct VersionInfo {
    version: &'static str,
    build: &'static str,
    os: &'static str,
    arch: &'static str,
}

impl VersionInfo {
    fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            build: BUILD,
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }
}

pub fn run(ctx: &RuntimeContext) -> Result<()> {
    let info = VersionInfo::current();

    if ctx.json {
        output_json(&info);
    } else {
        println!(
            "trellis version {} ({}) {}/{}",
            info.version, info.build, info.os, info.arch
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_reports_package_version() {
        let info = VersionInfo::current();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(!info.build.is_empty());
    }
}
