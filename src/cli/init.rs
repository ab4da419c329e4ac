use anyhow::Result;

use super::{has_flag, parse_config_flag};
use crate::core::config::{
    ControlPlaneConfig, DEFAULT_CONTROL_PLANE_TOML, DEFAULT_SATELLITE_TOML, SatelliteConfig,
    write_default,
};
use crate::core::terminal::{GuideSection, print_success, print_warn};

pub async fn run_init(args: &[String]) -> Result<()> {
    let satellite = has_flag(args, 2, "--satellite");
    let (path, content, next) = if satellite {
        (
            parse_config_flag(args, 2).unwrap_or_else(SatelliteConfig::default_path),
            DEFAULT_SATELLITE_TOML,
            "ingest-control satellite",
        )
    } else {
        (
            parse_config_flag(args, 2).unwrap_or_else(ControlPlaneConfig::default_path),
            DEFAULT_CONTROL_PLANE_TOML,
            "ingest-control serve",
        )
    };

    if write_default(&path, content).await? {
        print_success(&format!("Wrote {}", path.display()));
    } else {
        print_warn(&format!("{} already exists, leaving it alone.", path.display()));
    }

    GuideSection::new("Next")
        .status("Config", &path.display().to_string())
        .command(next, "Start with this config")
        .print();
    println!();
    Ok(())
}
