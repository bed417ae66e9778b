use anyhow::{Context, Result};
use dalytelemetry_lib::BleLayout;
use std::path::Path;

pub const DEFAULT_LAYOUT_FILE: &str = "ble-layout.yaml";

/// Loads the BLE layout from `path`.
///
/// Without an explicit path the default file is used when it exists,
/// otherwise the built-in layout. Keys missing from the file keep their
/// built-in values.
pub fn load_layout(path: Option<&Path>) -> Result<BleLayout> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_LAYOUT_FILE).exists() => Path::new(DEFAULT_LAYOUT_FILE),
        None => {
            log::debug!("No layout file, using built-in BLE layout");
            return Ok(BleLayout::default());
        }
    };
    log::debug!("Loading BLE layout from {path:?}");
    let layout_file = std::fs::File::open(path)
        .with_context(|| format!("Cannot open BLE layout file {path:?}"))?;
    let layout: BleLayout = serde_yaml::from_reader(&layout_file)
        .with_context(|| format!("Cannot read BLE layout from file: {path:?}"))?;
    log::trace!("BLE layout: {layout:?}");
    Ok(layout)
}
