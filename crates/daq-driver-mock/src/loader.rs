//! File-backed [`ConfigLoader`].
//!
//! Register sets are stored as TOML, one file per front end:
//!
//! ```toml
//! name = "fei4b_0x00"
//! hit_disc_cnfg = 0
//! plsr_dac = 320
//! disabled_pixels = [[1, 1], [80, 336]]
//! ```

use daq_core::driver::{ConfigLoader, ConfigSet};
use daq_core::error::DaqError;
use daq_core::limits::{N_COL, N_ROW};
use std::path::Path;
use tracing::debug;

/// Loads [`ConfigSet`]s from TOML files.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlConfigLoader;

impl ConfigLoader for TomlConfigLoader {
    type Error = DaqError;

    fn load_from_file(&self, path: &Path) -> Result<ConfigSet, DaqError> {
        let text = std::fs::read_to_string(path)?;
        let set: ConfigSet = toml::from_str(&text).map_err(|e| {
            DaqError::Configuration(format!(
                "front-end config {}: {}",
                path.display(),
                e.message()
            ))
        })?;

        if set.hit_disc_cnfg > 2 {
            return Err(DaqError::Configuration(format!(
                "front-end config {}: hit_disc_cnfg {} out of range 0..=2",
                path.display(),
                set.hit_disc_cnfg
            )));
        }
        if let Some((col, row)) = set.disabled_pixels.iter().find(|(c, r)| {
            !(1..=N_COL as u16).contains(c) || !(1..=N_ROW as u16).contains(r)
        }) {
            return Err(DaqError::Configuration(format!(
                "front-end config {}: pixel ({}, {}) outside the matrix",
                path.display(),
                col,
                row
            )));
        }

        debug!(path = %path.display(), name = %set.name, "Loaded front-end config");
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
            name = "fe0"
            hit_disc_cnfg = 1
            plsr_dac = 250
            disabled_pixels = [[3, 4]]
            "#,
        );
        let set = TomlConfigLoader.load_from_file(file.path()).unwrap();
        assert_eq!(set.name, "fe0");
        assert_eq!(set.hit_disc_cnfg, 1);
        assert_eq!(set.plsr_dac, 250);
        assert_eq!(set.trig_count, ConfigSet::default().trig_count);
        assert_eq!(set.disabled_pixels, vec![(3, 4)]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = TomlConfigLoader
            .load_from_file(Path::new("/nonexistent/fe0.toml"))
            .unwrap_err();
        assert!(matches!(err, DaqError::Io(_)));
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let file = write_config("plsr_dac = \"high\"");
        let err = TomlConfigLoader.load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let file = write_config("hit_disc_cnfg = 3");
        assert!(TomlConfigLoader.load_from_file(file.path()).is_err());

        let file = write_config("disabled_pixels = [[0, 1]]");
        assert!(TomlConfigLoader.load_from_file(file.path()).is_err());
    }
}
