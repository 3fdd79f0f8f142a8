//! Configuration file to finished scan report.

use daq_core::error::DaqError;
use daq_core::limits::N_PIXELS;
use daq_processing::AnalysisResult;
use rust_daq::config::ScanConfig;
use rust_daq::runner::{render_report, run_scan};
use std::io::Write;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn tot_scan_from_config_file() {
    let mut front_end = NamedTempFile::new().unwrap();
    writeln!(front_end, "name = \"fe_test\"\nhit_disc_cnfg = 1").unwrap();

    let file = config_file(&format!(
        r#"
[pipeline]
channel_count = 4
analysis_channels = [0, 1]

[scan]
kind = "tot"
mask_stages = 4
injections = 2

[front_end]
config_file = "{}"
tx_mask = 3
rx_mask = 3

[mock]
seed = 11
"#,
        front_end.path().display()
    ));

    let config = ScanConfig::load_from(file.path()).unwrap();
    let report = run_scan(&config, CancellationToken::new()).unwrap();

    assert_eq!(report.scan, "tot_scan");
    assert_eq!(report.channels.len(), 2);
    assert_eq!(report.discarded, 0);
    for outcome in &report.channels {
        let tot = outcome
            .results
            .iter()
            .find_map(|r| match r {
                AnalysisResult::Tot(t) => Some(*t),
                _ => None,
            })
            .unwrap();
        assert_eq!(tot.pixels_with_hits, N_PIXELS);
        // Decoded with the HitDiscCnfg the front end was configured with
        assert!((tot.mean_of_means - 7.5).abs() < 0.3, "{}", tot.mean_of_means);
    }

    let text = render_report(&report);
    assert!(text.contains("Channel 1"));
}

#[test]
fn unanalysed_channels_are_discarded() {
    let file = config_file(
        r#"
[pipeline]
channel_count = 2
analysis_channels = [0]

[scan]
kind = "digital"
mask_stages = 2
injections = 1

[front_end]
tx_mask = 3
rx_mask = 3
"#,
    );

    let config = ScanConfig::load_from(file.path()).unwrap();
    let report = run_scan(&config, CancellationToken::new()).unwrap();
    assert_eq!(report.channels.len(), 1);
    // Channel 1 has an event queue but no consumer
    assert!(report.discarded > 0);
    assert!(report.channel(1).is_none());
}

#[test]
fn configured_fault_aborts_scan() {
    let file = config_file(
        r#"
[scan]
kind = "digital"
mask_stages = 2
injections = 1

[mock.fault]
operation = "read_data"
after = 0
"#,
    );

    let config = ScanConfig::load_from(file.path()).unwrap();
    let err = run_scan(&config, CancellationToken::new()).unwrap_err();
    let daq = err.downcast_ref::<DaqError>().unwrap();
    assert!(daq.is_hardware(), "{daq}");
}

#[test]
fn malformed_config_is_rejected() {
    let file = config_file("[pipeline]\nchannel_count = \"many\"\n");
    assert!(ScanConfig::load_from(file.path()).is_err());
}
