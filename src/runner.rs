//! Wires a [`ScanConfig`] to the mock board and the scan orchestrator.

use crate::config::ScanConfig;
use anyhow::{Context, Result};
use daq_driver_mock::{MockBoard, TomlConfigLoader};
use daq_experiment::{build_scan, Hardware, ScanOrchestrator, ScanReport};
use daq_processing::AnalysisResult;
use std::fmt::Write as _;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Build the simulated readout board described by the `mock` section.
pub fn build_board(config: &ScanConfig) -> Result<MockBoard> {
    let mock = &config.mock;
    let mut builder = MockBoard::builder()
        .channels(config.mock_channels())
        .mode(mock.mode)
        .simulation(mock.simulation())
        .error_config(mock.error_config()?);
    if let Some(seed) = mock.seed {
        builder = builder.seed(seed);
    }
    Ok(builder.build())
}

/// Run the configured scan to completion on a mock board.
///
/// Blocking; call from a dedicated thread when an async runtime is involved.
pub fn run_scan(config: &ScanConfig, cancel: CancellationToken) -> Result<ScanReport> {
    config.validate().context("Invalid scan configuration")?;

    let board = build_board(config)?;
    info!(channels = ?board.channels(), mode = ?config.mock.mode, "Mock board ready");

    let mut scan = build_scan(&config.scan_settings());
    let mut orchestrator = ScanOrchestrator::new(
        config.orchestrator_config(),
        Hardware::new(board.tx(), board.rx()),
        TomlConfigLoader,
    )
    .with_cancel_token(cancel);

    let report = orchestrator
        .execute(scan.as_mut())
        .with_context(|| format!("{} failed", scan.name()))?;

    let counts = board.counters();
    info!(
        triggers = counts.triggers,
        tx_disable = counts.tx_disable,
        rx_disable = counts.rx_disable,
        "Board released"
    );
    Ok(report)
}

/// Human-readable summary printed by the CLI after a scan.
pub fn render_report(report: &ScanReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Scan: {}", report.scan);
    let _ = writeln!(
        out,
        "Fragments: {} read, {} decoded ({} events, {} hits, {} skipped words)",
        report.readout.produced,
        report.processing.consumed,
        report.decode.events,
        report.decode.hits,
        report.decode.orphan_records + report.decode.unknown_words,
    );
    if report.discarded > 0 {
        let _ = writeln!(out, "Discarded at teardown: {}", report.discarded);
    }
    let _ = writeln!(out);

    for outcome in &report.channels {
        let _ = writeln!(
            out,
            "Channel {}: {} histograms",
            outcome.channel, outcome.histogram.produced
        );
        for result in &outcome.results {
            match result {
                AnalysisResult::Tot(tot) => {
                    let _ = writeln!(
                        out,
                        "  ToT: {} pixels, mean {:.2}, sigma {:.2}",
                        tot.pixels_with_hits, tot.mean_of_means, tot.mean_sigma
                    );
                }
                AnalysisResult::Occupancy(occ) => {
                    let _ = writeln!(
                        out,
                        "  Occupancy: expected {}, {} bad pixels",
                        occ.expected, occ.bad_pixels
                    );
                }
                AnalysisResult::Histogram(_) => {}
            }
        }
    }

    let _ = writeln!(out);
    let _ = write!(out, "{}", report.timings);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_experiment::ScanKind;

    fn small_scan(kind: ScanKind) -> ScanConfig {
        let mut config = ScanConfig::default();
        config.scan.kind = kind;
        config.scan.mask_stages = 2;
        config.scan.injections = 1;
        config.mock.seed = Some(7);
        config
    }

    #[test]
    fn test_run_digital_scan() {
        let report = run_scan(&small_scan(ScanKind::Digital), CancellationToken::new()).unwrap();
        assert_eq!(report.scan, "digital_scan");
        assert_eq!(report.channels.len(), 1);

        let text = render_report(&report);
        assert!(text.contains("Channel 0"));
        assert!(text.contains("Occupancy: expected 1, 0 bad pixels"));
        assert!(text.contains("Total"));
    }

    #[test]
    fn test_board_follows_tx_mask() {
        let mut config = ScanConfig::default();
        config.front_end.tx_mask = 0b110;
        let board = build_board(&config).unwrap();
        assert_eq!(board.channels(), vec![1, 2]);
    }

    #[test]
    fn test_invalid_config_fails_before_scan() {
        let mut config = small_scan(ScanKind::Tot);
        config.pipeline.analysis_channels = vec![];
        let err = run_scan(&config, CancellationToken::new()).unwrap_err();
        assert!(err.to_string().contains("Invalid scan configuration"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_scan(&small_scan(ScanKind::Tot), cancel).unwrap_err();
        let daq = err.downcast_ref::<daq_core::error::DaqError>().unwrap();
        assert!(matches!(daq, daq_core::error::DaqError::Cancelled));
    }
}
