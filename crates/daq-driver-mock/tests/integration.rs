//! Integration tests for the mock readout board
//!
//! Exercises the board only through the public driver traits, the way the
//! orchestrator drives it.

use daq_core::driver::{channel_mask, ConfigLoader, FrontEndCommand, RxCore, TxCore};
use daq_core::error::DriverErrorKind;
use daq_core::fei4::{decode, Fei4Word};
use daq_core::limits::N_PIXELS;
use daq_driver_mock::*;
use std::io::Write;

/// A register set loaded from TOML reaches the front end unchanged
#[test]
fn test_loaded_register_set_reaches_front_end() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "name = \"fe_a\"\nhit_disc_cnfg = 2\nplsr_dac = 250\ntrig_count = 3\ndisabled_pixels = [[1, 1]]"
    )
    .unwrap();
    let set = TomlConfigLoader.load_from_file(file.path()).unwrap();

    let board = MockBoard::builder().channels([0, 1]).build();
    let tx = board.tx();
    tx.enable(channel_mask([0])).unwrap();
    for command in set.to_commands() {
        tx.send(command).unwrap();
    }

    let fe = board.front_end(0).unwrap();
    assert_eq!(fe.plsr_dac, 250);
    assert_eq!(fe.hit_disc_cnfg, 2);
    assert_eq!(fe.trig_count, 3);
    // Channel 1 was not in the mask
    assert_eq!(board.front_end(1).unwrap().plsr_dac, 0);
}

/// Disabled pixels stay silent; every trigger still yields its headers
#[test]
fn test_disabled_pixel_only_sends_headers() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "trig_count = 3\ndisabled_pixels = [[1, 1]]").unwrap();
    let set = TomlConfigLoader.load_from_file(file.path()).unwrap();

    let board = MockBoard::new();
    let (tx, rx) = (board.tx(), board.rx());
    tx.enable(channel_mask([0])).unwrap();
    rx.enable(channel_mask([0])).unwrap();
    for command in set.to_commands() {
        tx.send(command).unwrap();
    }
    // Only pixel (1, 1) is in mask stage 0
    tx.send(FrontEndCommand::SetMaskStage {
        stage: 0,
        total: N_PIXELS as u32,
    })
    .unwrap();
    tx.send(FrontEndCommand::RunMode(true)).unwrap();
    tx.send(FrontEndCommand::Trigger { count: 1 }).unwrap();

    let fragment = rx.read_data().unwrap().unwrap();
    assert_eq!(fragment.words.len(), 3);
    assert!(fragment
        .words
        .iter()
        .all(|w| matches!(decode(*w), Fei4Word::Header { .. })));
    assert!(rx.read_data().unwrap().is_none());
}

/// Out-of-matrix pixels are rejected by the loader
#[test]
fn test_loader_rejects_pixel_outside_matrix() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "disabled_pixels = [[81, 1]]").unwrap();
    assert!(TomlConfigLoader.load_from_file(file.path()).is_err());
}

/// Communication loss latches across both cores
#[test]
fn test_communication_loss_latches() {
    let board = MockBoard::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::CommunicationLoss))
        .build();

    let err = board.tx().enable(0x1).unwrap_err();
    assert_eq!(err.kind, DriverErrorKind::Communication);
    let err = board.rx().read_data().unwrap_err();
    assert_eq!(err.kind, DriverErrorKind::Communication);
    assert_eq!(board.counters().tx_enable, 1);
}

#[test]
fn test_read_timeout_scenario() {
    let board = MockBoard::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: ops::READ_DATA,
        }))
        .build();
    board.rx().enable(0x1).unwrap();
    let err = board.rx().read_data().unwrap_err();
    assert_eq!(err.kind, DriverErrorKind::Timeout);
}

/// Chaos mode fails a fraction of the operations without any error config
#[test]
fn test_chaos_mode_injects_failures() {
    let board = MockBoard::builder().mode(MockMode::Chaos).seed(5).build();
    let rx = board.rx();

    let attempts = 5_000;
    let failures = (0..attempts).filter(|_| rx.read_data().is_err()).count();
    let expected = attempts as f64 * CHAOS_FAILURE_RATE;
    assert!(failures > 0);
    assert!((failures as f64) < expected * 3.0, "{failures} failures");
}

/// An explicit error configuration replaces the chaos default
#[test]
fn test_chaos_mode_respects_explicit_errors() {
    let board = MockBoard::builder()
        .mode(MockMode::Chaos)
        .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: ops::TX_ENABLE,
            count: 0,
        }))
        .build();
    assert!(board.tx().enable(0x1).is_err());
    for _ in 0..1_000 {
        assert!(board.rx().read_data().is_ok());
    }
}
