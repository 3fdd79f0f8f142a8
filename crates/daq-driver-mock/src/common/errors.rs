//! Fault injection for the mock readout board.
//!
//! Every transmit/receive entry point asks [`ErrorConfig::check_operation`]
//! before doing any work. Operation names are the constants in [`ops`].
//!
//! Two kinds of faults exist:
//! - scripted [`ErrorScenario`]s, deterministic and evaluated in order
//! - a random failure probability per operation (`"*"` applies to all)
//!
//! Communication loss and hardware faults latch: once triggered, every later
//! operation on either core fails the same way until [`ErrorConfig::reset`].

use super::rng::MockRng;
use daq_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Operation names checked by the mock collaborators.
pub mod ops {
    /// `TxCore::enable`
    pub const TX_ENABLE: &str = "tx_enable";
    /// `TxCore::disable`
    pub const TX_DISABLE: &str = "tx_disable";
    /// `TxCore::send`
    pub const SEND: &str = "send";
    /// `RxCore::enable`
    pub const RX_ENABLE: &str = "rx_enable";
    /// `RxCore::disable`
    pub const RX_DISABLE: &str = "rx_disable";
    /// `RxCore::read_data`
    pub const READ_DATA: &str = "read_data";
}

const ANY_OPERATION: &str = "*";

/// Scripted fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorScenario {
    /// Fail every call of `operation` after `count` successful ones
    FailAfterN {
        /// One of the [`ops`] names
        operation: &'static str,
        /// Successful calls before the first failure
        count: u32,
    },
    /// Every call of `operation` times out
    Timeout {
        /// One of the [`ops`] names
        operation: &'static str,
    },
    /// Board link drops on the first checked operation
    CommunicationLoss,
    /// Board reports fault `code` on the first checked operation
    HardwareFault {
        /// Fault code reported by the board
        code: u32,
    },
}

/// Fault that keeps failing every operation once raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Latched {
    LinkDown,
    Fault(u32),
}

impl Latched {
    fn to_error(self, driver_type: &str) -> DriverError {
        match self {
            Latched::LinkDown => {
                DriverError::new(driver_type, DriverErrorKind::Communication, "Board link down")
            }
            Latched::Fault(code) => DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Board fault code {:#x}", code),
            ),
        }
    }
}

#[derive(Debug, Default)]
struct FaultState {
    calls: HashMap<&'static str, u32>,
    latched: Option<Latched>,
}

/// Fault injection settings shared by the transmit and receive cores.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<[ErrorScenario]>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<FaultState>>,
}

impl ErrorConfig {
    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            rates: Arc::new(rates),
            scenarios: scenarios.into(),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(FaultState::default())),
        }
    }

    /// No injected faults.
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Every operation fails with probability `rate`.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        Self::build(HashMap::from([(ANY_OPERATION, rate)]), Vec::new(), seed)
    }

    /// A single scripted fault.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Scripted faults, checked in order.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// True if nothing can fail.
    pub fn is_none(&self) -> bool {
        self.scenarios.is_empty() && self.rates.values().all(|r| *r <= 0.0)
    }

    /// Decide whether `operation` fails now.
    pub fn check_operation(
        &self,
        driver_type: &str,
        operation: &'static str,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if let Some(latched) = state.latched {
            return Err(latched.to_error(driver_type));
        }

        for scenario in self.scenarios.iter() {
            match *scenario {
                ErrorScenario::FailAfterN { operation: op, count } if op == operation => {
                    let calls = state.calls.entry(operation).or_insert(0);
                    *calls += 1;
                    if *calls > count {
                        return Err(DriverError::new(
                            driver_type,
                            DriverErrorKind::Hardware,
                            format!("Injected {} failure after {} calls", operation, count),
                        ));
                    }
                }
                ErrorScenario::Timeout { operation: op } if op == operation => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Timeout,
                        format!("{} timed out", operation),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.latched = Some(Latched::LinkDown);
                    return Err(Latched::LinkDown.to_error(driver_type));
                }
                ErrorScenario::HardwareFault { code } => {
                    state.latched = Some(Latched::Fault(code));
                    return Err(Latched::Fault(code).to_error(driver_type));
                }
                _ => {}
            }
        }

        let rate = self
            .rates
            .get(operation)
            .or_else(|| self.rates.get(ANY_OPERATION))
            .copied()
            .unwrap_or(0.0);
        if self.rng.chance(rate) {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Random {} failure", operation),
            ));
        }
        Ok(())
    }

    /// Clear call counts and latched faults.
    pub fn reset(&self) {
        *self.state.lock() = FaultState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_fails() {
        let config = ErrorConfig::none();
        assert!(config.is_none());
        assert!((0..100).all(|_| config.check_operation("mock_tx", ops::SEND).is_ok()));
    }

    #[test]
    fn test_seeded_random_rate() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("mock_rx", ops::READ_DATA).is_err())
            .count();
        assert!((400..600).contains(&failures), "{failures} failures");
    }

    #[test]
    fn test_fail_after_n_counts_per_operation() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: ops::SEND,
            count: 3,
        });
        for _ in 0..3 {
            config.check_operation("mock_tx", ops::SEND).unwrap();
        }
        let err = config.check_operation("mock_tx", ops::SEND).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);
        config.check_operation("mock_tx", ops::TX_DISABLE).unwrap();
    }

    #[test]
    fn test_timeout_scenario() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: ops::READ_DATA,
        });
        let err = config.check_operation("mock_rx", ops::READ_DATA).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
        config.check_operation("mock_rx", ops::RX_ENABLE).unwrap();
    }

    #[test]
    fn test_link_loss_latches_until_reset() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss);
        let err = config.check_operation("mock_tx", ops::SEND).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Communication);
        let err = config.check_operation("mock_rx", ops::READ_DATA).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Communication);

        config.reset();
        // The scenario fires again on the next check
        assert!(config.check_operation("mock_tx", ops::SEND).is_err());
    }

    #[test]
    fn test_hardware_fault_reports_code() {
        let config = ErrorConfig::scenario(ErrorScenario::HardwareFault { code: 0x42 });
        let err = config.check_operation("mock_tx", ops::SEND).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);
        assert!(err.message.contains("0x42"));
    }

    #[test]
    fn test_reset_restarts_counts() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: ops::SEND,
            count: 1,
        });
        config.check_operation("mock_tx", ops::SEND).unwrap();
        assert!(config.check_operation("mock_tx", ops::SEND).is_err());
        config.reset();
        config.check_operation("mock_tx", ops::SEND).unwrap();
    }
}
