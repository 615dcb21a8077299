//! Service unit control.
//!
//! Thin wrapper over a [`CommandRunner`] for querying and toggling systemd
//! units. Unrelated to the merge engine, but shares the same process-execution
//! contract.

use tracing::{debug, info};

use crate::collaborators::CommandRunner;
use crate::error::{Result, WizflowError};

/// Actions accepted by `systemctl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
}

/// Queries and controls service units.
pub struct ServiceController<R: CommandRunner> {
    runner: R,
}

/// Reject unit names that would be interpreted by the shell.
fn validate_unit(unit: &str) -> Result<()> {
    let valid = !unit.is_empty()
        && unit
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | ':'));
    if valid {
        Ok(())
    } else {
        Err(WizflowError::service(format!("invalid unit name '{}'", unit)))
    }
}

impl<R: CommandRunner> ServiceController<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Returns true if the unit is running.
    pub fn is_active(&self, unit: &str) -> Result<bool> {
        validate_unit(unit)?;
        let out = self.runner.execute(&format!("systemctl is-active {}", unit))?;
        debug!("{} is-active: {}", unit, out.stdout.trim());
        Ok(out.success())
    }

    /// Returns true if the unit starts at boot.
    pub fn is_enabled(&self, unit: &str) -> Result<bool> {
        validate_unit(unit)?;
        let out = self.runner.execute(&format!("systemctl is-enabled {}", unit))?;
        Ok(out.success())
    }

    /// Run an action on a unit. A non-zero exit is an error.
    pub fn apply(&self, action: ServiceAction, unit: &str) -> Result<()> {
        validate_unit(unit)?;
        let out = self.runner.execute(&format!("systemctl {} {}", action, unit))?;
        if !out.success() {
            return Err(WizflowError::service(format!(
                "systemctl {} {} exited with {}: {}",
                action,
                unit,
                out.exit_code,
                out.stderr.trim()
            )));
        }
        info!("Service {}: {}", unit, action);
        Ok(())
    }
}
