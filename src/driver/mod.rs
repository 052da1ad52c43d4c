//! LH-018/019: Device collaborators: drivers and the replay simulator.

pub mod recording;
pub mod simulator;

use crate::core::error::{PlanError, PlanResult};
use crate::instructions::Instruction;
use log::debug;

/// A device that executes terminal instructions one at a time.
pub trait DeviceDriver {
    /// Execute one instruction. The error string is the device's own report.
    fn send(&mut self, instruction: &Instruction) -> Result<(), String>;

    fn name(&self) -> &str;
}

/// Send every instruction in order. Stops at the first device error.
/// Returns the number of instructions sent.
pub fn run_on_driver(driver: &mut dyn DeviceDriver, instructions: &[Instruction]) -> PlanResult<usize> {
    for (i, instruction) in instructions.iter().enumerate() {
        driver.send(instruction).map_err(|e| {
            PlanError::Driver(format!(
                "{} rejected instruction {} ({}): {}",
                driver.name(),
                i,
                instruction.kind(),
                e
            ))
        })?;
    }
    debug!("{}: sent {} instruction(s)", driver.name(), instructions.len());
    Ok(instructions.len())
}
