//! LH-018: In-process drivers.

use super::DeviceDriver;
use crate::instructions::Instruction;
use log::info;

/// Keeps every instruction it receives. Can be told to fail at an index.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    sent: Vec<Instruction>,
    fail_at: Option<usize>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(index: usize) -> Self {
        Self {
            sent: Vec::new(),
            fail_at: Some(index),
        }
    }

    pub fn sent(&self) -> &[Instruction] {
        &self.sent
    }
}

impl DeviceDriver for RecordingDriver {
    fn send(&mut self, instruction: &Instruction) -> Result<(), String> {
        if self.fail_at == Some(self.sent.len()) {
            return Err("device fault".to_string());
        }
        self.sent.push(instruction.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Logs each instruction; stands in for a device during dry runs.
#[derive(Debug, Default)]
pub struct LogDriver {
    count: usize,
}

impl LogDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl DeviceDriver for LogDriver {
    fn send(&mut self, instruction: &Instruction) -> Result<(), String> {
        self.count += 1;
        info!("[{:>4}] {}", self.count, instruction);
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
