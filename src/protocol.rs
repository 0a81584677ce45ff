//! The catalog of supported Modbus operations.
//!
//! Each [`Operation`] maps a logical name to its wire function code and the
//! parameter shape it requires. The set is fixed: four reads and four writes,
//! covering coils, discrete inputs, holding registers and input registers.

use std::fmt;
use std::str::FromStr;

/// A logical read or write operation against a device register/coil range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Operation {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteMultipleCoils,
    WriteSingleRegister,
    WriteMultipleRegisters,
}

impl Operation {
    /// Every supported operation, reads first, then the writes.
    pub const ALL: [Operation; 8] = [
        Operation::ReadCoils,
        Operation::ReadDiscreteInputs,
        Operation::ReadHoldingRegisters,
        Operation::ReadInputRegisters,
        Operation::WriteSingleCoil,
        Operation::WriteMultipleCoils,
        Operation::WriteSingleRegister,
        Operation::WriteMultipleRegisters,
    ];

    /// The Modbus function code sent on the wire.
    pub fn function_code(&self) -> u8 {
        match self {
            Operation::ReadCoils => 1,
            Operation::ReadDiscreteInputs => 2,
            Operation::ReadHoldingRegisters => 3,
            Operation::ReadInputRegisters => 4,
            Operation::WriteSingleCoil => 5,
            Operation::WriteSingleRegister => 6,
            Operation::WriteMultipleCoils => 15,
            Operation::WriteMultipleRegisters => 16,
        }
    }

    /// Whether this operation modifies device state.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::WriteSingleCoil
                | Operation::WriteMultipleCoils
                | Operation::WriteSingleRegister
                | Operation::WriteMultipleRegisters
        )
    }

    /// Writes need a value evaluated from the request.
    pub fn requires_value(&self) -> bool {
        self.is_write()
    }

    /// Reads admit an explicit register/coil span.
    pub fn requires_count(&self) -> bool {
        !self.is_write()
    }

    /// Whether the write targets multiple coils/registers and therefore
    /// expects a sequence value. Single and multiple writes are distinct
    /// operations; the value shape is never auto-detected.
    pub fn writes_multiple(&self) -> bool {
        matches!(
            self,
            Operation::WriteMultipleCoils | Operation::WriteMultipleRegisters
        )
    }

    /// The logical name used in configuration and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ReadCoils => "read_coils",
            Operation::ReadDiscreteInputs => "read_discrete_inputs",
            Operation::ReadHoldingRegisters => "read_holding_registers",
            Operation::ReadInputRegisters => "read_input_registers",
            Operation::WriteSingleCoil => "write_single_coil",
            Operation::WriteMultipleCoils => "write_multiple_coils",
            Operation::WriteSingleRegister => "write_single_register",
            Operation::WriteMultipleRegisters => "write_multiple_registers",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|operation| operation.name() == s)
            .ok_or_else(|| format!("unknown operation '{s}'"))
    }
}
