//! Byte-valued opcodes of the mutation stream. The set is closed; the
//! engine rejects anything else.

use crate::error::{Result, UmbraError};

/// Message discriminator for a framed mutation buffer.
pub const MSG_MUTATION: u8 = 1;

/// Single-byte response meaning the engine's schema no longer matches the
/// checksum a query was compiled against.
pub const STALE_SENTINEL: u8 = 0xFF;

/// Mutation-stream opcodes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Opcode {
    /// New node: 4-byte region length + all-defaults image follow.
    Create = 1,
    /// Existing node: 4-byte region length + update mask + image follow.
    Update = 2,
    /// Remove the current node.
    DeleteNode = 3,
    /// Drop the sort index for one property: 1-byte prop id follows.
    DeleteSortIndex = 4,
    /// Add a delta: type tag + 2-byte offset + fixed-width delta follow.
    Increment = 5,
    /// Subtract a delta; same operands as `Increment`.
    Decrement = 6,
    /// Schedule expiry: 4-byte TTL in seconds follows.
    Expire = 7,
    /// Switch the cursor type: 2-byte type tag follows.
    SwitchType = 8,
    /// Switch the cursor field: prop id + prop type tag follow.
    SwitchField = 9,
    /// Switch to a node being created: 4-byte id follows.
    SwitchIdCreate = 10,
    /// Switch to an existing node: 4-byte id follows.
    SwitchIdUpdate = 11,
}

impl Opcode {
    /// Parses a wire byte.
    pub fn from_u8(byte: u8) -> Result<Self> {
        Ok(match byte {
            1 => Opcode::Create,
            2 => Opcode::Update,
            3 => Opcode::DeleteNode,
            4 => Opcode::DeleteSortIndex,
            5 => Opcode::Increment,
            6 => Opcode::Decrement,
            7 => Opcode::Expire,
            8 => Opcode::SwitchType,
            9 => Opcode::SwitchField,
            10 => Opcode::SwitchIdCreate,
            11 => Opcode::SwitchIdUpdate,
            _ => return Err(UmbraError::Corruption("unknown opcode")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_roundtrip() {
        for byte in 1..=11u8 {
            assert_eq!(Opcode::from_u8(byte).unwrap() as u8, byte);
        }
        assert!(Opcode::from_u8(0).is_err());
        assert!(Opcode::from_u8(12).is_err());
    }
}
