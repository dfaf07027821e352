//! The per-packet runtime model shared by both engines: the mutable header
//! map, the bit-addressed payload, the [`State`] unit of work, and the table
//! row storage.

pub(crate) mod exec;
mod rows;

pub use rows::{EntryValue, Rows, TableEntry};

use std::collections::HashMap;

use crate::error::RuntimeError;
use crate::ir::{reserved_fields, Field, Label, Reason, Size, Value};

// ─── Header ────────────────────────────────────────────────────────

/// The mutable Field → Value map carried by one in-flight packet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Header {
    fields: HashMap<Field, Value>,
}

impl Header {
    pub fn new() -> Self {
        Header::default()
    }

    pub fn insert(&mut self, field: Field, value: Value) {
        self.fields.insert(field, value);
    }

    pub fn remove(&mut self, field: &Field) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn get(&self, field: &Field) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_mut(&mut self, field: &Field) -> Option<&mut Value> {
        self.fields.get_mut(field)
    }

    pub fn contains(&self, field: &Field) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Field, &Value)> {
        self.fields.iter()
    }

    /// Fetch a field or fault.
    pub(crate) fn lookup(&self, field: &Field) -> Result<Value, RuntimeError> {
        self.fields
            .get(field)
            .copied()
            .ok_or_else(|| RuntimeError::MissingField(field.clone()))
    }
}

// ─── Packet ────────────────────────────────────────────────────────

/// The payload bit-vector, MSB-first. PUSH/POP resize it; LD/ST with a
/// location read and write bit ranges in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    bits: Vec<bool>,
}

impl Packet {
    pub fn new() -> Self {
        Packet::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut bits = Vec::with_capacity(bytes.len() * 8);
        for byte in bytes {
            for k in (0..8).rev() {
                bits.push(byte & (1 << k) != 0);
            }
        }
        Packet { bits }
    }

    /// Pack back into bytes, zero-padding a trailing partial byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.bits.len().div_ceil(8)];
        for (i, &bit) in self.bits.iter().enumerate() {
            if bit {
                out[i / 8] |= 1 << (7 - i % 8);
            }
        }
        out
    }

    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), RuntimeError> {
        if len > 64 || offset.checked_add(len).map_or(true, |end| end > self.bits.len()) {
            return Err(RuntimeError::PacketBounds {
                offset,
                len,
                available: self.bits.len(),
            });
        }
        Ok(())
    }

    /// Read `len` bits at `offset` as an unsigned value.
    pub fn read_bits(&self, offset: usize, len: usize) -> Result<i64, RuntimeError> {
        self.check_range(offset, len)?;
        let mut acc: u64 = 0;
        for &bit in &self.bits[offset..offset + len] {
            acc = (acc << 1) | bit as u64;
        }
        Ok(acc as i64)
    }

    /// Write the low `len` bits of `value` at `offset`.
    pub fn write_bits(&mut self, offset: usize, len: usize, value: i64) -> Result<(), RuntimeError> {
        self.check_range(offset, len)?;
        for k in 0..len {
            self.bits[offset + k] = value >> (len - 1 - k) & 1 != 0;
        }
        Ok(())
    }

    /// Insert `len` zero bits at `offset`, growing the payload.
    pub fn insert_bits(&mut self, offset: usize, len: usize) -> Result<(), RuntimeError> {
        if offset > self.bits.len() {
            return Err(RuntimeError::PacketBounds {
                offset,
                len,
                available: self.bits.len(),
            });
        }
        self.bits
            .splice(offset..offset, std::iter::repeat(false).take(len));
        Ok(())
    }

    /// Remove `len` bits at `offset`, shrinking the payload.
    pub fn remove_bits(&mut self, offset: usize, len: usize) -> Result<(), RuntimeError> {
        self.check_range(offset, len)?;
        self.bits.drain(offset..offset + len);
        Ok(())
    }
}

// ─── State ─────────────────────────────────────────────────────────

/// Default widths for reserved fields filled in by [`State::new`].
fn reserved_default_size(field: &Field) -> Size {
    match field.as_str() {
        "inport_bitmap" | "outport_bitmap" => Size(16),
        "bit_length" => Size(32),
        _ => Size(1),
    }
}

/// The unit of work flowing through an engine: one packet's header and
/// payload, the current drop/punt reason, the pending control-transfer
/// label, and an opaque bridge cookie.
#[derive(Clone, Debug)]
pub struct State {
    pub header: Header,
    pub packet: Packet,
    pub reason: Reason,
    pub label: Label,
    pub extra: Option<u64>,
}

impl State {
    /// Build a state, filling in any missing reserved fields with zeroes of
    /// their default widths.
    pub fn new(mut header: Header, packet: Packet) -> Self {
        for field in reserved_fields() {
            if !header.contains(&field) {
                let size = reserved_default_size(&field);
                header.insert(field, Value::new(0, size));
            }
        }
        State {
            header,
            packet,
            reason: Reason::default(),
            label: Label::fall_through(),
            extra: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_byte_round_trip() {
        let packet = Packet::from_bytes(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(packet.bit_len(), 32);
        assert_eq!(packet.to_bytes(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_packet_bit_reads_are_msb_first() {
        let packet = Packet::from_bytes(&[0xAB, 0xCD]);
        assert_eq!(packet.read_bits(0, 8).unwrap(), 0xAB);
        assert_eq!(packet.read_bits(8, 8).unwrap(), 0xCD);
        assert_eq!(packet.read_bits(4, 8).unwrap(), 0xBC);
        assert_eq!(packet.read_bits(0, 16).unwrap(), 0xABCD);
    }

    #[test]
    fn test_packet_write_bits() {
        let mut packet = Packet::from_bytes(&[0x00, 0x00]);
        packet.write_bits(4, 8, 0xFF).unwrap();
        assert_eq!(packet.to_bytes(), vec![0x0F, 0xF0]);
    }

    #[test]
    fn test_packet_insert_and_remove() {
        let mut packet = Packet::from_bytes(&[0xAB]);
        packet.insert_bits(0, 8).unwrap();
        assert_eq!(packet.bit_len(), 16);
        packet.write_bits(0, 8, 0xCD).unwrap();
        assert_eq!(packet.to_bytes(), vec![0xCD, 0xAB]);
        packet.remove_bits(0, 8).unwrap();
        assert_eq!(packet.to_bytes(), vec![0xAB]);
    }

    #[test]
    fn test_packet_bounds_are_checked() {
        let packet = Packet::from_bytes(&[0xAB]);
        assert!(matches!(
            packet.read_bits(4, 8),
            Err(RuntimeError::PacketBounds { .. })
        ));
    }

    #[test]
    fn test_state_fills_reserved_fields() {
        let state = State::new(Header::new(), Packet::new());
        assert_eq!(
            state.header.get(&Field::new("inport_bitmap")),
            Some(&Value::new(0, Size(16)))
        );
        assert_eq!(
            state.header.get(&Field::new("DRP")),
            Some(&Value::new(0, Size(1)))
        );
        assert!(state.label.is_fall_through());
    }

    #[test]
    fn test_state_keeps_caller_provided_reserved_values() {
        let mut header = Header::new();
        header.insert(Field::new("inport_bitmap"), Value::new(0x1, Size(16)));
        let state = State::new(header, Packet::new());
        assert_eq!(
            state.header.get(&Field::new("inport_bitmap")),
            Some(&Value::new(0x1, Size(16)))
        );
    }
}
