//! Static chip descriptor database.
//!
//! Every chip the programmer knows is described by an immutable [`Chip`]
//! record compiled into the binary. The firmware never sees the table; it
//! only receives the handful of descriptor fields each command packet
//! carries (protocol id, variant, sizes, option words).
//!
//! The option words are vendor-defined and mostly opaque:
//!
//! - `opts1` - low byte is the VPP voltage code, high byte the VDD/VCC code
//! - `opts2` - 16-bit options word sent verbatim in BEGIN
//! - `opts3` - either a protocol-specific field or, for Microchip parts,
//!   a 1-based index into [`chip_ids::CHIP_IDS`]
//! - `opts4` - bits 24-25 select the memory unit (bytes/words/bits), bit
//!   13 (0x2000) selects word addressing on the wire, bits 14-15 (0xC000)
//!   advertise write-protect support

pub mod chip_ids;
mod chips;

pub use chips::CHIPS;

use std::collections::HashMap;
use std::sync::OnceLock;

// GAL logic device protocol classes. These skip the erase-cycle override
// and use JEDEC row addressing.
pub const PLD_PROTOCOL_16V8: u32 = 0x28;
pub const PLD_PROTOCOL_20V8: u32 = 0x29;
pub const PLD_PROTOCOL_22V10: u32 = 0x2A;

/// How the chip's code memory is natively addressed, from `opts4` bits 24-25.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUnit {
    Bytes,
    Words,
    Bits,
}

/// One device descriptor. All fields are vendor data carried onto the wire
/// or used by the host-side pipelines; none are mutated at runtime.
#[derive(Debug)]
pub struct Chip {
    pub name: &'static str,
    /// Low byte goes on the wire. The value 0x10063 is a sentinel that
    /// selects the two-word PIC fuse layout before masking.
    pub protocol_id: u32,
    pub variant: u8,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub code_memory_size: usize,
    pub data_memory_size: usize,
    pub data_memory2_size: usize,
    pub chip_id: u32,
    pub chip_id_bytes_count: u8,
    pub opts1: u16,
    pub opts2: u16,
    pub opts3: u32,
    pub opts4: u32,
    /// Little-endian packed: byte 0 adapter image id, byte 1 ICSP image id,
    /// byte 3 DIP pin count (bit 7 reserved).
    pub package_details: u32,
}

impl Chip {
    pub fn memory_unit(&self) -> Option<MemoryUnit> {
        match self.opts4 & 0xFF00_0000 {
            0x0000_0000 => Some(MemoryUnit::Bytes),
            0x0100_0000 => Some(MemoryUnit::Words),
            0x0200_0000 => Some(MemoryUnit::Bits),
            _ => None,
        }
    }

    /// Bytes per native word, for display purposes.
    pub fn word_size(&self) -> usize {
        match self.memory_unit() {
            Some(MemoryUnit::Words) => 2,
            _ => 1,
        }
    }

    /// Wire addresses are divided by two for word-addressed chips.
    pub fn word_addressed(&self) -> bool {
        self.opts4 & 0x2000 != 0
    }

    /// Whether the chip has a write-protect mechanism the firmware drives.
    pub fn protection_supported(&self) -> bool {
        self.opts4 & 0xC000 != 0
    }

    /// Chips behind the lockable TSOP48 adapter need an unlock handshake.
    pub fn needs_tsop48_unlock(&self) -> bool {
        self.opts4 == 0x0100_2078
    }

    pub fn is_pld(&self) -> bool {
        matches!(
            self.protocol_id,
            PLD_PROTOCOL_16V8 | PLD_PROTOCOL_20V8 | PLD_PROTOCOL_22V10
        )
    }

    pub fn adapter_image_id(&self) -> u8 {
        self.package_details as u8
    }

    pub fn icsp_image_id(&self) -> u8 {
        (self.package_details >> 8) as u8
    }

    pub fn dip_pin_count(&self) -> u8 {
        ((self.package_details >> 24) & 0x7F) as u8
    }
}

fn name_index() -> &'static HashMap<&'static str, &'static Chip> {
    static INDEX: OnceLock<HashMap<&'static str, &'static Chip>> = OnceLock::new();
    INDEX.get_or_init(|| CHIPS.iter().map(|chip| (chip.name, chip)).collect())
}

/// Exact-name lookup.
pub fn get_by_name(name: &str) -> Option<&'static Chip> {
    name_index().get(name).copied()
}

/// Case-insensitive prefix listing, in table order.
pub fn list_prefix(prefix: &str) -> impl Iterator<Item = &'static Chip> + '_ {
    CHIPS.iter().filter(move |chip| {
        chip.name.len() >= prefix.len()
            && chip.name[..prefix.len()].eq_ignore_ascii_case(prefix)
    })
}

pub fn all() -> impl Iterator<Item = &'static Chip> {
    CHIPS.iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuses;

    #[test]
    fn test_lookup_by_name() {
        let chip = get_by_name("AT28C256").expect("AT28C256 in database");
        assert_eq!(chip.code_memory_size, 32768);
        assert_eq!(chip.read_buffer_size, 1024);
        assert!(get_by_name("at28c256").is_none(), "lookup is exact");
        assert!(get_by_name("NOSUCHCHIP").is_none());
    }

    #[test]
    fn test_prefix_listing_is_case_insensitive() {
        let hits: Vec<_> = list_prefix("pic16").map(|c| c.name).collect();
        assert!(hits.contains(&"PIC16F84A"));
        assert!(hits.iter().all(|n| n.starts_with("PIC16")));
    }

    #[test]
    fn test_descriptor_invariants() {
        for chip in all() {
            assert!(
                chip.read_buffer_size > 0 && chip.read_buffer_size <= 4096,
                "{}: read buffer {}",
                chip.name,
                chip.read_buffer_size
            );
            assert!(
                chip.write_buffer_size > 0 && chip.write_buffer_size <= 4096,
                "{}: write buffer {}",
                chip.name,
                chip.write_buffer_size
            );
            assert!(chip.name.len() <= 39, "{}: name too long", chip.name);
            assert!(chip.memory_unit().is_some(), "{}: bad memory unit", chip.name);
            // Full pages must chunk evenly; only the bit-addressed GAL
            // fuse maps get a ragged last block.
            if !chip.is_pld() {
                assert_eq!(
                    chip.code_memory_size % chip.write_buffer_size,
                    0,
                    "{}: write buffer does not tile code memory",
                    chip.name
                );
            }
            if chip.word_addressed() {
                assert_eq!(chip.code_memory_size % 2, 0, "{}: odd word size", chip.name);
            }
            // A zero chip id is only allowed when the Microchip id table
            // can supply one.
            if chip.chip_id_bytes_count > 0 && chip.chip_id == 0 {
                assert!(
                    chip.opts3 >= 1 && (chip.opts3 as usize) <= chip_ids::CHIP_IDS.len(),
                    "{}: opts3 outside the chip id table",
                    chip.name
                );
            }
        }
    }

    #[test]
    fn test_names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for chip in all() {
            assert!(seen.insert(chip.name), "duplicate name {}", chip.name);
        }
    }

    #[test]
    fn test_fuse_layouts_resolve() {
        for chip in all() {
            // Every AVR/PIC entry must map onto a known fuse layout.
            let layout = fuses::layout_for(chip.protocol_id, chip.variant);
            match chip.protocol_id & 0xFF {
                0x71 | 0x63 => assert!(layout.unwrap().is_some(), "{}", chip.name),
                _ => assert!(layout.is_ok(), "{}", chip.name),
            }
        }
    }
}
