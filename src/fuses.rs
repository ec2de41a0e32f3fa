//! Fuse (configuration word) layouts.
//!
//! Each chip family stores its configuration in one or more transaction
//! buffers of at most 11 bytes, addressed by a command class (user id
//! words, config words, lock bytes). A [`FuseDecl`] names one field and
//! pins its byte offset and width inside the buffer for its class.
//!
//! Declarations are sorted by command class; entries of one class are
//! packed into a single buffer and sent together.

use crate::bytes::{format_int, load_int, Endianness};
use crate::error::{Error, Result};

/// Command class a fuse field is read and written with. The ordering
/// matches the wire opcode ordering (USER < CFG < LOCK).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FuseCmd {
    User,
    Cfg,
    Lock,
}

pub struct FuseDecl {
    pub name: &'static str,
    pub cmd: FuseCmd,
    /// Field width in bytes, 1..=4.
    pub length: usize,
    /// Byte offset inside the class buffer, 0..=10.
    pub offset: usize,
}

pub struct FuseLayout {
    pub entries: &'static [FuseDecl],
    /// Erase-cycle count sent in the ERASE packet for this family.
    pub erase_num_fuses: u8,
}

/// Largest per-class transaction buffer.
pub const FUSE_BUFFER_SIZE: usize = 11;

const fn decl(name: &'static str, cmd: FuseCmd, length: usize, offset: usize) -> FuseDecl {
    FuseDecl {
        name,
        cmd,
        length,
        offset,
    }
}

pub static AVR_FUSES: FuseLayout = FuseLayout {
    entries: &[
        decl("fuses", FuseCmd::Cfg, 1, 0),
        decl("lock_byte", FuseCmd::Lock, 1, 0),
    ],
    erase_num_fuses: 1,
};

pub static AVR2_FUSES: FuseLayout = FuseLayout {
    entries: &[
        decl("fuses_lo", FuseCmd::Cfg, 1, 0),
        decl("fuses_hi", FuseCmd::Cfg, 1, 1),
        decl("lock_byte", FuseCmd::Lock, 1, 0),
    ],
    erase_num_fuses: 2,
};

pub static AVR3_FUSES: FuseLayout = FuseLayout {
    entries: &[
        decl("fuses_lo", FuseCmd::Cfg, 1, 0),
        decl("fuses_hi", FuseCmd::Cfg, 1, 1),
        decl("fuses_ext", FuseCmd::Cfg, 1, 2),
        decl("lock_byte", FuseCmd::Lock, 1, 0),
    ],
    erase_num_fuses: 3,
};

pub static PIC_FUSES: FuseLayout = FuseLayout {
    entries: &[
        decl("user_id0", FuseCmd::User, 2, 0),
        decl("user_id1", FuseCmd::User, 2, 2),
        decl("user_id2", FuseCmd::User, 2, 4),
        decl("user_id3", FuseCmd::User, 2, 6),
        decl("conf_word", FuseCmd::Cfg, 2, 0),
    ],
    erase_num_fuses: 1,
};

pub static PIC2_FUSES: FuseLayout = FuseLayout {
    entries: &[
        decl("user_id0", FuseCmd::User, 2, 0),
        decl("user_id1", FuseCmd::User, 2, 2),
        decl("user_id2", FuseCmd::User, 2, 4),
        decl("user_id3", FuseCmd::User, 2, 6),
        decl("conf_word", FuseCmd::Cfg, 2, 0),
        decl("conf_word1", FuseCmd::Cfg, 2, 2),
    ],
    erase_num_fuses: 2,
};

/// Layout selection, resolved once after chip-id validation.
///
/// A pure function of the descriptor: the database is never mutated. The
/// 0x10063 sentinel is matched before its low byte goes on the wire.
pub fn layout_for(protocol_id: u32, variant: u8) -> Result<Option<&'static FuseLayout>> {
    let layout = match protocol_id {
        0x71 => match variant {
            0x01 | 0x21 | 0x44 | 0x61 => &AVR_FUSES,
            0x00 | 0x20 | 0x22 | 0x43 | 0x85 => &AVR2_FUSES,
            0x0A | 0x2A | 0x48 | 0x49 | 0x6B => &AVR3_FUSES,
            _ => {
                return Err(Error::UnknownFuseLayout {
                    protocol_id,
                    variant,
                })
            }
        },
        0x73 => match variant {
            0x10 | 0x12 => &AVR2_FUSES,
            _ => return Ok(None),
        },
        0x10063 => &PIC2_FUSES,
        0x63 | 0x65 | 0x66 => &PIC_FUSES,
        _ => return Ok(None),
    };
    Ok(Some(layout))
}

impl FuseLayout {
    /// Runs of declarations sharing one command class, in declared order.
    pub fn groups(&'static self) -> impl Iterator<Item = &'static [FuseDecl]> {
        let entries = self.entries;
        let mut start = 0;
        std::iter::from_fn(move || {
            if start >= entries.len() {
                return None;
            }
            let cmd = entries[start].cmd;
            let mut end = start + 1;
            while end < entries.len() && entries[end].cmd == cmd {
                end += 1;
            }
            let group = &entries[start..end];
            start = end;
            Some(group)
        })
    }
}

/// Total payload length of one class group.
pub fn group_length(group: &[FuseDecl]) -> usize {
    group.iter().map(|d| d.length).sum()
}

/// Extract every field of a class group out of its transaction buffer.
pub fn unpack_group(group: &[FuseDecl], buf: &[u8]) -> Vec<(&'static str, u32)> {
    group
        .iter()
        .map(|d| {
            (
                d.name,
                load_int(&buf[d.offset..], d.length, Endianness::Little),
            )
        })
        .collect()
}

/// Pack named values back into a class-group transaction buffer.
pub fn pack_group<F>(group: &[FuseDecl], buf: &mut [u8], mut get: F) -> Result<()>
where
    F: FnMut(&str) -> Result<u32>,
{
    for d in group {
        let value = get(d.name)?;
        format_int(&mut buf[d.offset..], value, d.length, Endianness::Little);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_layouts() -> [&'static FuseLayout; 5] {
        [&AVR_FUSES, &AVR2_FUSES, &AVR3_FUSES, &PIC_FUSES, &PIC2_FUSES]
    }

    #[test]
    fn test_layouts_sorted_by_command() {
        for layout in all_layouts() {
            for pair in layout.entries.windows(2) {
                assert!(pair[0].cmd <= pair[1].cmd);
            }
        }
    }

    #[test]
    fn test_groups_fit_the_transaction_buffer() {
        for layout in all_layouts() {
            for group in layout.groups() {
                for d in group {
                    assert!((1..=4).contains(&d.length), "{}", d.name);
                    assert!(d.offset + d.length <= FUSE_BUFFER_SIZE, "{}", d.name);
                }
            }
        }
    }

    #[test]
    fn test_group_split() {
        let groups: Vec<_> = PIC2_FUSES.groups().collect();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 4);
        assert_eq!(group_length(groups[0]), 8);
        assert_eq!(groups[1].len(), 2);
        assert_eq!(group_length(groups[1]), 4);
    }

    #[test]
    fn test_unpack_pack_round_trip() {
        // Unpacking an arbitrary buffer and packing the values back must
        // reproduce every covered byte.
        let pattern: [u8; FUSE_BUFFER_SIZE] =
            [0x37, 0x91, 0xC4, 0x02, 0x5E, 0xAA, 0x10, 0xFE, 0x68, 0x0B, 0x7D];
        for layout in all_layouts() {
            for group in layout.groups() {
                let values = unpack_group(group, &pattern);
                let mut rebuilt = [0u8; FUSE_BUFFER_SIZE];
                pack_group(group, &mut rebuilt, |name| {
                    Ok(values.iter().find(|(n, _)| *n == name).unwrap().1)
                })
                .unwrap();
                for d in group {
                    assert_eq!(
                        &rebuilt[d.offset..d.offset + d.length],
                        &pattern[d.offset..d.offset + d.length],
                        "{}",
                        d.name
                    );
                }
            }
        }
    }

    #[test]
    fn test_selection_is_pure() {
        assert!(std::ptr::eq(
            layout_for(0x71, 0x20).unwrap().unwrap(),
            &AVR2_FUSES
        ));
        assert!(std::ptr::eq(
            layout_for(0x10063, 0x00).unwrap().unwrap(),
            &PIC2_FUSES
        ));
        assert!(std::ptr::eq(
            layout_for(0x66, 0x00).unwrap().unwrap(),
            &PIC_FUSES
        ));
        assert!(layout_for(0x73, 0x55).unwrap().is_none());
        assert!(layout_for(0x07, 0x00).unwrap().is_none());
        assert!(layout_for(0x71, 0xEE).is_err());
    }
}
