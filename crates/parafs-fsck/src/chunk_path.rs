//! Derivation of the directory a file's chunks are expected in on a storage target.

use crate::types::{EntryId, FileInode};

/// Number of first-level hash directories.
pub const HASH_DIRS_LEVEL1: u32 = 128;
/// Number of second-level hash directories.
pub const HASH_DIRS_LEVEL2: u32 = 128;

/// Position of the day digit, counted from the last timestamp digit.
const TIMESTAMP_DAY_RPOS: usize = 3;

/// Directory holding `inode`'s chunk files, relative to a target's chunk root.
///
/// Files carrying original-parent information live in
/// `u<uid>/<year-month>/<day>/<orig parent>`; older files live in a two-level
/// hash directory derived from their entry ID. The chunk file name (the entry
/// ID) is not part of the result, matching what the chunk scan records as
/// the saved path.
pub fn expected_chunk_path(inode: &FileInode) -> String {
    if inode.has_orig_parent_path() {
        let timestamp = inode.orig_parent_entry_id.timestamp_str();
        let (year_month, day) = split_timestamp(&timestamp);
        format!("u{:X}/{}/{}/{}", inode.orig_parent_uid, year_month, day, inode.orig_parent_entry_id)
    } else {
        let (level1, level2) = hash_dirs(&inode.id);
        format!("{:X}/{:X}", level1, level2)
    }
}

/// Splits a hex timestamp into its year-month prefix and day digit.
///
/// The day digit sits four places from the end and everything before it is
/// the year-month part. A timestamp too short to hold a day digit is kept
/// whole as the year-month part with day `"0"`; one whose day digit is the
/// first character gets year-month `"0"`.
fn split_timestamp(timestamp: &str) -> (String, String) {
    let chars: Vec<char> = timestamp.chars().collect();
    let Some(day_pos) = chars.len().checked_sub(TIMESTAMP_DAY_RPOS + 1) else {
        return (timestamp.to_string(), "0".to_string());
    };

    let day = chars[day_pos].to_string();
    let year_month = if day_pos == 0 {
        "0".to_string()
    } else {
        chars[..day_pos].iter().collect()
    };
    (year_month, day)
}

/// Hash directory pair for `id`: the high and low halves of the entry ID's
/// 32-bit checksum, each reduced modulo its level's directory count.
pub fn hash_dirs(id: &EntryId) -> (u32, u32) {
    let checksum = hash32(id.to_string().as_bytes());
    let high = checksum >> 16;
    let low = checksum & 0xFFFF;
    (high % HASH_DIRS_LEVEL1, low % HASH_DIRS_LEVEL2)
}

/// Paul Hsieh's SuperFastHash, the checksum storage targets use to place
/// chunk files.
pub fn hash32(data: &[u8]) -> u32 {
    if data.is_empty() {
        return 0;
    }

    let get16 = |b: &[u8]| u32::from(b[0]) | (u32::from(b[1]) << 8);
    // Tail bytes are read as signed chars.
    let signed = |b: u8| b as i8 as i32 as u32;

    let mut hash = data.len() as u32;
    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        hash = hash.wrapping_add(get16(&block[0..2]));
        let tmp = (get16(&block[2..4]) << 11) ^ hash;
        hash = (hash << 16) ^ tmp;
        hash = hash.wrapping_add(hash >> 11);
    }

    let rest = blocks.remainder();
    match rest.len() {
        3 => {
            hash = hash.wrapping_add(get16(&rest[0..2]));
            hash ^= hash << 16;
            hash ^= signed(rest[2]) << 18;
            hash = hash.wrapping_add(hash >> 11);
        }
        2 => {
            hash = hash.wrapping_add(get16(rest));
            hash ^= hash << 11;
            hash = hash.wrapping_add(hash >> 17);
        }
        1 => {
            hash = hash.wrapping_add(signed(rest[0]));
            hash ^= hash << 10;
            hash = hash.wrapping_add(hash >> 1);
        }
        _ => {}
    }

    hash ^= hash << 3;
    hash = hash.wrapping_add(hash >> 5);
    hash ^= hash << 4;
    hash = hash.wrapping_add(hash >> 17);
    hash ^= hash << 25;
    hash = hash.wrapping_add(hash >> 6);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, StripePatternType, PATH_INFO_ORIG_PARENT};

    fn inode(flags: u32) -> FileInode {
        FileInode {
            id: EntryId::new(0x2A, 0x5E1F, 3),
            parent_dir_id: EntryId::ROOT,
            parent_node_id: NodeId::new(1),
            orig_parent_uid: 0x3E8,
            orig_parent_entry_id: EntryId::new(7, 0x5A1B2C3D, 1),
            path_info_flags: flags,
            uid: 1000,
            gid: 1000,
            file_size: 0,
            num_hardlinks: 1,
            stripe_pattern_type: StripePatternType::Raid0,
            stripe_targets: vec![1],
            chunk_size: 4096,
            save_node_id: NodeId::new(1),
            is_inlined: true,
        }
    }

    #[test]
    fn test_orig_parent_layout_is_directory() {
        let path = expected_chunk_path(&inode(PATH_INFO_ORIG_PARENT));
        assert_eq!(path, "u3E8/5A1B/2/7-5A1B2C3D-1");
    }

    #[test]
    fn test_hash_dir_layout_is_directory() {
        let i = inode(0);
        assert_eq!(hash_dirs(&i.id), (0x66, 0x3A));
        assert_eq!(expected_chunk_path(&i), "66/3A");
    }

    #[test]
    fn test_hash32_vectors() {
        assert_eq!(hash32(b""), 0);
        assert_eq!(hash32(b"a"), 0x115E_A782);
        assert_eq!(hash32(b"ab"), 0x516B_8B44);
        assert_eq!(hash32(b"abc"), 0xD2BE_198A);
        assert_eq!(hash32(b"abcd"), 0xDAD8_B8DB);
        assert_eq!(hash32(b"2A-5E1F-3"), 0x75E6_3D3A);
        assert_eq!(hash32(b"11-5E000000-1"), 0xC21A_B175);
    }

    #[test]
    fn test_split_short_timestamps() {
        assert_eq!(split_timestamp("5A1"), ("5A1".to_string(), "0".to_string()));
        assert_eq!(split_timestamp("ABCD"), ("0".to_string(), "A".to_string()));
        assert_eq!(split_timestamp("12ABCD"), ("12".to_string(), "A".to_string()));
    }

    #[test]
    fn test_special_parent_uses_its_name_as_timestamp() {
        let mut i = inode(PATH_INFO_ORIG_PARENT);
        i.orig_parent_entry_id = EntryId::ROOT;
        assert_eq!(expected_chunk_path(&i), "u3E8/0/r/root");
    }
}
