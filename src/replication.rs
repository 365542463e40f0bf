//! The replication driver.
//!
//! Replication speaks a framed message protocol over a byte stream:
//! one tag byte, a packed payload length, then the payload. A leader
//! serves a follower either a whole-database copy (header, the table
//! files in cache-priority order, then a footer naming the revision the
//! follower must reach before activating the copy) or a contiguous run
//! of changeset files, always terminated by an end-of-changes message.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use log::debug;

use crate::changeset::{changeset_file_name, read_changeset_revisions};
use crate::database::Database;
use crate::error::{Result, ShaleError};
use crate::util::pack::{pack_uint, read_uint, unpack_uint, write_uint};
use crate::version::VERSION_FILE_NAME;
use crate::Revision;

/// Upper bound on whole-database copies per conversation. A follower
/// chasing a writer that commits in a tight loop still terminates.
pub const MAX_DB_COPIES_PER_CONVERSATION: u32 = 5;

/// Message tags of the replication protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyType {
    /// The conversation is complete.
    EndOfChanges = 0,
    /// Terminal failure; the payload is a human-readable explanation.
    Fail = 1,
    /// UUID and revision of the database about to be copied.
    DbHeader = 2,
    /// Leaf name of the next file in a whole-database copy.
    DbFilename = 3,
    /// Contents of the file just named.
    DbFiledata = 4,
    /// Revision the follower must reach before activating the copy.
    DbFooter = 5,
    /// One changeset file.
    Changeset = 6,
}

impl ReplyType {
    /// Decode a message tag.
    pub fn from_u8(tag: u8) -> Option<ReplyType> {
        match tag {
            0 => Some(ReplyType::EndOfChanges),
            1 => Some(ReplyType::Fail),
            2 => Some(ReplyType::DbHeader),
            3 => Some(ReplyType::DbFilename),
            4 => Some(ReplyType::DbFiledata),
            5 => Some(ReplyType::DbFooter),
            6 => Some(ReplyType::Changeset),
            _ => None,
        }
    }
}

/// Counters accumulated over one replication conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationInfo {
    /// Whole-database copies sent.
    pub fullcopy_count: u32,

    /// Changesets sent.
    pub changeset_count: u32,

    /// Whether the follower has been brought up to the revision it
    /// needs to activate its copy.
    pub changed: bool,
}

/// Send one framed message.
pub fn send_message<W: Write>(out: &mut W, reply: ReplyType, payload: &[u8]) -> Result<()> {
    out.write_all(&[reply as u8])?;
    write_uint(out, payload.len() as u64)?;
    out.write_all(payload)?;
    Ok(())
}

/// Send a file's contents as one framed message.
fn send_file<W: Write>(out: &mut W, reply: ReplyType, file: &mut File) -> Result<()> {
    let len = file.metadata()?.len();
    out.write_all(&[reply as u8])?;
    write_uint(out, len)?;
    let copied = std::io::copy(file, out)?;
    if copied != len {
        return Err(ShaleError::database(
            "File changed size while being replicated",
        ));
    }
    Ok(())
}

/// Read one framed message, returning the tag byte and payload. This is
/// the receiving half used by followers (and tests).
pub fn read_message<R: Read>(input: &mut R) -> Result<(u8, Vec<u8>)> {
    let mut tag = [0u8; 1];
    input.read_exact(&mut tag)?;
    let len = read_uint(input)? as usize;
    let mut payload = vec![0u8; len];
    input.read_exact(&mut payload)?;
    Ok((tag[0], payload))
}

/// The table files of a whole-database copy. Order matters: the file
/// the follower most wants hot in its page cache goes last.
const DB_FILES: &[&str] = &[
    "termlist.DB",
    "termlist.baseA",
    "termlist.baseB",
    "synonym.DB",
    "synonym.baseA",
    "synonym.baseB",
    "spelling.DB",
    "spelling.baseA",
    "spelling.baseB",
    "record.DB",
    "record.baseA",
    "record.baseB",
    "position.DB",
    "position.baseA",
    "position.baseB",
    "postlist.DB",
    "postlist.baseA",
    "postlist.baseB",
    VERSION_FILE_NAME,
];

impl Database {
    /// Stream a whole-database copy: header with UUID and revision,
    /// then each existing table file as a filename/filedata pair.
    pub fn send_whole_database<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut header = Vec::new();
        let uuid = self.uuid();
        pack_uint(&mut header, uuid.as_bytes().len() as u64);
        header.extend_from_slice(uuid.as_bytes());
        pack_uint(&mut header, self.revision());
        send_message(out, ReplyType::DbHeader, &header)?;

        for name in DB_FILES {
            let path = self.inner.dir.join(name);
            // Open eagerly; a file removed while we walk the list is
            // simply skipped rather than raced against.
            let mut file = match File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            send_message(out, ReplyType::DbFilename, name.as_bytes())?;
            send_file(out, ReplyType::DbFiledata, &mut file)?;
        }
        Ok(())
    }

    /// Bring a follower up to date.
    ///
    /// `revision_token` is the packed revision the follower last saw;
    /// an unparsable token means it has none and needs a full copy.
    /// Streams either whole-database copies or a contiguous run of
    /// changesets, and always terminates: full copies are bounded by
    /// [`MAX_DB_COPIES_PER_CONVERSATION`], after which the conversation
    /// ends with a fail message.
    pub fn write_changesets_to<W: Write>(
        &mut self,
        out: &mut W,
        revision_token: &[u8],
        mut need_whole_db: bool,
        info: &mut ReplicationInfo,
    ) -> Result<()> {
        let mut whole_db_copies_left = MAX_DB_COPIES_PER_CONVERSATION;
        let mut start_uuid = self.uuid();
        let mut start_rev: Revision = 0;
        let mut needed_rev: Revision = 0;

        {
            let mut token = revision_token;
            match unpack_uint(&mut token) {
                Ok(rev) => start_rev = rev,
                Err(_) => need_whole_db = true,
            }
        }

        loop {
            if need_whole_db {
                if whole_db_copies_left == 0 {
                    send_message(out, ReplyType::Fail, b"Database changing too fast")?;
                    return Ok(());
                }
                whole_db_copies_left -= 1;

                start_rev = self.revision();
                start_uuid = self.uuid();
                debug!("replication: sending whole database at revision {start_rev}");
                self.send_whole_database(out)?;
                info.fullcopy_count += 1;
                need_whole_db = false;

                self.reopen()?;
                if start_uuid == self.uuid() {
                    // The follower must catch up to the revision now
                    // current before the copy is safe to make live.
                    needed_rev = self.revision();
                    let mut footer = Vec::new();
                    pack_uint(&mut footer, needed_rev);
                    send_message(out, ReplyType::DbFooter, &footer)?;
                    if start_rev == needed_rev {
                        info.changed = true;
                    }
                } else {
                    // The database was replaced while we copied it.
                    // Advertise a revision the follower will never
                    // receive, so it can't activate the half-baked
                    // copy, and start the copy over.
                    let mut footer = Vec::new();
                    pack_uint(&mut footer, start_rev + 1);
                    send_message(out, ReplyType::DbFooter, &footer)?;
                    need_whole_db = true;
                }
            } else {
                if start_rev >= self.revision() {
                    self.reopen()?;
                    if start_uuid != self.uuid() {
                        need_whole_db = true;
                        continue;
                    }
                    if start_rev >= self.revision() {
                        break;
                    }
                }

                let path = self.inner.dir.join(changeset_file_name(start_rev));
                // Open eagerly rather than probing for existence first;
                // a changeset reclaimed between probe and send would
                // otherwise race.
                let mut file = match File::open(&path) {
                    Ok(file) => file,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        need_whole_db = true;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                let (cs_start, cs_end) = read_changeset_revisions(&mut file)?;
                if cs_start != start_rev {
                    return Err(ShaleError::database(
                        "Changeset start revision does not match changeset filename",
                    ));
                }
                if cs_start >= cs_end {
                    return Err(ShaleError::database(
                        "Changeset start revision is not less than end revision",
                    ));
                }
                file.seek(SeekFrom::Start(0))?;
                debug!("replication: sending changeset {cs_start} -> {cs_end}");
                send_file(out, ReplyType::Changeset, &mut file)?;
                start_rev = cs_end;
                info.changeset_count += 1;
                if start_rev >= needed_rev {
                    info.changed = true;
                }
            }
        }
        send_message(out, ReplyType::EndOfChanges, &[])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_round_trip() {
        let mut buf = Vec::new();
        send_message(&mut buf, ReplyType::DbFilename, b"postlist.DB").unwrap();
        send_message(&mut buf, ReplyType::EndOfChanges, b"").unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let (tag, payload) = read_message(&mut cursor).unwrap();
        assert_eq!(ReplyType::from_u8(tag), Some(ReplyType::DbFilename));
        assert_eq!(payload, b"postlist.DB");

        let (tag, payload) = read_message(&mut cursor).unwrap();
        assert_eq!(ReplyType::from_u8(tag), Some(ReplyType::EndOfChanges));
        assert!(payload.is_empty());
    }

    #[test]
    fn test_truncated_message() {
        let mut buf = Vec::new();
        send_message(&mut buf, ReplyType::Changeset, b"0123456789").unwrap();
        buf.truncate(buf.len() - 3);

        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_message(&mut cursor).is_err());
    }

    #[test]
    fn test_reply_type_codes() {
        for tag in 0..=6u8 {
            let reply = ReplyType::from_u8(tag).unwrap();
            assert_eq!(reply as u8, tag);
        }
        assert_eq!(ReplyType::from_u8(7), None);
    }
}
