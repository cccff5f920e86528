//! Item: a typed leaf value stored as a single payload file under its
//! owning collection's directory.

use crate::error::{CustodianResult, ServerError};
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Visibility of an item, checked by `AccessManager` before ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Private,
    Unlisted,
    Public,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Private => "PRIVATE",
            Permission::Unlisted => "UNLISTED",
            Permission::Public => "PUBLIC",
        }
    }

    pub fn parse(s: &str) -> CustodianResult<Self> {
        match s {
            "PRIVATE" => Ok(Permission::Private),
            "UNLISTED" => Ok(Permission::Unlisted),
            "PUBLIC" => Ok(Permission::Public),
            other => Err(ServerError::Parse(format!("unknown permission: {other}"))),
        }
    }
}

/// The type of content an item holds. `Image` is its own variant, never
/// aliased to `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Text,
    Image,
    Audio,
    Video,
    Stream,
    AudioStream,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Text => "TEXT",
            DataType::Image => "IMAGE",
            DataType::Audio => "AUDIO",
            DataType::Video => "VIDEO",
            DataType::Stream => "STREAM",
            DataType::AudioStream => "AUDIO_STREAM",
        }
    }

    pub fn parse(s: &str) -> CustodianResult<Self> {
        match s {
            "TEXT" => Ok(DataType::Text),
            "IMAGE" => Ok(DataType::Image),
            "AUDIO" => Ok(DataType::Audio),
            "VIDEO" => Ok(DataType::Video),
            "STREAM" => Ok(DataType::Stream),
            "AUDIO_STREAM" => Ok(DataType::AudioStream),
            other => Err(ServerError::Parse(format!("unknown data type: {other}"))),
        }
    }

    /// Wire resource-type flag values (see protocol flags field).
    pub fn from_resource_flag(flag: u8) -> CustodianResult<Self> {
        match flag {
            0x01 => Ok(DataType::Text),
            0x02 => Ok(DataType::Image),
            0x03 => Ok(DataType::Audio),
            0x04 => Ok(DataType::Video),
            0x05 => Ok(DataType::Stream),
            0x06 => Ok(DataType::AudioStream),
            _ => Err(ServerError::CommandFormat),
        }
    }
}

/// Payload state: items are loaded from disk lazily and can be unloaded to
/// free memory without losing metadata.
#[derive(Debug, Clone)]
pub enum Payload {
    Unloaded,
    Loaded(Vec<u8>),
}

/// A single typed value stored in a collection.
#[derive(Debug, Clone)]
pub struct Item {
    pub name: String,
    pub owner: Option<String>,
    pub perm: Permission,
    pub data_type: DataType,
    pub created_at: u64,
    pub modified_at: u64,
    pub data_size: u64,
    pub payload: Payload,
}

fn now_unix() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

impl Item {
    pub fn new(
        name: String,
        owner: Option<String>,
        perm: Permission,
        data_type: DataType,
    ) -> Self {
        let now = now_unix();
        Self {
            name,
            owner,
            perm,
            data_type,
            created_at: now,
            modified_at: now,
            data_size: 0,
            payload: Payload::Unloaded,
        }
    }

    /// Replace in-memory data; `data_size` and `modified_at` are updated.
    /// For `Text` items, the caller-supplied buffer is the exact text (no
    /// terminator); `data_size` stores `len + 1` and the on-disk/loaded
    /// representation carries the trailing null.
    pub fn set_data(&mut self, buf: Vec<u8>) {
        self.modified_at = now_unix();
        if self.data_type == DataType::Text {
            self.data_size = buf.len() as u64 + 1;
            let mut owned = buf;
            owned.push(0);
            self.payload = Payload::Loaded(owned);
        } else {
            self.data_size = buf.len() as u64;
            self.payload = Payload::Loaded(buf);
        }
    }

    /// Truncate and write the full payload to `path`. Fails with
    /// `FileOpen`/`FileWrite`.
    pub fn write(&self, path: &Path) -> CustodianResult<()> {
        let bytes = match &self.payload {
            Payload::Loaded(b) => b.as_slice(),
            Payload::Unloaded => return Err(ServerError::ItemCreate("no payload set".into())),
        };
        let mut file =
            fs::File::create(path).map_err(|_| ServerError::FileOpen(path.to_path_buf()))?;
        file.write_all(bytes)
            .map_err(|_| ServerError::FileWrite(path.to_path_buf()))?;
        Ok(())
    }

    /// Load `data_size` bytes from `path`. For `Text`, reads `data_size - 1`
    /// bytes and appends a null terminator.
    pub fn load(&mut self, path: &Path) -> CustodianResult<()> {
        let read_len = if self.data_type == DataType::Text && self.data_size > 0 {
            self.data_size - 1
        } else {
            self.data_size
        };
        let mut file =
            fs::File::open(path).map_err(|_| ServerError::FileOpen(path.to_path_buf()))?;
        let mut buf = vec![0u8; read_len as usize];
        std::io::Read::read_exact(&mut file, &mut buf)
            .map_err(|_| ServerError::FileRead(path.to_path_buf()))?;
        if self.data_type == DataType::Text {
            buf.push(0);
        }
        self.payload = Payload::Loaded(buf);
        Ok(())
    }

    pub fn unload(&mut self) {
        self.payload = Payload::Unloaded;
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.payload, Payload::Loaded(_))
    }

    /// Copy `min(buf.len(), data_size - offset)` bytes starting at `offset`
    /// into `buf`, returning the number of bytes written. 0 if
    /// `offset >= data_size` or the payload is unavailable.
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> usize {
        let Payload::Loaded(data) = &self.payload else {
            return 0;
        };
        if offset >= data.len() as u64 {
            return 0;
        }
        let start = offset as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        n
    }

    /// Manifest token: `name:owner:perm:type:created:modified:bytes`.
    pub fn to_manifest_token(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.name,
            self.owner.as_deref().unwrap_or(""),
            self.perm.as_str(),
            self.data_type.as_str(),
            self.created_at,
            self.modified_at,
            self.data_size
        )
    }

    pub fn from_manifest_token(token: &str) -> CustodianResult<Self> {
        let parts: Vec<&str> = token.split(':').collect();
        if parts.len() != 7 {
            return Err(ServerError::Parse(format!(
                "malformed manifest token: {token}"
            )));
        }
        let owner = if parts[1].is_empty() {
            None
        } else {
            Some(parts[1].to_string())
        };
        let created_at: u64 = parts[4]
            .parse()
            .map_err(|_| ServerError::Parse(format!("bad created_at in: {token}")))?;
        let modified_at: u64 = parts[5]
            .parse()
            .map_err(|_| ServerError::Parse(format!("bad modified_at in: {token}")))?;
        let data_size: u64 = parts[6]
            .parse()
            .map_err(|_| ServerError::Parse(format!("bad size in: {token}")))?;
        Ok(Item {
            name: parts[0].to_string(),
            owner,
            perm: Permission::parse(parts[2])?,
            data_type: DataType::parse(parts[3])?,
            created_at,
            modified_at,
            data_size,
            payload: Payload::Unloaded,
        })
    }
}

/// Payload file path for an item inside its collection directory.
pub fn item_path(collection_dir: &Path, item_name: &str) -> PathBuf {
    collection_dir.join(item_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_item_counts_null_terminator() {
        let mut item = Item::new("note".into(), None, Permission::Private, DataType::Text);
        item.set_data(b"hi".to_vec());
        assert_eq!(item.data_size, 3);
    }

    #[test]
    fn non_text_item_has_exact_size() {
        let mut item = Item::new("pic".into(), None, Permission::Public, DataType::Image);
        item.set_data(vec![1, 2, 3]);
        assert_eq!(item.data_size, 3);
    }

    #[test]
    fn manifest_round_trip_preserves_fields() {
        let mut item = Item::new(
            "a".into(),
            Some("uid123".into()),
            Permission::Unlisted,
            DataType::Audio,
        );
        item.set_data(vec![9, 9]);
        let token = item.to_manifest_token();
        let parsed = Item::from_manifest_token(&token).unwrap();
        assert_eq!(parsed.name, "a");
        assert_eq!(parsed.owner.as_deref(), Some("uid123"));
        assert_eq!(parsed.perm, Permission::Unlisted);
        assert_eq!(parsed.data_type, DataType::Audio);
        assert_eq!(parsed.data_size, 2);
    }

    #[test]
    fn empty_owner_round_trips_as_none() {
        let item = Item::new("a".into(), None, Permission::Public, DataType::Text);
        let token = item.to_manifest_token();
        let parsed = Item::from_manifest_token(&token).unwrap();
        assert_eq!(parsed.owner, None);
    }

    #[test]
    fn read_into_respects_offset_and_bounds() {
        let mut item = Item::new("a".into(), None, Permission::Public, DataType::Image);
        item.set_data(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 2];
        let n = item.read_into(3, &mut buf);
        assert_eq!(n, 2);
        assert_eq!(buf, [4, 5]);

        let n_oob = item.read_into(10, &mut buf);
        assert_eq!(n_oob, 0);
    }
}
