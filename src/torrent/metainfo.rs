use super::BLOCK_LEN;
use crate::bencode::{encode, BencodeValue};
use crate::error::{BittorrentError, Result};
use sha1::{Digest, Sha1};

/// Represents a file in a multi-file torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: Vec<String>,
    pub length: u64,
}

/// Information about the torrent contents
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Suggested name for the file or directory
    pub name: String,
    /// Number of bytes in each piece (the last one may be shorter)
    pub piece_length: u64,
    /// SHA1 digest of each piece
    pub piece_hashes: Vec<[u8; 20]>,
    /// Files in the torrent; content is laid out flat in this order
    pub files: Vec<FileInfo>,
    /// Total length of all files
    pub total_length: u64,
}

impl TorrentInfo {
    fn from_bencode(value: &BencodeValue) -> Result<Self> {
        let invalid = |msg: &str| BittorrentError::InvalidTorrent(msg.to_string());

        if value.as_dict().is_none() {
            return Err(invalid("Info must be a dict"));
        }

        let name = value
            .get_str(b"name")
            .ok_or_else(|| invalid("Missing 'name' field"))?
            .to_string();

        let piece_length = value
            .get_u64(b"piece length")
            .filter(|&len| len > 0)
            .ok_or_else(|| invalid("Missing or zero 'piece length' field"))?;

        let pieces = value
            .get_bytes(b"pieces")
            .ok_or_else(|| invalid("Missing 'pieces' field"))?;
        if pieces.len() % 20 != 0 {
            return Err(invalid("Pieces length must be multiple of 20"));
        }
        let piece_hashes: Vec<[u8; 20]> = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let files = if let Some(length) = value.get(b"length") {
            let length = length
                .as_integer()
                .and_then(|i| u64::try_from(i).ok())
                .ok_or_else(|| invalid("Invalid 'length' field"))?;
            vec![FileInfo {
                path: vec![name.clone()],
                length,
            }]
        } else if let Some(files) = value.get(b"files") {
            files
                .as_list()
                .ok_or_else(|| invalid("Invalid 'files' field"))?
                .iter()
                .map(parse_file_entry)
                .collect::<Result<Vec<_>>>()?
        } else {
            return Err(invalid("Missing 'length' or 'files' field"));
        };

        let total_length: u64 = files.iter().map(|f| f.length).sum();

        let expected_pieces = total_length.div_ceil(piece_length);
        if piece_hashes.len() as u64 != expected_pieces {
            return Err(BittorrentError::InvalidTorrent(format!(
                "{} piece hashes for {} bytes in {}-byte pieces, expected {}",
                piece_hashes.len(),
                total_length,
                piece_length,
                expected_pieces
            )));
        }

        Ok(TorrentInfo {
            name,
            piece_length,
            piece_hashes,
            files,
            total_length,
        })
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Length of piece `index`. The last piece holds whatever remains of
    /// the total; out-of-range indices have length 0.
    pub fn piece_len(&self, index: usize) -> u64 {
        let count = self.piece_count();
        if index >= count {
            return 0;
        }
        if index == count - 1 {
            self.total_length
                .saturating_sub(self.piece_length * (count as u64 - 1))
        } else {
            self.piece_length
        }
    }

    pub fn blocks_per_piece(&self, index: usize) -> usize {
        self.piece_len(index).div_ceil(BLOCK_LEN as u64) as usize
    }

    /// Length of block `block` within piece `index`; only the final block
    /// of a piece can be short.
    pub fn block_len(&self, index: usize, block: usize) -> u32 {
        let piece_len = self.piece_len(index);
        let begin = block as u64 * BLOCK_LEN as u64;
        piece_len.saturating_sub(begin).min(BLOCK_LEN as u64) as u32
    }
}

fn parse_file_entry(value: &BencodeValue) -> Result<FileInfo> {
    let invalid = |msg: &str| BittorrentError::InvalidTorrent(msg.to_string());

    let length = value
        .get_u64(b"length")
        .ok_or_else(|| invalid("Missing file 'length'"))?;

    let path = value
        .get(b"path")
        .and_then(|v| v.as_list())
        .ok_or_else(|| invalid("Missing file 'path'"))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(String::from)
                .ok_or_else(|| invalid("Invalid path component"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(FileInfo { path, length })
}

/// Top-level metainfo structure from a .torrent file
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// URL of the tracker
    pub announce: String,
    /// Additional tracker URLs, grouped in tiers
    pub announce_list: Option<Vec<Vec<String>>>,
    pub info: TorrentInfo,
    /// SHA1 of the bencoded info dictionary
    pub info_hash: [u8; 20],
}

impl Metainfo {
    pub fn from_bencode(value: &BencodeValue) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(BittorrentError::InvalidTorrent(
                "Torrent must be a dict".to_string(),
            ));
        }

        let announce = value
            .get_str(b"announce")
            .ok_or_else(|| {
                BittorrentError::InvalidTorrent("Missing 'announce' field".to_string())
            })?
            .to_string();

        let announce_list = value.get(b"announce-list").and_then(|v| {
            v.as_list().map(|tiers| {
                tiers
                    .iter()
                    .filter_map(|tier| {
                        tier.as_list().map(|urls| {
                            urls.iter()
                                .filter_map(|u| u.as_str().map(String::from))
                                .collect()
                        })
                    })
                    .collect()
            })
        });

        let info_value = value
            .get(b"info")
            .ok_or_else(|| BittorrentError::InvalidTorrent("Missing 'info' field".to_string()))?;

        let info = TorrentInfo::from_bencode(info_value)?;

        Ok(Metainfo {
            announce,
            announce_list,
            info,
            info_hash: info_hash(info_value),
        })
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Tracker URLs to try, primary announce first, without duplicates.
    pub fn announce_urls(&self) -> Vec<String> {
        let mut urls = vec![self.announce.clone()];
        for url in self.announce_list.iter().flatten().flatten() {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }
}

/// SHA1 over the canonical encoding of the info dictionary.
pub fn info_hash(info: &BencodeValue) -> [u8; 20] {
    let digest = Sha1::digest(encode(info));
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest);
    hash
}
