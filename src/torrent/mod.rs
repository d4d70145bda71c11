mod download_type;
mod info;

use std::path::Path;

use anyhow::{Context, Error, Result};
use log::warn;
use tokio::fs::File;
use url::Url;

use crate::bencoding::{Value, encode_string};
use crate::codec::ReadFrom;

pub use download_type::*;
pub use info::*;

// https://wiki.theory.org/BitTorrentSpecification#Metainfo_File_Structure

#[derive(Debug, PartialEq, Clone)]
pub struct Torrent {
    /// `announce` followed by the flattened `announce-list` tiers, without duplicates.
    pub trackers: Vec<Url>,
    pub info: Info,
}

impl Torrent {
    pub async fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path)
            .await
            .with_context(|| format!("unable to open {}", path.display()))?;
        let value = Value::read_from(&mut file)
            .await
            .with_context(|| format!("unable to decode {}", path.display()))?;
        Torrent::try_from(value)
    }

    /// Encodes the metainfo keeping the info dictionary byte-for-byte, so the info hash of the
    /// written file always matches.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.info.as_bytes().len() + 256);
        out.push(b'd');
        if let Some(announce) = self.trackers.first() {
            encode_string(b"announce", &mut out);
            encode_string(announce.as_str().as_bytes(), &mut out);
        }
        if self.trackers.len() > 1 {
            let tiers = self.trackers.iter().fold(Value::list(), |tiers, tracker| {
                tiers.with_value(Value::list().with_value(Value::string(tracker.as_str())))
            });
            encode_string(b"announce-list", &mut out);
            tiers.encode_into(&mut out);
        }
        encode_string(b"info", &mut out);
        out.extend_from_slice(self.info.as_bytes());
        out.push(b'e');
        out
    }
}

impl TryFrom<Value> for Torrent {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let mut announce: Vec<String> = Vec::new();
        if let Some(url) = value.try_remove_entry("announce")? {
            let url: String = url.try_into()?;
            announce.push(url);
        }
        if let Some(tiers) = value.try_remove_entry("announce-list")? {
            let tiers: Vec<Value> = tiers.try_into()?;
            for tier in tiers {
                let tier: Vec<Value> = tier.try_into()?;
                for url in tier {
                    let url: String = url.try_into()?;
                    announce.push(url);
                }
            }
        }
        let info = value.remove_entry("info")?.try_into()?;
        Ok(Torrent {
            trackers: parse_trackers(announce),
            info,
        })
    }
}

pub fn parse_trackers(urls: Vec<String>) -> Vec<Url> {
    let mut trackers: Vec<Url> = Vec::with_capacity(urls.len());
    for url in urls {
        match Url::parse(&url) {
            Ok(url) if !trackers.contains(&url) => trackers.push(url),
            Ok(_) => {}
            Err(err) => warn!("ignoring tracker {:?}: {}", url, err),
        }
    }
    trackers
}
