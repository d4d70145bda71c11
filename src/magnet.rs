use std::str::FromStr;

use anyhow::{Error, Result, anyhow, bail};
use url::Url;

use crate::core::Sha1;
use crate::torrent::parse_trackers;

const SCHEME: &str = "magnet";
const BTIH_PREFIX: &str = "urn:btih:";

/// A parsed `magnet:` link. Only v1 (`btih`) links are understood.
#[derive(Debug, PartialEq, Clone)]
pub struct Magnet {
    pub info_hash: Sha1,
    pub display_name: Option<String>,
    pub trackers: Vec<Url>,
}

impl FromStr for Magnet {
    type Err = Error;

    fn from_str(link: &str) -> Result<Self> {
        let url = Url::parse(link).map_err(|err| anyhow!("invalid magnet link: {}", err))?;
        if url.scheme() != SCHEME {
            bail!("unsupported scheme '{}'", url.scheme());
        }
        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" if info_hash.is_none() => {
                    if let Some(hash) = value.strip_prefix(BTIH_PREFIX) {
                        info_hash = Some(parse_info_hash(hash)?);
                    }
                }
                "dn" => display_name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }
        let info_hash = info_hash.ok_or_else(|| anyhow!("magnet link has no 'xt=urn:btih:' hash"))?;
        Ok(Magnet {
            info_hash,
            display_name,
            trackers: parse_trackers(trackers),
        })
    }
}

fn parse_info_hash(hash: &str) -> Result<Sha1> {
    match hash.len() {
        40 => Sha1::from_hex(hash).map_err(|err| anyhow!("invalid hex info hash: {}", err)),
        32 => {
            let bytes = data_encoding::BASE32_NOPAD
                .decode(hash.to_ascii_uppercase().as_bytes())
                .map_err(|err| anyhow!("invalid base32 info hash: {}", err))?;
            let bytes: [u8; 20] = bytes
                .try_into()
                .map_err(|_| anyhow!("base32 info hash has the wrong length"))?;
            Ok(Sha1(bytes))
        }
        length => bail!("info hash has invalid length {}", length),
    }
}
