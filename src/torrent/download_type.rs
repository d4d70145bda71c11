use anyhow::{Error, Result, anyhow, bail};

use crate::bencoding::Value;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum DownloadType {
    SingleFile {
        name: String,
        size: u64,
    },
    MultiFile {
        directory_name: String,
        files: Vec<File>,
    },
}

impl DownloadType {
    pub fn name(&self) -> &str {
        match self {
            Self::SingleFile { name, .. } => name,
            Self::MultiFile { directory_name, .. } => directory_name,
        }
    }

    pub fn total_size(&self) -> u64 {
        match self {
            Self::SingleFile { size, .. } => *size,
            Self::MultiFile { files, .. } => files.iter().map(|file| file.size).sum(),
        }
    }
}

impl TryFrom<Value> for DownloadType {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let name: String = value.remove_entry("name")?.try_into()?;
        validate_component(&name)?;
        if let Some(length) = value.try_remove_entry("length")? {
            return Ok(DownloadType::SingleFile {
                name,
                size: length.try_into()?,
            });
        }

        if let Some(files) = value.try_remove_entry("files")? {
            let files: Vec<Value> = files.try_into()?;
            let mut result = Vec::with_capacity(files.len());
            for file in files {
                result.push(file.try_into()?);
            }
            return Ok(DownloadType::MultiFile {
                directory_name: name,
                files: result,
            });
        }

        Err(anyhow!("invalid metainfo: neither 'length' nor 'files' present"))
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct File {
    /// Path components relative to the torrent's directory.
    pub path: Vec<String>,
    pub size: u64,
}

impl TryFrom<Value> for File {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let size = value.remove_entry("length")?.try_into()?;
        let parts: Vec<Value> = value.remove_entry("path")?.try_into()?;
        if parts.is_empty() {
            bail!("file path is empty");
        }
        let mut path = Vec::with_capacity(parts.len());
        for part in parts {
            let part: String = part.try_into()?;
            validate_component(&part)?;
            path.push(part);
        }
        Ok(File { path, size })
    }
}

/// Components end up on the local file system, anything that could escape the download
/// directory is refused.
fn validate_component(component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\', '\0'])
    {
        bail!("invalid path component {:?}", component);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_parent_directory_component() {
        let file = Value::dictionary()
            .with_entry("length", Value::Integer(1))
            .with_entry(
                "path",
                Value::list()
                    .with_value(Value::string(".."))
                    .with_value(Value::string("passwd")),
            );

        assert!(File::try_from(file).is_err());
    }

    #[test]
    fn reject_separator_in_name() {
        let info = Value::dictionary()
            .with_entry("name", Value::string("a/b"))
            .with_entry("length", Value::Integer(1));

        assert!(DownloadType::try_from(info).is_err());
    }
}
