use std::io;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::config::ConfPaths;
use crate::types::ProxyConfig;

#[derive(Debug, Error)]
pub enum WriteError {
	#[error("encoding config document failed: {0}")]
	Encode(#[from] serde_json::Error),
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error("config file {0} did not read back identically")]
	Mismatch(String),
}

/// Load the three documents from disk. A missing file yields the empty
/// document at version 0; anything else that fails to read or parse is
/// fatal.
pub fn load(paths: &ConfPaths) -> anyhow::Result<ProxyConfig> {
	Ok(ProxyConfig {
		lds: load_doc(&paths.lds)?,
		cds: load_doc(&paths.cds)?,
		eds: load_doc(&paths.eds)?,
	})
}

fn load_doc<T: DeserializeOwned + Default>(path: &Path) -> anyhow::Result<T> {
	use anyhow::Context;
	match fs_err::read_to_string(path) {
		Ok(raw) => {
			serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
		},
		Err(e) if e.kind() == io::ErrorKind::NotFound => {
			debug!(path = %path.display(), "config file missing, starting empty");
			Ok(T::default())
		},
		Err(e) => Err(e.into()),
	}
}

/// Write the three documents, LDS first, then CDS, then EDS. Each file is
/// read back and byte-compared; a mismatch aborts the worker iteration.
pub fn write(paths: &ConfPaths, conf: &ProxyConfig) -> Result<(), WriteError> {
	write_doc(&paths.lds, &conf.lds)?;
	write_doc(&paths.cds, &conf.cds)?;
	write_doc(&paths.eds, &conf.eds)?;
	Ok(())
}

fn write_doc<T: Serialize>(path: &Path, doc: &T) -> Result<(), WriteError> {
	let encoded = serde_json::to_string(doc)?;
	fs_err::write(path, &encoded)?;
	let read_back = fs_err::read_to_string(path)?;
	if read_back != encoded {
		return Err(WriteError::Mismatch(path.display().to_string()));
	}
	Ok(())
}
