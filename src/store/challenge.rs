use std::path::Path;

use tokio::fs;

use crate::store::Result;

/// Loads the server nonce persisted by the previous session, enabling the
/// one-round-trip login. A missing file just means no cached challenge.
pub async fn load(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(None),
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Overwrites the challenge file atomically: write a sibling temp file,
/// then rename over the target. Must complete before the state machine
/// advances past login.
pub async fn persist(path: &Path, nonce: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, nonce).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
