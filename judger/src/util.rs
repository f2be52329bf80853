use std::path::Path;

use names::{Generator, Name};
use tokio::io::AsyncReadExt;

/// Generate a random plain name, usable for working directories, chroot
/// mount points and per-case scratch files.
pub fn random_name() -> String {
    Generator::with_naming(Name::Plain).next().unwrap()
}

/// Read at most `limit` bytes from the start of a file, lossily decoded.
///
/// Used for the input/output/answer echoes inside judge details, which only
/// ever show a prefix of the real files.
pub async fn read_first_bytes(path: &Path, limit: usize) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
