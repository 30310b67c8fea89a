//! Command implementations.
//!
//! Each `execute` returns the number of inputs that failed; the binary exits
//! non-zero when it is positive.

pub mod inspect;
pub mod rewrite;
pub mod verify;

use anyhow::Context;
use hotswap_bytecode::ClassFile;
use std::path::Path;

/// Read and decode one class binary
pub(crate) fn read_class(path: &Path) -> anyhow::Result<(Vec<u8>, ClassFile)> {
    let bytes =
        std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let class = ClassFile::decode(&bytes)
        .with_context(|| format!("{} is not a valid class binary", path.display()))?;
    Ok((bytes, class))
}
