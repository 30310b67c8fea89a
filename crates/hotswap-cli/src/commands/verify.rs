//! `hotswap verify`: run the structural verifier over class binaries.

use super::read_class;
use crate::output::StyledOutput;
use anyhow::Context;
use hotswap_bytecode::verify_class;
use std::path::{Path, PathBuf};

pub fn execute(files: &[PathBuf], color: &str) -> anyhow::Result<usize> {
    let mut out = StyledOutput::new(color);
    let mut failed = 0;

    for file in files {
        match verify_file(file) {
            Ok(name) => {
                out.ok_badge();
                out.plain(&format!(" {}", file.display()));
                out.dim(&format!(" ({})", name));
                out.newline();
            }
            Err(error) => {
                failed += 1;
                out.fail_badge();
                out.plain(&format!(" {}", file.display()));
                out.newline();
                out.stderr_error(&format!("  {:#}", error));
            }
        }
    }

    out.newline();
    if failed == 0 {
        out.success(&format!("{} verified", files.len()));
    } else {
        out.warning(&format!("{} of {} failed verification", failed, files.len()));
    }
    out.newline();
    Ok(failed)
}

/// Verify one file; returns the class name
fn verify_file(path: &Path) -> anyhow::Result<String> {
    let (_, class) = read_class(path)?;
    verify_class(&class).with_context(|| format!("{} failed verification", class.name))?;
    Ok(class.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotswap_bytecode::{access, BytecodeWriter, ClassFile, MethodInfo};
    use tempfile::TempDir;

    fn write_class(dir: &TempDir, name: &str, code: Vec<u8>) -> PathBuf {
        let mut class = ClassFile::new(name);
        class
            .methods
            .push(MethodInfo::new(access::PUBLIC, "run", "()V", 1, code));
        let path = dir.path().join(format!("{}.class", name));
        std::fs::write(&path, class.encode()).unwrap();
        path
    }

    #[test]
    fn test_verify_counts_failures() {
        let dir = TempDir::new().unwrap();

        let mut good = BytecodeWriter::new();
        good.emit_return_void();
        let good = write_class(&dir, "com.example.Good", good.into_bytes());

        // Pops from an empty stack
        let mut bad = BytecodeWriter::new();
        bad.emit_pop();
        bad.emit_return_void();
        let bad = write_class(&dir, "com.example.Bad", bad.into_bytes());

        let missing = dir.path().join("missing.class");

        assert_eq!(verify_file(&good).unwrap(), "com.example.Good");
        assert!(verify_file(&bad).is_err());
        assert_eq!(execute(&[good, bad, missing], "never").unwrap(), 2);
    }
}
