//! `hotswap inspect`: print the shape of a class binary.

use super::read_class;
use crate::output::StyledOutput;
use hotswap_bytecode::{access, flags, ClassFile};
use std::path::Path;

pub fn execute(file: &Path, color: &str) -> anyhow::Result<usize> {
    let (bytes, class) = read_class(file)?;
    let mut out = StyledOutput::new(color);

    out.bold(&class.name);
    if let Some(super_name) = &class.super_name {
        out.dim(&format!(" extends {}", super_name));
    }
    out.newline();

    out.plain(&format!(
        "  access: {}   flags: {}   size: {} bytes",
        access_names(class.access),
        flag_names(class.flags),
        bytes.len()
    ));
    out.newline();
    if !class.interfaces.is_empty() {
        out.plain(&format!("  implements: {}", class.interfaces.join(", ")));
        out.newline();
    }
    if let Some(source) = &class.source_file {
        out.plain(&format!("  source: {}", source));
        out.newline();
    }
    out.dim(&format!("  constants: {}", pool_summary(&class)));
    out.newline();

    out.info(&format!("  fields ({})", class.fields.len()));
    out.newline();
    for field in &class.fields {
        out.plain(&format!(
            "    {} {}: {}",
            access_names(field.access),
            field.name,
            field.descriptor
        ));
        out.newline();
    }

    out.info(&format!("  methods ({})", class.methods.len()));
    out.newline();
    for method in &class.methods {
        out.plain(&format!(
            "    {} {}{}",
            access_names(method.access),
            method.name,
            method.descriptor
        ));
        out.dim(&format!(
            "  [locals {}, {} code bytes]",
            method.max_locals,
            method.code.len()
        ));
        out.newline();
    }

    Ok(0)
}

/// Space-separated access keywords, `package` when no visibility bit is set
fn access_names(bits: u16) -> String {
    const NAMES: [(u16, &str); 7] = [
        (access::PUBLIC, "public"),
        (access::PROTECTED, "protected"),
        (access::PRIVATE, "private"),
        (access::STATIC, "static"),
        (access::FINAL, "final"),
        (access::ABSTRACT, "abstract"),
        (access::SYNTHETIC, "synthetic"),
    ];

    let mut names: Vec<&str> = Vec::new();
    if bits & access::VISIBILITY == 0 {
        names.push("package");
    }
    names.extend(
        NAMES
            .iter()
            .filter(|(bit, _)| bits & bit != 0)
            .map(|(_, name)| *name),
    );
    names.join(" ")
}

fn flag_names(value: u32) -> String {
    let mut names = Vec::new();
    if value & flags::HAS_SOURCE_FILE != 0 {
        names.push("source-file");
    }
    if value & flags::RETROFITTED != 0 {
        names.push("retrofitted");
    }
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

fn pool_summary(class: &ClassFile) -> String {
    let pool = &class.constants;
    format!(
        "{} strings, {} numbers, {} classes, {} members",
        pool.strings.len(),
        pool.integers.len() + pool.longs.len() + pool.floats.len() + pool.doubles.len(),
        pool.classes.len(),
        pool.members.len()
    )
}
