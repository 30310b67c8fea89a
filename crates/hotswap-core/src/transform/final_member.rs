//! Final relaxation

use super::TransformError;
use hotswap_bytecode::{access, ClassFile};

pub(super) fn apply(
    class: &mut ClassFile,
    name: &str,
    descriptor: Option<&str>,
) -> Result<bool, TransformError> {
    // A method descriptor narrows to methods, a field descriptor to fields
    let (methods, fields) = match descriptor {
        Some(d) if d.starts_with('(') => (true, false),
        Some(_) => (false, true),
        None => (true, true),
    };

    let mut declared = false;
    let mut matched = false;
    let mut changed = false;

    if methods {
        for method in class.methods.iter_mut().filter(|m| m.name == name) {
            declared = true;
            if descriptor.is_some_and(|d| d != method.descriptor) {
                continue;
            }
            matched = true;
            if method.is_final() {
                method.access &= !access::FINAL;
                changed = true;
            }
        }
    }

    if fields {
        if let Some(field) = class.fields.iter_mut().find(|f| f.name == name) {
            declared = true;
            if descriptor.map_or(true, |d| d == field.descriptor) {
                matched = true;
                if field.is_final() {
                    field.access &= !access::FINAL;
                    changed = true;
                }
            }
        }
    }

    if !declared {
        tracing::debug!(type_name = %class.name, member = name, "final member not declared here");
        return Ok(false);
    }
    if !matched {
        return Err(TransformError::malformed(
            &class.name,
            format!(
                "no declaration of {} matches descriptor {}",
                name,
                descriptor.unwrap_or_default()
            ),
        ));
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotswap_bytecode::{FieldInfo, MethodInfo};

    fn widget() -> ClassFile {
        let mut class = ClassFile::new("com.example.Widget");
        class
            .methods
            .push(MethodInfo::new(access::PUBLIC | access::FINAL, "render", "()V", 1, Vec::new()));
        class.methods.push(MethodInfo::new(
            access::PUBLIC | access::FINAL,
            "render",
            "(I)V",
            2,
            Vec::new(),
        ));
        class
            .fields
            .push(FieldInfo::new(access::PRIVATE | access::FINAL, "size", "I"));
        class
    }

    #[test]
    fn test_all_overloads() {
        let mut class = widget();
        assert!(apply(&mut class, "render", None).unwrap());
        assert!(class.methods.iter().all(|m| !m.is_final()));
        assert!(!apply(&mut class, "render", None).unwrap());
    }

    #[test]
    fn test_single_overload() {
        let mut class = widget();
        assert!(apply(&mut class, "render", Some("(I)V")).unwrap());
        assert!(class.method("render", "()V").unwrap().is_final());
        assert!(!class.method("render", "(I)V").unwrap().is_final());
    }

    #[test]
    fn test_field() {
        let mut class = widget();
        assert!(apply(&mut class, "size", Some("I")).unwrap());
        assert_eq!(class.field("size").unwrap().access, access::PRIVATE);
    }

    #[test]
    fn test_mismatch_and_absent() {
        let mut class = widget();
        assert!(apply(&mut class, "render", Some("(J)V")).is_err());
        assert!(apply(&mut class, "size", Some("J")).is_err());
        assert!(!apply(&mut class, "paint", None).unwrap());
    }
}
