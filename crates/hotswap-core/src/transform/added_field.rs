//! Added fields: declarations and side-table redirection

use super::{rewrite_bodies, TransformError};
use crate::boxing::{self, CodeBuilder, OBJECT};
use crate::side_table::{EntryPoint, FIELD_GET, FIELD_GET_STATIC, FIELD_PUT, FIELD_PUT_STATIC};
use hotswap_bytecode::{access, ClassFile, FieldType, Opcode};

pub(super) fn apply(
    class: &mut ClassFile,
    owner: &str,
    name: &str,
    descriptor: &str,
    granted: u16,
) -> Result<bool, TransformError> {
    let field_type = FieldType::parse(descriptor).map_err(|e| {
        TransformError::malformed(&class.name, format!("field {}.{}: {}", owner, name, e))
    })?;

    let mut changed = false;
    if class.name == owner {
        let type_name = class.name.clone();
        match class.field_mut(name) {
            Some(field) if field.descriptor != descriptor => {
                return Err(TransformError::malformed(
                    &type_name,
                    format!(
                        "field {} is declared as {}, manipulation expects {}",
                        name, field.descriptor, descriptor
                    ),
                ));
            }
            Some(field) => {
                let flags = granted & !access::FINAL;
                if field.access != flags {
                    field.access = flags;
                    changed = true;
                }
            }
            None => tracing::debug!(
                type_name = %type_name,
                field = name,
                "added field not declared here"
            ),
        }
    }

    let type_name = class.name.clone();
    let object = FieldType::Object(OBJECT.to_string());
    let redirected = rewrite_bodies(class, |body, instruction| {
        let opcode = instruction.opcode;
        if !opcode.is_field_access() {
            return Ok(None);
        }
        let Some(member) = body.member(instruction) else {
            return Ok(None);
        };
        if member.owner != owner || member.name != name {
            return Ok(None);
        }
        if member.descriptor != descriptor {
            return Err(TransformError::malformed(
                &type_name,
                format!("access to {} does not match descriptor {}", member, descriptor),
            ));
        }

        let mut builder = CodeBuilder::new(&mut *body.constants);
        let emitted = match opcode {
            Opcode::GetField => {
                builder.assume(FieldType::Object(owner.to_string()));
                builder.const_str(name);
                invoke(&mut builder, FIELD_GET)
                    .and_then(|_| boxing::coerce(&mut builder, &object, &field_type))
            }
            Opcode::PutField => {
                builder.assume(FieldType::Object(owner.to_string()));
                builder.assume(field_type.clone());
                boxing::coerce(&mut builder, &field_type, &object).and_then(|_| {
                    builder.const_str(name);
                    invoke(&mut builder, FIELD_PUT)
                })
            }
            Opcode::GetStatic => {
                builder.const_str(owner).const_str(name);
                invoke(&mut builder, FIELD_GET_STATIC)
                    .and_then(|_| boxing::coerce(&mut builder, &object, &field_type))
            }
            Opcode::PutStatic => {
                builder.assume(field_type.clone());
                boxing::coerce(&mut builder, &field_type, &object).and_then(|_| {
                    builder.const_str(owner).const_str(name);
                    invoke(&mut builder, FIELD_PUT_STATIC)
                })
            }
            _ => return Ok(None),
        };
        emitted.map_err(|e| TransformError::boxing(&type_name, e))?;
        Ok(Some(builder.into_instructions()))
    })?;

    Ok(changed || redirected > 0)
}

fn invoke(builder: &mut CodeBuilder<'_>, entry: EntryPoint) -> Result<(), boxing::BoxingError> {
    builder.invoke_static(entry.owner, entry.name, entry.descriptor)?;
    Ok(())
}
