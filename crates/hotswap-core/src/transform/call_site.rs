//! Call-site rewriting through a static indirection point
//!
//! Arguments (receiver first for instance calls) are spilled into fresh
//! locals past the method's own, then reloaded one by one with whatever
//! box/unbox/cast the indirection's parameter needs. The indirection's return
//! value is coerced back to what the call site expects.

use super::{rewrite_bodies, TransformError};
use crate::boxing::{self, CodeBuilder};
use hotswap_bytecode::{ClassFile, FieldType, MemberRef, MethodDescriptor, Opcode};

pub(super) fn apply(
    class: &mut ClassFile,
    site: &MemberRef,
    target: &MemberRef,
) -> Result<bool, TransformError> {
    // The indirection may forward to the original member
    if class.name == target.owner {
        return Ok(false);
    }

    let type_name = class.name.clone();
    let site_descriptor = MethodDescriptor::parse(&site.descriptor)
        .map_err(|e| {
            TransformError::malformed(&type_name, format!("call site {}: {}", site, e))
        })?;
    let target_descriptor = MethodDescriptor::parse(&target.descriptor)
        .map_err(|e| {
            TransformError::malformed(&type_name, format!("indirection {}: {}", target, e))
        })?;

    let rewritten = rewrite_bodies(class, |body, instruction| {
        let opcode = instruction.opcode;
        if !opcode.is_invoke() {
            return Ok(None);
        }
        match body.member(instruction) {
            Some(member) if member == *site => {}
            _ => return Ok(None),
        }

        let params: Vec<FieldType> = if opcode == Opcode::InvokeStatic {
            site_descriptor.params.clone()
        } else {
            site_descriptor.with_receiver(&site.owner).params
        };
        if params.len() != target_descriptor.arity() {
            return Err(TransformError::malformed(
                &type_name,
                format!(
                    "{} takes {} arguments, call site {} passes {}",
                    target,
                    target_descriptor.arity(),
                    site,
                    params.len()
                ),
            ));
        }

        let base = body.first_free_local;
        let slots = u16::try_from(params.len())
            .ok()
            .and_then(|count| base.checked_add(count))
            .ok_or_else(|| {
                TransformError::malformed(&type_name, "too many locals for call-site spill")
            })?;
        body.max_locals = body.max_locals.max(slots);

        let mut builder = CodeBuilder::new(&mut *body.constants);
        let emitted = (|| {
            for param in &params {
                builder.assume(param.clone());
            }
            for slot in (base..slots).rev() {
                builder.store_local(slot)?;
            }
            for ((slot, from), to) in (base..slots).zip(&params).zip(&target_descriptor.params) {
                builder.load_local(slot, from.clone());
                boxing::coerce(&mut builder, from, to)?;
            }
            builder.invoke_static(&target.owner, &target.name, &target.descriptor)?;
            match (&target_descriptor.ret, &site_descriptor.ret) {
                (None, None) => Ok(()),
                (Some(from), Some(to)) => boxing::coerce(&mut builder, from, to),
                (from, to) => Err(boxing::BoxingError::InvalidOperand {
                    expected: describe_return(to),
                    found: describe_return(from),
                }),
            }
        })();
        emitted.map_err(|e| TransformError::boxing(&type_name, e))?;
        Ok(Some(builder.into_instructions()))
    })?;

    Ok(rewritten > 0)
}

fn describe_return(ret: &Option<FieldType>) -> String {
    ret.as_ref()
        .map_or_else(|| "V".to_string(), FieldType::to_string)
}
