//! Added methods: widened declarations and trampoline redirection

use super::{rewrite_bodies, TransformError};
use hotswap_bytecode::{access, ClassFile, Instruction, MethodDescriptor, Opcode};

const CONSTRUCTOR: &str = "<init>";

pub(super) fn apply(
    class: &mut ClassFile,
    owner: &str,
    name: &str,
    descriptor: &str,
    granted: u16,
    proxy: &str,
) -> Result<bool, TransformError> {
    // The trampoline itself must keep calling the real method
    if class.name == proxy {
        return Ok(false);
    }

    let parsed = MethodDescriptor::parse(descriptor).map_err(|e| {
        TransformError::malformed(&class.name, format!("method {}.{}: {}", owner, name, e))
    })?;

    let mut changed = false;
    if class.name == owner {
        if class.methods_named(name).next().is_none() {
            tracing::debug!(
                type_name = %class.name,
                method = name,
                "added method not declared here"
            );
        } else {
            let type_name = class.name.clone();
            let method = class.method_mut(name, descriptor).ok_or_else(|| {
                TransformError::malformed(
                    &type_name,
                    format!("no declaration of {} matches descriptor {}", name, descriptor),
                )
            })?;
            let widened = access::widen_visibility(method.access, granted);
            if method.access != widened {
                method.access = widened;
                changed = true;
            }
        }
    }

    let declaring = class.name == owner;
    let instance_proxy = parsed.with_receiver(owner).to_string();
    let static_proxy = parsed.to_string();
    let redirected = rewrite_bodies(class, |body, instruction| {
        let opcode = instruction.opcode;
        let redirect = match opcode {
            Opcode::InvokeVirtual | Opcode::InvokeStatic => true,
            // Private calls only; super calls from subclasses keep their target
            Opcode::InvokeSpecial => declaring,
            _ => false,
        };
        if !redirect {
            return Ok(None);
        }
        let Some(member) = body.member(instruction) else {
            return Ok(None);
        };
        // Other overloads are left alone
        if member.owner != owner
            || member.name != name
            || member.descriptor != descriptor
            || member.name == CONSTRUCTOR
        {
            return Ok(None);
        }

        let proxy_descriptor = if opcode == Opcode::InvokeStatic {
            &static_proxy
        } else {
            &instance_proxy
        };
        let index = body.constants.intern_member(proxy, name, proxy_descriptor);
        Ok(Some(vec![Instruction::indexed(Opcode::InvokeStatic, index)]))
    })?;

    Ok(changed || redirected > 0)
}
