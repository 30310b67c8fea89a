//! Primitive box/unbox code generation
//!
//! Emits the instruction templates that move a value between its primitive
//! and wrapper-object forms. Instructions are appended to a [`CodeBuilder`],
//! which interns the referenced classes and members in the class constant
//! pool and tracks a simulated operand stack so misuse is caught while
//! generating rather than by the host verifier.

use hotswap_bytecode::{ConstantPool, FieldType, Instruction, MethodDescriptor, Opcode};
use thiserror::Error;

/// Root of the reference type hierarchy
pub const OBJECT: &str = "java.lang.Object";

/// Common supertype of the numeric wrappers
pub const NUMBER: &str = "java.lang.Number";

/// Boxing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoxingError {
    /// Tag is not one of `I J S F D B C Z`
    #[error("Unsupported primitive kind '{0}'")]
    UnsupportedPrimitiveKind(char),

    /// Stack top does not hold what the template consumes
    #[error("Invalid operand: expected {expected}, found {found}")]
    InvalidOperand {
        /// What the template needs
        expected: String,
        /// What the simulated stack holds
        found: String,
    },
}

/// Box/unbox template for one primitive kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveKind {
    /// Descriptor tag
    pub tag: char,
    /// Wrapper class
    pub wrapper: &'static str,
    /// Class checked before unwrapping
    pub checked: &'static str,
    /// Unwrapping method on `checked`
    pub unbox_method: &'static str,
}

const KINDS: [PrimitiveKind; 8] = [
    PrimitiveKind {
        tag: 'I',
        wrapper: "java.lang.Integer",
        checked: NUMBER,
        unbox_method: "intValue",
    },
    PrimitiveKind {
        tag: 'J',
        wrapper: "java.lang.Long",
        checked: NUMBER,
        unbox_method: "longValue",
    },
    PrimitiveKind {
        tag: 'S',
        wrapper: "java.lang.Short",
        checked: NUMBER,
        unbox_method: "shortValue",
    },
    PrimitiveKind {
        tag: 'F',
        wrapper: "java.lang.Float",
        checked: NUMBER,
        unbox_method: "floatValue",
    },
    PrimitiveKind {
        tag: 'D',
        wrapper: "java.lang.Double",
        checked: NUMBER,
        unbox_method: "doubleValue",
    },
    PrimitiveKind {
        tag: 'B',
        wrapper: "java.lang.Byte",
        checked: NUMBER,
        unbox_method: "byteValue",
    },
    PrimitiveKind {
        tag: 'C',
        wrapper: "java.lang.Character",
        checked: "java.lang.Character",
        unbox_method: "charValue",
    },
    PrimitiveKind {
        tag: 'Z',
        wrapper: "java.lang.Boolean",
        checked: "java.lang.Boolean",
        unbox_method: "booleanValue",
    },
];

impl PrimitiveKind {
    /// Template for `tag`
    pub fn from_tag(tag: char) -> Result<Self, BoxingError> {
        KINDS
            .iter()
            .find(|kind| kind.tag == tag)
            .copied()
            .ok_or(BoxingError::UnsupportedPrimitiveKind(tag))
    }

    /// Template whose wrapper class is `class`
    pub fn from_wrapper(class: &str) -> Option<Self> {
        KINDS.iter().find(|kind| kind.wrapper == class).copied()
    }

    /// Primitive value type
    pub fn primitive(&self) -> FieldType {
        // Every tag in KINDS is a primitive tag
        FieldType::from_primitive_tag(self.tag).unwrap_or(FieldType::Int)
    }

    /// Descriptor of `Wrapper.valueOf`
    pub fn value_of_descriptor(&self) -> String {
        format!("({})L{};", self.tag, self.wrapper.replace('.', "/"))
    }

    /// Descriptor of the unwrapping method
    pub fn unbox_descriptor(&self) -> String {
        format!("(){}", self.tag)
    }
}

/// Simulated operand stack entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackValue {
    /// Value of a known type
    Typed(FieldType),
    /// The null reference
    Null,
}

impl StackValue {
    fn describe(&self) -> String {
        match self {
            Self::Typed(FieldType::Object(name)) => name.clone(),
            Self::Typed(other) => other.to_string(),
            Self::Null => "null".to_string(),
        }
    }
}

/// Instruction sink with a simulated operand stack
pub struct CodeBuilder<'a> {
    constants: &'a mut ConstantPool,
    instructions: Vec<Instruction>,
    stack: Vec<StackValue>,
}

impl<'a> CodeBuilder<'a> {
    /// Create a builder interning into `constants`
    pub fn new(constants: &'a mut ConstantPool) -> Self {
        Self {
            constants,
            instructions: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Declare a value already on the stack before the generated code runs
    pub fn assume(&mut self, value: FieldType) -> &mut Self {
        self.stack.push(StackValue::Typed(value));
        self
    }

    /// Simulated stack, bottom first
    pub fn stack(&self) -> &[StackValue] {
        &self.stack
    }

    /// Top of the simulated stack
    pub fn top(&self) -> Option<&StackValue> {
        self.stack.last()
    }

    /// Generated instructions
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Consume the builder, returning the generated instructions
    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    /// Constant pool being interned into
    pub fn constants(&mut self) -> &mut ConstantPool {
        self.constants
    }

    // ===== Emission =====

    /// Push a string constant
    pub fn const_str(&mut self, value: &str) -> &mut Self {
        let index = self.constants.intern_string(value);
        self.instructions.push(Instruction::indexed(Opcode::ConstStr, index));
        self.stack
            .push(StackValue::Typed(FieldType::Object("java.lang.String".to_string())));
        self
    }

    /// Push the null reference
    pub fn const_null(&mut self) -> &mut Self {
        self.instructions.push(Instruction::simple(Opcode::ConstNull));
        self.stack.push(StackValue::Null);
        self
    }

    /// Load a local of a known type
    pub fn load_local(&mut self, slot: u16, value: FieldType) -> &mut Self {
        self.instructions.push(Instruction::load_local(slot));
        self.stack.push(StackValue::Typed(value));
        self
    }

    /// Store the top of stack into a local
    pub fn store_local(&mut self, slot: u16) -> Result<&mut Self, BoxingError> {
        self.pop_any("a value")?;
        self.instructions.push(Instruction::store_local(slot));
        Ok(self)
    }

    /// Invoke a static method
    pub fn invoke_static(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Self, BoxingError> {
        self.invoke(Opcode::InvokeStatic, owner, name, descriptor)
    }

    /// Invoke a virtual method on a receiver below the arguments
    pub fn invoke_virtual(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Self, BoxingError> {
        self.invoke(Opcode::InvokeVirtual, owner, name, descriptor)
    }

    /// Cast the top reference to `class`
    pub fn check_cast(&mut self, class: &str) -> Result<&mut Self, BoxingError> {
        match self.stack.last() {
            Some(StackValue::Null) | Some(StackValue::Typed(FieldType::Object(_))) => {}
            Some(StackValue::Typed(FieldType::Array(_))) => {}
            other => {
                return Err(BoxingError::InvalidOperand {
                    expected: "a reference".to_string(),
                    found: describe_top(other),
                })
            }
        }
        self.stack.pop();
        let index = self.constants.intern_class(class);
        self.instructions.push(Instruction::indexed(Opcode::CheckCast, index));
        self.stack.push(StackValue::Typed(class_type(class)));
        Ok(self)
    }

    fn invoke(
        &mut self,
        opcode: Opcode,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Self, BoxingError> {
        let parsed = MethodDescriptor::parse(descriptor).map_err(|e| BoxingError::InvalidOperand {
            expected: "a valid method descriptor".to_string(),
            found: e.to_string(),
        })?;
        let receiver = usize::from(opcode != Opcode::InvokeStatic);
        let consumed = parsed.arity() + receiver;
        if self.stack.len() < consumed {
            return Err(BoxingError::InvalidOperand {
                expected: format!("{} operands for {}.{}", consumed, owner, name),
                found: format!("{} on the stack", self.stack.len()),
            });
        }
        self.stack.truncate(self.stack.len() - consumed);

        let index = self.constants.intern_member(owner, name, descriptor);
        self.instructions.push(Instruction::indexed(opcode, index));
        if let Some(ret) = parsed.ret {
            self.stack.push(StackValue::Typed(ret));
        }
        Ok(self)
    }

    fn pop_any(&mut self, expected: &str) -> Result<StackValue, BoxingError> {
        self.stack.pop().ok_or_else(|| BoxingError::InvalidOperand {
            expected: expected.to_string(),
            found: "an empty stack".to_string(),
        })
    }
}

fn describe_top(value: Option<&StackValue>) -> String {
    value.map_or_else(|| "an empty stack".to_string(), StackValue::describe)
}

fn class_type(class: &str) -> FieldType {
    if class.starts_with('[') {
        if let Ok(array) = FieldType::parse(class) {
            return array;
        }
    }
    FieldType::Object(class.to_string())
}

/// Check whether a reference of static type `class` may hold a `kind.checked`
fn assignable_to_checked(class: &str, kind: &PrimitiveKind) -> bool {
    if class == OBJECT || class == kind.checked {
        return true;
    }
    // Number covers the numeric wrappers
    kind.checked == NUMBER
        && PrimitiveKind::from_wrapper(class).is_some_and(|w| w.checked == NUMBER)
}

/// Replace the primitive on top of the stack with its wrapper object
pub fn box_value(builder: &mut CodeBuilder<'_>, tag: char) -> Result<(), BoxingError> {
    let kind = PrimitiveKind::from_tag(tag)?;
    let expected = kind.primitive();
    match builder.top() {
        Some(StackValue::Typed(ty)) if *ty == expected => {}
        other => {
            return Err(BoxingError::InvalidOperand {
                expected: tag.to_string(),
                found: describe_top(other),
            })
        }
    }
    builder.invoke_static(kind.wrapper, "valueOf", &kind.value_of_descriptor())?;
    Ok(())
}

/// Replace the wrapper reference on top of the stack with its primitive
pub fn unbox_value(builder: &mut CodeBuilder<'_>, tag: char) -> Result<(), BoxingError> {
    let kind = PrimitiveKind::from_tag(tag)?;
    match builder.top() {
        Some(StackValue::Null) => {}
        Some(StackValue::Typed(FieldType::Object(class)))
            if assignable_to_checked(class, &kind) => {}
        other => {
            return Err(BoxingError::InvalidOperand {
                expected: format!("a reference assignable to {}", kind.checked),
                found: describe_top(other),
            })
        }
    }
    builder.check_cast(kind.checked)?;
    builder.invoke_virtual(kind.checked, kind.unbox_method, &kind.unbox_descriptor())?;
    Ok(())
}

macro_rules! per_kind {
    ($($box_fn:ident, $unbox_fn:ident, $tag:literal;)*) => {
        $(
            #[doc = concat!("Box the `", $tag, "` value on top of the stack")]
            pub fn $box_fn(builder: &mut CodeBuilder<'_>) -> Result<(), BoxingError> {
                box_value(builder, $tag)
            }

            #[doc = concat!("Unbox the top reference to `", $tag, "`")]
            pub fn $unbox_fn(builder: &mut CodeBuilder<'_>) -> Result<(), BoxingError> {
                unbox_value(builder, $tag)
            }
        )*
    };
}

per_kind! {
    box_int, unbox_int, 'I';
    box_long, unbox_long, 'J';
    box_short, unbox_short, 'S';
    box_float, unbox_float, 'F';
    box_double, unbox_double, 'D';
    box_byte, unbox_byte, 'B';
    box_char, unbox_char, 'C';
    box_boolean, unbox_boolean, 'Z';
}

/// Convert the top of stack from `from` to `to`
///
/// Handles primitive to wrapper, wrapper to primitive and reference casts.
/// Identical types emit nothing. Any other pairing is an invalid operand.
pub fn coerce(
    builder: &mut CodeBuilder<'_>,
    from: &FieldType,
    to: &FieldType,
) -> Result<(), BoxingError> {
    if from == to {
        return Ok(());
    }
    match (from.primitive_tag(), to.primitive_tag()) {
        (Some(tag), None) => {
            let kind = PrimitiveKind::from_tag(tag)?;
            let target = to.class_name().unwrap_or_default();
            if target != kind.wrapper && !assignable_to_checked(&target, &kind) {
                return Err(BoxingError::InvalidOperand {
                    expected: target,
                    found: kind.wrapper.to_string(),
                });
            }
            box_value(builder, tag)
        }
        (None, Some(tag)) => unbox_value(builder, tag),
        (None, None) => {
            let target = to.class_name().unwrap_or_default();
            if target != OBJECT {
                builder.check_cast(&target)?;
            }
            Ok(())
        }
        (Some(_), Some(_)) => Err(BoxingError::InvalidOperand {
            expected: to.to_string(),
            found: from.to_string(),
        }),
    }
}
