//! Field and method type descriptors
//!
//! Descriptors use the compact form `I`, `J`, `Ljava/lang/String;`, `[I` for
//! values and `(params)ret` for methods, with `V` as the void return. Object
//! types are stored as dotted names (`java.lang.String`) once parsed.

use std::fmt;
use thiserror::Error;

/// Errors raised while parsing a descriptor
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// Descriptor ended before a complete type was read
    #[error("Truncated descriptor '{0}'")]
    Truncated(String),

    /// Unknown type tag
    #[error("Invalid type tag '{tag}' in descriptor '{descriptor}'")]
    InvalidTag {
        /// Offending character
        tag: char,
        /// Full descriptor
        descriptor: String,
    },

    /// Characters remain after a complete descriptor
    #[error("Trailing characters in descriptor '{0}'")]
    Trailing(String),

    /// Method descriptor without the parameter list
    #[error("Malformed method descriptor '{0}'")]
    MalformedMethod(String),
}

/// A value type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `D`
    Double,
    /// `F`
    Float,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `S`
    Short,
    /// `Z`
    Boolean,
    /// `Lpkg/Name;` (stored dotted)
    Object(String),
    /// `[component`
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parse a complete field descriptor
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let mut chars = descriptor.char_indices().peekable();
        let ty = parse_field(descriptor, &mut chars)?;
        if chars.next().is_some() {
            return Err(DescriptorError::Trailing(descriptor.to_string()));
        }
        Ok(ty)
    }

    /// Build a type from a primitive tag
    pub fn from_primitive_tag(tag: char) -> Option<Self> {
        Some(match tag {
            'B' => Self::Byte,
            'C' => Self::Char,
            'D' => Self::Double,
            'F' => Self::Float,
            'I' => Self::Int,
            'J' => Self::Long,
            'S' => Self::Short,
            'Z' => Self::Boolean,
            _ => return None,
        })
    }

    /// Single-character tag for primitive types
    pub fn primitive_tag(&self) -> Option<char> {
        Some(match self {
            Self::Byte => 'B',
            Self::Char => 'C',
            Self::Double => 'D',
            Self::Float => 'F',
            Self::Int => 'I',
            Self::Long => 'J',
            Self::Short => 'S',
            Self::Boolean => 'Z',
            Self::Object(_) | Self::Array(_) => return None,
        })
    }

    /// Check if this is a primitive type
    pub fn is_primitive(&self) -> bool {
        self.primitive_tag().is_some()
    }

    /// Check if this is an object or array type
    pub fn is_reference(&self) -> bool {
        !self.is_primitive()
    }

    /// Dotted class name usable with `check_cast`
    ///
    /// Arrays are named by their descriptor, as the host runtime does.
    pub fn class_name(&self) -> Option<String> {
        match self {
            Self::Object(name) => Some(name.clone()),
            Self::Array(_) => Some(self.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(name) => write!(f, "L{};", name.replace('.', "/")),
            Self::Array(component) => write!(f, "[{}", component),
            primitive => match primitive.primitive_tag() {
                Some(tag) => write!(f, "{}", tag),
                None => Ok(()),
            },
        }
    }
}

/// A method signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types, in order
    pub params: Vec<FieldType>,
    /// Return type, `None` for void
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parse a method descriptor such as `(ILjava/lang/String;)V`
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let mut chars = descriptor.char_indices().peekable();
        match chars.next() {
            Some((_, '(')) => {}
            _ => return Err(DescriptorError::MalformedMethod(descriptor.to_string())),
        }

        let mut params = Vec::new();
        loop {
            match chars.peek() {
                Some((_, ')')) => {
                    chars.next();
                    break;
                }
                Some(_) => params.push(parse_field(descriptor, &mut chars)?),
                None => return Err(DescriptorError::Truncated(descriptor.to_string())),
            }
        }

        let ret = match chars.peek() {
            Some((_, 'V')) => {
                chars.next();
                None
            }
            Some(_) => Some(parse_field(descriptor, &mut chars)?),
            None => return Err(DescriptorError::Truncated(descriptor.to_string())),
        };

        if chars.next().is_some() {
            return Err(DescriptorError::Trailing(descriptor.to_string()));
        }
        Ok(Self { params, ret })
    }

    /// Same signature with an object receiver of type `owner` prepended
    pub fn with_receiver(&self, owner: &str) -> Self {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        params.push(FieldType::Object(owner.to_string()));
        params.extend(self.params.iter().cloned());
        Self {
            params,
            ret: self.ret.clone(),
        }
    }

    /// Number of parameters
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Check for a void return
    pub fn returns_void(&self) -> bool {
        self.ret.is_none()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            write!(f, "{}", param)?;
        }
        f.write_str(")")?;
        match &self.ret {
            Some(ret) => write!(f, "{}", ret),
            None => f.write_str("V"),
        }
    }
}

fn parse_field(
    descriptor: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> Result<FieldType, DescriptorError> {
    let (start, tag) = chars
        .next()
        .ok_or_else(|| DescriptorError::Truncated(descriptor.to_string()))?;

    if let Some(primitive) = FieldType::from_primitive_tag(tag) {
        return Ok(primitive);
    }

    match tag {
        '[' => Ok(FieldType::Array(Box::new(parse_field(descriptor, chars)?))),
        'L' => {
            for (index, c) in chars.by_ref() {
                if c == ';' {
                    let name = &descriptor[start + 1..index];
                    if name.is_empty() {
                        return Err(DescriptorError::Truncated(descriptor.to_string()));
                    }
                    return Ok(FieldType::Object(name.replace('/', ".")));
                }
            }
            Err(DescriptorError::Truncated(descriptor.to_string()))
        }
        other => Err(DescriptorError::InvalidTag {
            tag: other,
            descriptor: descriptor.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitives() {
        for tag in ['B', 'C', 'D', 'F', 'I', 'J', 'S', 'Z'] {
            let ty = FieldType::parse(&tag.to_string()).unwrap();
            assert_eq!(ty.primitive_tag(), Some(tag));
        }
    }

    #[test]
    fn test_parse_object_and_array() {
        assert_eq!(
            FieldType::parse("Ljava/lang/String;").unwrap(),
            FieldType::Object("java.lang.String".to_string())
        );
        assert_eq!(
            FieldType::parse("[[I").unwrap(),
            FieldType::Array(Box::new(FieldType::Array(Box::new(FieldType::Int))))
        );
    }

    #[test]
    fn test_parse_method() {
        let desc = MethodDescriptor::parse("(ILjava/lang/Object;[J)Ljava/lang/Integer;").unwrap();
        assert_eq!(desc.arity(), 3);
        assert_eq!(desc.params[0], FieldType::Int);
        assert_eq!(desc.params[1], FieldType::Object("java.lang.Object".to_string()));
        assert_eq!(desc.ret, Some(FieldType::Object("java.lang.Integer".to_string())));

        let void = MethodDescriptor::parse("()V").unwrap();
        assert!(void.returns_void());
        assert_eq!(void.arity(), 0);
    }

    #[test]
    fn test_display_roundtrip() {
        for text in ["(ILjava/lang/Object;[J)Ljava/lang/Integer;", "()V", "(Z)C"] {
            assert_eq!(MethodDescriptor::parse(text).unwrap().to_string(), text);
        }
        assert_eq!(
            FieldType::parse("[Ljava/lang/String;").unwrap().to_string(),
            "[Ljava/lang/String;"
        );
    }

    #[test]
    fn test_with_receiver() {
        let desc = MethodDescriptor::parse("(I)V").unwrap();
        let static_form = desc.with_receiver("com.example.Widget");
        assert_eq!(static_form.to_string(), "(Lcom/example/Widget;I)V");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            FieldType::parse("Q"),
            Err(DescriptorError::InvalidTag { tag: 'Q', .. })
        ));
        assert!(matches!(
            FieldType::parse("Ljava/lang/String"),
            Err(DescriptorError::Truncated(_))
        ));
        assert!(matches!(FieldType::parse("II"), Err(DescriptorError::Trailing(_))));
        assert!(matches!(MethodDescriptor::parse("I)V"), Err(DescriptorError::MalformedMethod(_))));
        assert!(matches!(MethodDescriptor::parse("(I"), Err(DescriptorError::Truncated(_))));
        assert!(matches!(FieldType::parse("V"), Err(DescriptorError::InvalidTag { tag: 'V', .. })));
    }
}
