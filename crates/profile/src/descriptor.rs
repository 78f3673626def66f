//! Descriptor normalization.
//!
//! Obfuscators rename application types but cannot touch primitives, `void`
//! or platform classes. Normalization therefore replaces every non-SDK
//! reference type with the literal `X`, collapsing an original binary and
//! its renamed twin onto the same descriptor strings.

use bitflags::bitflags;

use crate::errors::ProfileError;
use crate::parser::ParsedClass;
use crate::sdk::SdkClasses;

/// Placeholder for a renameable (non-SDK) reference type.
pub const OBFUSCATED: &str = "X";

bitflags! {
    /// Dex class access flags.
    ///
    /// See: <https://source.android.com/docs/core/runtime/dex-format#access-flags>
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

impl AccessFlags {
    /// Canonical lowercase rendering, e.g. `public final`.
    pub fn to_descriptor_string(self) -> String {
        let mut parts = Vec::new();
        for (name, _) in self.iter_names() {
            parts.push(name.to_ascii_lowercase());
        }
        parts.join(" ")
    }
}

/// The normalized shape of one class: the descriptor that goes into every
/// signature, plus the renameable relationships that go into the graphs
/// instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassShape {
    pub descriptor: String,

    /// Interfaces not in the SDK set, in declaration order.
    pub hidden_interfaces: Vec<String>,

    /// Superclass if it is not in the SDK set.
    pub hidden_superclass: Option<String>,
}

/// Builds the class descriptor `"<flags>[<super_or_X>][<i1>|<i2>|...]"`.
///
/// SDK interfaces are sorted so that declaration order does not leak into
/// the fingerprint. Non-SDK superclass and interfaces are reported back for
/// the relationship tables and replaced by `X`/omitted in the descriptor.
pub fn class_shape(class: &ParsedClass, sdk: &SdkClasses) -> ClassShape {
    let mut sdk_interfaces = Vec::new();
    let mut hidden_interfaces = Vec::new();

    for interface in &class.interfaces {
        if sdk.contains(interface) {
            sdk_interfaces.push(interface.as_str());
        } else {
            hidden_interfaces.push(interface.clone());
        }
    }

    sdk_interfaces.sort_unstable();

    let (superclass, hidden_superclass) = if sdk.contains(&class.superclass) {
        (class.superclass.as_str(), None)
    } else {
        (OBFUSCATED, Some(class.superclass.clone()))
    };

    let flags = AccessFlags::from_bits_truncate(class.access_flags);
    let descriptor = format!(
        "{}[{}][{}]",
        flags.to_descriptor_string(),
        superclass,
        sdk_interfaces.join("|")
    );

    ClassShape {
        descriptor,
        hidden_interfaces,
        hidden_superclass,
    }
}

/// Normalizes a raw method descriptor `(arg1 arg2)ret`.
///
/// Reference types (tokens ending in `;`, array forms included) outside the
/// SDK set become `X`; primitives, `void` and SDK references survive.
pub fn method_descriptor(raw: &str, sdk: &SdkClasses) -> Result<String, ProfileError> {
    let open = raw
        .find('(')
        .ok_or_else(|| ProfileError::MalformedDescriptor(raw.to_owned()))?;
    let close = raw
        .rfind(')')
        .filter(|close| *close > open)
        .ok_or_else(|| ProfileError::MalformedDescriptor(raw.to_owned()))?;

    let args = &raw[open + 1..close];
    let ret = raw[close + 1..].trim();

    if ret.is_empty() {
        return Err(ProfileError::MalformedDescriptor(raw.to_owned()));
    }

    let normalized_args = args
        .split_whitespace()
        .map(|ty| normalize_type(ty, sdk))
        .collect::<Vec<_>>()
        .join(" ");

    Ok(format!("({}){}", normalized_args, normalize_type(ret, sdk)))
}

fn normalize_type<'a>(ty: &'a str, sdk: &SdkClasses) -> &'a str {
    if ty.ends_with(';') && !sdk.contains(ty) {
        OBFUSCATED
    } else {
        ty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParsedClass;

    fn sdk() -> SdkClasses {
        SdkClasses::from_names(
            [
                "Ljava/lang/Object;",
                "Ljava/lang/String;",
                "Ljava/lang/Runnable;",
                "Ljava/io/Closeable;",
                "Landroid/app/Activity;",
            ]
            .map(str::to_owned),
        )
    }

    fn class(superclass: &str, interfaces: &[&str]) -> ParsedClass {
        ParsedClass {
            name: "Lcom/demo/A;".to_owned(),
            access_flags: 0x11, // public final
            superclass: superclass.to_owned(),
            interfaces: interfaces.iter().map(|s| (*s).to_owned()).collect(),
            methods: Vec::new(),
        }
    }

    #[test]
    fn descriptor_keeps_sdk_superclass() {
        let shape = class_shape(&class("Landroid/app/Activity;", &[]), &sdk());
        assert_eq!(shape.descriptor, "public final[Landroid/app/Activity;][]");
        assert!(shape.hidden_superclass.is_none());
    }

    #[test]
    fn descriptor_hides_non_sdk_superclass() {
        let shape = class_shape(&class("Lcom/demo/Base;", &[]), &sdk());
        assert_eq!(shape.descriptor, "public final[X][]");
        assert_eq!(shape.hidden_superclass.as_deref(), Some("Lcom/demo/Base;"));
    }

    #[test]
    fn descriptor_is_invariant_under_interface_permutation() {
        let a = class_shape(
            &class("Ljava/lang/Object;", &["Ljava/lang/Runnable;", "Ljava/io/Closeable;"]),
            &sdk(),
        );
        let b = class_shape(
            &class("Ljava/lang/Object;", &["Ljava/io/Closeable;", "Ljava/lang/Runnable;"]),
            &sdk(),
        );
        assert_eq!(a.descriptor, b.descriptor);
        assert_eq!(
            a.descriptor,
            "public final[Ljava/lang/Object;][Ljava/io/Closeable;|Ljava/lang/Runnable;]"
        );
    }

    #[test]
    fn non_sdk_interfaces_move_to_the_graph_side() {
        let shape = class_shape(
            &class("Ljava/lang/Object;", &["Lcom/demo/Listener;", "Ljava/lang/Runnable;"]),
            &sdk(),
        );
        assert_eq!(shape.descriptor, "public final[Ljava/lang/Object;][Ljava/lang/Runnable;]");
        assert_eq!(shape.hidden_interfaces, vec!["Lcom/demo/Listener;".to_owned()]);
    }

    #[test]
    fn method_descriptor_replaces_non_sdk_references() {
        let normalized =
            method_descriptor("(Lcom/demo/B; Ljava/lang/String; I)Lcom/demo/C;", &sdk()).unwrap();
        assert_eq!(normalized, "(X Ljava/lang/String; I)X");
    }

    #[test]
    fn method_descriptor_keeps_primitives_and_void() {
        let normalized = method_descriptor("(I J [B)V", &sdk()).unwrap();
        assert_eq!(normalized, "(I J [B)V");
    }

    #[test]
    fn reference_arrays_are_renameable() {
        let normalized = method_descriptor("([Lcom/demo/B;)V", &sdk()).unwrap();
        assert_eq!(normalized, "(X)V");
    }

    #[test]
    fn malformed_descriptor_is_reported() {
        assert!(matches!(
            method_descriptor("Lcom/demo/B;V", &sdk()),
            Err(ProfileError::MalformedDescriptor(_))
        ));
        assert!(matches!(
            method_descriptor(")V(", &sdk()),
            Err(ProfileError::MalformedDescriptor(_))
        ));
    }
}
