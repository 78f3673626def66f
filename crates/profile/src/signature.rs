//! Class signature extraction.
//!
//! A class signature is a set of hex digests, one per sufficiently long
//! basic block of each method, tied to the class and method descriptors so
//! that identical code in differently shaped classes does not collide.
//! Renaming classes, methods or fields leaves the opcode stream untouched
//! except for constant-pool references, which normalization already turned
//! into `X`.

use std::collections::{BTreeMap, BTreeSet};

use sha1::{Digest, Sha1};

use crate::descriptor::{class_shape, method_descriptor};
use crate::errors::ProfileError;
use crate::parser::ParsedClass;
use crate::sdk::SdkClasses;

/// Basic blocks with fewer opcode bytes than this do not emit a signature.
pub const MIN_BLOCK_OPCODES: usize = 4;

/// Separator between the descriptor prefix and the block opcodes.
const BLOCK_TAG: &str = "B[";

/// Everything profiling extracts from one class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassRecord {
    pub signatures: BTreeSet<String>,

    /// `"caller_desc->callee_class->callee_desc"` -> call count.
    pub xref_tos: BTreeMap<String, u32>,

    /// Non-SDK interfaces, declaration order.
    pub interfaces: Vec<String>,

    /// Non-SDK superclass.
    pub superclass: Option<String>,
}

/// Profiles a single class.
///
/// A malformed descriptor anywhere in the class fails the whole class; the
/// caller logs it and continues with the rest of the binary.
pub fn profile_class(class: &ParsedClass, sdk: &SdkClasses) -> Result<ClassRecord, ProfileError> {
    let shape = class_shape(class, sdk);

    let mut record = ClassRecord {
        interfaces: shape.hidden_interfaces,
        superclass: shape.hidden_superclass,
        ..ClassRecord::default()
    };

    for method in &class.methods {
        let descriptor = method_descriptor(&method.descriptor, sdk)?;
        let prefix = format!("{}{}", shape.descriptor, descriptor);

        for block in &method.blocks {
            if block.len() < MIN_BLOCK_OPCODES {
                continue;
            }

            let mut hasher = Sha1::new();
            hasher.update(prefix.as_bytes());
            hasher.update(BLOCK_TAG.as_bytes());
            hasher.update(const_hex::encode(block).as_bytes());

            record
                .signatures
                .insert(const_hex::encode(hasher.finalize()));
        }

        for call in &method.calls {
            if sdk.contains(&call.callee_class) {
                continue;
            }

            let xref = format!(
                "{}->{}->{}",
                descriptor,
                call.callee_class,
                method_descriptor(&call.callee_descriptor, sdk)?
            );
            *record.xref_tos.entry(xref).or_insert(0) += 1;
        }
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParsedCall, ParsedMethod};

    fn sdk() -> SdkClasses {
        SdkClasses::from_names(
            ["Ljava/lang/Object;", "Ljava/lang/String;", "Landroid/util/Log;"].map(str::to_owned),
        )
    }

    fn method(descriptor: &str, blocks: Vec<Vec<u8>>, calls: Vec<ParsedCall>) -> ParsedMethod {
        ParsedMethod {
            name: "m".to_owned(),
            descriptor: descriptor.to_owned(),
            blocks,
            calls,
        }
    }

    fn class(name: &str, methods: Vec<ParsedMethod>) -> ParsedClass {
        ParsedClass {
            name: name.to_owned(),
            access_flags: 0x1,
            superclass: "Ljava/lang/Object;".to_owned(),
            interfaces: Vec::new(),
            methods,
        }
    }

    #[test]
    fn short_blocks_emit_no_signature() {
        let record = profile_class(
            &class(
                "La/A;",
                vec![method("()V", vec![vec![0x0e], vec![0x12, 0x34, 0x56]], Vec::new())],
            ),
            &sdk(),
        )
        .unwrap();
        assert!(record.signatures.is_empty());
    }

    #[test]
    fn minimum_length_block_emits_one_signature() {
        let record = profile_class(
            &class(
                "La/A;",
                vec![method("()V", vec![vec![0x12, 0x34, 0x56, 0x0e]], Vec::new())],
            ),
            &sdk(),
        )
        .unwrap();
        assert_eq!(record.signatures.len(), 1);
        let digest = record.signatures.iter().next().unwrap();
        assert_eq!(digest.len(), 40);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn duplicate_blocks_collapse() {
        let block = vec![0x12, 0x34, 0x56, 0x78, 0x0e];
        let record = profile_class(
            &class(
                "La/A;",
                vec![method("()V", vec![block.clone(), block], Vec::new())],
            ),
            &sdk(),
        )
        .unwrap();
        assert_eq!(record.signatures.len(), 1);
    }

    #[test]
    fn renaming_a_non_sdk_type_preserves_signatures() {
        let make = |callee: &str, arg: &str| {
            class(
                "La/A;",
                vec![method(
                    &format!("({})V", arg),
                    vec![vec![0x6e, 0x20, 0x00, 0x01]],
                    vec![ParsedCall {
                        callee_class: callee.to_owned(),
                        callee_descriptor: "()V".to_owned(),
                    }],
                )],
            )
        };

        let original = profile_class(&make("Lcom/lib/Worker;", "Lcom/lib/Task;"), &sdk()).unwrap();
        let renamed = profile_class(&make("La/b;", "La/c;"), &sdk()).unwrap();
        assert_eq!(original.signatures, renamed.signatures);
    }

    #[test]
    fn sdk_callees_are_dropped_from_xrefs() {
        let record = profile_class(
            &class(
                "La/A;",
                vec![method(
                    "()V",
                    Vec::new(),
                    vec![
                        ParsedCall {
                            callee_class: "Landroid/util/Log;".to_owned(),
                            callee_descriptor: "(Ljava/lang/String;)I".to_owned(),
                        },
                        ParsedCall {
                            callee_class: "Lcom/lib/B;".to_owned(),
                            callee_descriptor: "(Lcom/lib/C;)V".to_owned(),
                        },
                    ],
                )],
            ),
            &sdk(),
        )
        .unwrap();

        assert_eq!(record.xref_tos.len(), 1);
        assert_eq!(record.xref_tos.get("()V->Lcom/lib/B;->(X)V"), Some(&1));
    }

    #[test]
    fn repeated_calls_are_counted() {
        let call = ParsedCall {
            callee_class: "Lcom/lib/B;".to_owned(),
            callee_descriptor: "()V".to_owned(),
        };
        let record = profile_class(
            &class(
                "La/A;",
                vec![method("()V", Vec::new(), vec![call.clone(), call])],
            ),
            &sdk(),
        )
        .unwrap();
        assert_eq!(record.xref_tos.get("()V->Lcom/lib/B;->()V"), Some(&2));
    }
}
