//! Narrow interface to the external bytecode parser.
//!
//! Profiling never touches dex/jar internals itself. A collaborator parses
//! the binary and hands over, per class: name, access flags, superclass,
//! interfaces, and per method: descriptor, the basic-block partitioned
//! opcode stream, and the outbound call list. Everything downstream (C1-C5)
//! is a function of this data alone.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::errors::ProfileError;

/// A fully parsed app or library binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedBinary {
    pub filename: String,

    /// Application identifier; absent for library binaries.
    #[serde(default)]
    pub app_id: Option<String>,

    #[serde(default)]
    pub permissions: Vec<String>,

    pub classes: Vec<ParsedClass>,
}

/// One class as reported by the parser. Names are JVM internal form
/// (`Lcom/foo/Bar;`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedClass {
    pub name: String,
    pub access_flags: u32,
    pub superclass: String,

    #[serde(default)]
    pub interfaces: Vec<String>,

    #[serde(default)]
    pub methods: Vec<ParsedMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMethod {
    pub name: String,

    /// Raw dalvik-style descriptor, e.g. `(Ljava/lang/String; I)V`.
    pub descriptor: String,

    /// Opcode bytes, one entry per basic block, in stream order.
    #[serde(default)]
    pub blocks: Vec<Vec<u8>>,

    /// Outbound invokes, in instruction order.
    #[serde(default)]
    pub calls: Vec<ParsedCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedCall {
    pub callee_class: String,
    pub callee_descriptor: String,
}

/// A source of parsed binaries.
pub trait BytecodeParser {
    fn parse(&self, path: &Path) -> Result<ParsedBinary, ProfileError>;
}

/// Runs an external converter command and reads a [`ParsedBinary`] JSON
/// document from its stdout. The command receives the binary path as its
/// single argument.
#[derive(Debug, Clone)]
pub struct ExternalParser {
    command: String,
}

impl ExternalParser {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl BytecodeParser for ExternalParser {
    fn parse(&self, path: &Path) -> Result<ParsedBinary, ProfileError> {
        log::debug!("running {} {:?}", self.command, path);

        let output = Command::new(&self.command).arg(path).output()?;

        if !output.status.success() {
            return Err(ProfileError::ParserFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        if output.stdout.is_empty() {
            return Err(ProfileError::EmptyParse(path.display().to_string()));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_binary_roundtrips_through_json() {
        let binary = ParsedBinary {
            filename: "demo.dex".to_owned(),
            app_id: None,
            permissions: Vec::new(),
            classes: vec![ParsedClass {
                name: "Lcom/demo/A;".to_owned(),
                access_flags: 0x1,
                superclass: "Ljava/lang/Object;".to_owned(),
                interfaces: vec!["Ljava/lang/Runnable;".to_owned()],
                methods: vec![ParsedMethod {
                    name: "run".to_owned(),
                    descriptor: "()V".to_owned(),
                    blocks: vec![vec![0x12, 0x34, 0x56, 0x78, 0x0e]],
                    calls: vec![ParsedCall {
                        callee_class: "Lcom/demo/B;".to_owned(),
                        callee_descriptor: "()V".to_owned(),
                    }],
                }],
            }],
        };

        let json = serde_json::to_string(&binary).unwrap();
        let back: ParsedBinary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.classes.len(), 1);
        assert_eq!(back.classes[0].methods[0].blocks[0].len(), 5);
    }

    #[test]
    fn optional_fields_can_be_omitted() {
        let json = r#"{
            "filename": "lib.dex",
            "classes": [{
                "name": "La/B;",
                "access_flags": 1,
                "superclass": "Ljava/lang/Object;",
                "methods": [{"name": "<init>", "descriptor": "()V"}]
            }]
        }"#;

        let binary: ParsedBinary = serde_json::from_str(json).unwrap();
        assert!(binary.app_id.is_none());
        assert!(binary.classes[0].interfaces.is_empty());
        assert!(binary.classes[0].methods[0].blocks.is_empty());
    }
}
