//! Profile storage.
//!
//! A profile is the immutable, on-disk form of one analyzed binary: every
//! class's signature set plus the three relationship tables. Maps are
//! B-tree backed so a profile serializes with sorted keys and the same
//! binary always produces byte-identical JSON.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ProfileError;
use crate::parser::ParsedBinary;
use crate::sdk::SdkClasses;
use crate::signature::profile_class;

/// Per-class tables shared by app and library profiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassTables {
    pub classes_signatures: BTreeMap<String, BTreeSet<String>>,

    /// `class -> ("caller_desc->callee_class->callee_desc" -> count)`.
    pub classes_xref_tos: BTreeMap<String, BTreeMap<String, u32>>,

    pub classes_interfaces: BTreeMap<String, Vec<String>>,

    pub classes_superclass: BTreeMap<String, String>,
}

impl ClassTables {
    /// Profiles every class of a parsed binary.
    ///
    /// A class with a malformed descriptor is reported and skipped; the
    /// rest of the binary still profiles.
    pub fn from_parsed(parsed: &ParsedBinary, sdk: &SdkClasses) -> Self {
        let mut tables = Self::default();

        for class in &parsed.classes {
            let record = match profile_class(class, sdk) {
                Ok(record) => record,
                Err(err) => {
                    log::warn!("skipping class {}: {}", class.name, err);
                    continue;
                }
            };

            tables
                .classes_signatures
                .insert(class.name.clone(), record.signatures);

            if !record.xref_tos.is_empty() {
                tables
                    .classes_xref_tos
                    .insert(class.name.clone(), record.xref_tos);
            }
            if !record.interfaces.is_empty() {
                tables
                    .classes_interfaces
                    .insert(class.name.clone(), record.interfaces);
            }
            if let Some(superclass) = record.superclass {
                tables
                    .classes_superclass
                    .insert(class.name.clone(), superclass);
            }
        }

        tables
    }

    /// Class names known to this profile.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes_signatures.keys().map(String::as_str)
    }
}

/// Profile of an application binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppProfile {
    pub filename: String,

    #[serde(rename = "appID")]
    pub app_id: String,

    pub permissions: Vec<String>,

    #[serde(flatten)]
    pub tables: ClassTables,
}

impl AppProfile {
    pub fn from_parsed(parsed: &ParsedBinary, sdk: &SdkClasses) -> Self {
        Self {
            filename: parsed.filename.clone(),
            app_id: parsed.app_id.clone().unwrap_or_default(),
            permissions: parsed.permissions.clone(),
            tables: ClassTables::from_parsed(parsed, sdk),
        }
    }
}

/// Profile of a library binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryProfile {
    pub name: String,
    pub version: String,
    pub category: String,
    pub root_package: String,
    pub classes_num: usize,

    #[serde(flatten)]
    pub tables: ClassTables,
}

impl LibraryProfile {
    /// Profiles a library binary. Name and version come from the file
    /// basename (`<name>_<version>.dex`), the category from the parent
    /// directory.
    pub fn from_parsed(parsed: &ParsedBinary, source_path: &Path, sdk: &SdkClasses) -> Self {
        let stem = source_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let (name, version) = match stem.split_once('_') {
            Some((name, version)) => (name.to_owned(), version.to_owned()),
            None => (stem.to_owned(), String::new()),
        };
        let category = source_path
            .parent()
            .and_then(Path::file_name)
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_owned();

        let tables = ClassTables::from_parsed(parsed, sdk);
        let root_package = root_package(tables.class_names());
        let classes_num = tables.classes_signatures.len();

        Self {
            name,
            version,
            category,
            root_package,
            classes_num,
            tables,
        }
    }
}

/// Either kind of profile, distinguished by its fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Profile {
    Library(LibraryProfile),
    App(AppProfile),
}

impl Profile {
    pub fn tables(&self) -> &ClassTables {
        match self {
            Profile::Library(lib) => &lib.tables,
            Profile::App(app) => &app.tables,
        }
    }
}

/// The package prefix shared by all class names: character-level common
/// prefix truncated at the last `/`.
pub fn root_package<'a, I>(class_names: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut names = class_names.into_iter();
    let Some(first) = names.next() else {
        return String::new();
    };

    let mut prefix = first;
    for name in names {
        let common = prefix
            .bytes()
            .zip(name.bytes())
            .take_while(|(a, b)| a == b)
            .count();
        prefix = &prefix[..common];
    }

    match prefix.rfind('/') {
        Some(idx) => prefix[..idx].to_owned(),
        None => String::new(),
    }
}

/// Writes a profile as `<dir>/<basename>.json`, creating directories as
/// needed.
pub fn write_profile(path: &Path, profile: &Profile) -> Result<(), ProfileError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), profile)?;
    Ok(())
}

pub fn read_profile(path: &Path) -> Result<Profile, ProfileError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParsedClass, ParsedMethod};

    fn sdk() -> SdkClasses {
        SdkClasses::from_names(["Ljava/lang/Object;"].map(str::to_owned))
    }

    fn parsed() -> ParsedBinary {
        ParsedBinary {
            filename: "demo.apk".to_owned(),
            app_id: Some("com.demo".to_owned()),
            permissions: vec!["android.permission.INTERNET".to_owned()],
            classes: vec![
                ParsedClass {
                    name: "Lcom/lib/A;".to_owned(),
                    access_flags: 0x1,
                    superclass: "Lcom/lib/Base;".to_owned(),
                    interfaces: Vec::new(),
                    methods: vec![ParsedMethod {
                        name: "a".to_owned(),
                        descriptor: "()V".to_owned(),
                        blocks: vec![vec![0x12, 0x34, 0x56, 0x78]],
                        calls: Vec::new(),
                    }],
                },
                ParsedClass {
                    name: "Lcom/lib/Base;".to_owned(),
                    access_flags: 0x1,
                    superclass: "Ljava/lang/Object;".to_owned(),
                    interfaces: Vec::new(),
                    methods: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn empty_tables_are_omitted_per_class() {
        let tables = ClassTables::from_parsed(&parsed(), &sdk());
        assert_eq!(tables.classes_signatures.len(), 2);
        assert!(tables.classes_xref_tos.is_empty());
        assert_eq!(
            tables.classes_superclass.get("Lcom/lib/A;").map(String::as_str),
            Some("Lcom/lib/Base;")
        );
        assert!(!tables.classes_superclass.contains_key("Lcom/lib/Base;"));
    }

    #[test]
    fn library_metadata_comes_from_the_path() {
        let lib = LibraryProfile::from_parsed(
            &parsed(),
            Path::new("libs/network/okdemo_3.2.1.dex"),
            &sdk(),
        );
        assert_eq!(lib.name, "okdemo");
        assert_eq!(lib.version, "3.2.1");
        assert_eq!(lib.category, "network");
        assert_eq!(lib.root_package, "Lcom/lib");
        assert_eq!(lib.classes_num, 2);
    }

    #[test]
    fn profiling_is_deterministic() {
        let sdk = sdk();
        let a = serde_json::to_string(&Profile::App(AppProfile::from_parsed(&parsed(), &sdk)))
            .unwrap();
        let b = serde_json::to_string(&Profile::App(AppProfile::from_parsed(&parsed(), &sdk)))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn profile_roundtrips_as_the_same_kind() {
        let sdk = sdk();
        let lib = Profile::Library(LibraryProfile::from_parsed(
            &parsed(),
            Path::new("okdemo_3.2.1.dex"),
            &sdk,
        ));
        let json = serde_json::to_string(&lib).unwrap();
        let back: Profile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lib);

        let app = Profile::App(AppProfile::from_parsed(&parsed(), &sdk));
        let json = serde_json::to_string(&app).unwrap();
        let back: Profile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, app);
    }

    #[test]
    fn root_package_of_disjoint_trees_is_empty() {
        assert_eq!(root_package(["Lcom/a/B;", "Lorg/c/D;"]), "");
        assert_eq!(root_package(["Lcom/a/B;", "Lcom/a/C;"]), "Lcom/a");
        assert_eq!(root_package(std::iter::empty::<&str>()), "");
    }
}
