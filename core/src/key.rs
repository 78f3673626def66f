//! Index key encoding.
//!
//! Every indexed set key carries the library metadata the detector needs,
//! so a retrieval hit never requires a second lookup:
//! `"<name>_<version>|<root_package>|<class_count>|<signature_count>|<category>|-><class_name>"`.

/// Library metadata embedded in an index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibKey {
    /// `"<name>_<version>"`.
    pub name_version: String,
    pub root_package: String,

    /// Number of classes with at least one signature.
    pub class_count: usize,

    /// Size of the library's full signature set.
    pub signature_count: usize,

    pub category: String,
}

/// Separator between library metadata and the class name.
const CLASS_SEPARATOR: &str = "|->";

impl LibKey {
    /// The metadata prefix shared by all of the library's keys; used to
    /// group retrieval hits by library.
    pub fn id(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.name_version, self.root_package, self.class_count, self.signature_count, self.category
        )
    }

    /// The full index key of one library class.
    pub fn encode(&self, class_name: &str) -> String {
        format!("{}{}{}", self.id(), CLASS_SEPARATOR, class_name)
    }

    pub fn parse_id(id: &str) -> Option<LibKey> {
        let mut fields = id.split('|');
        let name_version = fields.next()?.to_owned();
        let root_package = fields.next()?.to_owned();
        let class_count = fields.next()?.parse().ok()?;
        let signature_count = fields.next()?.parse().ok()?;
        let category = fields.next()?.to_owned();
        if fields.next().is_some() {
            return None;
        }

        Some(LibKey {
            name_version,
            root_package,
            class_count,
            signature_count,
            category,
        })
    }
}

/// Splits a retrieval hit into the library id and the library class name.
pub fn parse_hit(key: &str) -> Option<(&str, &str)> {
    key.split_once(CLASS_SEPARATOR)
}
