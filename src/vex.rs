//! OpenVEX documents
//!
//! Only the parts needed to decide whether a document is about a package are
//! decoded: statements and the product identities they name. Accepted files
//! are relocated byte-for-byte, so nothing here needs to round-trip.

use serde::Deserialize;

use crate::purl::PackageIdentity;

/// Whether `file_name` follows the VEX file naming convention
pub fn is_vex_file_name(file_name: &str) -> bool {
    matches!(file_name, "openvex.json" | "vex.json")
        || file_name.ends_with(".openvex.json")
        || file_name.ends_with(".vex.json")
}

#[derive(Debug, Clone, Deserialize)]
pub struct VexDocument {
    #[serde(rename = "@id")]
    pub id: Option<String>,
    statements: Option<Vec<Statement>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Statement {
    vulnerability: Option<Vulnerability>,
    #[serde(default)]
    products: Vec<Product>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Vulnerability {
    Name(String),
    Object {
        name: Option<String>,
        #[serde(rename = "@id")]
        id: Option<String>,
    },
}

/// A product is either a bare identifier (early OpenVEX drafts) or a
/// component with an `@id` and optional identifiers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Product {
    Id(String),
    Component {
        #[serde(rename = "@id")]
        id: Option<String>,
        identifiers: Option<Identifiers>,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct Identifiers {
    purl: Option<String>,
}

impl VexDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn statements(&self) -> &[Statement] {
        self.statements.as_deref().unwrap_or_default()
    }

    /// True when any statement names a product matching `target`.
    pub fn mentions(&self, target: &PackageIdentity) -> bool {
        self.statements().iter().any(|s| s.mentions(target))
    }
}

impl Statement {
    pub fn vulnerability(&self) -> Option<&str> {
        match self.vulnerability.as_ref()? {
            Vulnerability::Name(name) => Some(name),
            Vulnerability::Object { name, id } => name.as_deref().or(id.as_deref()),
        }
    }

    /// Product identity strings named by this statement
    pub fn product_ids(&self) -> impl Iterator<Item = &str> {
        self.products.iter().flat_map(|p| match p {
            Product::Id(id) => vec![id.as_str()],
            Product::Component { id, identifiers } => id
                .as_deref()
                .into_iter()
                .chain(identifiers.as_ref().and_then(|i| i.purl.as_deref()))
                .collect(),
        })
    }

    pub fn mentions(&self, target: &PackageIdentity) -> bool {
        self.product_ids().any(|id| target.matches_str(id))
    }
}
