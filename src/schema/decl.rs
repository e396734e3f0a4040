//! Declarative schema model accepted from json or built programmatically.
//!
//! Property ids and main-region offsets are assigned from declaration order,
//! so `props` is a vector rather than a map: two declarations that differ
//! only in ordering compile to different layouts on purpose.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result as UResult;
use crate::types::Value;

/// Custom per-property check, run before any bytes are written.
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Per-property transform hook, applied before validation.
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Declared property kind; the closed set of wire type tags plus the
/// declaration-only `object` grouping which flattens into dotted paths.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropKind {
    /// 1-byte boolean.
    Boolean,
    /// 1-byte signed integer.
    Int8,
    /// 1-byte unsigned integer.
    Uint8,
    /// 2-byte signed integer.
    Int16,
    /// 2-byte unsigned integer.
    Uint16,
    /// 4-byte signed integer.
    Int32,
    /// 4-byte unsigned integer.
    Uint32,
    /// 8-byte float.
    Number,
    /// 1-byte enum ordinal backed by a variant table.
    Enum,
    /// 8-byte millisecond timestamp.
    Timestamp,
    /// 8-byte creation timestamp maintained by the engine.
    Created,
    /// 8-byte last-update timestamp maintained by the engine.
    Updated,
    /// Variable-length UTF-8 string.
    String,
    /// Per-locale string.
    Text,
    /// Raw bytes.
    Binary,
    /// Single reference to another node.
    Reference,
    /// List of references, optionally with edge properties.
    References,
    /// Unique human-readable key; whitespace-only values rejected.
    Alias,
    /// Approximate distinct-count sketch fed by hashed inputs.
    Cardinality,
    /// Fixed-size numeric array.
    Vector,
    /// Column-major vector variant.
    Colvec,
    /// Json payload, stringified on the wire.
    Json,
    /// Declaration-only grouping; children flatten into dotted paths.
    Object,
}

/// Element declaration for vector/colvec properties.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorDecl {
    /// Element kind; must be a fixed-width numeric kind.
    pub elem: PropKind,
    /// Declared element count.
    pub len: u32,
}

/// One declared property.
#[derive(Clone, Serialize, Deserialize)]
pub struct PropDecl {
    /// Property name; nested under the parent path for `object` children.
    pub name: String,
    /// Declared kind.
    pub kind: PropKind,
    /// Schema default, applied by the engine for omitted creates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Lower bound for numeric kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound for numeric kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Step constraint for numeric kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    /// Size cap for string/binary/json payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u32>,
    /// Variant table for `enum` kinds; ordinal = index + 1, 0 = unset.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
    /// Referenced type name for reference/references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Reciprocal property on the referenced type, if declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reciprocal: Option<String>,
    /// Edge properties carried per reference in a references list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edge_props: Vec<PropDecl>,
    /// Element spec for vector/colvec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<VectorDecl>,
    /// Children of an `object` declaration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PropDecl>,
    /// Custom validator; programmatic only.
    #[serde(skip)]
    pub validator: Option<Validator>,
    /// Value transform; programmatic only.
    #[serde(skip)]
    pub transform: Option<Transform>,
}

impl fmt::Debug for PropDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropDecl")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("has_validator", &self.validator.is_some())
            .field("has_transform", &self.transform.is_some())
            .finish()
    }
}

impl PropDecl {
    /// Bare declaration of the given kind.
    pub fn new(name: impl Into<String>, kind: PropKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            min: None,
            max: None,
            step: None,
            max_bytes: None,
            variants: Vec::new(),
            target: None,
            reciprocal: None,
            edge_props: Vec::new(),
            vector: None,
            children: Vec::new(),
            validator: None,
            transform: None,
        }
    }

    /// Sets the schema default.
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Sets numeric bounds.
    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>, step: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self.step = step;
        self
    }

    /// Caps payload size for byte-like kinds.
    pub fn with_max_bytes(mut self, max: u32) -> Self {
        self.max_bytes = Some(max);
        self
    }

    /// Declares enum variants.
    pub fn with_variants<S: Into<String>>(mut self, variants: impl IntoIterator<Item = S>) -> Self {
        self.variants = variants.into_iter().map(Into::into).collect();
        self
    }

    /// Declares the reference target type.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Declares the reciprocal property on the target type.
    pub fn with_reciprocal(mut self, prop: impl Into<String>) -> Self {
        self.reciprocal = Some(prop.into());
        self
    }

    /// Attaches edge property declarations to a references list.
    pub fn with_edge_props(mut self, props: Vec<PropDecl>) -> Self {
        self.edge_props = props;
        self
    }

    /// Declares vector element kind and length.
    pub fn with_vector(mut self, elem: PropKind, len: u32) -> Self {
        self.vector = Some(VectorDecl { elem, len });
        self
    }

    /// Nests children under an `object` declaration.
    pub fn with_children(mut self, children: Vec<PropDecl>) -> Self {
        self.children = children;
        self
    }

    /// Installs a custom validator.
    pub fn with_validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    /// Installs a value transform, applied before validation.
    pub fn with_transform<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(f));
        self
    }
}

/// One declared type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeDecl {
    /// Type name, unique within the schema.
    pub name: String,
    /// Properties in declaration order.
    #[serde(default)]
    pub props: Vec<PropDecl>,
}

impl TypeDecl {
    /// Empty type declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            props: Vec::new(),
        }
    }

    /// Appends one property declaration.
    pub fn prop(mut self, prop: PropDecl) -> Self {
        self.props.push(prop);
        self
    }
}

/// Top-level schema declaration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaDecl {
    /// Locale codes shared by all `text` properties, in declared order.
    #[serde(default)]
    pub locales: Vec<String>,
    /// Types in declaration order; ordinal + 1 becomes the wire type tag.
    #[serde(default)]
    pub types: Vec<TypeDecl>,
}

impl SchemaDecl {
    /// Empty declaration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a locale code.
    pub fn locale(mut self, code: impl Into<String>) -> Self {
        self.locales.push(code.into());
        self
    }

    /// Appends a type declaration.
    pub fn ty(mut self, decl: TypeDecl) -> Self {
        self.types.push(decl);
        self
    }

    /// Parses a declaration from json text.
    pub fn from_json(text: &str) -> UResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| crate::error::UmbraError::invalid(format!("schema json: {e}")))
    }
}
