//! Index declarations.
//!
//! Indexes are declared on a collection worker with `use_index` and created
//! through the driver once, right before the first terminal query call.
//!
//! ```ignore
//! let users = as_collection::<User, _>(&driver)
//!     .use_index(users.field("email")?.index().unique())
//!     .use_index(
//!         users.field("created_at")?
//!             .index()
//!             .descending()
//!             .expire_after(Duration::from_secs(3600)),
//!     );
//! ```

use std::time::Duration;

use bson::{doc, Bson, Document};

use crate::expr::{Expr, FieldPath};

/// Key type of one indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Ascending,
    Descending,
    Text,
    Hashed,
    Geo2d,
    Geo2dSphere,
}

impl IndexType {
    fn key_value(&self) -> Bson {
        match self {
            IndexType::Ascending => Bson::Int32(1),
            IndexType::Descending => Bson::Int32(-1),
            IndexType::Text => Bson::String("text".to_string()),
            IndexType::Hashed => Bson::String("hashed".to_string()),
            IndexType::Geo2d => Bson::String("2d".to_string()),
            IndexType::Geo2dSphere => Bson::String("2dsphere".to_string()),
        }
    }

    fn name_suffix(&self) -> &'static str {
        match self {
            IndexType::Ascending => "1",
            IndexType::Descending => "-1",
            IndexType::Text => "text",
            IndexType::Hashed => "hashed",
            IndexType::Geo2d => "2d",
            IndexType::Geo2dSphere => "2dsphere",
        }
    }

    fn supports_ttl(&self) -> bool {
        !matches!(self, IndexType::Text | IndexType::Hashed)
    }
}

/// Collation comparison strength, from base characters only up to full identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollationStrength {
    Primary = 1,
    Secondary = 2,
    Tertiary = 3,
    Quaternary = 4,
    Identical = 5,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collation {
    pub locale: String,
    pub strength: Option<CollationStrength>,
}

impl Collation {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            strength: None,
        }
    }

    pub fn strength(mut self, strength: CollationStrength) -> Self {
        self.strength = Some(strength);
        self
    }

    fn to_document(&self) -> Document {
        let mut collation = doc! { "locale": self.locale.as_str() };

        if let Some(strength) = self.strength {
            collation.insert("strength", strength as i32);
        }

        collation
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub unique: bool,
    pub sparse: bool,
    pub hidden: bool,
    pub expire_after: Option<Duration>,
    pub collation: Option<Collation>,
    pub partial_filter: Option<Expr>,
}

/// A single or compound index over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    keys: Vec<(FieldPath, IndexType)>,
    options: IndexOptions,
}

impl Index {
    pub fn builder(path: impl Into<FieldPath>) -> IndexBuilder {
        IndexBuilder::on(path.into())
    }

    pub fn keys(&self) -> &[(FieldPath, IndexType)] {
        &self.keys
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// The configured name, or one derived from the keys like `age_-1_name_1`.
    pub fn name(&self) -> String {
        if let Some(name) = &self.options.name {
            return name.clone();
        }

        self.keys
            .iter()
            .map(|(path, index_type)| format!("{}_{}", path, index_type.name_suffix()))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// `{path: 1 | -1 | "text" | ...}` in declaration order.
    pub fn keys_document(&self) -> Document {
        self.keys
            .iter()
            .map(|(path, index_type)| (path.to_string(), index_type.key_value()))
            .collect()
    }

    /// Creation options; a TTL on text or hashed keys is dropped with a warning.
    pub fn options_document(&self) -> Document {
        let mut options = doc! { "name": self.name() };

        if self.options.unique {
            options.insert("unique", true);
        }

        if self.options.sparse {
            options.insert("sparse", true);
        }

        if self.options.hidden {
            options.insert("hidden", true);
        }

        if let Some(ttl) = self.options.expire_after {
            match self.keys.iter().find(|(_, index_type)| !index_type.supports_ttl()) {
                Some((path, index_type)) => {
                    tracing::warn!(
                        index = %self.name(),
                        path = %path,
                        index_type = ?index_type,
                        "ignoring expiry on an index type that does not support it",
                    );
                }
                None => {
                    options.insert("expireAfterSeconds", ttl.as_secs() as i64);
                }
            }
        }

        if let Some(collation) = &self.options.collation {
            options.insert("collation", collation.to_document());
        }

        if let Some(filter) = &self.options.partial_filter {
            options.insert("partialFilterExpression", filter.to_document());
        }

        options
    }
}

/// Fluent builder for [`Index`].
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    index: Index,
}

impl IndexBuilder {
    pub(crate) fn on(path: FieldPath) -> Self {
        IndexBuilder {
            index: Index {
                keys: vec![(path, IndexType::Ascending)],
                options: IndexOptions::default(),
            },
        }
    }

    fn last_key_type(mut self, index_type: IndexType) -> Self {
        if let Some((_, last)) = self.index.keys.last_mut() {
            *last = index_type;
        }
        self
    }

    /// Sets the key type of the most recently added field.
    pub fn index_type(self, index_type: IndexType) -> Self {
        self.last_key_type(index_type)
    }

    pub fn descending(self) -> Self {
        self.last_key_type(IndexType::Descending)
    }

    pub fn text(self) -> Self {
        self.last_key_type(IndexType::Text)
    }

    pub fn hashed(self) -> Self {
        self.last_key_type(IndexType::Hashed)
    }

    /// Adds another field, making this a compound index.
    pub fn and(mut self, path: impl Into<FieldPath>, index_type: IndexType) -> Self {
        self.index.keys.push((path.into(), index_type));
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.index.options.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.index.options.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.index.options.sparse = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.index.options.hidden = true;
        self
    }

    /// Documents expire this long after the indexed date value.
    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.index.options.expire_after = Some(ttl);
        self
    }

    pub fn collation(mut self, collation: Collation) -> Self {
        self.index.options.collation = Some(collation);
        self
    }

    /// Only index documents matching `filter`.
    pub fn partial_filter(mut self, filter: Expr) -> Self {
        self.index.options.partial_filter = Some(filter);
        self
    }

    pub fn build(self) -> Index {
        self.index
    }
}

impl From<IndexBuilder> for Index {
    fn from(builder: IndexBuilder) -> Self {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::expr::FieldOp;

    #[test]
    fn compound_keys_keep_declaration_order() {
        let index = Index::builder("age")
            .descending()
            .and("name", IndexType::Ascending)
            .build();

        assert_eq!(index.keys_document(), doc! { "age": -1, "name": 1 });
        assert_eq!(index.name(), "age_-1_name_1");
    }

    #[test]
    fn options_document_includes_set_flags() {
        let index = Index::builder("email")
            .unique()
            .sparse()
            .collation(Collation::new("en").strength(CollationStrength::Secondary))
            .partial_filter(Expr::field(FieldPath::new("active"), FieldOp::Eq, true.into()))
            .name("email_unique")
            .build();

        assert_eq!(
            index.options_document(),
            doc! {
                "name": "email_unique",
                "unique": true,
                "sparse": true,
                "collation": { "locale": "en", "strength": 2 },
                "partialFilterExpression": { "active": { "$eq": true } },
            },
        );
    }

    #[test]
    fn ttl_is_kept_on_plain_keys() {
        let index = Index::builder("created_at")
            .expire_after(Duration::from_secs(60))
            .build();

        assert_eq!(
            index.options_document(),
            doc! { "name": "created_at_1", "expireAfterSeconds": 60_i64 },
        );
    }

    #[test]
    fn ttl_is_dropped_on_text_and_hashed_keys() {
        let text = Index::builder("bio")
            .text()
            .expire_after(Duration::from_secs(60))
            .build();
        let hashed = Index::builder("shard")
            .hashed()
            .expire_after(Duration::from_secs(60))
            .build();

        assert_eq!(text.options_document(), doc! { "name": "bio_text" });
        assert_eq!(hashed.options_document(), doc! { "name": "shard_hashed" });
    }
}
