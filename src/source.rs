use crate::dataset::Record;
use crate::error::SourceError;
use async_trait::async_trait;
use std::fmt;

/// Identifier of one external spreadsheet document.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceDescriptor(String);

impl SourceDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceDescriptor {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// What a source returns for one document: its display name and the
/// records of its first sheet, in sheet order.
#[derive(Clone, Debug, PartialEq)]
pub struct SheetContents {
    pub title: String,
    pub records: Vec<Record>,
}

/// Remote spreadsheet API.
#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<SheetContents, SourceError>;
}
