//! Serialized system definitions and the `extends` merge.

use serde::{Deserialize, Serialize};

use scriptorium_shared::{Result, ScriptoriumError, Testament};

use crate::Book;

/// A versification system as written in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemDefinition {
    pub id: String,
    /// Parent system; must already be loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Alternative names accepted by [`crate::Registry::get`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Books, or edits to the parent's books, applied in order.
    #[serde(default)]
    pub books: Vec<BookDefinition>,
}

/// One book entry. Without a parent every field but the anchors is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testament: Option<Testament>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapters: Option<Vec<u32>>,
    /// Insert directly after this book.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// Insert directly before this book.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    /// Drop the inherited book with this id.
    #[serde(default)]
    pub remove: bool,
}

/// Produce the flat book list for `def`, starting from the parent's books.
pub(crate) fn materialize(def: &SystemDefinition, parent: Option<Vec<Book>>) -> Result<Vec<Book>> {
    let invalid = |msg: String| ScriptoriumError::validation(format!("{}: {msg}", def.id));
    let mut books = parent.unwrap_or_default();

    for entry in &def.books {
        let existing = books.iter().position(|b| b.id == entry.id);

        if entry.remove {
            let i = existing.ok_or_else(|| invalid(format!("cannot remove unknown book {}", entry.id)))?;
            books.remove(i);
            continue;
        }

        if entry.after.is_some() && entry.before.is_some() {
            return Err(invalid(format!("book {} has both `after` and `before`", entry.id)));
        }

        // Start from the inherited book when overriding.
        let base = existing.map(|i| books.remove(i));
        let book = Book {
            id: entry.id.clone(),
            name: entry
                .name
                .clone()
                .or_else(|| base.as_ref().map(|b| b.name.clone()))
                .ok_or_else(|| invalid(format!("book {} needs a name", entry.id)))?,
            testament: entry
                .testament
                .or_else(|| base.as_ref().map(|b| b.testament))
                .ok_or_else(|| invalid(format!("book {} needs a testament", entry.id)))?,
            chapters: entry
                .chapters
                .clone()
                .or_else(|| base.as_ref().map(|b| b.chapters.clone()))
                .ok_or_else(|| invalid(format!("book {} needs chapters", entry.id)))?,
        };

        let anchor = |target: &str| {
            books
                .iter()
                .position(|b| b.id == target)
                .ok_or_else(|| invalid(format!("anchor {target} not found for {}", entry.id)))
        };
        let at = match (&entry.after, &entry.before) {
            (Some(after), None) => anchor(after)? + 1,
            (None, Some(before)) => anchor(before)?,
            // Overrides keep their slot; new books go last.
            _ => existing.unwrap_or(books.len()),
        };
        books.insert(at, book);
    }

    Ok(books)
}
